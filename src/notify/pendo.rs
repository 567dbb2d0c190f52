//! Engagement lookups against the Pendo aggregation API.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{debug, info};

use crate::notify::config::{NamedId, PendoConfig};

const INTEGRATION_KEY_HEADER: &str = "x-pendo-integration-key";

#[derive(thiserror::Error, Debug)]
pub enum AnalyticsError {
    #[error("analytics request '{request}' failed: {source}")]
    Request {
        request: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("analytics request '{request}' returned an unexpected response: {reason}")]
    UnexpectedResponse { request: String, reason: String },
}

/// Reporting window sent with every request, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub first_ms: i64,
    pub last_ms: i64,
}

impl TimeWindow {
    /// From midnight UTC of `start` up to `now`.
    pub fn since(start: NaiveDate, now: DateTime<Utc>) -> Self {
        TimeWindow {
            first_ms: start.and_time(NaiveTime::MIN).and_utc().timestamp_millis(),
            last_ms: now.timestamp_millis(),
        }
    }
}

#[derive(Deserialize)]
struct AggregationResponse {
    #[serde(default)]
    results: Vec<Map<String, Value>>,
}

pub struct PendoClient<'a> {
    http: &'a reqwest::Client,
    config: &'a PendoConfig,
    window: TimeWindow,
}

impl<'a> PendoClient<'a> {
    pub fn new(http: &'a reqwest::Client, config: &'a PendoConfig, window: TimeWindow) -> Self {
        PendoClient {
            http,
            config,
            window,
        }
    }

    /// Total views of one page by one segment over the window.
    pub async fn page_views(&self, segment: &NamedId, page: &NamedId) -> Result<u64, AnalyticsError> {
        let request_id = format!("{}-{}", segment.name, page.name);
        let source = json!({"pageEvents": {"pageId": page.id}});
        self.sum_events(request_id, source, &segment.id, "views").await
    }

    /// Total clicks on one feature by one segment over the window.
    pub async fn feature_clicks(
        &self,
        segment: &NamedId,
        feature_id: &str,
    ) -> Result<u64, AnalyticsError> {
        let request_id = format!("{}-{}", segment.name, feature_id);
        let source = json!({"featureEvents": {"featureId": feature_id}});
        self.sum_events(request_id, source, &segment.id, "clicks").await
    }

    async fn sum_events(
        &self,
        request_id: String,
        mut source: Value,
        segment_id: &str,
        field: &str,
    ) -> Result<u64, AnalyticsError> {
        source["timeSeries"] = json!({
            "period": "dayRange",
            "first": self.window.first_ms.to_string(),
            "last": self.window.last_ms.to_string(),
        });
        let body = json!({
            "response": {"mimeType": "application/json"},
            "request": {
                "name": request_id,
                "pipeline": [
                    {"source": source},
                    {"segment": {"id": segment_id}},
                    {"group": {"fields": {field: {"sum": "numEvents"}}}},
                ],
                "requestId": request_id,
            },
        });

        let request_error = |source| AnalyticsError::Request {
            request: request_id.clone(),
            source,
        };

        let start = Instant::now();
        let response = self
            .http
            .post(&self.config.api_url)
            .header(INTEGRATION_KEY_HEADER, &self.config.integration_key)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        debug!(
            request = %request_id,
            status = %response.status(),
            elapsed_ms = start.elapsed().as_millis(),
            "analytics request completed"
        );

        let response: AggregationResponse = response
            .error_for_status()
            .map_err(request_error)?
            .json()
            .await
            .map_err(request_error)?;

        let count = match response.results.first().and_then(|row| row.get(field)) {
            None | Some(Value::Null) => 0,
            Some(value) => count_value(value).ok_or_else(|| AnalyticsError::UnexpectedResponse {
                request: request_id.clone(),
                reason: format!("'{}' is not a count: {}", field, value),
            })?,
        };
        Ok(count)
    }
}

fn count_value(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
}

/// Engagement counts keyed `segment -> name -> count`, ready for the aggregate.
#[derive(Debug, Default, PartialEq)]
pub struct Engagement {
    pub features: Map<String, Value>,
    pub pages: Map<String, Value>,
}

/// Fetches page views and feature-group clicks for every configured segment.
///
/// Requests run one after another; the first failure aborts the collection.
pub async fn collect_engagement(client: &PendoClient<'_>) -> Result<Engagement, AnalyticsError> {
    let config = client.config;
    let mut engagement = Engagement::default();

    for segment in &config.segments {
        let mut views_by_page = Map::new();
        for page in &config.pages {
            let views = client.page_views(segment, page).await?;
            views_by_page.insert(page.name.clone(), views.into());
        }
        engagement
            .pages
            .insert(segment.name.clone(), Value::Object(views_by_page));
    }

    for segment in &config.segments {
        let mut clicks_by_group = Map::new();
        for group in &config.feature_groups {
            let mut clicks = 0;
            for feature_id in &group.feature_ids {
                clicks += client.feature_clicks(segment, feature_id).await?;
            }
            clicks_by_group.insert(group.name.clone(), clicks.into());
        }
        engagement
            .features
            .insert(segment.name.clone(), Value::Object(clicks_by_group));
    }

    info!(segments = config.segments.len(), "engagement data collected");
    Ok(engagement)
}
