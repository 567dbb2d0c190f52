use chrono::Utc;
use lambda_runtime::{Error, LambdaEvent};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::aggregate::{MetricsAggregate, MissingGroup, PENDO_FEATURES, PENDO_PAGES, WAREHOUSE_GROUPS};
use crate::alert::{self, AlertPublisher};
use crate::config::Stage;
use crate::events::{decode_aggregate, PayloadError};

pub mod config;
pub mod message;
pub mod pendo;
pub mod slack;

use config::Config;
use pendo::{AnalyticsError, PendoClient, TimeWindow};
use slack::WebhookError;

#[derive(thiserror::Error, Debug)]
pub enum NotifyError {
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),
    #[error(transparent)]
    MissingData(#[from] MissingGroup),
    #[error(transparent)]
    Analytics(#[from] AnalyticsError),
    #[error("failed to build http client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// Enriches the aggregate with engagement data, renders it and posts it.
///
/// Warehouse groups are checked before any analytics request is made.
pub async fn enrich_and_deliver(config: &Config, payload: Value) -> Result<String, NotifyError> {
    let mut aggregate: MetricsAggregate = decode_aggregate(payload)?;
    aggregate.require_all(&WAREHOUSE_GROUPS)?;
    let unexpected = aggregate.unexpected_groups(&WAREHOUSE_GROUPS);
    if !unexpected.is_empty() {
        // engagement groups are replaced below, anything else is not rendered
        warn!(groups = ?unexpected, "aggregate carries groups the extractor does not produce");
    }

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .map_err(NotifyError::HttpClient)?;

    let window = TimeWindow::since(config.pendo.start_date, Utc::now());
    debug!(?window, "collecting engagement data");
    let engagement = pendo::collect_engagement(&PendoClient::new(&http, &config.pendo, window)).await?;
    aggregate.insert(PENDO_FEATURES, Value::Object(engagement.features));
    aggregate.insert(PENDO_PAGES, Value::Object(engagement.pages));

    let text = message::render(&aggregate)?;
    info!(message = %text, "rendered stats message");

    slack::post_message(&http, &config.webhook_url, &text).await?;
    info!("Message sent to webhook");
    Ok(text)
}

// notifier lambda handler
pub async fn handler(
    config: &Config,
    alerts: &dyn AlertPublisher,
    evt: LambdaEvent<Value>,
) -> Result<Value, Error> {
    info!("Handling lambda invocation");

    match enrich_and_deliver(config, evt.payload).await {
        Ok(_) => Ok(json!({
            "status": 200,
            "body": json!({"message_sent": true}).to_string(),
        })),
        Err(err) => {
            alert::report_failure(alerts, &config.alert, Stage::Notify, &err).await;
            Err(err.into())
        }
    }
}
