use std::env;
use std::fmt;
use std::time::Duration;

use aws_config::SdkConfig;
use chrono::NaiveDate;

use crate::config::{parse_named_list, resolve_secret, AlertConfig, KeySourceError, Stage};

pub const DEFAULT_PENDO_API_URL: &str = "https://app.pendo.io/api/v1/aggregation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedId {
    pub name: String,
    pub id: String,
}

/// Features whose clicks are reported together under one name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroup {
    pub name: String,
    pub feature_ids: Vec<String>,
}

#[derive(Clone)]
pub struct PendoConfig {
    pub api_url: String,
    pub integration_key: String,
    pub start_date: NaiveDate,
    pub segments: Vec<NamedId>,
    pub pages: Vec<NamedId>,
    pub feature_groups: Vec<FeatureGroup>,
}

impl fmt::Debug for PendoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendoConfig")
            .field("api_url", &self.api_url)
            .field("integration_key", &"<redacted>")
            .field("start_date", &self.start_date)
            .field("segments", &self.segments)
            .field("pages", &self.pages)
            .field("feature_groups", &self.feature_groups)
            .finish()
    }
}

impl PendoConfig {
    pub fn load_from_env() -> Result<PendoConfig, String> {
        let start_date = env::var("PENDO_START_DATE")
            .map_err(|e| format!("PENDO_START_DATE not set - {}", e))?;

        Ok(PendoConfig {
            api_url: env::var("PENDO_API_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PENDO_API_URL.to_string()),
            integration_key: env::var("PENDO_INTEGRATION_KEY")
                .map_err(|e| format!("PENDO_INTEGRATION_KEY not set - {}", e))?,
            start_date: NaiveDate::parse_from_str(start_date.trim(), "%Y-%m-%d").map_err(|e| {
                format!("Error parsing PENDO_START_DATE '{}' as YYYY-MM-DD - {}", start_date, e)
            })?,
            segments: named_ids("PENDO_SEGMENTS")?,
            pages: named_ids("PENDO_PAGES")?,
            feature_groups: feature_groups("PENDO_FEATURE_GROUPS")?,
        })
    }
}

fn named_ids(var: &str) -> Result<Vec<NamedId>, String> {
    let raw = env::var(var).map_err(|e| format!("{} not set - {}", var, e))?;
    Ok(parse_named_list(var, &raw)?
        .into_iter()
        .map(|(name, id)| NamedId { name, id })
        .collect())
}

// Name=id1|id2,Other=id3
fn feature_groups(var: &str) -> Result<Vec<FeatureGroup>, String> {
    let raw = env::var(var).map_err(|e| format!("{} not set - {}", var, e))?;
    parse_named_list(var, &raw)?
        .into_iter()
        .map(|(name, ids)| {
            let feature_ids: Vec<String> = ids
                .split('|')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
                .collect();
            if feature_ids.is_empty() {
                return Err(format!("{} group '{}' lists no feature ids", var, name));
            }
            Ok(FeatureGroup { name, feature_ids })
        })
        .collect()
}

/// Everything the notifier needs; nothing the extractor uses.
#[derive(Clone)]
pub struct Config {
    pub pendo: PendoConfig,
    pub webhook_url: String,
    pub http_timeout: Duration,
    pub alert: AlertConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("pendo", &self.pendo)
            .field("webhook_url", &"<redacted>")
            .field("http_timeout", &self.http_timeout)
            .field("alert", &self.alert)
            .finish()
    }
}

impl Config {
    pub fn load_from_env() -> Result<Config, String> {
        Ok(Config {
            pendo: PendoConfig::load_from_env()?,
            webhook_url: env::var("SLACK_WEBHOOK_URL")
                .map_err(|e| format!("SLACK_WEBHOOK_URL not set - {}", e))?,
            http_timeout: env::var("HTTP_TIMEOUT")
                .unwrap_or("30".to_string())
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("Error parsing HTTP_TIMEOUT to u64 - {}", e))?,
            alert: AlertConfig::load_from_env(Stage::Notify)?,
        })
    }

    /// If the Pendo integration key is a Secrets Manager ARN, replace it with the secret.
    pub async fn resolve_secrets(&mut self, aws_config: &SdkConfig) -> Result<(), KeySourceError> {
        let key = std::mem::take(&mut self.pendo.integration_key);
        self.pendo.integration_key = resolve_secret(aws_config, key).await?;
        Ok(())
    }
}
