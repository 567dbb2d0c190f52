use std::env;
use std::fmt;
use std::str::FromStr;

use aws_config::SdkConfig;
use aws_sdk_secretsmanager::operation::get_secret_value::GetSecretValueError;

pub const SECRETS_MANAGER_ARN_PREFIX: &str = "arn:aws:secretsmanager:";

/// Which lambda function this process is serving.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Stage {
    Extract,
    Notify,
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "extract" | "extractor" => Ok(Stage::Extract),
            "notify" | "notifier" => Ok(Stage::Notify),
            other => Err(format!("Invalid or unsupported stage {}", other)),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Stage::Extract => write!(f, "extract"),
            Stage::Notify => write!(f, "notify"),
        }
    }
}

impl Stage {
    pub fn load_from_env() -> Result<Stage, String> {
        env::var("STAGE")
            .map_err(|e| format!("STAGE not set - {}", e))
            .and_then(|s| s.parse::<Stage>())
    }

    /// Job name reported in alerts when `JOB_NAME` is not set.
    pub fn default_job_name(&self) -> &'static str {
        match self {
            Stage::Extract => "daily_stats_extract",
            Stage::Notify => "daily_stats_notify",
        }
    }
}

/// Where failures of a stage are reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertConfig {
    pub topic_arn: String,
    pub job_name: String,
}

impl AlertConfig {
    pub fn load_from_env(stage: Stage) -> Result<AlertConfig, String> {
        Ok(AlertConfig {
            topic_arn: env::var("SNS_TOPIC_ARN")
                .map_err(|e| format!("SNS_TOPIC_ARN not set - {}", e))?,
            job_name: env::var("JOB_NAME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| stage.default_job_name().to_string()),
        })
    }
}

/// Parses `Name=id,Other=id2` into ordered `(name, value)` pairs.
///
/// Names and values are trimmed, empty entries are skipped, and duplicate
/// names are rejected since they would collide in the aggregate.
pub fn parse_named_list(var: &str, raw: &str) -> Result<Vec<(String, String)>, String> {
    let mut entries: Vec<(String, String)> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("{} entry '{}' is not in Name=value form", var, entry))?;
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() || value.is_empty() {
            return Err(format!("{} entry '{}' has an empty name or value", var, entry));
        }
        if entries.iter().any(|(existing, _)| existing == name) {
            return Err(format!("{} lists '{}' more than once", var, name));
        }
        entries.push((name.to_string(), value.to_string()));
    }

    if entries.is_empty() {
        return Err(format!("{} does not list any entries", var));
    }
    Ok(entries)
}

#[derive(thiserror::Error, Debug)]
pub enum KeySourceError {
    #[error("Failed to access AWS Secrets Manager. Please make sure the lambda function has permissions to access the {secret_id} secret. Error: {error:?}")]
    FailedToAccessSecretsManager {
        secret_id: String,
        error: GetSecretValueError,
    },
    #[error("Didn't find the {secret_id} secret in AWS secretsmanager")]
    MissingSecret { secret_id: String },
}

pub fn is_secret_arn(value: &str) -> bool {
    value.starts_with(SECRETS_MANAGER_ARN_PREFIX)
}

pub async fn get_secret_from_secrets_manager(
    aws_config: &SdkConfig,
    secret_id: String,
) -> Result<String, KeySourceError> {
    let secretsmanager = aws_sdk_secretsmanager::Client::new(aws_config);
    let response = secretsmanager
        .get_secret_value()
        .set_secret_id(Some(secret_id.clone()))
        .send()
        .await
        .map_err(|error| KeySourceError::FailedToAccessSecretsManager {
            secret_id: secret_id.clone(),
            error: error.into_service_error(),
        })?;
    response
        .secret_string
        .ok_or(KeySourceError::MissingSecret { secret_id })
}

/// Returns `value` unchanged unless it is a Secrets Manager ARN, in which case
/// the secret string it points to is returned.
pub async fn resolve_secret(aws_config: &SdkConfig, value: String) -> Result<String, KeySourceError> {
    if is_secret_arn(&value) {
        tracing::info!("resolving secret from AWS Secrets Manager");
        return get_secret_from_secrets_manager(aws_config, value).await;
    }
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_stage_from_str() {
        assert_eq!("extract".parse::<Stage>(), Ok(Stage::Extract));
        assert_eq!(" Notify ".parse::<Stage>(), Ok(Stage::Notify));
        assert!("transform".parse::<Stage>().is_err());
    }

    #[test]
    fn test_alert_config_defaults_job_name_per_stage() {
        temp_env::with_vars(
            [
                ("SNS_TOPIC_ARN", Some("arn:aws:sns:eu-west-1:123456789012:stats-alerts")),
                ("JOB_NAME", None),
            ],
            || {
                let config = AlertConfig::load_from_env(Stage::Notify).unwrap();
                assert_eq!(config.topic_arn, "arn:aws:sns:eu-west-1:123456789012:stats-alerts");
                assert_eq!(config.job_name, "daily_stats_notify");
            },
        );
    }

    #[test]
    fn test_alert_config_requires_topic() {
        temp_env::with_vars([("SNS_TOPIC_ARN", None::<&str>)], || {
            let err = AlertConfig::load_from_env(Stage::Extract).unwrap_err();
            assert!(err.starts_with("SNS_TOPIC_ARN not set"), "got: {}", err);
        });
    }

    #[test]
    fn test_parse_named_list_keeps_order() {
        let parsed = parse_named_list("PENDO_PAGES", " Web=p1, iOS = p2 ,Android=p3,").unwrap();
        assert_eq!(
            parsed,
            vec![
                ("Web".to_string(), "p1".to_string()),
                ("iOS".to_string(), "p2".to_string()),
                ("Android".to_string(), "p3".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_named_list_rejects_bad_entries() {
        assert!(parse_named_list("X", "Web").is_err());
        assert!(parse_named_list("X", "=p1").is_err());
        assert!(parse_named_list("X", "Web=").is_err());
        assert!(parse_named_list("X", "Web=a,Web=b").is_err());
        assert!(parse_named_list("X", " , ").is_err());
    }

    #[test]
    fn test_is_secret_arn() {
        assert!(is_secret_arn(
            "arn:aws:secretsmanager:eu-west-1:123456789012:secret:warehouse-AbCdEf"
        ));
        assert!(!is_secret_arn("hunter2"));
    }
}
