//! Failure alerts published to the notification topic.

use async_trait::async_trait;
use aws_sdk_sns::Client as SnsClient;
use tracing::{error, info};

use crate::config::{AlertConfig, Stage};

// SNS rejects subjects longer than 100 characters or outside printable ASCII.
const MAX_SUBJECT_LEN: usize = 100;
const SUBJECT_REPLACEMENT: char = '?';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub subject: String,
    pub message: String,
}

impl Alert {
    pub fn stage_failed(stage: Stage, job_name: &str, error: &dyn std::error::Error) -> Self {
        let subject = format!("Stats pipeline failure: {} ({})", job_name, stage)
            .chars()
            .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { SUBJECT_REPLACEMENT })
            .take(MAX_SUBJECT_LEN)
            .collect();
        Alert {
            subject,
            message: format!("Lambda job {} failed: {}", job_name, error_chain(error)),
        }
    }
}

/// Display of an error followed by each of its sources, `: ` separated.
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !out.contains(&cause_text) {
            out.push_str(": ");
            out.push_str(&cause_text);
        }
        source = cause.source();
    }
    out
}

#[derive(thiserror::Error, Debug)]
#[error("failed to publish alert to {topic_arn}: {reason}")]
pub struct AlertError {
    pub topic_arn: String,
    pub reason: String,
}

#[async_trait]
pub trait AlertPublisher: Send + Sync {
    async fn publish(&self, alert: &Alert) -> Result<(), AlertError>;
}

pub struct SnsAlertPublisher {
    client: SnsClient,
    topic_arn: String,
}

impl SnsAlertPublisher {
    pub fn new(client: SnsClient, config: &AlertConfig) -> Self {
        SnsAlertPublisher {
            client,
            topic_arn: config.topic_arn.clone(),
        }
    }
}

#[async_trait]
impl AlertPublisher for SnsAlertPublisher {
    async fn publish(&self, alert: &Alert) -> Result<(), AlertError> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(&alert.subject)
            .message(&alert.message)
            .send()
            .await
            .map_err(|e| AlertError {
                topic_arn: self.topic_arn.clone(),
                reason: e.into_service_error().to_string(),
            })?;
        Ok(())
    }
}

/// Publishes one alert for a failed stage.
///
/// A failure to publish is logged and otherwise dropped; the caller still
/// returns the stage error that triggered the alert.
pub async fn report_failure(
    publisher: &dyn AlertPublisher,
    config: &AlertConfig,
    stage: Stage,
    failure: &dyn std::error::Error,
) {
    error!(stage = %stage, error = %failure, "Lambda job {} failed", config.job_name);
    let alert = Alert::stage_failed(stage, &config.job_name, failure);
    match publisher.publish(&alert).await {
        Ok(()) => info!("SNS notification sent successfully."),
        Err(error) => error!(?error, "Failed to send SNS notification"),
    }
}
