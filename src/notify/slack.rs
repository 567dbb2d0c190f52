use serde_json::json;
use std::time::Instant;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
#[error("failed to deliver message to webhook: {source}")]
pub struct WebhookError {
    #[from]
    source: reqwest::Error,
}

impl WebhookError {
    pub fn status(&self) -> Option<reqwest::StatusCode> {
        self.source.status()
    }
}

/// Posts `text` to an incoming webhook. Any non 2xx response is an error.
pub async fn post_message(
    http: &reqwest::Client,
    webhook_url: &str,
    text: &str,
) -> Result<(), WebhookError> {
    let start = Instant::now();
    let response = http
        .post(webhook_url)
        .json(&json!({ "text": text }))
        .send()
        .await?;
    debug!(
        status = %response.status(),
        elapsed_ms = start.elapsed().as_millis(),
        "webhook request completed"
    );
    response.error_for_status()?;
    Ok(())
}
