use async_trait::async_trait;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use aws_sdk_lambda::Client as LambdaClient;
use std::time::Instant;
use tracing::info;

use crate::aggregate::MetricsAggregate;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("failed to invoke notifier function '{function}': {reason}")]
pub struct InvokeError {
    pub function: String,
    pub reason: String,
}

/// Hands the aggregate record to the notifier stage and waits for it to finish.
#[async_trait]
pub trait NotifierInvoker: Send + Sync {
    async fn invoke(&self, aggregate: &MetricsAggregate) -> Result<(), InvokeError>;
}

/// Invokes the notifier lambda synchronously by name.
pub struct LambdaInvoker {
    client: LambdaClient,
    function_name: String,
}

impl LambdaInvoker {
    pub fn new(client: LambdaClient, function_name: impl Into<String>) -> Self {
        LambdaInvoker {
            client,
            function_name: function_name.into(),
        }
    }

    fn error(&self, reason: impl Into<String>) -> InvokeError {
        InvokeError {
            function: self.function_name.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl NotifierInvoker for LambdaInvoker {
    async fn invoke(&self, aggregate: &MetricsAggregate) -> Result<(), InvokeError> {
        let payload = serde_json::to_vec(aggregate)
            .map_err(|e| self.error(format!("failed to encode payload - {}", e)))?;

        let start = Instant::now();
        let response = self
            .client
            .invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(payload))
            .send()
            .await
            .map_err(|e| self.error(e.into_service_error().to_string()))?;

        info!(
            function = %self.function_name,
            status = response.status_code(),
            elapsed_ms = start.elapsed().as_millis(),
            "notifier invocation completed"
        );

        // the function ran but raised; its error document is in the payload
        if let Some(function_error) = response.function_error() {
            let detail = response
                .payload()
                .map(|blob| String::from_utf8_lossy(blob.as_ref()).into_owned())
                .unwrap_or_default();
            return Err(self.error(format!("{} error - {}", function_error, detail)));
        }

        if !(200..300).contains(&response.status_code()) {
            return Err(self.error(format!(
                "unexpected status code {}",
                response.status_code()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use aws_sdk_lambda::config::{BehaviorVersion, Credentials, Region};
    use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
    use aws_smithy_types::body::SdkBody;
    use serde_json::json;

    // get_mock_lambda_client returns a lambda client that answers every invoke with the given response
    fn get_mock_lambda_client(response: http::Response<SdkBody>) -> LambdaClient {
        let replay_event = ReplayEvent::new(
            http::Request::builder().body(SdkBody::from("")).unwrap(),
            response,
        );

        let conf = aws_sdk_lambda::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(Credentials::new(
                "SOMETESTKEYID",
                "somesecretkey",
                Some("somesessiontoken".to_string()),
                None,
                "",
            ))
            .region(Region::new("us-west-2"))
            .http_client(StaticReplayClient::new(vec![replay_event]))
            .build();

        LambdaClient::from_conf(conf)
    }

    fn aggregate() -> MetricsAggregate {
        let mut aggregate = MetricsAggregate::new();
        aggregate.insert("daily", json!({"signups": 10}));
        aggregate
    }

    #[tokio::test]
    async fn test_invoke_succeeds_when_notifier_completes() {
        let client = get_mock_lambda_client(
            http::Response::builder()
                .status(200)
                .body(SdkBody::from(r#"{"status":200}"#))
                .unwrap(),
        );
        let invoker = LambdaInvoker::new(client, "daily-stats-notify");
        assert_eq!(invoker.invoke(&aggregate()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_invoke_reports_function_error() {
        let client = get_mock_lambda_client(
            http::Response::builder()
                .status(200)
                .header("X-Amz-Function-Error", "Unhandled")
                .body(SdkBody::from(
                    r#"{"errorType":"NotifyError","errorMessage":"webhook rejected message"}"#,
                ))
                .unwrap(),
        );
        let invoker = LambdaInvoker::new(client, "daily-stats-notify");

        let err = invoker.invoke(&aggregate()).await.unwrap_err();
        assert_eq!(err.function, "daily-stats-notify");
        assert!(err.reason.starts_with("Unhandled error"), "got: {}", err.reason);
        assert!(err.reason.contains("webhook rejected message"), "got: {}", err.reason);
    }

    #[tokio::test]
    async fn test_invoke_is_attempted_once() {
        let service_error = ReplayEvent::new(
            http::Request::builder().body(SdkBody::from("")).unwrap(),
            http::Response::builder()
                .status(500)
                .header("x-amzn-errortype", "ServiceException")
                .body(SdkBody::from(r#"{"Type":"Service","message":"internal failure"}"#))
                .unwrap(),
        );
        let success = ReplayEvent::new(
            http::Request::builder().body(SdkBody::from("")).unwrap(),
            http::Response::builder()
                .status(200)
                .body(SdkBody::from(r#"{"status":200}"#))
                .unwrap(),
        );
        let replay = StaticReplayClient::new(vec![service_error, success]);

        // loaded the way main does, with the SDK's default retry policy
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("us-west-2"))
            .credentials_provider(Credentials::new(
                "SOMETESTKEYID",
                "somesecretkey",
                Some("somesessiontoken".to_string()),
                None,
                "",
            ))
            .http_client(replay.clone())
            .load()
            .await;
        let clients = crate::clients::AwsClients::new(&sdk_config);
        let invoker = LambdaInvoker::new(clients.lambda, "daily-stats-notify");

        let err = invoker.invoke(&aggregate()).await.unwrap_err();
        assert_eq!(err.function, "daily-stats-notify");
        assert_eq!(replay.actual_requests().count(), 1);
    }
}
