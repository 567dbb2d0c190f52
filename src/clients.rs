use aws_config::retry::RetryConfig;
use aws_config::SdkConfig;
use aws_sdk_lambda::Client as LambdaClient;
use aws_sdk_sns::Client as SnsClient;

/// A type used to hold the AWS clients required to interact with AWS services
/// used by the lambda function.
///
/// The clients never retry: a notifier invoke or an alert is sent at most once
/// per invocation.
#[derive(Clone)]
pub struct AwsClients {
    pub sns: SnsClient,
    pub lambda: LambdaClient,
}

impl AwsClients {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        let sdk_config = single_attempt(sdk_config);
        AwsClients {
            sns: SnsClient::new(&sdk_config),
            lambda: LambdaClient::new(&sdk_config),
        }
    }
}

fn single_attempt(sdk_config: &SdkConfig) -> SdkConfig {
    sdk_config
        .to_builder()
        .retry_config(RetryConfig::disabled())
        .build()
}
