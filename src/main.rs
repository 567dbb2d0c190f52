use aws_config::BehaviorVersion;
use daily_stats_pipeline::alert::SnsAlertPublisher;
use daily_stats_pipeline::config::Stage;
use daily_stats_pipeline::extract::invoke::LambdaInvoker;
use daily_stats_pipeline::extract::warehouse::PgWarehouse;
use daily_stats_pipeline::{extract, notify};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::Value;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    daily_stats_pipeline::set_up_logging();

    info!(
        "Initializing {} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let clients = daily_stats_pipeline::clients::AwsClients::new(&aws_config);
    let stage = Stage::load_from_env()?;
    info!(%stage, "running pipeline stage");

    match stage {
        Stage::Extract => {
            let mut config = extract::config::Config::load_from_env()?;
            // if the warehouse password is an ARN, get it from Secrets Manager
            config
                .resolve_secrets(&aws_config)
                .await
                .map_err(|e| e.to_string())?;

            let warehouse = PgWarehouse::new(&config.warehouse);
            let notifier = LambdaInvoker::new(clients.lambda.clone(), config.notifier_function.clone());
            let alerts = SnsAlertPublisher::new(clients.sns.clone(), &config.alert);

            run(service_fn(|request: LambdaEvent<Value>| {
                extract::handler(&warehouse, &notifier, &alerts, &config.alert, request)
            }))
            .await
        }
        Stage::Notify => {
            let mut config = notify::config::Config::load_from_env()?;
            config
                .resolve_secrets(&aws_config)
                .await
                .map_err(|e| e.to_string())?;

            let alerts = SnsAlertPublisher::new(clients.sns.clone(), &config.alert);

            run(service_fn(|request: LambdaEvent<Value>| {
                notify::handler(&config, &alerts, request)
            }))
            .await
        }
    }
}
