use lambda_runtime::{Error, LambdaEvent};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::aggregate::MetricsAggregate;
use crate::alert::{self, AlertPublisher};
use crate::config::{AlertConfig, Stage};
use crate::events::Trigger;

pub mod config;
pub mod invoke;
pub mod queries;
pub mod warehouse;

use invoke::{InvokeError, NotifierInvoker};
use queries::QUERIES;
use warehouse::{Warehouse, WarehouseSession};

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("error connecting to warehouse {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("query for metric group '{group}' failed: {source}")]
    Query {
        group: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("query for metric group '{group}' returned unexpected rows: {reason}")]
    Shape { group: &'static str, reason: String },
    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

/// Runs every query in order against one session.
///
/// The session is closed before returning, whatever the outcome.
pub async fn extract_metrics<W: Warehouse>(warehouse: &W) -> Result<MetricsAggregate, ExtractError> {
    let mut session = warehouse.connect().await?;
    let result = run_queries(&mut session).await;
    session.close().await;
    result
}

async fn run_queries<S: WarehouseSession>(session: &mut S) -> Result<MetricsAggregate, ExtractError> {
    let mut aggregate = MetricsAggregate::new();
    for query in QUERIES.iter() {
        debug!(group = query.group, "running query");
        let value = session.fetch(query).await?;
        aggregate.insert(query.group, value);
    }
    Ok(aggregate)
}

async fn extract_and_forward<W: Warehouse>(
    warehouse: &W,
    notifier: &dyn NotifierInvoker,
) -> Result<MetricsAggregate, ExtractError> {
    let aggregate = extract_metrics(warehouse).await?;
    info!(groups = aggregate.len(), "warehouse metrics extracted");
    notifier.invoke(&aggregate).await?;
    Ok(aggregate)
}

// extractor lambda handler
pub async fn handler<W: Warehouse>(
    warehouse: &W,
    notifier: &dyn NotifierInvoker,
    alerts: &dyn AlertPublisher,
    alert_config: &AlertConfig,
    evt: LambdaEvent<Value>,
) -> Result<Value, Error> {
    info!("Handling lambda invocation");
    match Trigger::from(evt.payload) {
        Trigger::Scheduled(event) => info!(detail_type = ?event.detail_type, "scheduled run"),
        Trigger::Manual(_) => info!("manual run"),
    }

    match extract_and_forward(warehouse, notifier).await {
        Ok(aggregate) => {
            let groups: Vec<&str> = aggregate.groups().collect();
            Ok(json!({
                "status": "Payload delivered to notifier",
                "groups": groups,
            }))
        }
        Err(err) => {
            alert::report_failure(alerts, alert_config, Stage::Extract, &err).await;
            Err(err.into())
        }
    }
}
