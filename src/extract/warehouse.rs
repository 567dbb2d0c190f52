use std::io;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Column, ConnectOptions, Connection, Executor, PgConnection, Row, TypeInfo};
use tracing::{debug, info};

use crate::extract::config::WarehouseConfig;
use crate::extract::queries::MetricQuery;
use crate::extract::ExtractError;

/// Something the extractor can open a session against.
#[async_trait]
pub trait Warehouse: Send + Sync {
    type Session: WarehouseSession;

    async fn connect(&self) -> Result<Self::Session, ExtractError>;
}

/// An open connection, scoped to a single invocation.
#[async_trait]
pub trait WarehouseSession: Send {
    /// Runs `query` and returns its metric group value.
    async fn fetch(&mut self, query: &MetricQuery) -> Result<Value, ExtractError>;

    async fn close(self);
}

pub struct PgWarehouse {
    config: WarehouseConfig,
}

impl PgWarehouse {
    pub fn new(config: &WarehouseConfig) -> Self {
        PgWarehouse {
            config: config.clone(),
        }
    }

    fn target(&self) -> String {
        format!(
            "{}:{}/{}",
            self.config.host, self.config.port, self.config.database
        )
    }

    fn connection_error(&self, source: sqlx::Error) -> ExtractError {
        ExtractError::Connection {
            target: self.target(),
            source,
        }
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    type Session = PgSession;

    async fn connect(&self) -> Result<PgSession, ExtractError> {
        let options = PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database)
            .ssl_mode(self.config.ssl_mode);

        info!("connecting to warehouse {}", self.target());
        let mut conn = tokio::time::timeout(self.config.connect_timeout, options.connect())
            .await
            .map_err(|_| {
                self.connection_error(sqlx::Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no connection after {:?}", self.config.connect_timeout),
                )))
            })?
            .map_err(|e| self.connection_error(e))?;

        if let Some(schema) = &self.config.schema {
            // schema was validated as a plain identifier when the config was loaded
            let statement = search_path_statement(schema);
            if let Err(e) = (&mut conn).execute(statement.as_str()).await {
                // best effort, the connection is unusable anyway
                let _ = conn.close().await;
                return Err(self.connection_error(e));
            }
        }

        Ok(PgSession { conn })
    }
}

pub struct PgSession {
    conn: PgConnection,
}

#[async_trait]
impl WarehouseSession for PgSession {
    async fn fetch(&mut self, query: &MetricQuery) -> Result<Value, ExtractError> {
        let query_error = |source| ExtractError::Query {
            group: query.group,
            source,
        };

        let rows = sqlx::query(query.sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(query_error)?;
        debug!(group = query.group, rows = rows.len(), "query returned");

        let rows = rows
            .iter()
            .map(row_to_object)
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_error)?;

        query
            .shape
            .apply(rows)
            .map_err(|reason| ExtractError::Shape {
                group: query.group,
                reason,
            })
    }

    async fn close(self) {
        if let Err(error) = self.conn.close().await {
            tracing::warn!(?error, "failed to close warehouse connection cleanly");
        }
    }
}

fn row_to_object(row: &PgRow) -> Result<Map<String, Value>, sqlx::Error> {
    let mut object = Map::new();
    for column in row.columns() {
        let kind = ColumnKind::from_type_name(column.type_info().name())
            .ok_or_else(|| unsupported_column(column.name(), column.type_info().name()))?;
        let value = column_value(row, column.ordinal(), kind)?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

/// How a warehouse column is carried into the aggregate, keyed by the
/// Postgres type name the driver reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Bool,
    Text,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnKind {
    fn from_type_name(type_name: &str) -> Option<ColumnKind> {
        let kind = match type_name {
            "INT2" => ColumnKind::Int2,
            "INT4" => ColumnKind::Int4,
            "INT8" => ColumnKind::Int8,
            "FLOAT4" => ColumnKind::Float4,
            "FLOAT8" => ColumnKind::Float8,
            "BOOL" => ColumnKind::Bool,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "UNKNOWN" => ColumnKind::Text,
            "DATE" => ColumnKind::Date,
            "TIMESTAMP" => ColumnKind::Timestamp,
            "TIMESTAMPTZ" => ColumnKind::TimestampTz,
            _ => return None,
        };
        Some(kind)
    }
}

fn column_value(row: &PgRow, index: usize, kind: ColumnKind) -> Result<Value, sqlx::Error> {
    let value = match kind {
        ColumnKind::Int2 => row.try_get::<Option<i16>, _>(index)?.map(Value::from),
        ColumnKind::Int4 => row.try_get::<Option<i32>, _>(index)?.map(Value::from),
        ColumnKind::Int8 => row.try_get::<Option<i64>, _>(index)?.map(Value::from),
        ColumnKind::Float4 => row
            .try_get::<Option<f32>, _>(index)?
            .map(|v| float_value(f64::from(v))),
        ColumnKind::Float8 => row.try_get::<Option<f64>, _>(index)?.map(float_value),
        ColumnKind::Bool => row.try_get::<Option<bool>, _>(index)?.map(Value::from),
        ColumnKind::Text => row.try_get::<Option<String>, _>(index)?.map(Value::from),
        ColumnKind::Date => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(date_value),
        ColumnKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(timestamp_value),
        ColumnKind::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(timestamp_tz_value),
    };
    Ok(value.unwrap_or(Value::Null))
}

// NaN and infinities have no JSON form
fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn date_value(date: NaiveDate) -> Value {
    Value::from(date.format("%Y-%m-%d").to_string())
}

fn timestamp_value(timestamp: NaiveDateTime) -> Value {
    Value::from(timestamp.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn timestamp_tz_value(timestamp: DateTime<Utc>) -> Value {
    Value::from(timestamp.to_rfc3339())
}

fn unsupported_column(column: &str, type_name: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: format!("{:?}", column),
        source: format!("unsupported column type {}, cast it in the query", type_name).into(),
    }
}

fn search_path_statement(schema: &str) -> String {
    format!("SET search_path TO {}", schema)
}
