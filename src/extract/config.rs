use std::env;
use std::fmt;
use std::time::Duration;

use aws_config::SdkConfig;
use sqlx::postgres::PgSslMode;

use crate::config::{resolve_secret, AlertConfig, KeySourceError, Stage};

#[derive(Clone)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub schema: Option<String>,
    pub ssl_mode: PgSslMode,
    pub connect_timeout: Duration,
}

// hand written so the password never ends up in logs
impl fmt::Debug for WarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl WarehouseConfig {
    pub fn load_from_env() -> Result<WarehouseConfig, String> {
        let schema = env::var("WAREHOUSE_SCHEMA")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Some(schema) = &schema {
            if !is_plain_identifier(schema) {
                return Err(format!(
                    "WAREHOUSE_SCHEMA '{}' is not a plain SQL identifier",
                    schema
                ));
            }
        }

        Ok(WarehouseConfig {
            host: env::var("WAREHOUSE_HOST")
                .map_err(|e| format!("WAREHOUSE_HOST not set - {}", e))?,
            port: env::var("WAREHOUSE_PORT")
                .unwrap_or("5439".to_string())
                .parse::<u16>()
                .map_err(|e| format!("Error parsing WAREHOUSE_PORT to u16 - {}", e))?,
            database: env::var("WAREHOUSE_DATABASE")
                .map_err(|e| format!("WAREHOUSE_DATABASE not set - {}", e))?,
            user: env::var("WAREHOUSE_USER")
                .map_err(|e| format!("WAREHOUSE_USER not set - {}", e))?,
            password: env::var("WAREHOUSE_PASSWORD")
                .map_err(|e| format!("WAREHOUSE_PASSWORD not set - {}", e))?,
            schema,
            ssl_mode: env::var("WAREHOUSE_SSL_MODE")
                .unwrap_or("prefer".to_string())
                .parse::<PgSslMode>()
                .map_err(|e| format!("Error parsing WAREHOUSE_SSL_MODE - {}", e))?,
            connect_timeout: env::var("WAREHOUSE_CONNECT_TIMEOUT")
                .unwrap_or("30".to_string())
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| format!("Error parsing WAREHOUSE_CONNECT_TIMEOUT to u64 - {}", e))?,
        })
    }
}

/// Everything the extractor needs; nothing the notifier uses.
#[derive(Debug, Clone)]
pub struct Config {
    pub warehouse: WarehouseConfig,
    pub notifier_function: String,
    pub alert: AlertConfig,
}

impl Config {
    pub fn load_from_env() -> Result<Config, String> {
        Ok(Config {
            warehouse: WarehouseConfig::load_from_env()?,
            notifier_function: env::var("NOTIFIER_FUNCTION_NAME")
                .map_err(|e| format!("NOTIFIER_FUNCTION_NAME not set - {}", e))?,
            alert: AlertConfig::load_from_env(Stage::Extract)?,
        })
    }

    /// If the warehouse password is a Secrets Manager ARN, replace it with the secret.
    pub async fn resolve_secrets(&mut self, aws_config: &SdkConfig) -> Result<(), KeySourceError> {
        let password = std::mem::take(&mut self.warehouse.password);
        self.warehouse.password = resolve_secret(aws_config, password).await?;
        Ok(())
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
