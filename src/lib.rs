use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub mod aggregate;
pub mod alert;
pub mod clients;
pub mod config;
pub mod events;
pub mod extract;
pub mod notify;

pub fn set_up_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();
}
