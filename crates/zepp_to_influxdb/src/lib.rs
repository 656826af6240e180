//! Batch job that copies Zepp step, sleep and heart-rate data into InfluxDB.

pub mod error;
pub mod influx;

pub use error::{AppError, AppResult};
pub use influx::{InfluxConfig, InfluxWriter};

/// Install the tracing subscriber. The filter comes from `ZEPP_LOG_LEVEL`,
/// then `RUST_LOG`, then `info`.
pub fn init_tracing() {
    let log_env = std::env::var("ZEPP_LOG_LEVEL")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());

    let env_filter = build_env_filter(&log_env);
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::info!("zepp_to_influxdb: log filter: {}", log_env);
}

/// `log_env` plus per-target overrides that keep HTTP internals quiet. An
/// unparsable filter falls back to `info`.
pub fn build_env_filter(log_env: &str) -> tracing_subscriber::EnvFilter {
    let combined_filter = format!("{log_env},hyper=warn,reqwest=warn");
    tracing_subscriber::EnvFilter::try_new(combined_filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hyper=warn,reqwest=warn"))
}
