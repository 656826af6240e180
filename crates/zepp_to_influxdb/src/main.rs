use anyhow::Context;
use zepp_client::config::Config;
use zepp_client::pipeline;
use zepp_to_influxdb::{AppError, InfluxConfig, InfluxWriter, init_tracing};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("reading Zepp configuration")?;
    let influx = InfluxConfig::from_env().context("reading InfluxDB configuration")?;
    tracing::info!(
        query_duration_days = config.query_duration_days,
        bucket = %influx.bucket,
        measurement = %config.measurement,
        "zepp_to_influxdb: starting sync"
    );

    let writer = InfluxWriter::new(influx, config.http_timeout)?;
    let report = pipeline::run(&config, &writer)
        .await
        .map_err(AppError::Sync)
        .context("sync aborted")?;

    if !report.failed_days.is_empty() {
        tracing::warn!(
            failed_days = ?report.failed_days,
            "zepp_to_influxdb: some days could not be decoded and were skipped"
        );
    }
    if !report.skipped_event_sources.is_empty() {
        tracing::warn!(
            skipped = ?report.skipped_event_sources,
            "zepp_to_influxdb: some event sources were unavailable"
        );
    }
    tracing::info!(
        points_written = report.points_written,
        "zepp_to_influxdb: done"
    );
    Ok(())
}
