use anyhow::{Context, Result};
use sluice_config::Config;
use sluice_statsd::MetricsClientConfig;

/// Initialize the logging system.
pub fn init_logging(config: &Config) {
    sluice_log::init(config.logging());
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        sluice_log::info!("launching sluice without config folder");
    } else {
        sluice_log::info!(
            "launching sluice from config folder {}",
            config.path().display()
        );
    }

    for remote in config.remote_write() {
        sluice_log::info!("  remote write: {} ({})", remote.name(), remote.url);
    }
    if config.remote_write().is_empty() {
        sluice_log::warn!("no remote write endpoints configured, samples are discarded");
    }
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    sluice_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host,
        default_tags: config.metrics_default_tags().clone(),
        default_sample_rate: config.metrics_sample_rate().into(),
    })
    .with_context(|| format!("failed to initialize metrics for statsd at {host}"))?;

    Ok(())
}
