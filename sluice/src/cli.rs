use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use sluice_config::Config;
use sluice_labels::{Labels, METRIC_NAME};

use crate::cliapp::make_app;
use crate::pipeline::Pipeline;
use crate::setup;

/// The config folder used when neither `--config` nor `SLUICE_CONFIG` is given.
const DEFAULT_CONFIG_PATH: &str = ".sluice";

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let app = make_app();
    let matches = app.get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or(DEFAULT_CONFIG_PATH);

    let config = Config::from_path(config_path)
        .with_context(|| format!("could not load config from {config_path}"))?;

    setup::init_logging(&config);

    match matches.subcommand() {
        Some(("config", _)) => dump_config(&config),
        Some(("push", push_matches)) => push(config, push_matches),
        _ => unreachable!(),
    }
}

#[allow(clippy::print_stdout)]
fn dump_config(config: &Config) -> Result<()> {
    let yaml = config.to_yaml_string()?;
    print!("{yaml}");
    Ok(())
}

fn push(config: Config, matches: &ArgMatches) -> Result<()> {
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    let labels = push_labels(matches)?;
    let value = matches.get_one::<f64>("value").copied().unwrap_or_default();
    let timestamp = matches
        .get_one::<i64>("timestamp")
        .copied()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let print = matches.get_flag("print");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(async {
        let pipeline = Pipeline::start(&config, print).await?;

        let mut appender = pipeline.appender();
        let result = async {
            appender.append(0, &labels, timestamp, value).await?;
            appender.commit().await
        }
        .await;

        if result.is_err() {
            appender.rollback().await.ok();
        }

        pipeline.shutdown().await;
        result.context("failed to push sample")
    })
}

/// Builds the label set of the pushed sample from `--name` and `--label` arguments.
fn push_labels(matches: &ArgMatches) -> Result<Labels> {
    let mut pairs = Vec::new();

    if let Some(name) = matches.get_one::<String>("name") {
        pairs.push((METRIC_NAME.to_owned(), name.clone()));
    }

    for label in matches.get_many::<String>("label").into_iter().flatten() {
        let Some((name, value)) = label.split_once('=') else {
            bail!("invalid label {label:?}, expected NAME=VALUE");
        };
        if name.is_empty() {
            bail!("invalid label {label:?}, the name must not be empty");
        }
        pairs.push((name.to_owned(), value.to_owned()));
    }

    Ok(Labels::from_pairs(pairs))
}
