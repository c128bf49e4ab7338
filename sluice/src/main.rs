//! The sluice binary.
//!
//! Sluice is the data plane between samples produced by scrapers or rule evaluation and one or
//! more Prometheus remote-write endpoints. Every sample passes a relabel stage and a fan-out to
//! one queue manager per configured endpoint, which batches, compresses and delivers it.
//!
//! # Usage
//!
//! ```text
//! sluice --config <dir> config
//! sluice --config <dir> push --name up --value 1 --label job=node
//! ```
//!
//! The config directory contains a `config.yml`, see [`sluice_config::Config`].

mod cli;
mod cliapp;
mod pipeline;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            sluice_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
