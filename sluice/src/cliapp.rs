// This module implements the definition of the command line app.
//
// It must not have any other imports, so that the app definition stays independent of the
// pipeline crates.
use clap::{Arg, ArgAction, Command};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ABOUT: &str = "Sluice forwards samples to Prometheus remote-write endpoints.";

pub fn make_app() -> Command {
    Command::new("sluice")
        .disable_help_subcommand(true)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .max_term_width(79)
        .version(VERSION)
        .about(ABOUT)
        .arg(
            Arg::new("config")
                .value_name("CONFIG")
                .long("config")
                .short('c')
                .global(true)
                .env("SLUICE_CONFIG")
                .help("The path to the config folder."),
        )
        .subcommand(
            Command::new("config")
                .about("Show the effective configuration")
                .after_help(
                    "This loads and validates the configuration and prints it as YAML, \
                     including all default values.",
                ),
        )
        .subcommand(
            Command::new("push")
                .about("Push a single sample through the pipeline")
                .after_help(
                    "This builds the full pipeline from the configuration, appends one \
                     sample, and waits until every remote write queue has flushed it.",
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .short('n')
                        .value_name("METRIC")
                        .required(true)
                        .help("The metric name of the sample."),
                )
                .arg(
                    Arg::new("value")
                        .long("value")
                        .short('v')
                        .value_name("VALUE")
                        .required(true)
                        .allow_negative_numbers(true)
                        .value_parser(clap::value_parser!(f64))
                        .help("The sample value."),
                )
                .arg(
                    Arg::new("label")
                        .long("label")
                        .short('l')
                        .value_name("NAME=VALUE")
                        .action(ArgAction::Append)
                        .help("An additional label, can be repeated."),
                )
                .arg(
                    Arg::new("timestamp")
                        .long("timestamp")
                        .value_name("MILLIS")
                        .value_parser(clap::value_parser!(i64))
                        .help("The sample timestamp in milliseconds, defaults to now."),
                )
                .arg(
                    Arg::new("print")
                        .long("print")
                        .action(ArgAction::SetTrue)
                        .help("Log the sample before it enters the pipeline."),
                ),
        )
}
