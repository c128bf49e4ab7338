//! Configuration for the sluice binary.
//!
//! The configuration lives in a `config.yml` inside a config directory and is loaded with
//! [`Config::from_path`]. Every section is optional, so an empty file yields a working default
//! configuration that receives samples but sends them nowhere.
//!
//! ```
//! let config = sluice_config::Config::from_yaml_str(
//!     "remote_write: [{url: 'http://localhost:9090/api/v1/write'}]",
//! )
//! .unwrap();
//!
//! assert_eq!(config.remote_write().len(), 1);
//! ```

#![warn(missing_docs)]

mod config;

pub use self::config::*;
