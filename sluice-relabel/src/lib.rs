//! Relabeling of series.
//!
//! A list of [`RelabelConfig`] rules rewrites or drops label sets, see [`process`]. Since the
//! result for a series only depends on its labels, the [`RelabelCache`] remembers it per global
//! series id. The [`RelabelStage`] plugs both into the appender chain.
//!
//! ```
//! use sluice_labels::Labels;
//! use sluice_relabel::{Action, RelabelConfig, RelabelRegex};
//!
//! let rules = vec![RelabelConfig {
//!     source_labels: vec!["env".to_owned()],
//!     regex: RelabelRegex::new("dev").unwrap(),
//!     action: Action::Drop,
//!     ..Default::default()
//! }];
//!
//! let labels = Labels::from_pairs([("__name__", "up"), ("env", "dev")]);
//! assert_eq!(sluice_relabel::process(&labels, &rules), None);
//! ```

#![warn(missing_docs)]

mod cache;
mod config;
mod process;
mod stage;
mod statsd;

pub use self::cache::*;
pub use self::config::*;
pub use self::process::*;
pub use self::stage::*;
