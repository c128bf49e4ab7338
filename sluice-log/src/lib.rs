//! Logging for all sluice crates.
//!
//! Library crates only log through the macros re-exported here ([`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`]). The binary installs a subscriber once with [`init`],
//! which is available behind the `init` feature and takes a [`LogConfig`] read from the config
//! file.
//!
//! Messages are lowercase without trailing punctuation. [`error!`] is reserved for lost data,
//! such as samples dropped on shutdown or rejected by a remote endpoint. Connection problems that
//! are retried go to [`warn!`] or lower.
//!
//! Errors are attached as fields so their source chain stays available to the subscriber:
//!
//! ```
//! let error = std::io::Error::other("connection refused");
//! sluice_log::warn!(error = &error as &dyn std::error::Error, "send failed, retrying");
//! ```
//!
//! Where an error has to be rendered into a message, [`LogError`] appends its causes.
//!
//! Tests call [`init_test!`] (feature `test`) to route logs of the calling crate into the test
//! output.

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

#[doc(inline)]
pub use tracing::{Level, debug, error, info, trace, warn};
