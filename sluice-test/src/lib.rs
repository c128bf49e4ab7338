//! Helpers for testing the pipeline and its destinations.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output is
//!    captured by the test runner. All logs emitted with [`sluice_log`] will show up for test
//!    failures or when run with `--nocapture`.
//!  - To test delivery over HTTP, start a [`MockRemoteWrite`] and point the destination at its
//!    [`url`](MockRemoteWrite::url).
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     sluice_test::setup();
//!
//!     sluice_log::debug!("hello, world!");
//! }
//! ```

mod remote_write;

pub use self::remote_write::*;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from this crate and mutes all other logs.
pub fn setup() {
    sluice_log::init_test!();
}
