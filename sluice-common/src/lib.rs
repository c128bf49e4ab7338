//! Common functionality for sluice.

#![warn(missing_docs)]

mod retry;

pub use self::retry::*;
