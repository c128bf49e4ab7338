//! The appender chain connecting sample producers to destinations.
//!
//! Producers obtain an [`Appender`] from an [`Appendable`], append samples to it and finally
//! [`commit`](Appender::commit) or [`rollback`](Appender::rollback). Stages compose into one
//! pipeline:
//!
//!  - [`Fanout`] resolves global series ids and forwards every sample to all of its children.
//!  - [`Interceptor`] runs an [`AppendHook`] that may observe, rewrite or drop a sample before it
//!    reaches the next stage.
//!
//! [`SeriesCounter`] and [`SamplePrinter`] are small hooks built on the interceptor.

#![warn(missing_docs)]

mod appender;
mod error;
mod fanout;
mod interceptor;
mod stages;
mod statsd;

pub use self::appender::*;
pub use self::error::*;
pub use self::fanout::*;
pub use self::interceptor::*;
pub use self::stages::*;
