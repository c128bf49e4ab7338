//! Process-wide registry of series identities.
//!
//! The [`LabelStore`] assigns every distinct label set a stable global id and translates between
//! that id and the reference ids each remote destination uses locally. Series that are marked
//! stale and not revived within the stale duration are purged by [`LabelStore::check_stale_markers`],
//! which [`spawn_stale_sweeper`] runs periodically.
//!
//! A lookup that finds nothing returns `0`. Id `0` is never assigned to a series.

#![warn(missing_docs)]

mod statsd;
mod store;
mod sweeper;

pub use self::store::*;
pub use self::sweeper::*;
