//! Delivery of series to remote-write endpoints.
//!
//! Every configured endpoint becomes a [`RemoteWrite`] destination in the appender chain. It
//! resolves the local series references of the endpoint, applies external labels and write
//! relabel rules, and hands the data to a [`QueueManager`]. The queue manager spreads data over
//! shards that batch it into snappy compressed protobuf requests and send them through a
//! [`WriteClient`], usually the [`HttpWriteClient`].
//!
//! The number of shards follows the observed throughput, see [`desired_shards`].

#![warn(missing_docs)]

pub mod proto;

mod client;
mod config;
mod destination;
mod error;
mod ewma;
mod http;
mod queue;
mod retry;
mod series;
mod shards;
mod statsd;

pub use self::client::*;
pub use self::config::*;
pub use self::destination::*;
pub use self::error::*;
pub use self::ewma::*;
pub use self::http::*;
pub use self::queue::QueueManager;
pub use self::series::*;
pub use self::shards::{MAX_DOWNSHARD_DELAY, SHARD_TOLERANCE, ShardRates, desired_shards};
