//! Internal metrics for the sluice pipeline, reported over StatsD.
//!
//! Every crate names its metrics with small enums implementing one of [`CounterMetric`],
//! [`GaugeMetric`] or [`TimerMetric`]. The trait only decides which kind of value a name may be
//! used with, so a counter name cannot accidentally be reported as a gauge.
//!
//! Until [`init`] is called, the [`metric!`] macro does nothing. This keeps library crates free to
//! emit metrics in every code path without caring whether the binary configured a statsd host.
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! use sluice_statsd::MetricsClientConfig;
//!
//! sluice_statsd::init(MetricsClientConfig {
//!     prefix: "sluice",
//!     host: "127.0.0.1:8125",
//!     default_tags: BTreeMap::new(),
//!     default_sample_rate: 1.0.into(),
//! })
//! .ok();
//! ```
//!
//! Recording a value:
//!
//! ```
//! use sluice_statsd::{metric, CounterMetric};
//!
//! struct SamplesSent;
//!
//! impl CounterMetric for SamplesSent {
//!     fn name(&self) -> &'static str {
//!         "remote.samples.sent"
//!     }
//! }
//!
//! metric!(counter(SamplesSent) += 100, destination = "primary");
//! ```
#![warn(missing_docs)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::net::{ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::sync::Arc;

use cadence::{BufferedUdpMetricSink, Metric, MetricBuilder, QueuingMetricSink, StatsdClient};
use parking_lot::RwLock;
use rand::Rng;

/// Metric events buffered in front of the UDP socket before new ones are dropped.
const QUEUE_CAPACITY: usize = 100_000;

/// Fraction of metric events that are reported, clamped to `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate(f64);

impl SampleRate {
    fn keep(self) -> bool {
        match self.0 {
            rate if rate <= 0.0 => false,
            rate if rate >= 1.0 => true,
            rate => rand::rng().random::<f64>() < rate,
        }
    }
}

impl From<f64> for SampleRate {
    fn from(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }
}

impl From<SampleRate> for f64 {
    fn from(value: SampleRate) -> Self {
        value.0
    }
}

/// Error returned by [`init`].
#[derive(Debug, thiserror::Error)]
pub enum MetricsInitError {
    /// The statsd host could not be resolved.
    #[error("could not resolve statsd host")]
    Resolve(#[source] std::io::Error),
    /// The statsd host resolved to no addresses.
    #[error("statsd host resolved to no addresses")]
    NoAddress,
    /// The local UDP socket could not be set up.
    #[error("could not bind metrics socket")]
    Socket(#[source] std::io::Error),
    /// Cadence rejected the sink.
    #[error("could not create metric sink")]
    Sink(#[source] cadence::MetricError),
}

/// Settings for [`init`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix prepended to every metric name.
    pub prefix: &'a str,
    /// Address of the statsd server.
    pub host: A,
    /// Tags attached to every metric.
    pub default_tags: BTreeMap<String, String>,
    /// Fraction of events to report.
    pub default_sample_rate: SampleRate,
}

/// The installed statsd client together with the tags and sampling applied to every metric.
#[derive(Debug)]
pub struct MetricsClient {
    statsd_client: StatsdClient,
    default_tags: BTreeMap<String, String>,
    sample_rate: SampleRate,
}

impl MetricsClient {
    /// Creates a client writing to an arbitrary cadence sink.
    pub fn new(
        statsd_client: StatsdClient,
        default_tags: BTreeMap<String, String>,
        sample_rate: SampleRate,
    ) -> Self {
        Self {
            statsd_client,
            default_tags,
            sample_rate,
        }
    }

    /// Sends a metric after applying default tags and the sample rate.
    ///
    /// Failures are logged and otherwise ignored.
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        if !self.sample_rate.keep() {
            return;
        }

        for (key, value) in &self.default_tags {
            metric = metric.with_tag(key, value);
        }

        if self.sample_rate.0 < 1.0 {
            metric = metric.with_sampling_rate(self.sample_rate.0);
        }

        if let Err(error) = metric.try_send() {
            sluice_log::error!(
                error = &error as &dyn std::error::Error,
                capacity = QUEUE_CAPACITY,
                "failed to send metric",
            );
        }
    }
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

static GLOBAL_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    // Captures the global client on first use per thread so tests can swap it locally.
    static THREAD_CLIENT: RefCell<Option<Arc<MetricsClient>>> =
        RefCell::new(GLOBAL_CLIENT.read().clone());
}

#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// Installs `client` as the process wide metrics client.
pub fn set_client(client: MetricsClient) {
    let client = Arc::new(client);
    *GLOBAL_CLIENT.write() = Some(client.clone());
    THREAD_CLIENT.with(|cell| cell.replace(Some(client)));
}

/// Reports metrics to the statsd server in `config.host`.
pub fn init<A: ToSocketAddrs>(config: MetricsClientConfig<A>) -> Result<(), MetricsInitError> {
    let addr = config
        .host
        .to_socket_addrs()
        .map_err(MetricsInitError::Resolve)?
        .next()
        .ok_or(MetricsInitError::NoAddress)?;

    let sample_rate = f64::from(config.default_sample_rate);
    sluice_log::info!(%addr, sample_rate, "reporting metrics to statsd");
    if sample_rate == 0.0 {
        sluice_log::warn!("metrics sample rate is zero, no metrics will be reported");
    }

    let socket = UdpSocket::bind("0.0.0.0:0").map_err(MetricsInitError::Socket)?;
    socket
        .set_nonblocking(true)
        .map_err(MetricsInitError::Socket)?;
    let udp_sink = BufferedUdpMetricSink::from(addr, socket).map_err(MetricsInitError::Sink)?;
    let sink = QueuingMetricSink::with_capacity(udp_sink, QUEUE_CAPACITY);

    set_client(MetricsClient::new(
        StatsdClient::from_sink(config.prefix, sink),
        config.default_tags,
        config.default_sample_rate,
    ));

    Ok(())
}

/// Runs `f` with the current client, or returns `R::default()` if metrics are not configured.
///
/// Prefer the [`metric!`] macro.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    THREAD_CLIENT.with(|cell| match cell.borrow().as_deref() {
        Some(client) => f(client),
        None => R::default(),
    })
}

/// Runs `f` with a client that records every metric sent on the current thread.
///
/// Returns the captured metrics in statsd line format, for example
/// `remote.samples.dropped:3|c|#destination:primary,reason:shutdown`.
#[cfg(any(test, feature = "test"))]
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    capture_with_rate(1.0, f)
}

#[cfg(any(test, feature = "test"))]
fn capture_with_rate(sample_rate: f64, f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let client = MetricsClient::new(
        StatsdClient::from_sink("", sink),
        BTreeMap::new(),
        sample_rate.into(),
    );

    THREAD_CLIENT.with(|cell| {
        let previous = cell.replace(Some(Arc::new(client)));
        f();
        cell.replace(previous);
    });

    rx.try_iter()
        .map(|line| String::from_utf8_lossy(&line).into_owned())
        .collect()
}

/// A monotonically increasing count, such as samples sent or series dropped.
pub trait CounterMetric {
    /// Name reported to statsd.
    fn name(&self) -> &'static str;
}

/// A value set to the current measurement, such as the number of running shards.
pub trait GaugeMetric {
    /// Name reported to statsd.
    fn name(&self) -> &'static str;
}

/// A duration, reported in milliseconds.
///
/// ```
/// use std::time::Instant;
/// use sluice_statsd::{metric, TimerMetric};
///
/// struct SendDuration;
///
/// impl TimerMetric for SendDuration {
///     fn name(&self) -> &'static str {
///         "remote.send.duration"
///     }
/// }
///
/// let start = Instant::now();
/// metric!(timer(SendDuration) = start.elapsed(), destination = "primary");
/// ```
pub trait TimerMetric {
    /// Name reported to statsd.
    fn name(&self) -> &'static str;
}

/// Records a counter, gauge or timer value with optional tags.
///
/// Counter increments of zero are not sent.
#[macro_export]
macro_rules! metric {
    (counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            0 => {}
            value => $crate::with_client(|client| {
                use $crate::_pred::*;
                client.send_metric(
                    client.count_with_tags($crate::CounterMetric::name(&$id), value)
                        $(.with_tag(stringify!($($k).*), $v))*
                )
            }),
        }
    };

    (gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            client.send_metric(
                client.gauge_with_tags($crate::GaugeMetric::name(&$id), $value)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };

    (timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        $crate::with_client(|client| {
            use $crate::_pred::*;
            // cadence would report a Duration in nanoseconds
            let millis = $value.as_nanos() as f64 / 1e6;
            client.send_metric(
                client.distribution_with_tags($crate::TimerMetric::name(&$id), millis)
                    $(.with_tag(stringify!($($k).*), $v))*
            )
        })
    };
}
