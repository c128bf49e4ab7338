use bytes::Bytes;
use prost::Message;
use sluice_labels::{
    BucketSpan, CounterResetHint, Exemplar, FloatHistogram, Histogram, Labels, Metadata,
    MetricType,
};

use crate::StoreError;
use crate::proto;

/// The data point carried by a [`TimeSeries`].
#[derive(Clone, Debug, PartialEq)]
pub enum SeriesData {
    /// A float sample.
    Sample(f64),
    /// An exemplar.
    Exemplar(Exemplar),
    /// An integer native histogram.
    Histogram(Histogram),
    /// A float native histogram.
    FloatHistogram(FloatHistogram),
}

/// One data point of a series, as queued for sending.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    /// Reference of the series, selects the shard.
    pub series_ref: u64,
    /// Labels as sent on the wire.
    pub labels: Labels,
    /// Timestamp in milliseconds.
    pub timestamp: i64,
    /// The data point.
    pub data: SeriesData,
}

impl TimeSeries {
    /// Creates a float sample.
    pub fn sample(series_ref: u64, labels: Labels, timestamp: i64, value: f64) -> Self {
        Self {
            series_ref,
            labels,
            timestamp,
            data: SeriesData::Sample(value),
        }
    }

    /// Returns the kind of the data point.
    pub fn kind(&self) -> SeriesKind {
        match self.data {
            SeriesData::Sample(_) => SeriesKind::Sample,
            SeriesData::Exemplar(_) => SeriesKind::Exemplar,
            SeriesData::Histogram(_) | SeriesData::FloatHistogram(_) => SeriesKind::Histogram,
        }
    }
}

/// Kinds of data points, counted separately in metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeriesKind {
    /// Float samples.
    Sample,
    /// Exemplars.
    Exemplar,
    /// Native histograms of both flavors.
    Histogram,
}

/// Number of data points per [`SeriesKind`] in a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeriesCounts {
    /// Float samples.
    pub samples: i64,
    /// Exemplars.
    pub exemplars: i64,
    /// Native histograms.
    pub histograms: i64,
}

impl SeriesCounts {
    /// Counts the data points in `batch`.
    pub fn of(batch: &[TimeSeries]) -> Self {
        let mut counts = Self::default();
        for series in batch {
            counts.add(series.kind());
        }
        counts
    }

    /// Counts one data point of the given kind.
    pub fn add(&mut self, kind: SeriesKind) {
        match kind {
            SeriesKind::Sample => self.samples += 1,
            SeriesKind::Exemplar => self.exemplars += 1,
            SeriesKind::Histogram => self.histograms += 1,
        }
    }

    /// Returns the total number of data points.
    pub fn total(&self) -> i64 {
        self.samples + self.exemplars + self.histograms
    }
}

/// Metadata of one metric family, as queued for sending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    /// Name of the metric family.
    pub metric_family_name: String,
    /// The metadata.
    pub metadata: Metadata,
}

/// Builds the wire request for a batch of series.
///
/// Every data point becomes its own wire series.
pub fn build_write_request(batch: &[TimeSeries]) -> proto::WriteRequest {
    let timeseries = batch
        .iter()
        .map(|series| {
            let mut wire = proto::TimeSeries {
                labels: wire_labels(&series.labels),
                ..Default::default()
            };

            match &series.data {
                SeriesData::Sample(value) => wire.samples.push(proto::Sample {
                    value: *value,
                    timestamp: series.timestamp,
                }),
                SeriesData::Exemplar(exemplar) => wire.exemplars.push(proto::Exemplar {
                    labels: wire_labels(&exemplar.labels),
                    value: exemplar.value,
                    timestamp: exemplar.timestamp.unwrap_or(series.timestamp),
                }),
                SeriesData::Histogram(histogram) => wire
                    .histograms
                    .push(wire_histogram(histogram, series.timestamp)),
                SeriesData::FloatHistogram(histogram) => wire
                    .histograms
                    .push(wire_float_histogram(histogram, series.timestamp)),
            }

            wire
        })
        .collect();

    proto::WriteRequest {
        timeseries,
        metadata: Vec::new(),
    }
}

/// Builds the wire request for a batch of metadata.
pub fn build_metadata_request(batch: &[MetadataEntry]) -> proto::WriteRequest {
    let metadata = batch
        .iter()
        .map(|entry| proto::MetricMetadata {
            r#type: wire_metric_type(entry.metadata.metric_type) as i32,
            metric_family_name: entry.metric_family_name.clone(),
            help: entry.metadata.help.clone(),
            unit: entry.metadata.unit.clone(),
        })
        .collect();

    proto::WriteRequest {
        timeseries: Vec::new(),
        metadata,
    }
}

/// Serializes and snappy compresses a request.
pub fn encode_request(request: &proto::WriteRequest) -> Result<Bytes, StoreError> {
    let raw = request.encode_to_vec();
    let compressed = snap::raw::Encoder::new()
        .compress_vec(&raw)
        .map_err(|err| StoreError::unrecoverable(format!("failed to compress request: {err}")))?;
    Ok(Bytes::from(compressed))
}

/// Decompresses and parses a payload created by [`encode_request`].
pub fn decode_request(payload: &[u8]) -> Result<proto::WriteRequest, StoreError> {
    let raw = snap::raw::Decoder::new()
        .decompress_vec(payload)
        .map_err(|err| StoreError::unrecoverable(format!("failed to decompress request: {err}")))?;
    proto::WriteRequest::decode(raw.as_slice())
        .map_err(|err| StoreError::unrecoverable(format!("failed to decode request: {err}")))
}

fn wire_labels(labels: &Labels) -> Vec<proto::Label> {
    labels
        .iter()
        .map(|label| proto::Label {
            name: label.name.clone(),
            value: label.value.clone(),
        })
        .collect()
}

fn wire_spans(spans: &[BucketSpan]) -> Vec<proto::BucketSpan> {
    spans
        .iter()
        .map(|span| proto::BucketSpan {
            offset: span.offset,
            length: span.length,
        })
        .collect()
}

fn wire_reset_hint(hint: CounterResetHint) -> proto::histogram::ResetHint {
    match hint {
        CounterResetHint::Unknown => proto::histogram::ResetHint::Unknown,
        CounterResetHint::CounterReset => proto::histogram::ResetHint::Yes,
        CounterResetHint::NotCounterReset => proto::histogram::ResetHint::No,
        CounterResetHint::Gauge => proto::histogram::ResetHint::Gauge,
    }
}

fn wire_histogram(histogram: &Histogram, timestamp: i64) -> proto::Histogram {
    proto::Histogram {
        count: Some(proto::histogram::Count::CountInt(histogram.count)),
        sum: histogram.sum,
        schema: histogram.schema,
        zero_threshold: histogram.zero_threshold,
        zero_count: Some(proto::histogram::ZeroCount::ZeroCountInt(
            histogram.zero_count,
        )),
        negative_spans: wire_spans(&histogram.negative_spans),
        negative_deltas: histogram.negative_buckets.clone(),
        negative_counts: Vec::new(),
        positive_spans: wire_spans(&histogram.positive_spans),
        positive_deltas: histogram.positive_buckets.clone(),
        positive_counts: Vec::new(),
        reset_hint: wire_reset_hint(histogram.counter_reset_hint) as i32,
        timestamp,
    }
}

fn wire_float_histogram(histogram: &FloatHistogram, timestamp: i64) -> proto::Histogram {
    proto::Histogram {
        count: Some(proto::histogram::Count::CountFloat(histogram.count)),
        sum: histogram.sum,
        schema: histogram.schema,
        zero_threshold: histogram.zero_threshold,
        zero_count: Some(proto::histogram::ZeroCount::ZeroCountFloat(
            histogram.zero_count,
        )),
        negative_spans: wire_spans(&histogram.negative_spans),
        negative_deltas: Vec::new(),
        negative_counts: histogram.negative_buckets.clone(),
        positive_spans: wire_spans(&histogram.positive_spans),
        positive_deltas: Vec::new(),
        positive_counts: histogram.positive_buckets.clone(),
        reset_hint: wire_reset_hint(histogram.counter_reset_hint) as i32,
        timestamp,
    }
}

fn wire_metric_type(metric_type: MetricType) -> proto::MetricType {
    match metric_type {
        MetricType::Unknown => proto::MetricType::Unknown,
        MetricType::Counter => proto::MetricType::Counter,
        MetricType::Gauge => proto::MetricType::Gauge,
        MetricType::Histogram => proto::MetricType::Histogram,
        MetricType::GaugeHistogram => proto::MetricType::GaugeHistogram,
        MetricType::Summary => proto::MetricType::Summary,
        MetricType::Info => proto::MetricType::Info,
        MetricType::StateSet => proto::MetricType::Stateset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_per_data_point() {
        let labels = Labels::from_pairs([("__name__", "up"), ("job", "api")]);
        let exemplar = Exemplar {
            labels: Labels::from_pairs([("trace_id", "abc")]),
            value: 2.0,
            timestamp: None,
        };
        let batch = vec![
            TimeSeries::sample(1, labels.clone(), 1000, 1.0),
            TimeSeries {
                series_ref: 1,
                labels: labels.clone(),
                timestamp: 2000,
                data: SeriesData::Exemplar(exemplar),
            },
        ];

        let request = build_write_request(&batch);
        assert_eq!(request.timeseries.len(), 2);

        let sample = &request.timeseries[0];
        assert_eq!(sample.labels[0].name, "__name__");
        assert_eq!(sample.labels[1].value, "api");
        assert_eq!(sample.samples, [proto::Sample { value: 1.0, timestamp: 1000 }]);
        assert!(sample.exemplars.is_empty());

        let exemplar = &request.timeseries[1].exemplars[0];
        assert_eq!(exemplar.timestamp, 2000);
        assert_eq!(exemplar.labels[0].name, "trace_id");

        assert_eq!(
            SeriesCounts::of(&batch),
            SeriesCounts {
                samples: 1,
                exemplars: 1,
                histograms: 0
            }
        );
    }

    #[test]
    fn test_histogram_flavors() {
        let histogram = Histogram {
            counter_reset_hint: CounterResetHint::Gauge,
            count: 5,
            zero_count: 1,
            positive_spans: vec![BucketSpan {
                offset: 0,
                length: 2,
            }],
            positive_buckets: vec![3, -2],
            ..Default::default()
        };
        let wire = wire_histogram(&histogram, 10);
        assert_eq!(wire.count, Some(proto::histogram::Count::CountInt(5)));
        assert_eq!(wire.positive_deltas, [3, -2]);
        assert!(wire.positive_counts.is_empty());
        assert_eq!(wire.reset_hint, proto::histogram::ResetHint::Gauge as i32);

        let float = FloatHistogram {
            count: 4.0,
            positive_buckets: vec![1.5, 2.5],
            ..Default::default()
        };
        let wire = wire_float_histogram(&float, 10);
        assert_eq!(wire.count, Some(proto::histogram::Count::CountFloat(4.0)));
        assert_eq!(wire.positive_counts, [1.5, 2.5]);
        assert!(wire.positive_deltas.is_empty());
    }

    #[test]
    fn test_encode_decode() {
        let batch = vec![TimeSeries::sample(
            7,
            Labels::from_pairs([("foo", "bar")]),
            1,
            12.0,
        )];
        let request = build_write_request(&batch);

        let payload = encode_request(&request).unwrap();
        assert_eq!(decode_request(&payload).unwrap(), request);
        assert!(decode_request(b"not snappy").is_err());
    }

    #[test]
    fn test_metadata_request() {
        let request = build_metadata_request(&[MetadataEntry {
            metric_family_name: "http_requests_total".to_owned(),
            metadata: Metadata {
                metric_type: MetricType::Counter,
                help: "Total requests.".to_owned(),
                unit: String::new(),
            },
        }]);

        assert!(request.timeseries.is_empty());
        assert_eq!(request.metadata[0].r#type, proto::MetricType::Counter as i32);
        assert_eq!(request.metadata[0].help, "Total requests.");
    }
}
