use async_trait::async_trait;
use sluice_labels::{Exemplar, FloatHistogram, Histogram, Labels, Metadata};

use crate::AppendError;

/// A sink that hands out [`Appender`]s.
///
/// Every stage and destination of the pipeline is an `Appendable`. Each producer batch obtains
/// its own appender, so appenders do not need to be shared between tasks.
pub trait Appendable: Send + Sync {
    /// Creates a new appender for one batch of samples.
    fn appender(&self) -> Box<dyn Appender>;
}

/// Accepts samples for one batch until it is committed or rolled back.
///
/// `series_ref` is a reference id for the series. `0` means the caller does not know the id, and
/// the stage resolves it if it needs one. Successful appends return the reference id the stage
/// used, which callers may pass back on subsequent appends of the same series.
///
/// Exemplars, histograms and metadata are optional. Stages that do not implement them return
/// [`AppendError::Unsupported`].
#[async_trait]
pub trait Appender: Send {
    /// Appends a float sample.
    async fn append(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> Result<u64, AppendError>;

    /// Appends an exemplar for a series.
    async fn append_exemplar(
        &mut self,
        _series_ref: u64,
        _labels: &Labels,
        _exemplar: &Exemplar,
    ) -> Result<u64, AppendError> {
        Err(AppendError::unsupported("append_exemplar"))
    }

    /// Appends a native histogram sample.
    ///
    /// Exactly one of `histogram` and `float_histogram` is expected to be set.
    async fn append_histogram(
        &mut self,
        _series_ref: u64,
        _labels: &Labels,
        _timestamp: i64,
        _histogram: Option<&Histogram>,
        _float_histogram: Option<&FloatHistogram>,
    ) -> Result<u64, AppendError> {
        Err(AppendError::unsupported("append_histogram"))
    }

    /// Updates the metadata of a series.
    async fn update_metadata(
        &mut self,
        _series_ref: u64,
        _labels: &Labels,
        _metadata: &Metadata,
    ) -> Result<u64, AppendError> {
        Err(AppendError::unsupported("update_metadata"))
    }

    /// Submits all data appended since creation.
    async fn commit(&mut self) -> Result<(), AppendError>;

    /// Discards all data appended since creation.
    async fn rollback(&mut self) -> Result<(), AppendError>;
}

/// An appendable that accepts and discards everything.
///
/// Used as the next stage of an [`Interceptor`](crate::Interceptor) without a successor.
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl Appendable for Discard {
    fn appender(&self) -> Box<dyn Appender> {
        Box::new(Discard)
    }
}

#[async_trait]
impl Appender for Discard {
    async fn append(
        &mut self,
        _series_ref: u64,
        _labels: &Labels,
        _timestamp: i64,
        _value: f64,
    ) -> Result<u64, AppendError> {
        Ok(0)
    }

    async fn append_exemplar(
        &mut self,
        _series_ref: u64,
        _labels: &Labels,
        _exemplar: &Exemplar,
    ) -> Result<u64, AppendError> {
        Ok(0)
    }

    async fn append_histogram(
        &mut self,
        _series_ref: u64,
        _labels: &Labels,
        _timestamp: i64,
        _histogram: Option<&Histogram>,
        _float_histogram: Option<&FloatHistogram>,
    ) -> Result<u64, AppendError> {
        Ok(0)
    }

    async fn update_metadata(
        &mut self,
        _series_ref: u64,
        _labels: &Labels,
        _metadata: &Metadata,
    ) -> Result<u64, AppendError> {
        Ok(0)
    }

    async fn commit(&mut self) -> Result<(), AppendError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppendError> {
        Ok(())
    }
}
