use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sluice_labels::{Exemplar, FloatHistogram, Histogram, Labels, Metadata};

use crate::{AppendError, Appendable, Appender, Discard};

/// Hooks run by an [`Interceptor`] before data reaches the next stage.
///
/// Every hook receives the appender of the next stage and decides whether and how to forward.
/// Not forwarding drops the data. The default implementations forward unchanged.
#[async_trait]
pub trait AppendHook: Send + Sync + 'static {
    /// Called for every float sample.
    async fn on_append(
        &self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        next.append(series_ref, labels, timestamp, value).await
    }

    /// Called for every exemplar.
    async fn on_append_exemplar(
        &self,
        series_ref: u64,
        labels: &Labels,
        exemplar: &Exemplar,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        next.append_exemplar(series_ref, labels, exemplar).await
    }

    /// Called for every native histogram sample.
    async fn on_append_histogram(
        &self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        histogram: Option<&Histogram>,
        float_histogram: Option<&FloatHistogram>,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        next.append_histogram(series_ref, labels, timestamp, histogram, float_histogram)
            .await
    }

    /// Called for every metadata update.
    async fn on_update_metadata(
        &self,
        series_ref: u64,
        labels: &Labels,
        metadata: &Metadata,
        next: &mut dyn Appender,
    ) -> Result<u64, AppendError> {
        next.update_metadata(series_ref, labels, metadata).await
    }
}

/// A single-child appendable that runs an [`AppendHook`] in front of the next stage.
///
/// Without a next stage, whatever the hook forwards is discarded.
pub struct Interceptor<H> {
    hook: Arc<H>,
    next: Option<Arc<dyn Appendable>>,
}

impl<H: AppendHook> Interceptor<H> {
    /// Creates an interceptor running `hook` in front of `next`.
    pub fn new(hook: H, next: Option<Arc<dyn Appendable>>) -> Self {
        Self {
            hook: Arc::new(hook),
            next,
        }
    }

    /// Returns the hook of this interceptor.
    pub fn hook(&self) -> &H {
        &self.hook
    }
}

impl<H> fmt::Debug for Interceptor<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("hook", &std::any::type_name::<H>())
            .field("next", &self.next.is_some())
            .finish()
    }
}

impl<H: AppendHook> Appendable for Interceptor<H> {
    fn appender(&self) -> Box<dyn Appender> {
        let next = match &self.next {
            Some(next) => next.appender(),
            None => Box::new(Discard),
        };

        Box::new(InterceptorAppender {
            hook: self.hook.clone(),
            next,
        })
    }
}

struct InterceptorAppender<H> {
    hook: Arc<H>,
    next: Box<dyn Appender>,
}

#[async_trait]
impl<H: AppendHook> Appender for InterceptorAppender<H> {
    async fn append(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        value: f64,
    ) -> Result<u64, AppendError> {
        self.hook
            .on_append(series_ref, labels, timestamp, value, self.next.as_mut())
            .await
    }

    async fn append_exemplar(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        exemplar: &Exemplar,
    ) -> Result<u64, AppendError> {
        self.hook
            .on_append_exemplar(series_ref, labels, exemplar, self.next.as_mut())
            .await
    }

    async fn append_histogram(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        timestamp: i64,
        histogram: Option<&Histogram>,
        float_histogram: Option<&FloatHistogram>,
    ) -> Result<u64, AppendError> {
        self.hook
            .on_append_histogram(
                series_ref,
                labels,
                timestamp,
                histogram,
                float_histogram,
                self.next.as_mut(),
            )
            .await
    }

    async fn update_metadata(
        &mut self,
        series_ref: u64,
        labels: &Labels,
        metadata: &Metadata,
    ) -> Result<u64, AppendError> {
        self.hook
            .on_update_metadata(series_ref, labels, metadata, self.next.as_mut())
            .await
    }

    async fn commit(&mut self) -> Result<(), AppendError> {
        self.next.commit().await
    }

    async fn rollback(&mut self) -> Result<(), AppendError> {
        self.next.rollback().await
    }
}
