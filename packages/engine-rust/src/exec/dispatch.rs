//! Job dispatch pipeline.
//!
//! A dispatcher is any `tower::Service<Arc<Job>>` whose error type is
//! [`DispatchError`]; it ships the job to a calculation node and resolves with
//! that node's result. The wire protocol is the dispatcher's concern. Two
//! layers are provided for composing dispatchers with `tower::ServiceBuilder`:
//!
//! - [`JobTimeoutLayer`]: fails a job that does not resolve in time
//! - [`JobMetricsLayer`]: tracing span, duration histogram, outcome counter

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use calcgrid_core::{Job, JobId};
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

/// Boxed future returned by the dispatch layers.
pub type DispatchFuture<R> = Pin<Box<dyn Future<Output = Result<R, DispatchError>> + Send>>;

/// Failure of a single job's dispatch. Contained to that job's outcome.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job {job_id} timed out after {timeout_ms}ms")]
    Timeout { job_id: JobId, timeout_ms: u64 },
    #[error("job {job_id} rejected by calculation node: {reason}")]
    Rejected { job_id: JobId, reason: String },
    #[error("job dispatch failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Dispatch pipeline settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-job deadline. `None` waits indefinitely.
    pub job_timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// JobTimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that bounds how long a single job may take to resolve.
#[derive(Debug, Clone)]
pub struct JobTimeoutLayer {
    timeout: Option<Duration>,
}

impl JobTimeoutLayer {
    #[must_use]
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::new(config.job_timeout)
    }
}

impl<S> Layer<S> for JobTimeoutLayer {
    type Service = JobTimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JobTimeoutService {
            inner,
            timeout: self.timeout,
        }
    }
}

/// Service wrapper that enforces the per-job timeout.
#[derive(Debug, Clone)]
pub struct JobTimeoutService<S> {
    inner: S,
    timeout: Option<Duration>,
}

impl<S> Service<Arc<Job>> for JobTimeoutService<S>
where
    S: Service<Arc<Job>, Error = DispatchError> + Send,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = DispatchError;
    type Future = DispatchFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, job: Arc<Job>) -> Self::Future {
        let job_id = job.id();
        let timeout = self.timeout;
        let fut = self.inner.call(job);
        Box::pin(async move {
            let Some(duration) = timeout else {
                return fut.await;
            };
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(DispatchError::Timeout {
                    job_id,
                    timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// JobMetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments job dispatch with a span and metrics.
#[derive(Debug, Clone)]
pub struct JobMetricsLayer;

impl<S> Layer<S> for JobMetricsLayer {
    type Service = JobMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        JobMetricsService { inner }
    }
}

/// Service wrapper that records dispatch duration and outcome.
#[derive(Debug, Clone)]
pub struct JobMetricsService<S> {
    inner: S,
}

impl<S> Service<Arc<Job>> for JobMetricsService<S>
where
    S: Service<Arc<Job>, Error = DispatchError> + Send,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = DispatchError;
    type Future = DispatchFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, job: Arc<Job>) -> Self::Future {
        let span = info_span!(
            "job_dispatch",
            job_id = %job.id(),
            items = job.item_count(),
            cost = job.cost(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(job);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(DispatchError::Timeout { .. }) => "timeout",
                    Err(_) => "error",
                };

                let span = tracing::Span::current();
                #[allow(clippy::cast_possible_truncation)]
                span.record("duration_ms", elapsed.as_millis() as u64);
                span.record("outcome", outcome);

                metrics::counter!("calcgrid_jobs_dispatched_total", "outcome" => outcome)
                    .increment(1);
                metrics::histogram!("calcgrid_job_dispatch_duration_seconds")
                    .record(elapsed.as_secs_f64());

                if let Err(e) = &result {
                    tracing::warn!(error = %e, "job dispatch failed");
                }
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
