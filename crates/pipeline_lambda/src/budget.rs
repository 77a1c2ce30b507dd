//! Wall-clock budget for one invocation.
//!
//! Handlers are synchronous and block on the AWS SDK, so they run on a
//! blocking thread while the invocation future waits with a deadline.
//! The blocking thread cannot be cancelled, so the work receives the same
//! [`Deadline`] and its side effects go through [`DeadlineGuard`], which
//! refuses them once the budget is spent.

use std::time::{Duration, Instant};

use pipeline_core::PipelineError;

use crate::adapters::dead_letter::{DeadLetterEnvelope, DeadLetterSink};
use crate::adapters::object_store::{DatasetStore, ObjectMetadata, StoreError};

/// Headroom left between our own deadline and the one Lambda enforces.
pub const DEADLINE_SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// Point in time after which a budgeted invocation must not commit anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now() + budget,
            budget,
        }
    }

    pub fn budget_ms(&self) -> u64 {
        u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_expired() {
            return Err(PipelineError::Timeout {
                budget_ms: self.budget_ms(),
            });
        }
        Ok(())
    }
}

/// Runs `work` on the blocking pool and fails with `Timeout` once `budget`
/// has elapsed.
///
/// A timed-out handler keeps running until the execution environment is
/// frozen; its message is not acknowledged, so the queue redelivers it.
/// Writes it attempts after the deadline are refused when made through a
/// [`DeadlineGuard`] built from the deadline passed to `work`.
pub async fn run_with_budget<T, F>(budget: Duration, work: F) -> Result<T, PipelineError>
where
    F: FnOnce(Deadline) -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    let deadline = Deadline::after(budget);
    let task = tokio::task::spawn_blocking(move || work(deadline));
    match tokio::time::timeout(budget, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(PipelineError::Internal(format!(
            "handler task failed: {join_error}"
        ))),
        Err(_) => Err(PipelineError::Timeout {
            budget_ms: deadline.budget_ms(),
        }),
    }
}

/// The configured budget, shortened so it ends before the runtime deadline.
pub fn effective_budget(configured: Duration, deadline_ms: u64, now_ms: u64) -> Duration {
    let remaining = Duration::from_millis(deadline_ms.saturating_sub(now_ms))
        .saturating_sub(DEADLINE_SAFETY_MARGIN);
    configured.min(remaining)
}

/// Wraps a store or dead-letter sink so that writes fail once `deadline`
/// has passed. Reads are passed through.
#[derive(Debug)]
pub struct DeadlineGuard<'a, T> {
    inner: &'a T,
    deadline: Deadline,
}

impl<'a, T> DeadlineGuard<'a, T> {
    pub fn new(inner: &'a T, deadline: Deadline) -> Self {
        Self { inner, deadline }
    }
}

impl<T: DatasetStore> DatasetStore for DeadlineGuard<'_, T> {
    fn put_object(
        &self,
        key: &str,
        body: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<String, StoreError> {
        if self.deadline.is_expired() {
            return Err(StoreError::DeadlineExceeded {
                key: key.to_string(),
                budget_ms: self.deadline.budget_ms(),
            });
        }
        self.inner.put_object(key, body, metadata)
    }

    fn get_object(&self, key: &str, version_id: Option<&str>) -> Result<Vec<u8>, StoreError> {
        self.inner.get_object(key, version_id)
    }

    fn object_fingerprint(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.object_fingerprint(key)
    }
}

impl<T: DeadLetterSink> DeadLetterSink for DeadlineGuard<'_, T> {
    fn forward(&self, envelope: &DeadLetterEnvelope) -> Result<(), PipelineError> {
        self.deadline.check()?;
        self.inner.forward(envelope)
    }
}
