//! Batch scheduler.
//!
//! Drives a whole batch of transfers through one [`Multiplexer`]: submits
//! every transfer up front (or up to `max_in_flight`), then loops wait →
//! step → harvest → classify → sweep until every transfer has succeeded or
//! one failure aborts the batch. Single-threaded; the caller's thread is the
//! driver.

mod refill;
mod run;

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::retry::{BackoffPolicy, Classifier, TransferError};
use crate::transfer::TransferDescriptor;
use crate::transport::Multiplexer;

/// Upper bound on a single readiness wait.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Tunables of the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerOptions {
    pub backoff: BackoffPolicy,
    /// Caps every wait so parked transfers are swept promptly even when the
    /// multiplexer suggests a long (or unbounded) wait.
    pub poll_timeout_cap: Duration,
    /// Optional bound on concurrently submitted transfers. `None` submits the
    /// whole batch at once and leaves backpressure to the service.
    pub max_in_flight: Option<usize>,
    pub classifier: Classifier,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            poll_timeout_cap: DEFAULT_POLL_TIMEOUT,
            max_in_flight: None,
            classifier: Classifier::default(),
        }
    }
}

impl SchedulerOptions {
    /// Reject tunables under which an always-overloaded transfer would never
    /// reach the backoff ceiling, or the loop could not make progress.
    pub fn validate(&self) -> Result<(), TransferError> {
        let invalid = |msg: String| Err(TransferError::InvalidOptions(msg));
        let b = &self.backoff;
        if b.initial.is_zero() {
            return invalid("initial backoff must be positive".into());
        }
        if !(b.scale_factor.is_finite() && b.scale_factor > 1.0) {
            return invalid(format!(
                "backoff scale factor must be greater than 1 (got {})",
                b.scale_factor
            ));
        }
        if b.max_before_fail <= b.initial {
            return invalid(format!(
                "backoff ceiling {:?} must exceed initial backoff {:?}",
                b.max_before_fail, b.initial
            ));
        }
        if self.poll_timeout_cap.is_zero() {
            return invalid("poll timeout cap must be positive".into());
        }
        if self.max_in_flight == Some(0) {
            return invalid("max_in_flight must be at least 1 when set".into());
        }
        for &code in self.classifier.transient_statuses() {
            if !(100..600).contains(&code) || (200..300).contains(&code) {
                return invalid(format!(
                    "transient status {} is not a non-success HTTP status",
                    code
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of a batch that completed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Transfers whose completion callback ran.
    pub completed: usize,
    /// Overload responses absorbed by backoff.
    pub transient_failures: u32,
    /// Longest backoff applied to any transfer.
    pub max_backoff: Duration,
    pub elapsed: Duration,
}

/// Progress snapshot sent while a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub awaiting_retry: usize,
}

/// Runs batches of transfers over one multiplexer.
pub struct BatchScheduler<M> {
    mux: M,
    options: SchedulerOptions,
    rng: StdRng,
}

impl<M: Multiplexer> BatchScheduler<M> {
    pub fn new(mux: M, options: SchedulerOptions) -> Self {
        Self {
            mux,
            options,
            rng: StdRng::from_entropy(),
        }
    }

    /// Like `new` with a fixed jitter seed, for reproducible backoff.
    pub fn with_seed(mux: M, options: SchedulerOptions, seed: u64) -> Self {
        Self {
            mux,
            options,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn options(&self) -> &SchedulerOptions {
        &self.options
    }

    pub fn multiplexer(&self) -> &M {
        &self.mux
    }

    pub fn multiplexer_mut(&mut self) -> &mut M {
        &mut self.mux
    }

    pub fn into_multiplexer(self) -> M {
        self.mux
    }

    /// Run `transfers` to completion. `on_complete` is called exactly once per
    /// successful transfer with its context and response bytes, in completion
    /// order (not submission order).
    pub fn run<C, F>(
        &mut self,
        transfers: Vec<TransferDescriptor<M::Request, C>>,
        on_complete: F,
    ) -> Result<BatchSummary, TransferError>
    where
        F: FnMut(C, Vec<u8>) -> anyhow::Result<()>,
    {
        self.run_with_progress(transfers, None, on_complete)
    }

    /// Like `run`, also sending [`BatchProgress`] snapshots to `progress_tx`.
    /// A full or closed channel is ignored.
    ///
    /// Options are checked with [`SchedulerOptions::validate`] before anything
    /// is registered.
    pub fn run_with_progress<C, F>(
        &mut self,
        transfers: Vec<TransferDescriptor<M::Request, C>>,
        progress_tx: Option<&tokio::sync::mpsc::Sender<BatchProgress>>,
        on_complete: F,
    ) -> Result<BatchSummary, TransferError>
    where
        F: FnMut(C, Vec<u8>) -> anyhow::Result<()>,
    {
        self.options.validate()?;
        if transfers.is_empty() {
            return Ok(BatchSummary::default());
        }
        run::BatchRun::new(
            &mut self.mux,
            &self.options,
            &mut self.rng,
            transfers,
            progress_tx,
            on_complete,
        )
        .run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        SchedulerOptions::default().validate().unwrap();
    }

    #[test]
    fn options_that_never_reach_the_ceiling_are_rejected() {
        let with_backoff = |initial_ms: u64, scale_factor: f64, ceiling_ms: u64| SchedulerOptions {
            backoff: BackoffPolicy {
                initial: Duration::from_millis(initial_ms),
                scale_factor,
                max_before_fail: Duration::from_millis(ceiling_ms),
            },
            ..SchedulerOptions::default()
        };
        let bad = [
            with_backoff(0, 2.0, 100),
            with_backoff(5, 0.5, 100),
            with_backoff(5, 1.0, 100),
            with_backoff(5, f64::INFINITY, 100),
            with_backoff(100, 2.0, 100),
            SchedulerOptions {
                poll_timeout_cap: Duration::ZERO,
                ..SchedulerOptions::default()
            },
            SchedulerOptions {
                max_in_flight: Some(0),
                ..SchedulerOptions::default()
            },
            SchedulerOptions {
                classifier: Classifier::new(vec![204]),
                ..SchedulerOptions::default()
            },
        ];
        for opts in bad {
            let err = opts.validate().unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::InvalidOptions, "{:?}", opts);
        }
    }
}
