//! Batch event loop: wait, step, harvest; apply verdicts to harvested transfers.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::Rng;

use crate::retry::{BackoffDecision, TransferError, Verdict};
use crate::transfer::state::Arena;
use crate::transfer::TransferDescriptor;
use crate::transport::{Completion, Exchange, Multiplexer};

use super::{BatchProgress, BatchSummary, SchedulerOptions};

const COALESCE_PROGRESS_EVERY: usize = 2;

/// State of one batch while it runs.
pub(super) struct BatchRun<'a, M: Multiplexer, C, F> {
    pub(super) mux: &'a mut M,
    pub(super) options: &'a SchedulerOptions,
    rng: &'a mut StdRng,
    pub(super) arena: Arena<M::Request, M::Handle, C>,
    progress_tx: Option<&'a tokio::sync::mpsc::Sender<BatchProgress>>,
    on_complete: F,
    summary: BatchSummary,
    completed_since_send: usize,
}

impl<'a, M, C, F> BatchRun<'a, M, C, F>
where
    M: Multiplexer,
    F: FnMut(C, Vec<u8>) -> anyhow::Result<()>,
{
    pub(super) fn new(
        mux: &'a mut M,
        options: &'a SchedulerOptions,
        rng: &'a mut StdRng,
        transfers: Vec<TransferDescriptor<M::Request, C>>,
        progress_tx: Option<&'a tokio::sync::mpsc::Sender<BatchProgress>>,
        on_complete: F,
    ) -> Self {
        Self {
            mux,
            options,
            rng,
            arena: Arena::new(transfers),
            progress_tx,
            on_complete,
            summary: BatchSummary::default(),
            completed_since_send: 0,
        }
    }

    /// Run until every transfer has succeeded or the batch aborts. On abort
    /// every outstanding transfer is released before returning.
    pub(super) fn run(mut self) -> Result<BatchSummary, TransferError> {
        let started = Instant::now();
        tracing::info!(
            "batch of {} transfers started (max in flight: {:?})",
            self.arena.len(),
            self.options.max_in_flight
        );
        let result = self.drive();
        self.summary.elapsed = started.elapsed();
        match result {
            Ok(()) => {
                self.send_progress();
                tracing::info!(
                    "batch finished: {} transfers, {} overload retries, {:?}",
                    self.summary.completed,
                    self.summary.transient_failures,
                    self.summary.elapsed
                );
                Ok(self.summary)
            }
            Err(e) => {
                let never_submitted = self.arena.queued();
                self.teardown();
                self.send_progress();
                tracing::warn!(
                    "batch aborted after {} of {} transfers ({} never submitted): {}",
                    self.summary.completed,
                    self.arena.len(),
                    never_submitted,
                    e
                );
                Err(e)
            }
        }
    }

    fn drive(&mut self) -> Result<(), TransferError> {
        self.refill()?;
        loop {
            debug_assert!(self.arena.check(), "transfer counters out of step");
            if self.arena.is_settled() {
                if self.arena.succeeded() != self.arena.len() {
                    return Err(TransferError::Internal(format!(
                        "batch settled with {} of {} transfers succeeded",
                        self.arena.succeeded(),
                        self.arena.len()
                    )));
                }
                return Ok(());
            }
            self.wait()?;
            self.mux
                .step()
                .map_err(|source| TransferError::Transport { index: None, source })?;
            let completions = self
                .mux
                .harvest()
                .map_err(|source| TransferError::Transport { index: None, source })?;
            for completion in completions {
                self.complete(completion)?;
            }
            self.refill()?;
        }
    }

    /// Apply the verdict for one harvested request.
    fn complete(&mut self, completion: Completion) -> Result<(), TransferError> {
        let index = completion.token;
        let handle = self.arena.take_active(index).ok_or_else(|| {
            TransferError::Internal(format!(
                "harvested token {} matches no active transfer",
                index
            ))
        })?;
        let mut request = match self.mux.deregister(handle) {
            Ok(r) => r,
            Err(source) => {
                self.arena.fail(index);
                return Err(TransferError::Transport {
                    index: Some(index),
                    source,
                });
            }
        };

        let outcome = completion.result.and_then(|()| request.status());
        match self.options.classifier.classify(outcome) {
            Verdict::Success => {
                let response = request.take_response();
                let context = match self.arena.succeed(index) {
                    Some(c) => c,
                    None => {
                        return Err(TransferError::Internal(format!(
                            "transfer {} succeeded twice",
                            index
                        )))
                    }
                };
                self.summary.completed += 1;
                tracing::debug!(
                    "transfer {} complete ({} response bytes)",
                    index,
                    response.len()
                );
                (self.on_complete)(context, response)
                    .map_err(|source| TransferError::Callback { index, source })?;
                drop(request);
                self.note_completion();
                Ok(())
            }
            Verdict::Transient(code) => {
                self.summary.transient_failures += 1;
                let retry = self
                    .arena
                    .slot(index)
                    .map(|s| s.retry)
                    .unwrap_or_default();
                let jitter: f64 = self.rng.gen();
                match self.options.backoff.decide(retry.current_backoff, jitter) {
                    BackoffDecision::RetryAfter(backoff) => {
                        request.rewind();
                        if backoff > self.summary.max_backoff {
                            self.summary.max_backoff = backoff;
                        }
                        tracing::debug!(
                            "transfer {} got HTTP {}; retry {} in {:?}",
                            index,
                            code,
                            retry.retries + 1,
                            backoff
                        );
                        self.arena.park(index, request, Instant::now(), backoff);
                        Ok(())
                    }
                    BackoffDecision::Exhausted(next_backoff) => {
                        drop(request);
                        self.arena.fail(index);
                        Err(TransferError::ExhaustedRetryBudget {
                            index,
                            retries: retry.retries,
                            next_backoff,
                            ceiling: self.options.backoff.max_before_fail,
                        })
                    }
                }
            }
            Verdict::Permanent(failure) => {
                drop(request);
                self.arena.fail(index);
                Err(TransferError::Permanent { index, failure })
            }
        }
    }

    /// Withdraw and drop everything still outstanding.
    fn teardown(&mut self) {
        for (index, handle) in self.arena.release_all() {
            match self.mux.deregister(handle) {
                Ok(request) => drop(request),
                Err(e) => tracing::warn!("could not withdraw transfer {}: {}", index, e),
            }
        }
        debug_assert!(self.arena.check());
    }

    fn note_completion(&mut self) {
        self.completed_since_send += 1;
        if self.completed_since_send >= COALESCE_PROGRESS_EVERY {
            self.send_progress();
        }
    }

    fn send_progress(&mut self) {
        if let Some(tx) = self.progress_tx {
            let _ = tx.try_send(BatchProgress {
                completed: self.summary.completed,
                total: self.arena.len(),
                awaiting_retry: self.arena.awaiting_retry(),
            });
        }
        self.completed_since_send = 0;
    }
}
