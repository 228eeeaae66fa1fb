//! Refill helpers for the batch loop: how long to wait, and how to keep the
//! active set full with queued transfers and parked ones whose backoff has
//! elapsed.

use std::time::{Duration, Instant};

use crate::retry::TransferError;
use crate::transfer::state::ActivateError;
use crate::transport::Multiplexer;

use super::run::BatchRun;

/// Bounded wait for one loop iteration: the multiplexer's hint, capped at
/// `cap`, and never past the earliest parked transfer's due time.
pub(super) fn wait_timeout(
    hint: Option<Duration>,
    cap: Duration,
    next_due: Option<Instant>,
    now: Instant,
) -> Duration {
    let mut timeout = hint.map(|h| h.min(cap)).unwrap_or(cap);
    if let Some(due) = next_due {
        timeout = timeout.min(due.saturating_duration_since(now));
    }
    timeout
}

impl<M, C, F> BatchRun<'_, M, C, F>
where
    M: Multiplexer,
    F: FnMut(C, Vec<u8>) -> anyhow::Result<()>,
{
    /// Block for at most one bounded interval. With requests in flight this
    /// is the multiplexer's readiness wait; with only parked transfers it is a
    /// plain sleep until the next one is due.
    pub(super) fn wait(&mut self) -> Result<(), TransferError> {
        let timeout = wait_timeout(
            self.mux.suggested_wait(),
            self.options.poll_timeout_cap,
            self.arena.next_due(),
            Instant::now(),
        );
        if self.arena.active() > 0 {
            self.mux
                .wait(timeout)
                .map_err(|source| TransferError::Transport { index: None, source })?;
        } else if !timeout.is_zero() {
            std::thread::sleep(timeout);
        }
        Ok(())
    }

    /// Submit queued transfers first, then parked transfers whose backoff has
    /// elapsed, until `max_in_flight` is reached or nothing is left.
    pub(super) fn refill(&mut self) -> Result<(), TransferError> {
        let limit = self.options.max_in_flight.unwrap_or(usize::MAX).max(1);
        while self.arena.active() < limit {
            match self.arena.next_queued() {
                Some(index) => self.submit(index)?,
                None => break,
            }
        }
        let now = Instant::now();
        while self.arena.active() < limit {
            match self.arena.pop_due(now) {
                Some(index) => self.submit(index)?,
                None => break,
            }
        }
        Ok(())
    }

    fn submit(&mut self, index: usize) -> Result<(), TransferError> {
        let mux = &mut *self.mux;
        self.arena
            .activate(index, |request| mux.register(index, request))
            .map_err(|e| match e {
                ActivateError::Register(source) => TransferError::Transport {
                    index: Some(index),
                    source,
                },
                ActivateError::WrongPhase => TransferError::Internal(format!(
                    "transfer {} is neither queued nor due for retry",
                    index
                )),
            })?;
        if let Some(slot) = self.arena.slot(index) {
            tracing::trace!(
                "submitted transfer {} ({:?}, attempt {})",
                index,
                slot.direction,
                slot.retry.retries + 1
            );
        }
        Ok(())
    }
}
