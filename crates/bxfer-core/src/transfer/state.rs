//! Per-batch arena of transfer slots and their state machine.
//!
//! Slots are addressed by index, which is also the token the multiplexer
//! reports on completion, so every lookup is O(1). Counters are kept in step
//! with the phase of every slot; `check` verifies they still partition the
//! batch.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::time::{Duration, Instant};

use super::{Direction, TransferDescriptor};

/// Backoff bookkeeping for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RetryState {
    pub last_failure: Option<Instant>,
    pub current_backoff: Option<Duration>,
    pub retries: u32,
}

impl RetryState {
    /// Instant at which the transfer may be resubmitted.
    pub fn due_at(&self) -> Option<Instant> {
        Some(self.last_failure? + self.current_backoff?)
    }
}

pub(crate) enum Phase<R, H> {
    /// Not yet submitted (only when admission is bounded).
    Queued(R),
    Active(H),
    AwaitingRetry(R),
    /// Handle withdrawn from the multiplexer, verdict pending.
    InHand,
    Succeeded,
    Failed,
    /// Torn down because another transfer aborted the batch.
    Released,
}

/// `activate` could not submit a transfer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ActivateError<E> {
    /// The slot is unknown or neither queued nor parked.
    WrongPhase,
    Register(E),
}

pub(crate) struct Slot<R, H, C> {
    pub direction: Direction,
    pub phase: Phase<R, H>,
    pub retry: RetryState,
    context: Option<C>,
}

/// All transfers of one batch.
pub(crate) struct Arena<R, H, C> {
    slots: Vec<Slot<R, H, C>>,
    queued: VecDeque<usize>,
    /// Parked transfers keyed by due time, earliest first.
    waiting: BinaryHeap<Reverse<(Instant, usize)>>,
    active: usize,
    in_hand: usize,
    succeeded: usize,
    failed: usize,
    released: usize,
}

impl<R, H, C> Arena<R, H, C> {
    pub fn new(descriptors: Vec<TransferDescriptor<R, C>>) -> Self {
        let slots: Vec<Slot<R, H, C>> = descriptors
            .into_iter()
            .map(|d| Slot {
                direction: d.direction,
                phase: Phase::Queued(d.request),
                retry: RetryState::default(),
                context: Some(d.context),
            })
            .collect();
        let queued = (0..slots.len()).collect();
        Self {
            slots,
            queued,
            waiting: BinaryHeap::new(),
            active: 0,
            in_hand: 0,
            succeeded: 0,
            failed: 0,
            released: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    pub fn awaiting_retry(&self) -> usize {
        self.waiting.len()
    }

    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn slot(&self, index: usize) -> Option<&Slot<R, H, C>> {
        self.slots.get(index)
    }

    /// Nothing in flight and nothing waiting to be (re)submitted.
    pub fn is_settled(&self) -> bool {
        self.active == 0 && self.waiting.is_empty() && self.queued.is_empty()
    }

    /// Counters partition the batch and no slot is left in hand.
    pub fn check(&self) -> bool {
        self.in_hand == 0
            && self.active + self.waiting.len() + self.queued.len() + self.succeeded + self.failed
                + self.released
                == self.slots.len()
    }

    pub fn next_queued(&mut self) -> Option<usize> {
        self.queued.pop_front()
    }

    /// Take the parked transfer with the earliest due time if its backoff has
    /// elapsed at `now`. The caller must `activate` it next.
    pub fn pop_due(&mut self, now: Instant) -> Option<usize> {
        let Reverse((due, index)) = *self.waiting.peek()?;
        if due > now {
            return None;
        }
        self.waiting.pop();
        debug_assert_eq!(self.slots[index].retry.due_at(), Some(due));
        Some(index)
    }

    /// Earliest instant at which a parked transfer becomes due.
    pub fn next_due(&self) -> Option<Instant> {
        self.waiting.peek().map(|Reverse((due, _))| *due)
    }

    /// Submit a transfer taken from `next_queued` or `pop_due` through
    /// `register`.
    ///
    /// `register` consumes the request; if it fails the request is gone and
    /// the slot is marked failed.
    pub fn activate<E>(
        &mut self,
        index: usize,
        register: impl FnOnce(R) -> Result<H, E>,
    ) -> Result<(), ActivateError<E>> {
        let slot = self.slots.get_mut(index).ok_or(ActivateError::WrongPhase)?;
        let request = match std::mem::replace(&mut slot.phase, Phase::InHand) {
            Phase::Queued(r) | Phase::AwaitingRetry(r) => r,
            other => {
                slot.phase = other;
                return Err(ActivateError::WrongPhase);
            }
        };
        match register(request) {
            Ok(handle) => {
                slot.phase = Phase::Active(handle);
                self.active += 1;
                Ok(())
            }
            Err(e) => {
                slot.phase = Phase::Failed;
                slot.context = None;
                self.failed += 1;
                Err(ActivateError::Register(e))
            }
        }
    }

    /// Withdraw the handle of an active transfer so its verdict can be
    /// applied. Returns `None` if `index` is unknown or not active.
    pub fn take_active(&mut self, index: usize) -> Option<H> {
        let slot = self.slots.get_mut(index)?;
        if !matches!(slot.phase, Phase::Active(_)) {
            return None;
        }
        match std::mem::replace(&mut slot.phase, Phase::InHand) {
            Phase::Active(handle) => {
                self.active -= 1;
                self.in_hand += 1;
                Some(handle)
            }
            _ => None,
        }
    }

    /// Mark an in-hand transfer as succeeded and hand back its context.
    pub fn succeed(&mut self, index: usize) -> Option<C> {
        let slot = &mut self.slots[index];
        debug_assert!(matches!(slot.phase, Phase::InHand));
        slot.phase = Phase::Succeeded;
        self.in_hand -= 1;
        self.succeeded += 1;
        slot.context.take()
    }

    /// Park an in-hand transfer until `backoff` has elapsed since `now`.
    pub fn park(&mut self, index: usize, request: R, now: Instant, backoff: Duration) {
        let slot = &mut self.slots[index];
        debug_assert!(matches!(slot.phase, Phase::InHand));
        slot.phase = Phase::AwaitingRetry(request);
        slot.retry.last_failure = Some(now);
        slot.retry.current_backoff = Some(backoff);
        slot.retry.retries += 1;
        self.in_hand -= 1;
        self.waiting.push(Reverse((now + backoff, index)));
    }

    /// Mark an in-hand transfer as failed, dropping its context.
    pub fn fail(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        debug_assert!(matches!(slot.phase, Phase::InHand));
        slot.phase = Phase::Failed;
        slot.context = None;
        self.in_hand -= 1;
        self.failed += 1;
    }

    /// Release every non-terminal transfer. Parked and queued requests are
    /// dropped here; handles still registered are returned so the caller can
    /// withdraw them from the multiplexer.
    pub fn release_all(&mut self) -> Vec<(usize, H)> {
        let mut handles = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match std::mem::replace(&mut slot.phase, Phase::Released) {
                terminal @ (Phase::Succeeded | Phase::Failed | Phase::Released) => {
                    slot.phase = terminal;
                    continue;
                }
                Phase::Active(handle) => {
                    self.active -= 1;
                    handles.push((index, handle));
                }
                Phase::InHand => self.in_hand -= 1,
                Phase::Queued(_) | Phase::AwaitingRetry(_) => {}
            }
            slot.context = None;
            self.released += 1;
        }
        self.queued.clear();
        self.waiting.clear();
        handles
    }
}
