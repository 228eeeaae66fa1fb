//! Transfer descriptors: one unit of work in a batch.
//!
//! A descriptor pairs a not-yet-submitted transport request (which owns the
//! payload and response buffers) with the caller's output context. The
//! scheduler assigns each descriptor its index in the batch and tracks its
//! progress in an arena (see `state`).

mod buffer;
pub(crate) mod state;

pub use buffer::{Payload, ResponseBuffer, RESPONSE_BUFFER_DEFAULT_SIZE};

/// Whether a transfer reads a fragment from the service or writes one to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// A unit of work handed to the batch scheduler.
pub struct TransferDescriptor<R, C> {
    pub direction: Direction,
    pub request: R,
    pub context: C,
}

impl<R, C> TransferDescriptor<R, C> {
    pub fn new(direction: Direction, request: R, context: C) -> Self {
        Self {
            direction,
            request,
            context,
        }
    }

    pub fn read(request: R, context: C) -> Self {
        Self::new(Direction::Read, request, context)
    }

    pub fn write(request: R, context: C) -> Self {
        Self::new(Direction::Write, request, context)
    }
}
