//! Transport multiplexer protocol.
//!
//! The batch scheduler drives a multiplexer through register / step /
//! harvest / deregister and never touches the network itself. Each
//! registered request carries a token (the transfer's index in the batch) so
//! completions map back to transfers without a scan.

pub mod multi;

use std::time::Duration;

use thiserror::Error;

/// Failure reported by the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("curl: {0}")]
    Curl(#[from] curl::Error),
    #[error("curl multi: {0}")]
    Multi(#[from] curl::MultiError),
    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
    #[error("{0}")]
    Other(String),
}

/// A request that is not currently submitted: owns its payload and response
/// buffers and can be replayed.
pub trait Exchange {
    /// Reset for another attempt: payload cursor back to 0, response emptied.
    fn rewind(&mut self);

    /// Protocol status produced by the last attempt.
    fn status(&mut self) -> Result<u32, TransportError>;

    /// Move the response bytes out, leaving the buffer empty.
    fn take_response(&mut self) -> Vec<u8>;
}

/// One finished request reported by [`Multiplexer::harvest`].
#[derive(Debug)]
pub struct Completion {
    pub token: usize,
    pub result: Result<(), TransportError>,
}

/// Owns the set of in-flight requests.
///
/// The scheduler is the only client and drives it from one thread.
pub trait Multiplexer {
    type Request: Exchange;
    type Handle;

    /// Submit `request`; completions for it will carry `token`.
    fn register(&mut self, token: usize, request: Self::Request)
        -> Result<Self::Handle, TransportError>;

    /// Withdraw a request (finished or not) and hand its buffers back.
    fn deregister(&mut self, handle: Self::Handle) -> Result<Self::Request, TransportError>;

    /// How long the transport would like the caller to wait before the next
    /// step. `None` means no opinion.
    fn suggested_wait(&self) -> Option<Duration>;

    /// Block until some request may make progress or `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<(), TransportError>;

    /// Advance in-flight requests; returns how many are still running.
    fn step(&mut self) -> Result<usize, TransportError>;

    /// Drain requests that finished since the last harvest.
    fn harvest(&mut self) -> Result<Vec<Completion>, TransportError>;
}
