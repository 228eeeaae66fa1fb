//! Classify a finished transfer into success, backend overload, or a permanent failure.

use std::fmt;

use crate::transport::TransportError;

/// Status the storage service returns when it is overloaded and wants the
/// client to come back later.
pub const HTTP_SERVICE_UNAVAILABLE: u32 = 503;

/// Why a transfer failed permanently.
#[derive(Debug)]
pub enum Failure {
    /// The service answered with a status that is neither success nor overload.
    Status(u32),
    /// The transport gave up before a status was available (connect failure,
    /// timeout, aborted callback).
    Transport(TransportError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Status(code) => write!(f, "HTTP {}", code),
            Failure::Transport(e) => write!(f, "{}", e),
        }
    }
}

/// Verdict on one harvested attempt.
#[derive(Debug)]
pub enum Verdict {
    Success,
    /// Backend overload: retry after a backoff.
    Transient(u32),
    Permanent(Failure),
}

/// Maps transport outcomes to verdicts.
///
/// Only the configured overload statuses are retryable; every other non-2xx
/// status and every transport error is permanent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    transient_statuses: Vec<u32>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            transient_statuses: vec![HTTP_SERVICE_UNAVAILABLE],
        }
    }
}

impl Classifier {
    pub fn new(transient_statuses: Vec<u32>) -> Self {
        Self { transient_statuses }
    }

    pub fn transient_statuses(&self) -> &[u32] {
        &self.transient_statuses
    }

    /// Classify a status code alone.
    pub fn classify_status(&self, code: u32) -> Verdict {
        if (200..300).contains(&code) {
            Verdict::Success
        } else if self.transient_statuses.contains(&code) {
            Verdict::Transient(code)
        } else {
            Verdict::Permanent(Failure::Status(code))
        }
    }

    /// Classify a harvested attempt: the transport result combined with the
    /// status it produced.
    pub fn classify(&self, outcome: Result<u32, TransportError>) -> Verdict {
        match outcome {
            Ok(code) => self.classify_status(code),
            Err(e) => Verdict::Permanent(Failure::Transport(e)),
        }
    }
}
