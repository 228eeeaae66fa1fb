//! Terminal errors of a batch.

use std::time::Duration;

use thiserror::Error;

use super::classify::Failure;
use crate::transport::TransportError;

/// Error taxonomy for a batch.
///
/// `TransientOverload` exists for classification only: it is absorbed by the
/// backoff loop and never returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientOverload,
    PermanentProtocolError,
    ExhaustedRetryBudget,
    InternalSchedulingError,
    CompletionCallback,
    Transport,
    /// Scheduler tunables that could never reach the retry ceiling.
    InvalidOptions,
}

/// Terminal failure of a batch, tagged with the transfer that caused it.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer {index}: permanent failure: {failure}")]
    Permanent { index: usize, failure: Failure },

    #[error(
        "transfer {index}: retry budget exhausted after {retries} retries \
         (next backoff {next_backoff:?} >= {ceiling:?})"
    )]
    ExhaustedRetryBudget {
        index: usize,
        retries: u32,
        next_backoff: Duration,
        ceiling: Duration,
    },

    #[error("transfer {index}: completion callback failed")]
    Callback {
        index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("transport failure{}", .index.map(|i| format!(" (transfer {})", i)).unwrap_or_default())]
    Transport {
        index: Option<usize>,
        #[source]
        source: TransportError,
    },

    #[error("internal scheduling error: {0}")]
    Internal(String),

    #[error("invalid scheduler options: {0}")]
    InvalidOptions(String),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Permanent { .. } => ErrorKind::PermanentProtocolError,
            TransferError::ExhaustedRetryBudget { .. } => ErrorKind::ExhaustedRetryBudget,
            TransferError::Callback { .. } => ErrorKind::CompletionCallback,
            TransferError::Transport { .. } => ErrorKind::Transport,
            TransferError::Internal(_) => ErrorKind::InternalSchedulingError,
            TransferError::InvalidOptions(_) => ErrorKind::InvalidOptions,
        }
    }

    /// Index of the transfer that triggered the failure, when there is one.
    pub fn index(&self) -> Option<usize> {
        match self {
            TransferError::Permanent { index, .. }
            | TransferError::ExhaustedRetryBudget { index, .. }
            | TransferError::Callback { index, .. } => Some(*index),
            TransferError::Transport { index, .. } => *index,
            TransferError::Internal(_) | TransferError::InvalidOptions(_) => None,
        }
    }
}
