//! Retry and backoff policy.
//!
//! This module encapsulates outcome classification (success, backend
//! overload, anything else) and the exponential backoff arithmetic so the
//! batch scheduler only has to apply verdicts, never compute them.

mod classify;
mod error;
mod policy;

pub use classify::{Classifier, Failure, Verdict, HTTP_SERVICE_UNAVAILABLE};
pub use error::{ErrorKind, TransferError};
pub use policy::{BackoffDecision, BackoffPolicy};
