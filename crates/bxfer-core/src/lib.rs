pub mod config;
pub mod logging;

pub mod retry;
pub mod scheduler;
pub mod transfer;
pub mod transport;

pub use retry::{ErrorKind, TransferError};
pub use scheduler::{BatchProgress, BatchScheduler, BatchSummary, SchedulerOptions};
pub use transfer::{Direction, TransferDescriptor};
pub use transport::{Completion, Exchange, Multiplexer, TransportError};
