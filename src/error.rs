//! Error kinds per spec.md §7.
//!
//! Recoverable errors (`NotRegistered`, `CaptureSizeMismatch`,
//! `TransientWriteFailure`) stay local to the component that hit them and
//! drive its own retry/recovery state; `InvalidConfig`, `DriverUnavailable`
//! and `FatalShutdown` are surfaced to the caller via [`CoreError`].

use thiserror::Error;

/// Top-level error aggregating every component's errors, mirroring the way
/// an instance in this corpus funnels device/mux/recv errors into one enum.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("priority {0} is not registered")]
    NotRegistered(u8),

    #[error("priority {0} is out of range or reserved")]
    InvalidPriority(u8),

    #[error("led device unavailable: {0}")]
    DriverUnavailable(String),

    #[error("transient write failure: {0}")]
    TransientWriteFailure(String),

    #[error("shutting down")]
    FatalShutdown,

    #[error("arbitrator error: {0}")]
    Arbitrator(#[from] crate::arbitrator::ArbitratorError),

    #[error("driver error: {0}")]
    Driver(#[from] crate::driver::DriverError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
