use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The sensor driver could not be acquired from the registry.
    #[error("sensor driver unavailable")]
    DriverUnavailable,

    /// The driver accepted the call but reported a non-zero status.
    #[error("driver rejected {call} with status {status}")]
    DriverRejected { call: &'static str, status: i32 },

    /// Authentication is suspended after repeated failed attempts.
    #[error("authentication locked out")]
    Lockout,

    /// The caller lacks the capability required for this operation.
    #[error("caller is not permitted to {0}")]
    PermissionDenied(&'static str),

    /// The coordinator worker task has exited; no further operations can
    /// be submitted.
    #[error("session coordinator task exited")]
    CoordinatorGone,
}

impl CoordinatorError {
    pub(crate) fn rejected(call: &'static str, status: i32) -> Self {
        Self::DriverRejected { call, status }
    }
}
