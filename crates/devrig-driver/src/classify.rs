//! Backend failure classification
//!
//! Every backend client reports failures as a [`BackendFailure`] carrying a
//! status code in the style of RPC transports. [`classify`] turns that into a
//! devrig [`Error`] and tells the adapter whether the connection is gone.

use devrig_core::prelude::*;
use std::fmt;

/// Status reported by a backend call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    DeadlineExceeded,
    Unavailable,
    Unimplemented,
    PermissionDenied,
    NotFound,
    Internal,
    Unknown,
}

/// A failed backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub status: BackendStatus,
    pub message: String,
    /// The failure was caused by a transport-level I/O error
    pub io_cause: bool,
}

impl BackendFailure {
    pub fn new(status: BackendStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            io_cause: false,
        }
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(BackendStatus::DeadlineExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendStatus::Unavailable, message)
    }

    /// Unavailable because the transport itself failed
    pub fn io(message: impl Into<String>) -> Self {
        Self {
            io_cause: true,
            ..Self::new(BackendStatus::Unavailable, message)
        }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(BackendStatus::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BackendStatus::Internal, message)
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.status, self.message)
    }
}

/// Outcome of classifying a failure
#[derive(Debug)]
pub struct Classification {
    pub error: Error,
    /// The adapter must be marked closed; later calls fail fast
    pub closes_adapter: bool,
}

/// Marker the Android shell prints when a call needs elevated access
pub const PERMISSION_DENIAL_MARKER: &str = "Security exception: Permission Denial:";

/// Fallback rule: raw backend output that reports a permission denial.
///
/// Only status codes drive classification otherwise; this substring check
/// exists because the Android shell reports denials as plain text.
pub fn is_permission_denial(message: &str) -> bool {
    message.contains(PERMISSION_DENIAL_MARKER)
}

fn is_io_exception(failure: &BackendFailure) -> bool {
    failure.io_cause || failure.message.to_lowercase().contains("io exception")
}

/// Map a backend failure of `operation` on `target` into the error taxonomy
pub fn classify(operation: &str, target: &str, failure: BackendFailure) -> Classification {
    let (error, closes_adapter) = match failure.status {
        BackendStatus::DeadlineExceeded => {
            error!("{} on {} exceeded its deadline: {}", operation, target, failure.message);
            (
                Error::backend_unreachable(format!("{} driver unreachable", target)),
                true,
            )
        }
        BackendStatus::Unavailable if is_io_exception(&failure) => {
            error!("Not able to reach {} during {}", target, operation);
            (Error::backend_unreachable(failure.message), true)
        }
        BackendStatus::Unavailable => {
            error!(
                "Received UNAVAILABLE from {} during {}: {}",
                target, operation, failure.message
            );
            (Error::backend(failure.message), false)
        }
        BackendStatus::Unimplemented => (Error::unsupported(operation, target), false),
        BackendStatus::PermissionDenied => (Error::permission_denied(failure.message), false),
        _ if is_permission_denial(&failure.message) => {
            (Error::permission_denied(failure.message), false)
        }
        status => {
            error!(
                "Unexpected {:?} from {} during {}: {}",
                status, target, operation, failure.message
            );
            (Error::backend(failure.message), false)
        }
    };

    Classification {
        error,
        closes_adapter,
    }
}
