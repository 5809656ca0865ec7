//! Application error types with rich context

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("External tool error: {message}")]
    Process { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Device Selection Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device with id {id} is not connected")]
    DeviceNotFound { id: String },

    #[error("Device {description} is not connected")]
    DeviceNotConnected { description: String },

    #[error("Device selection failed: {message}")]
    Selection { message: String },

    #[error("Device selection was cancelled by user")]
    SelectionCancelled,

    // ─────────────────────────────────────────────────────────────
    // Driver/Backend Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Backend unreachable: {message}")]
    BackendUnreachable { message: String },

    #[error("Driver did not start up in time: {message}")]
    DriverTimeout { message: String },

    #[error("Unsupported operation {operation} for {target}")]
    UnsupportedOperation { operation: String, target: String },

    #[error("Installation failed: {message}")]
    InstallationFailure { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Malformed view hierarchy: {message}")]
    MalformedHierarchy { message: String },

    #[error("Backend error: {message}")]
    Backend { message: String },

    // ─────────────────────────────────────────────────────────────
    // Session/Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Session registry error: {message}")]
    Registry { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Interrupted by termination signal")]
    Interrupted,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn device_not_found(id: impl Into<String>) -> Self {
        Self::DeviceNotFound { id: id.into() }
    }

    pub fn device_not_connected(description: impl Into<String>) -> Self {
        Self::DeviceNotConnected {
            description: description.into(),
        }
    }

    pub fn selection(message: impl Into<String>) -> Self {
        Self::Selection {
            message: message.into(),
        }
    }

    pub fn backend_unreachable(message: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            message: message.into(),
        }
    }

    pub fn driver_timeout(message: impl Into<String>) -> Self {
        Self::DriverTimeout {
            message: message.into(),
        }
    }

    pub fn unsupported(operation: impl Into<String>, target: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
            target: target.into(),
        }
    }

    pub fn installation(message: impl Into<String>) -> Self {
        Self::InstallationFailure {
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    pub fn malformed_hierarchy(message: impl Into<String>) -> Self {
        Self::MalformedHierarchy {
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Transient failures: the backend may come back, but the adapter that saw
    /// this error is closed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::BackendUnreachable { .. })
    }

    /// Check if this error should end the caller's run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound { .. }
                | Error::DeviceNotConnected { .. }
                | Error::Selection { .. }
                | Error::DriverTimeout { .. }
                | Error::InstallationFailure { .. }
                | Error::Interrupted
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
