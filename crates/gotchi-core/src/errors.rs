//! Error types for the gotchi service
//!
//! Each surface gets its own error enum so callers can match on exactly the
//! failures that surface can produce. `ServiceError` is the umbrella used by
//! the lifecycle.

use thiserror::Error;

/// Result type for service lifecycle operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors returned by the streaming status device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Another caller holds the exclusive session
    #[error("Device busy: a status session is already open")]
    Busy,
}

/// Errors returned by the control file
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The caller-supplied buffer could not be copied; nothing was stored
    #[error("Bad address: failed to copy {requested} bytes from caller buffer")]
    Fault {
        /// Number of bytes the write attempted to copy
        requested: usize,
    },

    /// The command handler refused the stored payload
    #[error("Command rejected: {0}")]
    Rejected(String),
}

impl ControlError {
    /// Create a rejection error
    pub fn rejected(reason: impl Into<String>) -> Self {
        ControlError::Rejected(reason.into())
    }
}

/// Errors from the host registration facility
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The host ran out of slots for new registrations
    #[error("Cannot allocate memory: no free slot to register {0}")]
    Exhausted(String),

    /// The requested name is already registered
    #[error("Name already registered: {0}")]
    NameInUse(String),

    /// The host facility is not available
    #[error("Registration facility unavailable: {0}")]
    Unavailable(String),
}

/// Errors from arming the periodic task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TaskError {
    /// An invocation is already pending or running
    #[error("Periodic task already armed")]
    AlreadyArmed,

    /// The task has stopped and cannot be armed again
    #[error("Periodic task stopped")]
    Stopped,
}

/// Invalid service configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Tick interval must be non-zero
    #[error("Tick interval must be greater than zero")]
    ZeroInterval,

    /// A surface name was empty or contained a path separator
    #[error("Invalid {field} name: {value:?}")]
    InvalidName {
        /// Which name field failed validation
        field: &'static str,
        /// The rejected value
        value: String,
    },
}

/// Errors that can occur while bringing the service up
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Host registration failed; partial registrations were rolled back
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),

    /// Configuration rejected before any resources were allocated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The periodic task could not be armed
    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

impl ServiceError {
    /// Returns true if the failure came from the host facility
    pub fn is_registration(&self) -> bool {
        matches!(self, ServiceError::Registration(_))
    }
}
