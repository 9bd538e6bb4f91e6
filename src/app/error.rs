use std::fmt;

use thiserror::Error;

/// Failure kinds a single device attempt can raise. All of them funnel into the
/// same retry-and-recover path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    Timeout,
    Io,
    Rejected,
    Unresponsive,
    Install,
    Sync,
}

impl TransientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransientKind::Timeout => "timeout",
            TransientKind::Io => "io",
            TransientKind::Rejected => "rejected",
            TransientKind::Unresponsive => "unresponsive",
            TransientKind::Install => "install",
            TransientKind::Sync => "sync",
        }
    }
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransientError {
    pub kind: TransientKind,
    pub message: String,
}

impl TransientError {
    pub fn new(kind: TransientKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransientKind::Timeout, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(TransientKind::Io, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransientKind::Rejected, message)
    }

    pub fn unresponsive(message: impl Into<String>) -> Self {
        Self::new(TransientKind::Unresponsive, message)
    }

    pub fn install(message: impl Into<String>) -> Self {
        Self::new(TransientKind::Install, message)
    }

    pub fn sync(message: impl Into<String>) -> Self {
        Self::new(TransientKind::Sync, message)
    }
}

impl From<std::io::Error> for TransientError {
    fn from(err: std::io::Error) -> Self {
        TransientError::io(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error(
        "Attempted {description} {attempts} times on device {serial} without communication success. Aborting."
    )]
    Unresponsive {
        serial: String,
        description: String,
        attempts: u32,
    },
    #[error("device {serial} not available: {message}")]
    NotAvailable { serial: String, message: String },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    System(String),
}

impl DeviceError {
    pub fn unresponsive(serial: impl Into<String>, description: impl Into<String>, attempts: u32) -> Self {
        DeviceError::Unresponsive {
            serial: serial.into(),
            description: description.into(),
            attempts,
        }
    }

    pub fn not_available(serial: impl Into<String>, message: impl Into<String>) -> Self {
        DeviceError::NotAvailable {
            serial: serial.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        DeviceError::Validation(message.into())
    }

    pub fn system(message: impl Into<String>) -> Self {
        DeviceError::System(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            DeviceError::Unresponsive { .. } => "ERR_DEVICE_UNRESPONSIVE",
            DeviceError::NotAvailable { .. } => "ERR_DEVICE_NOT_AVAILABLE",
            DeviceError::Validation(_) => "ERR_VALIDATION",
            DeviceError::System(_) => "ERR_SYSTEM",
        }
    }

    /// Both variants mean the device could not be brought back for this operation.
    pub fn is_device_unavailable(&self) -> bool {
        matches!(
            self,
            DeviceError::Unresponsive { .. } | DeviceError::NotAvailable { .. }
        )
    }
}
