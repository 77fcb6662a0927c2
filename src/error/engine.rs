// Engine boundary error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Engine error code constants
///
/// These constants provide a single source of truth for error codes
/// shared between the library and embedding hosts.
///
/// Error code range: 1001-1006
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// Native engine constructor returned null
    pub const CREATION_FAILED: i32 = 1001;

    /// Operation attempted on a released or torn-down handle
    pub const STALE_HANDLE: i32 = 1002;

    /// Rejected configuration value
    pub const INVALID_OPTION: i32 = 1003;

    /// Mutex guarding host-side state was poisoned
    pub const LOCK_POISONED: i32 = 1004;

    /// An embedded engine instance is already active
    pub const ALREADY_RUNNING: i32 = 1005;

    /// Boot sequence failed after engine creation
    pub const BOOT_FAILED: i32 = 1006;
}

/// Log an engine error with structured context
///
/// Logs engine errors with the numeric code for programmatic handling,
/// the operation where the error occurred, and the human-readable
/// message. Logging is non-blocking and will not panic on failure.
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the embedding boundary
///
/// These errors cover engine creation, handle lifecycle, and the boot
/// protocol. Native-call boolean failures (listener binds, packet sends)
/// are reported through the returned bool, not through this type.
///
/// Error code range: 1001-1006
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Native engine constructor returned null
    CreationFailed { reason: String },

    /// Operation attempted on a released or torn-down handle
    StaleHandle,

    /// Rejected configuration value
    InvalidOption { field: &'static str, reason: String },

    /// Mutex guarding host-side state was poisoned
    LockPoisoned { component: String },

    /// An embedded engine instance is already active in this process
    AlreadyRunning,

    /// Boot sequence failed after engine creation
    BootFailed { reason: String },
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::CreationFailed { .. } => EngineErrorCodes::CREATION_FAILED,
            EngineError::StaleHandle => EngineErrorCodes::STALE_HANDLE,
            EngineError::InvalidOption { .. } => EngineErrorCodes::INVALID_OPTION,
            EngineError::LockPoisoned { .. } => EngineErrorCodes::LOCK_POISONED,
            EngineError::AlreadyRunning => EngineErrorCodes::ALREADY_RUNNING,
            EngineError::BootFailed { .. } => EngineErrorCodes::BOOT_FAILED,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::CreationFailed { reason } => {
                format!("Engine creation failed: {}", reason)
            }
            EngineError::StaleHandle => {
                "Engine handle is stale (instance released or already torn down)".to_string()
            }
            EngineError::InvalidOption { field, reason } => {
                format!("Invalid option {}: {}", field, reason)
            }
            EngineError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            EngineError::AlreadyRunning => {
                "An embedded engine is already running in this process".to_string()
            }
            EngineError::BootFailed { reason } => {
                format!("Engine boot failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_codes() {
        assert_eq!(
            EngineError::CreationFailed {
                reason: "test".to_string()
            }
            .code(),
            EngineErrorCodes::CREATION_FAILED
        );
        assert_eq!(EngineError::StaleHandle.code(), EngineErrorCodes::STALE_HANDLE);
        assert_eq!(
            EngineError::InvalidOption {
                field: "password",
                reason: "test".to_string()
            }
            .code(),
            EngineErrorCodes::INVALID_OPTION
        );
        assert_eq!(
            EngineError::LockPoisoned {
                component: "test".to_string()
            }
            .code(),
            EngineErrorCodes::LOCK_POISONED
        );
        assert_eq!(
            EngineError::AlreadyRunning.code(),
            EngineErrorCodes::ALREADY_RUNNING
        );
        assert_eq!(
            EngineError::BootFailed {
                reason: "test".to_string()
            }
            .code(),
            EngineErrorCodes::BOOT_FAILED
        );
    }

    #[test]
    fn test_engine_error_messages() {
        let err = EngineError::CreationFailed {
            reason: "World_New returned null".to_string(),
        };
        assert_eq!(err.message(), "Engine creation failed: World_New returned null");

        let err = EngineError::StaleHandle;
        assert!(err.message().contains("stale"));

        let err = EngineError::InvalidOption {
            field: "num_audio_bus_channels",
            reason: "too few audio buses".to_string(),
        };
        assert!(err.message().contains("num_audio_bus_channels"));

        let err = EngineError::AlreadyRunning;
        assert!(err.message().contains("already running"));
    }

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::StaleHandle;
        let display = format!("{}", err);
        assert!(display.contains("EngineError"));
        assert!(display.contains(&err.code().to_string()));
    }
}
