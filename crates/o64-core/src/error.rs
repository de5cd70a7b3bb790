//! Error types for the oxide64 host

use std::path::PathBuf;

use thiserror::Error;

use crate::capability::Capability;

/// Main error type for the host
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Host is not initialized")]
    NotInitialized,

    #[error("Host is already initialized")]
    AlreadyInitialized,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Incompatible version: {0}")]
    Incompatible(String),

    #[error("{slot} slot cannot hook a module reporting {reported}")]
    TypeMismatch {
        slot: Capability,
        reported: Capability,
    },

    #[error("{0} slot already has a module hooked")]
    AlreadyHooked(Capability),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to load {what} from {path:?}: {reason}")]
    LoadFailure {
        what: String,
        path: PathBuf,
        reason: String,
    },

    #[error("{capability} module failed during {phase}: {reason}")]
    ModuleFailure {
        capability: Capability,
        phase: ModulePhase,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The module entry point an operation was executing when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulePhase {
    Startup,
    Shutdown,
    MediaOpen,
    MediaClose,
    Frame,
    Configure,
    Capture,
    Reset,
}

impl std::fmt::Display for ModulePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModulePhase::Startup => "startup",
            ModulePhase::Shutdown => "shutdown",
            ModulePhase::MediaOpen => "media open",
            ModulePhase::MediaClose => "media close",
            ModulePhase::Frame => "frame",
            ModulePhase::Configure => "configure",
            ModulePhase::Capture => "capture",
            ModulePhase::Reset => "reset",
        };
        write!(f, "{name}")
    }
}

impl HostError {
    /// Wrap a module-reported failure with the category and phase it
    /// happened in, so callers can tell which module broke and where.
    pub fn module_failure(
        capability: Capability,
        phase: ModulePhase,
        reason: impl Into<String>,
    ) -> Self {
        HostError::ModuleFailure {
            capability,
            phase,
            reason: reason.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        HostError::InvalidState(reason.into())
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        HostError::InvalidArgument(reason.into())
    }
}

/// Result type alias using HostError
pub type Result<T> = std::result::Result<T, HostError>;
