//! Orchestrator error types.
//!
//! Every error that reaches the binary is fatal and maps to exit status 1.
//! The category is only used to label the log line.

use std::path::PathBuf;

use gwinit_module_registry::RegistryError;
use thiserror::Error;

/// Error category for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Environment or version strings that cannot be used
    Configuration,
    /// The external upgrade tool failed
    UpgradeTool,
    /// The interim instance never reported the wanted state
    HealthTimeout,
    /// Module archive or config store failure
    ModuleRegistry,
    /// Spawning, signalling or waiting on a child process
    Process,
    /// Reading or writing state files
    Io,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::UpgradeTool => "UPGRADE_TOOL_FAILURE",
            Self::HealthTimeout => "HEALTH_TIMEOUT",
            Self::ModuleRegistry => "MODULE_REGISTRY_ERROR",
            Self::Process => "PROCESS_ERROR",
            Self::Io => "IO_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum GwinitError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid {role} version `{value}` (expected N.N.N)")]
    InvalidVersion { role: &'static str, value: String },

    #[error("volume version {volume} is newer than image version {image}; downgrades are not supported")]
    Downgrade { image: String, volume: String },

    #[error("upgrade tool {program} failed: {status}")]
    UpgradeTool { program: String, status: String },

    #[error("gateway did not report {state} within {seconds}s")]
    HealthTimeout { state: String, seconds: u64 },

    #[error("failed to {action} `{program}`: {source}")]
    Process {
        action: &'static str,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("restore of {} failed: {status}", archive.display())]
    Restore { archive: PathBuf, status: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    ModuleRegistry(#[from] RegistryError),
}

impl GwinitError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::InvalidVersion { .. } | Self::Downgrade { .. } => {
                ErrorCategory::Configuration
            }
            Self::UpgradeTool { .. } => ErrorCategory::UpgradeTool,
            Self::HealthTimeout { .. } => ErrorCategory::HealthTimeout,
            Self::Process { .. } | Self::Restore { .. } | Self::HttpClient(_) => {
                ErrorCategory::Process
            }
            Self::Io { .. } => ErrorCategory::Io,
            Self::ModuleRegistry(_) => ErrorCategory::ModuleRegistry,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn process(
        action: &'static str,
        program: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Process {
            action,
            program: program.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, GwinitError>;
