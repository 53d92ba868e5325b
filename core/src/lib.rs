//! `gwinit-core`: decides on every container start whether the gateway is
//! fresh, upgrading or already provisioned, and runs the matching one-time
//! sequence before the gateway is started in the foreground.

pub mod autoaccept;
pub mod commissioning;
pub mod config;
pub mod credentials;
pub mod error;
pub mod health;
pub mod init_properties;
pub mod launch;
pub mod network;
pub mod orchestrator;
pub mod provision;
pub mod state;
pub mod supervisor;
pub mod version;

pub use config::{Config, EnvSource, PathOverrides, Paths, ProcessEnv};
pub use error::{ErrorCategory, GwinitError, Result};
pub use launch::ServiceCommand;
pub use orchestrator::{BootReport, BootState, StatusReport, UpgradeOrchestrator};
pub use version::{Version, VersionComparison};
