//! Boot classification and the one-time sequence that follows it.
//!
//! [`UpgradeOrchestrator::classify`] only reads state. Everything that
//! writes (marker, upgrade tool, commissioning, module links) happens in
//! [`UpgradeOrchestrator::apply`] after a non-fatal classification.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use gwinit_module_registry::{ModuleRegistrar, RegistrationReport};

use crate::config::Config;
use crate::credentials::resolve_password;
use crate::error::{GwinitError, Result};
use crate::provision::Provisioner;
use crate::state::{PersistentState, StateSummary};
use crate::version::{self, VersionComparison};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootState {
    /// No config store on the volume.
    Fresh,
    NoChange,
    /// `from` is `None` when the store exists but no version was recorded.
    MinorUpgrade { from: Option<String> },
    MajorUpgrade { from: String },
    Fatal {
        comparison: VersionComparison,
        volume: String,
    },
}

impl fmt::Display for BootState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fresh => f.write_str("fresh"),
            Self::NoChange => f.write_str("no-change"),
            Self::MinorUpgrade { from: Some(from) } => write!(f, "minor-upgrade from {from}"),
            Self::MinorUpgrade { from: None } => f.write_str("minor-upgrade from unrecorded version"),
            Self::MajorUpgrade { from } => write!(f, "major-upgrade from {from}"),
            Self::Fatal { comparison, volume } => write!(f, "fatal: {comparison} (volume {volume})"),
        }
    }
}

/// What a completed boot sequence did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub state: BootState,
    pub modules: RegistrationReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub image_version: String,
    pub state: BootState,
    pub persisted: StateSummary,
}

#[derive(Debug, Clone)]
pub struct UpgradeOrchestrator {
    config: Config,
    state: PersistentState,
    gateway_url: String,
    poll_interval: Duration,
}

impl UpgradeOrchestrator {
    pub fn new(config: Config) -> Self {
        let state = PersistentState::new(config.paths.clone());
        let gateway_url = format!("http://127.0.0.1:{}", config.gateway.http_port);
        Self {
            config,
            state,
            gateway_url,
            poll_interval: HEALTH_POLL_INTERVAL,
        }
    }

    /// Talk to the interim gateway somewhere other than loopback.
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn classify(&self) -> Result<BootState> {
        if !self.state.store_exists() {
            return Ok(BootState::Fresh);
        }
        let volume = self.state.read_marker()?.unwrap_or_default();
        let image = self.config.image_version.to_string();
        let comparison = version::compare(&image, &volume);
        tracing::debug!(%image, %volume, code = comparison.code(), "Compared versions");

        Ok(match comparison {
            VersionComparison::Equal => BootState::NoChange,
            VersionComparison::MinorUpgrade if volume.is_empty() => {
                BootState::MinorUpgrade { from: None }
            }
            VersionComparison::MinorUpgrade => BootState::MinorUpgrade { from: Some(volume) },
            VersionComparison::MajorUpgrade => BootState::MajorUpgrade { from: volume },
            VersionComparison::Invalid | VersionComparison::DowngradeInvalid => {
                BootState::Fatal { comparison, volume }
            }
        })
    }

    pub fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport {
            image_version: self.config.image_version.to_string(),
            state: self.classify()?,
            persisted: self.state.summary()?,
        })
    }

    /// Classify, then apply.
    pub async fn run(&self) -> Result<BootReport> {
        let state = self.classify()?;
        tracing::info!(
            image = %self.config.image_version,
            state = %state,
            "Classified boot"
        );
        self.apply(state).await
    }

    /// Perform the side effects for `state`. A fatal state returns its
    /// error without touching anything.
    pub async fn apply(&self, state: BootState) -> Result<BootReport> {
        let relink = match &state {
            BootState::Fatal { comparison, volume } => {
                return Err(self.fatal_error(*comparison, volume));
            }
            BootState::Fresh => {
                let password = resolve_password(&self.config.gateway.password)?;
                self.state.write_marker(&self.config.image_version)?;
                Provisioner::new(&self.config, self.gateway_url.clone(), self.poll_interval)
                    .provision(password)
                    .await?;
                self.state.mark_commissioned(chrono::Utc::now())?;
                self.config.module_relink
            }
            BootState::MinorUpgrade { .. } => {
                self.run_upgrade_tool().await?;
                self.state.write_marker(&self.config.image_version)?;
                self.config.module_relink
            }
            BootState::MajorUpgrade { .. } => {
                self.run_upgrade_tool().await?;
                self.state.write_marker(&self.config.image_version)?;
                true
            }
            BootState::NoChange => self.config.module_relink,
        };

        let modules = self.register_modules(relink)?;
        Ok(BootReport { state, modules })
    }

    fn fatal_error(&self, comparison: VersionComparison, volume: &str) -> GwinitError {
        match comparison {
            VersionComparison::DowngradeInvalid => GwinitError::Downgrade {
                image: self.config.image_version.to_string(),
                volume: volume.to_string(),
            },
            _ => GwinitError::InvalidVersion {
                role: "volume",
                value: volume.to_string(),
            },
        }
    }

    /// `<upgrade tool> <install> <data> <logs> file=<config file>`.
    async fn run_upgrade_tool(&self) -> Result<()> {
        let paths = &self.config.paths;
        let tool = &self.config.service.upgrade_tool;
        let program = tool.display().to_string();
        tracing::info!(tool = %program, "Running upgrade tool");

        let status = tokio::process::Command::new(tool)
            .arg(&paths.install_dir)
            .arg(&paths.data_dir)
            .arg(&paths.log_dir)
            .arg(format!("file={}", self.config.service.config_file))
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| GwinitError::process("run", &program, e))?;
        if !status.success() {
            return Err(GwinitError::UpgradeTool {
                program,
                status: status.to_string(),
            });
        }
        tracing::info!("Upgrade tool finished");
        Ok(())
    }

    fn register_modules(&self, relink: bool) -> Result<RegistrationReport> {
        let paths = &self.config.paths;
        let registrar = ModuleRegistrar {
            drop_dir: paths.modules_dir.clone(),
            live_dir: paths.live_modules_dir(),
            store_path: paths.config_store(),
            relink,
        };
        let report = registrar.run()?;
        tracing::info!(
            linked = report.linked.len(),
            skipped = report.skipped.len(),
            pruned = report.pruned.len(),
            certificates = report.certificates_inserted,
            licenses = report.licenses_inserted,
            relink,
            "Module registration finished"
        );
        Ok(report)
    }
}
