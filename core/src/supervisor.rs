//! The interim gateway process: spawn, wait for health, restore, stop.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Child;

use crate::error::{GwinitError, Result};
use crate::health::{HealthGate, HealthOutcome, HealthTarget};
use crate::launch::ServiceCommand;

/// A running interim gateway. Owned by one caller and consumed by
/// [`ProcessSupervisor::terminate`].
#[derive(Debug)]
pub struct InterimProcess {
    child: Child,
    program: String,
}

impl InterimProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    log_path: PathBuf,
    terminate_on_timeout: bool,
}

impl ProcessSupervisor {
    pub fn new(log_path: impl Into<PathBuf>, terminate_on_timeout: bool) -> Self {
        Self {
            log_path: log_path.into(),
            terminate_on_timeout,
        }
    }

    fn open_log(&self) -> Result<(File, File)> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GwinitError::io(parent, e))?;
        }
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| GwinitError::io(&self.log_path, e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| GwinitError::io(&self.log_path, e))?;
        Ok((stdout, stderr))
    }

    /// Start the service with output appended to the provisioning log.
    /// Returns as soon as the process exists; there is no restart.
    pub fn spawn(&self, command: &ServiceCommand) -> Result<InterimProcess> {
        let (stdout, stderr) = self.open_log()?;
        let program = command.display_program();
        let child = command
            .to_tokio()
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| GwinitError::process("spawn", &program, e))?;
        tracing::info!(
            program = %program,
            pid = child.id().unwrap_or_default(),
            log = %self.log_path.display(),
            "Started interim gateway"
        );
        Ok(InterimProcess { child, program })
    }

    /// Hand the process back once `target` is reported. On timeout the
    /// process is stopped first when termination-on-timeout is enabled,
    /// otherwise it is left running.
    pub async fn await_health(
        &self,
        process: InterimProcess,
        gate: &HealthGate,
        target: HealthTarget,
        deadline: Duration,
    ) -> Result<InterimProcess> {
        match gate.poll(target, deadline).await {
            HealthOutcome::Healthy { .. } => Ok(process),
            HealthOutcome::Timeout { .. } => {
                if self.terminate_on_timeout {
                    if let Err(e) = self.terminate(process).await {
                        tracing::error!(error = %e, "Could not stop interim gateway after timeout");
                    }
                } else {
                    tracing::warn!(
                        pid = process.id().unwrap_or_default(),
                        "Leaving interim gateway running after timeout"
                    );
                    // Dropping the handle neither kills nor reaps the child.
                    drop(process);
                }
                Err(GwinitError::HealthTimeout {
                    state: target.token().to_string(),
                    seconds: deadline.as_secs(),
                })
            }
        }
    }

    /// SIGTERM, then block until the process exits. No escalation.
    pub async fn terminate(&self, mut process: InterimProcess) -> Result<ExitStatus> {
        if let Some(pid) = process.child.id() {
            let pid = libc::pid_t::try_from(pid).map_err(|_| {
                GwinitError::process(
                    "signal",
                    &process.program,
                    std::io::Error::other(format!("pid {pid} out of range")),
                )
            })?;
            let ret_code = unsafe { libc::kill(pid, libc::SIGTERM) };
            if ret_code != 0 {
                return Err(GwinitError::process(
                    "signal",
                    &process.program,
                    std::io::Error::last_os_error(),
                ));
            }
            tracing::info!(pid, "Sent SIGTERM to interim gateway");
        }
        let status = process
            .child
            .wait()
            .await
            .map_err(|e| GwinitError::process("wait for", &process.program, e))?;
        tracing::info!(%status, "Interim gateway exited");
        Ok(status)
    }

    /// `<tool> --restore <archive> -y`, run to completion.
    pub async fn restore(&self, tool: &Path, archive: &Path) -> Result<()> {
        let (stdout, stderr) = self.open_log()?;
        let program = tool.display().to_string();
        tracing::info!(archive = %archive.display(), "Restoring gateway backup");
        let status = tokio::process::Command::new(tool)
            .arg("--restore")
            .arg(archive)
            .arg("-y")
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .await
            .map_err(|e| GwinitError::process("run", &program, e))?;
        if !status.success() {
            return Err(GwinitError::Restore {
                archive: archive.to_path_buf(),
                status: status.to_string(),
            });
        }
        tracing::info!("Restore finished");
        Ok(())
    }
}
