//! Command line of the gateway service, shared by the interim run and the
//! final foreground exec.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::config::{Paths, ServiceSettings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ServiceCommand {
    pub fn new(service: &ServiceSettings, paths: &Paths) -> Self {
        let args = vec![
            paths.data_dir.join(&service.config_file).into_os_string(),
            format!("wrapper.java.initmemory={}", service.memory.init_mb).into(),
            format!("wrapper.java.maxmemory={}", service.memory.max_mb).into(),
        ];
        Self {
            program: service.binary.clone(),
            args,
        }
    }

    /// Arguments given after `--` on our own command line go last.
    pub fn with_passthrough(mut self, extra: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn to_tokio(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }

    pub fn to_std(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }

    pub fn display_program(&self) -> String {
        self.program.display().to_string()
    }
}
