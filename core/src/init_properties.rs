//! `init.properties`: seed values the gateway reads on its first start.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::Path;

use crate::config::ProvisioningSettings;
use crate::error::{GwinitError, Result};
use crate::state::atomic_write;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitProperties {
    entries: Vec<(String, String)>,
}

impl InitProperties {
    pub fn from_settings(settings: &ProvisioningSettings) -> Self {
        let mut props = Self::default();
        for connection in &settings.network {
            for (key, value) in connection.properties() {
                props.push(key, value);
            }
        }
        if let Some(name) = &settings.system_name {
            props.push("SystemName", name);
        }
        if let Some(public) = &settings.public_address {
            props.push("gateway.publicAddress.autoDetect", "false");
            props.push("gateway.publicAddress.address", &public.address);
            if let Some(port) = public.http_port {
                props.push("gateway.publicAddress.httpPort", port.to_string());
            }
            if let Some(port) = public.https_port {
                props.push("gateway.publicAddress.httpsPort", port.to_string());
            }
        }
        props
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }

    /// Replace whatever file is at `path`; an existing file is removed first
    /// and never merged. Nothing is written when there are no entries.
    pub fn write(&self, path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed existing init properties"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(GwinitError::io(path, e)),
        }
        if self.is_empty() {
            return Ok(());
        }
        atomic_write(path, self.render().as_bytes())?;
        tracing::info!(
            path = %path.display(),
            entries = self.entries.len(),
            "Wrote init properties"
        );
        Ok(())
    }
}
