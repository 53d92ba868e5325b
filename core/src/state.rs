//! Durable markers on the data volume.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::Paths;
use crate::error::{GwinitError, Result};
use crate::version::Version;

/// Write via a sibling `.tmp` file and rename, so readers never see a
/// partially written marker.
pub(crate) fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GwinitError::io(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data).map_err(|e| GwinitError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| GwinitError::io(path, e))?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(GwinitError::io(path, e)),
    }
}

/// Snapshot used by `gwinit status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSummary {
    pub marker: Option<String>,
    pub store_present: bool,
    pub commissioned_at: Option<String>,
    pub init_properties_present: bool,
}

#[derive(Debug, Clone)]
pub struct PersistentState {
    paths: Paths,
}

impl PersistentState {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn store_path(&self) -> PathBuf {
        self.paths.config_store()
    }

    pub fn store_exists(&self) -> bool {
        self.store_path().is_file()
    }

    /// Raw recorded version, trimmed. `None` when no marker was ever written.
    pub fn read_marker(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.paths.upgrade_marker())?.map(|raw| raw.trim().to_string()))
    }

    pub fn write_marker(&self, version: &Version) -> Result<()> {
        atomic_write(&self.paths.upgrade_marker(), format!("{version}\n").as_bytes())
    }

    pub fn commissioned_at(&self) -> Result<Option<String>> {
        Ok(read_optional(&self.paths.commissioned_marker())?.map(|raw| raw.trim().to_string()))
    }

    pub fn mark_commissioned(&self, at: DateTime<Utc>) -> Result<()> {
        let stamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        atomic_write(&self.paths.commissioned_marker(), format!("{stamp}\n").as_bytes())
    }

    pub fn summary(&self) -> Result<StateSummary> {
        Ok(StateSummary {
            marker: self.read_marker()?,
            store_present: self.store_exists(),
            commissioned_at: self.commissioned_at()?,
            init_properties_present: self.paths.init_properties().is_file(),
        })
    }
}
