use std::collections::{BTreeMap, HashMap};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gwinit_core::config::PathOverrides;
use gwinit_core::{Config, UpgradeOrchestrator};
use tempfile::TempDir;

/// A throwaway gateway installation: install dir with fake collaborator
/// programs, a data volume and a module drop directory.
pub struct Installation {
    pub tmp: TempDir,
    pub env: HashMap<String, String>,
}

impl Installation {
    pub fn new(image_version: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        for dir in ["install", "data", "logs"] {
            std::fs::create_dir_all(tmp.path().join(dir)).unwrap();
        }
        let mut env = HashMap::new();
        let mut set = |key: &str, value: String| {
            env.insert(key.to_string(), value);
        };
        set("GATEWAY_VERSION", image_version.to_string());
        set("GATEWAY_INSTALL_DIR", path_str(&tmp.path().join("install")));
        set("GATEWAY_DATA_DIR", path_str(&tmp.path().join("data")));
        set("GATEWAY_LOG_DIR", path_str(&tmp.path().join("logs")));
        set("GATEWAY_MODULES_DIR", path_str(&tmp.path().join("modules")));
        set("GATEWAY_STARTUP_TIMEOUT", "5".to_string());
        Self { tmp, env }
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.env.insert(key.to_string(), value.into());
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.tmp.path().join(relative)
    }

    pub fn data(&self, relative: &str) -> PathBuf {
        self.path("data").join(relative)
    }

    pub fn modules_dir(&self) -> PathBuf {
        let dir = self.path("modules");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn store_path(&self) -> PathBuf {
        self.data("db/config.idb")
    }

    /// Create the config store and, optionally, the version marker.
    pub fn seed_existing(&self, marker: Option<&str>) {
        let store = self.store_path();
        std::fs::create_dir_all(store.parent().unwrap()).unwrap();
        gwinit_module_registry::testing::create_store(&store).unwrap();
        if let Some(marker) = marker {
            std::fs::write(self.data(".upgrade-version"), format!("{marker}\n")).unwrap();
        }
    }

    /// Install an executable shell script under the install dir.
    pub fn install_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path("install").join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Upgrade tool that records its arguments and exits with `code`.
    pub fn install_upgrader(&self, code: i32) -> PathBuf {
        let record = self.path("upgrader.args");
        self.install_script(
            "upgrader",
            &format!("echo \"$@\" > {}\nexit {code}", record.display()),
        );
        record
    }

    pub fn config(&self) -> Config {
        Config::from_env(&self.env, &PathOverrides::default()).unwrap()
    }

    pub fn orchestrator(&self) -> UpgradeOrchestrator {
        UpgradeOrchestrator::new(self.config()).with_poll_interval(Duration::from_millis(20))
    }

    /// Every file under the data dir with its contents.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let mut files = BTreeMap::new();
        collect(&self.path("data"), &mut files);
        files
    }
}

fn collect(dir: &Path, files: &mut BTreeMap<PathBuf, Vec<u8>>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            collect(&path, files);
        } else {
            let contents = std::fs::read(&path).unwrap();
            files.insert(path, contents);
        }
    }
}

pub fn path_str(path: &Path) -> String {
    path.display().to_string()
}
