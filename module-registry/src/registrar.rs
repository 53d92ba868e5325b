//! Link dropped module archives into the live module directory and register
//! their certificates and licenses in the config store.
//!
//! The symlink is created last, after the store rows are committed. A crash
//! between the two leaves the module unlinked, and the next boot registers
//! it again; the inserts are deduplicated so the rows do not double.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::archive::{self, ModuleMetadata};
use crate::error::{RegistryError, Result};
use crate::store::{ConfigStore, InsertOutcome};

pub const MODULE_EXTENSION: &str = "modl";

#[derive(Debug, Clone)]
pub struct ModuleRegistrar {
    /// Directory operators drop module archives into.
    pub drop_dir: PathBuf,
    /// Directory the gateway loads modules from.
    pub live_dir: PathBuf,
    pub store_path: PathBuf,
    /// Replace existing links and re-register their metadata.
    pub relink: bool,
}

/// What a registrar run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub linked: Vec<String>,
    pub skipped: Vec<String>,
    pub pruned: Vec<String>,
    pub certificates_inserted: usize,
    pub licenses_inserted: usize,
}

impl RegistrationReport {
    pub fn is_noop(&self) -> bool {
        self.linked.is_empty()
            && self.pruned.is_empty()
            && self.certificates_inserted == 0
            && self.licenses_inserted == 0
    }
}

impl ModuleRegistrar {
    pub fn run(&self) -> Result<RegistrationReport> {
        let mut report = RegistrationReport::default();

        if !self.drop_dir.is_dir() {
            tracing::debug!(
                drop_dir = %self.drop_dir.display(),
                "No module drop directory, skipping module registration"
            );
            return Ok(report);
        }

        fs::create_dir_all(&self.live_dir).map_err(|e| RegistryError::io(&self.live_dir, e))?;
        report.pruned = prune_dangling_links(&self.live_dir)?;

        // Opened on first use so a run with nothing to register never needs it.
        let mut open_store: Option<ConfigStore> = None;
        for archive_path in list_archives(&self.drop_dir)? {
            let Some(file_name) = archive_path.file_name().map(|n| n.to_string_lossy().into_owned())
            else {
                continue;
            };
            let link_path = self.live_dir.join(&file_name);

            match fs::symlink_metadata(&link_path) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    if !self.relink {
                        tracing::info!(module = %file_name, "Module already linked, skipping");
                        report.skipped.push(file_name);
                        continue;
                    }
                    tracing::info!(module = %file_name, "Relinking module");
                    fs::remove_file(&link_path).map_err(|e| RegistryError::io(&link_path, e))?;
                }
                Ok(_) => {
                    tracing::warn!(
                        module = %file_name,
                        path = %link_path.display(),
                        "Live module is not a link, leaving it in place"
                    );
                    report.skipped.push(file_name);
                    continue;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(RegistryError::io(&link_path, e)),
            }

            let metadata = archive::inspect(&archive_path)?;
            let mut store = match open_store.take() {
                Some(store) => store,
                None => ConfigStore::open(&self.store_path)?,
            };
            self.register(&mut store, &file_name, &metadata, &mut report)?;
            open_store = Some(store);

            std::os::unix::fs::symlink(&archive_path, &link_path)
                .map_err(|e| RegistryError::io(&link_path, e))?;
            tracing::info!(
                module = %file_name,
                module_id = %metadata.module_id,
                "Linked module"
            );
            report.linked.push(file_name);
        }

        Ok(report)
    }

    fn register(
        &self,
        store: &mut ConfigStore,
        file_name: &str,
        metadata: &ModuleMetadata,
        report: &mut RegistrationReport,
    ) -> Result<()> {
        match store.insert_certificate(&metadata.certificate)? {
            InsertOutcome::Inserted { id } => {
                tracing::info!(
                    module = %file_name,
                    id,
                    thumbprint = %metadata.certificate.thumbprint,
                    subject = %metadata.certificate.subject_name,
                    "Trusted module certificate"
                );
                report.certificates_inserted += 1;
            }
            InsertOutcome::Duplicate => {
                tracing::debug!(
                    module = %file_name,
                    thumbprint = %metadata.certificate.thumbprint,
                    "Certificate already trusted"
                );
            }
        }

        let Some(license) = &metadata.license else {
            tracing::debug!(module = %file_name, "Module declares no license");
            return Ok(());
        };
        match store.insert_license(license)? {
            InsertOutcome::Inserted { id } => {
                tracing::info!(
                    module = %file_name,
                    id,
                    module_id = %license.module_id,
                    checksum = license.checksum,
                    "Accepted module license"
                );
                report.licenses_inserted += 1;
            }
            InsertOutcome::Duplicate => {
                tracing::debug!(module = %file_name, "License already accepted");
            }
        }
        Ok(())
    }
}

/// Remove symlinks in `dir` whose target no longer exists.
fn prune_dangling_links(dir: &Path) -> Result<Vec<String>> {
    let mut pruned = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| RegistryError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| RegistryError::io(dir, e))?;
        let path = entry.path();
        let is_link = entry
            .file_type()
            .map_err(|e| RegistryError::io(&path, e))?
            .is_symlink();
        if !is_link {
            continue;
        }
        match fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::remove_file(&path).map_err(|e| RegistryError::io(&path, e))?;
                let name = entry.file_name().to_string_lossy().into_owned();
                tracing::info!(module = %name, "Removed dangling module link");
                pruned.push(name);
            }
            Err(e) => return Err(RegistryError::io(&path, e)),
        }
    }
    pruned.sort();
    Ok(pruned)
}

fn list_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| RegistryError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| RegistryError::io(dir, e))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == MODULE_EXTENSION) {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CERTIFICATES_SEQ, EULAS_SEQ};
    use crate::testing::{ModuleSpec, create_store, write_module};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        registrar: ModuleRegistrar,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let drop_dir = tmp.path().join("modules");
        let live_dir = tmp.path().join("user-lib").join("modules");
        let store_path = tmp.path().join("data").join("db").join("config.idb");
        fs::create_dir_all(&drop_dir).unwrap();
        create_store(&store_path).unwrap();
        Fixture {
            registrar: ModuleRegistrar {
                drop_dir,
                live_dir,
                store_path,
                relink: false,
            },
            _tmp: tmp,
        }
    }

    #[test]
    fn missing_drop_dir_is_a_noop() {
        let fx = fixture();
        let registrar = ModuleRegistrar {
            drop_dir: fx.registrar.drop_dir.join("absent"),
            ..fx.registrar.clone()
        };
        let report = registrar.run().unwrap();
        assert!(report.is_noop());
        assert!(!registrar.live_dir.exists());
    }

    #[test]
    fn links_and_registers_new_modules() {
        let fx = fixture();
        let reg = &fx.registrar;
        write_module(&reg.drop_dir, &ModuleSpec::new("a.modl", "com.acme.a")).unwrap();
        write_module(&reg.drop_dir, &ModuleSpec::new("b.modl", "com.acme.b")).unwrap();
        fs::write(reg.drop_dir.join("README.txt"), "not a module").unwrap();

        let report = reg.run().unwrap();
        assert_eq!(report.linked, vec!["a.modl".to_string(), "b.modl".to_string()]);
        assert_eq!(report.certificates_inserted, 2);
        assert_eq!(report.licenses_inserted, 2);

        let link = reg.live_dir.join("a.modl");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), reg.drop_dir.join("a.modl"));
        assert!(!reg.live_dir.join("README.txt").exists());
    }

    #[test]
    fn second_run_is_a_noop() {
        let fx = fixture();
        let reg = &fx.registrar;
        write_module(&reg.drop_dir, &ModuleSpec::new("a.modl", "com.acme.a")).unwrap();

        reg.run().unwrap();
        let second = reg.run().unwrap();
        assert!(second.is_noop(), "{second:?}");
        assert_eq!(second.skipped, vec!["a.modl".to_string()]);

        let store = ConfigStore::open(&reg.store_path).unwrap();
        assert_eq!(store.certificate_count().unwrap(), 1);
        assert_eq!(store.sequence_value(CERTIFICATES_SEQ).unwrap(), Some(1));
    }

    #[test]
    fn already_linked_module_is_skipped_and_new_one_gets_next_ids() {
        let fx = fixture();
        let reg = &fx.registrar;
        let first = write_module(&reg.drop_dir, &ModuleSpec::new("a.modl", "com.acme.a")).unwrap();
        fs::create_dir_all(&reg.live_dir).unwrap();
        std::os::unix::fs::symlink(&first.path, reg.live_dir.join("a.modl")).unwrap();
        {
            let mut store = ConfigStore::open(&reg.store_path).unwrap();
            for seed in [b"x".as_slice(), b"y".as_slice()] {
                store
                    .insert_certificate(&crate::archive::ModuleCertificate {
                        thumbprint: crate::archive::Thumbprint::of_der(seed),
                        subject_name: "CN=seed".to_string(),
                    })
                    .unwrap();
            }
        }
        write_module(&reg.drop_dir, &ModuleSpec::new("b.modl", "com.acme.b")).unwrap();

        let report = reg.run().unwrap();
        assert_eq!(report.skipped, vec!["a.modl".to_string()]);
        assert_eq!(report.linked, vec!["b.modl".to_string()]);

        let store = ConfigStore::open(&reg.store_path).unwrap();
        assert_eq!(store.sequence_value(CERTIFICATES_SEQ).unwrap(), Some(3));
        assert_eq!(store.sequence_value(EULAS_SEQ).unwrap(), Some(1));
    }

    #[test]
    fn relink_recreates_links_without_duplicating_rows() {
        let fx = fixture();
        write_module(&fx.registrar.drop_dir, &ModuleSpec::new("a.modl", "com.acme.a")).unwrap();
        fx.registrar.run().unwrap();

        let relinking = ModuleRegistrar {
            relink: true,
            ..fx.registrar.clone()
        };
        let report = relinking.run().unwrap();
        assert_eq!(report.linked, vec!["a.modl".to_string()]);
        assert_eq!(report.certificates_inserted, 0);
        assert_eq!(report.licenses_inserted, 0);

        let store = ConfigStore::open(&relinking.store_path).unwrap();
        assert_eq!(store.certificate_count().unwrap(), 1);
        assert_eq!(store.license_count().unwrap(), 1);
    }

    #[test]
    fn dangling_links_are_pruned() {
        let fx = fixture();
        let reg = &fx.registrar;
        fs::create_dir_all(&reg.live_dir).unwrap();
        std::os::unix::fs::symlink(
            reg.drop_dir.join("gone.modl"),
            reg.live_dir.join("gone.modl"),
        )
        .unwrap();
        fs::write(reg.live_dir.join("builtin.modl"), "regular file").unwrap();

        let report = reg.run().unwrap();
        assert_eq!(report.pruned, vec!["gone.modl".to_string()]);
        assert!(reg.live_dir.join("builtin.modl").exists());
    }

    #[test]
    fn extraction_failure_aborts_without_linking() {
        let fx = fixture();
        let reg = &fx.registrar;
        write_module(&reg.drop_dir, &ModuleSpec::new("a.modl", "com.acme.a")).unwrap();
        fs::write(reg.drop_dir.join("b.modl"), "not a zip").unwrap();

        let err = reg.run().unwrap_err();
        assert!(matches!(err, RegistryError::Archive { .. }), "{err}");
        assert!(reg.live_dir.join("a.modl").symlink_metadata().is_ok());
        assert!(reg.live_dir.join("b.modl").symlink_metadata().is_err());
    }

    #[test]
    fn missing_store_fails_only_when_something_needs_registering() {
        let fx = fixture();
        let reg = ModuleRegistrar {
            store_path: fx.registrar.store_path.with_file_name("absent.idb"),
            ..fx.registrar.clone()
        };
        assert!(reg.run().unwrap().is_noop());

        write_module(&reg.drop_dir, &ModuleSpec::new("a.modl", "com.acme.a")).unwrap();
        let err = reg.run().unwrap_err();
        assert!(matches!(err, RegistryError::StoreMissing { .. }));
    }

    #[test]
    fn bundled_module_file_is_never_replaced() {
        let fx = fixture();
        write_module(&fx.registrar.drop_dir, &ModuleSpec::new("a.modl", "com.acme.a")).unwrap();
        let live = fx.registrar.live_dir.join("a.modl");
        fs::create_dir_all(&fx.registrar.live_dir).unwrap();
        fs::write(&live, "bundled").unwrap();

        for relink in [false, true] {
            let reg = ModuleRegistrar {
                relink,
                ..fx.registrar.clone()
            };
            let report = reg.run().unwrap();
            assert_eq!(report.skipped, vec!["a.modl".to_string()], "relink={relink}");
            assert!(report.linked.is_empty());
        }

        assert!(!live.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&live).unwrap(), "bundled");
        let store = ConfigStore::open(&fx.registrar.store_path).unwrap();
        assert_eq!(store.certificate_count().unwrap(), 0);
    }
}
