use gwinit_core::BootState;
use gwinit_module_registry::testing::{ModuleSpec, write_module};
use gwinit_module_registry::{CERTIFICATES_SEQ, ConfigStore, EULAS_SEQ};
use pretty_assertions::assert_eq;

use crate::common::Installation;

#[tokio::test]
async fn linked_module_is_skipped_and_new_one_gets_next_ids() {
    let install = Installation::new("8.1.0");
    install.seed_existing(Some("8.1.0"));
    let drop_dir = install.modules_dir();
    write_module(&drop_dir, &ModuleSpec::new("a.modl", "com.example.a")).unwrap();

    let first = install.orchestrator().run().await.unwrap();
    assert_eq!(first.state, BootState::NoChange);
    assert_eq!(first.modules.linked, vec!["a.modl".to_string()]);

    write_module(&drop_dir, &ModuleSpec::new("b.modl", "com.example.b")).unwrap();
    let second = install.orchestrator().run().await.unwrap();
    assert_eq!(second.modules.skipped, vec!["a.modl".to_string()]);
    assert_eq!(second.modules.linked, vec!["b.modl".to_string()]);

    let store = ConfigStore::open(&install.store_path()).unwrap();
    assert_eq!(store.sequence_value(CERTIFICATES_SEQ).unwrap(), Some(2));
    assert_eq!(store.sequence_value(EULAS_SEQ).unwrap(), Some(2));
    assert!(install.path("install/user-lib/modules/b.modl").is_symlink());
}

#[tokio::test]
async fn major_upgrade_relinks_without_duplicating_rows() {
    let mut install = Installation::new("8.1.0");
    install.seed_existing(Some("8.1.0"));
    install.install_upgrader(0);
    write_module(&install.modules_dir(), &ModuleSpec::new("a.modl", "com.example.a")).unwrap();
    install.orchestrator().run().await.unwrap();

    install.set("GATEWAY_VERSION", "9.0.0");
    let report = install.orchestrator().run().await.unwrap();

    assert_eq!(
        report.state,
        BootState::MajorUpgrade {
            from: "8.1.0".into()
        }
    );
    assert_eq!(report.modules.linked, vec!["a.modl".to_string()]);
    assert!(report.modules.skipped.is_empty());
    let store = ConfigStore::open(&install.store_path()).unwrap();
    assert_eq!(store.certificate_count().unwrap(), 1);
    assert_eq!(store.license_count().unwrap(), 1);
}

#[tokio::test]
async fn dangling_links_are_pruned_on_every_boot() {
    let install = Installation::new("8.1.0");
    install.seed_existing(Some("8.1.0"));
    let drop_dir = install.modules_dir();
    let fixture = write_module(&drop_dir, &ModuleSpec::new("a.modl", "com.example.a")).unwrap();
    install.orchestrator().run().await.unwrap();

    std::fs::remove_file(&fixture.path).unwrap();
    let report = install.orchestrator().run().await.unwrap();
    assert_eq!(report.modules.pruned, vec!["a.modl".to_string()]);
    assert!(!install.path("install/user-lib/modules/a.modl").is_symlink());
}
