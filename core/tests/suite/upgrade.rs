use gwinit_core::{BootState, ErrorCategory, GwinitError};
use gwinit_module_registry::testing::{ModuleSpec, write_module};
use pretty_assertions::assert_eq;

use crate::common::Installation;

#[tokio::test]
async fn major_upgrade_runs_tool_then_rewrites_marker() {
    let install = Installation::new("8.0.2");
    install.seed_existing(Some("7.9.11"));
    let args = install.install_upgrader(0);

    let report = install.orchestrator().run().await.unwrap();

    assert_eq!(
        report.state,
        BootState::MajorUpgrade {
            from: "7.9.11".into()
        }
    );
    assert_eq!(
        std::fs::read_to_string(&args).unwrap().trim(),
        format!(
            "{} {} {} file=gateway.conf",
            install.path("install").display(),
            install.path("data").display(),
            install.path("logs").display()
        )
    );
    assert_eq!(
        std::fs::read_to_string(install.data(".upgrade-version")).unwrap(),
        "8.0.2\n"
    );
}

#[tokio::test]
async fn failed_upgrade_tool_keeps_old_marker() {
    let install = Installation::new("8.1.3");
    install.seed_existing(Some("8.1.0"));
    install.install_upgrader(4);

    let err = install.orchestrator().run().await.unwrap_err();

    assert!(matches!(err, GwinitError::UpgradeTool { .. }), "{err}");
    assert_eq!(err.category(), ErrorCategory::UpgradeTool);
    assert_eq!(
        std::fs::read_to_string(install.data(".upgrade-version")).unwrap(),
        "8.1.0\n"
    );
}

#[tokio::test]
async fn unrecorded_version_runs_tool_once() {
    let install = Installation::new("8.1.0");
    install.seed_existing(None);
    let args = install.install_upgrader(0);

    let report = install.orchestrator().run().await.unwrap();
    assert_eq!(report.state, BootState::MinorUpgrade { from: None });
    assert!(args.is_file());

    std::fs::remove_file(&args).unwrap();
    let report = install.orchestrator().run().await.unwrap();
    assert_eq!(report.state, BootState::NoChange);
    assert!(!args.exists());
}

#[tokio::test]
async fn downgrade_is_fatal_and_modifies_nothing() {
    let install = Installation::new("7.9.0");
    install.seed_existing(Some("8.1.0"));
    let args = install.install_upgrader(0);
    write_module(&install.modules_dir(), &ModuleSpec::new("a.modl", "com.example.a")).unwrap();
    let before = install.snapshot();

    let err = install.orchestrator().run().await.unwrap_err();

    assert!(matches!(err, GwinitError::Downgrade { .. }), "{err}");
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert_eq!(install.snapshot(), before);
    assert!(!args.exists());
    assert!(!install.path("install/user-lib/modules").exists());
}

#[tokio::test]
async fn garbage_marker_is_fatal() {
    let install = Installation::new("8.1.0");
    install.seed_existing(Some("v8"));
    let err = install.orchestrator().run().await.unwrap_err();
    assert!(
        matches!(err, GwinitError::InvalidVersion { role: "volume", .. }),
        "{err}"
    );
}
