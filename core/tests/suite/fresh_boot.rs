use gwinit_core::BootState;
use gwinit_core::ErrorCategory;
use gwinit_module_registry::ConfigStore;
use gwinit_module_registry::testing::{ModuleSpec, create_store, write_module};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::Installation;

/// Wizard endpoints of an interim gateway that is ready to commission.
async fn interim_gateway(expect_running_polls: bool) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/StatusPing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"state":"COMMISSIONING"}"#))
        .mount(&server)
        .await;
    let running = Mock::given(method("GET"))
        .and(path("/main/StatusPing"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"state":"RUNNING"}"#));
    let running = if expect_running_polls {
        running.expect(1..)
    } else {
        running.expect(0)
    };
    running.mount(&server).await;
    Mock::given(method("POST"))
        .and(path("/post-step"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    server
}

/// Fake gateway binary: the real one creates the config store while it is
/// commissioned, so copy a prepared one into place and idle until SIGTERM.
/// The trap defers a SIGTERM that arrives mid-copy until the copy is done.
fn install_fake_gateway(install: &Installation) {
    let seed = install.path("seed.idb");
    create_store(&seed).unwrap();
    let store = install.store_path();
    install.install_script(
        "gateway",
        &format!(
            "trap 'exit 0' TERM\necho \"$@\"\nmkdir -p {}\ncp {} {}\nsleep 30 &\nwait",
            store.parent().unwrap().display(),
            seed.display(),
            store.display()
        ),
    );
}

async fn posted_steps(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/post-step")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

#[tokio::test]
async fn fresh_boot_commissions_and_registers_modules() {
    let mut install = Installation::new("8.1.0");
    install.set("GATEWAY_ADMIN_PASSWORD", "s3cret");
    install.set("GATEWAY_SYSTEM_NAME", "edge-01");
    install.set("GATEWAY_NETWORK_0_HOST", "central");
    let upgrader_args = install.install_upgrader(0);
    install_fake_gateway(&install);
    write_module(&install.modules_dir(), &ModuleSpec::new("alarms.modl", "com.example.alarms"))
        .unwrap();

    let server = interim_gateway(true).await;
    let report = install
        .orchestrator()
        .with_gateway_url(server.uri())
        .run()
        .await
        .unwrap();

    assert_eq!(report.state, BootState::Fresh);
    assert_eq!(report.modules.linked, vec!["alarms.modl".to_string()]);
    assert_eq!(
        std::fs::read_to_string(install.data(".upgrade-version")).unwrap(),
        "8.1.0\n"
    );
    assert!(!upgrader_args.exists(), "upgrade tool must not run on a fresh install");
    assert!(install.data(".commissioned").is_file());

    let properties = std::fs::read_to_string(install.data("init.properties")).unwrap();
    assert!(properties.contains("gateway.network.0.Host=central\n"));
    assert!(properties.contains("SystemName=edge-01\n"));

    let steps = posted_steps(&server).await;
    let names: Vec<_> = steps.iter().map(|s| s["step"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["eula", "authSetup", "connections", "finalize"]);
    assert_eq!(steps[3]["data"], json!({"startGateway": true}));
    let sent_password = steps[1]["data"]["password"].as_str().unwrap();
    assert!(sent_password.starts_with('['));
    assert!(!sent_password.contains("s3cret"));

    let log = std::fs::read_to_string(install.path("logs/provisioning.log")).unwrap();
    assert!(log.contains("wrapper.java.initmemory=256 wrapper.java.maxmemory=1024"));

    let store = ConfigStore::open(&install.store_path()).unwrap();
    assert_eq!(store.certificate_count().unwrap(), 1);
    assert_eq!(store.license_count().unwrap(), 1);
}

#[tokio::test]
async fn restore_pending_skips_start_and_runs_restore_tool() {
    let mut install = Installation::new("8.1.0");
    install.set("GATEWAY_RANDOM_ADMIN_PASSWORD", "true");
    install.set("GATEWAY_EDITION", "standard");
    let archive = install.path("backup.gwbk");
    std::fs::write(&archive, b"backup").unwrap();
    install.set("GATEWAY_RESTORE_FILE", archive.display().to_string());
    install_fake_gateway(&install);
    let restore_args = install.path("restore.args");
    install.install_script(
        "gwcmd.sh",
        &format!("echo \"$@\" > {}", restore_args.display()),
    );

    let server = interim_gateway(false).await;

    install
        .orchestrator()
        .with_gateway_url(server.uri())
        .run()
        .await
        .unwrap();

    let steps = posted_steps(&server).await;
    assert_eq!(steps[0]["step"], "edition");
    assert_eq!(steps.last().unwrap()["data"], json!({"startGateway": false}));
    assert_eq!(
        std::fs::read_to_string(&restore_args).unwrap().trim(),
        format!("--restore {} -y", archive.display())
    );
}

#[tokio::test]
async fn commissioning_timeout_is_fatal_and_leaves_no_commissioned_marker() {
    let mut install = Installation::new("8.1.0");
    install.set("GATEWAY_ADMIN_PASSWORD", "s3cret");
    install.set("GATEWAY_STARTUP_TIMEOUT", "0");
    install_fake_gateway(&install);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"state":"STARTING"}"#))
        .mount(&server)
        .await;

    let err = install
        .orchestrator()
        .with_gateway_url(server.uri())
        .run()
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::HealthTimeout);
    assert!(!install.data(".commissioned").exists());
}
