//! `gwinit` container entrypoint.
//!
//! - `gwinit [run]`: classify the boot, provision or upgrade as needed,
//!   register modules, then exec the gateway in the foreground.
//! - `gwinit status`: print what is recorded on the data volume.
//! - `gwinit accept-certs`: the detached certificate auto-accept helper.
//!
//! Logs go to stderr. Every fatal condition exits with status 1.

use std::ffi::OsString;
use std::io::IsTerminal;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use gwinit_core::autoaccept::{self, ACCEPT_INTERVAL};
use gwinit_core::{
    Config, GwinitError, PathOverrides, Paths, ProcessEnv, ServiceCommand, StatusReport,
    UpgradeOrchestrator,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "gwinit", version, about = "Gateway first-boot and upgrade orchestrator")]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Args)]
struct PathArgs {
    /// Gateway install directory (GATEWAY_INSTALL_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    install_dir: Option<PathBuf>,

    /// Data volume (GATEWAY_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log directory (GATEWAY_LOG_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Module drop directory (GATEWAY_MODULES_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    modules_dir: Option<PathBuf>,
}

impl From<PathArgs> for PathOverrides {
    fn from(args: PathArgs) -> Self {
        Self {
            install_dir: args.install_dir,
            data_dir: args.data_dir,
            log_dir: args.log_dir,
            modules_dir: args.modules_dir,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Provision or upgrade, then exec the gateway (default)
    Run(RunArgs),
    /// Print the recorded state and what the next boot would do
    Status,
    /// Move rejected gateway-network certificates into the trusted store
    AcceptCerts(AcceptArgs),
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// Stop after provisioning instead of exec'ing the gateway
    #[arg(long)]
    no_exec: bool,

    /// Extra arguments appended to the gateway command line
    #[arg(last = true, value_name = "ARGS")]
    passthrough: Vec<OsString>,
}

#[derive(Debug, Args)]
struct AcceptArgs {
    /// How long to keep accepting, in seconds
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    delay: u64,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

fn run(overrides: &PathOverrides, args: RunArgs) -> anyhow::Result<()> {
    let config = Config::from_env(&ProcessEnv, overrides)?;
    let orchestrator = UpgradeOrchestrator::new(config);
    let report = runtime()?.block_on(orchestrator.run())?;
    tracing::info!(state = %report.state, "Boot sequence complete");

    let config = orchestrator.config();
    if !config.auto_accept_delay.is_zero() {
        let exe = std::env::current_exe().context("cannot locate gwinit executable")?;
        autoaccept::spawn_detached(&exe, &config.paths, config.auto_accept_delay)?;
    }

    let command =
        ServiceCommand::new(&config.service, &config.paths).with_passthrough(args.passthrough);
    if args.no_exec {
        tracing::info!(program = %command.display_program(), "Not starting gateway (--no-exec)");
        return Ok(());
    }

    tracing::info!(program = %command.display_program(), "Starting gateway");
    let err = command.to_std().exec();
    Err(err).with_context(|| format!("failed to exec {}", command.display_program()))
}

fn print_status(status: &StatusReport) {
    let persisted = &status.persisted;
    let present = |yes: bool| if yes { "present" } else { "absent" };
    println!("image version:   {}", status.image_version);
    println!("boot state:      {}", status.state);
    println!(
        "upgrade marker:  {}",
        persisted.marker.as_deref().unwrap_or("(none)")
    );
    println!("config store:    {}", present(persisted.store_present));
    println!(
        "commissioned:    {}",
        persisted.commissioned_at.as_deref().unwrap_or("no")
    );
    println!("init properties: {}", present(persisted.init_properties_present));
}

fn status(overrides: &PathOverrides) -> anyhow::Result<()> {
    let config = Config::from_env(&ProcessEnv, overrides)?;
    let status = UpgradeOrchestrator::new(config).status()?;
    print_status(&status);
    Ok(())
}

fn accept_certs(overrides: &PathOverrides, args: &AcceptArgs) -> anyhow::Result<()> {
    let paths = Paths::from_env(&ProcessEnv, overrides);
    runtime()?.block_on(autoaccept::run_accept_loop(
        &paths,
        Duration::from_secs(args.delay),
        ACCEPT_INTERVAL,
    ))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let overrides = PathOverrides::from(cli.paths);
    let result = match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run(&overrides, args),
        Command::Status => status(&overrides),
        Command::AcceptCerts(args) => accept_certs(&overrides, &args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let category = err
                .downcast_ref::<GwinitError>()
                .map_or("FATAL", |e| e.category().as_str());
            tracing::error!(category, "{err:#}");
            ExitCode::from(1)
        }
    }
}
