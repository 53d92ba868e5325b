//! Trust gateway-network certificates that the gateway rejected during the
//! first minutes after start.
//!
//! The orchestrator launches this as a separate `gwinit accept-certs`
//! process right before it execs the gateway. Nothing waits on it; it ends
//! at its own deadline or with the container.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Paths;
use crate::error::{GwinitError, Result};

pub const ACCEPT_INTERVAL: Duration = Duration::from_secs(5);

fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        // EXDEV: different filesystems
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Move every regular file from `rejected` into `trusted`. A missing
/// `rejected` directory means nothing to do.
pub fn accept_pending(rejected: &Path, trusted: &Path) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(rejected) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GwinitError::io(rejected, e)),
    };

    let mut moved = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| GwinitError::io(rejected, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if moved.is_empty() {
            std::fs::create_dir_all(trusted).map_err(|e| GwinitError::io(trusted, e))?;
        }
        let target = trusted.join(entry.file_name());
        move_file(&path, &target).map_err(|e| GwinitError::io(&path, e))?;
        tracing::info!(certificate = %target.display(), "Accepted gateway-network certificate");
        moved.push(target);
    }
    Ok(moved)
}

/// Sweep every `interval` until `delay` has passed. Returns how many
/// certificates were accepted.
pub async fn run_accept_loop(paths: &Paths, delay: Duration, interval: Duration) -> Result<usize> {
    let rejected = paths.rejected_certs_dir();
    let trusted = paths.trusted_certs_dir();
    let deadline = Instant::now() + delay;
    let mut accepted = 0;

    loop {
        match accept_pending(&rejected, &trusted) {
            Ok(moved) => accepted += moved.len(),
            Err(e) => tracing::warn!(error = %e, "Certificate sweep failed"),
        }
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
    tracing::info!(accepted, "Certificate auto-accept finished");
    Ok(accepted)
}

/// Start `<exe> accept-certs --delay <secs> --data-dir <data>` without
/// waiting for it.
pub fn spawn_detached(exe: &Path, paths: &Paths, delay: Duration) -> Result<u32> {
    let program = exe.display().to_string();
    let child = std::process::Command::new(exe)
        .arg("accept-certs")
        .arg("--delay")
        .arg(delay.as_secs().to_string())
        .arg("--data-dir")
        .arg(&paths.data_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| GwinitError::process("spawn", &program, e))?;
    let pid = child.id();
    tracing::info!(pid, delay_secs = delay.as_secs(), "Started certificate auto-accept helper");
    Ok(pid)
}
