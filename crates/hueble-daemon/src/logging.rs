//! Tracing setup for the daemon and CLI binaries.
//!
//! Both read `RUST_LOG` first. The daemon logs `hueble` targets at info
//! (debug in debug builds) and, in debug builds, also writes a file in the
//! temp dir. The CLI stays at warn.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DAEMON_LOG: &str = "hueble-daemon";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

fn daemon_directive() -> &'static str {
    if cfg!(debug_assertions) {
        "hueble=debug"
    } else {
        "hueble=info"
    }
}

fn log_file_name(started: DateTime<Local>) -> String {
    format!("{DAEMON_LOG}-{}.log", started.format("%Y%m%d_%H%M%S"))
}

/// Open a fresh timestamped log in `dir` and point `hueble-daemon.log` at it.
fn daemon_log_file(dir: &Path) -> (PathBuf, NonBlocking) {
    let name = log_file_name(Local::now());
    let path = dir.join(&name);

    #[cfg(unix)]
    {
        let latest = dir.join(format!("{DAEMON_LOG}.log"));
        let _ = std::fs::remove_file(&latest);
        let _ = std::os::unix::fs::symlink(&path, &latest);
    }

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, &name));
    // The writer must outlive every span, including those logged during exit
    std::mem::forget(guard);

    (path, writer)
}

/// Set up logging for the daemon process.
pub fn setup_logging() {
    let debug_build = cfg!(debug_assertions);

    let file_layer = debug_build.then(|| {
        let (path, writer) = daemon_log_file(&std::env::temp_dir());
        eprintln!("Logging to: {} (and stderr)", path.display());
        fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_line_number(true)
    });

    tracing_subscriber::registry()
        .with(env_filter(daemon_directive()))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_line_number(debug_build),
        )
        .with(file_layer)
        .init();
}

/// Quiet stderr logging for short-lived commands.
pub fn setup_cli_logging() {
    tracing_subscriber::registry()
        .with(env_filter("warn"))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
