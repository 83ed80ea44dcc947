use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Filter used when RUST_LOG is unset
///
/// Each `--debug` flag raises the level of the scripting target.
pub fn default_filter(config: &LoggingConfig, debug: u8) -> String {
    let base = config.filter.clone().unwrap_or_else(|| "info".to_string());
    match debug {
        0 => base,
        1 => format!("{base},scripting=debug"),
        _ => format!("{base},scripting=trace"),
    }
}

/// Initialize logging for a component.
///
/// Console output always; with `config.file` set, a copy goes to
/// `<data dir>/logs/<component>.log`. Returns a guard that must be kept alive
/// for the duration of the program.
pub fn init_logging(
    component_name: &str,
    config: &LoggingConfig,
    debug: u8,
) -> io::Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config, debug)));

    if !config.file {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return Ok(None);
    }

    let log_dir = log_directory()?;
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(format!("{component_name}.log"));
    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stdout).with_ansi(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!("Logging to file: {}", log_path.display());
    Ok(Some(guard))
}

fn log_directory() -> io::Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "ember")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to find home directory"))?;
    Ok(dirs.data_dir().join("logs"))
}

/// Start over once the file outgrows MAX_LOG_SIZE
fn truncate_if_needed(log_path: &Path) -> io::Result<()> {
    if log_path.exists() && fs::metadata(log_path)?.len() > MAX_LOG_SIZE {
        OpenOptions::new().write(true).open(log_path)?.set_len(0)?;
    }
    Ok(())
}
