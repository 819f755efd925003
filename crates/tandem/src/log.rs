//! Logging for tandem.
use anyhow::Context;
use std::io::LineWriter;
use std::path::Path;
use std::sync::Mutex;
use tandem_core::get_data_dir;
use tracing_subscriber::fmt::time::OffsetTime;

/// Log files above this size are rotated on startup.
const MAX_LOG_BYTES: u64 = 100 * 1024;

/// Initializes file logging at `<data_dir>/tandem.log`.
///
/// A log larger than 100KB is moved to `tandem.log.old` first, replacing any
/// older backup. The terminal is never logged to since it belongs to the REPL
/// and, in native mode, to the child process.
pub fn setup_logging() -> anyhow::Result<()> {
    let data_dir = get_data_dir().context("Failed to get data directory")?;
    let log_path = data_dir.join("tandem.log");
    rotate_log(&log_path, &data_dir.join("tandem.log.old"))?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    // Ensure the logs are flushed after every line
    let writer = Mutex::new(LineWriter::new(log_file));

    tracing_subscriber::fmt()
        .with_env_filter("tandem=debug,tandem_core=debug,rustyline=info")
        .with_writer(writer)
        .with_ansi(false)
        .with_timer(OffsetTime::local_rfc_3339()?)
        .init();
    Ok(())
}

fn rotate_log(log_path: &Path, backup_path: &Path) -> std::io::Result<()> {
    if !log_path.exists() || std::fs::metadata(log_path)?.len() <= MAX_LOG_BYTES {
        return Ok(());
    }
    if backup_path.exists() {
        std::fs::remove_file(backup_path)?;
    }
    std::fs::rename(log_path, backup_path)
}
