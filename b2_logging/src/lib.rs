use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use b2_config::groups::log::ConfigValueGroup as LogConfigValues;
use chrono::{DateTime, FixedOffset, Local};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Default log levels. Override using the `RUST_LOG` env variable.
const DEFAULT_LOG_LEVEL_FILE: &str = "info";
const DEFAULT_LOG_LEVEL_CONSOLE: &str = "warn";

/// Where log records go.
#[derive(Clone, Debug, PartialEq)]
pub enum LoggingMode {
    /// A new timestamped file inside this directory.
    Directory(PathBuf),
    File(PathBuf),
    Console,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    pub logging_mode: LoggingMode,
    pub use_json: bool,
    pub version: String,
    pub file_prefix: String,
}

impl LoggingConfig {
    pub fn new(version: String, log: &LogConfigValues) -> LoggingConfig {
        let logging_mode = match log.dest.as_deref() {
            None | Some("") => LoggingMode::Console,
            Some(dest) => {
                let path = PathBuf::from(dest);
                if dest.ends_with('/') || dest.ends_with('\\') || path.is_dir() {
                    LoggingMode::Directory(path)
                } else {
                    LoggingMode::File(path)
                }
            },
        };

        let use_json = match &log.format {
            Some(format) => format.trim().eq_ignore_ascii_case("json"),
            None => logging_mode != LoggingMode::Console,
        };

        Self {
            logging_mode,
            use_json,
            version,
            file_prefix: log.prefix.clone(),
        }
    }
}

/// Installs the global subscriber. Only the first call in a process has an effect.
///
/// A log file that cannot be opened is reported on the console, which then takes over.
pub fn init_logging(cfg: LoggingConfig) {
    let log_file = match &cfg.logging_mode {
        LoggingMode::Directory(dir) => Some(log_file_in_dir(dir, &cfg.file_prefix)),
        LoggingMode::File(path) => Some(path.clone()),
        LoggingMode::Console => None,
    };

    let file_error = match log_file.as_deref().map(open_log_file) {
        Some(Ok(writer)) => {
            install(writer, cfg.use_json, DEFAULT_LOG_LEVEL_FILE, false);
            None
        },
        Some(Err(e)) => Some(e),
        None => None,
    };

    if log_file.is_none() || file_error.is_some() {
        install(BoxMakeWriter::new(std::io::stderr), cfg.use_json, DEFAULT_LOG_LEVEL_CONSOLE, true);
    }
    if let (Some(path), Some(e)) = (&log_file, file_error) {
        error!(path = %path.display(), "cannot write log file ({e}); logging to the console instead");
    }

    info!(version = %cfg.version, "b2 starting");
}

fn install(writer: BoxMakeWriter, use_json: bool, default_level: &str, console: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_default();

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(false)
        .with_ansi(console)
        .with_file(!console)
        .with_line_number(!console);

    let layer = if use_json {
        layer.json().with_filter(filter).boxed()
    } else if console {
        layer.compact().with_filter(filter).boxed()
    } else {
        layer.with_filter(filter).boxed()
    };

    // A subscriber installed earlier (e.g. by a test harness) wins.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

/// A non-blocking writer appending to `path`, creating its directory as needed.
fn open_log_file(path: &Path) -> std::io::Result<BoxMakeWriter> {
    let file_name = path.file_name().unwrap_or(OsStr::new("b2.log")).to_os_string();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&directory)?;

    // Fail here rather than inside the background writer.
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(directory.join(&file_name))?;

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    // Dropping the guard stops the writer thread, so it lives as long as the process.
    static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
    let _ = FILE_GUARD.set(guard);

    Ok(BoxMakeWriter::new(writer))
}

/// `<prefix>_<YYYYMMDD>T<HHMMSS><mmm><+/-HHMM>_<pid>.log` in `dir`, in local time.
pub fn log_file_in_dir(dir: impl AsRef<Path>, prefix: &str) -> PathBuf {
    let now_local: DateTime<Local> = Local::now();
    let now_fixed: DateTime<FixedOffset> = now_local.with_timezone(now_local.offset());

    let ts = now_fixed.format("%Y%m%dT%H%M%S%3f%z");
    let pid = std::process::id();
    dir.as_ref().join(format!("{prefix}_{ts}_{pid}.log"))
}
