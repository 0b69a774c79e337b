//! Logging setup shared by the fleet services
//!
//! Console output plus a daily rolling file per service, both using the
//! `timestamp [LEVEL] message` layout. The filter can be swapped at runtime.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields,
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment variable that overrides the log root directory
pub const LOG_DIR_ENV: &str = "TRACKERSRV_LOG_DIR";

fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter producing `2026-01-02T00:50:44.809123Z [INFO] message`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

// Keeps the non-blocking writer flushing until process exit
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

// ============================================================================
// Log Root Directory
// ============================================================================

static LOG_ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Initialize the log root directory
///
/// Priority:
/// 1. `TRACKERSRV_LOG_DIR` environment variable
/// 2. `config_dir` (from the service configuration file)
/// 3. `"logs"`
pub fn init_log_root(config_dir: Option<&str>) {
    LOG_ROOT.get_or_init(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                config_dir
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("logs"))
            })
    });
}

/// Get the log root directory
///
/// Falls back to the system temp directory when running under `cargo test`.
pub fn get_log_root() -> PathBuf {
    LOG_ROOT.get().cloned().unwrap_or_else(|| {
        std::env::var(LOG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                if is_test_environment() {
                    std::env::temp_dir().join("trackersrv-test-logs")
                } else {
                    PathBuf::from("logs")
                }
            })
    })
}

fn is_test_environment() -> bool {
    if std::env::var("CARGO_TARGET_TMPDIR").is_ok() {
        return true;
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(path_str) = exe.to_str() {
            if path_str.contains("target/debug/deps") || path_str.contains("target/release/deps") {
                return true;
            }
        }
    }

    false
}

/// Default max file size: 100MB
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

fn io_poisoned<T>(e: std::sync::PoisonError<T>) -> std::io::Error {
    std::io::Error::other(format!("Mutex poisoned: {}", e))
}

/// Daily rolling file writer: `{YYYYMMDD}_{service}.log`, `{YYYYMMDD}_{service}.N.log`
/// once a file passes the size limit
#[derive(Clone)]
struct DailyRollingWriter {
    service_name: String,
    log_dir: PathBuf,
    current_date: Arc<Mutex<String>>,
    current_file: Arc<Mutex<Option<File>>>,
    current_size: Arc<AtomicU64>,
    max_file_size: u64,
    rotation_count: Arc<AtomicU32>,
}

impl DailyRollingWriter {
    fn new(service_name: String, log_dir: PathBuf) -> std::io::Result<Self> {
        Self::with_max_size(service_name, log_dir, DEFAULT_MAX_FILE_SIZE)
    }

    fn with_max_size(
        service_name: String,
        log_dir: PathBuf,
        max_file_size: u64,
    ) -> std::io::Result<Self> {
        let current_date = chrono::Local::now().format("%Y%m%d").to_string();
        fs::create_dir_all(&log_dir)?;

        let file = open_append(&log_dir.join(format!("{}_{}.log", current_date, service_name)))?;
        let initial_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            service_name,
            log_dir,
            current_date: Arc::new(Mutex::new(current_date)),
            current_file: Arc::new(Mutex::new(Some(file))),
            current_size: Arc::new(AtomicU64::new(initial_size)),
            max_file_size,
            rotation_count: Arc::new(AtomicU32::new(0)),
        })
    }

    fn file_name(&self, date: &str, rotation: u32) -> PathBuf {
        if rotation == 0 {
            self.log_dir
                .join(format!("{}_{}.log", date, self.service_name))
        } else {
            self.log_dir
                .join(format!("{}_{}.{}.log", date, self.service_name, rotation))
        }
    }

    fn rotate_by_size(&self) -> std::io::Result<()> {
        let current_date = self.current_date.lock().map_err(io_poisoned)?;
        let count = self.rotation_count.fetch_add(1, Ordering::SeqCst) + 1;
        let new_file = open_append(&self.file_name(&current_date, count))?;

        self.current_size.store(0, Ordering::SeqCst);
        *self.current_file.lock().map_err(io_poisoned)? = Some(new_file);
        Ok(())
    }

    fn get_writer(&self) -> std::io::Result<std::sync::MutexGuard<'_, Option<File>>> {
        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let mut current_date = self.current_date.lock().map_err(io_poisoned)?;

        if *current_date != today {
            fs::create_dir_all(&self.log_dir)?;
            let new_file = open_append(&self.file_name(&today, 0))?;
            let initial_size = new_file.metadata().map(|m| m.len()).unwrap_or(0);

            *current_date = today;
            self.rotation_count.store(0, Ordering::SeqCst);
            self.current_size.store(initial_size, Ordering::SeqCst);
            *self.current_file.lock().map_err(io_poisoned)? = Some(new_file);
        }

        self.current_file.lock().map_err(io_poisoned)
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for DailyRollingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let current_size = self.current_size.load(Ordering::Relaxed);
        if current_size + buf.len() as u64 > self.max_file_size {
            self.rotate_by_size()?;
        }

        if let Some(ref mut file) = *self.get_writer()? {
            let written = file.write(buf)?;
            self.current_size
                .fetch_add(written as u64, Ordering::Relaxed);
            Ok(written)
        } else {
            Ok(0)
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Some(ref mut file) = *self.get_writer()? {
            file.flush()
        } else {
            Ok(())
        }
    }
}

// Dynamic log level reload support
type EnvFilterReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;
static LOG_FILTER_HANDLE: OnceLock<EnvFilterReloadHandle> = OnceLock::new();
static CURRENT_LOG_LEVEL: OnceLock<Mutex<String>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Service name (e.g., "trackersrv")
    pub service_name: String,
    /// Directory receiving the rolling log files
    pub log_dir: PathBuf,
    pub console_level: Level,
    pub file_level: Level,
    /// Write JSON lines to the file instead of the bracketed layout
    pub enable_json: bool,
    /// Number of rolled files kept per service (0 keeps everything)
    pub max_log_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".to_string(),
            log_dir: get_log_root(),
            console_level: Level::INFO,
            file_level: Level::DEBUG,
            enable_json: false,
            max_log_files: 30,
        }
    }
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(&config.log_dir)?;

    let removed = prune_old_logs(&config.log_dir, &config.service_name, config.max_log_files)?;

    let writer = DailyRollingWriter::new(config.service_name.clone(), config.log_dir.clone())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(writer);

    let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => {
            eprintln!("Warning: GUARDS lock was poisoned, recovering...");
            poisoned.into_inner().push(guard);
        },
    }

    // RUST_LOG wins over the computed default
    let filter_str = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        format!(
            "{},{}={}",
            config.console_level.as_str().to_lowercase(),
            config.service_name,
            config.file_level.as_str().to_lowercase()
        )
    });
    let (reload_filter, reload_handle) = reload::Layer::new(EnvFilter::new(&filter_str));
    let _ = LOG_FILTER_HANDLE.set(reload_handle);
    let _ = CURRENT_LOG_LEVEL.set(Mutex::new(filter_str));

    let console_layer = fmt::layer()
        .with_ansi(true)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = if config.enable_json {
        fmt::layer()
            .json()
            .with_writer(non_blocking)
            .with_level(true)
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .event_format(BracketedLevelFormat)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(reload_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!("Logging: {} @ {:?}", config.service_name, config.log_dir);
    if removed > 0 {
        tracing::debug!("Pruned {} old log files", removed);
    }

    Ok(())
}

/// Replace the active filter (e.g. `"debug"` or `"info,trackersrv=trace"`)
pub fn set_log_level(level: &str) -> Result<(), String> {
    let handle = LOG_FILTER_HANDLE
        .get()
        .ok_or("Logging not initialized with reload support")?;

    let new_filter =
        EnvFilter::try_new(level).map_err(|e| format!("Invalid log level '{}': {}", level, e))?;

    handle
        .reload(new_filter)
        .map_err(|e| format!("Failed to reload log filter: {}", e))?;

    if let Some(current) = CURRENT_LOG_LEVEL.get() {
        if let Ok(mut guard) = current.lock() {
            *guard = level.to_string();
        }
    }

    tracing::info!("Log level changed to: {}", level);
    Ok(())
}

/// Get current log filter string
pub fn get_log_level() -> String {
    CURRENT_LOG_LEVEL
        .get()
        .and_then(|m| m.lock().ok())
        .map(|guard| guard.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Remove the oldest `*_{service}*.log` files beyond `keep`
///
/// File names start with the date, so lexical order is age order.
pub fn prune_old_logs(log_dir: &Path, service_name: &str, keep: usize) -> std::io::Result<usize> {
    if keep == 0 {
        return Ok(0);
    }

    let marker = format!("_{}", service_name);
    let mut files: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(&marker) && n.ends_with(".log"))
        })
        .collect();

    if files.len() <= keep {
        return Ok(0);
    }

    files.sort();
    let excess = files.len() - keep;
    for path in files.iter().take(excess) {
        fs::remove_file(path)?;
    }
    Ok(excess)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_daily_writer_creates_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer =
            DailyRollingWriter::new("trackersrv".to_string(), dir.path().to_path_buf()).unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let today = chrono::Local::now().format("%Y%m%d").to_string();
        let content =
            fs::read_to_string(dir.path().join(format!("{}_trackersrv.log", today))).unwrap();
        assert_eq!(content, "hello\n");
    }

    #[test]
    fn test_daily_writer_rotates_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = DailyRollingWriter::with_max_size(
            "trackersrv".to_string(),
            dir.path().to_path_buf(),
            8,
        )
        .unwrap();
        writer.write_all(b"12345").unwrap();
        writer.write_all(b"67890").unwrap();
        writer.flush().unwrap();

        let today = chrono::Local::now().format("%Y%m%d").to_string();
        assert!(dir
            .path()
            .join(format!("{}_trackersrv.1.log", today))
            .exists());
    }

    #[test]
    fn test_prune_old_logs_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        for date in ["20260101", "20260102", "20260103"] {
            File::create(dir.path().join(format!("{}_trackersrv.log", date))).unwrap();
        }
        File::create(dir.path().join("20260101_other.log")).unwrap();

        let removed = prune_old_logs(dir.path(), "trackersrv", 2).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("20260101_trackersrv.log").exists());
        assert!(dir.path().join("20260103_trackersrv.log").exists());
        assert!(dir.path().join("20260101_other.log").exists());
    }

    #[test]
    fn test_get_log_level_before_init() {
        // Only meaningful when no subscriber was installed in this process
        if LOG_FILTER_HANDLE.get().is_none() {
            assert_eq!(get_log_level(), "unknown");
            assert!(set_log_level("debug").is_err());
        }
    }
}
