//! Process-wide file logging for repository hosts.
//!
//! Repositories, the mapper and the database bootstrap emit metadata-only
//! `event=<name> module=<module> status=<ok|error|skip> key=value` lines through
//! the `log` facade. `init_logging` sends them to a size-rotated file under an
//! absolute directory. The first successful call fixes the settings for the
//! rest of the process; a later call with other settings is rejected.

use flexi_logger::{
    Cleanup, Criterion, DeferredNow, FileSpec, Logger, LoggerHandle, Naming, WriteMode,
};
use log::{error, info, LevelFilter, Record};
use once_cell::sync::OnceCell;
use std::any::Any;
use std::io::Write;
use std::path::{Path, PathBuf};

const LOG_BASENAME: &str = "repokit";
const ROTATE_AT_BYTES: u64 = 4 * 1024 * 1024;
const KEPT_LOG_FILES: usize = 3;
const PANIC_MESSAGE_LIMIT: usize = 200;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    level: LevelFilter,
    dir: PathBuf,
}

struct ActiveLogger {
    settings: LogSettings,
    _handle: LoggerHandle,
}

impl LogSettings {
    fn parse(level: &str, log_dir: &str) -> Result<Self, String> {
        Ok(Self {
            level: parse_level(level)?,
            dir: parse_log_dir(log_dir)?,
        })
    }

    fn start(&self) -> Result<LoggerHandle, String> {
        std::fs::create_dir_all(&self.dir).map_err(|err| {
            format!(
                "cannot create log directory `{}`: {err}",
                self.dir.display()
            )
        })?;

        Logger::with(self.level)
            .log_to_file(
                FileSpec::default()
                    .directory(self.dir.clone())
                    .basename(LOG_BASENAME),
            )
            .rotate(
                Criterion::Size(ROTATE_AT_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(KEPT_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .format_for_files(event_line)
            .start()
            .map_err(|err| format!("failed to start file logger: {err}"))
    }
}

/// Starts file logging at `level` under the absolute directory `log_dir`.
///
/// # Errors
/// - Unknown level names and empty or relative directories.
/// - Directory creation or logger startup failures.
/// - Logging already active with a different level or directory.
pub fn init_logging(level: &str, log_dir: &str) -> Result<(), String> {
    let requested = LogSettings::parse(level, log_dir)?;

    let active = ACTIVE.get_or_try_init(|| {
        let handle = requested.start()?;
        install_panic_hook();
        info!(
            "event=logging_init module=logging status=ok level={} log_dir={} version={}",
            requested.level,
            requested.dir.display(),
            env!("CARGO_PKG_VERSION")
        );
        Ok::<_, String>(ActiveLogger {
            settings: requested.clone(),
            _handle: handle,
        })
    })?;

    if active.settings != requested {
        return Err(format!(
            "logging is active with level {} at `{}`; cannot switch to level {} at `{}`",
            active.settings.level,
            active.settings.dir.display(),
            requested.level,
            requested.dir.display()
        ));
    }
    Ok(())
}

/// Level and directory of the active file logger, if one was started.
pub fn logging_status() -> Option<(LevelFilter, PathBuf)> {
    ACTIVE
        .get()
        .map(|active| (active.settings.level, active.settings.dir.clone()))
}

/// `debug` for debug builds, `info` otherwise.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Parses a level name, ignoring case and surrounding whitespace.
/// `warning` is accepted for `warn`; `off` is rejected.
pub(crate) fn parse_level(level: &str) -> Result<LevelFilter, String> {
    let trimmed = level.trim();
    if trimmed.eq_ignore_ascii_case("warning") {
        return Ok(LevelFilter::Warn);
    }
    match trimmed.parse::<LevelFilter>() {
        Ok(LevelFilter::Off) | Err(_) => Err(format!(
            "unsupported log level `{trimmed}`; expected trace, debug, info, warn or error"
        )),
        Ok(filter) => Ok(filter),
    }
}

pub(crate) fn parse_log_dir(log_dir: &str) -> Result<PathBuf, String> {
    let trimmed = log_dir.trim();
    if trimmed.is_empty() {
        return Err("log directory cannot be empty".to_string());
    }
    let path = Path::new(trimmed);
    if !path.is_absolute() {
        return Err(format!("log directory must be absolute, got `{trimmed}`"));
    }
    Ok(path.to_path_buf())
}

fn event_line(
    out: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record,
) -> std::io::Result<()> {
    write!(
        out,
        "{} {:<5} [{}] {}",
        now.format_rfc3339(),
        record.level(),
        record.module_path().unwrap_or("unknown"),
        record.args()
    )
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let location = panic.location().map_or_else(
            || "unknown".to_string(),
            |at| format!("{}:{}", at.file(), at.line()),
        );
        error!(
            "event=panic module=logging status=error location={location} message={}",
            one_line(panic_message(panic.payload()), PANIC_MESSAGE_LIMIT)
        );
        previous(panic);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

// Panic text may quote entity field values: keep it to one bounded line.
fn one_line(text: &str, limit: usize) -> String {
    let mut line: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(limit)
        .collect();
    if text.chars().count() > limit {
        line.push_str("...");
    }
    line
}
