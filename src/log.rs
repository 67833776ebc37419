//! Logging for planner runs.
//!
//! Progress messages are printed to stdout and warnings and errors to stderr. A run also keeps a
//! copy of both streams in its output folder, so a finished plan can be inspected afterwards.
use anyhow::{Context, Result, bail};
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::{Dispatch, FormatCallback};
use log::{LevelFilter, Record};
use std::env;
use std::fmt::Arguments;
use std::fs::{File, OpenOptions};
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

/// A flag indicating whether the logger has been initialised
static LOGGER_INIT: OnceLock<()> = OnceLock::new();

/// The default log level for the program.
///
/// Used as a fallback if the user hasn't specified something else with the `STRIDE_LOG_LEVEL`
/// environment variable or the settings.toml file.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable which overrides the log level from the settings file
const LOG_LEVEL_ENV_VAR: &str = "STRIDE_LOG_LEVEL";

/// The file name for the log file containing messages about the ordinary progress of a run
const LOG_INFO_FILE_NAME: &str = "stride_info.log";

/// The file name for the log file containing warnings and error messages
const LOG_ERROR_FILE_NAME: &str = "stride_error.log";

/// Whether the program logger has been initialised
pub fn is_logger_initialised() -> bool {
    LOGGER_INIT.get().is_some()
}

/// Start the program logger.
///
/// The level is taken from `STRIDE_LOG_LEVEL` if it is set, otherwise from `settings.toml`, and is
/// `info` if neither gives one. Accepted levels are `off`, `error`, `warn`, `info`, `debug` and
/// `trace`, in any case.
///
/// If `run_dir` is given, `stride_info.log` and `stride_error.log` are (re)created there.
pub fn init(log_level_from_settings: Option<&str>, run_dir: Option<&Path>) -> Result<()> {
    let log_level = resolve_log_level(env::var(LOG_LEVEL_ENV_VAR).ok(), log_level_from_settings)?;

    let colours = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::Magenta);
    let stdout_colours = std::io::stdout().is_terminal().then_some(colours);
    let stderr_colours = std::io::stderr().is_terminal().then_some(colours);

    let mut dispatch = Dispatch::new()
        .chain(
            Dispatch::new()
                .filter(|metadata| metadata.level() > LevelFilter::Warn)
                .format(move |out, message, record| {
                    format_record(out, message, record, stdout_colours.as_ref());
                })
                .level(log_level)
                .chain(std::io::stdout()),
        )
        .chain(
            Dispatch::new()
                .format(move |out, message, record| {
                    format_record(out, message, record, stderr_colours.as_ref());
                })
                .level(log_level.min(LevelFilter::Warn))
                .chain(std::io::stderr()),
        );

    if let Some(run_dir) = run_dir {
        let (info_file, error_file) = open_log_files(run_dir)?;

        // The info file always records stage progress, even when the console is quieter
        dispatch = dispatch
            .chain(
                Dispatch::new()
                    .filter(|metadata| metadata.level() > LevelFilter::Warn)
                    .format(|out, message, record| format_record(out, message, record, None))
                    .level(log_level.max(LevelFilter::Info))
                    .chain(info_file),
            )
            .chain(
                Dispatch::new()
                    .format(|out, message, record| format_record(out, message, record, None))
                    .level(LevelFilter::Warn)
                    .chain(error_file),
            );
    }

    dispatch.apply().context("Logger already initialised")?;
    let _ = LOGGER_INIT.set(());

    Ok(())
}

/// Pick the log level: the environment variable wins over the settings file
fn resolve_log_level(
    from_env: Option<String>,
    from_settings: Option<&str>,
) -> Result<LevelFilter> {
    match from_env {
        Some(level) => parse_log_level(&level),
        None => parse_log_level(from_settings.unwrap_or(DEFAULT_LOG_LEVEL)),
    }
}

/// Create empty info and error log files in `run_dir`
fn open_log_files(run_dir: &Path) -> Result<(File, File)> {
    let create = |file_name: &str| {
        let path = run_dir.join(file_name);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .with_context(|| format!("Could not create log file {}", path.display()))
    };

    Ok((create(LOG_INFO_FILE_NAME)?, create(LOG_ERROR_FILE_NAME)?))
}

/// Convert a log level name (case insensitive) into a [`LevelFilter`]
fn parse_log_level(log_level: &str) -> Result<LevelFilter> {
    let level = match log_level.to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        unknown => bail!("Unknown log level: {unknown}"),
    };

    Ok(level)
}

/// Format a record as `[HH:MM:SS LEVEL target] message`, colouring the level if `colours` is given
fn format_record(
    out: FormatCallback,
    message: &Arguments,
    record: &Record,
    colours: Option<&ColoredLevelConfig>,
) {
    let timestamp = Local::now().format("%H:%M:%S");
    let target = record.target();
    match colours {
        Some(colours) => {
            let level = colours.color(record.level());
            out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
        }
        None => {
            let level = record.level();
            out.finish(format_args!("[{timestamp} {level} {target}] {message}"));
        }
    }
}
