//! log4rs setup for the client and its admin binary.

use crate::errors::DbError;
use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_RETENTION: u32 = 7;

/// Initializes logging from a log4rs YAML file.
///
/// # Errors
/// Returns an error when the file cannot be read or is not a valid log4rs config.
pub fn init_path(path: &Path) -> Result<(), DbError> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())
        .map_err(|e| DbError::Config(format!("{}: {e}", path.display())))
}

/// Maps `error|warn|info|debug|trace` to a filter. Anything else is `Info`.
#[must_use]
pub fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn rolling(base: &Path, stem: &str, keep: u32) -> Result<RollingFileAppender, DbError> {
    let cfg_err = |e: &dyn std::fmt::Display| DbError::Config(format!("logging: {e}"));
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)
        .map_err(|e| cfg_err(&e))?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))
        .map_err(|e| cfg_err(&e))
}

/// Builds the logging config: `rdb.log` for everything and, when `query_log` is set, a separate
/// `query.log` for the `rdb::query` target.
///
/// # Errors
/// Returns an error when a log file cannot be opened.
pub fn build_config(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
    query_log: bool,
) -> Result<Config, DbError> {
    let base = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    std::fs::create_dir_all(&base).map_err(|e| DbError::Io(format!("{}: {e}", base.display())))?;
    let keep = retention.map_or(DEFAULT_RETENTION, |r| u32::try_from(r).unwrap_or(u32::MAX));
    let lvl = parse_level(level);

    let mut builder =
        Config::builder().appender(Appender::builder().build("app", Box::new(rolling(&base, "rdb", keep)?)));
    if query_log {
        builder = builder
            .appender(Appender::builder().build("query", Box::new(rolling(&base, "query", keep)?)))
            .logger(
                Logger::builder()
                    .appender("query")
                    .additive(false)
                    .build(crate::utils::querylog::TARGET, LevelFilter::Trace),
            );
    } else {
        builder = builder.logger(
            Logger::builder().additive(false).build(crate::utils::querylog::TARGET, LevelFilter::Off),
        );
    }
    builder
        .build(Root::builder().appender("app").build(lvl))
        .map_err(|e| DbError::Config(format!("logging: {e}")))
}

/// Configures process-wide logging. A second call in the same process is ignored.
///
/// # Errors
/// Returns an error when the log directory or files cannot be created.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
    query_log: bool,
) -> Result<(), DbError> {
    let config = build_config(dir, level, retention, query_log)?;
    let _ = log4rs::init_config(config);
    Ok(())
}

/// Configures logging from `RDB_LOG_DIR`, `RDB_LOG_LEVEL`, `RDB_LOG_RETENTION` and `RDB_QUERY_LOG`.
///
/// # Errors
/// Returns an error when the log directory or files cannot be created.
pub fn configure_from_env() -> Result<(), DbError> {
    let dir = std::env::var("RDB_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("RDB_LOG_LEVEL").ok();
    let retention = std::env::var("RDB_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    let query_log = std::env::var("RDB_QUERY_LOG")
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    configure_logging(dir.as_deref(), level.as_deref(), retention, query_log)
}
