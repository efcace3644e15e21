//! Global logger setup.
//!
//! Console output is always on.  When a log directory is configured, two daily rolling files
//! are written as well: `sync-service.log` with everything, `sync-errors.log` with errors only.
use crate::config::LogConf;
use crate::error::{Result, SyncError};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const SERVICE_LOG_FILE: &str = "sync-service.log";
pub const ERROR_LOG_FILE: &str = "sync-errors.log";

/// Install global logger, `RUST_LOG` wins over configured level when present.
///
/// Returned guards flush file writers on drop, keep them alive until exit.
pub fn init(conf: &LogConf) -> Result<Vec<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(conf.level()).map_err(|e| {
            SyncError::InvalidConfig(format!("invalid log level {:?}: {}", conf.level(), e))
        })?,
    };

    let mut guards = vec![];
    let (stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(guard);
    let console = fmt::layer().with_target(false).with_writer(stdout);

    let (service_file, error_file) = match conf.dir() {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (service, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, SERVICE_LOG_FILE));
            guards.push(guard);
            let (errors, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, ERROR_LOG_FILE));
            guards.push(guard);
            (
                Some(fmt::layer().with_ansi(false).with_writer(service)),
                Some(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(errors.with_max_level(Level::ERROR)),
                ),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(service_file)
        .with(error_file)
        .try_init()?;
    Ok(guards)
}
