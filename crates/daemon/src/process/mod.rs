pub mod utils;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::state::{AppConfig, StateError};

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
///
/// Console output goes to stderr so command output on stdout stays clean.
pub fn init_logging(
    config: &AppConfig,
) -> Result<Vec<tracing_appender::non_blocking::WorkerGuard>, StateError> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_level = config.log_level()?;
    let mut guards = Vec::new();

    // Console layer
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(console_guard);

    let console_env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(console_writer)
        .with_filter(console_env_filter);

    // File layer (if log_dir is set)
    if let Some(log_dir) = &config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "vaultfs.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .ok();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    Ok(guards)
}
