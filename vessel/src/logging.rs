//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::runtime::VesselOptions;
use vessel_shared::constants::envs;

/// Initialize the global subscriber from the runtime options.
///
/// Returns the appender guard when logging to a file; the caller keeps it
/// alive for the process lifetime. Repeated initialization (tests, embedded
/// use) is a no-op.
pub fn init(options: &VesselOptions) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = options
        .log_level
        .clone()
        .or_else(|| std::env::var(envs::VESSEL_LOG).ok())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    match &options.log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "vessel.log".to_string());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}
