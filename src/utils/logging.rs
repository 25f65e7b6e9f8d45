use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Maps a configured level name onto a tracing filter. Unknown names fall back to `info`.
pub fn level_filter(level: &str) -> LevelFilter {
    match level.trim().to_lowercase().as_str() {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" | "warning" => LevelFilter::WARN,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// Initialize tracing for the application.
///
/// `RUST_LOG` takes precedence when set; otherwise everything at `default_level`
/// and above is logged. Safe to call more than once.
pub fn init(default_level: &str) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_filter(default_level).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
