//! Logging setup
//!
//! The library only emits `tracing` events; applications and tests call
//! [`init`] (or install their own subscriber) to see them.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Parse a log level name, falling back to INFO for unknown or missing values
pub fn parse_level(level: Option<&str>) -> Level {
    let Some(s) = level else {
        return Level::INFO;
    };
    match s.to_uppercase().as_str() {
        "TRACE" => Level::TRACE,
        "DEBUG" => Level::DEBUG,
        "INFO" => Level::INFO,
        "WARN" | "WARNING" => Level::WARN,
        "ERROR" => Level::ERROR,
        _ => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
            Level::INFO
        }
    }
}

/// Install a fmt subscriber on stderr at `level`, honoring `RUST_LOG` directives
///
/// Does nothing if a global subscriber is already set, so repeated calls are harmless.
pub fn init(level: Option<&str>) {
    let level = parse_level(level);
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let installed = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Logging initialized (level: {:?})", level);
    }
}
