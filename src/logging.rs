//! Logger setup for hosts embedding the engine.
//!
//! Verbosity: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
//! Console logging respects `RUST_LOG`; file logging uses the verbosity level only.

use anyhow::Context;
use log::{LevelFilter, info};
use std::path::Path;

pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger.
///
/// Returns an error if the log file cannot be created. A logger that is
/// already installed is left in place.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> anyhow::Result<()> {
    let level = level_for(verbosity);

    if let Some(path) = log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("failed to create log file {}", path.display()))?;
        let installed = env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .try_init()
            .is_ok();
        if installed {
            info!("Logging to file: {} (level: {:?})", path.display(), level);
        }
    } else {
        let default_level = level.as_str().to_ascii_lowercase();
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .try_init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(level_for(0), LevelFilter::Warn);
        assert_eq!(level_for(1), LevelFilter::Info);
        assert_eq!(level_for(2), LevelFilter::Debug);
        assert_eq!(level_for(9), LevelFilter::Trace);
    }

    #[test]
    fn test_bad_log_path_is_error() {
        let err = init_logging(1, Some(Path::new("/nonexistent-dir/engine.log"))).unwrap_err();
        assert!(err.to_string().contains("failed to create log file"));
    }
}
