//! `tracing` subscriber setup.
//!
//! The server logs to stderr. Hook subcommands run inside the agent's own
//! hook pipeline and the stdio tool server owns stdout, so those log to
//! `$QUIBBLER_HOME/quibbler.log` instead.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Call once at startup; later calls are no-ops. `RUST_LOG` takes precedence
/// over `level`. With `log_file`, output is appended to that file (parent
/// directories are created); otherwise it goes to stderr.
pub fn init_subscriber(level: &str, log_file: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .compact();
            // set_global_default is a no-op if already set
            if subscriber.try_init().is_ok() {
                debug!(path = %path.display(), "logging to file");
            }
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(std::io::stderr)
                .compact();
            if subscriber.try_init().is_ok() {
                debug!("logging to stderr");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("quibbler.log");
        init_subscriber("info", Some(&path)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn repeated_init_is_harmless() {
        init_subscriber("warn", None).unwrap();
        init_subscriber("debug", None).unwrap();
    }
}
