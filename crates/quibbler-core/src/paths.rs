//! Filesystem layout.
//!
//! ```text
//! $QUIBBLER_HOME (default ~/.quibbler)
//! ├── settings.json        user settings
//! ├── prompt.md            optional base prompt override
//! └── quibbler.log         log file for hook/stdio subcommands
//!
//! <project>/.quibbler
//! ├── config.json          project settings
//! ├── rules.md             project rules
//! └── <context_key>.txt    pending feedback for one session
//! ```

use std::path::{Path, PathBuf};

/// Per-project and per-user directory name.
pub const QUIBBLER_DIR: &str = ".quibbler";
/// Project rules file name.
pub const RULES_FILE: &str = "rules.md";
/// Project settings file name.
pub const PROJECT_CONFIG_FILE: &str = "config.json";
/// User settings file name.
pub const SETTINGS_FILE: &str = "settings.json";
/// Base prompt override file name.
pub const PROMPT_FILE: &str = "prompt.md";
/// Log file name.
pub const LOG_FILE: &str = "quibbler.log";

/// Resolve the Quibbler home directory from `QUIBBLER_HOME` and `HOME`.
pub fn quibbler_home() -> PathBuf {
    resolve_home(
        std::env::var("QUIBBLER_HOME").ok().as_deref(),
        std::env::var("HOME").ok().as_deref(),
    )
}

/// Pure resolution: an explicit home wins (with `~/` expanded), otherwise
/// `<home>/.quibbler`.
pub fn resolve_home(explicit: Option<&str>, home: Option<&str>) -> PathBuf {
    let home = home.filter(|h| !h.is_empty()).unwrap_or("/tmp");
    match explicit.filter(|v| !v.is_empty()) {
        Some(path) if path == "~" => PathBuf::from(home),
        Some(path) => match path.strip_prefix("~/") {
            Some(rest) => Path::new(home).join(rest),
            None => PathBuf::from(path),
        },
        None => Path::new(home).join(QUIBBLER_DIR),
    }
}

/// `<project>/.quibbler`
pub fn project_dir(project_root: &Path) -> PathBuf {
    project_root.join(QUIBBLER_DIR)
}

/// `<project>/.quibbler/rules.md`
pub fn rules_path(project_root: &Path) -> PathBuf {
    project_dir(project_root).join(RULES_FILE)
}

/// `<project>/.quibbler/config.json`
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_dir(project_root).join(PROJECT_CONFIG_FILE)
}

/// `<project>/.quibbler/<context_key>.txt`
///
/// Characters outside `[A-Za-z0-9._-]` are replaced with `_` so a context
/// key can never escape the project directory.
pub fn feedback_path(project_root: &Path, context_key: &str) -> PathBuf {
    project_dir(project_root).join(format!("{}.txt", sanitize_file_stem(context_key)))
}

fn sanitize_file_stem(key: &str) -> String {
    let stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    // Leading dots would produce hidden files or `..`.
    let trimmed = stem.trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_owned()
    } else {
        trimmed.to_owned()
    }
}
