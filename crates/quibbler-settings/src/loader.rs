//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`QuibblerSettings::default()`]
//! 2. Deep-merge `$QUIBBLER_HOME/settings.json` if it exists
//! 3. Deep-merge `<project>/.quibbler/config.json` if it exists
//! 4. Apply environment variable overrides (highest priority)
//! 5. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use quibbler_core::paths;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{MAX_THRESHOLD_FRACTION, MIN_THRESHOLD_FRACTION, QuibblerSettings};

/// Load settings for `project_root` from the standard locations.
pub fn load_settings(quibbler_home: &Path, project_root: Option<&Path>) -> Result<QuibblerSettings> {
    let user = quibbler_home.join(paths::SETTINGS_FILE);
    let project = project_root.map(paths::project_config_path);
    load_settings_from_paths(&user, project.as_deref())
}

/// Load settings from explicit file paths, then apply env overrides.
///
/// Missing files are skipped. A file with invalid JSON is an error.
pub fn load_settings_from_paths(
    user_path: &Path,
    project_path: Option<&Path>,
) -> Result<QuibblerSettings> {
    let mut merged = serde_json::to_value(QuibblerSettings::default())?;

    for path in std::iter::once(user_path).chain(project_path) {
        if let Some(layer) = read_layer(path)? {
            merged = deep_merge(merged, layer);
        }
    }

    let mut settings: QuibblerSettings = serde_json::from_value(merged)?;
    // File values are held to the ranges; env values are reconciled instead.
    settings.validate()?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layer(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        debug!(?path, "settings file not found, skipping");
        return Ok(None);
    }
    debug!(?path, "loading settings layer");
    let content = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `QUIBBLER_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut QuibblerSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup.
///
/// Invalid values are logged and ignored (falling back to file/default).
pub fn apply_overrides_from<F>(settings: &mut QuibblerSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Review ──────────────────────────────────────────────────────
    if let Some(v) = env.string("QUIBBLER_MODEL") {
        settings.review.model = v;
    }
    if let Some(v) = env.bool("QUIBBLER_SMART_TRIGGERS") {
        settings.review.smart_triggers = v;
    }
    if let Some(v) = env.bool("QUIBBLER_AUTO_SUMMARY") {
        settings.review.auto_summary = v;
    }

    // ── Compaction ──────────────────────────────────────────────────
    if let Some(v) = env.bool("QUIBBLER_COMPACT_ENABLED") {
        settings.compaction.enabled = v;
    }
    if let Some(v) = env.f64(
        "QUIBBLER_COMPACT_THRESHOLD",
        MIN_THRESHOLD_FRACTION,
        MAX_THRESHOLD_FRACTION,
    ) {
        settings.compaction.threshold_fraction = v;
        if let Some(target) = settings.compaction.target_fraction.filter(|t| *t > v) {
            warn!(
                target_fraction = target,
                threshold = v,
                "compaction target above QUIBBLER_COMPACT_THRESHOLD, clamping to threshold"
            );
            settings.compaction.target_fraction = Some(v);
        }
    }
    if let Some(v) = env.f64(
        "QUIBBLER_COMPACT_TARGET",
        MIN_THRESHOLD_FRACTION,
        MAX_THRESHOLD_FRACTION,
    ) {
        let threshold = settings.compaction.threshold_fraction;
        if v > threshold {
            warn!(
                value = v,
                threshold,
                "QUIBBLER_COMPACT_TARGET above compaction threshold, ignoring"
            );
        } else {
            settings.compaction.target_fraction = Some(v);
        }
    }

    // ── Sessions ────────────────────────────────────────────────────
    if let Some(v) = env.u64("QUIBBLER_IDLE_TTL_SECS", 1, 604_800) {
        settings.sessions.idle_ttl_secs = v;
    }
    if let Some(v) = env.usize("QUIBBLER_MAX_CONCURRENT_REVIEWS", 1, 1024) {
        settings.sessions.max_concurrent_reviews = v;
    }

    // ── Server / provider ───────────────────────────────────────────
    if let Some(v) = env.u16("QUIBBLER_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("QUIBBLER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.string("QUIBBLER_BASE_URL") {
        settings.provider.base_url = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` within a range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env readers (thin wrappers) ─────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        self.parsed(name, "f64", |v| parse_f64_range(v, min, max))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
