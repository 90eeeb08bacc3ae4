//! Settings types.
//!
//! All structs use `camelCase` on the wire and `#[serde(default)]`, so a
//! partial JSON file only needs the keys it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Lowest accepted compaction threshold fraction.
pub const MIN_THRESHOLD_FRACTION: f64 = 0.70;
/// Highest accepted compaction threshold fraction.
pub const MAX_THRESHOLD_FRACTION: f64 = 0.85;

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuibblerSettings {
    /// Reviewer behaviour.
    pub review: ReviewSettings,
    /// Context compaction.
    pub compaction: CompactionSettings,
    /// Session registry.
    pub sessions: SessionSettings,
    /// Hook server.
    pub server: ServerSettings,
    /// Model backend.
    pub provider: ProviderSettings,
}

impl QuibblerSettings {
    /// Check cross-field constraints after all layers are merged.
    pub fn validate(&self) -> Result<()> {
        let fraction = self.compaction.threshold_fraction;
        if !(MIN_THRESHOLD_FRACTION..=MAX_THRESHOLD_FRACTION).contains(&fraction) {
            return Err(SettingsError::InvalidValue(format!(
                "compaction.thresholdFraction must be within \
                 {MIN_THRESHOLD_FRACTION}..={MAX_THRESHOLD_FRACTION}, got {fraction}"
            )));
        }
        if let Some(target) = self.compaction.target_fraction {
            if !(MIN_THRESHOLD_FRACTION..=fraction).contains(&target) {
                return Err(SettingsError::InvalidValue(format!(
                    "compaction.targetFraction must be within \
                     {MIN_THRESHOLD_FRACTION}..={fraction}, got {target}"
                )));
            }
        }
        if self.compaction.retained_turns == 0 || self.compaction.aggressive_tail_turns == 0 {
            return Err(SettingsError::InvalidValue(
                "compaction.retainedTurns and compaction.aggressiveTailTurns must be at least 1"
                    .into(),
            ));
        }
        if self.compaction.retained_turns > self.compaction.summary_trigger_turns {
            return Err(SettingsError::InvalidValue(format!(
                "compaction.retainedTurns ({}) exceeds compaction.summaryTriggerTurns ({})",
                self.compaction.retained_turns, self.compaction.summary_trigger_turns
            )));
        }
        if self.sessions.max_concurrent_reviews == 0 {
            return Err(SettingsError::InvalidValue(
                "sessions.maxConcurrentReviews must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Reviewer behaviour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewSettings {
    /// Reviewing model id.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Maximum tokens in one review response.
    pub max_tokens: u32,
    /// Only review high-signal events.
    pub smart_triggers: bool,
    /// Count-based summarization of long conversations.
    pub auto_summary: bool,
    /// Tool names treated as mutating (write/edit-class).
    pub mutating_tools: Vec<String>,
}

impl Default for ReviewSettings {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5".into(),
            temperature: 0.7,
            max_tokens: 4096,
            smart_triggers: true,
            auto_summary: true,
            mutating_tools: ["Write", "Edit", "MultiEdit", "NotebookEdit"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Context compaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompactionSettings {
    /// Token-threshold compaction on/off.
    pub enabled: bool,
    /// Fraction of model capacity that triggers compaction (0.70–0.85).
    pub threshold_fraction: f64,
    /// Fraction aggressive passes compact below. Defaults to
    /// `threshold_fraction`; a lower value leaves headroom before the next
    /// trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_fraction: Option<f64>,
    /// Summarize once the turn count exceeds this.
    pub summary_trigger_turns: usize,
    /// Turns kept verbatim by count-based summarization.
    pub retained_turns: usize,
    /// Turns kept verbatim by an aggressive pass.
    pub aggressive_tail_turns: usize,
    /// Maximum aggressive passes per review.
    pub max_passes: u32,
    /// Override of the model registry's context capacity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_capacity: Option<u64>,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_fraction: 0.75,
            target_fraction: None,
            summary_trigger_turns: 15,
            retained_turns: 5,
            aggressive_tail_turns: 2,
            max_passes: 3,
            model_capacity: None,
        }
    }
}

/// Session registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Evict sessions idle for longer than this.
    pub idle_ttl_secs: u64,
    /// How often the idle sweeper runs.
    pub sweep_interval_secs: u64,
    /// Simultaneous model invocations across all sessions.
    pub max_concurrent_reviews: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 3600,
            sweep_interval_secs: 60,
            max_concurrent_reviews: 8,
        }
    }
}

/// Hook server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Grace period for background deliveries on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8081,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Model backend (any OpenAI-compatible chat completions endpoint).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    /// API base URL, without the `/chat/completions` suffix.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Inline API key; takes precedence over `api_key_env`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            api_key: None,
            request_timeout_secs: 120,
        }
    }
}
