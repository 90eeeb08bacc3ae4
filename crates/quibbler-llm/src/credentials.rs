//! API key resolution.
//!
//! Order: inline `provider.apiKey`, then the environment variable named by
//! `provider.apiKeyEnv`. No login or token refresh happens here.

use std::time::Duration;

use quibbler_settings::QuibblerSettings;
use quibbler_settings::types::ProviderSettings;
use tracing::debug;

use crate::chat::ChatClientConfig;
use crate::provider::{ProviderError, ProviderResult};

/// Resolve the API key from settings and the process environment.
pub fn resolve_api_key(settings: &ProviderSettings) -> ProviderResult<String> {
    resolve_api_key_with(settings, |name| std::env::var(name).ok())
}

/// Resolve the API key with an explicit environment lookup.
pub fn resolve_api_key_with<F>(settings: &ProviderSettings, lookup: F) -> ProviderResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = settings.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
        debug!("using inline provider.apiKey");
        return Ok(key.to_owned());
    }
    let var = settings.api_key_env.as_str();
    if !var.is_empty() {
        if let Some(key) = lookup(var).map(|k| k.trim().to_owned()).filter(|k| !k.is_empty()) {
            debug!(env = var, "using API key from environment");
            return Ok(key);
        }
    }
    Err(ProviderError::Auth {
        message: format!(
            "no API key configured: set provider.apiKey in settings.json or export {var}"
        ),
    })
}

/// Build a [`ChatClientConfig`] for the reviewing model.
pub fn client_config(settings: &QuibblerSettings) -> ProviderResult<ChatClientConfig> {
    Ok(ChatClientConfig {
        base_url: settings.provider.base_url.clone(),
        api_key: resolve_api_key(&settings.provider)?,
        model: settings.review.model.clone(),
        temperature: settings.review.temperature,
        max_tokens: settings.review.max_tokens,
        timeout: Duration::from_secs(settings.provider.request_timeout_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn provider(api_key: Option<&str>) -> ProviderSettings {
        ProviderSettings {
            api_key: api_key.map(String::from),
            api_key_env: "TEST_QUIBBLER_KEY".into(),
            ..ProviderSettings::default()
        }
    }

    #[test]
    fn inline_key_wins() {
        let key = resolve_api_key_with(&provider(Some("sk-inline")), |_| Some("sk-env".into()));
        assert_eq!(key.unwrap(), "sk-inline");
    }

    #[test]
    fn env_key_used_when_no_inline() {
        let key = resolve_api_key_with(&provider(None), |name| {
            (name == "TEST_QUIBBLER_KEY").then(|| " sk-env \n".to_string())
        });
        assert_eq!(key.unwrap(), "sk-env");
    }

    #[test]
    fn blank_values_are_missing() {
        let err = resolve_api_key_with(&provider(Some("  ")), |_| Some(String::new())).unwrap_err();
        assert_matches!(err, ProviderError::Auth { ref message } if message.contains("TEST_QUIBBLER_KEY"));
    }
}
