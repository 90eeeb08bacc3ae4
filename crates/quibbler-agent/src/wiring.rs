//! Engine construction from loaded settings.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use quibbler_context::{CompactionConfig, ModelSummarizer};
use quibbler_llm::credentials::client_config;
use quibbler_llm::{ChatClient, ChatReviewer, TextModel};
use quibbler_runtime::{ReviewEngine, SystemPrompts};
use quibbler_settings::QuibblerSettings;
use tracing::info;

/// Build the review engine: one chat client shared by the reviewer and the
/// summarizer, prompts from `quibbler_home`.
pub fn build_engine(settings: &QuibblerSettings, quibbler_home: &Path) -> Result<Arc<ReviewEngine>> {
    let config = client_config(settings).context("No API key for the review model")?;
    let client: Arc<dyn TextModel> =
        Arc::new(ChatClient::new(config).context("Failed to build model client")?);
    let reviewer = Arc::new(ChatReviewer::new(Arc::clone(&client)));
    let summarizer = Arc::new(ModelSummarizer::new(client));
    let prompts = SystemPrompts::load(quibbler_home);

    let compaction = CompactionConfig::from_settings(settings);
    info!(
        model = %settings.review.model,
        capacity = compaction.model_capacity,
        trigger_tokens = compaction.trigger_tokens(),
        smart_triggers = settings.review.smart_triggers,
        "review engine ready"
    );
    Ok(Arc::new(ReviewEngine::new(settings, reviewer, summarizer, prompts)))
}
