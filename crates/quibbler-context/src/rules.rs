//! Project rule cache.
//!
//! Rules live in `<project>/.quibbler/rules.md` and are shared by every
//! session rooted in that project. Each cached entry records the global
//! generation it was loaded under; sessions compare generations to notice a
//! reload without touching the filesystem. Reads go through `tokio::fs` so a
//! first load never blocks a runtime worker.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use quibbler_core::paths;
use tracing::{debug, warn};

/// Rule text as loaded for one project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedRules {
    /// File contents; empty when the file is missing or unreadable.
    pub text: Arc<str>,
    /// Cache generation at load time.
    pub generation: u64,
}

impl CachedRules {
    /// True when no rules apply.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Process-wide cache of project rule files.
#[derive(Debug, Default)]
pub struct RuleCache {
    entries: DashMap<PathBuf, CachedRules>,
    generation: AtomicU64,
}

impl RuleCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached rules for `project_root`, loading them on first use.
    ///
    /// Concurrent first loads for one project may both read the file; the
    /// first insert wins.
    pub async fn get_or_load(&self, project_root: &Path) -> CachedRules {
        if let Some(entry) = self.entries.get(project_root) {
            return entry.clone();
        }
        let generation = self.generation();
        let loaded = CachedRules {
            text: load_rules(project_root).await,
            generation,
        };
        self.entries
            .entry(project_root.to_path_buf())
            .or_insert(loaded)
            .clone()
    }

    /// Drop the entry for `project_root` so the next lookup re-reads the
    /// file. Returns the new generation.
    pub fn invalidate(&self, project_root: &Path) -> u64 {
        let _ = self.entries.remove(project_root);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(project = %project_root.display(), generation, "rules invalidated");
        generation
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of cached projects.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn load_rules(project_root: &Path) -> Arc<str> {
    let path = paths::rules_path(project_root);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            debug!(path = %path.display(), bytes = text.len(), "loaded project rules");
            Arc::from(text)
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Arc::from(""),
        Err(error) => {
            warn!(path = %path.display(), %error, "failed to read project rules");
            Arc::from("")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project_with_rules(text: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        let rules = paths::rules_path(dir.path());
        std::fs::create_dir_all(rules.parent().unwrap()).unwrap();
        std::fs::write(rules, text).unwrap();
        dir
    }

    #[tokio::test]
    async fn missing_file_yields_empty_rules() {
        let dir = TempDir::new().unwrap();
        let cache = RuleCache::new();
        let rules = cache.get_or_load(dir.path()).await;
        assert!(rules.is_empty());
        assert_eq!(rules.generation, 0);
    }

    #[tokio::test]
    async fn loads_once_then_serves_from_cache() {
        let dir = project_with_rules("### Rule: no mocks");
        let cache = RuleCache::new();
        assert_eq!(&*cache.get_or_load(dir.path()).await.text, "### Rule: no mocks");

        std::fs::write(paths::rules_path(dir.path()), "changed").unwrap();
        assert_eq!(&*cache.get_or_load(dir.path()).await.text, "### Rule: no mocks");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn invalidate_rereads_with_new_generation() {
        let dir = project_with_rules("v1");
        let cache = RuleCache::new();
        let first = cache.get_or_load(dir.path()).await;

        std::fs::write(paths::rules_path(dir.path()), "v2").unwrap();
        assert_eq!(cache.invalidate(dir.path()), 1);

        let second = cache.get_or_load(dir.path()).await;
        assert_eq!(&*second.text, "v2");
        assert_ne!(first.generation, second.generation);
    }

    #[tokio::test]
    async fn other_projects_keep_their_entry() {
        let a = project_with_rules("a rules");
        let b = project_with_rules("b rules");
        let cache = RuleCache::new();
        let b_before = cache.get_or_load(b.path()).await;
        let _ = cache.invalidate(a.path());
        assert_eq!(cache.get_or_load(b.path()).await, b_before);
    }

    #[tokio::test]
    async fn unreadable_rules_degrade_to_empty() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be.
        std::fs::create_dir_all(paths::rules_path(dir.path())).unwrap();
        let cache = RuleCache::new();
        assert!(cache.get_or_load(dir.path()).await.is_empty());
    }
}
