//! Session registry.
//!
//! An arena of per-key sessions in a sharded [`DashMap`]. Each
//! [`SessionSlot`] owns the FIFO critical section for its key (a
//! `tokio::sync::Mutex`, held across the model call) plus a cheap stats
//! snapshot that introspection reads without waiting on that lock.
//!
//! Idle slots are evicted by [`SessionRegistry::evict_idle`], which never
//! removes a slot that an in-flight event still references. Eviction drops
//! turns and summary only: rules live in the shared [`RuleCache`], and a
//! stopped key stays stopped if it returns within one more idle TTL.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::Mutex as SyncMutex;
use quibbler_context::{CachedRules, ConversationStore, RuleCache};
use quibbler_settings::SessionSettings;
use tokio::sync::{Mutex, MutexGuard, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::SESSIONS_EVICTED_TOTAL;

// =============================================================================
// Session
// =============================================================================

/// Mutable state for one context key. Only reachable through the slot lock.
#[derive(Debug)]
pub struct Session {
    key: String,
    project_root: PathBuf,
    created_at: DateTime<Utc>,
    pub(crate) store: ConversationStore,
    rules: CachedRules,
    pub(crate) review_count: u64,
    pub(crate) stopped: bool,
}

impl Session {
    fn new(key: &str, project_root: &Path, stopped: bool) -> Self {
        Self {
            key: key.to_owned(),
            project_root: project_root.to_path_buf(),
            created_at: Utc::now(),
            store: ConversationStore::new(),
            rules: CachedRules {
                text: Arc::from(""),
                generation: 0,
            },
            review_count: 0,
            stopped,
        }
    }

    /// Context key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Project root of the most recent event.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// When this session record was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Conversation state.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Rules in effect.
    pub fn rules(&self) -> &CachedRules {
        &self.rules
    }

    /// Reviews completed for this key.
    pub fn review_count(&self) -> u64 {
        self.review_count
    }

    /// True after a stop until the next prompt or session start.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Track the event's project root and pick up the cached rules for it.
    pub(crate) async fn refresh(&mut self, project_root: &Path, cache: &RuleCache) {
        if self.project_root != project_root {
            self.project_root = project_root.to_path_buf();
        }
        let current = cache.get_or_load(&self.project_root).await;
        if current != self.rules {
            debug!(
                context_key = %self.key,
                generation = current.generation,
                "rules loaded"
            );
            self.rules = current;
        }
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            turn_count: self.store.turn_count(),
            has_summary: self.store.summary().is_some(),
            review_count: self.review_count,
            estimated_tokens: self.store.estimated_size(),
            stopped: self.stopped,
            rules_generation: self.rules.generation,
            created_at: self.created_at,
        }
    }
}

/// Introspection view of one session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Retained turns.
    pub turn_count: usize,
    /// Whether older turns have been folded into a summary.
    pub has_summary: bool,
    /// Reviews completed.
    pub review_count: u64,
    /// Estimated tokens of summary plus turns.
    pub estimated_tokens: u64,
    /// Stopped flag.
    pub stopped: bool,
    /// Rule cache generation the session last loaded.
    pub rules_generation: u64,
    /// Creation time of the session record.
    pub created_at: DateTime<Utc>,
}

/// Stats paired with their key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Context key.
    pub context_key: String,
    /// Stats at snapshot time.
    pub stats: SessionStats,
}

// =============================================================================
// SessionSlot
// =============================================================================

/// Registry entry for one key.
pub struct SessionSlot {
    session: Mutex<Session>,
    stats: SyncMutex<SessionStats>,
    last_active: SyncMutex<Instant>,
    queue_tail: SyncMutex<Option<oneshot::Receiver<()>>>,
}

impl SessionSlot {
    fn new(key: &str, project_root: &Path, stopped: bool) -> Self {
        let session = Session::new(key, project_root, stopped);
        Self {
            stats: SyncMutex::new(session.stats()),
            session: Mutex::new(session),
            last_active: SyncMutex::new(Instant::now()),
            queue_tail: SyncMutex::new(None),
        }
    }

    /// Enter the per-key critical section. Waiters are served in FIFO order.
    pub async fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// Reserve the next position in this key's arrival order.
    ///
    /// Callers that spawn work per event take a position synchronously and
    /// await [`QueuePosition::ready`] in the spawned task, so tasks for one
    /// key run in submission order regardless of scheduling.
    pub fn enqueue(&self) -> QueuePosition {
        let (done, next) = oneshot::channel();
        let previous = self.queue_tail.lock().replace(next);
        QueuePosition {
            previous,
            _done: done,
        }
    }

    /// Latest published stats.
    pub fn stats(&self) -> SessionStats {
        self.stats.lock().clone()
    }

    pub(crate) fn publish(&self, session: &Session) {
        *self.stats.lock() = session.stats();
    }

    pub(crate) fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_active.lock())
    }
}

impl std::fmt::Debug for SessionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSlot")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// A reserved place in a slot's arrival order. Dropping it releases the
/// next position.
#[derive(Debug)]
pub struct QueuePosition {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl QueuePosition {
    /// Wait until every earlier position for the same key has been released.
    pub async fn ready(&mut self) {
        if let Some(previous) = self.previous.take() {
            // Resolves with an error once the earlier sender is dropped.
            let _ = previous.await;
        }
    }
}

// =============================================================================
// SessionRegistry
// =============================================================================

/// All live sessions, keyed by context key.
#[derive(Debug)]
pub struct SessionRegistry {
    slots: DashMap<String, Arc<SessionSlot>>,
    /// Stopped keys evicted within the last idle TTL, with eviction time.
    stopped_evicted: DashMap<String, Instant>,
    idle_ttl: Duration,
}

impl SessionRegistry {
    /// Create a registry that evicts sessions idle longer than `idle_ttl`.
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            stopped_evicted: DashMap::new(),
            idle_ttl,
        }
    }

    /// Registry configured from session settings.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self::new(Duration::from_secs(settings.idle_ttl_secs))
    }

    /// Slot for `key`, created on first use.
    pub fn get_or_create(&self, key: &str, project_root: &Path) -> Arc<SessionSlot> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        self.slots
            .entry(key.to_owned())
            .or_insert_with(|| {
                let stopped = self.stopped_evicted.remove(key).is_some();
                debug!(
                    context_key = key,
                    project = %project_root.display(),
                    stopped,
                    "session created"
                );
                Arc::new(SessionSlot::new(key, project_root, stopped))
            })
            .clone()
    }

    /// Slot for `key`, if live.
    pub fn get(&self, key: &str) -> Option<Arc<SessionSlot>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    /// Stats for `key`, if live.
    pub fn stats(&self, key: &str) -> Option<SessionStats> {
        self.slots.get(key).map(|slot| slot.stats())
    }

    /// Stats for every live session, ordered by key.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .slots
            .iter()
            .map(|entry| SessionSnapshot {
                context_key: entry.key().clone(),
                stats: entry.value().stats(),
            })
            .collect();
        sessions.sort_by(|a, b| a.context_key.cmp(&b.context_key));
        sessions
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when no session is live.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Configured idle TTL.
    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    /// Drop sessions idle for at least `ttl`. Slots still held by an
    /// in-flight event are kept. Returns the number evicted.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        self.stopped_evicted
            .retain(|_, evicted_at| now.saturating_duration_since(*evicted_at) < ttl);
        let before = self.slots.len();
        self.slots.retain(|key, slot| {
            let evict = slot.idle_for(now) >= ttl && Arc::strong_count(slot) == 1;
            if evict {
                debug!(context_key = %key, "evicting idle session");
                if slot.stats().stopped {
                    let _ = self.stopped_evicted.insert(key.clone(), now);
                }
            }
            !evict
        });
        let evicted = before.saturating_sub(self.slots.len());
        if evicted > 0 {
            counter!(SESSIONS_EVICTED_TOTAL).increment(evicted as u64);
            info!(evicted, remaining = self.slots.len(), "idle sessions evicted");
        }
        evicted
    }

    /// Run [`Self::evict_idle`] every `interval` until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = registry.evict_idle(registry.idle_ttl);
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    fn registry() -> SessionRegistry {
        SessionRegistry::new(TTL)
    }

    // -- get_or_create --

    #[tokio::test]
    async fn same_key_same_slot() {
        let reg = registry();
        let a = reg.get_or_create("k", Path::new("/p"));
        let b = reg.get_or_create("k", Path::new("/p"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.len(), 1);
        assert_eq!(a.lock().await.key(), "k");
    }

    #[tokio::test]
    async fn stats_published_after_mutation() {
        let reg = registry();
        let slot = reg.get_or_create("k", Path::new("/p"));
        {
            let mut session = slot.lock().await;
            session.store.append(quibbler_core::Turn::user("hello"));
            session.review_count = 2;
            slot.publish(&session);
        }
        let stats = reg.stats("k").unwrap();
        assert_eq!(stats.turn_count, 1);
        assert_eq!(stats.review_count, 2);
        assert!(!stats.has_summary);
    }

    #[test]
    fn snapshot_sorted_by_key() {
        let reg = registry();
        let _ = reg.get_or_create("b", Path::new("/p"));
        let _ = reg.get_or_create("a", Path::new("/p"));
        let keys: Vec<String> = reg.snapshot().into_iter().map(|s| s.context_key).collect();
        assert_eq!(keys, ["a", "b"]);
    }

    // -- eviction --

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_evicted() {
        let reg = registry();
        drop(reg.get_or_create("old", Path::new("/p")));
        tokio::time::advance(TTL + Duration::from_secs(1)).await;
        drop(reg.get_or_create("fresh", Path::new("/p")));

        assert_eq!(reg.evict_idle(TTL), 1);
        assert!(reg.get("old").is_none());
        assert!(reg.get("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn referenced_slot_survives_eviction() {
        let reg = registry();
        let held = reg.get_or_create("busy", Path::new("/p"));
        tokio::time::advance(TTL * 2).await;

        assert_eq!(reg.evict_idle(TTL), 0);
        drop(held);
        assert_eq!(reg.evict_idle(TTL), 1);
    }

    async fn stop(reg: &SessionRegistry, key: &str) {
        let slot = reg.get_or_create(key, Path::new("/p"));
        let mut session = slot.lock().await;
        session.stopped = true;
        slot.publish(&session);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_session_stays_stopped_after_eviction() {
        let reg = registry();
        stop(&reg, "k").await;
        tokio::time::advance(TTL).await;
        assert_eq!(reg.evict_idle(TTL), 1);

        let slot = reg.get_or_create("k", Path::new("/p"));
        assert!(slot.lock().await.is_stopped());
        assert!(reg.stats("k").unwrap().stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_marker_expires_after_another_ttl() {
        let reg = registry();
        stop(&reg, "k").await;
        tokio::time::advance(TTL).await;
        assert_eq!(reg.evict_idle(TTL), 1);

        tokio::time::advance(TTL).await;
        let _ = reg.evict_idle(TTL);
        let slot = reg.get_or_create("k", Path::new("/p"));
        assert!(!slot.lock().await.is_stopped());
    }

    #[tokio::test]
    async fn created_at_is_recorded_and_published() {
        let before = chrono::Utc::now();
        let reg = registry();
        let slot = reg.get_or_create("k", Path::new("/p"));
        let created = slot.lock().await.created_at();
        assert!(created >= before);
        assert_eq!(reg.stats("k").unwrap().created_at, created);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_idle_clock() {
        let reg = registry();
        let slot = reg.get_or_create("k", Path::new("/p"));
        tokio::time::advance(TTL).await;
        slot.touch();
        drop(slot);
        assert_eq!(reg.evict_idle(TTL), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_and_stops_on_cancel() {
        let reg = Arc::new(registry());
        drop(reg.get_or_create("k", Path::new("/p")));
        let cancel = CancellationToken::new();
        let handle = reg.spawn_sweeper(Duration::from_secs(10), cancel.clone());

        tokio::time::sleep(TTL + Duration::from_secs(15)).await;
        assert!(reg.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }

    // -- arrival order --

    #[tokio::test]
    async fn queue_positions_release_in_order() {
        let reg = registry();
        let slot = reg.get_or_create("k", Path::new("/p"));
        let order = Arc::new(SyncMutex::new(Vec::new()));

        let mut first = slot.enqueue();
        let mut second = slot.enqueue();

        let order2 = Arc::clone(&order);
        let late = tokio::spawn(async move {
            second.ready().await;
            order2.lock().push(2);
        });
        tokio::task::yield_now().await;

        first.ready().await;
        order.lock().push(1);
        drop(first);

        late.await.unwrap();
        assert_eq!(*order.lock(), [1, 2]);
    }

    // -- rules --

    #[tokio::test]
    async fn refresh_picks_up_invalidated_rules() {
        let dir = tempfile::TempDir::new().unwrap();
        let rules_path = quibbler_core::paths::rules_path(dir.path());
        std::fs::create_dir_all(rules_path.parent().unwrap()).unwrap();
        std::fs::write(&rules_path, "v1").unwrap();

        let cache = RuleCache::new();
        let reg = registry();
        let slot = reg.get_or_create("k", dir.path());
        let mut session = slot.lock().await;

        session.refresh(dir.path(), &cache).await;
        assert_eq!(&*session.rules().text, "v1");

        std::fs::write(&rules_path, "v2").unwrap();
        session.refresh(dir.path(), &cache).await;
        assert_eq!(&*session.rules().text, "v1");

        let _ = cache.invalidate(dir.path());
        session.refresh(dir.path(), &cache).await;
        assert_eq!(&*session.rules().text, "v2");
        assert_eq!(session.rules().generation, 1);
    }
}
