//! Per-study keyed live state map with write-once-non-empty `live_view_url`
//! semantics, TTL expiry, and snapshot/delta support for the Progress Bus.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uxr_core::{current_unix_timestamp, is_expired_unix, EntityId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveSessionState {
    pub session_id: EntityId,
    pub persona_name: Option<String>,
    pub step_number: Option<u32>,
    pub emotional_state: Option<String>,
    pub live_view_url: Option<String>,
    pub browser_active: Option<bool>,
    pub action: Option<String>,
    pub think_aloud: Option<String>,
    pub screenshot_url: Option<String>,
    pub task_progress: Option<f64>,
}

impl LiveSessionState {
    fn new(session_id: EntityId) -> Self {
        Self { session_id, ..Default::default() }
    }

    /// Merges `update` on top of `self` per the upsert contract: `live_view_url`
    /// is write-once-non-empty, every other field is last-writer-wins over
    /// a present (non-null) value.
    fn merge(&mut self, update: LiveSessionState) {
        if let Some(url) = update.live_view_url {
            if !url.is_empty() {
                self.live_view_url = Some(url);
            }
        }
        if update.persona_name.is_some() {
            self.persona_name = update.persona_name;
        }
        if update.step_number.is_some() {
            self.step_number = update.step_number;
        }
        if update.emotional_state.is_some() {
            self.emotional_state = update.emotional_state;
        }
        if update.browser_active.is_some() {
            self.browser_active = update.browser_active;
        }
        if update.action.is_some() {
            self.action = update.action;
        }
        if update.think_aloud.is_some() {
            self.think_aloud = update.think_aloud;
        }
        if update.screenshot_url.is_some() {
            self.screenshot_url = update.screenshot_url;
        }
        if update.task_progress.is_some() {
            self.task_progress = update.task_progress;
        }
    }
}

struct StudyEntry {
    sessions: HashMap<EntityId, LiveSessionState>,
    last_touched_unix: u64,
}

const DEFAULT_TTL_SECONDS: u64 = 6 * 60 * 60;

/// Holds live state for every study currently being observed. Backed by a
/// single mutex: the data volume here is small (per-session scalars, not
/// screenshots) so lock contention is not a concern.
pub struct LiveStateStore {
    studies: Mutex<HashMap<EntityId, StudyEntry>>,
    ttl_seconds: u64,
}

impl LiveStateStore {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL_SECONDS)
    }

    pub fn with_ttl(ttl_seconds: u64) -> Self {
        Self { studies: Mutex::new(HashMap::new()), ttl_seconds }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityId, StudyEntry>> {
        self.studies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `update` (a partial `LiveSessionState` for `session_id`) to
    /// the study's keyed map, creating the session entry if absent, and
    /// returns the fully merged state.
    pub fn upsert(&self, study_id: EntityId, session_id: EntityId, update: LiveSessionState) -> LiveSessionState {
        let mut studies = self.lock();
        let entry = studies.entry(study_id).or_insert_with(|| StudyEntry {
            sessions: HashMap::new(),
            last_touched_unix: current_unix_timestamp(),
        });
        entry.last_touched_unix = current_unix_timestamp();
        let state = entry.sessions.entry(session_id).or_insert_with(|| LiveSessionState::new(session_id));
        state.merge(update);
        state.clone()
    }

    /// Returns a full snapshot of a study's per-session map, for the
    /// snapshot-on-subscribe handshake. Expired studies return an empty map.
    pub fn snapshot(&self, study_id: EntityId) -> HashMap<EntityId, LiveSessionState> {
        let mut studies = self.lock();
        self.evict_expired(&mut studies);
        studies.get(&study_id).map(|entry| entry.sessions.clone()).unwrap_or_default()
    }

    /// Deletes the entire keyed map for a study, invoked at the start of
    /// every new run so reruns do not leak prior state.
    pub fn clear_study(&self, study_id: EntityId) {
        self.lock().remove(&study_id);
    }

    fn evict_expired(&self, studies: &mut HashMap<EntityId, StudyEntry>) {
        let now = current_unix_timestamp();
        studies.retain(|_, entry| !is_expired_unix(Some(entry.last_touched_unix + self.ttl_seconds), now));
    }

    pub fn evict_now(&self) {
        let mut studies = self.lock();
        self.evict_expired(&mut studies);
    }
}

impl Default for LiveStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_update(url: &str) -> LiveSessionState {
        LiveSessionState { live_view_url: Some(url.to_string()), ..Default::default() }
    }

    #[test]
    fn unit_upsert_creates_and_merges_session_state() {
        let store = LiveStateStore::new();
        let study_id = EntityId::new();
        let session_id = EntityId::new();
        let merged = store.upsert(
            study_id,
            session_id,
            LiveSessionState { step_number: Some(1), ..Default::default() },
        );
        assert_eq!(merged.step_number, Some(1));
    }

    #[test]
    fn regression_live_view_url_is_write_once_non_empty() {
        let store = LiveStateStore::new();
        let study_id = EntityId::new();
        let session_id = EntityId::new();
        store.upsert(study_id, session_id, url_update("https://live.example.com/1"));
        let merged = store.upsert(
            study_id,
            session_id,
            LiveSessionState { live_view_url: Some(String::new()), step_number: Some(2), ..Default::default() },
        );
        assert_eq!(merged.live_view_url.as_deref(), Some("https://live.example.com/1"));
        assert_eq!(merged.step_number, Some(2));
    }

    #[test]
    fn functional_later_non_empty_url_overwrites_earlier_one() {
        let store = LiveStateStore::new();
        let study_id = EntityId::new();
        let session_id = EntityId::new();
        store.upsert(study_id, session_id, url_update("https://live.example.com/1"));
        let merged = store.upsert(study_id, session_id, url_update("https://live.example.com/2"));
        assert_eq!(merged.live_view_url.as_deref(), Some("https://live.example.com/2"));
    }

    #[test]
    fn integration_snapshot_reflects_all_sessions_in_a_study() {
        let store = LiveStateStore::new();
        let study_id = EntityId::new();
        let (session_a, session_b) = (EntityId::new(), EntityId::new());
        store.upsert(study_id, session_a, LiveSessionState::default());
        store.upsert(study_id, session_b, LiveSessionState::default());
        assert_eq!(store.snapshot(study_id).len(), 2);
    }

    #[test]
    fn unit_clear_study_removes_the_entire_keyed_map() {
        let store = LiveStateStore::new();
        let study_id = EntityId::new();
        store.upsert(study_id, EntityId::new(), LiveSessionState::default());
        store.clear_study(study_id);
        assert!(store.snapshot(study_id).is_empty());
    }

    #[test]
    fn regression_expired_study_snapshot_is_empty() {
        let store = LiveStateStore::with_ttl(0);
        let study_id = EntityId::new();
        store.upsert(study_id, EntityId::new(), LiveSessionState::default());
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(store.snapshot(study_id).is_empty());
    }
}
