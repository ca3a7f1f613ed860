//! Per-study fan-out event bus (`study:{study_id}`) plus a capped binary
//! screencast side-channel (`screencast:{session_id}`).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uxr_core::EntityId;

use crate::state::LiveSessionState;

const CHANNEL_CAPACITY: usize = 256;
const MAX_SCREENCAST_SESSIONS_PER_CLIENT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    Snapshot { sessions: HashMap<EntityId, LiveSessionState> },
    StudyProgress { percent: f64 },
    StudyAnalyzing,
    StudyComplete,
    StudyError { message: String },
    SessionStep { session_id: EntityId, step_number: u32 },
    SessionComplete { session_id: EntityId, outcome: String },
}

/// Single fan-out broadcast channel per study. Subscribers that lag behind
/// `CHANNEL_CAPACITY` events miss intermediate frames but recover on their
/// next subscribe via the snapshot frame, so lag is survivable, not fatal.
pub struct ProgressBus {
    channels: Mutex<HashMap<EntityId, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self { channels: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityId, broadcast::Sender<ProgressEvent>>> {
        self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sender_for(&self, study_id: EntityId) -> broadcast::Sender<ProgressEvent> {
        let mut channels = self.lock();
        channels
            .entry(study_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publishes `event` on the study's channel. A `SendError` simply means
    /// there are currently no subscribers; that is not an error condition.
    pub fn publish(&self, study_id: EntityId, event: ProgressEvent) {
        let sender = self.sender_for(study_id);
        let _ = sender.send(event);
    }

    /// Subscribes to a study's channel, immediately sending a `Snapshot`
    /// frame built from `current_snapshot` ahead of any live events.
    pub fn subscribe(
        &self,
        study_id: EntityId,
        current_snapshot: HashMap<EntityId, LiveSessionState>,
    ) -> (ProgressEvent, broadcast::Receiver<ProgressEvent>) {
        let receiver = self.sender_for(study_id).subscribe();
        (ProgressEvent::Snapshot { sessions: current_snapshot }, receiver)
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ScreencastFrame {
    pub session_id: EntityId,
    pub jpeg_bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ScreencastSubscribeError {
    #[error("screencast subscription cap ({MAX_SCREENCAST_SESSIONS_PER_CLIENT}) exceeded for this client")]
    TooManySessions,
}

/// A client's bounded set of screencast subscriptions, capped at
/// `MAX_SCREENCAST_SESSIONS_PER_CLIENT` to bound server memory.
pub struct ScreencastChannels {
    senders: Mutex<HashMap<EntityId, broadcast::Sender<ScreencastFrame>>>,
}

impl ScreencastChannels {
    pub fn new() -> Self {
        Self { senders: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityId, broadcast::Sender<ScreencastFrame>>> {
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn publish_frame(&self, session_id: EntityId, jpeg_bytes: Vec<u8>) {
        let mut senders = self.lock();
        let sender = senders.entry(session_id).or_insert_with(|| broadcast::channel(16).0);
        let _ = sender.send(ScreencastFrame { session_id, jpeg_bytes });
    }

    /// Subscribes to `session_id`'s frames, enforcing the per-client cap via
    /// `active_subscriptions` (the count the caller is already holding).
    pub fn subscribe(
        &self,
        session_id: EntityId,
        active_subscriptions: usize,
    ) -> Result<broadcast::Receiver<ScreencastFrame>, ScreencastSubscribeError> {
        if active_subscriptions >= MAX_SCREENCAST_SESSIONS_PER_CLIENT {
            return Err(ScreencastSubscribeError::TooManySessions);
        }
        let mut senders = self.lock();
        let sender = senders.entry(session_id).or_insert_with(|| broadcast::channel(16).0);
        Ok(sender.subscribe())
    }
}

impl Default for ScreencastChannels {
    fn default() -> Self {
        Self::new()
    }
}
