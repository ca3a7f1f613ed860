//! Step Recorder (§4.3): persists a step and publishes a matching live
//! event in the same logical operation. Insertion always commits before the
//! publish, so a subscriber reconnecting mid-session never observes a step
//! the store does not yet have — it recovers the gap via the next snapshot.

use anyhow::Result;
use uxr_core::{screenshot_blob_path, BlobStore, EntityId};
use uxr_live::{LiveSessionState, LiveStateStore, ProgressBus, ProgressEvent};
use uxr_store::{ActionType, SqliteStore, Step};

fn action_type_str(action_type: ActionType) -> &'static str {
    match action_type {
        ActionType::Click => "click",
        ActionType::Fill => "fill",
        ActionType::Select => "select",
        ActionType::Scroll => "scroll",
        ActionType::Wait => "wait",
        ActionType::Goto => "goto",
        ActionType::Back => "back",
        ActionType::Submit => "submit",
        ActionType::GiveUp => "give_up",
        ActionType::Done => "done",
    }
}

pub struct StepRecorder<'a> {
    store: &'a SqliteStore,
    blob_store: &'a dyn BlobStore,
    live_state: &'a LiveStateStore,
    progress_bus: &'a ProgressBus,
}

impl<'a> StepRecorder<'a> {
    pub fn new(
        store: &'a SqliteStore,
        blob_store: &'a dyn BlobStore,
        live_state: &'a LiveStateStore,
        progress_bus: &'a ProgressBus,
    ) -> Self {
        Self { store, blob_store, live_state, progress_bus }
    }

    /// Persists `step`, writing `screenshot` to blob storage first (when
    /// present) so `step.screenshot_ref` is resolved before the row commits.
    pub fn record(&self, study_id: EntityId, screenshot: Option<&[u8]>, mut step: Step) -> Result<EntityId> {
        if let Some(bytes) = screenshot {
            let path = screenshot_blob_path(&study_id.to_string(), &step.session_id.to_string(), step.step_number);
            self.blob_store.put(&path, bytes)?;
            step.screenshot_ref = Some(path);
        }

        self.store.insert_step(&step)?;

        let live_update = LiveSessionState {
            session_id: step.session_id,
            step_number: Some(step.step_number),
            emotional_state: Some(step.emotional_state.as_str().to_string()),
            action: Some(action_type_str(step.action.action_type).to_string()),
            think_aloud: step.think_aloud.clone(),
            screenshot_url: step.screenshot_ref.clone(),
            task_progress: Some(step.task_progress as f64),
            ..Default::default()
        };
        self.live_state.upsert(study_id, step.session_id, live_update);

        self.progress_bus.publish(
            study_id,
            ProgressEvent::SessionStep { session_id: step.session_id, step_number: step.step_number },
        );

        Ok(step.id)
    }
}
