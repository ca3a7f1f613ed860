//! The Navigator (§4.2) and Step Recorder (§4.3): the decide→act→observe
//! session loop and its durable, live-published record of each step.

pub mod decision;
pub mod emotional_arc;
pub mod navigator;
pub mod step_recorder;
pub mod visual_diff;

pub use decision::{DecisionAction, NavigatorDecision};
pub use emotional_arc::peak_frustration_page;
pub use navigator::{navigate_session, NavigationResult, NavigatorConfig};
pub use step_recorder::StepRecorder;
pub use visual_diff::{l1_pixel_diff, StuckGuard};
