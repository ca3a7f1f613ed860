//! The Live State Store and Progress Bus (§4.5): a self-healing live view
//! that subscribers can reconnect to at any time and receive a full
//! snapshot followed by subsequent deltas.

pub mod bus;
pub mod state;

pub use bus::{ProgressBus, ProgressEvent, ScreencastChannels, ScreencastFrame, ScreencastSubscribeError};
pub use state::{LiveSessionState, LiveStateStore};
