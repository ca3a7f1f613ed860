//! The Study Orchestrator (§4.1): the top-level run loop gluing the browser
//! pool, Navigator, Analyzer/Prioritizer/Synthesizer, and durable store
//! together into one study run, plus the `DriverFactory` seam that lets the
//! host binary supply a real browser backend.

pub mod driver_factory;
pub mod study_orchestrator;

pub use driver_factory::DriverFactory;
pub use study_orchestrator::Orchestrator;
