//! The Browser Pool: pooled, fenced browser contexts with local<->cloud
//! failover, plus the passive page-state detectors (cookie consent, auth
//! wall, CAPTCHA) the Navigator consults on every step.

pub mod detectors;
pub mod driver;
pub mod pool;

pub use detectors::{detect_auth_wall, detect_blockers, detect_captcha, dismiss_cookie_consent, Blocker};
pub use driver::{BrowserActionError, BrowserActionKind, BrowserActionRequest, BrowserDriver, PageObservation};
pub use pool::{BrowserPool, BrowserPoolError, BrowserProvider, Lease, PoolStats};
