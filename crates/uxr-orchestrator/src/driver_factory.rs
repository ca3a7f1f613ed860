//! Bridges a pooled `Lease` to the Navigator's `BrowserDriver` contract. The
//! pool deals in acquisition and failover only; it has no notion of how to
//! actually drive a page, so the host binary supplies a factory that knows
//! how to stand up a real (or fake, in tests) driver for a given lease.

use anyhow::Result;
use uxr_browser::{BrowserDriver, Lease};

#[async_trait::async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create_driver(&self, lease: &Lease) -> Result<Box<dyn BrowserDriver>>;
}
