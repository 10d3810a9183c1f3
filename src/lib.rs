//! pinvault: redundant IPFS pinning with gateway verification and restore
//!
//! Content is uploaded to a primary pinning service and replicated to
//! independent backup providers. Resulting CIDs are checked for
//! availability and integrity on public gateways, and content can be
//! restored from whichever gateway still serves it.

pub mod backoff;
pub mod backup;
pub mod config;
pub mod error;
pub mod item;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod orchestrator;
pub mod primary;
pub mod telemetry;
pub mod verify;
pub mod window;

pub use error::{Error, Result};
