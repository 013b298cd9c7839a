//! Session lifecycle and request-proxy engine.
//!
//! A session is a logical browser-automation run bound to a single
//! provisioned endpoint (VM or container) for its duration. The crate owns
//! the state machine governing a session from creation to termination, the
//! retrying endpoint-acquisition protocol, the cancellable proxy that
//! forwards commands to the bound endpoint, the stream watcher that aborts
//! long-running operations when the session turns adverse, and the reaper
//! that enforces inactivity limits. Provisioning drivers, session storage
//! and audit sinks are injected capabilities.

pub mod acquisition;
pub mod audit;
pub mod capabilities;
pub mod driver;
pub mod error;
pub mod proxy;
pub mod reaper;
pub mod service;
pub mod session;
pub mod store;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testkit;

pub use error::Error;
pub use session::{Session, SessionInfo, SessionRecord, Status};
