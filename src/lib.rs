//! Incident core for sewage and water-leak reports: triage, duplicate
//! merging, guardian assignment and reporter notifications.
pub mod assign;
pub mod config;
pub mod error;
pub mod incident;
pub mod intake;
pub mod matcher;
pub mod notify;
pub mod responders;
pub mod store;

#[cfg(test)]
mod testkit;

pub use error::{IncidentError, Result};
pub use intake::{Engine, IngestOutcome};
