//! Duplicate detection for incoming reports.
//!
//! A report is a duplicate of an open incident when it was made within a
//! few metres of it. Text overlap only ranks the candidates: containment of
//! one description in the other scores 1, anything else 0; ties go to the
//! most recently created incident.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::incident::{GeoPoint, Incident, Status};
use crate::store::IncidentStore;

pub struct DuplicateMatcher {
    store: Arc<IncidentStore>,
    radius_m: f64,
}

/// Binary overlap score between two lowercased descriptions.
fn similarity(new_lower: &str, existing_lower: &str) -> u8 {
    if new_lower.contains(existing_lower) || existing_lower.contains(new_lower) {
        1
    } else {
        0
    }
}

impl DuplicateMatcher {
    pub fn new(store: Arc<IncidentStore>, radius_m: f64) -> Self {
        Self { store, radius_m }
    }

    /// Best non-terminal incident near `location`, if any. Reports without a
    /// location never match.
    pub fn find_match(&self, location: GeoPoint, description: &str) -> Result<Option<Incident>> {
        if location.is_unknown() {
            debug!("Dedup: report has no location – skipping match");
            return Ok(None);
        }

        let candidates = self
            .store
            .find_within(location, self.radius_m, &Status::ACTIVE)?;
        if candidates.is_empty() {
            debug!("Dedup: no open incident within {}m", self.radius_m);
            return Ok(None);
        }

        let new_lower = description.to_lowercase();
        let best = candidates
            .into_iter()
            .map(|(incident, dist)| {
                let score = similarity(&new_lower, &incident.description.to_lowercase());
                (score, incident, dist)
            })
            .max_by(|a, b| a.0.cmp(&b.0).then(a.1.created_at.cmp(&b.1.created_at)));

        Ok(best.map(|(score, incident, dist)| {
            debug!(
                "Dedup: matched incident {} at {dist:.1}m (similarity={score})",
                incident.id
            );
            incident
        }))
    }
}
