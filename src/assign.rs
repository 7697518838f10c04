//! Nearest-guardian assignment.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::incident::Role;
use crate::notify::Dispatcher;
use crate::responders::{Responder, ResponderDirectory};
use crate::store::IncidentStore;

pub struct AssignmentEngine {
    store: Arc<IncidentStore>,
    directory: Arc<dyn ResponderDirectory>,
    dispatcher: Arc<Dispatcher>,
    radius_m: f64,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<IncidentStore>,
        directory: Arc<dyn ResponderDirectory>,
        dispatcher: Arc<Dispatcher>,
        radius_m: f64,
    ) -> Self {
        Self {
            store,
            directory,
            dispatcher,
            radius_m,
        }
    }

    /// Assign the nearest guardian within range and notify them.
    ///
    /// Returns the nearest guardian, or `None` when the incident is unknown,
    /// has no location, or nobody is in range. A failing directory query
    /// counts as nobody in range. Re-running on an unchanged incident is a
    /// no-op that sends nothing.
    pub async fn assign(&self, incident_id: Uuid) -> Result<Option<Responder>> {
        let Some(incident) = self.store.get(incident_id)? else {
            info!("Incident not found for assignment: {incident_id}");
            return Ok(None);
        };
        if incident.location.is_unknown() {
            info!("Incident {incident_id} location not set, cannot assign guardian");
            return Ok(None);
        }

        // Only field guardians take nearest-match assignments.
        let nearest = match self
            .directory
            .nearest(incident.location, self.radius_m, Role::Guardian)
        {
            Ok(found) => found,
            Err(e) => {
                warn!("Geospatial query error for incident {incident_id}: {e}");
                None
            }
        };
        let Some((guardian, dist)) = nearest else {
            info!(
                "No guardians within {}m of incident {incident_id}",
                self.radius_m
            );
            return Ok(None);
        };

        let mut changed = false;
        let updated = self.store.modify(incident_id, |incident| {
            if incident.assigned_responder.as_deref() == Some(guardian.id.as_str()) {
                return Ok(false);
            }
            incident.assigned_responder = Some(guardian.id.clone());
            changed = true;
            Ok(true)
        })?;

        match updated {
            Some(incident) if changed => {
                info!(
                    "Assigned guardian {} at {dist:.0}m to incident {incident_id}",
                    guardian.id
                );
                self.dispatcher.notify_responder(&guardian, &incident).await;
            }
            Some(_) => info!("Guardian {} already assigned, no change", guardian.id),
            None => info!("Incident {incident_id} disappeared during assignment"),
        }
        Ok(Some(guardian))
    }
}

#[cfg(test)]
mod tests {
    use crate::incident::{GeoPoint, ReportIntake};
    use crate::testkit::{BrokenDirectory, Harness, guardian};
    use std::sync::Arc;

    fn report_at(lng: f64, lat: f64) -> ReportIntake {
        ReportIntake {
            reporter_phone: Some("0821111111".into()),
            description: Some("toilet backup".into()),
            location: Some(GeoPoint::new(lng, lat)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn assign_is_idempotent() {
        let h = Harness::new();
        h.add_responder(guardian("USER001", "0829999999", 28.052, -26.10));
        let outcome = h.engine.ingest(report_at(28.05, -26.10)).await.unwrap();
        assert_eq!(outcome.incident.assigned_responder.as_deref(), Some("USER001"));
        assert_eq!(h.channel.sent().len(), 1);
        let updated_at = outcome.incident.updated_at;

        let again = h.engine.assign(outcome.incident.id).await.unwrap();
        assert_eq!(again.map(|r| r.id).as_deref(), Some("USER001"));
        assert_eq!(h.channel.sent().len(), 1, "second assign must not notify");

        let stored = h.store.get(outcome.incident.id).unwrap().unwrap();
        assert_eq!(stored.assigned_responder.as_deref(), Some("USER001"));
        assert_eq!(stored.updated_at, updated_at);
    }

    #[tokio::test]
    async fn closer_guardian_takes_over() {
        let h = Harness::new();
        h.add_responder(guardian("far", "0821000001", 28.065, -26.10));
        let outcome = h.engine.ingest(report_at(28.05, -26.10)).await.unwrap();
        assert_eq!(outcome.incident.assigned_responder.as_deref(), Some("far"));

        h.add_responder(guardian("near", "0821000002", 28.0505, -26.10));
        let found = h.engine.assign(outcome.incident.id).await.unwrap().unwrap();
        assert_eq!(found.id, "near");

        let to: Vec<_> = h.channel.sent().into_iter().map(|m| m.to).collect();
        assert_eq!(to, vec!["+27821000001", "+27821000002"]);
    }

    #[tokio::test]
    async fn nobody_in_range_leaves_incident_unassigned() {
        let h = Harness::new();
        h.add_responder(guardian("USER009", "0829999999", 28.10, -26.10)); // ~5 km
        let outcome = h.engine.ingest(report_at(28.05, -26.10)).await.unwrap();

        assert!(h.engine.assign(outcome.incident.id).await.unwrap().is_none());
        let stored = h.store.get(outcome.incident.id).unwrap().unwrap();
        assert!(stored.assigned_responder.is_none());
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test]
    async fn geo_query_failure_degrades_to_no_assignment() {
        let h = Harness::with_directory(Arc::new(BrokenDirectory));
        let outcome = h.engine.ingest(report_at(28.05, -26.10)).await.unwrap();

        assert!(outcome.is_new);
        assert!(outcome.incident.assigned_responder.is_none());
        assert!(h.engine.assign(outcome.incident.id).await.unwrap().is_none());
        assert!(h.store.get(outcome.incident.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_incident_or_location_returns_none() {
        let h = Harness::new();
        h.add_responder(guardian("USER001", "0829999999", 0.001, 0.001));
        assert!(h.engine.assign(uuid::Uuid::new_v4()).await.unwrap().is_none());

        let outcome = h
            .engine
            .ingest(ReportIntake {
                reporter_phone: Some("0821111111".into()),
                description: Some("leak".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(h.engine.assign(outcome.incident.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn managers_are_never_assigned() {
        let h = Harness::new();
        let mut manager = guardian("MGR1", "0820000000", 28.0501, -26.10);
        manager.role = crate::incident::Role::Manager;
        h.add_responder(manager);

        let outcome = h.engine.ingest(report_at(28.05, -26.10)).await.unwrap();
        assert!(outcome.incident.assigned_responder.is_none());
    }
}
