//! The "report received" workflow and the operations exposed to the
//! boundary layer: ingest, list, update, verify, assign and notify.
pub mod cells;

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assign::AssignmentEngine;
use crate::config::EngineCfg;
use crate::error::{IncidentError, Result};
use crate::incident::triage::classify;
use crate::incident::{
    Incident, IncidentFilter, IncidentPatch, Priority, Report, ReportIntake, Reporter, Status,
    Verification,
};
use crate::matcher::DuplicateMatcher;
use crate::notify::channel::MessageChannel;
use crate::notify::{Dispatcher, FanoutSummary};
use crate::responders::{Responder, ResponderDirectory};
use crate::store::IncidentStore;

use cells::CellLocks;

/// Result of one ingestion: the incident the report ended up on and
/// whether it was created for this report.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub incident: Incident,
    pub is_new: bool,
}

impl IngestOutcome {
    /// Reply text for the original reporter.
    pub fn reply_text(&self) -> String {
        if self.is_new {
            format!(
                "Thank you for your report. We've created an incident with ID: {}. Priority: {}. A Guardian will verify soon.",
                self.incident.id, self.incident.priority
            )
        } else {
            format!(
                "Thank you for your report. It matches incident {} which is already being handled (status: {}).",
                self.incident.id, self.incident.status
            )
        }
    }
}

pub struct Engine {
    store: Arc<IncidentStore>,
    directory: Arc<dyn ResponderDirectory>,
    matcher: DuplicateMatcher,
    assigner: AssignmentEngine,
    dispatcher: Arc<Dispatcher>,
    cells: CellLocks,
}

impl Engine {
    pub fn new(
        store: Arc<IncidentStore>,
        directory: Arc<dyn ResponderDirectory>,
        channel: Arc<dyn MessageChannel>,
        cfg: &EngineCfg,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            channel,
            cfg.from_number.clone(),
            cfg.country_code.clone(),
            cfg.notify_delay,
        ));
        Self {
            matcher: DuplicateMatcher::new(store.clone(), cfg.duplicate_radius_m),
            assigner: AssignmentEngine::new(
                store.clone(),
                directory.clone(),
                dispatcher.clone(),
                cfg.assign_radius_m,
            ),
            store,
            directory,
            dispatcher,
            cells: CellLocks::new(cfg.duplicate_radius_m),
        }
    }

    /// Turn a report into a new incident or merge it into a nearby one.
    ///
    /// New incidents with a known location get a guardian assigned; merges
    /// only append the reporter. Assignment problems are logged, never
    /// returned: the incident is stored either way.
    pub async fn ingest(&self, intake: ReportIntake) -> Result<IngestOutcome> {
        let report = intake.validate()?;
        let priority = classify(&report.description);
        info!(
            "Report from {}: triage priority {priority}",
            report.reporter_phone
        );

        let (incident, is_new) = {
            let _cell = if report.location.is_unknown() {
                None
            } else {
                Some(self.cells.lock_around(report.location).await)
            };
            match self
                .matcher
                .find_match(report.location, &report.description)?
            {
                Some(existing) => (self.merge(existing.id, &report)?, false),
                None => (self.create(&report, priority)?, true),
            }
        };

        if !is_new {
            return Ok(IngestOutcome { incident, is_new });
        }

        if incident.location.is_unknown() {
            debug!("Incident {} has no location; assignment skipped", incident.id);
            return Ok(IngestOutcome { incident, is_new });
        }
        if let Err(e) = self.assigner.assign(incident.id).await {
            warn!("Assignment failed for incident {}: {e}", incident.id);
        }
        let incident = self.refreshed(incident);
        Ok(IngestOutcome { incident, is_new })
    }

    /// Incidents matching `filter`, newest first.
    pub fn list_incidents(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let incidents = self.store.list(filter)?;
        debug!("Fetched incidents count: {}", incidents.len());
        Ok(incidents)
    }

    /// Apply a partial update. Unknown ids yield `Ok(None)`.
    ///
    /// A new known location re-runs assignment; a status change notifies
    /// the reporters.
    pub async fn update_incident(&self, id: Uuid, patch: IncidentPatch) -> Result<Option<Incident>> {
        if let Some(location) = &patch.location {
            location.validate()?;
        }
        if patch
            .description
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            return Err(IncidentError::validation("description cannot be blank"));
        }

        let mut status_changed = false;
        let updated = self.store.modify(id, |incident| {
            if let Some(next) = patch.status {
                incident.status.check_patch_transition(next)?;
                status_changed = incident.status != next;
                incident.status = next;
            }
            if let Some(category) = patch.category {
                incident.category = category;
            }
            if let Some(location) = patch.location {
                incident.location = location;
            }
            if let Some(media) = &patch.media_urls {
                incident.media_urls = media.iter().cloned().collect();
            }
            if let Some(description) = &patch.description {
                incident.description = description.trim().to_string();
            }
            // Any accepted patch counts as a mutation.
            Ok(true)
        })?;
        let Some(incident) = updated else {
            info!("No incident found for update ID: {id}");
            return Ok(None);
        };
        info!("Updated incident ID: {id}");

        if patch.location.is_some_and(|l| !l.is_unknown()) {
            if let Err(e) = self.assigner.assign(id).await {
                warn!("Re-assignment failed for incident {id}: {e}");
            }
        }
        if status_changed {
            self.dispatcher.notify(id, None).await;
        }
        Ok(Some(self.refreshed(incident)))
    }

    /// Record a responder's verification and tell the reporters.
    pub async fn verify_incident(
        &self,
        id: Uuid,
        verifier_id: &str,
        verification: Verification,
    ) -> Result<Incident> {
        let verifier = self
            .directory
            .get(verifier_id)?
            .ok_or_else(|| IncidentError::responder_not_found(verifier_id))?;
        if !verifier.role.can_verify() {
            return Err(IncidentError::Forbidden {
                role: verifier.role,
                action: "verify incidents",
            });
        }
        let corrected = verification.location()?;

        let mut relocated = false;
        let updated = self.store.modify(id, |incident| {
            match incident.status {
                Status::Verified => return Err(IncidentError::AlreadyVerified(incident.id)),
                Status::Closed => {
                    return Err(IncidentError::validation(
                        "closed incidents cannot be verified",
                    ));
                }
                _ => {}
            }
            incident.status = Status::Verified;
            incident.verified_by = Some(verifier.id.clone());
            if let Some(location) = corrected {
                relocated = location != incident.location && !location.is_unknown();
                incident.location = location;
            }
            if let Some(note) = verification.description.as_deref().map(str::trim) {
                if !note.is_empty() {
                    incident.verification_note = Some(note.to_string());
                }
            }
            Ok(true)
        })?;
        let incident = updated.ok_or_else(|| IncidentError::incident_not_found(id))?;
        info!("Incident {id} verified by {}", verifier.id);

        if relocated {
            if let Err(e) = self.assigner.assign(id).await {
                warn!("Re-assignment after verification failed for incident {id}: {e}");
            }
        }
        self.dispatcher.notify_verification(id).await;
        Ok(self.refreshed(incident))
    }

    pub async fn assign(&self, id: Uuid) -> Result<Option<Responder>> {
        self.assigner.assign(id).await
    }

    /// Best-effort fan-out to the incident's reporters.
    pub async fn notify(&self, id: Uuid, message: Option<&str>) -> FanoutSummary {
        self.dispatcher.notify(id, message).await
    }

    // ── Private helpers ─────────────────────────────────────────────────

    fn create(&self, report: &Report, priority: Priority) -> Result<Incident> {
        let incident = Incident::from_report(report, priority);
        self.store.insert(&incident)?;
        info!(
            "Created incident {} ({priority}, {}, est. {}L)",
            incident.id,
            incident.category.as_str(),
            incident.sewage_loss_estimate
        );
        Ok(incident)
    }

    fn merge(&self, id: Uuid, report: &Report) -> Result<Incident> {
        let reporter = Reporter {
            phone: report.reporter_phone.clone(),
            reported_at: chrono::Utc::now(),
            description: report.description.clone(),
        };
        let incident = self
            .store
            .append_reporter(id, reporter, &report.media_urls)?
            .ok_or_else(|| IncidentError::incident_not_found(id))?;
        info!(
            "Merged report from {} into incident {id} ({} reporters)",
            report.reporter_phone,
            incident.reporters.len()
        );
        Ok(incident)
    }

    /// Latest stored copy, falling back to `incident` if the read fails.
    fn refreshed(&self, incident: Incident) -> Incident {
        match self.store.get(incident.id) {
            Ok(Some(latest)) => latest,
            Ok(None) => incident,
            Err(e) => {
                warn!("Failed to reload incident {}: {e}", incident.id);
                incident
            }
        }
    }
}
