//! Best-effort notification fan-out to everyone who reported an incident.
//!
//! Recipients are handled one at a time with a fixed pause between sends
//! to stay under the channel's rate limit. A failed send is logged and the
//! fan-out moves on; nothing here returns an error to the caller.
pub mod channel;
pub mod phone;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::incident::Incident;
use crate::responders::Responder;
use crate::store::IncidentStore;

use channel::MessageChannel;
use phone::normalize_phone;

/// One outbound message, addressed to a normalised phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub body: String,
}

/// Counters from one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    pub sent: usize,
    pub failed: usize,
}

pub fn status_message(incident: &Incident) -> String {
    format!(
        "Update for incident {}: Status is now {}.",
        incident.id, incident.status
    )
}

pub fn verification_message(incident_id: Uuid) -> String {
    format!(
        "The incident ({incident_id}) has been verified and should be resolved in the next 72 hours. Thank you for reporting!"
    )
}

pub fn assignment_message(incident: &Incident) -> String {
    format!(
        "New incident reported (ID: {}): {}. Priority: {}. Location: lat {}, lng {}. Please go verify the incident.",
        incident.id,
        incident.description,
        incident.priority,
        incident.location.lat,
        incident.location.lng,
    )
}

pub struct Dispatcher {
    store: Arc<IncidentStore>,
    channel: Arc<dyn MessageChannel>,
    from: String,
    country_code: String,
    delay: Duration,
}

impl Dispatcher {
    pub fn new(
        store: Arc<IncidentStore>,
        channel: Arc<dyn MessageChannel>,
        from: String,
        country_code: String,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            channel,
            from,
            country_code,
            delay,
        }
    }

    /// One message per unique reporter phone, in first-reported order.
    /// Without `message` the default status update text is used.
    pub fn plan(&self, incident: &Incident, message: Option<&str>) -> Vec<Notification> {
        let body = message.map_or_else(|| status_message(incident), str::to_string);
        incident
            .unique_reporter_phones()
            .into_iter()
            .filter_map(|phone| {
                let to = normalize_phone(phone, &self.country_code);
                if to.is_none() {
                    warn!("Skipping blank reporter phone on incident {}", incident.id);
                }
                to
            })
            .map(|to| Notification {
                to,
                body: body.clone(),
            })
            .collect()
    }

    /// Notify every unique reporter of `incident_id`.
    pub async fn notify(&self, incident_id: Uuid, message: Option<&str>) -> FanoutSummary {
        let incident = match self.store.get(incident_id) {
            Ok(Some(incident)) => incident,
            Ok(None) => {
                info!("No incident found for notification: {incident_id}");
                return FanoutSummary::default();
            }
            Err(e) => {
                warn!("Failed to load incident {incident_id} for notification: {e}");
                return FanoutSummary::default();
            }
        };

        let plan = self.plan(&incident, message);
        if plan.is_empty() {
            info!("No reporters to notify for incident {incident_id}");
            return FanoutSummary::default();
        }
        info!(
            "Notifying {} unique reporter(s) for incident {incident_id}",
            plan.len()
        );

        let mut summary = FanoutSummary::default();
        for (idx, notification) in plan.iter().enumerate() {
            if idx > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self
                .channel
                .send(&notification.to, &self.from, &notification.body)
                .await
            {
                Ok(()) => {
                    summary.sent += 1;
                    debug!("Notification sent to {} for incident {incident_id}", notification.to);
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!("Failed to send to {}: {e}", notification.to);
                }
            }
        }
        info!(
            "Fan-out for incident {incident_id} done: sent={}, failed={}",
            summary.sent, summary.failed
        );
        summary
    }

    pub async fn notify_verification(&self, incident_id: Uuid) -> FanoutSummary {
        self.notify(incident_id, Some(&verification_message(incident_id)))
            .await
    }

    /// Tell a freshly assigned responder about the incident. Returns whether
    /// the message went out.
    pub async fn notify_responder(&self, responder: &Responder, incident: &Incident) -> bool {
        let Some(to) = responder
            .phone
            .as_deref()
            .and_then(|p| normalize_phone(p, &self.country_code))
        else {
            debug!("Responder {} has no phone; skipping notification", responder.id);
            return false;
        };
        match self
            .channel
            .send(&to, &self.from, &assignment_message(incident))
            .await
        {
            Ok(()) => {
                info!("Notification sent to responder {} for incident {}", responder.id, incident.id);
                true
            }
            Err(e) => {
                warn!("Error sending notification to responder {}: {e}", responder.id);
                false
            }
        }
    }
}
