//! Incident data model: priority tiers, categories, the status state
//! machine, geolocation and the normalised report that drives intake.
pub mod geo;
pub mod triage;

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IncidentError, Result};

pub use geo::GeoPoint;

// ───────────────────────────── Priority ──────────────────────────────────

/// Triage tier. `P0` is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
        }
    }

    /// Estimated sewage loss in litres, fixed per tier.
    pub fn sewage_loss_estimate(&self) -> u32 {
        match self {
            Self::P0 => 500,
            Self::P1 => 200,
            Self::P2 => 50,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────── Category ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    ManholeOverflow,
    ToiletBackup,
    PipeBurst,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManholeOverflow => "manhole_overflow",
            Self::ToiletBackup => "toilet_backup",
            Self::PipeBurst => "pipe_burst",
            Self::Other => "other",
        }
    }
}

// ───────────────────────────── Status ────────────────────────────────────

/// Lifecycle: `open → in_progress → allocated → verified → closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Open,
    InProgress,
    Allocated,
    Verified,
    Closed,
}

impl Status {
    /// Every status an incident can still be merged into.
    pub const ACTIVE: [Status; 4] = [
        Status::Open,
        Status::InProgress,
        Status::Allocated,
        Status::Verified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Allocated => "allocated",
            Self::Verified => "verified",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Guard for status edits made through a patch.
    ///
    /// Non-terminal statuses may be edited in either direction. `verified`
    /// is only reachable through verification (it needs a verifier), and
    /// `closed` is never left.
    pub fn check_patch_transition(&self, next: Status) -> Result<()> {
        if *self == next {
            return Ok(());
        }
        if self.is_terminal() {
            return Err(IncidentError::validation(format!(
                "incident is {} and cannot move to {}",
                self.as_str(),
                next.as_str()
            )));
        }
        if next == Status::Verified {
            return Err(IncidentError::validation(
                "status verified can only be set by verifying the incident",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────── Roles ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Guardian,
    Manager,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guardian => "Guardian",
            Self::Manager => "Manager",
            Self::Admin => "Admin",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "Guardian" => Some(Self::Guardian),
            "Manager" => Some(Self::Manager),
            "Admin" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn can_verify(&self) -> bool {
        matches!(self, Self::Guardian | Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ───────────────────────────── Incident ──────────────────────────────────

/// One report as tracked on an incident. Same phone twice = two entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reporter {
    pub phone: String,
    pub reported_at: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    /// Text of the first report; the duplicate matcher compares against it.
    pub description: String,
    pub reporters: Vec<Reporter>,
    pub category: Category,
    pub priority: Priority,
    pub status: Status,
    pub location: GeoPoint,
    /// Responder id, written only by the assignment engine.
    pub assigned_responder: Option<String>,
    pub verified_by: Option<String>,
    #[serde(default)]
    pub verification_note: Option<String>,
    pub media_urls: BTreeSet<String>,
    pub sewage_loss_estimate: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Incident {
    /// Build a fresh `open` incident from the first report.
    pub fn from_report(report: &Report, priority: Priority) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            description: report.description.clone(),
            reporters: vec![Reporter {
                phone: report.reporter_phone.clone(),
                reported_at: now,
                description: report.description.clone(),
            }],
            category: report.category,
            priority,
            status: Status::Open,
            location: report.location,
            assigned_responder: None,
            verified_by: None,
            verification_note: None,
            media_urls: report.media_urls.iter().cloned().collect(),
            sewage_loss_estimate: priority.sewage_loss_estimate(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Reporter phones in first-seen order, deduplicated by raw value.
    pub fn unique_reporter_phones(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.reporters
            .iter()
            .map(|r| r.phone.as_str())
            .filter(|phone| seen.insert(*phone))
            .collect()
    }
}

// ───────────────────────────── Intake ────────────────────────────────────

/// Normalised report as produced by the inbound channel adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportIntake {
    #[serde(default)]
    pub reporter_phone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub media_urls: Vec<String>,
}

/// A report that passed validation. Absent location becomes the sentinel.
#[derive(Debug, Clone)]
pub struct Report {
    pub reporter_phone: String,
    pub description: String,
    pub category: Category,
    pub location: GeoPoint,
    pub media_urls: Vec<String>,
}

impl ReportIntake {
    pub fn validate(self) -> Result<Report> {
        let reporter_phone = non_blank(self.reporter_phone)
            .ok_or_else(|| IncidentError::validation("reporter phone is required"))?;
        let description = non_blank(self.description)
            .ok_or_else(|| IncidentError::validation("description is required"))?;
        let location = self.location.unwrap_or(GeoPoint::UNKNOWN);
        location.validate()?;

        Ok(Report {
            reporter_phone,
            description,
            category: self.category.unwrap_or_default(),
            location,
            media_urls: self
                .media_urls
                .into_iter()
                .filter(|u| !u.trim().is_empty())
                .collect(),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ───────────────────────────── Edits & queries ───────────────────────────

/// Partial field update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentPatch {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub media_urls: Option<Vec<String>>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Field-level findings recorded when a responder verifies an incident.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Verification {
    /// Corrected location, when both coordinates were supplied.
    pub fn location(&self) -> Result<Option<GeoPoint>> {
        match (self.lng, self.lat) {
            (Some(lng), Some(lat)) => {
                let point = GeoPoint::new(lng, lat);
                point.validate()?;
                Ok(Some(point))
            }
            (None, None) => Ok(None),
            _ => Err(IncidentError::validation(
                "verification location needs both lat and lng",
            )),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    /// Empty = any status.
    pub statuses: Vec<Status>,
    pub priority: Option<Priority>,
    pub category: Option<Category>,
}

impl IncidentFilter {
    /// Incidents that are still being worked on.
    pub fn active() -> Self {
        Self {
            statuses: Status::ACTIVE.to_vec(),
            ..Self::default()
        }
    }
}
