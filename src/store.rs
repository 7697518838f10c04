//! Incident collection: JSON documents in SQLite with indexed location and
//! status columns for spatial and list queries.

use anyhow::{Context, anyhow};
use sqlite::{State, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::incident::geo::{BoundingBox, haversine_m};
use crate::incident::{GeoPoint, Incident, IncidentFilter, Reporter, Status};

// ---------------------------------------------------------------------------
// Shared database handle
// ---------------------------------------------------------------------------

pub type SharedDb = Arc<Mutex<sqlite::Connection>>;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS incidents (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT    NOT NULL UNIQUE,
    lng        REAL    NOT NULL,
    lat        REAL    NOT NULL,
    status     TEXT    NOT NULL,
    priority   TEXT    NOT NULL,
    category   TEXT    NOT NULL,
    created_at INTEGER NOT NULL,
    doc        TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS incidents_location ON incidents (lat, lng);
CREATE INDEX IF NOT EXISTS incidents_status   ON incidents (status, created_at);

CREATE TABLE IF NOT EXISTS responders (
    id    TEXT PRIMARY KEY,
    phone TEXT,
    role  TEXT NOT NULL,
    lng   REAL NOT NULL,
    lat   REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS responders_location ON responders (role, lat, lng);
";

/// Open (or create) the database and ensure the schema exists.
pub fn open_db(path: &str) -> anyhow::Result<SharedDb> {
    let conn = sqlite::open(path).with_context(|| format!("failed to open database {path}"))?;
    conn.execute(SCHEMA).context("failed to create schema")?;
    info!("Incident DB opened at {path}");
    Ok(Arc::new(Mutex::new(conn)))
}

pub(crate) fn lock(db: &SharedDb) -> anyhow::Result<MutexGuard<'_, sqlite::Connection>> {
    db.lock().map_err(|_| anyhow!("database lock poisoned"))
}

/// Appends `column IN (?, ?, ..)` for the given statuses.
fn push_status_clause(sql: &mut String, binds: &mut Vec<Value>, statuses: &[Status]) {
    if statuses.is_empty() {
        return;
    }
    let marks = vec!["?"; statuses.len()].join(", ");
    sql.push_str(&format!(" AND status IN ({marks})"));
    binds.extend(statuses.iter().map(|s| Value::String(s.as_str().into())));
}

fn query_docs(
    conn: &sqlite::Connection,
    sql: &str,
    binds: Vec<Value>,
) -> anyhow::Result<Vec<Incident>> {
    let mut stmt = conn.prepare(sql)?;
    for (idx, value) in binds.into_iter().enumerate() {
        stmt.bind((idx + 1, value))?;
    }
    let mut out = Vec::new();
    while let State::Row = stmt.next()? {
        let doc = stmt.read::<String, _>(0)?;
        let incident: Incident =
            serde_json::from_str(&doc).context("corrupt incident document")?;
        out.push(incident);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Incident store
// ---------------------------------------------------------------------------

pub struct IncidentStore {
    db: SharedDb,
}

impl IncidentStore {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    pub fn insert(&self, incident: &Incident) -> Result<()> {
        let doc = serde_json::to_string(incident).context("failed to encode incident")?;
        let conn = lock(&self.db)?;
        let mut stmt = conn
            .prepare(
                "INSERT INTO incidents (id, lng, lat, status, priority, category, created_at, doc)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .context("prepare insert")?;
        let id = incident.id.to_string();
        stmt.bind((1, id.as_str())).context("bind id")?;
        stmt.bind((2, incident.location.lng)).context("bind lng")?;
        stmt.bind((3, incident.location.lat)).context("bind lat")?;
        stmt.bind((4, incident.status.as_str())).context("bind status")?;
        stmt.bind((5, incident.priority.as_str())).context("bind priority")?;
        stmt.bind((6, incident.category.as_str())).context("bind category")?;
        stmt.bind((7, incident.created_at.timestamp_millis()))
            .context("bind created_at")?;
        stmt.bind((8, doc.as_str())).context("bind doc")?;
        stmt.next().context("insert incident")?;
        debug!("Stored incident {}", incident.id);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        let conn = lock(&self.db)?;
        Ok(Self::read(&conn, id)?)
    }

    /// Read-modify-write under the connection lock.
    ///
    /// `edit` returns whether it changed anything; only then is the document
    /// written back with a fresh `updated_at`. Returns `None` for an unknown
    /// id, otherwise the incident as it is after the edit.
    pub fn modify<F>(&self, id: Uuid, edit: F) -> Result<Option<Incident>>
    where
        F: FnOnce(&mut Incident) -> Result<bool>,
    {
        let conn = lock(&self.db)?;
        let Some(mut incident) = Self::read(&conn, id)? else {
            return Ok(None);
        };
        if edit(&mut incident)? {
            incident.updated_at = chrono::Utc::now();
            Self::write(&conn, &incident)?;
        }
        Ok(Some(incident))
    }

    /// Append one reporter entry (and any new media) to an existing incident.
    pub fn append_reporter(
        &self,
        id: Uuid,
        reporter: Reporter,
        media_urls: &[String],
    ) -> Result<Option<Incident>> {
        self.modify(id, |incident| {
            incident.reporters.push(reporter);
            incident.media_urls.extend(media_urls.iter().cloned());
            Ok(true)
        })
    }

    /// Newest first, insertion order breaking ties.
    pub fn list(&self, filter: &IncidentFilter) -> Result<Vec<Incident>> {
        let mut sql = String::from("SELECT doc FROM incidents WHERE 1 = 1");
        let mut binds = Vec::new();
        push_status_clause(&mut sql, &mut binds, &filter.statuses);
        if let Some(priority) = filter.priority {
            sql.push_str(" AND priority = ?");
            binds.push(Value::String(priority.as_str().into()));
        }
        if let Some(category) = filter.category {
            sql.push_str(" AND category = ?");
            binds.push(Value::String(category.as_str().into()));
        }
        sql.push_str(" ORDER BY created_at DESC, seq DESC");

        let conn = lock(&self.db)?;
        Ok(query_docs(&conn, &sql, binds).context("list incidents")?)
    }

    /// Incidents with a known location within `radius_m` of `center`,
    /// restricted to `statuses`, paired with their distance in metres.
    pub fn find_within(
        &self,
        center: GeoPoint,
        radius_m: f64,
        statuses: &[Status],
    ) -> Result<Vec<(Incident, f64)>> {
        let bbox = BoundingBox::around(center, radius_m);
        let mut sql = String::from(
            "SELECT doc FROM incidents WHERE lat BETWEEN ? AND ? AND NOT (lat = 0 AND lng = 0)",
        );
        let mut binds = vec![Value::Float(bbox.min_lat), Value::Float(bbox.max_lat)];
        if let Some((lo, hi)) = bbox.lng_range {
            sql.push_str(" AND lng BETWEEN ? AND ?");
            binds.push(Value::Float(lo));
            binds.push(Value::Float(hi));
        }
        push_status_clause(&mut sql, &mut binds, statuses);

        let conn = lock(&self.db)?;
        let candidates = query_docs(&conn, &sql, binds).context("spatial incident query")?;
        Ok(candidates
            .into_iter()
            .map(|incident| {
                let dist = haversine_m(center, incident.location);
                (incident, dist)
            })
            .filter(|(_, dist)| *dist <= radius_m)
            .collect())
    }

    // ── Private helpers ─────────────────────────────────────────────────

    fn read(conn: &sqlite::Connection, id: Uuid) -> anyhow::Result<Option<Incident>> {
        let docs = query_docs(
            conn,
            "SELECT doc FROM incidents WHERE id = ?",
            vec![Value::String(id.to_string())],
        )
        .with_context(|| format!("read incident {id}"))?;
        Ok(docs.into_iter().next())
    }

    fn write(conn: &sqlite::Connection, incident: &Incident) -> anyhow::Result<()> {
        let doc = serde_json::to_string(incident).context("failed to encode incident")?;
        let mut stmt = conn.prepare(
            "UPDATE incidents
             SET lng = ?, lat = ?, status = ?, priority = ?, category = ?, doc = ?
             WHERE id = ?",
        )?;
        let id = incident.id.to_string();
        stmt.bind((1, incident.location.lng))?;
        stmt.bind((2, incident.location.lat))?;
        stmt.bind((3, incident.status.as_str()))?;
        stmt.bind((4, incident.priority.as_str()))?;
        stmt.bind((5, incident.category.as_str()))?;
        stmt.bind((6, doc.as_str()))?;
        stmt.bind((7, id.as_str()))?;
        stmt.next()
            .with_context(|| format!("update incident {}", incident.id))?;
        Ok(())
    }
}
