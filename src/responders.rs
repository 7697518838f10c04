//! Read access to responder records owned by the user-management system.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlite::{State, Value};
use tracing::debug;

use crate::error::Result;
use crate::incident::geo::{BoundingBox, haversine_m};
use crate::incident::{GeoPoint, Role};
use crate::store::{SharedDb, lock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Responder {
    pub id: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub location: GeoPoint,
}

/// Lookup seam for responders. Incidents reference responders by id only.
pub trait ResponderDirectory: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Responder>>;

    /// Closest responder with `role` within `max_distance_m` of `center`,
    /// with its distance in metres. Responders without a known location are
    /// never returned.
    fn nearest(
        &self,
        center: GeoPoint,
        max_distance_m: f64,
        role: Role,
    ) -> Result<Option<(Responder, f64)>>;
}

// ---------------------------------------------------------------------------
// SQLite-backed directory
// ---------------------------------------------------------------------------

pub struct SqliteResponders {
    db: SharedDb,
}

impl SqliteResponders {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Insert or replace a responder record (used when syncing from the
    /// user-management system).
    pub fn upsert(&self, responder: &Responder) -> Result<()> {
        let conn = lock(&self.db)?;
        let mut stmt = conn
            .prepare("INSERT OR REPLACE INTO responders (id, phone, role, lng, lat) VALUES (?, ?, ?, ?, ?)")
            .context("prepare responder upsert")?;
        stmt.bind((1, responder.id.as_str())).context("bind id")?;
        stmt.bind((2, responder.phone.as_deref())).context("bind phone")?;
        stmt.bind((3, responder.role.as_str())).context("bind role")?;
        stmt.bind((4, responder.location.lng)).context("bind lng")?;
        stmt.bind((5, responder.location.lat)).context("bind lat")?;
        stmt.next().context("upsert responder")?;
        Ok(())
    }

    fn query(&self, sql: &str, binds: Vec<Value>) -> anyhow::Result<Vec<Responder>> {
        let conn = lock(&self.db)?;
        let mut stmt = conn.prepare(sql)?;
        for (idx, value) in binds.into_iter().enumerate() {
            stmt.bind((idx + 1, value))?;
        }
        let mut out = Vec::new();
        while let State::Row = stmt.next()? {
            let role_name = stmt.read::<String, _>("role")?;
            let Some(role) = Role::from_name(&role_name) else {
                debug!("Skipping responder with unknown role {role_name:?}");
                continue;
            };
            out.push(Responder {
                id: stmt.read::<String, _>("id")?,
                phone: stmt.read::<Option<String>, _>("phone")?,
                role,
                location: GeoPoint::new(stmt.read::<f64, _>("lng")?, stmt.read::<f64, _>("lat")?),
            });
        }
        Ok(out)
    }
}

impl ResponderDirectory for SqliteResponders {
    fn get(&self, id: &str) -> Result<Option<Responder>> {
        let found = self
            .query(
                "SELECT id, phone, role, lng, lat FROM responders WHERE id = ?",
                vec![Value::String(id.into())],
            )
            .with_context(|| format!("read responder {id}"))?;
        Ok(found.into_iter().next())
    }

    fn nearest(
        &self,
        center: GeoPoint,
        max_distance_m: f64,
        role: Role,
    ) -> Result<Option<(Responder, f64)>> {
        let bbox = BoundingBox::around(center, max_distance_m);
        let mut sql = String::from(
            "SELECT id, phone, role, lng, lat FROM responders
             WHERE role = ? AND lat BETWEEN ? AND ? AND NOT (lat = 0 AND lng = 0)",
        );
        let mut binds = vec![
            Value::String(role.as_str().into()),
            Value::Float(bbox.min_lat),
            Value::Float(bbox.max_lat),
        ];
        if let Some((lo, hi)) = bbox.lng_range {
            sql.push_str(" AND lng BETWEEN ? AND ?");
            binds.push(Value::Float(lo));
            binds.push(Value::Float(hi));
        }
        sql.push_str(" ORDER BY rowid");

        let candidates = self.query(&sql, binds).context("spatial responder query")?;
        // `min_by` keeps the first of equal distances, i.e. store order.
        Ok(candidates
            .into_iter()
            .map(|r| {
                let dist = haversine_m(center, r.location);
                (r, dist)
            })
            .filter(|(_, dist)| *dist <= max_distance_m)
            .min_by(|a, b| a.1.total_cmp(&b.1)))
    }
}
