//! Fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::config::EngineCfg;
use crate::error::{IncidentError, Result};
use crate::incident::{GeoPoint, Role};
use crate::intake::Engine;
use crate::notify::channel::MessageChannel;
use crate::responders::{Responder, ResponderDirectory, SqliteResponders};
use crate::store::{IncidentStore, SharedDb, open_db};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub from: String,
    pub body: String,
    pub at: Instant,
}

/// Records every send; fails for the configured recipients.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<SentMessage>>,
    fail_for: HashSet<String>,
}

impl RecordingChannel {
    pub fn failing_for(numbers: &[&str]) -> Self {
        Self {
            sent: Mutex::default(),
            fail_for: numbers.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send(&self, to: &str, from: &str, body: &str) -> Result<()> {
        if self.fail_for.contains(to) {
            return Err(IncidentError::TransientIntegration(format!(
                "channel rejected {to}"
            )));
        }
        self.sent.lock().unwrap().push(SentMessage {
            to: to.into(),
            from: from.into(),
            body: body.into(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Directory whose spatial query always fails.
pub struct BrokenDirectory;

impl ResponderDirectory for BrokenDirectory {
    fn get(&self, _id: &str) -> Result<Option<Responder>> {
        Ok(None)
    }

    fn nearest(&self, _: GeoPoint, _: f64, _: Role) -> Result<Option<(Responder, f64)>> {
        Err(IncidentError::TransientIntegration(
            "geoNear: index unavailable".into(),
        ))
    }
}

pub fn guardian(id: &str, phone: &str, lng: f64, lat: f64) -> Responder {
    Responder {
        id: id.into(),
        phone: Some(phone.into()),
        role: Role::Guardian,
        location: GeoPoint::new(lng, lat),
    }
}

/// Engine over an in-memory database, a recording channel and no
/// inter-send delay.
pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<IncidentStore>,
    pub responders: Arc<SqliteResponders>,
    pub channel: Arc<RecordingChannel>,
}

impl Default for Harness {
    fn default() -> Self {
        let db = open_db(":memory:").unwrap();
        let responders = Arc::new(SqliteResponders::new(db.clone()));
        Self::assemble(db, responders.clone(), responders, RecordingChannel::default())
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(directory: Arc<dyn ResponderDirectory>) -> Self {
        let db = open_db(":memory:").unwrap();
        let responders = Arc::new(SqliteResponders::new(db.clone()));
        Self::assemble(db, responders, directory, RecordingChannel::default())
    }

    pub fn with_channel(channel: RecordingChannel) -> Self {
        let db = open_db(":memory:").unwrap();
        let responders = Arc::new(SqliteResponders::new(db.clone()));
        Self::assemble(db, responders.clone(), responders, channel)
    }

    fn assemble(
        db: SharedDb,
        responders: Arc<SqliteResponders>,
        directory: Arc<dyn ResponderDirectory>,
        channel: RecordingChannel,
    ) -> Self {
        let store = Arc::new(IncidentStore::new(db));
        let channel = Arc::new(channel);
        let engine = Arc::new(Engine::new(
            store.clone(),
            directory,
            channel.clone(),
            &EngineCfg::for_tests(),
        ));
        Self {
            engine,
            store,
            responders,
            channel,
        }
    }

    pub fn add_responder(&self, responder: Responder) {
        self.responders.upsert(&responder).unwrap();
    }
}
