use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tracing::info;

use water_guardian::Engine;
use water_guardian::config::{self, EngineCfg};
use water_guardian::responders::{Responder, SqliteResponders};
use water_guardian::store::{IncidentStore, open_db};

#[derive(Clone)]
pub(super) struct ReplayCfg {
    pub input_path: String,
    pub step_ms: u64,
}

pub(super) fn load_replay_cfg() -> Result<ReplayCfg> {
    Ok(ReplayCfg {
        input_path: config::must_env("REPLAY_INPUT_PATH")?,
        step_ms: std::env::var("REPLAY_STEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0),
    })
}

/// Open the database, seed responders and wire the engine.
pub(super) fn open_engine() -> Result<Arc<Engine>> {
    let db_path = config::db_path();
    let db = open_db(&db_path)?;
    let store = Arc::new(IncidentStore::new(db.clone()));
    let responders = Arc::new(SqliteResponders::new(db));

    if let Ok(path) = std::env::var("RESPONDERS_PATH") {
        let seed: Vec<Responder> = load_jsonl(&path)?;
        for responder in &seed {
            responders
                .upsert(responder)
                .with_context(|| format!("failed to seed responder {}", responder.id))?;
        }
        info!("Seeded {} responders from {path}", seed.len());
    }

    let cfg = EngineCfg::from_env();
    info!("Engine config: {cfg}");
    info!("Incident database: {db_path}");
    Ok(Arc::new(Engine::new(
        store,
        responders,
        config::channel_from_env(),
        &cfg,
    )))
}

/// One JSON value per line; blank lines are skipped.
pub(super) fn load_jsonl<T: DeserializeOwned>(path: &str) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {path}"))?;
    let reader = BufReader::new(file);

    let mut items = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("invalid JSON at line {} of {path}", idx + 1))?;
        items.push(item);
    }
    Ok(items)
}
