use anyhow::{Result, anyhow};
use std::time::Duration;
use tracing::{info, warn};

use water_guardian::incident::ReportIntake;

use super::shared::{load_jsonl, load_replay_cfg, open_engine};

pub(super) async fn run() -> Result<()> {
    let replay = load_replay_cfg()?;
    let reports: Vec<ReportIntake> = load_jsonl(&replay.input_path)?;
    if reports.is_empty() {
        return Err(anyhow!("Replay input is empty: {}", replay.input_path));
    }

    let engine = open_engine()?;
    info!(
        "Replay started: {} reports from {}",
        reports.len(),
        replay.input_path
    );

    let total = reports.len();
    let mut created = 0usize;
    let mut merged = 0usize;
    let mut rejected = 0usize;

    for (idx, report) in reports.into_iter().enumerate() {
        if idx > 0 && replay.step_ms > 0 {
            tokio::time::sleep(Duration::from_millis(replay.step_ms)).await;
        }

        match engine.ingest(report).await {
            Ok(outcome) => {
                if outcome.is_new {
                    created += 1;
                } else {
                    merged += 1;
                }
                println!("[REPLAY {}] {}", idx + 1, outcome.reply_text());
            }
            Err(e) => {
                rejected += 1;
                warn!("Replayed report {} rejected: {e}", idx + 1);
            }
        }
    }

    info!("Replay complete: total={total}, created={created}, merged={merged}, rejected={rejected}");

    Ok(())
}
