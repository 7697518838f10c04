use anyhow::Result;
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use water_guardian::Engine;
use water_guardian::incident::ReportIntake;

use super::shared::open_engine;

const DEFAULT_MAX_IN_FLIGHT: usize = 32;

pub(super) async fn run() -> Result<()> {
    let engine = open_engine()?;
    let max_in_flight = std::env::var("LIVE_MAX_IN_FLIGHT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_MAX_IN_FLIGHT);

    info!("Running. Waiting for reports on stdin (max {max_in_flight} in flight)...");

    let lines = BufReader::new(io::stdin()).lines();
    let reports = stream::unfold((lines, 0usize), |(mut lines, n)| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some(((n + 1, line), (lines, n + 1))),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read stdin: {e}");
                None
            }
        }
    });

    reports
        .filter(|(_, line)| std::future::ready(!line.trim().is_empty()))
        .for_each_concurrent(max_in_flight, |(n, line)| {
            let engine = engine.clone();
            async move { handle_line(&engine, n, &line).await }
        })
        .await;

    info!("Input closed; shutting down.");
    Ok(())
}

async fn handle_line(engine: &Arc<Engine>, n: usize, line: &str) {
    let intake: ReportIntake = match serde_json::from_str(line) {
        Ok(intake) => intake,
        Err(e) => {
            warn!("Invalid JSON on line {n}: {e}");
            return;
        }
    };
    match engine.ingest(intake).await {
        Ok(outcome) => println!("{}", outcome.reply_text()),
        Err(e) => warn!("Report on line {n} rejected: {e}"),
    }
}
