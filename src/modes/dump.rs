use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

use water_guardian::config::parse_bool_env;
use water_guardian::incident::IncidentFilter;

use super::shared::open_engine;

pub(super) async fn run() -> Result<()> {
    let output_path =
        std::env::var("DUMP_OUTPUT_PATH").unwrap_or_else(|_| "./incidents.jsonl".into());
    let filter = if parse_bool_env("DUMP_ACTIVE_ONLY", false) {
        IncidentFilter::active()
    } else {
        IncidentFilter::default()
    };

    let engine = open_engine()?;
    let incidents = engine.list_incidents(&filter)?;
    info!(
        "Dumping {} incidents (statuses: {:?})",
        incidents.len(),
        filter.statuses
    );

    if let Some(parent) = Path::new(&output_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create parent directory for {}",
                    output_path.as_str()
                )
            })?;
        }
    }

    let file = File::create(&output_path)
        .with_context(|| format!("failed to create dump output file {output_path}"))?;
    let mut writer = BufWriter::new(file);
    for incident in &incidents {
        let line = serde_json::to_string(incident).context("failed to serialize incident")?;
        writer
            .write_all(line.as_bytes())
            .context("failed to write dump line")?;
        writer
            .write_all(b"\n")
            .context("failed to write newline")?;
    }
    writer.flush().context("failed to flush dump output")?;

    info!("Dump complete: {} incidents -> {}", incidents.len(), output_path);
    Ok(())
}
