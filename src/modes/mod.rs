mod dump;
mod live;
mod replay;
mod shared;

use anyhow::Result;
use std::fmt;
use tracing::{info, warn};

/// How the binary feeds reports into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    /// JSONL reports on stdin, ingested concurrently.
    Live,
    /// Incidents written out as JSONL.
    Dump,
    /// JSONL reports from `REPLAY_INPUT_PATH`, one after another.
    Replay,
}

impl RunMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "live" | "stdin" => Some(Self::Live),
            "dump" | "export" => Some(Self::Dump),
            "replay" => Some(Self::Replay),
            _ => None,
        }
    }

    fn from_env() -> Self {
        let raw = std::env::var("RUN_MODE").unwrap_or_default();
        Self::parse(&raw).unwrap_or_else(|| {
            warn!("Unknown RUN_MODE {raw:?}; falling back to live");
            Self::Live
        })
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Live => "live",
            Self::Dump => "dump",
            Self::Replay => "replay",
        })
    }
}

pub async fn run_from_env() -> Result<()> {
    let mode = RunMode::from_env();
    info!("Run mode: {mode}");
    match mode {
        RunMode::Live => live::run().await,
        RunMode::Dump => dump::run().await,
        RunMode::Replay => replay::run().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_modes_loosely() {
        assert_eq!(RunMode::parse(""), Some(RunMode::Live));
        assert_eq!(RunMode::parse(" Replay "), Some(RunMode::Replay));
        assert_eq!(RunMode::parse("EXPORT"), Some(RunMode::Dump));
        assert_eq!(RunMode::parse("dump_today"), None);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for mode in [RunMode::Live, RunMode::Dump, RunMode::Replay] {
            assert_eq!(RunMode::parse(&mode.to_string()), Some(mode));
        }
    }
}
