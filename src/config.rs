//! Environment-driven configuration.

use anyhow::{Result, anyhow};
use reqwest::Client as HttpClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::notify::channel::{LogChannel, MessageChannel, TwilioChannel};

pub fn must_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("Missing env var {key}"))
}

pub fn parse_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes"))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

pub fn db_path() -> String {
    std::env::var("DB_PATH").unwrap_or_else(|_| "./water_guardian.sqlite".into())
}

/// Tunables of the incident core.
#[derive(Debug, Clone)]
pub struct EngineCfg {
    pub duplicate_radius_m: f64,
    pub assign_radius_m: f64,
    pub notify_delay: Duration,
    pub country_code: String,
    pub from_number: String,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            duplicate_radius_m: 10.0,
            assign_radius_m: 2000.0,
            notify_delay: Duration::from_millis(1000),
            country_code: "27".into(),
            from_number: "+14155238886".into(),
        }
    }
}

impl EngineCfg {
    /// Construct from environment variables.
    ///
    /// | Env var                | Default        | Purpose                              |
    /// |------------------------|----------------|--------------------------------------|
    /// | `DUPLICATE_RADIUS_M`   | `10`           | Radius for merging duplicate reports |
    /// | `ASSIGN_RADIUS_M`      | `2000`         | Max guardian distance                |
    /// | `NOTIFY_DELAY_MS`      | `1000`         | Pause between fan-out sends          |
    /// | `DEFAULT_COUNTRY_CODE` | `27`           | Region for national phone numbers    |
    /// | `TWILIO_WHATSAPP_FROM` | `+14155238886` | Sender number                        |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            duplicate_radius_m: parse_env::<f64>("DUPLICATE_RADIUS_M")
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.duplicate_radius_m),
            assign_radius_m: parse_env::<f64>("ASSIGN_RADIUS_M")
                .filter(|v| *v > 0.0)
                .unwrap_or(defaults.assign_radius_m),
            notify_delay: parse_env::<u64>("NOTIFY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.notify_delay),
            country_code: std::env::var("DEFAULT_COUNTRY_CODE")
                .map(|v| v.trim().trim_start_matches('+').to_string())
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.country_code),
            from_number: std::env::var("TWILIO_WHATSAPP_FROM").unwrap_or(defaults.from_number),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            notify_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

impl std::fmt::Display for EngineCfg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EngineCfg(duplicate={}m, assign={}m, delay={}ms, cc=+{}, from={})",
            self.duplicate_radius_m,
            self.assign_radius_m,
            self.notify_delay.as_millis(),
            self.country_code,
            self.from_number,
        )
    }
}

/// Pick the messaging channel: Twilio when credentials are present and dry
/// run is off, otherwise a channel that only logs.
pub fn channel_from_env() -> Arc<dyn MessageChannel> {
    if parse_bool_env("MESSAGING_DRY_RUN", false) {
        info!("MESSAGING_DRY_RUN set; messages will only be logged");
        return Arc::new(LogChannel);
    }
    match (must_env("TWILIO_ACCOUNT_SID"), must_env("TWILIO_AUTH_TOKEN")) {
        (Ok(sid), Ok(token)) => Arc::new(TwilioChannel::new(HttpClient::new(), sid, token)),
        _ => {
            warn!("Twilio credentials missing; messages will only be logged");
            Arc::new(LogChannel)
        }
    }
}
