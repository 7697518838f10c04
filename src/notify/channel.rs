//! Outbound messaging channels.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use tracing::info;

use crate::error::{IncidentError, Result};

/// Single-operation seam over the messaging provider.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn send(&self, to: &str, from: &str, body: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Twilio WhatsApp
// ---------------------------------------------------------------------------

pub struct TwilioChannel {
    http: HttpClient,
    account_sid: String,
    auth_token: String,
    api_base: String,
}

impl TwilioChannel {
    pub fn new(http: HttpClient, account_sid: String, auth_token: String) -> Self {
        Self {
            http,
            account_sid,
            auth_token,
            api_base: "https://api.twilio.com".into(),
        }
    }
}

#[async_trait]
impl MessageChannel for TwilioChannel {
    async fn send(&self, to: &str, from: &str, body: &str) -> Result<()> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        );
        let form = [
            ("To", format!("whatsapp:{to}")),
            ("From", format!("whatsapp:{from}")),
            ("Body", body.to_string()),
        ];
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| IncidentError::TransientIntegration(format!("send to {to}: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let raw = resp.text().await.unwrap_or_default();
            return Err(IncidentError::TransientIntegration(format!(
                "Messages.create failed: {status} body={raw}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dry run
// ---------------------------------------------------------------------------

/// Logs messages instead of sending them. Used when no credentials are
/// configured.
pub struct LogChannel;

#[async_trait]
impl MessageChannel for LogChannel {
    async fn send(&self, to: &str, from: &str, body: &str) -> Result<()> {
        info!("[dry-run] {from} → {to}: {body}");
        Ok(())
    }
}
