//! Outbound email. Delivery itself belongs to a relay service; this module
//! only builds the request and reports whether the relay accepted it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StatsError, StatsResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Hand `message` to the delivery channel. Errors mean it was not accepted.
    async fn deliver(&self, message: &EmailMessage) -> StatsResult<()>;
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    message: &'a EmailMessage,
}

/// Posts messages as JSON to an HTTP mail relay
pub struct RelayMailer {
    client: reqwest::Client,
    url: String,
    from: String,
}

impl RelayMailer {
    pub fn new(url: &str, from: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building mail relay client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for RelayMailer {
    async fn deliver(&self, message: &EmailMessage) -> StatsResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&RelayRequest {
                from: &self.from,
                message,
            })
            .send()
            .await
            .map_err(|e| StatsError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StatsError::Delivery(format!("relay returned {} - {}", status, text)));
        }

        info!(to = %message.to, subject = %message.subject, "email accepted by relay");
        Ok(())
    }
}

/// Logs messages instead of sending them. Used when no relay is configured.
///
/// Every delivery fails with [`StatsError::Delivery`], so schedules stay
/// pending until a relay is available.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, message: &EmailMessage) -> StatsResult<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "email not sent (no relay configured)"
        );
        debug!(body = %message.text);
        Err(StatsError::Delivery("no mail relay configured".into()))
    }
}
