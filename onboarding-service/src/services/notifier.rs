//! Outbound OTP delivery.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use crate::{config::NotifierConfig, models::OtpPurpose, utils::Identifier};

#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn send_otp(
        &self,
        destination: &Identifier,
        code: &str,
        purpose: OtpPurpose,
        expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Serialize)]
struct OtpMessage<'a> {
    to: &'a str,
    channel: &'a str,
    template: &'a str,
    code: &'a str,
    expires_in: u64,
}

/// Posts codes to an SMS/WhatsApp gateway.
pub struct HttpOtpNotifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    channel: String,
}

impl HttpOtpNotifier {
    pub fn new(config: &NotifierConfig, endpoint: &str) -> Result<Self, anyhow::Error> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()?;

        tracing::info!(endpoint = %endpoint, channel = %config.channel, "OTP gateway configured");

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            api_key: config.api_key.clone(),
            channel: config.channel.clone(),
        })
    }
}

#[async_trait]
impl OtpNotifier for HttpOtpNotifier {
    #[instrument(skip(self, code), fields(to = %destination, purpose = %purpose))]
    async fn send_otp(
        &self,
        destination: &Identifier,
        code: &str,
        purpose: OtpPurpose,
        expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let channel = if destination.is_phone() {
            self.channel.as_str()
        } else {
            "email"
        };
        let message = OtpMessage {
            to: destination.as_str(),
            channel,
            template: purpose.as_str(),
            code,
            expires_in: expires_in_seconds,
        };

        let mut request = self.client.post(&self.endpoint).json(&message);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OTP gateway returned {}: {}", status, body);
        }

        tracing::info!("OTP delivered to gateway");
        Ok(())
    }
}

/// Development notifier: records that a code went out without revealing it.
pub struct LogOtpNotifier;

#[async_trait]
impl OtpNotifier for LogOtpNotifier {
    async fn send_otp(
        &self,
        destination: &Identifier,
        _code: &str,
        purpose: OtpPurpose,
        expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        tracing::info!(
            to = %destination,
            purpose = %purpose,
            expires_in = expires_in_seconds,
            "OTP delivery skipped, no gateway configured"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentOtp {
    pub destination: String,
    pub code: String,
    pub purpose: OtpPurpose,
}

/// Captures every delivery in memory.
#[derive(Default)]
pub struct MockOtpNotifier {
    pub sent: Mutex<Vec<SentOtp>>,
}

impl MockOtpNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_for(&self, destination: &str) -> Option<SentOtp> {
        self.sent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|m| m.destination == destination)
            .cloned()
    }

    /// Polls until a delivery for `destination` shows up. Delivery runs on a
    /// spawned task, so callers may need to wait briefly.
    pub async fn wait_for(&self, destination: &str) -> Option<SentOtp> {
        for _ in 0..50 {
            if let Some(sent) = self.last_for(destination) {
                return Some(sent);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        None
    }
}

#[async_trait]
impl OtpNotifier for MockOtpNotifier {
    async fn send_otp(
        &self,
        destination: &Identifier,
        code: &str,
        purpose: OtpPurpose,
        _expires_in_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock notifier mutex poisoned: {}", e))?
            .push(SentOtp {
                destination: destination.as_str().to_string(),
                code: code.to_string(),
                purpose,
            });
        Ok(())
    }
}
