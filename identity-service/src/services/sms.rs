use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::config::SmsConfig;

const VONAGE_API_URL: &str = "https://rest.nexmo.com/sms/json";

#[async_trait]
pub trait SmsProvider: Send + Sync {
    async fn send(&self, to: &str, text: &str) -> Result<(), anyhow::Error>;
}

pub struct VonageSmsProvider {
    api_key: String,
    api_secret: Secret<String>,
    from: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct VonageRequest<'a> {
    api_key: &'a str,
    api_secret: &'a str,
    from: &'a str,
    to: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct VonageResponse {
    #[serde(default)]
    messages: Vec<VonageMessage>,
}

#[derive(Debug, Deserialize)]
struct VonageMessage {
    status: String,
    #[serde(rename = "message-id", default)]
    message_id: Option<String>,
    #[serde(rename = "error-text", default)]
    error_text: Option<String>,
}

impl VonageSmsProvider {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            from: config.from.clone(),
            client: Client::new(),
        }
    }
}

#[async_trait]
impl SmsProvider for VonageSmsProvider {
    async fn send(&self, to: &str, text: &str) -> Result<(), anyhow::Error> {
        // Vonage expects digits only, without the leading +
        let normalized_phone = to
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>();

        if normalized_phone.is_empty() {
            return Err(anyhow::anyhow!("Phone number is empty"));
        }

        let request = VonageRequest {
            api_key: &self.api_key,
            api_secret: self.api_secret.expose_secret(),
            from: &self.from,
            to: &normalized_phone,
            text,
        };

        let response = self
            .client
            .post(VONAGE_API_URL)
            .form(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to Vonage: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Vonage API returned error status {}: {}",
                status,
                body
            ));
        }

        let vonage_response: VonageResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse Vonage response: {}", e))?;

        let message = vonage_response
            .messages
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Vonage response contained no messages"))?;

        // "0" is the only success status
        if message.status != "0" {
            return Err(anyhow::anyhow!(
                "Vonage error {}: {}",
                message.status,
                message.error_text.unwrap_or_default()
            ));
        }

        tracing::info!(
            to = %to,
            message_id = ?message.message_id,
            "SMS sent successfully via Vonage"
        );

        Ok(())
    }
}

/// Mock SMS provider for testing
#[derive(Default)]
pub struct MockSmsProvider {
    pub sent: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
}

impl MockSmsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }

    /// Text of the most recent message sent to `to`.
    pub fn last_text(&self, to: &str) -> Option<String> {
        self.sent.lock().ok().and_then(|sent| {
            sent.iter()
                .rev()
                .find(|(number, _)| number == to)
                .map(|(_, text)| text.clone())
        })
    }
}

#[async_trait]
impl SmsProvider for MockSmsProvider {
    async fn send(&self, to: &str, text: &str) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock SMS gateway outage"));
        }

        tracing::info!(to = %to, body_length = text.len(), "[MOCK] SMS would be sent");

        self.sent
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock SMS mutex poisoned: {}", e))?
            .push((to.to_string(), text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vonage_failure_status_is_parsed() {
        let body = r#"{"message-count":"1","messages":[{"status":"4","error-text":"Bad Credentials"}]}"#;
        let parsed: VonageResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.messages[0].status, "4");
        assert_eq!(parsed.messages[0].error_text.as_deref(), Some("Bad Credentials"));
    }

    #[tokio::test]
    async fn mock_records_messages() {
        let mock = MockSmsProvider::new();
        mock.send("+15550100", "code 123456").await.unwrap();
        assert_eq!(mock.send_count(), 1);
        assert_eq!(mock.last_text("+15550100").as_deref(), Some("code 123456"));

        mock.set_failing(true);
        assert!(mock.send("+15550100", "again").await.is_err());
        assert_eq!(mock.send_count(), 1);
    }
}
