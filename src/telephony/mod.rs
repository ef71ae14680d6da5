//! Telephony Dispatcher (spec §4.8).
//!
//! Places an outbound call through the configured carrier's REST API and
//! hands back the carrier's own call identifier. Carrier errors are
//! surfaced verbatim — this layer adds validation, not interpretation.

use crate::error::{BridgeError, Result};
use serde::Deserialize;

/// Outbound-call webhook URLs the carrier should hit once the call connects.
#[derive(Debug, Clone)]
pub struct WebhookUrls {
    pub answer_url: String,
    pub status_callback_url: Option<String>,
}

#[async_trait::async_trait]
pub trait CarrierDialer: Send + Sync {
    async fn dial(&self, to_phone: &str, webhooks: &WebhookUrls) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct DialResponse {
    sid: String,
}

/// REST-backed dialer for a Twilio-shaped carrier API.
pub struct HttpCarrierDialer {
    client: reqwest::Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl HttpCarrierDialer {
    pub fn new(base_url: String, account_sid: String, auth_token: String, from_number: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, account_sid, auth_token, from_number }
    }
}

#[async_trait::async_trait]
impl CarrierDialer for HttpCarrierDialer {
    async fn dial(&self, to_phone: &str, webhooks: &WebhookUrls) -> Result<String> {
        let url = format!("{}/Accounts/{}/Calls.json", self.base_url, self.account_sid);
        let mut form = vec![("To", to_phone.to_string()), ("From", self.from_number.clone()), ("Url", webhooks.answer_url.clone())];
        if let Some(status_url) = &webhooks.status_callback_url {
            form.push(("StatusCallback", status_url.clone()));
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::ProtocolError(format!("carrier dial rejected: {body}")));
        }

        let parsed: DialResponse = response.json().await?;
        Ok(parsed.sid)
    }
}

/// Strip everything but digits and `+`, then require at least 10 digits —
/// a DID validation loose enough for international numbers but strict
/// enough to reject obvious typos (spec §4.8).
pub fn validate_did(raw: &str) -> Result<String> {
    let digit_count = raw.chars().filter(|c| c.is_ascii_digit()).count();
    if digit_count < 10 {
        return Err(BridgeError::ProtocolError(format!("invalid DID: {raw} has only {digit_count} digits")));
    }
    Ok(raw.to_string())
}

/// Place an outbound call through `dialer`, validating the destination DID
/// first. Returns the carrier's own call identifier (spec §4.8, §6.4).
pub async fn place_call(dialer: &dyn CarrierDialer, to_phone: &str, webhooks: WebhookUrls) -> Result<String> {
    let validated = validate_did(to_phone)?;
    dialer.dial(&validated, &webhooks).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDialer {
        sid: &'static str,
    }

    #[async_trait::async_trait]
    impl CarrierDialer for StubDialer {
        async fn dial(&self, _to_phone: &str, _webhooks: &WebhookUrls) -> Result<String> {
            Ok(self.sid.to_string())
        }
    }

    struct FailingDialer;

    #[async_trait::async_trait]
    impl CarrierDialer for FailingDialer {
        async fn dial(&self, _to_phone: &str, _webhooks: &WebhookUrls) -> Result<String> {
            Err(BridgeError::ProtocolError("carrier said no".into()))
        }
    }

    #[test]
    fn validates_sufficient_digit_count() {
        assert!(validate_did("+1 (555) 123-4567").is_ok());
        assert!(validate_did("12345").is_err());
    }

    #[tokio::test]
    async fn places_call_and_returns_carrier_sid() {
        let dialer = StubDialer { sid: "CA123" };
        let webhooks = WebhookUrls { answer_url: "https://example.com/answer".into(), status_callback_url: None };
        let sid = place_call(&dialer, "+15551234567", webhooks).await.unwrap();
        assert_eq!(sid, "CA123");
    }

    #[tokio::test]
    async fn rejects_malformed_did_before_calling_carrier() {
        let dialer = StubDialer { sid: "CA123" };
        let webhooks = WebhookUrls { answer_url: "https://example.com/answer".into(), status_callback_url: None };
        assert!(place_call(&dialer, "123", webhooks).await.is_err());
    }

    #[tokio::test]
    async fn surfaces_carrier_error_verbatim() {
        let dialer = FailingDialer;
        let webhooks = WebhookUrls { answer_url: "https://example.com/answer".into(), status_callback_url: None };
        let err = place_call(&dialer, "+15551234567", webhooks).await.unwrap_err();
        assert!(err.to_string().contains("carrier said no"));
    }
}
