use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{header, Client, Response};
use sha2::Sha256;
use url::Url;

use fis_core::types::{FlightNotification, Partner};

use crate::updater::{NotifyError, StatusUpdater};

pub const HEADER_EVENT_ID: &str = "X-Fis-Event-Id";
pub const HEADER_SIGNATURE: &str = "X-Fis-Signature";

/// HTTP updater that POSTs notifications as JSON to `<base_url>/flight-updates`.
#[derive(Clone)]
pub struct PartnerClient {
    http: Client,
    base_url: Url,
    partner: Partner,
    signing_secret: Option<Arc<[u8]>>,
}

impl PartnerClient {
    /// Creates a client for the given partner endpoint.
    pub fn new(partner: Partner, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            partner,
            signing_secret: None,
        }
    }

    /// Signs every request body with HMAC-SHA256 using `secret`.
    pub fn with_signing_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.signing_secret = Some(Arc::from(secret.into().into_boxed_slice()));
        self
    }

    /// Sends a single notification. The event id doubles as the idempotency key.
    pub async fn send(&self, notification: &FlightNotification) -> Result<(), NotifyError> {
        let url = self.base_url.join("flight-updates")?;
        let body = serde_json::to_vec(notification)?;

        let mut request = self
            .http
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(HEADER_EVENT_ID, &notification.event_id);
        if let Some(secret) = &self.signing_secret {
            request = request.header(HEADER_SIGNATURE, sign(secret, &body)?);
        }

        let response = request.body(body).send().await?;
        ensure_success(response).await
    }
}

#[async_trait]
impl StatusUpdater for PartnerClient {
    fn partner(&self) -> Partner {
        self.partner
    }

    async fn push(&self, notification: &FlightNotification) -> Result<(), NotifyError> {
        self.send(notification).await
    }
}

/// Computes the `sha256=<hex>` signature header value for a payload.
pub fn sign(secret: &[u8], body: &[u8]) -> Result<String, NotifyError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| NotifyError::Signing)?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

async fn ensure_success(response: Response) -> Result<(), NotifyError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(NotifyError::Status { status, body });
    }
    Ok(())
}
