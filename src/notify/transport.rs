use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::warn;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushError, WebPushMessage,
    WebPushMessageBuilder,
};

use crate::config::PushConfig;
use crate::models::PushSubscription;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The push service no longer knows the endpoint (404/410).
    #[error("endpoint gone ({status})")]
    Gone { status: u16 },

    #[error("push service returned {status}")]
    Rejected { status: u16 },

    /// The payload could not be encrypted or signed for this subscription.
    #[error("could not seal push message: {0}")]
    Seal(String),

    #[error("push request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl DeliveryError {
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }
}

impl From<WebPushError> for DeliveryError {
    fn from(e: WebPushError) -> Self {
        Self::Seal(e.to_string())
    }
}

/// Delivers an opaque payload to one push endpoint.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &str) -> Result<(), DeliveryError>;
}

/// Web Push delivery: the payload is encrypted to the subscription's keys
/// (aes128gcm) and signed with the VAPID key when one is configured.
pub struct HttpPushTransport {
    client: Client,
    ttl_secs: u32,
    urgency: String,
    vapid_private_key: Option<String>,
    subject: Option<String>,
}

impl HttpPushTransport {
    /// # Errors
    ///
    /// [`DeliveryError::Seal`] when the configured VAPID key does not decode.
    pub fn new(config: &PushConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        match &config.vapid_private_key {
            Some(key) => {
                VapidSignatureBuilder::from_base64_no_sub(key)?;
            }
            None => warn!("no VAPID key configured; most push services will reject deliveries"),
        }

        Ok(Self {
            client,
            ttl_secs: config.ttl_secs,
            urgency: config.urgency.clone(),
            vapid_private_key: config.vapid_private_key.clone(),
            subject: config.subject.clone(),
        })
    }

    /// Encrypts and signs `payload` for one subscription.
    fn seal(&self, subscription: &PushSubscription, payload: &str) -> Result<WebPushMessage, DeliveryError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            subscription.keys.p256dh.as_str(),
            subscription.keys.auth.as_str(),
        );

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl_secs);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

        if let Some(key) = &self.vapid_private_key {
            let mut signature = VapidSignatureBuilder::from_base64(key, &info)?;
            if let Some(subject) = &self.subject {
                signature.add_claim("sub", subject.as_str());
            }
            builder.set_vapid_signature(signature.build()?);
        }

        Ok(builder.build()?)
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn send(&self, subscription: &PushSubscription, payload: &str) -> Result<(), DeliveryError> {
        let message = self.seal(subscription, payload)?;

        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", self.ttl_secs.to_string())
            .header("Urgency", self.urgency.as_str());
        if let Some(sealed) = message.payload {
            request = request
                .header(CONTENT_ENCODING, sealed.content_encoding.to_str())
                .header(CONTENT_TYPE, "application/octet-stream");
            for (name, value) in sealed.crypto_headers {
                request = request.header(name, value);
            }
            request = request.body(sealed.content);
        }

        let status = request.send().await?.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            Err(DeliveryError::Gone {
                status: status.as_u16(),
            })
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
