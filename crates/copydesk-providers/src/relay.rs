use std::time::Duration;

use async_trait::async_trait;
use copydesk_core::config::PublisherConfig;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::provider::Publisher;
use crate::types::{AccountCredentials, PublishReceipt, PublishRequest};

/// Hands posts to an external publish relay over HTTP.
///
/// The relay owns the browser automation against the target platform; this
/// side only ships the content, the image paths and the account's cookies.
pub struct RelayPublisher {
    client: reqwest::Client,
    config: PublisherConfig,
}

impl RelayPublisher {
    pub fn new(config: PublisherConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Publisher for RelayPublisher {
    fn name(&self) -> &str {
        "relay"
    }

    async fn publish(
        &self,
        req: &PublishRequest,
        credentials: &AccountCredentials,
    ) -> Result<PublishReceipt> {
        let body = serde_json::json!({
            "content": req,
            "account": credentials,
        });

        debug!(content_id = %req.content_id, kind = %req.content_kind, "sending to publish relay");

        let mut call = self.client.post(&self.config.endpoint).json(&body);
        if let Some(token) = &self.config.token {
            call = call.bearer_auth(token);
        }
        let resp = call.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ProviderError::Unavailable(format!("publish relay unreachable: {e}"))
            } else {
                ProviderError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "publish relay error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let reply: RelayReply = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(reply.into())
    }
}

#[derive(Deserialize)]
struct RelayReply {
    success: bool,
    url: Option<String>,
    #[serde(default)]
    message: String,
}

impl From<RelayReply> for PublishReceipt {
    fn from(r: RelayReply) -> Self {
        PublishReceipt {
            success: r.success,
            url: r.url,
            message: r.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_without_message_parses() {
        let reply: RelayReply = serde_json::from_str(r#"{"success":false,"url":null}"#).unwrap();
        let receipt: PublishReceipt = reply.into();
        assert!(!receipt.success);
        assert!(receipt.message.is_empty());
    }
}
