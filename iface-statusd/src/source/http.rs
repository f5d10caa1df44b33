use std::collections::BTreeMap;
use std::time::Duration;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use shared::types::ServiceStatus;
use super::{FetchError, StatusSource};

/// Fetches a JSON status map from the router control plane over HTTP.
///
/// The response body is an object keyed by interface name:
/// `{"eth0": {"iface_name": "eth0", "state": "active", "message": null}}`.
pub struct HttpStatusSource {
    client: Client,
    url: Url,
}

impl HttpStatusSource {
    pub fn new(status_url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(status_url)
            .with_context(|| format!("Invalid status URL: {}", status_url))?;

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl StatusSource for HttpStatusSource {
    async fn fetch_all_statuses(&self) -> Result<BTreeMap<String, ServiceStatus>, FetchError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(classify)?;

        let body = response.bytes().await.map_err(classify)?;
        decode_statuses(&body)
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else if err.is_decode() {
        FetchError::Decode(err.to_string())
    } else {
        FetchError::Transport(err.to_string())
    }
}

/// Parse a status map response body
pub fn decode_statuses(body: &[u8]) -> Result<BTreeMap<String, ServiceStatus>, FetchError> {
    serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))
}
