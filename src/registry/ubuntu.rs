use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::USER_AGENT;

/// Source of Debian copyright files.
#[async_trait]
pub trait CopyrightSource: Send + Sync {
    /// `Ok(None)` when the server answered with a non-success status.
    async fn fetch(&self, url: &str) -> Result<Option<String>>;
}

pub struct UbuntuChangelogs {
    client: Client,
}

impl UbuntuChangelogs {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CopyrightSource for UbuntuChangelogs {
    async fn fetch(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        if !response.status().is_success() {
            debug!("Failed to download {}. Got status code: {}", url, response.status());
            return Ok(None);
        }

        Ok(Some(response.text().await?))
    }
}
