use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{CigraphError, Result};

/// HTTP capability used for `remote:` and `template:` includes.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Fetches a URL as text. Non-2xx responses surface as errors.
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Production fetcher backed by reqwest.
pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(timeout_secs: Option<u64>) -> Result<Self> {
        let mut builder = Client::builder().user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| CigraphError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CigraphError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Canned-response fetcher for engine tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockHttpFetcher {
    responses: std::collections::HashMap<String, String>,
}

#[cfg(test)]
impl MockHttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response(&mut self, url: &str, body: &str) {
        self.responses.insert(url.to_string(), body.to_string());
    }
}

#[cfg(test)]
#[async_trait]
impl HttpFetcher for MockHttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| CigraphError::Http {
                status: 404,
                url: url.to_string(),
            })
    }
}
