//! reqwest-backed transport.

use super::{Destination, DownloadTransport, Payload};
use crate::config::{RetryConfig, TransportConfig};
use crate::error::TransportError;
use crate::retry::with_retry;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// HTTP transport with per-request timeout, user agent and retry
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_concurrent: usize,
    retry: RetryConfig,
}

impl HttpTransport {
    /// Build a transport from configuration
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            max_concurrent: config.max_concurrent,
            retry: config.retry.clone(),
        })
    }

    async fn fetch_once(
        &self,
        url: &str,
        destination: &Destination,
    ) -> std::result::Result<Payload, TransportError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        match destination {
            Destination::Memory => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| TransportError::from_reqwest(url, e))?;
                Ok(Payload::Bytes(body.to_vec()))
            }
            Destination::File(path) => {
                let size = stream_to_file(url, response, path).await?;
                Ok(Payload::File {
                    path: path.clone(),
                    size,
                })
            }
        }
    }
}

async fn stream_to_file(
    url: &str,
    mut response: reqwest::Response,
    path: &Path,
) -> std::result::Result<u64, TransportError> {
    let write_failed = |source| TransportError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_failed)?;
    }

    let mut file = tokio::fs::File::create(path).await.map_err(write_failed)?;
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| TransportError::from_reqwest(url, e))?
    {
        file.write_all(&chunk).await.map_err(write_failed)?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(write_failed)?;
    Ok(written)
}

#[async_trait]
impl DownloadTransport for HttpTransport {
    async fn fetch(
        &self,
        url: &str,
        destination: &Destination,
    ) -> std::result::Result<Payload, TransportError> {
        with_retry(&self.retry, || self.fetch_once(url, destination)).await
    }

    fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
