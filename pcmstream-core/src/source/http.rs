//! HTTP polling source.
//!
//! Each `fetch_chunk` issues one request and returns the raw response body.
//! The control panel this engine was built for serves the current block on
//! `POST /ajax?option=14`, so `POST` is the default method.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, StreamError};
use crate::source::ChunkSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Full chunk endpoint, query string included.
    pub url: String,
    pub method: RequestMethod,
    /// Per-request timeout. A hung request would otherwise stall the loop forever.
    pub timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080/ajax?option=14".into(),
            method: RequestMethod::Post,
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct HttpChunkSource {
    client: Client,
    config: HttpSourceConfig,
}

impl HttpChunkSource {
    /// # Errors
    /// Returns `StreamError::Transport` if the HTTP client cannot be built.
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StreamError::Transport(format!("client build: {e}")))?;

        info!(
            url = config.url.as_str(),
            method = ?config.method,
            timeout_ms = config.timeout.as_millis() as u64,
            "http chunk source ready"
        );

        Ok(Self { client, config })
    }
}

impl ChunkSource for HttpChunkSource {
    fn fetch_chunk(&mut self) -> Result<Vec<u8>> {
        let request = match self.config.method {
            RequestMethod::Get => self.client.get(&self.config.url),
            RequestMethod::Post => self.client.post(&self.config.url),
        };

        let response = request
            .send()
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .map_err(|e| StreamError::Transport(format!("reading body: {e}")))?;
        debug!(bytes = body.len(), "chunk received");
        Ok(body.to_vec())
    }
}
