//! Snapshot transport: HTTP fetch with a fallback endpoint, archive unpacking, JSON decoding.

use std::io::{Cursor, Read};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "mcards-storage";

pub const MTGJSON_URL: &str = "https://mtgjson.com/json/AllSets-x.json.zip";
pub const FALLBACK_MTGJSON_URL: &str = "http://mtgjson.com/json/AllSets-x.json.zip";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("reading archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("found {0} files in the snapshot archive, expected exactly one")]
    UnexpectedEntryCount(usize),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("decoding snapshot json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("snapshot top level must be an object of sets")]
    NotAnObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Only a failure to reach the primary endpoint moves on to the fallback.
pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                url: final_url.clone(),
                source,
            })?
            .to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }

    /// Fetch `primary`; a connection failure is retried exactly once against `fallback`.
    pub async fn fetch_with_fallback(
        &self,
        primary: &str,
        fallback: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("snapshot_fetch", primary, fallback);
        async move {
            match self.fetch_bytes(primary).await {
                Ok(resp) => Ok(resp),
                Err(FetchError::Request { url, source })
                    if classify_reqwest_error(&source) == RetryDisposition::Retryable =>
                {
                    warn!(%url, error = %source, "primary endpoint unreachable, trying fallback");
                    self.fetch_bytes(fallback).await
                }
                Err(err) => Err(err),
            }
        }
        .instrument(span)
        .await
    }
}

/// The snapshot archive must hold exactly one file; its bytes are returned.
pub fn extract_single_entry(archive_bytes: &[u8]) -> Result<Vec<u8>, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))?;
    if archive.len() != 1 {
        return Err(FetchError::UnexpectedEntryCount(archive.len()));
    }
    let mut entry = archive.by_index(0)?;
    let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut data).map_err(|source| FetchError::Io {
        path: entry.name().to_string(),
        source,
    })?;
    info!(entry = entry.name(), bytes = data.len(), "unpacked snapshot archive");
    Ok(data)
}

pub fn decode_json_object(bytes: &[u8]) -> Result<Map<String, JsonValue>, FetchError> {
    match serde_json::from_slice::<JsonValue>(bytes)? {
        JsonValue::Object(map) => Ok(map),
        _ => Err(FetchError::NotAnObject),
    }
}

pub async fn read_archive_file(path: impl AsRef<Path>) -> Result<Vec<u8>, FetchError> {
    let path = path.as_ref();
    fs::read(path).await.map_err(|source| FetchError::Io {
        path: path.display().to_string(),
        source,
    })
}
