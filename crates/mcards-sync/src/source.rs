//! Where the raw snapshot comes from.

use std::path::PathBuf;

use async_trait::async_trait;
use mcards_mtgjson::RawSnapshot;
use mcards_storage::{decode_json_object, extract_single_entry, read_archive_file, HttpFetcher};

use crate::error::ImportError;

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    fn describe(&self) -> String;

    async fn load(&self) -> Result<RawSnapshot, ImportError>;
}

fn snapshot_from_archive(archive: &[u8]) -> Result<RawSnapshot, ImportError> {
    let document = extract_single_entry(archive)?;
    Ok(RawSnapshot::new(decode_json_object(&document)?))
}

/// Downloads the zipped document, falling back to a second endpoint once.
pub struct HttpSnapshotSource {
    fetcher: HttpFetcher,
    primary_url: String,
    fallback_url: String,
}

impl HttpSnapshotSource {
    pub fn new(fetcher: HttpFetcher, primary_url: impl Into<String>, fallback_url: impl Into<String>) -> Self {
        Self {
            fetcher,
            primary_url: primary_url.into(),
            fallback_url: fallback_url.into(),
        }
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    fn describe(&self) -> String {
        self.primary_url.clone()
    }

    async fn load(&self) -> Result<RawSnapshot, ImportError> {
        let resp = self
            .fetcher
            .fetch_with_fallback(&self.primary_url, &self.fallback_url)
            .await?;
        snapshot_from_archive(&resp.body)
    }
}

/// A previously downloaded archive on disk.
pub struct ArchiveFileSource {
    path: PathBuf,
}

impl ArchiveFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for ArchiveFileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn load(&self) -> Result<RawSnapshot, ImportError> {
        let archive = read_archive_file(&self.path).await?;
        snapshot_from_archive(&archive)
    }
}

/// An already decoded snapshot held in memory.
pub struct StaticSnapshotSource {
    snapshot: RawSnapshot,
}

impl StaticSnapshotSource {
    pub fn new(snapshot: RawSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshotSource {
    fn describe(&self) -> String {
        format!("in-memory snapshot ({} sets)", self.snapshot.len())
    }

    async fn load(&self) -> Result<RawSnapshot, ImportError> {
        Ok(self.snapshot.clone())
    }
}
