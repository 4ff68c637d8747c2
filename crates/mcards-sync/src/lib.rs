//! Reconciliation engine that mirrors MTGJSON snapshots into a relational store.

pub mod cache;
pub mod cleanup;
pub mod db;
mod error;
pub mod importer;
pub mod reconcile;
pub mod source;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use mcards_core::SetSelection;
use mcards_mtgjson::Vocabulary;
use mcards_storage::{HttpClientConfig, HttpFetcher, FALLBACK_MTGJSON_URL, MTGJSON_URL};

pub use cache::LookupCache;
pub use db::{CatalogCounts, Entity};
pub use error::ImportError;
pub use importer::{ImportOptions, ImportSummary, Importer};
pub use reconcile::{Reconciler, SetReport};
pub use source::{ArchiveFileSource, HttpSnapshotSource, SnapshotSource, StaticSnapshotSource};

pub const CRATE_NAME: &str = "mcards-sync";

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub database_url: String,
    pub mtgjson_url: String,
    pub fallback_url: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub archive_path: Option<PathBuf>,
    pub vocabulary_path: Option<PathBuf>,
    pub foreign_printings: bool,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| db::DEFAULT_DATABASE_URL.to_string()),
            mtgjson_url: lookup("MCARDS_MTGJSON_URL").unwrap_or_else(|| MTGJSON_URL.to_string()),
            fallback_url: lookup("MCARDS_MTGJSON_FALLBACK_URL")
                .unwrap_or_else(|| FALLBACK_MTGJSON_URL.to_string()),
            user_agent: lookup("MCARDS_USER_AGENT")
                .unwrap_or_else(|| format!("mcards/{}", env!("CARGO_PKG_VERSION"))),
            http_timeout_secs: lookup("MCARDS_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
            archive_path: lookup("MCARDS_ARCHIVE_PATH")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            vocabulary_path: lookup("MCARDS_VOCABULARY")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            foreign_printings: lookup("MCARDS_FOREIGN_PRINTINGS")
                .map(|v| parse_switch(&v))
                .unwrap_or(true),
        }
    }

    pub fn load_vocabulary(&self) -> Result<Vocabulary> {
        match &self.vocabulary_path {
            Some(path) => Vocabulary::from_path(path),
            None => Ok(Vocabulary::mtgjson_v3()),
        }
    }

    pub fn snapshot_source(&self) -> Result<Box<dyn SnapshotSource>> {
        if let Some(path) = &self.archive_path {
            return Ok(Box::new(ArchiveFileSource::new(path.clone())));
        }
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        })?;
        Ok(Box::new(HttpSnapshotSource::new(
            fetcher,
            self.mtgjson_url.clone(),
            self.fallback_url.clone(),
        )))
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            foreign_printings: self.foreign_printings,
        }
    }
}

/// Anything but an explicit "off" spelling keeps the switch on.
fn parse_switch(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Connects, migrates, and runs one import described by `config`.
pub async fn import_cards_with_config(
    config: &ImportConfig,
    selection: &SetSelection,
) -> Result<ImportSummary> {
    let pool = db::connect(&config.database_url)
        .await
        .context("connecting to catalog store")?;
    db::migrate(&pool).await.context("migrating catalog store")?;
    let importer = Importer::new(pool, config.snapshot_source()?, config.load_vocabulary()?)
        .with_options(config.import_options());
    let summary = importer.import_cards(selection).await?;
    importer.pool().close().await;
    Ok(summary)
}

pub async fn import_cards_from_env(selection: &SetSelection) -> Result<ImportSummary> {
    import_cards_with_config(&ImportConfig::from_env(), selection).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn config_defaults_without_environment() {
        let config = ImportConfig::from_lookup(|_| None);
        assert_eq!(config.database_url, db::DEFAULT_DATABASE_URL);
        assert_eq!(config.mtgjson_url, MTGJSON_URL);
        assert_eq!(config.fallback_url, FALLBACK_MTGJSON_URL);
        assert_eq!(config.http_timeout_secs, 120);
        assert!(config.foreign_printings);
        assert!(config.archive_path.is_none());
        assert_eq!(config.load_vocabulary().expect("vocabulary"), Vocabulary::mtgjson_v3());
    }

    #[test]
    fn switch_values_are_case_insensitive() {
        for off in ["0", "false", "FALSE", "no", "NO", "Off", " off "] {
            assert!(!parse_switch(off), "{off:?} should disable");
        }
        for on in ["1", "true", "yes", "on", ""] {
            assert!(parse_switch(on), "{on:?} should enable");
        }
        let config = ImportConfig::from_lookup(|key| {
            (key == "MCARDS_FOREIGN_PRINTINGS").then(|| "No".to_string())
        });
        assert!(!config.foreign_printings);
    }

    #[test]
    fn config_reads_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "sqlite::memory:"),
            ("MCARDS_HTTP_TIMEOUT_SECS", "5"),
            ("MCARDS_FOREIGN_PRINTINGS", "false"),
            ("MCARDS_ARCHIVE_PATH", "/tmp/AllSets-x.json.zip"),
            ("MCARDS_VOCABULARY", ""),
        ]);
        let config = ImportConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.http_timeout_secs, 5);
        assert!(!config.import_options().foreign_printings);
        assert_eq!(config.archive_path, Some(PathBuf::from("/tmp/AllSets-x.json.zip")));
        assert!(config.vocabulary_path.is_none());
        assert_eq!(
            config.snapshot_source().expect("source").describe(),
            "/tmp/AllSets-x.json.zip"
        );
    }
}
