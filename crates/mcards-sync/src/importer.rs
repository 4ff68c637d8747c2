//! Transactional import orchestration: snapshot -> reconcile every selected set -> cleanup.

use chrono::{DateTime, Utc};
use mcards_core::SetSelection;
use mcards_mtgjson::Vocabulary;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::cache::LookupCache;
use crate::cleanup::{run_cleanup, CleanupReport};
use crate::db::CatalogCounts;
use crate::error::ImportError;
use crate::reconcile::{Reconciler, SetReport};
use crate::source::SnapshotSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub foreign_printings: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            foreign_printings: true,
        }
    }
}

/// Net row deltas (after minus before) plus tracked anomalies for one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub selection: SetSelection,
    pub sets_processed: usize,
    pub added: CatalogCounts,
    pub tokens_skipped: usize,
    pub unmapped_rarities: usize,
    pub skipped_foreign_names: usize,
    pub cleanup: CleanupReport,
    pub sets: Vec<SetReport>,
}

pub struct Importer {
    pool: SqlitePool,
    source: Box<dyn SnapshotSource>,
    vocabulary: Vocabulary,
    options: ImportOptions,
}

impl Importer {
    pub fn new(pool: SqlitePool, source: Box<dyn SnapshotSource>, vocabulary: Vocabulary) -> Self {
        Self {
            pool,
            source,
            vocabulary,
            options: ImportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All-or-nothing: any error drops the open transaction, which rolls it back.
    pub async fn import_cards(&self, selection: &SetSelection) -> Result<ImportSummary, ImportError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("import_cards", %run_id, source = %self.source.describe());
        self.run(run_id, selection).instrument(span).await
    }

    async fn run(&self, run_id: Uuid, selection: &SetSelection) -> Result<ImportSummary, ImportError> {
        let started_at = Utc::now();
        let snapshot = self.source.load().await?;
        info!(sets_in_snapshot = snapshot.len(), "snapshot loaded");

        let mut tx = self.pool.begin().await?;
        let before = CatalogCounts::load(&mut *tx).await?;

        let mut cache = LookupCache::new(selection.clone());
        let reconciler = Reconciler::new(&self.vocabulary, self.options.foreign_printings);
        let mut sets = Vec::new();
        for (code, raw) in snapshot.selected(selection) {
            let set = self.vocabulary.extract_set(code, raw)?;
            sets.push(reconciler.reconcile_set(&mut *tx, &mut cache, &set).await?);
        }

        let cleanup = run_cleanup(&mut *tx, &self.vocabulary, selection).await?;
        let after = CatalogCounts::load(&mut *tx).await?;
        tx.commit().await?;

        let summary = ImportSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            selection: selection.clone(),
            sets_processed: sets.len(),
            added: after.delta_since(&before),
            tokens_skipped: sets.iter().map(|s| s.tokens_skipped).sum(),
            unmapped_rarities: sets.iter().map(|s| s.unmapped_rarities).sum(),
            skipped_foreign_names: sets.iter().map(|s| s.skipped_foreign_names).sum(),
            cleanup,
            sets,
        };
        info!(
            sets_processed = summary.sets_processed,
            sets_added = summary.added.sets,
            cards_added = summary.added.cards,
            printings_added = summary.added.printings,
            "import committed"
        );
        Ok(summary)
    }
}
