//! Per-set reconciliation of upstream records into Set, Card, tag, and Printing rows.

use std::collections::HashMap;

use indexmap::IndexMap;
use mcards_core::{CardRecord, Rarity, SetSnapshot};
use mcards_mtgjson::{convert_language_name_to_code, Vocabulary};
use serde::Serialize;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::cache::LookupCache;
use crate::db::{RefTable, TagKind};

// Rows per multi-row INSERT, well under SQLite's bind-parameter limit.
const INSERT_CHUNK: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SetReport {
    pub code: String,
    pub set_created: bool,
    pub cards_created: usize,
    pub cards_updated: usize,
    pub tokens_skipped: usize,
    pub printings_created: usize,
    pub printings_unchanged: usize,
    pub foreign_printings_created: usize,
    pub unmapped_rarities: usize,
    pub skipped_foreign_names: usize,
}

/// Every tracked Printing attribute. An exact match on all of them means "unchanged".
#[derive(Debug, Clone, PartialEq, Eq)]
struct PrintingCandidate {
    card_id: i64,
    set_id: i64,
    rarity: Rarity,
    flavor_text: String,
    artist_id: Option<i64>,
    number: String,
    multiverse_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct ForeignName {
    name: String,
    multiverse_id: Option<i64>,
}

#[derive(Debug, Clone)]
struct ForeignPrintingRow {
    base_printing_id: i64,
    language: &'static str,
    name: String,
    multiverse_id: Option<i64>,
}

pub struct Reconciler<'a> {
    vocabulary: &'a Vocabulary,
    foreign_printings: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(vocabulary: &'a Vocabulary, foreign_printings: bool) -> Self {
        Self {
            vocabulary,
            foreign_printings,
        }
    }

    #[instrument(skip_all, fields(code = %set.code))]
    pub async fn reconcile_set(
        &self,
        conn: &mut SqliteConnection,
        cache: &mut LookupCache,
        set: &SetSnapshot,
    ) -> Result<SetReport, sqlx::Error> {
        let mut report = SetReport {
            code: set.code.clone(),
            ..SetReport::default()
        };

        let (set_id, set_created) = cache
            .get_or_create(&mut *conn, RefTable::Set, &set.code, &[("name", set.name.as_str())])
            .await?;
        report.set_created = set_created;

        let create_foreign = self.foreign_printings
            && (set_created || count_foreign_printings(&mut *conn, set_id).await? == 0);

        let mut queued = Vec::new();
        // (card, image id) -> language name -> entry; later records replace earlier ones.
        // Split halves share an image id, so the card is part of the key.
        let mut foreign: IndexMap<(i64, i64), IndexMap<String, ForeignName>> = IndexMap::new();

        for card in &set.cards {
            if self.vocabulary.is_token_layout(&card.layout) {
                report.tokens_skipped += 1;
                continue;
            }

            let (card_id, card_created) = upsert_card(&mut *conn, card).await?;
            if card_created {
                report.cards_created += 1;
            } else {
                report.cards_updated += 1;
                clear_tags(&mut *conn, card_id).await?;
            }
            for (kind, names) in [
                (TagKind::Supertype, &card.supertypes),
                (TagKind::Type, &card.types),
                (TagKind::Subtype, &card.subtypes),
            ] {
                for name in names {
                    let (tag_id, _) = cache
                        .get_or_create(&mut *conn, kind.ref_table(), name, &[])
                        .await?;
                    attach_tag(&mut *conn, kind, card_id, tag_id).await?;
                }
            }

            let artist_id = match &card.artist {
                Some(full_name) => Some(
                    cache
                        .get_or_create(&mut *conn, RefTable::Artist, full_name, &[])
                        .await?
                        .0,
                ),
                None => None,
            };

            if self.vocabulary.lookup_rarity(&card.rarity).is_none() {
                report.unmapped_rarities += 1;
            }
            let candidate = PrintingCandidate {
                card_id,
                set_id,
                rarity: self.vocabulary.parse_rarity(&card.rarity),
                flavor_text: card.flavor.clone(),
                artist_id,
                number: card.number.clone(),
                multiverse_id: card.multiverse_id,
            };

            // A brand-new set cannot already hold a matching printing.
            if set_created {
                queued.push(candidate);
            } else if printing_exists(&mut *conn, &candidate).await? {
                report.printings_unchanged += 1;
            } else {
                insert_printings(&mut *conn, std::slice::from_ref(&candidate)).await?;
                report.printings_created += 1;
            }

            if create_foreign {
                collect_foreign_names(&mut foreign, card_id, card);
            }
        }

        insert_printings(&mut *conn, &queued).await?;
        report.printings_created += queued.len();

        if !foreign.is_empty() {
            let (created, skipped) = self.create_foreign_printings(&mut *conn, set_id, &foreign).await?;
            report.foreign_printings_created = created;
            report.skipped_foreign_names = skipped;
        }

        info!(
            set_created = report.set_created,
            cards_created = report.cards_created,
            printings_created = report.printings_created,
            foreign_printings_created = report.foreign_printings_created,
            "reconciled set"
        );
        Ok(report)
    }

    /// Runs after the set's printings are persisted so base rows resolve by card and image id.
    async fn create_foreign_printings(
        &self,
        conn: &mut SqliteConnection,
        set_id: i64,
        foreign: &IndexMap<(i64, i64), IndexMap<String, ForeignName>>,
    ) -> Result<(usize, usize), sqlx::Error> {
        let image_ids: Vec<i64> = foreign.keys().map(|&(_, image_id)| image_id).collect();
        let bases = base_printings_by_image_id(&mut *conn, set_id, &image_ids).await?;

        let mut skipped = 0usize;
        let mut rows: IndexMap<(i64, &'static str), ForeignPrintingRow> = IndexMap::new();
        for (&(card_id, image_id), entries) in foreign {
            let Some(&base_printing_id) = bases.get(&(card_id, image_id)) else {
                warn!(card_id, image_id, "foreign names without a base printing");
                skipped += entries.len();
                continue;
            };
            for (language, entry) in entries {
                let Some(code) = convert_language_name_to_code(language) else {
                    warn!(%language, image_id, "unrecognized language name, skipping entry");
                    skipped += 1;
                    continue;
                };
                rows.insert(
                    (base_printing_id, code),
                    ForeignPrintingRow {
                        base_printing_id,
                        language: code,
                        name: entry.name.clone(),
                        multiverse_id: entry.multiverse_id,
                    },
                );
            }
        }

        let rows: Vec<ForeignPrintingRow> = rows.into_values().collect();
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO foreign_printings (base_printing_id, language, name, multiverse_id) ",
            );
            builder.push_values(chunk, |mut b, row| {
                b.push_bind(row.base_printing_id)
                    .push_bind(row.language)
                    .push_bind(row.name.clone())
                    .push_bind(row.multiverse_id);
            });
            builder.build().execute(&mut *conn).await?;
        }
        Ok((rows.len(), skipped))
    }
}

/// Upstream repeats the whole block on every printing of a card in a set; one copy is kept.
fn collect_foreign_names(
    foreign: &mut IndexMap<(i64, i64), IndexMap<String, ForeignName>>,
    card_id: i64,
    card: &CardRecord,
) {
    let Some(image_id) = card.multiverse_id else {
        return;
    };
    if card.foreign_names.is_empty() {
        return;
    }
    let entries = card
        .foreign_names
        .iter()
        .map(|entry| {
            (
                entry.language.clone(),
                ForeignName {
                    name: entry.name.clone(),
                    multiverse_id: entry.multiverse_id,
                },
            )
        })
        .collect();
    foreign.insert((card_id, image_id), entries);
}

async fn upsert_card(conn: &mut SqliteConnection, card: &CardRecord) -> Result<(i64, bool), sqlx::Error> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM cards WHERE name = ?")
        .bind(&card.name)
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        Some(id) => {
            sqlx::query(
                "UPDATE cards SET mana_cost = ?, text = ?, power = ?, toughness = ?, loyalty = ? WHERE id = ?",
            )
            .bind(&card.mana_cost)
            .bind(&card.text)
            .bind(&card.power)
            .bind(&card.toughness)
            .bind(card.loyalty)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            Ok((id, false))
        }
        None => {
            let id = sqlx::query(
                "INSERT INTO cards (name, mana_cost, text, power, toughness, loyalty) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&card.name)
            .bind(&card.mana_cost)
            .bind(&card.text)
            .bind(&card.power)
            .bind(&card.toughness)
            .bind(card.loyalty)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();
            Ok((id, true))
        }
    }
}

async fn clear_tags(conn: &mut SqliteConnection, card_id: i64) -> Result<(), sqlx::Error> {
    for kind in TagKind::ALL {
        sqlx::query(&format!("DELETE FROM {} WHERE card_id = ?", kind.link_table()))
            .bind(card_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

async fn attach_tag(
    conn: &mut SqliteConnection,
    kind: TagKind,
    card_id: i64,
    tag_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT OR IGNORE INTO {} (card_id, {}) VALUES (?, ?)",
        kind.link_table(),
        kind.link_column()
    ))
    .bind(card_id)
    .bind(tag_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn printing_exists(
    conn: &mut SqliteConnection,
    candidate: &PrintingCandidate,
) -> Result<bool, sqlx::Error> {
    // `IS` compares NULLs as equal, so absent artist or image id still match.
    let found: i64 = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM printings WHERE card_id = ? AND set_id = ? AND rarity = ? \
         AND flavor_text = ? AND artist_id IS ? AND number = ? AND multiverse_id IS ?)",
    )
    .bind(candidate.card_id)
    .bind(candidate.set_id)
    .bind(candidate.rarity.code())
    .bind(&candidate.flavor_text)
    .bind(candidate.artist_id)
    .bind(&candidate.number)
    .bind(candidate.multiverse_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(found != 0)
}

async fn insert_printings(
    conn: &mut SqliteConnection,
    printings: &[PrintingCandidate],
) -> Result<(), sqlx::Error> {
    for chunk in printings.chunks(INSERT_CHUNK) {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "INSERT INTO printings (card_id, set_id, rarity, flavor_text, artist_id, number, multiverse_id) ",
        );
        builder.push_values(chunk, |mut b, p| {
            b.push_bind(p.card_id)
                .push_bind(p.set_id)
                .push_bind(p.rarity.code())
                .push_bind(p.flavor_text.clone())
                .push_bind(p.artist_id)
                .push_bind(p.number.clone())
                .push_bind(p.multiverse_id);
        });
        builder.build().execute(&mut *conn).await?;
    }
    Ok(())
}

async fn count_foreign_printings(conn: &mut SqliteConnection, set_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM foreign_printings fp \
         JOIN printings p ON p.id = fp.base_printing_id WHERE p.set_id = ?",
    )
    .bind(set_id)
    .fetch_one(&mut *conn)
    .await
}

/// Earliest printing of the set for each (card, image id) pair.
async fn base_printings_by_image_id(
    conn: &mut SqliteConnection,
    set_id: i64,
    image_ids: &[i64],
) -> Result<HashMap<(i64, i64), i64>, sqlx::Error> {
    let mut bases = HashMap::with_capacity(image_ids.len());
    for chunk in image_ids.chunks(INSERT_CHUNK) {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT card_id, multiverse_id, MIN(id) AS base_id FROM printings WHERE set_id = ",
        );
        builder.push_bind(set_id).push(" AND multiverse_id IN (");
        {
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
        }
        builder.push(") GROUP BY card_id, multiverse_id");

        for row in builder.build().fetch_all(&mut *conn).await? {
            bases.insert(
                (row.try_get("card_id")?, row.try_get("multiverse_id")?),
                row.try_get("base_id")?,
            );
        }
    }
    Ok(bases)
}
