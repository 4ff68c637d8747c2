//! SQLite connection setup, embedded migrations, and schema descriptors.

use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://magic_cards.db";

// SECURITY: keep the URL out of spans; it may embed credentials for other backends.
#[instrument(skip(database_url))]
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;
    info!("connected to catalog store");
    Ok(pool)
}

/// Private in-memory database. A single never-recycled connection keeps the data alive.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
}

pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Small name-unique tables resolved through the lookup cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefTable {
    Set,
    Supertype,
    Type,
    Subtype,
    Artist,
}

impl RefTable {
    pub fn table(self) -> &'static str {
        match self {
            RefTable::Set => "sets",
            RefTable::Supertype => "card_supertypes",
            RefTable::Type => "card_types",
            RefTable::Subtype => "card_subtypes",
            RefTable::Artist => "artists",
        }
    }

    /// Natural unique key used for cache lookups.
    pub fn key_column(self) -> &'static str {
        match self {
            RefTable::Set => "code",
            RefTable::Artist => "full_name",
            RefTable::Supertype | RefTable::Type | RefTable::Subtype => "name",
        }
    }
}

/// The three typed tag families a card carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Supertype,
    Type,
    Subtype,
}

impl TagKind {
    pub const ALL: [TagKind; 3] = [TagKind::Supertype, TagKind::Type, TagKind::Subtype];

    pub fn ref_table(self) -> RefTable {
        match self {
            TagKind::Supertype => RefTable::Supertype,
            TagKind::Type => RefTable::Type,
            TagKind::Subtype => RefTable::Subtype,
        }
    }

    pub fn link_table(self) -> &'static str {
        match self {
            TagKind::Supertype => "card_supertype_links",
            TagKind::Type => "card_type_links",
            TagKind::Subtype => "card_subtype_links",
        }
    }

    pub fn link_column(self) -> &'static str {
        match self {
            TagKind::Supertype => "supertype_id",
            TagKind::Type => "type_id",
            TagKind::Subtype => "subtype_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Set,
    Card,
    Printing,
    ForeignPrinting,
    Supertype,
    Type,
    Subtype,
    Artist,
}

impl Entity {
    pub fn table(self) -> &'static str {
        match self {
            Entity::Set => "sets",
            Entity::Card => "cards",
            Entity::Printing => "printings",
            Entity::ForeignPrinting => "foreign_printings",
            Entity::Supertype => "card_supertypes",
            Entity::Type => "card_types",
            Entity::Subtype => "card_subtypes",
            Entity::Artist => "artists",
        }
    }
}

pub async fn count_rows(conn: &mut SqliteConnection, entity: Entity) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", entity.table()))
        .fetch_one(&mut *conn)
        .await
}

/// Row counts the import summary is computed from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogCounts {
    pub sets: i64,
    pub cards: i64,
    pub printings: i64,
    pub foreign_printings: i64,
}

impl CatalogCounts {
    pub async fn load(conn: &mut SqliteConnection) -> Result<Self, sqlx::Error> {
        Ok(Self {
            sets: count_rows(conn, Entity::Set).await?,
            cards: count_rows(conn, Entity::Card).await?,
            printings: count_rows(conn, Entity::Printing).await?,
            foreign_printings: count_rows(conn, Entity::ForeignPrinting).await?,
        })
    }

    /// Net change from `before` to `self`.
    pub fn delta_since(&self, before: &CatalogCounts) -> CatalogCounts {
        CatalogCounts {
            sets: self.sets - before.sets,
            cards: self.cards - before.cards,
            printings: self.printings - before.printings,
            foreign_printings: self.foreign_printings - before.foreign_printings,
        }
    }
}
