//! Invocation-scoped get-or-create cache over the small reference tables.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use mcards_core::SetSelection;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};
use tracing::debug;

use crate::db::RefTable;

/// Maps each table's natural key (case-sensitive) to its row id.
///
/// A table is primed with every existing row on first use; misses are written
/// through to the store immediately. Discard the cache when the import ends.
#[derive(Debug, Default)]
pub struct LookupCache {
    set_filter: SetSelection,
    tables: HashMap<RefTable, HashMap<String, i64>>,
}

impl LookupCache {
    /// `set_filter` restricts which existing sets are loaded when priming.
    pub fn new(set_filter: SetSelection) -> Self {
        Self {
            set_filter,
            tables: HashMap::new(),
        }
    }

    /// Returns `(id, created)`. `extra` supplies the other columns for a new row;
    /// an existing row is returned untouched.
    pub async fn get_or_create(
        &mut self,
        conn: &mut SqliteConnection,
        table: RefTable,
        key: &str,
        extra: &[(&'static str, &str)],
    ) -> Result<(i64, bool), sqlx::Error> {
        let rows = match self.tables.entry(table) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let loaded = load_table(&mut *conn, table, &self.set_filter).await?;
                debug!(table = table.table(), rows = loaded.len(), "primed lookup cache");
                entry.insert(loaded)
            }
        };

        if let Some(&id) = rows.get(key) {
            return Ok((id, false));
        }

        let mut columns = vec![table.key_column()];
        columns.extend(extra.iter().map(|(column, _)| *column));
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.table(),
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(key);
        for (_, value) in extra {
            query = query.bind(*value);
        }
        let id = query.execute(&mut *conn).await?.last_insert_rowid();
        rows.insert(key.to_string(), id);
        Ok((id, true))
    }

    pub fn cached_len(&self, table: RefTable) -> usize {
        self.tables.get(&table).map_or(0, HashMap::len)
    }
}

async fn load_table(
    conn: &mut SqliteConnection,
    table: RefTable,
    set_filter: &SetSelection,
) -> Result<HashMap<String, i64>, sqlx::Error> {
    let mut builder = QueryBuilder::<Sqlite>::new(format!(
        "SELECT id, {} AS natural_key FROM {}",
        table.key_column(),
        table.table()
    ));

    if table == RefTable::Set {
        if let Some(codes) = set_filter.codes() {
            if codes.is_empty() {
                return Ok(HashMap::new());
            }
            builder.push(" WHERE code IN (");
            let mut separated = builder.separated(", ");
            for code in codes {
                separated.push_bind(code.clone());
            }
            separated.push_unseparated(")");
        }
    }

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| -> Result<(String, i64), sqlx::Error> {
            Ok((row.try_get("natural_key")?, row.try_get("id")?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, count_rows, migrate, Entity};

    async fn migrated() -> sqlx::SqlitePool {
        let pool = connect_in_memory().await.expect("pool");
        migrate(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    async fn miss_creates_row_and_hit_reuses_it() {
        let pool = migrated().await;
        let mut conn = pool.acquire().await.expect("conn");
        let mut cache = LookupCache::new(SetSelection::Everything);

        let (id, created) = cache
            .get_or_create(&mut conn, RefTable::Set, "SOM", &[("name", "Scars of Mirrodin")])
            .await
            .expect("create");
        assert!(created);

        let (again, created) = cache
            .get_or_create(&mut conn, RefTable::Set, "SOM", &[("name", "Renamed")])
            .await
            .expect("lookup");
        assert!(!created);
        assert_eq!(again, id);

        let name: String = sqlx::query_scalar("SELECT name FROM sets WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *conn)
            .await
            .expect("name");
        assert_eq!(name, "Scars of Mirrodin");
        assert_eq!(count_rows(&mut conn, Entity::Set).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn priming_picks_up_existing_rows() {
        let pool = migrated().await;
        let mut conn = pool.acquire().await.expect("conn");
        sqlx::query("INSERT INTO card_subtypes (name) VALUES ('Hound'), ('Jackal')")
            .execute(&mut *conn)
            .await
            .expect("seed");

        let mut cache = LookupCache::new(SetSelection::Everything);
        let (_, created) = cache
            .get_or_create(&mut conn, RefTable::Subtype, "Jackal", &[])
            .await
            .expect("lookup");
        assert!(!created);
        assert_eq!(cache.cached_len(RefTable::Subtype), 2);
        assert_eq!(cache.cached_len(RefTable::Type), 0);
    }

    #[tokio::test]
    async fn keys_are_case_sensitive() {
        let pool = migrated().await;
        let mut conn = pool.acquire().await.expect("conn");
        let mut cache = LookupCache::new(SetSelection::Everything);

        let (upper, _) = cache
            .get_or_create(&mut conn, RefTable::Type, "Creature", &[])
            .await
            .expect("upper");
        let (lower, created) = cache
            .get_or_create(&mut conn, RefTable::Type, "creature", &[])
            .await
            .expect("lower");
        assert!(created);
        assert_ne!(upper, lower);
    }

    #[tokio::test]
    async fn set_priming_honours_the_selection() {
        let pool = migrated().await;
        let mut conn = pool.acquire().await.expect("conn");
        sqlx::query("INSERT INTO sets (code, name) VALUES ('SOM', 'Scars of Mirrodin'), ('AKH', 'Amonkhet')")
            .execute(&mut *conn)
            .await
            .expect("seed");

        let mut cache = LookupCache::new(SetSelection::from_codes(["AKH"]));
        let (_, created) = cache
            .get_or_create(&mut conn, RefTable::Set, "AKH", &[("name", "Amonkhet")])
            .await
            .expect("lookup");
        assert!(!created);
        assert_eq!(cache.cached_len(RefTable::Set), 1);
    }
}
