//! Post-import repair of known upstream duplication and pruning of unused tags.

use mcards_core::SetSelection;
use mcards_mtgjson::{DuplicatePrintingDefect, Vocabulary};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, instrument};

use crate::db::TagKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub duplicate_printings_removed: u64,
    pub orphaned_tags_removed: u64,
}

/// Runs once per import, after every selected set is reconciled.
#[instrument(skip_all)]
pub async fn run_cleanup(
    conn: &mut SqliteConnection,
    vocabulary: &Vocabulary,
    selection: &SetSelection,
) -> Result<CleanupReport, sqlx::Error> {
    let mut report = CleanupReport::default();
    for defect in vocabulary.defects_for(selection) {
        report.duplicate_printings_removed += remove_duplicate_printings(&mut *conn, defect).await?;
    }
    report.orphaned_tags_removed = prune_orphaned_tags(&mut *conn).await?;
    info!(
        duplicate_printings_removed = report.duplicate_printings_removed,
        orphaned_tags_removed = report.orphaned_tags_removed,
        "cleanup complete"
    );
    Ok(report)
}

/// Keeps only the earliest-inserted printing of each named card in the defect's set.
pub async fn remove_duplicate_printings(
    conn: &mut SqliteConnection,
    defect: &DuplicatePrintingDefect,
) -> Result<u64, sqlx::Error> {
    let mut removed = 0;
    for name in &defect.card_names {
        let result = sqlx::query(
            "DELETE FROM printings WHERE id IN ( \
                SELECT p.id FROM printings p \
                JOIN sets s ON s.id = p.set_id \
                JOIN cards c ON c.id = p.card_id \
                WHERE s.code = ? AND c.name = ? \
                AND p.id > (SELECT MIN(p2.id) FROM printings p2 \
                            WHERE p2.set_id = p.set_id AND p2.card_id = p.card_id))",
        )
        .bind(&defect.set_code)
        .bind(name)
        .execute(&mut *conn)
        .await?;
        removed += result.rows_affected();
    }
    Ok(removed)
}

/// Deletes supertype, type, and subtype rows no card links to any more.
pub async fn prune_orphaned_tags(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let mut removed = 0;
    for kind in TagKind::ALL {
        let sql = format!(
            "DELETE FROM {table} WHERE id NOT IN (SELECT {column} FROM {links})",
            table = kind.ref_table().table(),
            column = kind.link_column(),
            links = kind.link_table(),
        );
        removed += sqlx::query(&sql).execute(&mut *conn).await?.rows_affected();
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{connect_in_memory, count_rows, migrate, Entity};

    async fn seeded() -> sqlx::SqlitePool {
        let pool = connect_in_memory().await.expect("pool");
        migrate(&pool).await.expect("migrate");
        sqlx::query(
            "INSERT INTO sets (id, code, name) VALUES (1, 'BOK', 'Betrayers of Kamigawa'), (2, 'CHK', 'Champions of Kamigawa');
             INSERT INTO cards (id, name) VALUES (1, 'Scarmaker'), (2, 'Baku Altar');
             INSERT INTO printings (card_id, set_id, rarity) VALUES (1, 1, 30), (1, 1, 30), (1, 1, 30), (2, 1, 20), (2, 1, 20), (1, 2, 30), (1, 2, 30);",
        )
        .execute(&pool)
        .await
        .expect("seed");
        pool
    }

    #[tokio::test]
    async fn duplicates_collapse_to_the_first_printing() {
        let pool = seeded().await;
        let mut conn = pool.acquire().await.expect("conn");
        let defect = DuplicatePrintingDefect {
            set_code: "BOK".into(),
            card_names: vec!["Scarmaker".into(), "Not In Set".into()],
            reference: None,
        };

        let removed = remove_duplicate_printings(&mut conn, &defect).await.expect("cleanup");
        assert_eq!(removed, 2);

        let kept: Vec<i64> = sqlx::query_scalar(
            "SELECT p.id FROM printings p WHERE p.set_id = 1 AND p.card_id = 1",
        )
        .fetch_all(&mut *conn)
        .await
        .expect("kept");
        assert_eq!(kept, vec![1]);
        // Unlisted cards and other sets are untouched.
        assert_eq!(count_rows(&mut conn, Entity::Printing).await.expect("count"), 5);
    }

    #[tokio::test]
    async fn orphaned_tags_are_pruned() {
        let pool = seeded().await;
        let mut conn = pool.acquire().await.expect("conn");
        sqlx::query(
            "INSERT INTO card_subtypes (id, name) VALUES (1, 'Spirit'), (2, 'Hound');
             INSERT INTO card_types (id, name) VALUES (1, 'Creature');
             INSERT INTO card_supertypes (id, name) VALUES (1, 'Legendary');
             INSERT INTO card_subtype_links (card_id, subtype_id) VALUES (1, 1);
             INSERT INTO card_type_links (card_id, type_id) VALUES (1, 1);",
        )
        .execute(&mut *conn)
        .await
        .expect("seed tags");

        let removed = prune_orphaned_tags(&mut conn).await.expect("prune");
        assert_eq!(removed, 2);
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM card_subtypes")
            .fetch_all(&mut *conn)
            .await
            .expect("names");
        assert_eq!(names, vec!["Spirit"]);
        assert_eq!(count_rows(&mut conn, Entity::Supertype).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn defect_repair_is_skipped_for_unselected_sets() {
        let pool = seeded().await;
        let mut conn = pool.acquire().await.expect("conn");
        let report = run_cleanup(&mut conn, &Vocabulary::mtgjson_v3(), &SetSelection::from_codes(["SOM"]))
            .await
            .expect("cleanup");
        assert_eq!(report.duplicate_printings_removed, 0);
        assert_eq!(count_rows(&mut conn, Entity::Printing).await.expect("count"), 7);

        let report = run_cleanup(&mut conn, &Vocabulary::mtgjson_v3(), &SetSelection::Everything)
            .await
            .expect("cleanup");
        assert_eq!(report.duplicate_printings_removed, 2);
    }
}
