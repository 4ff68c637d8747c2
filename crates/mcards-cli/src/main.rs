use std::future::Future;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mcards_core::SetSelection;
use mcards_sync::{db, CatalogCounts, ImportConfig, ImportSummary};
use tracing::info;
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "mcards")]
#[command(about = "Mirror the MTGJSON card catalog into a local database")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Import every set, or only the listed set codes.
    Import(ImportArgs),
    /// Apply pending schema migrations and exit.
    Migrate,
}

#[derive(Debug, Default, Args)]
struct ImportArgs {
    /// Set codes to import, e.g. SOM AKH. Case-sensitive.
    set_codes: Vec<String>,
    /// Read a previously downloaded AllSets archive instead of fetching.
    #[arg(long)]
    archive: Option<PathBuf>,
    /// YAML vocabulary describing the upstream field mapping.
    #[arg(long)]
    vocabulary: Option<PathBuf>,
    #[arg(long)]
    no_foreign_printings: bool,
    /// Print the full summary as JSON after the human-readable lines.
    #[arg(long)]
    json: bool,
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("warn")?;
    let cli = Cli::parse();
    let mut config = ImportConfig::from_env();

    match cli.command.unwrap_or_else(|| Commands::Import(ImportArgs::default())) {
        Commands::Import(args) => {
            if let Some(path) = args.archive {
                config.archive_path = Some(path);
            }
            if let Some(path) = args.vocabulary {
                config.vocabulary_path = Some(path);
            }
            if args.no_foreign_printings {
                config.foreign_printings = false;
            }

            let selection = SetSelection::from_codes(args.set_codes);
            let mut stdout = std::io::stdout();
            let summary = report_import(
                &mut stdout,
                &selection,
                mcards_sync::import_cards_with_config(&config, &selection),
            )
            .await?;
            log_anomalies(&summary);
            if args.json {
                writeln!(stdout, "{}", serde_json::to_string_pretty(&summary)?)?;
            }
        }
        Commands::Migrate => {
            let pool = db::connect(&config.database_url)
                .await
                .context("connecting to catalog store")?;
            db::migrate(&pool).await.context("migrating catalog store")?;
            pool.close().await;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn pluralize(count: i64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

fn beginning_message(selection: &SetSelection) -> String {
    match selection.codes() {
        None => "Beginning import of all sets.".to_string(),
        Some(codes) => format!(
            "Beginning import of {} ({}).",
            pluralize(codes.len() as i64, "set", "sets"),
            codes.join(", ")
        ),
    }
}

fn added_message(added: &CatalogCounts) -> String {
    format!(
        "Added {}, {}, and {}.",
        pluralize(added.sets, "new Set", "new Sets"),
        pluralize(added.cards, "new Card", "new Cards"),
        pluralize(added.printings, "new Printing", "new Printings"),
    )
}

/// Writes the progress lines around `import`; the import's own logging goes to stderr.
async fn report_import<W, F>(out: &mut W, selection: &SetSelection, import: F) -> Result<ImportSummary>
where
    W: Write,
    F: Future<Output = Result<ImportSummary>>,
{
    writeln!(out, "{}", beginning_message(selection))?;
    out.flush()?;
    let summary = import.await?;
    writeln!(out, "Import complete.")?;
    writeln!(out, "{}", added_message(&summary.added))?;
    Ok(summary)
}

fn log_anomalies(summary: &ImportSummary) {
    info!(
        tokens_skipped = summary.tokens_skipped,
        unmapped_rarities = summary.unmapped_rarities,
        skipped_foreign_names = summary.skipped_foreign_names,
        duplicate_printings_removed = summary.cleanup.duplicate_printings_removed,
        orphaned_tags_removed = summary.cleanup.orphaned_tags_removed,
        "import anomalies"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcards_mtgjson::{RawSnapshot, Vocabulary};
    use mcards_sync::{Importer, StaticSnapshotSource};

    #[test]
    fn announces_selected_sets() {
        assert_eq!(
            beginning_message(&SetSelection::from_codes(["SOM"])),
            "Beginning import of 1 set (SOM)."
        );
        assert_eq!(
            beginning_message(&SetSelection::from_codes(["SOM", "AKH"])),
            "Beginning import of 2 sets (SOM, AKH)."
        );
        assert_eq!(
            beginning_message(&SetSelection::Everything),
            "Beginning import of all sets."
        );
    }

    #[test]
    fn summary_line_pluralizes_each_count() {
        let added = CatalogCounts {
            sets: 1,
            cards: 234,
            printings: 249,
            foreign_printings: 0,
        };
        assert_eq!(
            added_message(&added),
            "Added 1 new Set, 234 new Cards, and 249 new Printings."
        );
        assert_eq!(
            added_message(&CatalogCounts::default()),
            "Added 0 new Sets, 0 new Cards, and 0 new Printings."
        );
    }

    #[tokio::test]
    async fn fixture_import_prints_only_the_progress_lines() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/mtgjson/AllSets-sample.json");
        let text = std::fs::read_to_string(path).expect("read fixture");
        let snapshot = RawSnapshot::from_json_str(&text).expect("snapshot");
        let pool = db::connect_in_memory().await.expect("pool");
        db::migrate(&pool).await.expect("migrate");
        let importer = Importer::new(
            pool,
            Box::new(StaticSnapshotSource::new(snapshot)),
            Vocabulary::mtgjson_v3(),
        );

        let selection = SetSelection::from_codes(["SOM"]);
        let mut out = Vec::new();
        let summary = report_import(&mut out, &selection, async {
            importer.import_cards(&selection).await.map_err(anyhow::Error::from)
        })
        .await
        .expect("import");

        // The fixture carries a token and an unknown language; neither shows up here.
        assert_eq!(summary.tokens_skipped, 1);
        assert_eq!(summary.skipped_foreign_names, 1);
        let printed = String::from_utf8(out).expect("utf8");
        assert_eq!(
            printed.lines().collect::<Vec<_>>(),
            vec![
                "Beginning import of 1 set (SOM).",
                "Import complete.",
                "Added 1 new Set, 3 new Cards, and 4 new Printings.",
            ]
        );
    }

    #[test]
    fn import_is_the_default_command() {
        let cli = Cli::parse_from(["mcards"]);
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["mcards", "import", "SOM", "--no-foreign-printings"]);
        match cli.command {
            Some(Commands::Import(args)) => {
                assert_eq!(args.set_codes, vec!["SOM".to_string()]);
                assert!(args.no_foreign_printings);
                assert!(args.archive.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
