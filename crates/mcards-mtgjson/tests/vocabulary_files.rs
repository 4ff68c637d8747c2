use std::path::{Path, PathBuf};

use mcards_core::{Rarity, SetSelection};
use mcards_mtgjson::{RawSnapshot, Vocabulary};

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

#[test]
fn shipped_v3_vocabulary_matches_builtin() {
    let loaded = Vocabulary::from_path(workspace_root().join("vocabularies/mtgjson-v3.yaml"))
        .expect("load v3 vocabulary");
    assert_eq!(loaded, Vocabulary::mtgjson_v3());
}

#[test]
fn shipped_v4_vocabulary_matches_builtin() {
    let loaded = Vocabulary::from_path(workspace_root().join("vocabularies/mtgjson-v4.yaml"))
        .expect("load v4 vocabulary");
    assert_eq!(loaded, Vocabulary::mtgjson_v4());
}

#[test]
fn partial_vocabulary_uses_default_field_aliases() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("custom.yaml");
    std::fs::write(&path, "name: custom\nrarities:\n  Timeshifted: special\n  Rare: rare\n")
        .expect("write vocabulary");
    let vocabulary = Vocabulary::from_path(&path).expect("load");
    assert_eq!(vocabulary.multiverse_id_fields, vec!["multiverseid", "multiverseId"]);
    assert_eq!(vocabulary.token_layouts, vec!["token"]);
    assert_eq!(vocabulary.foreign_names_fields, vec!["foreignNames"]);
    assert!(vocabulary.duplicate_printing_defects.is_empty());
    assert_eq!(vocabulary.parse_rarity("Rare"), Rarity::Rare);
}

#[test]
fn sample_snapshot_extracts_every_set() {
    let text = std::fs::read_to_string(workspace_root().join("fixtures/mtgjson/AllSets-sample.json"))
        .expect("read fixture");
    let snapshot = RawSnapshot::from_json_str(&text).expect("snapshot");
    let vocabulary = Vocabulary::mtgjson_v3();
    let selection = SetSelection::Everything;

    let sets = snapshot
        .selected(&selection)
        .map(|(code, raw)| vocabulary.extract_set(code, raw))
        .collect::<Result<Vec<_>, _>>()
        .expect("extract sets");

    let codes: Vec<_> = sets.iter().map(|s| s.code.as_str()).collect();
    assert_eq!(codes, vec!["SOM", "AKH", "BOK"]);
    assert_eq!(sets[0].name, "Scars of Mirrodin");
    assert_eq!(sets[0].cards.len(), 5);
    let baku = sets[2].cards.last().expect("baku altar");
    assert_eq!(baku.artist, None);
    assert_eq!(baku.number, "");
}
