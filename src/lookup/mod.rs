// src/lookup/mod.rs
//
// Dimension tables mapping free-text keys (program names, subject codes)
// to canonical codes. Hand-curated authoritative entries always win; keys
// the curated map does not cover fall back to the most frequent code
// observed in the data, ties broken by first-seen order. Rebuilt wholesale
// whenever the inputs change; there is no incremental mode.

use crate::table;
use anyhow::{Context, Result};
use arrow::{array::Array, record_batch::RecordBatch};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};
use tracing::info;

/// Key → canonical code. BTreeMap keeps the on-disk collection stable.
pub type LookupTable = BTreeMap<String, String>;

/// All derived lookup tables, persisted together as one named collection.
pub type LookupCollection = BTreeMap<String, LookupTable>;

/// Load the hand-curated authoritative map (YAML). `None` means no curated
/// entries; a configured path that cannot be read is an error, not a
/// silent empty map.
pub fn load_authoritative(path: Option<&Path>) -> Result<LookupTable> {
    match path {
        None => Ok(LookupTable::new()),
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading authoritative map {}", path.display()))?;
            serde_yaml::from_str(&text)
                .with_context(|| format!("parsing authoritative map {}", path.display()))
        }
    }
}

/// Build one lookup table from a normalized batch.
///
/// Scans (`key_column`, `code_column`) pairs; for each distinct key the
/// authoritative map does not already cover, the mode of its observed codes
/// becomes the derived mapping.
pub fn build_lookup(
    batch: &RecordBatch,
    key_column: &str,
    code_column: &str,
    authoritative: &LookupTable,
) -> Result<LookupTable> {
    let key_idx = table::require_column(batch, key_column)?;
    let code_idx = table::require_column(batch, code_column)?;
    let keys = table::as_string(batch, key_idx)?;
    let codes = table::as_string(batch, code_idx)?;

    // key → code → (count, first-seen row)
    let mut observed: BTreeMap<String, HashMap<String, (usize, usize)>> = BTreeMap::new();
    for i in 0..batch.num_rows() {
        let (key, code) = match (keys.is_valid(i), codes.is_valid(i)) {
            (true, true) => (keys.value(i).trim(), codes.value(i).trim()),
            _ => continue,
        };
        if key.is_empty() || code.is_empty() {
            continue;
        }
        let counts = observed.entry(key.to_string()).or_default();
        let entry = counts.entry(code.to_string()).or_insert((0, i));
        entry.0 += 1;
    }

    let mut lookup = LookupTable::new();
    for (key, counts) in observed {
        if authoritative.contains_key(&key) {
            continue;
        }
        // Mode; on equal counts the earlier-seen code wins.
        if let Some((code, _)) = counts
            .into_iter()
            .max_by(|a, b| a.1 .0.cmp(&b.1 .0).then(b.1 .1.cmp(&a.1 .1)))
        {
            lookup.insert(key, code);
        }
    }

    for (key, code) in authoritative {
        lookup.insert(key.clone(), code.clone());
    }

    info!(key_column, code_column, entries = lookup.len(), "built lookup table");
    Ok(lookup)
}

/// Persist the whole collection as one JSON file.
pub fn save_collection(path: &Path, collection: &LookupCollection) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating lookup dir {}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(collection).context("serializing lookup collection")?;
    fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), tables = collection.len(), "saved lookup collection");
    Ok(())
}

/// Load a previously saved collection; absent file → empty collection.
pub fn load_collection(path: &Path) -> Result<LookupCollection> {
    if !path.is_file() {
        return Ok(LookupCollection::new());
    }
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::StringArray;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn programs(pairs: &[(&str, Option<&str>)]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("program", DataType::Utf8, true),
            Field::new("program_code", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(
                    pairs.iter().map(|(k, _)| Some(*k)).collect::<Vec<_>>(),
                )),
                Arc::new(StringArray::from(
                    pairs.iter().map(|(_, c)| *c).collect::<Vec<_>>(),
                )),
            ],
        )
        .unwrap()
    }

    #[test]
    fn mode_wins_with_first_seen_tiebreak() {
        let batch = programs(&[
            ("Biology", Some("BIO")),
            ("Biology", Some("BSC")),
            ("Biology", Some("BIO")),
            // Tied 1–1: "HIS" was seen before "HST".
            ("History", Some("HIS")),
            ("History", Some("HST")),
            ("Dance", None),
        ]);

        let lookup = build_lookup(&batch, "program", "program_code", &LookupTable::new()).unwrap();
        assert_eq!(lookup["Biology"], "BIO");
        assert_eq!(lookup["History"], "HIS");
        assert!(!lookup.contains_key("Dance"));
    }

    #[test]
    fn authoritative_entries_take_precedence() {
        let batch = programs(&[
            ("Biology", Some("WRONG")),
            ("Biology", Some("WRONG")),
            ("Chemistry", Some("CHM")),
        ]);
        let mut authoritative = LookupTable::new();
        authoritative.insert("Biology".to_string(), "BIO".to_string());
        authoritative.insert("Uncurated Extra".to_string(), "UNX".to_string());

        let lookup = build_lookup(&batch, "program", "program_code", &authoritative).unwrap();
        assert_eq!(lookup["Biology"], "BIO");
        assert_eq!(lookup["Chemistry"], "CHM");
        assert_eq!(lookup["Uncurated Extra"], "UNX");
    }

    #[test]
    fn collection_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lookups.json");

        let mut collection = LookupCollection::new();
        let mut programs = LookupTable::new();
        programs.insert("Biology".to_string(), "BIO".to_string());
        collection.insert("program_code".to_string(), programs);

        save_collection(&path, &collection).unwrap();
        let loaded = load_collection(&path).unwrap();
        assert_eq!(loaded, collection);
    }

    #[test]
    fn absent_collection_is_empty() {
        let dir = tempdir().unwrap();
        let loaded = load_collection(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_empty());
    }
}
