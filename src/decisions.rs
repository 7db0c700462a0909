// 💾 Decision Log - Durable record of manual match resolutions
// `source;rawName;outcome` rows, appended after every interactive decision
// and replayed in full at the start of each run, so an interrupted run
// never asks the same question twice.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::MergeError;

/// Literal marker persisted for "exclude this record entirely".
pub const SKIP_MARKER: &str = "<skip>";

// ============================================================================
// OUTCOME
// ============================================================================

/// Resolution outcome for one `(source, rawName)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Match onto the canonical entry with this display name.
    Accept(String),

    /// No match exists; add the record as a new canonical entry.
    NewEntry,

    /// Exclude the record from the merge entirely.
    Skip,
}

impl Outcome {
    fn encode(&self) -> &str {
        match self {
            Outcome::Accept(name) => name,
            Outcome::NewEntry => "",
            Outcome::Skip => SKIP_MARKER,
        }
    }

    fn decode(field: &str) -> Outcome {
        match field {
            "" => Outcome::NewEntry,
            SKIP_MARKER => Outcome::Skip,
            name => Outcome::Accept(name.to_string()),
        }
    }
}

// ============================================================================
// DECISION LOG
// ============================================================================

#[derive(Debug)]
pub struct DecisionLog {
    path: PathBuf,
    decisions: HashMap<(String, String), Outcome>,
}

impl DecisionLog {
    /// Open a decision log, reading it in full. A missing file is an empty
    /// log; a malformed row is fatal. When the same `(source, rawName)`
    /// pair appears more than once, the most recently appended row wins.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut decisions = HashMap::new();

        if path.exists() {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(b';')
                .has_headers(false)
                .flexible(true)
                .from_path(&path)
                .with_context(|| format!("failed to open decision log {}", path.display()))?;

            for row in reader.records() {
                let record = row.with_context(|| {
                    format!("failed to read decision log {}", path.display())
                })?;
                if record.len() != 3 {
                    return Err(MergeError::MalformedDecision {
                        line: record.position().map(|p| p.line()).unwrap_or(0),
                        fields: record.len(),
                    }
                    .into());
                }
                let key = (record[0].to_string(), record[1].to_string());
                decisions.insert(key, Outcome::decode(&record[2]));
            }
        }

        Ok(DecisionLog { path, decisions })
    }

    /// Previously persisted outcome for this `(source, rawName)` pair.
    pub fn lookup(&self, source: &str, raw_name: &str) -> Option<&Outcome> {
        self.decisions
            .get(&(source.to_string(), raw_name.to_string()))
    }

    /// Append one decision and sync it to disk before returning. The log
    /// is additive; existing rows are never rewritten.
    pub fn append(&mut self, source: &str, raw_name: &str, outcome: Outcome) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record([source, raw_name, outcome.encode()])?;
        let row = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to encode decision row: {e}"))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open decision log {}", self.path.display()))?;
        file.write_all(&row)
            .with_context(|| format!("failed to append to decision log {}", self.path.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync decision log {}", self.path.display()))?;

        self.decisions.insert(
            (source.to_string(), raw_name.to_string()),
            outcome,
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("combine_selections.csv")
    }

    #[test]
    fn test_missing_file_is_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = DecisionLog::open(temp_log_path(&dir)).unwrap();
        assert!(log.is_empty());
    }

    #[test]
    fn test_append_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_log_path(&dir);

        let mut log = DecisionLog::open(&path).unwrap();
        log.append(
            "verivox",
            "Musterstadt Energie GmbH",
            Outcome::Accept("Stadtwerke Musterstadt".to_string()),
        )
        .unwrap();
        log.append("verivox", "Phantomstrom", Outcome::NewEntry).unwrap();
        log.append("oekotest", "Testanbieter", Outcome::Skip).unwrap();

        let reloaded = DecisionLog::open(&path).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(
            reloaded.lookup("verivox", "Musterstadt Energie GmbH"),
            Some(&Outcome::Accept("Stadtwerke Musterstadt".to_string()))
        );
        assert_eq!(
            reloaded.lookup("verivox", "Phantomstrom"),
            Some(&Outcome::NewEntry)
        );
        assert_eq!(reloaded.lookup("oekotest", "Testanbieter"), Some(&Outcome::Skip));
        assert_eq!(reloaded.lookup("oekotest", "Unbekannt"), None);
    }

    #[test]
    fn test_latest_duplicate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_log_path(&dir);

        let mut log = DecisionLog::open(&path).unwrap();
        log.append("verivox", "Musterstadt Energie", Outcome::Skip).unwrap();
        log.append("verivox", "Musterstadt Energie", Outcome::NewEntry)
            .unwrap();

        let reloaded = DecisionLog::open(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.lookup("verivox", "Musterstadt Energie"),
            Some(&Outcome::NewEntry)
        );
    }

    #[test]
    fn test_raw_name_containing_delimiter_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_log_path(&dir);

        let mut log = DecisionLog::open(&path).unwrap();
        log.append("verivox", "Strom; Gas & Co", Outcome::NewEntry).unwrap();

        let reloaded = DecisionLog::open(&path).unwrap();
        assert_eq!(
            reloaded.lookup("verivox", "Strom; Gas & Co"),
            Some(&Outcome::NewEntry)
        );
    }

    #[test]
    fn test_malformed_row_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_log_path(&dir);
        std::fs::write(&path, "verivox;only-two-fields\n").unwrap();

        let err = DecisionLog::open(&path).unwrap_err();
        let fatal = err.downcast::<MergeError>().unwrap();
        assert!(matches!(
            fatal,
            MergeError::MalformedDecision { line: 1, fields: 2 }
        ));
    }
}
