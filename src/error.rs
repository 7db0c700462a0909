// Fatal error channel - corrupted state must halt before output
// Every variant here is non-recoverable: the run stops, nothing is written.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    /// A data file exists for a source the catalog does not know.
    #[error("unknown source '{0}': not present in the source catalog")]
    UnknownSource(String),

    /// The `source` field inside a scrape file disagrees with its file name.
    #[error("scrape file '{path}': source field is '{found}', expected '{expected}'")]
    SourceMismatch {
        path: String,
        found: String,
        expected: String,
    },

    /// A scrape file could not be deserialized against its declared schema.
    #[error("scrape file '{path}': {message}")]
    MalformedScrapeFile { path: String, message: String },

    /// A persisted decision row does not have exactly three fields.
    #[error("decision log line {line}: expected 3 fields (source;name;outcome), got {fields}")]
    MalformedDecision { line: u64, fields: usize },

    /// A replayed accept-decision names a canonical entry that does not exist.
    #[error("decision for ({source_id}, '{name}') references unknown canonical name '{target}'")]
    UnknownDecisionTarget {
        source_id: String,
        name: String,
        target: String,
    },

    /// Two records of one source collapse to the same normalized key
    /// and the pair is not in the allowed-collision table.
    #[error("source '{source_id}': records '{first}' and '{second}' share normalized key '{key}'")]
    DuplicateSourceKey {
        source_id: String,
        key: String,
        first: String,
        second: String,
    },

    /// Registering a new canonical entry would duplicate an existing key.
    #[error("canonical key '{key}' already exists while adding entry for '{name}'")]
    KeyCollision { key: String, name: String },

    /// One source ended up contributing twice to the same canonical entry.
    #[error("source '{source_id}': record '{name}' would be the second contribution to entry '{entry}'")]
    DuplicateAttribution {
        source_id: String,
        name: String,
        entry: String,
    },

    /// Validation: a display name attributed to more than one entry.
    #[error("validation: source '{source_id}' has display name '{name}' attributed to multiple entries")]
    RepeatedAttribution { source_id: String, name: String },

    /// Validation: a display name occurs twice in a source's input list.
    #[error("validation: source '{source_id}' loaded display name '{name}' more than once")]
    DuplicateLoadedName { source_id: String, name: String },

    /// Validation: a loaded record was neither merged nor explicitly skipped.
    #[error("validation: source '{source_id}' record '{name}' was loaded but never merged or skipped")]
    IncompleteMerge { source_id: String, name: String },
}
