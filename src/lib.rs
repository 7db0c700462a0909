// Anbieter-Abgleich - Core Library
// Matches independently scraped provider datasets onto one canonical,
// deduplicated dataset. Exposes all modules for the CLI and tests.

pub mod combine;
pub mod decisions;
pub mod error;
pub mod matching;
pub mod normalize;
pub mod resolver;
pub mod sources;
pub mod validate;

// Re-export commonly used types
pub use combine::{
    write_merged_csv, CanonicalEntry, CanonicalSet, CombineEngine, CombineResult, Resolution,
    RunOutcome, RunSummary, SourceTally,
};
pub use decisions::{DecisionLog, Outcome, SKIP_MARKER};
pub use error::MergeError;
pub use matching::{similarity, Candidate, CandidateGenerator};
pub use normalize::{normalize, normalize_with_plz};
pub use resolver::{
    AbortingPrompt, AutoAcceptPolicy, CandidatePrompt, PolicyDecision, PromptContext,
    PromptReply, ScriptedPrompt, StdinPrompt,
};
pub use sources::{
    load_sources, parse_scrape_file, LoadedSource, ProviderRecord, SourceCatalog, SourceExtra,
    SourceKind,
};
pub use validate::validate;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
