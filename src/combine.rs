// ⚙️ Merge Engine - Resolve every source record onto the canonical set
// Replayed decisions first, then candidates, then the auto-accept policy;
// only what is left over reaches a human. Abort is a value, not an error.

use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;

use crate::decisions::{DecisionLog, Outcome};
use crate::error::MergeError;
use crate::matching::CandidateGenerator;
use crate::normalize::{normalize, normalize_with_plz};
use crate::resolver::{
    AutoAcceptPolicy, CandidatePrompt, PolicyDecision, PromptContext, PromptReply,
};
use crate::sources::{LoadedSource, ProviderRecord, SourceCatalog};

// ============================================================================
// CANONICAL SET
// ============================================================================

/// One resolved, deduplicated provider aggregating all source contributions.
#[derive(Debug, Clone)]
pub struct CanonicalEntry {
    /// Provider data from the baseline source, or synthesized from the
    /// first non-baseline record that failed to match.
    pub baseline: ProviderRecord,

    /// Whether the entry originates from the baseline dataset.
    pub in_baseline: bool,

    /// Record contributed per source, at most one each.
    pub contributions: BTreeMap<String, ProviderRecord>,
}

/// The canonical entries plus their lookup indices. Entries are keyed by
/// plain normalized key; the postal index maps postal-aware keys back to
/// plain keys. Both key spaces stay duplicate-free.
#[derive(Debug, Default)]
pub struct CanonicalSet {
    entries: BTreeMap<String, CanonicalEntry>,
    plz_index: BTreeMap<String, String>,
}

impl CanonicalSet {
    /// Build the initial set from the baseline source.
    pub fn from_baseline(baseline: &LoadedSource) -> Result<Self, MergeError> {
        let mut set = CanonicalSet::default();
        for record in &baseline.records {
            let key = set.register_keys(record)?;
            set.entries.insert(
                key,
                CanonicalEntry {
                    baseline: record.clone(),
                    in_baseline: true,
                    contributions: BTreeMap::new(),
                },
            );
        }
        Ok(set)
    }

    /// Claim the record's plain (and, if present, postal-aware) key.
    /// A key already claimed by another entry is fatal.
    fn register_keys(&mut self, record: &ProviderRecord) -> Result<String, MergeError> {
        let key = normalize(&record.name);
        if self.entries.contains_key(&key) {
            return Err(MergeError::KeyCollision {
                key,
                name: record.name.clone(),
            });
        }
        if !record.plz.is_empty() {
            let plz_key = normalize_with_plz(&record.plz, &record.name);
            if self.plz_index.contains_key(&plz_key) {
                return Err(MergeError::KeyCollision {
                    key: plz_key,
                    name: record.name.clone(),
                });
            }
            self.plz_index.insert(plz_key, key.clone());
        }
        Ok(key)
    }

    /// Create a fresh entry from a non-baseline record and register its
    /// keys, so later records (same source included) can match against it.
    pub fn synthesize(
        &mut self,
        source_id: &str,
        record: ProviderRecord,
    ) -> Result<String, MergeError> {
        let key = self.register_keys(&record)?;
        let mut contributions = BTreeMap::new();
        contributions.insert(source_id.to_string(), record.clone());
        self.entries.insert(
            key.clone(),
            CanonicalEntry {
                baseline: record,
                in_baseline: false,
                contributions,
            },
        );
        Ok(key)
    }

    /// Attach a source record to an existing entry.
    pub fn add_contribution(
        &mut self,
        key: &str,
        source_id: &str,
        record: ProviderRecord,
    ) -> Result<(), MergeError> {
        let Some(entry) = self.entries.get_mut(key) else {
            return Err(MergeError::UnknownDecisionTarget {
                source_id: source_id.to_string(),
                name: record.name,
                target: key.to_string(),
            });
        };
        if entry.contributions.contains_key(source_id) {
            return Err(MergeError::DuplicateAttribution {
                source_id: source_id.to_string(),
                name: record.name,
                entry: entry.baseline.name.clone(),
            });
        }
        entry.contributions.insert(source_id.to_string(), record);
        Ok(())
    }

    /// Plain key space as `(match_key, entry_key, display_name)` triples.
    pub fn plain_keyspace(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.as_str(), key.as_str(), entry.baseline.name.as_str()))
    }

    /// Postal-aware key space, same shape.
    pub fn postal_keyspace(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.plz_index.iter().filter_map(|(plz_key, key)| {
            self.entries
                .get(key)
                .map(|entry| (plz_key.as_str(), key.as_str(), entry.baseline.name.as_str()))
        })
    }

    /// Resolve a canonical display name (as persisted in the decision log)
    /// back to its entry key.
    pub fn key_for_canonical_name(&self, name: &str) -> Option<String> {
        let key = normalize(name);
        self.entries.contains_key(&key).then_some(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &CanonicalEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// RESOLUTION & RUN OUTCOME
// ============================================================================

/// How one record was resolved. Control flow, not errors: schema and
/// validation violations travel on the fatal channel instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matched onto the entry with this plain key.
    Matched(String),
    NewEntry,
    Skipped,
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct SourceTally {
    pub source: String,
    pub loaded: usize,
    pub matched: usize,
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tallies: Vec<SourceTally>,
}

impl RunSummary {
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        let (mut loaded, mut matched, mut added, mut skipped) = (0, 0, 0, 0);
        for tally in &self.tallies {
            lines.push(format!(
                "{}: {} loaded, {} matched, {} added, {} skipped",
                tally.source, tally.loaded, tally.matched, tally.added, tally.skipped
            ));
            loaded += tally.loaded;
            matched += tally.matched;
            added += tally.added;
            skipped += tally.skipped;
        }
        lines.push(format!(
            "total: {loaded} loaded, {matched} matched, {added} added, {skipped} skipped"
        ));
        lines.join("\n")
    }
}

/// Everything a completed run produced, as input for validation and output.
#[derive(Debug)]
pub struct CombineResult {
    pub canonical: CanonicalSet,
    pub summary: RunSummary,

    /// Display names per source as loaded, baseline included.
    pub loaded_names: BTreeMap<String, Vec<String>>,

    /// Display names explicitly skipped, per source.
    pub skipped_names: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(CombineResult),
    /// Controlled early termination; decisions already persisted stay
    /// valid, no output may be written.
    Aborted(RunSummary),
}

// ============================================================================
// COMBINE ENGINE
// ============================================================================

pub struct CombineEngine {
    pub generator: CandidateGenerator,
    pub policy: AutoAcceptPolicy,
}

impl CombineEngine {
    pub fn new() -> Self {
        CombineEngine {
            generator: CandidateGenerator::new(),
            policy: AutoAcceptPolicy::new(),
        }
    }

    /// Merge every non-baseline source onto the baseline, in lexicographic
    /// source order, records in native list order.
    pub fn run(
        &self,
        baseline: &LoadedSource,
        others: &[LoadedSource],
        decisions: &mut DecisionLog,
        prompt: &mut dyn CandidatePrompt,
    ) -> Result<RunOutcome> {
        let mut canonical = CanonicalSet::from_baseline(baseline)?;

        let mut loaded_names: BTreeMap<String, Vec<String>> = BTreeMap::new();
        loaded_names.insert(
            baseline.id.clone(),
            baseline.records.iter().map(|r| r.name.clone()).collect(),
        );
        for source in others {
            loaded_names.insert(
                source.id.clone(),
                source.records.iter().map(|r| r.name.clone()).collect(),
            );
        }

        let mut skipped_names: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut summary = RunSummary::default();

        let mut ordered: Vec<&LoadedSource> = others.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        for source in ordered {
            tracing::info!(
                source = %source.id,
                records = source.records.len(),
                "finding connections"
            );
            let mut taken: HashSet<String> = HashSet::new();
            let mut tally = SourceTally {
                source: source.id.clone(),
                loaded: source.records.len(),
                ..Default::default()
            };

            for record in &source.records {
                let resolution =
                    self.resolve_record(&source.id, record, &canonical, decisions, prompt, &taken)?;
                match resolution {
                    Resolution::Matched(key) => {
                        canonical.add_contribution(&key, &source.id, record.clone())?;
                        taken.insert(key);
                        tally.matched += 1;
                    }
                    Resolution::NewEntry => {
                        let key = canonical.synthesize(&source.id, record.clone())?;
                        taken.insert(key);
                        tally.added += 1;
                    }
                    Resolution::Skipped => {
                        skipped_names
                            .entry(source.id.clone())
                            .or_default()
                            .insert(record.name.clone());
                        tally.skipped += 1;
                    }
                    Resolution::Aborted => {
                        summary.tallies.push(tally);
                        return Ok(RunOutcome::Aborted(summary));
                    }
                }
            }

            summary.tallies.push(tally);
        }

        Ok(RunOutcome::Completed(CombineResult {
            canonical,
            summary,
            loaded_names,
            skipped_names,
        }))
    }

    fn resolve_record(
        &self,
        source_id: &str,
        record: &ProviderRecord,
        canonical: &CanonicalSet,
        decisions: &mut DecisionLog,
        prompt: &mut dyn CandidatePrompt,
        taken: &HashSet<String>,
    ) -> Result<Resolution> {
        // The decision log outranks any computation.
        if let Some(outcome) = decisions.lookup(source_id, &record.name) {
            return match outcome {
                Outcome::Accept(target) => match canonical.key_for_canonical_name(target) {
                    Some(key) => Ok(Resolution::Matched(key)),
                    None => Err(MergeError::UnknownDecisionTarget {
                        source_id: source_id.to_string(),
                        name: record.name.clone(),
                        target: target.clone(),
                    }
                    .into()),
                },
                Outcome::NewEntry => Ok(Resolution::NewEntry),
                Outcome::Skip => Ok(Resolution::Skipped),
            };
        }

        // Short names with an address get the stronger postal-aware key.
        let plain_key = normalize(&record.name);
        let (query, candidates) = if !record.plz.is_empty()
            && plain_key.chars().count() <= self.policy.exact_len_guard
        {
            let query = normalize_with_plz(&record.plz, &record.name);
            let candidates = self.generator.rank(&query, canonical.postal_keyspace());
            (query, candidates)
        } else {
            let candidates = self.generator.rank(&plain_key, canonical.plain_keyspace());
            (plain_key, candidates)
        };

        match self.policy.decide(&query, &record.name, &candidates, taken) {
            PolicyDecision::Accept => {
                let top = &candidates[0];
                tracing::info!(
                    source = source_id,
                    record = %record.name,
                    target = %top.display_name,
                    score = top.score,
                    "auto-accepted match"
                );
                Ok(Resolution::Matched(top.entry_key.clone()))
            }
            PolicyDecision::AutoNew => {
                tracing::info!(
                    source = source_id,
                    record = %record.name,
                    "no candidate above cutoff, adding as new entry"
                );
                Ok(Resolution::NewEntry)
            }
            PolicyDecision::Defer => {
                let ctx = PromptContext {
                    source: source_id,
                    record_line: record.display_line(),
                    candidates: &candidates,
                    taken,
                };
                match prompt.resolve(&ctx)? {
                    PromptReply::Selected(i) => {
                        let chosen = &candidates[i];
                        decisions.append(
                            source_id,
                            &record.name,
                            Outcome::Accept(chosen.display_name.clone()),
                        )?;
                        Ok(Resolution::Matched(chosen.entry_key.clone()))
                    }
                    PromptReply::NewEntry => {
                        decisions.append(source_id, &record.name, Outcome::NewEntry)?;
                        Ok(Resolution::NewEntry)
                    }
                    PromptReply::Skip => {
                        decisions.append(source_id, &record.name, Outcome::Skip)?;
                        Ok(Resolution::Skipped)
                    }
                    PromptReply::Abort => Ok(Resolution::Aborted),
                }
            }
        }
    }
}

impl Default for CombineEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

/// Write the merged table: one column per known source (baseline included),
/// sorted; one row per canonical entry, sorted by key; each cell the display
/// name that source contributed, or empty.
pub fn write_merged_csv(
    path: &Path,
    result: &CombineResult,
    catalog: &SourceCatalog,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)?;

    writer.write_record(catalog.ids())?;

    for (_, entry) in result.canonical.entries() {
        let row: Vec<&str> = catalog
            .ids()
            .map(|id| {
                if id == catalog.baseline_id() {
                    if entry.in_baseline {
                        entry.baseline.name.as_str()
                    } else {
                        ""
                    }
                } else {
                    entry
                        .contributions
                        .get(id)
                        .map(|r| r.name.as_str())
                        .unwrap_or("")
                }
            })
            .collect();
        writer.write_record(row)?;
    }

    writer.flush()?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ScriptedPrompt;
    use crate::sources::SourceExtra;
    use chrono::NaiveDateTime;

    fn timestamp() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-05-05T12:00:00", "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    fn baseline_record(name: &str, plz: &str) -> ProviderRecord {
        ProviderRecord {
            name: name.to_string(),
            street: String::new(),
            city: String::new(),
            plz: plz.to_string(),
            phone: String::new(),
            fax: String::new(),
            note: String::new(),
            mail: String::new(),
            homepage: String::new(),
            extra: SourceExtra::Baseline {
                kennzeichnung_url: String::new(),
            },
        }
    }

    fn verivox_record(name: &str, plz: &str) -> ProviderRecord {
        ProviderRecord {
            extra: SourceExtra::Verivox {
                portal_url: String::new(),
            },
            ..baseline_record(name, plz)
        }
    }

    fn baseline_source(names: &[&str]) -> LoadedSource {
        LoadedSource {
            id: "rowo2019".to_string(),
            created: timestamp(),
            records: names.iter().map(|n| baseline_record(n, "")).collect(),
        }
    }

    fn verivox_source(names: &[&str]) -> LoadedSource {
        LoadedSource {
            id: "verivox".to_string(),
            created: timestamp(),
            records: names.iter().map(|n| verivox_record(n, "")).collect(),
        }
    }

    fn temp_decisions(dir: &tempfile::TempDir) -> DecisionLog {
        DecisionLog::open(dir.path().join("selections.csv")).unwrap()
    }

    fn completed(outcome: RunOutcome) -> CombineResult {
        match outcome {
            RunOutcome::Completed(result) => result,
            RunOutcome::Aborted(_) => panic!("run aborted unexpectedly"),
        }
    }

    #[test]
    fn test_exact_match_fast_path_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);
        let mut prompt = ScriptedPrompt::new([]);

        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let source = verivox_source(&["Musterstadt Stadtwerke GmbH"]);

        let engine = CombineEngine::new();
        let result = completed(
            engine
                .run(&baseline, &[source], &mut decisions, &mut prompt)
                .unwrap(),
        );

        assert_eq!(result.canonical.len(), 1);
        let (_, entry) = result.canonical.entries().next().unwrap();
        assert!(entry.in_baseline);
        assert_eq!(entry.baseline.name, "Stadtwerke Musterstadt");
        assert_eq!(
            entry.contributions.get("verivox").map(|r| r.name.as_str()),
            Some("Musterstadt Stadtwerke GmbH")
        );
        // Fully automatic: no prompt, no persisted decision.
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_record_below_cutoff_becomes_new_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);
        let mut prompt = ScriptedPrompt::new([]);

        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let source = verivox_source(&["Phantomkraftwerk Xyz"]);

        let engine = CombineEngine::new();
        let result = completed(
            engine
                .run(&baseline, &[source], &mut decisions, &mut prompt)
                .unwrap(),
        );

        assert_eq!(result.canonical.len(), 2);
        let key = normalize("Phantomkraftwerk Xyz");
        let entry = result
            .canonical
            .entries()
            .find(|(k, _)| **k == key)
            .map(|(_, e)| e)
            .unwrap();
        assert!(!entry.in_baseline);
        assert_eq!(entry.contributions.len(), 1);
        assert_eq!(
            entry.contributions.get("verivox").map(|r| r.name.as_str()),
            Some("Phantomkraftwerk Xyz")
        );
        assert_eq!(result.summary.tallies[0].added, 1);
    }

    #[test]
    fn test_decision_log_outranks_matching() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);
        // Would auto-match without the log; the persisted skip wins.
        decisions
            .append("verivox", "Stadtwerke Musterstadt", Outcome::Skip)
            .unwrap();
        let mut prompt = ScriptedPrompt::new([]);

        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let source = verivox_source(&["Stadtwerke Musterstadt"]);

        let engine = CombineEngine::new();
        let result = completed(
            engine
                .run(&baseline, &[source], &mut decisions, &mut prompt)
                .unwrap(),
        );

        let (_, entry) = result.canonical.entries().next().unwrap();
        assert!(entry.contributions.is_empty());
        assert!(result.skipped_names["verivox"].contains("Stadtwerke Musterstadt"));
        assert_eq!(result.summary.tallies[0].skipped, 1);
    }

    #[test]
    fn test_interactive_selection_is_persisted_and_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);

        let baseline =
            baseline_source(&["Stadtwerke Musterstadt", "Stadtwerke Musterstedt"]);
        // One edit away from both baseline keys: ambiguous, must prompt.
        let source = verivox_source(&["Musterstodt AG"]);
        let engine = CombineEngine::new();

        let mut prompt = ScriptedPrompt::new([PromptReply::Selected(0)]);
        let result = completed(
            engine
                .run(&baseline, &[source.clone()], &mut decisions, &mut prompt)
                .unwrap(),
        );
        assert!(prompt.exhausted());

        assert_eq!(
            decisions.lookup("verivox", "Musterstodt AG"),
            Some(&Outcome::Accept("Stadtwerke Musterstadt".to_string()))
        );
        let entry = result
            .canonical
            .entries()
            .find(|(k, _)| **k == "musterstadt")
            .map(|(_, e)| e)
            .unwrap();
        assert_eq!(
            entry.contributions.get("verivox").map(|r| r.name.as_str()),
            Some("Musterstodt AG")
        );

        // Replay: same inputs, reloaded log, zero prompts, same merge.
        let mut reloaded = DecisionLog::open(dir.path().join("selections.csv")).unwrap();
        let mut no_prompt = ScriptedPrompt::new([]);
        let replayed = completed(
            engine
                .run(&baseline, &[source], &mut reloaded, &mut no_prompt)
                .unwrap(),
        );
        let entry = replayed
            .canonical
            .entries()
            .find(|(k, _)| **k == "musterstadt")
            .map(|(_, e)| e)
            .unwrap();
        assert_eq!(
            entry.contributions.get("verivox").map(|r| r.name.as_str()),
            Some("Musterstodt AG")
        );
    }

    #[test]
    fn test_taken_key_blocks_second_auto_accept() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);

        let baseline = baseline_source(&["Energieversorgung Musterstadt Altmark GmbH"]);
        // First record claims the entry via exact key; the second scores
        // high enough for auto-accept but the key is taken, so it prompts.
        let source = verivox_source(&[
            "Energieversorgung Musterstadt Altmark",
            "Energieversorgung Musterstadt Altmarkt",
        ]);

        let engine = CombineEngine::new();
        let mut prompt = ScriptedPrompt::new([PromptReply::Skip]);
        let result = completed(
            engine
                .run(&baseline, &[source], &mut decisions, &mut prompt)
                .unwrap(),
        );

        assert!(prompt.exhausted(), "second record must have prompted");
        let (_, entry) = result.canonical.entries().next().unwrap();
        assert_eq!(
            entry.contributions.get("verivox").map(|r| r.name.as_str()),
            Some("Energieversorgung Musterstadt Altmark")
        );
        assert!(
            result.skipped_names["verivox"].contains("Energieversorgung Musterstadt Altmarkt")
        );
    }

    #[test]
    fn test_abort_stops_run_and_keeps_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);

        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let source = verivox_source(&["Musterstadt GmbH", "Musterstodt AG", "Nachzügler"]);

        let engine = CombineEngine::new();
        let mut prompt = ScriptedPrompt::new([PromptReply::Abort]);
        let outcome = engine
            .run(&baseline, &[source], &mut decisions, &mut prompt)
            .unwrap();

        let RunOutcome::Aborted(summary) = outcome else {
            panic!("expected aborted outcome");
        };
        assert_eq!(summary.tallies.len(), 1);
        assert_eq!(summary.tallies[0].matched, 1);
        assert_eq!(summary.tallies[0].added, 0);
        assert_eq!(summary.tallies[0].skipped, 0);
        // Abort itself is never recorded.
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_postal_key_guards_short_ambiguous_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);

        let baseline = LoadedSource {
            id: "rowo2019".to_string(),
            created: timestamp(),
            records: vec![baseline_record("Stadtwerke Husum GmbH", "25813")],
        };
        // Same plain key "husum" for both; the second record's postal code
        // differs, so it must not silently merge onto the utility.
        let source = LoadedSource {
            id: "stromauskunft".to_string(),
            created: timestamp(),
            records: vec![
                {
                    let mut r = verivox_record("Stadtwerke Husum GmbH", "25813");
                    r.extra = SourceExtra::Stromauskunft {
                        portal_url: String::new(),
                    };
                    r
                },
                {
                    let mut r = verivox_record("Husum Strom GmbH", "25850");
                    r.extra = SourceExtra::Stromauskunft {
                        portal_url: String::new(),
                    };
                    r
                },
            ],
        };

        let engine = CombineEngine::new();
        let mut prompt = ScriptedPrompt::new([PromptReply::Skip]);
        let result = completed(
            engine
                .run(&baseline, &[source], &mut decisions, &mut prompt)
                .unwrap(),
        );

        assert!(prompt.exhausted(), "retail arm must reach the prompt");
        let (_, entry) = result.canonical.entries().next().unwrap();
        assert_eq!(
            entry
                .contributions
                .get("stromauskunft")
                .map(|r| r.name.as_str()),
            Some("Stadtwerke Husum GmbH")
        );
        assert!(result.skipped_names["stromauskunft"].contains("Husum Strom GmbH"));
    }

    #[test]
    fn test_synthesis_onto_existing_key_is_fatal() {
        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let mut canonical = CanonicalSet::from_baseline(&baseline).unwrap();

        let err = canonical
            .synthesize("verivox", verivox_record("Musterstadt Energie GmbH", ""))
            .unwrap_err();
        assert!(matches!(err, MergeError::KeyCollision { .. }));
    }

    #[test]
    fn test_accept_decision_with_unknown_target_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);
        decisions
            .append(
                "verivox",
                "Musterstodt AG",
                Outcome::Accept("Verschwundene Werke".to_string()),
            )
            .unwrap();

        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let source = verivox_source(&["Musterstodt AG"]);

        let engine = CombineEngine::new();
        let mut prompt = ScriptedPrompt::new([]);
        let err = engine
            .run(&baseline, &[source], &mut decisions, &mut prompt)
            .unwrap_err();
        let fatal = err.downcast::<MergeError>().unwrap();
        assert!(matches!(fatal, MergeError::UnknownDecisionTarget { .. }));
    }

    #[test]
    fn test_sources_processed_in_lexicographic_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);
        let mut prompt = ScriptedPrompt::new([]);

        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let verivox = verivox_source(&["Nordlicht Neu"]);
        let oekotest = LoadedSource {
            id: "oekotest".to_string(),
            created: timestamp(),
            records: vec![ProviderRecord {
                extra: SourceExtra::Oekotest {
                    tarif: String::new(),
                    tarif_url: String::new(),
                    bewertung: String::new(),
                },
                ..baseline_record("Südstrom Neu", "")
            }],
        };

        let engine = CombineEngine::new();
        // Pass them unsorted; the engine must order by id.
        let result = completed(
            engine
                .run(
                    &baseline,
                    &[verivox, oekotest],
                    &mut decisions,
                    &mut prompt,
                )
                .unwrap(),
        );

        let order: Vec<&str> = result
            .summary
            .tallies
            .iter()
            .map(|t| t.source.as_str())
            .collect();
        assert_eq!(order, vec!["oekotest", "verivox"]);
    }

    #[test]
    fn test_merged_csv_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut decisions = temp_decisions(&dir);
        let mut prompt = ScriptedPrompt::new([]);

        let baseline = baseline_source(&["Stadtwerke Musterstadt"]);
        let source = verivox_source(&["Musterstadt Stadtwerke GmbH", "Phantomkraftwerk Xyz"]);

        let engine = CombineEngine::new();
        let result = completed(
            engine
                .run(&baseline, &[source], &mut decisions, &mut prompt)
                .unwrap(),
        );

        let out_path = dir.path().join("combined.csv");
        write_merged_csv(&out_path, &result, &SourceCatalog::standard()).unwrap();
        let text = std::fs::read_to_string(&out_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "oekotest;ok-power;rowo2019;stromauskunft;verivox"
        );
        // Rows sorted by canonical key: "musterstadt" < "phantomkraftwerk xyz".
        assert_eq!(
            lines[1],
            ";;Stadtwerke Musterstadt;;Musterstadt Stadtwerke GmbH"
        );
        assert_eq!(lines[2], ";;;;Phantomkraftwerk Xyz");
    }
}
