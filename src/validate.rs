// ✅ Post-Merge Validation - No output until the dataset is consistent
// Three checks, each fatal: no duplicate attribution, no duplicate loaded
// names, and full coverage of everything that was loaded.

use std::collections::{BTreeMap, HashSet};

use crate::combine::CombineResult;
use crate::error::MergeError;
use crate::sources::SourceCatalog;

/// Run all consistency checks over a completed merge.
/// Returns the first violation found; the merge must not produce output
/// if any check fails.
pub fn validate(result: &CombineResult, catalog: &SourceCatalog) -> Result<(), MergeError> {
    let attributed = attributed_names(result, catalog);

    check_no_repeated_attribution(&attributed)?;
    check_no_duplicate_loaded_names(result)?;
    check_completeness(result, &attributed)?;

    Ok(())
}

/// Display names that ended up attributed to some canonical entry,
/// collected per source (baseline included).
fn attributed_names(
    result: &CombineResult,
    catalog: &SourceCatalog,
) -> BTreeMap<String, Vec<String>> {
    let mut attributed: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (_, entry) in result.canonical.entries() {
        if entry.in_baseline {
            attributed
                .entry(catalog.baseline_id().to_string())
                .or_default()
                .push(entry.baseline.name.clone());
        }
        for (source, record) in &entry.contributions {
            attributed
                .entry(source.clone())
                .or_default()
                .push(record.name.clone());
        }
    }

    attributed
}

/// Check 1: no display name attributed to more than one entry.
fn check_no_repeated_attribution(
    attributed: &BTreeMap<String, Vec<String>>,
) -> Result<(), MergeError> {
    for (source, names) in attributed {
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(MergeError::RepeatedAttribution {
                    source_id: source.clone(),
                    name: name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Check 2: display names unique within each source's input list,
/// independent of the merge itself.
fn check_no_duplicate_loaded_names(result: &CombineResult) -> Result<(), MergeError> {
    for (source, names) in &result.loaded_names {
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.as_str()) {
                return Err(MergeError::DuplicateLoadedName {
                    source_id: source.clone(),
                    name: name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Check 3: everything loaded was merged or explicitly skipped.
/// A silently dropped record is a fatal inconsistency.
fn check_completeness(
    result: &CombineResult,
    attributed: &BTreeMap<String, Vec<String>>,
) -> Result<(), MergeError> {
    static EMPTY: Vec<String> = Vec::new();

    for (source, names) in &result.loaded_names {
        let attributed_set: HashSet<&str> = attributed
            .get(source)
            .unwrap_or(&EMPTY)
            .iter()
            .map(String::as_str)
            .collect();
        let skipped = result.skipped_names.get(source);

        for name in names {
            let is_skipped = skipped.is_some_and(|s| s.contains(name));
            if !attributed_set.contains(name.as_str()) && !is_skipped {
                return Err(MergeError::IncompleteMerge {
                    source_id: source.clone(),
                    name: name.clone(),
                });
            }
        }
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
