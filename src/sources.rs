// 📦 Source Schemas & Loader - One record shape per scraped dataset
// Each scraper collaborator writes `<sourceId>.json`; the catalog decides
// which schema variant a file is read with.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::MergeError;
use crate::normalize::normalize;

// ============================================================================
// PROVIDER RECORD
// ============================================================================

/// One provider offering as reported by one source. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub name: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub plz: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub fax: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default)]
    pub homepage: String,

    /// Source-specific extension fields (closed set, one variant per source).
    pub extra: SourceExtra,
}

/// Extension fields per source schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceExtra {
    Baseline {
        kennzeichnung_url: String,
    },
    Oekotest {
        tarif: String,
        tarif_url: String,
        bewertung: String,
    },
    OkPower {
        tarif: String,
        tarif_url: String,
        cert_info: String,
    },
    Stromauskunft {
        portal_url: String,
    },
    Verivox {
        portal_url: String,
    },
}

impl ProviderRecord {
    /// One-line rendering for prompts: name, address if present, then the
    /// non-empty contact fields.
    pub fn display_line(&self) -> String {
        let mut line = self.name.clone();

        if !(self.plz.is_empty() && self.city.is_empty() && self.street.is_empty()) {
            line.push_str(&format!(" - {} {} {}", self.plz, self.city, self.street));
            while line.ends_with(' ') {
                line.pop();
            }
        }

        for (label, value) in [
            ("phone", &self.phone),
            ("mail", &self.mail),
            ("web", &self.homepage),
            ("note", &self.note),
        ] {
            if !value.is_empty() {
                line.push_str(&format!(" {label}={value}"));
            }
        }

        line
    }
}

// ============================================================================
// SOURCE CATALOG (explicit configuration, no global registry)
// ============================================================================

/// Which record schema a source file is read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Baseline,
    Oekotest,
    OkPower,
    Stromauskunft,
    Verivox,
}

/// Startup configuration mapping source identifiers to their schema.
/// Built once in `main` and threaded through as a parameter.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    entries: BTreeMap<String, SourceKind>,
    baseline: String,
}

impl SourceCatalog {
    /// The five datasets of the original research project.
    pub fn standard() -> Self {
        let entries = BTreeMap::from([
            ("rowo2019".to_string(), SourceKind::Baseline),
            ("oekotest".to_string(), SourceKind::Oekotest),
            ("ok-power".to_string(), SourceKind::OkPower),
            ("stromauskunft".to_string(), SourceKind::Stromauskunft),
            ("verivox".to_string(), SourceKind::Verivox),
        ]);
        SourceCatalog {
            entries,
            baseline: "rowo2019".to_string(),
        }
    }

    pub fn kind_of(&self, source: &str) -> Result<SourceKind, MergeError> {
        self.entries
            .get(source)
            .copied()
            .ok_or_else(|| MergeError::UnknownSource(source.to_string()))
    }

    pub fn baseline_id(&self) -> &str {
        &self.baseline
    }

    /// All known source identifiers in sorted order (baseline included).
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// ============================================================================
// SCRAPE FILE ENVELOPE
// ============================================================================

/// JSON envelope every scraper collaborator writes.
#[derive(Debug, Deserialize)]
struct ScrapeFile<T> {
    results: Vec<T>,
    source: String,
    create: NaiveDateTime,
}

/// A fully loaded source dataset, in the source's native record order.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub id: String,
    pub created: NaiveDateTime,
    pub records: Vec<ProviderRecord>,
}

// Per-schema wire structs. Base fields are repeated through `RawBase` via
// flatten; extension fields default to empty like the base ones do.

#[derive(Debug, Deserialize)]
struct RawBase {
    name: String,
    #[serde(default)]
    street: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    plz: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    fax: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    mail: String,
    #[serde(default)]
    homepage: String,
}

impl RawBase {
    fn into_record(self, extra: SourceExtra) -> ProviderRecord {
        ProviderRecord {
            name: self.name,
            street: self.street,
            city: self.city,
            plz: self.plz,
            phone: self.phone,
            fax: self.fax,
            note: self.note,
            mail: self.mail,
            homepage: self.homepage,
            extra,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBaseline {
    #[serde(flatten)]
    base: RawBase,
    #[serde(default)]
    kennzeichnung_url: String,
}

#[derive(Debug, Deserialize)]
struct RawOekotest {
    #[serde(flatten)]
    base: RawBase,
    #[serde(default)]
    tarif: String,
    #[serde(default)]
    tarif_url: String,
    #[serde(default)]
    bewertung: String,
}

#[derive(Debug, Deserialize)]
struct RawOkPower {
    #[serde(flatten)]
    base: RawBase,
    #[serde(default)]
    tarif: String,
    #[serde(default)]
    tarif_url: String,
    #[serde(default)]
    cert_info: String,
}

#[derive(Debug, Deserialize)]
struct RawPortal {
    #[serde(flatten)]
    base: RawBase,
    #[serde(default)]
    portal_url: String,
}

// ============================================================================
// COLLISION EXCEPTION TABLE
// ============================================================================

/// Known real-world collisions exempted from the within-source
/// key-uniqueness check. Currently a single entry: the Husum municipal
/// utility and its retail arm normalize to the same key; their records
/// stay apart through the postal-aware key when addresses are present.
///
/// Any new entry here must name a verified distinct-provider pair.
pub const ALLOWED_KEY_COLLISIONS: &[(&str, &str)] = &[("stromauskunft", "husum")];

fn collision_allowed(source: &str, key: &str) -> bool {
    ALLOWED_KEY_COLLISIONS
        .iter()
        .any(|(s, k)| *s == source && *k == key)
}

// ============================================================================
// LOADING
// ============================================================================

/// Parse one scrape file's text with the schema the catalog declared.
pub fn parse_scrape_file(
    kind: SourceKind,
    source_id: &str,
    path: &str,
    text: &str,
) -> Result<LoadedSource> {
    fn read<T: serde::de::DeserializeOwned>(
        path: &str,
        text: &str,
    ) -> Result<ScrapeFile<T>, MergeError> {
        serde_json::from_str(text).map_err(|e| MergeError::MalformedScrapeFile {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    let (records, meta) = match kind {
        SourceKind::Baseline => {
            let file = read::<RawBaseline>(path, text)?;
            let records = file
                .results
                .into_iter()
                .map(|r| {
                    let extra = SourceExtra::Baseline {
                        kennzeichnung_url: r.kennzeichnung_url,
                    };
                    r.base.into_record(extra)
                })
                .collect();
            (records, (file.source, file.create))
        }
        SourceKind::Oekotest => {
            let file = read::<RawOekotest>(path, text)?;
            let records = file
                .results
                .into_iter()
                .map(|r| {
                    let extra = SourceExtra::Oekotest {
                        tarif: r.tarif,
                        tarif_url: r.tarif_url,
                        bewertung: r.bewertung,
                    };
                    r.base.into_record(extra)
                })
                .collect();
            (records, (file.source, file.create))
        }
        SourceKind::OkPower => {
            let file = read::<RawOkPower>(path, text)?;
            let records = file
                .results
                .into_iter()
                .map(|r| {
                    let extra = SourceExtra::OkPower {
                        tarif: r.tarif,
                        tarif_url: r.tarif_url,
                        cert_info: r.cert_info,
                    };
                    r.base.into_record(extra)
                })
                .collect();
            (records, (file.source, file.create))
        }
        SourceKind::Stromauskunft => {
            let file = read::<RawPortal>(path, text)?;
            let records = file
                .results
                .into_iter()
                .map(|r| {
                    let extra = SourceExtra::Stromauskunft {
                        portal_url: r.portal_url,
                    };
                    r.base.into_record(extra)
                })
                .collect();
            (records, (file.source, file.create))
        }
        SourceKind::Verivox => {
            let file = read::<RawPortal>(path, text)?;
            let records = file
                .results
                .into_iter()
                .map(|r| {
                    let extra = SourceExtra::Verivox {
                        portal_url: r.portal_url,
                    };
                    r.base.into_record(extra)
                })
                .collect();
            (records, (file.source, file.create))
        }
    };

    let (declared_source, created) = meta;
    if declared_source != source_id {
        return Err(MergeError::SourceMismatch {
            path: path.to_string(),
            found: declared_source,
            expected: source_id.to_string(),
        }
        .into());
    }

    let loaded = LoadedSource {
        id: source_id.to_string(),
        created,
        records,
    };
    check_key_uniqueness(&loaded)?;
    Ok(loaded)
}

/// Within one source, normalized keys must be unique, except for the pairs
/// in the allowed-collision table.
fn check_key_uniqueness(source: &LoadedSource) -> Result<(), MergeError> {
    let mut seen: HashMap<String, &str> = HashMap::new();

    for record in &source.records {
        let key = normalize(&record.name);
        if let Some(first) = seen.get(key.as_str()) {
            if collision_allowed(&source.id, &key) {
                tracing::warn!(
                    source = %source.id,
                    key = %key,
                    "allowed key collision between '{}' and '{}'",
                    first,
                    record.name
                );
                continue;
            }
            return Err(MergeError::DuplicateSourceKey {
                source_id: source.id.clone(),
                key,
                first: first.to_string(),
                second: record.name.clone(),
            });
        }
        seen.insert(key, &record.name);
    }

    Ok(())
}

/// Load every `*.json` file in the data directory through the catalog.
/// Returns the sources sorted by identifier.
pub fn load_sources(dir: &Path, catalog: &SourceCatalog) -> Result<Vec<LoadedSource>> {
    let mut loaded = Vec::new();

    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read data directory {}", dir.display()))?;

    let mut paths: Vec<_> = entries
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list data directory {}", dir.display()))?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    for path in paths {
        let source_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let kind = catalog.kind_of(&source_id)?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read scrape file {}", path.display()))?;
        let source = parse_scrape_file(kind, &source_id, &path.display().to_string(), &text)?;
        tracing::info!(source = %source.id, records = source.records.len(), "loaded source");
        loaded.push(source);
    }

    loaded.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(loaded)
}

// ============================================================================
// TESTS
// ============================================================================
