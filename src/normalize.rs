// 🔤 Name Normalizer - Canonical comparison keys for provider names
// "Stadtwerke Musterstadt GmbH" and "musterstadt" must collapse to the
// same key before any similarity scoring happens.

// ============================================================================
// SUBSTITUTIONS & VOCABULARY
// ============================================================================

/// Literal substitutions, applied in order. `e-werk` must run before the
/// dash substitution or it can never match a whole token again.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("ä", "ae"),
    ("ö", "oe"),
    ("ü", "ue"),
    ("ß", "sz"),
    ("e-werk", ""),
    ("marke der", ""),
    ("&", ""),
    (";", ""),
    (":", " "),
    ("-", " "),
];

/// Legal-form and commodity words that occur in many provider names and
/// only confuse fuzzy matching.
const WORDS_TO_REMOVE: &[&str] = &[
    "gmbh",
    "ag",
    "kg",
    "eg",
    "co.",
    "stadtwerke",
    "gemeindewerke",
    "energie",
    "gas",
    "strom",
    "stromversorgung",
];

/// Sentinel prefix for names starting with a digit, so the word-removal
/// pass cannot strip the leading token.
const DIGIT_SENTINEL: &str = "_ ";

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize a raw provider name into its comparison key.
///
/// Lower-cases, transliterates German umlauts and ß, strips the
/// low-information vocabulary and re-joins the remaining words with
/// single spaces. Deterministic; degenerate names may normalize to an
/// empty key, which downstream matching scores like any other key.
pub fn normalize(name: &str) -> String {
    let mut name = name.to_lowercase();

    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name = format!("{DIGIT_SENTINEL}{name}");
    }

    for (search, replace) in REPLACEMENTS {
        name = name.replace(search, replace);
    }

    name.split_whitespace()
        .filter(|word| !WORDS_TO_REMOVE.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Postal-aware variant: the same function over `"{plz} {name}"`.
///
/// Used as a stronger key when a short name alone cannot disambiguate
/// two providers.
pub fn normalize_with_plz(plz: &str, name: &str) -> String {
    normalize(&format!("{plz} {name}"))
}

// ============================================================================
// TESTS
// ============================================================================
