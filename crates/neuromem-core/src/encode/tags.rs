//! Tag normalization - Synonym folding and near-match canonicalization
//!
//! Raw tags pass through a synonym table, then a SimHash near-match
//! against tags the brain has already canonicalized. The first writer of
//! a tag shape wins; later variants fold onto it.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use std::collections::HashMap;

use crate::extract::simhash::{is_near_duplicate, simhash};
use crate::storage::{Result, Store};

/// Common tag synonyms folded before canonicalization
static TAG_SYNONYMS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("db", "database"),
        ("postgres", "postgresql"),
        ("pg", "postgresql"),
        ("k8s", "kubernetes"),
        ("js", "javascript"),
        ("ts", "typescript"),
        ("config", "configuration"),
        ("docs", "documentation"),
        ("repo", "repository"),
        ("infra", "infrastructure"),
        ("perf", "performance"),
        ("deps", "dependencies"),
    ])
});

/// Normalize one raw tag against the brain's canonical tag table.
///
/// Lowercases and trims, folds synonyms, then looks for a recorded tag
/// within SimHash near-match distance; falling back to the tag itself.
/// The resolved mapping is recorded so future variants fold the same way.
pub fn normalize_tag(store: &Store, raw: &str) -> Result<String> {
    let trimmed = raw.trim().to_lowercase().replace([' ', '\t'], "-");
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    let folded = TAG_SYNONYMS
        .get(trimmed.as_str())
        .map(|s| (*s).to_string())
        .unwrap_or(trimmed);

    // Exact mapping recorded earlier wins
    if let Some(canonical) = store.canonical_tag(&folded)? {
        return Ok(canonical);
    }

    // Near-match against recorded canonical tags
    let probe = simhash(&folded);
    for candidate in store.all_canonical_tags()? {
        if is_near_duplicate(probe, simhash(&candidate)) {
            store.save_canonical_tag(&folded, &candidate)?;
            return Ok(candidate);
        }
    }

    store.save_canonical_tag(&folded, &folded)?;
    Ok(folded)
}

/// Normalize a whole tag set, dropping empties and duplicates
pub fn normalize_tags<'a>(
    store: &Store,
    raw: impl IntoIterator<Item = &'a str>,
) -> Result<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    for tag in raw {
        let normalized = normalize_tag(store, tag)?;
        if !normalized.is_empty() {
            out.insert(normalized);
        }
    }
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================
