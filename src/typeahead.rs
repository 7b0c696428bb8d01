use std::collections::BTreeSet;

use tracing::warn;

use crate::domain::AnnotationCategory;
use crate::error::IndexerError;
use crate::store::ContigStore;

pub const DEFAULT_LIMIT: usize = 10;

/// Records fetched per requested suggestion; one contig often carries many
/// values of the same category.
const OVERFETCH_FACTOR: usize = 3;

/// Distinct `category` values starting with `query` (case-insensitive),
/// sorted and truncated to `limit`. Storage failures are logged and yield an
/// empty list.
pub fn suggest(
    store: &ContigStore,
    query: &str,
    category: AnnotationCategory,
    limit: usize,
) -> Vec<String> {
    let query = query.trim();
    if query.is_empty() || limit == 0 {
        return Vec::new();
    }
    match lookup(store, &query.to_uppercase(), category, limit) {
        Ok(suggestions) => suggestions,
        Err(err) => {
            warn!(%category, query, error = %err, "typeahead lookup failed");
            Vec::new()
        }
    }
}

fn lookup(
    store: &ContigStore,
    normalized: &str,
    category: AnnotationCategory,
    limit: usize,
) -> Result<Vec<String>, IndexerError> {
    let contigs =
        store.find_by_annotation_prefix(category, normalized, limit.saturating_mul(OVERFETCH_FACTOR))?;
    let matches = contigs
        .iter()
        .flat_map(|contig| contig.annotations().get(category).iter())
        .filter(|value| value.to_uppercase().starts_with(normalized))
        .cloned()
        .collect::<BTreeSet<_>>();
    Ok(matches.into_iter().take(limit).collect())
}
