use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::{Annotations, Contig, FeatureRow, contig_name_to_id};
use crate::error::IndexerError;
use crate::store::ContigStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingContig {
    contig_name: String,
    annotations: Annotations,
}

/// Folds a batch into one bundle per contig, keyed by contig id.
fn group_rows(rows: &[FeatureRow]) -> Result<BTreeMap<u64, PendingContig>, IndexerError> {
    let mut pending = BTreeMap::<u64, PendingContig>::new();
    for row in rows {
        let contig_id = contig_name_to_id(&row.seq_id)?;
        let incoming = Annotations::from_attributes(&row.attributes);
        pending
            .entry(contig_id)
            .and_modify(|bundle| bundle.annotations.union_with(&incoming))
            .or_insert_with(|| PendingContig {
                contig_name: row.seq_id.clone(),
                annotations: incoming.clone(),
            });
    }
    Ok(pending)
}

/// Merges one parsed batch into the store as a single transaction: one bulk
/// read of the batch's contigs, a per-category set union for records already
/// stored, fresh records for the rest.
///
/// Callers must not run merges concurrently against one store; a contig's
/// rows can span batches and the read-merge-write relies on batches being
/// applied one after another.
pub fn merge_batch(store: &ContigStore, rows: &[FeatureRow]) -> Result<MergeStats, IndexerError> {
    if rows.is_empty() {
        return Ok(MergeStats::default());
    }
    let pending = group_rows(rows)?;
    let ids = pending.keys().copied().collect::<Vec<_>>();

    let stats = store.transaction(|tx| {
        let mut existing = tx
            .bulk_get(&ids)?
            .into_iter()
            .map(|contig| (contig.contig_id(), contig))
            .collect::<BTreeMap<_, _>>();

        let mut stats = MergeStats::default();
        let mut writes = Vec::with_capacity(pending.len());
        for (contig_id, bundle) in &pending {
            match existing.remove(contig_id) {
                Some(mut contig) => {
                    contig.merge_annotations(&bundle.annotations);
                    writes.push(contig);
                    stats.updated += 1;
                }
                None => {
                    writes.push(Contig::from_parts(
                        *contig_id,
                        bundle.contig_name.clone(),
                        None,
                        bundle.annotations.clone(),
                    ));
                    stats.inserted += 1;
                }
            }
        }
        tx.bulk_put(&writes)?;
        Ok(stats)
    })?;

    debug!(
        rows = rows.len(),
        inserted = stats.inserted,
        updated = stats.updated,
        "batch merged"
    );
    Ok(stats)
}
