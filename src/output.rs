use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::domain::{AnnotationCategory, Contig, MetaEntry};
use crate::error::IndexerError;
use crate::import::{ImportSink, ImportSummary};
use crate::merge::MergeStats;
use crate::store::ContigStore;

#[derive(Debug, Clone, Serialize)]
pub struct SuggestResult {
    pub category: AnnotationCategory,
    pub query: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub store: String,
    pub contig_count: u64,
    pub facets: BTreeMap<String, u64>,
    pub meta: Vec<MetaEntry>,
}

impl StatsResult {
    pub fn collect(store: &ContigStore) -> Result<Self, IndexerError> {
        let mut facets = BTreeMap::new();
        for category in AnnotationCategory::ALL {
            facets.insert(
                category.presence_name().to_string(),
                store.count_with(category)?,
            );
        }
        Ok(Self {
            store: store.location().to_string(),
            contig_count: store.count()?,
            facets,
            meta: store.all_meta()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetResult {
    pub store: String,
    pub removed: u64,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &ImportSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_suggestions(result: &SuggestResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_stats(result: &StatsResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_contig(contig: &Contig) -> io::Result<()> {
        Self::print_json(contig)
    }

    pub fn print_reset(result: &ResetResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards import lifecycle events to `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl ImportSink for LogSink {
    fn on_begin(&self) {
        info!("import begin");
    }

    fn on_progress(&self, bytes_read: u64, total_bytes: Option<u64>) {
        match total_bytes {
            Some(total) if total > 0 => debug!(
                bytes_read,
                total,
                percent = (bytes_read as f64 / total as f64 * 100.0).min(100.0),
                "import progress"
            ),
            _ => debug!(bytes_read, "import progress"),
        }
    }

    fn on_batch_merged(&self, stats: &MergeStats) {
        debug!(inserted = stats.inserted, updated = stats.updated, "batch stored");
    }

    fn on_end(&self, summary: &ImportSummary) {
        info!(
            contigs = summary.contig_count,
            elapsed_seconds = summary.elapsed_seconds,
            "import end"
        );
    }

    fn on_error(&self, err: &IndexerError) {
        error!(error = %err, "import error");
    }

    fn on_cancelled(&self) {
        info!("import cancelled");
    }
}
