//! Import orchestrator.
//!
//! `Idle -> Beginning -> Streaming -> LengthAugmenting -> Completed`, with
//! `Cancelled` and `Failed` reachable from every non-terminal state. Batches
//! are merged one at a time, in the order the parser produced them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender, select};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_BATCH_SIZE, default_attributes_to_index};
use crate::domain::MetaKey;
use crate::error::IndexerError;
use crate::fasta::{IndexedFasta, augment_lengths};
use crate::merge::{MergeStats, merge_batch};
use crate::parser::{BatchAck, ParserConfig, ParserMessage, ParserWorker, StreamStats};
use crate::source::{RangeSource, SourceProvider};
use crate::store::ContigStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    pub url: String,
    pub assembly_accession: String,
    pub index_url: String,
    pub fasta_url: Option<String>,
    pub fasta_fai_url: Option<String>,
    pub fasta_gzi_url: Option<String>,
    pub attributes_to_index: Vec<String>,
    pub batch_size: usize,
    pub clear_existing: bool,
}

impl ImportOptions {
    pub fn new(
        url: impl Into<String>,
        index_url: impl Into<String>,
        assembly_accession: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            assembly_accession: assembly_accession.into(),
            index_url: index_url.into(),
            fasta_url: None,
            fasta_fai_url: None,
            fasta_gzi_url: None,
            attributes_to_index: default_attributes_to_index(),
            batch_size: DEFAULT_BATCH_SIZE,
            clear_existing: true,
        }
    }

    /// All three FASTA locations, or `None` when any is missing.
    pub fn fasta_locations(&self) -> Option<(&str, &str, &str)> {
        match (&self.fasta_url, &self.fasta_fai_url, &self.fasta_gzi_url) {
            (Some(fasta), Some(fai), Some(gzi)) => Some((fasta, fai, gzi)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Idle,
    Beginning,
    Streaming,
    LengthAugmenting,
    Completed,
    Cancelled,
    Failed,
}

impl ImportState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportState::Completed | ImportState::Cancelled | ImportState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub elapsed_seconds: f64,
    pub contig_count: u64,
    pub rows: u64,
    pub batches: u64,
    pub bytes_read: u64,
    pub lengths_updated: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportOutcome {
    Completed(ImportSummary),
    Cancelled,
}

/// Lifecycle callbacks. Every method defaults to a no-op.
pub trait ImportSink {
    fn on_begin(&self) {}
    fn on_progress(&self, _bytes_read: u64, _total_bytes: Option<u64>) {}
    fn on_batch_merged(&self, _stats: &MergeStats) {}
    fn on_end(&self, _summary: &ImportSummary) {}
    fn on_error(&self, _error: &IndexerError) {}
    fn on_cancelled(&self) {}
}

/// Requests cooperative cancellation of one import. Cloneable and `Send`.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    signal: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.signal.try_send(());
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct ImportJob<P: SourceProvider> {
    store: ContigStore,
    provider: P,
    options: ImportOptions,
    state: Mutex<ImportState>,
    cancel: CancelHandle,
    cancel_signal: Receiver<()>,
}

/// Prepares an import of `options.url` into `store`. Nothing runs until
/// [`ImportJob::start`]. Imports into one store must not overlap.
pub fn import_features<P: SourceProvider>(
    store: &ContigStore,
    provider: P,
    options: ImportOptions,
) -> ImportJob<P> {
    let (signal, cancel_signal) = channel::bounded(1);
    ImportJob {
        store: store.clone(),
        provider,
        options,
        state: Mutex::new(ImportState::Idle),
        cancel: CancelHandle {
            flag: Arc::new(AtomicBool::new(false)),
            signal,
        },
        cancel_signal,
    }
}

/// Clears all contigs and metadata.
pub fn reset_store(store: &ContigStore) -> Result<(), IndexerError> {
    store.reset()
}

impl<P: SourceProvider> ImportJob<P> {
    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    pub fn state(&self) -> ImportState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn set_state(&self, next: ImportState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(from = ?*state, to = ?next, "import state");
        *state = next;
    }

    fn begin(&self) -> Result<(), IndexerError> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state != ImportState::Idle {
            return Err(IndexerError::InvalidState(format!("{:?}", *state)));
        }
        *state = ImportState::Beginning;
        Ok(())
    }

    /// Runs the import to a terminal state. Failures are reported once via
    /// `sink.on_error` and returned; cancellation is a normal outcome.
    pub fn start(&self, sink: &dyn ImportSink) -> Result<ImportOutcome, IndexerError> {
        self.begin()?;
        let started = Instant::now();
        sink.on_begin();
        info!(
            url = %self.options.url,
            accession = %self.options.assembly_accession,
            batch_size = self.options.batch_size,
            "import started"
        );

        match self.run(sink, started) {
            Ok(Some(summary)) => {
                self.set_state(ImportState::Completed);
                info!(
                    contigs = summary.contig_count,
                    rows = summary.rows,
                    elapsed_seconds = summary.elapsed_seconds,
                    "import completed"
                );
                sink.on_end(&summary);
                Ok(ImportOutcome::Completed(summary))
            }
            Ok(None) | Err(IndexerError::Cancelled) => {
                self.set_state(ImportState::Cancelled);
                info!("import cancelled");
                sink.on_cancelled();
                Ok(ImportOutcome::Cancelled)
            }
            Err(err) => {
                self.set_state(ImportState::Failed);
                warn!(error = %err, "import failed");
                sink.on_error(&err);
                Err(err)
            }
        }
    }

    fn run(
        &self,
        sink: &dyn ImportSink,
        started: Instant,
    ) -> Result<Option<ImportSummary>, IndexerError> {
        if self.cancel.is_cancelled() {
            return Ok(None);
        }
        if self.options.clear_existing {
            self.store.transaction(|tx| {
                tx.clear()?;
                tx.clear_meta()?;
                tx.put_meta(MetaKey::SourceUrl, &self.options.url)?;
                tx.put_meta(MetaKey::AssemblyAccession, &self.options.assembly_accession)?;
                tx.put_meta(MetaKey::ImportStartedAt, &chrono::Utc::now().to_rfc3339())
            })?;
            debug!("store cleared for import");
        }

        let source = self.provider.open(&self.options.url)?;
        let index_source = self.provider.open(&self.options.index_url)?;
        self.set_state(ImportState::Streaming);
        let Some(stream) = self.stream(source, index_source, sink)? else {
            return Ok(None);
        };

        let lengths_updated = match self.options.fasta_locations() {
            Some((fasta_url, fai_url, gzi_url)) => {
                if self.cancel.is_cancelled() {
                    return Ok(None);
                }
                self.set_state(ImportState::LengthAugmenting);
                let fasta = IndexedFasta::open(&self.provider, fasta_url, fai_url, gzi_url)?;
                Some(augment_lengths(&self.store, &fasta)?)
            }
            None => {
                debug!("FASTA locations incomplete; skipping length backfill");
                None
            }
        };

        Ok(Some(ImportSummary {
            elapsed_seconds: started.elapsed().as_secs_f64(),
            contig_count: self.store.count()?,
            rows: stream.rows,
            batches: stream.batches,
            bytes_read: stream.bytes_read,
            lengths_updated,
        }))
    }

    /// Relays parser messages until the stream ends. `Ok(None)` means the
    /// import was cancelled. The worker is joined before this returns.
    fn stream(
        &self,
        source: Box<dyn RangeSource>,
        index_source: Box<dyn RangeSource>,
        sink: &dyn ImportSink,
    ) -> Result<Option<StreamStats>, IndexerError> {
        let config = ParserConfig::new(
            self.options.attributes_to_index.clone(),
            self.options.batch_size,
        );
        let worker = ParserWorker::spawn(source, index_source, config)?;

        loop {
            select! {
                recv(worker.messages()) -> message => match message {
                    Ok(ParserMessage::Progress { bytes_read, total_bytes }) => {
                        sink.on_progress(bytes_read, total_bytes);
                    }
                    Ok(ParserMessage::Batch { rows, ack }) => {
                        if self.cancel.is_cancelled() {
                            let _ = ack.send(BatchAck::Stop);
                            return Ok(None);
                        }
                        match merge_batch(&self.store, &rows) {
                            Ok(stats) => {
                                let _ = ack.send(BatchAck::Continue);
                                sink.on_batch_merged(&stats);
                            }
                            Err(err) => {
                                let _ = ack.send(BatchAck::Stop);
                                return Err(err);
                            }
                        }
                    }
                    Ok(ParserMessage::Done(stats)) => return Ok(Some(stats)),
                    Ok(ParserMessage::Failed(IndexerError::Cancelled)) => return Ok(None),
                    Ok(ParserMessage::Failed(err)) => return Err(err),
                    Err(_) => {
                        return Err(IndexerError::Worker(
                            "parser exited without reporting an outcome".to_string(),
                        ));
                    }
                },
                recv(self.cancel_signal) -> _ => {
                    if self.cancel.is_cancelled() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::source::FileSourceProvider;

    #[test]
    fn fasta_requires_all_three_locations() {
        let mut options = ImportOptions::new("a.gff.bgz", "a.gff.bgz.tbi", "ERZ101");
        assert!(options.fasta_locations().is_none());
        options.fasta_url = Some("a.fa.bgz".to_string());
        options.fasta_fai_url = Some("a.fa.bgz.fai".to_string());
        assert!(options.fasta_locations().is_none());
        options.fasta_gzi_url = Some("a.fa.bgz.gzi".to_string());
        assert_eq!(
            options.fasta_locations(),
            Some(("a.fa.bgz", "a.fa.bgz.fai", "a.fa.bgz.gzi"))
        );
    }

    struct NoopSink;

    impl ImportSink for NoopSink {}

    #[test]
    fn cancel_before_start_touches_nothing() {
        let store = ContigStore::open_in_memory().unwrap();
        store.put_meta(MetaKey::AssemblyAccession, "ERZ000").unwrap();
        let job = import_features(
            &store,
            FileSourceProvider,
            ImportOptions::new("missing.gff.bgz", "missing.gff.bgz.tbi", "ERZ101"),
        );
        job.cancel();

        let outcome = job.start(&NoopSink).unwrap();
        assert_eq!(outcome, ImportOutcome::Cancelled);
        assert_eq!(job.state(), ImportState::Cancelled);
        assert_eq!(
            store.meta(MetaKey::AssemblyAccession).unwrap().as_deref(),
            Some("ERZ000")
        );
    }

    #[test]
    fn missing_source_fails_and_cannot_restart() {
        let store = ContigStore::open_in_memory().unwrap();
        let job = import_features(
            &store,
            FileSourceProvider,
            ImportOptions::new("/nonexistent/a.gff.bgz", "/nonexistent/a.gff.bgz.tbi", "ERZ101"),
        );
        assert_matches!(job.start(&NoopSink), Err(IndexerError::Filesystem(_)));
        assert_eq!(job.state(), ImportState::Failed);
        assert_matches!(job.start(&NoopSink), Err(IndexerError::InvalidState(_)));
    }
}
