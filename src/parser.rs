//! Streaming GFF3 parser and the worker thread that runs it.
//!
//! The worker talks to the import orchestrator only through typed messages.
//! Every batch carries a one-shot acknowledgement channel and the worker does
//! not read further until that acknowledgement arrives, so at most one batch
//! of rows is buffered between the parser and the store.

use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use flate2::read::MultiGzDecoder;
use tracing::{debug, warn};

use crate::domain::FeatureRow;
use crate::error::IndexerError;
use crate::gff::{GffLine, parse_line};
use crate::source::{DEFAULT_CHUNK_SIZE, RangeReader, RangeSource, into_indexer_error};
use crate::tabix::TabixIndex;

const MESSAGE_CAPACITY: usize = 16;
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long dropping a [`ParserWorker`] waits for the thread to exit before
/// detaching it.
const JOIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub attributes_to_index: Vec<String>,
    pub batch_size: usize,
    pub chunk_size: u64,
}

impl ParserConfig {
    pub fn new(attributes_to_index: Vec<String>, batch_size: usize) -> Self {
        Self {
            attributes_to_index,
            batch_size: batch_size.max(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAck {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub rows: u64,
    pub batches: u64,
    pub bytes_read: u64,
}

#[derive(Debug)]
pub enum ParserMessage {
    Progress {
        bytes_read: u64,
        total_bytes: Option<u64>,
    },
    Batch {
        rows: Vec<FeatureRow>,
        ack: Sender<BatchAck>,
    },
    Done(StreamStats),
    Failed(IndexerError),
}

/// Streams the feature file, handing rows to `on_batch` in groups of
/// `batch_size`. Returns `Cancelled` when the flag is raised or a batch is
/// answered with [`BatchAck::Stop`].
pub fn stream_features<P, B>(
    source: &dyn RangeSource,
    index: &TabixIndex,
    config: &ParserConfig,
    cancel: &AtomicBool,
    mut on_progress: P,
    mut on_batch: B,
) -> Result<StreamStats, IndexerError>
where
    P: FnMut(u64, Option<u64>),
    B: FnMut(Vec<FeatureRow>) -> Result<BatchAck, IndexerError>,
{
    let total_bytes = source.total_len()?;
    let reader = RangeReader::new(source, config.chunk_size).with_cancel(cancel);
    let mut lines = BufReader::new(MultiGzDecoder::new(reader));
    let mut stats = StreamStats::default();
    let mut batch = Vec::with_capacity(config.batch_size);
    let mut line = String::new();
    let mut line_no = 0u64;
    let mut reported = 0u64;

    loop {
        line.clear();
        let read = lines
            .read_line(&mut line)
            .map_err(|err| into_indexer_error(err, source.location()))?;
        if read == 0 {
            break;
        }
        line_no += 1;

        let bytes_read = lines.get_ref().get_ref().bytes_read();
        if bytes_read != reported {
            on_progress(bytes_read, total_bytes);
            reported = bytes_read;
        }
        if line_no <= index.skip as u64 {
            continue;
        }

        match parse_line(&line, line_no, index, &config.attributes_to_index)? {
            GffLine::Feature(row) => {
                stats.rows += 1;
                batch.push(row);
                if batch.len() >= config.batch_size {
                    flush(&mut batch, &mut stats, cancel, &mut on_batch)?;
                }
            }
            GffLine::Comment => {}
            GffLine::FastaStart => break,
        }
    }

    if !batch.is_empty() {
        flush(&mut batch, &mut stats, cancel, &mut on_batch)?;
    }
    stats.bytes_read = lines.get_ref().get_ref().bytes_read();
    Ok(stats)
}

fn flush<B>(
    batch: &mut Vec<FeatureRow>,
    stats: &mut StreamStats,
    cancel: &AtomicBool,
    on_batch: &mut B,
) -> Result<(), IndexerError>
where
    B: FnMut(Vec<FeatureRow>) -> Result<BatchAck, IndexerError>,
{
    if cancel.load(Ordering::SeqCst) {
        return Err(IndexerError::Cancelled);
    }
    let rows = std::mem::take(batch);
    match on_batch(rows)? {
        BatchAck::Continue => {
            stats.batches += 1;
            Ok(())
        }
        BatchAck::Stop => Err(IndexerError::Cancelled),
    }
}

/// Owns the parser thread. Dropping the worker raises its stop flag, closes
/// the message channel and joins the thread.
pub struct ParserWorker {
    messages: Receiver<ParserMessage>,
    stop: Arc<AtomicBool>,
    /// Disconnects when the worker closure returns.
    finished: Receiver<()>,
    handle: Option<JoinHandle<()>>,
}

impl ParserWorker {
    pub fn spawn(
        source: Box<dyn RangeSource>,
        index_source: Box<dyn RangeSource>,
        config: ParserConfig,
    ) -> Result<Self, IndexerError> {
        let (sender, messages) = channel::bounded(MESSAGE_CAPACITY);
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let (finished_tx, finished) = channel::bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("gff-parser".to_string())
            .spawn(move || {
                let result = run_worker(&*source, &*index_source, &config, &worker_stop, &sender);
                let message = match result {
                    Ok(stats) => ParserMessage::Done(stats),
                    Err(err) => ParserMessage::Failed(err),
                };
                let _ = sender.send(message);
                drop(finished_tx);
            })
            .map_err(|err| IndexerError::Worker(err.to_string()))?;

        Ok(Self {
            messages,
            stop,
            finished,
            handle: Some(handle),
        })
    }

    pub fn messages(&self) -> &Receiver<ParserMessage> {
        &self.messages
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for ParserWorker {
    fn drop(&mut self) {
        self.stop();
        // Closing the receiver unblocks a worker waiting on send; the stop flag
        // releases one waiting on an ack.
        drop(std::mem::replace(&mut self.messages, channel::never()));
        let Some(handle) = self.handle.take() else {
            return;
        };
        match self.finished.recv_timeout(JOIN_GRACE) {
            Err(RecvTimeoutError::Timeout) => {
                // Still inside a blocking read; it exits once that read returns.
                warn!(grace_ms = JOIN_GRACE.as_millis() as u64, "parser worker busy; detaching");
            }
            _ => {
                if handle.join().is_err() {
                    warn!("parser worker panicked");
                }
                debug!("parser worker joined");
            }
        }
    }
}

fn run_worker(
    source: &dyn RangeSource,
    index_source: &dyn RangeSource,
    config: &ParserConfig,
    stop: &AtomicBool,
    sender: &Sender<ParserMessage>,
) -> Result<StreamStats, IndexerError> {
    let index = TabixIndex::fetch(index_source)?;
    debug!(
        references = index.names.len(),
        source = source.location(),
        "tabix index loaded"
    );

    stream_features(
        source,
        &index,
        config,
        stop,
        |bytes_read, total_bytes| {
            let _ = sender.send(ParserMessage::Progress {
                bytes_read,
                total_bytes,
            });
        },
        |rows| {
            let (ack, acked) = channel::bounded(1);
            sender
                .send(ParserMessage::Batch { rows, ack })
                .map_err(|_| IndexerError::Cancelled)?;
            wait_for_ack(&acked, stop)
        },
    )
}

fn wait_for_ack(acked: &Receiver<BatchAck>, stop: &AtomicBool) -> Result<BatchAck, IndexerError> {
    loop {
        match acked.recv_timeout(ACK_POLL_INTERVAL) {
            Ok(ack) => return Ok(ack),
            Err(RecvTimeoutError::Timeout) if !stop.load(Ordering::SeqCst) => {}
            Err(_) => return Err(IndexerError::Cancelled),
        }
    }
}
