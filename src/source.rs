use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, HeaderValue, RANGE, USER_AGENT};
use tracing::{debug, warn};

use crate::error::IndexerError;

pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;

/// Random-access reads against a remote or local file.
pub trait RangeSource: Send + Sync {
    fn location(&self) -> &str;

    /// Total size in bytes, when the source can tell.
    fn total_len(&self) -> Result<Option<u64>, IndexerError>;

    /// Reads up to `len` bytes starting at `start`. A short (or empty) result
    /// means the end of the file was reached.
    fn read_range(&self, start: u64, len: u64) -> Result<Vec<u8>, IndexerError>;

    fn read_all(&self) -> Result<Vec<u8>, IndexerError> {
        let mut content = Vec::new();
        loop {
            let chunk = self.read_range(content.len() as u64, DEFAULT_CHUNK_SIZE)?;
            let done = (chunk.len() as u64) < DEFAULT_CHUNK_SIZE;
            content.extend_from_slice(&chunk);
            if done {
                return Ok(content);
            }
        }
    }
}

/// Resolves a location string (URL or path) into a [`RangeSource`].
pub trait SourceProvider: Send + Sync {
    fn open(&self, location: &str) -> Result<Box<dyn RangeSource>, IndexerError>;
}

#[derive(Clone)]
pub struct HttpRangeClient {
    client: Client,
}

impl HttpRangeClient {
    pub fn new() -> Result<Self, IndexerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("contig-indexer/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IndexerError::Network(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| IndexerError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn source(&self, url: &str) -> HttpRangeSource {
        HttpRangeSource {
            client: self.client.clone(),
            url: url.to_string(),
            full_body: OnceLock::new(),
        }
    }
}

pub struct HttpRangeSource {
    client: Client,
    url: String,
    /// Whole body, kept once the server answers a range request with 200.
    full_body: OnceLock<Vec<u8>>,
}

impl HttpRangeSource {
    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, IndexerError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(IndexerError::Network(format!("{}: {err}", self.url)));
                }
            }
        }
    }
}

impl RangeSource for HttpRangeSource {
    fn location(&self) -> &str {
        &self.url
    }

    fn total_len(&self) -> Result<Option<u64>, IndexerError> {
        if let Some(body) = self.full_body.get() {
            return Ok(Some(body.len() as u64));
        }
        match self.send_with_retries(|| self.client.head(&self.url)) {
            Ok(response) if response.status().is_success() => {
                let total = response
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok());
                if total.is_some() {
                    return Ok(total);
                }
                debug!(url = %self.url, "HEAD response has no content length");
            }
            Ok(response) => {
                debug!(url = %self.url, status = response.status().as_u16(), "HEAD rejected");
            }
            Err(err) => debug!(url = %self.url, error = %err, "HEAD failed"),
        }
        let total = self.total_from_range_probe();
        if total.is_none() {
            warn!(url = %self.url, "remote size unknown; progress has no total");
        }
        Ok(total)
    }

    fn read_range(&self, start: u64, len: u64) -> Result<Vec<u8>, IndexerError> {
        if len == 0 {
            return Ok(Vec::new());
        }
        if let Some(body) = self.full_body.get() {
            return Ok(slice_body(body, start, len));
        }
        let range = format!("bytes={}-{}", start, start + len - 1);
        let response =
            self.send_with_retries(|| self.client.get(&self.url).header(RANGE, range.as_str()))?;
        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "range request failed".to_string());
            return Err(IndexerError::NetworkStatus {
                status: status.as_u16(),
                message,
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| IndexerError::Network(format!("{}: {err}", self.url)))?;
        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(bytes.to_vec());
        }
        Ok(slice_body(self.keep_full_body(bytes.to_vec()), start, len))
    }
}

impl HttpRangeSource {
    /// Asks for the first byte and reads the total from `Content-Range`.
    fn total_from_range_probe(&self) -> Option<u64> {
        let response = self
            .send_with_retries(|| self.client.get(&self.url).header(RANGE, "bytes=0-0"))
            .ok()?;
        match response.status() {
            StatusCode::PARTIAL_CONTENT => response
                .headers()
                .get(CONTENT_RANGE)?
                .to_str()
                .ok()?
                .rsplit_once('/')?
                .1
                .trim()
                .parse()
                .ok(),
            StatusCode::OK => {
                let bytes = response.bytes().ok()?;
                Some(self.keep_full_body(bytes.to_vec()).len() as u64)
            }
            status => {
                debug!(url = %self.url, status = status.as_u16(), "range probe rejected");
                None
            }
        }
    }

    fn keep_full_body(&self, body: Vec<u8>) -> &[u8] {
        self.full_body.get_or_init(|| {
            warn!(url = %self.url, bytes = body.len(), "server ignores Range; serving reads from memory");
            body
        })
    }
}

fn slice_body(body: &[u8], start: u64, len: u64) -> Vec<u8> {
    let begin = usize::try_from(start).unwrap_or(usize::MAX).min(body.len());
    let end = usize::try_from(start.saturating_add(len))
        .unwrap_or(usize::MAX)
        .min(body.len());
    body[begin..end].to_vec()
}

pub struct FileRangeSource {
    location: String,
    file: Mutex<File>,
}

impl FileRangeSource {
    pub fn open(path: &Path) -> Result<Self, IndexerError> {
        let file = File::open(path)
            .map_err(|err| IndexerError::Filesystem(format!("open {}: {err}", path.display())))?;
        Ok(Self {
            location: path.display().to_string(),
            file: Mutex::new(file),
        })
    }
}

impl RangeSource for FileRangeSource {
    fn location(&self) -> &str {
        &self.location
    }

    fn total_len(&self) -> Result<Option<u64>, IndexerError> {
        let file = self
            .file
            .lock()
            .map_err(|_| IndexerError::Filesystem("file handle poisoned".to_string()))?;
        let metadata = file
            .metadata()
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        Ok(Some(metadata.len()))
    }

    fn read_range(&self, start: u64, len: u64) -> Result<Vec<u8>, IndexerError> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| IndexerError::Filesystem("file handle poisoned".to_string()))?;
        file.seek(SeekFrom::Start(start))
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        let mut buffer = Vec::new();
        (&mut *file)
            .take(len)
            .read_to_end(&mut buffer)
            .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
        Ok(buffer)
    }
}

/// Opens local paths (plain or `file://`) only.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSourceProvider;

impl SourceProvider for FileSourceProvider {
    fn open(&self, location: &str) -> Result<Box<dyn RangeSource>, IndexerError> {
        Ok(Box::new(FileRangeSource::open(&local_path(location))?))
    }
}

/// Routes `http://` and `https://` locations to HTTP range requests and
/// everything else to the local filesystem.
#[derive(Clone)]
pub struct DefaultSourceProvider {
    http: HttpRangeClient,
}

impl DefaultSourceProvider {
    pub fn new() -> Result<Self, IndexerError> {
        Ok(Self {
            http: HttpRangeClient::new()?,
        })
    }
}

impl SourceProvider for DefaultSourceProvider {
    fn open(&self, location: &str) -> Result<Box<dyn RangeSource>, IndexerError> {
        if is_http(location) {
            Ok(Box::new(self.http.source(location)))
        } else {
            FileSourceProvider.open(location)
        }
    }
}

fn is_http(location: &str) -> bool {
    let lower = location.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn local_path(location: &str) -> PathBuf {
    let trimmed = location.trim();
    PathBuf::from(trimmed.strip_prefix("file://").unwrap_or(trimmed))
}

/// Sequential [`Read`] over a [`RangeSource`], fetching one fixed-size range
/// at a time. The cancel flag is checked before every range request.
pub struct RangeReader<'a> {
    source: &'a dyn RangeSource,
    chunk_size: u64,
    position: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    eof: bool,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> RangeReader<'a> {
    pub fn new(source: &'a dyn RangeSource, chunk_size: u64) -> Self {
        Self {
            source,
            chunk_size: chunk_size.max(1),
            position: 0,
            buffer: Vec::new(),
            buffer_pos: 0,
            eof: false,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Bytes fetched from the source so far.
    pub fn bytes_read(&self) -> u64 {
        self.position
    }

    fn fill(&mut self) -> io::Result<()> {
        if let Some(cancel) = self.cancel {
            if cancel.load(Ordering::SeqCst) {
                return Err(io::Error::other(IndexerError::Cancelled));
            }
        }
        let chunk = self
            .source
            .read_range(self.position, self.chunk_size)
            .map_err(io::Error::other)?;
        if (chunk.len() as u64) < self.chunk_size {
            self.eof = true;
        }
        self.position += chunk.len() as u64;
        self.buffer = chunk;
        self.buffer_pos = 0;
        Ok(())
    }
}

impl Read for RangeReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.buffer_pos >= self.buffer.len() {
            if self.eof {
                return Ok(0);
            }
            self.fill()?;
        }
        let available = &self.buffer[self.buffer_pos..];
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        self.buffer_pos += count;
        Ok(count)
    }
}

/// Recovers an [`IndexerError`] that travelled through an `io::Error`.
pub fn into_indexer_error(err: io::Error, context: &str) -> IndexerError {
    if err.get_ref().is_some_and(|inner| inner.is::<IndexerError>()) {
        if let Some(inner) = err.into_inner() {
            if let Ok(indexer) = inner.downcast::<IndexerError>() {
                return *indexer;
            }
        }
        return IndexerError::Parse(format!("{context}: unreadable stream"));
    }
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            IndexerError::Parse(format!("{context}: {err}"))
        }
        _ => IndexerError::Network(format!("{context}: {err}")),
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn file_source_reads_ranges() {
        let file = write_temp(b"0123456789");
        let source = FileRangeSource::open(file.path()).unwrap();
        assert_eq!(source.total_len().unwrap(), Some(10));
        assert_eq!(source.read_range(2, 3).unwrap(), b"234");
        assert_eq!(source.read_range(8, 10).unwrap(), b"89");
        assert!(source.read_range(20, 4).unwrap().is_empty());
    }

    #[test]
    fn range_reader_streams_in_chunks() {
        let file = write_temp(b"abcdefghijklmnopqrstuvwxyz");
        let source = FileRangeSource::open(file.path()).unwrap();
        let mut reader = RangeReader::new(&source, 4);
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abcdefghijklmnopqrstuvwxyz");
        assert_eq!(reader.bytes_read(), 26);
    }

    #[test]
    fn range_reader_stops_when_cancelled() {
        let file = write_temp(b"abcdefgh");
        let source = FileRangeSource::open(file.path()).unwrap();
        let cancel = AtomicBool::new(true);
        let mut reader = RangeReader::new(&source, 4).with_cancel(&cancel);
        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert_matches!(into_indexer_error(err, "test"), IndexerError::Cancelled);
    }

    #[test]
    fn file_provider_accepts_file_scheme() {
        let file = write_temp(b"xyz");
        let location = format!("file://{}", file.path().display());
        let source = FileSourceProvider.open(&location).unwrap();
        assert_eq!(source.read_all().unwrap(), b"xyz");
        assert!(is_http("HTTPS://example.org/a.gff3.gz"));
        assert!(!is_http("/data/a.gff3.gz"));
    }
}
