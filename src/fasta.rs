//! Block-compressed, indexed FASTA access and the length backfill pass.
//!
//! Sequence lengths come straight from the `.fai`; region reads use the
//! `.fai` line geometry together with the `.gzi` block index so that only
//! the BGZF blocks covering the region are fetched and inflated.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::MultiGzDecoder;
use tracing::{info, warn};

use crate::domain::{ContigPatch, contig_name_to_id};
use crate::error::IndexerError;
use crate::source::{DEFAULT_CHUNK_SIZE, RangeSource, SourceProvider};
use crate::store::ContigStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaiEntry {
    pub name: String,
    pub length: u64,
    pub offset: u64,
    pub line_bases: u64,
    pub line_width: u64,
}

impl FaiEntry {
    /// Uncompressed byte offset of the 0-based base `position`.
    fn byte_offset(&self, position: u64) -> u64 {
        self.offset + (position / self.line_bases) * self.line_width + position % self.line_bases
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaiIndex {
    entries: Vec<FaiEntry>,
    by_name: HashMap<String, usize>,
}

impl FaiIndex {
    pub fn parse(text: &str) -> Result<Self, IndexerError> {
        let mut index = Self::default();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let fields = line.split('\t').collect::<Vec<_>>();
            if fields.len() < 5 {
                return Err(IndexerError::Parse(format!(
                    "fai line {}: expected 5 columns, found {}",
                    line_no + 1,
                    fields.len()
                )));
            }
            let number = |column: usize| {
                fields[column].trim().parse::<u64>().map_err(|_| {
                    IndexerError::Parse(format!(
                        "fai line {}: column {} is not a number: {:?}",
                        line_no + 1,
                        column + 1,
                        fields[column]
                    ))
                })
            };
            let entry = FaiEntry {
                name: fields[0].to_string(),
                length: number(1)?,
                offset: number(2)?,
                line_bases: number(3)?,
                line_width: number(4)?,
            };
            if entry.line_bases == 0 || entry.line_width < entry.line_bases {
                return Err(IndexerError::Parse(format!(
                    "fai line {}: inconsistent line geometry",
                    line_no + 1
                )));
            }
            index.by_name.insert(entry.name.clone(), index.entries.len());
            index.entries.push(entry);
        }
        Ok(index)
    }

    pub fn get(&self, name: &str) -> Option<&FaiEntry> {
        self.by_name.get(name).map(|position| &self.entries[*position])
    }

    pub fn entries(&self) -> &[FaiEntry] {
        &self.entries
    }
}

/// BGZF block index: `(compressed, uncompressed)` start offsets of every
/// block, the implicit first block at `(0, 0)` included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GziIndex {
    blocks: Vec<(u64, u64)>,
}

impl GziIndex {
    pub fn parse(bytes: &[u8]) -> Result<Self, IndexerError> {
        let read_u64 = |at: usize| -> Result<u64, IndexerError> {
            bytes
                .get(at..at + 8)
                .map(|raw| {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(raw);
                    u64::from_le_bytes(word)
                })
                .ok_or_else(|| IndexerError::Parse("gzi index truncated".to_string()))
        };
        let count = read_u64(0)? as usize;
        let expected = count
            .checked_mul(16)
            .and_then(|size| size.checked_add(8))
            .ok_or_else(|| IndexerError::Parse("gzi index entry count overflow".to_string()))?;
        if bytes.len() < expected {
            return Err(IndexerError::Parse("gzi index truncated".to_string()));
        }
        let mut blocks = Vec::with_capacity(count + 1);
        blocks.push((0, 0));
        for i in 0..count {
            let compressed = read_u64(8 + i * 16)?;
            let uncompressed = read_u64(16 + i * 16)?;
            blocks.push((compressed, uncompressed));
        }
        if blocks.windows(2).any(|pair| pair[1].0 < pair[0].0 || pair[1].1 < pair[0].1) {
            return Err(IndexerError::Parse("gzi index is not sorted".to_string()));
        }
        Ok(Self { blocks })
    }

    /// Block holding the uncompressed offset `position`.
    fn block_containing(&self, position: u64) -> usize {
        self.blocks
            .partition_point(|(_, uncompressed)| *uncompressed <= position)
            .saturating_sub(1)
    }

    /// BGZF blocks covered, counting the implicit first block at offset 0.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

pub struct IndexedFasta {
    source: Box<dyn RangeSource>,
    fai: FaiIndex,
    gzi: GziIndex,
}

impl IndexedFasta {
    pub fn new(source: Box<dyn RangeSource>, fai: FaiIndex, gzi: GziIndex) -> Self {
        Self { source, fai, gzi }
    }

    pub fn open(
        provider: &dyn SourceProvider,
        fasta_url: &str,
        fai_url: &str,
        gzi_url: &str,
    ) -> Result<Self, IndexerError> {
        let fai_bytes = provider.open(fai_url)?.read_all()?;
        let fai_text = String::from_utf8(fai_bytes)
            .map_err(|_| IndexerError::Parse(format!("fai index {fai_url} is not UTF-8")))?;
        let fai = FaiIndex::parse(&fai_text)?;
        let gzi = GziIndex::parse(&provider.open(gzi_url)?.read_all()?)?;
        Ok(Self::new(provider.open(fasta_url)?, fai, gzi))
    }

    pub fn sequence_length(&self, name: &str) -> Option<u64> {
        self.fai.get(name).map(|entry| entry.length)
    }

    pub fn sequence_lengths(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.fai
            .entries()
            .iter()
            .map(|entry| (entry.name.as_str(), entry.length))
    }

    /// Bases `[start, end)` of sequence `name`, 0-based. `end` is clipped to
    /// the sequence length.
    pub fn fetch_region(&self, name: &str, start: u64, end: u64) -> Result<String, IndexerError> {
        let entry = self
            .fai
            .get(name)
            .ok_or_else(|| IndexerError::Parse(format!("sequence {name} not in fai index")))?;
        let end = end.min(entry.length);
        if start >= end {
            return Ok(String::new());
        }
        let first = entry.byte_offset(start);
        let last = entry.byte_offset(end - 1) + 1;
        let raw = self.read_uncompressed(first, last - first)?;
        let bases = raw
            .into_iter()
            .filter(|byte| !matches!(byte, b'\n' | b'\r'))
            .collect::<Vec<_>>();
        if bases.len() as u64 != end - start {
            return Err(IndexerError::Parse(format!(
                "sequence {name}: expected {} bases, read {}",
                end - start,
                bases.len()
            )));
        }
        String::from_utf8(bases)
            .map_err(|_| IndexerError::Parse(format!("sequence {name} is not ASCII")))
    }

    fn read_uncompressed(&self, start: u64, len: u64) -> Result<Vec<u8>, IndexerError> {
        let first_block = self.gzi.block_containing(start);
        let last_block = self.gzi.block_containing(start + len - 1);
        let (compressed_start, uncompressed_start) = self.gzi.blocks[first_block];

        let compressed = match self.gzi.blocks.get(last_block + 1) {
            Some((compressed_end, _)) => self
                .source
                .read_range(compressed_start, compressed_end - compressed_start)?,
            None => self.read_to_end(compressed_start)?,
        };
        let mut inflated = Vec::new();
        MultiGzDecoder::new(compressed.as_slice())
            .read_to_end(&mut inflated)
            .map_err(|err| IndexerError::Parse(format!("{}: {err}", self.source.location())))?;

        let skip = (start - uncompressed_start) as usize;
        let take = len as usize;
        if inflated.len() < skip + take {
            return Err(IndexerError::Parse(format!(
                "{}: block index points past the end of the data",
                self.source.location()
            )));
        }
        Ok(inflated[skip..skip + take].to_vec())
    }

    fn read_to_end(&self, from: u64) -> Result<Vec<u8>, IndexerError> {
        let mut data = Vec::new();
        loop {
            let chunk = self
                .source
                .read_range(from + data.len() as u64, DEFAULT_CHUNK_SIZE)?;
            let done = (chunk.len() as u64) < DEFAULT_CHUNK_SIZE;
            data.extend_from_slice(&chunk);
            if done {
                return Ok(data);
            }
        }
    }
}

/// Writes every `.fai` length onto the matching stored contig in one bulk
/// update. Returns the number of contigs updated.
pub fn augment_lengths(store: &ContigStore, fasta: &IndexedFasta) -> Result<usize, IndexerError> {
    let mut patches = Vec::new();
    for (name, length) in fasta.sequence_lengths() {
        match contig_name_to_id(name) {
            Ok(contig_id) => patches.push(ContigPatch::length(contig_id, length)),
            Err(_) => warn!(sequence = name, "skipping FASTA record without contig index"),
        }
    }
    let updated = store.bulk_update(&patches)?;
    info!(sequences = patches.len(), updated, "contig lengths backfilled");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_fai() {
        let fai = FaiIndex::parse("ERZ101_1\t120\t10\t60\t61\nERZ101_2\t30\t153\t60\t61\n").unwrap();
        assert_eq!(fai.entries().len(), 2);
        assert_eq!(fai.get("ERZ101_2").unwrap().length, 30);
        assert!(fai.get("ERZ101_3").is_none());
    }

    #[test]
    fn reject_bad_fai() {
        assert_matches!(FaiIndex::parse("ERZ101_1\t120\n"), Err(IndexerError::Parse(_)));
        assert_matches!(
            FaiIndex::parse("ERZ101_1\tabc\t10\t60\t61\n"),
            Err(IndexerError::Parse(_))
        );
        assert_matches!(
            FaiIndex::parse("ERZ101_1\t10\t10\t0\t1\n"),
            Err(IndexerError::Parse(_))
        );
    }

    #[test]
    fn parse_gzi_and_locate_blocks() {
        let mut bytes = 2u64.to_le_bytes().to_vec();
        for value in [100u64, 65280, 180, 130560] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        let gzi = GziIndex::parse(&bytes).unwrap();
        assert_eq!(gzi.block_count(), 3);
        assert_eq!(gzi.block_containing(0), 0);
        assert_eq!(gzi.block_containing(65279), 0);
        assert_eq!(gzi.block_containing(65280), 1);
        assert_eq!(gzi.block_containing(200000), 2);
    }

    #[test]
    fn reject_truncated_gzi() {
        let mut bytes = 2u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&100u64.to_le_bytes());
        assert_matches!(GziIndex::parse(&bytes), Err(IndexerError::Parse(_)));
    }

    #[test]
    fn byte_offsets_follow_line_geometry() {
        let entry = FaiEntry {
            name: "ERZ101_1".to_string(),
            length: 10,
            offset: 10,
            line_bases: 4,
            line_width: 5,
        };
        assert_eq!(entry.byte_offset(0), 10);
        assert_eq!(entry.byte_offset(3), 13);
        assert_eq!(entry.byte_offset(4), 15);
        assert_eq!(entry.byte_offset(9), 21);
    }
}
