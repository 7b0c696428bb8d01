use std::io::Read;

use flate2::read::MultiGzDecoder;

use crate::error::IndexerError;
use crate::source::RangeSource;

const TABIX_MAGIC: &[u8; 4] = b"TBI\x01";

/// Header fields of a tabix (`.tbi`) index that drive how the feature file
/// is read. Bin and linear-index sections are not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabixIndex {
    pub format: i32,
    pub col_seq: usize,
    pub col_beg: usize,
    pub col_end: usize,
    pub meta: char,
    pub skip: usize,
    pub names: Vec<String>,
}

impl TabixIndex {
    pub fn fetch(source: &dyn RangeSource) -> Result<Self, IndexerError> {
        let compressed = source.read_all()?;
        let mut decoded = Vec::new();
        MultiGzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .map_err(|err| {
                IndexerError::Parse(format!("tabix index {}: {err}", source.location()))
            })?;
        Self::parse(&decoded)
            .map_err(|err| IndexerError::Parse(format!("tabix index {}: {err}", source.location())))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, String> {
        let mut cursor = Cursor { bytes, pos: 0 };
        if cursor.take(4)? != TABIX_MAGIC {
            return Err("bad magic".to_string());
        }
        let n_ref = cursor.i32()?;
        let format = cursor.i32()?;
        let col_seq = cursor.i32()?;
        let col_beg = cursor.i32()?;
        let col_end = cursor.i32()?;
        let meta = cursor.i32()?;
        let skip = cursor.i32()?;
        let l_nm = cursor.i32()?;
        if n_ref < 0 || col_seq < 1 || skip < 0 || l_nm < 0 {
            return Err("corrupt header".to_string());
        }
        let names = cursor
            .take(l_nm as usize)?
            .split(|byte| *byte == 0)
            .filter(|name| !name.is_empty())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .collect::<Vec<_>>();
        if names.len() != n_ref as usize {
            return Err(format!(
                "header declares {n_ref} references but names {}",
                names.len()
            ));
        }
        Ok(Self {
            format,
            col_seq: col_seq as usize,
            col_beg: col_beg.max(0) as usize,
            col_end: col_end.max(0) as usize,
            meta: char::from_u32(meta as u32).unwrap_or('#'),
            skip: skip as usize,
            names,
        })
    }

    /// Header used when a feature file is streamed without an index.
    pub fn gff_default() -> Self {
        Self {
            format: 0,
            col_seq: 1,
            col_beg: 4,
            col_end: 5,
            meta: '#',
            skip: 0,
            names: Vec::new(),
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| "truncated index".to_string())?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn i32(&mut self) -> Result<i32, String> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }
}
