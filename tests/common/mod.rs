#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

use contig_indexer::import::ImportOptions;

pub const CONTIG_COUNT: u64 = 6;
pub const LINE_BASES: usize = 8;

/// Six contigs, rows interleaved so that one contig spans several batches.
/// Only `ERZ101_3` carries IPR003593.
pub const FEATURES: &str = "##gff-version 3\n\
##sequence-region ERZ101_1 1 45\n\
ERZ101_1\tProdigal\tCDS\t1\t30\t.\t+\t0\tID=ERZ101_1_1;interpro=IPR027417;pfam=PF00004\n\
ERZ101_2\tProdigal\tCDS\t2\t40\t.\t-\t0\tID=ERZ101_2_1;interpro=IPR003959;cog=COG0464\n\
ERZ101_3\tProdigal\tCDS\t5\t20\t.\t+\t0\tID=ERZ101_3_1;interpro=IPR003593,IPR027417\n\
# plain comment\n\
ERZ101_1\tProdigal\tCDS\t31\t44\t.\t+\t0\tID=ERZ101_1_2;kegg=ko:K02313;go=GO:0005524\n\
ERZ101_4\tProdigal\tCDS\t1\t12\t.\t+\t0\tID=ERZ101_4_1;product=hypothetical%20protein\n\
ERZ101_3\tProdigal\tCDS\t21\t50\t.\t-\t0\tID=ERZ101_3_2;pfam=PF07728;go=GO:0016887\n\
ERZ101_5\tProdigal\tCDS\t3\t60\t.\t+\t0\tID=ERZ101_5_1;interpro=IPR003960\n\
ERZ101_6\tProdigal\tCDS\t1\t70\t.\t+\t0\tID=ERZ101_6_1;cog=COG1222;kegg=ko:K03046\n\
ERZ101_6\tProdigal\tCDS\t71\t80\t.\t+\t0\tID=ERZ101_6_2;interpro=IPR027417\n";

pub const NAMES: [&str; 6] = [
    "ERZ101_1", "ERZ101_2", "ERZ101_3", "ERZ101_4", "ERZ101_5", "ERZ101_6",
];

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Compresses `data` as independent gzip members of `block_size` bytes each,
/// followed by an empty end-of-file member. Returns the data and its `.gzi`.
pub fn bgzip(data: &[u8], block_size: usize) -> (Vec<u8>, Vec<u8>) {
    let mut compressed = Vec::new();
    let mut entries = Vec::new();
    for (position, block) in data.chunks(block_size).enumerate() {
        if position > 0 {
            entries.push((compressed.len() as u64, (position * block_size) as u64));
        }
        compressed.extend_from_slice(&gzip(block));
    }
    compressed.extend_from_slice(&gzip(&[]));

    let mut gzi = (entries.len() as u64).to_le_bytes().to_vec();
    for (compressed_offset, uncompressed_offset) in entries {
        gzi.extend_from_slice(&compressed_offset.to_le_bytes());
        gzi.extend_from_slice(&uncompressed_offset.to_le_bytes());
    }
    (compressed, gzi)
}

/// A compressed tabix index carrying only the header and empty bins.
pub fn tabix_index(names: &[&str]) -> Vec<u8> {
    let mut names_block = Vec::new();
    for name in names {
        names_block.extend_from_slice(name.as_bytes());
        names_block.push(0);
    }
    let mut raw = b"TBI\x01".to_vec();
    for value in [
        names.len() as i32,
        0,
        1,
        4,
        5,
        i32::from(b'#'),
        0,
        names_block.len() as i32,
    ] {
        raw.extend_from_slice(&value.to_le_bytes());
    }
    raw.extend_from_slice(&names_block);
    for _ in names {
        raw.extend_from_slice(&0i32.to_le_bytes());
        raw.extend_from_slice(&0i32.to_le_bytes());
    }
    gzip(&raw)
}

/// Deterministic bases for contig `index` (1-based).
pub fn sequence(index: usize) -> String {
    let length = index * 10 + 5;
    (0..length)
        .map(|position| b"ACGTTGCA"[(position + index) % 8] as char)
        .collect()
}

/// FASTA text wrapped at [`LINE_BASES`] and its `.fai`.
pub fn fasta_with_fai() -> (String, String) {
    let mut fasta = String::new();
    let mut fai = String::new();
    for (position, name) in NAMES.iter().enumerate() {
        let bases = sequence(position + 1);
        fasta.push('>');
        fasta.push_str(name);
        fasta.push('\n');
        let offset = fasta.len();
        for line in bases.as_bytes().chunks(LINE_BASES) {
            fasta.push_str(std::str::from_utf8(line).unwrap());
            fasta.push('\n');
        }
        fai.push_str(&format!(
            "{name}\t{}\t{offset}\t{LINE_BASES}\t{}\n",
            bases.len(),
            LINE_BASES + 1
        ));
    }
    (fasta, fai)
}

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_features(FEATURES)
    }

    pub fn with_features(features: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let (gff, _) = bgzip(features.as_bytes(), 128);
        write(dir.path(), "features.gff.bgz", &gff);
        write(dir.path(), "features.gff.bgz.tbi", &tabix_index(&NAMES));

        let (fasta, fai) = fasta_with_fai();
        let (compressed, gzi) = bgzip(fasta.as_bytes(), 32);
        write(dir.path(), "contigs.fasta.bgz", &compressed);
        write(dir.path(), "contigs.fasta.bgz.fai", fai.as_bytes());
        write(dir.path(), "contigs.fasta.bgz.gzi", &gzi);
        Self { dir }
    }

    pub fn path(&self, file: &str) -> String {
        self.dir.path().join(file).display().to_string()
    }

    pub fn options(&self) -> ImportOptions {
        let mut options = ImportOptions::new(
            self.path("features.gff.bgz"),
            self.path("features.gff.bgz.tbi"),
            "ERZ101",
        );
        options.batch_size = 2;
        options
    }

    pub fn options_with_fasta(&self) -> ImportOptions {
        let mut options = self.options();
        options.fasta_url = Some(self.path("contigs.fasta.bgz"));
        options.fasta_fai_url = Some(self.path("contigs.fasta.bgz.fai"));
        options.fasta_gzi_url = Some(self.path("contigs.fasta.bgz.gzi"));
        options
    }
}

fn write(dir: &Path, file: &str, bytes: &[u8]) {
    fs::write(dir.join(file), bytes).unwrap();
}
