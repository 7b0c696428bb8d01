use std::collections::BTreeMap;

use crate::domain::FeatureRow;
use crate::error::IndexerError;
use crate::tabix::TabixIndex;

const GFF_COLUMNS: usize = 9;

/// What a single line of the feature file turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GffLine {
    Feature(FeatureRow),
    Comment,
    /// `##FASTA`: the rest of the file is sequence data.
    FastaStart,
}

/// Parses one GFF3 line. Only attributes whose key is listed in
/// `attributes_to_index` are kept on the returned row.
pub fn parse_line(
    line: &str,
    line_no: u64,
    index: &TabixIndex,
    attributes_to_index: &[String],
) -> Result<GffLine, IndexerError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(GffLine::Comment);
    }
    if line.starts_with("##FASTA") {
        return Ok(GffLine::FastaStart);
    }
    if line.starts_with(index.meta) || line.starts_with('#') {
        return Ok(GffLine::Comment);
    }

    let columns = line.split('\t').collect::<Vec<_>>();
    if columns.len() < GFF_COLUMNS {
        return Err(IndexerError::Parse(format!(
            "line {line_no}: expected {GFF_COLUMNS} tab-separated columns, found {}",
            columns.len()
        )));
    }

    let seq_id = columns
        .get(index.col_seq.saturating_sub(1))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| IndexerError::Parse(format!("line {line_no}: empty sequence id")))?;
    for (name, column) in [("start", index.col_beg), ("end", index.col_end)] {
        if column == 0 {
            continue;
        }
        let raw = columns.get(column - 1).copied().unwrap_or_default();
        if raw.trim().parse::<u64>().is_err() {
            return Err(IndexerError::Parse(format!(
                "line {line_no}: {name} is not a position: {raw:?}"
            )));
        }
    }

    Ok(GffLine::Feature(FeatureRow {
        seq_id: seq_id.to_string(),
        attributes: extract_attributes(columns[8], attributes_to_index),
    }))
}

fn extract_attributes(raw: &str, attributes_to_index: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut attributes = BTreeMap::new();
    for pair in raw.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let Some(wanted) = attributes_to_index
            .iter()
            .find(|wanted| wanted.eq_ignore_ascii_case(key))
        else {
            continue;
        };
        let values = value
            .split(',')
            .map(|item| percent_decode(item.trim()))
            .filter(|item| !item.is_empty())
            .collect::<Vec<_>>();
        if values.is_empty() {
            continue;
        }
        attributes
            .entry(wanted.clone())
            .or_insert_with(Vec::new)
            .extend(values);
    }
    attributes
}

/// GFF3 escapes reserved characters in column 9 as `%XX`.
fn percent_decode(value: &str) -> String {
    if !value.contains('%') {
        return value.to_string();
    }
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                decoded.push(byte);
                i += 3;
                continue;
            }
        }
        decoded.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn wanted() -> Vec<String> {
        vec!["interpro".to_string(), "pfam".to_string()]
    }

    #[test]
    fn parse_feature_row() {
        let line = "ERZ101_6\tProdigal\tCDS\t10\t300\t.\t+\t0\tID=ERZ101_6_1;interpro=IPR003593,IPR027417;pfam=PF00004;product=ATPase";
        let parsed = parse_line(line, 1, &TabixIndex::gff_default(), &wanted()).unwrap();
        let GffLine::Feature(row) = parsed else {
            panic!("expected a feature row");
        };
        assert_eq!(row.seq_id, "ERZ101_6");
        assert_eq!(row.attributes["interpro"], vec!["IPR003593", "IPR027417"]);
        assert_eq!(row.attributes["pfam"], vec!["PF00004"]);
        assert!(!row.attributes.contains_key("product"));
        assert!(!row.attributes.contains_key("ID"));
    }

    #[test]
    fn attribute_keys_match_any_case() {
        let line = "ERZ101_3\tProdigal\tCDS\t1\t90\t.\t-\t0\tID=ERZ101_3_1;InterPro=IPR003593;PFAM=PF00004;Pfam=PF07728";
        let parsed = parse_line(line, 1, &TabixIndex::gff_default(), &wanted()).unwrap();
        let GffLine::Feature(row) = parsed else {
            panic!("expected a feature row");
        };
        assert_eq!(row.attributes["interpro"], vec!["IPR003593"]);
        assert_eq!(row.attributes["pfam"], vec!["PF00004", "PF07728"]);
        assert_eq!(row.attributes.len(), 2);
    }

    #[test]
    fn comments_and_directives() {
        let index = TabixIndex::gff_default();
        assert_eq!(
            parse_line("##gff-version 3", 1, &index, &wanted()).unwrap(),
            GffLine::Comment
        );
        assert_eq!(parse_line("", 2, &index, &wanted()).unwrap(), GffLine::Comment);
        assert_eq!(
            parse_line("##FASTA", 3, &index, &wanted()).unwrap(),
            GffLine::FastaStart
        );
    }

    #[test]
    fn malformed_rows() {
        let index = TabixIndex::gff_default();
        assert_matches!(
            parse_line("ERZ101_6\tProdigal\tCDS", 7, &index, &wanted()),
            Err(IndexerError::Parse(message)) if message.starts_with("line 7")
        );
        assert_matches!(
            parse_line("ERZ101_6\tP\tCDS\tten\t300\t.\t+\t0\tID=x", 8, &index, &wanted()),
            Err(IndexerError::Parse(_))
        );
    }

    #[test]
    fn decode_escaped_values() {
        assert_eq!(percent_decode("GO%3A0005524"), "GO:0005524");
        assert_eq!(percent_decode("50%"), "50%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
