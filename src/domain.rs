use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

static CONTIG_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+_(\d+)$").expect("static regex"));

/// Derives the numeric contig id from a `<prefix>_<index>` contig name.
pub fn contig_name_to_id(name: &str) -> Result<u64, IndexerError> {
    CONTIG_SUFFIX
        .captures(name.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|index| index.as_str().parse::<u64>().ok())
        .ok_or_else(|| IndexerError::InvalidContigName(name.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationCategory {
    Interpro,
    Pfam,
    Cog,
    Kegg,
    Go,
}

impl AnnotationCategory {
    pub const ALL: [AnnotationCategory; 5] = [
        AnnotationCategory::Interpro,
        AnnotationCategory::Pfam,
        AnnotationCategory::Cog,
        AnnotationCategory::Kegg,
        AnnotationCategory::Go,
    ];

    /// GFF3 attribute key carrying this category's identifiers.
    pub fn attribute_key(self) -> &'static str {
        match self {
            AnnotationCategory::Interpro => "interpro",
            AnnotationCategory::Pfam => "pfam",
            AnnotationCategory::Cog => "cog",
            AnnotationCategory::Kegg => "kegg",
            AnnotationCategory::Go => "go",
        }
    }

    /// Name of the annotation set, also used as the stored column name.
    pub fn set_name(self) -> &'static str {
        match self {
            AnnotationCategory::Interpro => "interpros",
            AnnotationCategory::Pfam => "pfams",
            AnnotationCategory::Cog => "cogs",
            AnnotationCategory::Kegg => "keggs",
            AnnotationCategory::Go => "gos",
        }
    }

    pub fn presence_name(self) -> &'static str {
        match self {
            AnnotationCategory::Interpro => "has_interpros",
            AnnotationCategory::Pfam => "has_pfams",
            AnnotationCategory::Cog => "has_cogs",
            AnnotationCategory::Kegg => "has_keggs",
            AnnotationCategory::Go => "has_gos",
        }
    }

    pub fn from_attribute_key(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.attribute_key().eq_ignore_ascii_case(key.trim()))
    }
}

impl fmt::Display for AnnotationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.attribute_key())
    }
}

impl FromStr for AnnotationCategory {
    type Err = IndexerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| {
                category.attribute_key() == normalized || category.set_name() == normalized
            })
            .ok_or_else(|| IndexerError::InvalidCategory(value.to_string()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotations {
    pub interpros: BTreeSet<String>,
    pub pfams: BTreeSet<String>,
    pub cogs: BTreeSet<String>,
    pub keggs: BTreeSet<String>,
    pub gos: BTreeSet<String>,
}

impl Annotations {
    /// Builds the category sets from extracted GFF3 attributes. Keys that do
    /// not name a category are ignored.
    pub fn from_attributes(attributes: &BTreeMap<String, Vec<String>>) -> Self {
        let mut annotations = Self::default();
        for (key, values) in attributes {
            if let Some(category) = AnnotationCategory::from_attribute_key(key) {
                annotations.extend(category, values.iter().cloned());
            }
        }
        annotations
    }

    pub fn get(&self, category: AnnotationCategory) -> &BTreeSet<String> {
        match category {
            AnnotationCategory::Interpro => &self.interpros,
            AnnotationCategory::Pfam => &self.pfams,
            AnnotationCategory::Cog => &self.cogs,
            AnnotationCategory::Kegg => &self.keggs,
            AnnotationCategory::Go => &self.gos,
        }
    }

    fn get_mut(&mut self, category: AnnotationCategory) -> &mut BTreeSet<String> {
        match category {
            AnnotationCategory::Interpro => &mut self.interpros,
            AnnotationCategory::Pfam => &mut self.pfams,
            AnnotationCategory::Cog => &mut self.cogs,
            AnnotationCategory::Kegg => &mut self.keggs,
            AnnotationCategory::Go => &mut self.gos,
        }
    }

    pub fn insert(&mut self, category: AnnotationCategory, value: impl Into<String>) -> bool {
        let value = value.into();
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        self.get_mut(category).insert(value.to_string())
    }

    pub fn extend<I>(&mut self, category: AnnotationCategory, values: I)
    where
        I: IntoIterator<Item = String>,
    {
        for value in values {
            self.insert(category, value);
        }
    }

    /// Set union, category by category.
    pub fn union_with(&mut self, other: &Annotations) {
        for category in AnnotationCategory::ALL {
            let target = self.get_mut(category);
            for value in other.get(category) {
                if !target.contains(value) {
                    target.insert(value.clone());
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        AnnotationCategory::ALL
            .into_iter()
            .all(|category| self.get(category).is_empty())
    }

    pub fn presence(&self) -> AnnotationPresence {
        AnnotationPresence {
            has_interpros: !self.interpros.is_empty(),
            has_pfams: !self.pfams.is_empty(),
            has_cogs: !self.cogs.is_empty(),
            has_keggs: !self.keggs.is_empty(),
            has_gos: !self.gos.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPresence {
    pub has_interpros: bool,
    pub has_pfams: bool,
    pub has_cogs: bool,
    pub has_keggs: bool,
    pub has_gos: bool,
}

impl AnnotationPresence {
    pub fn get(&self, category: AnnotationCategory) -> bool {
        match category {
            AnnotationCategory::Interpro => self.has_interpros,
            AnnotationCategory::Pfam => self.has_pfams,
            AnnotationCategory::Cog => self.has_cogs,
            AnnotationCategory::Kegg => self.has_keggs,
            AnnotationCategory::Go => self.has_gos,
        }
    }
}

/// One record per assembly contig. The presence flags are private and
/// recomputed by every method that touches the annotation sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contig {
    contig_id: u64,
    contig_name: String,
    length: Option<u64>,
    annotations: Annotations,
    annotations_presence: AnnotationPresence,
}

impl Contig {
    pub fn new(contig_name: impl Into<String>) -> Result<Self, IndexerError> {
        Self::with_annotations(contig_name, Annotations::default())
    }

    pub fn with_annotations(
        contig_name: impl Into<String>,
        annotations: Annotations,
    ) -> Result<Self, IndexerError> {
        let contig_name = contig_name.into();
        let contig_id = contig_name_to_id(&contig_name)?;
        Ok(Self::from_parts(contig_id, contig_name, None, annotations))
    }

    pub(crate) fn from_parts(
        contig_id: u64,
        contig_name: String,
        length: Option<u64>,
        annotations: Annotations,
    ) -> Self {
        let annotations_presence = annotations.presence();
        Self {
            contig_id,
            contig_name,
            length,
            annotations,
            annotations_presence,
        }
    }

    /// Rebuilds a record exactly as stored, flags included, so that readers
    /// can check the stored flags against the stored sets.
    pub(crate) fn from_stored(
        contig_id: u64,
        contig_name: String,
        length: Option<u64>,
        annotations: Annotations,
        annotations_presence: AnnotationPresence,
    ) -> Self {
        Self {
            contig_id,
            contig_name,
            length,
            annotations,
            annotations_presence,
        }
    }

    pub fn contig_id(&self) -> u64 {
        self.contig_id
    }

    pub fn contig_name(&self) -> &str {
        &self.contig_name
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn presence(&self) -> AnnotationPresence {
        self.annotations_presence
    }

    pub fn set_length(&mut self, length: Option<u64>) {
        self.length = length;
    }

    pub fn merge_annotations(&mut self, incoming: &Annotations) {
        self.annotations.union_with(incoming);
        self.annotations_presence = self.annotations.presence();
    }

    pub fn replace_annotations(&mut self, annotations: Annotations) {
        self.annotations = annotations;
        self.annotations_presence = self.annotations.presence();
    }
}

/// Partial update applied by [`crate::store::ContigStore::bulk_update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContigPatch {
    pub contig_id: u64,
    pub length: Option<u64>,
    pub annotations: Option<Annotations>,
}

impl ContigPatch {
    pub fn length(contig_id: u64, length: u64) -> Self {
        Self {
            contig_id,
            length: Some(length),
            annotations: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetaKey {
    #[serde(rename = "sourceUrl")]
    SourceUrl,
    #[serde(rename = "assemblyAccession")]
    AssemblyAccession,
    #[serde(rename = "importStartedAt")]
    ImportStartedAt,
}

impl MetaKey {
    pub const ALL: [MetaKey; 3] = [
        MetaKey::SourceUrl,
        MetaKey::AssemblyAccession,
        MetaKey::ImportStartedAt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetaKey::SourceUrl => "sourceUrl",
            MetaKey::AssemblyAccession => "assemblyAccession",
            MetaKey::ImportStartedAt => "importStartedAt",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for MetaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaEntry {
    pub key: MetaKey,
    pub value: String,
}

/// A parsed GFF3 row reduced to its sequence id and the attributes selected
/// for indexing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureRow {
    pub seq_id: String,
    pub attributes: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn contig_id_from_suffix() {
        assert_eq!(contig_name_to_id("ERZ101_6").unwrap(), 6);
        assert_eq!(contig_name_to_id("ERZ101_6").unwrap(), 6);
        assert_eq!(contig_name_to_id("ERZ1_contig_42").unwrap(), 42);
    }

    #[test]
    fn contig_id_rejects_missing_suffix() {
        assert_matches!(
            contig_name_to_id("ERZ101"),
            Err(IndexerError::InvalidContigName(_))
        );
        assert_matches!(
            contig_name_to_id("_7"),
            Err(IndexerError::InvalidContigName(_))
        );
        assert_matches!(
            contig_name_to_id("ERZ101_x"),
            Err(IndexerError::InvalidContigName(_))
        );
    }

    #[test]
    fn category_parsing() {
        assert_eq!(
            "InterPro".parse::<AnnotationCategory>().unwrap(),
            AnnotationCategory::Interpro
        );
        assert_eq!(
            "gos".parse::<AnnotationCategory>().unwrap(),
            AnnotationCategory::Go
        );
        assert_matches!(
            "ec".parse::<AnnotationCategory>(),
            Err(IndexerError::InvalidCategory(_))
        );
    }

    #[test]
    fn merge_recomputes_presence() {
        let mut contig = Contig::new("ERZ101_3").unwrap();
        assert_eq!(contig.presence(), AnnotationPresence::default());

        let mut incoming = Annotations::default();
        incoming.insert(AnnotationCategory::Pfam, "PF00004");
        incoming.insert(AnnotationCategory::Pfam, "PF00004");
        contig.merge_annotations(&incoming);

        assert_eq!(contig.annotations().pfams.len(), 1);
        assert!(contig.presence().has_pfams);
        assert!(!contig.presence().has_interpros);

        contig.replace_annotations(Annotations::default());
        assert!(!contig.presence().has_pfams);
    }

    #[test]
    fn attributes_map_to_categories() {
        let mut attributes = BTreeMap::new();
        attributes.insert(
            "interpro".to_string(),
            vec!["IPR003593".to_string(), "IPR003959".to_string()],
        );
        attributes.insert("Name".to_string(), vec!["dnaA".to_string()]);
        let annotations = Annotations::from_attributes(&attributes);
        assert_eq!(annotations.interpros.len(), 2);
        assert!(annotations.pfams.is_empty());
    }
}
