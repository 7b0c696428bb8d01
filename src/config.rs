use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::AnnotationCategory;
use crate::error::IndexerError;
use crate::import::ImportOptions;

pub const DEFAULT_CONFIG_FILE: &str = "contig-indexer.json";
pub const DEFAULT_BATCH_SIZE: usize = 200;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub store: Option<String>,
    pub import: ImportEntry,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ImportEntry {
    pub url: String,
    pub index_url: String,
    pub assembly_accession: String,
    #[serde(default)]
    pub fasta_url: Option<String>,
    #[serde(default)]
    pub fasta_fai_url: Option<String>,
    #[serde(default)]
    pub fasta_gzi_url: Option<String>,
    #[serde(default)]
    pub attributes_to_index: Option<Vec<String>>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub clear_existing: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub store: Option<Utf8PathBuf>,
    pub import: ImportOptions,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, IndexerError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(IndexerError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| IndexerError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| IndexerError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, IndexerError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(IndexerError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let entry = config.import;
        for (field, value) in [
            ("url", &entry.url),
            ("index_url", &entry.index_url),
            ("assembly_accession", &entry.assembly_accession),
        ] {
            if value.trim().is_empty() {
                return Err(IndexerError::InvalidConfig(format!("{field} must not be empty")));
            }
        }

        let batch_size = entry.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size == 0 {
            return Err(IndexerError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }

        let attributes_to_index = entry
            .attributes_to_index
            .filter(|attributes| !attributes.is_empty())
            .unwrap_or_else(default_attributes_to_index);

        Ok(ResolvedConfig {
            schema_version,
            store: config.store.map(Utf8PathBuf::from),
            import: ImportOptions {
                url: entry.url,
                assembly_accession: entry.assembly_accession,
                index_url: entry.index_url,
                fasta_url: entry.fasta_url,
                fasta_fai_url: entry.fasta_fai_url,
                fasta_gzi_url: entry.fasta_gzi_url,
                attributes_to_index,
                batch_size,
                clear_existing: entry.clear_existing.unwrap_or(true),
            },
        })
    }
}

pub fn default_attributes_to_index() -> Vec<String> {
    AnnotationCategory::ALL
        .into_iter()
        .map(|category| category.attribute_key().to_string())
        .collect()
}
