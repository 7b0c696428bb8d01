//! Contig annotation store.
//!
//! An embedded SQLite database holding one row per contig plus an inverted
//! index (`contig_annotations`) from annotation value to contig id for each
//! category. Every contig write rewrites the record, its presence flags and
//! its inverted-index rows inside the caller's transaction, and the handle's
//! mutex serializes readers against writers, so no reader ever sees a record
//! whose flags disagree with its sets or a half-applied batch.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::{debug, info};

use crate::domain::{
    AnnotationCategory, AnnotationPresence, Annotations, Contig, ContigPatch, MetaEntry, MetaKey,
};
use crate::error::IndexerError;

pub const SCHEMA_VERSION: i32 = 1;

/// Ids per `IN (...)` list; stays under SQLite's bound-parameter limit.
const BULK_GET_CHUNK: usize = 500;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS contigs (
    contig_id INTEGER PRIMARY KEY,
    contig_name TEXT NOT NULL,
    length INTEGER,
    interpros TEXT NOT NULL DEFAULT '[]',
    pfams TEXT NOT NULL DEFAULT '[]',
    cogs TEXT NOT NULL DEFAULT '[]',
    keggs TEXT NOT NULL DEFAULT '[]',
    gos TEXT NOT NULL DEFAULT '[]',
    has_interpros INTEGER NOT NULL DEFAULT 0,
    has_pfams INTEGER NOT NULL DEFAULT 0,
    has_cogs INTEGER NOT NULL DEFAULT 0,
    has_keggs INTEGER NOT NULL DEFAULT 0,
    has_gos INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_contigs_has_interpros ON contigs(has_interpros);
CREATE INDEX IF NOT EXISTS idx_contigs_has_pfams ON contigs(has_pfams);
CREATE INDEX IF NOT EXISTS idx_contigs_has_cogs ON contigs(has_cogs);
CREATE INDEX IF NOT EXISTS idx_contigs_has_keggs ON contigs(has_keggs);
CREATE INDEX IF NOT EXISTS idx_contigs_has_gos ON contigs(has_gos);

CREATE TABLE IF NOT EXISTS contig_annotations (
    category TEXT NOT NULL,
    value TEXT NOT NULL,
    contig_id INTEGER NOT NULL,
    PRIMARY KEY (category, value, contig_id)
);
CREATE INDEX IF NOT EXISTS idx_contig_annotations_value_nocase
    ON contig_annotations(category, value COLLATE NOCASE);
CREATE INDEX IF NOT EXISTS idx_contig_annotations_contig
    ON contig_annotations(contig_id);

CREATE TABLE IF NOT EXISTS meta (
    name TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const CONTIG_COLUMNS: &str = "contig_id, contig_name, length, interpros, pfams, cogs, keggs, gos, \
     has_interpros, has_pfams, has_cogs, has_keggs, has_gos";

/// Cloneable handle to one store. Clones share the same connection.
#[derive(Clone)]
pub struct ContigStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl ContigStore {
    pub fn open(path: &Utf8Path) -> Result<Self, IndexerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| IndexerError::Filesystem(err.to_string()))?;
            }
        }
        let conn = Connection::open(path.as_std_path())?;
        Self::from_connection(conn, path.to_string())
    }

    pub fn open_in_memory() -> Result<Self, IndexerError> {
        Self::from_connection(Connection::open_in_memory()?, ":memory:".to_string())
    }

    /// `~/.cache/contig-indexer/contigs.sqlite`
    pub fn default_path() -> Result<Utf8PathBuf, IndexerError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(
                    dirs.home_dir()
                        .join(".cache")
                        .join("contig-indexer")
                        .join("contigs.sqlite"),
                )
                .ok()
            })
            .ok_or_else(|| IndexerError::Filesystem("unable to resolve cache directory".to_string()))
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self, IndexerError> {
        migrate(&conn)?;
        debug!(store = %location, "contig store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, IndexerError> {
        self.conn
            .lock()
            .map_err(|_| IndexerError::Storage("store lock poisoned".to_string()))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), IndexerError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }

    /// Runs `work` inside one transaction. An error from `work` rolls the
    /// whole transaction back.
    pub fn transaction<T, F>(&self, work: F) -> Result<T, IndexerError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, IndexerError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let value = work(&StoreTx { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    pub fn get(&self, contig_id: u64) -> Result<Option<Contig>, IndexerError> {
        self.transaction(|tx| tx.get(contig_id))
    }

    pub fn bulk_get(&self, contig_ids: &[u64]) -> Result<Vec<Contig>, IndexerError> {
        self.transaction(|tx| tx.bulk_get(contig_ids))
    }

    pub fn bulk_put(&self, contigs: &[Contig]) -> Result<usize, IndexerError> {
        self.transaction(|tx| tx.bulk_put(contigs))
    }

    pub fn bulk_add(&self, contigs: &[Contig]) -> Result<usize, IndexerError> {
        self.transaction(|tx| tx.bulk_add(contigs))
    }

    pub fn bulk_update(&self, patches: &[ContigPatch]) -> Result<usize, IndexerError> {
        self.transaction(|tx| tx.bulk_update(patches))
    }

    pub fn clear(&self) -> Result<(), IndexerError> {
        self.transaction(|tx| tx.clear())
    }

    pub fn count(&self) -> Result<u64, IndexerError> {
        self.transaction(|tx| tx.count())
    }

    pub fn count_with(&self, category: AnnotationCategory) -> Result<u64, IndexerError> {
        self.transaction(|tx| tx.count_with(category))
    }

    pub fn contig_ids_by_prefix(
        &self,
        category: AnnotationCategory,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<u64>, IndexerError> {
        self.transaction(|tx| tx.contig_ids_by_prefix(category, prefix, limit))
    }

    pub fn find_by_annotation_prefix(
        &self,
        category: AnnotationCategory,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<Contig>, IndexerError> {
        self.transaction(|tx| {
            let ids = tx.contig_ids_by_prefix(category, prefix, limit)?;
            tx.bulk_get(&ids)
        })
    }

    pub fn meta(&self, key: MetaKey) -> Result<Option<String>, IndexerError> {
        self.transaction(|tx| tx.meta(key))
    }

    pub fn all_meta(&self) -> Result<Vec<MetaEntry>, IndexerError> {
        self.transaction(|tx| tx.all_meta())
    }

    pub fn put_meta(&self, key: MetaKey, value: &str) -> Result<(), IndexerError> {
        self.transaction(|tx| tx.put_meta(key, value))
    }

    /// Removes every contig and every meta entry.
    pub fn reset(&self) -> Result<(), IndexerError> {
        self.transaction(|tx| {
            tx.clear()?;
            tx.clear_meta()
        })?;
        info!(store = %self.location, "contig store reset");
        Ok(())
    }
}

/// Store operations bound to an open transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    pub fn get(&self, contig_id: u64) -> Result<Option<Contig>, IndexerError> {
        let mut statement = self
            .conn
            .prepare_cached(&format!("SELECT {CONTIG_COLUMNS} FROM contigs WHERE contig_id = ?1"))?;
        let stored = statement
            .query_row(params![to_sql_id(contig_id)?], StoredRow::read)
            .optional()?;
        stored.map(StoredRow::into_contig).transpose()
    }

    /// Returns the stored records among `contig_ids`, in the order given.
    /// Unknown ids are skipped.
    pub fn bulk_get(&self, contig_ids: &[u64]) -> Result<Vec<Contig>, IndexerError> {
        let mut found = HashMap::with_capacity(contig_ids.len());
        for chunk in contig_ids.chunks(BULK_GET_CHUNK) {
            let ids = chunk
                .iter()
                .map(|contig_id| to_sql_id(*contig_id))
                .collect::<Result<Vec<_>, _>>()?;
            let placeholders = vec!["?"; ids.len()].join(", ");
            let mut statement = self.conn.prepare_cached(&format!(
                "SELECT {CONTIG_COLUMNS} FROM contigs WHERE contig_id IN ({placeholders})"
            ))?;
            let rows = statement
                .query_map(params_from_iter(ids.iter()), StoredRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            for stored in rows {
                let contig = stored.into_contig()?;
                found.insert(contig.contig_id(), contig);
            }
        }
        Ok(contig_ids
            .iter()
            .filter_map(|contig_id| found.get(contig_id).cloned())
            .collect())
    }

    /// Inserts or replaces whole records.
    pub fn bulk_put(&self, contigs: &[Contig]) -> Result<usize, IndexerError> {
        for contig in contigs {
            self.write_contig(contig, true)?;
        }
        Ok(contigs.len())
    }

    /// Inserts records; fails if any id is already stored.
    pub fn bulk_add(&self, contigs: &[Contig]) -> Result<usize, IndexerError> {
        for contig in contigs {
            self.write_contig(contig, false)?;
        }
        Ok(contigs.len())
    }

    /// Applies partial updates, returning how many stored records changed.
    pub fn bulk_update(&self, patches: &[ContigPatch]) -> Result<usize, IndexerError> {
        let mut updated = 0;
        for patch in patches {
            let Some(mut contig) = self.get(patch.contig_id)? else {
                continue;
            };
            if let Some(length) = patch.length {
                contig.set_length(Some(length));
            }
            if let Some(annotations) = &patch.annotations {
                contig.replace_annotations(annotations.clone());
            }
            self.write_contig(&contig, true)?;
            updated += 1;
        }
        Ok(updated)
    }

    pub fn clear(&self) -> Result<(), IndexerError> {
        self.conn.execute("DELETE FROM contig_annotations", [])?;
        self.conn.execute("DELETE FROM contigs", [])?;
        Ok(())
    }

    pub fn count(&self) -> Result<u64, IndexerError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contigs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Number of contigs whose presence flag for `category` is set.
    pub fn count_with(&self, category: AnnotationCategory) -> Result<u64, IndexerError> {
        let sql = format!(
            "SELECT COUNT(*) FROM contigs WHERE {} = 1",
            category.presence_name()
        );
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Ids of contigs holding a `category` value that starts with `prefix`,
    /// compared case-insensitively.
    pub fn contig_ids_by_prefix(
        &self,
        category: AnnotationCategory,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<u64>, IndexerError> {
        let mut statement = self.conn.prepare_cached(
            r#"
            SELECT DISTINCT contig_id
            FROM contig_annotations
            WHERE category = ?1 AND value LIKE ?2 ESCAPE '\'
            ORDER BY contig_id
            LIMIT ?3
            "#,
        )?;
        let pattern = format!("{}%", escape_like(prefix));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let ids = statement
            .query_map(params![category.set_name(), pattern, limit], |row| {
                row.get::<_, i64>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    pub fn meta(&self, key: MetaKey) -> Result<Option<String>, IndexerError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE name = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn all_meta(&self) -> Result<Vec<MetaEntry>, IndexerError> {
        let mut statement = self
            .conn
            .prepare_cached("SELECT name, value FROM meta ORDER BY name")?;
        let rows = statement
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(name, value)| MetaKey::from_name(&name).map(|key| MetaEntry { key, value }))
            .collect())
    }

    pub fn put_meta(&self, key: MetaKey, value: &str) -> Result<(), IndexerError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (name, value) VALUES (?1, ?2)",
            params![key.as_str(), value],
        )?;
        Ok(())
    }

    pub fn clear_meta(&self) -> Result<(), IndexerError> {
        self.conn.execute("DELETE FROM meta", [])?;
        Ok(())
    }

    fn write_contig(&self, contig: &Contig, replace: bool) -> Result<(), IndexerError> {
        let contig_id = to_sql_id(contig.contig_id())?;
        let annotations = contig.annotations();
        // Flags come from the sets being written, never from the caller.
        let presence = annotations.presence();
        let length = contig
            .length()
            .map(|length| {
                i64::try_from(length)
                    .map_err(|_| IndexerError::Storage(format!("length out of range: {length}")))
            })
            .transpose()?;
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let sql = format!(
            "{verb} INTO contigs ({CONTIG_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        );
        self.conn.prepare_cached(&sql)?.execute(params![
            contig_id,
            contig.contig_name(),
            length,
            encode_set(&annotations.interpros)?,
            encode_set(&annotations.pfams)?,
            encode_set(&annotations.cogs)?,
            encode_set(&annotations.keggs)?,
            encode_set(&annotations.gos)?,
            presence.has_interpros,
            presence.has_pfams,
            presence.has_cogs,
            presence.has_keggs,
            presence.has_gos,
        ])?;

        self.conn
            .prepare_cached("DELETE FROM contig_annotations WHERE contig_id = ?1")?
            .execute(params![contig_id])?;
        let mut insert = self.conn.prepare_cached(
            "INSERT OR IGNORE INTO contig_annotations (category, value, contig_id) VALUES (?1, ?2, ?3)",
        )?;
        for category in AnnotationCategory::ALL {
            for value in annotations.get(category) {
                insert.execute(params![category.set_name(), value, contig_id])?;
            }
        }
        Ok(())
    }
}

struct StoredRow {
    contig_id: i64,
    contig_name: String,
    length: Option<i64>,
    sets: [String; 5],
    flags: [bool; 5],
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            contig_id: row.get(0)?,
            contig_name: row.get(1)?,
            length: row.get(2)?,
            sets: [row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?, row.get(7)?],
            flags: [row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?, row.get(12)?],
        })
    }

    fn into_contig(self) -> Result<Contig, IndexerError> {
        let [interpros, pfams, cogs, keggs, gos] = self.sets;
        let annotations = Annotations {
            interpros: decode_set(&interpros)?,
            pfams: decode_set(&pfams)?,
            cogs: decode_set(&cogs)?,
            keggs: decode_set(&keggs)?,
            gos: decode_set(&gos)?,
        };
        let [has_interpros, has_pfams, has_cogs, has_keggs, has_gos] = self.flags;
        Ok(Contig::from_stored(
            self.contig_id as u64,
            self.contig_name,
            self.length.map(|length| length as u64),
            annotations,
            AnnotationPresence {
                has_interpros,
                has_pfams,
                has_cogs,
                has_keggs,
                has_gos,
            },
        ))
    }
}

fn migrate(conn: &Connection) -> Result<(), IndexerError> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(IndexerError::Storage(format!(
            "store schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if version < SCHEMA_VERSION {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        debug!(from = version, to = SCHEMA_VERSION, "store schema migrated");
    }
    Ok(())
}

fn to_sql_id(contig_id: u64) -> Result<i64, IndexerError> {
    i64::try_from(contig_id)
        .map_err(|_| IndexerError::Storage(format!("contig id out of range: {contig_id}")))
}

fn encode_set(values: &BTreeSet<String>) -> Result<String, IndexerError> {
    serde_json::to_string(values).map_err(|err| IndexerError::Storage(err.to_string()))
}

fn decode_set(raw: &str) -> Result<BTreeSet<String>, IndexerError> {
    serde_json::from_str(raw).map_err(|err| IndexerError::Storage(err.to_string()))
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
