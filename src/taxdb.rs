use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::time::Instant;

use camino::Utf8Path;
use chrono::Utc;
use flate2::read::MultiGzDecoder;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::TaxonId;
use crate::error::KiraError;

pub const DEFAULT_POPULATE_CHUNK_SIZE: usize = 1_000_000;

const SCHEMA: &str = "
DROP TABLE IF EXISTS accn_taxid;
DROP TABLE IF EXISTS taxdb_meta;
CREATE TABLE accn_taxid(
    accn_ver TEXT NOT NULL PRIMARY KEY,
    taxid INTEGER NOT NULL
);
CREATE TABLE taxdb_meta(
    key TEXT NOT NULL PRIMARY KEY,
    value TEXT NOT NULL
);
";

const INSERT_ROW: &str = "INSERT OR IGNORE INTO accn_taxid (accn_ver, taxid) VALUES (?1, ?2)";
const SELECT_TAXID: &str = "SELECT taxid FROM accn_taxid WHERE accn_ver = ?1";
const POPULATED_KEY: &str = "populated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulateOptions {
    pub force: bool,
    /// Rows per transaction; a crash loses at most this many.
    pub chunk_size: usize,
}

impl Default for PopulateOptions {
    fn default() -> Self {
        Self {
            force: false,
            chunk_size: DEFAULT_POPULATE_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateSummary {
    pub rows_read: u64,
    pub chunks_committed: u64,
}

/// SQLite-backed accession.version -> taxid map built from an NCBI
/// accession2taxid dump.
///
/// Rows are inserted with `INSERT OR IGNORE`: the first taxid seen for an
/// accession is kept and later duplicates are dropped.
pub struct TaxIdDb {
    conn: Connection,
    populated: bool,
}

impl fmt::Debug for TaxIdDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaxIdDb")
            .field("path", &self.conn.path())
            .field("populated", &self.populated)
            .finish_non_exhaustive()
    }
}

impl TaxIdDb {
    /// Creates the schema, discarding any existing table at `path`.
    pub fn create(path: &Utf8Path) -> Result<Self, KiraError> {
        let conn = Connection::open(path.as_std_path())?;
        Self::with_schema(conn)
    }

    pub fn open_in_memory() -> Result<Self, KiraError> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    /// Opens a store created earlier, restoring its populated state.
    pub fn open(path: &Utf8Path) -> Result<Self, KiraError> {
        if !path.as_std_path().exists() {
            return Err(KiraError::Filesystem(format!(
                "taxid database not found at {path}"
            )));
        }
        let conn = Connection::open(path.as_std_path())?;
        let populated = conn
            .query_row(
                "SELECT value FROM taxdb_meta WHERE key = ?1",
                [POPULATED_KEY],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .is_some();
        Ok(Self { conn, populated })
    }

    fn with_schema(conn: Connection) -> Result<Self, KiraError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            populated: false,
        })
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Streams tab-separated `accession, accession.version, taxid, gi` rows
    /// (header skipped) into the store, committing every `chunk_size` rows.
    pub fn populate<R: Read>(
        &mut self,
        source: R,
        options: &PopulateOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PopulateSummary, KiraError> {
        if self.populated && !options.force {
            return Err(KiraError::AlreadyPopulated);
        }

        let chunk_size = options.chunk_size.max(1);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .from_reader(source);
        let mut record = csv::StringRecord::new();
        let mut summary = PopulateSummary::default();
        let started = Instant::now();
        let mut exhausted = false;

        while !exhausted {
            let tx = self.conn.transaction()?;
            let mut rows = 0u64;
            {
                let mut insert = tx.prepare_cached(INSERT_ROW)?;
                while rows < chunk_size as u64 {
                    let has_row = reader.read_record(&mut record).map_err(|err| {
                        KiraError::SourceRow {
                            line: err.position().map(|pos| pos.line()).unwrap_or(0),
                            message: err.to_string(),
                        }
                    })?;
                    if !has_row {
                        exhausted = true;
                        break;
                    }
                    let (accession, taxid) = parse_source_row(&record)?;
                    insert.execute(params![accession, taxid])?;
                    rows += 1;
                }
            }
            if rows == 0 {
                break;
            }
            tx.commit()?;
            summary.rows_read += rows;
            summary.chunks_committed += 1;

            let message = format!(
                "committed part {} ({} records)",
                summary.chunks_committed, summary.rows_read
            );
            info!("{message}");
            sink.event(ProgressEvent {
                message,
                elapsed: Some(started.elapsed()),
            });
        }

        self.conn.execute(
            "INSERT OR REPLACE INTO taxdb_meta (key, value) VALUES (?1, ?2)",
            params![POPULATED_KEY, Utc::now().to_rfc3339()],
        )?;
        self.populated = true;
        Ok(summary)
    }

    /// Populates from a plain or gzip-compressed (`.gz`) accession2taxid file.
    pub fn populate_from_path(
        &mut self,
        path: &Utf8Path,
        options: &PopulateOptions,
        sink: &dyn ProgressSink,
    ) -> Result<PopulateSummary, KiraError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {path}: {err}")))?;
        let source: Box<dyn Read> = if path.extension() == Some("gz") {
            Box::new(MultiGzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(file)
        };
        self.populate(source, options, sink)
    }

    pub fn lookup(&self, accession: &str) -> Result<Option<TaxonId>, KiraError> {
        self.ensure_populated()?;
        let taxid = self
            .conn
            .query_row(SELECT_TAXID, [accession], |row| row.get::<_, i64>(0))
            .optional()?;
        taxid.map(to_taxon_id).transpose()
    }

    /// One result per input, in input order.
    pub fn lookup_many<S: AsRef<str>>(
        &self,
        accessions: &[S],
    ) -> Result<Vec<Option<TaxonId>>, KiraError> {
        self.ensure_populated()?;
        let mut select = self.conn.prepare_cached(SELECT_TAXID)?;
        accessions
            .iter()
            .map(|accession| -> Result<Option<TaxonId>, KiraError> {
                select
                    .query_row([accession.as_ref()], |row| row.get::<_, i64>(0))
                    .optional()?
                    .map(to_taxon_id)
                    .transpose()
            })
            .collect()
    }

    pub fn row_count(&self) -> Result<u64, KiraError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM accn_taxid", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn ensure_populated(&self) -> Result<(), KiraError> {
        if self.populated {
            Ok(())
        } else {
            Err(KiraError::NotPopulated)
        }
    }
}

fn parse_source_row(record: &csv::StringRecord) -> Result<(&str, i64), KiraError> {
    let line = record.position().map(|pos| pos.line()).unwrap_or(0);
    let (Some(accession), Some(taxid)) = (record.get(1), record.get(2)) else {
        return Err(KiraError::SourceRow {
            line,
            message: format!("expected 4 columns, found {}", record.len()),
        });
    };
    let taxid = taxid.trim().parse::<i64>().map_err(|_| KiraError::SourceRow {
        line,
        message: format!("invalid taxid {taxid:?}"),
    })?;
    Ok((accession.trim(), taxid))
}

fn to_taxon_id(value: i64) -> Result<TaxonId, KiraError> {
    u64::try_from(value)
        .map(TaxonId::new)
        .map_err(|_| KiraError::InvalidTaxonId(value.to_string()))
}
