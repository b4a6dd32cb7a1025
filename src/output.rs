use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ProgressEvent, ProgressSink, Resolution};
use crate::domain::TaxonId;
use crate::taxdb::PopulateSummary;

#[derive(Debug, Clone, Serialize)]
pub struct LookupEntry {
    pub accession: String,
    pub taxid: Option<TaxonId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildResult {
    pub database: String,
    pub rows_read: u64,
    pub chunks_committed: u64,
}

impl BuildResult {
    pub fn new(database: impl Into<String>, summary: PopulateSummary) -> Self {
        Self {
            database: database.into(),
            rows_read: summary.rows_read,
            chunks_committed: summary.chunks_committed,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_resolution(result: &Resolution) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_lookup(result: &[LookupEntry]) -> io::Result<()> {
        Self::print_json(&result)
    }

    pub fn print_build(result: &BuildResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress to the tracing subscriber.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} [{:.1}s]", event.message, elapsed.as_secs_f64()),
            None => info!("{}", event.message),
        }
    }
}
