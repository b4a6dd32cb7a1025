use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("invalid taxon id: {0}")]
    InvalidTaxonId(String),

    #[error("Entrez request failed: {0}")]
    EntrezHttp(String),

    #[error("Entrez returned status {status} after {attempts} attempt(s): {message}")]
    EntrezStatus {
        status: u16,
        attempts: u32,
        message: String,
    },

    #[error("malformed Entrez response: {0}")]
    EntrezResponse(String),

    #[error(
        "Entrez response for chunk {chunk} has {returned} result(s) for {requested} id(s); \
         refusing to align"
    )]
    #[diagnostic(help(
        "results are matched to requests by position, so a short or long response cannot be \
         merged safely"
    ))]
    ResponseMisaligned {
        chunk: usize,
        requested: usize,
        returned: usize,
    },

    #[error("taxid database already populated; pass force to repopulate")]
    AlreadyPopulated,

    #[error("taxid database has not been populated; run populate first")]
    NotPopulated,

    #[error("taxid database error: {0}")]
    Database(String),

    #[error("malformed accession2taxid row at line {line}: {message}")]
    SourceRow { line: u64, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("resolution cache error: {0}")]
    Cache(String),
}

impl KiraError {
    /// Server-side failures are the only ones worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, KiraError::EntrezStatus { status, .. } if (500..=599).contains(status))
    }
}

impl From<rusqlite::Error> for KiraError {
    fn from(err: rusqlite::Error) -> Self {
        KiraError::Database(err.to_string())
    }
}
