use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

fn accession_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z0-9_]+\.[0-9]+$").expect("accession regex"))
}

/// Versioned nucleotide accession such as `X17276.1` or `NR_024570.1`.
pub fn is_valid_accession(value: &str) -> bool {
    accession_pattern().is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Accession(String);

impl Accession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Accession {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Accession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Accession {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !is_valid_accession(value) {
            return Err(KiraError::InvalidAccession(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for Accession {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if !is_valid_accession(&value) {
            return Err(KiraError::InvalidAccession(value));
        }
        Ok(Self(value))
    }
}

impl From<Accession> for String {
    fn from(value: Accession) -> Self {
        value.0
    }
}

/// Numeric identifier assigned by the NCBI taxonomy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaxonId(u64);

impl TaxonId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| KiraError::InvalidTaxonId(value.to_string()))
    }
}

impl From<u64> for TaxonId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Accessions split into unique valid ones (first-seen order) and the rejected inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionedAccessions {
    pub valid: Vec<Accession>,
    pub invalid: Vec<String>,
}

pub fn partition_accessions<S: AsRef<str>>(accessions: &[S]) -> PartitionedAccessions {
    let mut seen = HashSet::new();
    let mut partitioned = PartitionedAccessions::default();
    for raw in accessions {
        let raw = raw.as_ref();
        if !seen.insert(raw) {
            continue;
        }
        match raw.parse::<Accession>() {
            Ok(accession) => partitioned.valid.push(accession),
            Err(_) => partitioned.invalid.push(raw.to_string()),
        }
    }
    partitioned
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn accession_syntax() {
        assert!(is_valid_accession("X17276.1"));
        assert!(is_valid_accession("NR_024570.12"));
        assert!(!is_valid_accession("bad_accn"));
        assert!(!is_valid_accession("X17276"));
        assert!(!is_valid_accession("x17276.1"));
        assert!(!is_valid_accession("X17276.1a"));
        assert!(!is_valid_accession(""));
    }

    #[test]
    fn parse_accession_invalid() {
        let err = "X17276".parse::<Accession>().unwrap_err();
        assert_matches!(err, KiraError::InvalidAccession(_));
    }

    #[test]
    fn parse_taxon_id() {
        let taxid: TaxonId = " 9606 ".parse().unwrap();
        assert_eq!(taxid.get(), 9606);
        assert_matches!(
            "human".parse::<TaxonId>().unwrap_err(),
            KiraError::InvalidTaxonId(_)
        );
    }

    #[test]
    fn partition_dedups_and_reports_invalid_once() {
        let input = ["X17276.1", "bad_accn", "X17276.1", "A00002.1", "bad_accn"];
        let partitioned = partition_accessions(&input);
        let valid: Vec<&str> = partitioned.valid.iter().map(Accession::as_str).collect();
        assert_eq!(valid, vec!["X17276.1", "A00002.1"]);
        assert_eq!(partitioned.invalid, vec!["bad_accn".to_string()]);
    }
}
