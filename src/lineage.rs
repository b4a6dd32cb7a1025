use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::TaxonId;

/// Ranks reported to classifiers, most general first.
pub const STANDARD_RANKS: [&str; 8] = [
    "domain", "kingdom", "phylum", "class", "order", "family", "genus", "species",
];

/// One ancestor entry from an Entrez `LineageEx` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageNode {
    pub taxid: Option<TaxonId>,
    pub rank: String,
    pub scientific_name: String,
}

/// Taxon as returned by an Entrez taxonomy fetch, before assembly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaxonRecord {
    pub taxid: Option<TaxonId>,
    pub scientific_name: String,
    pub rank: String,
    pub lineage: String,
    pub lineage_ex: Vec<LineageNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lineage {
    taxid: TaxonId,
    ranks: BTreeMap<String, String>,
    raw: String,
}

impl Lineage {
    pub fn new(taxid: TaxonId, ranks: BTreeMap<String, String>, raw: impl Into<String>) -> Self {
        Self {
            taxid,
            ranks,
            raw: raw.into(),
        }
    }

    /// Folds the ancestor list into a rank map, then adds the taxon's own rank
    /// unless an ancestor already claimed it. Returns `None` without a taxid.
    pub fn from_record(record: &TaxonRecord) -> Option<Self> {
        let taxid = record.taxid?;
        let mut ranks = BTreeMap::new();
        for node in &record.lineage_ex {
            ranks.insert(node.rank.clone(), node.scientific_name.clone());
        }
        if !record.rank.is_empty() && !ranks.contains_key(&record.rank) {
            ranks.insert(record.rank.clone(), record.scientific_name.clone());
        }
        Some(Self::new(taxid, ranks, record.lineage.clone()))
    }

    pub fn taxid(&self) -> TaxonId {
        self.taxid
    }

    pub fn get(&self, rank: &str) -> Option<&str> {
        self.ranks.get(rank).map(String::as_str)
    }

    pub fn ranks(&self) -> &BTreeMap<String, String> {
        &self.ranks
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Names at each of [`STANDARD_RANKS`]; NCBI's `superkingdom` fills in for `domain`.
    pub fn standard_path(&self) -> Vec<Option<&str>> {
        STANDARD_RANKS
            .iter()
            .map(|rank| match *rank {
                "domain" => self.get("domain").or_else(|| self.get("superkingdom")),
                other => self.get(other),
            })
            .collect()
    }
}
