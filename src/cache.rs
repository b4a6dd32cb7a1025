use std::collections::BTreeMap;
use std::fs;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Accession, TaxonId};
use crate::error::KiraError;
use crate::lineage::Lineage;

/// Previously resolved taxids and lineages, kept between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionCache {
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub taxids: BTreeMap<Accession, Option<TaxonId>>,
    #[serde(default)]
    pub lineages: BTreeMap<TaxonId, Lineage>,
}

impl ResolutionCache {
    /// A missing file is an empty cache.
    pub fn load(path: &Utf8Path) -> Result<Self, KiraError> {
        if !path.as_std_path().exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Cache(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| KiraError::Cache(format!("parse {path}: {err}")))
    }

    pub fn save(&mut self, path: &Utf8Path) -> Result<(), KiraError> {
        self.saved_at = Some(Utc::now());
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let content =
            serde_json::to_vec(self).map_err(|err| KiraError::Cache(err.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix("kira-tax-cache")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), &content).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn taxid(&self, accession: &Accession) -> Option<Option<TaxonId>> {
        self.taxids.get(accession).copied()
    }

    pub fn lineage(&self, taxid: TaxonId) -> Option<&Lineage> {
        self.lineages.get(&taxid)
    }

    pub fn record_taxids<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (Accession, Option<TaxonId>)>,
    {
        self.taxids.extend(entries);
    }

    pub fn record_lineages<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (TaxonId, Lineage)>,
    {
        self.lineages.extend(entries);
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let cache =
            ResolutionCache::load(Utf8Path::new("/nonexistent/kira-tax/cache.json")).unwrap();
        assert!(cache.taxids.is_empty());
        assert!(cache.lineages.is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("nested/cache.json")).unwrap();

        let mut cache = ResolutionCache::default();
        let accession: Accession = "X17276.1".parse().unwrap();
        let missing: Accession = "Z99999.1".parse().unwrap();
        cache.record_taxids([
            (accession.clone(), Some(TaxonId::new(9646))),
            (missing.clone(), None),
        ]);
        let lineage = Lineage::new(TaxonId::new(9646), BTreeMap::new(), "Eukaryota");
        cache.record_lineages([(TaxonId::new(9646), lineage.clone())]);
        cache.save(&path).unwrap();

        let loaded = ResolutionCache::load(&path).unwrap();
        assert!(loaded.saved_at.is_some());
        assert_eq!(loaded.taxid(&accession), Some(Some(TaxonId::new(9646))));
        assert_eq!(loaded.taxid(&missing), Some(None));
        assert_eq!(loaded.lineage(TaxonId::new(9646)), Some(&lineage));
    }
}
