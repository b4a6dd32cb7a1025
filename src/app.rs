use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::cache::ResolutionCache;
use crate::domain::{Accession, TaxonId, partition_accessions};
use crate::error::KiraError;
use crate::eutils::EntrezClient;
use crate::lineage::Lineage;
use crate::resolver::TaxonomyResolver;
use crate::taxdb::TaxIdDb;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn event(&self, _event: ProgressEvent) {}
}

/// Where each resolved accession came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub cache: usize,
    pub local_db: usize,
    pub remote: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Taxdict {
    pub taxids: BTreeMap<Accession, Option<TaxonId>>,
    pub invalid: Vec<String>,
    pub sources: SourceCounts,
}

impl Taxdict {
    /// Accessions that resolved to a taxid.
    pub fn resolved(&self) -> BTreeMap<&str, TaxonId> {
        self.taxids
            .iter()
            .filter_map(|(accession, taxid)| taxid.map(|taxid| (accession.as_str(), taxid)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    #[serde(flatten)]
    pub taxdict: Taxdict,
    pub lineages: BTreeMap<TaxonId, Lineage>,
}

/// Resolves accessions through the local taxid database, then the run cache,
/// then Entrez, and builds the lineage table for everything found.
pub struct App<C: EntrezClient> {
    resolver: TaxonomyResolver<C>,
    taxdb: Option<TaxIdDb>,
    cache: ResolutionCache,
    cache_path: Option<Utf8PathBuf>,
}

impl<C: EntrezClient> App<C> {
    pub fn new(
        resolver: TaxonomyResolver<C>,
        taxdb: Option<TaxIdDb>,
        cache_path: Option<Utf8PathBuf>,
    ) -> Self {
        Self {
            resolver,
            taxdb,
            cache: ResolutionCache::default(),
            cache_path,
        }
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    pub fn cache_path(&self) -> Option<&Utf8Path> {
        self.cache_path.as_deref()
    }

    pub fn load_cache(&mut self) -> Result<(), KiraError> {
        if let Some(path) = &self.cache_path {
            self.cache = ResolutionCache::load(path)?;
            info!(
                "loaded cache from {path} ({} taxid(s), {} lineage(s))",
                self.cache.taxids.len(),
                self.cache.lineages.len()
            );
        }
        Ok(())
    }

    pub fn save_cache(&mut self) -> Result<(), KiraError> {
        if let Some(path) = &self.cache_path {
            self.cache.save(path)?;
            info!("saved cache to {path}");
        }
        Ok(())
    }

    pub fn build_taxdict<S: AsRef<str>>(
        &mut self,
        accessions: &[S],
        sink: &dyn ProgressSink,
    ) -> Result<Taxdict, KiraError> {
        let partitioned = partition_accessions(accessions);
        if !partitioned.invalid.is_empty() {
            warn!(
                "the following accession numbers are invalid and were skipped: {}",
                partitioned.invalid.join(", ")
            );
        }

        let mut taxdict = Taxdict {
            invalid: partitioned.invalid,
            ..Taxdict::default()
        };

        let mut pending = partitioned.valid;
        if let Some(taxdb) = &self.taxdb {
            if !pending.is_empty() {
                let found = taxdb.lookup_many(&pending)?;
                let mut misses = Vec::new();
                for (accession, taxid) in pending.into_iter().zip(found) {
                    match taxid {
                        Some(taxid) => {
                            taxdict.taxids.insert(accession, Some(taxid));
                            taxdict.sources.local_db += 1;
                        }
                        None => misses.push(accession),
                    }
                }
                pending = misses;
            }
        }

        // Cached entries only cover store misses.
        let mut misses = Vec::new();
        for accession in pending {
            match self.cache.taxid(&accession) {
                Some(taxid) => {
                    taxdict.taxids.insert(accession, taxid);
                    taxdict.sources.cache += 1;
                }
                None => misses.push(accession),
            }
        }
        let pending = misses;

        if !pending.is_empty() {
            let remote = self.resolver.resolve_taxids(&pending, sink)?;
            taxdict.sources.remote += remote.taxids.len();
            self.cache.record_taxids(remote.taxids.clone());
            taxdict.taxids.extend(remote.taxids);
        }

        info!(
            "resolved {} accession(s): {} from local db, {} from cache, {} remote",
            taxdict.taxids.len(),
            taxdict.sources.local_db,
            taxdict.sources.cache,
            taxdict.sources.remote
        );
        Ok(taxdict)
    }

    pub fn build_taxonomy<I, T>(
        &mut self,
        taxids: I,
        sink: &dyn ProgressSink,
    ) -> Result<BTreeMap<TaxonId, Lineage>, KiraError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<TaxonId>>,
    {
        let wanted: BTreeSet<TaxonId> = taxids
            .into_iter()
            .filter_map(|taxid| -> Option<TaxonId> { taxid.into() })
            .collect();

        let mut taxonomy = BTreeMap::new();
        let mut missing = Vec::new();
        for taxid in wanted {
            match self.cache.lineage(taxid) {
                Some(lineage) => {
                    taxonomy.insert(taxid, lineage.clone());
                }
                None => missing.push(taxid),
            }
        }

        let fetched = self.resolver.resolve_lineages(missing, sink)?;
        self.cache.record_lineages(fetched.clone());
        taxonomy.extend(fetched);
        Ok(taxonomy)
    }

    pub fn resolve<S: AsRef<str>>(
        &mut self,
        accessions: &[S],
        sink: &dyn ProgressSink,
    ) -> Result<Resolution, KiraError> {
        let taxdict = self.build_taxdict(accessions, sink)?;
        let lineages = self.build_taxonomy(taxdict.taxids.values().copied(), sink)?;
        Ok(Resolution { taxdict, lineages })
    }
}
