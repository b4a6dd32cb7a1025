use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{Accession, TaxonId, partition_accessions};
use crate::error::KiraError;
use crate::eutils::EntrezClient;
use crate::lineage::Lineage;

/// Entrez rejects link requests much above this many ids.
pub const MAX_LINK_CHUNK_SIZE: usize = 5000;
pub const DEFAULT_FETCH_PAGE_SIZE: usize = 5000;

const NUCLEOTIDE_DB: &str = "nucleotide";
const NUCLEOTIDE_TAXONOMY_LINK: &str = "nucleotide_taxonomy";
const TAXONOMY_DB: &str = "taxonomy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    pub link_chunk_size: usize,
    pub fetch_page_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            link_chunk_size: MAX_LINK_CHUNK_SIZE,
            fetch_page_size: DEFAULT_FETCH_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxidResolution {
    /// One entry per unique valid accession; `None` when no taxonomy link exists.
    pub taxids: BTreeMap<Accession, Option<TaxonId>>,
    /// Inputs that failed accession syntax and were never queried.
    pub invalid: Vec<String>,
}

/// Chunked Entrez resolution of accessions to taxids and taxids to lineages.
///
/// Link responses carry no usable echo of the requested accession, so each
/// chunk's results are matched to its ids by position. A chunk whose result
/// count differs from its request count fails with
/// [`KiraError::ResponseMisaligned`] instead of being merged.
pub struct TaxonomyResolver<C: EntrezClient> {
    client: C,
    config: ResolverConfig,
}

impl<C: EntrezClient> TaxonomyResolver<C> {
    pub fn new(client: C, config: ResolverConfig) -> Self {
        let config = ResolverConfig {
            link_chunk_size: config.link_chunk_size.clamp(1, MAX_LINK_CHUNK_SIZE),
            fetch_page_size: config.fetch_page_size.max(1),
        };
        Self { client, config }
    }

    pub fn config(&self) -> ResolverConfig {
        self.config
    }

    pub fn resolve_taxids<S: AsRef<str>>(
        &self,
        accessions: &[S],
        sink: &dyn ProgressSink,
    ) -> Result<TaxidResolution, KiraError> {
        let partitioned = partition_accessions(accessions);
        if !partitioned.invalid.is_empty() {
            warn!(
                "skipping {} invalid accession(s): {}",
                partitioned.invalid.len(),
                partitioned.invalid.join(", ")
            );
        }
        info!(
            "retrieving taxids for {} accession(s)",
            partitioned.valid.len()
        );

        let ids: Vec<String> = partitioned
            .valid
            .iter()
            .map(|accession| accession.as_str().to_string())
            .collect();
        let links = self.link_in_chunks(&ids, sink)?;

        Ok(TaxidResolution {
            taxids: partitioned.valid.into_iter().zip(links).collect(),
            invalid: partitioned.invalid,
        })
    }

    /// GI numbers go through the same link path as accessions.
    pub fn resolve_gi_taxids(
        &self,
        gis: &[u64],
        sink: &dyn ProgressSink,
    ) -> Result<BTreeMap<u64, Option<TaxonId>>, KiraError> {
        let mut seen = HashSet::new();
        let unique: Vec<u64> = gis.iter().copied().filter(|gi| seen.insert(*gi)).collect();
        info!("retrieving taxids for {} GI number(s)", unique.len());
        let ids: Vec<String> = unique.iter().map(u64::to_string).collect();
        let links = self.link_in_chunks(&ids, sink)?;
        Ok(unique.into_iter().zip(links).collect())
    }

    fn link_in_chunks(
        &self,
        ids: &[String],
        sink: &dyn ProgressSink,
    ) -> Result<Vec<Option<TaxonId>>, KiraError> {
        let started = Instant::now();
        let total = ids.len().div_ceil(self.config.link_chunk_size);
        let mut taxids = Vec::with_capacity(ids.len());

        for (index, chunk) in ids.chunks(self.config.link_chunk_size).enumerate() {
            let message = format!("processing block {}/{}", index + 1, total);
            info!("{message}");
            sink.event(ProgressEvent {
                message,
                elapsed: Some(started.elapsed()),
            });

            let linksets = self
                .client
                .link(NUCLEOTIDE_DB, NUCLEOTIDE_TAXONOMY_LINK, chunk)?;
            if linksets.len() != chunk.len() {
                return Err(KiraError::ResponseMisaligned {
                    chunk: index + 1,
                    requested: chunk.len(),
                    returned: linksets.len(),
                });
            }
            for linkset in &linksets {
                let taxid = linkset
                    .first_link()
                    .map(str::parse::<TaxonId>)
                    .transpose()?;
                taxids.push(taxid);
            }
        }
        Ok(taxids)
    }

    /// Fetches lineages for every distinct present taxid. Empty input is a
    /// no-op that never reaches the network.
    pub fn resolve_lineages<I, T>(
        &self,
        taxids: I,
        sink: &dyn ProgressSink,
    ) -> Result<BTreeMap<TaxonId, Lineage>, KiraError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Option<TaxonId>>,
    {
        let mut seen = HashSet::new();
        let ids: Vec<String> = taxids
            .into_iter()
            .filter_map(|taxid| -> Option<TaxonId> { taxid.into() })
            .filter(|taxid| seen.insert(*taxid))
            .map(|taxid| taxid.to_string())
            .collect();
        let mut taxonomy = BTreeMap::new();
        if ids.is_empty() {
            return Ok(taxonomy);
        }

        info!("retrieving taxonomy for {} taxid(s)", ids.len());
        let started = Instant::now();
        let token = self.client.post(TAXONOMY_DB, &ids)?;
        let page_size = self.config.fetch_page_size;
        let total = ids.len().div_ceil(page_size);

        for (index, retstart) in (0..ids.len()).step_by(page_size).enumerate() {
            let message = format!("fetching taxonomy page {}/{}", index + 1, total);
            info!("{message}");
            sink.event(ProgressEvent {
                message,
                elapsed: Some(started.elapsed()),
            });
            for record in self.client.fetch_taxa(&token, retstart, page_size)? {
                if let Some(lineage) = Lineage::from_record(&record) {
                    taxonomy.insert(lineage.taxid(), lineage);
                }
            }
        }
        Ok(taxonomy)
    }
}
