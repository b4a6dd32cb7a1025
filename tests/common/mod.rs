#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use kira_taxonomy::app::{ProgressEvent, ProgressSink};
use kira_taxonomy::domain::TaxonId;
use kira_taxonomy::error::KiraError;
use kira_taxonomy::eutils::{EntrezClient, LinkSet, PostToken};
use kira_taxonomy::lineage::{LineageNode, TaxonRecord};

#[derive(Default)]
pub struct RecordingSink {
    pub messages: RefCell<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.borrow_mut().push(event.message);
    }
}

/// In-memory Entrez that answers links and taxonomy fetches from fixed tables.
#[derive(Default)]
pub struct MockEntrez {
    pub links: HashMap<String, u64>,
    pub taxa: HashMap<u64, TaxonRecord>,
    /// Drop this many linksets from every link response.
    pub short_by: usize,
    pub link_calls: RefCell<Vec<Vec<String>>>,
    pub posted: RefCell<Vec<String>>,
    pub fetch_calls: RefCell<Vec<(usize, usize)>>,
    pub post_calls: Cell<usize>,
}

impl MockEntrez {
    pub fn with_links(links: &[(&str, u64)]) -> Self {
        Self {
            links: links
                .iter()
                .map(|(accession, taxid)| (accession.to_string(), *taxid))
                .collect(),
            ..Self::default()
        }
    }

    pub fn add_taxon(&mut self, taxid: u64, name: &str, rank: &str, ancestors: &[(&str, &str)]) {
        self.taxa.insert(
            taxid,
            TaxonRecord {
                taxid: Some(TaxonId::new(taxid)),
                scientific_name: name.to_string(),
                rank: rank.to_string(),
                lineage: ancestors
                    .iter()
                    .map(|(_, name)| *name)
                    .collect::<Vec<_>>()
                    .join("; "),
                lineage_ex: ancestors
                    .iter()
                    .map(|(rank, name)| LineageNode {
                        taxid: None,
                        rank: rank.to_string(),
                        scientific_name: name.to_string(),
                    })
                    .collect(),
            },
        );
    }

    pub fn linked_ids(&self) -> Vec<String> {
        self.link_calls.borrow().iter().flatten().cloned().collect()
    }
}

impl EntrezClient for MockEntrez {
    fn link(
        &self,
        _dbfrom: &str,
        _linkname: &str,
        ids: &[String],
    ) -> Result<Vec<LinkSet>, KiraError> {
        self.link_calls.borrow_mut().push(ids.to_vec());
        let mut sets: Vec<LinkSet> = ids
            .iter()
            .map(|id| LinkSet {
                ids: vec![id.clone()],
                links: self
                    .links
                    .get(id)
                    .map(|taxid| vec![taxid.to_string()])
                    .unwrap_or_default(),
            })
            .collect();
        let keep = sets.len().saturating_sub(self.short_by);
        sets.truncate(keep);
        Ok(sets)
    }

    fn post(&self, _db: &str, ids: &[String]) -> Result<PostToken, KiraError> {
        self.post_calls.set(self.post_calls.get() + 1);
        *self.posted.borrow_mut() = ids.to_vec();
        Ok(PostToken {
            web_env: "MCID_test".to_string(),
            query_key: "1".to_string(),
        })
    }

    fn fetch_taxa(
        &self,
        _token: &PostToken,
        retstart: usize,
        retmax: usize,
    ) -> Result<Vec<TaxonRecord>, KiraError> {
        self.fetch_calls.borrow_mut().push((retstart, retmax));
        Ok(self
            .posted
            .borrow()
            .iter()
            .skip(retstart)
            .take(retmax)
            .filter_map(|id| id.parse::<u64>().ok())
            .filter_map(|taxid| self.taxa.get(&taxid).cloned())
            .collect())
    }
}
