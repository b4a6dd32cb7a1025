use std::time::Duration;

use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::domain::TaxonId;
use crate::error::KiraError;
use crate::lineage::{LineageNode, TaxonRecord};
use crate::retry::{RetryPolicy, send_with_retries};

pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Per-identifier result of an elink call, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkSet {
    pub ids: Vec<String>,
    pub links: Vec<String>,
}

impl LinkSet {
    pub fn first_link(&self) -> Option<&str> {
        self.links.first().map(String::as_str)
    }
}

/// History-server handle returned by epost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostToken {
    pub web_env: String,
    pub query_key: String,
}

pub trait EntrezClient {
    /// One linkset per id, positionally aligned with `ids`.
    fn link(
        &self,
        dbfrom: &str,
        linkname: &str,
        ids: &[String],
    ) -> Result<Vec<LinkSet>, KiraError>;
    fn post(&self, db: &str, ids: &[String]) -> Result<PostToken, KiraError>;
    fn fetch_taxa(
        &self,
        token: &PostToken,
        retstart: usize,
        retmax: usize,
    ) -> Result<Vec<TaxonRecord>, KiraError>;
}

impl<C: EntrezClient + ?Sized> EntrezClient for &C {
    fn link(
        &self,
        dbfrom: &str,
        linkname: &str,
        ids: &[String],
    ) -> Result<Vec<LinkSet>, KiraError> {
        (**self).link(dbfrom, linkname, ids)
    }

    fn post(&self, db: &str, ids: &[String]) -> Result<PostToken, KiraError> {
        (**self).post(db, ids)
    }

    fn fetch_taxa(
        &self,
        token: &PostToken,
        retstart: usize,
        retmax: usize,
    ) -> Result<Vec<TaxonRecord>, KiraError> {
        (**self).fetch_taxa(token, retstart, retmax)
    }
}

/// Contact details and transport settings sent with every Entrez request.
#[derive(Debug, Clone)]
pub struct EntrezConfig {
    pub base_url: String,
    pub tool: String,
    pub email: Option<String>,
    pub api_key: Option<String>,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl Default for EntrezConfig {
    fn default() -> Self {
        Self {
            base_url: EUTILS_BASE_URL.to_string(),
            tool: "kira-tax".to_string(),
            email: None,
            api_key: None,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Clone)]
pub struct EntrezHttpClient {
    client: Client,
    config: EntrezConfig,
}

impl EntrezHttpClient {
    pub fn new(config: EntrezConfig) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-tax/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::EntrezHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| KiraError::EntrezHttp(err.to_string()))?;
        Ok(Self { client, config })
    }

    fn contact_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![("tool", self.config.tool.clone())];
        if let Some(email) = &self.config.email {
            params.push(("email", email.clone()));
        }
        if let Some(api_key) = &self.config.api_key {
            params.push(("api_key", api_key.clone()));
        }
        params
    }

    fn post_form(
        &self,
        endpoint: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<String, KiraError> {
        let url = format!("{}/{endpoint}", self.config.base_url);
        params.extend(self.contact_params());
        send_with_retries(&self.config.retry, |attempt| {
            debug!("POST {url} (attempt {attempt})");
            let response = self
                .client
                .post(&url)
                .form(&params)
                .send()
                .map_err(|err| KiraError::EntrezHttp(err.to_string()))?;
            let response = Self::handle_status(response)?;
            response
                .text()
                .map_err(|err| KiraError::EntrezHttp(err.to_string()))
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, KiraError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "Entrez request failed".to_string());
        Err(KiraError::EntrezStatus {
            status,
            attempts: 1,
            message,
        })
    }
}

impl EntrezClient for EntrezHttpClient {
    fn link(
        &self,
        dbfrom: &str,
        linkname: &str,
        ids: &[String],
    ) -> Result<Vec<LinkSet>, KiraError> {
        let mut params = vec![
            ("dbfrom", dbfrom.to_string()),
            ("linkname", linkname.to_string()),
            ("retmode", "json".to_string()),
        ];
        // Repeated `id` parameters keep one linkset per identifier.
        params.extend(ids.iter().map(|id| ("id", id.clone())));
        let body = self.post_form("elink.fcgi", params)?;
        parse_link_response(&body)
    }

    fn post(&self, db: &str, ids: &[String]) -> Result<PostToken, KiraError> {
        let params = vec![("db", db.to_string()), ("id", ids.join(","))];
        let body = self.post_form("epost.fcgi", params)?;
        parse_post_result(&body)
    }

    fn fetch_taxa(
        &self,
        token: &PostToken,
        retstart: usize,
        retmax: usize,
    ) -> Result<Vec<TaxonRecord>, KiraError> {
        let params = vec![
            ("db", "taxonomy".to_string()),
            ("retmode", "xml".to_string()),
            ("WebEnv", token.web_env.clone()),
            ("query_key", token.query_key.clone()),
            ("retstart", retstart.to_string()),
            ("retmax", retmax.to_string()),
        ];
        let body = self.post_form("efetch.fcgi", params)?;
        parse_taxa_set(&body)
    }
}

#[derive(Debug, Deserialize)]
struct LinkResponse {
    #[serde(default)]
    linksets: Vec<RawLinkSet>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLinkSet {
    #[serde(default)]
    ids: Vec<serde_json::Value>,
    #[serde(default)]
    linksetdbs: Vec<RawLinkSetDb>,
}

#[derive(Debug, Deserialize)]
struct RawLinkSetDb {
    #[serde(default)]
    links: Vec<serde_json::Value>,
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn parse_link_response(body: &str) -> Result<Vec<LinkSet>, KiraError> {
    let response: LinkResponse =
        serde_json::from_str(body).map_err(|err| KiraError::EntrezResponse(err.to_string()))?;
    if let Some(error) = response.error {
        return Err(KiraError::EntrezResponse(error));
    }
    Ok(response
        .linksets
        .into_iter()
        .map(|set| LinkSet {
            ids: set.ids.iter().filter_map(json_id).collect(),
            links: set
                .linksetdbs
                .first()
                .map(|db| db.links.iter().filter_map(json_id).collect())
                .unwrap_or_default(),
        })
        .collect())
}

pub fn parse_post_result(body: &str) -> Result<PostToken, KiraError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut current: Option<Vec<u8>> = None;
    let mut web_env = None;
    let mut query_key = None;
    let mut error = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => current = Some(e.name().as_ref().to_vec()),
            Ok(Event::End(_)) => current = None,
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| KiraError::EntrezResponse(err.to_string()))?
                    .into_owned();
                match current.as_deref() {
                    Some(b"WebEnv") => web_env = Some(text),
                    Some(b"QueryKey") => query_key = Some(text),
                    Some(b"ERROR") => error = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(KiraError::EntrezResponse(err.to_string())),
            _ => {}
        }
    }

    match (web_env, query_key) {
        (Some(web_env), Some(query_key)) => Ok(PostToken { web_env, query_key }),
        _ => Err(KiraError::EntrezResponse(
            error.unwrap_or_else(|| "epost result without WebEnv/QueryKey".to_string()),
        )),
    }
}

/// Reads an efetch `TaxaSet`. Fields are taken only from direct children of
/// each top-level `Taxon` and of its `LineageEx/Taxon` entries.
pub fn parse_taxa_set(body: &str) -> Result<Vec<TaxonRecord>, KiraError> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut records = Vec::new();
    let mut record: Option<TaxonRecord> = None;
    let mut node: Option<LineageNode> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name().as_ref().to_vec();
                path.push(name);
                match path_key(&path).as_slice() {
                    [b"TaxaSet", b"Taxon"] => record = Some(TaxonRecord::default()),
                    [b"TaxaSet", b"Taxon", b"LineageEx", b"Taxon"] => {
                        node = Some(LineageNode {
                            taxid: None,
                            rank: String::new(),
                            scientific_name: String::new(),
                        })
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                match path_key(&path).as_slice() {
                    [b"TaxaSet", b"Taxon"] => {
                        if let Some(done) = record.take() {
                            records.push(done);
                        }
                    }
                    [b"TaxaSet", b"Taxon", b"LineageEx", b"Taxon"] => {
                        if let (Some(done), Some(record)) = (node.take(), record.as_mut()) {
                            record.lineage_ex.push(done);
                        }
                    }
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| KiraError::EntrezResponse(err.to_string()))?
                    .into_owned();
                let key = path_key(&path);
                if key.last() == Some(&b"ERROR".as_slice()) {
                    return Err(KiraError::EntrezResponse(text));
                }
                match key.as_slice() {
                    [b"TaxaSet", b"Taxon", field] => {
                        if let Some(record) = record.as_mut() {
                            match *field {
                                b"TaxId" => record.taxid = Some(text.parse::<TaxonId>()?),
                                b"ScientificName" => record.scientific_name = text,
                                b"Rank" => record.rank = text,
                                b"Lineage" => record.lineage = text,
                                _ => {}
                            }
                        }
                    }
                    [b"TaxaSet", b"Taxon", b"LineageEx", b"Taxon", field] => {
                        if let Some(node) = node.as_mut() {
                            match *field {
                                b"TaxId" => node.taxid = Some(text.parse::<TaxonId>()?),
                                b"ScientificName" => node.scientific_name = text,
                                b"Rank" => node.rank = text,
                                _ => {}
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => return Err(KiraError::EntrezResponse(err.to_string())),
            _ => {}
        }
    }
    Ok(records)
}

fn path_key(path: &[Vec<u8>]) -> Vec<&[u8]> {
    path.iter().map(Vec::as_slice).collect()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn link_response_keeps_empty_linksets() {
        let body = r#"{
            "header": {"type": "elink", "version": "0.3"},
            "linksets": [
                {"dbfrom": "nuccore", "ids": ["X17276.1"],
                 "linksetdbs": [
                    {"dbto": "taxonomy", "linkname": "nuccore_taxonomy", "links": ["9646"]}
                 ]},
                {"dbfrom": "nuccore", "ids": ["Z99999.1"]}
            ]
        }"#;
        let sets = parse_link_response(body).unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].first_link(), Some("9646"));
        assert_eq!(sets[1].first_link(), None);
    }

    #[test]
    fn link_response_error_is_surfaced() {
        let err = parse_link_response(r#"{"ERROR": "Invalid db name"}"#).unwrap_err();
        assert_matches!(err, KiraError::EntrezResponse(msg) if msg.contains("Invalid db"));
    }

    #[test]
    fn post_result_without_token() {
        let body = "<ePostResult><ERROR>Empty ID list</ERROR></ePostResult>";
        let err = parse_post_result(body).unwrap_err();
        assert_matches!(err, KiraError::EntrezResponse(msg) if msg == "Empty ID list");
    }

    #[test]
    fn taxa_set_ignores_nested_fields() {
        let body = r#"<TaxaSet><Taxon>
            <TaxId>9606</TaxId>
            <ScientificName>Homo sapiens</ScientificName>
            <OtherNames><GenbankCommonName>human</GenbankCommonName></OtherNames>
            <ParentTaxId>9605</ParentTaxId>
            <Rank>species</Rank>
            <GeneticCode><GCId>1</GCId><GCName>Standard</GCName></GeneticCode>
            <Lineage>cellular organisms; Eukaryota</Lineage>
            <LineageEx>
                <Taxon>
                    <TaxId>2759</TaxId>
                    <ScientificName>Eukaryota</ScientificName>
                    <Rank>superkingdom</Rank>
                </Taxon>
            </LineageEx>
        </Taxon></TaxaSet>"#;
        let records = parse_taxa_set(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].taxid, Some(TaxonId::new(9606)));
        assert_eq!(records[0].rank, "species");
        assert_eq!(records[0].lineage_ex.len(), 1);
        assert_eq!(records[0].lineage_ex[0].taxid, Some(TaxonId::new(2759)));
    }
}
