use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::warn;

use crate::domain::RawFastqRecord;
use crate::error::ImportError;

/// Library record as the sequencing center reports it. `name` is the
/// center's own pool identifier (`PX...`, or `IX...` for internal pools).
#[derive(Debug, Clone, Deserialize)]
pub struct SeqCenterLibrary {
    pub id: u64,
    pub name: String,
    pub external_identifier: Option<String>,
}

pub trait SeqCenterClient: Send + Sync {
    fn find_library_by_name(&self, name: &str) -> Result<Option<SeqCenterLibrary>, ImportError>;
    fn find_library_by_external_identifier(
        &self,
        external_identifier: &str,
    ) -> Result<Option<SeqCenterLibrary>, ImportError>;
    fn list_fastqs(&self, library_name: &str) -> Result<Vec<RawFastqRecord>, ImportError>;
    fn flowcell_code(&self, flowcell_id: u64) -> Result<String, ImportError>;
    /// One batched lookup for every distinct primer in a unit, returning
    /// the raw index sequence per primer id.
    fn primer_index_sequences(
        &self,
        primer_ids: &[u64],
    ) -> Result<BTreeMap<u64, String>, ImportError>;
}

#[derive(Clone)]
pub struct SeqCenterHttpClient {
    client: Client,
    base_url: String,
}

// The center's API enforces its own serialized retry discipline, so the
// client backs off hard between attempts rather than hammering it.
const MAX_ATTEMPTS: usize = 5;
const BACKOFF_MIN_SECS: u64 = 10;
const BACKOFF_MAX_SECS: u64 = 60;

impl SeqCenterHttpClient {
    pub fn new(base_url: &str) -> Result<Self, ImportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("fqimport/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ImportError::SeqCenterHttp(err.to_string()))?,
        );
        if let Ok(token) = std::env::var("SEQCENTER_API_TOKEN") {
            if !token.trim().is_empty() {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                        .map_err(|err| ImportError::SeqCenterHttp(err.to_string()))?,
                );
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| ImportError::SeqCenterHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Idempotent GET with the retry loop. Transient failures are retried
    /// up to the attempt ceiling with randomized backoff; exhaustion
    /// surfaces as `PermanentQueryFailure`.
    fn query(&self, resource_path: &str) -> Result<serde_json::Value, ImportError> {
        let url = format!("{}/{}", self.base_url, resource_path.trim_start_matches('/'));
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let transient = match self.client.get(&url).send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return response
                            .json::<serde_json::Value>()
                            .map_err(|err| ImportError::SeqCenterHttp(err.to_string()));
                    }
                    let message = response
                        .text()
                        .unwrap_or_else(|_| "sequencing-center request failed".to_string());
                    let error = ImportError::SeqCenterStatus { status, message };
                    if !is_retryable_status(status) {
                        return Err(error);
                    }
                    error
                }
                Err(err) => {
                    let retryable = is_retryable_error(&err);
                    let error = ImportError::SeqCenterHttp(err.to_string());
                    if !retryable {
                        return Err(error);
                    }
                    error
                }
            };
            if attempt >= MAX_ATTEMPTS {
                return Err(ImportError::PermanentQueryFailure(transient.to_string()));
            }
            let delay = rand::thread_rng().gen_range(BACKOFF_MIN_SECS..=BACKOFF_MAX_SECS);
            warn!(attempt, delay_secs = delay, "transient sequencing-center failure: {transient}");
            thread::sleep(Duration::from_secs(delay));
        }
    }

    fn query_results(&self, resource_path: &str) -> Result<Vec<serde_json::Value>, ImportError> {
        let payload = self.query(resource_path)?;
        let results = payload
            .get("results")
            .and_then(|value| value.as_array())
            .cloned()
            .ok_or_else(|| {
                ImportError::InvalidRecord(format!("no results array in {resource_path}"))
            })?;
        Ok(results)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Deserialize)]
struct FastqPayload {
    id: u64,
    data_path: String,
    status: String,
    removed: Option<String>,
    libcore: LibcorePayload,
    file_type: FileTypePayload,
}

#[derive(Debug, Deserialize)]
struct LibcorePayload {
    id: u64,
    primer_id: u64,
    run: RunPayload,
}

#[derive(Debug, Deserialize)]
struct RunPayload {
    flowcell_id: u64,
    lane_number: String,
    run_datetime: NaiveDateTime,
    machine: String,
}

#[derive(Debug, Deserialize)]
struct FileTypePayload {
    filename_pattern: String,
}

impl From<FastqPayload> for RawFastqRecord {
    fn from(payload: FastqPayload) -> Self {
        RawFastqRecord {
            id: payload.id,
            data_path: payload.data_path,
            flowcell_id: payload.libcore.run.flowcell_id,
            lane_number: payload.libcore.run.lane_number,
            run_datetime: payload.libcore.run.run_datetime,
            machine: payload.libcore.run.machine,
            libcore_id: payload.libcore.id,
            primer_id: payload.libcore.primer_id,
            status: payload.status,
            removed: payload.removed,
            filename_pattern: payload.file_type.filename_pattern,
        }
    }
}

impl SeqCenterClient for SeqCenterHttpClient {
    fn find_library_by_name(&self, name: &str) -> Result<Option<SeqCenterLibrary>, ImportError> {
        let results = self.query_results(&format!("library?name={name}"))?;
        match results.into_iter().next() {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ImportError::InvalidRecord(err.to_string())),
            None => Ok(None),
        }
    }

    fn find_library_by_external_identifier(
        &self,
        external_identifier: &str,
    ) -> Result<Option<SeqCenterLibrary>, ImportError> {
        let results =
            self.query_results(&format!("library?external_identifier={external_identifier}"))?;
        match results.into_iter().next() {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|err| ImportError::InvalidRecord(err.to_string())),
            None => Ok(None),
        }
    }

    fn list_fastqs(&self, library_name: &str) -> Result<Vec<RawFastqRecord>, ImportError> {
        let results = self.query_results(&format!(
            "fastq?parent_library={library_name}&production=true"
        ))?;
        results
            .into_iter()
            .map(|value| {
                serde_json::from_value::<FastqPayload>(value)
                    .map(RawFastqRecord::from)
                    .map_err(|err| ImportError::InvalidRecord(err.to_string()))
            })
            .collect()
    }

    fn flowcell_code(&self, flowcell_id: u64) -> Result<String, ImportError> {
        let payload = self.query(&format!("flowcell/{flowcell_id}"))?;
        payload
            .get("lims_flowcell_code")
            .and_then(|value| value.as_str())
            .map(|value| value.to_string())
            .ok_or_else(|| {
                ImportError::InvalidRecord(format!("flowcell {flowcell_id} has no code"))
            })
    }

    fn primer_index_sequences(
        &self,
        primer_ids: &[u64],
    ) -> Result<BTreeMap<u64, String>, ImportError> {
        if primer_ids.is_empty() {
            return Ok(BTreeMap::new());
        }
        let query = primer_ids
            .iter()
            .map(|id| format!("id={id}"))
            .collect::<Vec<_>>()
            .join("&");
        let results = self.query_results(&format!("primer?{query}"))?;
        let mut sequences = BTreeMap::new();
        for value in results {
            let id = value
                .get("id")
                .and_then(|value| value.as_u64())
                .ok_or_else(|| ImportError::InvalidRecord("primer without id".to_string()))?;
            let sequence = value
                .get("adapter_index_sequence")
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    ImportError::InvalidRecord(format!("primer {id} has no index sequence"))
                })?;
            sequences.insert(id, sequence.to_string());
        }
        Ok(sequences)
    }
}
