use std::collections::BTreeSet;
use std::fs;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ImportError;
use crate::fs_util;

/// Natural key of a catalog dataset: sample, library, dataset type, and
/// the hash of the lane set it spans. Creation by this key is idempotent.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    pub sample_id: String,
    pub library_id: String,
    pub dataset_type: String,
    pub lanes: Vec<(String, String)>,
}

impl DatasetSpec {
    pub fn lane_set_hash(&self) -> String {
        let mut labels = self
            .lanes
            .iter()
            .map(|(flowcell, lane)| format!("{flowcell}_{lane}"))
            .collect::<Vec<_>>();
        labels.sort();
        let mut hasher = Sha256::new();
        hasher.update(labels.join(",").as_bytes());
        let digest = hasher.finalize();
        digest[..12].iter().map(|byte| format!("{byte:02x}")).collect()
    }

    pub fn name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.sample_id,
            self.library_id,
            self.dataset_type,
            self.lane_set_hash()
        )
    }
}

pub trait CatalogClient: Send + Sync {
    /// Lane set already on record for a library, for the idempotency check.
    fn existing_lanes(&self, library_id: &str) -> Result<BTreeSet<(String, String)>, ImportError>;
    fn get_or_create_dataset(&self, spec: &DatasetSpec) -> Result<u64, ImportError>;
    fn get_or_create_lane(
        &self,
        dataset_id: u64,
        flowcell_code: &str,
        lane_number: &str,
    ) -> Result<u64, ImportError>;
    fn get_or_create_file_resource(
        &self,
        dataset_id: u64,
        destination: &str,
        size: u64,
    ) -> Result<u64, ImportError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
}

impl CatalogHttpClient {
    pub fn new(base_url: &str) -> Result<Self, ImportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("fqimport/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ImportError::CatalogHttp(err.to_string()))?,
        );
        if let Ok(token) = std::env::var("CATALOG_API_TOKEN") {
            if !token.trim().is_empty() {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Token {}", token.trim()))
                        .map_err(|err| ImportError::CatalogHttp(err.to_string()))?,
                );
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ImportError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn check(response: reqwest::blocking::Response) -> Result<serde_json::Value, ImportError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(ImportError::CatalogStatus { status, message });
        }
        response
            .json()
            .map_err(|err| ImportError::CatalogHttp(err.to_string()))
    }

    fn list(&self, path: &str) -> Result<Vec<serde_json::Value>, ImportError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .map_err(|err| ImportError::CatalogHttp(err.to_string()))?;
        let payload = Self::check(response)?;
        payload
            .get("results")
            .and_then(|value| value.as_array())
            .cloned()
            .ok_or_else(|| ImportError::InvalidRecord(format!("no results array in {path}")))
    }

    fn create(&self, path: &str, body: &serde_json::Value) -> Result<u64, ImportError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(|err| ImportError::CatalogHttp(err.to_string()))?;
        let payload = Self::check(response)?;
        payload
            .get("id")
            .and_then(|value| value.as_u64())
            .ok_or_else(|| ImportError::InvalidRecord(format!("created {path} record has no id")))
    }

    fn get_or_create(
        &self,
        list_path: &str,
        create_path: &str,
        body: &serde_json::Value,
    ) -> Result<u64, ImportError> {
        let existing = self.list(list_path)?;
        if let Some(record) = existing.first() {
            return record.get("id").and_then(|value| value.as_u64()).ok_or_else(|| {
                ImportError::InvalidRecord(format!("{list_path} record has no id"))
            });
        }
        self.create(create_path, body)
    }
}

impl CatalogClient for CatalogHttpClient {
    fn existing_lanes(&self, library_id: &str) -> Result<BTreeSet<(String, String)>, ImportError> {
        let results = self.list(&format!("sequence_lane?dna_library={library_id}"))?;
        let mut lanes = BTreeSet::new();
        for value in results {
            let flowcell = value
                .get("flowcell_id")
                .and_then(|value| value.as_str())
                .ok_or_else(|| ImportError::InvalidRecord("lane without flowcell".to_string()))?;
            let lane_number = value
                .get("lane_number")
                .and_then(|value| value.as_str())
                .ok_or_else(|| ImportError::InvalidRecord("lane without number".to_string()))?;
            lanes.insert((flowcell.to_string(), lane_number.to_string()));
        }
        Ok(lanes)
    }

    fn get_or_create_dataset(&self, spec: &DatasetSpec) -> Result<u64, ImportError> {
        let name = spec.name();
        debug!(dataset = %name, "get-or-create dataset");
        self.get_or_create(
            &format!("sequence_dataset?name={name}"),
            "sequence_dataset",
            &serde_json::json!({
                "name": name,
                "sample": spec.sample_id,
                "library": spec.library_id,
                "dataset_type": spec.dataset_type,
            }),
        )
    }

    fn get_or_create_lane(
        &self,
        dataset_id: u64,
        flowcell_code: &str,
        lane_number: &str,
    ) -> Result<u64, ImportError> {
        self.get_or_create(
            &format!(
                "sequence_lane?dataset={dataset_id}&flowcell_id={flowcell_code}&lane_number={lane_number}"
            ),
            "sequence_lane",
            &serde_json::json!({
                "dataset": dataset_id,
                "flowcell_id": flowcell_code,
                "lane_number": lane_number,
            }),
        )
    }

    fn get_or_create_file_resource(
        &self,
        dataset_id: u64,
        destination: &str,
        size: u64,
    ) -> Result<u64, ImportError> {
        self.get_or_create(
            &format!("file_resource?filename={destination}"),
            "file_resource",
            &serde_json::json!({
                "dataset": dataset_id,
                "filename": destination,
                "size": size,
            }),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Blob,
    Server,
}

/// Narrow transfer contract the orchestrator consumes. Blob-backed
/// implementations fan batches out with bounded concurrency; server-backed
/// ones copy strictly one file at a time.
pub trait StorageClient: Send + Sync {
    fn kind(&self) -> StorageKind;
    fn exists(&self, destination: &str) -> Result<bool, ImportError>;
    /// Stored size in bytes, `None` when the destination does not exist.
    fn size(&self, destination: &str) -> Result<Option<u64>, ImportError>;
    fn upload(&self, source: &Utf8Path, destination: &str) -> Result<(), ImportError>;
    fn batch_upload(
        &self,
        pairs: &[(Utf8PathBuf, String)],
        concurrency: usize,
    ) -> Result<(), ImportError>;
}

#[derive(Clone)]
pub struct BlobStorageClient {
    client: Client,
    endpoint: String,
    container: String,
}

impl BlobStorageClient {
    pub fn new(endpoint: &str, container: &str) -> Result<Self, ImportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| ImportError::Storage(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            container: container.to_string(),
        })
    }

    fn blob_url(&self, destination: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.container, destination)
    }
}

impl StorageClient for BlobStorageClient {
    fn kind(&self) -> StorageKind {
        StorageKind::Blob
    }

    fn exists(&self, destination: &str) -> Result<bool, ImportError> {
        let response = self
            .client
            .head(self.blob_url(destination))
            .send()
            .map_err(|err| ImportError::Storage(err.to_string()))?;
        Ok(response.status().is_success())
    }

    fn size(&self, destination: &str) -> Result<Option<u64>, ImportError> {
        let response = self
            .client
            .head(self.blob_url(destination))
            .send()
            .map_err(|err| ImportError::Storage(err.to_string()))?;
        if !response.status().is_success() {
            return Ok(None);
        }
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok()))
    }

    fn upload(&self, source: &Utf8Path, destination: &str) -> Result<(), ImportError> {
        let file = fs::File::open(source.as_std_path())
            .map_err(|err| ImportError::Filesystem(format!("open {source}: {err}")))?;
        let response = self
            .client
            .put(self.blob_url(destination))
            .body(file)
            .send()
            .map_err(|err| ImportError::Storage(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ImportError::Storage(format!(
                "upload {destination} returned status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    fn batch_upload(
        &self,
        pairs: &[(Utf8PathBuf, String)],
        concurrency: usize,
    ) -> Result<(), ImportError> {
        let workers = concurrency.max(1).min(pairs.len().max(1));
        let queue = Mutex::new(pairs.iter());
        let failures: Mutex<Vec<ImportError>> = Mutex::new(Vec::new());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        // A poisoned queue means a sibling died; stop draining.
                        let next = queue.lock().ok().and_then(|mut guard| guard.next());
                        let Some((source, destination)) = next else {
                            break;
                        };
                        if let Err(err) = self.upload(source, destination) {
                            if let Ok(mut guard) = failures.lock() {
                                guard.push(err);
                            }
                            break;
                        }
                    }
                });
            }
        });

        let failures = failures
            .into_inner()
            .map_err(|_| ImportError::Storage("upload worker panicked".to_string()))?;
        match failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStorageClient {
    root: Utf8PathBuf,
}

impl ServerStorageClient {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, destination: &str) -> Utf8PathBuf {
        self.root.join(destination)
    }
}

impl StorageClient for ServerStorageClient {
    fn kind(&self) -> StorageKind {
        StorageKind::Server
    }

    fn exists(&self, destination: &str) -> Result<bool, ImportError> {
        Ok(self.resolve(destination).as_std_path().exists())
    }

    fn size(&self, destination: &str) -> Result<Option<u64>, ImportError> {
        let path = self.resolve(destination);
        match fs::metadata(path.as_std_path()) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ImportError::Filesystem(format!("stat {path}: {err}"))),
        }
    }

    fn upload(&self, source: &Utf8Path, destination: &str) -> Result<(), ImportError> {
        fs_util::copy_with_size_check(source, &self.resolve(destination)).map(|_| ())
    }

    fn batch_upload(
        &self,
        pairs: &[(Utf8PathBuf, String)],
        _concurrency: usize,
    ) -> Result<(), ImportError> {
        for (source, destination) in pairs {
            self.upload(source, destination)?;
        }
        Ok(())
    }
}
