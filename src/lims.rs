use std::time::Duration;

use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;

use crate::domain::{LaneImport, LibraryUnit};
use crate::error::ImportError;

/// One well of the LIMS sublibrary table: the ground-truth cell↔index
/// registration for a library.
#[derive(Debug, Clone, Deserialize)]
pub struct Sublibrary {
    pub row: u32,
    pub column: u32,
    pub condition: String,
    pub primer_i7: String,
    pub primer_i5: String,
}

/// LIMS collaborator contract. All calls fail fast; retrying is the
/// sequencing-center client's discipline only.
pub trait LimsClient: Send + Sync {
    fn list_pending_units(&self) -> Result<Vec<LibraryUnit>, ImportError>;
    fn sublibraries(&self, library_id: &str) -> Result<Vec<Sublibrary>, ImportError>;
    /// Corrects the recorded sequencing-center pool id for a sequencing.
    fn set_external_library_id(
        &self,
        sequencing_id: u64,
        external_id: &str,
    ) -> Result<(), ImportError>;
    /// Lane bookkeeping row, get-or-create by (sequencing, flowcell, lane).
    fn get_or_create_lane(&self, sequencing_id: u64, lane: &LaneImport) -> Result<(), ImportError>;
    fn set_lane_requested_count(&self, sequencing_id: u64, count: u32) -> Result<(), ImportError>;
}

#[derive(Clone)]
pub struct LimsHttpClient {
    client: Client,
    base_url: String,
}

impl LimsHttpClient {
    pub fn new(base_url: &str) -> Result<Self, ImportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("fqimport/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ImportError::LimsHttp(err.to_string()))?,
        );
        if let Ok(token) = std::env::var("LIMS_API_TOKEN") {
            if !token.trim().is_empty() {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Token {}", token.trim()))
                        .map_err(|err| ImportError::LimsHttp(err.to_string()))?,
                );
            }
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| ImportError::LimsHttp(err.to_string()))?;
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
                .unwrap_or_else(|_| "LIMS request failed".to_string());
            return Err(ImportError::LimsStatus { status, message });
        }
        response
            .json()
            .map_err(|err| ImportError::LimsHttp(err.to_string()))
    }

    fn get(&self, path: &str) -> Result<serde_json::Value, ImportError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .map_err(|err| ImportError::LimsHttp(err.to_string()))?;
        Self::check(response)
    }

    fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ImportError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(|err| ImportError::LimsHttp(err.to_string()))?;
        Self::check(response)
    }

    fn patch(&self, path: &str, body: &serde_json::Value) -> Result<(), ImportError> {
        let response = self
            .client
            .patch(self.url(path))
            .json(body)
            .send()
            .map_err(|err| ImportError::LimsHttp(err.to_string()))?;
        Self::check(response).map(|_| ())
    }

    fn results(&self, path: &str) -> Result<Vec<serde_json::Value>, ImportError> {
        let payload = self.get(path)?;
        payload
            .get("results")
            .and_then(|value| value.as_array())
            .cloned()
            .ok_or_else(|| ImportError::InvalidRecord(format!("no results array in {path}")))
    }
}

#[derive(Debug, Deserialize)]
struct UnitPayload {
    id: u64,
    pool_id: String,
    sample_id: String,
    jira_ticket: String,
    exclude_from_analysis: bool,
    sequencing: SequencingPayload,
}

#[derive(Debug, Deserialize)]
struct SequencingPayload {
    id: u64,
    gsc_library_id: Option<String>,
    rev_comp_override: Option<String>,
    number_of_lanes_requested: u32,
    submission_date: NaiveDate,
}

impl From<UnitPayload> for LibraryUnit {
    fn from(payload: UnitPayload) -> Self {
        LibraryUnit {
            id: payload.id,
            library_id: payload.pool_id,
            sample_id: payload.sample_id,
            ticket: payload.jira_ticket,
            sequencing_id: payload.sequencing.id,
            exclude_from_analysis: payload.exclude_from_analysis,
            gsc_library_id: payload.sequencing.gsc_library_id,
            rev_comp_override: payload.sequencing.rev_comp_override,
            lane_requested_count: payload.sequencing.number_of_lanes_requested,
            submission_date: payload.sequencing.submission_date,
        }
    }
}

impl LimsClient for LimsHttpClient {
    fn list_pending_units(&self) -> Result<Vec<LibraryUnit>, ImportError> {
        let results = self.results("library?sequencing__lane_pending=true")?;
        results
            .into_iter()
            .map(|value| {
                serde_json::from_value::<UnitPayload>(value)
                    .map(LibraryUnit::from)
                    .map_err(|err| ImportError::InvalidRecord(err.to_string()))
            })
            .collect()
    }

    fn sublibraries(&self, library_id: &str) -> Result<Vec<Sublibrary>, ImportError> {
        let results = self.results(&format!("sublibraries?library__pool_id={library_id}"))?;
        results
            .into_iter()
            .map(|value| {
                serde_json::from_value(value)
                    .map_err(|err| ImportError::InvalidRecord(err.to_string()))
            })
            .collect()
    }

    fn set_external_library_id(
        &self,
        sequencing_id: u64,
        external_id: &str,
    ) -> Result<(), ImportError> {
        self.patch(
            &format!("sequencing/{sequencing_id}"),
            &serde_json::json!({ "gsc_library_id": external_id }),
        )
    }

    fn get_or_create_lane(&self, sequencing_id: u64, lane: &LaneImport) -> Result<(), ImportError> {
        let existing = self.results(&format!(
            "lane?sequencing={sequencing_id}&flow_cell_id={}_{}",
            lane.flowcell_code, lane.lane_number
        ))?;
        if !existing.is_empty() {
            return Ok(());
        }
        self.post(
            "lane",
            &serde_json::json!({
                "sequencing": sequencing_id,
                "flow_cell_id": format!("{}_{}", lane.flowcell_code, lane.lane_number),
                "sequencing_date": lane.run_date.to_string(),
            }),
        )
        .map(|_| ())
    }

    fn set_lane_requested_count(&self, sequencing_id: u64, count: u32) -> Result<(), ImportError> {
        self.patch(
            &format!("sequencing/{sequencing_id}"),
            &serde_json::json!({ "number_of_lanes_requested": count }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_payload_maps_to_library_unit() {
        let json = serde_json::json!({
            "id": 11,
            "pool_id": "A96213A",
            "sample_id": "SA1090",
            "jira_ticket": "SC-1234",
            "exclude_from_analysis": false,
            "sequencing": {
                "id": 77,
                "gsc_library_id": "PX1234",
                "rev_comp_override": "i7,rev(i5)",
                "number_of_lanes_requested": 2,
                "submission_date": "2025-08-01"
            }
        });
        let unit: LibraryUnit = serde_json::from_value::<UnitPayload>(json).unwrap().into();
        assert_eq!(unit.library_id, "A96213A");
        assert_eq!(unit.sequencing_id, 77);
        assert_eq!(unit.gsc_library_id.as_deref(), Some("PX1234"));
        assert_eq!(unit.lane_requested_count, 2);
        assert_eq!(unit.rev_comp_override.as_deref(), Some("i7,rev(i5)"));
    }
}
