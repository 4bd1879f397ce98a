use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

use serde::Deserialize;
use tracing::debug;

use crate::domain::{CellExpectation, cell_sample_id, is_internal_pool_id};
use crate::error::ImportError;
use crate::lims::Sublibrary;

/// What to do when one lane delivers the same valid index and read end
/// twice. Read ends 1 and 2, and repeats across lanes, are the normal
/// shape of a delivery and never count as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateIndexPolicy {
    #[default]
    Overwrite,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexDisposition {
    /// Index matched a LIMS cell; the record participates in staging.
    Matched(CellExpectation),
    /// Internal-only pool, mismatch is designed; skip without recording.
    SkippedInternal,
    /// Recorded as invalid; skip the record, surface in diagnostics.
    Unmatched,
}

/// Per-condition match statistics for the diagnostic summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionStats {
    pub matched: usize,
    pub unmatched: usize,
    pub total: usize,
}

#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub invalid_count: usize,
    pub per_condition: BTreeMap<String, ConditionStats>,
}

/// Owns the valid/invalid accumulators for one unit's reconciliation, so
/// repeated mapping calls never alias shared mutable state.
pub struct ReconcileContext {
    expectations: HashMap<String, CellExpectation>,
    duplicate_policy: DuplicateIndexPolicy,
    valid: BTreeMap<String, CellExpectation>,
    seen: HashSet<(String, String, u8)>,
    invalid: Vec<String>,
}

impl ReconcileContext {
    pub fn new(
        expectations: HashMap<String, CellExpectation>,
        duplicate_policy: DuplicateIndexPolicy,
    ) -> Self {
        Self {
            expectations,
            duplicate_policy,
            valid: BTreeMap::new(),
            seen: HashSet::new(),
            invalid: Vec::new(),
        }
    }

    pub fn expected_indexes(&self) -> impl Iterator<Item = &str> {
        self.expectations.keys().map(String::as_str)
    }

    /// Maps one decoded index to its LIMS cell, classifying misses as
    /// invalid or as a deliberate internal-pool skip. Observations are
    /// keyed by (lane, index, read end), so a repeat only counts as a
    /// duplicate when the center re-delivers the same file slot.
    pub fn map_index(
        &mut self,
        decoded_index: &str,
        lane: &str,
        read_end: u8,
        unit_external_id: &str,
    ) -> Result<IndexDisposition, ImportError> {
        match self.expectations.get(decoded_index) {
            Some(expectation) => {
                let first_delivery = self.seen.insert((
                    lane.to_string(),
                    decoded_index.to_string(),
                    read_end,
                ));
                if !first_delivery {
                    match self.duplicate_policy {
                        DuplicateIndexPolicy::Overwrite => {
                            debug!(
                                index = decoded_index,
                                lane,
                                read_end,
                                "index delivered again, keeping the latest record"
                            );
                        }
                        DuplicateIndexPolicy::Reject => {
                            return Err(ImportError::DuplicateIndex {
                                index: decoded_index.to_string(),
                                lane: lane.to_string(),
                                read_end,
                            });
                        }
                    }
                }
                let expectation = expectation.clone();
                self.valid
                    .insert(decoded_index.to_string(), expectation.clone());
                Ok(IndexDisposition::Matched(expectation))
            }
            None if is_internal_pool_id(unit_external_id) => {
                Ok(IndexDisposition::SkippedInternal)
            }
            None => {
                self.invalid.push(decoded_index.to_string());
                Ok(IndexDisposition::Unmatched)
            }
        }
    }

    pub fn cell_for(&self, decoded_index: &str) -> Option<&CellExpectation> {
        self.valid.get(decoded_index)
    }

    pub fn invalid_indexes(&self) -> &[String] {
        &self.invalid
    }

    /// Cross-references the run against the sublibrary table, grouped by
    /// experimental condition. Diagnostic only; the invalid count is what
    /// blocks import.
    pub fn summarize(&self, sublibraries: &[Sublibrary]) -> IndexSummary {
        let mut per_condition: BTreeMap<String, ConditionStats> = BTreeMap::new();
        for sublibrary in sublibraries {
            let stats = per_condition.entry(sublibrary.condition.clone()).or_default();
            stats.total += 1;
            let index = format!("{}-{}", sublibrary.primer_i7, sublibrary.primer_i5);
            if self.valid.contains_key(&index) {
                stats.matched += 1;
            } else {
                stats.unmatched += 1;
            }
        }
        IndexSummary {
            invalid_count: self.invalid.len(),
            per_condition,
        }
    }

    pub fn raise_if_any_invalid(
        &self,
        library_id: &str,
        summary: &IndexSummary,
    ) -> Result<(), ImportError> {
        if summary.invalid_count == 0 {
            return Ok(());
        }
        let mut message = format!(
            "library {library_id}: {} invalid index sequences",
            summary.invalid_count
        );
        for (condition, stats) in &summary.per_condition {
            if stats.unmatched > 0 {
                let _ = write!(
                    message,
                    "; condition {condition}: {}/{} unmatched",
                    stats.unmatched, stats.total
                );
            }
        }
        Err(ImportError::IndexMismatch(message))
    }
}

/// Builds the expectation map from the LIMS sublibrary table. Keys are
/// the decoded `i7-i5` index sequences.
pub fn build_expectations(
    sublibraries: &[Sublibrary],
    sample_id: &str,
    library_id: &str,
) -> HashMap<String, CellExpectation> {
    sublibraries
        .iter()
        .map(|sublibrary| {
            let index_sequence = format!("{}-{}", sublibrary.primer_i7, sublibrary.primer_i5);
            let expectation = CellExpectation {
                index_sequence: index_sequence.clone(),
                cell_id: cell_sample_id(
                    sample_id,
                    library_id,
                    sublibrary.row,
                    sublibrary.column,
                ),
                condition: sublibrary.condition.clone(),
            };
            (index_sequence, expectation)
        })
        .collect()
}
