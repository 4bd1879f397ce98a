use std::collections::{BTreeMap, BTreeSet};

use camino::Utf8PathBuf;

use crate::error::ImportError;

/// One fastq staged for import, decorated with everything the
/// completeness checks and the commit phase need.
#[derive(Debug, Clone)]
pub struct StagedFastq {
    pub source: Utf8PathBuf,
    pub destination: String,
    pub library_id: String,
    pub cell_id: String,
    pub index_sequence: String,
    pub flowcell_code: String,
    /// Lanes the center attributes to this file. Exactly one is supported.
    pub lane_numbers: Vec<String>,
    pub read_end: u8,
}

/// Every (library, index, flowcell, lane) group must carry read ends 1
/// and 2 exactly once each.
pub fn check_pairs(staged: &[StagedFastq]) -> Result<(), ImportError> {
    let mut groups: BTreeMap<(String, String, String, String), Vec<u8>> = BTreeMap::new();

    for entry in staged {
        if entry.lane_numbers.len() != 1 {
            return Err(ImportError::UnsupportedMultiLane(
                entry.source.to_string(),
            ));
        }
        let key = (
            entry.library_id.clone(),
            entry.index_sequence.clone(),
            entry.flowcell_code.clone(),
            entry.lane_numbers[0].clone(),
        );
        let ends = groups.entry(key.clone()).or_default();
        if ends.contains(&entry.read_end) {
            return Err(ImportError::DuplicateReadEnd {
                key: group_label(&key),
                read_end: entry.read_end,
            });
        }
        ends.push(entry.read_end);
    }

    for (key, ends) in &groups {
        for read_end in [1u8, 2] {
            if !ends.contains(&read_end) {
                return Err(ImportError::MissingReadEnd {
                    key: group_label(key),
                    read_end,
                });
            }
        }
    }

    Ok(())
}

fn group_label(key: &(String, String, String, String)) -> String {
    format!("{}/{}/{}_{}", key.0, key.1, key.2, key.3)
}

/// Every LIMS-expected index must appear in every lane actually imported.
pub fn check_coverage(
    expected_indexes: &BTreeSet<String>,
    observed_by_lane: &BTreeMap<String, BTreeSet<String>>,
) -> Result<(), ImportError> {
    for (lane, observed) in observed_by_lane {
        for index in expected_indexes {
            if !observed.contains(index) {
                return Err(ImportError::MissingIndexCoverage {
                    lane: lane.clone(),
                    index: index.clone(),
                });
            }
        }
    }
    Ok(())
}
