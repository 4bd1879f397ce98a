use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::domain::{Instrument, LaneKey, RawFastqRecord};
use crate::error::ImportError;
use crate::seqcenter::SeqCenterClient;

/// Lane-level view of a unit's raw records, plus the primer→libcore
/// multimap that lets the caller fetch primer metadata in one batched
/// query instead of one query per record.
#[derive(Debug, Default)]
pub struct LaneGrouping {
    pub groups: BTreeMap<LaneKey, Vec<RawFastqRecord>>,
    pub primer_libcores: BTreeMap<u64, BTreeSet<u64>>,
}

impl LaneGrouping {
    pub fn primer_ids(&self) -> Vec<u64> {
        self.primer_libcores.keys().copied().collect()
    }
}

/// Groups raw per-read records into lane units keyed by
/// (flowcell code, lane number, run date, instrument). Construct one
/// mapper per orchestration call: the flowcell cache lives exactly that
/// long.
pub struct LaneKeyMapper<'a, S: SeqCenterClient> {
    seqcenter: &'a S,
    flowcell_codes: HashMap<u64, String>,
}

impl<'a, S: SeqCenterClient> LaneKeyMapper<'a, S> {
    pub fn new(seqcenter: &'a S) -> Self {
        Self {
            seqcenter,
            flowcell_codes: HashMap::new(),
        }
    }

    /// Resolves an internal flowcell id to its externally meaningful code,
    /// querying the center at most once per distinct id.
    fn resolve_flowcell(&mut self, flowcell_id: u64) -> Result<String, ImportError> {
        if let Some(code) = self.flowcell_codes.get(&flowcell_id) {
            return Ok(code.clone());
        }
        let code = self.seqcenter.flowcell_code(flowcell_id)?;
        debug!(flowcell_id, code = %code, "resolved flowcell");
        self.flowcell_codes.insert(flowcell_id, code.clone());
        Ok(code)
    }

    pub fn group(&mut self, records: &[RawFastqRecord]) -> Result<LaneGrouping, ImportError> {
        let mut grouping = LaneGrouping::default();
        // Guards invariant: one lane group per (flowcell code, lane number).
        let mut seen: HashMap<(String, String), LaneKey> = HashMap::new();

        for record in records {
            let flowcell_code = self.resolve_flowcell(record.flowcell_id)?;
            let instrument = Instrument::from_machine(&record.machine)?;
            let key = LaneKey {
                flowcell_code: flowcell_code.clone(),
                lane_number: record.lane_number.clone(),
                run_date: record.run_datetime.date(),
                instrument,
            };

            let pair = (flowcell_code, record.lane_number.clone());
            match seen.get(&pair) {
                Some(existing) if *existing != key => {
                    return Err(ImportError::InvalidRecord(format!(
                        "lane {} reported with conflicting run metadata",
                        key
                    )));
                }
                Some(_) => {}
                None => {
                    seen.insert(pair, key.clone());
                }
            }

            grouping
                .primer_libcores
                .entry(record.primer_id)
                .or_default()
                .insert(record.libcore_id);
            grouping.groups.entry(key).or_default().push(record.clone());
        }

        Ok(grouping)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    use super::*;
    use crate::seqcenter::SeqCenterLibrary;

    struct CountingSeqCenter {
        lookups: Mutex<Vec<u64>>,
    }

    impl CountingSeqCenter {
        fn new() -> Self {
            Self {
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    impl SeqCenterClient for CountingSeqCenter {
        fn find_library_by_name(
            &self,
            _name: &str,
        ) -> Result<Option<SeqCenterLibrary>, ImportError> {
            Ok(None)
        }

        fn find_library_by_external_identifier(
            &self,
            _external_identifier: &str,
        ) -> Result<Option<SeqCenterLibrary>, ImportError> {
            Ok(None)
        }

        fn list_fastqs(&self, _library_name: &str) -> Result<Vec<RawFastqRecord>, ImportError> {
            Ok(Vec::new())
        }

        fn flowcell_code(&self, flowcell_id: u64) -> Result<String, ImportError> {
            self.lookups.lock().unwrap().push(flowcell_id);
            Ok(format!("FC{flowcell_id}"))
        }

        fn primer_index_sequences(
            &self,
            _primer_ids: &[u64],
        ) -> Result<BTreeMap<u64, String>, ImportError> {
            Ok(BTreeMap::new())
        }
    }

    fn record(flowcell_id: u64, lane: &str, primer_id: u64, libcore_id: u64) -> RawFastqRecord {
        RawFastqRecord {
            id: libcore_id * 10,
            data_path: format!("/archive/{libcore_id}.fastq.gz"),
            flowcell_id,
            lane_number: lane.to_string(),
            run_datetime: NaiveDate::from_ymd_opt(2025, 6, 11)
                .unwrap()
                .and_hms_opt(2, 15, 30)
                .unwrap(),
            machine: "HiSeqX".to_string(),
            libcore_id,
            primer_id,
            status: "production".to_string(),
            removed: None,
            filename_pattern: "_1_chastity_passed.fastq.gz".to_string(),
        }
    }

    #[test]
    fn flowcell_resolved_once_per_distinct_id() {
        let seqcenter = CountingSeqCenter::new();
        let mut mapper = LaneKeyMapper::new(&seqcenter);
        let records = vec![
            record(3001, "1", 1, 11),
            record(3001, "1", 2, 12),
            record(3001, "2", 3, 13),
            record(3002, "1", 4, 14),
        ];

        let grouping = mapper.group(&records).unwrap();
        assert_eq!(grouping.groups.len(), 3);
        assert_eq!(seqcenter.lookups.lock().unwrap().as_slice(), &[3001, 3002]);
    }

    #[test]
    fn primer_multimap_collects_libcores() {
        let seqcenter = CountingSeqCenter::new();
        let mut mapper = LaneKeyMapper::new(&seqcenter);
        let records = vec![
            record(3001, "1", 7, 11),
            record(3001, "1", 7, 12),
            record(3001, "1", 8, 13),
        ];

        let grouping = mapper.group(&records).unwrap();
        assert_eq!(grouping.primer_ids(), vec![7, 8]);
        assert_eq!(grouping.primer_libcores[&7].len(), 2);
    }

    #[test]
    fn unrecognized_machine_fails() {
        let seqcenter = CountingSeqCenter::new();
        let mut mapper = LaneKeyMapper::new(&seqcenter);
        let mut bad = record(3001, "1", 1, 11);
        bad.machine = "MiSeq".to_string();

        let err = mapper.group(&[bad]).unwrap_err();
        assert_matches!(err, ImportError::UnsupportedInstrument(_));
    }

    #[test]
    fn conflicting_lane_metadata_rejected() {
        let seqcenter = CountingSeqCenter::new();
        let mut mapper = LaneKeyMapper::new(&seqcenter);
        let first = record(3001, "1", 1, 11);
        let mut second = record(3001, "1", 2, 12);
        second.run_datetime = NaiveDate::from_ymd_opt(2025, 6, 12)
            .unwrap()
            .and_hms_opt(2, 15, 30)
            .unwrap();

        let err = mapper.group(&[first, second]).unwrap_err();
        assert_matches!(err, ImportError::InvalidRecord(_));
    }
}
