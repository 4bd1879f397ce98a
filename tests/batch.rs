use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use flate2::Compression;
use flate2::write::GzEncoder;

use fastq_import_manager::batch::BatchRunner;
use fastq_import_manager::catalog::{CatalogClient, DatasetSpec, ServerStorageClient};
use fastq_import_manager::domain::{LaneImport, LibraryUnit, RawFastqRecord};
use fastq_import_manager::error::ImportError;
use fastq_import_manager::lims::{LimsClient, Sublibrary};
use fastq_import_manager::orchestrator::ImportOptions;
use fastq_import_manager::report;
use fastq_import_manager::seqcenter::{SeqCenterClient, SeqCenterLibrary};
use fastq_import_manager::ticket::TicketClient;

#[derive(Default)]
struct MockSeqCenter {
    libraries: BTreeMap<String, SeqCenterLibrary>,
    fastqs: BTreeMap<String, Vec<RawFastqRecord>>,
    flowcell_codes: BTreeMap<u64, String>,
    primer_sequences: BTreeMap<u64, String>,
}

impl SeqCenterClient for MockSeqCenter {
    fn find_library_by_name(&self, name: &str) -> Result<Option<SeqCenterLibrary>, ImportError> {
        Ok(self.libraries.get(name).cloned())
    }

    fn find_library_by_external_identifier(
        &self,
        _external_identifier: &str,
    ) -> Result<Option<SeqCenterLibrary>, ImportError> {
        Ok(None)
    }

    fn list_fastqs(&self, library_name: &str) -> Result<Vec<RawFastqRecord>, ImportError> {
        Ok(self.fastqs.get(library_name).cloned().unwrap_or_default())
    }

    fn flowcell_code(&self, flowcell_id: u64) -> Result<String, ImportError> {
        self.flowcell_codes
            .get(&flowcell_id)
            .cloned()
            .ok_or_else(|| ImportError::InvalidRecord(format!("flowcell {flowcell_id}")))
    }

    fn primer_index_sequences(
        &self,
        primer_ids: &[u64],
    ) -> Result<BTreeMap<u64, String>, ImportError> {
        Ok(primer_ids
            .iter()
            .filter_map(|id| self.primer_sequences.get(id).map(|seq| (*id, seq.clone())))
            .collect())
    }
}

#[derive(Default)]
struct MockLims {
    units: Vec<LibraryUnit>,
    sublibraries: Vec<Sublibrary>,
    sublibraries_by_library: BTreeMap<String, Vec<Sublibrary>>,
    requested_count_updates: Mutex<Vec<(u64, u32)>>,
}

impl LimsClient for MockLims {
    fn list_pending_units(&self) -> Result<Vec<LibraryUnit>, ImportError> {
        Ok(self.units.clone())
    }

    fn sublibraries(&self, library_id: &str) -> Result<Vec<Sublibrary>, ImportError> {
        Ok(self
            .sublibraries_by_library
            .get(library_id)
            .cloned()
            .unwrap_or_else(|| self.sublibraries.clone()))
    }

    fn set_external_library_id(
        &self,
        _sequencing_id: u64,
        _external_id: &str,
    ) -> Result<(), ImportError> {
        Ok(())
    }

    fn get_or_create_lane(
        &self,
        _sequencing_id: u64,
        _lane: &LaneImport,
    ) -> Result<(), ImportError> {
        Ok(())
    }

    fn set_lane_requested_count(&self, sequencing_id: u64, count: u32) -> Result<(), ImportError> {
        self.requested_count_updates
            .lock()
            .unwrap()
            .push((sequencing_id, count));
        Ok(())
    }
}

#[derive(Default)]
struct MockCatalog {
    datasets: Mutex<Vec<String>>,
}

impl CatalogClient for MockCatalog {
    fn existing_lanes(&self, _library_id: &str) -> Result<BTreeSet<(String, String)>, ImportError> {
        Ok(BTreeSet::new())
    }

    fn get_or_create_dataset(&self, spec: &DatasetSpec) -> Result<u64, ImportError> {
        self.datasets.lock().unwrap().push(spec.name());
        Ok(1)
    }

    fn get_or_create_lane(
        &self,
        _dataset_id: u64,
        _flowcell_code: &str,
        _lane_number: &str,
    ) -> Result<u64, ImportError> {
        Ok(1)
    }

    fn get_or_create_file_resource(
        &self,
        _dataset_id: u64,
        _destination: &str,
        _size: u64,
    ) -> Result<u64, ImportError> {
        Ok(1)
    }
}

#[derive(Default)]
struct MockTicket {
    posted: Mutex<Vec<(String, String)>>,
}

impl TicketClient for MockTicket {
    fn comments(&self, _ticket: &str) -> Result<Vec<String>, ImportError> {
        Ok(Vec::new())
    }

    fn add_comment(&self, ticket: &str, body: &str) -> Result<(), ImportError> {
        self.posted
            .lock()
            .unwrap()
            .push((ticket.to_string(), body.to_string()));
        Ok(())
    }
}

const DECODED: &str = "AAACCT-TTAGGC";
const RAW: &str = "GCCTAA-AGGTTT";

fn unit(
    id: u64,
    library: &str,
    external: Option<&str>,
    requested: u32,
    submitted: NaiveDate,
) -> LibraryUnit {
    LibraryUnit {
        id,
        library_id: library.to_string(),
        sample_id: "SA1090".to_string(),
        ticket: format!("SC-{id}"),
        sequencing_id: id * 100,
        exclude_from_analysis: false,
        gsc_library_id: external.map(str::to_string),
        rev_comp_override: None,
        lane_requested_count: requested,
        submission_date: submitted,
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    archive: Utf8PathBuf,
    store_root: Utf8PathBuf,
    seqcenter: MockSeqCenter,
    lims: MockLims,
    catalog: MockCatalog,
    ticket: MockTicket,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let archive = Utf8PathBuf::from_path_buf(dir.path().join("archive")).unwrap();
        let store_root = Utf8PathBuf::from_path_buf(dir.path().join("store")).unwrap();
        std::fs::create_dir_all(archive.as_std_path()).unwrap();

        let mut seqcenter = MockSeqCenter::default();
        seqcenter.flowcell_codes.insert(3001, "AAAYHGX".to_string());
        seqcenter.primer_sequences.insert(1, RAW.to_string());

        Harness {
            _dir: dir,
            archive,
            store_root,
            seqcenter,
            lims: MockLims {
                sublibraries: vec![Sublibrary {
                    row: 5,
                    column: 12,
                    condition: "A".to_string(),
                    primer_i7: "AAACCT".to_string(),
                    primer_i5: "TTAGGC".to_string(),
                }],
                ..MockLims::default()
            },
            catalog: MockCatalog::default(),
            ticket: MockTicket::default(),
        }
    }

    /// Registers a sequencing-center pool with complete read pairs on the
    /// given lanes of flowcell 3001.
    fn add_pool(&mut self, name: &str, lanes: &[&str]) {
        self.seqcenter.libraries.insert(
            name.to_string(),
            SeqCenterLibrary {
                id: 500,
                name: name.to_string(),
                external_identifier: None,
            },
        );
        let mut records = Vec::new();
        for (lane_index, lane) in lanes.iter().enumerate() {
            for read_end in [1u8, 2] {
                let id = 1000 + lane_index as u64 * 10 + read_end as u64;
                let path = self.archive.join(format!("{name}_{lane}_{read_end}.fastq.gz"));
                let file = std::fs::File::create(path.as_std_path()).unwrap();
                let mut encoder = GzEncoder::new(file, Compression::default());
                encoder.write_all(b"@r1\nACGT\n+\nFFFF\n").unwrap();
                encoder.finish().unwrap();

                records.push(RawFastqRecord {
                    id,
                    data_path: path.to_string(),
                    flowcell_id: 3001,
                    lane_number: lane.to_string(),
                    run_datetime: NaiveDate::from_ymd_opt(2025, 7, 20)
                        .unwrap()
                        .and_hms_opt(4, 30, 0)
                        .unwrap(),
                    machine: "HiSeqX".to_string(),
                    libcore_id: id,
                    primer_id: 1,
                    status: "production".to_string(),
                    removed: None,
                    filename_pattern: format!("_{read_end}_chastity_passed.fastq.gz"),
                });
            }
        }
        self.seqcenter.fastqs.insert(name.to_string(), records);
    }

    fn run(&self, today: NaiveDate) -> fastq_import_manager::batch::ImportReport {
        let storage = ServerStorageClient::new(self.store_root.clone());
        let runner = BatchRunner::new(
            &self.seqcenter,
            &self.lims,
            &self.catalog,
            &self.ticket,
            &storage,
            10,
        );
        runner.run(&ImportOptions::default(), today).unwrap()
    }
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

#[test]
fn batch_classifies_every_unit_and_keeps_going() {
    let mut harness = Harness::new();
    harness.add_pool("PX0001", &["1"]);
    harness.add_pool("PX0005", &["1", "2"]);
    harness.lims.units = vec![
        unit(1, "A90001A", Some("PX0001"), 1, date(2025, 8, 1)),
        unit(2, "A90002A", Some("PX0002"), 1, date(2025, 8, 18)),
        {
            let mut excluded = unit(3, "A90003A", Some("PX0001"), 1, date(2025, 8, 5));
            excluded.exclude_from_analysis = true;
            excluded
        },
        unit(4, "A90004A", Some("PX0001"), 2, date(2025, 6, 1)),
        unit(5, "A90005A", Some("PX0005"), 1, date(2025, 7, 15)),
    ];
    // Unit 4 shares PX0001's single lane but requested two.

    let outcome = harness.run(date(2025, 8, 20));

    let successes: Vec<&str> = outcome
        .successes
        .iter()
        .map(|entry| entry.library_id.as_str())
        .collect();
    assert_eq!(successes, ["A90001A", "A90005A"]);

    let expected: Vec<&str> = outcome
        .expected_from_center()
        .iter()
        .map(|entry| entry.library_id.as_str())
        .collect();
    assert_eq!(expected, ["A90002A"]);
    assert_eq!(
        outcome.expected_from_center()[0].message,
        "no sequencing-center records yet"
    );

    let failed: Vec<(String, String)> = outcome
        .failed_imports()
        .iter()
        .map(|entry| (entry.library_id.clone(), entry.message.clone()))
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "A90004A");
    assert!(failed[0].1.contains("1 lanes on record but 2 requested"));

    // Over-delivery for unit 5 raises the requested count in the LIMS.
    assert_eq!(
        harness.lims.requested_count_updates.lock().unwrap().as_slice(),
        &[(500, 2)]
    );

    // The excluded unit left no trace anywhere.
    assert!(
        !harness
            .ticket
            .posted
            .lock()
            .unwrap()
            .iter()
            .any(|(ticket, _)| ticket == "SC-3")
    );
}

#[test]
fn coverage_failure_in_one_unit_leaves_the_rest_untouched() {
    let mut harness = Harness::new();
    harness.add_pool("PX0001", &["1"]);
    harness.add_pool("PX0003", &["1"]);
    // Library A90003A expects a second index its pool never delivered.
    harness.lims.sublibraries_by_library.insert(
        "A90003A".to_string(),
        vec![
            harness.lims.sublibraries[0].clone(),
            Sublibrary {
                row: 6,
                column: 1,
                condition: "A".to_string(),
                primer_i7: "GGGTTT".to_string(),
                primer_i5: "CCCAAA".to_string(),
            },
        ],
    );
    harness.lims.units = vec![
        unit(1, "A90001A", Some("PX0001"), 1, date(2025, 8, 1)),
        unit(2, "A90002A", Some("PX0001"), 1, date(2025, 8, 2)),
        unit(3, "A90003A", Some("PX0003"), 1, date(2025, 6, 3)),
        unit(4, "A90004A", Some("PX0001"), 1, date(2025, 8, 4)),
        unit(5, "A90005A", Some("PX0001"), 1, date(2025, 8, 5)),
    ];

    let outcome = harness.run(date(2025, 8, 20));

    let successes: Vec<&str> = outcome
        .successes
        .iter()
        .map(|entry| entry.library_id.as_str())
        .collect();
    assert_eq!(successes, ["A90005A", "A90004A", "A90002A", "A90001A"]);

    let failed = outcome.failed_imports();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].library_id, "A90003A");
    assert!(failed[0].message.contains("GGGTTT-CCCAAA"));
    assert!(outcome.expected_from_center().is_empty());
}

#[test]
fn successes_sorted_by_submission_date_descending() {
    let mut harness = Harness::new();
    harness.add_pool("PX0001", &["1"]);
    harness.lims.units = vec![
        unit(1, "A90001A", Some("PX0001"), 1, date(2025, 7, 1)),
        unit(2, "A90002A", Some("PX0001"), 1, date(2025, 8, 10)),
    ];

    let outcome = harness.run(date(2025, 8, 20));
    let successes: Vec<&str> = outcome
        .successes
        .iter()
        .map(|entry| entry.library_id.as_str())
        .collect();
    assert_eq!(successes, ["A90002A", "A90001A"]);
}

#[test]
fn report_artifact_places_entries_in_their_sections() {
    let mut harness = Harness::new();
    harness.add_pool("PX0001", &["1"]);
    harness.lims.units = vec![
        unit(1, "A90001A", Some("PX0001"), 1, date(2025, 8, 1)),
        unit(2, "A90002A", Some("PX0002"), 1, date(2025, 8, 18)),
        unit(4, "A90004A", Some("PX0001"), 2, date(2025, 6, 1)),
    ];

    let outcome = harness.run(date(2025, 8, 20));
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("import.txt")).unwrap();
    report::write_report(&path, &outcome).unwrap();

    let text = std::fs::read_to_string(path.as_std_path()).unwrap();
    let successful = text.find("Successful imports:").unwrap();
    let failed = text.find("Failed imports:").unwrap();
    let pending = text
        .find("Libraries expected from sequencing center (submitted < 10 days):")
        .unwrap();
    let a1 = text.find("A90001A (PX0001)").unwrap();
    let a4 = text.find("A90004A (PX0001):").unwrap();
    let a2 = text.find("A90002A (PX0002): no sequencing-center records yet").unwrap();
    assert!(successful < a1 && a1 < failed);
    assert!(failed < a4 && a4 < pending);
    assert!(pending < a2);
}

#[test]
fn decoded_index_reaches_the_stored_path() {
    let mut harness = Harness::new();
    harness.add_pool("PX0001", &["1"]);
    harness.lims.units = vec![unit(1, "A90001A", Some("PX0001"), 1, date(2025, 8, 1))];

    harness.run(date(2025, 8, 20));
    let stored = harness
        .store_root
        .join(format!(
            "SA1090/A90001A/AAAYHGX_1/SA1090-A90001A-R05-C12_A90001A_{DECODED}_1.fastq.gz"
        ));
    assert!(stored.as_std_path().exists());
}
