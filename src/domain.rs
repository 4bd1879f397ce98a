use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::error::ImportError;

/// Sequencing instruments with a known index orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Instrument {
    HiSeqX,
    HiSeq2500,
    NextSeq550,
}

impl Instrument {
    /// Normalizes the machine name reported by the sequencing center.
    /// Names outside the table are a schema-drift signal and fail the unit.
    pub fn from_machine(machine: &str) -> Result<Self, ImportError> {
        match machine.trim() {
            "HiSeqX" | "HiSeq X" | "HiSeq-X" => Ok(Instrument::HiSeqX),
            "HiSeq2500" | "HiSeq 2500" | "HiSeq-2500" => Ok(Instrument::HiSeq2500),
            "NextSeq550" | "NextSeq 550" | "NextSeq-550" => Ok(Instrument::NextSeq550),
            other => Err(ImportError::UnsupportedInstrument(other.to_string())),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::HiSeqX => write!(f, "HiSeqX"),
            Instrument::HiSeq2500 => write!(f, "HiSeq2500"),
            Instrument::NextSeq550 => write!(f, "NextSeq550"),
        }
    }
}

/// Explicit index-orientation override recorded on a LIMS sequencing,
/// spelled the way the sequencing center reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevcompOverride {
    KeepBoth,
    ReverseI5,
    ReverseI7,
    ReverseBoth,
}

impl FromStr for RevcompOverride {
    type Err = ImportError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "i7,i5" => Ok(RevcompOverride::KeepBoth),
            "i7,rev(i5)" => Ok(RevcompOverride::ReverseI5),
            "rev(i7),i5" => Ok(RevcompOverride::ReverseI7),
            "rev(i7),rev(i5)" => Ok(RevcompOverride::ReverseBoth),
            other => Err(ImportError::UnknownOverride(other.to_string())),
        }
    }
}

/// One per-read file as reported by the sequencing center, flattened from
/// its nested libcore/run payload. Fetched fresh on every run.
#[derive(Debug, Clone)]
pub struct RawFastqRecord {
    pub id: u64,
    pub data_path: String,
    pub flowcell_id: u64,
    pub lane_number: String,
    pub run_datetime: NaiveDateTime,
    pub machine: String,
    pub libcore_id: u64,
    pub primer_id: u64,
    pub status: String,
    pub removed: Option<String>,
    pub filename_pattern: String,
}

impl RawFastqRecord {
    pub fn is_production(&self) -> bool {
        self.status == "production"
    }
}

/// Key of one lane-level unit of raw sequencing output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LaneKey {
    pub flowcell_code: String,
    pub lane_number: String,
    pub run_date: NaiveDate,
    pub instrument: Instrument,
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.flowcell_code, self.lane_number)
    }
}

/// LIMS-registered mapping from an index sequence to a cell and its
/// experimental condition. Read-only input to reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellExpectation {
    pub index_sequence: String,
    pub cell_id: String,
    pub condition: String,
}

/// A pending library unit as the LIMS knows it.
#[derive(Debug, Clone)]
pub struct LibraryUnit {
    pub id: u64,
    pub library_id: String,
    pub sample_id: String,
    pub ticket: String,
    pub sequencing_id: u64,
    pub exclude_from_analysis: bool,
    /// Sequencing-center pool id as the LIMS last recorded it.
    pub gsc_library_id: Option<String>,
    pub rev_comp_override: Option<String>,
    pub lane_requested_count: u32,
    pub submission_date: NaiveDate,
}

/// One lane in the outcome of a unit import.
#[derive(Debug, Clone)]
pub struct LaneImport {
    pub flowcell_code: String,
    pub lane_number: String,
    pub run_date: NaiveDate,
    pub instrument: Instrument,
    pub new: bool,
}

/// Outcome of importing one library unit.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub library_id: String,
    pub external_library_id: String,
    pub lanes: Vec<LaneImport>,
}

impl ImportRecord {
    pub fn new_lanes(&self) -> impl Iterator<Item = &LaneImport> {
        self.lanes.iter().filter(|lane| lane.new)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternInfo {
    pub read_end: u8,
    pub passed: bool,
}

/// Table of filename patterns the sequencing center is known to report.
/// Patterns marked `passed: false` are recognized but never imported.
const FILENAME_PATTERNS: &[(&str, PatternInfo)] = &[
    (
        "_1_chastity_passed.fastq.gz",
        PatternInfo {
            read_end: 1,
            passed: true,
        },
    ),
    (
        "_2_chastity_passed.fastq.gz",
        PatternInfo {
            read_end: 2,
            passed: true,
        },
    ),
    (
        "_1_chastity_failed.fastq.gz",
        PatternInfo {
            read_end: 1,
            passed: false,
        },
    ),
    (
        "_2_chastity_failed.fastq.gz",
        PatternInfo {
            read_end: 2,
            passed: false,
        },
    ),
    (
        "*_1_*bp.concat_chastity_passed.fastq.gz",
        PatternInfo {
            read_end: 1,
            passed: true,
        },
    ),
    (
        "*_2_*bp.concat_chastity_passed.fastq.gz",
        PatternInfo {
            read_end: 2,
            passed: true,
        },
    ),
    (
        "_1_*bp.concat.fastq.gz",
        PatternInfo {
            read_end: 1,
            passed: true,
        },
    ),
    (
        "_2_*bp.concat.fastq.gz",
        PatternInfo {
            read_end: 2,
            passed: true,
        },
    ),
];

pub fn filename_pattern_info(pattern: &str) -> Option<PatternInfo> {
    FILENAME_PATTERNS
        .iter()
        .find(|(known, _)| *known == pattern)
        .map(|(_, info)| *info)
}

/// Sequencing-center pool identifiers beginning with `IX` are internal
/// transfer pools; their indexes are not expected to match LIMS cells.
pub fn is_internal_pool_id(external_id: &str) -> bool {
    static INTERNAL_RE: OnceLock<Regex> = OnceLock::new();
    INTERNAL_RE
        .get_or_init(|| Regex::new(r"^IX\d+$").unwrap())
        .is_match(external_id)
}

/// Cell identifier the LIMS assigns to one sublibrary well.
pub fn cell_sample_id(sample_id: &str, library_id: &str, row: u32, column: u32) -> String {
    format!("{sample_id}-{library_id}-R{row:02}-C{column:02}")
}

/// Canonical catalog destination for one staged fastq. The catalog resolves
/// file resources by this exact layout, so the template must not drift.
pub fn fastq_destination(
    primary_sample_id: &str,
    dlp_library_id: &str,
    flowcell_id: &str,
    lane_number: &str,
    cell_sample_id: &str,
    index_sequence: &str,
    read_end: u8,
    extension: &str,
) -> String {
    format!(
        "{primary_sample_id}/{dlp_library_id}/{flowcell_id}_{lane_number}/\
         {cell_sample_id}_{dlp_library_id}_{index_sequence}_{read_end}.fastq{extension}"
    )
}
