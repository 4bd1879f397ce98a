use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ImportError {
    #[error("unknown rev-comp override: {0}")]
    UnknownOverride(String),

    #[error("unsupported sequencing instrument: {0}")]
    UnsupportedInstrument(String),

    #[error("read end {read_end} missing for {key}")]
    MissingReadEnd { key: String, read_end: u8 },

    #[error("read end {read_end} seen more than once for {key}")]
    DuplicateReadEnd { key: String, read_end: u8 },

    #[error("fastq spans multiple lanes: {0}")]
    UnsupportedMultiLane(String),

    #[error("index {index} missing from imported lane {lane}")]
    MissingIndexCoverage { lane: String, index: String },

    #[error("{0}")]
    IndexMismatch(String),

    #[error("index {index} delivered more than once for lane {lane} read end {read_end}")]
    DuplicateIndex {
        index: String,
        lane: String,
        read_end: u8,
    },

    #[error(
        "library {library}: LIMS records external id {recorded} but sequencing center reports {reported}"
    )]
    IdentifierConflict {
        library: String,
        recorded: String,
        reported: String,
    },

    #[error("unrecognized filename pattern: {0}")]
    UnrecognizedFilePattern(String),

    #[error("library {library}: {imported} lanes on record but {requested} requested")]
    LaneCountShortfall {
        library: String,
        requested: u32,
        imported: u32,
    },

    #[error("sequencing-center query failed after retries: {0}")]
    PermanentQueryFailure(String),

    #[error("sequencing-center request failed: {0}")]
    SeqCenterHttp(String),

    #[error("sequencing center returned status {status}: {message}")]
    SeqCenterStatus { status: u16, message: String },

    #[error("LIMS request failed: {0}")]
    LimsHttp(String),

    #[error("LIMS returned status {status}: {message}")]
    LimsStatus { status: u16, message: String },

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("ticket request failed: {0}")]
    TicketHttp(String),

    #[error("ticket service returned status {status}: {message}")]
    TicketStatus { status: u16, message: String },

    #[error("corrupt gzip source: {0}")]
    CorruptGzip(String),

    #[error("copied file size mismatch for {path}: source {expected} bytes, copy {copied} bytes")]
    CopySizeMismatch {
        path: String,
        expected: u64,
        copied: u64,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed collaborator record: {0}")]
    InvalidRecord(String),

    #[error("missing config file fqimport.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
