use chrono::NaiveDate;
use tracing::{error, info};

use crate::catalog::{CatalogClient, StorageClient};
use crate::domain::LibraryUnit;
use crate::error::ImportError;
use crate::lims::LimsClient;
use crate::orchestrator::{ImportOptions, ImportOrchestrator, ImportOutcome};
use crate::seqcenter::SeqCenterClient;
use crate::ticket::TicketClient;

#[derive(Debug, Clone)]
pub struct SuccessEntry {
    pub library_id: String,
    pub external_library_id: String,
    pub submission_date: NaiveDate,
    pub new_lane_count: usize,
}

#[derive(Debug, Clone)]
pub struct FailureEntry {
    pub library_id: String,
    pub external_library_id: String,
    pub submission_date: NaiveDate,
    pub message: String,
}

/// Consolidated outcome of one batch run, already classified for the
/// report: failures split on the submission-date window.
#[derive(Debug, Clone)]
pub struct ImportReport {
    pub generated_on: NaiveDate,
    pub recent_days: i64,
    pub successes: Vec<SuccessEntry>,
    pub failures: Vec<FailureEntry>,
}

impl ImportReport {
    fn is_recent(&self, submission_date: NaiveDate) -> bool {
        (self.generated_on - submission_date).num_days() < self.recent_days
    }

    /// Units that failed but were submitted inside the window; these are
    /// most likely still queued at the sequencing center.
    pub fn expected_from_center(&self) -> Vec<&FailureEntry> {
        self.failures
            .iter()
            .filter(|entry| self.is_recent(entry.submission_date))
            .collect()
    }

    pub fn failed_imports(&self) -> Vec<&FailureEntry> {
        self.failures
            .iter()
            .filter(|entry| !self.is_recent(entry.submission_date))
            .collect()
    }
}

/// Runs every pending unit sequentially, catching per-unit errors at this
/// boundary so one bad library never aborts the batch.
pub struct BatchRunner<'a, S, L, C, T, B>
where
    S: SeqCenterClient,
    L: LimsClient,
    C: CatalogClient,
    T: TicketClient,
    B: StorageClient + ?Sized,
{
    orchestrator: ImportOrchestrator<'a, S, L, C, T, B>,
    lims: &'a L,
    recent_days: i64,
}

impl<'a, S, L, C, T, B> BatchRunner<'a, S, L, C, T, B>
where
    S: SeqCenterClient,
    L: LimsClient,
    C: CatalogClient,
    T: TicketClient,
    B: StorageClient + ?Sized,
{
    pub fn new(
        seqcenter: &'a S,
        lims: &'a L,
        catalog: &'a C,
        ticket: &'a T,
        storage: &'a B,
        recent_days: i64,
    ) -> Self {
        Self {
            orchestrator: ImportOrchestrator::new(seqcenter, lims, catalog, ticket, storage),
            lims,
            recent_days,
        }
    }

    pub fn run(
        &self,
        options: &ImportOptions,
        today: NaiveDate,
    ) -> Result<ImportReport, ImportError> {
        let units = self.lims.list_pending_units()?;
        info!(units = units.len(), "starting batch run");

        let mut report = ImportReport {
            generated_on: today,
            recent_days: self.recent_days,
            successes: Vec::new(),
            failures: Vec::new(),
        };

        for unit in &units {
            match self.run_unit(unit, options) {
                Ok(UnitResult::Skipped) => {}
                Ok(UnitResult::NotFound) => {
                    report.failures.push(FailureEntry {
                        library_id: unit.library_id.clone(),
                        external_library_id: best_known_external_id(unit),
                        submission_date: unit.submission_date,
                        message: "no sequencing-center records yet".to_string(),
                    });
                }
                Ok(UnitResult::Imported(entry)) => report.successes.push(entry),
                Err(err) => {
                    error!(library = %unit.library_id, error = %err, "unit import failed");
                    report.failures.push(FailureEntry {
                        library_id: unit.library_id.clone(),
                        external_library_id: best_known_external_id(unit),
                        submission_date: unit.submission_date,
                        message: err.to_string(),
                    });
                }
            }
        }

        report
            .successes
            .sort_by(|a, b| b.submission_date.cmp(&a.submission_date));
        report
            .failures
            .sort_by(|a, b| b.submission_date.cmp(&a.submission_date));

        Ok(report)
    }

    fn run_unit(
        &self,
        unit: &LibraryUnit,
        options: &ImportOptions,
    ) -> Result<UnitResult, ImportError> {
        let record = match self.orchestrator.import_unit(unit, options)? {
            ImportOutcome::Excluded => return Ok(UnitResult::Skipped),
            ImportOutcome::NotFound => return Ok(UnitResult::NotFound),
            ImportOutcome::Imported(record) => record,
        };

        let on_record = record.lanes.len() as u32;
        if on_record < unit.lane_requested_count {
            return Err(ImportError::LaneCountShortfall {
                library: unit.library_id.clone(),
                requested: unit.lane_requested_count,
                imported: on_record,
            });
        }
        if on_record > unit.lane_requested_count && !options.dry_run {
            info!(
                library = %unit.library_id,
                requested = unit.lane_requested_count,
                on_record,
                "raising requested lane count in LIMS"
            );
            self.lims
                .set_lane_requested_count(unit.sequencing_id, on_record)?;
        }

        Ok(UnitResult::Imported(SuccessEntry {
            library_id: record.library_id.clone(),
            external_library_id: record.external_library_id.clone(),
            submission_date: unit.submission_date,
            new_lane_count: record.new_lanes().count(),
        }))
    }
}

enum UnitResult {
    Skipped,
    NotFound,
    Imported(SuccessEntry),
}

fn best_known_external_id(unit: &LibraryUnit) -> String {
    unit.gsc_library_id
        .clone()
        .unwrap_or_else(|| format!("{}_{}", unit.sample_id, unit.library_id))
}
