use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use camino::Utf8PathBuf;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogClient, DatasetSpec, StorageClient, StorageKind};
use crate::codec::decode_index;
use crate::config::UnrecognizedPatternPolicy;
use crate::domain::{
    ImportRecord, LaneImport, LibraryUnit, RevcompOverride, fastq_destination,
    filename_pattern_info,
};
use crate::error::ImportError;
use crate::fs_util;
use crate::lanes::LaneKeyMapper;
use crate::lims::LimsClient;
use crate::reconcile::{
    DuplicateIndexPolicy, IndexDisposition, ReconcileContext, build_expectations,
};
use crate::seqcenter::{SeqCenterClient, SeqCenterLibrary};
use crate::ticket::TicketClient;
use crate::validate::{StagedFastq, check_coverage, check_pairs};

pub const FASTQ_DATASET_TYPE: &str = "FQ";

#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Re-import lanes already in the catalog and correct stale LIMS ids.
    pub update: bool,
    /// Stop after staging; report which lanes would be new, touch nothing.
    pub dry_run: bool,
    /// Stop after validation; pre-flight a library without persisting.
    pub check_library: bool,
    pub upload_concurrency: usize,
    pub duplicate_index_policy: DuplicateIndexPolicy,
    pub unrecognized_pattern_policy: UnrecognizedPatternPolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            update: false,
            dry_run: false,
            check_library: false,
            upload_concurrency: 4,
            duplicate_index_policy: DuplicateIndexPolicy::default(),
            unrecognized_pattern_policy: UnrecognizedPatternPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ImportOutcome {
    /// Unit is administratively excluded from analysis.
    Excluded,
    /// Sequencing center has no record of this unit yet.
    NotFound,
    Imported(ImportRecord),
}

/// Drives reconciliation and import for one library unit. Collaborators
/// are injected so tests can substitute doubles; nothing here reaches for
/// a global client.
pub struct ImportOrchestrator<'a, S, L, C, T, B>
where
    S: SeqCenterClient,
    L: LimsClient,
    C: CatalogClient,
    T: TicketClient,
    B: StorageClient + ?Sized,
{
    seqcenter: &'a S,
    lims: &'a L,
    catalog: &'a C,
    ticket: &'a T,
    storage: &'a B,
}

impl<'a, S, L, C, T, B> ImportOrchestrator<'a, S, L, C, T, B>
where
    S: SeqCenterClient,
    L: LimsClient,
    C: CatalogClient,
    T: TicketClient,
    B: StorageClient + ?Sized,
{
    pub fn new(seqcenter: &'a S, lims: &'a L, catalog: &'a C, ticket: &'a T, storage: &'a B) -> Self {
        Self {
            seqcenter,
            lims,
            catalog,
            ticket,
            storage,
        }
    }

    pub fn import_unit(
        &self,
        unit: &LibraryUnit,
        options: &ImportOptions,
    ) -> Result<ImportOutcome, ImportError> {
        if unit.exclude_from_analysis {
            info!(library = %unit.library_id, "excluded from analysis, skipping");
            return Ok(ImportOutcome::Excluded);
        }

        let Some(library) = self.resolve_library(unit)? else {
            info!(library = %unit.library_id, "no sequencing-center records yet");
            return Ok(ImportOutcome::NotFound);
        };
        let resolved = library.name.clone();
        if let Some(recorded) = &unit.gsc_library_id {
            if *recorded != resolved {
                if !options.update {
                    return Err(ImportError::IdentifierConflict {
                        library: unit.library_id.clone(),
                        recorded: recorded.clone(),
                        reported: resolved.clone(),
                    });
                }
                info!(
                    library = %unit.library_id,
                    recorded = %recorded,
                    reported = %resolved,
                    "correcting stale external id in LIMS"
                );
                self.lims.set_external_library_id(unit.sequencing_id, &resolved)?;
            }
        }

        let override_: Option<RevcompOverride> = unit
            .rev_comp_override
            .as_deref()
            .map(str::parse)
            .transpose()?;

        info!(library = %unit.library_id, external = %resolved, "checking catalog lane state");
        let existing = self.catalog.existing_lanes(&unit.library_id)?;
        let records = self.seqcenter.list_fastqs(&resolved)?;
        let mut mapper = LaneKeyMapper::new(self.seqcenter);
        let grouping = mapper.group(&records)?;
        let primer_sequences = self.seqcenter.primer_index_sequences(&grouping.primer_ids())?;

        let sublibraries = self.lims.sublibraries(&unit.library_id)?;
        let mut reconcile = ReconcileContext::new(
            build_expectations(&sublibraries, &unit.sample_id, &unit.library_id),
            options.duplicate_index_policy,
        );

        let mut lanes: Vec<LaneImport> = Vec::new();
        let mut staged: Vec<StagedFastq> = Vec::new();
        let mut observed_by_lane: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (key, group) in &grouping.groups {
            let already_present =
                existing.contains(&(key.flowcell_code.clone(), key.lane_number.clone()));
            if already_present && !options.update {
                debug!(lane = %key, "lane already in catalog, skipping");
                lanes.push(lane_import(key, false));
                continue;
            }

            let lane_label = key.to_string();
            let mut lane_staged: Vec<StagedFastq> = Vec::new();
            let mut lane_observed: BTreeSet<String> = BTreeSet::new();

            for record in group {
                if !record.is_production() {
                    debug!(fastq = record.id, status = %record.status, "non-production, skipping");
                    continue;
                }
                if record.removed.is_some() {
                    debug!(fastq = record.id, "marked removed, skipping");
                    continue;
                }
                let Some(pattern) = filename_pattern_info(&record.filename_pattern) else {
                    match options.unrecognized_pattern_policy {
                        UnrecognizedPatternPolicy::Fail => {
                            return Err(ImportError::UnrecognizedFilePattern(
                                record.filename_pattern.clone(),
                            ));
                        }
                        UnrecognizedPatternPolicy::Skip => {
                            warn!(
                                fastq = record.id,
                                pattern = %record.filename_pattern,
                                "unrecognized filename pattern, skipping"
                            );
                            continue;
                        }
                    }
                };
                if !pattern.passed {
                    debug!(fastq = record.id, pattern = %record.filename_pattern, "not imported");
                    continue;
                }

                let raw_index = primer_sequences.get(&record.primer_id).ok_or_else(|| {
                    ImportError::InvalidRecord(format!(
                        "no index sequence for primer {}",
                        record.primer_id
                    ))
                })?;
                let decoded = decode_index(raw_index, Some(key.instrument), override_)?;
                let cell = match reconcile.map_index(&decoded, &lane_label, pattern.read_end, &resolved)? {
                    IndexDisposition::Matched(cell) => cell,
                    IndexDisposition::SkippedInternal | IndexDisposition::Unmatched => continue,
                };

                let source = Utf8PathBuf::from(record.data_path.clone());
                fs_util::validate_gzip(&source)?;
                let extension = if record.data_path.ends_with(".gz") { ".gz" } else { "" };
                let destination = fastq_destination(
                    &unit.sample_id,
                    &unit.library_id,
                    &key.flowcell_code,
                    &key.lane_number,
                    &cell.cell_id,
                    &decoded,
                    pattern.read_end,
                    extension,
                );
                lane_observed.insert(decoded.clone());
                lane_staged.push(StagedFastq {
                    source,
                    destination,
                    library_id: unit.library_id.clone(),
                    cell_id: cell.cell_id,
                    index_sequence: decoded,
                    flowcell_code: key.flowcell_code.clone(),
                    lane_numbers: vec![key.lane_number.clone()],
                    read_end: pattern.read_end,
                });
            }

            if lane_staged.is_empty() {
                if already_present {
                    lanes.push(lane_import(key, false));
                } else {
                    warn!(lane = %key, "no importable records, lane not imported");
                }
                continue;
            }

            lanes.push(lane_import(key, !already_present));
            observed_by_lane.insert(lane_label, lane_observed);
            staged.extend(lane_staged);
        }

        let record = ImportRecord {
            library_id: unit.library_id.clone(),
            external_library_id: resolved.clone(),
            lanes,
        };

        if options.dry_run {
            info!(
                library = %unit.library_id,
                new_lanes = record.new_lanes().count(),
                "dry run, stopping after staging"
            );
            return Ok(ImportOutcome::Imported(record));
        }

        let summary = reconcile.summarize(&sublibraries);
        reconcile.raise_if_any_invalid(&unit.library_id, &summary)?;
        let expected: BTreeSet<String> =
            reconcile.expected_indexes().map(str::to_string).collect();
        check_pairs(&staged)?;
        check_coverage(&expected, &observed_by_lane)?;

        if options.check_library {
            info!(library = %unit.library_id, "check mode, stopping after validation");
            return Ok(ImportOutcome::Imported(record));
        }

        if staged.is_empty() {
            info!(library = %unit.library_id, "nothing new to import");
            return Ok(ImportOutcome::Imported(record));
        }

        info!(library = %unit.library_id, files = staged.len(), "uploading");
        let pairs: Vec<(Utf8PathBuf, String)> = staged
            .iter()
            .map(|entry| (entry.source.clone(), entry.destination.clone()))
            .collect();
        match self.storage.kind() {
            StorageKind::Blob => {
                self.storage.batch_upload(&pairs, options.upload_concurrency)?;
            }
            StorageKind::Server => {
                for (source, destination) in &pairs {
                    let source_size = fs::metadata(source.as_std_path())
                        .map_err(|err| ImportError::Filesystem(format!("stat {source}: {err}")))?
                        .len();
                    if self.storage.size(destination)? == Some(source_size) {
                        debug!(destination = %destination, "already stored, skipping copy");
                        continue;
                    }
                    self.storage.upload(source, destination)?;
                }
            }
        }

        info!(library = %unit.library_id, "committing catalog records");
        let dataset_spec = DatasetSpec {
            sample_id: unit.sample_id.clone(),
            library_id: unit.library_id.clone(),
            dataset_type: FASTQ_DATASET_TYPE.to_string(),
            lanes: record
                .lanes
                .iter()
                .map(|lane| (lane.flowcell_code.clone(), lane.lane_number.clone()))
                .collect(),
        };
        let dataset_id = self.catalog.get_or_create_dataset(&dataset_spec)?;
        for lane in record.new_lanes() {
            self.catalog
                .get_or_create_lane(dataset_id, &lane.flowcell_code, &lane.lane_number)?;
            self.lims.get_or_create_lane(unit.sequencing_id, lane)?;
        }
        for entry in &staged {
            let size = fs::metadata(entry.source.as_std_path())
                .map_err(|err| ImportError::Filesystem(format!("stat {}: {err}", entry.source)))?
                .len();
            self.catalog
                .get_or_create_file_resource(dataset_id, &entry.destination, size)?;
        }

        self.notify(unit, &record)?;

        Ok(ImportOutcome::Imported(record))
    }

    /// Resolution order: the center's own pool id as the LIMS recorded it,
    /// then the externally visible `{sample}_{library}` identifier.
    fn resolve_library(
        &self,
        unit: &LibraryUnit,
    ) -> Result<Option<SeqCenterLibrary>, ImportError> {
        if let Some(recorded) = &unit.gsc_library_id {
            if let Some(library) = self.seqcenter.find_library_by_name(recorded)? {
                return Ok(Some(library));
            }
        }
        let external_identifier = format!("{}_{}", unit.sample_id, unit.library_id);
        self.seqcenter
            .find_library_by_external_identifier(&external_identifier)
    }

    fn notify(&self, unit: &LibraryUnit, record: &ImportRecord) -> Result<(), ImportError> {
        let new_lanes: Vec<&LaneImport> = record.new_lanes().collect();
        if new_lanes.is_empty() {
            return Ok(());
        }
        let mut body = format!(
            "Imported {} new lane(s) for library {}:\n",
            new_lanes.len(),
            unit.library_id
        );
        for lane in &new_lanes {
            body.push_str(&format!(
                "  {}_{} ({})\n",
                lane.flowcell_code, lane.lane_number, lane.run_date
            ));
        }
        let existing = self.ticket.comments(&unit.ticket)?;
        if existing.iter().any(|comment| *comment == body) {
            debug!(ticket = %unit.ticket, "status comment already posted");
            return Ok(());
        }
        self.ticket.add_comment(&unit.ticket, &body)
    }
}

fn lane_import(key: &crate::domain::LaneKey, new: bool) -> LaneImport {
    LaneImport {
        flowcell_code: key.flowcell_code.clone(),
        lane_number: key.lane_number.clone(),
        run_date: key.run_date,
        instrument: key.instrument,
        new,
    }
}
