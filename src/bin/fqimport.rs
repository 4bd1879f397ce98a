use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use fastq_import_manager::batch::BatchRunner;
use fastq_import_manager::catalog::{
    BlobStorageClient, CatalogHttpClient, ServerStorageClient, StorageClient,
};
use fastq_import_manager::config::{Config, ConfigLoader, StorageConfig};
use fastq_import_manager::error::ImportError;
use fastq_import_manager::lims::{LimsClient, LimsHttpClient};
use fastq_import_manager::orchestrator::{ImportOptions, ImportOrchestrator, ImportOutcome};
use fastq_import_manager::report;
use fastq_import_manager::seqcenter::SeqCenterHttpClient;
use fastq_import_manager::ticket::TicketHttpClient;

#[derive(Parser)]
#[command(name = "fqimport")]
#[command(about = "Reconcile and import sequencing-center fastqs into the dataset catalog")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Import every pending library and write the run report")]
    Run(RunArgs),
    #[command(about = "Validate one library end to end without persisting anything")]
    Check(CheckArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    /// Re-import lanes already in the catalog and correct stale external ids.
    #[arg(long)]
    update: bool,

    /// Stage and report without uploading or writing catalog records.
    #[arg(long)]
    dry_run: bool,

    /// Overrides the report destination from the config file.
    #[arg(long)]
    report_path: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct CheckArgs {
    #[arg(long)]
    config: Option<String>,

    /// LIMS library (pool) id to pre-flight.
    #[arg(long)]
    library: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(import) = report.downcast_ref::<ImportError>() {
            return ExitCode::from(map_exit_code(import));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ImportError) -> u8 {
    match error {
        ImportError::MissingConfig
        | ImportError::ConfigRead(_)
        | ImportError::ConfigParse(_) => 2,
        ImportError::SeqCenterHttp(_)
        | ImportError::SeqCenterStatus { .. }
        | ImportError::LimsHttp(_)
        | ImportError::LimsStatus { .. }
        | ImportError::CatalogHttp(_)
        | ImportError::CatalogStatus { .. }
        | ImportError::TicketHttp(_)
        | ImportError::TicketStatus { .. }
        | ImportError::PermanentQueryFailure(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_batch(args),
        Commands::Check(args) => run_check(args),
    }
}

fn run_batch(args: RunArgs) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    if let Some(report_path) = args.report_path {
        config.report_path = report_path;
    }

    let seqcenter = SeqCenterHttpClient::new(&config.seqcenter_base_url).into_diagnostic()?;
    let lims = LimsHttpClient::new(&config.lims_base_url).into_diagnostic()?;
    let catalog = CatalogHttpClient::new(&config.catalog_base_url).into_diagnostic()?;
    let ticket = TicketHttpClient::new(&config.ticket_base_url).into_diagnostic()?;
    let storage = build_storage(&config).into_diagnostic()?;

    let options = ImportOptions {
        update: args.update,
        dry_run: args.dry_run,
        check_library: false,
        upload_concurrency: config.upload_concurrency,
        duplicate_index_policy: config.duplicate_index_policy,
        unrecognized_pattern_policy: config.unrecognized_pattern_policy,
    };

    let runner = BatchRunner::new(
        &seqcenter,
        &lims,
        &catalog,
        &ticket,
        storage.as_ref(),
        config.recent_days,
    );
    let outcome = runner
        .run(&options, Local::now().date_naive())
        .into_diagnostic()?;
    report::write_report(&config.report_path, &outcome).into_diagnostic()?;

    println!(
        "imported {} libraries, {} failed; report at {}",
        outcome.successes.len(),
        outcome.failures.len(),
        config.report_path
    );
    Ok(())
}

fn run_check(args: CheckArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;

    let seqcenter = SeqCenterHttpClient::new(&config.seqcenter_base_url).into_diagnostic()?;
    let lims = LimsHttpClient::new(&config.lims_base_url).into_diagnostic()?;
    let catalog = CatalogHttpClient::new(&config.catalog_base_url).into_diagnostic()?;
    let ticket = TicketHttpClient::new(&config.ticket_base_url).into_diagnostic()?;
    let storage = build_storage(&config).into_diagnostic()?;

    let unit = lims
        .list_pending_units()
        .into_diagnostic()?
        .into_iter()
        .find(|unit| unit.library_id == args.library)
        .ok_or_else(|| miette::Report::msg(format!("library {} is not pending", args.library)))?;

    let options = ImportOptions {
        update: false,
        dry_run: false,
        check_library: true,
        upload_concurrency: config.upload_concurrency,
        duplicate_index_policy: config.duplicate_index_policy,
        unrecognized_pattern_policy: config.unrecognized_pattern_policy,
    };

    let orchestrator =
        ImportOrchestrator::new(&seqcenter, &lims, &catalog, &ticket, storage.as_ref());
    match orchestrator.import_unit(&unit, &options).into_diagnostic()? {
        ImportOutcome::Excluded => println!("{}: excluded from analysis", unit.library_id),
        ImportOutcome::NotFound => {
            println!("{}: no sequencing-center records yet", unit.library_id)
        }
        ImportOutcome::Imported(record) => {
            println!(
                "{} ({}): {} lanes, {} new",
                record.library_id,
                record.external_library_id,
                record.lanes.len(),
                record.new_lanes().count()
            );
            for lane in &record.lanes {
                let marker = if lane.new { "new" } else { "existing" };
                println!(
                    "  {}_{} {} {} ({marker})",
                    lane.flowcell_code, lane.lane_number, lane.run_date, lane.instrument
                );
            }
        }
    }
    Ok(())
}

fn build_storage(config: &Config) -> Result<Box<dyn StorageClient>, ImportError> {
    match &config.storage {
        StorageConfig::Blob {
            endpoint,
            container,
        } => Ok(Box::new(BlobStorageClient::new(endpoint, container)?)),
        StorageConfig::Server { root } => Ok(Box::new(ServerStorageClient::new(root.clone()))),
    }
}
