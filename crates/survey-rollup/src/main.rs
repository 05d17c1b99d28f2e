//! Survey Rollup Report CLI
//!
//! Prints filtered totals, per-region cards and belt rollups for a snapshot
//! document.
//!
//! Usage:
//!   survey-report --snapshot data/snapshot.json \
//!                 --region jazan --from 2024-01-01 --to 2024-03-31 \
//!                 --output data/breakdown.json

use anyhow::Result;
use chrono::NaiveDate;
use clap::Parser;
use epi_belts::BeltClassifier;
use survey_rollup::{belt_rollup, breakdown, JsonFileStore, RollupResult, SnapshotStore, SurveyFilter, SurveyStatus};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "survey-report", about = "Roll up field surveillance surveys by region, governorate and risk belt")]
struct Args {
    /// Snapshot JSON document (seed data is used when it does not exist)
    #[arg(short, long, default_value = "data/snapshot.json")]
    snapshot: PathBuf,

    /// Belt tables JSON; built-in tables when omitted
    #[arg(short, long)]
    belts: Option<PathBuf>,

    /// Restrict to one region id
    #[arg(long)]
    region: Option<String>,

    /// Restrict to one governorate id
    #[arg(long)]
    governorate: Option<String>,

    /// Inclusive start date (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,

    /// Inclusive end date (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,

    /// planned | in_progress | completed | cancelled
    #[arg(long)]
    status: Option<SurveyStatus>,

    /// Write the full breakdown as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn log_rollup(label: &str, rollup: &RollupResult) {
    info!(
        "{:32} | surveys {:5} | samples {:8} | positive {:6} | prevalence {:>6}%",
        label,
        rollup.total_survey_count,
        rollup.total_samples,
        rollup.total_positive_samples,
        rollup.overall_prevalence_rate
    );
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("Field Survey Rollup Report");
    info!("{}", "=".repeat(60));

    let snapshot = JsonFileStore::new(&args.snapshot).load()?;
    let classifier = match &args.belts {
        Some(path) => BeltClassifier::from_path(path)?,
        None => BeltClassifier::with_defaults(),
    };

    let filter = SurveyFilter {
        region_id: args.region.clone(),
        governorate_id: args.governorate.clone(),
        date_from: args.from,
        date_to: args.to,
        status: args.status,
    };
    debug!("Filter: {:?}", filter);

    let report = breakdown(&snapshot, &filter, &classifier)?;

    info!("\nSnapshot v{} | belt tables {}", report.snapshot_version, report.belt_tables_version);
    log_rollup("TOTAL", &report.total);
    info!(
        "  livestock: sheep {} cattle {} horses {} camels {} goats {} (total {})",
        report.total.livestock.sheep,
        report.total.livestock.cattle,
        report.total.livestock.horses,
        report.total.livestock.camels,
        report.total.livestock.goats,
        report.total.total_livestock
    );

    info!("\nRegions:");
    for region in &report.regions {
        log_rollup(&region.name_en, &region.rollup);
        for gov in &region.governorates {
            log_rollup(&format!("  {} [{}]", gov.name_en, gov.belt.belt), &gov.rollup);
        }
    }

    info!("\nRisk belts:");
    for group in belt_rollup(&snapshot, &filter, &classifier)? {
        log_rollup(
            &format!("{} ({} governorates)", group.risk_label, group.governorate_count),
            &group.rollup,
        );
    }

    if let Some(output) = &args.output {
        info!("\nWriting breakdown to {:?}", output);
        let file = File::create(output)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &report)?;
    }

    Ok(())
}
