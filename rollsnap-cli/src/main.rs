/*!
Rollsnap CLI - rolling EBS volume snapshots with tiered retention.

Run `rollsnap rotate` once a day (e.g. from cron) per volume. Each run takes a
new snapshot and deletes the snapshots of the same series that fall outside the
daily, weekly and monthly retention windows.
*/

use anyhow::{bail, Context};
use chrono::{Datelike, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use rollsnap_core::observability::{init_observability, RotationMetrics};
use rollsnap_core::{
    create_ec2_rotator, retained_dates, PruneReport, RetentionPolicy, RotationConfig,
    SnapshotRecord,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "rollsnap")]
#[command(about = "Rolling EBS volume snapshots with daily, weekly and monthly retention")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Snapshot a volume and prune its series
    Rotate {
        #[command(flatten)]
        series: SeriesArgs,

        /// Freeze this filesystem while the snapshot is started
        #[arg(long = "freezedir", env = "ROLLSNAP_FREEZE_DIR")]
        freeze_dir: Option<PathBuf>,

        /// Log what would happen without creating or deleting anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Write Prometheus metrics to this file after the run
        #[arg(long, env = "ROLLSNAP_METRICS_FILE")]
        metrics_file: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show each snapshot of a series and whether the policy keeps it
    List {
        #[command(flatten)]
        series: SeriesArgs,

        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the dates a policy retains, without contacting AWS
    Plan {
        /// Maximum number of snapshots to keep
        #[arg(short = 'm', long = "max-snapshots")]
        max_snapshots: u32,

        /// Daily snapshots to keep (default: the remainder of the maximum)
        #[arg(long)]
        daily: Option<u32>,

        /// Weekly snapshots to keep (default: a quarter of the maximum)
        #[arg(long = "max-weekly-snapshots")]
        weekly: Option<u32>,

        /// Monthly snapshots to keep (default: a quarter of the maximum)
        #[arg(long = "max-monthly-snapshots")]
        monthly: Option<u32>,

        /// Plan as of this UTC date (YYYY-MM-DD)
        #[arg(long)]
        today: Option<NaiveDate>,
    },
}

/// Identifies a snapshot series and its retention policy
#[derive(Args, Debug)]
struct SeriesArgs {
    /// Load settings from a JSON file; flags given here override it
    #[arg(long, env = "ROLLSNAP_CONFIG")]
    config: Option<PathBuf>,

    /// Volume to snapshot (e.g. vol-06f30e77)
    #[arg(short = 'v', long, env = "ROLLSNAP_VOLUME")]
    volume: Option<String>,

    /// Snapshot description; identifies the series
    #[arg(short = 'd', long, env = "ROLLSNAP_DESCRIPTION")]
    description: Option<String>,

    /// Maximum number of snapshots to keep
    #[arg(short = 'm', long = "max-snapshots", env = "ROLLSNAP_MAX_SNAPSHOTS")]
    max_snapshots: Option<u32>,

    /// Daily snapshots to keep (default: the remainder of the maximum)
    #[arg(long)]
    daily: Option<u32>,

    /// Weekly snapshots to keep (default: a quarter of the maximum)
    #[arg(long = "max-weekly-snapshots")]
    weekly: Option<u32>,

    /// Monthly snapshots to keep (default: a quarter of the maximum)
    #[arg(long = "max-monthly-snapshots")]
    monthly: Option<u32>,

    /// Rotate as of this UTC date (YYYY-MM-DD) instead of today
    #[arg(long)]
    today: Option<NaiveDate>,

    /// AWS region
    #[arg(long, env = "AWS_REGION")]
    region: Option<String>,

    /// AWS shared-config profile
    #[arg(long, env = "AWS_PROFILE")]
    profile: Option<String>,

    /// Override the EC2 endpoint (e.g. a local emulator)
    #[arg(long, env = "ROLLSNAP_ENDPOINT_URL")]
    endpoint_url: Option<String>,
}

impl SeriesArgs {
    /// Merge the config file (if any) with explicit flags
    fn into_config(self) -> anyhow::Result<RotationConfig> {
        let from_file = self.config.is_some();
        let mut config = match &self.config {
            Some(path) => RotationConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => RotationConfig::new("", "", 0),
        };

        if let Some(volume) = self.volume {
            config.volume_id = volume;
        }
        if let Some(description) = self.description {
            config.description = description;
        }
        match self.max_snapshots {
            Some(max) => config.max_snapshots = max,
            None if !from_file => bail!("--max-snapshots is required"),
            None => {}
        }
        if config.volume_id.is_empty() {
            bail!("--volume is required");
        }
        if config.description.is_empty() {
            bail!("--description is required");
        }

        config.daily = self.daily.or(config.daily);
        config.weekly = self.weekly.or(config.weekly);
        config.monthly = self.monthly.or(config.monthly);
        config.today = self.today.or(config.today);
        config.ec2.region = self.region.or(config.ec2.region);
        config.ec2.profile = self.profile.or(config.ec2.profile);
        config.ec2.endpoint_url = self.endpoint_url.or(config.ec2.endpoint_url);

        config.validate()?;
        Ok(config)
    }
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "Snapshot")]
    id: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Action")]
    action: String,
}

#[derive(Tabled)]
struct RetainedRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Weekday")]
    weekday: String,
    #[tabled(rename = "Kept as")]
    tiers: String,
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_observability(cli.log_json, cli.verbose)?;

    let result = match cli.command {
        Commands::Rotate {
            series,
            freeze_dir,
            dry_run,
            metrics_file,
            json,
        } => series.into_config().and_then(|mut config| {
            if freeze_dir.is_some() {
                config.freeze_dir = freeze_dir;
            }
            config.dry_run |= dry_run;
            rotate(&config, metrics_file.as_deref(), json)
        }),
        Commands::List { series, json } => series
            .into_config()
            .and_then(|config| list_series(&config, json)),
        Commands::Plan {
            max_snapshots,
            daily,
            weekly,
            monthly,
            today,
        } => plan(max_snapshots, daily, weekly, monthly, today),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn rotate(config: &RotationConfig, metrics_file: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let rotator = create_ec2_rotator(config)?;
    let outcome = rotator.run(config);

    if let Some(path) = metrics_file {
        write_metrics(path)?;
    }
    let report = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let verb = if report.dry_run { "Would create" } else { "Created" };
    println!(
        "{verb} {} from {} ({})",
        report.created.snapshot_id, report.created.volume_id, report.created.state
    );
    print_snapshots(&report.pruned, report.dry_run);
    Ok(())
}

fn list_series(config: &RotationConfig, json: bool) -> anyhow::Result<()> {
    info!(volume_id = %config.volume_id, "Listing snapshot series");

    let rotator = create_ec2_rotator(config)?;
    let preview = rotator.preview(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else if preview.kept.is_empty() && preview.deleted.is_empty() {
        println!("No snapshots found");
    } else {
        print_snapshots(&preview, true);
    }
    Ok(())
}

fn plan(
    max_snapshots: u32,
    daily: Option<u32>,
    weekly: Option<u32>,
    monthly: Option<u32>,
    today: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let policy = RetentionPolicy::from_max(max_snapshots, daily, weekly, monthly)?;
    let today = today.unwrap_or_else(|| Utc::now().date_naive());

    let by_daily = retained_dates(today, policy.daily(), 0, 0);
    let by_weekly = retained_dates(today, 0, policy.weekly(), 0);
    let by_monthly = retained_dates(today, 0, 0, policy.monthly());
    let tiers = |date: &NaiveDate| {
        [("daily", &by_daily), ("weekly", &by_weekly), ("monthly", &by_monthly)]
            .iter()
            .filter(|(_, set)| set.contains(date))
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let rows: Vec<RetainedRow> = policy
        .retained_dates(today)
        .iter()
        .rev()
        .map(|date| RetainedRow {
            date: date.to_string(),
            weekday: date.weekday().to_string(),
            tiers: tiers(date),
        })
        .collect();

    println!(
        "Policy as of {today}: daily={}, weekly={}, monthly={}",
        policy.daily(),
        policy.weekly(),
        policy.monthly()
    );
    println!("{}", Table::new(rows));
    Ok(())
}

fn print_snapshots(report: &PruneReport, dry_run: bool) {
    let delete = if dry_run { "would delete" } else { "deleted" };
    let mut rows: Vec<(&SnapshotRecord, &str)> = report
        .kept
        .iter()
        .map(|s| (s, "keep"))
        .chain(report.deleted.iter().map(|s| (s, delete)))
        .collect();
    rows.sort_by(|a, b| b.0.started_at.cmp(&a.0.started_at));

    let rows: Vec<SnapshotRow> = rows
        .into_iter()
        .map(|(s, action)| SnapshotRow {
            id: s.snapshot_id.clone(),
            date: s.creation_date().to_string(),
            state: s.state.to_string(),
            action: action.to_string(),
        })
        .collect();

    println!("{}", Table::new(rows));
    let kept: BTreeSet<NaiveDate> = report.kept.iter().map(|s| s.creation_date()).collect();
    println!(
        "{} kept across {} dates, {} {delete}",
        report.kept.len(),
        kept.len(),
        report.deleted.len()
    );
}

fn write_metrics(path: &Path) -> anyhow::Result<()> {
    let text = RotationMetrics::global().gather_metrics()?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    Ok(())
}
