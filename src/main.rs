use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use ledger_aging::{
    load_snapshot, save_run, setup_database, EngineConfig, ReconciliationPipeline, RunReport,
};
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "Usage: ledger-aging run <feed-dir> [--as-of YYYY-MM-DD] [--config FILE] \
[--db FILE] [--window-start YYYY-MM-DD] [--timeout-secs N]";

#[derive(Debug, Default)]
struct RunArgs {
    feed_dir: PathBuf,
    as_of: Option<NaiveDate>,
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    window_start: Option<NaiveDate>,
    timeout_secs: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() > 2 && args[1] == "run" {
        let run_args = parse_run_args(&args[2..])?;
        run(run_args)?;
    } else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    Ok(())
}

fn parse_date(flag: &str, value: Option<&String>) -> Result<NaiveDate> {
    let value = value.with_context(|| format!("{} needs a value", flag))?;
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("{} expects YYYY-MM-DD, got {}", flag, value))
}

fn parse_run_args(args: &[String]) -> Result<RunArgs> {
    let mut run_args = RunArgs {
        feed_dir: PathBuf::from(&args[0]),
        ..Default::default()
    };

    let mut rest = args[1..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--as-of" => run_args.as_of = Some(parse_date(flag, rest.next())?),
            "--window-start" => run_args.window_start = Some(parse_date(flag, rest.next())?),
            "--config" => {
                run_args.config = Some(PathBuf::from(rest.next().context("--config needs a value")?))
            }
            "--db" => run_args.db = Some(PathBuf::from(rest.next().context("--db needs a value")?)),
            "--timeout-secs" => {
                let value = rest.next().context("--timeout-secs needs a value")?;
                run_args.timeout_secs =
                    Some(value.parse().with_context(|| format!("Invalid timeout: {}", value))?);
            }
            other => bail!("Unknown option {}\n{}", other, USAGE),
        }
    }

    Ok(run_args)
}

fn build_config(args: &RunArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => {
            let as_of = args
                .as_of
                .context("--as-of is required when no --config is given")?;
            EngineConfig::for_date(as_of)
        }
    };

    // Flags override the file
    if let Some(as_of) = args.as_of {
        config.as_of_date = as_of;
    }
    if args.window_start.is_some() {
        config.window_start = args.window_start;
    }
    if args.timeout_secs.is_some() {
        config.run_timeout_secs = args.timeout_secs;
    }

    Ok(config)
}

fn run(args: RunArgs) -> Result<()> {
    println!("🧾 Ledger Aging - Reconciliation Run");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = build_config(&args)?;

    // 1. Load feeds
    println!("\n📂 Loading feeds from {:?}...", args.feed_dir);
    let snapshot = load_snapshot(&args.feed_dir)?;
    println!(
        "✓ {} procedures, {} payments, {} claim lines, {} adjustments",
        snapshot.procedures.len(),
        snapshot.payments.len(),
        snapshot.claim_lines.len(),
        snapshot.adjustments.len()
    );

    // 2. Run
    println!("\n⚖️  Reconciling as of {}...", config.as_of_date);
    let pipeline = ReconciliationPipeline::new(config)?;
    let report = pipeline.run(&snapshot)?;
    print_report(&report);

    // 3. Persist
    if let Some(db_path) = &args.db {
        persist(db_path, &report)?;
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if report.summary.requires_review() {
        println!("⚠️  Review required before using this report for collections");
    } else {
        println!("✅ Run complete");
    }

    Ok(())
}

fn persist(db_path: &Path, report: &RunReport) -> Result<()> {
    println!("\n💾 Writing results to {:?}...", db_path);
    let mut conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;
    setup_database(&conn)?;
    let rows = save_run(&mut conn, report, "ledger-aging-cli")?;
    println!("✓ {} rows written for run {}", rows, report.run_id);
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("✓ {}", report.summary_line());
    println!("✓ {}", report.integrity.summary());
    println!("✓ {}", report.prepayments.summary());
    println!("✓ {}", report.summary.summary());

    let collections = report.aging.collections_families();
    if !collections.is_empty() {
        println!("\n🚩 Families flagged for collections: {}", collections.len());
        for bucket in collections.iter().take(10) {
            let review = if bucket.under_integrity_review {
                " [under review]"
            } else {
                ""
            };
            println!(
                "   {} ${:.2} (91+: ${:.2}, oldest {} days){}",
                bucket.subject_id,
                bucket.total(),
                bucket.bucket_91_plus,
                bucket.oldest_balance_days,
                review
            );
        }
    }

    for anomaly in &report.integrity.anomalies {
        println!("🛡️  {}", anomaly.summary());
    }
}
