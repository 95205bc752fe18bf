mod classify;
mod extract;
mod pattern;
mod reconcile;
mod report;
mod sqlgen;
mod store;
mod triage;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use classify::EnrollmentFootprint;
use reconcile::{reconcile_file, FileResult, GateStrategy, ReconcileOptions, RunMode};
use store::SqliteStore;

#[derive(Parser)]
#[command(name = "gradeimport")]
#[command(about = "Batch-import student grades from CSV extracts into the enrollment table")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile pending grade extracts against the enrollment table
    Run(RunArgs),
    /// Emit the conditional UPDATE statements to a file for manual execution
    GenSql(GenSqlArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Match the course family across all terms, gated on enrollment footprint
    Pattern,
    /// Rewrite one term's in-progress grades by term-id prefix
    TermPrefix,
}

impl From<StrategyArg> for GateStrategy {
    fn from(s: StrategyArg) -> GateStrategy {
        match s {
            StrategyArg::Pattern => GateStrategy::PatternAcrossAllTerms,
            StrategyArg::TermPrefix => GateStrategy::TermPrefixWithStatus,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Enrollment database path
    #[arg(long)]
    db: PathBuf,

    /// Directory holding pending extract CSVs
    #[arg(long, default_value = "extracted")]
    pending_dir: PathBuf,

    #[arg(long, default_value = "success")]
    success_dir: PathBuf,

    #[arg(long, default_value = "failed")]
    failed_dir: PathBuf,

    /// Execute updates; without this the run is a read-only dry run
    #[arg(long)]
    apply: bool,

    /// Process a single CSV instead of scanning the pending directory
    #[arg(long)]
    file: Option<PathBuf>,

    /// Process at most this many files
    #[arg(long)]
    limit: Option<usize>,

    /// Minimum match percentage for a file to proceed (fails below, not at)
    #[arg(long, default_value_t = 80.0)]
    min_match: f64,

    #[arg(long, value_enum, default_value_t = StrategyArg::Pattern)]
    strategy: StrategyArg,

    /// Explain each not-found record via per-condition probes (term-prefix
    /// dry runs; slower)
    #[arg(long)]
    diagnostic: bool,

    /// Also write the audit report to this path
    #[arg(long)]
    audit_report: Option<PathBuf>,

    /// Write machine-readable results (totals + per-file) to this path
    #[arg(long)]
    json_summary: Option<PathBuf>,

    /// Lower bound of the normal single-enrollment row footprint
    #[arg(long, default_value_t = 2)]
    footprint_min: u32,

    /// Upper bound of the normal single-enrollment row footprint
    #[arg(long, default_value_t = 3)]
    footprint_max: u32,
}

#[derive(Args)]
struct GenSqlArgs {
    /// Directory holding pending extract CSVs
    #[arg(long, default_value = "extracted")]
    pending_dir: PathBuf,

    /// Output .sql file
    #[arg(long, default_value = "grade_update_statements.sql")]
    output: PathBuf,

    #[arg(long, default_value_t = 2)]
    footprint_min: u32,

    #[arg(long, default_value_t = 3)]
    footprint_max: u32,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args) => cmd_run(args),
        Command::GenSql(args) => cmd_gen_sql(args).map(|_| true),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// Sorted pending extracts, `grades_extract_*.csv` only.
fn pending_files(dir: &Path, limit: Option<usize>) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read pending dir {}", dir.display()))?;
    let mut files: Vec<PathBuf> = Vec::new();
    for ent in entries {
        let p = ent?.path();
        if !p.is_file() {
            continue;
        }
        let name = p.file_name().and_then(|s| s.to_str()).unwrap_or("");
        if name.starts_with("grades_extract_") && name.ends_with(".csv") {
            files.push(p);
        }
    }
    files.sort();
    if let Some(n) = limit {
        files.truncate(n);
    }
    Ok(files)
}

fn cmd_run(args: RunArgs) -> Result<bool> {
    let mode = if args.apply {
        RunMode::Apply
    } else {
        RunMode::DryRun
    };
    info!(mode = mode.label(), db = %args.db.display(), "grade update run");

    let files = match &args.file {
        Some(f) => vec![f.clone()],
        None => pending_files(&args.pending_dir, args.limit)?,
    };
    if files.is_empty() {
        anyhow::bail!("no grade extract files found to process");
    }
    info!(count = files.len(), "extract file(s) to process");

    let opts = ReconcileOptions {
        mode,
        strategy: args.strategy.into(),
        min_match_percent: args.min_match,
        footprint: EnrollmentFootprint {
            min: args.footprint_min,
            max: args.footprint_max,
        },
        diagnostic: args.diagnostic,
        ..ReconcileOptions::default()
    };

    let mut results: Vec<FileResult> = Vec::new();
    for path in &files {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("<unnamed>")
            .to_string();
        info!(file = %name, "processing");
        let result = process_one(&args.db, path, &name, &opts);

        let verdict = triage::verdict_for(mode, result.success);
        if let Err(e) = triage::apply_verdict(path, verdict, &args.success_dir, &args.failed_dir) {
            warn!(file = %name, error = %e, "triage move failed");
        }
        results.push(result);
    }

    let generated_at = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let text = report::render_report(&results, mode, &generated_at);
    println!("{}", text);
    if let Some(p) = &args.audit_report {
        std::fs::write(p, &text).with_context(|| format!("write {}", p.display()))?;
        info!(path = %p.display(), "audit report saved");
    }
    if let Some(p) = &args.json_summary {
        let summary = serde_json::json!({
            "mode": mode.label(),
            "generated": generated_at,
            "totals": report::totals(&results),
            "files": results,
        });
        std::fs::write(p, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("write {}", p.display()))?;
        info!(path = %p.display(), "json summary saved");
    }

    Ok(results.iter().all(|r| r.success))
}

/// One file, one store: the connection opens here and drops on every exit
/// path before the next file starts.
fn process_one(db: &Path, path: &Path, name: &str, opts: &ReconcileOptions) -> FileResult {
    let attempt = (|| -> Result<FileResult> {
        let store = SqliteStore::open(db)?;
        let extracted = extract::read_grade_csv(path)?;
        Ok(reconcile_file(&store, name, &extracted, opts))
    })();
    attempt.unwrap_or_else(|e| {
        error!(file = name, error = %e, "processing failed");
        FileResult::failed(name, format!("{e:#}"))
    })
}

fn cmd_gen_sql(args: GenSqlArgs) -> Result<()> {
    let files = pending_files(&args.pending_dir, None)?;
    if files.is_empty() {
        anyhow::bail!("no grade extract files found to process");
    }
    let fp = EnrollmentFootprint {
        min: args.footprint_min,
        max: args.footprint_max,
    };
    let n = sqlgen::generate_sql_file(&files, &args.output, fp)?;
    info!(
        statements = n,
        output = %args.output.display(),
        "update statements written"
    );
    Ok(())
}
