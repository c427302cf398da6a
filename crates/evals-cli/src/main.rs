//! Skill Evals - runs assistant evaluation scenarios.
//!
//! ## Commands
//!
//! - `run`: build each scenario's workspace, run the assistant, check the
//!   transcript, compare against the baseline and archive the run
//! - `promote`: accept an archived run as its scenario's new baseline

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use evals_core::{
    read_archive, BaselineStore, BaselineSummary, EvalConfig, FsArchiveStore, FsBaselineStore,
    InvokeContext, Scenario, ScenarioReport, ScenarioRunner,
};

#[derive(Parser)]
#[command(name = "skill-evals")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluation harness for an autonomous coding assistant", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and a JSON report
    #[arg(long, global = true)]
    json: bool,

    /// Harness configuration file (TOML)
    #[arg(long, global = true, env = "EVALS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one or more scenario definition files
    Run {
        /// Scenario files (TOML)
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Maximum scenarios run concurrently
        #[arg(long)]
        parallel: Option<usize>,

        /// Per-invocation deadline in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Leave workspaces on disk after each run
        #[arg(long)]
        keep_workspaces: bool,

        /// Fixture store root
        #[arg(long)]
        fixtures_dir: Option<PathBuf>,

        /// Archive root
        #[arg(long)]
        archive_dir: Option<PathBuf>,

        /// Baseline root
        #[arg(long)]
        baseline_dir: Option<PathBuf>,
    },

    /// Promote an archived run to be its scenario's baseline
    Promote {
        /// Archived run file (`<archive>/<scenario>/<stamp>.json`)
        #[arg(long)]
        archive: PathBuf,

        /// Baseline root
        #[arg(long)]
        baseline_dir: Option<PathBuf>,
    },
}

/// CLI flags that override file and environment configuration.
#[derive(Debug, Default)]
struct Overrides {
    parallel: Option<usize>,
    timeout_secs: Option<u64>,
    keep_workspaces: bool,
    fixtures_dir: Option<PathBuf>,
    archive_dir: Option<PathBuf>,
    baseline_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    evals_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            scenarios,
            parallel,
            timeout_secs,
            keep_workspaces,
            fixtures_dir,
            archive_dir,
            baseline_dir,
        } => {
            let overrides = Overrides {
                parallel,
                timeout_secs,
                keep_workspaces,
                fixtures_dir,
                archive_dir,
                baseline_dir,
            };
            let config = load_config(cli.config.as_deref(), overrides)?;
            cmd_run(config, &scenarios, cli.json).await
        }
        Commands::Promote {
            archive,
            baseline_dir,
        } => {
            let overrides = Overrides {
                baseline_dir,
                ..Overrides::default()
            };
            let config = load_config(cli.config.as_deref(), overrides)?;
            cmd_promote(&config, &archive).await
        }
    }
}

/// Defaults, then the config file, then `EVALS_*` variables, then flags.
fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<EvalConfig> {
    let base = match path {
        Some(path) => EvalConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EvalConfig::default(),
    };
    let config = base
        .with_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid EVALS_* environment override")?;
    apply_overrides(config, overrides)
}

fn apply_overrides(mut config: EvalConfig, overrides: Overrides) -> Result<EvalConfig> {
    if let Some(n) = overrides.parallel {
        config.max_parallel = n;
    }
    if let Some(secs) = overrides.timeout_secs {
        config.timeout_secs = secs;
    }
    if overrides.keep_workspaces {
        config.keep_workspaces = true;
    }
    if let Some(dir) = overrides.fixtures_dir {
        config.fixtures_dir = dir;
    }
    if let Some(dir) = overrides.archive_dir {
        config.archive_dir = dir;
    }
    if let Some(dir) = overrides.baseline_dir {
        config.baseline_dir = dir;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Run scenarios and print a report. Fails if any scenario failed.
async fn cmd_run(config: EvalConfig, paths: &[PathBuf], json: bool) -> Result<()> {
    let scenarios = paths
        .iter()
        .map(|p| {
            Scenario::load(p).with_context(|| format!("Failed to load scenario {}", p.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let archive = FsArchiveStore::new(&config.archive_dir);
    let runner = ScenarioRunner::from_config(config);

    let ctx = InvokeContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping running scenarios");
            interrupt.cancel();
        }
    });

    info!(scenarios = scenarios.len(), version = evals_core::VERSION, "starting evaluation");
    let results = runner.run_all_with_context(&ctx, scenarios).await;

    let mut failed = 0usize;
    let mut reports = Vec::new();
    for (id, result) in &results {
        match result {
            Ok(report) => {
                if !report.passed() {
                    failed += 1;
                }
                if !json {
                    print_report(report, &archive);
                }
                reports.push(serde_json::to_value(report)?);
            }
            Err(e) => {
                failed += 1;
                if !json {
                    println!("ERROR {id}: {e}");
                }
                reports.push(serde_json::json!({ "scenario_id": id, "error": e.to_string() }));
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        println!("\n{} scenario(s), {} failed", results.len(), failed);
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} scenario(s) failed", results.len());
    }
    Ok(())
}

fn print_report(report: &ScenarioReport, archive: &FsArchiveStore) {
    if report.skipped {
        println!("SKIP  {} (short mode)", report.scenario_id);
        return;
    }
    let verdict = if report.passed() { "PASS" } else { "FAIL" };
    match &report.run {
        Some(run) => println!(
            "{verdict}  {} ({}ms, {} events, status {})",
            report.scenario_id,
            run.timing.duration_ms,
            run.events.len(),
            run.status.as_str()
        ),
        None => println!("{verdict}  {}", report.scenario_id),
    }
    for failure in report.failures() {
        println!("      - {failure}");
    }
    if let Some(key) = &report.archive_key {
        println!("      archived: {}", archive.path_for(key).display());
    }
    if let Some(e) = &report.archive_error {
        println!("      archive failed: {e}");
    }
    if let Some(path) = &report.kept_workspace {
        println!("      workspace kept: {}", path.display());
    }
}

/// Verify an archived run and make it the scenario's baseline.
async fn cmd_promote(config: &EvalConfig, archive: &Path) -> Result<()> {
    let record = read_archive(archive)
        .with_context(|| format!("Failed to read archived run {}", archive.display()))?;
    let Some(report) = &record.assertions else {
        anyhow::bail!(
            "Archived run {} has no assertion results (invocation failed: {}); refusing to promote",
            record.run.run_id,
            record.invocation_error.as_deref().unwrap_or("unknown")
        );
    };

    let summary = BaselineSummary::from_run(record.scenario_id.clone(), &record.run, report);
    let store = FsBaselineStore::new(&config.baseline_dir);
    store
        .promote(summary)
        .await
        .with_context(|| format!("Failed to promote baseline for {}", record.scenario_id))?;

    println!(
        "Promoted run {} as baseline for {} ({})",
        record.run.run_id,
        record.scenario_id,
        store.path_for(&record.scenario_id).display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use evals_core::{
        ArchiveRecord, ArchiveStore, AssertionReport, Event, Expectation, RunResult, RunStatus,
        RunTiming, ScenarioId, SessionInfo,
    };

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "skill-evals",
            "--json",
            "run",
            "scenarios/review.toml",
            "scenarios/other.toml",
            "--parallel",
            "2",
            "--keep-workspaces",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                scenarios,
                parallel,
                keep_workspaces,
                ..
            } => {
                assert_eq!(scenarios.len(), 2);
                assert_eq!(parallel, Some(2));
                assert!(keep_workspaces);
            }
            Commands::Promote { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_requires_a_scenario() {
        assert!(Cli::try_parse_from(["skill-evals", "run"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let config = apply_overrides(
            EvalConfig::default(),
            Overrides {
                parallel: Some(1),
                timeout_secs: Some(30),
                keep_workspaces: true,
                archive_dir: Some(PathBuf::from("/tmp/archive")),
                ..Overrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.max_parallel, 1);
        assert_eq!(config.timeout_secs, 30);
        assert!(config.keep_workspaces);
        assert_eq!(config.archive_dir, PathBuf::from("/tmp/archive"));

        let invalid = apply_overrides(
            EvalConfig::default(),
            Overrides {
                parallel: Some(0),
                ..Overrides::default()
            },
        );
        assert!(invalid.is_err());
    }

    fn archived_run() -> RunResult {
        let now = chrono::Utc::now();
        RunResult {
            run_id: uuid::Uuid::new_v4(),
            instruction: "review".to_string(),
            workspace: PathBuf::from("/tmp/ws"),
            events: vec![Event::skill("review"), Event::text("go vet is missing")],
            final_output: "go vet is missing".to_string(),
            status: RunStatus::Succeeded,
            exit_code: Some(0),
            session: SessionInfo::default(),
            timing: RunTiming {
                started_at: now,
                finished_at: now,
                duration_ms: 42,
            },
            stderr_tail: String::new(),
        }
    }

    #[tokio::test]
    async fn test_promote_archived_run() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsArchiveStore::new(dir.path().join("output"));
        let run = archived_run();
        let report = AssertionReport::evaluate(&run, &[Expectation::output_mentions("go vet")]);
        let id = ScenarioId::new("review-gha").unwrap();
        let key = archive
            .put(&ArchiveRecord::new(id.clone(), run.clone()).with_assertions(report))
            .await
            .unwrap();

        let config = EvalConfig {
            baseline_dir: dir.path().join("baselines"),
            ..EvalConfig::default()
        };
        cmd_promote(&config, &archive.path_for(&key)).await.unwrap();

        let baseline = FsBaselineStore::new(&config.baseline_dir)
            .latest(&id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(baseline.run_id, run.run_id);
        assert!(baseline.passing.contains("output_mentions:go vet"));
    }

    #[tokio::test]
    async fn test_promote_refuses_timed_out_run() {
        let dir = tempfile::tempdir().unwrap();
        let archive = FsArchiveStore::new(dir.path());
        let mut run = archived_run();
        run.status = RunStatus::TimedOut;
        let key = archive
            .put(
                &ArchiveRecord::new(ScenarioId::new("slow").unwrap(), run)
                    .with_invocation_error("deadline exceeded"),
            )
            .await
            .unwrap();
        let config = EvalConfig {
            baseline_dir: dir.path().join("baselines"),
            ..EvalConfig::default()
        };
        assert!(cmd_promote(&config, &archive.path_for(&key)).await.is_err());
    }
}
