use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use trellis_core::domain::{AnalysisReport, Finding, Severity};
use trellis_core::{
    Analyzer, AnalyzerContext, AnalyzerError, ControlApi, EngineBuilder, JobId, JobSpec, Outcome,
    SchedulerConfig,
};

/// Run a batch of simulated analysis jobs through the trellis scheduler.
#[derive(Debug, Parser)]
#[command(name = "trellis", version, about)]
struct Cli {
    /// Targets to analyze.
    #[arg(long, env = "TRELLIS_TARGETS", value_delimiter = ',', default_value = "api,web")]
    targets: Vec<String>,

    /// Sub-targets applied to every target.
    #[arg(long, env = "TRELLIS_SUB_TARGETS", value_delimiter = ',', default_value = "1,2")]
    sub_targets: Vec<u32>,

    /// Analysis kinds to run.
    #[arg(long, env = "TRELLIS_KINDS", value_delimiter = ',', default_value = "security,performance")]
    kinds: Vec<String>,

    /// Kinds whose analyzer may be missing without failing the job.
    #[arg(long, value_delimiter = ',')]
    optional: Vec<String>,

    /// Kinds whose simulated tool reports itself unavailable.
    #[arg(long, value_delimiter = ',')]
    unavailable: Vec<String>,

    /// Scheduler config (JSON). Flags below override it.
    #[arg(long, env = "TRELLIS_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "TRELLIS_MAX_JOBS")]
    max_jobs: Option<usize>,

    #[arg(long, env = "TRELLIS_MAX_TASKS")]
    max_tasks: Option<usize>,

    /// Per-task timeout for the submitted jobs, in seconds.
    #[arg(long)]
    task_timeout: Option<u64>,

    /// How many identical jobs to submit.
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Mean simulated analysis time per task.
    #[arg(long, default_value_t = 300)]
    delay_ms: u64,

    /// Probability that a simulated task fails.
    #[arg(long, default_value_t = 0.0)]
    fail_rate: f64,
}

/// Sleeps, reports progress and invents a few findings.
struct SimulatedAnalyzer {
    kind: String,
    delay: Duration,
    fail_rate: f64,
    available: bool,
}

const STEPS: u32 = 4;

#[async_trait]
impl Analyzer for SimulatedAnalyzer {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn check_available(&self) -> Result<(), String> {
        if self.available {
            Ok(())
        } else {
            Err(format!("{} tool not found on PATH", self.kind))
        }
    }

    async fn execute(&self, ctx: AnalyzerContext) -> Result<Outcome, AnalyzerError> {
        // ThreadRng is not Send; draw everything before the first await
        let (jitter, fails, findings) = {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.5..1.5);
            let fails = rng.gen_bool(self.fail_rate.clamp(0.0, 1.0));
            let findings: Vec<Finding> = (0..rng.gen_range(0..4))
                .map(|i| {
                    let severity = match rng.gen_range(0..5) {
                        0 => Severity::Critical,
                        1 => Severity::High,
                        2 => Severity::Medium,
                        3 => Severity::Low,
                        _ => Severity::Info,
                    };
                    Finding::new(severity, format!("{} finding #{i}", self.kind))
                })
                .collect();
            (jitter, fails, findings)
        };

        let step = self.delay.mul_f64(jitter) / STEPS;
        for n in 1..=STEPS {
            tokio::select! {
                _ = tokio::time::sleep(step) => {}
                _ = ctx.cancel_token.cancelled() => return Ok(Outcome::Cancelled),
            }
            ctx.progress.report((n * 100 / STEPS) as u8);
        }

        if fails {
            return Err(AnalyzerError::Execution(format!(
                "{} crashed on {}#{}",
                self.kind, ctx.target, ctx.sub_target
            )));
        }

        let report = findings.into_iter().fold(
            AnalysisReport::new(serde_json::json!({
                "target": ctx.target,
                "sub_target": ctx.sub_target,
                "options": ctx.options,
            })),
            AnalysisReport::with_finding,
        );
        Ok(Outcome::Completed(report))
    }
}

fn load_config(cli: &Cli) -> Result<SchedulerConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => SchedulerConfig::from_json_file(path)?,
        None => SchedulerConfig::default(),
    };
    if let Some(n) = cli.max_jobs {
        config.max_concurrent_jobs = n;
    }
    if let Some(n) = cli.max_tasks {
        config.max_concurrent_tasks_per_job = n;
    }
    Ok(config)
}

async fn all_finished(api: &ControlApi, job_ids: &[JobId]) -> Result<bool, Box<dyn std::error::Error>> {
    for job_id in job_ids {
        let status = api.job_status(*job_id).await?;
        info!(
            job_id = %job_id,
            status = ?status.job.status,
            completed = status.progress.completed,
            total = status.progress.total,
            percent = status.progress.percent,
            "progress"
        );
        if !status.job.status.is_terminal() {
            return Ok(false);
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // one simulated analyzer per kind
    let mut builder = EngineBuilder::new().with_config(config);
    for kind in &cli.kinds {
        builder = builder.register(SimulatedAnalyzer {
            kind: kind.clone(),
            delay: Duration::from_millis(cli.delay_ms),
            fail_rate: cli.fail_rate,
            available: !cli.unavailable.contains(kind),
        })?;
    }
    let scheduler = builder.build()?;
    let api = ControlApi::new(scheduler.clone());

    // jobs over the running-jobs cap stay Queued
    let mut job_ids = Vec::with_capacity(cli.jobs);
    for _ in 0..cli.jobs {
        let mut spec = JobSpec::new(cli.targets.clone(), &cli.sub_targets, cli.kinds.clone());
        for kind in &cli.optional {
            spec = spec.with_optional_kind(kind.clone());
        }
        if let Some(secs) = cli.task_timeout {
            spec = spec.with_task_timeout_secs(secs);
        }
        let submitted = api.submit_job(spec).await?;
        let started = api.start_job(submitted.job_id).await?;
        info!(
            job_id = %submitted.job_id,
            total_tasks = submitted.total_tasks,
            started = started.started,
            "job submitted"
        );
        job_ids.push(submitted.job_id);
    }

    // poll until every job is terminal; Ctrl-C cancels them all
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            _ = &mut ctrl_c, if !interrupted => {
                warn!("interrupted, cancelling jobs");
                interrupted = true;
                for job_id in &job_ids {
                    api.cancel_job(*job_id).await?;
                }
            }
        }
        if all_finished(&api, &job_ids).await? {
            break;
        }
    }

    for job_id in &job_ids {
        let status = api.job_status(*job_id).await?;
        println!("{}", serde_json::to_string_pretty(&status)?);
        let results = api.job_results(*job_id).await?;
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    scheduler.shutdown().await?;
    Ok(())
}
