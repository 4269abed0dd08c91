//! Run command implementation

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::io::IsTerminal;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::error::{status_exit_code, CliError, EXIT_OK};
use crate::input::{scan, CsvItems, InputError, ParseSummary};
use crate::quota::PauseController;
use crate::runner::config::{
    DEFAULT_CONCURRENCY, DEFAULT_LOG_INTERVAL, DEFAULT_PAUSE_THRESHOLD, MAX_CONCURRENCY,
};
use crate::runner::{Orchestrator, RunConfig, RunReport};
use crate::service::openai::{request_body, OpenAiService};
use crate::shutdown::SharedShutdown;
use crate::sink::{JsonlSink, OpenMode};
use crate::WorkItem;

/// Payloads shown by `--dry-run`
const DRY_RUN_PREVIEW: usize = 5;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("max workers must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "max workers {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Bulk artist biography generation CLI
#[derive(Parser, Debug)]
#[command(name = "bio-batch")]
#[command(about = "Generate artist biographies in bulk against a quota-limited API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// CSV file with `id,name[,data]` rows
    #[arg(long, short = 'i')]
    pub input_file: PathBuf,

    /// JSON Lines output file
    #[arg(long, short = 'o', default_value = "out.jsonl")]
    pub output: PathBuf,

    /// Skip items already present in the output file and append to it
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Parse the input and show the first payloads without calling the API
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Number of concurrent requests (default: 4, max: 32)
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, value_parser = parse_concurrency)]
    pub max_workers: usize,

    /// Stored prompt id
    #[arg(long, env = "OPENAI_PROMPT_ID")]
    pub prompt_id: Option<String>,

    /// Stored prompt version
    #[arg(long)]
    pub prompt_version: Option<String>,

    /// API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Organization the requests are billed to
    #[arg(long, env = "OPENAI_ORG_ID")]
    pub openai_org_id: Option<String>,

    /// Pause dispatch on quota pressure (usage is tracked either way)
    #[arg(
        long,
        env = "QUOTA_MONITORING",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub quota_monitoring: bool,

    /// Session budget usage (0.1-1.0) at which dispatch pauses
    #[arg(long, env = "QUOTA_THRESHOLD", default_value_t = DEFAULT_PAUSE_THRESHOLD)]
    pub quota_threshold: f64,

    /// Requests allowed per day before the threshold applies
    #[arg(long, env = "DAILY_REQUEST_LIMIT")]
    pub daily_limit: Option<u64>,

    /// Hours to pause when quota runs low (1-72)
    #[arg(long, env = "PAUSE_DURATION_HOURS", default_value_t = 24)]
    pub pause_duration_hours: u64,

    /// Log progress and quota every N completed items
    #[arg(long, env = "QUOTA_LOG_INTERVAL", default_value_t = DEFAULT_LOG_INTERVAL)]
    pub quota_log_interval: u64,

    /// File where quota usage is kept between runs
    #[arg(long, env = "QUOTA_STATE_PATH")]
    pub quota_state: Option<PathBuf>,

    /// Seconds in-flight items get to finish after Ctrl+C
    #[arg(long, default_value_t = 30)]
    pub grace_period: u64,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Enable debug logging
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// Disable the progress bar
    #[arg(long, default_value_t = false)]
    pub no_progress: bool,
}

/// How a command ended without error.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Payload preview printed
    DryRun {
        /// Valid items in the input
        items: usize,
    },
    /// Every input item already had a record
    NothingToDo,
    /// A run took place
    Finished(RunReport),
}

impl CommandOutcome {
    /// Process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DryRun { .. } | Self::NothingToDo => EXIT_OK,
            Self::Finished(report) => status_exit_code(&report.status),
        }
    }
}

impl Cli {
    /// Collect run settings and validate them.
    pub fn run_config(&self) -> Result<RunConfig, CliError> {
        let config = RunConfig {
            concurrency: self.max_workers,
            pause_threshold: self.quota_threshold,
            session_budget: self.daily_limit,
            pause_duration: Duration::from_secs(self.pause_duration_hours.saturating_mul(3600)),
            log_interval: self.quota_log_interval,
            grace_period: Duration::from_secs(self.grace_period),
            quota_state_path: self.quota_state.clone(),
            quota_monitoring: self.quota_monitoring,
            ..RunConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Execute the command.
    pub async fn execute(&self, shutdown: SharedShutdown) -> Result<CommandOutcome, CliError> {
        let config = self.run_config()?;

        if self.dry_run {
            return self.dry_run();
        }

        let service = OpenAiService::new(
            self.api_key.clone().unwrap_or_default(),
            self.prompt_id.clone().unwrap_or_default(),
            self.prompt_version.clone(),
        )?
        .with_organization(self.openai_org_id.clone());

        let (sink, done, summary) = if self.resume {
            let (sink, done) = JsonlSink::open(&self.output, OpenMode::Resume)?;
            info!(already_done = done.len(), output = %self.output.display(), "Resuming");
            let summary = scan(&self.input_file, &done)?;
            (sink, done, summary)
        } else {
            let summary = scan(&self.input_file, &HashSet::new())?;
            // Checked before the output is truncated.
            ensure_items(&self.input_file, &summary)?;
            let (sink, _) = JsonlSink::open(&self.output, OpenMode::Fresh)?;
            (sink, HashSet::new(), summary)
        };
        ensure_items(&self.input_file, &summary)?;

        if summary.parsed == 0 {
            info!(
                skipped = summary.excluded,
                "Every item already has a record, nothing to do"
            );
            return Ok(CommandOutcome::NothingToDo);
        }

        // Rows were reported by the counting pass; this one only feeds work.
        let items = CsvItems::open(&self.input_file, done)?.quiet();
        let total = summary.parsed;
        let mut orchestrator = Orchestrator::new(config, Arc::new(service), Arc::new(sink))?
            .with_shutdown(shutdown)
            .with_total(total);
        if !self.no_progress && std::io::stderr().is_terminal() {
            orchestrator = orchestrator.with_progress_bar(create_progress_bar(total));
        }

        let _resume_listener = listen_for_resume_signal(orchestrator.pause_controller());
        let report = orchestrator.run(items).await;
        Ok(CommandOutcome::Finished(report))
    }

    fn dry_run(&self) -> Result<CommandOutcome, CliError> {
        let mut items = CsvItems::open(&self.input_file, HashSet::new())?;
        let counts = items.counts();
        let shown: Vec<WorkItem> = items.by_ref().take(DRY_RUN_PREVIEW).collect();
        let rest = items.count();
        ensure_items(&self.input_file, &counts.summary())?;

        let total = shown.len() + rest;
        let prompt_id = self.prompt_id.as_deref().unwrap_or("<prompt-id>");
        println!("DRY RUN - {total} item(s) parsed, no API calls made");
        for item in &shown {
            println!("{}", preview(prompt_id, self.prompt_version.as_deref(), item));
        }
        if rest > 0 {
            println!("... and {rest} more");
        }
        Ok(CommandOutcome::DryRun { items: total })
    }
}

fn ensure_items(path: &std::path::Path, summary: &ParseSummary) -> Result<(), InputError> {
    if summary.parsed + summary.excluded == 0 {
        return Err(InputError::Empty(path.display().to_string()));
    }
    Ok(())
}

fn preview(prompt_id: &str, prompt_version: Option<&str>, item: &WorkItem) -> String {
    let body = request_body(prompt_id, prompt_version, item);
    serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
}

/// SIGUSR1 lifts an active quota pause.
#[cfg(unix)]
fn listen_for_resume_signal(pause: Arc<PauseController>) -> Option<tokio::task::JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut stream = match signal(SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Could not install SIGUSR1 handler, manual resume unavailable");
            return None;
        }
    };
    Some(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            if !pause.resume_now("operator signal") {
                info!("SIGUSR1 received but dispatch is not paused");
            }
        }
    }))
}

#[cfg(not(unix))]
fn listen_for_resume_signal(_pause: Arc<PauseController>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

/// Create progress bar with style
fn create_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message("Generating");
    pb
}
