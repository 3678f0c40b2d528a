//! autoapprove - trivial pull request auto-approval CLI
//!
//! ## Commands
//!
//! - `check`: evaluate one pull request and act on the decision
//! - `watch`: poll repositories and review every open pull request
//!
//! Configuration is layered: defaults, then `--config` TOML, then
//! environment (`GITHUB_TOKEN`/`GH_TOKEN`, `GEMINI_API_KEY`,
//! `GITHUB_API_URL`, `GEMINI_API_URL`), then flags.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};

use autoapprove_core::{
    ActionOptions, ActionRunner, AppConfig, ChangeId, ConsensusEngine, DecisionEngine,
    EngineError, HostingApi, InFlightRegistry, LanguageModel, RepoPermission, ReviewError,
    ReviewOutcome, Reviewer, SingleModelAnalyzer, StepOutcome,
};
use autoapprove_gemini::{GeminiConfig, GeminiModel};
use autoapprove_github::{CredentialProvider, EnvToken, GitHubClient, GitHubConfig, StaticToken};

#[derive(Parser)]
#[command(name = "autoapprove")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Auto-approve trivial, safe pull requests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON reports and JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true, env = "AUTOAPPROVE_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags layered over the configuration file and environment.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Model for the whole-change semantic gate
    #[arg(long, global = true)]
    model: Option<String>,

    /// Model taking part in consensus (repeatable, priority order)
    #[arg(long = "consensus-model", global = true)]
    consensus_models: Vec<String>,

    /// Route non-trivial files of trusted authors to multi-model consensus
    #[arg(long, global = true)]
    multi_model: bool,

    /// Disable every language model call
    #[arg(long, global = true, conflicts_with = "multi_model")]
    no_ai: bool,

    /// Login trusted for consensus override (repeatable)
    #[arg(long = "trusted-user", global = true)]
    trusted_users: Vec<String>,

    /// Repository permission trusted for consensus override (repeatable)
    #[arg(long = "trusted-role", global = true)]
    trusted_roles: Vec<RepoPermission>,

    #[arg(long, global = true)]
    max_files: Option<u64>,

    #[arg(long, global = true)]
    max_lines: Option<u64>,

    /// Enable auto-merge (or merge) after approving
    #[arg(long, global = true)]
    auto_merge: bool,

    /// Bring the branch up to date after approving
    #[arg(long, global = true)]
    update_branch: bool,
}

impl Overrides {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.models.model = model.clone();
        }
        if !self.consensus_models.is_empty() {
            config.models.consensus_models = self.consensus_models.clone();
        }
        if self.multi_model {
            config.engine.multi_model = true;
        }
        if self.no_ai {
            config.engine.semantic_analysis = false;
            config.engine.multi_model = false;
        }
        config.engine.trusted_users.extend(self.trusted_users.iter().cloned());
        config.engine.trusted_roles.extend(self.trusted_roles.iter().copied());
        if let Some(max_files) = self.max_files {
            config.engine.max_files = max_files;
        }
        if let Some(max_lines) = self.max_lines {
            config.engine.max_lines = max_lines;
        }
        if self.auto_merge {
            config.actions.auto_merge = true;
        }
        if self.update_branch {
            config.actions.update_branch = true;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate one pull request
    Check {
        /// Pull request URL or owner/repo#number
        target: ChangeId,

        /// Report the decision without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Review every open pull request of the given repositories, repeatedly
    Watch {
        /// Repository to watch, as owner/repo (repeatable)
        #[arg(long = "repo", required = true)]
        repos: Vec<RepoSlug>,

        /// Seconds between polling rounds
        #[arg(long)]
        interval: Option<u64>,

        /// Report decisions without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Pull requests evaluated at the same time
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },
}

/// `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RepoSlug {
    owner: String,
    repo: String,
}

impl FromStr for RepoSlug {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(RepoSlug {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                })
            }
            _ => Err(format!("expected owner/repo, got '{s}'")),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    autoapprove_core::init_tracing(cli.json, level);

    let config = resolve_config(&cli)?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let hosting = build_hosting(&config)?;
    let reviewer = Arc::new(build_reviewer(&config, hosting)?);

    match cli.command {
        Commands::Check { target, .. } => cmd_check(&reviewer, &target, cli.json, &cancel).await,
        Commands::Watch {
            repos, concurrency, ..
        } => {
            let interval = Duration::from_secs(config.actions.poll_interval_secs);
            cmd_watch(reviewer, repos, interval, concurrency, cli.json, cancel).await
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.apply_env(|key| std::env::var(key).ok());
    cli.overrides.apply(&mut config);

    match &cli.command {
        Commands::Check { dry_run, .. } => config.actions.dry_run |= *dry_run,
        Commands::Watch {
            dry_run, interval, ..
        } => {
            config.actions.dry_run |= *dry_run;
            if let Some(secs) = interval {
                config.actions.poll_interval_secs = *secs;
            }
        }
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!(event = "shutdown.requested", "interrupt received, cancelling evaluations");
            cancel.cancel();
        }
    });
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn build_hosting(config: &AppConfig) -> Result<Arc<dyn HostingApi>> {
    let credentials: Arc<dyn CredentialProvider> = match &config.services.github_token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(EnvToken::default()),
    };
    let client = GitHubClient::new(GitHubConfig::new(&config.services.github_api_url), credentials)
        .context("Failed to create GitHub client")?;
    Ok(Arc::new(client))
}

fn build_reviewer(config: &AppConfig, hosting: Arc<dyn HostingApi>) -> Result<Reviewer> {
    let mut engine = DecisionEngine::new(Arc::clone(&hosting), config.engine.clone())
        .context("Invalid engine configuration")?;

    if config.engine.semantic_analysis || config.engine.multi_model {
        let key = config
            .services
            .gemini_api_key
            .as_deref()
            .context("GEMINI_API_KEY is required for AI analysis (use --no-ai to skip it)")?;
        let gemini = GeminiConfig::new(&config.services.gemini_api_url, key)
            .with_timeout(config.models.consensus.per_model_timeout);

        if config.engine.semantic_analysis {
            let model = GeminiModel::new(&config.models.model, gemini.clone())
                .with_context(|| format!("Failed to create model {}", config.models.model))?;
            engine = engine.with_analyzer(SingleModelAnalyzer::new(Arc::new(model)));
        }
        if config.engine.multi_model {
            let models = config
                .models
                .consensus_models
                .iter()
                .map(|name| {
                    GeminiModel::new(name, gemini.clone())
                        .map(|m| Arc::new(m) as Arc<dyn LanguageModel>)
                        .with_context(|| format!("Failed to create model {name}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let consensus =
                ConsensusEngine::with_default_thresholds(models, config.models.consensus.clone())
                    .context("Invalid consensus configuration")?;
            engine = engine.with_consensus(consensus);
        }
    }

    let runner = ActionRunner::new(hosting, ActionOptions::from(&config.actions));
    Ok(Reviewer::new(
        Arc::new(engine),
        runner,
        InFlightRegistry::new(),
    ))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_check(
    reviewer: &Reviewer,
    id: &ChangeId,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let outcome = reviewer
        .review(id, cancel)
        .await
        .with_context(|| format!("Failed to review {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print!("{}", render_text(&outcome));
    }

    if outcome.actions.has_failures() {
        bail!("one or more actions failed for {id}");
    }
    Ok(())
}

type ReviewTask = (ChangeId, Result<ReviewOutcome, ReviewError>);

/// Polling loop state. Reviews run on a [`JoinSet`] that outlives a single
/// round, so a slow review never delays the next tick.
struct Watch {
    reviewer: Arc<Reviewer>,
    repos: Vec<RepoSlug>,
    slots: Arc<Semaphore>,
    json: bool,
    tasks: JoinSet<ReviewTask>,
    pending: HashSet<ChangeId>,
}

impl Watch {
    fn new(reviewer: Arc<Reviewer>, repos: Vec<RepoSlug>, concurrency: usize, json: bool) -> Self {
        Watch {
            reviewer,
            repos,
            slots: Arc::new(Semaphore::new(concurrency.max(1))),
            json,
            tasks: JoinSet::new(),
            pending: HashSet::new(),
        }
    }

    /// Queue a review for every open change not already queued or running.
    async fn schedule_round(&mut self, cancel: &CancellationToken) -> usize {
        let mut scheduled = 0;
        for slug in &self.repos {
            let ids = match self
                .reviewer
                .engine()
                .hosting()
                .open_changes(&slug.owner, &slug.repo)
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(event = "watch.list_failed", owner = %slug.owner, repo = %slug.repo, error = %err, "cannot list open pull requests");
                    continue;
                }
            };

            for id in ids {
                if self.pending.contains(&id) || self.reviewer.in_flight().is_in_flight(&id) {
                    debug!(change = %id, "review already running");
                    continue;
                }
                self.pending.insert(id.clone());
                let reviewer = Arc::clone(&self.reviewer);
                let slots = Arc::clone(&self.slots);
                let cancel = cancel.child_token();
                self.tasks.spawn(async move {
                    let Ok(_slot) = slots.acquire_owned().await else {
                        return (id, Err(EngineError::Cancelled.into()));
                    };
                    let result = reviewer.review(&id, &cancel).await;
                    (id, result)
                });
                scheduled += 1;
            }
        }
        scheduled
    }

    fn finish(&mut self, joined: Result<ReviewTask, JoinError>) {
        let (id, result) = match joined {
            Ok(done) => done,
            Err(err) => {
                warn!(event = "watch.task_failed", error = %err, "review task aborted");
                return;
            }
        };
        self.pending.remove(&id);
        match result {
            Ok(outcome) => self.print(&outcome),
            Err(ReviewError::AlreadyInFlight(_)) => {
                debug!(change = %id, "skipped, review already in flight");
            }
            Err(ReviewError::Engine(EngineError::Cancelled)) => {
                debug!(change = %id, "review cancelled");
            }
            Err(err) => warn!(event = "watch.review_failed", change = %id, error = %err, "review failed"),
        }
    }

    fn print(&self, outcome: &ReviewOutcome) {
        if self.json {
            match serde_json::to_string(outcome) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "cannot serialize outcome"),
            }
        } else {
            print!("{}", render_text(outcome));
        }
    }

    /// Wait for every queued review.
    async fn drain(&mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            self.finish(joined);
        }
    }
}

async fn cmd_watch(
    reviewer: Arc<Reviewer>,
    repos: Vec<RepoSlug>,
    interval: Duration,
    concurrency: usize,
    json: bool,
    cancel: CancellationToken,
) -> Result<()> {
    info!(
        event = "watch.started",
        repos = repos.len(),
        interval_secs = interval.as_secs(),
        "watching repositories"
    );
    let mut watch = Watch::new(reviewer, repos, concurrency, json);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = watch.tasks.join_next() => watch.finish(joined),
            _ = ticker.tick() => {
                let scheduled = watch.schedule_round(&cancel).await;
                info!(event = "watch.round", scheduled, "polling round scheduled");
            }
        }
    }

    watch.drain().await;
    info!(event = "watch.stopped", "watch stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn render_text(outcome: &ReviewOutcome) -> String {
    let decision = &outcome.decision;
    let verdict = if decision.approvable {
        "APPROVABLE"
    } else {
        "REJECTED"
    };
    let mut out = format!("{}: {} - {}\n", decision.change, verdict, decision.reason);
    for detail in &decision.details {
        out.push_str(&format!("  - {detail}\n"));
    }
    if decision.approvable {
        let actions = &outcome.actions;
        out.push_str(&format!(
            "  actions: approve={} auto_merge={} update_branch={}\n",
            render_step(&actions.approve),
            render_step(&actions.auto_merge),
            render_step(&actions.update_branch)
        ));
    }
    out
}

fn render_step(step: &StepOutcome) -> String {
    match step {
        StepOutcome::Skipped(why) | StepOutcome::Failed(why) => format!("{} ({why})", step.as_str()),
        _ => step.as_str().to_string(),
    }
}
