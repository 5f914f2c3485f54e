//! testfleet - parallel test-execution coordinator
//!
//! Fans the items of a test suite out across a fleet of worker processes,
//! replaces workers that stop heartbeating, and records which items failed or
//! never ran so a later invocation can resume exactly those.
//!
//! ## Usage
//!
//! ```bash
//! # Run a suite in this process
//! testfleet run suite.yaml
//!
//! # Run it across 4 worker processes, stopping at the first failure
//! testfleet run suite.yaml -j 4 -x
//!
//! # Rerun what failed or never ran in the latest session from this directory
//! testfleet resume suite.yaml -j 4
//!
//! # Show recorded sessions
//! testfleet sessions
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

mod cli;
mod config;
mod coordinator;
mod executor;
mod http;
mod models;
mod output;
mod results;
mod suite;
mod utils;

use cli::{Args, Command, RunOptions};
use config::env::EnvConfig;
use config::AppConfig;
use executor::{interrupted, Completion, LocalRunner, ParallelExecutor, Worker};
use http::CoordinatorClient;
use models::{generate_session_id, ItemCollection, SessionResults};
use output::{OutputFormat, SummaryFormatter};
use results::{ResumeError, ResumeStore};
use suite::Manifest;
use utils::logger::{init_logger, LogLevel};
use utils::SystemClock;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let env = EnvConfig::load();

    let level = if args.verbose || env.verbose == Some(true) {
        LogLevel::Debug
    } else {
        env.log_level
            .as_deref()
            .and_then(LogLevel::from_str)
            .unwrap_or(LogLevel::Info)
    };
    init_logger(level);

    let config_path = args
        .config
        .clone()
        .or_else(|| env.config_file.as_ref().map(PathBuf::from));
    let mut config = AppConfig::load_default(config_path.as_deref())?;
    if env.has_any() {
        debug!("Applying TESTFLEET_* environment overrides");
        config.apply_env(&env);
    }

    let success = match args.command {
        Command::Run(run) => {
            apply_options(&mut config, &run.options);
            config.validate()?;
            let manifest = Manifest::load(&run.manifest)?;

            if let Some(worker_id) = run.worker_id {
                run_worker(worker_id, &manifest, &config).await?;
                true
            } else {
                let mut session = Session {
                    manifest_path: &run.manifest,
                    config: &config,
                    config_path: config_path.as_deref(),
                    formatter: formatter(&run.options, &env),
                    store: open_store(&config),
                };
                session.execute(manifest.items()).await?
            }
        }
        Command::Resume(resume) => {
            apply_options(&mut config, &resume.options);
            config.validate()?;
            let manifest = Manifest::load(&resume.manifest)?;
            let mut session = Session {
                manifest_path: &resume.manifest,
                config: &config,
                config_path: config_path.as_deref(),
                formatter: formatter(&resume.options, &env),
                store: Some(ResumeStore::open(config.resume_path())?),
            };
            resume_session(&mut session, &manifest, resume.session_ids).await?
        }
        Command::List(list) => {
            list_items(&list)?;
            true
        }
        Command::Sessions(sessions) => {
            list_sessions(&sessions, &config, &env)?;
            true
        }
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Command-line flags win over file and environment settings
fn apply_options(config: &mut AppConfig, options: &RunOptions) {
    if let Some(workers) = options.workers {
        config.workers = workers;
    }
    if options.stop_on_error {
        config.stop_on_error = true;
    }
    if let Some(host) = &options.host {
        config.host = host.clone();
    }
    if let Some(port) = options.port {
        config.port = port;
    }
}

fn formatter(options: &RunOptions, env: &EnvConfig) -> SummaryFormatter {
    let requested = options.format.as_deref().or(env.format.as_deref());
    let format = match requested {
        Some(name) => OutputFormat::from_str(name).unwrap_or_else(|| {
            warn!("Unknown format '{}', using table", name);
            OutputFormat::Table
        }),
        None => OutputFormat::Table,
    };

    let formatter = SummaryFormatter::new(format);
    if std::io::stdout().is_terminal() {
        formatter
    } else {
        formatter.no_color()
    }
}

/// Directory sessions are recorded against
fn source_folder() -> String {
    std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|_| ".".to_string())
}

/// Worker mode: pull items from the coordinator until told to stop
async fn run_worker(worker_id: u64, manifest: &Manifest, config: &AppConfig) -> Result<()> {
    if config.port == 0 {
        anyhow::bail!("Worker {worker_id} needs the coordinator port (--port)");
    }

    let client = CoordinatorClient::with_timeout(&config.host, config.port, config.timeout_secs)?;
    info!("Worker {} using coordinator {}", worker_id, client.base_url());

    let worker = Worker::new(
        worker_id,
        Arc::new(client),
        manifest.items(),
        Arc::new(SystemClock),
        config.timings(),
    );
    worker.run().await?;
    Ok(())
}

/// One run of a set of items, locally or across a fleet
struct Session<'a> {
    manifest_path: &'a Path,
    config: &'a AppConfig,
    config_path: Option<&'a Path>,
    formatter: SummaryFormatter,
    /// Absent when the resume database could not be opened
    store: Option<ResumeStore>,
}

/// Open the resume database for recording. A run goes ahead without one.
fn open_store(config: &AppConfig) -> Option<ResumeStore> {
    let path = config.resume_path();
    match ResumeStore::open(&path) {
        Ok(store) => Some(store),
        Err(e) => {
            error!("Failed to open resume database {}: {}", path.display(), e);
            None
        }
    }
}

impl Session<'_> {
    /// Run `items`, print the summary, and record resume state. The state is
    /// recorded however the run ends, so an interrupted or failed run can be
    /// resumed. Returns whether every item passed or was skipped.
    async fn execute(&mut self, items: ItemCollection) -> Result<bool> {
        let session_id = generate_session_id();
        info!("Session {} with {} items", session_id, items.len());

        let run = if self.config.workers == 0 {
            LocalRunner::new(self.config.stop_on_error)
                .run_all(&session_id, &items, interrupted())
                .await
        } else {
            let ids = items.iter().map(|item| item.id().clone()).collect();
            ParallelExecutor::new(self.config.workers)
                .bind(self.config.host.clone(), self.config.port)
                .stop_on_error(self.config.stop_on_error)
                .with_timeout(self.config.timeout_secs)
                .timings(self.config.timings())
                .run(&session_id, ids, self.worker_args()?, interrupted())
                .await?
        };
        let results = run.results;

        println!("{}", self.formatter.format_session(&results));
        self.save_resume_state(&results);

        if results.rerun_count() > 0 {
            println!(
                "To rerun failed and unfinished items: testfleet resume {} {}",
                self.manifest_path.display(),
                results.session_id
            );
        }

        match run.completion {
            Completion::Finished => Ok(results.is_success(true)),
            Completion::Interrupted => {
                println!("Session {} interrupted", results.session_id);
                Ok(false)
            }
            Completion::Failed(e) => Err(e),
        }
    }

    /// Arguments a worker process is started with, before host, port and id
    fn worker_args(&self) -> Result<Vec<String>> {
        let manifest = self
            .manifest_path
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", self.manifest_path.display()))?;

        let mut args = vec!["run".to_string(), manifest.display().to_string()];
        if let Some(path) = self.config_path {
            let path = path
                .canonicalize()
                .with_context(|| format!("Failed to resolve {}", path.display()))?;
            args.push("--config".to_string());
            args.push(path.display().to_string());
        }
        Ok(args)
    }

    /// Failure to record resume state is logged, never fatal
    fn save_resume_state(&mut self, results: &SessionResults) {
        let Some(store) = self.store.as_mut() else {
            warn!("No resume database, session {} is not recorded", results.session_id);
            return;
        };

        let cutoff = Utc::now() - self.config.retention();
        let saved = store
            .save(&source_folder(), results)
            .and_then(|()| store.prune_older_than(cutoff));

        if let Err(e) = saved {
            error!(
                "Failed to save resume state to {}: {}",
                self.config.resume_path().display(),
                e
            );
        }
    }
}

async fn resume_session(
    session: &mut Session<'_>,
    manifest: &Manifest,
    session_ids: Vec<String>,
) -> Result<bool> {
    let store = session
        .store
        .as_ref()
        .context("Resume database is not available")?;

    let session_ids = if session_ids.is_empty() {
        match store.latest_session_for(&source_folder()) {
            Ok(id) => vec![id],
            Err(ResumeError::NotFound(reason)) => {
                println!("Nothing to resume: {reason}");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        session_ids
    };

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for session_id in &session_ids {
        match store.rerun_items(session_id) {
            Ok(items) => ids.extend(items.into_iter().filter(|id| seen.insert(id.clone()))),
            Err(ResumeError::NotFound(reason)) => {
                println!("Nothing to resume: {reason}");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if ids.is_empty() {
        println!(
            "Nothing to resume: every item of {} passed or was skipped",
            session_ids.join(", ")
        );
        return Ok(true);
    }

    let items = manifest.select(&ids);
    if items.is_empty() {
        println!(
            "Nothing to resume: none of the {} recorded items are in {}",
            ids.len(),
            session.manifest_path.display()
        );
        return Ok(false);
    }

    info!(
        "Resuming {} items from session {}",
        items.len(),
        session_ids.join(", ")
    );
    session.execute(items).await
}

fn list_items(args: &cli::ListArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;

    println!("\n{} items in {}\n", manifest.items.len(), args.manifest.display());
    for item in &manifest.items {
        if args.detailed {
            println!("  {:50} {}", item.id().address(), item.command.join(" "));
        } else {
            println!("  {}", item.id().address());
        }
    }
    println!();
    Ok(())
}

fn list_sessions(args: &cli::SessionsArgs, config: &AppConfig, env: &EnvConfig) -> Result<()> {
    let store = ResumeStore::open(config.resume_path())?;
    let folder = source_folder();
    let sessions = store.list_sessions(if args.all { None } else { Some(folder.as_str()) })?;

    if sessions.is_empty() {
        println!("No recorded sessions.");
        return Ok(());
    }

    let format = env
        .format
        .as_deref()
        .and_then(OutputFormat::from_str)
        .unwrap_or(OutputFormat::Table);
    print!("{}", SummaryFormatter::new(format).format_sessions(&sessions));
    Ok(())
}
