use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::{Config, validate_max_iterations};
use cyclr::cancel::{Cancellation, cancellation};
use cyclr::collab::Collaborators;
use cyclr::domain::{CycleState, CycleSummary, Issue, IssueCycle, Verdict};
use cyclr::driver::CycleDriver;
use cyclr::storage::{CycleFilter, SqliteCycleStore};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cyclr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("cyclr.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn colored_state(state: CycleState) -> ColoredString {
    match state {
        CycleState::Merged => state.as_str().green(),
        CycleState::Abandoned => state.as_str().red(),
        CycleState::CiFailed | CycleState::ChangesRequested => state.as_str().yellow(),
        _ => state.as_str().cyan(),
    }
}

fn colored_verdict(verdict: &Verdict) -> ColoredString {
    match verdict {
        Verdict::Merged => verdict.to_string().green().bold(),
        Verdict::Exhausted => verdict.to_string().yellow().bold(),
        Verdict::Abandoned(_) => verdict.to_string().red().bold(),
    }
}

fn print_summary(summary: &CycleSummary) {
    println!(
        "{} {} (iteration {}/{})",
        summary.issue_id.bold(),
        colored_state(summary.state),
        summary.iteration,
        summary.max_iterations
    );
    if let Some(pr_id) = &summary.pr_id {
        println!("  PR: {}", pr_id);
    }
    if let Some(verdict) = &summary.verdict {
        println!("  Verdict: {}", colored_verdict(verdict));
    }
    if let Some(error) = &summary.last_error {
        println!("  Last error: {}", error.red());
    }
}

fn print_history(cycle: &IssueCycle) {
    println!("  History:");
    for (i, record) in cycle.history().iter().enumerate() {
        println!(
            "  {:>3}. {} [{}] {} --{}--> {}: {}",
            i + 1,
            record.at.format("%Y-%m-%d %H:%M:%S"),
            record.iteration,
            record.state,
            record.action,
            colored_state(record.next_state),
            record.outcome.describe()
        );
    }
}

/// Cancellation wired to Ctrl-C
fn interruptible() -> Cancellation {
    let (handle, cancel) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Interrupted, abandoning in-flight cycles...".yellow());
            handle.cancel("interrupted by operator");
        }
    });
    cancel
}

fn build_driver(config: &Config) -> Result<CycleDriver> {
    let project_dir = std::env::current_dir().context("Failed to read current directory")?;
    let store_dir = config.store_dir(&project_dir)?;
    let store = SqliteCycleStore::open_at(&store_dir)
        .context(format!("Failed to open cycle store at {}", store_dir.display()))?;
    let collaborators =
        Collaborators::from_config(&config.collaborators).context("Failed to set up collaborators")?;
    Ok(CycleDriver::new(Arc::new(store), collaborators, config.driver_config()))
}

fn max_iterations(requested: Option<u32>, config: &Config) -> Result<u32> {
    let max = requested.unwrap_or(config.cycle.max_iterations);
    validate_max_iterations(max)?;
    Ok(max)
}

async fn run_application(cli: &Cli, mut config: Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let command = match &cli.command {
        Some(Commands::Config) => {
            print!("{}", serde_yaml::to_string(&config).context("Failed to render config")?);
            return Ok(());
        }
        Some(command) => command,
        None => {
            let driver = build_driver(&config)?;
            return handle_list(&driver, None, true);
        }
    };

    if let Commands::RunCycle {
        wait_ci: Some(seconds), ..
    } = command
    {
        config.retry.initial_backoff_ms = seconds.saturating_mul(1000);
        config.retry.max_backoff_ms = config.retry.max_backoff_ms.max(config.retry.initial_backoff_ms);
        config.validate().context("--wait-ci does not fit within the lease")?;
    }

    let driver = build_driver(&config)?;

    match command {
        Commands::Process {
            issue,
            title,
            body,
            max_iterations: max,
        } => {
            let max = max_iterations(*max, &config)?;
            info!("Processing issue {}", issue);
            let summary = driver
                .process_issue(Issue::new(issue, title, body), max, &interruptible())
                .await?;
            print_summary(&summary);
        }
        Commands::Review { issue } => {
            let summary = driver.review(issue, &interruptible()).await?;
            print_summary(&summary);
        }
        Commands::RunCycle {
            issues,
            max_iterations: max,
            ..
        } => {
            let max = max_iterations(*max, &config)?;
            handle_run_cycle(&driver, issues, max).await?;
        }
        Commands::Status { issue, detailed } => {
            let cycle = driver.status(issue)?;
            print_summary(&cycle.summary());
            if *detailed {
                print_history(&cycle);
            }
        }
        Commands::List { state, active } => handle_list(&driver, state.as_deref(), *active)?,
        Commands::Cancel { issue, reason } => {
            let reason = reason.as_deref().unwrap_or("cancelled by operator");
            if driver.request_cancel(issue, reason)? {
                println!("{} {}", "Cancel requested:".yellow(), issue);
            } else {
                println!("{} {} is not an active cycle", "Nothing to cancel:".dimmed(), issue);
            }
        }
        Commands::Close { issue, reason } => {
            let reason = reason.as_deref().unwrap_or("closed by operator");
            let verdict = driver.close(issue, reason).await?;
            println!("{} {}: {}", "Closed:".red(), issue, colored_verdict(&verdict));
        }
        Commands::Config => {}
    }

    Ok(())
}

/// Issue IDs in first-seen order, repeats dropped
fn unique_issues(issues: &[String]) -> Vec<&String> {
    let mut seen = HashSet::new();
    issues.iter().filter(|id| seen.insert(*id)).collect()
}

async fn handle_run_cycle(driver: &CycleDriver, issues: &[String], max: u32) -> Result<()> {
    let cancel = interruptible();
    let issues = unique_issues(issues);
    let runs = issues.iter().map(|&id| {
        // A stored cycle keeps its own issue details; these only seed new cycles
        let issue = Issue::new(id, id, "");
        driver.run_cycle(issue, max, &cancel)
    });
    let results = futures::future::join_all(runs).await;

    let mut failed = 0;
    for (id, result) in issues.iter().zip(results) {
        match result {
            Ok(verdict) => println!("{} {}", id.bold(), colored_verdict(&verdict)),
            Err(e) => {
                failed += 1;
                println!("{} {}", id.bold(), format!("error: {}", e).red());
            }
        }
    }

    if failed > 0 {
        bail!("{} of {} cycles failed", failed, issues.len());
    }
    Ok(())
}

fn handle_list(driver: &CycleDriver, state: Option<&str>, active: bool) -> Result<()> {
    let mut filter = CycleFilter::all();
    if let Some(state) = state {
        filter.state = Some(state.parse::<CycleState>()?);
    }
    filter.active_only = active;

    let cycles = driver.list(&filter)?;
    if cycles.is_empty() {
        println!("{}", "No cycles".dimmed());
    }
    for summary in &cycles {
        print_summary(summary);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the configured level is known
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
