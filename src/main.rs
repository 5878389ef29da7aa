use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repowatch::config::LoggingConfig;
use repowatch::daemon::read_pid_file;
use repowatch::source::Direction;
use repowatch::sync::drain_events;
use repowatch::{open_store, Config, Daemon, GitHubSource, ItemFilter, Service, Source};

#[derive(Parser)]
#[command(name = "repowatch")]
#[command(about = "Mirror GitHub pull requests and issues into a local, queryable store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Start tracking a repository and run its first sync
    Track {
        /// Repository as owner/name
        repo: String,
    },

    /// Stop tracking a repository and drop its mirrored data
    Untrack {
        /// Repository as owner/name
        repo: String,
    },

    /// Show one tracked repository
    Show {
        /// Repository as owner/name
        repo: String,
    },

    /// List tracked repositories
    Repos {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        per_page: Option<usize>,
    },

    /// Sync one repository, or every tracked repository
    Refresh {
        /// Repository as owner/name
        repo: Option<String>,
    },

    /// List mirrored pull requests
    Pulls(ListArgs),

    /// List mirrored issues
    Issues(ListArgs),

    /// List known labels
    Labels {
        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long)]
        per_page: Option<usize>,
    },

    /// Show service status and the GitHub rate limit
    Status,

    /// Run the refresh scheduler in the foreground
    Serve,
}

#[derive(clap::Args)]
struct ListArgs {
    /// Restrict to one repository (owner/name)
    #[arg(long)]
    repo: Option<String>,

    /// Filter by state (open, closed)
    #[arg(long)]
    state: Option<String>,

    /// Filter by author login
    #[arg(long)]
    author: Option<String>,

    /// Filter by label name
    #[arg(long)]
    label: Option<String>,

    #[arg(long, default_value_t = 1)]
    page: usize,

    #[arg(long)]
    per_page: Option<usize>,

    /// Creation-time order: asc or desc
    #[arg(long, default_value = "desc")]
    direction: String,
}

impl ListArgs {
    fn into_filter(self, config: &Config) -> ItemFilter {
        ItemFilter {
            repo: self.repo,
            state: self.state,
            author: self.author,
            label: self.label,
            page: self.page,
            per_page: self.per_page.unwrap_or(config.query.default_per_page),
            direction: Direction::parse(&self.direction),
            since: None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        init_logging(&LoggingConfig::default(), cli.verbose)?;
        return cmd_init(force);
    }

    let config = load_config(cli.config.as_deref())?;

    init_logging(&config.logging, cli.verbose)?;
    info!("Starting repowatch v{}", env!("CARGO_PKG_VERSION"));

    let needs_auth = matches!(
        cli.command,
        Commands::Track { .. } | Commands::Refresh { .. } | Commands::Status | Commands::Serve
    );
    let store = open_store(&config.storage).context("Failed to open store")?;
    let source = connect_source(&config, needs_auth)?;
    let service = Arc::new(Service::new(store, source, &config));

    let result = run_command(cli.command, cli.json, &service, &config).await;

    service.shutdown().await;
    result
}

/// Initialize logging from configuration; `--verbose` forces debug
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(logging.color);
    let layer = match logging.format.as_str() {
        "pretty" => layer.pretty().boxed(),
        "full" => layer.boxed(),
        _ => layer.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(path),
        None => Config::load_or_default(),
    }
}

/// Authenticated client, or an anonymous one for commands that only read the store
fn connect_source(config: &Config, needs_auth: bool) -> Result<Arc<dyn Source>> {
    match GitHubSource::new(&config.github) {
        Ok(source) => Ok(Arc::new(source)),
        Err(e) if needs_auth => Err(e),
        Err(e) => {
            warn!("Continuing without GitHub authentication: {}", e);
            Ok(Arc::new(GitHubSource::anonymous(&config.github)?))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Write the default configuration to the XDG location
fn cmd_init(force: bool) -> Result<()> {
    let config_path = Config::default_config_path()?;
    let config = Config::default();

    if config_path.exists() && !force {
        println!("⚠️  Configuration already exists: {}", config_path.display());
        println!("   Use --force to overwrite it");
        return Ok(());
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    config.save(&config_path)?;

    println!("✅ repowatch initialized");
    println!("   Config: {}", config_path.display());
    println!("   Storage: {} ({})", config.storage.backend, config.storage.path);
    println!("   Next: run 'repowatch track owner/name'");

    Ok(())
}

async fn run_command(
    command: Commands,
    json: bool,
    service: &Arc<Service>,
    config: &Config,
) -> Result<()> {
    match command {
        Commands::Init { force } => cmd_init(force)?,

        Commands::Track { repo } => {
            let repository = service.track(&repo).await?;
            if json {
                print_json(&repository)?;
            } else {
                println!("📁 Tracking {}", repository.full_name);
                println!("   First sync queued; it finishes before this command exits");
            }
        }

        Commands::Untrack { repo } => {
            service.untrack(&repo)?;
            println!("🗑️  Stopped tracking {}", repo);
        }

        Commands::Show { repo } => {
            let repository = service.get_repository(&repo)?;
            if json {
                print_json(&repository)?;
            } else {
                println!("📁 {}", repository.full_name);
                if !repository.description.is_empty() {
                    println!("   📝 {}", repository.description);
                }
                println!("   🔗 {}", repository.html_url);
                println!("   🔒 Private: {}", repository.is_private);
                match repository.last_synced_at {
                    Some(at) => println!("   🕒 Last synced: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                    None => println!("   🕒 Last synced: never"),
                }
                if let Some(status) = service.tracker().status(&repository.full_name) {
                    println!("   🔄 Status: {}", status);
                }
            }
        }

        Commands::Repos { page, per_page } => {
            let per_page = per_page.unwrap_or(config.query.default_per_page);
            let repositories = service.list_repositories(page, per_page)?;
            if json {
                print_json(&repositories)?;
            } else {
                println!("Repositories ({}):", repositories.total);
                for repository in &repositories.items {
                    let synced = repository
                        .last_synced_at
                        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!("  📁 {} (synced: {})", repository.full_name, synced);
                }
            }
        }

        Commands::Refresh { repo } => {
            let mut events = service.subscribe();
            match repo {
                Some(repo) => {
                    service.refresh(&repo)?;
                    println!("🔄 Refreshing {}", repo);
                }
                None => {
                    let queued = service.refresh_all()?;
                    println!("🔄 Refreshing {} repositories", queued);
                }
            }

            service.shutdown().await;
            for event in drain_events(&mut events) {
                print_event(&event, json)?;
            }
        }

        Commands::Pulls(args) => {
            let result = service.list_pull_requests(&args.into_filter(config))?;
            if json {
                print_json(&result)?;
            } else {
                println!(
                    "Pull requests (page {}/{}, {} total):",
                    result.pagination.page, result.pagination.total_pages, result.pagination.total
                );
                for pr in &result.items {
                    let merged = if pr.merged_at.is_some() { " merged" } else { "" };
                    println!(
                        "  #{} [{}{}] {} ({}, @{})",
                        pr.number, pr.state, merged, pr.title, pr.repository_full_name, pr.user.login
                    );
                }
            }
        }

        Commands::Issues(args) => {
            let result = service.list_issues(&args.into_filter(config))?;
            if json {
                print_json(&result)?;
            } else {
                println!(
                    "Issues (page {}/{}, {} total):",
                    result.pagination.page, result.pagination.total_pages, result.pagination.total
                );
                for issue in &result.items {
                    println!(
                        "  #{} [{}] {} ({}, @{})",
                        issue.number,
                        issue.state,
                        issue.title,
                        issue.repository_full_name,
                        issue.user.login
                    );
                }
            }
        }

        Commands::Labels { page, per_page } => {
            let per_page = per_page.unwrap_or(config.query.default_per_page);
            let labels = service.list_labels(page, per_page)?;
            if json {
                print_json(&labels)?;
            } else {
                println!("Labels ({}):", labels.total);
                for label in &labels.items {
                    println!("  🏷️  {} #{}", label.name, label.color);
                }
            }
        }

        Commands::Status => {
            let status = service.status().await?;
            if json {
                print_json(&status)?;
            } else {
                println!("📊 repowatch v{}", status.version);
                println!("   📁 Repositories: {}", status.repositories.total);
                println!("   🔄 Syncing: {}", status.repositories.syncing);
                println!("   ❌ Errors: {}", status.repositories.errored);
                println!(
                    "   🕒 Last sync: {}",
                    status.last_sync.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!(
                    "   ⏳ Rate limit: {}/{} (resets {})",
                    status.rate_limit.remaining,
                    status.rate_limit.limit,
                    status.rate_limit.reset_at.format("%H:%M:%S UTC")
                );
                match read_pid_file(config)? {
                    Some(pid) => println!("   🟢 Scheduler: running (PID {})", pid),
                    None => println!("   🔴 Scheduler: not running"),
                }
                for (name, sync_status) in service.tracker().entries() {
                    println!("      {}: {}", name, sync_status);
                }
            }
        }

        Commands::Serve => {
            if let Some(pid) = read_pid_file(config)? {
                println!("⚠️  A scheduler may already be running (PID {})", pid);
                println!("   Remove {} if it is stale", config.daemon.pid_file);
                return Ok(());
            }

            let daemon = Daemon::new(Arc::clone(service), config)?;
            println!("🖥️  Running in foreground mode (Ctrl+C to stop)");
            daemon.run().await?;

            let status = daemon.status();
            println!("✅ Scheduler stopped after {:.1}m", status.uptime.as_secs_f64() / 60.0);
            println!("   Completed: {}", status.completed_syncs);
            println!("   Failed: {}", status.failed_syncs);
            println!("   Skipped: {}", status.skipped_syncs);
        }
    }

    Ok(())
}

fn print_event(event: &repowatch::SyncEvent, json: bool) -> Result<()> {
    use repowatch::SyncEvent;

    if json {
        return print_json(event);
    }

    match event {
        SyncEvent::Completed(report) => {
            println!(
                "   ✅ {}: {} pull requests, {} issues in {:.2}s",
                report.full_name,
                report.pull_requests.inserted + report.pull_requests.updated,
                report.issues.inserted + report.issues.updated,
                report.duration.as_secs_f64()
            );
        }
        SyncEvent::Failed { full_name, error } => println!("   ❌ {}: {}", full_name, error),
        SyncEvent::Skipped { full_name } => println!("   ⏭️  {}: already syncing", full_name),
    }
    Ok(())
}
