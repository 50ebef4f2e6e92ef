use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quotaguard::config::{LogFormat, LoggingConfig, QuotaguardConfig};
use quotaguard::ratelimit::{humanize_secs, RateLimiter, RequestContext};
use quotaguard::replay::replay;

#[derive(Debug, Parser)]
#[command(name = "quotaguard", version, about = "Multi-scope rate limiting for REST APIs")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse every limit in the configuration and list the registered endpoints
    Validate,
    /// Replay a JSON lines request log and print one verdict per request
    Simulate {
        /// Request log to read, stdin if omitted
        #[arg(short, long)]
        requests: Option<PathBuf>,
    },
    /// Check many requests concurrently against one endpoint
    Stress {
        /// Endpoint path, as registered
        #[arg(long)]
        path: String,
        #[arg(long, default_value = "GET")]
        method: String,
        /// API key to send, anonymous if omitted
        #[arg(long)]
        api_key: Option<String>,
        /// Number of concurrent tasks
        #[arg(long, default_value_t = 8)]
        tasks: usize,
        /// Requests per task
        #[arg(long, default_value_t = 1000)]
        requests: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = QuotaguardConfig::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Quotaguard");

    let limit_count = config.rate_limiting.limit_count();
    let limiter = Arc::new(
        RateLimiter::from_rules(config.rate_limiting).context("Failed to register rate limits")?,
    );
    info!(
        endpoints = limiter.endpoint_count(),
        limits = limit_count,
        "Rate limiter initialized"
    );

    match cli.command {
        Command::Validate => {
            println!(
                "OK: {} limits across {} endpoints",
                limit_count,
                limiter.endpoint_count()
            );
        }
        Command::Simulate { requests } => {
            let stdout = io::stdout().lock();
            let summary = match requests {
                Some(path) => {
                    let file = File::open(&path)
                        .with_context(|| format!("Failed to open {}", path.display()))?;
                    replay(&limiter, BufReader::new(file), stdout)?
                }
                None => replay(&limiter, io::stdin().lock(), stdout)?,
            };
            info!(
                allowed = summary.allowed,
                denied = summary.denied,
                skipped = summary.skipped,
                "Replay finished"
            );
        }
        Command::Stress {
            path,
            method,
            api_key,
            tasks,
            requests,
        } => {
            tokio::select! {
                _ = stress(limiter, path, method, api_key, tasks, requests) => {}
                _ = shutdown_signal() => {}
            }
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init(),
    }
}

/// Run `tasks` concurrent workers, each checking `requests` requests.
async fn stress(
    limiter: Arc<RateLimiter>,
    path: String,
    method: String,
    api_key: Option<String>,
    tasks: usize,
    requests: u64,
) {
    let started = Instant::now();
    let windows_before = limiter.window_count();
    let mut workers = JoinSet::new();

    for _ in 0..tasks {
        let limiter = Arc::clone(&limiter);
        let (path, method, api_key) = (path.clone(), method.clone(), api_key.clone());

        workers.spawn(async move {
            let mut request = RequestContext::new(&path, &method);
            request.api_key = api_key.as_deref();

            let mut denied = 0u64;
            let mut longest_wait = 0u64;
            for _ in 0..requests {
                if let Some(wait) = limiter.check_now(&request).retry_after() {
                    denied += 1;
                    longest_wait = longest_wait.max(wait);
                }
                tokio::task::yield_now().await;
            }
            (denied, longest_wait)
        });
    }

    let mut denied = 0u64;
    let mut longest_wait = 0u64;
    while let Some(result) = workers.join_next().await {
        match result {
            Ok((task_denied, task_wait)) => {
                denied += task_denied;
                longest_wait = longest_wait.max(task_wait);
            }
            Err(e) => warn!(error = %e, "Stress worker failed"),
        }
    }

    let total = tasks as u64 * requests;
    println!(
        "{} requests in {:?}: {} allowed, {} denied, longest wait {}, {} new windows",
        total,
        started.elapsed(),
        total - denied,
        denied,
        humanize_secs(longest_wait),
        limiter.window_count() - windows_before,
    );
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
