use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::ratelimit::{Limiter, RateLimitRule, RedisWindowStore, RequestContext, RouteLimits};

#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about = "Rate limiting and sensitive-word filtering")]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Redact keywords from standard input, line by line
    Filter {
        /// Extra keyword files, added to the configured ones
        #[arg(short, long)]
        keywords: Vec<PathBuf>,

        /// Replacement written once per redacted character
        #[arg(short, long)]
        replacement: Option<String>,

        /// Only report whether each line contains a keyword
        #[arg(long)]
        detect: bool,
    },

    /// Count one request against the shared store and print the decisions
    Check {
        /// Client address the request comes from
        #[arg(long)]
        client: String,

        /// Route path of the request
        #[arg(long, default_value = "/")]
        path: String,

        /// Ad-hoc limit instead of the configured route rules
        #[arg(long, requires = "window_ms")]
        limit: Option<u64>,

        /// Window for the ad-hoc limit, in milliseconds
        #[arg(long, requires = "limit")]
        window_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = match &cli.config {
        Some(path) => GatekeeperConfig::from_file(path)?,
        None => GatekeeperConfig::default(),
    };
    debug!(?config, "Configuration loaded");

    match cli.command {
        Command::Filter {
            keywords,
            replacement,
            detect,
        } => run_filter(&config, keywords, replacement, detect),
        Command::Check {
            client,
            path,
            limit,
            window_ms,
        } => run_check(&config, client, path, limit.zip(window_ms)).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run_filter(
    config: &GatekeeperConfig,
    extra_keywords: Vec<PathBuf>,
    replacement: Option<String>,
    detect: bool,
) -> anyhow::Result<()> {
    let mut filter = config
        .filter
        .build_filter()
        .context("failed to load configured keyword files")?;
    filter
        .load_from_sources(&extra_keywords)
        .context("failed to load keyword files")?;
    info!(keywords = filter.keyword_count(), "Sensitive-word filter ready");

    let replacement = replacement.unwrap_or_else(|| config.filter.replacement.clone());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in io::stdin().lock().lines() {
        let line = line?;
        if detect {
            writeln!(out, "{}", filter.contains_sensitive_word(&line))?;
        } else {
            writeln!(out, "{}", filter.filter_with(&line, &replacement))?;
        }
    }
    Ok(())
}

async fn run_check(
    config: &GatekeeperConfig,
    client: String,
    path: String,
    adhoc: Option<(u64, u64)>,
) -> anyhow::Result<()> {
    let limits = match adhoc {
        Some((limit, window_ms)) => {
            RouteLimits::new().with_rule(RateLimitRule::new(limit, Duration::from_millis(window_ms))?)
        }
        None => match config.route_limits()?.remove(&path) {
            Some(limits) => limits,
            None => bail!("no rate limits configured for route {path}"),
        },
    };

    let store = RedisWindowStore::connect(&config.limiter.redis_url)
        .await
        .with_context(|| format!("failed to connect to {}", config.limiter.redis_url))?;
    let limiter = Limiter::new(config.limiter.settings());
    limiter.init(Arc::new(store)).await?;

    let ctx = RequestContext::new(client, path);
    for (index, rule) in limits.iter() {
        let decision = limiter.check(rule, index, &ctx).await?;
        println!(
            "{}",
            serde_json::json!({
                "key": limiter.key_for(rule, index, &ctx).as_str(),
                "limit": rule.limit(),
                "window_ms": rule.window_millis(),
                "result": decision,
            })
        );
        if !decision.is_allowed() {
            break;
        }
    }

    limiter.close().await?;
    Ok(())
}
