use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use citycast::broadcast::BroadcastOrchestrator;
use citycast::channels::{ChannelRegistry, WebhookAdapter, WebhookAdapterConfig};
use citycast::config::{EngineConfig, LoggingConfig};
use citycast::content::{ContentClass, ContentPayload, MediaRef};
use citycast::limiter::AdmissionController;

#[derive(Parser)]
#[command(
    name = "citycast",
    version,
    about = "Rate-limited multi-platform broadcast engine",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast one content item across all configured channels
    Broadcast {
        /// Content class (weather, weather_alert, earthquake, news)
        #[arg(short = 'k', long, value_parser = clap::value_parser!(ContentClass))]
        class: ContentClass,

        /// Text to post (mutually exclusive with --payload)
        #[arg(short, long)]
        text: Option<String>,

        /// JSON payload file describing the full content item
        #[arg(short, long, conflicts_with = "text")]
        payload: Option<PathBuf>,

        /// Attach an image file
        #[arg(long)]
        image: Option<PathBuf>,

        /// Link URL for channels that render previews
        #[arg(long)]
        link: Option<String>,
    },

    /// Check whether a post would currently be admitted
    Check {
        /// Channel name from the configuration
        #[arg(long)]
        channel: String,

        /// Content class (weather, weather_alert, earthquake, news)
        #[arg(short = 'k', long, value_parser = clap::value_parser!(ContentClass))]
        class: ContentClass,
    },

    /// Show recent posting history
    History {
        /// Restrict to one channel
        #[arg(long)]
        channel: Option<String>,

        /// Maximum records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Delete posting history older than the retention horizon
    Prune {
        /// Retention horizon in days
        #[arg(short, long, default_value = "30")]
        days: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config: {}", cli.config.display()))?;
    config.validate()?;

    setup_tracing(&config.logging, cli.verbose, cli.log_format.as_deref())?;
    tracing::info!(config = %cli.config.display(), "citycast starting");

    let config = Arc::new(config);
    let limiter = Arc::new(AdmissionController::open(&config.engine.database_path)?);

    match cli.command {
        Commands::Broadcast {
            class,
            text,
            payload,
            image,
            link,
        } => {
            let payload = load_payload(text, payload, image, link)?;
            broadcast(config, limiter, payload, class).await?;
        }

        Commands::Check { channel, class } => {
            check(config, limiter, &channel, class).await?;
        }

        Commands::History { channel, limit } => {
            history(limiter, channel.as_deref(), limit).await?;
        }

        Commands::Prune { days } => {
            let removed = limiter.prune_older_than(days).await?;
            tracing::info!(removed, days, "Pruned posting history");
            println!("Removed {removed} records older than {days} days");
        }
    }

    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, verbose: bool, format_override: Option<&str>) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("citycast=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_new(format!("citycast={},warn", logging.level))
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("citycast=info,warn"))
    };

    let format = format_override.unwrap_or(&logging.format);
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

/// Assemble the content payload from CLI flags or a JSON file
fn load_payload(
    text: Option<String>,
    payload_file: Option<PathBuf>,
    image: Option<PathBuf>,
    link: Option<String>,
) -> Result<ContentPayload> {
    let mut payload = match (text, payload_file) {
        (_, Some(path)) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read payload file: {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse payload file: {}", path.display()))?
        }
        (Some(text), None) => ContentPayload::new(text),
        (None, None) => anyhow::bail!("Either --text or --payload is required"),
    };

    if let Some(image) = image {
        payload.media = Some(MediaRef::image(image));
    }
    if let Some(link) = link {
        payload.link_url = Some(link);
    }
    Ok(payload)
}

async fn broadcast(
    config: Arc<EngineConfig>,
    limiter: Arc<AdmissionController>,
    payload: ContentPayload,
    class: ContentClass,
) -> Result<()> {
    let mut registry = ChannelRegistry::new();
    let timeout = config.request_timeout();
    for channel in config.channels.values() {
        if !channel.enabled || channel.config_error().is_some() {
            continue;
        }
        match WebhookAdapterConfig::from_channel(channel, timeout)
            .and_then(WebhookAdapter::new)
        {
            Ok(adapter) => registry.register(Arc::new(adapter)),
            Err(e) => {
                tracing::warn!(channel = %channel.name, error = %e, "Skipping adapter setup");
            }
        }
    }

    if registry.is_empty() {
        anyhow::bail!("No usable channels configured");
    }

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling broadcast");
            ctrl_c_cancel.cancel();
        }
    });

    let orchestrator = BroadcastOrchestrator::new(config, registry, limiter);
    let results = orchestrator.broadcast(&payload, class, &cancel).await;

    let mut names: Vec<&String> = results.keys().collect();
    names.sort();
    for name in names {
        println!("{}", results[name]);
    }

    let stats = orchestrator.stats();
    tracing::info!(
        delivered = stats.delivered,
        failed = stats.failed,
        skipped = stats.skipped,
        "Broadcast finished"
    );

    Ok(())
}

async fn check(
    config: Arc<EngineConfig>,
    limiter: Arc<AdmissionController>,
    channel: &str,
    class: ContentClass,
) -> Result<()> {
    let channel_config = config
        .channels
        .values()
        .find(|c| c.name == channel)
        .with_context(|| format!("Unknown channel: {channel}"))?;

    let admitted = limiter
        .can_post(channel, class, &channel_config.rate_limit)
        .await;
    if admitted {
        println!("{channel}/{class}: would be admitted");
    } else {
        println!("{channel}/{class}: rate limited");
    }
    Ok(())
}

async fn history(
    limiter: Arc<AdmissionController>,
    channel: Option<&str>,
    limit: usize,
) -> Result<()> {
    let records = limiter.recent(channel, limit).await?;
    if records.is_empty() {
        println!("No posting history");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<16} {}",
            record.posted_at.format("%Y-%m-%d %H:%M:%S"),
            record.channel,
            record.content_class
        );
    }
    Ok(())
}
