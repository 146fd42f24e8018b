//! Threat Loom CLI
//!
//! Command-line interface for the Threat Loom intelligence pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod config;
mod validator;

use commands::run_pipeline;
use config::AppConfig;
use tl_core::{
    EventId, EventLog, MergePolicy, Normalizer, OffsetReset, RawRecord, RedisEventLog,
    TOPIC_ENTITIES, TOPIC_RELATIONSHIPS,
};
use tl_graph::Neo4jGraphStore;
use tl_observability::PipelineMetrics;
use tl_pipeline::{list_dead_letters, seed_records};
use validator::ConfigValidator;

#[derive(Parser)]
#[command(name = "threat-loom")]
#[command(version)]
#[command(about = "Threat-intelligence ingestion and correlation pipeline", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingest and correlation pipeline
    Run {
        /// Validate configuration and exit without starting
        #[arg(long)]
        validate_only: bool,
    },

    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show current configuration
    Config {
        /// Show secrets (redacted by default)
        #[arg(long)]
        show_secrets: bool,
    },

    /// Create graph uniqueness constraints
    InitGraph,

    /// Push raw records through the normalizer onto the event log
    Seed {
        /// JSON file holding an array of raw records
        #[arg(short, long, value_name = "FILE")]
        file: PathBuf,
    },

    /// List dead-lettered events for a topic
    DeadLetters {
        /// Source topic (entities, relationships)
        #[arg(short, long, default_value = "entities")]
        topic: String,

        /// Maximum number of entries to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Reset a consumer group's offsets for reprocessing
    Replay {
        /// Topic to replay (entities, relationships)
        #[arg(short, long, default_value = "entities")]
        topic: String,

        /// Consumer group to reposition
        #[arg(short, long, default_value = "correlator")]
        group: String,

        /// Replay from just after this event id instead of the start
        #[arg(long, requires = "partition")]
        event: Option<String>,

        /// Partition the event id belongs to
        #[arg(long, requires = "event")]
        partition: Option<u32>,

        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = AppConfig::load(&config_path).unwrap_or_else(|_| {
        if cli.verbose {
            eprintln!("Using default configuration (no config file found)");
        }
        AppConfig::default()
    });

    let mut logging = config.logging.to_config();
    if cli.verbose {
        logging.level = tracing::Level::DEBUG;
    }
    logging.json_format = logging.json_format || cli.format == OutputFormat::Json;
    tl_observability::init_logging_with_config(logging);

    match cli.command {
        Commands::Run { validate_only } => cmd_run(config, validate_only).await,
        Commands::Validate { config: cfg_path } => {
            cmd_validate(cfg_path.unwrap_or(config_path)).await
        }
        Commands::Config { show_secrets } => cmd_config(config, show_secrets, cli.format),
        Commands::InitGraph => cmd_init_graph(config).await,
        Commands::Seed { file } => cmd_seed(config, file, cli.format).await,
        Commands::DeadLetters { topic, limit } => {
            cmd_dead_letters(config, &topic, limit, cli.format).await
        }
        Commands::Replay {
            topic,
            group,
            event,
            partition,
            yes,
        } => cmd_replay(config, &topic, &group, event, partition, yes).await,
    }
}

fn default_config_path() -> PathBuf {
    if let Some(dirs) = directories::ProjectDirs::from("io", "threat-loom", "threat-loom") {
        dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from("config/default.yaml")
    }
}

/// Maps a user-facing topic name to the canonical topic constant.
fn resolve_topic(name: &str) -> Result<&'static str> {
    match name {
        "entities" => Ok(TOPIC_ENTITIES),
        "relationships" => Ok(TOPIC_RELATIONSHIPS),
        other => anyhow::bail!("Unknown topic '{other}'. Expected entities or relationships"),
    }
}

async fn cmd_run(config: AppConfig, validate_only: bool) -> Result<()> {
    println!("{}", "Validating configuration...".cyan());

    let validation_result = ConfigValidator::validate(&config);
    validation_result.print();

    if validation_result.has_errors() {
        println!();
        println!(
            "{}",
            "Startup aborted due to configuration errors. Fix the errors above and try again."
                .red()
                .bold()
        );
        std::process::exit(1);
    }

    if validate_only {
        println!();
        println!(
            "{}",
            "Configuration is valid. Pipeline can be started."
                .green()
                .bold()
        );
        return Ok(());
    }

    println!();
    run_pipeline(config).await
}

async fn cmd_validate(config_path: PathBuf) -> Result<()> {
    println!(
        "Validating configuration: {}",
        config_path.display().to_string().cyan()
    );

    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("{}: {}", "Configuration file error".red().bold(), e);
            std::process::exit(1);
        }
    };

    let validation_result = ConfigValidator::validate(&config);
    validation_result.print();

    println!();
    println!("{}", "Configuration Summary".bold());
    println!("─────────────────────");
    println!("  Redis: {}", config.redis.url);
    println!("  Neo4j: {}", config.neo4j.uri);
    println!("  Partitions: {}", config.redis.partitions);
    println!("  Feeds: {}", config.feeds.len());
    println!("  Merge policy: {:?}", config.merge.confidence);

    if validation_result.has_errors() {
        println!();
        println!(
            "{}",
            "Configuration validation failed. Fix the errors above."
                .red()
                .bold()
        );
        std::process::exit(1);
    } else if validation_result.has_warnings() {
        println!();
        println!(
            "{}",
            "Configuration is valid with warnings. Review the warnings above."
                .yellow()
                .bold()
        );
    } else {
        println!();
        println!("{}", "Configuration is valid.".green().bold());
    }

    Ok(())
}

fn cmd_config(config: AppConfig, show_secrets: bool, format: OutputFormat) -> Result<()> {
    let display_config = if show_secrets {
        config
    } else {
        config.redact_secrets()
    };

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&display_config)?);
    } else {
        println!("{}", "Current Configuration".bold());
        println!("─────────────────────");
        println!("Redis: {}", display_config.redis.url);
        println!("Neo4j: {}", display_config.neo4j.uri);
        println!("Merge policy: {:?}", display_config.merge.confidence);
        println!("\nFeeds:");
        if display_config.feeds.is_empty() {
            println!("  (none configured)");
        }
        for (source, feed) in &display_config.feeds {
            println!(
                "  - {}: {} (every {}s)",
                source.to_string().cyan(),
                feed.base_url,
                feed.poll_interval_secs
            );
        }
    }

    Ok(())
}

async fn cmd_init_graph(config: AppConfig) -> Result<()> {
    println!(
        "Creating graph constraints on {}",
        config.neo4j.uri.cyan()
    );

    let store = Neo4jGraphStore::connect(&config.neo4j.to_store_config(), MergePolicy::default())
        .await
        .context("Failed to connect to Neo4j")?;
    store
        .ensure_constraints()
        .await
        .context("Failed to create constraints")?;

    println!("{}", "Graph constraints in place.".green());
    Ok(())
}

async fn cmd_seed(config: AppConfig, file: PathBuf, format: OutputFormat) -> Result<()> {
    let contents = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read records file: {}", file.display()))?;
    let records: Vec<RawRecord> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse records file: {}", file.display()))?;

    println!(
        "Seeding {} records from {}",
        records.len().to_string().cyan(),
        file.display()
    );

    let log = connect_log(&config).await?;
    let report = seed_records(
        log.as_ref(),
        &Normalizer::new(),
        &PipelineMetrics::new(),
        records,
    )
    .await?;

    if format == OutputFormat::Json {
        println!(
            "{}",
            serde_json::json!({
                "published": report.published,
                "dropped": report.dropped,
            })
        );
    } else {
        println!("  {} {} events published", "✓".green(), report.published);
        if report.dropped > 0 {
            println!(
                "  {} {} records dropped (malformed)",
                "⚠".yellow(),
                report.dropped
            );
        }
    }

    Ok(())
}

async fn cmd_dead_letters(
    config: AppConfig,
    topic: &str,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let topic = resolve_topic(topic)?;
    let log = connect_log(&config).await?;
    let letters = list_dead_letters(log.as_ref(), topic, limit).await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&letters)?);
        return Ok(());
    }

    println!("{} ({})", "Dead Letters".bold(), topic);
    println!("─────────────────────");
    if letters.is_empty() {
        println!("No dead-lettered events");
        return Ok(());
    }
    for letter in &letters {
        println!(
            "  {} [{}] {} - {}",
            letter.failed_at.format("%Y-%m-%d %H:%M:%S"),
            letter.event_id.as_str().cyan(),
            letter.key,
            letter.reason.red()
        );
    }
    println!();
    println!(
        "Replay with: threat-loom replay --topic {} --group <group>",
        topic
    );

    Ok(())
}

async fn cmd_replay(
    config: AppConfig,
    topic: &str,
    group: &str,
    event: Option<String>,
    partition: Option<u32>,
    yes: bool,
) -> Result<()> {
    let topic = resolve_topic(topic)?;
    let reset = match (event, partition) {
        (Some(id), Some(partition)) => OffsetReset::To {
            partition,
            id: EventId::new(id),
        },
        _ => OffsetReset::ToStart,
    };

    if !yes {
        println!(
            "{}: Reset offsets of group '{}' on topic '{}' ({:?})",
            "Confirm".yellow(),
            group,
            topic,
            reset
        );
        println!("(use --yes to proceed; the group will re-apply every replayed event)");
        return Ok(());
    }

    let log = connect_log(&config).await?;
    log.reset_offsets(topic, group, reset).await?;

    println!(
        "{} Offsets reset. Events will be re-applied idempotently.",
        "✓".green()
    );
    Ok(())
}

async fn connect_log(config: &AppConfig) -> Result<Arc<RedisEventLog>> {
    let log = RedisEventLog::new(config.redis.to_log_config())
        .await
        .context("Failed to connect to Redis event log")?;
    Ok(Arc::new(log))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_topic() {
        assert_eq!(resolve_topic("entities").unwrap(), TOPIC_ENTITIES);
        assert_eq!(
            resolve_topic("relationships").unwrap(),
            TOPIC_RELATIONSHIPS
        );
        assert!(resolve_topic("widgets").is_err());
    }

    #[test]
    fn test_output_format_parsing() {
        assert!(matches!("text".parse(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse(), Ok(OutputFormat::Json)));
        assert!("yaml".parse::<OutputFormat>().is_err());
    }
}
