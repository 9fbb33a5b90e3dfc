//! Lore CLI - store and retrieve agent patterns

use clap::{Parser, Subcommand};
use lore_core::config::Config;
use lore_core::domain::knowledge::{Modality, PatternRecord};
use lore_core::domain::search::QueryContext;
use lore_core::storage::{Database, DatabaseConfig};
use lore_core::{KnowledgeEngine, QueryRequest};
use tracing::warn;

#[derive(Parser)]
#[command(name = "lore")]
#[command(author, version, about = "Pattern knowledge graph and retrieval engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum ModalityArg {
    #[default]
    Text,
    Image,
    Diagram,
}

impl From<ModalityArg> for Modality {
    fn from(arg: ModalityArg) -> Self {
        match arg {
            ModalityArg::Text => Modality::Text,
            ModalityArg::Image => Modality::Image,
            ModalityArg::Diagram => Modality::Diagram,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Store a pattern
    Add {
        /// Pattern text
        pattern: String,
        /// Pattern id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
        /// Example code
        #[arg(long)]
        code: Option<String>,
        /// Agent that produced the pattern
        #[arg(short, long)]
        agent: Option<String>,
        /// Pattern category
        #[arg(short, long)]
        category: Option<String>,
        /// Tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
        /// Effectiveness between 0.0 and 1.0
        #[arg(short, long)]
        effectiveness: Option<f32>,
        /// Pattern modality
        #[arg(long, default_value = "text")]
        modality: ModalityArg,
    },

    /// Find patterns relevant to a query
    Query {
        /// Query text
        text: String,
        /// Only patterns from this agent
        #[arg(short, long)]
        agent: Option<String>,
        /// Only patterns in this category
        #[arg(short, long)]
        category: Option<String>,
        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,
        /// Minimum relevance score
        #[arg(long)]
        min_relevance: Option<f32>,
        /// Project language
        #[arg(long)]
        language: Option<String>,
        /// Project framework
        #[arg(long)]
        framework: Option<String>,
        /// Agent making the request
        #[arg(long)]
        requesting_agent: Option<String>,
        /// Prefer image and diagram patterns
        #[arg(long)]
        images: bool,
    },

    /// Show knowledge graph statistics
    Stats {
        /// Number of top entities to show
        #[arg(long, default_value = "5")]
        top: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("lore=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Add {
            pattern,
            id,
            description,
            code,
            agent,
            category,
            tags,
            effectiveness,
            modality,
        } => {
            let mut record = PatternRecord::new(pattern)
                .with_tags(tags)
                .with_modality(modality.into());
            if let Some(id) = id {
                record = record.with_id(id);
            }
            if let Some(description) = description {
                record = record.with_description(description);
            }
            if let Some(code) = code {
                record = record.with_code(code);
            }
            if let Some(agent) = agent {
                record = record.with_agent(agent);
            }
            if let Some(category) = category {
                record = record.with_category(category);
            }
            if let Some(effectiveness) = effectiveness {
                record = record.with_effectiveness(effectiveness);
            }
            cmd_add(record, cli.format, cli.quiet).await
        }

        Commands::Query {
            text,
            agent,
            category,
            limit,
            min_relevance,
            language,
            framework,
            requesting_agent,
            images,
        } => {
            let mut context = QueryContext::new().with_images(images);
            context.language = language;
            context.framework = framework;
            context.agent_id = requesting_agent;

            let request = QueryRequest {
                text,
                agent,
                category,
                limit,
                min_relevance,
                context,
            };
            cmd_query(request, cli.format, cli.quiet).await
        }

        Commands::Stats { top } => cmd_stats(top, cli.format, cli.quiet).await,

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(cli.quiet).await,
    }
}

async fn open_engine() -> anyhow::Result<KnowledgeEngine> {
    let config = Config::load()?;
    KnowledgeEngine::open(config).await
}

async fn cmd_add(record: PatternRecord, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let engine = open_engine().await?;
    let id = engine.add_pattern(record).await?;
    let degraded = engine.is_degraded();
    engine.shutdown().await;

    if degraded {
        warn!(pattern_id = %id, "Pattern was not written to the database");
    }

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "id": id, "persisted": !degraded }))?
            );
        }
        OutputFormat::Text if quiet => println!("{}", id),
        OutputFormat::Text => println!("Pattern stored: {}", id),
    }
    Ok(())
}

async fn cmd_query(request: QueryRequest, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let engine = open_engine().await?;
    let response = engine.query(request).await?;
    engine.shutdown().await;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    for warning in &response.warnings {
        eprintln!("warning: {}", warning);
    }

    if response.results.is_empty() {
        if !quiet {
            println!("No matching patterns.");
        }
        return Ok(());
    }

    for (rank, result) in response.results.iter().enumerate() {
        if quiet {
            println!("{}", result.pattern_id);
            continue;
        }
        println!("{}. {} ({:.3})", rank + 1, result.pattern.pattern, result.score);
        println!("   id: {}", result.pattern_id);
        if !result.explanation.is_empty() {
            println!("   via: {}", result.explanation);
        }
    }
    Ok(())
}

async fn cmd_stats(top: usize, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let engine = open_engine().await?;
    let stats = engine.graph_stats(top).await;
    engine.shutdown().await;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Nodes: {}", stats.node_count);
    println!("Edges: {}", stats.edge_count);
    if quiet {
        return Ok(());
    }
    for (node_type, count) in &stats.nodes_by_type {
        println!("  {}: {}", node_type, count);
    }
    println!("Average degree: {:.2}", stats.average_degree);
    if !stats.top_entities.is_empty() {
        println!("Top entities:");
        for entity in &stats.top_entities {
            println!(
                "  {} ({}) degree {} centrality {:.3}",
                entity.label, entity.node_type, entity.degree, entity.centrality
            );
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("Lore Health Check");
        println!("=================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            println!("[ERROR] Configuration: {}", e);
            all_ok = false;
            Config::default()
        }
    };

    let path = config.storage.resolved_database_path()?;
    match Database::new(DatabaseConfig::with_path(&path)).await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) if !quiet => println!("[OK] Database: {}", path.display()),
                Ok(()) => {}
                Err(e) => {
                    println!("[ERROR] Database: {}", e);
                    all_ok = false;
                }
            }
            match db.migration_status().await {
                Ok(status) if status.needs_migration => {
                    println!(
                        "[WARN] Schema: version {} of {}",
                        status.current_version, status.target_version
                    );
                }
                Ok(status) if !quiet => println!("[OK] Schema: version {}", status.current_version),
                Ok(_) => {}
                Err(e) => {
                    println!("[ERROR] Schema: {}", e);
                    all_ok = false;
                }
            }
            db.close().await;
        }
        Err(e) => {
            println!("[ERROR] Database: {:#}", e);
            all_ok = false;
        }
    }

    if !all_ok {
        anyhow::bail!("Health check failed");
    }
    if !quiet {
        println!();
        println!("All checks passed.");
    }
    Ok(())
}
