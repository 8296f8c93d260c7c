// GovDB CLI - build, inspect, and query governance indices from the
// command line. The long-running MCP surface lives in the
// mcp_server_stdio binary; this one is for operators and CI.

use anyhow::Result;
use clap::{Parser, Subcommand};
use govdb::builders::QueryBuilder;
use govdb::config::GovdbConfig;
use govdb::context::ServerContext;
use govdb::embeddings::EmbeddingService;
use govdb::governance::EvaluateRequest;
use govdb::index_builder::build_index;
use govdb::index_loader::LoadedIndex;
use govdb::observability::init_logging;
use std::path::Path;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "govdb", version, about = "Semantic retrieval engine for AI governance content")]
struct Cli {
    /// Configuration file (TOML). Defaults are used when absent.
    #[arg(short, long, env = "GOVDB_CONFIG", default_value = "govdb.toml")]
    config: String,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extractor: parse the corpus, embed, and write the index.
    BuildIndex {
        /// Corpus manifest path; overrides the configured one.
        #[arg(long)]
        manifest: Option<String>,
        /// Output index directory; overrides the configured one.
        #[arg(long)]
        out: Option<String>,
    },
    /// Load an index and report its header and statistics.
    Validate {
        /// Index directory; overrides the configured one.
        #[arg(long)]
        index: Option<String>,
    },
    /// One-shot retrieval against the configured index.
    Query {
        text: String,
        /// Restrict routing to one domain.
        #[arg(long)]
        domain: Option<String>,
        #[arg(long, default_value_t = 10)]
        max_results: usize,
        /// Exclude methods from the ranking.
        #[arg(long)]
        no_methods: bool,
    },
    /// One-shot governance evaluation of a planned action.
    Evaluate {
        action: String,
        #[arg(long)]
        context: Option<String>,
        #[arg(long)]
        concerns: Option<String>,
    },
    /// Index, audit, and counter statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    init_logging(level)?;

    let config = GovdbConfig::load(Some(&cli.config))?;

    match cli.command {
        Commands::BuildIndex { manifest, out } => {
            let manifest_path = manifest.unwrap_or_else(|| config.paths.corpus_manifest.clone());
            let out_dir = out.unwrap_or_else(|| config.paths.index_dir.clone());
            let embeddings = EmbeddingService::new(config.embeddings.clone())
                .map_err(|e| anyhow::anyhow!("embedding provider: {e}"))?;

            let report =
                build_index(Path::new(&manifest_path), Path::new(&out_dir), &embeddings).await?;
            println!(
                "built index at {out_dir}: {} principles, {} methods, {} domains, dimension {}",
                report.principle_count,
                report.method_count,
                report.domain_count,
                report.dimension
            );
            println!("corpus sha256: {}", report.corpus_sha256);
        }
        Commands::Validate { index } => {
            let dir = index.unwrap_or_else(|| config.paths.index_dir.clone());
            let loaded = LoadedIndex::load(Path::new(&dir))?;
            let header = loaded.header();
            println!("index at {dir} is valid");
            println!(
                "  format v{}, dimension {}, {} items across {} domains",
                header.format_version, header.dimension, header.item_count, header.domain_count
            );
            println!("  embedding model: {}", header.embedding_model);
            println!("  corpus sha256: {}", header.corpus_sha256);
        }
        Commands::Query {
            text,
            domain,
            max_results,
            no_methods,
        } => {
            let context = Arc::new(ServerContext::initialize(config)?);
            let mut builder = QueryBuilder::new(text)
                .max_results(max_results)
                .include_methods(!no_methods);
            if let Some(domain) = domain {
                builder = builder.domain(domain);
            }
            let response = context.query_governance(builder.build()?).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Evaluate {
            action,
            context: eval_context,
            concerns,
        } => {
            let context = Arc::new(ServerContext::initialize(config)?);
            let request = EvaluateRequest::new(action, eval_context, concerns)?;
            let assessment = context.evaluate_governance(request).await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        Commands::Stats => {
            let context = Arc::new(ServerContext::initialize(config)?);
            println!("{}", serde_json::to_string_pretty(&context.stats())?);
        }
    }

    Ok(())
}
