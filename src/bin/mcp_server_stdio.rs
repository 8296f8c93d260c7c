//! GovDB MCP Server - STDIO transport.
//!
//! stdout carries JSON-RPC frames only; logs and startup diagnostics go
//! to stderr. The index loads once at startup and the process refuses to
//! start on a corrupt or partial index.

use anyhow::Result;
use clap::Parser;
use govdb::config::GovdbConfig;
use govdb::context::ServerContext;
use govdb::mcp::run_stdio_server;
use govdb::observability::init_logging;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "govdb-mcp-stdio", version, about = "GovDB MCP server (STDIO)")]
struct Args {
    /// Configuration file path.
    #[arg(short, long, env = "GOVDB_CONFIG", default_value = "govdb.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = GovdbConfig::load(Some(&args.config))?;
    init_logging(&config.logging.level)?;

    eprintln!(
        "starting govdb MCP server (stdio) v{}",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!("index directory: {}", config.paths.index_dir);

    let context = Arc::new(ServerContext::initialize(config)?);
    run_stdio_server(context).await
}
