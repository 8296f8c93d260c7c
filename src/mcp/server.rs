//! STDIO JSON-RPC server loop.
//!
//! One request per line on stdin, one response per line on stdout. All
//! diagnostics go to stderr; the core never prints to stdout outside the
//! protocol frames.

use crate::config::McpProtocolConfig;
use crate::context::ServerContext;
use crate::errors::GovernanceError;
use crate::mcp::tools::GovernanceTools;
use anyhow::Result;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::sync::Arc;
use tracing::{debug, warn};

/// Run the server until stdin closes.
pub async fn run_stdio_server(context: Arc<ServerContext>) -> Result<()> {
    let tools = GovernanceTools::new(context.clone());
    let protocol = context.config().mcp.clone();

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "discarding invalid JSON frame");
                continue;
            }
        };

        // Notifications carry no id and get no response.
        if request.get("id").is_none() {
            let notif_method = request.get("method").and_then(Value::as_str);
            debug!(method = notif_method, "notification");
            continue;
        }

        let response = handle_request(&request, &tools, &protocol, &context).await;
        let response_str = serde_json::to_string(&response)?;
        writeln!(stdout, "{response_str}")?;
        stdout.flush()?;
    }

    Ok(())
}

async fn handle_request(
    request: &Value,
    tools: &GovernanceTools,
    protocol: &McpProtocolConfig,
    context: &ServerContext,
) -> Value {
    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let id = request.get("id").cloned().unwrap_or(json!(1));

    match method {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": protocol.protocol_version,
                "serverInfo": {
                    "name": protocol.server_name,
                    "version": protocol.server_version
                },
                "capabilities": {
                    "tools": {},
                    "logging": {}
                }
            }
        }),
        "ping" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "status": "ok",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "version": protocol.server_version,
                "stats": context.stats()
            }
        }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": tools.get_tool_definitions()
            }
        }),
        "tools/call" => {
            let name = request
                .pointer("/params/name")
                .and_then(Value::as_str)
                .unwrap_or("");
            let arguments = request
                .pointer("/params/arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            match tools.handle_call(name, arguments).await {
                Ok(result) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": result
                }),
                Err(e) => error_response(id, &e),
            }
        }
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {
                "code": -32601,
                "message": "Method not found",
                "data": format!("unknown method: {method}")
            }
        }),
    }
}

fn error_response(id: Value, error: &GovernanceError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.rpc_code(),
            "message": error.to_string(),
            "data": {
                "kind": error.code(),
                "recoverable": error.is_recoverable()
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GovdbConfig;
    use crate::corpus::{CorpusManifest, DomainEntry};
    use crate::embeddings::{EmbeddingConfig, EmbeddingService};
    use crate::index_builder::build_index_from_manifest;

    async fn context(dir: &std::path::Path) -> Arc<ServerContext> {
        std::fs::write(
            dir.join("p.md"),
            "# C\n\n## S-Series\n\n### Never Destroy User Data\n\n\
             Destroying user data is **irreversible harm**.\n",
        )
        .unwrap();
        std::fs::write(dir.join("m.md"), "# M\n\n## Checklist\n\nAsk.\n").unwrap();
        let manifest = CorpusManifest {
            domains: vec![DomainEntry {
                name: "constitution".into(),
                description: "rules".into(),
                priority: 0,
                prefix: "const".into(),
                principles_file: "p.md".into(),
                methods_file: "m.md".into(),
            }],
        };
        let out = dir.join("index");
        let embeddings = EmbeddingService::new(EmbeddingConfig::default()).unwrap();
        build_index_from_manifest(&manifest, dir, &out, &embeddings)
            .await
            .unwrap();

        let mut config = GovdbConfig::default();
        config.paths.index_dir = out.to_string_lossy().into_owned();
        config.retrieval.domain_threshold = -1.0;
        Arc::new(ServerContext::initialize(config).unwrap())
    }

    #[tokio::test]
    async fn test_initialize_and_tool_listing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let tools = GovernanceTools::new(ctx.clone());
        let protocol = ctx.config().mcp.clone();

        let response = handle_request(
            &json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"}),
            &tools,
            &protocol,
            &ctx,
        )
        .await;
        assert_eq!(response["result"]["serverInfo"]["name"], "govdb");

        let response = handle_request(
            &json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
            &tools,
            &protocol,
            &ctx,
        )
        .await;
        let listed = response["result"]["tools"].as_array().unwrap();
        assert_eq!(listed.len(), 6);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let tools = GovernanceTools::new(ctx.clone());
        let protocol = ctx.config().mcp.clone();

        let response = handle_request(
            &json!({
                "jsonrpc": "2.0",
                "id": 7,
                "method": "tools/call",
                "params": {
                    "name": "query_governance",
                    "arguments": {"query": "destroying user data", "max_results": 5}
                }
            }),
            &tools,
            &protocol,
            &ctx,
        )
        .await;
        assert_eq!(response["id"], 7);
        assert!(response["result"]["hits"].is_array());
    }

    #[tokio::test]
    async fn test_invalid_input_maps_to_rpc_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path()).await;
        let tools = GovernanceTools::new(ctx.clone());
        let protocol = ctx.config().mcp.clone();

        let response = handle_request(
            &json!({
                "jsonrpc": "2.0",
                "id": 8,
                "method": "tools/call",
                "params": {"name": "query_governance", "arguments": {"query": ""}}
            }),
            &tools,
            &protocol,
            &ctx,
        )
        .await;
        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["error"]["data"]["kind"], "INVALID_INPUT");

        let response = handle_request(
            &json!({
                "jsonrpc": "2.0",
                "id": 9,
                "method": "tools/call",
                "params": {"name": "get_principle", "arguments": {"id": "const-s-nope"}}
            }),
            &tools,
            &protocol,
            &ctx,
        )
        .await;
        assert_eq!(response["error"]["code"], -32001);
    }
}
