//! Arbor MCP Server - analysis, trees, search and Q&A over stdio JSON-RPC

use arbor_core::{
    answer_question, select_context, Action, AnalysisRunner, ArborError, Caller, Config,
    LexicalScorer, NoProgress, NodeIndex, RetryPolicy, SummaryCache, TreeNode,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = std::env::var_os("ARBOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("arbor.toml"));
    let server = match Config::load_or_default(&config_path).and_then(McpServer::open) {
        Ok(server) => server,
        Err(e) => {
            error!(config = %config_path.display(), error = %e, "failed to start");
            std::process::exit(1);
        }
    };
    info!(config = %config_path.display(), "arbor-mcp ready");

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let reader = BufReader::new(stdin.lock());

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        if line.is_empty() {
            continue;
        }

        let response = server.handle_request(&line);
        if let Some(resp) = response {
            let _ = writeln!(stdout, "{}", resp);
            let _ = stdout.flush();
        }
    }
}

struct McpServer {
    runner: Arc<AnalysisRunner>,
    runtime: tokio::runtime::Runtime,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

type ToolResult = Result<Value, (i32, String)>;

fn tool_error(e: ArborError) -> (i32, String) {
    (-32000, e.to_string())
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, (i32, String)> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| (-32602, format!("Missing '{}' parameter", name)))
}

/// Drop everything more than `depth` levels below `node`.
fn prune(node: &mut TreeNode, depth: usize) {
    if depth == 0 {
        node.children.clear();
        return;
    }
    for child in &mut node.children {
        prune(child, depth - 1);
    }
}

impl McpServer {
    fn open(config: Config) -> arbor_core::Result<Self> {
        let index = Arc::new(NodeIndex::open(&config.storage.database)?);
        index.fail_stale_tasks()?;
        let runner = Arc::new(AnalysisRunner::from_config(config, index)?);
        let runtime = tokio::runtime::Runtime::new()?;
        Ok(Self { runner, runtime })
    }

    fn handle_request(&self, line: &str) -> Option<String> {
        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                return Some(
                    json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": { "code": -32700, "message": format!("Parse error: {}", e) }
                    })
                    .to_string(),
                );
            }
        };

        let id = req.id.clone().unwrap_or(Value::Null);

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(&req.params),
            "notifications/initialized" => return None,
            _ => Err((-32601, format!("Method not found: {}", req.method))),
        };

        let response = match result {
            Ok(value) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(value),
                error: None,
            },
            Err((code, message)) => JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(JsonRpcError { code, message }),
            },
        };

        serde_json::to_string(&response).ok()
    }

    fn handle_initialize(&self) -> ToolResult {
        Ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": "arbor-mcp",
                "version": env!("CARGO_PKG_VERSION")
            }
        }))
    }

    fn handle_tools_list(&self) -> ToolResult {
        Ok(json!({
            "tools": [
                {
                    "name": "analyze_repository",
                    "description": "Summarize every file and folder of a local directory or git URL. Runs to completion and returns the task record; its result_id is the snapshot id.",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "origin": {
                                "type": "string",
                                "description": "Directory path or git URL (e.g., 'https://github.com/org/repo')"
                            }
                        },
                        "required": ["origin"]
                    }
                },
                {
                    "name": "get_repository_tree",
                    "description": "Tree of a snapshot's files and folders with their summaries",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "snapshot_id": {
                                "type": "string",
                                "description": "Snapshot id returned by analyze_repository"
                            },
                            "depth": {
                                "type": "integer",
                                "description": "Only include this many levels below the root"
                            }
                        },
                        "required": ["snapshot_id"]
                    }
                },
                {
                    "name": "search_repository",
                    "description": "Rank summaries against a query, across all snapshots or one",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": {
                                "type": "string",
                                "description": "Search terms"
                            },
                            "snapshot_id": {
                                "type": "string",
                                "description": "Restrict results to one snapshot"
                            },
                            "limit": {
                                "type": "integer",
                                "description": "Maximum hits"
                            }
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "ask_repository_question",
                    "description": "Answer a question from the best-matching summaries of a snapshot",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "snapshot_id": {
                                "type": "string",
                                "description": "Snapshot id returned by analyze_repository"
                            },
                            "question": {
                                "type": "string",
                                "description": "Question about the code"
                            }
                        },
                        "required": ["snapshot_id", "question"]
                    }
                }
            ]
        }))
    }

    fn handle_tools_call(&self, params: &Option<Value>) -> ToolResult {
        let params = params
            .as_ref()
            .ok_or((-32602, "Missing params".to_string()))?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or((-32602, "Missing tool name".to_string()))?;
        let empty = json!({});
        let args = params.get("arguments").unwrap_or(&empty);

        let result = match name {
            "analyze_repository" => self.tool_analyze(args),
            "get_repository_tree" => self.tool_tree(args),
            "search_repository" => self.tool_search(args),
            "ask_repository_question" => self.tool_ask(args),
            _ => return Err((-32602, format!("Unknown tool: {}", name))),
        }?;

        let text = serde_json::to_string_pretty(&result)
            .map_err(|e| (-32000, format!("Failed to encode result: {}", e)))?;
        Ok(json!({
            "content": [{
                "type": "text",
                "text": text
            }]
        }))
    }

    fn tool_analyze(&self, args: &Value) -> ToolResult {
        let origin = required_str(args, "origin")?;
        let task = self
            .runtime
            .block_on(self.runner.run(origin, Caller::anonymous(), &NoProgress))
            .map_err(tool_error)?;
        info!(task_id = %task.id, status = task.status.as_str(), "analyze_repository");
        serde_json::to_value(&task).map_err(|e| (-32000, e.to_string()))
    }

    fn tool_tree(&self, args: &Value) -> ToolResult {
        let snapshot_id = required_str(args, "snapshot_id")?;
        let mut tree = self
            .runner
            .index()
            .tree(snapshot_id)
            .map_err(tool_error)?
            .ok_or_else(|| tool_error(ArborError::NotFound(format!("snapshot {}", snapshot_id))))?;
        if let Some(depth) = args.get("depth").and_then(|v| v.as_u64()) {
            prune(&mut tree, depth as usize);
        }
        serde_json::to_value(&tree).map_err(|e| (-32000, e.to_string()))
    }

    fn tool_search(&self, args: &Value) -> ToolResult {
        let query = required_str(args, "query")?;
        let snapshot_id = args.get("snapshot_id").and_then(|v| v.as_str());
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize);
        let hits = arbor_core::search(
            self.runner.index(),
            &LexicalScorer,
            query,
            snapshot_id,
            limit,
            &self.runner.config().search,
        )
        .map_err(tool_error)?;
        Ok(json!({ "query": query, "results": hits }))
    }

    fn tool_ask(&self, args: &Value) -> ToolResult {
        let snapshot_id = required_str(args, "snapshot_id")?;
        let question = required_str(args, "question")?;
        let config = self.runner.config();
        let index = self.runner.index();
        let snapshot = index
            .get_snapshot(snapshot_id)
            .map_err(tool_error)?
            .ok_or_else(|| tool_error(ArborError::NotFound(format!("snapshot {}", snapshot_id))))?;

        let caller = Caller::anonymous();
        let access = self.runner.access();
        access
            .authorize(&caller, Action::Ask, &snapshot.id)
            .map_err(tool_error)?;

        let cache = SummaryCache::for_snapshot(&snapshot, &config.storage.sidecar_extension);
        let retry = RetryPolicy::from_config(&config.summarizer);
        let answered = select_context(
            index,
            &LexicalScorer,
            &snapshot.id,
            &cache,
            question,
            config.search.qa_top_k,
        )
        .and_then(|context| {
            self.runtime.block_on(answer_question(
                self.runner.summarizer().as_ref(),
                &retry,
                &context,
                question,
            ))
        });

        match answered {
            Ok(answer) => {
                access.record_usage(&caller, Action::Ask, &snapshot.id);
                serde_json::to_value(&answer).map_err(|e| (-32000, e.to_string()))
            }
            Err(e) => {
                access.release(&caller, Action::Ask, &snapshot.id);
                Err(tool_error(e))
            }
        }
    }
}
