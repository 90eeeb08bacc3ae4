//! Stdio tool server.
//!
//! Newline-delimited JSON-RPC 2.0 on stdin/stdout exposing a single
//! `review_code` tool. Requests are handled concurrently (calls for different
//! projects review in parallel; calls for one project queue on its key) and a
//! single writer task owns stdout so responses never interleave.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use quibbler_core::ReviewReply;
use quibbler_runtime::ReviewEngine;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// Protocol version offered when the client does not name one.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
/// The one exposed tool.
pub const REVIEW_TOOL: &str = "review_code";

const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

const REVIEW_TOOL_DESCRIPTION: &str = "\
Review completed code changes after implementation. Call this AFTER writing \
code to get feedback from Quibbler. Quibbler checks for quality issues, \
pattern violations, and hallucinated claims, and that the changes match what \
the user asked for.";

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ReviewCodeArgs {
    user_instructions: String,
    agent_plan: String,
    project_path: String,
}

/// Serves `review_code` over a line-oriented byte stream.
pub struct ToolServer {
    engine: Arc<ReviewEngine>,
    log_path: PathBuf,
}

impl ToolServer {
    /// `log_path` is quoted in error results so the caller knows where to look.
    pub fn new(engine: Arc<ReviewEngine>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            log_path: log_path.into(),
        }
    }

    /// Run until `reader` reaches EOF or `cancel` fires. In-flight calls are
    /// answered before returning.
    pub async fn serve<R, W>(
        self: Arc<Self>,
        reader: R,
        writer: W,
        cancel: CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(async move {
            let mut sink = FramedWrite::new(writer, LinesCodec::new());
            while let Some(line) = rx.recv().await {
                sink.send(line).await.map_err(codec_to_io)?;
            }
            Ok::<(), std::io::Error>(())
        });

        let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
        let mut calls = JoinSet::new();
        info!("tool server listening on stdio");

        let read_result = loop {
            let next = tokio::select! {
                () = cancel.cancelled() => break Ok(()),
                next = lines.next() => next,
            };
            let line = match next {
                None => break Ok(()),
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    let error = JsonRpcError::parse_error("Request line too long");
                    send(&tx, &JsonRpcResponse::error(Value::Null, error));
                    continue;
                }
                Some(Err(LinesCodecError::Io(error))) => break Err(error),
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(request) => request,
                Err(error) => {
                    let error = JsonRpcError::parse_error(format!("Invalid JSON: {error}"));
                    send(&tx, &JsonRpcResponse::error(Value::Null, error));
                    continue;
                }
            };
            if request.is_notification() {
                debug!(method = %request.method, "notification ignored");
                continue;
            }

            while let Some(result) = calls.try_join_next() {
                log_join_error(result);
            }
            let server = Arc::clone(&self);
            let tx = tx.clone();
            let _ = calls.spawn(async move {
                if let Some(response) = server.handle(request).await {
                    send(&tx, &response);
                }
            });
        };

        while let Some(result) = calls.join_next().await {
            log_join_error(result);
        }
        drop(tx);
        let write_result = writer_task
            .await
            .unwrap_or_else(|error| Err(std::io::Error::other(error)));
        info!("tool server stopped");
        read_result.and(write_result)
    }

    /// Answer one request. `None` for notifications.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone()?;
        if request.jsonrpc != crate::rpc::JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, initialize_result(request.params.as_ref())),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": [review_tool_schema()] })),
            "tools/call" => match self.call_tool(request.params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(error) => JsonRpcResponse::error(id, error),
            },
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };
        Some(response)
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = serde_json::from_value(params.unwrap_or(Value::Null))
            .map_err(|error| JsonRpcError::invalid_params(format!("Invalid tool call params: {error}")))?;
        if params.name != REVIEW_TOOL {
            return Ok(tool_error(format!("Unknown tool: {}", params.name)));
        }
        let args: ReviewCodeArgs = serde_json::from_value(params.arguments)
            .map_err(|error| JsonRpcError::invalid_params(format!("Invalid {REVIEW_TOOL} arguments: {error}")))?;

        info!(project = %args.project_path, "review requested");
        match self
            .engine
            .review_code(Path::new(&args.project_path), &args.user_instructions, &args.agent_plan)
            .await
        {
            Ok(reply) => Ok(tool_success(&reply)),
            Err(error) => {
                warn!(project = %args.project_path, %error, "review_code failed");
                Ok(tool_error(format!(
                    "Review failed: {error}. See {} for details.",
                    self.log_path.display()
                )))
            }
        }
    }
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

fn initialize_result(params: Option<&Value>) -> Value {
    let version = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(MCP_PROTOCOL_VERSION);
    json!({
        "protocolVersion": version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": "quibbler", "version": env!("CARGO_PKG_VERSION") },
    })
}

fn review_tool_schema() -> Value {
    json!({
        "name": REVIEW_TOOL,
        "description": REVIEW_TOOL_DESCRIPTION,
        "inputSchema": {
            "type": "object",
            "properties": {
                "user_instructions": {
                    "type": "string",
                    "description": "The exact instructions the user gave"
                },
                "agent_plan": {
                    "type": "string",
                    "description": "Concrete summary of the changes made: files touched, what was added or changed, key implementation details"
                },
                "project_path": {
                    "type": "string",
                    "description": "Absolute path to the project directory"
                }
            },
            "required": ["user_instructions", "agent_plan", "project_path"]
        }
    })
}

fn tool_success(reply: &ReviewReply) -> Value {
    let verdict = reply.verdict.as_str().to_uppercase();
    let text = if reply.feedback_text.is_empty() {
        format!("VERDICT: {verdict}")
    } else {
        format!("VERDICT: {verdict}\n\n{}", reply.feedback_text)
    };
    json!({
        "content": [{ "type": "text", "text": text }],
        "structuredContent": {
            "verdict": reply.verdict.as_str(),
            "feedback_text": reply.feedback_text,
        },
        "isError": false,
    })
}

fn tool_error(message: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": message }],
        "isError": true,
    })
}

fn send(tx: &mpsc::UnboundedSender<String>, response: &JsonRpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if tx.send(line).is_err() {
                warn!("stdout writer closed, dropping response");
            }
        }
        Err(error) => warn!(%error, "failed to serialize response"),
    }
}

fn codec_to_io(error: LinesCodecError) -> std::io::Error {
    match error {
        LinesCodecError::Io(error) => error,
        LinesCodecError::MaxLineLengthExceeded => std::io::Error::other("line too long"),
    }
}

fn log_join_error(result: Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        warn!(%error, "tool call task panicked");
    }
}
