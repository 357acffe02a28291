//! Line-delimited JSON tool protocol over a byte stream.
//!
//! Two method kinds: `tools/list` advertises the registry, `tools/call`
//! executes a tool and wraps its JSON output as text content. Errors map
//! from the error taxonomy to `{code, message}` protocol errors. The stream
//! loop is generic over reader and writer so tests can drive it with
//! in-memory pipes; the binary points it at stdin/stdout.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use mementa_core::{mask_sensitive, Error, PolicyOverride, Result};

use crate::registry::{ToolContext, ToolRegistry};

#[derive(Debug, Deserialize)]
struct RpcRequest {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
    /// Per-call execution policy override.
    #[serde(default)]
    policy: Option<PolicyOverride>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// The protocol adapter: owns the registry and the shared tool context.
pub struct ProtocolServer {
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
}

impl ProtocolServer {
    pub fn new(registry: Arc<ToolRegistry>, ctx: Arc<ToolContext>) -> Self {
        ProtocolServer { registry, ctx }
    }

    /// Serve requests line by line until EOF or `shutdown` resolves.
    pub async fn serve<R, W, S>(&self, reader: R, writer: W, shutdown: S) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
        S: std::future::Future<Output = ()>,
    {
        let mut lines = BufReader::new(reader).lines();
        let mut writer = writer;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("protocol adapter shutting down");
                    break;
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            let response = self.handle_line(&line).await;
                            let mut payload = serde_json::to_string(&response)?;
                            payload.push('\n');
                            writer.write_all(payload.as_bytes()).await?;
                            writer.flush().await?;
                        }
                        Ok(None) => {
                            tracing::info!("protocol stream closed");
                            break;
                        }
                        Err(err) => {
                            tracing::error!(error = %err, "protocol read failed");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Handle one request line, always producing a response object.
    pub async fn handle_line(&self, line: &str) -> Value {
        let request: RpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                return error_response(
                    Value::Null,
                    -32700,
                    &format!("unparseable request: {err}"),
                );
            }
        };
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "tools/list" => {
                let tools = self.registry.descriptors();
                json!({ "id": id, "result": { "tools": tools } })
            }
            "tools/call" => {
                let params: CallParams = match request
                    .params
                    .map(serde_json::from_value)
                    .transpose()
                {
                    Ok(Some(params)) => params,
                    Ok(None) => {
                        return error_response(id, -32602, "tools/call requires params");
                    }
                    Err(err) => {
                        return error_response(id, -32602, &format!("bad params: {err}"));
                    }
                };

                let arguments = params.arguments.unwrap_or_else(|| json!({}));
                match self
                    .registry
                    .execute(&params.name, arguments, &self.ctx, params.policy)
                    .await
                {
                    Ok(result) => {
                        let text = serde_json::to_string_pretty(&result)
                            .unwrap_or_else(|_| result.to_string());
                        json!({
                            "id": id,
                            "result": {
                                "content": [{ "type": "text", "text": text }],
                            }
                        })
                    }
                    Err(err) => {
                        error_response(id, err.protocol_code(), &mask_sensitive(&err.to_string()))
                    }
                }
            }
            other => error_response(
                id,
                Error::InvalidRequest(String::new()).protocol_code(),
                &format!("unknown method: {other:?}"),
            ),
        }
    }
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "id": id,
        "error": RpcError {
            code,
            message: message.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{parse_input, Tool, ToolRegistry};
    use crate::session::SessionStore;
    use crate::tools::register_builtin;
    use async_trait::async_trait;
    use mementa_core::{EventBus, RuntimeConfig};
    use mementa_index::{Database, DbOptions, SearchEngine};
    use mementa_vault::{
        BacklinkSynchronizer, NoteStore, OrganizerOptions, ParaOrganizer, SyncOptions, VaultLayout,
    };
    use schemars::schema::RootSchema;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use tempfile::TempDir;

    async fn server(dir: &TempDir) -> ProtocolServer {
        let store = Arc::new(NoteStore::new(dir.path()));
        let bus = Arc::new(EventBus::default());
        let organizer = Arc::new(ParaOrganizer::new(
            store.clone(),
            VaultLayout::new(dir.path()),
            OrganizerOptions::default(),
            bus.clone(),
        ));
        let synchronizer = Arc::new(BacklinkSynchronizer::new(
            store.clone(),
            bus.clone(),
            SyncOptions::default(),
        ));
        let db = Database::open(&dir.path().join("index.db"), DbOptions::default())
            .await
            .unwrap();
        let engine = Arc::new(SearchEngine::new(db).with_bus(bus.clone()));

        let mut registry = ToolRegistry::new();
        register_builtin(&mut registry);

        let ctx = Arc::new(ToolContext {
            store,
            organizer,
            synchronizer,
            engine,
            sessions: Arc::new(SessionStore::default()),
            bus,
            config: RuntimeConfig::for_vault(dir.path()),
        });
        ProtocolServer::new(Arc::new(registry), ctx)
    }

    #[tokio::test]
    async fn test_tools_list_advertises_all_builtins() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        let response = server
            .handle_line(r#"{"id": 1, "method": "tools/list"}"#)
            .await;
        let tools = response["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();

        for expected in [
            "associative_search",
            "create_note",
            "delete_note",
            "explore_links",
            "reflect_session",
            "search_memory",
            "session_context",
            "update_note",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
        assert!(tools
            .iter()
            .all(|t| t["input_schema"].is_object() && t["description"].is_string()));
    }

    #[tokio::test]
    async fn test_create_then_search_end_to_end() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        let create = json!({
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": "create_note",
                "arguments": {
                    "title": "Index optimization",
                    "content": "FTS5 tuning tips",
                    "category": "Resources",
                    "tags": ["index", "fts5"],
                }
            }
        });
        let response = server.handle_line(&create.to_string()).await;
        assert!(response.get("error").is_none(), "create failed: {response}");
        let created_text = response["result"]["content"][0]["text"].as_str().unwrap();
        let created: Value = serde_json::from_str(created_text).unwrap();
        let note_id = created["id"].as_str().unwrap().to_string();

        let search = json!({
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "search_memory",
                "arguments": { "query": "FTS5" }
            }
        });
        let response = server.handle_line(&search.to_string()).await;
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let result: Value = serde_json::from_str(text).unwrap();

        let results = result["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["uid"].as_str().unwrap(), note_id);
        assert!(results[0]["snippet"]
            .as_str()
            .unwrap()
            .contains("<mark>FTS5</mark>"));
        assert_eq!(result["metrics"]["returned_results"], 1);
    }

    #[tokio::test]
    async fn test_update_note_category_change_moves_file() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        let create = json!({
            "id": 1,
            "method": "tools/call",
            "params": {
                "name": "create_note",
                "arguments": { "title": "Routine checklist", "content": "daily" }
            }
        });
        let response = server.handle_line(&create.to_string()).await;
        let created: Value = serde_json::from_str(
            response["result"]["content"][0]["text"].as_str().unwrap(),
        )
        .unwrap();
        let note_id = created["id"].as_str().unwrap().to_string();
        assert!(created["path"]
            .as_str()
            .unwrap()
            .contains("3-Resources"));

        let update = json!({
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "update_note",
                "arguments": { "id": note_id, "category": "Areas" }
            }
        });
        let response = server.handle_line(&update.to_string()).await;
        assert!(response.get("error").is_none(), "update failed: {response}");
        let updated: Value = serde_json::from_str(
            response["result"]["content"][0]["text"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(updated["category"], "Areas");
        assert!(updated["path"].as_str().unwrap().contains("2-Areas"));
        assert!(!dir
            .path()
            .join("3-Resources/Routine-checklist.md")
            .exists());
        assert!(dir.path().join("2-Areas/Routine-checklist.md").exists());
    }

    #[tokio::test]
    async fn test_delete_of_unknown_uid_is_noop_success() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;
        let ghost = mementa_core::generate_uid();

        let delete = json!({
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "delete_note",
                "arguments": { "id": ghost.as_str() }
            }
        });
        let response = server.handle_line(&delete.to_string()).await;
        assert!(response.get("error").is_none());
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let result: Value = serde_json::from_str(text).unwrap();
        assert_eq!(result["deleted"], false);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_method_errors() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        let response = server
            .handle_line(r#"{"id": 4, "method": "tools/call", "params": {"name": "no_such_tool"}}"#)
            .await;
        assert_eq!(response["error"]["code"], -32601);

        let response = server
            .handle_line(r#"{"id": 5, "method": "resources/list"}"#)
            .await;
        assert_eq!(response["error"]["code"], -32601);

        let response = server.handle_line("this is not json").await;
        assert_eq!(response["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_schema_validation_error_surfaces() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        // `query` is required and missing.
        let response = server
            .handle_line(
                r#"{"id": 6, "method": "tools/call", "params": {"name": "search_memory", "arguments": {"limit": 5}}}"#,
            )
            .await;
        assert_eq!(response["error"]["code"], -32602);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("search_memory"));
    }

    #[tokio::test]
    async fn test_reflect_session_unknown_session_is_invalid_request() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        let response = server
            .handle_line(
                r#"{"id": 7, "method": "tools/call", "params": {"name": "reflect_session", "arguments": {"session_id": "never-seen"}}}"#,
            )
            .await;
        assert_eq!(response["error"]["code"], -32601);
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("never-seen"));
    }

    #[tokio::test]
    async fn test_serve_loop_over_in_memory_stream() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;

        let input = r#"{"id": 1, "method": "tools/list"}"#.to_string() + "\n";
        let mut output: Vec<u8> = Vec::new();
        server
            .serve(input.as_bytes(), &mut output, std::future::pending())
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let response: Value = serde_json::from_str(text.trim()).unwrap();
        assert!(response["result"]["tools"].as_array().unwrap().len() >= 8);
    }

    /// Flaky tool used by the retry scenario below.
    struct Flaky {
        failures: std::sync::atomic::AtomicU32,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct FlakyInput {}

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn description(&self) -> &'static str {
            "fails twice, then succeeds"
        }
        fn input_schema(&self) -> RootSchema {
            schemars::schema_for!(FlakyInput)
        }
        fn validate(&self, input: &Value) -> mementa_core::Result<()> {
            parse_input::<FlakyInput>(self.name(), input).map(|_| ())
        }
        async fn run(
            &self,
            _input: Value,
            _ctx: &ToolContext,
        ) -> mementa_core::Result<Value> {
            let n = self
                .failures
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n < 2 {
                Err(mementa_core::Error::Write("transient".into()))
            } else {
                Ok(json!({ "attempts": n + 1 }))
            }
        }
    }

    #[tokio::test]
    async fn test_retry_policy_through_protocol() {
        let dir = TempDir::new().unwrap();
        let server = server(&dir).await;
        // Splice the flaky tool into a fresh registry sharing the context.
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Flaky {
            failures: Default::default(),
        }));
        let server = ProtocolServer::new(Arc::new(registry), server.ctx.clone());

        let call = json!({
            "id": 8,
            "method": "tools/call",
            "params": {
                "name": "flaky",
                "arguments": {},
                "policy": { "timeout_ms": 1000, "max_retries": 2 }
            }
        });
        let response = server.handle_line(&call.to_string()).await;
        assert!(response.get("error").is_none(), "expected success: {response}");
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        let result: Value = serde_json::from_str(text).unwrap();
        assert_eq!(result["attempts"], 3);
    }

    #[tokio::test]
    async fn test_retry_budget_too_small_surfaces_last_error() {
        let dir = TempDir::new().unwrap();
        let base = server(&dir).await;
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Flaky {
            failures: Default::default(),
        }));
        let server = ProtocolServer::new(Arc::new(registry), base.ctx.clone());

        let call = json!({
            "id": 9,
            "method": "tools/call",
            "params": {
                "name": "flaky",
                "arguments": {},
                "policy": { "max_retries": 1 }
            }
        });
        let response = server.handle_line(&call.to_string()).await;
        assert!(response["error"]["message"]
            .as_str()
            .unwrap()
            .contains("transient"));
    }
}
