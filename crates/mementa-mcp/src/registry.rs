//! Tool registry and execution policy.
//!
//! Tools are name-keyed entries declaring a description, a derived input
//! schema, and an async handler. `execute` validates input against the
//! schema, merges the effective policy (defaults, context, per-call
//! overrides), and runs the handler under the retry/timeout wrapper. Every
//! log line that could carry user content goes through the sensitive-value
//! masker first.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use schemars::schema::RootSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use mementa_core::{
    defaults, mask_sensitive, Error, EventBus, ExecutionPolicy, PolicyOverride, Result,
    RuntimeConfig,
};
use mementa_index::SearchEngine;
use mementa_vault::{BacklinkSynchronizer, NoteStore, ParaOrganizer};

use crate::session::SessionStore;

/// Shared services handed to every tool handler.
pub struct ToolContext {
    pub store: Arc<NoteStore>,
    pub organizer: Arc<ParaOrganizer>,
    pub synchronizer: Arc<BacklinkSynchronizer>,
    pub engine: Arc<SearchEngine>,
    pub sessions: Arc<SessionStore>,
    pub bus: Arc<EventBus>,
    pub config: RuntimeConfig,
}

impl ToolContext {
    pub fn policy(&self) -> ExecutionPolicy {
        self.config.policy
    }
}

/// A registered tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> RootSchema;

    /// Check `input` against the declared schema without running anything.
    fn validate(&self, input: &Value) -> Result<()>;

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Deserialize tool input, mapping failures to the validation error kind.
pub fn parse_input<T: DeserializeOwned>(tool: &str, input: &Value) -> Result<T> {
    serde_json::from_value(input.clone()).map_err(|e| Error::SchemaValidation {
        tool: tool.to_string(),
        detail: e.to_string(),
    })
}

/// Advertised tool descriptor for `tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Name-keyed tool registry.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        ToolRegistry::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name(), tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors of every registered tool, name-ordered.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: serde_json::to_value(tool.input_schema())
                    .unwrap_or_else(|_| Value::Object(Default::default())),
            })
            .collect()
    }

    /// Execute a tool by name.
    ///
    /// Lookup, schema validation, policy merge, retry/timeout wrapping, and
    /// masked logging; validation failures surface immediately and are never
    /// retried.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        ctx: &ToolContext,
        overrides: Option<PolicyOverride>,
    ) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::InvalidRequest(format!("unknown tool: {name:?}")))?
            .clone();

        tool.validate(&input)?;

        let policy = ctx
            .policy()
            .merged(&overrides.unwrap_or_default());

        let preview = input_preview(&input);
        tracing::info!(tool = name, input = %preview, "tool.start");
        let started = Instant::now();

        let outcome = with_execution_policy(&policy, name, || {
            let tool = tool.clone();
            let input = input.clone();
            async move {
                match std::panic::AssertUnwindSafe(tool.run(input, ctx))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(panic) => Err(Error::Tool {
                        tool: tool.name().to_string(),
                        message: panic_message(panic),
                    }),
                }
            }
        })
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => {
                tracing::info!(tool = name, duration_ms, success = true, "tool.done");
            }
            Err(err) => {
                tracing::warn!(
                    tool = name,
                    duration_ms,
                    success = false,
                    error = %mask_sensitive(&err.to_string()),
                    "tool.failed"
                );
            }
        }
        outcome
    }
}

/// Masked, truncated echo of the raw input for logs.
fn input_preview(input: &Value) -> String {
    let raw = input.to_string();
    let truncated: String = raw.chars().take(defaults::INPUT_PREVIEW_CHARS).collect();
    mask_sensitive(&truncated)
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Run `attempt` under the execution policy: up to `max_retries + 1` tries,
/// each bounded by `timeout_ms`. Only retryable failures loop; a zero
/// timeout fails before the handler runs at all.
pub async fn with_execution_policy<T, F, Fut>(
    policy: &ExecutionPolicy,
    tool: &str,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut tries: u32 = 0;
    loop {
        tries += 1;

        let outcome = if policy.timeout_ms == 0 {
            Err(Error::Timeout {
                tool: tool.to_string(),
                timeout_ms: 0,
            })
        } else {
            match tokio::time::timeout(Duration::from_millis(policy.timeout_ms), attempt()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    tool: tool.to_string(),
                    timeout_ms: policy.timeout_ms,
                }),
            }
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && tries <= policy.max_retries => {
                tracing::warn!(
                    tool,
                    attempt = tries,
                    error = %mask_sensitive(&err.to_string()),
                    "tool.retry"
                );
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_policy_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = ExecutionPolicy {
            timeout_ms: 1_000,
            max_retries: 2,
        };

        let result = with_execution_policy(&policy, "flaky", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Write("transient".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_policy_exhausts_retries() {
        let calls = AtomicU32::new(0);
        let policy = ExecutionPolicy {
            timeout_ms: 1_000,
            max_retries: 1,
        };

        let outcome: Result<()> = with_execution_policy(&policy, "flaky", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Write("still broken".into())) }
        })
        .await;

        assert!(matches!(outcome, Err(Error::Write(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_policy_never_retries_validation_errors() {
        let calls = AtomicU32::new(0);
        let policy = ExecutionPolicy {
            timeout_ms: 1_000,
            max_retries: 5,
        };

        let outcome: Result<()> = with_execution_policy(&policy, "strict", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(Error::SchemaValidation {
                    tool: "strict".into(),
                    detail: "bad".into(),
                })
            }
        })
        .await;

        assert!(matches!(outcome, Err(Error::SchemaValidation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_fails_before_handler_runs() {
        let calls = AtomicU32::new(0);
        let policy = ExecutionPolicy {
            timeout_ms: 0,
            max_retries: 0,
        };

        let outcome: Result<()> = with_execution_policy(&policy, "instant", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(outcome, Err(Error::Timeout { timeout_ms: 0, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_fires_on_slow_handler_and_retries() {
        let calls = AtomicU32::new(0);
        let policy = ExecutionPolicy {
            timeout_ms: 20,
            max_retries: 1,
        };

        let outcome: Result<()> = with_execution_policy(&policy, "slow", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;

        assert!(matches!(outcome, Err(Error::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generous_timeout_never_fires() {
        let policy = ExecutionPolicy {
            timeout_ms: 60_000,
            max_retries: 0,
        };

        let value = with_execution_policy(&policy, "quick", || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(42)
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_input_preview_masks_and_truncates() {
        let input = serde_json::json!({
            "query": "mail ada@example.org about the plan",
            "padding": "x".repeat(500),
        });
        let preview = input_preview(&input);
        assert!(preview.contains("[email]"));
        assert!(!preview.contains("ada@example.org"));
        assert!(preview.chars().count() <= defaults::INPUT_PREVIEW_CHARS);
    }
}
