//! Tool registry for the runtime — builds tool definitions for the LLM and
//! dispatches tool calls to local handlers, connected nodes, or stubs.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde_json::Value;

use sa_domain::capability::LlmCapabilities;
use sa_domain::config::ToolPolicy;
use sa_domain::tool::ToolDefinition;
use sa_tools::exec::{self, ExecRequest};
use sa_tools::process::{self, ProcessRequest};

use crate::nodes::router::{LocalTool, ToolDestination};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool registry — hot re-registration via atomic table swap
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds the last-built canonical (unfiltered, ungated) tool set behind an
/// `ArcSwap`. Rebuilding — e.g. after a node connects or an MCP server's
/// tool list changes — publishes a whole new `Vec` in one atomic store;
/// readers mid-turn keep whichever snapshot they already loaded, so a
/// rebuild never hands a caller a half-updated list.
pub struct ToolRegistry {
    defs: ArcSwap<Vec<ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            defs: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Atomically publish a freshly built tool set.
    pub fn publish(&self, defs: Vec<ToolDefinition>) {
        self.defs.store(Arc::new(defs));
    }

    /// Current snapshot, without rebuilding.
    pub fn snapshot(&self) -> Arc<Vec<ToolDefinition>> {
        self.defs.load_full()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool definitions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the set of tool definitions exposed to the LLM.
///
/// When `tool_policy` is `Some`, definitions are filtered through it so that
/// sub-agents only see tools their config permits. When `capabilities` is
/// `Some`, models whose `context_window_tokens` falls below
/// `config.tools.min_context_window_for_tools` are given no tools at all
/// (capability gating) — a small-context model is more likely to hallucinate
/// a tool call than use one correctly.
///
/// The canonical (unfiltered) set is published to `state.tool_registry` via
/// an atomic swap before policy/capability filtering is applied, so other
/// readers (e.g. an admin "list tools" endpoint) can always see the latest
/// registration without triggering a rebuild themselves.
pub fn build_tool_definitions(
    state: &AppState,
    tool_policy: Option<&ToolPolicy>,
    capabilities: Option<&LlmCapabilities>,
) -> Vec<ToolDefinition> {
    let mut defs = Vec::new();

    // ── Built-in local tools ──────────────────────────────────────
    defs.push(ToolDefinition {
        name: "exec".into(),
        description: "Run a shell command. Returns output or a background session ID.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "background": { "type": "boolean", "description": "Run in background" },
                "workdir": { "type": "string", "description": "Working directory" },
                "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds" }
            },
            "required": ["command"]
        }),
    });

    defs.push(ToolDefinition {
        name: "process".into(),
        description: "Manage background processes: list, poll, log, write, kill, remove.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "poll", "log", "write", "kill", "clear", "remove"],
                    "description": "Action to perform"
                },
                "session_id": { "type": "string", "description": "Process session ID" },
                "data": { "type": "string", "description": "Data to write to stdin" }
            },
            "required": ["action"]
        }),
    });

    // ── Skill tools ───────────────────────────────────────────────
    defs.push(ToolDefinition {
        name: "skill.read_doc".into(),
        description: "Read the full documentation (SKILL.md) for a skill.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name (e.g. 'apple-notes')" }
            },
            "required": ["name"]
        }),
    });

    defs.push(ToolDefinition {
        name: "skill.read_resource".into(),
        description: "Read a bundled resource from a skill (references/, scripts/, assets/).".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Skill name" },
                "path": { "type": "string", "description": "Resource path (e.g. 'references/api.md')" }
            },
            "required": ["name", "path"]
        }),
    });

    // ── SerialMemory tools ────────────────────────────────────────
    defs.push(ToolDefinition {
        name: "memory.search".into(),
        description: "Search long-term memory for relevant facts, notes, and session history.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "limit": { "type": "integer", "description": "Max results (default 10)" }
            },
            "required": ["query"]
        }),
    });

    defs.push(ToolDefinition {
        name: "memory.ingest".into(),
        description: "Store a fact or note in long-term memory.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Content to store" },
                "source": { "type": "string", "description": "Source label (e.g. 'user', 'agent')" }
            },
            "required": ["content"]
        }),
    });

    // ── Stub tools (common aliases that aren't wired yet) ─────────
    defs.push(ToolDefinition {
        name: "web.search".into(),
        description: "Search the web (SERP). Currently unavailable — returns an error with alternatives.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        }),
    });

    defs.push(ToolDefinition {
        name: "http.request".into(),
        description: "Make an HTTP request. Currently unavailable — returns an error with alternatives.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "URL to fetch" },
                "method": { "type": "string", "description": "HTTP method (GET, POST, etc.)" }
            },
            "required": ["url"]
        }),
    });

    // ── Agent delegation tools ──────────────────────────────────────
    // Only expose these if agents are configured.
    if let Some(ref agents) = state.agents {
        if !agents.is_empty() {
            defs.push(ToolDefinition {
                name: "agent.run".into(),
                description: "Delegate a task to a specialist sub-agent. The sub-agent runs in its own session with scoped tools and skills. Returns the agent's final answer.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "agent_id": { "type": "string", "description": "ID of the agent to run (from agent.list)" },
                        "task": { "type": "string", "description": "The task or question to give the agent" },
                        "model": { "type": "string", "description": "Optional model override (e.g. 'openai/gpt-4o')" }
                    },
                    "required": ["agent_id", "task"]
                }),
            });

            defs.push(ToolDefinition {
                name: "agent.list".into(),
                description: "List all available sub-agents and their capabilities.".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {}
                }),
            });
        }
    }

    // ── Node-advertised tools ─────────────────────────────────────
    // Add definitions for capabilities advertised by connected nodes.
    for node_info in state.nodes.list() {
        for cap in &node_info.capabilities {
            // Don't duplicate tools we already defined.
            if defs.iter().any(|d| d.name == cap.name) {
                continue;
            }
            defs.push(ToolDefinition {
                name: cap.name.clone(),
                description: cap.description.clone(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": true
                }),
            });
        }
    }

    // Publish the canonical, unfiltered set — this is the "hot re-registration"
    // point: every call rebuilds from current node/agent/MCP state and swaps
    // the whole table in atomically.
    state.tool_registry.publish(defs.clone());

    // ── Capability gating ─────────────────────────────────────────
    // Withhold tool schemas entirely from models whose context window is
    // too small to reliably hold them alongside the conversation.
    if let Some(cap) = capabilities {
        let min_window = state.config.tools.min_context_window_for_tools;
        let below_threshold = cap
            .context_window_tokens
            .is_some_and(|w| w < min_window);
        if below_threshold {
            return Vec::new();
        }
    }

    // ── Apply tool policy filter ─────────────────────────────────
    if let Some(policy) = tool_policy {
        defs.retain(|d| policy.allows(&d.name));
    }

    defs
}

/// Score a tool against a free-text query for the registry's weighted
/// keyword search (§ dispatch algorithms). Exact name match scores highest,
/// followed by whole-token matches in the name or description, followed by
/// plain substring matches. Result is in `[0, 1]`, rounded to 2 decimals.
pub fn search_score(def: &ToolDefinition, query: &str) -> f64 {
    let query = query.trim().to_ascii_lowercase();
    if query.is_empty() {
        return 0.0;
    }
    let name = def.name.to_ascii_lowercase();
    let desc = def.description.to_ascii_lowercase();

    if name == query {
        return 1.0;
    }

    let query_tokens: Vec<&str> = query.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
    let name_tokens: Vec<&str> = name.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();
    let desc_tokens: Vec<&str> = desc.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).collect();

    if query_tokens.is_empty() {
        return 0.0;
    }

    let name_hits = query_tokens
        .iter()
        .filter(|t| name_tokens.contains(t))
        .count();
    let desc_hits = query_tokens
        .iter()
        .filter(|t| desc_tokens.contains(t))
        .count();

    if name_hits == query_tokens.len() {
        return 0.9;
    }
    if name_hits > 0 {
        let score = 0.5 + 0.3 * (name_hits as f64 / query_tokens.len() as f64);
        return round2(score);
    }
    if desc_hits > 0 {
        let score = 0.2 + 0.3 * (desc_hits as f64 / query_tokens.len() as f64);
        return round2(score);
    }
    if name.contains(&query) || desc.contains(&query) {
        return 0.15;
    }

    0.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Search the live tool registry by weighted keyword match, returning
/// `(definition, score)` pairs sorted by descending score. Tools scoring `0`
/// are dropped.
pub fn search_tools(state: &AppState, query: &str, limit: usize) -> Vec<(ToolDefinition, f64)> {
    let snapshot = state.tool_registry.snapshot();
    let mut scored: Vec<(ToolDefinition, f64)> = snapshot
        .iter()
        .map(|d| (d.clone(), search_score(d, query)))
        .filter(|(_, score)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Dispatch a single tool call. Returns (result_content, is_error).
///
/// `agent` carries the calling sub-agent's context (tool policy, limits)
/// when the turn is running as a sub-agent; reserved for per-agent
/// capability gating beyond the tool-policy allow/deny filter already
/// applied in [`build_tool_definitions`].
pub async fn dispatch_tool(
    state: &AppState,
    tool_name: &str,
    arguments: &Value,
    session_key: Option<&str>,
    _agent: Option<&super::agent::AgentContext>,
) -> (String, bool) {
    dispatch_tool_with_mode(
        state,
        tool_name,
        arguments,
        session_key,
        _agent,
        sa_domain::permission::PermissionMode::Default,
    )
    .await
}

/// Like [`dispatch_tool`] but lets the caller specify the permission mode
/// governing exec approval (`Bypass` skips the human-approval gate).
pub async fn dispatch_tool_with_mode(
    state: &AppState,
    tool_name: &str,
    arguments: &Value,
    session_key: Option<&str>,
    _agent: Option<&super::agent::AgentContext>,
    permission_mode: sa_domain::permission::PermissionMode,
) -> (String, bool) {
    if let Err(reason) = validate_arguments(state, tool_name, arguments) {
        return (
            serde_json::json!({ "error": "invalid_args", "message": reason }).to_string(),
            true,
        );
    }

    let timeout = Duration::from_secs(state.config.tools.dispatch_timeout_sec);
    let dispatch = dispatch_inner(state, tool_name, arguments, session_key, _agent, permission_mode);

    match tokio::time::timeout(timeout, dispatch).await {
        Ok(result) => result,
        Err(_) => (
            serde_json::json!({
                "error": "tool_timeout",
                "message": format!("tool '{tool_name}' exceeded its {}s timeout", timeout.as_secs()),
            })
            .to_string(),
            true,
        ),
    }
}

/// Validate `arguments` against the JSON Schema currently registered for
/// `tool_name`. A tool with no registered definition, or a schema that fails
/// to compile, is allowed through unvalidated (fail-open — dispatch itself
/// still rejects malformed input on its own terms).
fn validate_arguments(state: &AppState, tool_name: &str, arguments: &Value) -> Result<(), String> {
    let snapshot = state.tool_registry.snapshot();
    let Some(def) = snapshot.iter().find(|d| d.name == tool_name) else {
        return Ok(());
    };
    let Ok(validator) = jsonschema::validator_for(&def.parameters) else {
        return Ok(());
    };
    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("{e}"))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}

async fn dispatch_inner(
    state: &AppState,
    tool_name: &str,
    arguments: &Value,
    session_key: Option<&str>,
    _agent: Option<&super::agent::AgentContext>,
    permission_mode: sa_domain::permission::PermissionMode,
) -> (String, bool) {
    // Handle our built-in tools first.
    match tool_name {
        "exec" => dispatch_exec(state, arguments, session_key, permission_mode).await,
        "process" => dispatch_process(state, arguments).await,
        "skill.read_doc" => dispatch_skill_read_doc(state, arguments),
        "skill.read_resource" => dispatch_skill_read_resource(state, arguments),
        "memory.search" => dispatch_memory_search(state, arguments).await,
        "memory.ingest" => dispatch_memory_ingest(state, arguments).await,
        "agent.run" => dispatch_agent_run(state, arguments, session_key).await,
        "agent.list" => dispatch_agent_list(state),
        "web.search" => stub_tool("web.search", "Web search is not yet configured. Use exec with curl or a search CLI tool as an alternative."),
        "http.request" => stub_tool("http.request", "HTTP requests are not yet configured. Use exec with curl as an alternative."),
        _ => {
            // Try routing to a connected node via ToolRouter.
            dispatch_to_node(state, tool_name, arguments, session_key).await
        }
    }
}

async fn dispatch_exec(
    state: &AppState,
    arguments: &Value,
    session_key: Option<&str>,
    permission_mode: sa_domain::permission::PermissionMode,
) -> (String, bool) {
    let req: ExecRequest = match serde_json::from_value(arguments.clone()) {
        Ok(r) => r,
        Err(e) => return (format!("invalid exec arguments: {e}"), true),
    };

    if state.denied_command_set.is_match(&req.command) {
        return (
            format!("command denied by security policy: {}", req.command),
            true,
        );
    }

    let needs_approval = !matches!(permission_mode, sa_domain::permission::PermissionMode::Bypass)
        && state.approval_command_set.is_match(&req.command);

    if needs_approval {
        match request_exec_approval(state, &req.command, session_key).await {
            Ok(()) => {}
            Err(reason) => return (reason, true),
        }
    }

    let resp = exec::exec(&state.processes, req).await;
    let json = serde_json::to_string_pretty(&resp).unwrap_or_default();
    (json, false)
}

/// Pause exec until a human approves or denies via the approvals API, or
/// the configured timeout elapses.
async fn request_exec_approval(
    state: &AppState,
    command: &str,
    session_key: Option<&str>,
) -> Result<(), String> {
    let (respond, rx) = tokio::sync::oneshot::channel();
    let id = uuid::Uuid::new_v4();
    state.approval_store.insert(super::approval::PendingApproval {
        id,
        command: command.to_string(),
        session_key: session_key.unwrap_or("anonymous").to_string(),
        created_at: chrono::Utc::now(),
        respond,
    });

    match tokio::time::timeout(state.approval_store.timeout(), rx).await {
        Ok(Ok(super::approval::ApprovalDecision::Approved)) => Ok(()),
        Ok(Ok(super::approval::ApprovalDecision::Denied { reason })) => Err(format!(
            "exec denied by reviewer{}",
            reason.map(|r| format!(": {r}")).unwrap_or_default()
        )),
        Ok(Err(_)) => Err("approval channel closed before a decision was made".into()),
        Err(_) => {
            state.approval_store.remove_expired(&id);
            Err("exec approval timed out".into())
        }
    }
}

async fn dispatch_process(state: &AppState, arguments: &Value) -> (String, bool) {
    let req: ProcessRequest = match serde_json::from_value(arguments.clone()) {
        Ok(r) => r,
        Err(e) => return (format!("invalid process arguments: {e}"), true),
    };
    let resp = process::handle_process(&state.processes, req).await;
    let json = serde_json::to_string_pretty(&resp).unwrap_or_default();
    (json, false)
}

fn dispatch_skill_read_doc(state: &AppState, arguments: &Value) -> (String, bool) {
    let name = arguments
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    match state.skills.read_doc(name) {
        Ok(doc) => (doc, false),
        Err(e) => (format!("skill doc error: {e}"), true),
    }
}

fn dispatch_skill_read_resource(state: &AppState, arguments: &Value) -> (String, bool) {
    let name = arguments
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let path = arguments
        .get("path")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    match state.skills.read_resource(name, path) {
        Ok(content) => (content, false),
        Err(e) => (format!("resource error: {e}"), true),
    }
}

async fn dispatch_memory_search(state: &AppState, arguments: &Value) -> (String, bool) {
    let query = arguments
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let limit = arguments
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);

    let req = sa_memory::RagSearchRequest {
        query,
        limit,
        ..Default::default()
    };

    match state.memory.search(req).await {
        Ok(results) => {
            let json = serde_json::to_string_pretty(&results).unwrap_or_default();
            (json, false)
        }
        Err(e) => (format!("memory search error: {e}"), true),
    }
}

async fn dispatch_memory_ingest(state: &AppState, arguments: &Value) -> (String, bool) {
    let content = arguments
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let source = arguments
        .get("source")
        .and_then(|v| v.as_str())
        .map(String::from);

    let req = sa_memory::MemoryIngestRequest {
        content,
        source,
        session_id: None,
        metadata: None,
        extract_entities: None,
    };

    match state.memory.ingest(req).await {
        Ok(resp) => {
            let json = serde_json::to_string_pretty(&resp).unwrap_or_default();
            (json, false)
        }
        Err(e) => (format!("memory ingest error: {e}"), true),
    }
}

async fn dispatch_agent_run(
    state: &AppState,
    arguments: &Value,
    session_key: Option<&str>,
) -> (String, bool) {
    let agent_id = match arguments.get("agent_id").and_then(|v| v.as_str()) {
        Some(id) => id,
        None => return ("missing required argument: agent_id".into(), true),
    };
    let task = match arguments.get("task").and_then(|v| v.as_str()) {
        Some(t) => t,
        None => return ("missing required argument: task".into(), true),
    };
    let model = arguments
        .get("model")
        .and_then(|v| v.as_str())
        .map(String::from);

    let parent_key = session_key.unwrap_or("anonymous");

    super::agent::run_agent(state, agent_id, task, model, parent_key).await
}

fn dispatch_agent_list(state: &AppState) -> (String, bool) {
    let manager = match &state.agents {
        Some(m) => m,
        None => {
            return (
                serde_json::json!({ "agents": [], "count": 0 }).to_string(),
                false,
            );
        }
    };

    let agents: Vec<_> = manager
        .list()
        .into_iter()
        .map(|id| {
            let runtime = manager.get(&id);
            match runtime {
                Some(r) => serde_json::json!({
                    "id": id,
                    "tools_allow": r.config.tool_policy.allow,
                    "tools_deny": r.config.tool_policy.deny,
                    "models": r.config.models,
                    "memory_mode": r.config.memory_mode,
                }),
                None => serde_json::json!({ "id": id }),
            }
        })
        .collect();

    (
        serde_json::json!({
            "agents": agents,
            "count": agents.len(),
        })
        .to_string(),
        false,
    )
}

fn stub_tool(name: &str, message: &str) -> (String, bool) {
    (
        serde_json::json!({
            "error": format!("Tool '{name}' is not available"),
            "message": message,
            "suggestion": "Use the 'exec' tool with appropriate CLI commands as a workaround."
        })
        .to_string(),
        true,
    )
}

async fn dispatch_to_node(
    state: &AppState,
    tool_name: &str,
    arguments: &Value,
    session_key: Option<&str>,
) -> (String, bool) {
    match state.tool_router.resolve(tool_name) {
        ToolDestination::Node { node_id } => {
            let result = state
                .tool_router
                .dispatch_to_node(
                    &node_id,
                    tool_name,
                    arguments.clone(),
                    session_key.map(String::from),
                )
                .await;
            if result.success {
                (result.result.to_string(), false)
            } else {
                let err_msg = result
                    .error
                    .unwrap_or_else(|| "unknown node error".into());
                (err_msg, true)
            }
        }
        ToolDestination::Local { tool_type } => {
            // Shouldn't reach here since we handle exec/process above,
            // but handle gracefully.
            match tool_type {
                LocalTool::Exec => {
                    dispatch_exec(
                        state,
                        arguments,
                        session_key,
                        sa_domain::permission::PermissionMode::Default,
                    )
                    .await
                }
                LocalTool::Process => dispatch_process(state, arguments).await,
            }
        }
        ToolDestination::Unknown => (
            serde_json::json!({
                "error": format!("Unknown tool: '{tool_name}'"),
                "message": "This tool is not registered. Check available tools.",
            })
            .to_string(),
            true,
        ),
    }
}
