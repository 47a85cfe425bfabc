//! The `osa` REST surface — `/api/v1/*` — the external-facing orchestration
//! API described in the external-interfaces contract, kept separate from
//! the gateway's own `/v1/*` dashboard/admin surface.
//!
//! All error bodies use the `{error, code?, details?}` envelope rather than
//! the legacy `{error}`-only shape used by the dashboard/admin surface.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use sa_memory::{MemoryIngestRequest, RagSearchRequest};

use crate::runtime::{run_turn, TurnEvent, TurnInput};
use crate::state::AppState;

fn envelope(status: StatusCode, error: &str, code: &str, details: Option<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": error,
            "code": code,
            "details": details,
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let provider = state.llm.list_providers().into_iter().next();
    let uptime_seconds = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "provider": provider,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/orchestrate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    pub input: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

fn session_key_for(state: &AppState, session_id: Option<&str>) -> String {
    match session_id {
        Some(id) => format!("agent:{}:api:{id}", state.config.sessions.agent_id),
        None => format!("agent:{}:main", state.config.sessions.agent_id),
    }
}

pub async fn orchestrate(
    State(state): State<AppState>,
    Json(body): Json<OrchestrateRequest>,
) -> Response {
    if body.input.trim().is_empty() {
        return envelope(
            StatusCode::BAD_REQUEST,
            "input must not be empty",
            "invalid_request",
            None,
        );
    }

    let session_key = session_key_for(&state, body.session_id.as_deref());
    let (entry, _is_new) = state
        .sessions
        .resolve_or_create(&session_key, sa_sessions::store::SessionOrigin::default());
    state.sessions.touch(&session_key);

    let _permit = match state.session_locks.acquire(&session_key).await {
        Ok(p) => p,
        Err(crate::runtime::session_lock::SessionBusy) => {
            return envelope(
                StatusCode::TOO_MANY_REQUESTS,
                "session is busy — a turn is already in progress",
                "agent_error",
                None,
            );
        }
    };

    let input = TurnInput {
        session_key: session_key.clone(),
        session_id: entry.session_id.clone(),
        user_message: body.input,
        model: None,
        response_format: None,
        agent: None,
        permission_mode: sa_domain::permission::PermissionMode::default(),
    };

    let start = std::time::Instant::now();
    let (_run_id, mut rx) = run_turn(state.clone(), input);

    let mut output = String::new();
    let mut signal: Option<sa_domain::signal::Signal> = None;
    let mut skills_used: Vec<String> = Vec::new();
    let mut iteration_count: u32 = 0;
    let mut filtered = false;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::Final { content } => output = content,
            TurnEvent::Stopped { content } => output = content,
            TurnEvent::Filtered { signal: s } => {
                filtered = true;
                signal = Some(s);
            }
            TurnEvent::ToolCallEvent { tool_name, .. } => {
                if !skills_used.contains(&tool_name) {
                    skills_used.push(tool_name);
                }
                iteration_count += 1;
            }
            TurnEvent::Plan { text, .. } => output = text,
            TurnEvent::Error { message } => {
                return envelope(StatusCode::INTERNAL_SERVER_ERROR, &message, "agent_error", None);
            }
            TurnEvent::AssistantDelta { .. } | TurnEvent::Thought { .. } | TurnEvent::UsageEvent { .. } => {}
        }
    }

    let execution_ms = start.elapsed().as_millis() as u64;

    if filtered {
        return envelope(
            StatusCode::UNPROCESSABLE_ENTITY,
            "signal_filtered",
            "SIGNAL_BELOW_THRESHOLD",
            Some(serde_json::json!({ "signal": signal }).to_string()),
        );
    }

    Json(serde_json::json!({
        "session_id": entry.session_id,
        "output": output,
        "signal": signal,
        "skills_used": skills_used,
        "iteration_count": iteration_count,
        "execution_ms": execution_ms,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/classify
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
}

pub async fn classify(State(state): State<AppState>, Json(body): Json<ClassifyRequest>) -> Response {
    let channel = body.channel.as_deref().unwrap_or("api");
    match crate::runtime::signal::classify(&body.message, channel, &state.config.classifier, None).await {
        Ok(crate::runtime::signal::Classification::Accepted(signal))
        | Ok(crate::runtime::signal::Classification::Filtered(signal)) => {
            Json(serde_json::json!({ "signal": signal })).into_response()
        }
        Err(e) => envelope(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), "agent_error", None),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/skills, POST /api/v1/skills/{name}/execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_skills(State(state): State<AppState>) -> impl IntoResponse {
    let defs = crate::runtime::tools::build_tool_definitions(&state, None, None);
    Json(serde_json::json!({
        "skills": defs,
        "count": defs.len(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteSkillRequest {
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn execute_skill(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ExecuteSkillRequest>,
) -> Response {
    let (content, is_error) = crate::runtime::tools::dispatch_tool(
        &state,
        &name,
        &body.args,
        body.session_id.as_deref(),
        None,
    )
    .await;

    if is_error {
        envelope(StatusCode::UNPROCESSABLE_ENTITY, &content, "skill_error", None)
    } else {
        Json(serde_json::json!({ "skill": name, "result": content })).into_response()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/memory, GET /api/v1/memory/recall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RememberRequest {
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
}

pub async fn remember(State(state): State<AppState>, Json(body): Json<RememberRequest>) -> Response {
    let req = MemoryIngestRequest {
        content: body.content,
        source: body.category,
        session_id: None,
        metadata: None,
        extract_entities: Some(true),
    };
    match state.memory.ingest(req).await {
        Ok(_) => Json(serde_json::json!({ "status": "stored" })).into_response(),
        Err(e) => envelope(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), "agent_error", None),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecallQuery {
    pub content: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

pub async fn recall(State(state): State<AppState>, Query(query): Query<RecallQuery>) -> Response {
    let req = RagSearchRequest {
        query: query.content,
        limit: query.limit,
        ..Default::default()
    };
    match state.memory.search(req).await {
        Ok(resp) => Json(serde_json::json!({ "content": resp.memories })).into_response(),
        Err(e) => envelope(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), "agent_error", None),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/machines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A "machine" is a named group of tools a connected node advertises
/// together, toggled on/off as a unit — the node's capability list.
pub async fn list_machines(State(state): State<AppState>) -> impl IntoResponse {
    let machines: Vec<serde_json::Value> = state
        .nodes
        .list()
        .into_iter()
        .map(|n| {
            serde_json::json!({
                "node_id": n.node_id,
                "node_type": n.node_type,
                "capabilities": n.capabilities,
            })
        })
        .collect();
    Json(serde_json::json!({
        "machines": machines,
        "count": machines.len(),
    }))
}
