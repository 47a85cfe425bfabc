//! SSE Bridge (C12) — subscribes the Event Bus per-session and bridges to SSE.
//!
//! Direct template: `deliveries.rs`'s `delivery_events_sse`. The difference is
//! that the bus routes by topic rather than a single broadcast channel, so
//! this fans one `subscribe_handler` per bridged topic into a single mpsc
//! channel and drains that. Closing the channel (client disconnect, stream
//! dropped) makes each handler's next `send` fail, which is exactly the
//! signal `EventBus::subscribe_handler` already uses to unsubscribe — broken
//! pipes clean themselves up without any extra bookkeeping here.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures_util::stream::Stream;
use tokio::sync::mpsc;

use crate::runtime::bus::{BusEvent, Topic};
use crate::state::AppState;

/// Topics forwarded to a session's SSE stream, per the external-interface
/// frame list plus `context_pressure` (a core bus topic per the data model).
const BRIDGED_TOPICS: &[Topic] = &[
    Topic::UserMessage,
    Topic::LlmRequest,
    Topic::LlmResponse,
    Topic::ToolCall,
    Topic::ToolResult,
    Topic::AgentResponse,
    Topic::SystemEvent,
    Topic::ContextPressure,
];

fn frame(ev: &BusEvent) -> String {
    let mut data = ev.payload.clone();
    if let Some(obj) = data.as_object_mut() {
        obj.insert(
            "type".to_string(),
            serde_json::Value::String(ev.topic.as_str().to_string()),
        );
        obj.insert(
            "session_id".to_string(),
            serde_json::Value::String(ev.session_id.clone().unwrap_or_default()),
        );
    }
    data.to_string()
}

/// `GET /api/v1/stream/{session_id}` — SSE event stream for a session.
pub async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let (tx, mut rx) = mpsc::channel::<BusEvent>(256);

    for topic in BRIDGED_TOPICS {
        let topic = *topic;
        let tx = tx.clone();
        state
            .event_bus
            .subscribe_handler(topic, Some(session_id.clone()), move |ev| {
                let tx = tx.clone();
                async move { tx.send(ev).await.map_err(|e| e.to_string()) }
            });
    }
    drop(tx);

    let connected = serde_json::json!({
        "type": "connected",
        "session_id": session_id,
    })
    .to_string();

    let stream = async_stream::stream! {
        yield Ok::<_, std::convert::Infallible>(Event::default().event("connected").data(connected));

        while let Some(ev) = rx.recv().await {
            yield Ok(Event::default().event(ev.topic.as_str()).data(frame(&ev)));
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}
