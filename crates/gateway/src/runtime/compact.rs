//! Transcript compaction — collapses old conversation history into a summary
//! so the context window stays healthy after many turns.
//!
//! Compaction appends a summary marker to the transcript (never rewrites).
//! When loading history, only lines after the last marker are used.

use sa_domain::config::CompactionConfig;
use sa_domain::tool::{ContentPart, Message, MessageContent, Role};
use sa_providers::traits::ChatRequest;
use sa_providers::LlmProvider;
use sa_sessions::transcript::{TranscriptLine, TranscriptWriter};

/// Find the index of the first line after the last compaction marker.
/// Returns 0 if no compaction marker exists.
pub fn compaction_boundary(lines: &[TranscriptLine]) -> usize {
    for i in (0..lines.len()).rev() {
        if is_compaction_marker(&lines[i]) {
            return i; // include the marker itself (it becomes a system message)
        }
    }
    0
}

fn active_turn_count_from(lines: &[TranscriptLine], start: usize) -> usize {
    lines[start..].iter().filter(|l| l.role == "user").count()
}

/// Count active turns (user messages) since the last compaction.
pub fn active_turn_count(lines: &[TranscriptLine]) -> usize {
    active_turn_count_from(lines, compaction_boundary(lines))
}

/// Check if auto-compaction should run, given an already-computed boundary
/// (avoids a redundant reverse scan when the caller already has it).
pub fn should_compact_with_boundary(
    lines: &[TranscriptLine],
    config: &CompactionConfig,
    boundary: usize,
) -> bool {
    if !config.auto {
        return false;
    }
    active_turn_count_from(lines, boundary) > config.max_turns
}

/// Check if auto-compaction should run.
pub fn should_compact(lines: &[TranscriptLine], config: &CompactionConfig) -> bool {
    should_compact_with_boundary(lines, config, compaction_boundary(lines))
}

/// Split active lines into (lines_to_compact, lines_to_keep).
///
/// `lines_to_keep` are the last `keep_last_turns` worth of turns (measured
/// by user-message count) plus any trailing tool/assistant messages.
pub fn split_for_compaction(
    lines: &[TranscriptLine],
    keep_last_turns: usize,
) -> (&[TranscriptLine], &[TranscriptLine]) {
    let start = compaction_boundary(lines);
    // Skip the compaction marker itself if present.
    let active_start = if start > 0 || (start == 0 && !lines.is_empty() && is_compaction_marker(&lines[0])) {
        if is_compaction_marker(&lines[start]) {
            start + 1
        } else {
            start
        }
    } else {
        start
    };
    let active = &lines[active_start..];

    // Count user messages backwards to find the keep boundary.
    let mut user_count = 0;
    let mut keep_from = 0; // relative to active
    for (i, line) in active.iter().enumerate().rev() {
        if line.role == "user" {
            user_count += 1;
            if user_count >= keep_last_turns {
                keep_from = i;
                break;
            }
        }
    }

    let to_compact = &active[..keep_from];
    let to_keep = &active[keep_from..];
    (to_compact, to_keep)
}

/// Generate a compaction summary using the LLM (non-streaming).
pub async fn generate_summary(
    provider: &dyn LlmProvider,
    lines_to_compact: &[TranscriptLine],
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let conversation = build_conversation_text(lines_to_compact);

    let prompt = format!(
        "You are a conversation summarizer. Summarize the following conversation \
         history into a concise summary that preserves:\n\
         1. The current goal or plan being worked on\n\
         2. Key decisions made\n\
         3. Open questions or threads\n\
         4. Important facts learned about the user or context\n\
         5. Tool state (running processes, active sessions, pending work)\n\n\
         Be concise but preserve all actionable context. Write in present tense.\n\
         Omit greetings and pleasantries. Focus on substance.\n\n\
         CONVERSATION:\n{conversation}"
    );

    let messages = vec![sa_domain::tool::Message::user(&prompt)];

    let req = ChatRequest {
        messages,
        tools: vec![],
        temperature: Some(0.1),
        max_tokens: Some(2000),
        response_format: sa_providers::ResponseFormat::Text,
        model: None,
    };

    let resp = provider.chat(&req).await?;
    Ok(resp.content)
}

/// Create a transcript line that serves as the compaction marker.
pub fn compaction_line(summary: &str, turns_compacted: usize) -> TranscriptLine {
    let mut line = TranscriptWriter::line("system", summary);
    line.metadata = Some(serde_json::json!({
        "compaction": true,
        "turns_compacted": turns_compacted,
    }));
    line
}

/// Run the full compaction flow: split → summarize → persist marker.
pub async fn run_compaction(
    provider: &dyn LlmProvider,
    transcripts: &TranscriptWriter,
    session_id: &str,
    lines: &[TranscriptLine],
    config: &CompactionConfig,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let (to_compact, _to_keep) = split_for_compaction(lines, config.keep_last_turns);

    if to_compact.is_empty() {
        return Ok(String::new());
    }

    let turns_compacted = to_compact.iter().filter(|l| l.role == "user").count();
    let summary = generate_summary(provider, to_compact).await?;

    let marker = compaction_line(&summary, turns_compacted);
    transcripts.append(session_id, &[marker])?;

    tracing::info!(
        session_id = session_id,
        turns_compacted = turns_compacted,
        summary_len = summary.len(),
        "transcript compacted"
    );

    Ok(summary)
}

/// Resolve an LLM provider suitable for compaction (summarizer > executor > any).
pub fn resolve_compaction_provider(
    state: &crate::state::AppState,
) -> Option<std::sync::Arc<dyn LlmProvider>> {
    state
        .llm
        .for_role("summarizer")
        .or_else(|| state.llm.for_role("executor"))
        .or_else(|| state.llm.iter().next().map(|(_, p)| p.clone()))
}

fn is_compaction_marker(line: &TranscriptLine) -> bool {
    line.metadata
        .as_ref()
        .and_then(|m| m.get("compaction"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

fn build_conversation_text(lines: &[TranscriptLine]) -> String {
    let mut buf = String::new();
    for line in lines {
        let role_label = match line.role.as_str() {
            "user" => "User",
            "assistant" => "Assistant",
            "tool" => "Tool",
            "system" => "System",
            other => other,
        };
        buf.push_str(role_label);
        buf.push_str(": ");
        // Truncate very long lines (tool results) to keep the summary prompt manageable.
        if line.content.len() > 2000 {
            buf.push_str(&line.content[..1000]);
            buf.push_str(" [...] ");
            buf.push_str(&line.content[line.content.len() - 500..]);
        } else {
            buf.push_str(&line.content);
        }
        buf.push('\n');
    }
    buf
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token-pressure pipeline — operates on the live in-flight `Message` list,
// checked before every LLM call in the tool loop (as opposed to the marker-
// based compaction above, which runs once per turn against the persisted
// transcript).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A `context_pressure` event surfaced once utilization crosses the warn
/// threshold. `tier` is one of `"warn"`, `"aggressive"`, `"emergency"`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PressureEvent {
    pub tier: &'static str,
    pub utilization: f64,
}

/// `round(word_count * 1.3 + punctuation_count * 0.5)`.
pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as f64;
    let punct = text.chars().filter(|c| c.is_ascii_punctuation()).count() as f64;
    (words * 1.3 + punct * 0.5).round() as u32
}

fn message_text(message: &Message) -> String {
    message.content.extract_all_text()
}

/// Token cost of one message: body estimate plus 4 tokens of per-message overhead.
pub fn message_tokens(message: &Message) -> u32 {
    estimate_tokens(&message_text(message)) + 4
}

fn total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(message_tokens).sum()
}

/// Fraction of `max_tokens` the message list currently occupies.
pub fn utilization(messages: &[Message], max_tokens: u32) -> f64 {
    if max_tokens == 0 {
        return 0.0;
    }
    total_tokens(messages) as f64 / max_tokens as f64
}

fn tool_call_ids(message: &Message) -> Vec<String> {
    match &message.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => Vec::new(),
    }
}

fn tool_result_id(message: &Message) -> Option<String> {
    match &message.content {
        MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
            ContentPart::ToolResult { tool_use_id, .. } => Some(tool_use_id.clone()),
            _ => None,
        }),
        MessageContent::Text(_) => None,
    }
}

/// Group messages into atomic units: a tool-call `assistant` message and
/// every `tool` message answering one of its calls travel together, so
/// pruning never orphans a `tool` result from its originating call.
fn atomic_units(messages: &[Message]) -> Vec<std::ops::Range<usize>> {
    let mut units = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        let start = i;
        let ids = tool_call_ids(&messages[i]);
        i += 1;
        if !ids.is_empty() {
            while i < messages.len() {
                match tool_result_id(&messages[i]) {
                    Some(id) if ids.contains(&id) => i += 1,
                    _ => break,
                }
            }
        }
        units.push(start..i);
    }
    units
}

fn head_boundary(messages: &[Message]) -> usize {
    usize::from(messages.first().is_some_and(|m| m.role == Role::System))
}

/// Index of the first message belonging to the last `preserve_last_turns`
/// user turns. Falls back to `head_boundary` (preserve everything) when
/// the conversation doesn't contain that many turns yet.
fn tail_boundary(messages: &[Message], preserve_last_turns: usize) -> usize {
    let head = head_boundary(messages);
    let mut user_turns = 0;
    for unit in atomic_units(messages).iter().rev() {
        if unit.start < head {
            break;
        }
        if messages[unit.start].role == Role::User {
            user_turns += 1;
            if user_turns >= preserve_last_turns.max(1) {
                return unit.start;
            }
        }
    }
    head
}

/// Drop the oldest non-system, non-recent-N messages, unit-aligned so a
/// tool-call/tool-result pair is never split, until utilization falls to
/// `target` or the preserved tail is reached.
fn drop_aggressive(messages: &[Message], max_tokens: u32, preserve_last_turns: usize, target: f64) -> Vec<Message> {
    let head = head_boundary(messages);
    let tail_start = tail_boundary(messages, preserve_last_turns);
    let mut total = total_tokens(messages);
    let mut drop_until = head;

    for unit in atomic_units(messages) {
        if unit.start < head || unit.start >= tail_start {
            continue;
        }
        if max_tokens == 0 || (total as f64 / max_tokens as f64) <= target {
            break;
        }
        let unit_tokens: u32 = messages[unit.clone()].iter().map(message_tokens).sum();
        total = total.saturating_sub(unit_tokens);
        drop_until = unit.end;
    }

    let mut out = Vec::with_capacity(messages.len());
    out.extend_from_slice(&messages[..head]);
    out.extend_from_slice(&messages[drop_until.max(head)..]);
    out
}

fn build_message_text(messages: &[Message]) -> String {
    let mut buf = String::new();
    for m in messages {
        let role = match m.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        };
        buf.push_str(role);
        buf.push_str(": ");
        buf.push_str(&message_text(m));
        buf.push('\n');
    }
    buf
}

async fn generate_message_summary(
    provider: &dyn LlmProvider,
    conversation: &str,
) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let prompt = format!(
        "Summarize the following excerpt of conversation history into a concise \
         paragraph that preserves the current goal, key decisions, open threads, \
         and any tool state (running processes, pending work). Be terse.\n\n{conversation}"
    );
    let req = ChatRequest {
        messages: vec![Message::user(prompt)],
        tools: vec![],
        temperature: Some(0.1),
        max_tokens: Some(1000),
        response_format: sa_providers::ResponseFormat::Text,
        model: None,
    };
    let resp = provider.chat(&req).await?;
    Ok(resp.content)
}

/// Replace the middle span (between the preserved head and tail) with a
/// single synthetic assistant message summarizing it. Returns `None` when
/// there's no middle span to summarize or the summarizer call fails.
async fn summarize_middle(
    messages: &[Message],
    preserve_last_turns: usize,
    provider: &dyn LlmProvider,
) -> Option<Vec<Message>> {
    let head = head_boundary(messages);
    let tail_start = tail_boundary(messages, preserve_last_turns);
    if tail_start <= head + 1 {
        return None;
    }

    let middle = &messages[head..tail_start];
    let conversation = build_message_text(middle);
    let summary = generate_message_summary(provider, &conversation).await.ok()?;

    let mut out = Vec::with_capacity(messages.len() - (tail_start - head) + 1);
    out.extend_from_slice(&messages[..head]);
    out.push(Message::assistant(format!("[context summary]\n{summary}")));
    out.extend_from_slice(&messages[tail_start..]);
    Some(out)
}

/// The C7 entry point: checked before every LLM call. Returns the
/// (possibly unchanged) message list plus a `context_pressure` event once
/// utilization crosses the warn threshold.
///
/// Fail-open: `provider: None` (e.g. disabled in tests) or a summarizer
/// error at the emergency tier returns the original list unchanged rather
/// than propagating an error.
pub async fn maybe_compact_messages(
    messages: &[Message],
    max_tokens: u32,
    config: &CompactionConfig,
    provider: Option<&dyn LlmProvider>,
) -> (Vec<Message>, Option<PressureEvent>) {
    let u = utilization(messages, max_tokens);

    if u < config.warn_threshold as f64 {
        return (messages.to_vec(), None);
    }
    if u < config.aggressive_threshold as f64 {
        return (messages.to_vec(), Some(PressureEvent { tier: "warn", utilization: u }));
    }
    if u < config.emergency_threshold as f64 {
        let compacted = drop_aggressive(
            messages,
            max_tokens,
            config.preserve_last_turns,
            config.aggressive_threshold as f64,
        );
        return (compacted, Some(PressureEvent { tier: "aggressive", utilization: u }));
    }

    let Some(provider) = provider else {
        return (messages.to_vec(), Some(PressureEvent { tier: "emergency", utilization: u }));
    };

    match summarize_middle(messages, config.preserve_last_turns, provider).await {
        Some(compacted) => (compacted, Some(PressureEvent { tier: "emergency", utilization: u })),
        None => (messages.to_vec(), Some(PressureEvent { tier: "emergency", utilization: u })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(role: &str, content: &str) -> TranscriptLine {
        TranscriptWriter::line(role, content)
    }

    fn compaction(summary: &str) -> TranscriptLine {
        compaction_line(summary, 5)
    }

    #[test]
    fn no_compaction_marker() {
        let lines = vec![line("user", "hello"), line("assistant", "hi")];
        assert_eq!(compaction_boundary(&lines), 0);
        assert_eq!(active_turn_count(&lines), 1);
    }

    #[test]
    fn compaction_boundary_after_marker() {
        let lines = vec![
            line("user", "old"),
            line("assistant", "old reply"),
            compaction("summary of old conversation"),
            line("user", "new"),
            line("assistant", "new reply"),
        ];
        assert_eq!(compaction_boundary(&lines), 2);
        // Active turns = only "new" (after marker)
        assert_eq!(active_turn_count(&lines), 1);
    }

    #[test]
    fn should_compact_respects_threshold() {
        let config = CompactionConfig {
            auto: true,
            max_turns: 3,
            keep_last_turns: 1,
            ..Default::default()
        };
        let lines: Vec<_> = (0..4)
            .flat_map(|i| {
                vec![
                    line("user", &format!("msg {i}")),
                    line("assistant", &format!("reply {i}")),
                ]
            })
            .collect();
        assert!(should_compact(&lines, &config)); // 4 turns > 3
    }

    #[test]
    fn split_keeps_last_turns() {
        let lines: Vec<_> = (0..5)
            .flat_map(|i| {
                vec![
                    line("user", &format!("msg {i}")),
                    line("assistant", &format!("reply {i}")),
                ]
            })
            .collect();

        let (to_compact, to_keep) = split_for_compaction(&lines, 2);
        // 5 turns total, keep last 2 → compact first 3
        let compact_users: Vec<_> = to_compact
            .iter()
            .filter(|l| l.role == "user")
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(compact_users, vec!["msg 0", "msg 1", "msg 2"]);

        let keep_users: Vec<_> = to_keep
            .iter()
            .filter(|l| l.role == "user")
            .map(|l| l.content.as_str())
            .collect();
        assert_eq!(keep_users, vec!["msg 3", "msg 4"]);
    }

    fn turn_messages(n: usize) -> Vec<Message> {
        let mut out = vec![Message::system("you are an assistant")];
        for i in 0..n {
            out.push(Message::user(format!(
                "tell me something about topic {i} {}",
                "word ".repeat(20)
            )));
            out.push(Message::assistant(format!("reply about topic {i}")));
        }
        out
    }

    #[test]
    fn below_warn_threshold_is_untouched() {
        let messages = turn_messages(2);
        let config = CompactionConfig::default();
        let u = utilization(&messages, 1_000_000);
        assert!(u < config.warn_threshold as f64);
    }

    #[tokio::test]
    async fn warn_tier_leaves_messages_unchanged_but_reports_pressure() {
        let messages = turn_messages(20);
        let config = CompactionConfig::default();
        let max_tokens = total_tokens(&messages) * 100 / 81; // utilization ~0.81
        let (out, pressure) = maybe_compact_messages(&messages, max_tokens, &config, None).await;
        assert_eq!(out.len(), messages.len());
        let pressure = pressure.expect("expected a context_pressure event");
        assert_eq!(pressure.tier, "warn");
    }

    #[tokio::test]
    async fn aggressive_tier_drops_oldest_without_orphaning_tool_results() {
        let mut messages = vec![Message::system("sys")];
        for i in 0..10 {
            messages.push(Message::user(format!("question {i} {}", "x".repeat(200))));
            let mut tool_call = Message::assistant(format!("reply {i}"));
            tool_call.content = MessageContent::Parts(vec![ContentPart::ToolUse {
                id: format!("call-{i}"),
                name: "search".into(),
                input: serde_json::json!({}),
            }]);
            messages.push(tool_call);
            messages.push(Message::tool_result(format!("call-{i}"), "result"));
        }

        let config = CompactionConfig {
            preserve_last_turns: 2,
            ..Default::default()
        };
        let max_tokens = total_tokens(&messages) * 100 / 90; // utilization ~0.90 (aggressive tier)
        let (out, pressure) = maybe_compact_messages(&messages, max_tokens, &config, None).await;

        assert!(out.len() < messages.len());
        assert_eq!(pressure.unwrap().tier, "aggressive");
        // The system message survives.
        assert_eq!(out[0].role, Role::System);
        // Every tool-result message still refers to a tool_call_id present
        // in a preceding assistant message.
        let mut seen_calls: std::collections::HashSet<String> = std::collections::HashSet::new();
        for m in &out {
            match &m.content {
                MessageContent::Parts(parts) => {
                    for p in parts {
                        match p {
                            ContentPart::ToolUse { id, .. } => {
                                seen_calls.insert(id.clone());
                            }
                            ContentPart::ToolResult { tool_use_id, .. } => {
                                assert!(seen_calls.contains(tool_use_id));
                            }
                            _ => {}
                        }
                    }
                }
                MessageContent::Text(_) => {}
            }
        }
    }

    #[test]
    fn estimate_tokens_matches_word_and_punctuation_formula() {
        let text = "hello, world! how are you?";
        // 5 words, 3 punctuation marks.
        assert_eq!(estimate_tokens(text), (5.0_f64 * 1.3 + 3.0 * 0.5).round() as u32);
    }
}
