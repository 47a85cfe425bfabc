//! Signal Classifier — heuristic pre-classification of inbound text into
//! the [`sa_domain::signal::Signal`] 5-tuple, with an optional LLM
//! refinement pass and a noise filter that lets the caller short-circuit
//! without ever invoking the LLM for the turn itself.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;

use sa_domain::config::ClassifierConfig;
use sa_domain::error::Result;
use sa_domain::signal::{Genre, Mode, Signal};
use sa_domain::tool::{Message, MessageContent, Role};

use sa_providers::{ChatRequest, LlmProvider};

/// Outcome of classifying one inbound message.
pub enum Classification {
    /// Weight cleared the noise threshold; carry on to context assembly.
    Accepted(Signal),
    /// Weight fell below the noise threshold; the caller must short-circuit
    /// with `{filtered, signal}` and skip the LLM call for this turn.
    Filtered(Signal),
}

/// Heuristic keyword/regex tables. Checked in a fixed order so the result
/// is deterministic for identical input.
struct HeuristicTables {
    execute: Regex,
    analyze: Regex,
    build: Regex,
    maintain: Regex,
    direct: Regex,
    commit: Regex,
    decide: Regex,
    express: Regex,
    question: Regex,
}

impl HeuristicTables {
    fn compile() -> Self {
        Self {
            execute: Regex::new(r"(?i)\b(run|execute|deploy|launch|start|kill|restart)\b").unwrap(),
            analyze: Regex::new(r"(?i)\b(analy[sz]e|investigate|debug|diagnose|why (is|does|did))\b")
                .unwrap(),
            build: Regex::new(r"(?i)\b(build|implement|create|add|write|generate)\b").unwrap(),
            maintain: Regex::new(r"(?i)\b(fix|refactor|clean up|update|upgrade|migrate)\b").unwrap(),
            direct: Regex::new(r"(?i)^(please\s+)?(do|run|make|go|stop|use)\b").unwrap(),
            commit: Regex::new(r"(?i)\b(i will|i'll|let's|we should|going to)\b").unwrap(),
            decide: Regex::new(r"(?i)\b(should we|which (one|option)|decide|choose|prefer)\b").unwrap(),
            express: Regex::new(r"(?i)\b(thanks|great|awesome|nice|sorry|ugh|frustrat)\b").unwrap(),
            question: Regex::new(r"\?\s*$").unwrap(),
        }
    }
}

/// Heuristic pre-classify: regex/keyword tables infer mode, genre, kind,
/// and an initial weight. Field order is fixed (mode, genre, kind, format,
/// weight) so two calls on the same text always agree.
fn heuristic_classify(text: &str, channel: &str) -> Signal {
    let t = HeuristicTables::compile();

    let mode = if t.execute.is_match(text) {
        Mode::Execute
    } else if t.analyze.is_match(text) {
        Mode::Analyze
    } else if t.build.is_match(text) {
        Mode::Build
    } else if t.maintain.is_match(text) {
        Mode::Maintain
    } else {
        Mode::Assist
    };

    let genre = if t.direct.is_match(text) {
        Genre::Direct
    } else if t.commit.is_match(text) {
        Genre::Commit
    } else if t.decide.is_match(text) {
        Genre::Decide
    } else if t.express.is_match(text) {
        Genre::Express
    } else {
        Genre::Inform
    };

    let kind = if t.question.is_match(text) {
        "question"
    } else if matches!(mode, Mode::Execute) {
        "command"
    } else {
        "statement"
    }
    .to_string();

    let format = "message".to_string();

    // Initial weight: informational density proxy. Longer, punctuation-rich
    // text and anything that isn't a bare greeting scores higher; very
    // short acknowledgements score low enough to hit the noise filter.
    let trimmed = text.trim();
    let word_count = trimmed.split_whitespace().count();
    let mut weight = if word_count == 0 {
        0.0
    } else {
        (0.25 + (word_count as f32 / 20.0).min(0.6)).min(1.0)
    };
    if matches!(genre, Genre::Express) && word_count <= 4 {
        weight = weight.min(0.3);
    }
    if matches!(mode, Mode::Execute | Mode::Build | Mode::Maintain) {
        weight = (weight + 0.2).min(1.0);
    }

    let mut signal = Signal {
        mode,
        genre,
        kind,
        format,
        weight,
        channel: channel.to_string(),
        timestamp: Utc::now(),
    };
    signal.clamp_weight();
    signal
}

const REFINE_PROMPT: &str = "Classify the following message. Respond with strict JSON only: \
{\"mode\":\"execute|assist|analyze|build|maintain\",\"genre\":\"direct|inform|commit|decide|express\",\
\"type\":\"<short free-form label>\",\"format\":\"<short free-form label>\",\"weight\":<0.0-1.0>}";

#[derive(serde::Deserialize)]
struct RefinedFields {
    mode: Option<String>,
    genre: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    format: Option<String>,
    weight: Option<f32>,
}

fn parse_mode(s: &str) -> Option<Mode> {
    match s.to_ascii_lowercase().as_str() {
        "execute" => Some(Mode::Execute),
        "assist" => Some(Mode::Assist),
        "analyze" => Some(Mode::Analyze),
        "build" => Some(Mode::Build),
        "maintain" => Some(Mode::Maintain),
        _ => None,
    }
}

fn parse_genre(s: &str) -> Option<Genre> {
    match s.to_ascii_lowercase().as_str() {
        "direct" => Some(Genre::Direct),
        "inform" => Some(Genre::Inform),
        "commit" => Some(Genre::Commit),
        "decide" => Some(Genre::Decide),
        "express" => Some(Genre::Express),
        _ => None,
    }
}

/// Apply an optional LLM refinement pass: a classifier-tuned prompt
/// produces structured fields which override the heuristic result where
/// non-empty. Any failure (provider error, malformed JSON) leaves the
/// heuristic signal untouched — refinement is best-effort.
async fn llm_refine(provider: &dyn LlmProvider, text: &str, mut signal: Signal) -> Signal {
    let req = ChatRequest {
        messages: vec![
            Message {
                role: Role::System,
                content: MessageContent::Text(REFINE_PROMPT.to_string()),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text(text.to_string()),
            },
        ],
        response_format: sa_providers::ResponseFormat::JsonObject,
        max_tokens: Some(200),
        ..Default::default()
    };

    let response = match provider.chat(&req).await {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(error = %e, "signal classifier LLM refinement failed, keeping heuristic result");
            return signal;
        }
    };

    let fields: RefinedFields = match serde_json::from_str(&response.content) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "signal classifier LLM response was not valid JSON");
            return signal;
        }
    };

    if let Some(m) = fields.mode.as_deref().and_then(parse_mode) {
        signal.mode = m;
    }
    if let Some(g) = fields.genre.as_deref().and_then(parse_genre) {
        signal.genre = g;
    }
    if let Some(k) = fields.kind.filter(|s| !s.is_empty()) {
        signal.kind = k;
    }
    if let Some(f) = fields.format.filter(|s| !s.is_empty()) {
        signal.format = f;
    }
    if let Some(w) = fields.weight {
        signal.weight = w;
    }
    signal.clamp_weight();
    signal
}

/// Run the full pipeline: heuristic pre-classify, optional LLM refinement,
/// noise filter. `provider` is only consulted when `config.llm_refine` is
/// set and `text` clears `llm_refine_min_chars`.
pub async fn classify(
    text: &str,
    channel: &str,
    config: &ClassifierConfig,
    provider: Option<&Arc<dyn LlmProvider>>,
) -> Result<Classification> {
    let mut signal = heuristic_classify(text, channel);

    if config.llm_refine && text.trim().chars().count() >= config.llm_refine_min_chars {
        if let Some(provider) = provider {
            signal = llm_refine(provider.as_ref(), text, signal).await;
        }
    }

    if signal.is_below_threshold(config.noise_threshold) {
        Ok(Classification::Filtered(signal))
    } else {
        Ok(Classification::Accepted(signal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ClassifierConfig {
        ClassifierConfig {
            noise_threshold: 0.6,
            llm_refine: false,
            llm_refine_min_chars: 40,
        }
    }

    #[tokio::test]
    async fn short_greeting_is_filtered() {
        let result = classify("thanks!", "cli", &cfg(), None).await.unwrap();
        assert!(matches!(result, Classification::Filtered(_)));
    }

    #[tokio::test]
    async fn substantive_build_request_is_accepted() {
        let text = "Please implement a retry wrapper around the HTTP client with exponential backoff and jitter.";
        let result = classify(text, "cli", &cfg(), None).await.unwrap();
        match result {
            Classification::Accepted(signal) => {
                assert_eq!(signal.mode, Mode::Build);
            }
            Classification::Filtered(_) => panic!("expected acceptance"),
        }
    }

    #[tokio::test]
    async fn execute_keyword_sets_execute_mode() {
        let result = classify("run the deploy script now", "cli", &cfg(), None)
            .await
            .unwrap();
        match result {
            Classification::Accepted(signal) | Classification::Filtered(signal) => {
                assert_eq!(signal.mode, Mode::Execute);
            }
        }
    }

    #[tokio::test]
    async fn trailing_question_mark_sets_question_kind() {
        let result = classify(
            "Why does the compactor keep dropping tool results before the emergency tier?",
            "cli",
            &cfg(),
            None,
        )
        .await
        .unwrap();
        match result {
            Classification::Accepted(signal) => assert_eq!(signal.kind, "question"),
            Classification::Filtered(signal) => assert_eq!(signal.kind, "question"),
        }
    }

    #[test]
    fn heuristic_classify_is_deterministic() {
        let a = heuristic_classify("refactor the session store module", "cli");
        let b = heuristic_classify("refactor the session store module", "cli");
        assert_eq!(a.mode, b.mode);
        assert_eq!(a.genre, b.genre);
        assert_eq!(a.kind, b.kind);
        assert!((a.weight - b.weight).abs() < f32::EPSILON);
    }

    #[test]
    fn empty_text_has_zero_weight() {
        let s = heuristic_classify("", "cli");
        assert_eq!(s.weight, 0.0);
    }
}
