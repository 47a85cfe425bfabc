//! Proactive Monitor — periodic multi-scanner that emits actionable alerts
//! onto the Event Bus. Each scanner is a pure function over the slice of
//! state it needs; a scanner that panics or errors is isolated and simply
//! contributes no alerts for that pass.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use sa_domain::config::MonitorConfig;

use super::bus::{EventBus, Topic};
use super::taskqueue::{QueuedTaskStatus, TaskFilter, TaskQueue};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Alert model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    StaleSession,
    UnansweredQuestion,
    FailedTask,
    SystemHealth,
    FollowUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub r#type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Alert {
    fn new(r#type: AlertType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            r#type,
            severity,
            message: message.into(),
            detected_at: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scanner trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inputs a scanner may need. Not every scanner uses every field.
pub struct ScanContext<'a> {
    pub session_transcript_dir: Option<&'a std::path::Path>,
    pub stale_session_secs: u64,
    pub task_queue: Option<&'a Arc<TaskQueue>>,
    pub data_dir: Option<&'a std::path::Path>,
}

pub trait Scanner: Send + Sync {
    fn name(&self) -> &'static str;
    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Alert>;
}

// ── Stale sessions ──────────────────────────────────────────────────

pub struct StaleSessionScanner;

impl Scanner for StaleSessionScanner {
    fn name(&self) -> &'static str {
        "stale_session"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Alert> {
        let Some(dir) = ctx.session_transcript_dir else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let now = std::time::SystemTime::now();
        let mut alerts = Vec::new();
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(modified) = meta.modified() else { continue };
            let Ok(age) = now.duration_since(modified) else { continue };
            if age.as_secs() > ctx.stale_session_secs {
                alerts.push(Alert::new(
                    AlertType::StaleSession,
                    Severity::Info,
                    format!(
                        "session file {} has been idle for {}s",
                        entry.file_name().to_string_lossy(),
                        age.as_secs()
                    ),
                ));
            }
        }
        alerts
    }
}

// ── Unanswered questions ────────────────────────────────────────────

pub struct UnansweredQuestionScanner;

impl Scanner for UnansweredQuestionScanner {
    fn name(&self) -> &'static str {
        "unanswered_question"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Alert> {
        let Some(dir) = ctx.session_transcript_dir else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut alerts = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Some(last) = content.lines().last() {
                if let Ok(v) = serde_json::from_str::<serde_json::Value>(last) {
                    let role = v.get("role").and_then(|r| r.as_str());
                    let text = v.get("content").and_then(|c| c.as_str()).unwrap_or("");
                    if role == Some("assistant") && text.trim_end().ends_with('?') {
                        alerts.push(Alert::new(
                            AlertType::UnansweredQuestion,
                            Severity::Info,
                            format!(
                                "{} ended with an unanswered question",
                                path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default()
                            ),
                        ));
                    }
                }
            }
        }
        alerts
    }
}

// ── Failed tasks ─────────────────────────────────────────────────────

pub struct FailedTaskScanner;

impl Scanner for FailedTaskScanner {
    fn name(&self) -> &'static str {
        "failed_task"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Alert> {
        let Some(queue) = ctx.task_queue else {
            return Vec::new();
        };
        queue
            .list(&TaskFilter {
                agent_id: None,
                status: Some(QueuedTaskStatus::Failed),
            })
            .into_iter()
            .map(|t| {
                Alert::new(
                    AlertType::FailedTask,
                    Severity::Warning,
                    format!("task {} exhausted retries: {}", t.task_id, t.error.unwrap_or_default()),
                )
            })
            .collect()
    }
}

// ── System health ───────────────────────────────────────────────────

pub struct SystemHealthScanner;

impl Scanner for SystemHealthScanner {
    fn name(&self) -> &'static str {
        "system_health"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Alert> {
        let Some(dir) = ctx.data_dir else {
            return Vec::new();
        };
        let mut alerts = Vec::new();
        let probe = dir.join(".monitor_health_probe");
        match std::fs::write(&probe, b"ok") {
            Ok(()) => {
                let _ = std::fs::remove_file(&probe);
            }
            Err(e) => {
                alerts.push(Alert::new(
                    AlertType::SystemHealth,
                    Severity::Critical,
                    format!("data directory {} is not writable: {e}", dir.display()),
                ));
            }
        }
        alerts
    }
}

// ── Follow-up reminders ─────────────────────────────────────────────

pub struct FollowUpScanner {
    patterns: Vec<regex::Regex>,
}

impl FollowUpScanner {
    pub fn new() -> Self {
        let patterns = [
            r"(?i)remind me",
            r"(?i)follow up (on|with)",
            r"(?i)don't forget to",
        ]
        .iter()
        .filter_map(|p| regex::Regex::new(p).ok())
        .collect();
        Self { patterns }
    }
}

impl Default for FollowUpScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner for FollowUpScanner {
    fn name(&self) -> &'static str {
        "follow_up"
    }

    fn scan(&self, ctx: &ScanContext<'_>) -> Vec<Alert> {
        let Some(dir) = ctx.session_transcript_dir else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut alerts = Vec::new();
        for entry in entries.flatten() {
            let Ok(content) = std::fs::read_to_string(entry.path()) else {
                continue;
            };
            for line in content.lines() {
                if self.patterns.iter().any(|re| re.is_match(line)) {
                    alerts.push(Alert::new(
                        AlertType::FollowUp,
                        Severity::Info,
                        format!(
                            "follow-up pattern detected in {}",
                            entry.file_name().to_string_lossy()
                        ),
                    ));
                    break;
                }
            }
        }
        alerts
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Monitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProactiveMonitor {
    config: MonitorConfig,
    scanners: Vec<Box<dyn Scanner>>,
    alerts: RwLock<VecDeque<Alert>>,
}

impl ProactiveMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            scanners: vec![
                Box::new(StaleSessionScanner),
                Box::new(UnansweredQuestionScanner),
                Box::new(FailedTaskScanner),
                Box::new(SystemHealthScanner),
                Box::new(FollowUpScanner::new()),
            ],
            alerts: RwLock::new(VecDeque::new()),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().iter().cloned().collect()
    }

    /// Run every scanner once. A scanner whose `scan` panics is caught via
    /// `catch_unwind` and contributes no alerts for this pass; the table is
    /// otherwise unaffected and the next pass still runs it.
    pub fn run_once(&self, ctx: &ScanContext<'_>) -> Vec<Alert> {
        let mut collected = Vec::new();
        for scanner in &self.scanners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| scanner.scan(ctx)));
            match result {
                Ok(alerts) => collected.extend(alerts),
                Err(_) => {
                    tracing::warn!(scanner = scanner.name(), "proactive monitor scanner panicked, isolated");
                }
            }
        }

        if !collected.is_empty() {
            let mut store = self.alerts.write();
            for alert in &collected {
                store.push_back(alert.clone());
            }
            while store.len() > self.config.max_alerts {
                store.pop_front();
            }
        }
        collected
    }

    pub fn scan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.scan_interval_secs)
    }
}

/// Spawn the periodic scan loop. Each non-empty pass publishes
/// `proactive_alerts {count, alerts}` on the Event Bus.
pub fn spawn_monitor_loop(
    monitor: Arc<ProactiveMonitor>,
    bus: Arc<EventBus>,
    ctx_factory: impl Fn() -> (Option<std::path::PathBuf>, Option<std::path::PathBuf>, Option<Arc<TaskQueue>>, u64)
        + Send
        + Sync
        + 'static,
) {
    let interval = monitor.scan_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let (session_dir, data_dir, queue, stale_secs) = ctx_factory();
            let ctx = ScanContext {
                session_transcript_dir: session_dir.as_deref(),
                stale_session_secs: stale_secs,
                task_queue: queue.as_ref(),
                data_dir: data_dir.as_deref(),
            };
            let alerts = monitor.run_once(&ctx);
            if !alerts.is_empty() {
                bus.publish(
                    Topic::ProactiveAlerts,
                    None,
                    serde_json::json!({ "count": alerts.len(), "alerts": alerts }),
                );
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_context_yields_no_alerts() {
        let monitor = ProactiveMonitor::new(MonitorConfig::default());
        let ctx = ScanContext {
            session_transcript_dir: None,
            stale_session_secs: 86_400,
            task_queue: None,
            data_dir: None,
        };
        let alerts = monitor.run_once(&ctx);
        assert!(alerts.is_empty());
    }

    #[test]
    fn failed_task_scanner_reports_failed_tasks() {
        let cfg = sa_domain::config::TaskQueueConfig::default();
        let queue = Arc::new(TaskQueue::new(cfg));
        queue
            .enqueue(
                "t1".into(),
                "agentA".into(),
                serde_json::json!({}),
                super::super::taskqueue::EnqueueOptions { max_attempts: Some(1) },
            )
            .unwrap();
        queue.lease("agentA", 60_000, "w").unwrap();
        queue.fail("t1", "boom".into()).unwrap();

        let scanner = FailedTaskScanner;
        let ctx = ScanContext {
            session_transcript_dir: None,
            stale_session_secs: 86_400,
            task_queue: Some(&queue),
            data_dir: None,
        };
        let alerts = scanner.scan(&ctx);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].r#type, AlertType::FailedTask);
    }

    #[test]
    fn alert_ring_buffer_caps_at_max_alerts() {
        let mut config = MonitorConfig::default();
        config.max_alerts = 2;
        let monitor = ProactiveMonitor::new(config);
        {
            let mut store = monitor.alerts.write();
            store.push_back(Alert::new(AlertType::SystemHealth, Severity::Info, "a"));
            store.push_back(Alert::new(AlertType::SystemHealth, Severity::Info, "b"));
            store.push_back(Alert::new(AlertType::SystemHealth, Severity::Info, "c"));
            while store.len() > monitor.config.max_alerts {
                store.pop_front();
            }
        }
        assert_eq!(monitor.alerts().len(), 2);
    }

    #[test]
    fn panicking_scanner_is_isolated() {
        struct Boom;
        impl Scanner for Boom {
            fn name(&self) -> &'static str {
                "boom"
            }
            fn scan(&self, _ctx: &ScanContext<'_>) -> Vec<Alert> {
                panic!("scanner exploded");
            }
        }
        let monitor = ProactiveMonitor {
            config: MonitorConfig::default(),
            scanners: vec![Box::new(Boom), Box::new(StaleSessionScanner)],
            alerts: RwLock::new(VecDeque::new()),
        };
        let ctx = ScanContext {
            session_transcript_dir: None,
            stale_session_secs: 86_400,
            task_queue: None,
            data_dir: None,
        };
        let alerts = monitor.run_once(&ctx);
        assert!(alerts.is_empty());
    }
}
