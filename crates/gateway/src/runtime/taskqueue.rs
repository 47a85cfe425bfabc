//! Durable Task Queue — at-most-one-lease atomic dispatch with automatic
//! lease reaping and bounded-attempt retry.
//!
//! This is distinct from [`super::tasks::TaskStore`] (which tracks ephemeral,
//! session-bound turn concurrency) and from [`super::schedules`] (cron
//! scheduling): this queue models agent-addressed durable jobs per the
//! `enqueue`/`lease`/`complete`/`fail` contract, with one logical lock per
//! task id so concurrent `lease` calls for the same agent never double-hand
//! out a task.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sa_domain::config::TaskQueueConfig;
use sa_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedTaskStatus {
    Pending,
    Leased,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub task_id: String,
    pub agent_id: String,
    pub payload: Value,
    pub status: QueuedTaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leased_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leased_by: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueuedTask {
    /// A task is leased iff `leased_until` is in the future and `leased_by`
    /// is set — the invariant the spec calls out explicitly.
    pub fn is_actively_leased(&self, now: DateTime<Utc>) -> bool {
        self.status == QueuedTaskStatus::Leased
            && self.leased_by.is_some()
            && self.leased_until.map(|t| t > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub agent_id: Option<String>,
    pub status: Option<QueuedTaskStatus>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TaskQueueEvent {
    #[serde(rename = "task_enqueued")]
    Enqueued { task_id: String },
    #[serde(rename = "task_leased")]
    Leased { task_id: String, agent_id: String },
    #[serde(rename = "task_completed")]
    Completed { task_id: String },
    #[serde(rename = "task_failed")]
    Failed {
        task_id: String,
        r#final: bool,
        attempts: u32,
        max_attempts: u32,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskQueue {
    tasks: RwLock<HashMap<String, QueuedTask>>,
    config: TaskQueueConfig,
    on_event: Arc<dyn Fn(TaskQueueEvent) + Send + Sync>,
}

impl TaskQueue {
    pub fn new(config: TaskQueueConfig) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            config,
            on_event: Arc::new(|_| {}),
        }
    }

    pub fn with_event_sink(config: TaskQueueConfig, sink: impl Fn(TaskQueueEvent) + Send + Sync + 'static) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            config,
            on_event: Arc::new(sink),
        }
    }

    pub fn enqueue(
        &self,
        task_id: String,
        agent_id: String,
        payload: Value,
        opts: EnqueueOptions,
    ) -> Result<()> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task_id) {
            return Err(Error::Other(format!("task {task_id} already exists")));
        }
        tasks.insert(
            task_id.clone(),
            QueuedTask {
                task_id: task_id.clone(),
                agent_id,
                payload,
                status: QueuedTaskStatus::Pending,
                leased_until: None,
                leased_by: None,
                attempts: 0,
                max_attempts: opts.max_attempts.unwrap_or(self.config.default_max_attempts),
                result: None,
                error: None,
                created_at: Utc::now(),
                completed_at: None,
            },
        );
        drop(tasks);
        (self.on_event)(TaskQueueEvent::Enqueued { task_id });
        Ok(())
    }

    /// Atomically select the oldest pending task for `agent_id` and lease it.
    /// The select+update happens under a single write-lock critical section,
    /// so two concurrent callers for the same agent always observe distinct
    /// tasks (or one observes `None`).
    pub fn lease(&self, agent_id: &str, duration_ms: u64, leased_by: &str) -> Option<QueuedTask> {
        let now = Utc::now();
        let mut tasks = self.tasks.write();
        let candidate_id = tasks
            .values()
            .filter(|t| t.agent_id == agent_id && t.status == QueuedTaskStatus::Pending)
            .min_by_key(|t| t.created_at)
            .map(|t| t.task_id.clone())?;

        let task = tasks.get_mut(&candidate_id)?;
        task.status = QueuedTaskStatus::Leased;
        task.leased_until = Some(now + ChronoDuration::milliseconds(duration_ms as i64));
        task.leased_by = Some(leased_by.to_string());
        let out = task.clone();
        drop(tasks);
        (self.on_event)(TaskQueueEvent::Leased {
            task_id: out.task_id.clone(),
            agent_id: agent_id.to_string(),
        });
        Some(out)
    }

    pub fn complete(&self, task_id: &str, result: Value) -> Result<()> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        task.status = QueuedTaskStatus::Completed;
        task.result = Some(result);
        task.leased_until = None;
        task.leased_by = None;
        task.completed_at = Some(Utc::now());
        drop(tasks);
        (self.on_event)(TaskQueueEvent::Completed {
            task_id: task_id.to_string(),
        });
        Ok(())
    }

    /// Record a failure. If attempts remain, the task reverts to `pending`
    /// (not a terminal state); otherwise it becomes `failed`.
    pub fn fail(&self, task_id: &str, error: String) -> Result<bool> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        task.attempts += 1;
        task.error = Some(error);
        task.leased_until = None;
        task.leased_by = None;
        let is_final = task.attempts >= task.max_attempts;
        if is_final {
            task.status = QueuedTaskStatus::Failed;
            task.completed_at = Some(Utc::now());
        } else {
            task.status = QueuedTaskStatus::Pending;
        }
        let (attempts, max_attempts) = (task.attempts, task.max_attempts);
        drop(tasks);
        (self.on_event)(TaskQueueEvent::Failed {
            task_id: task_id.to_string(),
            r#final: is_final,
            attempts,
            max_attempts,
        });
        Ok(is_final)
    }

    pub fn get(&self, task_id: &str) -> Option<QueuedTask> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn list(&self, filter: &TaskFilter) -> Vec<QueuedTask> {
        let tasks = self.tasks.read();
        let mut out: Vec<QueuedTask> = tasks
            .values()
            .filter(|t| {
                filter.agent_id.as_deref().map(|a| a == t.agent_id).unwrap_or(true)
                    && filter.status.map(|s| s == t.status).unwrap_or(true)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Transition expired leases back to `pending`. Does not increment
    /// `attempts` — a lease timeout is not a failed attempt.
    pub fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let mut tasks = self.tasks.write();
        let mut reaped = 0;
        for task in tasks.values_mut() {
            if task.status == QueuedTaskStatus::Leased && !task.is_actively_leased(now) {
                task.status = QueuedTaskStatus::Pending;
                task.leased_until = None;
                task.leased_by = None;
                reaped += 1;
            }
        }
        reaped
    }

    pub fn reap_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.reap_interval_secs)
    }

    pub fn default_lease_ms(&self) -> u64 {
        self.config.default_lease_ms
    }
}

/// Spawn the periodic reaper. Intended to be called once at startup.
pub fn spawn_reaper(queue: Arc<TaskQueue>) {
    let interval = queue.reap_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let n = queue.reap_expired();
            if n > 0 {
                tracing::debug!(reaped = n, "task queue reaper reclaimed expired leases");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> TaskQueueConfig {
        TaskQueueConfig::default()
    }

    #[test]
    fn enqueue_then_lease() {
        let q = TaskQueue::new(cfg());
        q.enqueue("t1".into(), "agentA".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        let leased = q.lease("agentA", 60_000, "worker1").unwrap();
        assert_eq!(leased.task_id, "t1");
        assert_eq!(leased.status, QueuedTaskStatus::Leased);
    }

    #[test]
    fn lease_picks_oldest_first() {
        let q = TaskQueue::new(cfg());
        q.enqueue("t1".into(), "agentA".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        q.enqueue("t2".into(), "agentA".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        let first = q.lease("agentA", 60_000, "w").unwrap();
        assert_eq!(first.task_id, "t1");
        let second = q.lease("agentA", 60_000, "w").unwrap();
        assert_eq!(second.task_id, "t2");
        assert!(q.lease("agentA", 60_000, "w").is_none());
    }

    #[test]
    fn lease_ignores_other_agents() {
        let q = TaskQueue::new(cfg());
        q.enqueue("t1".into(), "agentA".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        assert!(q.lease("agentB", 60_000, "w").is_none());
    }

    #[test]
    fn complete_marks_terminal() {
        let q = TaskQueue::new(cfg());
        q.enqueue("t1".into(), "agentA".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("agentA", 60_000, "w").unwrap();
        q.complete("t1", serde_json::json!({"ok": true})).unwrap();
        let t = q.get("t1").unwrap();
        assert_eq!(t.status, QueuedTaskStatus::Completed);
    }

    #[test]
    fn fail_reverts_to_pending_until_max_attempts() {
        let q = TaskQueue::new(cfg());
        q.enqueue(
            "t1".into(),
            "agentA".into(),
            serde_json::json!({}),
            EnqueueOptions { max_attempts: Some(2) },
        )
        .unwrap();
        q.lease("agentA", 60_000, "w").unwrap();
        let is_final = q.fail("t1", "boom".into()).unwrap();
        assert!(!is_final);
        assert_eq!(q.get("t1").unwrap().status, QueuedTaskStatus::Pending);

        q.lease("agentA", 60_000, "w").unwrap();
        let is_final = q.fail("t1", "boom again".into()).unwrap();
        assert!(is_final);
        assert_eq!(q.get("t1").unwrap().status, QueuedTaskStatus::Failed);
    }

    #[test]
    fn reap_reverts_expired_lease_without_incrementing_attempts() {
        let q = TaskQueue::new(cfg());
        q.enqueue("t1".into(), "agentA".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("agentA", 0, "w").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let reaped = q.reap_expired();
        assert_eq!(reaped, 1);
        let t = q.get("t1").unwrap();
        assert_eq!(t.status, QueuedTaskStatus::Pending);
        assert_eq!(t.attempts, 0);
    }

    #[test]
    fn get_missing_is_none() {
        let q = TaskQueue::new(cfg());
        assert!(q.get("nope").is_none());
    }

    #[test]
    fn fail_on_missing_task_errors() {
        let q = TaskQueue::new(cfg());
        assert!(q.fail("nope", "x".into()).is_err());
    }

    #[test]
    fn list_filters_by_agent_and_status() {
        let q = TaskQueue::new(cfg());
        q.enqueue("t1".into(), "agentA".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        q.enqueue("t2".into(), "agentB".into(), serde_json::json!({}), EnqueueOptions::default())
            .unwrap();
        q.lease("agentA", 60_000, "w").unwrap();

        let pending_b = q.list(&TaskFilter {
            agent_id: Some("agentB".into()),
            status: Some(QueuedTaskStatus::Pending),
        });
        assert_eq!(pending_b.len(), 1);
        assert_eq!(pending_b[0].task_id, "t2");
    }
}
