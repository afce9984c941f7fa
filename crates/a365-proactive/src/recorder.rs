use a365_core::{A365Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const MAX_DETAIL_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Error,
    /// Tenant consent has not propagated yet; the next tick may succeed.
    ConsentPending,
}

impl TaskStatus {
    pub fn of(error: &A365Error) -> Self {
        if error.is_consent_pending() {
            TaskStatus::ConsentPending
        } else {
            TaskStatus::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
            TaskStatus::ConsentPending => "consent_pending",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one scheduled operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRunRecord {
    pub run_id: Uuid,
    pub agent_upn: String,
    pub task_name: String,
    pub tool: String,
    pub status: TaskStatus,
    pub detail: String,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl TaskRunRecord {
    pub fn new(
        agent_upn: impl Into<String>,
        task_name: impl Into<String>,
        tool: impl Into<String>,
        status: TaskStatus,
        detail: &str,
        elapsed: Duration,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            agent_upn: agent_upn.into(),
            task_name: task_name.into(),
            tool: tool.into(),
            status,
            detail: detail.chars().take(MAX_DETAIL_CHARS).collect(),
            duration_ms: elapsed.as_millis() as u64,
            finished_at: Utc::now(),
        }
    }
}

/// Sink for task run records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskRecorder: Send + Sync {
    async fn record(&self, record: TaskRunRecord) -> Result<()>;
}

/// Keeps every record in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    records: Mutex<Vec<TaskRunRecord>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<TaskRunRecord> {
        self.records.lock().await.clone()
    }

    /// Most recent record of one task of an agent.
    pub async fn latest(&self, agent_upn: &str, task_name: &str) -> Option<TaskRunRecord> {
        self.records
            .lock()
            .await
            .iter()
            .rev()
            .find(|record| {
                record.agent_upn.eq_ignore_ascii_case(agent_upn) && record.task_name == task_name
            })
            .cloned()
    }
}

#[async_trait]
impl TaskRecorder for InMemoryRecorder {
    async fn record(&self, record: TaskRunRecord) -> Result<()> {
        debug!(
            "Recorded {} for {}/{} ({}ms)",
            record.status, record.agent_upn, record.task_name, record.duration_ms
        );
        self.records.lock().await.push(record);
        Ok(())
    }
}
