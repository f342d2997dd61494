//! Persistent task records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::images::ImageOptions;

/// A task older than this while `processing` is reported as interrupted.
pub const STALE_AFTER_MINUTES: i64 = 30;

/// Retention windows before terminal records are deleted.
pub const FAILED_RETENTION_HOURS: i64 = 2;
pub const COMPLETED_RETENTION_HOURS: i64 = 24;

/// Persisted lifecycle states. `Interrupted` is a derived view computed
/// from staleness, never written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
    Interrupted,
}

/// Options for one ingest run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOptions {
    #[serde(default)]
    pub generate_images: bool,
    #[serde(default)]
    pub image_options: ImageOptions,
}

/// One background ingest task, stored as `{taskId}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: String,
    pub user_id: String,
    pub state: TaskState,
    /// Progress percentage in [0, 100].
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Strictly increases on every transition.
    pub updated_at: DateTime<Utc>,
    pub options: IngestOptions,
    /// Base64 source document, retained until completion for resume.
    #[serde(default)]
    pub file_data_base64: Option<String>,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskRecord {
    pub fn new(user_id: impl Into<String>, file_data_base64: String, options: IngestOptions) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            state: TaskState::Pending,
            progress: 0,
            message: "queued".to_string(),
            created_at: now,
            updated_at: now,
            options,
            file_data_base64: Some(file_data_base64),
            file_id: None,
            result: None,
            error: None,
        }
    }

    /// Record a progress checkpoint. `updated_at` strictly increases even
    /// when the wall clock has not ticked between transitions.
    pub fn checkpoint(&mut self, progress: u8, message: impl Into<String>) {
        self.state = TaskState::Processing;
        self.progress = progress.min(100);
        self.message = message.into();
        self.touch();
    }

    /// Transition to `completed`; the source bytes are cleared to
    /// reclaim space and progress pins to 100.
    pub fn complete(&mut self, result: serde_json::Value) {
        self.state = TaskState::Completed;
        self.progress = 100;
        self.message = "done".to_string();
        self.result = Some(result);
        self.file_data_base64 = None;
        self.touch();
    }

    /// Transition to `failed`; progress freezes where it was.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = TaskState::Failed;
        self.error = Some(error.into());
        self.message = "failed".to_string();
        self.touch();
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::milliseconds(1)
        };
    }

    /// The state reported to callers: a stale `processing` task shows as
    /// `interrupted`.
    pub fn effective_state(&self, now: DateTime<Utc>) -> TaskState {
        if self.state == TaskState::Processing
            && now - self.updated_at > Duration::minutes(STALE_AFTER_MINUTES)
        {
            TaskState::Interrupted
        } else {
            self.state
        }
    }

    /// Whether a terminal record has outlived its retention window.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            TaskState::Failed => now - self.updated_at > Duration::hours(FAILED_RETENTION_HOURS),
            TaskState::Completed => {
                now - self.updated_at > Duration::hours(COMPLETED_RETENTION_HOURS)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        TaskRecord::new("u1", "aGVsbG8=".to_string(), IngestOptions::default())
    }

    #[test]
    fn test_new_record_pending() {
        let record = record();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.progress, 0);
        assert!(record.file_data_base64.is_some());
    }

    #[test]
    fn test_updated_at_strictly_increases() {
        let mut record = record();
        let mut previous = record.updated_at;
        for progress in [10u8, 30, 70, 75] {
            record.checkpoint(progress, "step");
            assert!(record.updated_at > previous);
            previous = record.updated_at;
        }
    }

    #[test]
    fn test_complete_clears_file_data_and_pins_progress() {
        let mut record = record();
        record.checkpoint(98, "linking");
        record.complete(serde_json::json!({"fileId": "f1"}));
        assert_eq!(record.state, TaskState::Completed);
        assert_eq!(record.progress, 100);
        assert!(record.file_data_base64.is_none());
    }

    #[test]
    fn test_fail_freezes_progress() {
        let mut record = record();
        record.checkpoint(70, "extracting");
        record.fail("boom");
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.progress, 70);
        assert_eq!(record.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_stale_processing_reports_interrupted() {
        let mut record = record();
        record.checkpoint(30, "extracting");
        assert_eq!(record.effective_state(Utc::now()), TaskState::Processing);
        let later = Utc::now() + Duration::minutes(STALE_AFTER_MINUTES + 1);
        assert_eq!(record.effective_state(later), TaskState::Interrupted);
    }

    #[test]
    fn test_retention_windows() {
        let mut record = record();
        record.fail("boom");
        assert!(!record.expired(Utc::now()));
        assert!(record.expired(Utc::now() + Duration::hours(FAILED_RETENTION_HOURS + 1)));

        let mut record = TaskRecord::new("u1", String::new(), IngestOptions::default());
        record.complete(serde_json::json!({}));
        assert!(!record.expired(Utc::now() + Duration::hours(2)));
        assert!(record.expired(Utc::now() + Duration::hours(COMPLETED_RETENTION_HOURS + 1)));
    }
}
