//! Task and topic records.
//!
//! # Invariants
//! - `title` is 1..=200 characters and never blank.
//! - `due` is `YYYY-MM-DD`; `archived_at` is RFC 3339.
//! - A `cancelled` task carries a non-blank `cancelled_reason`.
//! - `done`/`cancelled` never move back to `in_progress`.

use super::{is_blank, is_calendar_date, is_rfc3339, present, ValidationError};
use serde::{Deserialize, Serialize};

pub const TASK_TITLE_MAX_CHARS: usize = 200;

string_enum! {
    /// Task lifecycle status.
    pub enum TaskStatus {
        Todo => "todo",
        InProgress => "in_progress",
        Done => "done",
        Cancelled => "cancelled",
    }
}

impl TaskStatus {
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    pub fn validate_transition(self, next: Self) -> Result<(), ValidationError> {
        if self.is_closed() && next == Self::InProgress {
            return Err(ValidationError::new(
                "TASK_INVALID_STATUS_TRANSITION",
                format!("task cannot move from `{self}` to `{next}`"),
            ));
        }
        Ok(())
    }
}

string_enum! {
    /// Priority shared by tasks and routes.
    pub enum TaskPriority {
        P0 => "P0",
        P1 => "P1",
        P2 => "P2",
        P3 => "P3",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: String,
    pub topic_id: Option<String>,
    pub status: TaskStatus,
    pub cancelled_reason: Option<String>,
    pub priority: Option<TaskPriority>,
    pub due: Option<String>,
    pub source: String,
    pub archived_at: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Provenance row appended whenever a task is created or patched with a `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSource {
    pub id: String,
    pub task_id: String,
    pub source_kind: String,
    pub source_ref: String,
    pub created_at: i64,
}

/// `create_task` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewTask {
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub cancelled_reason: Option<String>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub due: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl NewTask {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_title(&self.title)?;
        if let Some(due) = self.due.as_deref() {
            validate_due(due)?;
        }
        if self.status == TaskStatus::Cancelled
            && self.cancelled_reason.as_deref().map_or(true, is_blank)
        {
            return Err(ValidationError::code("TASK_CANCEL_REASON_REQUIRED"));
        }
        Ok(())
    }
}

/// `update_task` patch, also the before/after snapshot of that action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub topic_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub cancelled_reason: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Option<TaskPriority>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub due: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub archived_at: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Shape checks that need no stored state.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = self.title.as_deref() {
            validate_title(title)?;
        }
        if let Some(Some(due)) = self.due.as_ref() {
            validate_due(due)?;
        }
        if let Some(Some(archived_at)) = self.archived_at.as_ref() {
            if !is_rfc3339(archived_at) {
                return Err(ValidationError::new(
                    "TASK_ARCHIVED_AT_INVALID",
                    format!("`{archived_at}` is not an RFC 3339 timestamp"),
                ));
            }
        }
        if self.source.as_deref().is_some_and(is_blank) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "source cannot be blank"));
        }
        Ok(())
    }

    /// Checks status transition and cancel-reason rules against the stored task.
    pub fn validate_against(&self, task: &Task) -> Result<(), ValidationError> {
        let Some(next) = self.status else {
            return Ok(());
        };
        task.status.validate_transition(next)?;
        if next != TaskStatus::Cancelled {
            return Ok(());
        }
        let reason = match &self.cancelled_reason {
            Some(reason) => reason.as_deref(),
            None if task.status == TaskStatus::Cancelled => task.cancelled_reason.as_deref(),
            None => None,
        };
        if reason.map_or(true, is_blank) {
            return Err(ValidationError::code("TASK_CANCEL_REASON_REQUIRED"));
        }
        Ok(())
    }

    /// Current values of `task` for exactly the fields this patch touches.
    pub fn capture(&self, task: &Task) -> Self {
        Self {
            title: self.title.as_ref().map(|_| task.title.clone()),
            description: self.description.as_ref().map(|_| task.description.clone()),
            acceptance_criteria: self
                .acceptance_criteria
                .as_ref()
                .map(|_| task.acceptance_criteria.clone()),
            topic_id: self.topic_id.as_ref().map(|_| task.topic_id.clone()),
            status: self.status.map(|_| task.status),
            cancelled_reason: self
                .cancelled_reason
                .as_ref()
                .map(|_| task.cancelled_reason.clone()),
            priority: self.priority.map(|_| task.priority),
            due: self.due.as_ref().map(|_| task.due.clone()),
            source: self.source.as_ref().map(|_| task.source.clone()),
            archived_at: self.archived_at.as_ref().map(|_| task.archived_at.clone()),
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = description.clone();
        }
        if let Some(criteria) = &self.acceptance_criteria {
            task.acceptance_criteria = criteria.clone();
        }
        if let Some(topic_id) = &self.topic_id {
            task.topic_id = topic_id.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(reason) = &self.cancelled_reason {
            task.cancelled_reason = reason.clone();
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due) = &self.due {
            task.due = due.clone();
        }
        if let Some(source) = &self.source {
            task.source = source.clone();
        }
        if let Some(archived_at) = &self.archived_at {
            task.archived_at = archived_at.clone();
        }
    }
}

fn validate_title(title: &str) -> Result<(), ValidationError> {
    let chars = title.chars().count();
    if is_blank(title) || chars > TASK_TITLE_MAX_CHARS {
        return Err(ValidationError::new(
            "TASK_TITLE_INVALID",
            format!("title must be 1..={TASK_TITLE_MAX_CHARS} non-blank characters"),
        ));
    }
    Ok(())
}

fn validate_due(due: &str) -> Result<(), ValidationError> {
    if !is_calendar_date(due) {
        return Err(ValidationError::new(
            "TASK_DUE_INVALID",
            format!("`{due}` is not a YYYY-MM-DD date"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(status: TaskStatus) -> Task {
        Task {
            id: "tsk_1".to_string(),
            title: "write docs".to_string(),
            description: String::new(),
            acceptance_criteria: String::new(),
            topic_id: None,
            status,
            cancelled_reason: None,
            priority: Some(TaskPriority::P3),
            due: None,
            source: String::new(),
            archived_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn patch_distinguishes_absent_null_and_value() {
        let patch: TaskPatch =
            serde_json::from_value(json!({"priority": null, "title": "x"})).unwrap();
        assert_eq!(patch.priority, Some(None));
        assert_eq!(patch.due, None);
        assert_eq!(patch.title.as_deref(), Some("x"));

        let snapshot = serde_json::to_value(&patch).unwrap();
        assert_eq!(snapshot, json!({"title": "x", "priority": null}));
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let err = serde_json::from_value::<TaskPatch>(json!({"colour": "red"})).unwrap_err();
        assert!(err.to_string().contains("colour"));
    }

    #[test]
    fn capture_then_apply_restores_touched_fields() {
        let mut stored = task(TaskStatus::Todo);
        let patch = TaskPatch {
            priority: Some(Some(TaskPriority::P1)),
            due: Some(Some("2026-05-01".to_string())),
            ..TaskPatch::default()
        };
        let before = patch.capture(&stored);
        patch.apply_to(&mut stored);
        assert_eq!(stored.priority, Some(TaskPriority::P1));

        before.apply_to(&mut stored);
        assert_eq!(stored, task(TaskStatus::Todo));
    }

    #[test]
    fn closed_tasks_cannot_resume() {
        let patch = TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..TaskPatch::default()
        };
        let err = patch.validate_against(&task(TaskStatus::Done)).unwrap_err();
        assert_eq!(err.code, "TASK_INVALID_STATUS_TRANSITION");
    }

    #[test]
    fn cancelling_requires_reason() {
        let patch = TaskPatch {
            status: Some(TaskStatus::Cancelled),
            ..TaskPatch::default()
        };
        let err = patch.validate_against(&task(TaskStatus::Todo)).unwrap_err();
        assert_eq!(err.code, "TASK_CANCEL_REASON_REQUIRED");

        let with_reason = TaskPatch {
            status: Some(TaskStatus::Cancelled),
            cancelled_reason: Some(Some("duplicate".to_string())),
            ..TaskPatch::default()
        };
        assert!(with_reason.validate_against(&task(TaskStatus::Todo)).is_ok());
    }

    #[test]
    fn new_task_checks_title_and_due() {
        let mut new_task: NewTask =
            serde_json::from_value(json!({"title": "x", "status": "todo"})).unwrap();
        assert!(new_task.validate().is_ok());

        new_task.due = Some("tomorrow".to_string());
        assert_eq!(new_task.validate().unwrap_err().code, "TASK_DUE_INVALID");

        new_task.due = None;
        new_task.title = "  ".to_string();
        assert_eq!(new_task.validate().unwrap_err().code, "TASK_TITLE_INVALID");
    }
}
