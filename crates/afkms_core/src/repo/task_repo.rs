//! Task, task source and topic persistence.

use super::{enum_column, fetch_optional, now_ms, optional_enum_column, RepoResult};
use crate::model::task::{Task, TaskPriority, TaskSource, TaskStatus, Topic};
use rusqlite::{params, Connection, OptionalExtension, Row};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    title,
    description,
    acceptance_criteria,
    topic_id,
    status,
    cancelled_reason,
    priority,
    due,
    source,
    archived_at,
    created_at,
    updated_at
FROM tasks";

pub struct TaskRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> TaskRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> RepoResult<Option<Task>> {
        fetch_optional(
            self.conn,
            &format!("{TASK_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_task,
        )
    }

    pub fn insert(&self, task: &Task) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO tasks (
                id, title, description, acceptance_criteria, topic_id, status,
                cancelled_reason, priority, due, source, archived_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                task.id,
                task.title,
                task.description,
                task.acceptance_criteria,
                task.topic_id,
                task.status.as_str(),
                task.cancelled_reason,
                task.priority.map(TaskPriority::as_str),
                task.due,
                task.source,
                task.archived_at,
                task.created_at,
                task.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Rewrites every mutable column and bumps `updated_at`.
    pub fn update(&self, task: &Task) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                title = ?1,
                description = ?2,
                acceptance_criteria = ?3,
                topic_id = ?4,
                status = ?5,
                cancelled_reason = ?6,
                priority = ?7,
                due = ?8,
                source = ?9,
                archived_at = ?10,
                updated_at = ?11
             WHERE id = ?12;",
            params![
                task.title,
                task.description,
                task.acceptance_criteria,
                task.topic_id,
                task.status.as_str(),
                task.cancelled_reason,
                task.priority.map(TaskPriority::as_str),
                task.due,
                task.source,
                task.archived_at,
                now_ms(),
                task.id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3;",
            params![status.as_str(), now_ms(), id],
        )?;
        Ok(changed > 0)
    }

    /// Deletes the task; its sources cascade. Returns whether a row existed.
    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute("DELETE FROM tasks WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    pub fn insert_source(&self, source: &TaskSource) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO task_sources (id, task_id, source_kind, source_ref, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                source.id,
                source.task_id,
                source.source_kind,
                source.source_ref,
                source.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_source(&self, id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM task_sources WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    pub fn list_sources(&self, task_id: &str) -> RepoResult<Vec<TaskSource>> {
        super::fetch_all(
            self.conn,
            "SELECT id, task_id, source_kind, source_ref, created_at
             FROM task_sources
             WHERE task_id = ?1
             ORDER BY created_at ASC, id ASC;",
            [task_id],
            |row| {
                Ok(TaskSource {
                    id: row.get("id")?,
                    task_id: row.get("task_id")?,
                    source_kind: row.get("source_kind")?,
                    source_ref: row.get("source_ref")?,
                    created_at: row.get("created_at")?,
                })
            },
        )
    }

    pub fn topic_exists(&self, id: &str) -> RepoResult<bool> {
        let found = self
            .conn
            .query_row("SELECT 1 FROM topics WHERE id = ?1;", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_topic(&self, topic: &Topic) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO topics (id, name, created_at) VALUES (?1, ?2, ?3);",
            params![topic.id, topic.name, topic.created_at],
        )?;
        Ok(())
    }
}

fn parse_task(row: &Row<'_>) -> RepoResult<Task> {
    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        acceptance_criteria: row.get("acceptance_criteria")?,
        topic_id: row.get("topic_id")?,
        status: enum_column(row, "status", TaskStatus::parse)?,
        cancelled_reason: row.get("cancelled_reason")?,
        priority: optional_enum_column(row, "priority", TaskPriority::parse)?,
        due: row.get("due")?,
        source: row.get("source")?,
        archived_at: row.get("archived_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
