//! `create_task` and `update_task`.

use super::record::{ApplyRecord, ApplyResult};
use super::{not_found, ActionResult};
use crate::model::note::LinkEndpoint;
use crate::model::task::{NewTask, Task, TaskPatch, TaskSource};
use crate::model::is_blank;
use crate::repo::note_repo::LinkRepo;
use crate::repo::task_repo::TaskRepo;
use crate::repo::{new_id, now_ms};
use rusqlite::Connection;

const TEXT_SOURCE_KIND: &str = "text";

pub(super) fn ensure_topic(conn: &Connection, topic_id: Option<&str>) -> ActionResult<()> {
    match topic_id {
        Some(topic_id) if !TaskRepo::new(conn).topic_exists(topic_id)? => {
            Err(not_found("TOPIC_NOT_FOUND", topic_id))
        }
        _ => Ok(()),
    }
}

pub(super) fn validate_create(conn: &Connection, new_task: &NewTask) -> ActionResult<()> {
    ensure_topic(conn, new_task.topic_id.as_deref())
}

/// Existence of the task is checked at apply time only.
pub(super) fn validate_update(conn: &Connection, patch: &TaskPatch) -> ActionResult<()> {
    if let Some(Some(topic_id)) = &patch.topic_id {
        ensure_topic(conn, Some(topic_id))?;
    }
    Ok(())
}

pub(super) fn apply_create(conn: &Connection, new_task: &NewTask) -> ActionResult<ApplyResult> {
    validate_create(conn, new_task)?;

    let now = now_ms();
    let task = Task {
        id: new_id("tsk"),
        title: new_task.title.clone(),
        description: new_task.description.clone(),
        acceptance_criteria: new_task.acceptance_criteria.clone(),
        topic_id: new_task.topic_id.clone(),
        status: new_task.status,
        cancelled_reason: new_task.cancelled_reason.clone(),
        priority: new_task.priority,
        due: new_task.due.clone(),
        source: new_task.source.clone().unwrap_or_default(),
        archived_at: None,
        created_at: now,
        updated_at: now,
    };
    let repo = TaskRepo::new(conn);
    repo.insert(&task)?;
    let source_entry_id = record_source(&repo, &task.id, new_task.source.as_deref())?;

    Ok(ApplyResult::new(
        task.id,
        ApplyRecord::CreateTask { source_entry_id },
    ))
}

pub(super) fn apply_update(
    conn: &Connection,
    task_id: &str,
    patch: &TaskPatch,
) -> ActionResult<ApplyResult> {
    let repo = TaskRepo::new(conn);
    let mut task = repo
        .get(task_id)?
        .ok_or_else(|| not_found("TASK_NOT_FOUND", task_id))?;
    validate_update(conn, patch)?;
    patch.validate_against(&task)?;

    let before = patch.capture(&task);
    patch.apply_to(&mut task);
    let after = patch.capture(&task);
    repo.update(&task)?;
    let source_entry_id = record_source(&repo, &task.id, patch.source.as_deref())?;

    Ok(ApplyResult::new(
        task.id,
        ApplyRecord::UpdateTask {
            before,
            after,
            source_entry_id,
        },
    ))
}

/// Deletes the created task and any links pointing at it. Already gone is fine.
pub(super) fn rollback_create(conn: &Connection, task_id: &str) -> ActionResult<()> {
    LinkRepo::new(conn).delete_touching(LinkEndpoint::Task, task_id)?;
    TaskRepo::new(conn).delete(task_id)?;
    Ok(())
}

pub(super) fn rollback_update(
    conn: &Connection,
    task_id: &str,
    before: &TaskPatch,
    source_entry_id: Option<&str>,
) -> ActionResult<()> {
    let repo = TaskRepo::new(conn);
    let mut task = repo
        .get(task_id)?
        .ok_or_else(|| not_found("TASK_NOT_FOUND", task_id))?;
    before.apply_to(&mut task);
    repo.update(&task)?;
    if let Some(source_entry_id) = source_entry_id {
        repo.delete_source(source_entry_id)?;
    }
    Ok(())
}

fn record_source(
    repo: &TaskRepo<'_>,
    task_id: &str,
    source: Option<&str>,
) -> ActionResult<Option<String>> {
    let Some(source) = source.filter(|source| !is_blank(source)) else {
        return Ok(None);
    };
    let entry = TaskSource {
        id: new_id("tsrc"),
        task_id: task_id.to_string(),
        source_kind: TEXT_SOURCE_KIND.to_string(),
        source_ref: source.to_string(),
        created_at: now_ms(),
    };
    repo.insert_source(&entry)?;
    Ok(Some(entry.id))
}
