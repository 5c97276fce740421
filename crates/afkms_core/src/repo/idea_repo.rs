//! Idea persistence.

use super::{enum_column, fetch_optional, now_ms, RepoResult};
use crate::model::idea::{Idea, IdeaStatus};
use rusqlite::{params, Connection, Row};

const IDEA_SELECT_SQL: &str = "SELECT
    id,
    task_id,
    title,
    problem,
    hypothesis,
    status,
    topic_id,
    source,
    created_at,
    updated_at
FROM ideas";

pub struct IdeaRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> IdeaRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> RepoResult<Option<Idea>> {
        fetch_optional(
            self.conn,
            &format!("{IDEA_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_idea,
        )
    }

    pub fn insert(&self, idea: &Idea) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO ideas (
                id, task_id, title, problem, hypothesis, status, topic_id, source,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                idea.id,
                idea.task_id,
                idea.title,
                idea.problem,
                idea.hypothesis,
                idea.status.as_str(),
                idea.topic_id,
                idea.source,
                idea.created_at,
                idea.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, idea: &Idea) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE ideas
             SET
                task_id = ?1,
                title = ?2,
                problem = ?3,
                hypothesis = ?4,
                status = ?5,
                topic_id = ?6,
                source = ?7,
                updated_at = ?8
             WHERE id = ?9;",
            params![
                idea.task_id,
                idea.title,
                idea.problem,
                idea.hypothesis,
                idea.status.as_str(),
                idea.topic_id,
                idea.source,
                now_ms(),
                idea.id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute("DELETE FROM ideas WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn parse_idea(row: &Row<'_>) -> RepoResult<Idea> {
    Ok(Idea {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        title: row.get("title")?,
        problem: row.get("problem")?,
        hypothesis: row.get("hypothesis")?,
        status: enum_column(row, "status", IdeaStatus::parse)?,
        topic_id: row.get("topic_id")?,
        source: row.get("source")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
