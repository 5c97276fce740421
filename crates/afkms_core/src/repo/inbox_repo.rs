//! Inbox persistence.

use super::{fetch_optional, RepoResult};
use crate::model::inbox::InboxItem;
use rusqlite::{params, Connection};

pub struct InboxRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> InboxRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> RepoResult<Option<InboxItem>> {
        fetch_optional(
            self.conn,
            "SELECT id, content, source, status, captured_at, updated_at
             FROM inbox_items
             WHERE id = ?1;",
            [id],
            |row| {
                Ok(InboxItem {
                    id: row.get("id")?,
                    content: row.get("content")?,
                    source: row.get("source")?,
                    status: row.get("status")?,
                    captured_at: row.get("captured_at")?,
                    updated_at: row.get("updated_at")?,
                })
            },
        )
    }

    pub fn insert(&self, item: &InboxItem) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO inbox_items (id, content, source, status, captured_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                item.id,
                item.content,
                item.source,
                item.status,
                item.captured_at,
                item.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM inbox_items WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}
