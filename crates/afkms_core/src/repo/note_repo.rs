//! Note (and knowledge item), note source and link persistence.

use super::{enum_column, fetch_all, fetch_optional, json_column, now_ms, RepoResult};
use crate::model::note::{
    KnowledgeCategory, Link, LinkEndpoint, Note, NoteSource, NoteStatus, SourceType,
};
use rusqlite::{params, Connection, Row};

const NOTE_SELECT_SQL: &str = "SELECT
    id,
    title,
    body,
    category,
    tags_json,
    topic_id,
    status,
    created_at,
    updated_at
FROM notes";

const LINK_SELECT_SQL: &str = "SELECT
    id,
    from_type,
    from_id,
    to_type,
    to_id,
    relation,
    created_at
FROM links";

pub struct NoteRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> NoteRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> RepoResult<Option<Note>> {
        fetch_optional(
            self.conn,
            &format!("{NOTE_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_note,
        )
    }

    pub fn insert(&self, note: &Note) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO notes (
                id, title, body, category, tags_json, topic_id, status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                note.id,
                note.title,
                note.body,
                note.category.as_str(),
                serde_json::to_string(&note.tags)?,
                note.topic_id,
                note.status.as_str(),
                note.created_at,
                note.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update(&self, note: &Note) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE notes
             SET
                title = ?1,
                body = ?2,
                category = ?3,
                tags_json = ?4,
                topic_id = ?5,
                status = ?6,
                updated_at = ?7
             WHERE id = ?8;",
            params![
                note.title,
                note.body,
                note.category.as_str(),
                serde_json::to_string(&note.tags)?,
                note.topic_id,
                note.status.as_str(),
                now_ms(),
                note.id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Deletes the note row; sources cascade, links do not.
    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute("DELETE FROM notes WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    pub fn insert_source(&self, source: &NoteSource) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO note_sources (id, note_id, source_type, source_value)
             VALUES (?1, ?2, ?3, ?4);",
            params![
                source.id,
                source.note_id,
                source.source_type.as_str(),
                source.source_value,
            ],
        )?;
        Ok(())
    }

    pub fn source_exists(&self, id: &str) -> RepoResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM note_sources WHERE id = ?1;",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn delete_source(&self, id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM note_sources WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    pub fn list_sources(&self, note_id: &str) -> RepoResult<Vec<NoteSource>> {
        fetch_all(
            self.conn,
            "SELECT id, note_id, source_type, source_value
             FROM note_sources
             WHERE note_id = ?1
             ORDER BY id ASC;",
            [note_id],
            |row| {
                Ok(NoteSource {
                    id: row.get("id")?,
                    note_id: row.get("note_id")?,
                    source_type: enum_column(row, "source_type", SourceType::parse)?,
                    source_value: row.get("source_value")?,
                })
            },
        )
    }
}

pub struct LinkRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> LinkRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> RepoResult<Option<Link>> {
        fetch_optional(
            self.conn,
            &format!("{LINK_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_link,
        )
    }

    pub fn insert(&self, link: &Link) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO links (id, from_type, from_id, to_type, to_id, relation, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                link.id,
                link.from_type.as_str(),
                link.from_id,
                link.to_type.as_str(),
                link.to_id,
                link.relation,
                link.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute("DELETE FROM links WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    /// Links where the entity is either endpoint.
    pub fn touching(&self, kind: LinkEndpoint, entity_id: &str) -> RepoResult<Vec<Link>> {
        fetch_all(
            self.conn,
            &format!(
                "{LINK_SELECT_SQL}
                 WHERE (from_type = ?1 AND from_id = ?2) OR (to_type = ?1 AND to_id = ?2)
                 ORDER BY created_at ASC, id ASC;"
            ),
            params![kind.as_str(), entity_id],
            parse_link,
        )
    }

    pub fn delete_touching(&self, kind: LinkEndpoint, entity_id: &str) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "DELETE FROM links
             WHERE (from_type = ?1 AND from_id = ?2) OR (to_type = ?1 AND to_id = ?2);",
            params![kind.as_str(), entity_id],
        )?;
        Ok(changed)
    }
}

fn parse_note(row: &Row<'_>) -> RepoResult<Note> {
    Ok(Note {
        id: row.get("id")?,
        title: row.get("title")?,
        body: row.get("body")?,
        category: enum_column(row, "category", KnowledgeCategory::parse)?,
        tags: json_column(row, "tags_json")?,
        topic_id: row.get("topic_id")?,
        status: enum_column(row, "status", NoteStatus::parse)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_link(row: &Row<'_>) -> RepoResult<Link> {
    Ok(Link {
        id: row.get("id")?,
        from_type: enum_column(row, "from_type", LinkEndpoint::parse)?,
        from_id: row.get("from_id")?,
        to_type: enum_column(row, "to_type", LinkEndpoint::parse)?,
        to_id: row.get("to_id")?,
        relation: row.get("relation")?,
        created_at: row.get("created_at")?,
    })
}
