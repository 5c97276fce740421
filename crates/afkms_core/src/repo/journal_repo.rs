//! Journal persistence.

use super::{fetch_optional, now_ms, RepoResult};
use crate::model::journal::Journal;
use rusqlite::{params, Connection, Row};

const JOURNAL_SELECT_SQL: &str = "SELECT
    id,
    journal_date,
    raw_content,
    digest,
    triage_status,
    source,
    created_at,
    updated_at
FROM journals";

pub struct JournalRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> JournalRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, id: &str) -> RepoResult<Option<Journal>> {
        fetch_optional(
            self.conn,
            &format!("{JOURNAL_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_journal,
        )
    }

    pub fn find_by_date(&self, journal_date: &str) -> RepoResult<Option<Journal>> {
        fetch_optional(
            self.conn,
            &format!("{JOURNAL_SELECT_SQL} WHERE journal_date = ?1;"),
            [journal_date],
            parse_journal,
        )
    }

    pub fn insert(&self, journal: &Journal) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO journals (
                id, journal_date, raw_content, digest, triage_status, source, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                journal.id,
                journal.journal_date,
                journal.raw_content,
                journal.digest,
                journal.triage_status,
                journal.source,
                journal.created_at,
                journal.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn set_content(&self, id: &str, raw_content: &str, source: &str) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE journals SET raw_content = ?1, source = ?2, updated_at = ?3 WHERE id = ?4;",
            params![raw_content, source, now_ms(), id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM journals WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }
}

fn parse_journal(row: &Row<'_>) -> RepoResult<Journal> {
    Ok(Journal {
        id: row.get("id")?,
        journal_date: row.get("journal_date")?,
        raw_content: row.get("raw_content")?,
        digest: row.get("digest")?,
        triage_status: row.get("triage_status")?,
        source: row.get("source")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
