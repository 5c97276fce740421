//! SQLite persistence for entities, change log and audit trail.
//!
//! # Responsibility
//! - Keep SQL inside the persistence boundary.
//! - Run inside whatever transaction the caller holds: every repository
//!   borrows a `Connection`, and a `rusqlite::Transaction` derefs to one.
//!
//! # Invariants
//! - Read paths reject invalid persisted values with `RepoError::InvalidData`.
//! - Inserts write rows verbatim (ids and timestamps included) so delete
//!   rollbacks can restore exactly what was removed.

pub mod audit_repo;
pub mod change_repo;
pub mod idea_repo;
pub mod inbox_repo;
pub mod journal_repo;
pub mod note_repo;
pub mod route_repo;
pub mod task_repo;

use crate::db::DbError;
use rusqlite::{Connection, ErrorCode, Params, Row};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("apply result of action `{action_id}` is not valid json: {reason}")]
    InvalidApplyResult { action_id: String, reason: String },
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl RepoError {
    /// Returns whether this is a UNIQUE violation on `table.column`.
    pub fn is_unique_violation(&self, column: &str) -> bool {
        match self {
            Self::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(err, Some(message)))) => {
                err.code == ErrorCode::ConstraintViolation
                    && message.contains("UNIQUE")
                    && message.contains(column)
            }
            _ => false,
        }
    }
}

/// Prefixed, time-ordered identifier such as `tsk_0190f3...`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::now_v7().simple())
}

/// Current wall-clock time in unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

pub(crate) fn fetch_optional<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: impl Fn(&Row<'_>) -> RepoResult<T>,
) -> RepoResult<Option<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(parse(row)?)),
        None => Ok(None),
    }
}

pub(crate) fn fetch_all<T, P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: impl Fn(&Row<'_>) -> RepoResult<T>,
) -> RepoResult<Vec<T>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse(row)?);
    }
    Ok(items)
}

/// Reads a text column and maps it through an enum parser.
pub(crate) fn enum_column<T>(
    row: &Row<'_>,
    column: &str,
    parse: fn(&str) -> Option<T>,
) -> RepoResult<T> {
    let raw: String = row.get(column)?;
    parse(&raw).ok_or_else(|| RepoError::InvalidData(format!("invalid value `{raw}` in {column}")))
}

pub(crate) fn optional_enum_column<T>(
    row: &Row<'_>,
    column: &str,
    parse: fn(&str) -> Option<T>,
) -> RepoResult<Option<T>> {
    match row.get::<_, Option<String>>(column)? {
        Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
            RepoError::InvalidData(format!("invalid value `{raw}` in {column}"))
        }),
        None => Ok(None),
    }
}

/// Reads a JSON text column.
pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row<'_>,
    column: &str,
) -> RepoResult<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

/// Clamps 1-based paging input to `(limit, offset)`.
pub fn page_window(page: u32, page_size: u32) -> (i64, i64) {
    let page = i64::from(page.max(1));
    let size = i64::from(page_size.clamp(1, MAX_PAGE_SIZE));
    (size, (page - 1) * size)
}

pub const MAX_PAGE_SIZE: u32 = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_sort_by_creation() {
        let first = new_id("tsk");
        let second = new_id("tsk");
        assert!(first.starts_with("tsk_"));
        assert_eq!(first.len(), "tsk_".len() + 32);
        assert!(first < second);
    }

    #[test]
    fn unique_violation_names_the_offending_column() {
        let conn = crate::db::open_db_in_memory().unwrap();
        conn.execute_batch(
            "INSERT INTO change_sets (id, actor_type, actor_id, tool, status, created_at)
             VALUES ('chg_a', 'agent', 'a1', 'chat', 'committed', 1),
                    ('chg_b', 'agent', 'a1', 'chat', 'proposed', 2);
             INSERT INTO commits (id, change_set_id, committed_by_type, committed_by_id,
                                  committed_at, client_request_id)
             VALUES ('cmt_a', 'chg_a', 'user', 'u1', 1, 'K');",
        )
        .unwrap();
        let insert = |id: &str, change_set_id: &str, request_id: Option<&str>| -> RepoError {
            conn.execute(
                "INSERT INTO commits (id, change_set_id, committed_by_type, committed_by_id,
                                      committed_at, client_request_id)
                 VALUES (?1, ?2, 'user', 'u1', 2, ?3);",
                rusqlite::params![id, change_set_id, request_id],
            )
            .unwrap_err()
            .into()
        };

        let same_request = insert("cmt_b", "chg_b", Some("K"));
        assert!(same_request.is_unique_violation("commits.client_request_id"));
        assert!(!same_request.is_unique_violation("commits.change_set_id"));

        let same_change_set = insert("cmt_c", "chg_a", None);
        assert!(same_change_set.is_unique_violation("commits.change_set_id"));
        assert!(!same_change_set.is_unique_violation("commits.client_request_id"));
    }

    #[test]
    fn other_errors_are_not_unique_violations() {
        let err = RepoError::InvalidData("bad".into());
        assert!(!err.is_unique_violation("commits.client_request_id"));
        let conn = crate::db::open_db_in_memory().unwrap();
        let fk: RepoError = conn
            .execute(
                "INSERT INTO commits (id, change_set_id, committed_by_type, committed_by_id,
                                      committed_at)
                 VALUES ('cmt_x', 'chg_missing', 'user', 'u1', 1);",
                [],
            )
            .unwrap_err()
            .into();
        assert!(!fk.is_unique_violation("commits.change_set_id"));
    }

    #[test]
    fn page_window_clamps_input() {
        assert_eq!(page_window(0, 0), (1, 0));
        assert_eq!(page_window(3, 20), (20, 40));
        assert_eq!(page_window(1, 10_000), (i64::from(MAX_PAGE_SIZE), 0));
    }
}
