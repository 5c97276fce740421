//! Change set, change action and commit persistence.
//!
//! # Invariants
//! - `apply_result_json` is written at most once per action (a trigger
//!   rejects overwrites).
//! - Commits reference their change set with `ON DELETE RESTRICT`, so only
//!   uncommitted sets can be deleted.
//! - `commits.client_request_id` and `commits.change_set_id` are UNIQUE; a
//!   violation on either is how concurrent commit/undo races surface.

use super::{enum_column, fetch_all, fetch_optional, json_column, page_window, RepoError, RepoResult};
use crate::model::change::{
    ActorKind, ActorRef, ChangeAction, ChangeSet, ChangeStatus, Commit, UNDO_TOOL,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;

const CHANGE_SET_SELECT_SQL: &str = "SELECT
    id,
    actor_type,
    actor_id,
    tool,
    status,
    summary_json,
    diff_json,
    created_at,
    committed_at
FROM change_sets";

const ACTION_SELECT_SQL: &str = "SELECT
    id,
    change_set_id,
    action_index,
    action_type,
    payload_json,
    apply_result_json
FROM change_actions";

const COMMIT_SELECT_SQL: &str = "SELECT
    c.id AS id,
    c.change_set_id AS change_set_id,
    c.committed_by_type AS committed_by_type,
    c.committed_by_id AS committed_by_id,
    c.committed_at AS committed_at,
    c.client_request_id AS client_request_id
FROM commits c";

/// Paging and filter options for listing change sets.
#[derive(Debug, Clone)]
pub struct ChangeListQuery {
    pub status: Option<ChangeStatus>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for ChangeListQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            page_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSetListItem {
    #[serde(flatten)]
    pub change_set: ChangeSet,
    pub actions_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOrder {
    /// Proposal order, used by commit.
    Ascending,
    /// Reverse proposal order, used by undo.
    Descending,
}

/// Repository interface for the change log.
pub trait ChangeRepository {
    fn insert_change_set(&self, change_set: &ChangeSet) -> RepoResult<()>;
    fn get_change_set(&self, id: &str) -> RepoResult<Option<ChangeSet>>;
    fn mark_committed(&self, id: &str, committed_at: i64) -> RepoResult<bool>;
    fn mark_reverted(&self, id: &str) -> RepoResult<bool>;
    /// Deletes a `proposed` set together with its actions.
    fn delete_proposed_change_set(&self, id: &str) -> RepoResult<bool>;
    fn list_change_sets(&self, query: &ChangeListQuery)
        -> RepoResult<(Vec<ChangeSetListItem>, u64)>;

    fn insert_action(&self, action: &ChangeAction) -> RepoResult<()>;
    fn list_actions(&self, change_set_id: &str, order: ActionOrder)
        -> RepoResult<Vec<ChangeAction>>;
    fn set_apply_result(&self, action_id: &str, apply_result: &serde_json::Value)
        -> RepoResult<()>;

    fn insert_commit(&self, commit: &Commit) -> RepoResult<()>;
    fn find_commit_by_request_id(&self, client_request_id: &str) -> RepoResult<Option<Commit>>;
    fn find_commit_for_change_set(&self, change_set_id: &str) -> RepoResult<Option<Commit>>;
    /// Commit of an undo change set carrying `client_request_id`.
    fn find_undo_commit_by_request_id(
        &self,
        client_request_id: &str,
    ) -> RepoResult<Option<(Commit, ChangeSet)>>;
    /// Most recent committed, non-undo change set and its commit.
    fn latest_undo_target(&self) -> RepoResult<Option<(Commit, ChangeSet)>>;
}

/// SQLite-backed change log repository.
pub struct SqliteChangeRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteChangeRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn change_set_for(&self, commit: Commit) -> RepoResult<(Commit, ChangeSet)> {
        let change_set = self.get_change_set(&commit.change_set_id)?.ok_or_else(|| {
            RepoError::InvalidData(format!(
                "commit {} references missing change set {}",
                commit.id, commit.change_set_id
            ))
        })?;
        Ok((commit, change_set))
    }
}

impl ChangeRepository for SqliteChangeRepository<'_> {
    fn insert_change_set(&self, change_set: &ChangeSet) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO change_sets (
                id, actor_type, actor_id, tool, status, summary_json, diff_json,
                created_at, committed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                change_set.id,
                change_set.actor.kind.as_str(),
                change_set.actor.id,
                change_set.tool,
                change_set.status.as_str(),
                serde_json::to_string(&change_set.summary)?,
                serde_json::to_string(&change_set.diff)?,
                change_set.created_at,
                change_set.committed_at,
            ],
        )?;
        Ok(())
    }

    fn get_change_set(&self, id: &str) -> RepoResult<Option<ChangeSet>> {
        fetch_optional(
            self.conn,
            &format!("{CHANGE_SET_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_change_set,
        )
    }

    fn mark_committed(&self, id: &str, committed_at: i64) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE change_sets
             SET status = 'committed', committed_at = ?1
             WHERE id = ?2 AND status = 'proposed';",
            params![committed_at, id],
        )?;
        Ok(changed > 0)
    }

    fn mark_reverted(&self, id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE change_sets SET status = 'reverted' WHERE id = ?1 AND status = 'committed';",
            [id],
        )?;
        Ok(changed > 0)
    }

    fn delete_proposed_change_set(&self, id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM change_sets WHERE id = ?1 AND status = 'proposed';",
            [id],
        )?;
        Ok(changed > 0)
    }

    fn list_change_sets(
        &self,
        query: &ChangeListQuery,
    ) -> RepoResult<(Vec<ChangeSetListItem>, u64)> {
        let mut filter = String::from(" WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();
        if let Some(status) = query.status {
            filter.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM change_sets{filter};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let (limit, offset) = page_window(query.page, query.page_size);
        bind_values.push(Value::Integer(limit));
        bind_values.push(Value::Integer(offset));
        let sql = format!(
            "SELECT
                cs.id, cs.actor_type, cs.actor_id, cs.tool, cs.status, cs.summary_json,
                cs.diff_json, cs.created_at, cs.committed_at,
                (SELECT COUNT(*) FROM change_actions ca WHERE ca.change_set_id = cs.id)
                    AS actions_count
             FROM change_sets cs{filter}
             ORDER BY cs.created_at DESC, cs.id DESC
             LIMIT ? OFFSET ?;"
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let actions_count: i64 = row.get("actions_count")?;
            items.push(ChangeSetListItem {
                change_set: parse_change_set(row)?,
                actions_count: u32::try_from(actions_count).unwrap_or(u32::MAX),
            });
        }

        Ok((items, u64::try_from(total).unwrap_or_default()))
    }

    fn insert_action(&self, action: &ChangeAction) -> RepoResult<()> {
        let apply_result = action
            .apply_result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            "INSERT INTO change_actions (
                id, change_set_id, action_index, action_type, payload_json, apply_result_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                action.id,
                action.change_set_id,
                action.action_index,
                action.action_type,
                serde_json::to_string(&action.payload)?,
                apply_result,
            ],
        )?;
        Ok(())
    }

    fn list_actions(
        &self,
        change_set_id: &str,
        order: ActionOrder,
    ) -> RepoResult<Vec<ChangeAction>> {
        let sql = match order {
            ActionOrder::Ascending => format!(
                "{ACTION_SELECT_SQL} WHERE change_set_id = ?1 ORDER BY action_index ASC;"
            ),
            ActionOrder::Descending => format!(
                "{ACTION_SELECT_SQL} WHERE change_set_id = ?1 ORDER BY action_index DESC;"
            ),
        };
        fetch_all(self.conn, &sql, [change_set_id], parse_action)
    }

    fn set_apply_result(
        &self,
        action_id: &str,
        apply_result: &serde_json::Value,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE change_actions SET apply_result_json = ?1 WHERE id = ?2;",
            params![serde_json::to_string(apply_result)?, action_id],
        )?;
        if changed == 0 {
            return Err(RepoError::InvalidData(format!(
                "change action {action_id} does not exist"
            )));
        }
        Ok(())
    }

    fn insert_commit(&self, commit: &Commit) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO commits (
                id, change_set_id, committed_by_type, committed_by_id, committed_at,
                client_request_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                commit.id,
                commit.change_set_id,
                commit.committed_by.kind.as_str(),
                commit.committed_by.id,
                commit.committed_at,
                commit.client_request_id,
            ],
        )?;
        Ok(())
    }

    fn find_commit_by_request_id(&self, client_request_id: &str) -> RepoResult<Option<Commit>> {
        fetch_optional(
            self.conn,
            &format!("{COMMIT_SELECT_SQL} WHERE c.client_request_id = ?1;"),
            [client_request_id],
            parse_commit,
        )
    }

    fn find_commit_for_change_set(&self, change_set_id: &str) -> RepoResult<Option<Commit>> {
        fetch_optional(
            self.conn,
            &format!("{COMMIT_SELECT_SQL} WHERE c.change_set_id = ?1;"),
            [change_set_id],
            parse_commit,
        )
    }

    fn find_undo_commit_by_request_id(
        &self,
        client_request_id: &str,
    ) -> RepoResult<Option<(Commit, ChangeSet)>> {
        let commit = fetch_optional(
            self.conn,
            &format!(
                "{COMMIT_SELECT_SQL}
                 JOIN change_sets cs ON cs.id = c.change_set_id
                 WHERE c.client_request_id = ?1 AND cs.tool = ?2;"
            ),
            params![client_request_id, UNDO_TOOL],
            parse_commit,
        )?;
        commit.map(|commit| self.change_set_for(commit)).transpose()
    }

    fn latest_undo_target(&self) -> RepoResult<Option<(Commit, ChangeSet)>> {
        let commit = fetch_optional(
            self.conn,
            &format!(
                "{COMMIT_SELECT_SQL}
                 JOIN change_sets cs ON cs.id = c.change_set_id
                 WHERE cs.tool != ?1 AND cs.status = 'committed'
                 ORDER BY cs.committed_at DESC, c.id DESC
                 LIMIT 1;"
            ),
            [UNDO_TOOL],
            parse_commit,
        )?;
        commit.map(|commit| self.change_set_for(commit)).transpose()
    }
}

fn parse_change_set(row: &Row<'_>) -> RepoResult<ChangeSet> {
    Ok(ChangeSet {
        id: row.get("id")?,
        actor: ActorRef {
            kind: enum_column(row, "actor_type", ActorKind::parse)?,
            id: row.get("actor_id")?,
        },
        tool: row.get("tool")?,
        status: enum_column(row, "status", ChangeStatus::parse)?,
        summary: json_column(row, "summary_json")?,
        diff: json_column(row, "diff_json")?,
        created_at: row.get("created_at")?,
        committed_at: row.get("committed_at")?,
    })
}

fn parse_action(row: &Row<'_>) -> RepoResult<ChangeAction> {
    let id: String = row.get("id")?;
    let apply_result = match row.get::<_, Option<String>>("apply_result_json")? {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|err| {
            RepoError::InvalidApplyResult {
                action_id: id.clone(),
                reason: err.to_string(),
            }
        })?),
        None => None,
    };
    Ok(ChangeAction {
        id,
        change_set_id: row.get("change_set_id")?,
        action_index: row.get("action_index")?,
        action_type: row.get("action_type")?,
        payload: json_column(row, "payload_json")?,
        apply_result,
    })
}

fn parse_commit(row: &Row<'_>) -> RepoResult<Commit> {
    Ok(Commit {
        id: row.get("id")?,
        change_set_id: row.get("change_set_id")?,
        committed_by: ActorRef {
            kind: enum_column(row, "committed_by_type", ActorKind::parse)?,
            id: row.get("committed_by_id")?,
        },
        committed_at: row.get("committed_at")?,
        client_request_id: row.get("client_request_id")?,
    })
}
