//! Change/commit/undo engine.
//!
//! # Responsibility
//! - Validate and persist proposed action batches (dry-run).
//! - Apply a proposed change set atomically, with request-level idempotency.
//! - Undo the most recent committed, non-undo change set from stored apply results.
//! - Expose read-only views over change sets, actions and audit events.
//!
//! # Invariants
//! - Dry-run, commit, undo and reject each run in exactly one transaction;
//!   any error drops it, so nothing is ever half-applied.
//! - Undo replays rollback in strictly descending `action_index` order and
//!   reads nothing but the stored apply results.
//! - Concurrent duplicates are resolved through the UNIQUE constraints on
//!   `commits.client_request_id` and `commits.change_set_id`.

use crate::action::{self, Action, ActionError, ActionType, ApplyResult};
use crate::model::audit::{AuditEvent, NewAuditEvent};
use crate::model::change::{
    ActorRef, ChangeAction, ChangeSet, ChangeStatus, Commit, DiffItem, Summary, UNDO_TOOL,
};
use crate::model::{is_blank, ValidationError};
use crate::repo::audit_repo::{AuditListQuery, AuditRepository, SqliteAuditRepository};
use crate::repo::change_repo::{
    ActionOrder, ChangeListQuery, ChangeRepository, ChangeSetListItem, SqliteChangeRepository,
};
use crate::repo::{new_id, now_ms, RepoError};
use crate::service::diff::{build_diff_items, build_summary, ProposedAction};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Instant;

const APPLY_AUDIT_ACTION: &str = "changes_apply_action";
const UNDO_AUDIT_ACTION: &str = "changes_undo_action";
const CLIENT_REQUEST_ID_COLUMN: &str = "commits.client_request_id";
const COMMIT_CHANGE_SET_COLUMN: &str = "commits.change_set_id";

/// Engine failure. Every variant leaves the store untouched.
#[derive(Debug, thiserror::Error)]
pub enum ChangeError {
    #[error("action {action_index} ({action_type}) rejected: {source}")]
    InvalidAction {
        action_index: u32,
        action_type: String,
        #[source]
        source: ValidationError,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("change set `{0}` not found")]
    ChangeSetNotFound(String),
    #[error("change set `{id}` is `{status}`, not `proposed`")]
    NotProposed { id: String, status: ChangeStatus },
    #[error("change set `{0}` has no actions")]
    EmptyChangeSet(String),
    #[error("apply result of action `{action_id}` is unusable: {reason}")]
    CorruptApplyResult { action_id: String, reason: String },
    #[error("action `{action_id}` has unsupported type `{action_type}`")]
    UnsupportedActionType {
        action_id: String,
        action_type: String,
    },
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for ChangeError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::InvalidApplyResult { action_id, reason } => {
                Self::CorruptApplyResult { action_id, reason }
            }
            other => Self::Repo(other),
        }
    }
}

impl From<rusqlite::Error> for ChangeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(RepoError::from(value))
    }
}

impl ChangeError {
    /// Transport-neutral error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAction { source, .. } => source.code,
            Self::Validation(err) => err.code,
            Self::ChangeSetNotFound(_) => "CHANGE_SET_NOT_FOUND",
            Self::NotProposed { .. } => "CHANGE_SET_NOT_PROPOSED",
            Self::EmptyChangeSet(_) => "CHANGESET_ACTIONS_EMPTY",
            Self::CorruptApplyResult { .. } => "APPLY_RESULT_CORRUPT",
            Self::UnsupportedActionType { .. } => "CHANGE_ACTION_TYPE_UNSUPPORTED",
            Self::Repo(_) => "STORAGE_ERROR",
        }
    }

    /// Fatal errors point at a bug or corrupted data and are never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::EmptyChangeSet(_)
                | Self::CorruptApplyResult { .. }
                | Self::UnsupportedActionType { .. }
        )
    }

    fn is_unique_violation(&self, column: &str) -> bool {
        matches!(self, Self::Repo(err) if err.is_unique_violation(column))
    }
}

pub type ChangeResult<T> = Result<T, ChangeError>;

/// One raw action as submitted for proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInput {
    #[serde(rename = "type", alias = "action_type")]
    pub action_type: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl ActionInput {
    pub fn new(action_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunRequest {
    pub actions: Vec<ActionInput>,
    pub actor: ActorRef,
    pub tool: String,
}

/// Persisted proposal plus its rendered preview.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub change_set: ChangeSet,
    /// One text line per diff item.
    pub diff: Vec<String>,
}

impl Proposal {
    pub fn summary(&self) -> &Summary {
        &self.change_set.summary
    }

    pub fn diff_items(&self) -> &[DiffItem] {
        &self.change_set.diff
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub approved_by: ActorRef,
    #[serde(default)]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitOutcome {
    pub commit: Commit,
    pub change_set: ChangeSet,
    /// `true` when an earlier commit was returned instead of applying again.
    pub replayed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoRequest {
    pub requested_by: ActorRef,
    pub reason: String,
    #[serde(default)]
    pub client_request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UndoOutcome {
    Reverted {
        undone_commit_id: String,
        revert_commit_id: String,
        undone_change_set_id: String,
        replayed: bool,
    },
    NothingToUndo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSetDetail {
    pub change_set: ChangeSet,
    pub commit: Option<Commit>,
    pub actions: Vec<ChangeAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeListResult {
    pub items: Vec<ChangeSetListItem>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditListResult {
    pub items: Vec<AuditEvent>,
    pub total: u64,
}

/// Engine facade over one SQLite connection.
pub struct ChangeService<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> ChangeService<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }

    /// Validates every action against current state and persists a `proposed` change set.
    ///
    /// The first invalid action fails the whole proposal and nothing is stored.
    pub fn dry_run(&mut self, request: DryRunRequest) -> ChangeResult<Proposal> {
        let started_at = Instant::now();
        info!(
            "event=change_dry_run module=change status=start actions={} tool={}",
            request.actions.len(),
            request.tool
        );
        let result = self.dry_run_in_tx(&request);
        match &result {
            Ok(proposal) => info!(
                "event=change_dry_run module=change status=ok change_set_id={} actions={} duration_ms={}",
                proposal.change_set.id,
                request.actions.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=change_dry_run module=change status=error error_code={} duration_ms={}",
                err.code(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn dry_run_in_tx(&mut self, request: &DryRunRequest) -> ChangeResult<Proposal> {
        if is_blank(&request.actor.id) {
            return Err(ValidationError::code("ACTOR_ID_REQUIRED").into());
        }
        if is_blank(&request.tool) {
            return Err(ValidationError::code("TOOL_REQUIRED").into());
        }
        if request.tool.trim() == UNDO_TOOL {
            return Err(ValidationError::new(
                "TOOL_RESERVED",
                format!("tool `{UNDO_TOOL}` is reserved for undo change sets"),
            )
            .into());
        }

        let tx = self.conn.transaction()?;
        let mut typed = Vec::with_capacity(request.actions.len());
        for (position, input) in request.actions.iter().enumerate() {
            let action_index = index_of(position);
            let action = parse_input(action_index, input)?;
            action::validate(&tx, &action)
                .map_err(|err| invalid_action(action_index, &input.action_type, err))?;
            typed.push((action.action_type(), &input.payload));
        }

        let proposed: Vec<ProposedAction<'_>> = typed.iter().map(|(t, p)| (*t, *p)).collect();
        let diff_items = build_diff_items(&proposed);
        let change_set = ChangeSet {
            id: new_id("chg"),
            actor: request.actor.clone(),
            tool: request.tool.trim().to_string(),
            status: ChangeStatus::Proposed,
            summary: build_summary(&proposed),
            diff: diff_items,
            created_at: now_ms(),
            committed_at: None,
        };

        let repo = SqliteChangeRepository::new(&tx);
        repo.insert_change_set(&change_set)?;
        for (position, input) in request.actions.iter().enumerate() {
            repo.insert_action(&ChangeAction {
                id: new_id("cha"),
                change_set_id: change_set.id.clone(),
                action_index: index_of(position),
                action_type: input.action_type.clone(),
                payload: input.payload.clone(),
                apply_result: None,
            })?;
        }
        tx.commit()?;

        let diff = change_set.diff.iter().map(|item| item.text.clone()).collect();
        Ok(Proposal { change_set, diff })
    }

    /// Applies every action of a proposed change set in one transaction.
    ///
    /// With `client_request_id`, a repeated call returns the first commit
    /// unchanged (`replayed = true`) without applying anything again.
    pub fn commit(
        &mut self,
        change_set_id: &str,
        request: CommitRequest,
    ) -> ChangeResult<CommitOutcome> {
        let started_at = Instant::now();
        info!("event=change_commit module=change status=start change_set_id={change_set_id}");
        let result = self.commit_inner(change_set_id, &request);
        match &result {
            Ok(outcome) => info!(
                "event=change_commit module=change status=ok change_set_id={} commit_id={} replayed={} duration_ms={}",
                change_set_id,
                outcome.commit.id,
                outcome.replayed,
                started_at.elapsed().as_millis()
            ),
            Err(err) if err.is_structural() => error!(
                "event=change_commit module=change status=error change_set_id={} error_code={} error={}",
                change_set_id,
                err.code(),
                err
            ),
            Err(err) => warn!(
                "event=change_commit module=change status=error change_set_id={} error_code={} duration_ms={}",
                change_set_id,
                err.code(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn commit_inner(
        &mut self,
        change_set_id: &str,
        request: &CommitRequest,
    ) -> ChangeResult<CommitOutcome> {
        let repo = SqliteChangeRepository::new(self.conn);
        if repo.get_change_set(change_set_id)?.is_none() {
            return Err(ChangeError::ChangeSetNotFound(change_set_id.to_string()));
        }
        let request_id = request
            .client_request_id
            .as_deref()
            .filter(|id| !is_blank(id));
        if let Some(request_id) = request_id {
            if let Some(outcome) = replay_commit(self.conn, request_id)? {
                return Ok(outcome);
            }
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        match apply_change_set(&tx, change_set_id, &request.approved_by, request_id) {
            Ok(outcome) => {
                tx.commit()?;
                Ok(outcome)
            }
            Err(err) => {
                drop(tx);
                recover_commit(self.conn, change_set_id, request_id, err)
            }
        }
    }

    /// Reverts the most recent committed, non-undo change set.
    ///
    /// An empty history is [`UndoOutcome::NothingToUndo`], not an error.
    pub fn undo_last(&mut self, request: UndoRequest) -> ChangeResult<UndoOutcome> {
        let started_at = Instant::now();
        info!("event=change_undo module=change status=start");
        let result = self.undo_inner(&request);
        match &result {
            Ok(UndoOutcome::Reverted {
                undone_commit_id,
                revert_commit_id,
                replayed,
                ..
            }) => info!(
                "event=change_undo module=change status=ok undone_commit_id={} revert_commit_id={} replayed={} duration_ms={}",
                undone_commit_id,
                revert_commit_id,
                replayed,
                started_at.elapsed().as_millis()
            ),
            Ok(UndoOutcome::NothingToUndo) => info!(
                "event=change_undo module=change status=ok outcome=nothing_to_undo duration_ms={}",
                started_at.elapsed().as_millis()
            ),
            Err(err) if err.is_structural() => error!(
                "event=change_undo module=change status=error error_code={} error={}",
                err.code(),
                err
            ),
            Err(err) => warn!(
                "event=change_undo module=change status=error error_code={} duration_ms={}",
                err.code(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn undo_inner(&mut self, request: &UndoRequest) -> ChangeResult<UndoOutcome> {
        if is_blank(&request.reason) {
            return Err(ValidationError::code("REASON_REQUIRED").into());
        }
        let request_id = request
            .client_request_id
            .as_deref()
            .filter(|id| !is_blank(id));
        if let Some(request_id) = request_id {
            if let Some(outcome) = replay_undo(self.conn, request_id)? {
                return Ok(outcome);
            }
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        match revert_latest(&tx, request, request_id) {
            Ok(outcome) => {
                tx.commit()?;
                Ok(outcome)
            }
            Err(err) => {
                drop(tx);
                recover_undo(self.conn, request_id, err)
            }
        }
    }

    /// Deletes a proposed change set and its actions. Returns the deleted id.
    pub fn reject(&mut self, change_set_id: &str) -> ChangeResult<String> {
        let tx = self.conn.transaction()?;
        let repo = SqliteChangeRepository::new(&tx);
        let change_set = load_change_set(&repo, change_set_id)?;
        if change_set.status != ChangeStatus::Proposed {
            return Err(ChangeError::NotProposed {
                id: change_set.id,
                status: change_set.status,
            });
        }
        repo.delete_proposed_change_set(change_set_id)?;
        tx.commit()?;
        info!("event=change_reject module=change status=ok change_set_id={change_set_id}");
        Ok(change_set_id.to_string())
    }

    pub fn get_change(&self, change_set_id: &str) -> ChangeResult<Option<ChangeSetDetail>> {
        let repo = SqliteChangeRepository::new(&*self.conn);
        let Some(change_set) = repo.get_change_set(change_set_id)? else {
            return Ok(None);
        };
        let commit = repo.find_commit_for_change_set(change_set_id)?;
        let actions = repo.list_actions(change_set_id, ActionOrder::Ascending)?;
        Ok(Some(ChangeSetDetail {
            change_set,
            commit,
            actions,
        }))
    }

    /// Newest first (`created_at DESC, id DESC`).
    pub fn list_changes(&self, query: &ChangeListQuery) -> ChangeResult<ChangeListResult> {
        let (items, total) = SqliteChangeRepository::new(&*self.conn).list_change_sets(query)?;
        Ok(ChangeListResult { items, total })
    }

    pub fn list_audit_events(&self, query: &AuditListQuery) -> ChangeResult<AuditListResult> {
        let (items, total) = SqliteAuditRepository::new(&*self.conn).list(query)?;
        Ok(AuditListResult { items, total })
    }
}

fn index_of(position: usize) -> u32 {
    u32::try_from(position + 1).unwrap_or(u32::MAX)
}

fn parse_input(action_index: u32, input: &ActionInput) -> ChangeResult<Action> {
    let action_type = ActionType::parse(&input.action_type).ok_or_else(|| {
        ChangeError::InvalidAction {
            action_index,
            action_type: input.action_type.clone(),
            source: ValidationError::new(
                "CHANGE_ACTION_TYPE_UNSUPPORTED",
                format!("unknown action type `{}`", input.action_type),
            ),
        }
    })?;
    Action::parse(action_type, &input.payload).map_err(|source| ChangeError::InvalidAction {
        action_index,
        action_type: input.action_type.clone(),
        source,
    })
}

fn invalid_action(action_index: u32, action_type: &str, err: ActionError) -> ChangeError {
    match err {
        ActionError::Validation(source) => ChangeError::InvalidAction {
            action_index,
            action_type: action_type.to_string(),
            source,
        },
        ActionError::Repo(err) => err.into(),
        ActionError::Corrupt(reason) => ChangeError::CorruptApplyResult {
            action_id: format!("#{action_index}"),
            reason,
        },
        ActionError::Unsupported(tag) => ChangeError::UnsupportedActionType {
            action_id: format!("#{action_index}"),
            action_type: tag,
        },
    }
}

/// Maps a failure of a stored action, naming it by row id for structural errors.
fn stored_action_failure(stored: &ChangeAction, err: ActionError) -> ChangeError {
    match err {
        ActionError::Corrupt(reason) => ChangeError::CorruptApplyResult {
            action_id: stored.id.clone(),
            reason,
        },
        ActionError::Unsupported(action_type) => ChangeError::UnsupportedActionType {
            action_id: stored.id.clone(),
            action_type,
        },
        other => invalid_action(stored.action_index, &stored.action_type, other),
    }
}

fn parse_stored(stored: &ChangeAction) -> ChangeResult<Action> {
    let action_type =
        ActionType::parse(&stored.action_type).ok_or_else(|| ChangeError::UnsupportedActionType {
            action_id: stored.id.clone(),
            action_type: stored.action_type.clone(),
        })?;
    Action::parse(action_type, &stored.payload).map_err(|source| ChangeError::InvalidAction {
        action_index: stored.action_index,
        action_type: stored.action_type.clone(),
        source,
    })
}

fn stored_apply_result(stored: &ChangeAction) -> ChangeResult<ApplyResult> {
    let value = stored
        .apply_result
        .as_ref()
        .ok_or_else(|| ChangeError::CorruptApplyResult {
            action_id: stored.id.clone(),
            reason: "apply result is missing".to_string(),
        })?;
    let result =
        ApplyResult::from_value(value).map_err(|err| stored_action_failure(stored, err))?;
    if result.action_type().as_str() != stored.action_type {
        return Err(ChangeError::CorruptApplyResult {
            action_id: stored.id.clone(),
            reason: format!(
                "recorded as `{}` but stored action is `{}`",
                result.action_type(),
                stored.action_type
            ),
        });
    }
    Ok(result)
}

fn load_change_set<R: ChangeRepository>(repo: &R, change_set_id: &str) -> ChangeResult<ChangeSet> {
    repo.get_change_set(change_set_id)?
        .ok_or_else(|| ChangeError::ChangeSetNotFound(change_set_id.to_string()))
}

fn replay_commit(conn: &Connection, request_id: &str) -> ChangeResult<Option<CommitOutcome>> {
    let repo = SqliteChangeRepository::new(conn);
    let Some(commit) = repo.find_commit_by_request_id(request_id)? else {
        return Ok(None);
    };
    let change_set = load_change_set(&repo, &commit.change_set_id)?;
    Ok(Some(CommitOutcome {
        commit,
        change_set,
        replayed: true,
    }))
}

/// Turns a lost commit race into a replay of the winner's commit.
///
/// Any error other than a UNIQUE violation on `commits` is returned as is.
fn recover_commit(
    conn: &Connection,
    change_set_id: &str,
    request_id: Option<&str>,
    err: ChangeError,
) -> ChangeResult<CommitOutcome> {
    if let Some(request_id) = request_id {
        if err.is_unique_violation(CLIENT_REQUEST_ID_COLUMN) {
            if let Some(outcome) = replay_commit(conn, request_id)? {
                return Ok(outcome);
            }
        }
    }
    if err.is_unique_violation(COMMIT_CHANGE_SET_COLUMN) {
        let repo = SqliteChangeRepository::new(conn);
        if let Some(commit) = repo.find_commit_for_change_set(change_set_id)? {
            let change_set = load_change_set(&repo, &commit.change_set_id)?;
            return Ok(CommitOutcome {
                commit,
                change_set,
                replayed: true,
            });
        }
    }
    Err(err)
}

fn apply_change_set(
    conn: &Connection,
    change_set_id: &str,
    approved_by: &ActorRef,
    request_id: Option<&str>,
) -> ChangeResult<CommitOutcome> {
    let repo = SqliteChangeRepository::new(conn);
    let mut change_set = load_change_set(&repo, change_set_id)?;

    if let Some(commit) = repo.find_commit_for_change_set(change_set_id)? {
        // A commit row without the status flip is repaired; reverted stays reverted.
        if change_set.status == ChangeStatus::Proposed {
            repo.mark_committed(change_set_id, commit.committed_at)?;
            change_set.status = ChangeStatus::Committed;
            change_set.committed_at = Some(commit.committed_at);
        }
        return Ok(CommitOutcome {
            commit,
            change_set,
            replayed: true,
        });
    }
    if change_set.status != ChangeStatus::Proposed {
        return Err(ChangeError::NotProposed {
            id: change_set.id,
            status: change_set.status,
        });
    }

    let actions = repo.list_actions(change_set_id, ActionOrder::Ascending)?;
    if actions.is_empty() {
        return Err(ChangeError::EmptyChangeSet(change_set_id.to_string()));
    }

    let committed_at = now_ms();
    let commit = Commit {
        id: new_id("cmt"),
        change_set_id: change_set_id.to_string(),
        committed_by: approved_by.clone(),
        committed_at,
        client_request_id: request_id.map(str::to_string),
    };

    let audit = SqliteAuditRepository::new(conn);
    for stored in &actions {
        let action = parse_stored(stored)?;
        let result =
            action::apply(conn, &action).map_err(|err| stored_action_failure(stored, err))?;
        let value = result
            .to_value()
            .map_err(|err| stored_action_failure(stored, err))?;
        repo.set_apply_result(&stored.id, &value)?;

        let mut metadata = Map::new();
        metadata.insert("request_id".into(), json!(request_id));
        metadata.insert("change_set_id".into(), json!(change_set.id));
        metadata.insert("commit_id".into(), json!(commit.id));
        metadata.insert("action_id".into(), json!(stored.id));
        metadata.insert("action_index".into(), json!(stored.action_index));
        metadata.insert("action_type".into(), json!(stored.action_type));
        audit.record(NewAuditEvent {
            actor: approved_by.clone(),
            tool: change_set.tool.clone(),
            action: APPLY_AUDIT_ACTION.to_string(),
            target_type: result.entity.clone(),
            target_id: result.entity_id.clone(),
            source_refs: action.source_refs(),
            metadata,
        })?;
    }

    repo.mark_committed(change_set_id, committed_at)?;
    repo.insert_commit(&commit)?;
    change_set.status = ChangeStatus::Committed;
    change_set.committed_at = Some(committed_at);

    Ok(CommitOutcome {
        commit,
        change_set,
        replayed: false,
    })
}

fn replay_undo(conn: &Connection, request_id: &str) -> ChangeResult<Option<UndoOutcome>> {
    let repo = SqliteChangeRepository::new(conn);
    let Some((commit, change_set)) = repo.find_undo_commit_by_request_id(request_id)? else {
        return Ok(None);
    };
    let summary_id = |key: &str| {
        change_set
            .summary
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                RepoError::InvalidData(format!(
                    "undo change set {} lacks `{key}` in its summary",
                    change_set.id
                ))
            })
    };
    Ok(Some(UndoOutcome::Reverted {
        undone_commit_id: summary_id("undone_commit_id")?,
        revert_commit_id: commit.id,
        undone_change_set_id: summary_id("undone_change_set_id")?,
        replayed: true,
    }))
}

fn recover_undo(
    conn: &Connection,
    request_id: Option<&str>,
    err: ChangeError,
) -> ChangeResult<UndoOutcome> {
    if let Some(request_id) = request_id {
        if err.is_unique_violation(CLIENT_REQUEST_ID_COLUMN) {
            if let Some(outcome) = replay_undo(conn, request_id)? {
                return Ok(outcome);
            }
        }
    }
    Err(err)
}

fn revert_latest(
    conn: &Connection,
    request: &UndoRequest,
    request_id: Option<&str>,
) -> ChangeResult<UndoOutcome> {
    let repo = SqliteChangeRepository::new(conn);
    let Some((target_commit, target)) = repo.latest_undo_target()? else {
        return Ok(UndoOutcome::NothingToUndo);
    };

    let actions = repo.list_actions(&target.id, ActionOrder::Descending)?;
    if actions.is_empty() {
        return Err(ChangeError::EmptyChangeSet(target.id));
    }

    let now = now_ms();
    let mut summary = Summary::new();
    summary.insert("undone_change_set_id".into(), json!(target.id));
    summary.insert("undone_commit_id".into(), json!(target_commit.id));
    let revert_set = ChangeSet {
        id: new_id("chg"),
        actor: request.requested_by.clone(),
        tool: UNDO_TOOL.to_string(),
        status: ChangeStatus::Committed,
        summary,
        diff: vec![DiffItem {
            entity: "changeset".into(),
            action: "revert".into(),
            fields: Vec::new(),
            text: format!("undo change_set={}", target.id),
        }],
        created_at: now,
        committed_at: Some(now),
    };
    let revert_commit = Commit {
        id: new_id("cmt"),
        change_set_id: revert_set.id.clone(),
        committed_by: request.requested_by.clone(),
        committed_at: now,
        client_request_id: request_id.map(str::to_string),
    };

    let audit = SqliteAuditRepository::new(conn);
    for stored in &actions {
        let result = stored_apply_result(stored)?;
        action::rollback(conn, &result).map_err(|err| stored_action_failure(stored, err))?;

        let mut metadata = Map::new();
        metadata.insert("request_id".into(), json!(request_id));
        metadata.insert("undone_change_set_id".into(), json!(target.id));
        metadata.insert("undone_commit_id".into(), json!(target_commit.id));
        metadata.insert("revert_commit_id".into(), json!(revert_commit.id));
        metadata.insert("action_id".into(), json!(stored.id));
        metadata.insert("action_index".into(), json!(stored.action_index));
        metadata.insert("action_type".into(), json!(stored.action_type));
        audit.record(NewAuditEvent {
            actor: request.requested_by.clone(),
            tool: UNDO_TOOL.to_string(),
            action: UNDO_AUDIT_ACTION.to_string(),
            target_type: result.entity.clone(),
            target_id: result.entity_id.clone(),
            source_refs: vec![request.reason.trim().to_string()],
            metadata,
        })?;
    }

    if !repo.mark_reverted(&target.id)? {
        return Err(RepoError::InvalidData(format!(
            "change set {} changed status during undo",
            target.id
        ))
        .into());
    }
    repo.insert_change_set(&revert_set)?;
    repo.insert_commit(&revert_commit)?;

    Ok(UndoOutcome::Reverted {
        undone_commit_id: target_commit.id,
        revert_commit_id: revert_commit.id,
        undone_change_set_id: target.id,
        replayed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_db_in_memory;
    use crate::model::change::ActorKind;

    #[test]
    fn structural_errors_are_flagged() {
        assert!(ChangeError::EmptyChangeSet("chg_1".into()).is_structural());
        assert!(ChangeError::CorruptApplyResult {
            action_id: "cha_1".into(),
            reason: "missing before".into(),
        }
        .is_structural());
        assert!(!ChangeError::ChangeSetNotFound("chg_1".into()).is_structural());
        assert!(!ChangeError::Validation(ValidationError::code("REASON_REQUIRED")).is_structural());
    }

    #[test]
    fn invalid_action_reports_inner_code() {
        let err = ChangeError::InvalidAction {
            action_index: 2,
            action_type: "update_task".into(),
            source: ValidationError::code("TASK_NOT_FOUND"),
        };
        assert_eq!(err.code(), "TASK_NOT_FOUND");
        assert!(err.to_string().contains("action 2 (update_task)"));
    }

    #[test]
    fn action_input_accepts_type_or_action_type_key() {
        let a: ActionInput =
            serde_json::from_value(json!({"type": "create_task", "payload": {"title": "x"}}))
                .unwrap();
        let b: ActionInput =
            serde_json::from_value(json!({"action_type": "create_task", "payload": {}})).unwrap();
        assert_eq!(a.action_type, "create_task");
        assert_eq!(b.action_type, "create_task");
    }

    #[test]
    fn undo_outcome_serializes_with_status_tag() {
        let value = serde_json::to_value(UndoOutcome::NothingToUndo).unwrap();
        assert_eq!(value, json!({"status": "nothing_to_undo"}));
        let value = serde_json::to_value(UndoOutcome::Reverted {
            undone_commit_id: "cmt_a".into(),
            revert_commit_id: "cmt_b".into(),
            undone_change_set_id: "chg_a".into(),
            replayed: false,
        })
        .unwrap();
        assert_eq!(value["status"], "reverted");
        assert_eq!(value["revert_commit_id"], "cmt_b");
    }

    fn create_task_set(conn: &mut Connection, title: &str) -> String {
        let mut payload = Map::new();
        payload.insert("title".into(), json!(title));
        ChangeService::new(conn)
            .dry_run(DryRunRequest {
                actions: vec![ActionInput::new("create_task", payload)],
                actor: ActorRef::new(ActorKind::Agent, "planner"),
                tool: "chat".into(),
            })
            .unwrap()
            .change_set
            .id
    }

    fn commit_set(conn: &mut Connection, change_set_id: &str, request_id: Option<&str>) -> Commit {
        ChangeService::new(conn)
            .commit(
                change_set_id,
                CommitRequest {
                    approved_by: ActorRef::new(ActorKind::User, "owner"),
                    client_request_id: request_id.map(str::to_string),
                },
            )
            .unwrap()
            .commit
    }

    /// Inserts a commit row the way a concurrent writer would have.
    fn conflicting_commit(
        conn: &Connection,
        change_set_id: &str,
        request_id: Option<&str>,
    ) -> ChangeError {
        SqliteChangeRepository::new(conn)
            .insert_commit(&Commit {
                id: new_id("cmt"),
                change_set_id: change_set_id.to_string(),
                committed_by: ActorRef::new(ActorKind::User, "other"),
                committed_at: now_ms(),
                client_request_id: request_id.map(str::to_string),
            })
            .unwrap_err()
            .into()
    }

    #[test]
    fn lost_commit_race_on_request_id_replays_the_winner() {
        let mut conn = open_db_in_memory().unwrap();
        let first = create_task_set(&mut conn, "first");
        let winner = commit_set(&mut conn, &first, Some("K"));
        let second = create_task_set(&mut conn, "second");

        let err = conflicting_commit(&conn, &second, Some("K"));
        assert!(err.is_unique_violation(CLIENT_REQUEST_ID_COLUMN));

        let outcome = recover_commit(&conn, &second, Some("K"), err).unwrap();
        assert!(outcome.replayed);
        assert_eq!(outcome.commit.id, winner.id);
        assert_eq!(outcome.change_set.id, first);
    }

    #[test]
    fn lost_commit_race_on_change_set_returns_existing_commit() {
        let mut conn = open_db_in_memory().unwrap();
        let change_set_id = create_task_set(&mut conn, "only");
        let winner = commit_set(&mut conn, &change_set_id, None);

        let err = conflicting_commit(&conn, &change_set_id, None);
        assert!(err.is_unique_violation(COMMIT_CHANGE_SET_COLUMN));

        let outcome = recover_commit(&conn, &change_set_id, None, err).unwrap();
        assert!(outcome.replayed);
        assert_eq!(outcome.commit.id, winner.id);
        assert_eq!(outcome.change_set.status, ChangeStatus::Committed);
    }

    #[test]
    fn commit_recovery_passes_other_errors_through() {
        let conn = open_db_in_memory().unwrap();
        let err = recover_commit(
            &conn,
            "chg_missing",
            Some("K"),
            ChangeError::EmptyChangeSet("chg_missing".into()),
        )
        .unwrap_err();
        assert_eq!(err.code(), "CHANGESET_ACTIONS_EMPTY");
    }

    #[test]
    fn lost_undo_race_on_request_id_replays_the_winner() {
        let mut conn = open_db_in_memory().unwrap();
        let target = create_task_set(&mut conn, "undo me");
        let target_commit = commit_set(&mut conn, &target, None);
        let winner = ChangeService::new(&mut conn)
            .undo_last(UndoRequest {
                requested_by: ActorRef::new(ActorKind::User, "owner"),
                reason: "mistake".into(),
                client_request_id: Some("U".into()),
            })
            .unwrap();
        let UndoOutcome::Reverted {
            revert_commit_id, ..
        } = winner
        else {
            panic!("expected a revert");
        };

        let pending = create_task_set(&mut conn, "pending");
        let err = conflicting_commit(&conn, &pending, Some("U"));
        let outcome = recover_undo(&conn, Some("U"), err).unwrap();
        assert_eq!(
            outcome,
            UndoOutcome::Reverted {
                undone_commit_id: target_commit.id,
                revert_commit_id,
                undone_change_set_id: target,
                replayed: true,
            }
        );
    }

    #[test]
    fn undo_recovery_without_request_id_keeps_the_error() {
        let mut conn = open_db_in_memory().unwrap();
        let change_set_id = create_task_set(&mut conn, "only");
        commit_set(&mut conn, &change_set_id, None);
        let err = conflicting_commit(&conn, &change_set_id, None);
        let err = recover_undo(&conn, None, err).unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[test]
    fn unreadable_apply_result_is_structural() {
        let err: ChangeError = RepoError::InvalidApplyResult {
            action_id: "cha_1".into(),
            reason: "expected value".into(),
        }
        .into();
        assert_eq!(err.code(), "APPLY_RESULT_CORRUPT");
        assert!(err.is_structural());
    }
}
