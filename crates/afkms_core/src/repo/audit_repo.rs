//! Append-only audit event persistence.

use super::{enum_column, json_column, new_id, now_ms, page_window, RepoResult};
use crate::model::audit::{AuditEvent, NewAuditEvent};
use crate::model::change::{ActorKind, ActorRef};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const AUDIT_SELECT_SQL: &str = "SELECT
    id,
    occurred_at,
    actor_type,
    actor_id,
    tool,
    action,
    target_type,
    target_id,
    source_refs_json,
    metadata_json
FROM audit_events";

/// Filters for the read-only audit view. All filters are exact matches.
#[derive(Debug, Clone)]
pub struct AuditListQuery {
    pub actor_type: Option<ActorKind>,
    pub actor_id: Option<String>,
    pub tool: Option<String>,
    pub action: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for AuditListQuery {
    fn default() -> Self {
        Self {
            actor_type: None,
            actor_id: None,
            tool: None,
            action: None,
            target_type: None,
            target_id: None,
            page: 1,
            page_size: 50,
        }
    }
}

pub trait AuditRepository {
    fn record(&self, event: NewAuditEvent) -> RepoResult<AuditEvent>;
    /// Newest first.
    fn list(&self, query: &AuditListQuery) -> RepoResult<(Vec<AuditEvent>, u64)>;
}

pub struct SqliteAuditRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteAuditRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl AuditRepository for SqliteAuditRepository<'_> {
    fn record(&self, event: NewAuditEvent) -> RepoResult<AuditEvent> {
        let event = AuditEvent {
            id: new_id("aud"),
            occurred_at: now_ms(),
            actor: event.actor,
            tool: event.tool,
            action: event.action,
            target_type: event.target_type,
            target_id: event.target_id,
            source_refs: event.source_refs,
            metadata: event.metadata,
        };

        self.conn.execute(
            "INSERT INTO audit_events (
                id, occurred_at, actor_type, actor_id, tool, action, target_type,
                target_id, source_refs_json, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                event.id,
                event.occurred_at,
                event.actor.kind.as_str(),
                event.actor.id,
                event.tool,
                event.action,
                event.target_type,
                event.target_id,
                serde_json::to_string(&event.source_refs)?,
                serde_json::to_string(&event.metadata)?,
            ],
        )?;

        Ok(event)
    }

    fn list(&self, query: &AuditListQuery) -> RepoResult<(Vec<AuditEvent>, u64)> {
        let mut filter = String::from(" WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        let text_filters = [
            ("actor_type", query.actor_type.map(|kind| kind.as_str().to_string())),
            ("actor_id", query.actor_id.clone()),
            ("tool", query.tool.clone()),
            ("action", query.action.clone()),
            ("target_type", query.target_type.clone()),
            ("target_id", query.target_id.clone()),
        ];
        for (column, value) in text_filters {
            if let Some(value) = value {
                filter.push_str(&format!(" AND {column} = ?"));
                bind_values.push(Value::Text(value));
            }
        }

        let total: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM audit_events{filter};"),
            params_from_iter(bind_values.iter()),
            |row| row.get(0),
        )?;

        let (limit, offset) = page_window(query.page, query.page_size);
        bind_values.push(Value::Integer(limit));
        bind_values.push(Value::Integer(offset));

        let mut stmt = self.conn.prepare(&format!(
            "{AUDIT_SELECT_SQL}{filter} ORDER BY occurred_at DESC, id DESC LIMIT ? OFFSET ?;"
        ))?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_event(row)?);
        }

        Ok((events, u64::try_from(total).unwrap_or_default()))
    }
}

fn parse_event(row: &Row<'_>) -> RepoResult<AuditEvent> {
    Ok(AuditEvent {
        id: row.get("id")?,
        occurred_at: row.get("occurred_at")?,
        actor: ActorRef {
            kind: enum_column(row, "actor_type", ActorKind::parse)?,
            id: row.get("actor_id")?,
        },
        tool: row.get("tool")?,
        action: row.get("action")?,
        target_type: row.get("target_type")?,
        target_id: row.get("target_id")?,
        source_refs: json_column(row, "source_refs_json")?,
        metadata: json_column(row, "metadata_json")?,
    })
}
