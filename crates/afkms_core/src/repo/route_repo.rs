//! Route, route node, route edge and node log persistence.

use super::{
    enum_column, fetch_all, fetch_optional, now_ms, optional_enum_column, RepoResult,
};
use crate::model::route::{
    EdgeRelation, NodeLog, NodeStatus, NodeType, Route, RouteEdge, RouteNode, RouteStatus,
};
use crate::model::task::TaskPriority;
use rusqlite::{params, Connection, Row};

const ROUTE_SELECT_SQL: &str = "SELECT
    id,
    task_id,
    name,
    goal,
    status,
    priority,
    owner,
    parent_route_id,
    created_at,
    updated_at
FROM routes";

const NODE_SELECT_SQL: &str = "SELECT
    id,
    route_id,
    node_type,
    title,
    description,
    status,
    parent_node_id,
    order_hint,
    assignee_type,
    assignee_id,
    created_at,
    updated_at
FROM route_nodes";

const EDGE_SELECT_SQL: &str = "SELECT
    id,
    route_id,
    from_node_id,
    to_node_id,
    relation,
    description,
    created_at
FROM route_edges";

const LOG_SELECT_SQL: &str = "SELECT
    id,
    node_id,
    actor_type,
    actor_id,
    content,
    log_type,
    source_ref,
    created_at
FROM node_logs";

pub struct RouteRepo<'conn> {
    conn: &'conn Connection,
}

impl<'conn> RouteRepo<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get_route(&self, id: &str) -> RepoResult<Option<Route>> {
        fetch_optional(
            self.conn,
            &format!("{ROUTE_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_route,
        )
    }

    /// Any `active` route of `task_id` other than `ignore_route_id`.
    pub fn active_route_for_task(
        &self,
        task_id: &str,
        ignore_route_id: Option<&str>,
    ) -> RepoResult<Option<Route>> {
        fetch_optional(
            self.conn,
            &format!(
                "{ROUTE_SELECT_SQL}
                 WHERE task_id = ?1
                   AND status = 'active'
                   AND (?2 IS NULL OR id != ?2)
                 LIMIT 1;"
            ),
            params![task_id, ignore_route_id],
            parse_route,
        )
    }

    pub fn insert_route(&self, route: &Route) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO routes (
                id, task_id, name, goal, status, priority, owner, parent_route_id,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                route.id,
                route.task_id,
                route.name,
                route.goal,
                route.status.as_str(),
                route.priority.map(TaskPriority::as_str),
                route.owner,
                route.parent_route_id,
                route.created_at,
                route.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_route(&self, route: &Route) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE routes
             SET
                name = ?1,
                goal = ?2,
                status = ?3,
                priority = ?4,
                owner = ?5,
                parent_route_id = ?6,
                updated_at = ?7
             WHERE id = ?8;",
            params![
                route.name,
                route.goal,
                route.status.as_str(),
                route.priority.map(TaskPriority::as_str),
                route.owner,
                route.parent_route_id,
                now_ms(),
                route.id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Deletes the route; nodes, edges and logs cascade.
    pub fn delete_route(&self, id: &str) -> RepoResult<bool> {
        let changed = self.conn.execute("DELETE FROM routes WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    pub fn get_node(&self, id: &str) -> RepoResult<Option<RouteNode>> {
        fetch_optional(
            self.conn,
            &format!("{NODE_SELECT_SQL} WHERE id = ?1;"),
            [id],
            parse_node,
        )
    }

    pub fn insert_node(&self, node: &RouteNode) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO route_nodes (
                id, route_id, node_type, title, description, status, parent_node_id,
                order_hint, assignee_type, assignee_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
            params![
                node.id,
                node.route_id,
                node.node_type.as_str(),
                node.title,
                node.description,
                node.status.as_str(),
                node.parent_node_id,
                node.order_hint,
                node.assignee_type,
                node.assignee_id,
                node.created_at,
                node.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn update_node(&self, node: &RouteNode) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE route_nodes
             SET
                node_type = ?1,
                title = ?2,
                description = ?3,
                status = ?4,
                parent_node_id = ?5,
                order_hint = ?6,
                assignee_type = ?7,
                assignee_id = ?8,
                updated_at = ?9
             WHERE id = ?10;",
            params![
                node.node_type.as_str(),
                node.title,
                node.description,
                node.status.as_str(),
                node.parent_node_id,
                node.order_hint,
                node.assignee_type,
                node.assignee_id,
                now_ms(),
                node.id,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Deletes the node. Incoming edges and logs cascade; children lose their parent.
    pub fn delete_node(&self, id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM route_nodes WHERE id = ?1;", [id])?;
        Ok(changed > 0)
    }

    pub fn max_order_hint(&self, route_id: &str) -> RepoResult<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(order_hint) FROM route_nodes WHERE route_id = ?1;",
            [route_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    pub fn child_node_ids(&self, parent_node_id: &str) -> RepoResult<Vec<String>> {
        fetch_all(
            self.conn,
            "SELECT id FROM route_nodes WHERE parent_node_id = ?1 ORDER BY id ASC;",
            [parent_node_id],
            |row| Ok(row.get("id")?),
        )
    }

    pub fn set_parent_node(&self, node_id: &str, parent_node_id: Option<&str>) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE route_nodes SET parent_node_id = ?1, updated_at = ?2 WHERE id = ?3;",
            params![parent_node_id, now_ms(), node_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_edge(&self, route_id: &str, edge_id: &str) -> RepoResult<Option<RouteEdge>> {
        fetch_optional(
            self.conn,
            &format!("{EDGE_SELECT_SQL} WHERE id = ?1 AND route_id = ?2;"),
            params![edge_id, route_id],
            parse_edge,
        )
    }

    pub fn edge_exists(&self, edge_id: &str) -> RepoResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM route_edges WHERE id = ?1;",
            [edge_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn edge_between(
        &self,
        route_id: &str,
        from_node_id: &str,
        to_node_id: &str,
    ) -> RepoResult<Option<RouteEdge>> {
        fetch_optional(
            self.conn,
            &format!(
                "{EDGE_SELECT_SQL} WHERE route_id = ?1 AND from_node_id = ?2 AND to_node_id = ?3;"
            ),
            params![route_id, from_node_id, to_node_id],
            parse_edge,
        )
    }

    pub fn count_outgoing_edges(&self, route_id: &str, node_id: &str) -> RepoResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM route_edges WHERE route_id = ?1 AND from_node_id = ?2;",
            params![route_id, node_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn incoming_edges(&self, node_id: &str) -> RepoResult<Vec<RouteEdge>> {
        fetch_all(
            self.conn,
            &format!("{EDGE_SELECT_SQL} WHERE to_node_id = ?1 ORDER BY created_at ASC, id ASC;"),
            [node_id],
            parse_edge,
        )
    }

    pub fn insert_edge(&self, edge: &RouteEdge) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO route_edges (
                id, route_id, from_node_id, to_node_id, relation, description, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                edge.id,
                edge.route_id,
                edge.from_node_id,
                edge.to_node_id,
                edge.relation.as_str(),
                edge.description,
                edge.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn set_edge_description(&self, edge_id: &str, description: &str) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "UPDATE route_edges SET description = ?1 WHERE id = ?2;",
            params![description, edge_id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_edge(&self, edge_id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM route_edges WHERE id = ?1;", [edge_id])?;
        Ok(changed > 0)
    }

    pub fn logs_for_node(&self, node_id: &str) -> RepoResult<Vec<NodeLog>> {
        fetch_all(
            self.conn,
            &format!("{LOG_SELECT_SQL} WHERE node_id = ?1 ORDER BY created_at ASC, id ASC;"),
            [node_id],
            parse_log,
        )
    }

    pub fn log_exists(&self, log_id: &str) -> RepoResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM node_logs WHERE id = ?1;",
            [log_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn insert_log(&self, log: &NodeLog) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO node_logs (
                id, node_id, actor_type, actor_id, content, log_type, source_ref, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                log.id,
                log.node_id,
                log.actor_type,
                log.actor_id,
                log.content,
                log.log_type,
                log.source_ref,
                log.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn delete_log(&self, log_id: &str) -> RepoResult<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM node_logs WHERE id = ?1;", [log_id])?;
        Ok(changed > 0)
    }
}

fn parse_route(row: &Row<'_>) -> RepoResult<Route> {
    Ok(Route {
        id: row.get("id")?,
        task_id: row.get("task_id")?,
        name: row.get("name")?,
        goal: row.get("goal")?,
        status: enum_column(row, "status", RouteStatus::parse)?,
        priority: optional_enum_column(row, "priority", TaskPriority::parse)?,
        owner: row.get("owner")?,
        parent_route_id: row.get("parent_route_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_node(row: &Row<'_>) -> RepoResult<RouteNode> {
    Ok(RouteNode {
        id: row.get("id")?,
        route_id: row.get("route_id")?,
        node_type: enum_column(row, "node_type", NodeType::parse)?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: enum_column(row, "status", NodeStatus::parse)?,
        parent_node_id: row.get("parent_node_id")?,
        order_hint: row.get("order_hint")?,
        assignee_type: row.get("assignee_type")?,
        assignee_id: row.get("assignee_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_edge(row: &Row<'_>) -> RepoResult<RouteEdge> {
    Ok(RouteEdge {
        id: row.get("id")?,
        route_id: row.get("route_id")?,
        from_node_id: row.get("from_node_id")?,
        to_node_id: row.get("to_node_id")?,
        relation: enum_column(row, "relation", EdgeRelation::parse)?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_log(row: &Row<'_>) -> RepoResult<NodeLog> {
    Ok(NodeLog {
        id: row.get("id")?,
        node_id: row.get("node_id")?,
        actor_type: row.get("actor_type")?,
        actor_id: row.get("actor_id")?,
        content: row.get("content")?,
        log_type: row.get("log_type")?,
        source_ref: row.get("source_ref")?,
        created_at: row.get("created_at")?,
    })
}
