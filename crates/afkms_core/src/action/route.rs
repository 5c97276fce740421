//! Routes, route nodes, route edges and node logs.
//!
//! Activating a route is a cross-entity write: a `todo` task moves to
//! `in_progress`, and the prior task status travels in the apply record so
//! rollback can put it back.

use super::record::{ApplyRecord, ApplyResult, TaskActivation};
use super::{not_found, ActionResult};
use crate::model::route::{
    EdgeRelation, NewNodeLog, NewRoute, NewRouteEdge, NewRouteNode, NodeLog, NodeStatus, Route,
    RouteEdge, RouteEdgePatch, RouteNode, RouteNodePatch, RoutePatch, RouteStatus,
};
use crate::model::task::{Task, TaskStatus};
use crate::model::ValidationError;
use crate::repo::route_repo::RouteRepo;
use crate::repo::task_repo::TaskRepo;
use crate::repo::{new_id, now_ms};
use rusqlite::Connection;

const DEFAULT_ASSIGNEE_TYPE: &str = "human";
const DEFAULT_LOG_ACTOR_TYPE: &str = "human";
const DEFAULT_LOG_ACTOR_ID: &str = "local";
const DEFAULT_LOG_TYPE: &str = "note";

fn ensure_single_active(
    routes: &RouteRepo<'_>,
    task_id: Option<&str>,
    ignore_route_id: Option<&str>,
) -> ActionResult<()> {
    let Some(task_id) = task_id else {
        return Ok(());
    };
    if let Some(active) = routes.active_route_for_task(task_id, ignore_route_id)? {
        return Err(ValidationError::new(
            "ROUTE_ACTIVE_CONFLICT",
            format!("route `{}` is already active for task `{task_id}`", active.id),
        )
        .into());
    }
    Ok(())
}

fn activatable_task(conn: &Connection, task_id: &str) -> ActionResult<Task> {
    let task = TaskRepo::new(conn)
        .get(task_id)?
        .ok_or_else(|| not_found("TASK_NOT_FOUND", task_id))?;
    if task.status.is_closed() {
        return Err(ValidationError::new(
            "TASK_INVALID_STATUS_TRANSITION",
            format!("task `{task_id}` is `{}`", task.status),
        )
        .into());
    }
    Ok(task)
}

fn activate_task(conn: &Connection, task_id: &str) -> ActionResult<TaskActivation> {
    let task = activatable_task(conn, task_id)?;
    let mut after = task.status;
    if task.status == TaskStatus::Todo {
        after = TaskStatus::InProgress;
        TaskRepo::new(conn).set_status(task_id, after)?;
    }
    Ok(TaskActivation {
        task_id: task_id.to_string(),
        task_before_status: task.status,
        task_after_status: after,
    })
}

fn restore_task(conn: &Connection, activation: Option<&TaskActivation>) -> ActionResult<()> {
    if let Some(activation) = activation {
        TaskRepo::new(conn).set_status(&activation.task_id, activation.task_before_status)?;
    }
    Ok(())
}

fn ensure_parent_route(
    routes: &RouteRepo<'_>,
    parent_route_id: Option<&str>,
    route_id: Option<&str>,
) -> ActionResult<()> {
    let Some(parent_route_id) = parent_route_id else {
        return Ok(());
    };
    if Some(parent_route_id) == route_id {
        return Err(ValidationError::new("ROUTE_PARENT_INVALID", "route cannot be its own parent").into());
    }
    if routes.get_route(parent_route_id)?.is_none() {
        return Err(not_found("ROUTE_PARENT_NOT_FOUND", parent_route_id));
    }
    Ok(())
}

pub(super) fn validate_create_route(conn: &Connection, new_route: &NewRoute) -> ActionResult<()> {
    if TaskRepo::new(conn).get(&new_route.task_id)?.is_none() {
        return Err(not_found("TASK_NOT_FOUND", &new_route.task_id));
    }
    let routes = RouteRepo::new(conn);
    ensure_parent_route(&routes, new_route.parent_route_id.as_deref(), None)?;
    if new_route.initial_status() == RouteStatus::Active {
        ensure_single_active(&routes, Some(&new_route.task_id), None)?;
        activatable_task(conn, &new_route.task_id)?;
    }
    Ok(())
}

pub(super) fn apply_create_route(
    conn: &Connection,
    new_route: &NewRoute,
) -> ActionResult<ApplyResult> {
    validate_create_route(conn, new_route)?;
    let status = new_route.initial_status();
    let activation = if status == RouteStatus::Active {
        Some(activate_task(conn, &new_route.task_id)?)
    } else {
        None
    };

    let now = now_ms();
    let route = Route {
        id: new_id("rte"),
        task_id: Some(new_route.task_id.clone()),
        name: new_route.name.clone(),
        goal: new_route.goal.clone(),
        status,
        priority: new_route.priority,
        owner: new_route.owner.clone(),
        parent_route_id: new_route.parent_route_id.clone(),
        created_at: now,
        updated_at: now,
    };
    RouteRepo::new(conn).insert_route(&route)?;

    Ok(ApplyResult::new(
        route.id,
        ApplyRecord::CreateRoute { activation },
    ))
}

pub(super) fn rollback_create_route(
    conn: &Connection,
    route_id: &str,
    activation: Option<&TaskActivation>,
) -> ActionResult<()> {
    RouteRepo::new(conn).delete_route(route_id)?;
    restore_task(conn, activation)
}

pub(super) fn validate_patch_route(
    conn: &Connection,
    route_id: &str,
    patch: &RoutePatch,
) -> ActionResult<Route> {
    let routes = RouteRepo::new(conn);
    let route = routes
        .get_route(route_id)?
        .ok_or_else(|| not_found("ROUTE_NOT_FOUND", route_id))?;

    if let Some(parent) = &patch.parent_route_id {
        if parent != &route.parent_route_id {
            if route.status != RouteStatus::Candidate {
                return Err(ValidationError::code("ROUTE_PARENT_REWIRE_FORBIDDEN").into());
            }
            ensure_parent_route(&routes, parent.as_deref(), Some(route_id))?;
        }
    }

    if let Some(next) = patch.status.filter(|next| *next != route.status) {
        route.status.validate_transition(next)?;
        if next == RouteStatus::Active {
            ensure_single_active(&routes, route.task_id.as_deref(), Some(route_id))?;
            if let Some(task_id) = route.task_id.as_deref() {
                activatable_task(conn, task_id)?;
            }
        }
    }
    Ok(route)
}

pub(super) fn apply_patch_route(
    conn: &Connection,
    route_id: &str,
    patch: &RoutePatch,
) -> ActionResult<ApplyResult> {
    let mut route = validate_patch_route(conn, route_id, patch)?;

    let activating = patch.status == Some(RouteStatus::Active) && route.status != RouteStatus::Active;
    let activation = match route.task_id.as_deref() {
        Some(task_id) if activating => Some(activate_task(conn, task_id)?),
        _ => None,
    };

    let before = patch.capture(&route);
    patch.apply_to(&mut route);
    let after = patch.capture(&route);
    RouteRepo::new(conn).update_route(&route)?;

    Ok(ApplyResult::new(
        route.id,
        ApplyRecord::PatchRoute {
            before,
            after,
            activation,
        },
    ))
}

pub(super) fn rollback_patch_route(
    conn: &Connection,
    route_id: &str,
    before: &RoutePatch,
    activation: Option<&TaskActivation>,
) -> ActionResult<()> {
    let routes = RouteRepo::new(conn);
    let mut route = routes
        .get_route(route_id)?
        .ok_or_else(|| not_found("ROUTE_NOT_FOUND", route_id))?;
    before.apply_to(&mut route);
    routes.update_route(&route)?;
    restore_task(conn, activation)
}

fn ensure_route(routes: &RouteRepo<'_>, route_id: &str) -> ActionResult<Route> {
    routes
        .get_route(route_id)?
        .ok_or_else(|| not_found("ROUTE_NOT_FOUND", route_id))
}

fn ensure_node_in_route(
    routes: &RouteRepo<'_>,
    route_id: &str,
    node_id: &str,
) -> ActionResult<RouteNode> {
    ensure_route(routes, route_id)?;
    routes
        .get_node(node_id)?
        .filter(|node| node.route_id == route_id)
        .ok_or_else(|| not_found("ROUTE_NODE_NOT_FOUND", node_id))
}

/// Parent node must live in the same route and differ from the node itself.
fn ensure_parent_node(
    routes: &RouteRepo<'_>,
    route_id: &str,
    parent_node_id: Option<&str>,
    node_id: Option<&str>,
) -> ActionResult<()> {
    let Some(parent_node_id) = parent_node_id else {
        return Ok(());
    };
    if Some(parent_node_id) == node_id {
        return Err(ValidationError::new(
            "ROUTE_PARENT_NODE_INVALID",
            "node cannot be its own parent",
        )
        .into());
    }
    match routes.get_node(parent_node_id)? {
        Some(parent) if parent.route_id == route_id => Ok(()),
        _ => Err(ValidationError::new(
            "ROUTE_PARENT_NODE_INVALID",
            format!("`{parent_node_id}` is not a node of route `{route_id}`"),
        )
        .into()),
    }
}

pub(super) fn validate_create_node(
    conn: &Connection,
    route_id: &str,
    node: &NewRouteNode,
) -> ActionResult<()> {
    let routes = RouteRepo::new(conn);
    ensure_route(&routes, route_id)?;
    ensure_parent_node(&routes, route_id, node.parent_node_id.as_deref(), None)
}

pub(super) fn apply_create_node(
    conn: &Connection,
    route_id: &str,
    new_node: &NewRouteNode,
) -> ActionResult<ApplyResult> {
    validate_create_node(conn, route_id, new_node)?;
    let routes = RouteRepo::new(conn);
    let order_hint = if new_node.order_hint <= 0 {
        routes.max_order_hint(route_id)? + 1
    } else {
        new_node.order_hint
    };

    let now = now_ms();
    let node = RouteNode {
        id: new_id("rtn"),
        route_id: route_id.to_string(),
        node_type: new_node.node_type,
        title: new_node.title.clone(),
        description: new_node.description.clone(),
        status: new_node.status.unwrap_or(NodeStatus::Waiting),
        parent_node_id: new_node.parent_node_id.clone(),
        order_hint,
        assignee_type: new_node
            .assignee_type
            .clone()
            .unwrap_or_else(|| DEFAULT_ASSIGNEE_TYPE.to_string()),
        assignee_id: new_node.assignee_id.clone(),
        created_at: now,
        updated_at: now,
    };
    routes.insert_node(&node)?;

    Ok(ApplyResult::new(
        node.id,
        ApplyRecord::CreateRouteNode {
            route_id: route_id.to_string(),
        },
    ))
}

/// Shared by `create_route_node` and `promote_idea`.
pub(super) fn rollback_create_node(conn: &Connection, node_id: &str) -> ActionResult<()> {
    RouteRepo::new(conn).delete_node(node_id)?;
    Ok(())
}

pub(super) fn validate_patch_node(
    conn: &Connection,
    route_id: &str,
    node_id: &str,
    patch: &RouteNodePatch,
) -> ActionResult<RouteNode> {
    let routes = RouteRepo::new(conn);
    let node = ensure_node_in_route(&routes, route_id, node_id)?;
    if let Some(parent) = &patch.parent_node_id {
        ensure_parent_node(&routes, route_id, parent.as_deref(), Some(node_id))?;
    }
    Ok(node)
}

pub(super) fn apply_patch_node(
    conn: &Connection,
    route_id: &str,
    node_id: &str,
    patch: &RouteNodePatch,
) -> ActionResult<ApplyResult> {
    let mut node = validate_patch_node(conn, route_id, node_id, patch)?;
    let before = patch.capture(&node);
    patch.apply_to(&mut node);
    let after = patch.capture(&node);
    RouteRepo::new(conn).update_node(&node)?;
    Ok(ApplyResult::new(
        node.id,
        ApplyRecord::PatchRouteNode { before, after },
    ))
}

pub(super) fn rollback_patch_node(
    conn: &Connection,
    node_id: &str,
    before: &RouteNodePatch,
) -> ActionResult<()> {
    let routes = RouteRepo::new(conn);
    let mut node = routes
        .get_node(node_id)?
        .ok_or_else(|| not_found("ROUTE_NODE_NOT_FOUND", node_id))?;
    before.apply_to(&mut node);
    routes.update_node(&node)?;
    Ok(())
}

pub(super) fn validate_delete_node(
    conn: &Connection,
    route_id: &str,
    node_id: &str,
) -> ActionResult<RouteNode> {
    let routes = RouteRepo::new(conn);
    let node = ensure_node_in_route(&routes, route_id, node_id)?;
    if routes.count_outgoing_edges(route_id, node_id)? > 0 {
        return Err(ValidationError::code("ROUTE_NODE_HAS_SUCCESSORS").into());
    }
    Ok(node)
}

/// Captures the node plus the rows its deletion cascades into.
pub(super) fn apply_delete_node(
    conn: &Connection,
    route_id: &str,
    node_id: &str,
) -> ActionResult<ApplyResult> {
    let before = validate_delete_node(conn, route_id, node_id)?;
    let routes = RouteRepo::new(conn);
    let incoming_edges = routes.incoming_edges(node_id)?;
    let node_logs = routes.logs_for_node(node_id)?;
    let child_node_ids = routes.child_node_ids(node_id)?;
    routes.delete_node(node_id)?;

    Ok(ApplyResult::new(
        node_id,
        ApplyRecord::DeleteRouteNode {
            before,
            incoming_edges,
            node_logs,
            child_node_ids,
        },
    ))
}

pub(super) fn rollback_delete_node(
    conn: &Connection,
    before: &RouteNode,
    incoming_edges: &[RouteEdge],
    node_logs: &[NodeLog],
    child_node_ids: &[String],
) -> ActionResult<()> {
    let routes = RouteRepo::new(conn);
    if routes.get_node(&before.id)?.is_some() {
        return Ok(());
    }
    if routes.get_route(&before.route_id)?.is_none() {
        return Err(not_found("ROUTE_NOT_FOUND", &before.route_id));
    }

    let mut node = before.clone();
    if let Some(parent_id) = node.parent_node_id.as_deref() {
        if routes.get_node(parent_id)?.is_none() {
            node.parent_node_id = None;
        }
    }
    routes.insert_node(&node)?;

    for edge in incoming_edges {
        if !routes.edge_exists(&edge.id)? && routes.get_node(&edge.from_node_id)?.is_some() {
            routes.insert_edge(edge)?;
        }
    }
    for log in node_logs {
        if !routes.log_exists(&log.id)? {
            routes.insert_log(log)?;
        }
    }
    for child_id in child_node_ids {
        if let Some(child) = routes.get_node(child_id)? {
            if child.parent_node_id.is_none() {
                routes.set_parent_node(child_id, Some(&before.id))?;
            }
        }
    }
    Ok(())
}

/// Returns the relation the edge will carry.
pub(super) fn validate_create_edge(
    conn: &Connection,
    route_id: &str,
    edge: &NewRouteEdge,
) -> ActionResult<EdgeRelation> {
    let routes = RouteRepo::new(conn);
    ensure_route(&routes, route_id)?;
    if edge.from_node_id == edge.to_node_id {
        return Err(ValidationError::code("ROUTE_EDGE_SELF_LOOP").into());
    }
    let (Some(from), Some(to)) = (
        routes.get_node(&edge.from_node_id)?,
        routes.get_node(&edge.to_node_id)?,
    ) else {
        return Err(ValidationError::code("ROUTE_EDGE_NODE_NOT_FOUND").into());
    };
    if from.route_id != route_id || to.route_id != route_id {
        return Err(ValidationError::code("ROUTE_EDGE_CROSS_ROUTE").into());
    }
    if routes
        .edge_between(route_id, &edge.from_node_id, &edge.to_node_id)?
        .is_some()
    {
        return Err(ValidationError::code("ROUTE_EDGE_DUPLICATE").into());
    }
    let expected = EdgeRelation::infer(from.node_type);
    match edge.relation {
        Some(relation) if relation != expected => Err(ValidationError::new(
            "ROUTE_EDGE_RELATION_MISMATCH",
            format!("expected `{expected}`, got `{relation}`"),
        )
        .into()),
        _ => Ok(expected),
    }
}

pub(super) fn apply_create_edge(
    conn: &Connection,
    route_id: &str,
    new_edge: &NewRouteEdge,
) -> ActionResult<ApplyResult> {
    let relation = validate_create_edge(conn, route_id, new_edge)?;
    let edge = RouteEdge {
        id: new_id("red"),
        route_id: route_id.to_string(),
        from_node_id: new_edge.from_node_id.clone(),
        to_node_id: new_edge.to_node_id.clone(),
        relation,
        description: new_edge.description.clone().unwrap_or_default(),
        created_at: now_ms(),
    };
    RouteRepo::new(conn).insert_edge(&edge)?;
    Ok(ApplyResult::new(
        edge.id,
        ApplyRecord::CreateRouteEdge {
            route_id: route_id.to_string(),
        },
    ))
}

pub(super) fn rollback_create_edge(conn: &Connection, edge_id: &str) -> ActionResult<()> {
    RouteRepo::new(conn).delete_edge(edge_id)?;
    Ok(())
}

pub(super) fn validate_edge(
    conn: &Connection,
    route_id: &str,
    edge_id: &str,
) -> ActionResult<RouteEdge> {
    RouteRepo::new(conn)
        .get_edge(route_id, edge_id)?
        .ok_or_else(|| not_found("ROUTE_EDGE_NOT_FOUND", edge_id))
}

pub(super) fn apply_patch_edge(
    conn: &Connection,
    route_id: &str,
    edge_id: &str,
    patch: &RouteEdgePatch,
) -> ActionResult<ApplyResult> {
    let mut edge = validate_edge(conn, route_id, edge_id)?;
    let before = patch.capture(&edge);
    patch.apply_to(&mut edge);
    let after = patch.capture(&edge);
    RouteRepo::new(conn).set_edge_description(&edge.id, &edge.description)?;
    Ok(ApplyResult::new(
        edge.id,
        ApplyRecord::PatchRouteEdge { before, after },
    ))
}

pub(super) fn rollback_patch_edge(
    conn: &Connection,
    edge_id: &str,
    before: &RouteEdgePatch,
) -> ActionResult<()> {
    let routes = RouteRepo::new(conn);
    if !routes.edge_exists(edge_id)? {
        return Err(not_found("ROUTE_EDGE_NOT_FOUND", edge_id));
    }
    if let Some(description) = before.description.as_deref() {
        routes.set_edge_description(edge_id, description)?;
    }
    Ok(())
}

pub(super) fn apply_delete_edge(
    conn: &Connection,
    route_id: &str,
    edge_id: &str,
) -> ActionResult<ApplyResult> {
    let before = validate_edge(conn, route_id, edge_id)?;
    RouteRepo::new(conn).delete_edge(edge_id)?;
    Ok(ApplyResult::new(
        edge_id,
        ApplyRecord::DeleteRouteEdge { before },
    ))
}

pub(super) fn rollback_delete_edge(conn: &Connection, before: &RouteEdge) -> ActionResult<()> {
    let routes = RouteRepo::new(conn);
    if !routes.edge_exists(&before.id)? {
        routes.insert_edge(before)?;
    }
    Ok(())
}

pub(super) fn validate_append_log(
    conn: &Connection,
    route_id: &str,
    node_id: &str,
) -> ActionResult<()> {
    ensure_node_in_route(&RouteRepo::new(conn), route_id, node_id)?;
    Ok(())
}

pub(super) fn apply_append_log(
    conn: &Connection,
    route_id: &str,
    node_id: &str,
    new_log: &NewNodeLog,
) -> ActionResult<ApplyResult> {
    validate_append_log(conn, route_id, node_id)?;
    let log = NodeLog {
        id: new_id("nlg"),
        node_id: node_id.to_string(),
        actor_type: new_log
            .actor_type
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_ACTOR_TYPE.to_string()),
        actor_id: new_log
            .actor_id
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_ACTOR_ID.to_string()),
        content: new_log.content.clone(),
        log_type: new_log
            .log_type
            .clone()
            .unwrap_or_else(|| DEFAULT_LOG_TYPE.to_string()),
        source_ref: new_log.source_ref.clone(),
        created_at: now_ms(),
    };
    RouteRepo::new(conn).insert_log(&log)?;
    Ok(ApplyResult::new(
        log.id,
        ApplyRecord::AppendRouteNodeLog {
            node_id: node_id.to_string(),
        },
    ))
}

pub(super) fn rollback_append_log(conn: &Connection, log_id: &str) -> ActionResult<()> {
    RouteRepo::new(conn).delete_log(log_id)?;
    Ok(())
}
