//! Ideas and their promotion into route nodes.

use super::record::{ApplyRecord, ApplyResult};
use super::task::ensure_topic;
use super::{not_found, ActionResult};
use crate::model::idea::{Idea, IdeaPatch, IdeaPromotion, IdeaStatus, NewIdea};
use crate::model::route::{NodeStatus, RouteNode};
use crate::model::ValidationError;
use crate::repo::idea_repo::IdeaRepo;
use crate::repo::route_repo::RouteRepo;
use crate::repo::task_repo::TaskRepo;
use crate::repo::{new_id, now_ms};
use rusqlite::Connection;

pub(super) fn validate_create(conn: &Connection, idea: &NewIdea) -> ActionResult<()> {
    if TaskRepo::new(conn).get(&idea.task_id)?.is_none() {
        return Err(not_found("TASK_NOT_FOUND", &idea.task_id));
    }
    ensure_topic(conn, idea.topic_id.as_deref())
}

pub(super) fn apply_create(conn: &Connection, new_idea: &NewIdea) -> ActionResult<ApplyResult> {
    validate_create(conn, new_idea)?;
    let now = now_ms();
    let idea = Idea {
        id: new_id("ida"),
        task_id: Some(new_idea.task_id.clone()),
        title: new_idea.title.clone(),
        problem: new_idea.problem.clone(),
        hypothesis: new_idea.hypothesis.clone(),
        status: new_idea.status.unwrap_or(IdeaStatus::Captured),
        topic_id: new_idea.topic_id.clone(),
        source: new_idea.source.clone(),
        created_at: now,
        updated_at: now,
    };
    IdeaRepo::new(conn).insert(&idea)?;
    Ok(ApplyResult::new(idea.id, ApplyRecord::CreateIdea))
}

pub(super) fn rollback_create(conn: &Connection, idea_id: &str) -> ActionResult<()> {
    IdeaRepo::new(conn).delete(idea_id)?;
    Ok(())
}

pub(super) fn validate_patch(
    conn: &Connection,
    idea_id: &str,
    patch: &IdeaPatch,
) -> ActionResult<Idea> {
    let idea = IdeaRepo::new(conn)
        .get(idea_id)?
        .ok_or_else(|| not_found("IDEA_NOT_FOUND", idea_id))?;
    if let Some(next) = patch.status {
        idea.status.validate_transition(next)?;
    }
    if let Some(Some(topic_id)) = &patch.topic_id {
        ensure_topic(conn, Some(topic_id))?;
    }
    Ok(idea)
}

pub(super) fn apply_patch(
    conn: &Connection,
    idea_id: &str,
    patch: &IdeaPatch,
) -> ActionResult<ApplyResult> {
    let mut idea = validate_patch(conn, idea_id, patch)?;
    let before = patch.capture(&idea);
    patch.apply_to(&mut idea);
    let after = patch.capture(&idea);
    IdeaRepo::new(conn).update(&idea)?;
    Ok(ApplyResult::new(
        idea.id,
        ApplyRecord::PatchIdea { before, after },
    ))
}

pub(super) fn rollback_patch(
    conn: &Connection,
    idea_id: &str,
    before: &IdeaPatch,
) -> ActionResult<()> {
    let repo = IdeaRepo::new(conn);
    let mut idea = repo
        .get(idea_id)?
        .ok_or_else(|| not_found("IDEA_NOT_FOUND", idea_id))?;
    before.apply_to(&mut idea);
    repo.update(&idea)?;
    Ok(())
}

/// A `ready` idea may be promoted into a route of the same task.
pub(super) fn validate_promote(
    conn: &Connection,
    idea_id: &str,
    promotion: &IdeaPromotion,
) -> ActionResult<Idea> {
    let idea = IdeaRepo::new(conn)
        .get(idea_id)?
        .ok_or_else(|| not_found("IDEA_NOT_FOUND", idea_id))?;
    if idea.status != IdeaStatus::Ready {
        return Err(ValidationError::new(
            "IDEA_NOT_READY",
            format!("idea is `{}`, expected `ready`", idea.status),
        )
        .into());
    }
    let route = RouteRepo::new(conn)
        .get_route(&promotion.route_id)?
        .ok_or_else(|| not_found("ROUTE_NOT_FOUND", &promotion.route_id))?;
    if let (Some(route_task), Some(idea_task)) = (&route.task_id, &idea.task_id) {
        if route_task != idea_task {
            return Err(ValidationError::code("IDEA_ROUTE_TASK_MISMATCH").into());
        }
    }
    Ok(idea)
}

pub(super) fn apply_promote(
    conn: &Connection,
    idea_id: &str,
    promotion: &IdeaPromotion,
) -> ActionResult<ApplyResult> {
    let idea = validate_promote(conn, idea_id, promotion)?;
    let routes = RouteRepo::new(conn);

    let title = promotion
        .title
        .as_deref()
        .filter(|title| !title.trim().is_empty())
        .unwrap_or(&idea.title)
        .trim()
        .to_string();
    let description = match &promotion.description {
        Some(description) => description.clone(),
        None => [idea.problem.trim(), idea.hypothesis.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
    };
    let now = now_ms();
    let node = RouteNode {
        id: new_id("rtn"),
        route_id: promotion.route_id.clone(),
        node_type: promotion.node_type,
        title,
        description,
        status: NodeStatus::Waiting,
        parent_node_id: None,
        order_hint: routes.max_order_hint(&promotion.route_id)? + 1,
        assignee_type: "human".to_string(),
        assignee_id: None,
        created_at: now,
        updated_at: now,
    };
    routes.insert_node(&node)?;

    Ok(ApplyResult::new(
        node.id,
        ApplyRecord::PromoteIdea {
            idea_id: idea.id,
            route_id: promotion.route_id.clone(),
        },
    ))
}
