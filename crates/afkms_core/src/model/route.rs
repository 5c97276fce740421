//! Routes (execution plans for a task) and their node/edge graph.
//!
//! # Invariants
//! - At most one `active` route per task.
//! - `parent_route_id` may only be rewired while the route is `candidate`.
//! - Edges never loop on one node and never cross routes.
//! - Edge relation is `initiate` when leaving a `start` node, `refine` otherwise.

use super::task::TaskPriority;
use super::{is_blank, present, ValidationError};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum RouteStatus {
        Candidate => "candidate",
        Active => "active",
        Parked => "parked",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

impl RouteStatus {
    pub fn allowed_next(self) -> &'static [RouteStatus] {
        use RouteStatus::*;
        match self {
            Candidate => &[Active, Parked, Cancelled],
            Active => &[Parked, Completed, Cancelled],
            Parked => &[Active, Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }

    pub fn validate_transition(self, next: Self) -> Result<(), ValidationError> {
        if self.allowed_next().contains(&next) {
            return Ok(());
        }
        Err(ValidationError::new(
            "ROUTE_INVALID_STATUS_TRANSITION",
            format!("route cannot move from `{self}` to `{next}`"),
        ))
    }
}

string_enum! {
    pub enum NodeType {
        Start => "start",
        Goal => "goal",
        Idea => "idea",
        Decision => "decision",
        Milestone => "milestone",
        Task => "task",
    }
}

string_enum! {
    pub enum NodeStatus {
        Waiting => "waiting",
        Execute => "execute",
        Done => "done",
    }
}

string_enum! {
    pub enum EdgeRelation {
        Refine => "refine",
        Initiate => "initiate",
    }
}

impl EdgeRelation {
    pub fn infer(from: NodeType) -> Self {
        if from == NodeType::Start {
            Self::Initiate
        } else {
            Self::Refine
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: String,
    pub task_id: Option<String>,
    pub name: String,
    pub goal: String,
    pub status: RouteStatus,
    pub priority: Option<TaskPriority>,
    pub owner: Option<String>,
    pub parent_route_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteNode {
    pub id: String,
    pub route_id: String,
    pub node_type: NodeType,
    pub title: String,
    pub description: String,
    pub status: NodeStatus,
    pub parent_node_id: Option<String>,
    pub order_hint: i64,
    pub assignee_type: String,
    pub assignee_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEdge {
    pub id: String,
    pub route_id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub relation: EdgeRelation,
    pub description: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLog {
    pub id: String,
    pub node_id: String,
    pub actor_type: String,
    pub actor_id: String,
    pub content: String,
    pub log_type: String,
    pub source_ref: Option<String>,
    pub created_at: i64,
}

/// `create_route` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRoute {
    pub task_id: String,
    pub name: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub status: Option<RouteStatus>,
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub parent_route_id: Option<String>,
}

impl NewRoute {
    pub fn initial_status(&self) -> RouteStatus {
        self.status.unwrap_or(RouteStatus::Candidate)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.task_id) {
            return Err(ValidationError::code("TASK_ID_REQUIRED"));
        }
        if is_blank(&self.name) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "name cannot be blank"));
        }
        Ok(())
    }
}

/// `patch_route` patch and snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RouteStatus>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Option<TaskPriority>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_route_id: Option<Option<String>>,
}

impl RoutePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.as_deref().is_some_and(is_blank) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "name cannot be blank"));
        }
        Ok(())
    }

    pub fn capture(&self, route: &Route) -> Self {
        Self {
            name: self.name.as_ref().map(|_| route.name.clone()),
            goal: self.goal.as_ref().map(|_| route.goal.clone()),
            status: self.status.map(|_| route.status),
            priority: self.priority.map(|_| route.priority),
            owner: self.owner.as_ref().map(|_| route.owner.clone()),
            parent_route_id: self
                .parent_route_id
                .as_ref()
                .map(|_| route.parent_route_id.clone()),
        }
    }

    pub fn apply_to(&self, route: &mut Route) {
        if let Some(name) = &self.name {
            route.name = name.clone();
        }
        if let Some(goal) = &self.goal {
            route.goal = goal.clone();
        }
        if let Some(status) = self.status {
            route.status = status;
        }
        if let Some(priority) = self.priority {
            route.priority = priority;
        }
        if let Some(owner) = &self.owner {
            route.owner = owner.clone();
        }
        if let Some(parent) = &self.parent_route_id {
            route.parent_route_id = parent.clone();
        }
    }
}

/// `create_route_node` payload (minus `route_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRouteNode {
    pub node_type: NodeType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<NodeStatus>,
    #[serde(default)]
    pub parent_node_id: Option<String>,
    /// `<= 0` appends after the current maximum.
    #[serde(default)]
    pub order_hint: i64,
    #[serde(default)]
    pub assignee_type: Option<String>,
    #[serde(default)]
    pub assignee_id: Option<String>,
}

impl NewRouteNode {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.title) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "title cannot be blank"));
        }
        Ok(())
    }
}

/// `patch_route_node` patch and snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteNodePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<NodeType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_node_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_hint: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub assignee_id: Option<Option<String>>,
}

impl RouteNodePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.as_deref().is_some_and(is_blank) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "title cannot be blank"));
        }
        Ok(())
    }

    pub fn capture(&self, node: &RouteNode) -> Self {
        Self {
            node_type: self.node_type.map(|_| node.node_type),
            title: self.title.as_ref().map(|_| node.title.clone()),
            description: self.description.as_ref().map(|_| node.description.clone()),
            status: self.status.map(|_| node.status),
            parent_node_id: self
                .parent_node_id
                .as_ref()
                .map(|_| node.parent_node_id.clone()),
            order_hint: self.order_hint.map(|_| node.order_hint),
            assignee_type: self.assignee_type.as_ref().map(|_| node.assignee_type.clone()),
            assignee_id: self.assignee_id.as_ref().map(|_| node.assignee_id.clone()),
        }
    }

    pub fn apply_to(&self, node: &mut RouteNode) {
        if let Some(node_type) = self.node_type {
            node.node_type = node_type;
        }
        if let Some(title) = &self.title {
            node.title = title.clone();
        }
        if let Some(description) = &self.description {
            node.description = description.clone();
        }
        if let Some(status) = self.status {
            node.status = status;
        }
        if let Some(parent) = &self.parent_node_id {
            node.parent_node_id = parent.clone();
        }
        if let Some(order_hint) = self.order_hint {
            node.order_hint = order_hint;
        }
        if let Some(assignee_type) = &self.assignee_type {
            node.assignee_type = assignee_type.clone();
        }
        if let Some(assignee_id) = &self.assignee_id {
            node.assignee_id = assignee_id.clone();
        }
    }
}

/// `create_route_edge` payload (minus `route_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewRouteEdge {
    pub from_node_id: String,
    pub to_node_id: String,
    /// Inferred from the source node type when omitted.
    #[serde(default)]
    pub relation: Option<EdgeRelation>,
    #[serde(default)]
    pub description: Option<String>,
}

/// `patch_route_edge` patch and snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteEdgePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RouteEdgePatch {
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
    }

    pub fn capture(&self, edge: &RouteEdge) -> Self {
        Self {
            description: self.description.as_ref().map(|_| edge.description.clone()),
        }
    }

    pub fn apply_to(&self, edge: &mut RouteEdge) {
        if let Some(description) = &self.description {
            edge.description = description.clone();
        }
    }
}

/// `append_route_node_log` payload (minus `route_id`/`node_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewNodeLog {
    pub content: String,
    #[serde(default)]
    pub actor_type: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub log_type: Option<String>,
    #[serde(default)]
    pub source_ref: Option<String>,
}

impl NewNodeLog {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.content) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "content cannot be blank"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_route_statuses_have_no_exits() {
        assert!(RouteStatus::Completed.allowed_next().is_empty());
        assert!(RouteStatus::Cancelled
            .validate_transition(RouteStatus::Active)
            .is_err());
        assert!(RouteStatus::Parked
            .validate_transition(RouteStatus::Active)
            .is_ok());
    }

    #[test]
    fn start_nodes_initiate() {
        assert_eq!(EdgeRelation::infer(NodeType::Start), EdgeRelation::Initiate);
        assert_eq!(EdgeRelation::infer(NodeType::Goal), EdgeRelation::Refine);
        assert_eq!(EdgeRelation::infer(NodeType::Idea), EdgeRelation::Refine);
    }
}
