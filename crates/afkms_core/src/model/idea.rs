//! Ideas attached to tasks, promotable into route nodes.

use super::route::NodeType;
use super::{is_blank, present, ValidationError};
use serde::{Deserialize, Serialize};

string_enum! {
    pub enum IdeaStatus {
        Captured => "captured",
        Triage => "triage",
        Discovery => "discovery",
        Ready => "ready",
        Rejected => "rejected",
    }
}

impl IdeaStatus {
    pub fn allowed_next(self) -> &'static [IdeaStatus] {
        use IdeaStatus::*;
        match self {
            Captured => &[Triage, Rejected],
            Triage => &[Discovery, Rejected],
            Discovery => &[Ready, Rejected, Triage],
            Ready => &[Discovery, Rejected],
            Rejected => &[],
        }
    }

    /// Staying in the same status is always allowed.
    pub fn validate_transition(self, next: Self) -> Result<(), ValidationError> {
        if next == self || self.allowed_next().contains(&next) {
            return Ok(());
        }
        Err(ValidationError::new(
            "IDEA_INVALID_STATUS_TRANSITION",
            format!("idea cannot move from `{self}` to `{next}`"),
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    pub id: String,
    pub task_id: Option<String>,
    pub title: String,
    pub problem: String,
    pub hypothesis: String,
    pub status: IdeaStatus,
    pub topic_id: Option<String>,
    pub source: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// `create_idea` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewIdea {
    pub task_id: String,
    pub title: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub hypothesis: String,
    #[serde(default)]
    pub status: Option<IdeaStatus>,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub source: String,
}

impl NewIdea {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.title) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "title cannot be blank"));
        }
        if is_blank(&self.task_id) {
            return Err(ValidationError::code("TASK_ID_REQUIRED"));
        }
        Ok(())
    }
}

/// `patch_idea` patch and snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdeaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IdeaStatus>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub topic_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl IdeaPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.as_deref().is_some_and(is_blank) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "title cannot be blank"));
        }
        Ok(())
    }

    pub fn capture(&self, idea: &Idea) -> Self {
        Self {
            title: self.title.as_ref().map(|_| idea.title.clone()),
            problem: self.problem.as_ref().map(|_| idea.problem.clone()),
            hypothesis: self.hypothesis.as_ref().map(|_| idea.hypothesis.clone()),
            status: self.status.map(|_| idea.status),
            topic_id: self.topic_id.as_ref().map(|_| idea.topic_id.clone()),
            source: self.source.as_ref().map(|_| idea.source.clone()),
        }
    }

    pub fn apply_to(&self, idea: &mut Idea) {
        if let Some(title) = &self.title {
            idea.title = title.clone();
        }
        if let Some(problem) = &self.problem {
            idea.problem = problem.clone();
        }
        if let Some(hypothesis) = &self.hypothesis {
            idea.hypothesis = hypothesis.clone();
        }
        if let Some(status) = self.status {
            idea.status = status;
        }
        if let Some(topic_id) = &self.topic_id {
            idea.topic_id = topic_id.clone();
        }
        if let Some(source) = &self.source {
            idea.source = source.clone();
        }
    }
}

/// `promote_idea` payload (minus `idea_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdeaPromotion {
    pub route_id: String,
    #[serde(default = "default_promoted_node_type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_promoted_node_type() -> NodeType {
    NodeType::Idea
}

#[cfg(test)]
mod tests {
    use super::IdeaStatus::*;

    #[test]
    fn rejected_is_terminal() {
        for next in [Captured, Triage, Discovery, Ready] {
            assert!(Rejected.validate_transition(next).is_err());
        }
    }

    #[test]
    fn discovery_can_step_back_to_triage() {
        assert!(Discovery.validate_transition(Triage).is_ok());
        assert_eq!(
            Captured.validate_transition(Ready).unwrap_err().code,
            "IDEA_INVALID_STATUS_TRANSITION"
        );
    }
}
