//! Notes, knowledge items, note sources and links.
//!
//! Knowledge items are note rows; `category` tells the knowledge kind.

use super::{is_blank, present, ValidationError};
use serde::{Deserialize, Serialize};

pub const NOTE_TITLE_MAX_CHARS: usize = 200;

string_enum! {
    pub enum NoteStatus {
        Active => "active",
        Archived => "archived",
    }
}

string_enum! {
    pub enum KnowledgeCategory {
        OpsManual => "ops_manual",
        MechanismSpec => "mechanism_spec",
        DecisionRecord => "decision_record",
    }
}

string_enum! {
    pub enum SourceType {
        Text => "text",
        Url => "url",
        DocId => "doc_id",
        MessageId => "message_id",
    }
}

string_enum! {
    /// Entity kinds a link may connect.
    pub enum LinkEndpoint {
        Note => "note",
        Task => "task",
    }
}

const DECISION_KEYWORDS: &[&str] = &[
    "决策", "决定", "取舍", "路线", "结论", "decision", "decide", "tradeoff", "trade-off",
];
const OPS_KEYWORDS: &[&str] = &[
    "排障", "命令", "sop", "步骤", "执行", "runbook", "playbook", "checklist", "操作手册",
];

impl KnowledgeCategory {
    /// Keyword-based category for knowledge created without one.
    ///
    /// Decision vocabulary wins over runbook vocabulary.
    pub fn infer(title: &str, body: &str) -> Self {
        let text = format!("{title}\n{body}").to_lowercase();
        if DECISION_KEYWORDS.iter().any(|word| text.contains(word)) {
            Self::DecisionRecord
        } else if OPS_KEYWORDS.iter().any(|word| text.contains(word)) {
            Self::OpsManual
        } else {
            Self::MechanismSpec
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub body: String,
    pub category: KnowledgeCategory,
    pub tags: Vec<String>,
    pub topic_id: Option<String>,
    pub status: NoteStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSource {
    pub id: String,
    pub note_id: String,
    pub source_type: SourceType,
    pub source_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub from_type: LinkEndpoint,
    pub from_id: String,
    pub to_type: LinkEndpoint,
    pub to_id: String,
    pub relation: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceItem {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub value: String,
}

/// `append_note` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewNote {
    pub title: String,
    pub body: String,
    pub sources: Vec<SourceItem>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub topic_id: Option<String>,
}

impl NewNote {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_note_title(&self.title)?;
        if is_blank(&self.body) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "body cannot be blank"));
        }
        if self.sources.is_empty() {
            return Err(ValidationError::new(
                "NOTE_SOURCES_REQUIRED",
                "at least one source item is required",
            ));
        }
        if self.sources.iter().any(|source| is_blank(&source.value)) {
            return Err(ValidationError::new(
                "PAYLOAD_INVALID",
                "source value cannot be blank",
            ));
        }
        Ok(())
    }
}

/// Field patch for a note row. Snapshot type of `patch_note`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub topic_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<NoteStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl NotePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = self.title.as_deref() {
            validate_note_title(title)?;
        }
        Ok(())
    }

    pub fn capture(&self, note: &Note) -> Self {
        Self {
            title: self.title.as_ref().map(|_| note.title.clone()),
            body: self.body.as_ref().map(|_| note.body.clone()),
            topic_id: self.topic_id.as_ref().map(|_| note.topic_id.clone()),
            status: self.status.map(|_| note.status),
            tags: self.tags.as_ref().map(|_| note.tags.clone()),
        }
    }

    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(body) = &self.body {
            note.body = body.clone();
        }
        if let Some(topic_id) = &self.topic_id {
            note.topic_id = topic_id.clone();
        }
        if let Some(status) = self.status {
            note.status = status;
        }
        if let Some(tags) = &self.tags {
            note.tags = tags.clone();
        }
    }
}

/// `create_knowledge` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewKnowledge {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<KnowledgeCategory>,
}

impl NewKnowledge {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_note_title(&self.title)?;
        if is_blank(&self.body) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "body cannot be blank"));
        }
        Ok(())
    }

    pub fn resolved_category(&self) -> KnowledgeCategory {
        self.category
            .unwrap_or_else(|| KnowledgeCategory::infer(&self.title, &self.body))
    }
}

/// `patch_knowledge` patch and snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<KnowledgeCategory>,
}

impl KnowledgePatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = self.title.as_deref() {
            validate_note_title(title)?;
        }
        Ok(())
    }

    pub fn capture(&self, note: &Note) -> Self {
        Self {
            title: self.title.as_ref().map(|_| note.title.clone()),
            body: self.body.as_ref().map(|_| note.body.clone()),
            category: self.category.map(|_| note.category),
        }
    }

    pub fn apply_to(&self, note: &mut Note) {
        if let Some(title) = &self.title {
            note.title = title.clone();
        }
        if let Some(body) = &self.body {
            note.body = body.clone();
        }
        if let Some(category) = self.category {
            note.category = category;
        }
    }
}

/// `link_entities` / `create_link` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewLink {
    pub from_type: LinkEndpoint,
    pub from_id: String,
    pub to_type: LinkEndpoint,
    pub to_id: String,
    pub relation: String,
}

impl NewLink {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.from_id) || is_blank(&self.to_id) {
            return Err(ValidationError::new(
                "PAYLOAD_INVALID",
                "link endpoints need non-blank ids",
            ));
        }
        if is_blank(&self.relation) {
            return Err(ValidationError::code("LINK_RELATION_REQUIRED"));
        }
        Ok(())
    }
}

fn validate_note_title(title: &str) -> Result<(), ValidationError> {
    if is_blank(title) || title.chars().count() > NOTE_TITLE_MAX_CHARS {
        return Err(ValidationError::new(
            "NOTE_TITLE_INVALID",
            format!("title must be 1..={NOTE_TITLE_MAX_CHARS} non-blank characters"),
        ));
    }
    Ok(())
}

/// Appends `addition` as a new paragraph after trimmed `existing` text.
pub fn append_block(existing: &str, addition: &str) -> String {
    let trimmed = existing.trim();
    if trimmed.is_empty() {
        addition.to_string()
    } else {
        format!("{trimmed}\n\n{addition}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_inference_prefers_decisions() {
        assert_eq!(
            KnowledgeCategory::infer("Storage decision", "runbook attached"),
            KnowledgeCategory::DecisionRecord
        );
        assert_eq!(
            KnowledgeCategory::infer("Deploy", "Checklist for rollout"),
            KnowledgeCategory::OpsManual
        );
        assert_eq!(
            KnowledgeCategory::infer("Cache layer", "how eviction works"),
            KnowledgeCategory::MechanismSpec
        );
    }

    #[test]
    fn append_block_adds_paragraph() {
        assert_eq!(append_block("", "first"), "first");
        assert_eq!(append_block("first\n", "second"), "first\n\nsecond");
    }

    #[test]
    fn link_needs_relation() {
        let link = NewLink {
            from_type: LinkEndpoint::Note,
            from_id: "nte_1".to_string(),
            to_type: LinkEndpoint::Task,
            to_id: "tsk_1".to_string(),
            relation: " ".to_string(),
        };
        assert_eq!(link.validate().unwrap_err().code, "LINK_RELATION_REQUIRED");
    }
}
