//! Chat capture inbox.

use super::{is_blank, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CHAT_SOURCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^chat://.+").expect("valid chat source regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxItem {
    pub id: String,
    pub content: String,
    pub source: String,
    pub status: String,
    pub captured_at: i64,
    pub updated_at: i64,
}

/// `capture_inbox` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewInboxItem {
    pub content: String,
    pub source: String,
}

impl NewInboxItem {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if is_blank(&self.content) {
            return Err(ValidationError::new("PAYLOAD_INVALID", "content cannot be blank"));
        }
        if !CHAT_SOURCE_RE.is_match(&self.source) {
            return Err(ValidationError::new(
                "INBOX_SOURCE_INVALID",
                "source must look like chat://<ref>",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::NewInboxItem;

    #[test]
    fn source_must_be_chat_uri() {
        let mut item = NewInboxItem {
            content: "remember the milk".to_string(),
            source: "chat://thread/42".to_string(),
        };
        assert!(item.validate().is_ok());

        item.source = "chat://".to_string();
        assert_eq!(item.validate().unwrap_err().code, "INBOX_SOURCE_INVALID");
        item.source = "https://example.com".to_string();
        assert!(item.validate().is_err());
    }
}
