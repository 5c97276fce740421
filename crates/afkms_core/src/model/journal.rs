//! Daily journal records.

use super::{is_blank, is_calendar_date, ValidationError};
use serde::{Deserialize, Serialize};

/// One journal per calendar day (`journal_date` is unique).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: String,
    pub journal_date: String,
    pub raw_content: String,
    pub digest: String,
    pub triage_status: String,
    pub source: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// `upsert_journal_append` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JournalAppend {
    pub journal_date: String,
    pub append_text: String,
    #[serde(default)]
    pub source: String,
}

impl JournalAppend {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_calendar_date(&self.journal_date) {
            return Err(ValidationError::new(
                "JOURNAL_DATE_INVALID",
                format!("`{}` is not a YYYY-MM-DD date", self.journal_date),
            ));
        }
        if is_blank(&self.append_text) {
            return Err(ValidationError::code("JOURNAL_APPEND_TEXT_REQUIRED"));
        }
        Ok(())
    }
}
