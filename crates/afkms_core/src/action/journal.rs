//! `upsert_journal_append`.

use super::record::{ApplyRecord, ApplyResult};
use super::{not_found, ActionError, ActionResult};
use crate::model::is_blank;
use crate::model::journal::{Journal, JournalAppend};
use crate::model::note::append_block;
use crate::repo::journal_repo::JournalRepo;
use crate::repo::{new_id, now_ms};
use rusqlite::Connection;

/// Creates the day's journal or appends a paragraph to it.
pub(super) fn apply_upsert(conn: &Connection, append: &JournalAppend) -> ActionResult<ApplyResult> {
    let text = append.append_text.trim();
    let repo = JournalRepo::new(conn);

    let Some(journal) = repo.find_by_date(&append.journal_date)? else {
        let now = now_ms();
        let journal = Journal {
            id: new_id("jrn"),
            journal_date: append.journal_date.clone(),
            raw_content: text.to_string(),
            digest: String::new(),
            triage_status: "open".to_string(),
            source: append.source.clone(),
            created_at: now,
            updated_at: now,
        };
        repo.insert(&journal)?;
        return Ok(ApplyResult::new(
            journal.id,
            ApplyRecord::UpsertJournalAppend {
                journal_date: journal.journal_date,
                created: true,
                before_raw_content: None,
                after_raw_content: journal.raw_content,
                before_source: None,
                source: append.source.clone(),
            },
        ));
    };

    let after_raw_content = append_block(&journal.raw_content, text);
    let after_source = if is_blank(&journal.source) {
        append.source.clone()
    } else {
        journal.source.clone()
    };
    repo.set_content(&journal.id, &after_raw_content, &after_source)?;

    Ok(ApplyResult::new(
        journal.id,
        ApplyRecord::UpsertJournalAppend {
            journal_date: journal.journal_date,
            created: false,
            before_raw_content: Some(journal.raw_content),
            after_raw_content,
            before_source: Some(journal.source),
            source: append.source.clone(),
        },
    ))
}

pub(super) fn rollback_upsert(
    conn: &Connection,
    journal_id: &str,
    created: bool,
    before_raw_content: Option<&str>,
    before_source: Option<&str>,
) -> ActionResult<()> {
    let repo = JournalRepo::new(conn);
    let Some(journal) = repo.get(journal_id)? else {
        if created {
            return Ok(());
        }
        return Err(not_found("JOURNAL_NOT_FOUND", journal_id));
    };

    if created {
        repo.delete(journal_id)?;
        return Ok(());
    }

    let before_raw_content = before_raw_content
        .ok_or_else(|| ActionError::Corrupt("missing before_raw_content".to_string()))?;
    let source = before_source.unwrap_or(journal.source.as_str());
    repo.set_content(journal_id, before_raw_content, source)?;
    Ok(())
}
