//! `capture_inbox`.

use super::record::{ApplyRecord, ApplyResult};
use super::ActionResult;
use crate::model::inbox::{InboxItem, NewInboxItem};
use crate::repo::inbox_repo::InboxRepo;
use crate::repo::{new_id, now_ms};
use rusqlite::Connection;

pub(super) fn apply_capture(conn: &Connection, item: &NewInboxItem) -> ActionResult<ApplyResult> {
    let now = now_ms();
    let row = InboxItem {
        id: new_id("inb"),
        content: item.content.clone(),
        source: item.source.clone(),
        status: "open".to_string(),
        captured_at: now,
        updated_at: now,
    };
    InboxRepo::new(conn).insert(&row)?;
    Ok(ApplyResult::new(
        row.id,
        ApplyRecord::CaptureInbox {
            source: row.source,
        },
    ))
}

pub(super) fn rollback_capture(conn: &Connection, item_id: &str) -> ActionResult<()> {
    InboxRepo::new(conn).delete(item_id)?;
    Ok(())
}
