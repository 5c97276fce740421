//! Notes, links and knowledge items.
//!
//! Knowledge items are note rows; `create_knowledge` picks or infers a category.

use super::record::{ApplyRecord, ApplyResult};
use super::task::ensure_topic;
use super::{not_found, ActionResult};
use crate::model::note::{
    append_block, KnowledgeCategory, KnowledgePatch, Link, LinkEndpoint, NewKnowledge, NewLink,
    NewNote, Note, NotePatch, NoteSource, NoteStatus, SourceType,
};
use crate::repo::note_repo::{LinkRepo, NoteRepo};
use crate::repo::{new_id, now_ms};
use rusqlite::Connection;

pub(super) fn validate_append(conn: &Connection, note: &NewNote) -> ActionResult<()> {
    ensure_topic(conn, note.topic_id.as_deref())
}

pub(super) fn apply_append(conn: &Connection, new_note: &NewNote) -> ActionResult<ApplyResult> {
    validate_append(conn, new_note)?;

    let now = now_ms();
    let note = Note {
        id: new_id("nte"),
        title: new_note.title.clone(),
        body: new_note.body.clone(),
        category: KnowledgeCategory::MechanismSpec,
        tags: new_note.tags.clone(),
        topic_id: new_note.topic_id.clone(),
        status: NoteStatus::Active,
        created_at: now,
        updated_at: now,
    };
    let repo = NoteRepo::new(conn);
    repo.insert(&note)?;
    for source in &new_note.sources {
        repo.insert_source(&NoteSource {
            id: new_id("src"),
            note_id: note.id.clone(),
            source_type: source.source_type,
            source_value: source.value.clone(),
        })?;
    }

    Ok(ApplyResult::new(note.id, ApplyRecord::AppendNote))
}

pub(super) fn validate_patch(
    conn: &Connection,
    note_id: &str,
    patch: &NotePatch,
) -> ActionResult<Note> {
    let note = NoteRepo::new(conn)
        .get(note_id)?
        .ok_or_else(|| not_found("NOTE_NOT_FOUND", note_id))?;
    if let Some(Some(topic_id)) = &patch.topic_id {
        ensure_topic(conn, Some(topic_id))?;
    }
    Ok(note)
}

pub(super) fn apply_patch(
    conn: &Connection,
    note_id: &str,
    patch: &NotePatch,
    body_append: Option<&str>,
    source: Option<&str>,
) -> ActionResult<ApplyResult> {
    let mut note = validate_patch(conn, note_id, patch)?;

    let mut effective = patch.clone();
    if let Some(addition) = body_append {
        let base = patch.body.as_deref().unwrap_or(&note.body);
        effective.body = Some(append_block(base, addition.trim()));
    }

    let before = effective.capture(&note);
    effective.apply_to(&mut note);
    let after = effective.capture(&note);

    let repo = NoteRepo::new(conn);
    repo.update(&note)?;
    let source_entry_id = match source {
        Some(value) => {
            let entry = NoteSource {
                id: new_id("src"),
                note_id: note.id.clone(),
                source_type: SourceType::Text,
                source_value: value.to_string(),
            };
            repo.insert_source(&entry)?;
            Some(entry.id)
        }
        None => None,
    };

    Ok(ApplyResult::new(
        note.id,
        ApplyRecord::PatchNote {
            before,
            after,
            source_entry_id,
        },
    ))
}

/// Removes a created note (or knowledge item) and links touching it.
pub(super) fn rollback_create(conn: &Connection, note_id: &str) -> ActionResult<()> {
    LinkRepo::new(conn).delete_touching(LinkEndpoint::Note, note_id)?;
    NoteRepo::new(conn).delete(note_id)?;
    Ok(())
}

pub(super) fn rollback_patch(
    conn: &Connection,
    note_id: &str,
    before: &NotePatch,
    source_entry_id: Option<&str>,
) -> ActionResult<()> {
    let repo = NoteRepo::new(conn);
    let mut note = repo
        .get(note_id)?
        .ok_or_else(|| not_found("NOTE_NOT_FOUND", note_id))?;
    before.apply_to(&mut note);
    repo.update(&note)?;
    if let Some(source_entry_id) = source_entry_id {
        repo.delete_source(source_entry_id)?;
    }
    Ok(())
}

pub(super) fn apply_link(
    conn: &Connection,
    new_link: &NewLink,
    record: ApplyRecord,
) -> ActionResult<ApplyResult> {
    let link = Link {
        id: new_id("lnk"),
        from_type: new_link.from_type,
        from_id: new_link.from_id.clone(),
        to_type: new_link.to_type,
        to_id: new_link.to_id.clone(),
        relation: new_link.relation.trim().to_string(),
        created_at: now_ms(),
    };
    LinkRepo::new(conn).insert(&link)?;
    Ok(ApplyResult::new(link.id, record))
}

pub(super) fn rollback_link(conn: &Connection, link_id: &str) -> ActionResult<()> {
    LinkRepo::new(conn).delete(link_id)?;
    Ok(())
}

pub(super) fn validate_delete_link(conn: &Connection, link_id: &str) -> ActionResult<Link> {
    LinkRepo::new(conn)
        .get(link_id)?
        .ok_or_else(|| not_found("LINK_NOT_FOUND", link_id))
}

pub(super) fn apply_delete_link(conn: &Connection, link_id: &str) -> ActionResult<ApplyResult> {
    let before = validate_delete_link(conn, link_id)?;
    LinkRepo::new(conn).delete(link_id)?;
    Ok(ApplyResult::new(
        link_id,
        ApplyRecord::DeleteLink { before },
    ))
}

pub(super) fn rollback_delete_link(conn: &Connection, before: &Link) -> ActionResult<()> {
    let repo = LinkRepo::new(conn);
    if repo.get(&before.id)?.is_none() {
        repo.insert(before)?;
    }
    Ok(())
}

pub(super) fn apply_create_knowledge(
    conn: &Connection,
    knowledge: &NewKnowledge,
) -> ActionResult<ApplyResult> {
    let now = now_ms();
    let note = Note {
        id: new_id("nte"),
        title: knowledge.title.clone(),
        body: knowledge.body.clone(),
        category: knowledge.resolved_category(),
        tags: Vec::new(),
        topic_id: None,
        status: NoteStatus::Active,
        created_at: now,
        updated_at: now,
    };
    NoteRepo::new(conn).insert(&note)?;
    Ok(ApplyResult::new(note.id, ApplyRecord::CreateKnowledge))
}

pub(super) fn validate_knowledge(conn: &Connection, item_id: &str) -> ActionResult<Note> {
    NoteRepo::new(conn)
        .get(item_id)?
        .ok_or_else(|| not_found("KNOWLEDGE_NOT_FOUND", item_id))
}

pub(super) fn apply_patch_knowledge(
    conn: &Connection,
    item_id: &str,
    patch: &KnowledgePatch,
) -> ActionResult<ApplyResult> {
    let mut note = validate_knowledge(conn, item_id)?;
    let before = patch.capture(&note);
    patch.apply_to(&mut note);
    let after = patch.capture(&note);
    NoteRepo::new(conn).update(&note)?;
    Ok(ApplyResult::new(
        note.id,
        ApplyRecord::PatchKnowledge { before, after },
    ))
}

pub(super) fn rollback_patch_knowledge(
    conn: &Connection,
    item_id: &str,
    before: &KnowledgePatch,
) -> ActionResult<()> {
    let repo = NoteRepo::new(conn);
    let mut note = repo
        .get(item_id)?
        .ok_or_else(|| not_found("KNOWLEDGE_NOT_FOUND", item_id))?;
    before.apply_to(&mut note);
    repo.update(&note)?;
    Ok(())
}

/// Archiving an archived item succeeds with `changed = false`.
pub(super) fn apply_archive_knowledge(
    conn: &Connection,
    item_id: &str,
) -> ActionResult<ApplyResult> {
    let mut note = validate_knowledge(conn, item_id)?;
    let before_status = note.status;
    let changed = before_status != NoteStatus::Archived;
    if changed {
        note.status = NoteStatus::Archived;
        NoteRepo::new(conn).update(&note)?;
    }
    Ok(ApplyResult::new(
        note.id,
        ApplyRecord::ArchiveKnowledge {
            before_status,
            after_status: note.status,
            changed,
        },
    ))
}

pub(super) fn rollback_archive_knowledge(
    conn: &Connection,
    item_id: &str,
    before_status: NoteStatus,
    changed: bool,
) -> ActionResult<()> {
    let repo = NoteRepo::new(conn);
    let mut note = repo
        .get(item_id)?
        .ok_or_else(|| not_found("KNOWLEDGE_NOT_FOUND", item_id))?;
    if changed && note.status != before_status {
        note.status = before_status;
        repo.update(&note)?;
    }
    Ok(())
}

pub(super) fn apply_delete_knowledge(
    conn: &Connection,
    item_id: &str,
) -> ActionResult<ApplyResult> {
    let before_note = validate_knowledge(conn, item_id)?;
    let notes = NoteRepo::new(conn);
    let links = LinkRepo::new(conn);
    let before_sources = notes.list_sources(item_id)?;
    let before_links = links.touching(LinkEndpoint::Note, item_id)?;

    links.delete_touching(LinkEndpoint::Note, item_id)?;
    notes.delete(item_id)?;

    Ok(ApplyResult::new(
        item_id,
        ApplyRecord::DeleteKnowledge {
            before_note,
            before_sources,
            before_links,
        },
    ))
}

/// Reinserts the note with its sources and links unless it is already back.
pub(super) fn rollback_delete_knowledge(
    conn: &Connection,
    before_note: &Note,
    before_sources: &[NoteSource],
    before_links: &[Link],
) -> ActionResult<()> {
    let notes = NoteRepo::new(conn);
    if notes.get(&before_note.id)?.is_some() {
        return Ok(());
    }
    notes.insert(before_note)?;
    for source in before_sources {
        if !notes.source_exists(&source.id)? {
            notes.insert_source(source)?;
        }
    }
    let links = LinkRepo::new(conn);
    for link in before_links {
        if links.get(&link.id)?.is_none() {
            links.insert(link)?;
        }
    }
    Ok(())
}
