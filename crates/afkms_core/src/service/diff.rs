//! Proposal preview: summary counters and per-action diff rows.
//!
//! # Invariants
//! - Output order equals input action order.
//! - An empty batch yields exactly one `no-op` diff row.
//! - Every per-type counter is present, zero-initialised.

use crate::action::{ActionClass, ActionType, IDENTIFIER_KEYS};
use crate::model::change::{DiffItem, Summary};
use serde_json::{Map, Value};

/// Keys echoed as `key=value` in a `create_task` diff line.
const CREATE_TASK_PREVIEW_KEYS: &[&str] = &["title", "status", "priority", "due"];

/// An action as proposed, before it is persisted.
pub type ProposedAction<'a> = (ActionType, &'a Map<String, Value>);

pub fn build_summary(actions: &[ProposedAction<'_>]) -> Summary {
    let count_class = |class: ActionClass| {
        actions
            .iter()
            .filter(|(action_type, _)| action_type.class() == class)
            .count()
    };

    let mut summary = Summary::new();
    summary.insert("creates".into(), count_class(ActionClass::Create).into());
    summary.insert("updates".into(), count_class(ActionClass::Update).into());
    summary.insert("duplicate_candidates".into(), 0.into());
    for action_type in ActionType::ALL {
        summary
            .entry(action_type.summary_key())
            .or_insert_with(|| 0.into());
    }

    for (action_type, payload) in actions {
        bump(&mut summary, action_type.summary_key().to_string());
        for key in payload.keys().filter(|key| !is_identifier(key)) {
            bump(&mut summary, format!("field_{key}"));
        }
    }
    summary
}

pub fn build_diff_items(actions: &[ProposedAction<'_>]) -> Vec<DiffItem> {
    if actions.is_empty() {
        return vec![DiffItem {
            entity: "unknown".into(),
            action: "other".into(),
            fields: Vec::new(),
            text: "no-op".into(),
        }];
    }
    actions
        .iter()
        .map(|(action_type, payload)| DiffItem {
            entity: action_type.entity().into(),
            action: action_type.verb().into(),
            fields: payload
                .keys()
                .filter(|key| !is_identifier(key))
                .cloned()
                .collect(),
            text: diff_line(*action_type, payload),
        })
        .collect()
}

/// Human-readable line for one action.
pub fn diff_line(action_type: ActionType, payload: &Map<String, Value>) -> String {
    let listed = |excluded: &[&str]| {
        let keys: Vec<&str> = payload
            .keys()
            .map(String::as_str)
            .filter(|key| !excluded.contains(key))
            .collect();
        render(action_type, keys.join(", "))
    };

    match action_type {
        ActionType::CreateTask => {
            let parts: Vec<String> = CREATE_TASK_PREVIEW_KEYS
                .iter()
                .filter_map(|key| match payload.get(*key) {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(format!("{key}={}", display_value(value))),
                })
                .collect();
            render(action_type, parts.join(", "))
        }
        ActionType::UpdateTask => listed(&["task_id"]),
        ActionType::AppendNote | ActionType::PatchNote => listed(&["id", "note_id"]),
        ActionType::UpsertJournalAppend => keyed(action_type, payload, "journal_date"),
        ActionType::DeleteLink => keyed(action_type, payload, "link_id"),
        _ => listed(&["id"]),
    }
}

fn keyed(action_type: ActionType, payload: &Map<String, Value>, key: &str) -> String {
    match payload.get(key) {
        None | Some(Value::Null) => render(action_type, String::new()),
        Some(value) => render(action_type, format!("{key}={}", display_value(value))),
    }
}

fn render(action_type: ActionType, detail: String) -> String {
    if detail.is_empty() {
        format!("{action_type} prepared")
    } else {
        format!("{action_type}: {detail}")
    }
}

/// Strings render bare; everything else as compact JSON.
fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn is_identifier(key: &str) -> bool {
    IDENTIFIER_KEYS.contains(&key)
}

fn bump(summary: &mut Summary, key: String) {
    let next = summary.get(&key).and_then(Value::as_u64).unwrap_or(0) + 1;
    summary.insert(key, next.into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn empty_batch_renders_single_noop_row() {
        let items = build_diff_items(&[]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entity, "unknown");
        assert_eq!(items[0].action, "other");
        assert!(items[0].fields.is_empty());
        assert_eq!(items[0].text, "no-op");
    }

    #[test]
    fn summary_counts_types_classes_and_fields() {
        let create = map(json!({"title": "x", "status": "todo"}));
        let update = map(json!({"task_id": "tsk_1", "priority": "P1"}));
        let link = map(json!({"from_type": "note", "from_id": "nte_1", "to_type": "task", "to_id": "tsk_1", "relation": "refs"}));
        let summary = build_summary(&[
            (ActionType::CreateTask, &create),
            (ActionType::UpdateTask, &update),
            (ActionType::CreateLink, &link),
        ]);

        assert_eq!(summary["creates"], 2);
        assert_eq!(summary["updates"], 1);
        assert_eq!(summary["duplicate_candidates"], 0);
        assert_eq!(summary["task_create"], 1);
        assert_eq!(summary["task_update"], 1);
        assert_eq!(summary["link_create"], 1);
        assert_eq!(summary["inbox_capture"], 0);
        assert_eq!(summary["field_title"], 1);
        assert_eq!(summary["field_priority"], 1);
        assert!(!summary.contains_key("field_task_id"));
    }

    #[test]
    fn every_summary_key_is_present_for_any_batch() {
        let summary = build_summary(&[]);
        for action_type in ActionType::ALL {
            assert_eq!(summary[action_type.summary_key()], 0);
        }
    }

    #[test]
    fn create_task_line_lists_preview_values_unquoted() {
        let payload = map(json!({"title": "Write docs", "status": "todo", "description": "long"}));
        assert_eq!(
            diff_line(ActionType::CreateTask, &payload),
            "create_task: title=Write docs, status=todo"
        );
        assert_eq!(
            diff_line(ActionType::CreateTask, &map(json!({"description": "d"}))),
            "create_task prepared"
        );
    }

    #[test]
    fn lines_skip_identifier_keys_per_type() {
        let update = map(json!({"task_id": "tsk_1", "priority": "P1", "due": null}));
        assert_eq!(diff_line(ActionType::UpdateTask, &update), "update_task: priority, due");

        let journal = map(json!({"journal_date": "2026-01-02", "append_text": "hi"}));
        assert_eq!(
            diff_line(ActionType::UpsertJournalAppend, &journal),
            "upsert_journal_append: journal_date=2026-01-02"
        );

        let node = map(json!({"route_id": "rte_1", "node_type": "goal", "title": "g"}));
        assert_eq!(
            diff_line(ActionType::CreateRouteNode, &node),
            "create_route_node: route_id, node_type, title"
        );
    }

    #[test]
    fn diff_items_follow_input_order_and_strip_identifiers() {
        let patch = map(json!({"note_id": "nte_1", "body_append": "more"}));
        let delete = map(json!({"link_id": "lnk_1"}));
        let items = build_diff_items(&[
            (ActionType::PatchNote, &patch),
            (ActionType::DeleteLink, &delete),
        ]);
        assert_eq!(items.len(), 2);
        assert_eq!((items[0].entity.as_str(), items[0].action.as_str()), ("note", "update"));
        assert_eq!(items[0].fields, vec!["body_append".to_string()]);
        assert_eq!((items[1].entity.as_str(), items[1].action.as_str()), ("link", "delete"));
        assert!(items[1].fields.is_empty());
        assert_eq!(items[1].text, "delete_link: link_id=lnk_1");
    }
}
