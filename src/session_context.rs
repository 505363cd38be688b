//! Read-modify-write helpers over `Session.context`.
//!
//! `context` is an opaque JSON object with one reserved key,
//! `conversationHistory`, an array of `{role, content, ts}` entries capped
//! at [`crate::models::MAX_CONVERSATION_HISTORY`]. Everything else in the
//! object is free-form scalar state the AI runtime asked to remember via
//! `set-variables` or `[[SET:...]]` markers.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::models::{HistoryRole, MAX_CONVERSATION_HISTORY};

/// Appends one history entry, truncating the array from the front once it
/// exceeds the cap.
pub fn push_history(context: &mut Value, role: HistoryRole, content: &str, ts: DateTime<Utc>) {
    let obj = ensure_object(context);
    let history = obj
        .entry("conversationHistory")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .expect("conversationHistory is always maintained as a JSON array");

    let role_str = match role {
        HistoryRole::User => "user",
        HistoryRole::Assistant => "assistant",
    };
    history.push(json!({"role": role_str, "content": content, "ts": ts}));

    let overflow = history.len().saturating_sub(MAX_CONVERSATION_HISTORY);
    if overflow > 0 {
        history.drain(0..overflow);
    }

    obj.insert("lastUpdated".to_string(), json!(ts));
}

/// Merges arbitrary scalar key/value pairs into the context (from
/// `set-variables` items or `[[SET:key=value]]` markers), stamping
/// `lastUpdated`.
pub fn merge_variables(context: &mut Value, pairs: impl IntoIterator<Item = (String, Value)>, ts: DateTime<Utc>) {
    let obj = ensure_object(context);
    for (key, value) in pairs {
        if key == "conversationHistory" {
            continue;
        }
        obj.insert(key, value);
    }
    obj.insert("lastUpdated".to_string(), json!(ts));
}

fn ensure_object(context: &mut Value) -> &mut Map<String, Value> {
    if !context.is_object() {
        *context = json!({});
    }
    context.as_object_mut().expect("just normalized to an object")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_history_appends_entries() {
        let mut context = json!({});
        let now = Utc::now();
        push_history(&mut context, HistoryRole::User, "hi", now);
        push_history(&mut context, HistoryRole::Assistant, "hello", now);

        let history = context["conversationHistory"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["role"], "user");
        assert_eq!(history[1]["content"], "hello");
    }

    #[test]
    fn push_history_caps_at_fifty() {
        let mut context = json!({});
        let now = Utc::now();
        for i in 0..60 {
            push_history(&mut context, HistoryRole::User, &format!("msg-{i}"), now);
        }
        let history = context["conversationHistory"].as_array().unwrap();
        assert_eq!(history.len(), MAX_CONVERSATION_HISTORY);
        assert_eq!(history[0]["content"], "msg-10");
        assert_eq!(history.last().unwrap()["content"], "msg-59");
    }

    #[test]
    fn merge_variables_ignores_reserved_key() {
        let mut context = json!({"conversationHistory": [{"role": "user", "content": "hi"}]});
        let now = Utc::now();
        merge_variables(
            &mut context,
            [("conversationHistory".to_string(), json!([])), ("tier".to_string(), json!("gold"))],
            now,
        );
        assert_eq!(context["tier"], "gold");
        assert_eq!(context["conversationHistory"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn merge_variables_stamps_last_updated() {
        let mut context = json!({});
        let now = Utc::now();
        merge_variables(&mut context, [("a".to_string(), json!(1))], now);
        assert!(context.get("lastUpdated").is_some());
    }
}
