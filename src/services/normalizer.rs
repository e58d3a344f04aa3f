use serde_json::{Map, Value};

use crate::{
    dto::{
        event::{ChatEvent, EventUser, GiftEvent, NormalizedEvent, RoomInfoEvent, UserEvent},
        now_millis,
    },
    source::SourceEventKind,
};

const UNKNOWN_EVENT_TEXT: &str = "[unknown event]";
const UNKNOWN_USERNAME: &str = "unknown";

/// Map a raw provider payload onto the closed set of relayed events.
///
/// Total: unknown kinds, lifecycle kinds and payloads that are not JSON objects all become a
/// `[unknown event]` room info line. Missing fields fall back to empty strings, the username
/// is always `@`-prefixed, and the timestamp is assigned here rather than trusted from
/// upstream.
pub fn normalize(kind: &SourceEventKind, payload: &Value) -> NormalizedEvent {
    let ts = now_millis();
    let Some(fields) = payload.as_object() else {
        return unknown(ts);
    };

    match kind {
        SourceEventKind::Chat => NormalizedEvent::Chat(ChatEvent {
            user: extract_user(
                fields,
                &[&["user", "secUid"], &["user", "userId"], &["userId"]],
                &[&["user", "uniqueId"], &["uniqueId"]],
                &[&["user", "nickname"], &["nickname"]],
                &[&["user", "profilePictureUrl"]],
            ),
            text: first_string(fields, &[&["comment"], &["text"]]),
            ts,
        }),
        SourceEventKind::Gift => NormalizedEvent::Gift(GiftEvent {
            user: extract_user(
                fields,
                &[&["user", "secUid"], &["user", "userId"]],
                &[&["user", "uniqueId"]],
                &[&["user", "nickname"]],
                &[&["user", "profilePictureUrl"]],
            ),
            value: first_positive(fields, &[&["gift", "diamond_count"], &["repeatCount"]])
                .unwrap_or(1),
            gift_name: first_string(fields, &[&["gift", "name"]]),
            ts,
        }),
        SourceEventKind::Like | SourceEventKind::Subscribe => {
            let event = UserEvent {
                user: extract_user(
                    fields,
                    &[&["userId"], &["user", "secUid"]],
                    &[&["uniqueId"], &["user", "uniqueId"]],
                    &[&["nickname"], &["user", "nickname"]],
                    &[&["profilePictureUrl"], &["user", "profilePictureUrl"]],
                ),
                ts,
            };
            if *kind == SourceEventKind::Like {
                NormalizedEvent::Like(event)
            } else {
                NormalizedEvent::Subscribed(event)
            }
        }
        _ => unknown(ts),
    }
}

fn unknown(ts: i64) -> NormalizedEvent {
    NormalizedEvent::RoomInfo(RoomInfoEvent {
        text: UNKNOWN_EVENT_TEXT.into(),
        ts,
    })
}

fn extract_user(
    fields: &Map<String, Value>,
    id_paths: &[&[&str]],
    username_paths: &[&[&str]],
    display_paths: &[&[&str]],
    avatar_paths: &[&[&str]],
) -> EventUser {
    let raw_username = first_string(fields, username_paths);
    let username = prefixed_username(&raw_username);
    let mut user_id = first_string(fields, id_paths);
    if user_id.is_empty() {
        user_id = username.clone();
    }

    EventUser {
        user_id,
        username,
        display_name: first_string(fields, display_paths),
        avatar_url: first_string(fields, avatar_paths),
    }
}

fn prefixed_username(raw: &str) -> String {
    let name = raw.trim_start_matches('@');
    if name.is_empty() {
        format!("@{UNKNOWN_USERNAME}")
    } else {
        format!("@{name}")
    }
}

fn lookup<'a>(fields: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(fields.get(*first)?, |value, key| value.get(*key))
}

/// First non-empty value among `paths`, stringifying numbers.
fn first_string(fields: &Map<String, Value>, paths: &[&[&str]]) -> String {
    paths
        .iter()
        .find_map(|path| match lookup(fields, path)? {
            Value::String(text) if !text.is_empty() => Some(text.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .unwrap_or_default()
}

/// First strictly positive integer among `paths`, accepting numeric strings.
fn first_positive(fields: &Map<String, Value>, paths: &[&[&str]]) -> Option<u64> {
    paths
        .iter()
        .filter_map(|path| match lookup(fields, path)? {
            Value::Number(number) => number
                .as_u64()
                .or_else(|| number.as_f64().filter(|v| *v >= 1.0).map(|v| v as u64)),
            Value::String(text) => text.trim().parse::<u64>().ok(),
            _ => None,
        })
        .find(|value| *value >= 1)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn username_of(event: &NormalizedEvent) -> &str {
        &event.user().expect("user event").username
    }

    #[test]
    fn chat_prefers_nested_user_fields() {
        let event = normalize(
            &SourceEventKind::Chat,
            &json!({
                "user": { "secUid": "sec-1", "uniqueId": "nova", "nickname": "Nova",
                          "profilePictureUrl": "http://img" },
                "uniqueId": "ignored",
                "comment": "!battle Sandstorm",
                "text": "ignored too",
            }),
        );

        match event {
            NormalizedEvent::Chat(chat) => {
                assert_eq!(chat.user.user_id, "sec-1");
                assert_eq!(chat.user.username, "@nova");
                assert_eq!(chat.user.display_name, "Nova");
                assert_eq!(chat.user.avatar_url, "http://img");
                assert_eq!(chat.text, "!battle Sandstorm");
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn chat_falls_back_to_flat_fields_and_numeric_ids() {
        let event = normalize(
            &SourceEventKind::Chat,
            &json!({ "userId": 12345, "uniqueId": "kai", "nickname": "K", "text": "b" }),
        );
        match event {
            NormalizedEvent::Chat(chat) => {
                assert_eq!(chat.user.user_id, "12345");
                assert_eq!(chat.user.username, "@kai");
                assert_eq!(chat.text, "b");
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn missing_user_id_falls_back_to_username() {
        let event = normalize(&SourceEventKind::Like, &json!({ "uniqueId": "@zen" }));
        let user = event.user().unwrap();
        assert_eq!(user.username, "@zen");
        assert_eq!(user.user_id, "@zen");
    }

    #[test]
    fn gift_value_priority_and_default() {
        let with_diamonds = normalize(
            &SourceEventKind::Gift,
            &json!({ "user": { "uniqueId": "a" }, "gift": { "diamond_count": 20, "name": "Lion" },
                     "repeatCount": 3 }),
        );
        let with_repeat = normalize(&SourceEventKind::Gift, &json!({ "repeatCount": "3" }));
        let with_nothing = normalize(
            &SourceEventKind::Gift,
            &json!({ "gift": { "diamond_count": 0 } }),
        );

        let values: Vec<u64> = [with_diamonds, with_repeat, with_nothing]
            .into_iter()
            .map(|event| match event {
                NormalizedEvent::Gift(gift) => gift.value,
                other => panic!("expected gift, got {other:?}"),
            })
            .collect();
        assert_eq!(values, vec![20, 3, 1]);
    }

    #[test]
    fn every_known_kind_yields_prefixed_username() {
        let payloads = [
            json!({}),
            json!({ "user": null }),
            json!({ "user": { "uniqueId": 7 } }),
            json!({ "uniqueId": "" , "nickname": ["odd"] }),
        ];
        let kinds = [
            SourceEventKind::Chat,
            SourceEventKind::Gift,
            SourceEventKind::Like,
            SourceEventKind::Subscribe,
        ];
        for kind in &kinds {
            for payload in &payloads {
                let event = normalize(kind, payload);
                assert!(username_of(&event).starts_with('@'), "{kind:?} {payload}");
            }
        }
    }

    #[test]
    fn unknown_kinds_and_malformed_payloads_become_room_info() {
        for (kind, payload) in [
            (SourceEventKind::Other("roomUser".into()), json!({})),
            (SourceEventKind::Connected, json!({})),
            (SourceEventKind::Chat, json!("not an object")),
            (SourceEventKind::Gift, Value::Null),
        ] {
            match normalize(&kind, &payload) {
                NormalizedEvent::RoomInfo(info) => assert_eq!(info.text, UNKNOWN_EVENT_TEXT),
                other => panic!("expected room info, got {other:?}"),
            }
        }
    }

    #[test]
    fn subscribe_maps_to_subscribed() {
        let event = normalize(&SourceEventKind::Subscribe, &json!({ "uniqueId": "luna" }));
        assert_eq!(event.kind(), "subscribed");
    }
}
