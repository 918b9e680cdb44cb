//! Wire decoder for push-endpoint frames.
//!
//! The platform has shipped several field-naming schemes for the same
//! message over time. Each logical field is therefore looked up through a
//! fixed, prioritized list of candidate paths and the first non-null hit
//! wins. Typed messages with missing fields fall back to defaults instead of
//! failing; unknown message types are ignored.

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use livefeed_ipc::{
    ChatEvent, DomainEvent, GiftEvent, LikeEvent, MemberEvent, QuestionEvent, RoomUserEvent,
    SocialEvent, StreamEndEvent, SubscribeEvent, UserInfo, CONTROL_ACTION_STREAM_ENDED,
};

/// Why a frame produced no event. Never surfaced past the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeIgnorable {
    #[error("payload is not JSON")]
    NotJson,

    #[error("message has no type tag")]
    MissingType,

    #[error("unhandled message type: {0}")]
    UnknownType(String),

    #[error("streak gift still in progress")]
    PendingStreak,
}

const TYPE_KEYS: &[&str] = &["type", "msgType", "msg_type", "method", "event"];
const BODY_KEYS: &[&str] = &["data", "payload"];
const USER_OBJECT_KEYS: &[&str] = &["user", "common.user", "userInfo", "user_info"];

const USER_ID_KEYS: &[&str] = &["userId", "user_id", "id", "idStr", "id_str"];
const FLAT_USER_ID_KEYS: &[&str] = &["userId", "user_id"];
const UNIQUE_ID_KEYS: &[&str] = &["uniqueId", "unique_id", "displayId", "display_id"];
const NICKNAME_KEYS: &[&str] = &["nickname", "nickName", "nick_name"];
const PICTURE_KEYS: &[&str] = &[
    "profilePictureUrl",
    "profile_picture_url",
    "avatarThumb.urlList.0",
    "avatar_thumb.url_list.0",
    "profilePicture.urls.0",
];

const COMMENT_KEYS: &[&str] = &["comment", "content", "text"];

const GIFT_ID_KEYS: &[&str] = &["giftId", "gift_id", "gift.id", "giftDetails.id"];
const GIFT_NAME_KEYS: &[&str] = &[
    "giftName",
    "gift_name",
    "gift.name",
    "giftDetails.giftName",
    "giftDetails.name",
];
const DIAMOND_KEYS: &[&str] = &[
    "diamondCount",
    "diamond_count",
    "diamondValue",
    "diamond_value",
    "gift.diamondCount",
    "gift.diamond_count",
    "giftDetails.diamondCount",
];
const REPEAT_COUNT_KEYS: &[&str] = &["repeatCount", "repeat_count", "comboCount", "combo_count"];
const REPEAT_END_KEYS: &[&str] = &["repeatEnd", "repeat_end", "repeatIsFinal", "repeat_is_final"];
const GIFT_TYPE_KEYS: &[&str] = &["giftType", "gift_type", "gift.type", "giftDetails.giftType"];

const LIKE_COUNT_KEYS: &[&str] = &["likeCount", "like_count", "count"];
const TOTAL_LIKE_KEYS: &[&str] = &["totalLikeCount", "total_like_count", "totalLikes", "total"];

const DISPLAY_TYPE_KEYS: &[&str] = &[
    "displayType",
    "display_type",
    "common.displayText.displayType",
];
const ACTION_KEYS: &[&str] = &["action", "controlAction", "control_action"];

const SUB_MONTH_KEYS: &[&str] = &["subMonth", "sub_month", "months"];
const QUESTION_KEYS: &[&str] = &[
    "questionText",
    "question_text",
    "question",
    "details.content",
    "content",
];
const VIEWER_KEYS: &[&str] = &["viewerCount", "viewer_count", "totalUser", "total_user", "total"];

/// Social action codes used when no display type is present.
const SOCIAL_ACTION_FOLLOW: u64 = 1;
const SOCIAL_ACTION_SHARE: u64 = 3;

/// Decode one text frame. A frame may carry a single message or an
/// envelope `{ "messages": [...] }`; ignored messages are dropped.
pub fn decode_frame(text: &str) -> Vec<DomainEvent> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => decode_value(&value),
        Err(_) => {
            trace!(reason = %DecodeIgnorable::NotJson, "ignoring frame");
            Vec::new()
        }
    }
}

/// Decode one binary frame. Only JSON payloads are understood.
pub fn decode_binary(bytes: &[u8]) -> Vec<DomainEvent> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value) => decode_value(&value),
        Err(_) => {
            trace!(len = bytes.len(), reason = %DecodeIgnorable::NotJson, "ignoring binary frame");
            Vec::new()
        }
    }
}

fn decode_value(value: &Value) -> Vec<DomainEvent> {
    let messages: Vec<&Value> = match value.get("messages").and_then(Value::as_array) {
        Some(list) => list.iter().collect(),
        None => vec![value],
    };

    messages
        .into_iter()
        .filter_map(|message| match decode(message) {
            Ok(event) => Some(event),
            Err(reason) => {
                trace!(%reason, "ignoring message");
                None
            }
        })
        .collect()
}

/// Decode one message into a domain event.
pub fn decode(message: &Value) -> Result<DomainEvent, DecodeIgnorable> {
    if !message.is_object() {
        return Err(DecodeIgnorable::NotJson);
    }

    let tag = first_string(message, TYPE_KEYS).ok_or(DecodeIgnorable::MissingType)?;
    let body = BODY_KEYS
        .iter()
        .find_map(|key| message.get(*key).filter(|v| v.is_object()))
        .unwrap_or(message);

    match canonical_tag(&tag).as_str() {
        "chat" => Ok(DomainEvent::Chat(ChatEvent {
            user: extract_user(body),
            comment: first_string(body, COMMENT_KEYS).unwrap_or_default(),
        })),
        "gift" => decode_gift(body),
        "like" => Ok(DomainEvent::Like(LikeEvent {
            user: extract_user(body),
            like_count: first_u64(body, LIKE_COUNT_KEYS).unwrap_or(1),
            total_like_count: first_u64(body, TOTAL_LIKE_KEYS),
        })),
        "member" => Ok(DomainEvent::Member(MemberEvent {
            user: extract_user(body),
        })),
        "follow" => Ok(DomainEvent::Follow(SocialEvent {
            user: extract_user(body),
        })),
        "share" => Ok(DomainEvent::Share(SocialEvent {
            user: extract_user(body),
        })),
        "social" => decode_social(body, &tag),
        "subscribe" | "subnotify" => Ok(DomainEvent::Subscribe(SubscribeEvent {
            user: extract_user(body),
            sub_month: first_u32(body, SUB_MONTH_KEYS).unwrap_or(1),
        })),
        "question" | "questionnew" => Ok(DomainEvent::Question(QuestionEvent {
            user: extract_user(body),
            question: first_string(body, QUESTION_KEYS).unwrap_or_default(),
        })),
        "roomuser" | "roomuserseq" => Ok(DomainEvent::RoomUser(RoomUserEvent {
            viewer_count: first_u64(body, VIEWER_KEYS).unwrap_or(0),
        })),
        "streamend" => Ok(DomainEvent::StreamEnd(StreamEndEvent {
            action: first_u32(body, ACTION_KEYS).unwrap_or(CONTROL_ACTION_STREAM_ENDED),
        })),
        "control" => Ok(DomainEvent::StreamEnd(StreamEndEvent {
            action: first_u32(body, ACTION_KEYS).unwrap_or(0),
        })),
        _ => Err(DecodeIgnorable::UnknownType(tag)),
    }
}

fn decode_gift(body: &Value) -> Result<DomainEvent, DecodeIgnorable> {
    let gift = GiftEvent {
        user: extract_user(body),
        gift_id: first_u64(body, GIFT_ID_KEYS).unwrap_or(0),
        gift_name: first_string(body, GIFT_NAME_KEYS).unwrap_or_default(),
        diamond_value: first_u64(body, DIAMOND_KEYS).unwrap_or(0),
        repeat_count: first_u64(body, REPEAT_COUNT_KEYS).unwrap_or(1),
        repeat_is_final: first_bool(body, REPEAT_END_KEYS).unwrap_or(true),
        gift_type: first_u32(body, GIFT_TYPE_KEYS).unwrap_or(0),
    };

    if gift.is_pending_streak() {
        return Err(DecodeIgnorable::PendingStreak);
    }

    Ok(DomainEvent::Gift(gift))
}

fn decode_social(body: &Value, tag: &str) -> Result<DomainEvent, DecodeIgnorable> {
    let user = extract_user(body);

    if let Some(display) = first_string(body, DISPLAY_TYPE_KEYS) {
        let display = display.to_ascii_lowercase();
        if display.contains("follow") {
            return Ok(DomainEvent::Follow(SocialEvent { user }));
        }
        if display.contains("share") {
            return Ok(DomainEvent::Share(SocialEvent { user }));
        }
    }

    match first_u64(body, ACTION_KEYS) {
        Some(SOCIAL_ACTION_FOLLOW) => Ok(DomainEvent::Follow(SocialEvent { user })),
        Some(SOCIAL_ACTION_SHARE) => Ok(DomainEvent::Share(SocialEvent { user })),
        _ => Err(DecodeIgnorable::UnknownType(tag.to_string())),
    }
}

/// `WebcastChatMessage`, `chat` and `Chat` all become `chat`.
fn canonical_tag(tag: &str) -> String {
    let lower = tag.to_ascii_lowercase();
    let trimmed = lower.strip_prefix("webcast").unwrap_or(lower.as_str());
    let trimmed = trimmed.strip_suffix("message").unwrap_or(trimmed);
    trimmed.replace(['_', '-'], "")
}

fn extract_user(body: &Value) -> UserInfo {
    match first(body, USER_OBJECT_KEYS).filter(|v| v.is_object()) {
        Some(user) => UserInfo {
            user_id: first_string(user, USER_ID_KEYS).unwrap_or_default(),
            unique_id: first_string(user, UNIQUE_ID_KEYS).unwrap_or_default(),
            nickname: first_string(user, NICKNAME_KEYS).unwrap_or_default(),
            profile_picture_url: first_string(user, PICTURE_KEYS),
        },
        None => UserInfo {
            user_id: first_string(body, FLAT_USER_ID_KEYS).unwrap_or_default(),
            unique_id: first_string(body, UNIQUE_ID_KEYS).unwrap_or_default(),
            nickname: first_string(body, NICKNAME_KEYS).unwrap_or_default(),
            profile_picture_url: first_string(body, PICTURE_KEYS),
        },
    }
}

/// Resolve a dotted path; numeric segments index into arrays.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => current.get(segment)?,
        };
    }
    (!current.is_null()).then_some(current)
}

fn first<'a>(value: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    candidates.iter().find_map(|path| lookup(value, path))
}

fn first_string(value: &Value, candidates: &[&str]) -> Option<String> {
    candidates.iter().find_map(|path| match lookup(value, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn first_u64(value: &Value, candidates: &[&str]) -> Option<u64> {
    candidates.iter().find_map(|path| match lookup(value, path)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Out-of-range values count as missing.
fn first_u32(value: &Value, candidates: &[&str]) -> Option<u32> {
    first_u64(value, candidates).and_then(|n| u32::try_from(n).ok())
}

fn first_bool(value: &Value, candidates: &[&str]) -> Option<bool> {
    candidates.iter().find_map(|path| match lookup(value, path)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|n| n != 0),
        Value::String(s) => livefeed_ipc::parse_bool(s),
        _ => None,
    })
}
