//! Wire messages exchanged with the analytics backend
//!
//! Every lifecycle step and tracked event becomes one [`WireMessage`]. The
//! backend knows three envelope types: `start_session`, `end_session` and
//! `track`. Conversation boundaries travel as `track` envelopes carrying a
//! reserved event name, so they are distinct variants here but share the
//! `track` shape on the wire.
//!
//! Serialization goes through a single exhaustive match in
//! [`WireMessage::envelope`]; adding a variant fails to compile until its wire
//! shape is decided.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::types::{Attributes, Properties};

/// Reserved event name for conversation start
pub const CONVERSATION_STARTED_EVENT: &str = "Conversation Started";

/// Reserved event name for conversation end
pub const CONVERSATION_ENDED_EVENT: &str = "Conversation Ended";

/// Reserved event name for a user/assistant turn
pub const CONVERSATION_TURN_EVENT: &str = "Conversation Turn";

/// Reserved event name for a usage report
pub const CONVERSATION_USAGE_EVENT: &str = "Conversation Usage";

/// Session lifecycle payload (start and end)
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub attributes: Attributes,
}

/// Conversation lifecycle payload (start and end)
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationMessage {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub conversation_id: String,
    pub properties: Properties,
}

/// Generic tracked event
#[derive(Debug, Clone, PartialEq)]
pub struct TrackMessage {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub event: String,
    pub properties: Properties,
}

/// Envelope sent to `POST /bc/v1/events/event`
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    StartSession(SessionMessage),
    EndSession(SessionMessage),
    StartConversation(ConversationMessage),
    EndConversation(ConversationMessage),
    Track(TrackMessage),
}

/// Flat JSON shape of every envelope
#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a Attributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<&'a Properties>,
}

/// UTC ISO-8601 with microseconds and an explicit `+00:00` offset
fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

impl WireMessage {
    /// Wire `type` discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::StartSession(_) => "start_session",
            WireMessage::EndSession(_) => "end_session",
            WireMessage::StartConversation(_)
            | WireMessage::EndConversation(_)
            | WireMessage::Track(_) => "track",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            WireMessage::StartSession(m) | WireMessage::EndSession(m) => &m.session_id,
            WireMessage::StartConversation(m) | WireMessage::EndConversation(m) => &m.session_id,
            WireMessage::Track(m) => &m.session_id,
        }
    }

    /// Event name carried by `track` envelopes
    pub fn event(&self) -> Option<&str> {
        match self {
            WireMessage::StartSession(_) | WireMessage::EndSession(_) => None,
            WireMessage::StartConversation(_) => Some(CONVERSATION_STARTED_EVENT),
            WireMessage::EndConversation(_) => Some(CONVERSATION_ENDED_EVENT),
            WireMessage::Track(m) => Some(&m.event),
        }
    }

    fn envelope(&self) -> Envelope<'_> {
        match self {
            WireMessage::StartSession(m) | WireMessage::EndSession(m) => Envelope {
                kind: self.kind(),
                timestamp: format_timestamp(&m.timestamp),
                session_id: &m.session_id,
                conversation_id: None,
                event: None,
                attributes: Some(&m.attributes),
                properties: None,
            },
            WireMessage::StartConversation(m) | WireMessage::EndConversation(m) => Envelope {
                kind: self.kind(),
                timestamp: format_timestamp(&m.timestamp),
                session_id: &m.session_id,
                conversation_id: Some(&m.conversation_id),
                event: self.event(),
                attributes: None,
                properties: Some(&m.properties),
            },
            WireMessage::Track(m) => Envelope {
                kind: self.kind(),
                timestamp: format_timestamp(&m.timestamp),
                session_id: &m.session_id,
                conversation_id: m.conversation_id.as_deref(),
                event: Some(&m.event),
                attributes: None,
                properties: Some(&m.properties),
            },
        }
    }

    /// Serialize to the JSON value placed on the delivery queue
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl Serialize for WireMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.envelope().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_start_session_shape() {
        let msg = WireMessage::StartSession(SessionMessage {
            timestamp: ts(),
            session_id: "s-1".to_string(),
            attributes: Attributes::new().with("user_id", "u-1"),
        });

        assert_eq!(
            msg.to_value().unwrap(),
            json!({
                "type": "start_session",
                "timestamp": "2025-01-02T03:04:05.000000+00:00",
                "session_id": "s-1",
                "attributes": {"user_id": "u-1"},
            })
        );
    }

    #[test]
    fn test_end_session_shape() {
        let msg = WireMessage::EndSession(SessionMessage {
            timestamp: ts(),
            session_id: "s-1".to_string(),
            attributes: Attributes::new(),
        });

        let value = msg.to_value().unwrap();
        assert_eq!(value["type"], "end_session");
        assert_eq!(value["attributes"], json!({}));
        assert!(value.get("event").is_none());
    }

    #[test]
    fn test_conversation_messages_are_track_events() {
        let start = WireMessage::StartConversation(ConversationMessage {
            timestamp: ts(),
            session_id: "s-1".to_string(),
            conversation_id: "c-1".to_string(),
            properties: Properties::new(),
        });
        let value = start.to_value().unwrap();
        assert_eq!(value["type"], "track");
        assert_eq!(value["event"], CONVERSATION_STARTED_EVENT);
        assert_eq!(value["conversation_id"], "c-1");

        let end = WireMessage::EndConversation(ConversationMessage {
            timestamp: ts(),
            session_id: "s-1".to_string(),
            conversation_id: "c-1".to_string(),
            properties: Properties::new().with("reason", "done"),
        });
        let value = end.to_value().unwrap();
        assert_eq!(value["event"], CONVERSATION_ENDED_EVENT);
        assert_eq!(value["properties"]["reason"], "done");
    }

    #[test]
    fn test_track_without_conversation_omits_field() {
        let msg = WireMessage::Track(TrackMessage {
            timestamp: ts(),
            session_id: "s-1".to_string(),
            conversation_id: None,
            event: "clicked".to_string(),
            properties: Properties::new().with("k", "v"),
        });

        let value = msg.to_value().unwrap();
        assert_eq!(value["type"], "track");
        assert_eq!(value["event"], "clicked");
        assert_eq!(value["properties"], json!({"k": "v"}));
        assert!(value.get("conversation_id").is_none());
        assert!(value.get("attributes").is_none());
    }

    #[test]
    fn test_kind_and_event_accessors() {
        let msg = WireMessage::Track(TrackMessage {
            timestamp: ts(),
            session_id: "s-9".to_string(),
            conversation_id: Some("c".to_string()),
            event: "e".to_string(),
            properties: Properties::new(),
        });
        assert_eq!(msg.kind(), "track");
        assert_eq!(msg.event(), Some("e"));
        assert_eq!(msg.session_id(), "s-9");
    }
}
