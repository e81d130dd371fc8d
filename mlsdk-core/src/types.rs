//! Core domain types for mlsdk
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | A bounded period of tracking for one user/device, bracketed by start/end |
//! | **Conversation** | A sub-period within a Session, typically one exchange with an assistant |
//! | **Turn** | One user utterance and the assistant's reply inside a Conversation |
//! | **Outcome** | The normalized result of one delivery attempt |
//!
//! Property and attribute maps are flat: keys are strings and values are
//! restricted to string, bool, integer and float. Nested structures never
//! reach the wire, and null values are dropped rather than transmitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Maximum length of an event name, in characters
pub const MAX_EVENT_NAME_LEN: usize = 100;

// ============================================
// Properties
// ============================================

/// A scalar property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<u32> for PropertyValue {
    fn from(value: u32) -> Self {
        PropertyValue::Int(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl TryFrom<serde_json::Value> for PropertyValue {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Bool(b) => Ok(PropertyValue::Bool(b)),
            serde_json::Value::String(s) => Ok(PropertyValue::String(s)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PropertyValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(PropertyValue::Float(f))
                } else {
                    Err(Error::InvalidEvent(format!("unrepresentable number {}", n)))
                }
            }
            serde_json::Value::Null => Err(Error::InvalidEvent(
                "property values cannot be null".to_string(),
            )),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(Error::InvalidEvent(
                "property values must be string, bool, int or float".to_string(),
            )),
        }
    }
}

/// Flat mapping of string keys to scalar values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

/// Session attributes share the shape of event properties
pub type Attributes = Properties;

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overlay `other` onto `self`; keys in `other` win
    pub fn merge(&mut self, other: Properties) {
        self.0.extend(other.0);
    }

    /// Reject values that can't be represented on the wire
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.0 {
            if let PropertyValue::Float(f) = value {
                if !f.is_finite() {
                    return Err(Error::InvalidEvent(format!(
                        "property {:?} must be a finite number",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<PropertyValue>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Converts an arbitrary JSON object, dropping nulls and rejecting nesting
impl TryFrom<serde_json::Value> for Properties {
    type Error = Error;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        let object = match value {
            serde_json::Value::Object(object) => object,
            serde_json::Value::Null => return Ok(Properties::new()),
            other => {
                return Err(Error::InvalidEvent(format!(
                    "properties must be a JSON object, got {}",
                    other
                )))
            }
        };

        let mut properties = Properties::new();
        for (key, value) in object {
            if value.is_null() {
                continue;
            }
            let value = PropertyValue::try_from(value)
                .map_err(|e| Error::InvalidEvent(format!("property {:?}: {}", key, e)))?;
            properties.insert(key, value);
        }
        Ok(properties)
    }
}

// ============================================
// Tracked events
// ============================================

/// A user-defined event to record in a session
#[derive(Debug, Clone, Default)]
pub struct TrackEvent {
    /// Event name, 1 to 100 characters
    pub event: String,
    pub properties: Properties,
    /// Caller-supplied timestamp; captured at enqueue time when absent
    pub timestamp: Option<DateTime<Utc>>,
    /// Explicit conversation; defaults to the session's open conversation
    pub conversation_id: Option<String>,
}

impl TrackEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key, value);
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties.merge(properties);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Check the event name and property values
    pub fn validate(&self) -> Result<()> {
        validate_event_name(&self.event)?;
        self.properties.validate()
    }
}

/// Event names must be between 1 and [`MAX_EVENT_NAME_LEN`] characters
pub fn validate_event_name(event: &str) -> Result<()> {
    let len = event.chars().count();
    if len == 0 {
        return Err(Error::InvalidEvent("event name is required".to_string()));
    }
    if len > MAX_EVENT_NAME_LEN {
        return Err(Error::InvalidEvent(format!(
            "event name is {} characters, maximum is {}",
            len, MAX_EVENT_NAME_LEN
        )));
    }
    Ok(())
}

// ============================================
// Turns and usage
// ============================================

/// Token counts reported by a model for one exchange
#[derive(Debug, Clone, PartialEq)]
pub struct TokenUsage {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Cost of a conversation exchange
#[derive(Debug, Clone, PartialEq)]
pub enum Cost {
    /// Token counts; the backend prices them per model
    Tokens(TokenUsage),
    /// A precomputed monetary amount
    Amount(f64),
}

impl Cost {
    fn write_properties(&self, properties: &mut Properties) {
        match self {
            Cost::Tokens(usage) => {
                properties.insert("model", usage.model.clone());
                properties.insert("prompt_tokens", clamp_count(usage.prompt_tokens));
                properties.insert("completion_tokens", clamp_count(usage.completion_tokens));
            }
            Cost::Amount(amount) => {
                properties.insert("cost", *amount);
            }
        }
    }
}

fn clamp_count(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Property keys a [`Turn`] fills in itself
///
/// Extra properties on a turn may not use them.
pub const TURN_RESERVED_KEYS: [&str; 7] = [
    "user",
    "assistant",
    "assistant_id",
    "model",
    "prompt_tokens",
    "completion_tokens",
    "cost",
];

/// One user/assistant exchange inside a conversation
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
    pub assistant_id: Option<String>,
    pub usage: Option<Cost>,
    pub properties: Properties,
    pub timestamp: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
}

impl Turn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
            ..Default::default()
        }
    }

    pub fn with_usage(mut self, usage: Cost) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn with_assistant_id(mut self, assistant_id: impl Into<String>) -> Self {
        self.assistant_id = Some(assistant_id.into());
        self
    }

    /// Extra property sent with the turn; see [`TURN_RESERVED_KEYS`]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Flatten into the property map sent with the turn event
    ///
    /// Fails if an extra property uses a reserved key.
    pub(crate) fn into_properties(self) -> Result<Properties> {
        if let Some(key) = TURN_RESERVED_KEYS
            .iter()
            .find(|key| self.properties.contains_key(key))
        {
            return Err(Error::InvalidEvent(format!(
                "turn property {:?} is reserved",
                key
            )));
        }

        let mut properties = self.properties;
        properties.insert("user", self.user);
        properties.insert("assistant", self.assistant);
        if let Some(assistant_id) = self.assistant_id {
            properties.insert("assistant_id", assistant_id);
        }
        if let Some(usage) = &self.usage {
            usage.write_properties(&mut properties);
        }
        Ok(properties)
    }
}

/// Standalone usage report for a conversation
#[derive(Debug, Clone)]
pub struct Usage {
    pub cost: Cost,
    pub timestamp: Option<DateTime<Utc>>,
    pub conversation_id: Option<String>,
}

impl Usage {
    pub fn new(cost: Cost) -> Self {
        Self {
            cost,
            timestamp: None,
            conversation_id: None,
        }
    }

    pub(crate) fn to_properties(&self) -> Properties {
        let mut properties = Properties::new();
        self.cost.write_properties(&mut properties);
        properties
    }
}

// ============================================
// Delivery outcomes
// ============================================

/// Normalized result of one delivery attempt
///
/// A 200 response body is deserialized straight into this shape, so every
/// field has a default that reads as success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    #[serde(default)]
    pub errored: bool,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub message: String,
}

fn default_status() -> u16 {
    200
}

impl DeliveryOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            errored: false,
            status: 200,
            message: message.into(),
        }
    }

    /// Non-200 response, formatted as `Error: <status> - <body>`
    pub fn http_error(status: u16, body: &str) -> Self {
        Self {
            errored: true,
            status,
            message: format!("Error: {} - {}", status, body),
        }
    }

    /// Failure before any HTTP status was received
    pub fn request_failed(reason: impl std::fmt::Display) -> Self {
        Self {
            errored: true,
            status: 0,
            message: format!("Error: request failed - {}", reason),
        }
    }
}
