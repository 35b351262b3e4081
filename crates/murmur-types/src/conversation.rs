//! Channel, vendor, and message types for the conversation store.
//!
//! These types model one bot conversation surface: the channel it happens
//! in, the AI vendor answering it, and the messages exchanged. Messages are
//! immutable once saved except for the `visible` flag, which the sliding
//! window flips one way (true -> false) and never back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// One conversation surface, identified externally by a stable platform id.
///
/// Created lazily on first interaction, never mutated, never deleted --
/// only its messages are soft-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Internal id assigned by the store.
    pub id: i64,
    /// The caller's stable identifier (e.g. a chat platform's channel id).
    pub external_id: String,
}

/// One configured AI backend: a unique name plus a model identifier string.
///
/// The model config may itself be a serialized sub-configuration; the store
/// treats it as opaque. Created once at startup from a static allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    pub id: i64,
    pub name: String,
    pub model_config: String,
}

/// An image attached to a message: a URL plus an optional inline payload.
///
/// Owned exclusively by its parent message; no independent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageImage {
    pub url: String,
    /// Optional inline base64 payload.
    pub data: Option<String>,
}

/// Kind of a stored message.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (kind IN ('prompt', 'assistant', 'behavior'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// A user request, either text or image generation.
    Prompt,
    /// A vendor reply.
    Assistant,
    /// A behavior/system instruction injected into context.
    Behavior,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Prompt => write!(f, "prompt"),
            MessageKind::Assistant => write!(f, "assistant"),
            MessageKind::Behavior => write!(f, "behavior"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "prompt" => Ok(MessageKind::Prompt),
            "assistant" => Ok(MessageKind::Assistant),
            "behavior" => Ok(MessageKind::Behavior),
            other => Err(format!("invalid message kind: '{other}'")),
        }
    }
}

/// A stored message.
///
/// `channel_id` carries the channel's EXTERNAL id, not the internal
/// `channels.id`. Message queries filter on the external id directly with
/// no join through the channel registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Internal id assigned on save.
    pub id: i64,
    /// External channel id (see struct docs).
    pub channel_id: String,
    /// Internal vendor id.
    pub vendor_id: i64,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Soft-delete / windowing marker. Flips only true -> false.
    pub visible: bool,
    /// True only for image-generation requests, which never appear in
    /// text-context windows.
    pub is_image_prompt: bool,
    pub images: Vec<MessageImage>,
}

/// Input for a save operation: a message the store has not assigned an id
/// or timestamp to yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub channel_id: String,
    pub vendor_id: i64,
    pub kind: MessageKind,
    pub content: String,
    /// Assigned `Utc::now()` at save time when None.
    pub timestamp: Option<DateTime<Utc>>,
    pub is_image_prompt: bool,
}

impl NewMessage {
    /// Build a message draft with no explicit timestamp.
    pub fn new(
        channel_id: impl Into<String>,
        vendor_id: i64,
        kind: MessageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            vendor_id,
            kind,
            content: content.into(),
            timestamp: None,
            is_image_prompt: false,
        }
    }

    /// Mark this draft as an image-generation request.
    pub fn image_prompt(mut self) -> Self {
        self.is_image_prompt = true;
        self
    }

    /// Pin the draft to an explicit timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Vendor scope for context queries: an exact vendor name or any vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorFilter {
    /// Match messages from any vendor.
    Any,
    /// Match messages whose vendor has exactly this name.
    Name(String),
}

impl VendorFilter {
    pub fn name(name: impl Into<String>) -> Self {
        VendorFilter::Name(name.into())
    }

    /// Whether a message from a vendor with this name passes the filter.
    pub fn matches(&self, vendor_name: &str) -> bool {
        match self {
            VendorFilter::Any => true,
            VendorFilter::Name(name) => name == vendor_name,
        }
    }
}
