//! Story events, the nodes of the timeline graph.

use chrono::NaiveDateTime;
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Free-form, kind-specific event content.
pub type Payload = serde_json::Value;

/// Newtype wrapper for event IDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Derive an id from the creation time, kind and content of an event.
    ///
    /// `salt` is mixed into the content digest so that identical payloads
    /// created within the same clock tick still get distinct ids.
    pub fn derive(created_at: NaiveDateTime, kind: &EventKind, payload: &Payload, salt: u64) -> Self {
        let mut hasher = FxHasher::default();
        payload.to_string().hash(&mut hasher);
        salt.hash(&mut hasher);
        Self(format!(
            "{}-{}-{:016x}",
            created_at.format("%Y%m%dT%H%M%S%.6f"),
            kind.as_str(),
            hasher.finish()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Correlation id of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationRef(pub String);

impl GenerationRef {
    /// A fresh random reference.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GenerationRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GenerationRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What kind of narrative beat an event represents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// Author-written prose.
    Text,
    /// Content returned by the external generator.
    Generated,
    /// One selectable option under a branch point.
    BranchOption,
    /// Any other tag. Build it with [`EventKind::custom`] so reserved tags
    /// come out as their named variant; a literal `Custom("text_node")`
    /// reloads as `Text`.
    Custom(String),
}

impl EventKind {
    /// The kind stored under `tag`, recognising reserved and legacy tags.
    pub fn custom(tag: impl Into<String>) -> Self {
        Self::from(tag.into())
    }

    /// Returns the tag string stored in documents (e.g., "text_node").
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text_node",
            Self::Generated => "generation",
            Self::BranchOption => "branch_option",
            Self::Custom(tag) => tag,
        }
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "text_node" | "text" => Self::Text,
            // Older project files name the generator backend in the tag.
            "generation" | "generated" | "ollama_generation" => Self::Generated,
            "branch_option" => Self::BranchOption,
            _ => Self::Custom(tag),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A labelled choice on a branch point, pointing at one of its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchOption {
    #[serde(rename = "text")]
    pub label: String,
    pub target_id: EventId,
}

/// One node in the story graph.
///
/// The id and creation time are fixed at construction. Links are stored as
/// ids and resolved through the owning timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryEvent {
    #[serde(rename = "event_id")]
    id: EventId,
    #[serde(rename = "timestamp")]
    created_at: NaiveDateTime,
    #[serde(rename = "event_type")]
    pub kind: EventKind,
    #[serde(rename = "data")]
    pub payload: Payload,
    #[serde(rename = "parent_event_id", default)]
    pub parent_id: Option<EventId>,
    #[serde(rename = "child_event_ids", default)]
    pub child_ids: Vec<EventId>,
    #[serde(rename = "ollama_request_id", default)]
    pub generation_ref: Option<GenerationRef>,
    #[serde(rename = "emotion", default)]
    pub sentiment: Option<f64>,
    #[serde(default)]
    pub is_branch_point: bool,
    #[serde(rename = "branch_choices", default)]
    pub branch_options: Vec<BranchOption>,
}

impl StoryEvent {
    pub fn new(
        id: EventId,
        created_at: NaiveDateTime,
        kind: EventKind,
        payload: Payload,
        parent_id: Option<EventId>,
        generation_ref: Option<GenerationRef>,
    ) -> Self {
        Self {
            id,
            created_at,
            kind,
            payload,
            parent_id,
            child_ids: Vec::new(),
            generation_ref,
            sentiment: None,
            is_branch_point: false,
            branch_options: Vec::new(),
        }
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }

    /// The prose carried by this event, whichever payload shape it uses.
    pub fn text(&self) -> Option<&str> {
        ["text", "response", "story_text"]
            .iter()
            .find_map(|key| self.payload.get(*key).and_then(|v| v.as_str()))
    }

    /// Encode into the structured document form.
    pub fn encode(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Decode from the structured document form.
    ///
    /// Links, sentiment and branch state are taken exactly as stored.
    pub fn decode(document: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document)
    }
}
