//! Character profiles kept beside the event graph.

use serde::{Deserialize, Serialize};

/// A character profile in the timeline's side-table.
///
/// Profiles are not part of the event graph; they are handed to the
/// generator as read-only context.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Character {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Any extra profile fields, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            extra: serde_json::Map::new(),
        }
    }
}
