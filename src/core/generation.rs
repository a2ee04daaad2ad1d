//! Generated content: the contract with the external text generator and
//! the timeline operations that attach and remove what it produced.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::timeline::{Timeline, TimelineError, UndoReport};
use crate::schema::character::Character;
use crate::schema::event::{EventId, EventKind};

pub use crate::schema::event::GenerationRef;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GenerationError {
    #[error("generation service failed: {message}")]
    Service { message: String, raw: Option<String> },
    #[error("malformed generation response: {reason}")]
    Malformed { reason: String, raw: String },
}

impl GenerationError {
    /// The raw service output, kept for diagnosing bad model responses.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::Service { raw, .. } => raw.as_deref(),
            Self::Malformed { raw, .. } => Some(raw),
        }
    }

    fn malformed(reason: impl Into<String>, raw: &str) -> Self {
        Self::Malformed {
            reason: reason.into(),
            raw: raw.to_string(),
        }
    }
}

/// Failure to turn a generation outcome into a timeline event.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

/// A successful generator response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationEnvelope {
    pub story_text: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Everything the generator gets for one call. Context is a snapshot; the
/// generator never sees the live timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub id: GenerationRef,
    pub prompt: String,
    pub characters: Option<IndexMap<String, Character>>,
    pub world: Option<serde_json::Value>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: GenerationRef::new(),
            prompt: prompt.into(),
            characters: None,
            world: None,
        }
    }

    pub fn with_characters(mut self, characters: &IndexMap<String, Character>) -> Self {
        if !characters.is_empty() {
            self.characters = Some(characters.clone());
        }
        self
    }

    /// Attach free-text world information; blank text is ignored.
    pub fn with_world_info(mut self, text: &str) -> Self {
        let text = text.trim();
        if !text.is_empty() {
            self.world = Some(json!({ "worldview_setting": text }));
        }
        self
    }

    /// The full instruction text sent to the model.
    pub fn full_prompt(&self) -> String {
        build_prompt(&self.prompt, self.characters.as_ref(), self.world.as_ref())
    }
}

/// An external text generator. Implementations may block; callers run them
/// off the authoring thread (see [`crate::core::worker`]).
pub trait StoryGenerator: Send {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationEnvelope, GenerationError>;
}

/// Assemble the instruction text for one generation call.
pub fn build_prompt(
    prompt: &str,
    characters: Option<&IndexMap<String, Character>>,
    world: Option<&serde_json::Value>,
) -> String {
    let mut full = String::from(
        "You are the story-writing engine of a visual novel authoring tool. \
         Write the next story segment from the information below.\n",
    );

    if let Some(characters) = characters {
        if let Ok(rendered) = serde_json::to_string_pretty(characters) {
            full.push_str("\n## Characters:\n");
            full.push_str(&rendered);
            full.push('\n');
        }
    }
    if let Some(world) = world {
        if let Ok(rendered) = serde_json::to_string_pretty(world) {
            full.push_str("\n## World:\n");
            full.push_str(&rendered);
            full.push('\n');
        }
    }

    full.push_str("\n## Current prompt:\n");
    full.push_str(prompt);
    full.push('\n');
    full.push_str(
        "\nReply with JSON only, in exactly this shape, with no commentary:\n\
         ```json\n\
         {\n  \"story_text\": \"<story text>\",\n  \"suggestions\": [\"<next step>\", \"<next step>\"]\n}\n\
         ```",
    );
    full
}

/// Parse the model's message content into an envelope.
///
/// Accepts a bare JSON object or one wrapped in a fenced ```json block.
pub fn parse_response(content: &str) -> Result<GenerationEnvelope, GenerationError> {
    match serde_json::from_str::<serde_json::Value>(content.trim()) {
        Ok(value) => envelope_from(value, content),
        Err(_) => {
            let Some(block) = fenced_json(content) else {
                return Err(GenerationError::malformed("response is not JSON", content));
            };
            let value = serde_json::from_str(block)
                .map_err(|e| GenerationError::malformed(format!("fenced JSON did not parse: {e}"), content))?;
            envelope_from(value, content)
        }
    }
}

fn envelope_from(value: serde_json::Value, raw: &str) -> Result<GenerationEnvelope, GenerationError> {
    if !value.is_object() || value.get("story_text").is_none() {
        return Err(GenerationError::malformed("response has no story_text", raw));
    }
    serde_json::from_value(value)
        .map_err(|e| GenerationError::malformed(format!("unexpected response structure: {e}"), raw))
}

fn fenced_json(content: &str) -> Option<&str> {
    let (_, rest) = content.split_once("```json")?;
    let block = match rest.split_once("```") {
        Some((block, _)) => block,
        None => rest,
    };
    Some(block.trim())
}

impl Timeline {
    /// Add a generated event tagged with the request's reference.
    ///
    /// Like any added event, it becomes the head.
    pub fn attach_generation(
        &mut self,
        parent: Option<EventId>,
        request: &GenerationRequest,
        envelope: &GenerationEnvelope,
    ) -> Result<EventId, TimelineError> {
        let payload = json!({
            "prompt": request.prompt,
            "response": envelope.story_text,
            "suggestions": envelope.suggestions,
        });
        let id = self.add_event(EventKind::Generated, payload, parent, Some(request.id.clone()))?;
        debug!(event = %id, generation = %request.id, "attached generated content");
        Ok(id)
    }

    /// Apply the outcome of a generation call on the authoring thread.
    pub fn apply_generation(
        &mut self,
        request: &GenerationRequest,
        result: Result<GenerationEnvelope, GenerationError>,
        parent: Option<EventId>,
    ) -> Result<EventId, AttachError> {
        match result {
            Ok(envelope) => Ok(self.attach_generation(parent, request, &envelope)?),
            Err(e) => {
                warn!(generation = %request.id, error = %e, raw = ?e.raw(), "generation failed");
                Err(e.into())
            }
        }
    }

    /// The most recent generation on the head's ancestry, head included.
    pub fn last_generation_on_path(&self) -> Option<&GenerationRef> {
        let mut current = self.head_id.as_ref();
        for _ in 0..=self.events.len() {
            let event = self.events.get(current?)?;
            if event.kind == EventKind::Generated {
                if let Some(ref generation) = event.generation_ref {
                    return Some(generation);
                }
            }
            current = event.parent_id.as_ref();
        }
        None
    }

    /// Undo the most recent generation on the head's ancestry.
    pub fn undo_last_generation(&mut self) -> Result<UndoReport, TimelineError> {
        let generation = self
            .last_generation_on_path()
            .cloned()
            .ok_or(TimelineError::NothingToUndo)?;
        self.undo_generation(&generation)
    }
}
