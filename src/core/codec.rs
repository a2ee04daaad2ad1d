//! Persistence codec for the timeline as a JSON project document.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::timeline::{IntegrityIssue, Timeline, TimelineError};
use crate::schema::asset::AssetRegistry;
use crate::schema::character::Character;
use crate::schema::event::{EventId, StoryEvent};

/// Name of the directory, next to the project file, that holds autosaves.
pub const AUTOSAVE_DIR: &str = "autosave";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("project file not found: {0}")]
    Missing(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    events: &'a IndexMap<EventId, StoryEvent>,
    head_event_id: &'a Option<EventId>,
    active_branch_id: &'a Option<EventId>,
    characters: &'a IndexMap<String, Character>,
    assets: &'a AssetRegistry,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    retired_event_ids: Vec<&'a EventId>,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    events: IndexMap<EventId, StoryEvent>,
    #[serde(default)]
    head_event_id: Option<EventId>,
    #[serde(default)]
    active_branch_id: Option<EventId>,
    #[serde(default)]
    characters: IndexMap<String, Character>,
    #[serde(default)]
    assets: AssetRegistry,
    #[serde(default)]
    retired_event_ids: Vec<EventId>,
}

/// Render a timeline as a pretty-printed project document.
pub fn to_json(timeline: &Timeline) -> Result<String, PersistenceError> {
    let mut retired: Vec<&EventId> = timeline.retired.iter().collect();
    retired.sort();
    let document = DocumentRef {
        events: &timeline.events,
        head_event_id: &timeline.head_id,
        active_branch_id: &timeline.active_branch_id,
        characters: &timeline.characters,
        assets: &timeline.assets,
        retired_event_ids: retired,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Rebuild a timeline from a project document.
///
/// Stored links are taken as-is; nothing is recomputed or repaired.
pub fn from_json(input: &str) -> Result<Timeline, PersistenceError> {
    let document: Document = serde_json::from_str(input)?;
    let sequence = (document.events.len() + document.retired_event_ids.len()) as u64;
    let mut timeline = Timeline::new();
    timeline.events = document.events;
    timeline.head_id = document.head_event_id;
    timeline.active_branch_id = document.active_branch_id;
    timeline.characters = document.characters;
    timeline.assets = document.assets;
    timeline.retired = document.retired_event_ids.into_iter().collect();
    timeline.sequence = sequence;
    Ok(timeline)
}

/// Write the timeline to `destination`, replacing it atomically.
///
/// Clears the dirty flag only when the write succeeds.
pub fn save(timeline: &mut Timeline, destination: &Path) -> Result<(), PersistenceError> {
    let rendered = to_json(timeline)?;
    let directory = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = tempfile::NamedTempFile::new_in(directory)?;
    staged.write_all(rendered.as_bytes())?;
    staged.as_file().sync_all()?;
    staged.persist(destination).map_err(|e| e.error)?;

    timeline.mark_saved();
    info!(path = %destination.display(), events = timeline.len(), "saved timeline");
    Ok(())
}

/// The result of loading a project. Loading never fails outright.
#[derive(Debug)]
pub enum LoadOutcome {
    /// The document loaded and the graph is consistent.
    Restored(Timeline),
    /// The document loaded, but its graph breaks invariants. It is returned
    /// unrepaired.
    Suspect {
        timeline: Timeline,
        issues: Vec<IntegrityIssue>,
    },
    /// The document could not be read; an empty timeline stands in.
    Defaulted {
        timeline: Timeline,
        diagnostic: PersistenceError,
    },
}

impl LoadOutcome {
    pub fn timeline(&self) -> &Timeline {
        match self {
            Self::Restored(timeline)
            | Self::Suspect { timeline, .. }
            | Self::Defaulted { timeline, .. } => timeline,
        }
    }

    pub fn into_timeline(self) -> Timeline {
        match self {
            Self::Restored(timeline)
            | Self::Suspect { timeline, .. }
            | Self::Defaulted { timeline, .. } => timeline,
        }
    }

    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored(_))
    }

    /// A message for the author, when there is something to report.
    pub fn diagnostic(&self) -> Option<String> {
        match self {
            Self::Restored(_) => None,
            Self::Suspect { issues, .. } => Some(TimelineError::Corrupt(issues.clone()).to_string()),
            Self::Defaulted { diagnostic, .. } => Some(diagnostic.to_string()),
        }
    }
}

/// Load a project file.
///
/// A missing or unreadable file yields a fresh empty timeline plus a
/// diagnostic.
pub fn load(source: &Path) -> LoadOutcome {
    let contents = match std::fs::read_to_string(source) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %source.display(), "no project file, starting fresh");
            return LoadOutcome::Defaulted {
                timeline: Timeline::new(),
                diagnostic: PersistenceError::Missing(source.to_path_buf()),
            };
        }
        Err(e) => return defaulted(source, e.into()),
    };

    let timeline = match from_json(&contents) {
        Ok(timeline) => timeline,
        Err(e) => return defaulted(source, e),
    };

    let issues = timeline.validate();
    if issues.is_empty() {
        info!(path = %source.display(), events = timeline.len(), "loaded timeline");
        LoadOutcome::Restored(timeline)
    } else {
        for issue in &issues {
            warn!(path = %source.display(), %issue, "integrity problem");
        }
        LoadOutcome::Suspect { timeline, issues }
    }
}

fn defaulted(source: &Path, diagnostic: PersistenceError) -> LoadOutcome {
    warn!(path = %source.display(), error = %diagnostic, "could not load timeline, starting fresh");
    LoadOutcome::Defaulted {
        timeline: Timeline::new(),
        diagnostic,
    }
}

/// Path of the autosave copy of `project` taken at `now`.
pub fn autosave_path(project: &Path, now: NaiveDateTime) -> PathBuf {
    let directory = project.parent().unwrap_or_else(|| Path::new("")).join(AUTOSAVE_DIR);
    let stem = project
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());
    let extension = project
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    directory.join(format!("{stem}_autosave_{}{extension}", now.format("%Y%m%d_%H%M%S")))
}

/// Write a timestamped autosave copy, then the project file itself.
///
/// Does nothing for a clean timeline. Returns the autosave path when a save
/// happened.
pub fn autosave(
    timeline: &mut Timeline,
    project: &Path,
    now: NaiveDateTime,
) -> Result<Option<PathBuf>, PersistenceError> {
    if !timeline.is_dirty() {
        return Ok(None);
    }
    let copy = autosave_path(project, now);
    if let Some(directory) = copy.parent() {
        std::fs::create_dir_all(directory)?;
    }
    save(timeline, &copy)?;
    // The copy cleared the flag; keep it set until the project file is written.
    timeline.mark_dirty();
    save(timeline, project)?;
    Ok(Some(copy))
}
