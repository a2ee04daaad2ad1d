//! The story timeline, owner of the event graph and its side-tables.
//!
//! Events live in a single arena keyed by id. Parent and child links are ids
//! resolved through the arena, never owning references.

use chrono::{Local, NaiveDateTime};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde_json::json;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::schema::asset::{AssetBucket, AssetCategory, AssetMetadata, AssetRegistry};
use crate::schema::character::Character;
use crate::schema::event::{BranchOption, EventId, EventKind, GenerationRef, Payload, StoryEvent};

/// Text of the root event created when an empty timeline is first shown.
pub const STORY_START_TEXT: &str = "Story start";

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("event not found: {0}")]
    EventNotFound(EventId),
    #[error("parent event not found: {0}")]
    UnknownParent(EventId),
    #[error("branch point {0} needs at least one option")]
    EmptyBranchPoint(EventId),
    #[error("no events belong to generation {0}")]
    GenerationNotFound(GenerationRef),
    #[error("no generated event on the current path")]
    NothingToUndo,
    #[error("sentiment score must be a finite number, got {0}")]
    InvalidSentiment(f64),
    #[error("invalid asset category: {0}")]
    InvalidCategory(String),
    #[error("asset not found: {category}/{id}")]
    AssetNotFound { category: AssetCategory, id: String },
    #[error("character not found: {0}")]
    CharacterNotFound(String),
    #[error("timeline is corrupt ({} issue(s))", .0.len())]
    Corrupt(Vec<IntegrityIssue>),
}

/// A structural problem found by [`Timeline::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// The arena key differs from the id stored in the event.
    KeyMismatch { key: EventId, id: EventId },
    DanglingParent { event: EventId, parent: EventId },
    /// The event names a parent that does not list it as a child.
    MissingChildLink { parent: EventId, child: EventId },
    /// The parent lists a child that is absent or points elsewhere.
    StrayChild { parent: EventId, child: EventId },
    StrayBranchTarget { event: EventId, target: EventId },
    DanglingHead(EventId),
    DanglingActiveBranch(EventId),
    Cycle(EventId),
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyMismatch { key, id } => write!(f, "event stored under {key} carries id {id}"),
            Self::DanglingParent { event, parent } => {
                write!(f, "event {event} points at missing parent {parent}")
            }
            Self::MissingChildLink { parent, child } => {
                write!(f, "parent {parent} does not list child {child}")
            }
            Self::StrayChild { parent, child } => {
                write!(f, "parent {parent} lists {child}, which is not its child")
            }
            Self::StrayBranchTarget { event, target } => {
                write!(f, "branch point {event} offers {target}, which is not its child")
            }
            Self::DanglingHead(id) => write!(f, "head points at missing event {id}"),
            Self::DanglingActiveBranch(id) => {
                write!(f, "active branch points at missing event {id}")
            }
            Self::Cycle(id) => write!(f, "parent chain through {id} loops"),
        }
    }
}

/// One option supplied to [`Timeline::create_branch_point`].
#[derive(Debug, Clone, PartialEq)]
pub struct BranchChoice {
    pub label: String,
    pub content: Payload,
}

impl BranchChoice {
    pub fn new(label: impl Into<String>, content: Payload) -> Self {
        Self {
            label: label.into(),
            content,
        }
    }

    /// A choice with no extra content.
    pub fn labelled(label: impl Into<String>) -> Self {
        Self::new(label, json!({}))
    }
}

/// Result of turning an event into a branch point.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchCreation {
    /// Newly created branch-option events, in option order.
    pub created: Vec<EventId>,
    /// Head after the call: the last created option.
    pub head: Option<EventId>,
}

/// Result of removing one generation's events.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoReport {
    /// Removed events, in creation order.
    pub removed: Vec<EventId>,
    /// Surviving events whose parent changed.
    pub reparented: Vec<EventId>,
    pub head: Option<EventId>,
}

/// The full story: event arena, cursors, and side-tables.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    pub(crate) events: IndexMap<EventId, StoryEvent>,
    pub(crate) head_id: Option<EventId>,
    pub(crate) active_branch_id: Option<EventId>,
    pub(crate) characters: IndexMap<String, Character>,
    pub(crate) assets: AssetRegistry,
    /// Ids of deleted events; never issued again.
    pub(crate) retired: FxHashSet<EventId>,
    pub(crate) sequence: u64,
    dirty: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &IndexMap<EventId, StoryEvent> {
        &self.events
    }

    pub fn get_event(&self, id: &EventId) -> Option<&StoryEvent> {
        self.events.get(id)
    }

    pub fn head_id(&self) -> Option<&EventId> {
        self.head_id.as_ref()
    }

    pub fn active_branch_id(&self) -> Option<&EventId> {
        self.active_branch_id.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when there are changes not yet written by a save.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_saved(&mut self) {
        self.dirty = false;
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn children(&self, id: &EventId) -> &[EventId] {
        self.events
            .get(id)
            .map(|e| e.child_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_branch_point(&self, id: &EventId) -> bool {
        self.events.get(id).is_some_and(|e| e.is_branch_point)
    }

    /// Options of a branch point; empty for anything else.
    pub fn branch_options(&self, id: &EventId) -> &[BranchOption] {
        match self.events.get(id) {
            Some(event) if event.is_branch_point => &event.branch_options,
            _ => &[],
        }
    }

    /// Materialize the root event of an empty timeline.
    ///
    /// Does not mark the timeline dirty. Returns the root id when one was
    /// created.
    pub fn ensure_root(&mut self) -> Option<EventId> {
        if !self.events.is_empty() || self.head_id.is_some() {
            return None;
        }
        let id = self.link_new(EventKind::Text, json!({ "text": STORY_START_TEXT }), None, None);
        self.head_id = Some(id.clone());
        debug!(event = %id, "materialized story root");
        Some(id)
    }

    /// Add an event under `parent` (the head when `None`) and move the head
    /// onto it.
    ///
    /// There is a single head: attaching under a node that is not the head
    /// still moves the head to the new event.
    pub fn add_event(
        &mut self,
        kind: EventKind,
        payload: Payload,
        parent: Option<EventId>,
        generation_ref: Option<GenerationRef>,
    ) -> Result<EventId, TimelineError> {
        let parent = parent.or_else(|| self.head_id.clone());
        if let Some(ref p) = parent {
            if !self.events.contains_key(p) {
                return Err(TimelineError::UnknownParent(p.clone()));
            }
        }

        let id = self.link_new(kind, payload, parent, generation_ref);
        self.head_id = Some(id.clone());
        self.dirty = true;
        Ok(id)
    }

    /// Replace the content of an existing event.
    pub fn update_payload(&mut self, id: &EventId, payload: Payload) -> Result<(), TimelineError> {
        let event = self
            .events
            .get_mut(id)
            .ok_or_else(|| TimelineError::EventNotFound(id.clone()))?;
        event.payload = payload;
        self.dirty = true;
        debug!(event = %id, "updated payload");
        Ok(())
    }

    /// Turn `event_id` into a branch point with one new option event per
    /// choice.
    ///
    /// Children the event had before the call move under the first new
    /// option. The head ends on the last created option.
    pub fn create_branch_point(
        &mut self,
        event_id: &EventId,
        choices: Vec<BranchChoice>,
    ) -> Result<BranchCreation, TimelineError> {
        let event = self
            .events
            .get_mut(event_id)
            .ok_or_else(|| TimelineError::EventNotFound(event_id.clone()))?;
        if choices.is_empty() {
            return Err(TimelineError::EmptyBranchPoint(event_id.clone()));
        }

        event.is_branch_point = true;
        event.branch_options.clear();
        let existing = std::mem::take(&mut event.child_ids);

        let mut created = Vec::with_capacity(choices.len());
        for choice in choices {
            let option_id = self.link_new(
                EventKind::BranchOption,
                json!({ "text": choice.label, "content": choice.content }),
                Some(event_id.clone()),
                None,
            );

            if created.is_empty() {
                let mut adopted = Vec::with_capacity(existing.len());
                for child_id in &existing {
                    if let Some(child) = self.events.get_mut(child_id) {
                        child.parent_id = Some(option_id.clone());
                        adopted.push(child_id.clone());
                    }
                }
                if let Some(option) = self.events.get_mut(&option_id) {
                    option.child_ids.extend(adopted);
                }
            }

            if let Some(event) = self.events.get_mut(event_id) {
                event.branch_options.push(BranchOption {
                    label: choice.label,
                    target_id: option_id.clone(),
                });
            }
            created.push(option_id);
        }

        self.head_id = created.last().cloned();
        self.dirty = true;
        info!(event = %event_id, options = created.len(), "created branch point");
        Ok(BranchCreation {
            created,
            head: self.head_id.clone(),
        })
    }

    /// Commit to a branch: it becomes both the active branch and the head.
    pub fn select_branch(&mut self, branch_id: &EventId) -> Result<EventId, TimelineError> {
        if !self.events.contains_key(branch_id) {
            return Err(TimelineError::EventNotFound(branch_id.clone()));
        }
        self.active_branch_id = Some(branch_id.clone());
        self.head_id = Some(branch_id.clone());
        self.dirty = true;
        debug!(branch = %branch_id, "selected branch");
        Ok(branch_id.clone())
    }

    /// Remove every event produced by one generation call.
    ///
    /// Surviving children of removed events are re-parented to the nearest
    /// surviving ancestor, taking the removed event's slot in that
    /// ancestor's child list. Head and active branch retreat the same way.
    pub fn undo_generation(&mut self, generation_ref: &GenerationRef) -> Result<UndoReport, TimelineError> {
        let removed: FxHashSet<EventId> = self
            .events
            .values()
            .filter(|e| e.generation_ref.as_ref() == Some(generation_ref))
            .map(|e| e.id().clone())
            .collect();
        if removed.is_empty() {
            return Err(TimelineError::GenerationNotFound(generation_ref.clone()));
        }

        // Every survivor whose parent is being removed, with its new parent.
        let mut moves: Vec<(EventId, Option<EventId>)> = Vec::new();
        for event in self.events.values() {
            if removed.contains(event.id()) {
                continue;
            }
            if let Some(parent) = event.parent_id.as_ref().filter(|p| removed.contains(*p)) {
                moves.push((event.id().clone(), self.surviving_ancestor(parent, &removed)));
            }
        }

        // Splice removed children out of surviving child lists.
        let rewrites: Vec<(EventId, Vec<EventId>)> = self
            .events
            .values()
            .filter(|e| !removed.contains(e.id()))
            .filter(|e| e.child_ids.iter().any(|c| removed.contains(c)))
            .map(|e| {
                let mut seen = FxHashSet::default();
                let children = e
                    .child_ids
                    .iter()
                    .flat_map(|c| self.lift(c, &removed, &mut seen))
                    .collect();
                (e.id().clone(), children)
            })
            .collect();

        let head = match self.head_id.as_ref() {
            Some(h) if removed.contains(h) => self.surviving_ancestor(h, &removed),
            other => other.cloned(),
        };
        let active = match self.active_branch_id.as_ref() {
            Some(a) if removed.contains(a) => self.surviving_ancestor(a, &removed),
            other => other.cloned(),
        };

        for (id, children) in rewrites {
            if let Some(event) = self.events.get_mut(&id) {
                event.child_ids = children;
                event.branch_options.retain(|o| !removed.contains(&o.target_id));
                if event.is_branch_point && event.branch_options.is_empty() {
                    event.is_branch_point = false;
                }
            }
        }

        let mut reparented = Vec::with_capacity(moves.len());
        for (child_id, new_parent) in moves {
            if let Some(child) = self.events.get_mut(&child_id) {
                child.parent_id = new_parent.clone();
            }
            if let Some(parent) = new_parent.and_then(|p| self.events.get_mut(&p)) {
                if !parent.child_ids.contains(&child_id) {
                    parent.child_ids.push(child_id.clone());
                }
            }
            reparented.push(child_id);
        }

        let removed_in_order: Vec<EventId> = self
            .events
            .keys()
            .filter(|id| removed.contains(*id))
            .cloned()
            .collect();
        for id in &removed_in_order {
            self.events.shift_remove(id);
        }
        self.retired.extend(removed_in_order.iter().cloned());

        self.head_id = head;
        self.active_branch_id = active;
        self.dirty = true;
        info!(
            generation = %generation_ref,
            removed = removed_in_order.len(),
            reparented = reparented.len(),
            "undid generation"
        );

        Ok(UndoReport {
            removed: removed_in_order,
            reparented,
            head: self.head_id.clone(),
        })
    }

    /// Nearest ancestor-or-self of `id` that exists and is not in `removed`.
    fn surviving_ancestor(&self, id: &EventId, removed: &FxHashSet<EventId>) -> Option<EventId> {
        let mut current = Some(id.clone());
        for _ in 0..=self.events.len() {
            let candidate = current?;
            if !removed.contains(&candidate) {
                return self.events.contains_key(&candidate).then_some(candidate);
            }
            current = self.events.get(&candidate).and_then(|e| e.parent_id.clone());
        }
        warn!(event = %id, "parent chain loops while looking for a surviving ancestor");
        None
    }

    /// Replace a removed child by its surviving descendants, in order.
    fn lift(&self, id: &EventId, removed: &FxHashSet<EventId>, seen: &mut FxHashSet<EventId>) -> Vec<EventId> {
        if !removed.contains(id) {
            return vec![id.clone()];
        }
        if !seen.insert(id.clone()) {
            return Vec::new();
        }
        self.children(id)
            .iter()
            .flat_map(|c| self.lift(c, removed, seen))
            .collect()
    }

    /// Create an event and link it under `parent` without touching the head.
    fn link_new(
        &mut self,
        kind: EventKind,
        payload: Payload,
        parent: Option<EventId>,
        generation_ref: Option<GenerationRef>,
    ) -> EventId {
        let created_at = Local::now().naive_local();
        let id = self.issue_id(created_at, &kind, &payload);
        if let Some(parent_event) = parent.as_ref().and_then(|p| self.events.get_mut(p)) {
            parent_event.child_ids.push(id.clone());
        }
        debug!(event = %id, parent = ?parent, kind = %kind, "added event");
        let event = StoryEvent::new(id.clone(), created_at, kind, payload, parent, generation_ref);
        self.events.insert(id.clone(), event);
        id
    }

    fn issue_id(&mut self, created_at: NaiveDateTime, kind: &EventKind, payload: &Payload) -> EventId {
        loop {
            self.sequence += 1;
            let id = EventId::derive(created_at, kind, payload, self.sequence);
            if !self.events.contains_key(&id) && !self.retired.contains(&id) {
                return id;
            }
        }
    }

    // --- Characters ---

    pub fn characters(&self) -> &IndexMap<String, Character> {
        &self.characters
    }

    /// Characters ordered by name, for listing.
    pub fn characters_by_name(&self) -> Vec<(&String, &Character)> {
        let mut listed: Vec<_> = self.characters.iter().collect();
        listed.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        listed
    }

    /// Add a character under a fresh id.
    pub fn add_character(&mut self, name: impl Into<String>, description: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert_character(id.clone(), Character::new(name, description));
        id
    }

    /// Insert or replace a character under a caller-chosen id.
    pub fn insert_character(&mut self, id: impl Into<String>, character: Character) {
        self.characters.insert(id.into(), character);
        self.dirty = true;
    }

    pub fn update_character(
        &mut self,
        id: &str,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<(), TimelineError> {
        let character = self
            .characters
            .get_mut(id)
            .ok_or_else(|| TimelineError::CharacterNotFound(id.to_string()))?;
        character.name = name.into();
        character.description = description.into();
        self.dirty = true;
        Ok(())
    }

    pub fn remove_character(&mut self, id: &str) -> Result<Character, TimelineError> {
        let removed = self
            .characters
            .shift_remove(id)
            .ok_or_else(|| TimelineError::CharacterNotFound(id.to_string()))?;
        self.dirty = true;
        Ok(removed)
    }

    // --- Assets ---

    pub fn assets(&self) -> &AssetRegistry {
        &self.assets
    }

    /// The bucket for one category.
    pub fn get_assets(&self, category: &str) -> Result<&AssetBucket, TimelineError> {
        Ok(self.assets.bucket(parse_category(category)?))
    }

    /// Insert or overwrite an asset reference.
    pub fn add_asset(
        &mut self,
        category: &str,
        id: impl Into<String>,
        metadata: AssetMetadata,
    ) -> Result<(), TimelineError> {
        let category = parse_category(category)?;
        let id = id.into();
        debug!(%category, asset = %id, "added asset");
        self.assets.insert(category, id, metadata);
        self.dirty = true;
        Ok(())
    }

    pub fn remove_asset(&mut self, category: &str, id: &str) -> Result<AssetMetadata, TimelineError> {
        let category = parse_category(category)?;
        let removed = self
            .assets
            .remove(category, id)
            .ok_or_else(|| TimelineError::AssetNotFound {
                category,
                id: id.to_string(),
            })?;
        self.dirty = true;
        Ok(removed)
    }

    // --- Integrity ---

    /// Check every structural invariant of the graph.
    pub fn validate(&self) -> Vec<IntegrityIssue> {
        let mut issues = Vec::new();

        for (key, event) in &self.events {
            if key != event.id() {
                issues.push(IntegrityIssue::KeyMismatch {
                    key: key.clone(),
                    id: event.id().clone(),
                });
            }

            if let Some(ref parent_id) = event.parent_id {
                match self.events.get(parent_id) {
                    None => issues.push(IntegrityIssue::DanglingParent {
                        event: key.clone(),
                        parent: parent_id.clone(),
                    }),
                    Some(parent) if !parent.child_ids.contains(key) => {
                        issues.push(IntegrityIssue::MissingChildLink {
                            parent: parent_id.clone(),
                            child: key.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }

            for child_id in &event.child_ids {
                let linked = self
                    .events
                    .get(child_id)
                    .is_some_and(|c| c.parent_id.as_ref() == Some(key));
                if !linked {
                    issues.push(IntegrityIssue::StrayChild {
                        parent: key.clone(),
                        child: child_id.clone(),
                    });
                }
            }

            for option in &event.branch_options {
                if !event.child_ids.contains(&option.target_id) {
                    issues.push(IntegrityIssue::StrayBranchTarget {
                        event: key.clone(),
                        target: option.target_id.clone(),
                    });
                }
            }
        }

        if let Some(ref head) = self.head_id {
            if !self.events.contains_key(head) {
                issues.push(IntegrityIssue::DanglingHead(head.clone()));
            }
        }
        if let Some(ref active) = self.active_branch_id {
            if !self.events.contains_key(active) {
                issues.push(IntegrityIssue::DanglingActiveBranch(active.clone()));
            }
        }

        issues.extend(self.find_cycles());
        issues
    }

    /// Like [`Timeline::validate`], as a `Result`.
    pub fn ensure_consistent(&self) -> Result<(), TimelineError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(TimelineError::Corrupt(issues))
        }
    }

    fn find_cycles(&self) -> Vec<IntegrityIssue> {
        let mut acyclic: FxHashSet<&EventId> = FxHashSet::default();
        let mut reported: FxHashSet<&EventId> = FxHashSet::default();
        let mut issues = Vec::new();

        for start in self.events.keys() {
            let mut trail: Vec<&EventId> = Vec::new();
            let mut on_trail: FxHashSet<&EventId> = FxHashSet::default();
            let mut reaches_root = true;
            let mut current = Some(start);
            while let Some(id) = current {
                if acyclic.contains(id) {
                    break;
                }
                if reported.contains(id) {
                    reaches_root = false;
                    break;
                }
                if !on_trail.insert(id) {
                    issues.push(IntegrityIssue::Cycle(id.clone()));
                    reaches_root = false;
                    break;
                }
                trail.push(id);
                current = self.events.get(id).and_then(|e| e.parent_id.as_ref());
            }
            if reaches_root {
                acyclic.extend(trail);
            } else {
                reported.extend(trail);
            }
        }
        issues
    }
}

fn parse_category(category: &str) -> Result<AssetCategory, TimelineError> {
    category.parse().map_err(TimelineError::InvalidCategory)
}
