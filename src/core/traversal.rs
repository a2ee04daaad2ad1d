//! Read paths over the timeline: the displayed story path and the branch
//! audit. Both are free of side effects.

use chrono::NaiveDateTime;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::warn;

use crate::core::timeline::Timeline;
use crate::schema::event::{BranchOption, EventId, Payload, StoryEvent};

/// One event on a displayed path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView<'a> {
    #[serde(flatten)]
    pub event: &'a StoryEvent,
    /// Resolved options, present only for branch points when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_details: Option<Vec<BranchDetail<'a>>>,
}

/// A branch option resolved against the live target event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchDetail<'a> {
    #[serde(rename = "text")]
    pub label: &'a str,
    pub target_id: &'a EventId,
    pub content: &'a Payload,
}

/// A branch point and its options, for whole-story auditing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BranchSummary<'a> {
    pub event_id: &'a EventId,
    #[serde(rename = "timestamp")]
    pub created_at: NaiveDateTime,
    pub content: &'a Payload,
    #[serde(rename = "choices")]
    pub options: &'a [BranchOption],
}

impl Timeline {
    /// Where display traversal starts: the active branch, else the head.
    pub fn path_start(&self) -> Option<&EventId> {
        self.active_branch_id.as_ref().or(self.head_id.as_ref())
    }

    /// Events from the root down to the traversal start, in story order.
    pub fn path_ids(&self) -> Vec<&EventId> {
        let mut path = Vec::new();
        let mut visited = FxHashSet::default();
        let mut current = self.path_start();

        while let Some(id) = current {
            let Some((key, event)) = self.events.get_key_value(id) else {
                break;
            };
            if !visited.insert(key) {
                warn!(event = %key, "parent chain loops, truncating path");
                break;
            }
            path.push(key);
            current = event.parent_id.as_ref();
        }

        path.reverse();
        path
    }

    /// The story as currently displayed.
    ///
    /// With `include_branches`, each branch point on the path carries its
    /// options resolved to the current payload of each target.
    pub fn get_path(&self, include_branches: bool) -> Vec<EventView<'_>> {
        self.path_ids()
            .into_iter()
            .filter_map(|id| self.events.get(id))
            .map(|event| EventView {
                event,
                branch_details: (include_branches && event.is_branch_point)
                    .then(|| self.branch_details(event)),
            })
            .collect()
    }

    fn branch_details<'a>(&'a self, event: &'a StoryEvent) -> Vec<BranchDetail<'a>> {
        event
            .branch_options
            .iter()
            .filter_map(|option| {
                let target = self.events.get(&option.target_id)?;
                Some(BranchDetail {
                    label: &option.label,
                    target_id: &option.target_id,
                    content: &target.payload,
                })
            })
            .collect()
    }

    /// Every branch point in the story, in creation order.
    pub fn get_all_branches(&self) -> Vec<BranchSummary<'_>> {
        self.events
            .values()
            .filter(|e| e.is_branch_point)
            .map(|e| BranchSummary {
                event_id: e.id(),
                created_at: e.created_at(),
                content: &e.payload,
                options: &e.branch_options,
            })
            .collect()
    }
}
