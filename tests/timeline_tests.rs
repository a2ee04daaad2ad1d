/// Timeline mutation and traversal integration tests.

use serde_json::json;
use story_timeline::core::generation::{GenerationEnvelope, GenerationRef, GenerationRequest};
use story_timeline::core::timeline::{BranchChoice, Timeline, TimelineError};
use story_timeline::schema::event::{EventId, EventKind};

fn text(s: &str) -> serde_json::Value {
    json!({ "text": s })
}

fn path_texts(timeline: &Timeline) -> Vec<String> {
    timeline
        .get_path(true)
        .iter()
        .map(|view| view.event.text().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn branching_scenario() {
    let mut timeline = Timeline::new();

    let id1 = timeline.add_event(EventKind::Text, text("A"), None, None).unwrap();
    assert_eq!(timeline.head_id(), Some(&id1));

    let id2 = timeline.add_event(EventKind::Text, text("B"), None, None).unwrap();
    assert_eq!(timeline.head_id(), Some(&id2));
    assert_eq!(timeline.get_event(&id2).unwrap().parent_id, Some(id1.clone()));

    let creation = timeline
        .create_branch_point(&id1, vec![BranchChoice::labelled("x"), BranchChoice::labelled("y")])
        .unwrap();
    let (option_x, option_y) = (creation.created[0].clone(), creation.created[1].clone());

    assert!(timeline.is_branch_point(&id1));
    assert_eq!(timeline.branch_options(&id1).len(), 2);
    assert_eq!(timeline.children(&option_x), &[id2.clone()]);
    assert_eq!(timeline.get_event(&id2).unwrap().parent_id, Some(option_x.clone()));
    assert_eq!(timeline.head_id(), Some(&option_y));

    assert_eq!(path_texts(&timeline), vec!["A", "y"]);

    let path = timeline.get_path(true);
    let details = path[0].branch_details.as_ref().unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].label, "x");
    assert_eq!(details[0].target_id, &option_x);
    assert!(path[1].branch_details.is_none());

    timeline.select_branch(&option_x).unwrap();
    assert_eq!(path_texts(&timeline), vec!["A", "x", "B"]);
    assert!(timeline.validate().is_empty());
}

#[test]
fn traversal_is_idempotent() {
    let mut timeline = Timeline::new();
    let a = timeline.add_event(EventKind::Text, text("A"), None, None).unwrap();
    timeline.add_event(EventKind::Text, text("B"), None, None).unwrap();
    timeline.create_branch_point(&a, vec![BranchChoice::labelled("left")]).unwrap();

    assert_eq!(timeline.get_path(true), timeline.get_path(true));
    assert_eq!(timeline.get_all_branches(), timeline.get_all_branches());
    assert_eq!(timeline.get_all_branches().len(), 1);
}

#[test]
fn undo_removes_exactly_the_tagged_set() {
    let mut timeline = Timeline::new();
    let g1 = GenerationRef::from("g1");

    let e1 = timeline.add_event(EventKind::Text, text("E1"), None, None).unwrap();
    let e2 = timeline
        .add_event(EventKind::Generated, text("E2"), None, Some(g1.clone()))
        .unwrap();
    let e3 = timeline
        .add_event(EventKind::Generated, text("E3"), None, Some(g1.clone()))
        .unwrap();
    let e4 = timeline.add_event(EventKind::Text, text("E4"), None, None).unwrap();

    let report = timeline.undo_generation(&g1).unwrap();

    assert_eq!(report.removed, vec![e2.clone(), e3.clone()]);
    assert!(timeline.get_event(&e2).is_none());
    assert!(timeline.get_event(&e3).is_none());
    assert!(timeline.get_event(&e1).is_some());
    assert_eq!(timeline.get_event(&e4).unwrap().parent_id, Some(e1.clone()));
    assert_eq!(timeline.children(&e1), &[e4.clone()]);
    assert_eq!(timeline.head_id(), Some(&e4));
    assert!(timeline.validate().is_empty());
}

#[test]
fn undo_retreats_head_to_surviving_ancestor() {
    let mut timeline = Timeline::new();
    let start = timeline.add_event(EventKind::Text, text("start"), None, None).unwrap();
    let request = GenerationRequest::new("continue");
    let envelope = GenerationEnvelope {
        story_text: "The lights went out.".to_string(),
        suggestions: vec!["light a match".to_string()],
    };
    let generated = timeline.attach_generation(None, &request, &envelope).unwrap();
    assert_eq!(timeline.head_id(), Some(&generated));
    assert_eq!(timeline.last_generation_on_path(), Some(&request.id));

    let report = timeline.undo_last_generation().unwrap();
    assert_eq!(report.head.as_ref(), Some(&start));
    assert_eq!(timeline.head_id(), Some(&start));
    assert!(matches!(timeline.undo_last_generation(), Err(TimelineError::NothingToUndo)));
}

#[test]
fn undo_retreats_active_branch() {
    let mut timeline = Timeline::new();
    let a = timeline.add_event(EventKind::Text, text("A"), None, None).unwrap();
    let tag = GenerationRef::from("gen");
    let generated = timeline
        .add_event(EventKind::Generated, text("G"), None, Some(tag.clone()))
        .unwrap();
    timeline.select_branch(&generated).unwrap();

    timeline.undo_generation(&tag).unwrap();
    assert_eq!(timeline.active_branch_id(), Some(&a));
    assert_eq!(timeline.head_id(), Some(&a));
}

#[test]
fn failed_mutations_leave_state_untouched() {
    let mut timeline = Timeline::new();
    let a = timeline.add_event(EventKind::Text, text("A"), None, None).unwrap();
    let before = timeline.events().clone();

    assert!(timeline
        .add_event(EventKind::Text, text("orphan"), Some(EventId::from("nowhere")), None)
        .is_err());
    assert!(timeline.select_branch(&EventId::from("nowhere")).is_err());
    assert!(timeline.undo_generation(&GenerationRef::from("none")).is_err());
    assert!(timeline.create_branch_point(&EventId::from("nowhere"), vec![BranchChoice::labelled("x")]).is_err());

    assert_eq!(timeline.events(), &before);
    assert_eq!(timeline.head_id(), Some(&a));
}
