/// Save, load and autosave integration tests.

use chrono::NaiveDateTime;
use serde_json::json;
use std::path::Path;
use story_timeline::core::codec::{self, LoadOutcome, PersistenceError};
use story_timeline::core::generation::GenerationRef;
use story_timeline::core::timeline::{BranchChoice, IntegrityIssue, Timeline};
use story_timeline::schema::asset::{AssetCategory, AssetMetadata};
use story_timeline::schema::event::{EventId, EventKind};

fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
}

fn authored() -> Timeline {
    let mut timeline = Timeline::new();
    let a = timeline
        .add_event(EventKind::Text, json!({"text": "駅に着いた。"}), None, None)
        .unwrap();
    timeline
        .add_event(
            EventKind::Generated,
            json!({"prompt": "go on", "response": "The train was late."}),
            None,
            Some(GenerationRef::from("g-1")),
        )
        .unwrap();
    let creation = timeline
        .create_branch_point(&a, vec![BranchChoice::labelled("wait"), BranchChoice::labelled("leave")])
        .unwrap();
    timeline.select_branch(&creation.created[0]).unwrap();
    timeline.set_sentiment(&a, 0.7).unwrap();
    timeline.add_character("Ren", "station attendant");
    timeline
        .add_asset(
            "backgrounds",
            "platform.png",
            AssetMetadata::new("bg/platform.png", "platform.png", "image/png", 4096, at("2024-02-02T12:00:00"))
                .with_dimensions(1280, 720),
        )
        .unwrap();
    timeline
}

fn assert_same_state(a: &Timeline, b: &Timeline) {
    assert_eq!(a.events(), b.events());
    assert_eq!(a.head_id(), b.head_id());
    assert_eq!(a.active_branch_id(), b.active_branch_id());
    assert_eq!(a.characters(), b.characters());
    assert_eq!(a.assets(), b.assets());
}

#[test]
fn save_then_load_restores_everything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.json");
    let mut timeline = authored();

    codec::save(&mut timeline, &path).unwrap();
    assert!(!timeline.is_dirty());

    let outcome = codec::load(&path);
    assert!(outcome.is_restored(), "{:?}", outcome.diagnostic());
    let restored = outcome.into_timeline();
    assert_same_state(&timeline, &restored);
    assert!(!restored.is_dirty());
}

#[test]
fn sentiment_scores_survive_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scored.json");
    let mut timeline = Timeline::new();

    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut scores = vec![0.9856906946328695];
    for _ in 0..200 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        scores.push((state >> 11) as f64 / (1u64 << 53) as f64);
    }
    for (n, score) in scores.iter().enumerate() {
        let id = timeline
            .add_event(EventKind::Text, json!({"text": format!("beat {n}"), "weight": score}), None, None)
            .unwrap();
        timeline.set_sentiment(&id, *score).unwrap();
    }

    codec::save(&mut timeline, &path).unwrap();
    let restored = codec::load(&path).into_timeline();
    assert_same_state(&timeline, &restored);
}

#[test]
fn empty_timeline_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.json");
    let mut timeline = Timeline::new();

    codec::save(&mut timeline, &path).unwrap();
    let restored = codec::load(&path).into_timeline();
    assert_same_state(&timeline, &restored);
    assert!(restored.is_empty());
}

#[test]
fn non_ascii_text_is_written_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.json");
    codec::save(&mut authored(), &path).unwrap();
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("駅に着いた。"));
}

#[test]
fn retired_ids_survive_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("story.json");
    let mut timeline = authored();
    let report = timeline.undo_generation(&GenerationRef::from("g-1")).unwrap();
    codec::save(&mut timeline, &path).unwrap();

    let mut restored = codec::load(&path).into_timeline();
    let fresh = restored
        .add_event(EventKind::Text, json!({"text": "again"}), None, None)
        .unwrap();
    assert!(!report.removed.contains(&fresh));
    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["retired_event_ids"].as_array().unwrap().len(), report.removed.len());
}

#[test]
fn missing_file_defaults_with_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let outcome = codec::load(&dir.path().join("absent.json"));
    match outcome {
        LoadOutcome::Defaulted { timeline, diagnostic } => {
            assert!(timeline.is_empty());
            assert!(matches!(diagnostic, PersistenceError::Missing(_)));
        }
        other => panic!("expected a defaulted load, got {other:?}"),
    }
}

#[test]
fn unparsable_file_defaults_with_diagnostic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ \"events\": [ not json").unwrap();

    let outcome = codec::load(&path);
    assert!(matches!(
        outcome,
        LoadOutcome::Defaulted {
            diagnostic: PersistenceError::Json(_),
            ..
        }
    ));
    assert!(outcome.timeline().is_empty());
    assert!(outcome.diagnostic().is_some());
}

#[test]
fn inconsistent_file_loads_as_suspect() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suspect.json");
    let document = json!({
        "events": {
            "a": {
                "event_id": "a",
                "timestamp": "2024-01-01T00:00:00",
                "event_type": "text_node",
                "data": {"text": "A"},
                "child_event_ids": []
            },
            "b": {
                "event_id": "b",
                "timestamp": "2024-01-01T00:00:01",
                "event_type": "text_node",
                "data": {"text": "B"},
                "parent_event_id": "a"
            }
        },
        "head_event_id": "b",
        "active_branch_id": null,
        "characters": {},
        "assets": {}
    });
    std::fs::write(&path, document.to_string()).unwrap();

    match codec::load(&path) {
        LoadOutcome::Suspect { timeline, issues } => {
            assert_eq!(timeline.len(), 2);
            assert!(timeline.children(&EventId::from("a")).is_empty());
            assert_eq!(
                issues,
                vec![IntegrityIssue::MissingChildLink {
                    parent: EventId::from("a"),
                    child: EventId::from("b"),
                }]
            );
        }
        other => panic!("expected a suspect load, got {other:?}"),
    }
}

#[test]
fn legacy_project_file_loads() {
    let outcome = codec::load(Path::new("tests/fixtures/legacy_timeline.json"));
    assert!(outcome.is_restored(), "{:?}", outcome.diagnostic());
    let timeline = outcome.timeline();

    assert_eq!(timeline.len(), 2);
    let head = timeline.get_event(timeline.head_id().unwrap()).unwrap();
    assert_eq!(head.kind, EventKind::Generated);
    assert_eq!(head.text(), Some("Yuko opened her umbrella and waited."));
    assert_eq!(head.sentiment, Some(0.35));
    assert_eq!(timeline.last_generation_on_path().unwrap().as_str(), "5b0f2c4e-8d51-4f3e-9a57-0c1d2e3f4a5b");

    let (_, yuko) = timeline.characters_by_name()[0];
    assert_eq!(yuko.name, "Yuko");
    assert_eq!(yuko.extra["age"], json!(24));

    let station = timeline.assets().get(AssetCategory::Backgrounds, "station.png").unwrap();
    assert_eq!(station.mime_type, "image/png");
    assert_eq!(station.width, Some(1920));
    assert_eq!(timeline.get_path(false).len(), 2);
}

#[test]
fn legacy_kind_is_rewritten_on_save() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upgraded.json");
    let mut timeline = codec::load(Path::new("tests/fixtures/legacy_timeline.json")).into_timeline();
    codec::save(&mut timeline, &path).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("\"event_type\": \"ollama_generation\""));
    assert!(raw.contains("\"event_type\": \"generation\""));
    assert!(codec::load(&path).is_restored());
}

#[test]
fn autosave_writes_copy_and_project() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("novel.json");
    let mut timeline = authored();

    let copy = codec::autosave(&mut timeline, &project, at("2024-07-04T18:30:05"))
        .unwrap()
        .unwrap();
    assert_eq!(copy, dir.path().join("autosave").join("novel_autosave_20240704_183005.json"));
    assert!(copy.exists());
    assert!(project.exists());
    assert!(!timeline.is_dirty());

    assert!(codec::autosave(&mut timeline, &project, at("2024-07-04T18:35:05"))
        .unwrap()
        .is_none());
}
