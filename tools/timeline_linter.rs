/// Timeline Linter: checks a saved project for graph damage and loose ends.
///
/// Usage: timeline_linter <project.json> [--assets-root <dir>]

use std::path::Path;
use std::process;
use story_timeline::core::codec::{self, LoadOutcome};
use story_timeline::core::timeline::Timeline;
use story_timeline::schema::asset::AssetCategory;
use story_timeline::schema::event::EventKind;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        println!("Usage: timeline_linter <project.json> [--assets-root <dir>]");
        process::exit(0);
    }

    let project = Path::new(&args[1]);
    let mut assets_root = None;

    let mut i = 2;
    while i < args.len() {
        if args[i] == "--assets-root" && i + 1 < args.len() {
            i += 1;
            assets_root = Some(args[i].clone());
        }
        i += 1;
    }

    let mut errors = Vec::new();
    let outcome = codec::load(project);
    match &outcome {
        LoadOutcome::Restored(_) => {}
        LoadOutcome::Suspect { issues, .. } => {
            errors.extend(issues.iter().map(|issue| issue.to_string()));
        }
        LoadOutcome::Defaulted { diagnostic, .. } => {
            eprintln!("ERROR: Failed to load project: {}", diagnostic);
            process::exit(1);
        }
    }

    let timeline = outcome.timeline();
    println!(
        "Loaded {} events, {} characters, {} assets",
        timeline.len(),
        timeline.characters().len(),
        timeline.assets().len()
    );

    let warnings = lint_timeline(timeline, assets_root.as_deref().map(Path::new));

    println!("\n=== Timeline Lint Report ===\n");

    if errors.is_empty() && warnings.is_empty() {
        println!("All checks passed!");
    }

    for warning in &warnings {
        println!("WARNING: {}", warning);
    }

    for error in &errors {
        println!("ERROR: {}", error);
    }

    println!(
        "\nSummary: {} errors, {} warnings",
        errors.len(),
        warnings.len()
    );

    if errors.is_empty() {
        process::exit(0);
    } else {
        process::exit(1);
    }
}

fn lint_timeline(timeline: &Timeline, assets_root: Option<&Path>) -> Vec<String> {
    let mut warnings = Vec::new();

    if !timeline.is_empty() && timeline.head_id().is_none() {
        warnings.push("Project has events but no head".to_string());
    }

    let roots = timeline
        .events()
        .values()
        .filter(|e| e.parent_id.is_none())
        .count();
    if roots > 1 {
        warnings.push(format!("Story has {} root events (expected 1)", roots));
    }

    for (id, event) in timeline.events() {
        if event.kind == EventKind::Generated && event.generation_ref.is_none() {
            warnings.push(format!(
                "Generated event '{}' has no generation reference and cannot be undone",
                id
            ));
        }

        if event.text().map_or(true, |t| t.trim().is_empty()) && event.kind != EventKind::BranchOption {
            warnings.push(format!("Event '{}' ({}) has no text", id, event.kind));
        }

        if event.is_branch_point && event.branch_options.len() < 2 {
            warnings.push(format!(
                "Branch point '{}' offers only {} option(s)",
                id,
                event.branch_options.len()
            ));
        }

        if let Some(score) = event.sentiment {
            if !(0.0..=1.0).contains(&score) {
                warnings.push(format!("Event '{}' has sentiment {} outside [0, 1]", id, score));
            }
        }
    }

    if let Some(root) = assets_root {
        for category in AssetCategory::ALL {
            for (asset_id, meta) in timeline.assets().bucket(category) {
                if !root.join(&meta.path).exists() {
                    warnings.push(format!(
                        "Asset '{}/{}' points at missing file '{}'",
                        category, asset_id, meta.path
                    ));
                }
            }
        }
    }

    warnings
}
