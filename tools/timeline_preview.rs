/// Timeline Preview: interactive authoring shell over a project file.
///
/// Usage: timeline_preview <project.json> [--config <authoring.ron>]
///
/// Commands:
///   add <text>               append author text at the head
///   gen <prompt>             run the offline generator and attach its draft
///   branch <event> <a|b|..>  turn an event into a branch point
///   select <event>           commit to a branch option
///   undo                     undo the last generation on the current path
///   path                     print the displayed story path
///   branches                 list every branch point
///   char <name> <desc>       add a character
///   save                     write the project file
///   help                     list commands
///   quit                     exit
///
/// <event> is a path position as printed by `path`, or the tail of an id.

use chrono::{Local, NaiveDateTime};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use story_timeline::core::codec;
use story_timeline::core::config::AuthoringConfig;
use story_timeline::core::generation::{
    parse_response, GenerationEnvelope, GenerationError, GenerationRequest, StoryGenerator,
};
use story_timeline::core::timeline::{BranchChoice, Timeline};
use story_timeline::core::worker::{GenerationOutcome, GenerationWorker};
use story_timeline::schema::event::{EventId, EventKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stands in for the model service: answers with a draft built from the
/// prompt, in the same JSON shape the service is asked for.
struct OfflineGenerator {
    model: String,
}

impl StoryGenerator for OfflineGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<GenerationEnvelope, GenerationError> {
        let reply = json!({
            "story_text": format!("[{} draft] {}", self.model, request.prompt),
            "suggestions": ["continue", "change the scene"],
        });
        parse_response(&format!("```json\n{reply}\n```"))
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage();
        return;
    }

    let project = PathBuf::from(&args[1]);
    let mut config_path = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                i += 1;
                config_path = Some(args[i].clone());
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = match config_path {
        Some(ref path) => match AuthoringConfig::load(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("ERROR: Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => AuthoringConfig::default(),
    };

    let outcome = codec::load(&project);
    if let Some(diagnostic) = outcome.diagnostic() {
        println!("Note: {}", diagnostic);
    }
    let mut timeline = outcome.into_timeline();
    timeline.ensure_root();

    println!("Loaded {} events from {}", timeline.len(), project.display());
    println!("Generator: {} ({})", config.generator.model, config.generator.host);
    println!("Type 'help' for commands.\n");

    let worker = GenerationWorker::spawn(OfflineGenerator {
        model: config.generator.model.clone(),
    });
    let mut last_saved = Local::now().naive_local();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        // Drafts that missed their wait are attached where they were asked for.
        while let Ok(Some(outcome)) = worker.try_next() {
            show_outcome(&mut timeline, outcome);
        }

        print!("timeline> ");
        stdout.flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line).is_err() || line.is_empty() {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd.to_lowercase(), rest.trim()),
            None => (line.to_lowercase(), ""),
        };

        match cmd.as_str() {
            "quit" | "exit" | "q" => {
                if timeline.is_dirty() {
                    println!("Unsaved changes. Type 'save' first, or 'quit!' to discard.");
                    continue;
                }
                println!("Goodbye.");
                break;
            }
            "quit!" => {
                println!("Goodbye.");
                break;
            }
            "help" | "h" | "?" => {
                print_help();
            }
            "add" => {
                if rest.is_empty() {
                    println!("Usage: add <text>");
                    continue;
                }
                match timeline.add_event(EventKind::Text, json!({ "text": rest }), None, None) {
                    Ok(id) => println!("Added {}", short(&id)),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "gen" => {
                if rest.is_empty() {
                    println!("Usage: gen <prompt>");
                    continue;
                }
                let request = GenerationRequest::new(rest).with_characters(timeline.characters());
                let waiting_for = request.id.clone();
                if let Err(e) = worker.submit(request, timeline.head_id().cloned()) {
                    println!("ERROR: {}", e);
                    continue;
                }
                let deadline = Instant::now() + Duration::from_secs(30);
                loop {
                    match worker.next_timeout(deadline.saturating_duration_since(Instant::now())) {
                        Ok(Some(outcome)) => {
                            let done = outcome.request.id == waiting_for;
                            show_outcome(&mut timeline, outcome);
                            if done {
                                break;
                            }
                        }
                        Ok(None) => {
                            println!("Generator did not answer in time; the draft will be attached when it arrives.");
                            break;
                        }
                        Err(e) => {
                            println!("ERROR: {}", e);
                            break;
                        }
                    }
                }
            }
            "branch" => {
                let Some((target, labels)) = rest.split_once(char::is_whitespace) else {
                    println!("Usage: branch <event> <label|label|...>");
                    continue;
                };
                let Some(target) = resolve(&timeline, target) else {
                    println!("No such event: {}", target);
                    continue;
                };
                let choices: Vec<BranchChoice> = labels
                    .split('|')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(BranchChoice::labelled)
                    .collect();
                match timeline.create_branch_point(&target, choices) {
                    Ok(creation) => println!(
                        "Created {} option(s); head is now {}",
                        creation.created.len(),
                        creation.head.as_ref().map(short).unwrap_or_default()
                    ),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "select" => {
                let Some(target) = resolve(&timeline, rest) else {
                    println!("Usage: select <event>");
                    continue;
                };
                match timeline.select_branch(&target) {
                    Ok(id) => println!("Selected {}", short(&id)),
                    Err(e) => println!("ERROR: {}", e),
                }
            }
            "undo" => match timeline.undo_last_generation() {
                Ok(report) => println!(
                    "Removed {} event(s), re-parented {}",
                    report.removed.len(),
                    report.reparented.len()
                ),
                Err(e) => println!("ERROR: {}", e),
            },
            "path" => {
                print_path(&timeline);
            }
            "branches" => {
                let branches = timeline.get_all_branches();
                if branches.is_empty() {
                    println!("No branch points.");
                }
                for branch in branches {
                    println!(
                        "{} [{}] {}",
                        short(branch.event_id),
                        branch.created_at.format("%Y-%m-%d %H:%M"),
                        branch.content.get("text").and_then(|t| t.as_str()).unwrap_or_default()
                    );
                    for option in branch.options {
                        println!("    -> {} {}", short(&option.target_id), option.label);
                    }
                }
            }
            "char" => {
                let (name, description) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                if name.is_empty() {
                    println!("Usage: char <name> <description>");
                    continue;
                }
                let id = timeline.add_character(name, description.trim());
                println!("Added character {} ({})", name, id);
            }
            "save" => match codec::save(&mut timeline, &project) {
                Ok(()) => {
                    last_saved = Local::now().naive_local();
                    println!("Saved to {}", project.display());
                }
                Err(e) => println!("ERROR: {}", e),
            },
            _ => {
                println!("Unknown command: '{}'. Type 'help' for available commands.", cmd);
            }
        }

        maybe_autosave(&config, &mut timeline, &project, &mut last_saved);
    }
}

fn show_outcome(timeline: &mut Timeline, outcome: GenerationOutcome) {
    match outcome.apply_to(timeline) {
        Ok(id) => {
            let text = timeline.get_event(&id).and_then(|e| e.text()).unwrap_or_default();
            println!("\n--- Generated Text ({}) ---", short(&id));
            println!("{}", text);
            println!("--- End ---\n");
        }
        Err(e) => println!("ERROR: {}", e),
    }
}

fn maybe_autosave(config: &AuthoringConfig, timeline: &mut Timeline, project: &Path, last_saved: &mut NaiveDateTime) {
    let now = Local::now().naive_local();
    if !config.autosave.is_due(*last_saved, now) {
        return;
    }
    match codec::autosave(timeline, project, now) {
        Ok(Some(copy)) => {
            info!(copy = %copy.display(), "autosaved");
            *last_saved = now;
        }
        Ok(None) => *last_saved = now,
        Err(e) => println!("ERROR: autosave failed: {}", e),
    }
}

/// A path position, or the unique event whose id ends with `token`.
fn resolve(timeline: &Timeline, token: &str) -> Option<EventId> {
    if token.is_empty() {
        return None;
    }
    if let Ok(position) = token.parse::<usize>() {
        return timeline.path_ids().get(position).map(|id| (*id).clone());
    }
    let mut matches = timeline.events().keys().filter(|id| id.as_str().ends_with(token));
    let found = matches.next()?;
    match matches.next() {
        Some(_) => None,
        None => Some(found.clone()),
    }
}

fn short(id: &EventId) -> String {
    let s = id.as_str();
    match s.char_indices().rev().nth(7) {
        Some((start, _)) => s[start..].to_string(),
        None => s.to_string(),
    }
}

fn print_path(timeline: &Timeline) {
    let path = timeline.get_path(true);
    if path.is_empty() {
        println!("(empty story)");
        return;
    }
    println!();
    for (position, view) in path.iter().enumerate() {
        let marker = if Some(view.event.id()) == timeline.head_id() { "*" } else { " " };
        println!(
            "{}[{}] {} {:<13} {}",
            marker,
            position,
            short(view.event.id()),
            view.event.kind.as_str(),
            view.event.text().unwrap_or_default()
        );
        for detail in view.branch_details.iter().flatten() {
            println!("        -> {} {}", short(detail.target_id), detail.label);
        }
    }
    println!();
}

fn print_usage() {
    println!("Timeline Preview: interactive authoring shell over a project file.");
    println!();
    println!("Usage: timeline_preview <project.json> [--config <authoring.ron>]");
    println!();
    println!("  <project.json>     Project file; created on first save if missing");
    println!("  --config <path>    Authoring configuration in RON (optional)");
}

fn print_help() {
    println!("Commands:");
    println!("  add <text>               Append author text at the head");
    println!("  gen <prompt>             Generate a draft and attach it at the head");
    println!("  branch <event> <a|b|..>  Turn an event into a branch point");
    println!("  select <event>           Commit to a branch option");
    println!("  undo                     Undo the last generation on the current path");
    println!("  path                     Print the displayed story path");
    println!("  branches                 List every branch point");
    println!("  char <name> <desc>       Add a character");
    println!("  save                     Write the project file");
    println!("  help                     Show this message");
    println!("  quit                     Exit (quit! discards unsaved changes)");
    println!();
    println!("  <event> is a path position as printed by 'path', or the tail of an id.");
}
