use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tapcanvas_contracts::canvas::CanvasSnapshot;
use tapcanvas_contracts::conversation::Conversation;
use tapcanvas_contracts::events::EventWriter;
use tapcanvas_engine::{TurnEngine, TurnInput};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "tapcanvas", version, about = "TapCanvas assistant turn runner")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Turn(TurnArgs),
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct TurnArgs {
    /// JSON file with the conversation: {"messages": [{"role": "user", "text": "..."}]}
    #[arg(long)]
    conversation: PathBuf,
    /// JSON file with the canvas snapshot: {"nodes": [...]}
    #[arg(long)]
    canvas: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    canvas: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("tapcanvas error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Turn(args) => run_turn(args),
        Command::Chat(args) => run_chat(args),
    }
}

fn run_turn(args: TurnArgs) -> Result<i32> {
    let conversation = load_conversation(&args.conversation)?;
    let snapshot = load_snapshot(args.canvas.as_ref())?;
    let engine = build_engine(args.events.as_ref(), args.text_model)?;

    let result = engine.run_turn(&TurnInput {
        conversation: &conversation,
        snapshot: &snapshot,
    });
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.error.is_some() { 1 } else { 0 })
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let snapshot = load_snapshot(args.canvas.as_ref())?;
    let mut engine = build_engine(args.events.as_ref(), args.text_model)?;

    let stdin = io::stdin();
    let mut line = String::new();
    let mut conversation = Conversation::default();
    let mut pending_replies: Vec<String> = Vec::new();

    println!("TapCanvas chat started. Empty line exits.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']).trim();
        if input.is_empty() {
            break;
        }

        // A bare number picks the matching quick reply from the last turn.
        let text = match input.parse::<usize>() {
            Ok(choice) if choice >= 1 && choice <= pending_replies.len() => {
                pending_replies[choice - 1].clone()
            }
            _ => input.to_string(),
        };

        conversation.push_user(text);
        // Each turn of the session gets its own id in the event log.
        engine.set_event_writer(turn_event_writer(args.events.as_ref()));
        let result = engine.run_turn(&TurnInput {
            conversation: &conversation,
            snapshot: &snapshot,
        });

        println!("{}", result.text);
        if !result.tool_calls.is_empty() {
            println!("[{} 个画布操作]", result.tool_calls.len());
            for call in &result.tool_calls {
                println!("  {}", serde_json::to_string(call)?);
            }
        }
        pending_replies.clear();
        for (idx, reply) in result.quick_replies.iter().enumerate() {
            println!("  {}. {}", idx + 1, reply.label);
            pending_replies.push(reply.input.clone());
        }
        if let Some(error) = &result.error {
            eprintln!("[{}] {}", error.kind, error.message);
        }
        conversation.push_assistant(result.text);
    }

    Ok(0)
}

fn build_engine(events: Option<&PathBuf>, text_model: Option<String>) -> Result<TurnEngine> {
    let mut engine = TurnEngine::from_env(turn_event_writer(events));
    if let Some(model) = text_model {
        engine.set_answer_model(model);
    }
    Ok(engine)
}

fn turn_event_writer(events: Option<&PathBuf>) -> EventWriter {
    match events {
        Some(path) => EventWriter::new(path, Uuid::new_v4().to_string()),
        None => EventWriter::disabled(),
    }
}

fn load_conversation(path: &PathBuf) -> Result<Conversation> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read conversation file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid conversation JSON in {}", path.display()))
}

fn load_snapshot(path: Option<&PathBuf>) -> Result<CanvasSnapshot> {
    let Some(path) = path else {
        return Ok(CanvasSnapshot::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read canvas file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid canvas JSON in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_turn_event_writer_gets_a_fresh_id() {
        let path = PathBuf::from("events.jsonl");
        let first = turn_event_writer(Some(&path));
        let second = turn_event_writer(Some(&path));
        assert_ne!(first.turn_id(), second.turn_id());
        assert!(!first.turn_id().is_empty());
    }

    #[test]
    fn no_events_path_disables_the_writer() {
        assert!(turn_event_writer(None).turn_id().is_empty());
    }
}
