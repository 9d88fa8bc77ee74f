//! Dash - The in-app teaching assistant
//!
//! Routes what teachers, principals and parents type or say:
//! - Entity extraction and intent classification
//! - Action resolution and the auto-execute gate
//! - Screen navigation, reminders and message drafts
//! - General answers through the hosted LLM gateway
//! - Voice turns with transcription and text-to-speech
//!
//! The binary runs a development REPL against the configured backend
//! functions, printing navigation instead of driving a device.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod action;
mod assistant;
mod config;
mod context;
mod dispatcher;
mod entities;
mod error;
mod gateway;
mod intent;
mod policy;
mod prompts;
mod services;
mod speech;

use crate::assistant::{Assistant, Collaborators, TurnOutcome};
use crate::config::DashConfig;
use crate::context::{RawInput, UserProfile, UserRole};
use crate::error::DashError;
use crate::policy::AutonomyLevel;
use crate::services::{AudioInput, ConsoleNavigator, Navigator, SpeechOutput};

#[derive(Parser, Debug)]
#[command(name = "dash")]
#[command(about = "Dash - the EduDash teaching assistant")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "dash.toml")]
    config: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Role of the simulated user (teacher, principal, parent, student, admin)
    #[arg(short, long, default_value = "teacher")]
    role: String,

    /// Display name of the simulated user
    #[arg(short, long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG overrides the default filter (e.g. RUST_LOG=dash_assistant=trace)
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("dash_assistant={}", default_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.verbose)
                .with_file(args.verbose)
                .with_line_number(args.verbose),
        )
        .init();

    let config = DashConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;
    info!("Configuration loaded from {}", args.config);

    let role: UserRole = args.role.parse()?;
    let mut profile = UserProfile::new(role);
    if let Some(name) = args.name {
        profile = profile.with_name(name);
    }

    let navigator: Arc<dyn Navigator> = Arc::new(ConsoleNavigator);
    let collaborators = Collaborators::http(&config, navigator)?;
    let assistant = Assistant::new(&config, collaborators).await?;
    info!(gateway = %config.gateway_url, model = %config.model, "Assistant ready");

    // Hourly cleanup of idle conversations
    let cleanup_sessions = assistant.sessions().clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let removed = cleanup_sessions.cleanup_stale_sessions(None).await;
            if removed > 0 {
                info!(removed_sessions = removed, "Periodic session cleanup completed");
            }
        }
    });

    run_dev_cli(&assistant, profile).await
}

fn print_help() {
    println!("Commands:");
    println!("  /new                 start a fresh conversation");
    println!("  /voice <audio-url>   run a voice turn on a recording");
    println!("  /autonomy <level>    manual, balanced or autonomous");
    println!("  quit | exit          leave");
}

fn print_turn(turn: &TurnOutcome) {
    println!(
        "  [{} {:.2} -> {}]",
        turn.classification.intent,
        turn.classification.confidence,
        turn.action.kind()
    );
    for effect in &turn.side_effects {
        match serde_json::to_string(effect) {
            Ok(json) => println!("  [effect] {}", json),
            Err(_) => println!("  [effect] {:?}", effect),
        }
    }
    println!("\n{}\n", turn.reply);
}

/// Replace a conversation the assistant no longer knows about
async fn restart(assistant: &Assistant, profile: &UserProfile, error: &DashError) -> String {
    warn!(error = %error, "Conversation lost, starting a new one");
    let conversation_id = assistant.start_conversation(profile.clone()).await;
    println!(
        "  [conversation expired, started {}; please repeat your request]",
        conversation_id
    );
    conversation_id
}

/// Line-oriented REPL for trying the assistant from a terminal
async fn run_dev_cli(assistant: &Assistant, profile: UserProfile) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    let mut conversation_id = assistant.start_conversation(profile.clone()).await;

    if interactive {
        println!("\n=== Dash Development CLI ===");
        println!("Signed in as a {}. Type /help for commands.\n", profile.role);
    }

    let stdin = io::stdin();
    loop {
        if interactive {
            print!("dash> ");
            io::stdout().flush()?;
        }

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "quit" || input == "exit" {
            break;
        }

        if input == "/help" {
            print_help();
        } else if input == "/new" {
            assistant.sessions().end_conversation(&conversation_id).await;
            conversation_id = assistant.start_conversation(profile.clone()).await;
            println!("  [new conversation {}]", conversation_id);
        } else if let Some(level) = input.strip_prefix("/autonomy") {
            match level.parse::<AutonomyLevel>() {
                Ok(level) => {
                    match assistant.set_autonomy(&conversation_id, level).await {
                        Ok(()) => println!("  [autonomy {:?}]", level),
                        Err(e) => println!("  Error: {}", e),
                    }
                }
                Err(e) => println!("  {}", e),
            }
        } else if let Some(uri) = input.strip_prefix("/voice") {
            let uri = uri.trim();
            if uri.is_empty() {
                println!("  usage: /voice <audio-url>");
                continue;
            }
            let outcome = match assistant
                .handle_voice(&conversation_id, AudioInput::new(uri))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) if e.is_precondition() => {
                    conversation_id = restart(assistant, &profile, &e).await;
                    continue;
                }
                Err(e) => {
                    println!("\nError: {}\n", e);
                    continue;
                }
            };
            match &outcome.turn {
                Some(turn) => print_turn(turn),
                None => println!("\n{}\n", outcome.reply),
            }
            match outcome.speech {
                SpeechOutput::Audio { url } => println!("  [audio] {}", url),
                SpeechOutput::DeviceFallback { language, .. } => {
                    println!("  [device speech, {}]", language)
                }
            }
        } else {
            match assistant
                .handle_input(RawInput::new(conversation_id.as_str(), input))
                .await
            {
                Ok(turn) => print_turn(&turn),
                Err(e) if e.is_precondition() => {
                    conversation_id = restart(assistant, &profile, &e).await;
                }
                Err(e) => println!("\nError: {}\n", e),
            }
        }
    }

    assistant.sessions().end_conversation(&conversation_id).await;
    if interactive {
        println!("Goodbye!");
    }
    Ok(())
}
