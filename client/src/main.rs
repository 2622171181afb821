use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use quiz_client::app::QuizApp;
use shared::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quiz relay client")]
struct Cli {
    /// Path to client configuration JSON file
    #[arg(short, long, default_value = "configs/client_config.json")]
    config: PathBuf,

    /// Override the configured role (e.g. instructor, student)
    #[arg(long)]
    role: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the interactive relay (default)
    Relay,
    /// Receive the batch question broadcast
    Questions,
    /// Submit batch answers; reads `<question_id> <text>` lines when no id is given
    Answer {
        question_id: Option<String>,
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("quiz-client")?;

    let cli = Cli::parse();
    let mut config = ClientConfig::load_from_path(&cli.config)?;
    if let Some(role) = cli.role {
        config.sender_role = role;
    }

    let app = QuizApp::new(config);
    match cli.command.unwrap_or(Command::Relay) {
        Command::Relay => app.run_relay().await,
        Command::Questions => app.run_questions().await,
        Command::Answer { question_id, text } => app.run_answers(question_id, text).await,
    }
}
