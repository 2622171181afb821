use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use quiz_server::QuizServer;
use shared::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Quiz relay server")]
struct Cli {
    /// Path to server configuration (TOML)
    #[arg(short, long, default_value = "configs/server_config.toml")]
    config: PathBuf,

    /// Run without the operator console on stdin
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("quiz-server")?;

    let cli = Cli::parse();
    let config = ServerConfig::load_from_path(&cli.config)?;
    let server = QuizServer::new(config);
    server.run(!cli.headless).await
}
