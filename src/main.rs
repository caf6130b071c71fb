//! ctxchat - streaming chat REPL over a token-budgeted context window.
//!
//! Thin binary entry point; all conversation logic lives in `ctxchat-core`.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use ctxchat_core::config::constants::env_vars;
use ctxchat_core::config::SessionConfig;
use ctxchat_core::llm::gemini::GeminiClient;
use ctxchat_core::llm::provider::{GenerationBackend, TokenCounter};
use ctxchat_core::ChatSession;

#[derive(Debug, Parser)]
#[command(name = "ctxchat", about = "Streaming chat with token-budgeted context", version)]
struct Cli {
    /// Model identifier, overriding the configured one.
    #[arg(long)]
    model: Option<String>,

    /// Path to a ctxchat.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(model) = args.model {
        config.model = model;
    }

    debug!(
        model = %config.model,
        max_context_tokens = config.budget.max_context_tokens,
        "session configured"
    );

    let api_key = std::env::var(env_vars::GEMINI_API_KEY)
        .with_context(|| format!("{} is not set", env_vars::GEMINI_API_KEY))?;
    let client = Arc::new(GeminiClient::new(api_key, config.model.clone()));
    let counter: Arc<dyn TokenCounter> = client.clone();
    let backend: Arc<dyn GenerationBackend> = client;

    let mut session = ChatSession::new(config, counter, backend);

    println!("ctxchat ready. Lines starting with ':' are commands; try :help.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(command) = line.strip_prefix(':') {
            if !handle_command(&mut session, command).await? {
                break;
            }
            continue;
        }

        match session.chat(line, print_fragment).await {
            Ok(_) => println!(),
            Err(err) => eprintln!("error: {err}"),
        }
    }
    Ok(())
}

fn print_fragment(fragment: &str) {
    print!("{fragment}");
    let _ = std::io::stdout().flush();
}

/// Returns false when the REPL should exit.
async fn handle_command(session: &mut ChatSession, command: &str) -> Result<bool> {
    let (name, rest) = match command.split_once(' ') {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };
    match name {
        "quit" | "q" => return Ok(false),
        "help" => {
            println!(":history            show the conversation so far");
            println!(":edit <i> <text>    rewrite prompt i and regenerate its reply");
            println!(":redo <i>           regenerate the reply of turn i");
            println!(":delete <i>         remove turn i");
            println!(":export <path>      write the history as JSON");
            println!(":import <path>      replace the history from JSON");
            println!(":quit               exit");
        }
        "history" => {
            for (i, turn) in session.history().iter().enumerate() {
                println!("[{i}] you:   {}", turn.user_input);
                println!("[{i}] model: {}", turn.response);
            }
        }
        "edit" => {
            let (index, text) = rest
                .split_once(' ')
                .context("usage: :edit <index> <text>")?;
            let index: usize = index.parse().context("index must be a number")?;
            match session.edit_user_input(index, text.trim(), print_fragment).await {
                Ok(_) => println!(),
                Err(err) => eprintln!("error: {err}"),
            }
        }
        "redo" => {
            let index: usize = rest.parse().context("usage: :redo <index>")?;
            match session.regenerate(index, print_fragment).await {
                Ok(_) => println!(),
                Err(err) => eprintln!("error: {err}"),
            }
        }
        "delete" => {
            let index: usize = rest.parse().context("usage: :delete <index>")?;
            match session.delete(index) {
                Ok(_) => println!("deleted turn {index}"),
                Err(err) => eprintln!("error: {err}"),
            }
        }
        "export" => {
            let payload = session.export()?;
            std::fs::write(rest, payload)
                .with_context(|| format!("failed to write {rest}"))?;
            println!("exported to {rest}");
        }
        "import" => {
            let payload = std::fs::read_to_string(rest)
                .with_context(|| format!("failed to read {rest}"))?;
            match session.import(&payload) {
                Ok(()) => println!("imported {} turns", session.history().len()),
                Err(err) => eprintln!("error: {err}"),
            }
        }
        other => eprintln!("unknown command :{other}; try :help"),
    }
    Ok(true)
}
