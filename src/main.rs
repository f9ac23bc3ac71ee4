mod assistant;
mod citation;
mod config;
mod error;
mod prompt;
mod providers;
mod session;
mod store;

use anyhow::Result;
use assistant::{Answer, Assistant, AssistantSettings, CHANNEL_CAPACITY};
use clap::{Parser, Subcommand};
use crate::config::{AikaraConfig, CliOverrides, ConfigManager};
use dialoguer::Select;
use providers::{StreamChunk, create_provider};
use session::{ChatRole, ChatSession};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use store::{ScoredChunk, VectorStore};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Parser)]
#[command(name = "aikara", version, about = "AIKARA - AI teaching assistant for recorded lectures")]
struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Vector store file (overrides store.path)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Chat model used for answers (overrides ollama.chat_model)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Number of transcript chunks to retrieve (overrides retrieval.top_k)
    #[arg(long, global = true)]
    top_k: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question (non-interactive)
    Ask {
        /// The question to answer
        question: String,
    },
    /// Show the transcript chunks a question retrieves, without generating
    Search {
        /// The question to search for
        question: String,
    },
    /// Show version, vector store and inference service status
    Info,
    /// List models installed on the inference service
    Models,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get {
        /// Key to get (e.g., "ollama.chat_model", "all")
        key: String,
    },
    /// Set a config value
    Set {
        /// Key to set (e.g., "retrieval.top_k")
        key: String,
        /// Value to set
        value: String,
    },
    /// Print the config file location
    Path,
}

/// JSON envelope for non-interactive output
fn json_output(success: bool, data: serde_json::Value, error: Option<&str>) -> String {
    serde_json::json!({
        "success": success,
        "data": data,
        "error": error,
    })
    .to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Check for --json flag before initializing logging
    let json_mode = std::env::args().any(|arg| arg == "--json");

    // Initialize structured logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("aikara=info"));

    if json_mode {
        // In JSON mode: send logs to stderr with no ANSI colors
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    } else if std::env::var("AIKARA_LOG_JSON").is_ok() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }

    let cli = Cli::parse();
    let overrides = CliOverrides {
        store: cli.store,
        model: cli.model,
        top_k: cli.top_k,
    };

    // If a subcommand was provided, run non-interactively
    if let Some(command) = cli.command {
        if let Err(e) = run_command(command, &overrides, cli.json).await {
            if cli.json {
                println!(
                    "{}",
                    json_output(false, serde_json::Value::Null, Some(&format!("{:#}", e)))
                );
            } else {
                eprintln!("Error: {:#}", e);
            }
            std::process::exit(1);
        }
        return Ok(());
    }

    run_repl(&overrides).await
}

/// Effective configuration: file and environment, then CLI flags.
fn effective_config(manager: &ConfigManager, overrides: &CliOverrides) -> AikaraConfig {
    let mut config = manager.get().clone();
    config.apply_overrides(overrides);
    config
}

fn build_assistant(config: &AikaraConfig) -> Result<Assistant> {
    let store = VectorStore::load(&config.store.path).map_err(|e| {
        anyhow::anyhow!(
            "{}. Point --store or `aikara config set store.path <file>` at the preprocessed embeddings.",
            e
        )
    })?;
    let provider = create_provider(config)?;

    Ok(Assistant::new(
        Arc::new(store),
        provider,
        AssistantSettings::from(config),
    ))
}

// ============================================================================
// Non-Interactive Command Runner
// ============================================================================

async fn run_command(command: Commands, overrides: &CliOverrides, json_mode: bool) -> Result<()> {
    let mut config_manager = ConfigManager::new()?;

    match command {
        Commands::Ask { question } => {
            let config = effective_config(&config_manager, overrides);
            let assistant = build_assistant(&config)?;

            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            // JSON consumers get the finished answer only
            let printer = if json_mode {
                drop(rx);
                None
            } else {
                Some(spawn_stream_printer(rx))
            };

            let answer = assistant.ask(&question, tx).await?;
            if let Some(printer) = printer {
                let _ = printer.await;
            }

            if json_mode {
                println!(
                    "{}",
                    json_output(
                        true,
                        serde_json::json!({
                            "question": question,
                            "answer": answer.clean.text,
                            "source": answer.clean.source_line(),
                            "citations": answer.clean.citations,
                            "raw": answer.raw,
                            "retrieved": answer.retrieved,
                            "usage": answer.usage,
                        }),
                        None
                    )
                );
            } else {
                print_answer_footer(&answer);
            }
        }
        Commands::Search { question } => {
            let config = effective_config(&config_manager, overrides);
            let assistant = build_assistant(&config)?;
            let results = assistant.retrieve(&question).await?;

            if json_mode {
                println!(
                    "{}",
                    json_output(true, serde_json::json!({ "results": results }), None)
                );
            } else {
                print_chunks(&results);
            }
        }
        Commands::Info => {
            let config = effective_config(&config_manager, overrides);
            let version = env!("CARGO_PKG_VERSION");
            let platform = std::env::consts::OS;

            let store_stats = VectorStore::load(&config.store.path).map(|s| s.stats());
            let provider = create_provider(&config)?;
            let info = provider.info();
            let reachable = provider.health_check().await;

            if json_mode {
                println!(
                    "{}",
                    json_output(
                        true,
                        serde_json::json!({
                            "name": "aikara",
                            "version": version,
                            "platform": platform,
                            "store": {
                                "path": config.store.path.display().to_string(),
                                "stats": store_stats.as_ref().ok(),
                                "error": store_stats.as_ref().err().map(|e| e.to_string()),
                            },
                            "provider": {
                                "name": info.name,
                                "base_url": info.base_url,
                                "embed_model": info.embed_model,
                                "chat_model": info.chat_model,
                                "reachable": reachable.is_ok(),
                            },
                        }),
                        None
                    )
                );
            } else {
                println!("AIKARA v{}", version);
                println!("Platform: {}", platform);
                println!("Vector store: {}", config.store.path.display());
                match &store_stats {
                    Ok(stats) => println!(
                        "  {} chunks, {} lectures, dimension {}",
                        stats.chunks, stats.lectures, stats.dimension
                    ),
                    Err(e) => println!("  unavailable: {}", e),
                }
                println!("Inference: {} at {}", info.display_name, info.base_url);
                println!("  embed model: {}", info.embed_model);
                println!("  chat model:  {}", info.chat_model);
                match reachable {
                    Ok(()) => println!("  status: reachable"),
                    Err(e) => println!("  status: {}", e),
                }
            }
        }
        Commands::Models => {
            let config = effective_config(&config_manager, overrides);
            let provider = create_provider(&config)?;
            let models = provider.list_available_models().await?;

            if json_mode {
                println!(
                    "{}",
                    json_output(true, serde_json::json!({ "models": models }), None)
                );
            } else if models.is_empty() {
                println!("No models installed on {}", provider.info().base_url);
            } else {
                for model in &models {
                    let marker = if model.name.starts_with(&config.ollama.chat_model) {
                        " [CURRENT]"
                    } else {
                        ""
                    };
                    println!("  {}{}", model.name, marker);
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Get { key } => {
                let config = config_manager.get();
                if key == "all" {
                    let data = serde_json::to_value(config)?;
                    if json_mode {
                        println!("{}", json_output(true, data, None));
                    } else {
                        show_config(config);
                    }
                } else {
                    let value = config.get_value(&key).ok_or_else(|| {
                        anyhow::anyhow!(
                            "Unknown config key '{}'. Valid keys: {}",
                            key,
                            AikaraConfig::KEYS.join(", ")
                        )
                    })?;
                    if json_mode {
                        println!(
                            "{}",
                            json_output(true, serde_json::json!({ "key": key, "value": value }), None)
                        );
                    } else {
                        println!("{}", value);
                    }
                }
            }
            ConfigAction::Set { key, value } => {
                config_manager.set(&key, &value)?;
                if json_mode {
                    println!(
                        "{}",
                        json_output(true, serde_json::json!({ "key": key, "value": value }), None)
                    );
                } else {
                    println!("Set {} = {}", key, value);
                }
            }
            ConfigAction::Path => {
                let path = config_manager.config_path().display().to_string();
                if json_mode {
                    println!("{}", json_output(true, serde_json::json!({ "path": path }), None));
                } else {
                    println!("{}", path);
                }
            }
        },
    }

    Ok(())
}

// ============================================================================
// Interactive REPL
// ============================================================================

async fn run_repl(overrides: &CliOverrides) -> Result<()> {
    let mut config_manager = ConfigManager::new()?;
    let config = effective_config(&config_manager, overrides);
    let mut assistant = build_assistant(&config)?;
    let mut session = ChatSession::new();
    let mut last_sources: Vec<ScoredChunk> = Vec::new();

    if let Err(e) = assistant.provider().health_check().await {
        println!("Warning: {}", e);
    }

    println!("AIKARA - AI-powered teaching assistant");
    println!(
        "Model: {} | Store: {} ({} chunks, {}-dim embeddings)",
        assistant.settings().chat_model,
        config.store.path.display(),
        assistant.store().len(),
        assistant.store().dimension()
    );
    println!("Ask a question (English or Hindi). Type /help for commands, /exit to quit\n");

    let stdin = io::stdin();

    loop {
        print!("aikara> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            // EOF
            println!();
            break;
        }
        let input = input.trim();

        match input {
            "" => continue,
            "/exit" | "/quit" => {
                println!("Goodbye!");
                break;
            }
            "/help" => {
                print_help();
                continue;
            }
            "/history" => {
                print_history(&session);
                continue;
            }
            "/clear" => {
                session.clear();
                last_sources.clear();
                println!("History cleared.");
                continue;
            }
            "/sources" => {
                if last_sources.is_empty() {
                    println!("No question asked yet.");
                } else {
                    print_chunks(&last_sources);
                }
                continue;
            }
            "/config" => {
                show_config(&effective_config(&config_manager, overrides));
                continue;
            }
            "/models" => {
                let models = match assistant.provider().list_available_models().await {
                    Ok(models) => models,
                    Err(e) => {
                        println!("Error: {}", e);
                        continue;
                    }
                };
                if models.is_empty() {
                    println!("No models installed.");
                    continue;
                }

                let items: Vec<String> = models
                    .iter()
                    .map(|m| {
                        if m.name.starts_with(&assistant.settings().chat_model) {
                            format!("{} [CURRENT]", m.name)
                        } else {
                            m.name.clone()
                        }
                    })
                    .collect();
                let default_selection = models
                    .iter()
                    .position(|m| m.name.starts_with(&assistant.settings().chat_model))
                    .unwrap_or(0);

                let selection = Select::new()
                    .with_prompt("Select a model (use arrow keys, Enter to confirm)")
                    .items(&items)
                    .default(default_selection)
                    .interact()
                    .map_err(error::AikaraError::from)?;

                let selected = models[selection].name.clone();
                set_model(&mut config_manager, &mut assistant, &selected)?;
                continue;
            }
            cmd if cmd.starts_with("/model ") => {
                let model_name = cmd.trim_start_matches("/model ").trim();
                if model_name.is_empty() {
                    println!("Usage: /model <name>");
                } else {
                    set_model(&mut config_manager, &mut assistant, model_name)?;
                }
                continue;
            }
            "/model" => {
                println!("Current model: {}", assistant.settings().chat_model);
                continue;
            }
            cmd if cmd.starts_with('/') => {
                println!("Unknown command: {}. Type /help for commands.", cmd);
                continue;
            }
            _ => {}
        }

        session.push_user(input);

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let printer = spawn_stream_printer(rx);
        let result = assistant.ask(input, tx).await;
        let _ = printer.await;

        match result {
            Ok(answer) => {
                print_answer_footer(&answer);
                session.push_assistant(answer.clean.text.clone(), answer.clean.source_line());
                last_sources = answer.retrieved;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to answer question");
                println!("\nError: {}", e);
            }
        }
    }

    Ok(())
}

fn set_model(
    config_manager: &mut ConfigManager,
    assistant: &mut Assistant,
    model: &str,
) -> Result<()> {
    config_manager.set("ollama.chat_model", model)?;
    assistant.set_chat_model(model);
    println!("Model set to {}", model);
    Ok(())
}

/// Print content deltas as they arrive.
fn spawn_stream_printer(mut rx: mpsc::Receiver<StreamChunk>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::ContentDelta(delta) => {
                    let _ = write!(stdout, "{}", delta);
                    let _ = stdout.flush();
                }
                StreamChunk::Usage(usage) => {
                    tracing::debug!(
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "Generation usage"
                    );
                }
                StreamChunk::Done => {
                    let _ = writeln!(stdout);
                }
            }
        }
    })
}

/// After streaming: the cleaned answer (when cleanup changed it) and the source line.
fn print_answer_footer(answer: &Answer) {
    if !answer.clean.citations.is_empty() {
        println!("\n{}", answer.clean.text);
    }
    println!("  {}\n", answer.clean.source_line());
}

fn print_chunks(chunks: &[ScoredChunk]) {
    for (rank, chunk) in chunks.iter().enumerate() {
        println!(
            "{}. [{:.3}] Lecture {} - {} @ {}",
            rank + 1,
            chunk.score,
            chunk.number,
            chunk.title,
            citation::format_timestamp(&chunk.start.to_string())
        );
        println!("   {}", chunk.text.trim());
    }
}

fn print_history(session: &ChatSession) {
    if session.is_empty() {
        println!("No messages yet.");
        return;
    }

    println!("{} messages in session {}", session.len(), session.id);
    for turn in session.turns() {
        let who = match turn.role {
            ChatRole::User => "you",
            ChatRole::Assistant => "aikara",
        };
        println!("[{}] {}: {}", turn.at.format("%H:%M:%S"), who, turn.content);
        if let Some(source) = &turn.source {
            println!("           {}", source);
        }
    }
}

fn show_config(config: &AikaraConfig) {
    println!("Current configuration:");
    for key in AikaraConfig::KEYS {
        println!(
            "  {}: {}",
            key,
            config.get_value(key).unwrap_or_else(|| "not set".to_string())
        );
    }
}

fn print_help() {
    println!("\nAIKARA Commands:");
    println!("  /help          - Show this help message");
    println!("  /history       - Show this session's questions and answers");
    println!("  /clear         - Clear the session history");
    println!("  /sources       - Show the transcript chunks behind the last answer");
    println!("  /models        - Pick a chat model installed on the inference service");
    println!("  /model <name>  - Set the chat model (e.g., /model llama3.2)");
    println!("  /model         - Show the current chat model");
    println!("  /config        - View current configuration");
    println!("  /exit or /quit - Exit\n");
}
