mod chats;
mod run;

use std::sync::Arc;

use anyhow::Result;
use console::style;
use tracing::info;

use crate::core::api::HttpBackend;
use crate::core::config::{ClientConfig, ConnectionFlags};
use crate::core::session::{Coordinator, CoordinatorSettings};
use crate::core::terminal::{self, GuideSection, print_error};
use crate::interfaces::cli::CliInterface;
use crate::logging;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Chat")
        .command("tui", "Start the interactive terminal UI")
        .command("run", "Send one prompt and print the answer")
        .print();

    GuideSection::new("Inspect")
        .command("chats", "List conversations")
        .command("queue", "Show the generation queue")
        .command("models", "List available models")
        .print();

    GuideSection::new("Options")
        .text("--api-url <url>          Backend base URL (env: CONVOY_API_URL)")
        .text("--token <token>          Bearer token (env: CONVOY_TOKEN)")
        .blank()
        .text("run: --prompt, -p <text>  --chat, -c <id>  --new")
        .text("     --think  --rag [space..]  --model <id>")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("convoy").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RunCommandArgs {
    pub prompt: String,
    pub chat: Option<String>,
    pub new_chat: bool,
    pub thinking: bool,
    /// `Some(vec![])` asks for automatic space routing.
    pub rag: Option<Vec<String>>,
    pub model: Option<String>,
}

pub(crate) fn parse_run_command_args(args: &[String], start: usize) -> RunCommandArgs {
    let mut parsed = RunCommandArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--prompt" | "-p" => {
                if i + 1 < args.len() {
                    parsed.prompt = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--chat" | "-c" => {
                if i + 1 < args.len() {
                    parsed.chat = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--model" => {
                if i + 1 < args.len() {
                    parsed.model = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--new" => {
                parsed.new_chat = true;
                i += 1;
            }
            "--think" => {
                parsed.thinking = true;
                i += 1;
            }
            "--rag" => {
                // Space ids run until the next flag
                let mut spaces = Vec::new();
                i += 1;
                while i < args.len() && !args[i].starts_with('-') {
                    spaces.push(args[i].clone());
                    i += 1;
                }
                parsed.rag = Some(spaces);
            }
            _ => i += 1,
        }
    }
    parsed
}

pub(crate) fn parse_connection_flags(args: &[String], start: usize) -> ConnectionFlags {
    let mut flags = ConnectionFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--api-url" => {
                if i + 1 < args.len() {
                    flags.api_url = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--token" => {
                if i + 1 < args.len() {
                    flags.token = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    flags
}

pub(crate) fn connect_backend(config: &ClientConfig) -> Result<HttpBackend> {
    let backend = HttpBackend::new(
        &config.api_base,
        config.token.clone(),
        config.request_timeout(),
    )?;
    info!("Using backend at {}", backend.api_base());
    Ok(backend)
}

pub(crate) fn connect(config: &ClientConfig) -> Result<Arc<Coordinator>> {
    let backend = connect_backend(config)?;
    Ok(Coordinator::new(
        Arc::new(backend),
        CoordinatorSettings {
            poll_interval: config.poll_interval(),
        },
    ))
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let cmd = args[1].as_str();
    if matches!(cmd, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    // The TUI owns the terminal, so its logs go to the activity panel only.
    let log_tx = logging::init("warn", cmd == "tui");
    let flags = parse_connection_flags(&args, 2);

    match cmd {
        "tui" => {
            let config = ClientConfig::resolve(&flags).await?;
            let coordinator = connect(&config)?;
            let monitor = coordinator.spawn_queue_monitor();
            let (conversation_id, _resumed) = coordinator.bootstrap().await?;
            info!("TUI focused on [{}]", conversation_id);

            let mut cli = CliInterface::new(
                coordinator.clone(),
                Some(log_tx.subscribe()),
                config.default_thinking,
            );
            let res = cli.run_tui().await;
            coordinator.shutdown();
            let _ = monitor.await;
            if res.is_ok() {
                terminal::print_goodbye();
            }
            res
        }
        "run" => {
            let parsed = parse_run_command_args(&args, 2);
            if parsed.prompt.trim().is_empty() {
                print_error("Error: --prompt is required for run mode.");
                print_help();
                return Ok(());
            }
            let config = ClientConfig::resolve(&flags).await?;
            run::run_prompt(&config, &parsed).await
        }
        "chats" => {
            let config = ClientConfig::resolve(&flags).await?;
            chats::list_chats(&config).await
        }
        "queue" => {
            let config = ClientConfig::resolve(&flags).await?;
            chats::show_queue(&config).await
        }
        "models" => {
            let config = ClientConfig::resolve(&flags).await?;
            chats::list_models(&config).await
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
