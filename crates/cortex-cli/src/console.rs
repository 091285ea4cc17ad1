//! Operator console on stdin.
//!
//! Supported slash-commands:
//!   /status        – current mode, tick and config version
//!   /modes         – list configured modes
//!   /mode <name>   – switch modes manually
//!   /help          – show this list
//!   /quit | /exit  – stop the runtime

use std::sync::Arc;

use colored::Colorize;
use cortex_runtime::Cortex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Modes,
    Switch(String),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        match (words.next(), words.next(), words.next()) {
            (None, _, _) => Command::Empty,
            (Some("/status"), None, _) => Command::Status,
            (Some("/modes"), None, _) => Command::Modes,
            (Some("/mode"), Some(name), None) => Command::Switch(name.to_string()),
            (Some("/help"), None, _) => Command::Help,
            (Some("/quit" | "/exit"), None, _) => Command::Quit,
            _ => Command::Unknown(line.trim().to_string()),
        }
    }
}

/// Read commands until EOF, `/quit` or `cancel` fires.  `/quit` cancels.
pub async fn run(cortex: Arc<Cortex>, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Status => cmd_status(&cortex),
            Command::Modes => cmd_modes(&cortex),
            Command::Switch(target) => match cortex.request_transition(&target).await {
                Ok(()) => println!("{} {}", "✓ Switched to".green(), target.bold()),
                Err(e) => println!("{}: {}", "Switch refused".red(), e),
            },
            Command::Help => cmd_help(),
            Command::Quit => {
                println!("{}", "Stopping.".green());
                cancel.cancel();
                break;
            }
            Command::Unknown(other) => println!(
                "{} '{}'. Type {} for available commands.",
                "Unknown command:".red(),
                other.yellow(),
                "/help".bold()
            ),
        }
    }
}

fn cmd_status(cortex: &Cortex) {
    let config = cortex.config();
    let mode = cortex.current_mode();
    let display = config
        .mode(&mode)
        .map(|m| m.display_name.clone())
        .unwrap_or_default();
    println!("{}", "Status".bold().underline());
    println!("  System  : {} v{}", config.name.bold(), config.version);
    println!("  Mode    : {} ({})", mode.yellow(), display);
    println!("  Tick    : {}", cortex.inputs().tick());
    println!("  Period  : {:?}", cortex.period());
}

fn cmd_modes(cortex: &Cortex) {
    let config = cortex.config();
    let current = cortex.current_mode();
    println!("{}", "Modes".bold().underline());
    for (name, mode) in &config.modes {
        let marker = if *name == current { "▶" } else { " " };
        println!(
            "  {} {} – {}",
            marker.green(),
            name.bold(),
            mode.description.dimmed()
        );
    }
    if !config.allow_manual_switching {
        println!("  {}", "(manual switching is disabled)".dimmed());
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Cortex Commands".bold().underline());
    println!("  {}        – current mode and tick", "/status".bold().cyan());
    println!("  {}         – list configured modes", "/modes".bold().cyan());
    println!("  {}   – switch modes", "/mode <name>".bold().cyan());
    println!("  {}  – stop the runtime", "/quit  /exit".bold().cyan());
    println!();
}
