//! `cortex` – runs a mode-aware agent from a configuration file.
//!
//! 1. Loads and validates the configuration (legacy single-mode files are
//!    up-converted); a bad configuration exits with status 2.
//! 2. Activates the starting mode, restoring the remembered one when mode
//!    memory is enabled.
//! 3. Ticks until **Ctrl-C** or `/quit`, then shuts down cleanly.
//!
//! Logging follows `RUST_LOG`; `CORTEX_LOG_FORMAT=json` switches to JSON
//! lines and `OTEL_EXPORTER_OTLP_ENDPOINT` enables span export.

mod args;
mod console;

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use cortex_runtime::{Cortex, EventPayload, EventSubscriber, init_tracing};
use cortex_transition::ModeMemory;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use args::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::from(64);
        }
    };

    let _telemetry = init_tracing("cortex");
    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let path = match args.config_path() {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::from(2);
        }
    };
    let config = match cortex_config::load_from_path(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::from(2);
        }
    };
    println!(
        "  Config {} v{} loaded from {}",
        config.name.bold(),
        config.version,
        path.display().to_string().dimmed()
    );

    let memory_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_path_buf())
        .unwrap_or_else(cortex_config::config_dir);
    let mut builder = Cortex::builder(config.clone());
    if args.mode_memory {
        builder = builder.mode_memory(ModeMemory::for_config(&memory_dir, &config.name));
    }
    let cortex = Arc::new(builder.build());

    // ── Activation ────────────────────────────────────────────────────────
    let events = cortex.subscribe();
    if let Err(e) = cortex.initialize().await {
        eprintln!("{}: {}", "Startup failed".red(), e);
        return ExitCode::FAILURE;
    }
    println!(
        "  {} Running in mode {}.",
        "✓".green().bold(),
        cortex.current_mode().bold()
    );
    if let Some(interval) = args.hot_reload {
        cortex.watch_config(&path, interval);
        println!("  Watching {} every {:?}.", path.display(), interval);
    }

    let cancel = CancellationToken::new();
    let printer = tokio::spawn(print_events(events, cancel.clone()));
    let runner = {
        let cortex = Arc::clone(&cortex);
        let cancel = cancel.clone();
        tokio::spawn(async move { cortex.run(cancel).await })
    };
    if args.console {
        println!("  Type {} for a list of commands.\n", "/help".bold().cyan());
        tokio::spawn(console::run(Arc::clone(&cortex), cancel.clone()));
    }

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "cannot listen for Ctrl-C");
            }
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    if let Err(e) = runner.await {
        warn!(error = %e, "tick loop ended abnormally");
    }
    cortex.shutdown().await;
    let _ = printer.await;
    println!("{}", "  ✓ Cortex stopped.".green());
    ExitCode::SUCCESS
}

/// Echo mode changes and reloads for the operator.
async fn print_events(mut events: EventSubscriber, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        match event.payload {
            EventPayload::ModeChanged { from, to, reason } => println!(
                "  {} {} → {} ({})",
                "mode".cyan(),
                from,
                to.bold(),
                reason.dimmed()
            ),
            EventPayload::ConfigReloaded { version } => {
                println!("  {} configuration v{}", "reloaded".cyan(), version)
            }
            _ => {}
        }
    }
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "Cortex".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Mode-aware agent runtime");
    println!();
}
