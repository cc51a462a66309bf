//! `mnemos-cli` – Mnemos Command Line Interface
//!
//! The `mnemos` binary hosts one memory engine for an operator session.  It:
//!
//! 1. Checks for `~/.mnemos/config.toml`; runs a **First-Run Wizard** when the
//!    file is absent.
//! 2. Restores the SQLite snapshot, if one exists.
//! 3. Starts the background consolidation driver.
//! 4. Drops the user into an **interactive REPL** with slash-commands.
//! 5. Intercepts **Ctrl-C** to save the snapshot before exiting.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use mnemos_memory::MemoryEngine;
use mnemos_runtime::{ConsolidationDriver, TelemetrySettings, init_tracing, shared};

fn main() {
    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // Logs go through tracing (RUST_LOG, MNEMOS_LOG_FORMAT=json, optional
    // OTLP export); the shell's own output stays on println!.
    let telemetry = TelemetrySettings::from_env("mnemos")
        .with_engine(&cfg.memory)
        .with_agent(cfg.default_agent.clone());
    let _telemetry = init_tracing(&telemetry);

    let engine = match MemoryEngine::new(cfg.memory.clone()) {
        Ok(engine) => shared(engine),
        Err(e) => {
            eprintln!("{}: {}", "Cannot start memory engine".red(), e);
            std::process::exit(1);
        }
    };

    // ── Snapshot restore ──────────────────────────────────────────────────
    let snapshot = cfg.snapshot_file(&config::home_dir());
    match repl::load_snapshot(&engine, &snapshot, None) {
        Ok(0) => {}
        Ok(n) => println!(
            "  Restored {} memories from {}",
            n.to_string().bold(),
            snapshot.display().to_string().dimmed()
        ),
        Err(e) => warn!(error = %e, path = %snapshot.display(), "snapshot restore failed"),
    }

    // ── Consolidation driver ──────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Cannot start Tokio runtime".red(), e);
            std::process::exit(1);
        }
    };
    let driver = {
        let _guard = runtime.enter();
        ConsolidationDriver::spawn(
            engine.clone(),
            Duration::from_secs(cfg.consolidation_interval_secs),
        )
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let ctrlc_engine = engine.clone();
    let ctrlc_snapshot = snapshot.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – saving memories …".yellow().bold());
        match repl::save_snapshot(&ctrlc_engine, &ctrlc_snapshot) {
            Ok(n) => println!("{}", format!("  ✓ {n} memories saved.").green()),
            Err(e) => println!("{}: {}", "  Snapshot failed".red(), e),
        }
        println!("{}", "  ✓ Exiting Mnemos.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; memories will not be saved on Ctrl-C");
    }

    println!();
    println!(
        "  Acting as {}. Type {} for a list of commands.\n",
        cfg.default_agent.bold(),
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    let mut session = repl::Session::new(engine, cfg.default_agent.clone(), snapshot);
    repl::run(&mut session, shutdown);

    let completed = runtime.block_on(driver.shutdown());
    info!(completed, "background consolidation passes this session");
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Mnemos First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Mnemos.\n");

    let mut cfg = config::Config::default();

    cfg.default_agent = prompt_line(
        &format!("  Agent id for this shell [{}]: ", cfg.default_agent),
        &cfg.default_agent,
    );

    let secs = prompt_line(
        &format!(
            "  Seconds between consolidation passes [{}]: ",
            cfg.consolidation_interval_secs
        ),
        &cfg.consolidation_interval_secs.to_string(),
    );
    if let Ok(s) = secs.trim().parse::<u64>() {
        cfg.consolidation_interval_secs = s;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __  ___                          "#.bold().cyan());
    println!("{}", r#"  /  |/  /__  ___ __ _  ___  ___   "#.bold().cyan());
    println!("{}", r#" / /|_/ / _ \/ -_)  ' \/ _ \(_-<   "#.bold().cyan());
    println!("{}", r#"/_/  /_/_//_/\__/_/_/_/\___/___/   "#.bold().cyan());
    println!();
    println!("  {} {}",
        "Mnemos".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Shared semantic memory for agent fleets");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
