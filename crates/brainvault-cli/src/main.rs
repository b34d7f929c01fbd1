//! `brainvault` – interactive shell over the persistent memory store.
//!
//! The binary:
//!
//! 1. Loads `~/.brainvault/config.toml`, writing defaults on first run.
//! 2. Opens (or creates) the SQLite-backed [`Brain`].
//! 3. Drops the user into a REPL with slash-commands (`/remember`,
//!    `/context`, `/consolidate`, `/help`, …).
//! 4. Turns the first Ctrl-C during consolidation into a cooperative stop;
//!    a second Ctrl-C exits immediately.

mod config;
mod repl;
mod telemetry;

use brainvault_memory::{Brain, CancelFlag};
use colored::Colorize;
use std::process::ExitCode;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let _telemetry = telemetry::init_tracing("brainvault");

    print_banner();

    let cfg = match config::load_or_init() {
        Ok((cfg, created)) => {
            let verb = if created { "Wrote default config to" } else { "Config loaded from" };
            println!("  {} {}", verb, config::config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            error!(error = %e, "configuration rejected");
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(dir) = cfg.database_path.parent()
        && let Err(e) = config::create_private_dir(dir)
    {
        println!("{}: {}", "Cannot create data directory".red(), e);
        return ExitCode::FAILURE;
    }

    let brain = match Brain::open(&cfg.database_path, cfg.memory.clone()) {
        Ok(brain) => brain,
        Err(e) => {
            error!(error = %e, path = %cfg.database_path.display(), "failed to open memory store");
            println!("{}: {}", "Failed to open memory store".red(), e);
            return ExitCode::FAILURE;
        }
    };
    info!(path = %cfg.database_path.display(), "memory store open");
    println!("  Memory store {}", cfg.database_path.display().to_string().bold());

    let cancel = CancelFlag::new();
    install_ctrlc(cancel.clone());

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::run(&brain, &cancel, &config::history_path());
    ExitCode::SUCCESS
}

/// Rustyline reads Ctrl-C itself while at the prompt, so this handler only
/// fires while a command runs.
fn install_ctrlc(cancel: CancelFlag) {
    let result = ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            println!();
            println!("{}", "  ✓ Exiting BrainVault.".green());
            std::process::exit(130);
        }
        cancel.cancel();
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping after the current chunk (again to exit) …"
                .yellow()
                .bold()
        );
    });
    if let Err(e) = result {
        warn!(error = %e, "failed to install Ctrl-C handler; consolidation cannot be interrupted");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___           _      _   __          ____ "#.bold().cyan());
    println!("{}", r#"  / _ )_______ _(_)__  | | / /__ ___ __/ / /_"#.bold().cyan());
    println!("{}", r#" / _  / __/ _ `/ / _ \ | |/ / _ `/ // / / __/"#.bold().cyan());
    println!("{}", r#"/____/_/  \_,_/_/_//_/ |___/\_,_/\_,_/_/\__/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "BrainVault".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Persistent memory for assistants");
    println!();
}
