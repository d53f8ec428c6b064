//! `cobot-cli` – interactive driver for the robot companion.
//!
//! This binary:
//!
//! 1. Loads `~/.cobot/config.toml`, writing a default file on first run.
//! 2. Installs logging (and OTLP export when configured).
//! 3. Wires a simulated robot, the BLE link manager and the perception
//!    supervisor together.
//! 4. Drops the user into an interactive shell (`/help` lists commands).
//! 5. Intercepts **Ctrl-C** to send `Stop`, raise an alert and exit.

mod config;
mod repl;
mod session;

use std::sync::Arc;

use colored::Colorize;
use tracing::{error, warn};

use session::Session;

fn main() {
    let cfg = load_config();
    let _telemetry = cobot_runtime::init_tracing("cobot", &cfg.log_filter);

    print_banner();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "could not start the async runtime");
            std::process::exit(1);
        }
    };

    let session = match Session::new(cfg, runtime.handle().clone()) {
        Ok(session) => Arc::new(session),
        Err(e) => {
            println!("{}: {e}", "Invalid configuration".red());
            std::process::exit(2);
        }
    };

    // Fires when the terminal is not in raw mode, i.e. outside `readline`.
    let ctrlc_session = Arc::clone(&session);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        ctrlc_session.emergency_stop("operator Ctrl-C");
        println!("{}", "  ✓ Stop sent, alert published.".green());
    }) {
        warn!(error = %e, "Ctrl-C handler not installed; use /stop before exiting");
    }

    println!(
        "  Robot {} – type {} to connect, {} for all commands.\n",
        config::mask_address(&session.config().peer_address).bold(),
        "/connect".bold().cyan(),
        "/help".bold().cyan()
    );

    repl::run(&session);

    session.close();
    drop(session);
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));
}

fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {e}", "Error saving config".red()),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"  _________  / /_  ____  / /_"#.bold().cyan());
    println!("{}", r#" / ___/ __ \/ __ \/ __ \/ __/"#.bold().cyan());
    println!("{}", r#"/ /__/ /_/ / /_/ / /_/ / /_  "#.bold().cyan());
    println!("{}", r#"\___/\____/_.___/\____/\__/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "cobot".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Camera-driven robot companion");
    println!();
}
