//! REPL – the interactive `cobot>` shell.
//!
//! Supported slash-commands:
//!   /help              – show this list
//!   /connect           – connect to the robot and start perception
//!   /disconnect        – stop perception and drop the link
//!   /status [json]     – link, mode and latest decision
//!   /follow, /emotion  – switch perception mode
//!   /stop              – stop perception and the motors
//!   /speed N           – set motor speed (0–100)
//!   /auto on|off       – follow mode changes announced by the robot
//!   /see SCENE         – change what the simulated camera sees
//!   /send OP           – write a raw opcode
//!   /drop              – simulate the robot going out of range
//!   /quit | /exit      – stop and exit

use colored::Colorize;
use cobot_perception::{MirrorConvention, PerceptionMode};
use cobot_types::Command;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::session::{SCENES, Session, scene_for};

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Connect,
    Disconnect,
    Status { json: bool },
    Mode(PerceptionMode),
    Stop,
    Speed(i32),
    Auto(bool),
    See(String),
    Send(Command),
    Drop,
    Quit,
}

/// Parse one input line.  The error is a message for the user.
pub fn parse(line: &str) -> Result<ReplCommand, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".into());
    };
    let arg = words.next();

    let command = match (head, arg) {
        ("/help", _) => ReplCommand::Help,
        ("/connect", _) => ReplCommand::Connect,
        ("/disconnect", _) => ReplCommand::Disconnect,
        ("/status", None) => ReplCommand::Status { json: false },
        ("/status", Some("json")) => ReplCommand::Status { json: true },
        ("/follow", _) => ReplCommand::Mode(PerceptionMode::Follow),
        ("/emotion", _) => ReplCommand::Mode(PerceptionMode::Emotion),
        ("/stop", _) => ReplCommand::Stop,
        ("/speed", Some(n)) => ReplCommand::Speed(
            n.parse()
                .map_err(|_| format!("'{n}' is not a number"))?,
        ),
        ("/speed", None) => return Err("usage: /speed N".into()),
        ("/auto", Some("on")) => ReplCommand::Auto(true),
        ("/auto", Some("off")) => ReplCommand::Auto(false),
        ("/auto", _) => return Err("usage: /auto on|off".into()),
        ("/see", Some(scene)) => ReplCommand::See(scene.to_ascii_lowercase()),
        ("/see", None) => return Err(format!("usage: /see {}", SCENES.join("|"))),
        ("/send", Some(op)) => ReplCommand::Send(
            Command::from_opcode(op).ok_or_else(|| format!("unknown opcode '{op}'"))?,
        ),
        ("/send", None) => return Err("usage: /send OP".into()),
        ("/drop", _) => ReplCommand::Drop,
        ("/quit" | "/exit", _) => ReplCommand::Quit,
        (other, _) => return Err(format!("unknown command '{other}'")),
    };
    Ok(command)
}

/// Run until `/quit`, end of input, or Ctrl-C.
pub fn run(session: &Session) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: {e}", "Terminal error".red());
            return;
        }
    };
    let prompt = format!("{} ", "cobot>".bold().cyan());

    while !session.is_shutting_down() {
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match parse(line) {
                    Ok(ReplCommand::Quit) => {
                        println!("{}", "Goodbye.".green());
                        break;
                    }
                    Ok(command) => execute(session, command),
                    Err(message) => println!(
                        "{} {}. Type {} for available commands.",
                        "Error:".red(),
                        message,
                        "/help".bold()
                    ),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("{}", "⚠  Ctrl-C – stopping the robot …".yellow().bold());
                session.emergency_stop("operator Ctrl-C");
                break;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: {e}", "Read error".red());
                break;
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Command handlers
// ────────────────────────────────────────────────────────────────────────────

fn execute(session: &Session, command: ReplCommand) {
    match command {
        ReplCommand::Help => cmd_help(),
        ReplCommand::Connect => match session.connect() {
            Ok(()) => println!("{} connected", "✓".green().bold()),
            Err(e) => println!("{}: {e}", "Connect failed".red()),
        },
        ReplCommand::Disconnect => {
            session.disconnect();
            println!("  disconnected");
        }
        ReplCommand::Status { json } => cmd_status(session, json),
        ReplCommand::Mode(mode) => match session.switch(mode) {
            Ok(()) => println!("{} {} mode", "✓".green().bold(), mode.to_string().bold()),
            Err(e) => println!("{}: {e}", "Could not start perception".red()),
        },
        ReplCommand::Stop => report_send("SS", session.stop()),
        ReplCommand::Speed(percent) => {
            let command = Command::speed(percent);
            report_send(&command.to_string(), session.send(command));
        }
        ReplCommand::Auto(enabled) => {
            session.set_auto_switch(enabled);
            println!("  auto-switch {}", if enabled { "on".green() } else { "off".yellow() });
        }
        ReplCommand::See(name) => {
            let mirror = MirrorConvention::parse(&session.config().mirror).unwrap_or_default();
            match scene_for(&name, mirror) {
                Some(observation) => {
                    session.see(observation);
                    println!("  camera now sees: {}", name.bold());
                }
                None => println!("{} '{}' (try {})", "Unknown scene".red(), name.yellow(), SCENES.join(", ")),
            }
        }
        ReplCommand::Send(command) => report_send(&command.to_string(), session.send(command)),
        ReplCommand::Drop => {
            session.drop_link();
            println!("  {}", "link dropped by peripheral".yellow());
        }
        ReplCommand::Quit => {}
    }
}

fn cmd_help() {
    println!();
    println!("{}", "cobot Commands".bold().underline());
    println!("  {}        – connect and start perception", "/connect".bold().cyan());
    println!("  {}     – stop perception and disconnect", "/disconnect".bold().cyan());
    println!("  {} – link, mode and latest decision", "/status [json]".bold().cyan());
    println!("  {}  – switch perception mode", "/follow /emotion".bold().cyan());
    println!("  {}           – stop perception and the motors", "/stop".bold().cyan());
    println!("  {}        – motor speed, 0–100", "/speed N".bold().cyan());
    println!("  {}   – follow robot-announced modes", "/auto on|off".bold().cyan());
    println!("  {}     – {}", "/see SCENE".bold().cyan(), SCENES.join(" ").dimmed());
    println!("  {}        – raw opcode, e.g. CB", "/send OP".bold().cyan());
    println!("  {}           – simulate losing the robot", "/drop".bold().cyan());
    println!("  {}    – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_status(session: &Session, json: bool) {
    let status = session.status();
    if json {
        println!("{}", status.to_json());
        return;
    }
    let link = if status.link == "connected" {
        status.link.green()
    } else {
        status.link.yellow()
    };
    println!("{}", "Status".bold().underline());
    println!("  Robot          : {} ({})", status.peer.bold(), link);
    println!(
        "  Perception     : {}",
        status.mode.as_deref().unwrap_or("stopped").bold()
    );
    println!("  Auto-switch    : {}", status.auto_switch);
    println!(
        "  Latest state   : {}",
        status.state.as_deref().unwrap_or("–")
    );
    println!("  Dropped frames : {}", status.dropped_frames);
    println!(
        "  Last received  : {}",
        status.last_received.as_deref().unwrap_or("–").trim_end()
    );
    println!("  Writes         : {}", status.writes);
}

fn report_send(what: &str, delivered: bool) {
    if delivered {
        println!("  {} {}", "sent".green(), what.bold());
    } else {
        println!("  {} {} (not connected?)", "not sent".red(), what.bold());
    }
}
