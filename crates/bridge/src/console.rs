//! Thread do console do operador: lê verbos do stdin.
//!
//! `start`/`stop` vão direto para o inbox da bridge; `status` e `quit` voltam
//! para a thread principal via channel.

use bridge_core::CommandSender;
use bridge_core::control::{ControlIntent, UnknownIntent};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::io::BufRead;
use tracing::{info, warn};

/// Comando digitado no console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Intent(ControlIntent),
    Status,
    Help,
    Quit,
}

/// Evento para a thread principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleEvent {
    Status,
    Quit,
}

pub fn parse_command(line: &str) -> Result<ConsoleCommand, UnknownIntent> {
    match line.trim().to_ascii_lowercase().as_str() {
        "status" | "?" => Ok(ConsoleCommand::Status),
        "help" | "h" => Ok(ConsoleCommand::Help),
        "quit" | "exit" | "q" => Ok(ConsoleCommand::Quit),
        other => other.parse().map(ConsoleCommand::Intent),
    }
}

pub const HELP: &str = "Comandos: start (s) | stop (t) | status | help | quit";

/// Inicia a thread do console. Retorna o receiver dos eventos.
pub fn spawn_console_thread(commands: CommandSender) -> std::io::Result<Receiver<ConsoleEvent>> {
    let (tx, rx) = unbounded();

    std::thread::Builder::new()
        .name("operator-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            console_loop(stdin.lock(), &commands, &tx);
        })?;

    Ok(rx)
}

fn console_loop(input: impl BufRead, commands: &CommandSender, tx: &Sender<ConsoleEvent>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(ConsoleCommand::Intent(intent)) => {
                info!("Operador pediu {intent}");
                if commands.submit(intent).is_err() {
                    warn!("Bridge encerrada, comando ignorado");
                    break;
                }
            }
            Ok(ConsoleCommand::Status) => {
                let _ = tx.send(ConsoleEvent::Status);
            }
            Ok(ConsoleCommand::Help) => info!("{HELP}"),
            Ok(ConsoleCommand::Quit) => break,
            Err(e) => warn!("{e}"),
        }
    }

    // EOF no stdin também encerra
    let _ = tx.send(ConsoleEvent::Quit);
}
