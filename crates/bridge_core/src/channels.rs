//! Canais entre a thread da bridge e o resto do processo.
//!
//! - Command Inbox: N produtores (console, UI) → 1 consumidor (bridge).
//! - Telemetry Outbox: 1 produtor (bridge) → consumidor que faz polling.
//!
//! Ambos são `crossbeam_channel::unbounded`, FIFO e não bloqueantes do lado
//! da bridge.

use crate::control::ControlIntent;
use crate::telemetry::TelemetryEvent;
use crossbeam_channel::{Receiver, Sender, unbounded};

/// Erro ao enviar: o outro lado já foi encerrado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Canal desconectado")]
pub struct Disconnected;

/// Lado produtor do inbox de comandos. Clonável para vários produtores.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<ControlIntent>,
}

impl CommandSender {
    pub fn submit(&self, intent: ControlIntent) -> Result<(), Disconnected> {
        self.tx.send(intent).map_err(|_| Disconnected)
    }

    pub fn start(&self) -> Result<(), Disconnected> {
        self.submit(ControlIntent::Start)
    }

    pub fn stop(&self) -> Result<(), Disconnected> {
        self.submit(ControlIntent::Stop)
    }
}

/// Lado consumidor do inbox, usado pela thread da bridge.
#[derive(Debug)]
pub struct CommandInbox {
    rx: Receiver<ControlIntent>,
}

impl CommandInbox {
    /// Drena todos os intents já enfileirados, em ordem de chegada.
    pub fn drain(&self) -> Vec<ControlIntent> {
        self.rx.try_iter().collect()
    }
}

/// Cria o par (produtor, inbox).
pub fn command_channel() -> (CommandSender, CommandInbox) {
    let (tx, rx) = unbounded();
    (CommandSender { tx }, CommandInbox { rx })
}

/// Lado produtor do outbox, usado pela thread da bridge.
#[derive(Debug)]
pub struct TelemetryPublisher {
    tx: Sender<TelemetryEvent>,
}

impl TelemetryPublisher {
    /// Publica um evento. Sem consumidor, o evento é simplesmente perdido.
    pub fn publish(&self, event: TelemetryEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Lado consumidor do outbox. Pensado para um único consumidor que drena.
#[derive(Debug)]
pub struct TelemetryOutbox {
    rx: Receiver<TelemetryEvent>,
}

impl TelemetryOutbox {
    /// Drena todos os eventos disponíveis, em ordem.
    pub fn poll(&self) -> Vec<TelemetryEvent> {
        self.rx.try_iter().collect()
    }

    /// Drena tudo e fica só com o mais recente.
    pub fn latest(&self) -> Option<TelemetryEvent> {
        self.rx.try_iter().last()
    }

    pub fn try_next(&self) -> Option<TelemetryEvent> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Cria o par (publisher, outbox).
pub fn telemetry_channel() -> (TelemetryPublisher, TelemetryOutbox) {
    let (tx, rx) = unbounded();
    (TelemetryPublisher { tx }, TelemetryOutbox { rx })
}
