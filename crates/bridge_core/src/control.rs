//! Máquina de estados de controle START/STOP.
//!
//! Todo o estado vive em [`BridgeState`], que pertence à thread da bridge.
//! Nenhuma outra thread lê ou escreve nele; intents chegam pelo inbox.
//!
//! ```text
//!            Start                 telemetria
//!   Idle ───────────► AwaitingStart ──────────► Streaming
//!    ▲                    │ Stop                    │ Stop
//!    │  próximo tick      ▼                         │
//!    └────────────── AwaitingStop ◄─────────────────┘
//! ```
//!
//! Telemetria vista em `Idle` não muda o estado: só é anotada. Um Stop em
//! `Idle` envia STOP apenas se essa telemetria avulsa ainda for recente.

use crate::protocol::MessageId;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pedido do operador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlIntent {
    Start,
    Stop,
}

impl ControlIntent {
    pub fn message_id(self) -> MessageId {
        match self {
            ControlIntent::Start => MessageId::Start,
            ControlIntent::Stop => MessageId::Stop,
        }
    }
}

impl fmt::Display for ControlIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlIntent::Start => f.write_str("start"),
            ControlIntent::Stop => f.write_str("stop"),
        }
    }
}

/// Verbo desconhecido no console.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Comando desconhecido: '{0}' (use start/stop)")]
pub struct UnknownIntent(pub String);

impl FromStr for ControlIntent {
    type Err = UnknownIntent;

    /// Aceita `start`/`stop` e os atalhos de teclado `s`/`t`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" | "s" => Ok(ControlIntent::Start),
            "stop" | "t" => Ok(ControlIntent::Stop),
            other => Err(UnknownIntent(other.to_string())),
        }
    }
}

/// Estado de controle do streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlState {
    /// Sem streaming e sem pedido pendente.
    Idle,
    /// START enviado, aguardando a primeira telemetria.
    AwaitingStart,
    /// ESP enviando telemetria.
    Streaming,
    /// STOP enviado; volta a `Idle` no próximo tick.
    AwaitingStop,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControlState::Idle => "Idle",
            ControlState::AwaitingStart => "AwaitingStart",
            ControlState::Streaming => "Streaming",
            ControlState::AwaitingStop => "AwaitingStop",
        };
        f.write_str(name)
    }
}

/// Estado da bridge, exclusivo da thread do loop.
///
/// `pending_start` e `pending_stop` são mutuamente exclusivos: setar um limpa
/// o outro (o último a escrever vence).
#[derive(Debug, Clone)]
pub struct BridgeState {
    state: ControlState,
    pending_start: bool,
    pending_stop: bool,
    last_telemetry_at: Option<Instant>,
    /// Telemetria recebida em `Idle` sem START pendente.
    unsolicited_at: Option<Instant>,
    stale_after: Option<Duration>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BridgeState {
    /// `stale_after`: sem telemetria por esse tempo, `Streaming` volta a
    /// `Idle`. `None` desativa.
    pub fn new(stale_after: Option<Duration>) -> Self {
        Self {
            state: ControlState::Idle,
            pending_start: false,
            pending_stop: false,
            last_telemetry_at: None,
            unsolicited_at: None,
            stale_after,
        }
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        matches!(
            self.state,
            ControlState::Streaming | ControlState::AwaitingStop
        )
    }

    pub fn pending_start(&self) -> bool {
        self.pending_start
    }

    pub fn pending_stop(&self) -> bool {
        self.pending_stop
    }

    pub fn last_telemetry_at(&self) -> Option<Instant> {
        self.last_telemetry_at
    }

    /// Registra um intent do operador (trava até o próximo tick).
    pub fn apply_intent(&mut self, intent: ControlIntent) {
        match intent {
            ControlIntent::Start => {
                self.pending_start = true;
                self.pending_stop = false;
            }
            ControlIntent::Stop => {
                self.pending_stop = true;
                self.pending_start = false;
            }
        }
        debug!("Intent {intent} registrado (estado {})", self.state);
    }

    /// Avalia as transições uma vez por tick.
    ///
    /// Retorna o frame de controle a enviar, se houver.
    pub fn tick(&mut self, now: Instant) -> Option<MessageId> {
        if self.state == ControlState::AwaitingStop && !self.pending_stop {
            self.transition(ControlState::Idle);
        }

        if self.state == ControlState::Streaming && self.is_stale(now) {
            warn!(
                "Sem telemetria há mais de {:.1}s, considerando streaming parado",
                self.stale_after.unwrap_or_default().as_secs_f64()
            );
            self.transition(ControlState::Idle);
        }

        match self.state {
            ControlState::Idle => {
                if self.pending_start {
                    self.transition(ControlState::AwaitingStart);
                    return Some(MessageId::Start);
                }
                if self.pending_stop {
                    self.pending_stop = false;
                    if self.has_recent_unsolicited(now) {
                        // ESP enviando sem START nosso
                        self.transition(ControlState::AwaitingStop);
                        return Some(MessageId::Stop);
                    }
                    debug!("Stop com a bridge parada: nada a fazer");
                }
                None
            }
            ControlState::AwaitingStart => {
                if self.pending_stop {
                    // O ESP pode já ter agido no START
                    self.pending_stop = false;
                    self.transition(ControlState::AwaitingStop);
                    return Some(MessageId::Stop);
                }
                // START continua travado até chegar telemetria
                self.pending_start.then_some(MessageId::Start)
            }
            ControlState::Streaming => {
                if self.pending_stop {
                    self.pending_stop = false;
                    self.transition(ControlState::AwaitingStop);
                    return Some(MessageId::Stop);
                }
                if self.pending_start {
                    debug!("Start com streaming ativo: nada a fazer");
                    self.pending_start = false;
                }
                None
            }
            ControlState::AwaitingStop => {
                // Stop reafirmado antes de voltar a Idle
                self.pending_stop = false;
                Some(MessageId::Stop)
            }
        }
    }

    /// Chamado a cada frame de telemetria decodificado.
    pub fn observe_telemetry(&mut self, now: Instant) {
        self.last_telemetry_at = Some(now);
        match self.state {
            ControlState::AwaitingStart => {
                self.pending_start = false;
                self.transition(ControlState::Streaming);
            }
            ControlState::Idle => {
                debug!("Telemetria sem START pendente, estado continua Idle");
                self.unsolicited_at = Some(now);
            }
            ControlState::Streaming | ControlState::AwaitingStop => {}
        }
    }

    fn has_recent_unsolicited(&self, now: Instant) -> bool {
        match (self.stale_after, self.unsolicited_at) {
            (Some(limit), Some(at)) => now.saturating_duration_since(at) <= limit,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        match (self.stale_after, self.last_telemetry_at) {
            (Some(limit), Some(at)) => now.saturating_duration_since(at) > limit,
            _ => false,
        }
    }

    fn transition(&mut self, next: ControlState) {
        if self.state != next {
            info!("Controle: {} → {}", self.state, next);
            if self.state == ControlState::Idle {
                self.unsolicited_at = None;
            }
            self.state = next;
        }
    }
}
