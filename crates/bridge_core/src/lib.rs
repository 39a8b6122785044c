//! # Bridge Core
//!
//! Crate compartilhada da bridge TCP ↔ ESP: protocolo de framing,
//! decodificação da telemetria JSON, máquina de estados START/STOP, canais
//! entre threads e o loop da bridge.
//!
//! ## Módulos
//! - [`protocol`] – Frames `STX id body ETX` e reassembler de stream
//! - [`telemetry`] – Extração do JSON do body em [`TelemetryEvent`]
//! - [`control`] – Intents do operador e [`BridgeState`]
//! - [`channels`] – Command Inbox / Telemetry Outbox
//! - [`bridge`] – Thread dona do socket do ESP
//! - [`config`] – Configuração unificada via TOML
//! - [`alerts`] – Thresholds e níveis de alerta
//! - [`error`] – Erros de conexão

pub mod alerts;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod control;
pub mod error;
pub mod protocol;
pub mod telemetry;

// Re-exports convenientes
pub use bridge::{BridgeHandle, BridgeLoop, BridgeStats, ShutdownSignal, spawn_bridge_thread};
pub use channels::{CommandSender, TelemetryOutbox};
pub use config::{AppConfig, BridgeConfig, ConsumerConfig, DeviceConfig};
pub use control::{BridgeState, ControlIntent, ControlState};
pub use error::BridgeError;
pub use protocol::{Decoded, Frame, MessageId, decode_frame, encode_frame};
pub use telemetry::{TelemetryEvent, decode_telemetry};
