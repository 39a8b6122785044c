//! # ESP Device Simulator
//!
//! Simula o ESP: conecta na bridge e envia pacotes de telemetria JSON para
//! testar sem hardware. Obedece os frames START/STOP da bridge.
//!
//! ## Uso
//! ```bash
//! esp_device_sim               # espera START da bridge
//! esp_device_sim --autostart   # envia desde o início
//! ```

mod walk;

use bridge_core::bridge::connect;
use bridge_core::config::AppConfig;
use bridge_core::protocol::{Decoded, FrameAssembler, MessageId};
use bridge_core::BridgeError;
use std::io::{ErrorKind, Read, Write};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use walk::{TemperatureWalk, running_packet};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config = AppConfig::load(&AppConfig::default_path());
    let mut device = config.device.clone();
    if std::env::args().any(|a| a == "--autostart") {
        device.autostart = true;
    }

    let addr = device.bridge_addr();
    info!("Conectando na bridge em {addr}…");

    let mut stream = match connect(&addr, CONNECT_TIMEOUT) {
        Ok(stream) => stream,
        Err(e @ BridgeError::ConnectionRefused { .. }) => {
            error!("{e}. A bridge está rodando?");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        error!("Falha ao configurar timeout: {e}");
        return ExitCode::FAILURE;
    }

    let interval = Duration::from_secs_f64(device.interval_secs.max(0.05));
    let mut walk = TemperatureWalk::new(&device);
    let mut asm = FrameAssembler::default();
    let mut streaming = device.autostart;
    let mut next_send = Instant::now();
    let mut buf = [0u8; 256];

    info!(
        "Conectado – {} a cada {:.1}s",
        if streaming { "enviando" } else { "aguardando START" },
        device.interval_secs
    );

    loop {
        // ── Frames da bridge ──
        match stream.read(&mut buf) {
            Ok(0) => {
                info!("Bridge fechou a conexão");
                return ExitCode::SUCCESS;
            }
            Ok(n) => asm.push(&buf[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                error!("Erro de leitura: {e}");
                return ExitCode::FAILURE;
            }
        }

        while let Some(decoded) = asm.next_frame() {
            match decoded {
                Decoded::Frame(frame) => match frame.message_id {
                    MessageId::Start => {
                        if !streaming {
                            info!("START recebido – iniciando envio");
                            next_send = Instant::now();
                        }
                        streaming = true;
                    }
                    MessageId::Stop => {
                        if streaming {
                            info!("STOP recebido – envio pausado");
                        }
                        streaming = false;
                    }
                    other => debug!("Frame {other} ignorado"),
                },
                Decoded::Malformed(e) => warn!("Frame malformado da bridge: {e}"),
                Decoded::NeedsMoreData => break,
            }
        }

        // ── Telemetria ──
        if streaming && Instant::now() >= next_send {
            let temp = walk.step();
            match running_packet(temp) {
                Ok(packet) => {
                    if let Err(e) = stream.write_all(&packet) {
                        error!("Erro ao enviar: {e}");
                        return ExitCode::FAILURE;
                    }
                    info!("→ {} bytes | motor {temp:.1}°C", packet.len());
                }
                Err(e) => error!("Erro ao montar pacote: {e}"),
            }
            next_send += interval;
        }
    }
}
