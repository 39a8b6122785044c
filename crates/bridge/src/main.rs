//! # ESP Bridge
//!
//! Bridge TCP entre o ESP e o operador. Escuta uma única conexão do ESP,
//! traduz os frames de telemetria em eventos e repassa START/STOP do
//! operador para o ESP.
//!
//! ## Console
//! - `start` / `s`: pede início do streaming
//! - `stop` / `t`: pede fim do streaming
//! - `status`: último pacote recebido
//! - `quit` / Ctrl-C: encerra

mod console;
mod monitor;

use bridge_core::config::AppConfig;
use bridge_core::spawn_bridge_thread;
use console::{ConsoleEvent, HELP};
use monitor::TelemetryMonitor;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for problem in config.validate() {
        warn!("Config: {problem}");
    }

    // ── Bridge ──
    let handle = match spawn_bridge_thread(config.bridge.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = handle.shutdown_signal();
    if let Err(e) = ctrlc::set_handler(move || shutdown.trigger()) {
        warn!("Falha ao instalar handler de Ctrl-C: {e}");
    }

    let console_rx = match console::spawn_console_thread(handle.commands()) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Falha ao criar thread do console: {e}");
            let _ = handle.shutdown();
            return ExitCode::FAILURE;
        }
    };

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚡ ESP BRIDGE – ATIVA");
    println!("══════════════════════════════════════════════");
    println!("  Escutando: {}", handle.local_addr());
    println!("  Polling:   {}ms", config.consumer.poll_interval_ms);
    println!("  {HELP}");
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop do consumidor ──
    let mut monitor = TelemetryMonitor::new(
        config.consumer.alerts.clone(),
        config.bridge.stale_after(),
    );
    let poll_interval = config.consumer.poll_interval();
    let shutdown = handle.shutdown_signal();

    loop {
        let now = Instant::now();
        monitor.poll(handle.telemetry(), now);

        let mut quit = false;
        for event in console_rx.try_iter() {
            match event {
                ConsoleEvent::Status => info!("{}", monitor.status_line(now)),
                ConsoleEvent::Quit => quit = true,
            }
        }

        if quit || shutdown.is_triggered() || handle.is_finished() {
            break;
        }
        std::thread::sleep(poll_interval);
    }

    // Eventos que chegaram entre o último poll e o fim da sessão
    monitor.poll(handle.telemetry(), Instant::now());

    match handle.shutdown() {
        Ok(stats) => {
            info!("Bridge encerrada | {stats} | {} eventos consumidos", monitor.received());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Bridge encerrada com erro: {e}");
            ExitCode::FAILURE
        }
    }
}
