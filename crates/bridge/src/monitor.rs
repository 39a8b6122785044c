//! Consumidor da telemetria: faz polling do outbox e guarda o mais recente.

use bridge_core::TelemetryEvent;
use bridge_core::alerts::{AlertLevel, evaluate_alerts, worst_level};
use bridge_core::channels::TelemetryOutbox;
use bridge_core::config::AlertThresholds;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Estado do consumidor.
pub struct TelemetryMonitor {
    thresholds: AlertThresholds,
    stale_after: Option<Duration>,
    latest: Option<TelemetryEvent>,
    last_data_time: Option<Instant>,
    received: u64,
    level: AlertLevel,
    was_stale: bool,
}

impl TelemetryMonitor {
    pub fn new(thresholds: AlertThresholds, stale_after: Option<Duration>) -> Self {
        Self {
            thresholds,
            stale_after,
            latest: None,
            last_data_time: None,
            received: 0,
            level: AlertLevel::Normal,
            was_stale: false,
        }
    }

    /// Drena o outbox, fica com o evento mais recente. Retorna quantos chegaram.
    pub fn poll(&mut self, outbox: &TelemetryOutbox, now: Instant) -> usize {
        let events = outbox.poll();
        let count = events.len();

        if let Some(event) = events.into_iter().last() {
            self.received += count as u64;
            self.last_data_time = Some(now);
            if self.was_stale {
                info!("Telemetria voltou");
                self.was_stale = false;
            }
            self.update_alerts(&event);
            info!(
                "Motor {} | estado {}",
                event
                    .motor_temperature()
                    .map(|t| format!("{t:.1}°C"))
                    .unwrap_or_else(|| "--".into()),
                event.state().unwrap_or("--")
            );
            self.latest = Some(event);
        } else if self.is_stale(now) && !self.was_stale {
            warn!("Telemetria parada (último dado é antigo)");
            self.was_stale = true;
        }

        count
    }

    /// Loga alertas só quando o nível muda, para não repetir a cada pacote.
    fn update_alerts(&mut self, event: &TelemetryEvent) {
        let alerts = evaluate_alerts(event, &self.thresholds);
        let level = worst_level(&alerts);
        if level != self.level {
            match level {
                AlertLevel::Critical => alerts.iter().for_each(|a| error!("{a}")),
                AlertLevel::Warning => alerts.iter().for_each(|a| warn!("{a}")),
                AlertLevel::Normal => info!("Telemetria de volta ao normal"),
            }
            self.level = level;
        }
    }

    pub fn latest(&self) -> Option<&TelemetryEvent> {
        self.latest.as_ref()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn level(&self) -> AlertLevel {
        self.level
    }

    /// Último dado mais velho que o limite. Sem nenhum dado ainda não é stale.
    pub fn is_stale(&self, now: Instant) -> bool {
        match (self.stale_after, self.last_data_time) {
            (Some(limit), Some(at)) => now.saturating_duration_since(at) > limit,
            _ => false,
        }
    }

    pub fn status_line(&self, now: Instant) -> String {
        let Some(event) = &self.latest else {
            return "Sem telemetria ainda".into();
        };
        let age = self
            .last_data_time
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or_default();
        format!(
            "{} | {:?} | {} pacotes | há {age:.1}s{}",
            event.to_json(),
            self.level,
            self.received,
            if self.is_stale(now) { " (stale)" } else { "" }
        )
    }
}
