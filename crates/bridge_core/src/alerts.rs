//! Sistema de alertas – níveis e avaliação de thresholds.

use crate::config::AlertThresholds;
use crate::telemetry::{MOTOR_TEMPERATURE, STATE, TelemetryEvent};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nível de alerta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
}

/// Um alerta disparado.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub metric: String,
    pub label: String,
    pub detail: String,
    pub level: AlertLevel,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.level, self.label, self.detail)
    }
}

/// Avalia um evento contra os thresholds e retorna alertas.
pub fn evaluate_alerts(event: &TelemetryEvent, thresholds: &AlertThresholds) -> Vec<Alert> {
    let mut alerts = Vec::new();

    // Temperatura do motor
    if let Some(temp) = event.motor_temperature() {
        let level = level_for_value(
            temp,
            thresholds.motor_temp_warning,
            thresholds.motor_temp_critical,
        );
        if level != AlertLevel::Normal {
            alerts.push(Alert {
                metric: MOTOR_TEMPERATURE.into(),
                label: "Motor Temp".into(),
                detail: format!("{temp:.1}°C"),
                level,
            });
        }
    }

    // Estado fora do nominal
    if let Some(state) = event.state() {
        if state != thresholds.nominal_state {
            alerts.push(Alert {
                metric: STATE.into(),
                label: "Estado".into(),
                detail: format!("'{state}' (esperado '{}')", thresholds.nominal_state),
                level: AlertLevel::Warning,
            });
        }
    }

    alerts
}

/// Retorna o [`AlertLevel`] para um valor dado thresholds.
pub fn level_for_value(value: f64, warn: f64, crit: f64) -> AlertLevel {
    if value >= crit {
        AlertLevel::Critical
    } else if value >= warn {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Maior nível entre os alertas (ou `Normal`).
pub fn worst_level(alerts: &[Alert]) -> AlertLevel {
    alerts
        .iter()
        .map(|a| a.level)
        .max()
        .unwrap_or(AlertLevel::Normal)
}
