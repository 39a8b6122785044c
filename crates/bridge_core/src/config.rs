//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável, com uma seção por processo:
//! `[bridge]`, `[consumer]` e `[device]`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao ler/gravar o config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro ao ler {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Erro ao parsear {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Erro ao serializar config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro ao gravar {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Configuração da bridge (lado do ESP).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// IP local para escutar o ESP
    pub listen_ip: String,
    /// Porta TCP
    pub port: u16,
    /// Timeout de leitura do socket (ms, menor que 1s)
    pub read_timeout_ms: u64,
    /// Pausa entre ticks do loop (ms)
    pub tick_interval_ms: u64,
    /// Pausa depois de enviar START/STOP (ms)
    pub control_pause_ms: u64,
    /// Tamanho do buffer de leitura
    pub read_buffer_size: usize,
    /// Tamanho máximo de um frame pendente
    pub max_frame_size: usize,
    /// Sem telemetria por esse tempo, o streaming é considerado parado (0 = desativado)
    pub stale_after_secs: f64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_ip: "0.0.0.0".into(),
            port: 12346,
            read_timeout_ms: 500,
            tick_interval_ms: 50,
            control_pause_ms: 100,
            read_buffer_size: 1024,
            max_frame_size: 4096,
            stale_after_secs: 5.0,
        }
    }
}

impl BridgeConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_ip, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn control_pause(&self) -> Duration {
        Duration::from_millis(self.control_pause_ms)
    }

    pub fn stale_after(&self) -> Option<Duration> {
        (self.stale_after_secs > 0.0).then(|| Duration::from_secs_f64(self.stale_after_secs))
    }
}

/// Thresholds de alerta da telemetria do motor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub motor_temp_warning: f64,
    pub motor_temp_critical: f64,
    /// Qualquer `state` diferente deste gera alerta
    pub nominal_state: String,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            motor_temp_warning: 40.0,
            motor_temp_critical: 48.0,
            nominal_state: "running".into(),
        }
    }
}

/// Configuração do consumidor (console do operador).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Intervalo de polling do outbox (ms)
    pub poll_interval_ms: u64,
    /// Thresholds de alerta
    pub alerts: AlertThresholds,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            alerts: AlertThresholds::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Configuração do simulador de ESP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Host da bridge
    pub host: String,
    /// Porta TCP da bridge
    pub port: u16,
    /// Intervalo entre pacotes de telemetria (s)
    pub interval_secs: f64,
    pub initial_temp: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    /// Passo máximo do random walk (°C)
    pub max_step: f64,
    /// Envia telemetria sem esperar START
    pub autostart: bool,
    /// Semente do random walk (0 = entropia)
    pub seed: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 12346,
            interval_secs: 1.0,
            initial_temp: 25.0,
            min_temp: 10.0,
            max_temp: 50.0,
            max_step: 0.8,
            autostart: false,
            seed: 0,
        }
    }
}

impl DeviceConfig {
    pub fn bridge_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bridge: BridgeConfig,
    pub consumer: ConsumerConfig,
    pub device: DeviceConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML, caindo no padrão se não der.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match Self::try_load(path) {
                Ok(config) => {
                    info!("Configuração carregada de {}", path.display());
                    return config;
                }
                Err(e) => warn!("{e}"),
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Carrega sem fallback.
    pub fn try_load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let bridge = &self.bridge;

        if bridge.port == 0 {
            errors.push("Porta da bridge não pode ser 0".into());
        }
        if bridge.read_timeout_ms == 0 || bridge.read_timeout_ms >= 1000 {
            errors.push(format!(
                "Timeout de leitura inválido: {}ms (1–999)",
                bridge.read_timeout_ms
            ));
        }
        if bridge.read_buffer_size == 0 {
            errors.push("Buffer de leitura não pode ser 0".into());
        }
        if bridge.max_frame_size < crate::protocol::MIN_FRAME_SIZE {
            errors.push(format!(
                "Tamanho máximo de frame muito pequeno: {}",
                bridge.max_frame_size
            ));
        }
        if bridge.stale_after_secs < 0.0 {
            errors.push("stale_after_secs não pode ser negativo".into());
        }

        let alerts = &self.consumer.alerts;
        if alerts.motor_temp_warning >= alerts.motor_temp_critical {
            errors.push(format!(
                "Threshold de warning ({}) deve ser menor que o crítico ({})",
                alerts.motor_temp_warning, alerts.motor_temp_critical
            ));
        }

        let device = &self.device;
        if device.port == 0 {
            errors.push("Porta do device não pode ser 0".into());
        }
        if device.interval_secs < 0.05 || device.interval_secs > 60.0 {
            errors.push(format!(
                "Intervalo do device inválido: {} (0.05–60.0)",
                device.interval_secs
            ));
        }
        if device.min_temp > device.max_temp {
            errors.push(format!(
                "min_temp ({}) maior que max_temp ({})",
                device.min_temp, device.max_temp
            ));
        }

        errors
    }
}
