//! Random walk da temperatura do motor e montagem dos pacotes.

use bridge_core::protocol::{MessageId, ProtocolError, encode_frame};
use bridge_core::telemetry::{MOTOR_TEMPERATURE, NOMINAL_STATE, STATE, TelemetryEvent};
use bridge_core::DeviceConfig;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Temperatura com passo aleatório ±`max_step`, presa em `[min, max]`.
pub struct TemperatureWalk {
    rng: SmallRng,
    temp: f64,
    min: f64,
    max: f64,
    max_step: f64,
}

impl TemperatureWalk {
    /// Semente 0 usa entropia; qualquer outra é reprodutível.
    pub fn new(config: &DeviceConfig) -> Self {
        let rng = if config.seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(config.seed)
        };
        let (min, max) = (config.min_temp, config.max_temp.max(config.min_temp));
        Self {
            rng,
            temp: config.initial_temp.clamp(min, max),
            min,
            max,
            max_step: config.max_step.abs(),
        }
    }

    pub fn current(&self) -> f64 {
        self.temp
    }

    /// Dá um passo e retorna a nova temperatura.
    pub fn step(&mut self) -> f64 {
        if self.max_step > 0.0 {
            self.temp += self.rng.gen_range(-self.max_step..=self.max_step);
        }
        self.temp = self.temp.clamp(self.min, self.max);
        self.temp
    }
}

/// Monta `STX 0x35 {json} ETX` com a temperatura arredondada em 1 casa.
pub fn make_packet(temperature: f64, state: &str) -> Result<Vec<u8>, ProtocolError> {
    let event = TelemetryEvent::new()
        .with_field(MOTOR_TEMPERATURE, (temperature * 10.0).round() / 10.0)
        .with_field(STATE, state);
    encode_frame(MessageId::Telemetry, event.to_json().as_bytes())
}

/// Pacote com o estado nominal.
pub fn running_packet(temperature: f64) -> Result<Vec<u8>, ProtocolError> {
    make_packet(temperature, NOMINAL_STATE)
}
