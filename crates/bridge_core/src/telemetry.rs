//! Decodificação do payload JSON dos frames de telemetria.
//!
//! O ESP às vezes emite bytes soltos em volta do JSON. O decoder pega do
//! primeiro `{` até o último `}` e tenta parsear só esse trecho.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Campo com a temperatura do motor (°C).
pub const MOTOR_TEMPERATURE: &str = "motor_temperature";
/// Campo com o estado do ESP (`"running"` é o nominal).
pub const STATE: &str = "state";
/// Estado nominal reportado pelo ESP.
pub const NOMINAL_STATE: &str = "running";

/// Erros de decodificação de telemetria.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Nenhum objeto JSON ({{...}}) no body")]
    NoJsonObject,

    #[error("JSON inválido: {0}")]
    InvalidJson(String),
}

/// Um evento de telemetria: mapa chave → valor vindo do JSON do ESP.
///
/// Cada consumidor recebe a sua própria cópia; nada é compartilhado entre
/// threads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TelemetryEvent {
    fields: BTreeMap<String, Value>,
}

impl TelemetryEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Temperatura do motor (°C), se presente e numérica.
    pub fn motor_temperature(&self) -> Option<f64> {
        self.get(MOTOR_TEMPERATURE).and_then(Value::as_f64)
    }

    /// Estado reportado pelo ESP, se presente.
    pub fn state(&self) -> Option<&str> {
        self.get(STATE).and_then(Value::as_str)
    }

    /// `true` só quando o estado é exatamente `"running"`.
    pub fn is_nominal(&self) -> bool {
        self.state() == Some(NOMINAL_STATE)
    }

    /// Serializa de volta para JSON compacto (body de frame).
    pub fn to_json(&self) -> String {
        // Map<String, Value> nunca falha ao serializar
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".into())
    }
}

impl From<Map<String, Value>> for TelemetryEvent {
    fn from(map: Map<String, Value>) -> Self {
        Self {
            fields: map.into_iter().collect(),
        }
    }
}

/// Decodifica o body de um frame de telemetria.
///
/// Bytes UTF-8 inválidos viram U+FFFD em vez de falhar. Só objetos JSON são
/// aceitos; arrays ou escalares entre chaves dão [`DecodeError::InvalidJson`].
pub fn decode_telemetry(body: &[u8]) -> Result<TelemetryEvent, DecodeError> {
    let text = String::from_utf8_lossy(body);

    let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
        return Err(DecodeError::NoJsonObject);
    };
    if end < start {
        return Err(DecodeError::NoJsonObject);
    }

    let map: Map<String, Value> = serde_json::from_str(&text[start..=end])
        .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    Ok(TelemetryEvent::from(map))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_clean_payload() {
        let event =
            decode_telemetry(br#"{"motor_temperature": 42.3, "state": "running"}"#).unwrap();
        assert_eq!(event.motor_temperature(), Some(42.3));
        assert_eq!(event.state(), Some("running"));
        assert!(event.is_nominal());
        assert_eq!(event.len(), 2);
    }

    #[test]
    fn tolerates_garbage_around_json() {
        let event = decode_telemetry(br#"garbage{"motor_temperature": 10}moregarbage"#).unwrap();
        assert_eq!(
            event,
            TelemetryEvent::new().with_field(MOTOR_TEMPERATURE, 10)
        );
        assert_eq!(event.motor_temperature(), Some(10.0));
        assert!(!event.is_nominal());
    }

    #[test]
    fn tolerates_invalid_utf8_outside_json() {
        let mut body = vec![0xFF, 0xFE];
        body.extend_from_slice(br#"{"state": "overheat"}"#);
        body.push(0xC0);
        let event = decode_telemetry(&body).unwrap();
        assert_eq!(event.state(), Some("overheat"));
        assert!(!event.is_nominal());
    }

    #[test]
    fn rejects_text_without_json() {
        assert_eq!(decode_telemetry(b"not json at all"), Err(DecodeError::NoJsonObject));
        assert_eq!(decode_telemetry(b""), Err(DecodeError::NoJsonObject));
        assert_eq!(decode_telemetry(b"}{"), Err(DecodeError::NoJsonObject));
    }

    #[test]
    fn rejects_broken_json() {
        assert!(matches!(
            decode_telemetry(br#"{"motor_temperature": }"#),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn decoding_is_idempotent() {
        let body = br#"xx{"motor_temperature": 33.1, "state": "idle"}yy"#;
        assert_eq!(decode_telemetry(body), decode_telemetry(body));
    }

    #[test]
    fn json_roundtrip_through_event() {
        let event = TelemetryEvent::new()
            .with_field(MOTOR_TEMPERATURE, 25.5)
            .with_field(STATE, NOMINAL_STATE);
        let decoded = decode_telemetry(event.to_json().as_bytes()).unwrap();
        assert_eq!(decoded, event);
    }
}
