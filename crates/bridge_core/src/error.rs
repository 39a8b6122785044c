//! Erros de conexão da bridge.
//!
//! Só estes encerram uma sessão. Falhas por frame ([`ProtocolError`],
//! [`DecodeError`]) são logadas e o loop segue.
//!
//! [`ProtocolError`]: crate::protocol::ProtocolError
//! [`DecodeError`]: crate::telemetry::DecodeError

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Falha ao escutar em {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("Conexão recusada em {addr}: bridge/ESP não está escutando")]
    ConnectionRefused { addr: String },

    #[error("Conexão com o ESP perdida: {0}")]
    ConnectionLost(#[source] io::Error),

    #[error("Erro de I/O: {0}")]
    Io(#[from] io::Error),
}

impl BridgeError {
    /// `true` para erros que indicam queda do link (fim da sessão).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BridgeError::ConnectionLost(_))
    }
}

/// Classifica um erro de leitura/escrita no socket do ESP.
///
/// Retorna `None` quando é só timeout (sem dados agora).
pub(crate) fn classify_io(err: io::Error) -> Option<BridgeError> {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => None,
        _ => Some(BridgeError::ConnectionLost(err)),
    }
}
