//! Protocolo de framing entre a bridge e o ESP.
//!
//! Frames delimitados por marcadores fixos, sem campo de tamanho:
//!
//! ```text
//! ┌──────────┬───────────┬──────────────┬──────────┐
//! │ STX 0x02 │ MsgId (1) │ Body (N)     │ ETX 0x03 │
//! └──────────┴───────────┴──────────────┴──────────┘
//! ```
//!
//! - Frames de controle (START/STOP) não têm body.
//! - Frames de telemetria carregam texto JSON UTF-8 no body.
//!
//! [`encode_frame`] e [`decode_frame`] são puros (sem I/O). O
//! [`FrameAssembler`] acumula bytes entre leituras do socket e corta frames
//! completos, para que um frame partido em duas leituras não se perca.

use std::fmt;

/// Marcador de início de frame (STX).
pub const START_MARKER: u8 = 0x02;

/// Marcador de fim de frame (ETX).
pub const END_MARKER: u8 = 0x03;

/// Tamanho mínimo de um frame válido (STX + MsgId + ETX).
pub const MIN_FRAME_SIZE: usize = 3;

/// Tamanho máximo padrão de um frame pendente no assembler.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Identificador de mensagem (segundo byte do frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// Operador pede início do streaming.
    Start,
    /// Operador pede fim do streaming.
    Stop,
    /// Payload JSON de telemetria vindo do ESP.
    Telemetry,
    /// Qualquer outro id: aceito no framing, ignorado na decodificação.
    Unknown(u8),
}

impl MessageId {
    pub const START: u8 = 0x32;
    pub const STOP: u8 = 0x33;
    pub const TELEMETRY: u8 = 0x35;

    pub fn as_byte(self) -> u8 {
        match self {
            MessageId::Start => Self::START,
            MessageId::Stop => Self::STOP,
            MessageId::Telemetry => Self::TELEMETRY,
            MessageId::Unknown(b) => b,
        }
    }

    /// `true` para START/STOP.
    pub fn is_control(self) -> bool {
        matches!(self, MessageId::Start | MessageId::Stop)
    }

    /// `true` para os ids que o protocolo define.
    pub fn is_known(self) -> bool {
        !matches!(self, MessageId::Unknown(_))
    }

    /// STX/ETX como id tornariam o frame ambíguo no fio.
    pub fn is_marker(self) -> bool {
        matches!(self.as_byte(), START_MARKER | END_MARKER)
    }
}

impl From<u8> for MessageId {
    fn from(byte: u8) -> Self {
        match byte {
            Self::START => MessageId::Start,
            Self::STOP => MessageId::Stop,
            Self::TELEMETRY => MessageId::Telemetry,
            other => MessageId::Unknown(other),
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Start => write!(f, "START(0x{:02X})", Self::START),
            MessageId::Stop => write!(f, "STOP(0x{:02X})", Self::STOP),
            MessageId::Telemetry => write!(f, "TELEMETRY(0x{:02X})", Self::TELEMETRY),
            MessageId::Unknown(b) => write!(f, "UNKNOWN(0x{b:02X})"),
        }
    }
}

/// Um frame decodificado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_id: MessageId,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(message_id: MessageId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id,
            body: body.into(),
        }
    }

    /// Frame de controle (sem body).
    pub fn control(message_id: MessageId) -> Self {
        Self::new(message_id, Vec::new())
    }

    /// Tamanho do frame no fio.
    pub fn wire_size(&self) -> usize {
        MIN_FRAME_SIZE + self.body.len()
    }
}

/// Erros do protocolo.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Body contém ETX (0x{END_MARKER:02X}) na posição {position}")]
    EndMarkerInBody { position: usize },

    #[error("Frame não começa com STX: primeiro byte 0x{0:02X}")]
    MissingStartMarker(u8),

    #[error("Frame não termina com ETX: último byte 0x{0:02X}")]
    MissingEndMarker(u8),

    #[error("Frame sem message id")]
    MissingMessageId,

    #[error("Message id 0x{0:02X} é um marcador de frame")]
    MarkerAsMessageId(u8),

    #[error("Frame muito grande ({size} bytes, máximo {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Resultado de [`decode_frame`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Frame),
    NeedsMoreData,
    Malformed(ProtocolError),
}

/// Codifica um frame: `STX ++ id ++ body ++ ETX`.
///
/// Rejeita bodies que contenham ETX, já que o receptor cortaria o frame ali,
/// e ids iguais a STX/ETX. JSON válido nunca contém um 0x03 cru, então isso
/// só acontece por erro de programação.
pub fn encode_frame(message_id: MessageId, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if message_id.is_marker() {
        return Err(ProtocolError::MarkerAsMessageId(message_id.as_byte()));
    }
    if let Some(position) = body.iter().position(|&b| b == END_MARKER) {
        return Err(ProtocolError::EndMarkerInBody { position });
    }

    let mut frame = Vec::with_capacity(MIN_FRAME_SIZE + body.len());
    frame.push(START_MARKER);
    frame.push(message_id.as_byte());
    frame.extend_from_slice(body);
    frame.push(END_MARKER);

    Ok(frame)
}

/// Frame de controle pronto para o fio (`STX id ETX`). Só para START/STOP.
pub fn encode_control(message_id: MessageId) -> [u8; MIN_FRAME_SIZE] {
    debug_assert!(message_id.is_control(), "{message_id} não é controle");
    [START_MARKER, message_id.as_byte(), END_MARKER]
}

/// Decodifica um buffer contendo exatamente um frame.
///
/// Nunca entra em pânico: qualquer buffer que não comece com STX ou não
/// termine com ETX vira [`Decoded::Malformed`]. Buffer vazio é
/// [`Decoded::NeedsMoreData`].
pub fn decode_frame(buffer: &[u8]) -> Decoded {
    let (Some(&first), Some(&last)) = (buffer.first(), buffer.last()) else {
        return Decoded::NeedsMoreData;
    };

    if first != START_MARKER {
        return Decoded::Malformed(ProtocolError::MissingStartMarker(first));
    }
    if last != END_MARKER {
        return Decoded::Malformed(ProtocolError::MissingEndMarker(last));
    }

    let inner = &buffer[1..buffer.len() - 1];
    let Some((&id, body)) = inner.split_first() else {
        return Decoded::Malformed(ProtocolError::MissingMessageId);
    };

    Decoded::Frame(Frame::new(MessageId::from(id), body))
}

/// Acumula bytes do socket e extrai frames completos.
///
/// - Bytes antes de um STX são lixo e geram um `Malformed`.
/// - Um frame termina no primeiro ETX depois do STX.
/// - Um STX dentro do frame seguido de um id conhecido abre um frame novo;
///   o anterior nunca terminou. Seguido de qualquer outro byte, é body.
/// - Um frame pendente maior que `max_frame_size` é descartado.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: Vec<u8>,
    max_frame_size: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameAssembler {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_frame_size.min(DEFAULT_MAX_FRAME_SIZE)),
            max_frame_size: max_frame_size.max(MIN_FRAME_SIZE),
        }
    }

    /// Adiciona bytes recebidos.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes pendentes (frame incompleto).
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Próximo resultado disponível, ou `None` se faltam bytes.
    ///
    /// Retorna `Some(Decoded::Frame)` ou `Some(Decoded::Malformed)`; nunca
    /// `Some(Decoded::NeedsMoreData)`.
    pub fn next_frame(&mut self) -> Option<Decoded> {
        if self.buf.is_empty() {
            return None;
        }

        // Lixo antes do STX: descarta tudo até o próximo STX
        if self.buf[0] != START_MARKER {
            let first = self.buf[0];
            let skip = self
                .buf
                .iter()
                .position(|&b| b == START_MARKER)
                .unwrap_or(self.buf.len());
            self.buf.drain(..skip);
            return Some(Decoded::Malformed(ProtocolError::MissingStartMarker(first)));
        }

        match self.buf.iter().position(|&b| b == END_MARKER) {
            Some(end) => {
                // STX + id conhecido antes do ETX: o frame anterior nunca terminou
                let restart = self.buf[1..end]
                    .windows(2)
                    .rposition(|w| w[0] == START_MARKER && MessageId::from(w[1]).is_known());
                if let Some(restart) = restart {
                    let cut = restart + 1;
                    let last = self.buf[cut - 1];
                    self.buf.drain(..cut);
                    return Some(Decoded::Malformed(ProtocolError::MissingEndMarker(last)));
                }
                let frame: Vec<u8> = self.buf.drain(..=end).collect();
                if frame.len() > self.max_frame_size {
                    return Some(Decoded::Malformed(ProtocolError::FrameTooLarge {
                        size: frame.len(),
                        max: self.max_frame_size,
                    }));
                }
                Some(decode_frame(&frame))
            }
            None if self.buf.len() > self.max_frame_size => {
                let size = self.buf.len();
                self.buf.clear();
                Some(Decoded::Malformed(ProtocolError::FrameTooLarge {
                    size,
                    max: self.max_frame_size,
                }))
            }
            None => None,
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
