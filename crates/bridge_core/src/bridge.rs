//! Thread da bridge: dona do socket do ESP e do [`BridgeState`].
//!
//! Ciclo de vida: `Listening → Connected → Closed`. Aceita uma única
//! conexão e, a cada tick:
//!
//! 1. drena o inbox de comandos;
//! 2. avalia a máquina de controle e talvez envia START/STOP;
//! 3. lê do socket com timeout curto;
//! 4. decodifica frames completos e publica telemetria no outbox;
//! 5. dorme um intervalo fixo.
//!
//! Frames malformados e JSON inválido são logados e ignorados. Só a queda
//! da conexão (ou o [`ShutdownSignal`]) encerra o loop.

use crate::channels::{
    CommandInbox, CommandSender, TelemetryOutbox, TelemetryPublisher, command_channel,
    telemetry_channel,
};
use crate::config::BridgeConfig;
use crate::control::BridgeState;
use crate::error::{BridgeError, classify_io};
use crate::protocol::{Decoded, Frame, FrameAssembler, MessageId, encode_control};
use crate::telemetry::decode_telemetry;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sinal de encerramento observado no topo de cada tick.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fase da bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    Listening,
    Connected,
    Closed,
}

impl fmt::Display for BridgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgePhase::Listening => f.write_str("Listening"),
            BridgePhase::Connected => f.write_str("Connected"),
            BridgePhase::Closed => f.write_str("Closed"),
        }
    }
}

/// Contadores da sessão.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub bytes_received: u64,
    pub frames_received: u64,
    pub telemetry_published: u64,
    /// Telemetria válida descartada por falta de consumidor.
    pub telemetry_dropped: u64,
    pub malformed_frames: u64,
    pub decode_errors: u64,
    pub ignored_frames: u64,
    pub control_frames_sent: u64,
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes | {} frames | {} telemetria | {} sem consumidor | {} malformados | {} JSON inválido | {} ignorados | {} controle",
            self.bytes_received,
            self.frames_received,
            self.telemetry_published,
            self.telemetry_dropped,
            self.malformed_frames,
            self.decode_errors,
            self.ignored_frames,
            self.control_frames_sent
        )
    }
}

/// Como a sessão terminou sem erro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
}

/// O que aconteceu num tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Frame de controle enviado neste tick
    pub sent: Option<MessageId>,
    /// Bytes lidos do socket
    pub bytes_read: usize,
    /// Eventos publicados no outbox
    pub published: usize,
}

/// Loop da bridge sobre qualquer stream `Read + Write` com timeout de leitura.
pub struct BridgeLoop {
    config: BridgeConfig,
    inbox: CommandInbox,
    publisher: TelemetryPublisher,
    shutdown: ShutdownSignal,
    state: BridgeState,
    assembler: FrameAssembler,
    read_buf: Vec<u8>,
    stats: BridgeStats,
}

impl BridgeLoop {
    pub fn new(
        config: BridgeConfig,
        inbox: CommandInbox,
        publisher: TelemetryPublisher,
        shutdown: ShutdownSignal,
    ) -> Self {
        let state = BridgeState::new(config.stale_after());
        let assembler = FrameAssembler::new(config.max_frame_size);
        let read_buf = vec![0u8; config.read_buffer_size.max(1)];
        Self {
            config,
            inbox,
            publisher,
            shutdown,
            state,
            assembler,
            read_buf,
            stats: BridgeStats::default(),
        }
    }

    pub fn state(&self) -> &BridgeState {
        &self.state
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    /// Roda até o shutdown ou a queda da conexão.
    pub fn run<S: Read + Write>(&mut self, stream: &mut S) -> Result<SessionEnd, BridgeError> {
        loop {
            if self.shutdown.is_triggered() {
                info!("Shutdown solicitado, encerrando sessão");
                return Ok(SessionEnd::Shutdown);
            }

            let outcome = self.tick(stream)?;
            if outcome.sent.is_some() {
                // Não inundar o ESP enquanto o intent segue travado
                std::thread::sleep(self.config.control_pause());
            }
            std::thread::sleep(self.config.tick_interval());
        }
    }

    /// Um tick do loop (sem as pausas).
    pub fn tick<S: Read + Write>(&mut self, stream: &mut S) -> Result<TickOutcome, BridgeError> {
        let mut outcome = TickOutcome::default();

        for intent in self.inbox.drain() {
            info!("Comando recebido: {intent}");
            self.state.apply_intent(intent);
        }

        if let Some(id) = self.state.tick(Instant::now()) {
            info!("Enviando frame {id} para o ESP");
            stream
                .write_all(&encode_control(id))
                .and_then(|()| stream.flush())
                .map_err(BridgeError::ConnectionLost)?;
            self.stats.control_frames_sent += 1;
            outcome.sent = Some(id);
        }

        match stream.read(&mut self.read_buf) {
            Ok(0) => {
                return Err(BridgeError::ConnectionLost(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "ESP fechou a conexão",
                )));
            }
            Ok(n) => {
                outcome.bytes_read = n;
                self.stats.bytes_received += n as u64;
                self.assembler.push(&self.read_buf[..n]);
            }
            Err(e) => {
                if let Some(err) = classify_io(e) {
                    return Err(err);
                }
            }
        }

        while let Some(decoded) = self.assembler.next_frame() {
            match decoded {
                Decoded::Frame(frame) => {
                    self.stats.frames_received += 1;
                    if self.handle_frame(frame) {
                        outcome.published += 1;
                    }
                }
                Decoded::Malformed(e) => {
                    self.stats.malformed_frames += 1;
                    warn!("Frame malformado descartado: {e}");
                }
                Decoded::NeedsMoreData => break,
            }
        }

        Ok(outcome)
    }

    /// Processa um frame completo. Retorna `true` se publicou telemetria.
    fn handle_frame(&mut self, frame: Frame) -> bool {
        match frame.message_id {
            MessageId::Telemetry => match decode_telemetry(&frame.body) {
                Ok(event) => {
                    self.state.observe_telemetry(Instant::now());
                    debug!("Telemetria: {}", event.to_json());
                    if self.publisher.publish(event) {
                        self.stats.telemetry_published += 1;
                        true
                    } else {
                        self.stats.telemetry_dropped += 1;
                        debug!("Outbox sem consumidor, evento descartado");
                        false
                    }
                }
                Err(e) => {
                    self.stats.decode_errors += 1;
                    warn!("Telemetria descartada: {e}");
                    false
                }
            },
            id if id.is_control() => {
                self.stats.ignored_frames += 1;
                debug!("Frame de controle {id} vindo do ESP ignorado");
                false
            }
            id => {
                self.stats.ignored_frames += 1;
                warn!("Message id desconhecido {id} ({} bytes), ignorado", frame.body.len());
                false
            }
        }
    }
}

/// Handle da thread da bridge para o resto do processo.
pub struct BridgeHandle {
    commands: CommandSender,
    telemetry: TelemetryOutbox,
    shutdown: ShutdownSignal,
    local_addr: SocketAddr,
    join: JoinHandle<Result<BridgeStats, BridgeError>>,
}

impl BridgeHandle {
    /// Novo produtor de comandos (clonável entre threads).
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn telemetry(&self) -> &TelemetryOutbox {
        &self.telemetry
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// `true` quando a thread já terminou (conexão caiu ou shutdown).
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Sinaliza o shutdown e espera a thread.
    pub fn shutdown(self) -> Result<BridgeStats, BridgeError> {
        self.shutdown.trigger();
        self.join()
    }

    /// Espera a thread terminar.
    pub fn join(self) -> Result<BridgeStats, BridgeError> {
        self.join
            .join()
            .map_err(|_| BridgeError::Io(io::Error::other("thread da bridge entrou em pânico")))?
    }
}

/// Escuta o ESP e inicia a thread da bridge.
///
/// O bind acontece antes do spawn, então erros de porta voltam aqui.
pub fn spawn_bridge_thread(config: BridgeConfig) -> Result<BridgeHandle, BridgeError> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).map_err(|source| BridgeError::Bind {
        addr: addr.clone(),
        source,
    })?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let (commands, inbox) = command_channel();
    let (publisher, telemetry) = telemetry_channel();
    let shutdown = ShutdownSignal::new();
    let thread_shutdown = shutdown.clone();

    let join = std::thread::Builder::new()
        .name("esp-bridge".into())
        .spawn(move || bridge_thread(listener, config, inbox, publisher, thread_shutdown))?;

    Ok(BridgeHandle {
        commands,
        telemetry,
        shutdown,
        local_addr,
        join,
    })
}

fn bridge_thread(
    listener: TcpListener,
    config: BridgeConfig,
    inbox: CommandInbox,
    publisher: TelemetryPublisher,
    shutdown: ShutdownSignal,
) -> Result<BridgeStats, BridgeError> {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| config.listen_addr());
    info!("[{}] Bridge escutando o ESP em {local}", BridgePhase::Listening);

    let Some((mut stream, peer)) = accept_once(&listener, &shutdown, config.tick_interval())?
    else {
        info!("[{}] Shutdown antes de o ESP conectar", BridgePhase::Closed);
        return Ok(BridgeStats::default());
    };
    // Uma única conexão por instância
    drop(listener);

    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(config.read_timeout().max(Duration::from_millis(1))))?;
    stream.set_nodelay(true)?;
    info!("[{}] ESP conectado de {peer}", BridgePhase::Connected);

    let mut bridge = BridgeLoop::new(config, inbox, publisher, shutdown);
    let result = bridge.run(&mut stream);
    let stats = bridge.stats().clone();

    match result {
        Ok(SessionEnd::Shutdown) => {
            info!("[{}] Sessão encerrada | {stats}", BridgePhase::Closed);
            Ok(stats)
        }
        Err(e) => {
            error!("[{}] {e} | {stats}", BridgePhase::Closed);
            Err(e)
        }
    }
}

/// Aceita uma conexão, checando o shutdown entre tentativas.
fn accept_once(
    listener: &TcpListener,
    shutdown: &ShutdownSignal,
    poll: Duration,
) -> Result<Option<(TcpStream, SocketAddr)>, BridgeError> {
    loop {
        if shutdown.is_triggered() {
            return Ok(None);
        }
        match listener.accept() {
            Ok(conn) => return Ok(Some(conn)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(poll.max(Duration::from_millis(1)));
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Erro no accept: {e}");
                std::thread::sleep(poll.max(Duration::from_millis(1)));
            }
        }
    }
}

/// Conecta ao endereço da bridge (lado do ESP).
pub fn connect(addr: &str, timeout: Duration) -> Result<TcpStream, BridgeError> {
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
            Err(BridgeError::ConnectionRefused { addr: addr.into() })
        }
        Some(e) => Err(BridgeError::Io(e)),
        None => Err(BridgeError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Endereço sem resolução: {addr}"),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlIntent, ControlState};
    use crate::protocol::encode_frame;
    use std::collections::VecDeque;

    /// Stream em memória: cada leitura devolve um chunk, ou timeout.
    struct ScriptedStream {
        reads: VecDeque<io::Result<Vec<u8>>>,
        written: Vec<u8>,
    }

    impl ScriptedStream {
        fn new() -> Self {
            Self {
                reads: VecDeque::new(),
                written: Vec::new(),
            }
        }

        fn feed(&mut self, chunk: &[u8]) {
            self.reads.push_back(Ok(chunk.to_vec()));
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(chunk)) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_loop() -> (BridgeLoop, CommandSender, TelemetryOutbox) {
        let (commands, inbox) = command_channel();
        let (publisher, outbox) = telemetry_channel();
        let bridge = BridgeLoop::new(
            BridgeConfig::default(),
            inbox,
            publisher,
            ShutdownSignal::new(),
        );
        (bridge, commands, outbox)
    }

    fn telemetry(json: &str) -> Vec<u8> {
        encode_frame(MessageId::Telemetry, json.as_bytes()).unwrap()
    }

    #[test]
    fn start_then_telemetry_then_stop() {
        let (mut bridge, commands, outbox) = test_loop();
        let mut stream = ScriptedStream::new();

        commands.start().unwrap();
        let out = bridge.tick(&mut stream).unwrap();
        assert_eq!(out.sent, Some(MessageId::Start));
        assert_eq!(stream.written, vec![0x02, 0x32, 0x03]);
        assert_eq!(bridge.state().state(), ControlState::AwaitingStart);

        stream.feed(&telemetry(r#"{"motor_temperature": 42.3, "state": "running"}"#));
        let out = bridge.tick(&mut stream).unwrap();
        // START ainda travado neste tick, a telemetria chega depois do envio
        assert_eq!(out.published, 1);
        assert_eq!(bridge.state().state(), ControlState::Streaming);

        let event = outbox.try_next().unwrap();
        assert_eq!(event.motor_temperature(), Some(42.3));
        assert_eq!(event.state(), Some("running"));

        stream.written.clear();
        commands.submit(ControlIntent::Stop).unwrap();
        let out = bridge.tick(&mut stream).unwrap();
        assert_eq!(out.sent, Some(MessageId::Stop));
        assert_eq!(stream.written, vec![0x02, 0x33, 0x03]);

        let out = bridge.tick(&mut stream).unwrap();
        assert_eq!(out.sent, None);
        assert_eq!(bridge.state().state(), ControlState::Idle);
    }

    #[test]
    fn stop_while_idle_sends_nothing() {
        let (mut bridge, commands, _outbox) = test_loop();
        let mut stream = ScriptedStream::new();
        commands.stop().unwrap();
        let out = bridge.tick(&mut stream).unwrap();
        assert_eq!(out.sent, None);
        assert!(stream.written.is_empty());
        assert_eq!(bridge.state().state(), ControlState::Idle);
    }

    #[test]
    fn bad_json_is_dropped_and_loop_continues() {
        let (mut bridge, _commands, outbox) = test_loop();
        let mut stream = ScriptedStream::new();
        stream.feed(b"\x02\x35not json at all\x03");
        stream.feed(b"\x02\x35garbage{\"motor_temperature\": 10}moregarbage\x03");

        let out = bridge.tick(&mut stream).unwrap();
        assert_eq!(out.published, 0);
        assert_eq!(bridge.stats().decode_errors, 1);

        let out = bridge.tick(&mut stream).unwrap();
        assert_eq!(out.published, 1);
        let event = outbox.try_next().unwrap();
        assert_eq!(event.motor_temperature(), Some(10.0));
        assert_eq!(event.len(), 1);
    }

    #[test]
    fn telemetry_without_consumer_is_not_counted_as_published() {
        let (mut bridge, _commands, outbox) = test_loop();
        drop(outbox);
        let mut stream = ScriptedStream::new();
        stream.feed(&telemetry(r#"{"motor_temperature": 20.0}"#));

        let out = bridge.tick(&mut stream).unwrap();
        assert_eq!(out.published, 0);
        let stats = bridge.stats();
        assert_eq!(stats.telemetry_published, 0);
        assert_eq!(stats.telemetry_dropped, 1);
        assert_eq!(stats.frames_received, 1);
    }

    #[test]
    fn malformed_and_unknown_frames_are_counted() {
        let (mut bridge, _commands, outbox) = test_loop();
        let mut stream = ScriptedStream::new();
        let mut chunk = b"lixo".to_vec();
        chunk.extend_from_slice(&[0x02, 0x7E, 0x03]);
        chunk.extend_from_slice(&encode_control(MessageId::Stop));
        stream.feed(&chunk);

        bridge.tick(&mut stream).unwrap();
        let stats = bridge.stats();
        assert_eq!(stats.malformed_frames, 1);
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.ignored_frames, 2);
        assert!(outbox.is_empty());
    }

    #[test]
    fn frame_split_across_reads_is_reassembled() {
        let (mut bridge, _commands, outbox) = test_loop();
        let mut stream = ScriptedStream::new();
        let frame = telemetry(r#"{"motor_temperature": 30.5}"#);
        let (a, b) = frame.split_at(7);
        stream.feed(a);
        stream.feed(b);

        assert_eq!(bridge.tick(&mut stream).unwrap().published, 0);
        assert_eq!(bridge.tick(&mut stream).unwrap().published, 1);
        assert_eq!(outbox.try_next().unwrap().motor_temperature(), Some(30.5));
    }

    #[test]
    fn eof_is_connection_lost() {
        let (mut bridge, _commands, _outbox) = test_loop();
        let mut stream = ScriptedStream::new();
        stream.feed(&[]);
        let err = bridge.tick(&mut stream).unwrap_err();
        assert!(err.is_disconnect());
    }

    #[test]
    fn reset_is_connection_lost() {
        let (mut bridge, _commands, _outbox) = test_loop();
        let mut stream = ScriptedStream::new();
        stream
            .reads
            .push_back(Err(io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(bridge.tick(&mut stream).unwrap_err().is_disconnect());
    }

    #[test]
    fn run_stops_on_shutdown() {
        let (commands, inbox) = command_channel();
        let (publisher, _outbox) = telemetry_channel();
        let shutdown = ShutdownSignal::new();
        let mut bridge = BridgeLoop::new(BridgeConfig::default(), inbox, publisher, shutdown.clone());
        shutdown.trigger();
        commands.start().unwrap();

        let mut stream = ScriptedStream::new();
        assert!(matches!(bridge.run(&mut stream), Ok(SessionEnd::Shutdown)));
        // Shutdown é checado antes do tick: nada foi enviado
        assert!(stream.written.is_empty());
    }
}
