//! Testes de ponta a ponta: o teste faz o papel do ESP num socket loopback.

use bridge_core::protocol::{FrameAssembler, encode_control};
use bridge_core::{
    BridgeConfig, BridgeError, Decoded, MessageId, TelemetryEvent, TelemetryOutbox, encode_frame,
    spawn_bridge_thread,
};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(3);

fn fast_config() -> BridgeConfig {
    BridgeConfig {
        listen_ip: "127.0.0.1".into(),
        port: 0,
        read_timeout_ms: 20,
        tick_interval_ms: 5,
        control_pause_ms: 5,
        ..BridgeConfig::default()
    }
}

fn connect_device(addr: std::net::SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    stream
}

/// Lê do socket até aparecer um frame com o id esperado.
fn wait_for_frame(stream: &mut TcpStream, asm: &mut FrameAssembler, id: MessageId) {
    let start = Instant::now();
    let mut buf = [0u8; 256];
    while start.elapsed() < DEADLINE {
        while let Some(decoded) = asm.next_frame() {
            if let Decoded::Frame(frame) = decoded {
                if frame.message_id == id {
                    return;
                }
            }
        }
        match stream.read(&mut buf) {
            Ok(0) => panic!("bridge fechou a conexão"),
            Ok(n) => asm.push(&buf[..n]),
            Err(_) => {}
        }
    }
    panic!("frame {id} não chegou");
}

fn wait_for_event(outbox: &TelemetryOutbox) -> TelemetryEvent {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if let Some(event) = outbox.try_next() {
            return event;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("nenhuma telemetria publicada");
}

fn telemetry_frame(json: &str) -> Vec<u8> {
    encode_frame(MessageId::Telemetry, json.as_bytes()).unwrap()
}

#[test]
fn start_stream_stop_over_tcp() {
    let handle = spawn_bridge_thread(fast_config()).unwrap();
    let mut device = connect_device(handle.local_addr());
    let mut asm = FrameAssembler::default();

    handle.commands().start().unwrap();
    wait_for_frame(&mut device, &mut asm, MessageId::Start);

    device
        .write_all(&telemetry_frame(
            r#"{"motor_temperature": 42.3, "state": "running"}"#,
        ))
        .unwrap();
    let event = wait_for_event(handle.telemetry());
    assert_eq!(event.motor_temperature(), Some(42.3));
    assert!(event.is_nominal());

    handle.commands().stop().unwrap();
    wait_for_frame(&mut device, &mut asm, MessageId::Stop);

    let stats = handle.shutdown().unwrap();
    assert_eq!(stats.telemetry_published, 1);
    assert!(stats.control_frames_sent >= 2);
}

#[test]
fn bad_frames_do_not_stop_the_bridge() {
    let handle = spawn_bridge_thread(fast_config()).unwrap();
    let mut device = connect_device(handle.local_addr());

    device.write_all(b"\x02\x35not json at all\x03").unwrap();
    device.write_all(b"ruido\x02\x35").unwrap();
    device.write_all(b"{\"motor_temperature\": 1").unwrap();
    device.write_all(b"0}\x03").unwrap();

    let event = wait_for_event(handle.telemetry());
    assert_eq!(event.motor_temperature(), Some(10.0));

    let stats = handle.shutdown().unwrap();
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(stats.malformed_frames, 1);
    assert_eq!(stats.telemetry_published, 1);
}

#[test]
fn device_disconnect_ends_the_session() {
    let handle = spawn_bridge_thread(fast_config()).unwrap();
    let device = connect_device(handle.local_addr());
    drop(device);

    let start = Instant::now();
    while !handle.is_finished() && start.elapsed() < DEADLINE {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.is_finished());
    assert!(matches!(handle.join(), Err(BridgeError::ConnectionLost(_))));
}

#[test]
fn shutdown_before_device_connects() {
    let handle = spawn_bridge_thread(fast_config()).unwrap();
    let stats = handle.shutdown().unwrap();
    assert_eq!(stats.frames_received, 0);
}

#[test]
fn many_producers_reach_the_bridge() {
    let handle = spawn_bridge_thread(fast_config()).unwrap();
    let mut device = connect_device(handle.local_addr());
    let mut asm = FrameAssembler::default();

    // ESP já enviando (sem START nosso) antes da rajada
    device
        .write_all(&telemetry_frame(r#"{"state": "running"}"#))
        .unwrap();
    wait_for_event(handle.telemetry());

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let commands = handle.commands();
            std::thread::spawn(move || {
                for i in 0..25 {
                    if (p + i) % 2 == 0 {
                        commands.start().unwrap();
                    } else {
                        commands.stop().unwrap();
                    }
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    // O último intent da rajada decide; um Stop explícito fecha o teste
    handle.commands().stop().unwrap();
    wait_for_frame(&mut device, &mut asm, MessageId::Stop);

    handle.shutdown().unwrap();
}

#[test]
fn control_frame_bytes_on_the_wire() {
    let handle = spawn_bridge_thread(fast_config()).unwrap();
    let mut device = connect_device(handle.local_addr());

    handle.commands().start().unwrap();
    let mut first = [0u8; 3];
    device
        .set_read_timeout(Some(DEADLINE))
        .unwrap();
    device.read_exact(&mut first).unwrap();
    assert_eq!(first, encode_control(MessageId::Start));
    assert_eq!(first, [0x02, 0x32, 0x03]);

    handle.shutdown().unwrap();
}
