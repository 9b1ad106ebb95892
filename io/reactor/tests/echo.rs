//! End-to-end echo behaviour: byte fidelity, callback ordering, and
//! high-volume external sends.

use io_reactor::{Config, Connection, DisconnectReason, Handler, Server, ServerHandle};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Accepted,
    Message(Vec<u8>),
    Disconnected(u8),
}

/// Records every callback and echoes inbound chunks back.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Handler for Recorder {
    fn on_accepted(&self, _conn: &Arc<Connection>) {
        self.events.lock().unwrap().push(Event::Accepted);
    }

    fn on_message(&self, conn: &Arc<Connection>, data: &[u8]) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Message(data.to_vec()));
        conn.send(data);
    }

    fn on_disconnected(&self, _conn: &Arc<Connection>, reason: DisconnectReason) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Disconnected(reason.code()));
    }
}

fn start_server(
    config: Config,
    handler: Arc<dyn Handler>,
) -> (ServerHandle, SocketAddr, thread::JoinHandle<()>) {
    let mut server = Server::new(config).unwrap();
    server.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    server.set_handler(handler);
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let join = thread::spawn(move || {
        let _ = server.run();
    });
    (handle, addr, join)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_echo_roundtrip() {
    let recorder = Arc::new(Recorder::default());
    let (handle, addr, join) = start_server(Config::default(), recorder.clone());

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"PING").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    let mut echoed = Vec::new();
    client.read_to_end(&mut echoed).unwrap();
    assert_eq!(echoed, b"PING");

    assert!(wait_until(Duration::from_secs(2), || {
        recorder
            .events()
            .iter()
            .any(|e| matches!(e, Event::Disconnected(_)))
    }));

    let events = recorder.events();
    assert_eq!(events[0], Event::Accepted);
    let received: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            Event::Message(bytes) => Some(bytes.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(received, b"PING");
    match events.last().unwrap() {
        Event::Disconnected(code) => assert!(*code == 1 || *code == 2, "code was {}", code),
        other => panic!("last event should be a disconnect, got {:?}", other),
    }

    handle.stop();
    join.join().unwrap();
}

#[test]
fn test_callbacks_are_ordered_per_connection() {
    let recorder = Arc::new(Recorder::default());
    let (handle, addr, join) = start_server(Config::default(), recorder.clone());

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"one").unwrap();
    thread::sleep(Duration::from_millis(30));
    client.write_all(b"two").unwrap();
    client.shutdown(Shutdown::Write).unwrap();

    let mut echoed = Vec::new();
    client.read_to_end(&mut echoed).unwrap();
    assert_eq!(echoed, b"onetwo");

    assert!(wait_until(Duration::from_secs(2), || {
        recorder
            .events()
            .iter()
            .any(|e| matches!(e, Event::Disconnected(_)))
    }));

    let events = recorder.events();
    let accepted_at = events.iter().position(|e| *e == Event::Accepted).unwrap();
    let disconnected_at = events
        .iter()
        .position(|e| matches!(e, Event::Disconnected(_)))
        .unwrap();
    assert_eq!(accepted_at, 0);
    assert_eq!(disconnected_at, events.len() - 1);
    for event in &events[1..events.len() - 1] {
        assert!(matches!(event, Event::Message(_)));
    }

    handle.stop();
    join.join().unwrap();
}

/// Stores the accepted connection so an external thread can drive sends.
#[derive(Default)]
struct CaptureConn {
    slot: Mutex<Option<Arc<Connection>>>,
}

impl Handler for CaptureConn {
    fn on_accepted(&self, conn: &Arc<Connection>) {
        *self.slot.lock().unwrap() = Some(conn.clone());
    }

    fn on_message(&self, _conn: &Arc<Connection>, _data: &[u8]) {}

    fn on_disconnected(&self, _conn: &Arc<Connection>, _reason: DisconnectReason) {}
}

#[test]
fn test_many_external_sends_arrive_in_full() {
    const SEND_COUNT: usize = 100_000;

    let capture = Arc::new(CaptureConn::default());
    let (handle, addr, join) = start_server(Config::default(), capture.clone());

    let mut client = TcpStream::connect(addr).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        capture.slot.lock().unwrap().is_some()
    }));
    let conn = capture.slot.lock().unwrap().clone().unwrap();

    let sender = thread::spawn(move || {
        for _ in 0..SEND_COUNT {
            conn.send(b"x");
        }
        conn.close(false);
    });

    let mut received = Vec::new();
    client.read_to_end(&mut received).unwrap();
    sender.join().unwrap();

    assert_eq!(received.len(), SEND_COUNT);
    assert!(received.iter().all(|&b| b == b'x'));

    handle.stop();
    join.join().unwrap();
}
