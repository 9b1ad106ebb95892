//! Startup, shutdown and dispatch behaviour of the whole runtime.

use io_reactor::{Config, Connection, DisconnectReason, Handler, Server, ServerHandle};
use std::collections::HashSet;
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Records the owning worker of each accepted connection and every
/// disconnect reason.
#[derive(Default)]
struct Placement {
    workers: Mutex<Vec<usize>>,
    disconnect_codes: Mutex<Vec<u8>>,
}

impl Handler for Placement {
    fn on_accepted(&self, conn: &Arc<Connection>) {
        self.workers.lock().unwrap().push(conn.worker_id());
    }

    fn on_message(&self, _conn: &Arc<Connection>, _data: &[u8]) {}

    fn on_disconnected(&self, _conn: &Arc<Connection>, reason: DisconnectReason) {
        self.disconnect_codes.lock().unwrap().push(reason.code());
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
fn test_stop_terminates_promptly_and_reports_reason() {
    let handler = Arc::new(Placement::default());
    let (handle, addr, join) = start_server(
        Config {
            worker_count: 1,
            ..Config::default()
        },
        handler.clone(),
    );

    let mut client = TcpStream::connect(addr).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        !handler.workers.lock().unwrap().is_empty()
    }));

    let stop_started = Instant::now();
    handle.stop();

    assert!(
        wait_until(Duration::from_secs(3), || join.is_finished()),
        "server did not stop within 3s"
    );
    assert!(stop_started.elapsed() < Duration::from_secs(3));
    join.join().unwrap();

    // The live connection is torn down with the runtime-stopping reason
    // and the client observes EOF.
    assert_eq!(*handler.disconnect_codes.lock().unwrap(), vec![4]);
    let mut buf = Vec::new();
    client.read_to_end(&mut buf).unwrap();
    assert!(buf.is_empty());
}

#[test]
fn test_round_robin_covers_every_worker() {
    const WORKERS: usize = 4;
    const CONNECTIONS: usize = 16;

    let handler = Arc::new(Placement::default());
    let (handle, addr, join) = start_server(
        Config {
            worker_count: WORKERS,
            ..Config::default()
        },
        handler.clone(),
    );

    let mut clients = Vec::with_capacity(CONNECTIONS);
    for _ in 0..CONNECTIONS {
        clients.push(TcpStream::connect(addr).unwrap());
    }

    assert!(wait_until(Duration::from_secs(2), || {
        handler.workers.lock().unwrap().len() == CONNECTIONS
    }));

    let placements = handler.workers.lock().unwrap().clone();
    let covered: HashSet<usize> = placements.iter().copied().collect();
    assert_eq!(
        covered,
        (0..WORKERS).collect::<HashSet<_>>(),
        "placements: {:?}",
        placements
    );

    drop(clients);
    handle.stop();
    join.join().unwrap();
}

#[test]
fn test_listener_closed_after_run_returns() {
    let handler = Arc::new(Placement::default());
    let (handle, addr, join) = start_server(Config::default(), handler);

    // Prove the listener works, then stop.
    let probe = TcpStream::connect(addr).unwrap();
    drop(probe);
    handle.stop();
    join.join().unwrap();

    // Connecting again must fail: the listening socket is gone.
    assert!(TcpStream::connect(addr).is_err());
}
