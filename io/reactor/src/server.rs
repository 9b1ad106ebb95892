//! Runtime facade: bind the listen address, install the handler, run the
//! acceptor on the calling thread with N worker threads behind it.

use crate::acceptor::{Acceptor, create_listener};
use crate::error::Error;
use crate::handler::Handler;
use crate::wake::WakePipe;
use crate::worker::{Worker, WorkerShared};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Runtime configuration. Programmatic only — applications embedding the
/// runtime map their own configuration sources onto this.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of worker loops, each pinned to one kernel thread.
    pub worker_count: usize,
    /// Bytes per read syscall attempt.
    pub read_chunk_size: usize,
    /// Bytes per write syscall attempt.
    pub write_chunk_size: usize,
    /// Per-connection send-buffer starting size.
    pub initial_buffer_capacity: usize,
    /// Set TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 2,
            read_chunk_size: 8192,
            write_chunk_size: 8192,
            initial_buffer_capacity: 4096,
            tcp_nodelay: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), Error> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be >= 1".to_string()));
        }
        if self.read_chunk_size == 0 || self.write_chunk_size == 0 {
            return Err(Error::Config("chunk sizes must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// The runtime. `run` blocks the calling thread in the acceptor loop until
/// `ServerHandle::stop` is called, then joins the workers and closes the
/// listening socket.
pub struct Server {
    config: Config,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    handler: Option<Arc<dyn Handler>>,
    workers: Vec<Arc<WorkerShared>>,
    running: Arc<AtomicBool>,
    acceptor_waker: Arc<WakePipe>,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            workers.push(Arc::new(WorkerShared::new(worker_id)?));
        }
        Ok(Self {
            config,
            listener: None,
            local_addr: None,
            handler: None,
            workers,
            running: Arc::new(AtomicBool::new(false)),
            acceptor_waker: Arc::new(WakePipe::new()?),
        })
    }

    /// Prepare the listening socket.
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), Error> {
        let listener = create_listener(addr)?;
        self.local_addr = Some(listener.local_addr()?);
        self.listener = Some(listener);
        Ok(())
    }

    /// Install the handler shared by all workers.
    pub fn set_handler(&mut self, handler: Arc<dyn Handler>) {
        self.handler = Some(handler);
    }

    /// The bound address, once `bind` has succeeded. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// A clonable handle for stopping the runtime from any thread.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            running: self.running.clone(),
            workers: self.workers.clone(),
            acceptor_waker: self.acceptor_waker.clone(),
        }
    }

    /// Spawn the worker threads and run the acceptor loop on the calling
    /// thread. Returns after `stop` once the workers have been joined and
    /// the listening socket closed.
    pub fn run(&mut self) -> Result<(), Error> {
        let listener = self.listener.take().ok_or(Error::NotBound)?;
        let handler = self.handler.clone().ok_or(Error::NoHandler)?;
        self.running.store(true, Ordering::Release);

        let mut handles = Vec::with_capacity(self.workers.len());
        for shared in &self.workers {
            let shared = shared.clone();
            let handler = handler.clone();
            let config = self.config.clone();
            let handle = thread::Builder::new()
                .name(format!("reactor-worker-{}", shared.worker_id()))
                .spawn(move || match Worker::new(shared, handler, &config) {
                    Ok(mut worker) => {
                        if let Err(e) = worker.run() {
                            tracing::error!(error = %e, "worker loop failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "worker setup failed"),
                })?;
            handles.push(handle);
        }

        let result = Acceptor::new(
            listener,
            self.workers.clone(),
            self.acceptor_waker.clone(),
            self.running.clone(),
            self.config.tcp_nodelay,
        )
        .and_then(|mut acceptor| acceptor.run());

        // The acceptor has exited (stop, or a poll failure): make sure every
        // worker stops, then join them.
        self.running.store(false, Ordering::Release);
        for shared in &self.workers {
            shared.shutdown();
        }
        for handle in handles {
            let _ = handle.join();
        }

        result.map_err(Error::from)
    }
}

/// Stops a running `Server` from any thread: flips the running flags and
/// pokes every loop's wake-up pipe so blocked polls return promptly.
#[derive(Clone)]
pub struct ServerHandle {
    running: Arc<AtomicBool>,
    workers: Vec<Arc<WorkerShared>>,
    acceptor_waker: Arc<WakePipe>,
}

impl ServerHandle {
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::info!("stop requested");
        }
        self.acceptor_waker.wake();
        for shared in &self.workers {
            shared.shutdown();
        }
    }
}
