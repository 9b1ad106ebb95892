//! Edge-triggered reactor runtime for latency-sensitive TCP services.
//!
//! One acceptor loop owns the listening socket and deals accepted sockets
//! out to N worker loops round-robin. Each worker owns an event
//! demultiplexer, a timerfd-backed timer service and a disjoint set of
//! connections; cross-thread work (new sockets, send requests, stop) is
//! handed over through per-worker in-boxes paired with a wake-up pipe.
//!
//! The runtime delivers raw byte ranges — framing, sessions and protocol
//! logic live in the application's [`Handler`].

mod acceptor;
pub mod buffer;
pub mod connection;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod poller;
pub mod server;
pub mod timer;
mod wake;
pub mod watch;
mod worker;

pub use buffer::ByteBuffer;
pub use connection::Connection;
pub use error::Error;
pub use handler::{DisconnectReason, Handler};
pub use poller::{PollEvent, Poller};
pub use server::{Config, Server, ServerHandle};
pub use timer::{TimerId, TimerService};
pub use watch::FdWatch;
