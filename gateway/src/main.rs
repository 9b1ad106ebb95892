//! TCP echo gateway binary.

mod config;
mod echo;
mod logging;

use clap::Parser;
use config::GatewayConfig;
use echo::EchoHandler;
use io_reactor::Server;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "TCP echo gateway on the reactor runtime")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match GatewayConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => GatewayConfig::default(),
    };

    logging::init(&config.logging);

    if let Err(e) = run(config) {
        tracing::error!(error = %e, "gateway failed");
        std::process::exit(1);
    }
}

fn run(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = Server::new(config.runtime_config())?;
    server.bind(config.listen)?;

    let idle_interval = match config.idle_timeout_ms {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };
    server.set_handler(Arc::new(EchoHandler::new(idle_interval)));

    let handle = server.handle();
    let signalled = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler(move || {
        if signalled.swap(true, Ordering::SeqCst) {
            tracing::warn!("second signal, exiting immediately");
            std::process::exit(1);
        }
        tracing::info!("shutdown signal received");
        handle.stop();
    })?;

    tracing::info!(
        addr = %config.listen,
        workers = config.worker_count(),
        "gateway starting"
    );
    server.run()?;
    tracing::info!("gateway stopped");
    Ok(())
}

fn print_default_config() {
    let config = r#"# Gateway configuration

# Address to listen on
listen = "127.0.0.1:7000"

# Close sessions with no inbound traffic for this long (milliseconds).
# 0 disables the idle sweep.
idle_timeout_ms = 0

[runtime]
# Number of worker threads (default: number of CPUs)
# worker_count = 4

# Bytes per read/write syscall attempt
read_chunk_size = 8192
write_chunk_size = 8192

# Per-connection send-buffer starting size
initial_buffer_capacity = 4096

# Set TCP_NODELAY on accepted sockets
tcp_nodelay = true

[logging]
# Log level filter (RUST_LOG takes precedence)
level = "info"

# Output format: "pretty", "compact", or "json"
format = "pretty"
"#;
    print!("{}", config);
}
