//! NimbusKV - A Single-Threaded In-Memory Cache Server
//!
//! This is the main entry point for the NimbusKV server.
//! It parses the configuration, sets up logging, and runs the event loop
//! until Ctrl+C.

use nimbuskv::config::{CliAction, ServerConfig};
use nimbuskv::server::Server;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_help() {
    println!(
        r#"
NimbusKV - A Single-Threaded In-Memory Cache Server

USAGE:
    nimbuskv [OPTIONS]

OPTIONS:
    -h, --host <HOST>              Host to bind to (default: {host})
    -p, --port <PORT>              Port to listen on (default: {port})
        --idle-timeout <MS>        Close connections idle this long (default: {idle})
        --default-ttl <MS>         TTL for keys set without one (default: {ttl})
        --max-load-factor <F>      Hash index resize threshold (default: 1.0)
    -v, --version                  Print version information
        --help                     Print this help message

LOGGING:
    Set RUST_LOG to change verbosity, e.g. RUST_LOG=nimbuskv=debug

EXAMPLES:
    nimbuskv                       # Start on {host}:{port}
    nimbuskv --port 4000           # Start on port 4000
    nimbuskv-cli set name nimbus   # Talk to it
"#,
        host = nimbuskv::DEFAULT_HOST,
        port = nimbuskv::DEFAULT_PORT,
        idle = nimbuskv::IDLE_TIMEOUT.as_millis(),
        ttl = nimbuskv::DEFAULT_TTL.as_millis(),
    );
}

fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = match ServerConfig::from_args(std::env::args().skip(1))? {
        CliAction::Run(config) => config,
        CliAction::Help => {
            print_help();
            return Ok(());
        }
        CliAction::Version => {
            println!("NimbusKV version {}", nimbuskv::VERSION);
            return Ok(());
        }
    };

    // Set up logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("NimbusKV v{} starting", nimbuskv::VERSION);
    let mut server = Server::bind(config)?;
    let shutdown = server.shutdown_handle();

    // The event loop owns its thread; the runtime only waits for Ctrl+C
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let outcome: anyhow::Result<()> = runtime.block_on(async move {
        let mut event_loop = tokio::task::spawn_blocking(move || server.run());

        tokio::select! {
            result = &mut event_loop => {
                return result?.map_err(anyhow::Error::from);
            }
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for Ctrl+C");
                }
                info!("Shutdown signal received, stopping server...");
            }
        }

        shutdown.shutdown()?;
        event_loop.await??;
        info!("Server shutdown complete");
        Ok(())
    });
    outcome
}
