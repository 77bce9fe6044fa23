// CLI entry point for the LABA position relay.
//
// Starts a standalone relay server that session clients join over UDP. The
// relay forwards movement and hands out keyframes; it never runs a
// simulation. See `server.rs` for the loop and `registry.rs` for peer state.
//
// Configuration is layered: built-in defaults, then an optional JSON file
// (`--config`), then individual flags or their `LABA_*` environment
// variables. Logging goes through `tracing`; set `RUST_LOG` to change the
// level (default `info`).
//
// Usage:
//   relay [OPTIONS]
//     --config <PATH>             JSON file with any RelayConfig fields
//     --bind <ADDR>               Bind address (default: 0.0.0.0)
//     --port <PORT>               Listen port (default: 5555)
//     --checksums                 Append/verify CRC-32 on every frame
//     --max-peers <N>             Registration limit (default: 64)
//     --peer-timeout-ms <MS>      Liveness timeout, 0 disables (default: 10000)
//     --keyframe-interval-ms <MS> Periodic keyframe, 0 disables (default: off)
//
// Stops cleanly on Ctrl+C or SIGTERM.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use laba_relay::{RelayConfig, SessionError, start_relay};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "relay", about = "LABA UDP position relay", version)]
struct Args {
    /// JSON configuration file; flags below override its values
    #[arg(long, env = "LABA_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(long, env = "LABA_BIND")]
    bind: Option<IpAddr>,

    /// UDP port to listen on
    #[arg(long, env = "LABA_PORT")]
    port: Option<u16>,

    /// Append and verify a CRC-32 on every frame (clients must match)
    #[arg(long, env = "LABA_CHECKSUMS")]
    checksums: bool,

    /// Maximum registered peers
    #[arg(long, env = "LABA_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Remove peers silent for this long; 0 disables
    #[arg(long, env = "LABA_PEER_TIMEOUT_MS")]
    peer_timeout_ms: Option<u64>,

    /// Broadcast a keyframe to everyone on this cadence; 0 disables
    #[arg(long, env = "LABA_KEYFRAME_INTERVAL_MS")]
    keyframe_interval_ms: Option<u64>,
}

impl Args {
    fn into_config(self) -> Result<RelayConfig, SessionError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_json_file(path)?,
            None => RelayConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.checksums {
            config.checksums = true;
        }
        if let Some(max_peers) = self.max_peers {
            config.max_peers = max_peers;
        }
        if let Some(ms) = self.peer_timeout_ms {
            config.peer_timeout_ms = nonzero(ms);
        }
        if let Some(ms) = self.keyframe_interval_ms {
            config.keyframe_interval_ms = nonzero(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

fn nonzero(ms: u64) -> Option<u64> {
    (ms != 0).then_some(ms)
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "bad configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(
        checksums = config.checksums,
        max_peers = config.max_peers,
        peer_timeout_ms = ?config.peer_timeout_ms,
        keyframe_interval_ms = ?config.keyframe_interval_ms,
        "starting relay"
    );

    let (handle, addr) = match start_relay(config) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "failed to start relay");
            return ExitCode::FAILURE;
        }
    };
    info!(%addr, "relay ready, Ctrl+C to stop");

    install_signal_handlers();
    while !SHUTDOWN.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!(peers = handle.peer_count(), "shutting down");
    handle.stop();
    ExitCode::SUCCESS
}

#[cfg(unix)]
extern "C" fn on_signal(_signum: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Route SIGINT and SIGTERM to the shutdown flag.
#[cfg(unix)]
fn install_signal_handlers() {
    let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

/// Without signal handling the default Ctrl+C behavior ends the process.
#[cfg(not(unix))]
fn install_signal_handlers() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from([
            "relay",
            "--port",
            "6000",
            "--checksums",
            "--peer-timeout-ms",
            "0",
            "--keyframe-interval-ms",
            "250",
        ]);
        let config = args.into_config().unwrap();
        assert_eq!(config.port, 6000);
        assert!(config.checksums);
        assert_eq!(config.peer_timeout_ms, None);
        assert_eq!(config.keyframe_interval_ms, Some(250));
        assert_eq!(config.max_peers, RelayConfig::default().max_peers);
    }

    #[test]
    fn invalid_override_rejected() {
        let args = Args::parse_from(["relay", "--max-peers", "0"]);
        assert!(args.into_config().is_err());
    }
}
