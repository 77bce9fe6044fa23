// laba_relay: UDP position relay and session client.
//
// The relay is a thin broker: clients send their movement to it over UDP, it
// stamps each packet with the sender's relay-assigned id and forwards it to
// every other registered client. It never runs a simulation; it only
// remembers each peer's last known position so it can hand newcomers (and,
// optionally, everyone on a timer) a keyframe of the whole session.
//
// Module overview:
// - `registry.rs`:   Endpoint ↔ id bookkeeping, last known positions,
//                    liveness. Single-writer, no locks.
// - `server.rs`:     `RelayServer` receive/dispatch loop, `start_relay`,
//                    `RelayHandle`.
// - `client.rs`:     `SessionClient` (handshake, receive thread, movement
//                    cadence) and `MovementReporter`.
// - `dispatch.rs`:   `DispatchQueue`, the hand-off from network threads to
//                    the simulation thread.
// - `simulation.rs`: The `Simulation` trait the client drives.
// - `config.rs`:     `RelayConfig`, `ClientConfig` (serde, JSON).
// - `net.rs`:        Socket helpers shared by both sides.
// - `error.rs`:      `SessionError`.
//
// Dependencies: `laba_protocol` for the wire format, `tracing` for logs,
// `parking_lot` for the dispatch queue lock. No async runtime: every loop is
// a plain OS thread blocking on its socket.
//
// The relay can run as a standalone binary (`main.rs`) or be embedded in a
// host process via the library API (`start_relay`).

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod net;
pub mod registry;
pub mod server;
pub mod simulation;

pub use client::{MovementReporter, SessionClient};
pub use config::{ClientConfig, DEFAULT_PORT, DEFAULT_SEND_RATE_HZ, RelayConfig};
pub use dispatch::DispatchQueue;
pub use error::SessionError;
pub use server::{RelayHandle, RelayServer, start_relay};
pub use simulation::{SimQueue, Simulation};
