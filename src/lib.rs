//! Quietwire is the client side of a TLS-disguised relay, designed to run as
//! a SIP003 plugin next to a local proxy client.
//!
//! ## Overview
//!
//! Every local TCP connection is carried over its own outbound connection to
//! a remote server. On the wire, that outbound connection looks like a
//! browser resuming a TLS 1.2 session with the configured server name:
//!
//! 1. The client sends a ClientHello shaped after a real browser. Two of its
//!    fields are keyed with the shared key, so the remote server can tell a
//!    genuine client from a probe.
//! 2. The server answers with its own disguise response, which the client
//!    drains without inspecting.
//! 3. The client sends a ChangeCipherSpec and a Finished-sized record.
//! 4. From then on, every chunk in either direction travels inside a record
//!    tagged as TLS application data.
//!
//! The payload itself is not encrypted by this crate. It is expected to be
//! already encrypted by the proxy protocol running on top.
//!
//! ## Quick Start
//!
//! * [`Client`]
//!
//!   The ready-to-use entry point: binds the local endpoint and spawns one
//!   task per accepted connection.
//!
//! * [`Initiator`]
//!
//!   Runs the handshake for one connection at a time and hands back a
//!   [`RelayPair`]. It is generic over a [`Dialer`], so the transport to the
//!   remote server can be replaced.
//!
//! * [`RelayPair`]
//!
//!   Two forwarding loops over a local and a remote stream. When either loop
//!   fails, both sockets are closed.
//!
//! ## Configuration
//!
//! [`Config`] carries the endpoints, the shared key, the server name and
//! the optional knobs. Inside a plugin process it is read from the
//! environment with [`Config::from_env`]; see the [`config`] module for the
//! options. A [`SessionState`] is then built once from the config and shared
//! by every connection.
//!
//! Note: the keyed handshake fields depend on the system time. Keep the
//! client clock roughly in sync with the server.
#![warn(missing_debug_implementations, missing_docs, unreachable_pub)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod config;
pub mod error;
pub mod handshake;

mod crypto;
mod initiator;
mod listener;
mod relay;
mod specification;
mod state;

pub use config::{Browser, Config, Endpoint, PluginOptions};
pub use crypto::{Opaque, SharedKey};
pub use error::{Error, HandshakeAborted};
pub use initiator::{Dialer, HandshakeState, Initiator, TcpDialer};
pub use listener::Client;
pub use relay::{RelayHandle, RelayPair, RelaySummary};
pub use specification::{DIAL_ATTEMPTS, HANDSHAKE_DISCARD_LEN, RELAY_BUF_LEN};
pub use state::SessionState;
