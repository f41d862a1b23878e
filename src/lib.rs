#![cfg_attr(feature = "cargo-clippy", allow(clippy::too_many_arguments))]

//! Client side coordinator for DKLS threshold ECDSA signing.
//!
//! A [`TssClient`] joins a signing session as one party next to a set of
//! remote servers. It opens a socket to every server, relays the engine's
//! protocol messages over them, asks the servers to precompute over REST,
//! and finally combines the signature fragments of all parties into one
//! low-S secp256k1 signature.

pub mod client;
pub mod coefficients;
pub mod config;
pub mod connections;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod helpers;
pub mod mailbox;
pub mod rest;
pub mod session;
pub mod transport;

#[cfg(test)]
mod simulation;

pub use crate::client::{SessionParams, SessionState, Signature, TssClient};
pub use crate::config::{ClientConfig, SocketConfig};
pub use crate::context::TssContext;
pub use crate::engine::{CommChannel, Precompute, SigningEngine};
pub use crate::error::{TssClientError, TssClientResult};
pub use crate::rest::{HttpPeerClient, PeerClient};
pub use crate::transport::{SocketConnection, SocketConnector, SocketEventHandler};
