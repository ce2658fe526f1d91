//! HyperBloom wire protocol engine: a sans-io, length-framed, encrypted
//! duplex message stream with an X25519-free handshake (paired-nonce +
//! Ed25519 detached signatures) and trust-chain mutual authentication.
//!
//! The engine performs no I/O of its own. It is driven by feeding it
//! inbound bytes and handing it a [`ByteSink`]/[`EventSink`] pair; the
//! optional `adapter` feature (on by default) layers a thin `tokio`
//! integration on top for real sockets, in [`tokio_adapter`].

pub mod chain;
pub mod codec;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod parser;
pub mod session;
pub mod varint;

#[cfg(feature = "adapter")]
pub mod tokio_adapter;

pub use chain::TrustLink;
pub use codec::{DataMsg, FilterOptionsMsg, Message, OpenMessage, RangeMsg, RequestMsg, SyncMsg};
pub use config::StartOptions;
pub use crypto::{CryptoProvider, Sodium};
pub use engine::Engine;
pub use error::{HyperbloomError, Result};
pub use events::{ByteSink, EventSink};
pub use session::SendCallback;
