//! Error taxonomy for the HyperBloom engine.
//!
//! Every variant here is fatal to the session unless its doc comment says
//! otherwise (only [`HyperbloomError::CallerMisuse`] is not).

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum HyperbloomError {
    #[error("first 4 bytes of the inbound stream were not the HyperBloom magic")]
    BadMagic,

    #[error("varint exceeds 5 bytes / 32 significant bits")]
    VarintOverflow,

    #[error("frame length {0} exceeds MAX_FRAME_SIZE")]
    FrameTooLarge(usize),

    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("Open.feed did not match the expected discovery key")]
    FeedMismatch,

    #[error("Open.nonce had length {0}, expected 24")]
    InvalidNonce(usize),

    #[error("first post-Open message was not Handshake")]
    HandshakeExpected,

    #[error("Handshake received twice on one direction")]
    DuplicateHandshake,

    #[error("peer signature or trust chain did not verify: {0}")]
    UntrustedPeer(String),

    #[error("trust chain invalid: {0}")]
    InvalidChain(String),

    #[error("protocol invariant violated: {0}")]
    ProtocolViolation(String),

    #[error("backpressure buffer exceeded MAX_FRAME_SIZE")]
    MessageTooBig,

    /// Not fatal: surfaced synchronously to the caller of a send method,
    /// before anything is queued or written.
    #[error("caller misuse: {0}")]
    CallerMisuse(String),
}

pub type Result<T> = std::result::Result<T, HyperbloomError>;
