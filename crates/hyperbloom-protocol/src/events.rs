//! The duplex adapter's callback surface (spec.md §6).
//!
//! Modeled as a capability, not a concrete stream base class: anything that
//! can push bytes out and receive named-event callbacks works as the other
//! half of an `Engine`, per spec.md §9 ("duplex adapter as a capability").

use crate::chain::TrustLink;
use crate::codec::{Message, OpenMessage};
use crate::constants::ID_SIZE;
use crate::error::HyperbloomError;

/// Outbound byte push. The engine never blocks; a transport that can't
/// accept bytes right now is the transport's problem, not the engine's —
/// see spec.md §5 on backpressure being signaled outside the engine.
pub trait ByteSink {
    fn push(&mut self, bytes: &[u8]);
}

/// Named events a `Session`/`Engine` emits, per spec.md §6.
#[allow(unused_variables)]
pub trait EventSink {
    fn on_open(&mut self, open: OpenMessage) {}
    fn on_secure(&mut self, id: [u8; ID_SIZE], chain: Vec<TrustLink>) {}
    fn on_message(&mut self, message: Message) {}
    fn on_chain_update(&mut self, chain: Vec<TrustLink>) {}
    fn on_error(&mut self, err: &HyperbloomError) {}
    fn on_close(&mut self) {}
}
