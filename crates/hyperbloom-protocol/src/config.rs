//! `start()` input (spec.md §6's Configuration table).
//!
//! Modeled the way the teacher's `ClientConfig` (`openshare-core::config`)
//! bundles identity material for one call site rather than threading loose
//! arguments through the constructor.

use crate::chain::TrustLink;
use crate::constants::{ID_SIZE, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};

/// Credentials and chain supplied to a `Session` at `start()`.
///
/// `discovery_key` and `id` are optional: the engine derives a discovery key
/// from `feed_key` when one isn't supplied, and mints a random id when one
/// isn't supplied, per spec.md §4.4.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StartOptions {
    pub feed_key: [u8; PUBLIC_KEY_SIZE],
    pub private_key: [u8; PRIVATE_KEY_SIZE],
    pub chain: Vec<TrustLink>,
    pub discovery_key: Option<[u8; 32]>,
    pub id: Option<[u8; ID_SIZE]>,
}

impl StartOptions {
    pub fn new(feed_key: [u8; PUBLIC_KEY_SIZE], private_key: [u8; PRIVATE_KEY_SIZE]) -> Self {
        StartOptions {
            feed_key,
            private_key,
            chain: Vec::new(),
            discovery_key: None,
            id: None,
        }
    }

    pub fn with_chain(mut self, chain: Vec<TrustLink>) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_id(mut self, id: [u8; ID_SIZE]) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_discovery_key(mut self, discovery_key: [u8; 32]) -> Self {
        self.discovery_key = Some(discovery_key);
        self
    }
}
