//! Wire-level and protocol constants.

/// Plaintext marker at the start of every outbound byte stream.
pub const MAGIC: [u8; 4] = [0xd5, 0x72, 0xc8, 0x75];

pub const PUBLIC_KEY_SIZE: usize = 32;
pub const PRIVATE_KEY_SIZE: usize = 64;
pub const ID_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 24;
pub const HASH_SIZE: usize = 32;

/// Largest frame body this engine will parse or emit, `Open` included.
pub const MAX_FRAME_SIZE: usize = 262_144;

/// A chain longer than this can never verify; `start` and `Link` reception
/// both reject before doing any signature work.
pub const MAX_CHAIN_LENGTH: usize = 5;

/// Keyed-hash personalization for paired-nonce hashes and trust link hashes.
pub const HASH_KEY: &[u8] = b"hyperbloom";

/// Keyed-hash personalization for deriving a feed's discovery key.
pub const DISCOVERY_HASH_KEY: &[u8] = b"hyperbloom-discovery";

/// Numeric wire ids. `Open` has no id of its own; it is recognized by
/// position (the first frame) rather than by tag.
pub mod message_id {
    pub const HANDSHAKE: u64 = 0;
    pub const SYNC: u64 = 1;
    pub const FILTER_OPTIONS: u64 = 2;
    pub const DATA: u64 = 3;
    pub const REQUEST: u64 = 4;
    pub const LINK: u64 = 5;
}
