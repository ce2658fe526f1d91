//! Crypto primitives adapter.
//!
//! Narrow contract over signatures, a keyed hash, and a keystream, per the
//! engine's design: the signature/hash/stream primitives are referenced by
//! contract and injected, never reached for directly by the rest of the
//! crate. The default implementation is backed by libsodium's Ed25519,
//! BLAKE2b (generichash), and XSalsa20 (stream) via `sodiumoxide` — the same
//! primitive triple the upstream JS protocol and its earlier Rust port both
//! use, and the one spec.md §4.2 describes.

use sodiumoxide::crypto::{generichash, sign, stream::xsalsa20};

use crate::constants::{HASH_SIZE, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};

/// A stateful byte-sink that XORs a keystream into a buffer in place,
/// advancing its position monotonically. Never rewound.
pub trait Keystream: Send {
    fn xor(&mut self, buf: &mut [u8]);
}

/// Contract for the three primitives the engine depends on, plus
/// randomness. Injected so tests can supply deterministic randomness and
/// so the engine never touches a crypto library directly.
pub trait CryptoProvider: Send + Sync {
    fn sign(&self, msg_hash: &[u8; HASH_SIZE], private_key: &[u8; PRIVATE_KEY_SIZE]) -> [u8; 64];

    fn verify(
        &self,
        msg_hash: &[u8; HASH_SIZE],
        signature: &[u8; 64],
        public_key: &[u8; PUBLIC_KEY_SIZE],
    ) -> bool;

    fn hash(&self, key: &[u8], input: &[u8]) -> [u8; HASH_SIZE];

    fn keystream(&self, key: &[u8; PUBLIC_KEY_SIZE], nonce: &[u8]) -> Box<dyn Keystream>;

    fn random_bytes(&self, n: usize) -> Vec<u8>;
}

/// libsodium-backed implementation.
#[derive(Default, Clone, Copy)]
pub struct Sodium;

impl Sodium {
    pub fn new() -> Self {
        sodiumoxide::init().expect("sodiumoxide::init failed");
        Sodium
    }
}

impl CryptoProvider for Sodium {
    fn sign(&self, msg_hash: &[u8; HASH_SIZE], private_key: &[u8; PRIVATE_KEY_SIZE]) -> [u8; 64] {
        let sk = sign::SecretKey::from_slice(private_key).expect("private key is 64 bytes");
        let sig = sign::sign_detached(msg_hash, &sk);
        let mut out = [0u8; 64];
        out.copy_from_slice(sig.as_ref());
        out
    }

    fn verify(
        &self,
        msg_hash: &[u8; HASH_SIZE],
        signature: &[u8; 64],
        public_key: &[u8; PUBLIC_KEY_SIZE],
    ) -> bool {
        let pk = match sign::PublicKey::from_slice(public_key) {
            Some(pk) => pk,
            None => return false,
        };
        let sig = match sign::Signature::from_slice(signature) {
            Some(sig) => sig,
            None => return false,
        };
        sign::verify_detached(&sig, msg_hash, &pk)
    }

    fn hash(&self, key: &[u8], input: &[u8]) -> [u8; HASH_SIZE] {
        let mut state =
            generichash::State::new(HASH_SIZE, Some(key)).expect("valid generichash params");
        state.update(input).expect("generichash update");
        let digest = state.finalize().expect("generichash finalize");
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(digest.as_ref());
        out
    }

    fn keystream(&self, key: &[u8; PUBLIC_KEY_SIZE], nonce: &[u8]) -> Box<dyn Keystream> {
        Box::new(XSalsa20Keystream::new(key, nonce))
    }

    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        sodiumoxide::randombytes::randombytes_into(&mut buf);
        buf
    }
}

/// XSalsa20 keystream with byte-granular position tracking. `stream_xor_ic`
/// only addresses whole 64-byte blocks, so a call that doesn't land on a
/// block boundary regenerates the straddling block and discards its unused
/// prefix; the underlying cipher is still only ever applied forward.
struct XSalsa20Keystream {
    key: xsalsa20::Key,
    nonce: xsalsa20::Nonce,
    position: u64,
}

impl XSalsa20Keystream {
    const BLOCK_SIZE: u64 = 64;

    fn new(key: &[u8; PUBLIC_KEY_SIZE], nonce: &[u8]) -> Self {
        let key = xsalsa20::Key::from_slice(key).expect("xsalsa20 key is 32 bytes");
        let nonce = xsalsa20::Nonce::from_slice(nonce).expect("xsalsa20 nonce is 24 bytes");
        XSalsa20Keystream {
            key,
            nonce,
            position: 0,
        }
    }
}

impl Keystream for XSalsa20Keystream {
    fn xor(&mut self, buf: &mut [u8]) {
        if buf.is_empty() {
            return;
        }
        let block_index = self.position / Self::BLOCK_SIZE;
        let offset = (self.position % Self::BLOCK_SIZE) as usize;
        let zeroes = vec![0u8; offset + buf.len()];
        let keystream = xsalsa20::stream_xor_ic(&zeroes, &self.nonce, block_index, &self.key);
        for (b, k) in buf.iter_mut().zip(keystream[offset..].iter()) {
            *b ^= *k;
        }
        self.position += buf.len() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystream_is_deterministic_and_never_rewinds() {
        let crypto = Sodium::new();
        let key = [7u8; PUBLIC_KEY_SIZE];
        let nonce = crypto.random_bytes(24);

        let mut ks_a = crypto.keystream(&key, &nonce);
        let mut whole = [0u8; 200];
        ks_a.xor(&mut whole);

        let mut ks_b = crypto.keystream(&key, &nonce);
        let mut first = [0u8; 37];
        let mut rest = [0u8; 163];
        ks_b.xor(&mut first);
        ks_b.xor(&mut rest);

        let mut reassembled = Vec::new();
        reassembled.extend_from_slice(&first);
        reassembled.extend_from_slice(&rest);
        assert_eq!(&whole[..], &reassembled[..]);
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let crypto = Sodium::new();
        let (pk, sk) = sign::gen_keypair();
        let mut pk_bytes = [0u8; PUBLIC_KEY_SIZE];
        pk_bytes.copy_from_slice(pk.as_ref());
        let mut sk_bytes = [0u8; PRIVATE_KEY_SIZE];
        sk_bytes.copy_from_slice(sk.as_ref());

        let hash = crypto.hash(b"hyperbloom", b"paired-hash-input");
        let sig = crypto.sign(&hash, &sk_bytes);
        assert!(crypto.verify(&hash, &sig, &pk_bytes));

        let other_hash = crypto.hash(b"hyperbloom", b"different-input");
        assert!(!crypto.verify(&other_hash, &sig, &pk_bytes));
    }
}
