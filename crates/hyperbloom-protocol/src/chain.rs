//! Trust Link encoding and chain verification / extension logic (spec.md §4.5).
//!
//! The engine treats chain elements as opaque encoded bytes on the wire; this
//! module is the (injected) verifier collaborator that actually parses and
//! walks them.

use protobuf::Message as ProtoMessage;

use crate::codec::TrustLinkProto;
use crate::constants::{HASH_KEY, MAX_CHAIN_LENGTH, NONCE_SIZE, PUBLIC_KEY_SIZE};
use crate::crypto::CryptoProvider;
use crate::error::{HyperbloomError, Result};

/// A signed assertion delegating write authority to `public_key`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrustLink {
    pub version: u32,
    pub public_key: [u8; PUBLIC_KEY_SIZE],
    pub nonce: Vec<u8>,
    pub signature: Vec<u8>,
    /// `None` means "no expiration" (infinite).
    pub expiration: Option<u64>,
}

impl TrustLink {
    pub fn encode(&self) -> Vec<u8> {
        let mut proto = TrustLinkProto::new();
        proto.set_version(self.version);
        proto.set_public_key(self.public_key.to_vec());
        proto.set_nonce(self.nonce.clone());
        proto.set_signature(self.signature.clone());
        if let Some(exp) = self.expiration {
            proto.set_expiration(exp);
        }
        proto.write_to_bytes().expect("TrustLink always encodes")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let proto = TrustLinkProto::parse_from_bytes(bytes)
            .map_err(|e| HyperbloomError::InvalidChain(format!("link decode: {e}")))?;
        if !proto.has_version() || !proto.has_public_key() || !proto.has_nonce() || !proto.has_signature() {
            return Err(HyperbloomError::InvalidChain(
                "link missing a required field".into(),
            ));
        }
        let public_key_bytes = proto.get_public_key();
        if public_key_bytes.len() != PUBLIC_KEY_SIZE {
            return Err(HyperbloomError::InvalidChain(
                "link public key had the wrong length".into(),
            ));
        }
        let mut public_key = [0u8; PUBLIC_KEY_SIZE];
        public_key.copy_from_slice(public_key_bytes);

        Ok(TrustLink {
            version: proto.get_version(),
            public_key,
            nonce: proto.get_nonce().to_vec(),
            signature: proto.get_signature().to_vec(),
            expiration: if proto.has_expiration() {
                Some(proto.get_expiration())
            } else {
                None
            },
        })
    }

    /// The hash each link's signature covers: `H(HASH_KEY, version ‖ publicKey ‖ nonce)`.
    fn signed_hash(&self, crypto: &dyn CryptoProvider) -> [u8; 32] {
        let mut preimage = Vec::with_capacity(4 + PUBLIC_KEY_SIZE + self.nonce.len());
        preimage.extend_from_slice(&self.version.to_be_bytes());
        preimage.extend_from_slice(&self.public_key);
        preimage.extend_from_slice(&self.nonce);
        crypto.hash(HASH_KEY, &preimage)
    }
}

/// Result of walking a chain: the terminal public key and the minimum
/// expiration seen across all links (`None` if the chain is empty or no
/// link carries an expiration — i.e. infinite).
pub struct WalkResult {
    pub terminal_public_key: [u8; PUBLIC_KEY_SIZE],
    pub min_expiration: Option<u64>,
}

/// Walks a chain starting from `feed_key`, verifying each link's signature
/// under the running authority, per spec.md §4.5 step 2. Rejects any link
/// whose version is not 1, and any chain longer than `MAX_CHAIN_LENGTH`.
pub fn walk_chain(
    crypto: &dyn CryptoProvider,
    feed_key: &[u8; PUBLIC_KEY_SIZE],
    chain: &[TrustLink],
) -> Result<WalkResult> {
    if chain.len() > MAX_CHAIN_LENGTH {
        tracing::warn!("chain length {} exceeds MAX_CHAIN_LENGTH", chain.len());
        return Err(HyperbloomError::InvalidChain(format!(
            "chain length {} exceeds MAX_CHAIN_LENGTH",
            chain.len()
        )));
    }

    let mut authority = *feed_key;
    let mut min_expiration: Option<u64> = None;

    for link in chain {
        if link.version != 1 {
            return Err(HyperbloomError::InvalidChain(format!(
                "link version {} is not 1",
                link.version
            )));
        }
        if link.signature.len() != 64 {
            return Err(HyperbloomError::InvalidChain(
                "link signature had the wrong length".into(),
            ));
        }
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&link.signature);

        let hash = link.signed_hash(crypto);
        if !crypto.verify(&hash, &sig, &authority) {
            tracing::warn!("chain link signature did not verify under the running authority");
            return Err(HyperbloomError::InvalidChain(
                "link signature did not verify under the running authority".into(),
            ));
        }

        min_expiration = match (min_expiration, link.expiration) {
            (None, other) => other,
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
        };

        authority = link.public_key;
    }

    Ok(WalkResult {
        terminal_public_key: authority,
        min_expiration,
    })
}

/// Verifies that `private_key` is the private counterpart of the chain's
/// terminal public key, by signing an all-zero hash and checking it verifies
/// under the walked terminal key. Used both at `start` (spec.md §4.4's
/// self-test) and when accepting a chain-extension `Link` (spec.md §4.5).
pub fn verify_chain_owned_by(
    crypto: &dyn CryptoProvider,
    feed_key: &[u8; PUBLIC_KEY_SIZE],
    chain: &[TrustLink],
    private_key: &[u8; 64],
) -> Result<WalkResult> {
    let walk = walk_chain(crypto, feed_key, chain)?;
    let zero_hash = [0u8; 32];
    let sig = crypto.sign(&zero_hash, private_key);
    if !crypto.verify(&zero_hash, &sig, &walk.terminal_public_key) {
        tracing::warn!("private key does not own the chain's terminal public key");
        return Err(HyperbloomError::InvalidChain(
            "private key does not own the chain's terminal public key".into(),
        ));
    }
    tracing::debug!("chain of {} link(s) verified and owned", chain.len());
    Ok(walk)
}

/// Issues a one-shot shortening/extension link delegating to `terminal`,
/// signed by `issuer_private_key` under the authority it currently holds
/// (spec.md §4.5).
pub fn issue_link(
    crypto: &dyn CryptoProvider,
    issuer_private_key: &[u8; 64],
    terminal: [u8; PUBLIC_KEY_SIZE],
    expiration: Option<u64>,
) -> TrustLink {
    let nonce = crypto.random_bytes(NONCE_SIZE);
    let mut link = TrustLink {
        version: 1,
        public_key: terminal,
        nonce,
        signature: Vec::new(),
        expiration,
    };
    let hash = link.signed_hash(crypto);
    let sig = crypto.sign(&hash, issuer_private_key);
    link.signature = sig.to_vec();
    tracing::debug!("issued a trust link delegating to a new terminal key");
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Sodium;
    use sodiumoxide::crypto::sign;

    fn pk_bytes(pk: &sign::PublicKey) -> [u8; PUBLIC_KEY_SIZE] {
        let mut out = [0u8; PUBLIC_KEY_SIZE];
        out.copy_from_slice(pk.as_ref());
        out
    }
    fn sk_bytes(sk: &sign::SecretKey) -> [u8; 64] {
        let mut out = [0u8; 64];
        out.copy_from_slice(sk.as_ref());
        out
    }

    #[test]
    fn empty_chain_walk_terminates_at_feed_key() {
        let crypto = Sodium::new();
        let feed = [1u8; PUBLIC_KEY_SIZE];
        let walk = walk_chain(&crypto, &feed, &[]).unwrap();
        assert_eq!(walk.terminal_public_key, feed);
        assert_eq!(walk.min_expiration, None);
    }

    #[test]
    fn single_link_chain_walks_and_verifies_ownership() {
        let crypto = Sodium::new();
        let (feed_pk, feed_sk) = sign::gen_keypair();
        let (delegate_pk, delegate_sk) = sign::gen_keypair();

        let link = issue_link(&crypto, &sk_bytes(&feed_sk), pk_bytes(&delegate_pk), Some(100));
        let walk = walk_chain(&crypto, &pk_bytes(&feed_pk), &[link.clone()]).unwrap();
        assert_eq!(walk.terminal_public_key, pk_bytes(&delegate_pk));
        assert_eq!(walk.min_expiration, Some(100));

        let owned = verify_chain_owned_by(
            &crypto,
            &pk_bytes(&feed_pk),
            &[link],
            &sk_bytes(&delegate_sk),
        );
        assert!(owned.is_ok());
    }

    #[test]
    fn chain_longer_than_max_is_rejected() {
        let crypto = Sodium::new();
        let (feed_pk, feed_sk) = sign::gen_keypair();

        let mut chain = Vec::new();
        let mut authority_sk = sk_bytes(&feed_sk);
        let mut authority_pk = pk_bytes(&feed_pk);
        for _ in 0..=MAX_CHAIN_LENGTH {
            let (next_pk, next_sk) = sign::gen_keypair();
            let link = issue_link(&crypto, &authority_sk, pk_bytes(&next_pk), None);
            chain.push(link);
            authority_sk = sk_bytes(&next_sk);
            authority_pk = pk_bytes(&next_pk);
        }
        let _ = authority_pk;

        assert!(walk_chain(&crypto, &pk_bytes(&feed_pk), &chain).is_err());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let crypto = Sodium::new();
        let (feed_pk, feed_sk) = sign::gen_keypair();
        let (delegate_pk, _delegate_sk) = sign::gen_keypair();

        let mut link = issue_link(&crypto, &sk_bytes(&feed_sk), pk_bytes(&delegate_pk), None);
        link.version = 2;
        assert!(walk_chain(&crypto, &pk_bytes(&feed_pk), &[link]).is_err());
    }
}
