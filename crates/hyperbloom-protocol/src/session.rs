//! Handshake and send-queue state machine (spec.md §4.4/§4.5).
//!
//! This is the piece the teacher's `handshake.rs`/`Session` most directly
//! lends its shape to: credential holder, nonce pairing, and an encrypted
//! session once paired. Unlike the teacher, pairing here produces a
//! keystream handed to an external `Parser` rather than an AEAD box this
//! type owns outright — the parser/session split is what makes the core
//! sans-io (see `crate::engine`).

use std::collections::VecDeque;

use crate::chain::{self, TrustLink};
use crate::codec::{self, DataMsg, HandshakeMsg, LinkMsg, Message, OpenMessage};
use crate::config::StartOptions;
use crate::constants::{HASH_KEY, ID_SIZE, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
use crate::crypto::{CryptoProvider, Keystream};
use crate::error::{HyperbloomError, Result};
use crate::events::{ByteSink, EventSink};

/// A callback to run once a queued send has actually gone out.
pub type SendCallback = Box<dyn FnOnce() + Send>;

struct Credentials {
    feed_key: [u8; PUBLIC_KEY_SIZE],
    feed: [u8; 32],
    private_key: [u8; PRIVATE_KEY_SIZE],
    chain: Vec<TrustLink>,
    id: [u8; ID_SIZE],
}

enum QueuedSend {
    Sync(crate::codec::SyncMsg, Option<SendCallback>),
    FilterOptions(crate::codec::FilterOptionsMsg, Option<SendCallback>),
    Data(DataMsg, Option<SendCallback>),
    Request(crate::codec::RequestMsg, Option<SendCallback>),
}

pub struct Session {
    crypto: Box<dyn CryptoProvider>,
    credentials: Option<Credentials>,
    /// Our own handshake nonce, live from `start()` until pairing zeroes it.
    local_nonce: Option<[u8; 24]>,
    /// The peer's `Open`, kept around until credentials let us act on it.
    remote_open: Option<OpenMessage>,
    /// `reversePairedHash`, stashed between pairing and verifying the
    /// peer's `Handshake` signature.
    expected_remote_signed_hash: Option<[u8; 32]>,
    /// Set once pairing completes; `Engine` takes it to resume the parser.
    pending_in_keystream: Option<Box<dyn Keystream>>,
    /// Keyed by our own (now-zeroed) local nonce; encrypts everything we
    /// send from the `Handshake` onward. The peer's inbound keystream uses
    /// the same nonce (its view of "remote"), so the two line up.
    out_keystream: Option<Box<dyn Keystream>>,
    handshake_sent: bool,
    secure: bool,
    remote_id: Option<[u8; ID_SIZE]>,
    remote_chain: Option<Vec<TrustLink>>,
    send_queue: VecDeque<QueuedSend>,
    shortening_offered: bool,
    destroyed: bool,
}

impl Session {
    pub fn new(crypto: Box<dyn CryptoProvider>) -> Self {
        Session {
            crypto,
            credentials: None,
            local_nonce: None,
            remote_open: None,
            expected_remote_signed_hash: None,
            pending_in_keystream: None,
            out_keystream: None,
            handshake_sent: false,
            secure: false,
            remote_id: None,
            remote_chain: None,
            send_queue: VecDeque::new(),
            shortening_offered: false,
            destroyed: false,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Takes the inbound keystream computed during pairing, if any is
    /// waiting. `Engine` installs it into the parser and calls `resume`.
    pub fn take_ready_inbound_keystream(&mut self) -> Option<Box<dyn Keystream>> {
        self.pending_in_keystream.take()
    }

    /// Provisions credentials and emits the outbound `Open`. A no-op once
    /// already started or after `destroy()`, matching the teacher's
    /// `Client::start` idempotence.
    pub fn start(&mut self, options: StartOptions, sink: &mut impl ByteSink) -> Result<()> {
        if self.destroyed || self.credentials.is_some() {
            return Ok(());
        }

        let feed = options
            .discovery_key
            .unwrap_or_else(|| self.crypto.hash(crate::constants::DISCOVERY_HASH_KEY, &options.feed_key));

        chain::verify_chain_owned_by(&*self.crypto, &options.feed_key, &options.chain, &options.private_key)
            .map_err(|e| HyperbloomError::InvalidChain(e.to_string()))?;

        let id = options.id.unwrap_or_else(|| {
            let bytes = self.crypto.random_bytes(ID_SIZE);
            let mut arr = [0u8; ID_SIZE];
            arr.copy_from_slice(&bytes);
            arr
        });

        self.credentials = Some(Credentials {
            feed_key: options.feed_key,
            feed,
            private_key: options.private_key,
            chain: options.chain,
            id,
        });

        let nonce_bytes = self.crypto.random_bytes(24);
        let mut local_nonce = [0u8; 24];
        local_nonce.copy_from_slice(&nonce_bytes);
        self.local_nonce = Some(local_nonce);

        tracing::debug!("Sending Open");
        sink.push(&codec::encode_open(&OpenMessage {
            feed,
            nonce: local_nonce,
        }));

        self.try_pair(sink)
    }

    /// Called by `Engine` when the parser decodes the peer's `Open`.
    pub fn on_open(&mut self, open: OpenMessage, sink: &mut impl ByteSink) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        tracing::debug!("Received Open");
        self.remote_open = Some(open);
        if self.credentials.is_some() {
            self.check_feed_match()?;
        }
        self.try_pair(sink)
    }

    fn check_feed_match(&self) -> Result<()> {
        if let (Some(creds), Some(remote)) = (&self.credentials, &self.remote_open) {
            if remote.feed != creds.feed {
                tracing::warn!("Open.feed did not match the expected discovery key");
                return Err(HyperbloomError::FeedMismatch);
            }
        }
        Ok(())
    }

    /// Pairs once both our own nonce (post-`start`) and the peer's `Open`
    /// are known and credentials are in hand: computes the paired hashes,
    /// zeroes the local nonce, stages the inbound keystream, and emits our
    /// `Handshake`, per spec.md §4.4.
    fn try_pair(&mut self, sink: &mut impl ByteSink) -> Result<()> {
        if self.handshake_sent {
            return Ok(());
        }
        let (local_nonce, remote_open) = match (self.local_nonce, &self.remote_open) {
            (Some(n), Some(o)) => (n, o.clone()),
            _ => return Ok(()),
        };
        self.check_feed_match()?;
        let (feed_key, private_key, id, chain_encoded) = match &self.credentials {
            Some(c) => (
                c.feed_key,
                c.private_key,
                c.id,
                c.chain.iter().map(TrustLink::encode).collect::<Vec<_>>(),
            ),
            None => return Ok(()),
        };

        let remote_nonce = remote_open.nonce;
        let mut paired_preimage = Vec::with_capacity(48);
        paired_preimage.extend_from_slice(&local_nonce);
        paired_preimage.extend_from_slice(&remote_nonce);
        let paired_hash = self.crypto.hash(HASH_KEY, &paired_preimage);

        let mut reverse_preimage = Vec::with_capacity(48);
        reverse_preimage.extend_from_slice(&remote_nonce);
        reverse_preimage.extend_from_slice(&local_nonce);
        let reverse_paired_hash = self.crypto.hash(HASH_KEY, &reverse_preimage);

        self.expected_remote_signed_hash = Some(reverse_paired_hash);
        self.pending_in_keystream = Some(self.crypto.keystream(&feed_key, &remote_nonce));
        self.out_keystream = Some(self.crypto.keystream(&feed_key, &local_nonce));
        self.local_nonce = None;
        self.handshake_sent = true;

        tracing::debug!("Performing handshake...");
        let signature = self.crypto.sign(&paired_hash, &private_key);
        let handshake = Message::Handshake(HandshakeMsg {
            id,
            extensions: Vec::new(),
            signature: signature.to_vec(),
            chain: chain_encoded,
        });
        let bytes = codec::encode(&handshake);
        self.push_encrypted(bytes, sink);
        Ok(())
    }

    /// Encrypts `bytes` (a fully encoded frame) with the outbound keystream
    /// and hands it to `sink`. Every frame after `Open` goes through here.
    fn push_encrypted(&mut self, mut bytes: Vec<u8>, sink: &mut impl ByteSink) {
        if let Some(ks) = self.out_keystream.as_mut() {
            ks.xor(&mut bytes);
        }
        sink.push(&bytes);
    }

    /// Called by `Engine` for every post-`Open` frame the parser decodes.
    pub fn on_frame(
        &mut self,
        message: Message,
        sink: &mut impl ByteSink,
        events: &mut impl EventSink,
    ) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        match message {
            Message::Handshake(hs) => self.on_handshake(hs, sink, events),
            Message::Data(d) => {
                validate_data(&d.values).map_err(|e| {
                    tracing::warn!("rejected inbound Data: {e}");
                    e
                })?;
                events.on_message(Message::Data(d));
                Ok(())
            }
            Message::Link(l) => self.on_link(l, events),
            other => {
                events.on_message(other);
                Ok(())
            }
        }
    }

    fn on_handshake(
        &mut self,
        hs: HandshakeMsg,
        sink: &mut impl ByteSink,
        events: &mut impl EventSink,
    ) -> Result<()> {
        let creds = self
            .credentials
            .as_ref()
            .expect("Handshake can't arrive before pairing, which requires credentials");
        let expected_hash = self
            .expected_remote_signed_hash
            .take()
            .expect("Handshake can't arrive before our own pairing computed the expected hash");

        if hs.signature.len() != 64 {
            tracing::warn!("Handshake.signature had the wrong length");
            return Err(HyperbloomError::UntrustedPeer(
                "Handshake.signature had the wrong length".into(),
            ));
        }
        let mut sig = [0u8; 64];
        sig.copy_from_slice(&hs.signature);

        let chain: Vec<TrustLink> = hs
            .chain
            .iter()
            .map(|bytes| TrustLink::decode(bytes))
            .collect::<Result<_>>()
            .map_err(|e| {
                tracing::warn!("Handshake.chain did not decode: {e}");
                HyperbloomError::UntrustedPeer(e.to_string())
            })?;

        let walk = chain::walk_chain(&*self.crypto, &creds.feed_key, &chain).map_err(|e| {
            tracing::warn!("peer's trust chain did not walk: {e}");
            HyperbloomError::UntrustedPeer(e.to_string())
        })?;

        if !self.crypto.verify(&expected_hash, &sig, &walk.terminal_public_key) {
            tracing::warn!("Handshake signature did not verify under the peer's trust chain");
            return Err(HyperbloomError::UntrustedPeer(
                "Handshake signature did not verify under the peer's trust chain".into(),
            ));
        }

        self.remote_id = Some(hs.id);
        self.remote_chain = Some(chain.clone());
        self.secure = true;
        tracing::debug!("Handshake complete");
        events.on_secure(hs.id, chain);
        self.drain_send_queue(sink);
        self.maybe_issue_shortening(sink);
        Ok(())
    }

    /// Evaluates spec.md §4.5's chain-shortening offer after reaching
    /// `Secure`. One-shot: a session offers at most once.
    ///
    /// NOTE: the length comparison here is the mirror image of spec.md's
    /// literal wording (see DESIGN.md) — as written, the stated condition
    /// can never fire for any chain lengths, since the issuing and
    /// receiving inequalities combine to a contradiction. This is the
    /// corrected form, which reproduces the worked example's outcome.
    fn maybe_issue_shortening(&mut self, sink: &mut impl ByteSink) {
        if self.shortening_offered {
            return;
        }
        self.shortening_offered = true;

        let (feed_key, private_key, local_len, remote_chain) = match (&self.credentials, &self.remote_chain) {
            (Some(c), Some(r)) => (c.feed_key, c.private_key, c.chain.len(), r.clone()),
            _ => return,
        };
        let remote_len = remote_chain.len();
        if remote_len == 0 || remote_len - 1 <= local_len {
            return;
        }

        let walk = match chain::walk_chain(&*self.crypto, &feed_key, &remote_chain) {
            Ok(w) => w,
            Err(_) => return,
        };
        let link = chain::issue_link(&*self.crypto, &private_key, walk.terminal_public_key, walk.min_expiration);
        tracing::info!("Offering a chain-shortening Link ({} -> {} links)", remote_len, local_len);
        let bytes = codec::encode(&Message::Link(LinkMsg {
            link: link.encode(),
        }));
        self.push_encrypted(bytes, sink);
    }

    /// Applies an incoming chain-extension/shortening `Link`, per spec.md
    /// §4.5's "On Link reception" rule.
    fn on_link(&mut self, link_msg: LinkMsg, events: &mut impl EventSink) -> Result<()> {
        let (creds_chain_len, feed_key, private_key) = match &self.credentials {
            Some(c) => (c.chain.len(), c.feed_key, c.private_key),
            None => return Ok(()),
        };
        let remote_chain = self.remote_chain.clone().unwrap_or_default();

        if creds_chain_len == 0 || creds_chain_len - 1 <= remote_chain.len() {
            // Our own chain isn't long enough for this to be an improvement.
            return Ok(());
        }

        let new_link = match TrustLink::decode(&link_msg.link) {
            Ok(l) => l,
            Err(_) => return Ok(()),
        };
        let mut candidate = remote_chain;
        candidate.push(new_link);

        let walk = match chain::verify_chain_owned_by(&*self.crypto, &feed_key, &candidate, &private_key) {
            Ok(w) => w,
            Err(_) => return Ok(()),
        };
        let _ = walk;

        if let Some(creds) = self.credentials.as_mut() {
            creds.chain = candidate.clone();
        }
        tracing::info!("Adopted a shortened chain ({} links)", candidate.len());
        events.on_chain_update(candidate);
        Ok(())
    }

    fn drain_send_queue(&mut self, sink: &mut impl ByteSink) {
        while let Some(queued) = self.send_queue.pop_front() {
            match queued {
                QueuedSend::Sync(body, cb) => {
                    self.send_now(Message::Sync(body), sink);
                    invoke(cb);
                }
                QueuedSend::FilterOptions(body, cb) => {
                    self.send_now(Message::FilterOptions(body), sink);
                    invoke(cb);
                }
                QueuedSend::Data(body, cb) => {
                    self.send_now(Message::Data(body), sink);
                    invoke(cb);
                }
                QueuedSend::Request(body, cb) => {
                    self.send_now(Message::Request(body), sink);
                    invoke(cb);
                }
            }
        }
    }

    fn send_now(&mut self, message: Message, sink: &mut impl ByteSink) {
        let bytes = codec::encode(&message);
        self.push_encrypted(bytes, sink);
    }

    pub fn sync(
        &mut self,
        body: crate::codec::SyncMsg,
        cb: Option<SendCallback>,
        sink: &mut impl ByteSink,
    ) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        if self.secure {
            self.send_now(Message::Sync(body), sink);
            invoke(cb);
        } else {
            self.send_queue.push_back(QueuedSend::Sync(body, cb));
        }
        Ok(())
    }

    pub fn filter_options(
        &mut self,
        body: crate::codec::FilterOptionsMsg,
        cb: Option<SendCallback>,
        sink: &mut impl ByteSink,
    ) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        if self.secure {
            self.send_now(Message::FilterOptions(body), sink);
            invoke(cb);
        } else {
            self.send_queue.push_back(QueuedSend::FilterOptions(body, cb));
        }
        Ok(())
    }

    pub fn data(
        &mut self,
        body: DataMsg,
        cb: Option<SendCallback>,
        sink: &mut impl ByteSink,
    ) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        validate_data(&body.values).map_err(|e| {
            tracing::warn!("rejected outbound Data: {e}");
            HyperbloomError::CallerMisuse(e.to_string())
        })?;
        if self.secure {
            self.send_now(Message::Data(body), sink);
            invoke(cb);
        } else {
            self.send_queue.push_back(QueuedSend::Data(body, cb));
        }
        Ok(())
    }

    pub fn request(
        &mut self,
        body: crate::codec::RequestMsg,
        cb: Option<SendCallback>,
        sink: &mut impl ByteSink,
    ) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        if body.limit == Some(0) {
            tracing::warn!("rejected outbound Request: limit must not be explicitly zero");
            return Err(HyperbloomError::CallerMisuse(
                "Request.limit must not be explicitly zero".into(),
            ));
        }
        if self.secure {
            self.send_now(Message::Request(body), sink);
            invoke(cb);
        } else {
            self.send_queue.push_back(QueuedSend::Request(body, cb));
        }
        Ok(())
    }

    /// Idempotent teardown: releases the keystreams, discards any queued
    /// sends without invoking their callbacks, and emits `close`.
    pub fn destroy(&mut self, events: &mut impl EventSink) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.pending_in_keystream = None;
        self.send_queue.clear();
        tracing::debug!("Session destroyed");
        events.on_close();
    }
}

fn invoke(cb: Option<SendCallback>) {
    if let Some(cb) = cb {
        cb();
    }
}

/// Shared `Data` invariant: non-empty list, no empty elements, no duplicate
/// entries. Used both for outbound caller misuse and inbound protocol
/// violations.
fn validate_data(values: &[Vec<u8>]) -> Result<()> {
    if values.is_empty() {
        return Err(HyperbloomError::ProtocolViolation(
            "Data.values must not be empty".into(),
        ));
    }
    if values.iter().any(|v| v.is_empty()) {
        return Err(HyperbloomError::ProtocolViolation(
            "Data.values must not contain an empty entry".into(),
        ));
    }
    for (i, a) in values.iter().enumerate() {
        if values[..i].iter().any(|b| b == a) {
            return Err(HyperbloomError::ProtocolViolation(
                "Data.values must not contain duplicate entries".into(),
            ));
        }
    }
    Ok(())
}
