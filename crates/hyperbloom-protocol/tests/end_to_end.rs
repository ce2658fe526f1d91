//! End-to-end scenarios driving two `Engine`s against each other over an
//! in-memory byte buffer, no transport involved. Covers the handshake,
//! relay, chain-handoff, chain-shortening, async-provisioning and
//! caller-misuse behaviors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hyperbloom_protocol::chain::{self, TrustLink};
use hyperbloom_protocol::crypto::Sodium;
use hyperbloom_protocol::{
    ByteSink, DataMsg, Engine, EventSink, HyperbloomError, Message, OpenMessage, RequestMsg,
    StartOptions, SyncMsg,
};
use sodiumoxide::crypto::sign;

#[derive(Default)]
struct BufSink {
    buf: Vec<u8>,
}

impl ByteSink for BufSink {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

#[derive(Default)]
struct Recorder {
    opens: Vec<OpenMessage>,
    secures: Vec<([u8; 32], Vec<TrustLink>)>,
    messages: Vec<Message>,
    chain_updates: Vec<Vec<TrustLink>>,
    errors: Vec<HyperbloomError>,
    closes: u32,
}

impl EventSink for Recorder {
    fn on_open(&mut self, open: OpenMessage) {
        self.opens.push(open);
    }
    fn on_secure(&mut self, id: [u8; 32], chain: Vec<TrustLink>) {
        self.secures.push((id, chain));
    }
    fn on_message(&mut self, message: Message) {
        self.messages.push(message);
    }
    fn on_chain_update(&mut self, chain: Vec<TrustLink>) {
        self.chain_updates.push(chain);
    }
    fn on_error(&mut self, err: &HyperbloomError) {
        self.errors.push(err.clone());
    }
    fn on_close(&mut self) {
        self.closes += 1;
    }
}

fn pk_bytes(pk: &sign::PublicKey) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(pk.as_ref());
    out
}

fn sk_bytes(sk: &sign::SecretKey) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(sk.as_ref());
    out
}

/// Feeds whatever each side's sink has accumulated into the other engine,
/// alternating, until neither side has anything new to say.
fn pump_to_quiescence(
    a: &mut Engine,
    a_sink: &mut BufSink,
    a_events: &mut Recorder,
    b: &mut Engine,
    b_sink: &mut BufSink,
    b_events: &mut Recorder,
) {
    loop {
        let a_to_b = std::mem::take(&mut a_sink.buf);
        let b_to_a = std::mem::take(&mut b_sink.buf);
        if a_to_b.is_empty() && b_to_a.is_empty() {
            return;
        }
        if !a_to_b.is_empty() {
            b.feed(&a_to_b, b_sink, b_events).unwrap();
        }
        if !b_to_a.is_empty() {
            a.feed(&b_to_a, a_sink, a_events).unwrap();
        }
    }
}

#[test]
fn basic_handshake_reaches_secure_on_both_sides() {
    let (feed_pk, feed_sk) = sign::gen_keypair();
    let feed_key = pk_bytes(&feed_pk);
    let feed_priv = sk_bytes(&feed_sk);

    let mut a = Engine::new(Box::new(Sodium::new()));
    let mut b = Engine::new(Box::new(Sodium::new()));
    let mut a_sink = BufSink::default();
    let mut b_sink = BufSink::default();
    let mut a_events = Recorder::default();
    let mut b_events = Recorder::default();

    a.start(StartOptions::new(feed_key, feed_priv), &mut a_sink, &mut a_events)
        .unwrap();
    b.start(StartOptions::new(feed_key, feed_priv), &mut b_sink, &mut b_events)
        .unwrap();

    pump_to_quiescence(&mut a, &mut a_sink, &mut a_events, &mut b, &mut b_sink, &mut b_events);

    assert!(a.is_secure());
    assert!(b.is_secure());
    assert_eq!(a_events.secures.len(), 1);
    assert_eq!(b_events.secures.len(), 1);
    assert_eq!(a_events.opens.len(), 1);
    assert_eq!(b_events.opens.len(), 1);
    assert!(a_events.errors.is_empty());
    assert!(b_events.errors.is_empty());
}

#[test]
fn request_sent_after_secure_is_relayed_to_the_peer() {
    let (feed_pk, feed_sk) = sign::gen_keypair();
    let feed_key = pk_bytes(&feed_pk);
    let feed_priv = sk_bytes(&feed_sk);

    let mut a = Engine::new(Box::new(Sodium::new()));
    let mut b = Engine::new(Box::new(Sodium::new()));
    let mut a_sink = BufSink::default();
    let mut b_sink = BufSink::default();
    let mut a_events = Recorder::default();
    let mut b_events = Recorder::default();

    a.start(StartOptions::new(feed_key, feed_priv), &mut a_sink, &mut a_events)
        .unwrap();
    b.start(StartOptions::new(feed_key, feed_priv), &mut b_sink, &mut b_events)
        .unwrap();
    pump_to_quiescence(&mut a, &mut a_sink, &mut a_events, &mut b, &mut b_sink, &mut b_events);
    assert!(a.is_secure());

    a.request(
        RequestMsg {
            start: b"k0".to_vec(),
            end: Some(b"k9".to_vec()),
            limit: Some(10),
        },
        None,
        &mut a_sink,
    )
    .unwrap();
    pump_to_quiescence(&mut a, &mut a_sink, &mut a_events, &mut b, &mut b_sink, &mut b_events);

    assert_eq!(b_events.messages.len(), 1);
    match &b_events.messages[0] {
        Message::Request(r) => {
            assert_eq!(r.start, b"k0".to_vec());
            assert_eq!(r.limit, Some(10));
        }
        other => panic!("expected Request, got {other:?}"),
    }
}

#[test]
fn delegated_chain_is_accepted_by_the_feed_owner() {
    let (feed_pk, feed_sk) = sign::gen_keypair();
    let feed_key = pk_bytes(&feed_pk);
    let feed_priv = sk_bytes(&feed_sk);
    let (delegate_pk, delegate_sk) = sign::gen_keypair();

    let crypto = Sodium::new();
    let link = chain::issue_link(&crypto, &feed_priv, pk_bytes(&delegate_pk), None);

    let mut owner = Engine::new(Box::new(Sodium::new()));
    let mut delegate = Engine::new(Box::new(Sodium::new()));
    let mut owner_sink = BufSink::default();
    let mut delegate_sink = BufSink::default();
    let mut owner_events = Recorder::default();
    let mut delegate_events = Recorder::default();

    owner
        .start(StartOptions::new(feed_key, feed_priv), &mut owner_sink, &mut owner_events)
        .unwrap();
    delegate
        .start(
            StartOptions::new(feed_key, sk_bytes(&delegate_sk)).with_chain(vec![link]),
            &mut delegate_sink,
            &mut delegate_events,
        )
        .unwrap();

    pump_to_quiescence(
        &mut owner,
        &mut owner_sink,
        &mut owner_events,
        &mut delegate,
        &mut delegate_sink,
        &mut delegate_events,
    );

    assert!(owner.is_secure());
    assert!(delegate.is_secure());
    let (_, owner_view_of_delegate_chain) = &owner_events.secures[0];
    assert_eq!(owner_view_of_delegate_chain.len(), 1);
}

/// Reproduces the chain-shortening scenario: two chains share a two-link
/// prefix, one carries on to length 3 and the other to length 5. The
/// shorter side offers the longer side a direct link past their shared
/// history, and the longer side adopts a length-4 replacement.
#[test]
fn chain_shortening_replaces_a_longer_chain_with_a_shorter_one() {
    let crypto = Sodium::new();
    let (feed_pk, feed_sk) = sign::gen_keypair();
    let feed_key = pk_bytes(&feed_pk);

    let (k1_pk, k1_sk) = sign::gen_keypair();
    let link1 = chain::issue_link(&crypto, &sk_bytes(&feed_sk), pk_bytes(&k1_pk), None);
    let (k2_pk, k2_sk) = sign::gen_keypair();
    let link2 = chain::issue_link(&crypto, &sk_bytes(&k1_sk), pk_bytes(&k2_pk), None);

    // A's branch: one more link to a 3-long chain.
    let (a_term_pk, a_term_sk) = sign::gen_keypair();
    let link3a = chain::issue_link(&crypto, &sk_bytes(&k2_sk), pk_bytes(&a_term_pk), None);
    let a_chain = vec![link1.clone(), link2.clone(), link3a];

    // B's branch: three more links to a 5-long chain.
    let (k3_pk, k3_sk) = sign::gen_keypair();
    let link3b = chain::issue_link(&crypto, &sk_bytes(&k2_sk), pk_bytes(&k3_pk), None);
    let (k4_pk, k4_sk) = sign::gen_keypair();
    let link4b = chain::issue_link(&crypto, &sk_bytes(&k3_sk), pk_bytes(&k4_pk), None);
    let (b_term_pk, b_term_sk) = sign::gen_keypair();
    let link5b = chain::issue_link(&crypto, &sk_bytes(&k4_sk), pk_bytes(&b_term_pk), None);
    let b_chain = vec![link1, link2, link3b, link4b, link5b];

    let mut a = Engine::new(Box::new(Sodium::new()));
    let mut b = Engine::new(Box::new(Sodium::new()));
    let mut a_sink = BufSink::default();
    let mut b_sink = BufSink::default();
    let mut a_events = Recorder::default();
    let mut b_events = Recorder::default();

    a.start(
        StartOptions::new(feed_key, sk_bytes(&a_term_sk)).with_chain(a_chain),
        &mut a_sink,
        &mut a_events,
    )
    .unwrap();
    b.start(
        StartOptions::new(feed_key, sk_bytes(&b_term_sk)).with_chain(b_chain),
        &mut b_sink,
        &mut b_events,
    )
    .unwrap();

    pump_to_quiescence(&mut a, &mut a_sink, &mut a_events, &mut b, &mut b_sink, &mut b_events);

    assert_eq!(b_events.chain_updates.len(), 1);
    assert_eq!(b_events.chain_updates[0].len(), 4);
    assert!(a_events.chain_updates.is_empty());
}

#[test]
fn data_sent_before_secure_is_queued_and_flushed_once_paired() {
    let (feed_pk, feed_sk) = sign::gen_keypair();
    let feed_key = pk_bytes(&feed_pk);
    let feed_priv = sk_bytes(&feed_sk);

    let mut a = Engine::new(Box::new(Sodium::new()));
    let mut b = Engine::new(Box::new(Sodium::new()));
    let mut a_sink = BufSink::default();
    let mut b_sink = BufSink::default();
    let mut a_events = Recorder::default();
    let mut b_events = Recorder::default();

    a.start(StartOptions::new(feed_key, feed_priv), &mut a_sink, &mut a_events)
        .unwrap();

    let sent = Arc::new(AtomicBool::new(false));
    let sent_clone = sent.clone();
    a.data(
        DataMsg {
            values: vec![b"payload".to_vec()],
        },
        Some(Box::new(move || sent_clone.store(true, Ordering::SeqCst))),
        &mut a_sink,
    )
    .unwrap();
    // Not secure yet: queued, sink untouched, callback not yet run.
    assert!(a_sink.buf.is_empty());
    assert!(!sent.load(Ordering::SeqCst));

    b.start(StartOptions::new(feed_key, feed_priv), &mut b_sink, &mut b_events)
        .unwrap();
    pump_to_quiescence(&mut a, &mut a_sink, &mut a_events, &mut b, &mut b_sink, &mut b_events);

    assert!(sent.load(Ordering::SeqCst));
    assert_eq!(b_events.messages.len(), 1);
    assert!(matches!(&b_events.messages[0], Message::Data(_)));
}

#[test]
fn caller_misuse_is_surfaced_synchronously_without_destroying_the_session() {
    let (feed_pk, feed_sk) = sign::gen_keypair();
    let feed_key = pk_bytes(&feed_pk);
    let feed_priv = sk_bytes(&feed_sk);

    let mut engine = Engine::new(Box::new(Sodium::new()));
    let mut sink = BufSink::default();
    let mut events = Recorder::default();
    engine
        .start(StartOptions::new(feed_key, feed_priv), &mut sink, &mut events)
        .unwrap();

    let err = engine
        .request(
            RequestMsg {
                start: b"a".to_vec(),
                end: None,
                limit: Some(0),
            },
            None,
            &mut sink,
        )
        .unwrap_err();
    assert!(matches!(err, HyperbloomError::CallerMisuse(_)));

    let err = engine
        .data(
            DataMsg { values: vec![] },
            None,
            &mut sink,
        )
        .unwrap_err();
    assert!(matches!(err, HyperbloomError::CallerMisuse(_)));

    // Misuse is a caller-facing rejection, not a fatal session error: no
    // `on_error` fired and the session is still usable afterward.
    assert!(events.errors.is_empty());
    engine
        .sync(
            SyncMsg {
                filter: vec![0u8; 8],
                size: 8,
                n: 1,
                seed: 0,
                limit: None,
                range: None,
            },
            None,
            &mut sink,
        )
        .unwrap();
}
