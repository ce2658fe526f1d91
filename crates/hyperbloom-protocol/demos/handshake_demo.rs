//! Drives a HyperBloom handshake over an in-memory duplex and prints the
//! milestones, in the style of the teacher's `openshare-cli` binary: a thin
//! `anyhow`-wrapped boundary around the library's typed engine.

use anyhow::{Context, Result};
use hyperbloom_protocol::crypto::Sodium;
use hyperbloom_protocol::tokio_adapter::TokioSession;
use hyperbloom_protocol::{EventSink, HyperbloomError, OpenMessage, StartOptions, TrustLink};
use sodiumoxide::crypto::sign;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Default)]
struct Printer {
    name: &'static str,
}

impl EventSink for Printer {
    fn on_open(&mut self, _open: OpenMessage) {
        println!("{}: sent/received Open", self.name);
    }
    fn on_secure(&mut self, _id: [u8; 32], chain: Vec<TrustLink>) {
        println!("{}: secure, peer chain has {} link(s)", self.name, chain.len());
    }
    fn on_error(&mut self, err: &HyperbloomError) {
        eprintln!("{}: fatal error: {err}", self.name);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_target(false)
        .init();

    let (client_io, server_io) = tokio::io::duplex(4096);
    let (feed_pk, feed_sk) = sign::gen_keypair();
    let mut feed_key = [0u8; 32];
    feed_key.copy_from_slice(feed_pk.as_ref());
    let mut feed_priv = [0u8; 64];
    feed_priv.copy_from_slice(feed_sk.as_ref());

    let mut client = TokioSession::new(client_io, Box::new(Sodium::new()));
    let mut server = TokioSession::new(server_io, Box::new(Sodium::new()));
    let mut client_events = Printer { name: "client" };
    let mut server_events = Printer { name: "server" };

    client
        .start(StartOptions::new(feed_key, feed_priv), &mut client_events)
        .await
        .context("client failed to start")?;
    server
        .start(StartOptions::new(feed_key, feed_priv), &mut server_events)
        .await
        .context("server failed to start")?;

    for _ in 0..3 {
        client.pump(&mut client_events).await.context("client pump failed")?;
        server.pump(&mut server_events).await.context("server pump failed")?;
    }

    if !client.is_secure() || !server.is_secure() {
        anyhow::bail!("handshake did not reach a secure state");
    }
    println!("handshake complete on both sides");
    Ok(())
}
