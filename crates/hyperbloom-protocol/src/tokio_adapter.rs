//! Thin async driver over `Engine` for a real socket.
//!
//! Generalizes the read/write loop shape of the teacher's
//! `Client::accept_and_receive` / `send_manifest_over` (`crates/openshare-core/src/client.rs`)
//! onto the sans-io `Engine`: instead of owning the handshake itself, this
//! type just pumps bytes in, flushes whatever the engine wants to send back
//! out, and forwards events.

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{DataMsg, FilterOptionsMsg, RequestMsg, SyncMsg};
use crate::config::StartOptions;
use crate::crypto::CryptoProvider;
use crate::engine::Engine;
use crate::error::{HyperbloomError, Result};
use crate::events::{ByteSink, EventSink};
use crate::session::SendCallback;

#[derive(Default)]
struct Outbox {
    queue: VecDeque<Vec<u8>>,
}

impl ByteSink for Outbox {
    fn push(&mut self, bytes: &[u8]) {
        self.queue.push_back(bytes.to_vec());
    }
}

/// Drives one `Engine` over an async duplex transport.
pub struct TokioSession<T> {
    transport: T,
    engine: Engine,
    outbox: Outbox,
}

impl<T> TokioSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(transport: T, crypto: Box<dyn CryptoProvider>) -> Self {
        TokioSession {
            transport,
            engine: Engine::new(crypto),
            outbox: Outbox::default(),
        }
    }

    pub async fn start(&mut self, options: StartOptions, events: &mut impl EventSink) -> Result<()> {
        self.engine.start(options, &mut self.outbox, events)?;
        self.flush().await
    }

    pub async fn sync(&mut self, body: SyncMsg, cb: Option<SendCallback>) -> Result<()> {
        self.engine.sync(body, cb, &mut self.outbox)?;
        self.flush().await
    }

    pub async fn filter_options(
        &mut self,
        body: FilterOptionsMsg,
        cb: Option<SendCallback>,
    ) -> Result<()> {
        self.engine.filter_options(body, cb, &mut self.outbox)?;
        self.flush().await
    }

    pub async fn data(&mut self, body: DataMsg, cb: Option<SendCallback>) -> Result<()> {
        self.engine.data(body, cb, &mut self.outbox)?;
        self.flush().await
    }

    pub async fn request(&mut self, body: RequestMsg, cb: Option<SendCallback>) -> Result<()> {
        self.engine.request(body, cb, &mut self.outbox)?;
        self.flush().await
    }

    pub fn is_secure(&self) -> bool {
        self.engine.is_secure()
    }

    /// Reads one chunk, feeds it to the engine, flushes the reply. Returns
    /// `Ok(false)` at transport EOF.
    pub async fn pump(&mut self, events: &mut impl EventSink) -> Result<bool> {
        let mut buf = [0u8; 65536];
        let n = self
            .transport
            .read(&mut buf)
            .await
            .map_err(|e| HyperbloomError::ProtocolViolation(format!("transport read: {e}")))?;
        if n == 0 {
            return Ok(false);
        }
        self.engine.feed(&buf[..n], &mut self.outbox, events)?;
        self.flush().await?;
        Ok(true)
    }

    pub fn destroy(&mut self, events: &mut impl EventSink) {
        self.engine.destroy(events);
    }

    async fn flush(&mut self) -> Result<()> {
        while let Some(chunk) = self.outbox.queue.pop_front() {
            self.transport
                .write_all(&chunk)
                .await
                .map_err(|e| HyperbloomError::ProtocolViolation(format!("transport write: {e}")))?;
        }
        self.transport
            .flush()
            .await
            .map_err(|e| HyperbloomError::ProtocolViolation(format!("transport flush: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TrustLink;
    use crate::crypto::Sodium;
    use crate::events::EventSink;
    use crate::OpenMessage;
    use sodiumoxide::crypto::sign;

    #[derive(Default)]
    struct Recorder {
        secures: u32,
        errors: u32,
    }

    impl EventSink for Recorder {
        fn on_open(&mut self, _open: OpenMessage) {}
        fn on_secure(&mut self, _id: [u8; 32], _chain: Vec<TrustLink>) {
            self.secures += 1;
        }
        fn on_error(&mut self, _err: &HyperbloomError) {
            self.errors += 1;
        }
    }

    #[tokio::test]
    async fn handshake_reaches_secure_over_an_in_memory_duplex() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (feed_pk, feed_sk) = sign::gen_keypair();
        let mut feed_key = [0u8; 32];
        feed_key.copy_from_slice(feed_pk.as_ref());
        let mut feed_sk_bytes = [0u8; 64];
        feed_sk_bytes.copy_from_slice(feed_sk.as_ref());

        let mut client = TokioSession::new(client_io, Box::new(Sodium::new()));
        let mut server = TokioSession::new(server_io, Box::new(Sodium::new()));
        let mut client_events = Recorder::default();
        let mut server_events = Recorder::default();

        client
            .start(StartOptions::new(feed_key, feed_sk_bytes), &mut client_events)
            .await
            .unwrap();
        server
            .start(StartOptions::new(feed_key, feed_sk_bytes), &mut server_events)
            .await
            .unwrap();

        for _ in 0..3 {
            client.pump(&mut client_events).await.unwrap();
            server.pump(&mut server_events).await.unwrap();
        }

        assert!(client.is_secure());
        assert!(server.is_secure());
        assert_eq!(client_events.secures, 1);
        assert_eq!(server_events.secures, 1);
        assert_eq!(client_events.errors, 0);
        assert_eq!(server_events.errors, 0);
    }
}
