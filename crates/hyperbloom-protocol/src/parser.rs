//! Byte-driven frame parser state machine (spec.md §4.3).
//!
//! Grounded on the buffer/resume mechanics of `Protocol::_parse` /
//! `_parse_length` / `_parse_message` / `_resume` in
//! `examples/other_examples/581d1d99_khernyo-hypercore-protocol__src-protocol.rs.rs`,
//! reworked from that file's `Rc<RefCell<_>>` graph into direct ownership:
//! this parser owns no reference back to a `Session`, it only emits events
//! to whatever `ParserSink` is passed into `feed`.

use crate::codec::{self, Message, OpenMessage};
use crate::constants::{MAGIC, MAX_FRAME_SIZE};
use crate::crypto::Keystream;
use crate::error::{HyperbloomError, Result};
use crate::varint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Magic,
    OpenLength,
    OpenBody,
    /// Accepting raw bytes but not parsing them; waiting for the Session to
    /// supply the inbound keystream via `resume`.
    Paused,
    MsgLength,
    MsgBody,
}

/// Callback surface the parser drives while decoding frames.
pub trait ParserSink {
    fn on_open(&mut self, open: OpenMessage) -> Result<()>;
    /// `message` is `None` for an unrecognized id — the frame is otherwise
    /// structurally valid and simply ignored, per spec.md §4.3/§6.
    fn on_frame(&mut self, id: u64, message: Option<Message>) -> Result<()>;
}

pub struct Parser {
    state: State,
    /// Byte length the current state is waiting to accumulate before it can
    /// advance (an `OpenBody`/`MsgBody` length, once known).
    waiting: usize,
    buf: Vec<u8>,
    in_keystream: Option<Box<dyn Keystream>>,
    /// Raw bytes buffered while paused, to be XORed once `resume` installs
    /// the inbound keystream. Never XORed twice.
    pending_ciphertext: Vec<u8>,
    expected_handshake: bool,
    handshake_seen: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            state: State::Magic,
            waiting: 0,
            buf: Vec::new(),
            in_keystream: None,
            pending_ciphertext: Vec::new(),
            expected_handshake: true,
            handshake_seen: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state == State::Paused
    }

    /// Feeds an inbound chunk. If the inbound keystream is installed, the
    /// chunk is XORed in place before buffering; otherwise (pre-`Open` or
    /// while `Paused`) it is buffered raw.
    pub fn feed(&mut self, chunk: &[u8], sink: &mut impl ParserSink) -> Result<()> {
        let mut owned = chunk.to_vec();
        if let Some(ks) = self.in_keystream.as_mut() {
            ks.xor(&mut owned);
        }

        if self.state == State::Paused {
            self.pending_ciphertext.extend_from_slice(&owned);
            return Ok(());
        }

        self.buf.extend_from_slice(&owned);
        self.process(sink)
    }

    /// Installs the inbound keystream, XORs the buffered pending-ciphertext
    /// tail, re-appends it, and resumes parsing from `MsgLength`.
    pub fn resume(&mut self, keystream: Box<dyn Keystream>, sink: &mut impl ParserSink) -> Result<()> {
        tracing::debug!("inbound keystream installed, resuming parsing");
        self.in_keystream = Some(keystream);
        let mut pending = std::mem::take(&mut self.pending_ciphertext);
        if let Some(ks) = self.in_keystream.as_mut() {
            ks.xor(&mut pending);
        }
        self.buf.extend_from_slice(&pending);
        self.state = State::MsgLength;
        self.process(sink)
    }

    fn process(&mut self, sink: &mut impl ParserSink) -> Result<()> {
        loop {
            if self.buf.len() > MAX_FRAME_SIZE && self.waiting == 0 {
                tracing::warn!("buffered {} bytes exceeds MAX_FRAME_SIZE", self.buf.len());
                return Err(HyperbloomError::FrameTooLarge(self.buf.len()));
            }

            match self.state {
                State::Magic => {
                    if self.buf.len() < 4 {
                        return Ok(());
                    }
                    if self.buf[..4] != MAGIC[..] {
                        tracing::warn!("inbound stream did not start with the HyperBloom magic");
                        return Err(HyperbloomError::BadMagic);
                    }
                    self.buf.drain(..4);
                    self.state = State::OpenLength;
                }
                State::OpenLength => {
                    match varint::decode(&self.buf)? {
                        None => return Ok(()),
                        Some((len, consumed)) => {
                            if len as usize > MAX_FRAME_SIZE {
                                return Err(HyperbloomError::FrameTooLarge(len as usize));
                            }
                            self.buf.drain(..consumed);
                            self.waiting = len as usize;
                            self.state = State::OpenBody;
                        }
                    }
                }
                State::OpenBody => {
                    if self.buf.len() < self.waiting {
                        return Ok(());
                    }
                    let body: Vec<u8> = self.buf.drain(..self.waiting).collect();
                    self.waiting = 0;
                    let open = codec::decode_open(&body)?;

                    // Whatever arrived in the same chunk as Open is
                    // ciphertext under a key we don't have yet.
                    self.pending_ciphertext = std::mem::take(&mut self.buf);
                    self.state = State::Paused;
                    tracing::debug!("parsed Open, pausing until the inbound keystream is ready");
                    sink.on_open(open)?;
                    return Ok(());
                }
                State::Paused => return Ok(()),
                State::MsgLength => {
                    match varint::decode(&self.buf)? {
                        None => return Ok(()),
                        Some((len, consumed)) => {
                            if len as usize > MAX_FRAME_SIZE {
                                return Err(HyperbloomError::FrameTooLarge(len as usize));
                            }
                            self.buf.drain(..consumed);
                            self.waiting = len as usize;
                            self.state = State::MsgBody;
                        }
                    }
                }
                State::MsgBody => {
                    if self.buf.len() < self.waiting {
                        return Ok(());
                    }
                    let body: Vec<u8> = self.buf.drain(..self.waiting).collect();
                    self.waiting = 0;
                    self.state = State::MsgLength;
                    self.dispatch(&body, sink)?;
                }
            }
        }
    }

    fn dispatch(&mut self, body: &[u8], sink: &mut impl ParserSink) -> Result<()> {
        let (id, message) = codec::decode_body(body)?;

        if message.is_none() {
            // Unknown id: silently skip.
            return Ok(());
        }

        if self.expected_handshake {
            if id != crate::constants::message_id::HANDSHAKE {
                tracing::warn!("first post-Open frame (id {id}) was not Handshake");
                return Err(HyperbloomError::HandshakeExpected);
            }
            self.expected_handshake = false;
            self.handshake_seen = true;
        } else if id == crate::constants::message_id::HANDSHAKE {
            if self.handshake_seen {
                tracing::warn!("duplicate Handshake received");
                return Err(HyperbloomError::DuplicateHandshake);
            }
            self.handshake_seen = true;
        }

        sink.on_frame(id, message)
    }
}
