//! The public duplex-adapter entry point: wires `Parser` and `Session`
//! together and exposes the operations spec.md §6 lists (`feed`, `start`,
//! the four send methods, `destroy`).
//!
//! The engine itself performs no I/O; it is fed bytes, emits bytes through
//! `ByteSink`, and emits named events through `EventSink`. Everything it
//! needs to run lives inline — no background task, no internal lock, in
//! keeping with spec.md §5's single-threaded cooperative model.

use crate::codec::{DataMsg, FilterOptionsMsg, Message, OpenMessage, RequestMsg, SyncMsg};
use crate::config::StartOptions;
use crate::crypto::CryptoProvider;
use crate::error::Result;
use crate::events::{ByteSink, EventSink};
use crate::parser::{Parser, ParserSink};
use crate::session::{SendCallback, Session};

pub struct Engine {
    parser: Parser,
    session: Session,
}

impl Engine {
    pub fn new(crypto: Box<dyn CryptoProvider>) -> Self {
        Engine {
            parser: Parser::new(),
            session: Session::new(crypto),
        }
    }

    pub fn is_secure(&self) -> bool {
        self.session.is_secure()
    }

    pub fn start(
        &mut self,
        options: StartOptions,
        sink: &mut impl ByteSink,
        events: &mut impl EventSink,
    ) -> Result<()> {
        let result = self.session.start(options, sink);
        self.finish(result, sink, events)
    }

    pub fn feed(&mut self, bytes: &[u8], sink: &mut impl ByteSink, events: &mut impl EventSink) -> Result<()> {
        let result = {
            let mut bridge = Bridge {
                session: &mut self.session,
                sink,
                events,
            };
            self.parser.feed(bytes, &mut bridge)
        };
        self.finish(result, sink, events)
    }

    pub fn sync(
        &mut self,
        body: SyncMsg,
        cb: Option<SendCallback>,
        sink: &mut impl ByteSink,
    ) -> Result<()> {
        self.session.sync(body, cb, sink)
    }

    pub fn filter_options(
        &mut self,
        body: FilterOptionsMsg,
        cb: Option<SendCallback>,
        sink: &mut impl ByteSink,
    ) -> Result<()> {
        self.session.filter_options(body, cb, sink)
    }

    pub fn data(&mut self, body: DataMsg, cb: Option<SendCallback>, sink: &mut impl ByteSink) -> Result<()> {
        self.session.data(body, cb, sink)
    }

    pub fn request(
        &mut self,
        body: RequestMsg,
        cb: Option<SendCallback>,
        sink: &mut impl ByteSink,
    ) -> Result<()> {
        self.session.request(body, cb, sink)
    }

    pub fn destroy(&mut self, events: &mut impl EventSink) {
        self.session.destroy(events);
    }

    fn finish(
        &mut self,
        result: Result<()>,
        sink: &mut impl ByteSink,
        events: &mut impl EventSink,
    ) -> Result<()> {
        if let Err(e) = &result {
            tracing::error!("fatal protocol error: {e}");
            events.on_error(e);
            self.session.destroy(events);
            return result;
        }
        self.resume_if_ready(sink, events)
    }

    /// If pairing just produced an inbound keystream, install it and let the
    /// parser drain anything buffered while `Paused`.
    fn resume_if_ready(&mut self, sink: &mut impl ByteSink, events: &mut impl EventSink) -> Result<()> {
        if let Some(keystream) = self.session.take_ready_inbound_keystream() {
            let mut bridge = Bridge {
                session: &mut self.session,
                sink,
                events,
            };
            let result = self.parser.resume(keystream, &mut bridge);
            if let Err(e) = &result {
                tracing::error!("fatal protocol error resuming the parser: {e}");
                events.on_error(e);
                self.session.destroy(events);
            }
            return result;
        }
        Ok(())
    }
}

/// Adapts `ParserSink` callbacks onto `Session` methods plus the caller's
/// `ByteSink`/`EventSink`.
struct Bridge<'a, B: ByteSink, E: EventSink> {
    session: &'a mut Session,
    sink: &'a mut B,
    events: &'a mut E,
}

impl<'a, B: ByteSink, E: EventSink> ParserSink for Bridge<'a, B, E> {
    fn on_open(&mut self, open: OpenMessage) -> Result<()> {
        self.events.on_open(open.clone());
        self.session.on_open(open, self.sink)
    }

    fn on_frame(&mut self, _id: u64, message: Option<Message>) -> Result<()> {
        match message {
            Some(message) => self.session.on_frame(message, self.sink, self.events),
            None => Ok(()),
        }
    }
}
