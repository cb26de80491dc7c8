//! Stream sessions: cumulative response text in, ordered events out.
//!
//! A [`StreamSession`] is fed the *cumulative* text of a response each time
//! more of it arrives. It tracks how much it has already consumed, splits the
//! new text into NDJSON records, and dispatches the decoded events to an
//! [`EventSink`]. Settling the session dispatches exactly one terminal event.
//!
//! [`drive`] connects a session to a transport [`ByteStream`].

use futures::channel::mpsc::UnboundedSender;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::{ByteStream, ClientError};
use crate::model::StreamEvent;
use crate::ndjson::{LineBuffer, RecordDecoder};

/// Receives the events of one stream, in order.
pub trait EventSink {
    fn on_event(&mut self, event: StreamEvent);

    /// Whether the consumer has detached and no longer wants events.
    fn is_closed(&self) -> bool {
        false
    }
}

impl EventSink for Vec<StreamEvent> {
    fn on_event(&mut self, event: StreamEvent) {
        self.push(event);
    }
}

impl EventSink for UnboundedSender<StreamEvent> {
    fn on_event(&mut self, event: StreamEvent) {
        // Fails only once the receiver is gone, which `is_closed` reports.
        let _ = self.unbounded_send(event);
    }

    fn is_closed(&self) -> bool {
        UnboundedSender::is_closed(self)
    }
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn on_event(&mut self, event: StreamEvent) {
        (**self).on_event(event);
    }

    fn is_closed(&self) -> bool {
        (**self).is_closed()
    }
}

/// Adapts a closure into an [`EventSink`].
///
/// # Example
/// ```
/// use learnlink::model::StreamEvent;
/// use learnlink::stream::{FnSink, StreamSession};
///
/// let mut seen = 0;
/// let mut session = StreamSession::new(FnSink(|_event: StreamEvent| seen += 1));
/// session.on_progress("{\"type\":\"unit\",\"data\":1}\n");
/// session.on_settled(Ok(None));
/// assert_eq!(seen, 2);
/// ```
pub struct FnSink<F>(pub F);

impl<F: FnMut(StreamEvent)> EventSink for FnSink<F> {
    fn on_event(&mut self, event: StreamEvent) {
        (self.0)(event);
    }
}

/// Decoding state for one in-flight streaming request.
#[derive(Debug)]
pub struct StreamSession<S> {
    consumed: usize,
    buffer: LineBuffer,
    decoder: RecordDecoder,
    sink: S,
    terminated: bool,
}

impl<S: EventSink> StreamSession<S> {
    pub fn new(sink: S) -> Self {
        Self::with_decoder(sink, RecordDecoder::default())
    }

    pub fn with_decoder(sink: S, decoder: RecordDecoder) -> Self {
        Self {
            consumed: 0,
            buffer: LineBuffer::new(),
            decoder,
            sink,
            terminated: false,
        }
    }

    /// Length of the cumulative text consumed so far.
    pub fn consumed_len(&self) -> usize {
        self.consumed
    }

    /// Whether the sink has detached.
    pub fn is_detached(&self) -> bool {
        self.sink.is_closed()
    }

    /// Consume everything past the previously seen length of `cumulative`.
    ///
    /// Repeating a notification with the same text is a no-op.
    pub fn on_progress(&mut self, cumulative: &str) {
        if self.terminated {
            return;
        }
        let Some(delta) = cumulative.get(self.consumed..) else {
            warn!(
                consumed = self.consumed,
                received = cumulative.len(),
                "cumulative text is not an extension of what was consumed, ignoring"
            );
            return;
        };
        if delta.is_empty() {
            return;
        }
        self.consumed = cumulative.len();

        for line in self.buffer.absorb(delta) {
            self.dispatch_line(&line);
        }
    }

    /// Settle the session and hand the sink back.
    ///
    /// `Ok(final_text)` is the successful end of the response, with its full
    /// body when the transport has one: any text not yet seen is consumed,
    /// the trailing partial line is flushed, and [`StreamEvent::Completion`]
    /// is dispatched. `Err` dispatches one terminal failure classified from
    /// the error and discards the partial line undecoded.
    pub fn on_settled(mut self, outcome: Result<Option<&str>, &ClientError>) -> S {
        match outcome {
            Ok(final_text) => {
                if let Some(text) = final_text {
                    self.on_progress(text);
                }
                if let Some(line) = self.buffer.finish() {
                    self.dispatch_line(&line);
                }
                self.terminate(StreamEvent::Completion);
            }
            Err(error) => {
                let discarded = self.buffer.clear();
                if discarded > 0 {
                    debug!(discarded, "discarding partial record after transport failure");
                }
                self.terminate(StreamEvent::from_error(error));
            }
        }
        self.sink
    }

    /// Release the session without a terminal event, after the sink detached.
    pub fn detach(self) -> S {
        debug!(consumed = self.consumed, "stream consumer detached");
        self.sink
    }

    fn dispatch_line(&mut self, line: &str) {
        if let Some(event) = self.decoder.decode(line) {
            self.sink.on_event(event);
        }
    }

    fn terminate(&mut self, event: StreamEvent) {
        if !self.terminated {
            self.terminated = true;
            self.sink.on_event(event);
        }
    }
}

/// Incremental UTF-8 decoding of body chunks into one cumulative string.
///
/// A multi-byte character split across chunks is held back until complete.
#[derive(Debug, Default)]
struct Utf8Text {
    text: String,
    pending: Vec<u8>,
}

impl Utf8Text {
    fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), e.error_len()),
            };
            self.text
                .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
            self.pending.drain(..valid);

            match invalid {
                Some(len) => {
                    self.text.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..len);
                }
                None => return,
            }
        }
    }

    /// Flush bytes left over at end of stream.
    fn finish(&mut self) {
        if !self.pending.is_empty() {
            self.text.push_str(&String::from_utf8_lossy(&self.pending));
            self.pending.clear();
        }
    }
}

/// Feed a response body into `session` until it settles.
///
/// Each chunk extends the cumulative text and triggers
/// [`StreamSession::on_progress`]. The body ending settles the session
/// successfully; a body error or the `deadline` passing settles it with a
/// failure. Stops reading as soon as the sink detaches.
pub async fn drive<S: EventSink>(
    mut bytes: ByteStream,
    mut session: StreamSession<S>,
    deadline: Option<Instant>,
) -> S {
    let mut body = Utf8Text::default();

    loop {
        if session.is_detached() {
            return session.detach();
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            debug!(consumed = session.consumed_len(), "stream deadline passed");
            return session.on_settled(Err(&ClientError::Timeout));
        }

        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, bytes.next()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(consumed = session.consumed_len(), "stream deadline passed");
                    return session.on_settled(Err(&ClientError::Timeout));
                }
            },
            None => bytes.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                body.push(&chunk);
                session.on_progress(&body.text);
            }
            Some(Err(e)) => {
                debug!(error = %e, "stream body failed");
                return session.on_settled(Err(&e));
            }
            None => {
                body.finish();
                return session.on_settled(Ok(Some(&body.text)));
            }
        }
    }
}
