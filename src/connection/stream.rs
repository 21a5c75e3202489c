//! HTTP/2 stream records and the stream state machine.

use bytes::Bytes;

pub use crate::frame::StreamId;

use super::flow_control::FlowControl;

/// Stream state (RFC 7540 Section 5.1).
///
/// `ReservedLocal` is unreachable for a client (only servers originate
/// PUSH_PROMISE) and is not modeled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Allocated but no HEADERS sent yet.
    Idle,
    /// Promised by the server via PUSH_PROMISE.
    ReservedRemote,
    /// Open in both directions.
    Open,
    /// We sent END_STREAM; only receiving now.
    HalfClosedLocal,
    /// Peer sent END_STREAM; only sending now.
    HalfClosedRemote,
    /// Stream is done.
    Closed,
}

/// An HTTP/2 stream.
#[derive(Debug)]
pub struct Stream {
    /// Stream identifier.
    id: StreamId,
    /// Current state.
    state: StreamState,
    /// Flow control windows for this stream.
    flow: FlowControl,
    /// Request body bytes not yet sent, waiting on window capacity.
    pending_body: Bytes,
    /// Whether END_STREAM should follow the last pending body byte.
    end_after_body: bool,
    /// Whether any response frame (HEADERS or DATA) has arrived.
    responded: bool,
}

impl Stream {
    /// Create a stream for a locally initiated request.
    pub fn new(id: StreamId, initial_send_window: u32, initial_recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            flow: FlowControl::new(initial_send_window, initial_recv_window),
            pending_body: Bytes::new(),
            end_after_body: false,
            responded: false,
        }
    }

    /// Create a stream promised by the server.
    pub fn promised(id: StreamId, initial_send_window: u32, initial_recv_window: u32) -> Self {
        Self {
            id,
            state: StreamState::ReservedRemote,
            flow: FlowControl::new(initial_send_window, initial_recv_window),
            pending_body: Bytes::new(),
            end_after_body: false,
            responded: false,
        }
    }

    /// Get the stream ID.
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Get the stream state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Flow control windows.
    pub fn flow(&self) -> &FlowControl {
        &self.flow
    }

    /// Mutable flow control windows.
    pub fn flow_mut(&mut self) -> &mut FlowControl {
        &mut self.flow
    }

    /// Whether DATA may still be sent on this stream.
    pub fn can_send(&self) -> bool {
        matches!(
            self.state,
            StreamState::Open | StreamState::HalfClosedRemote
        )
    }

    /// Whether frames from the peer are still expected.
    pub fn can_recv(&self) -> bool {
        matches!(
            self.state,
            StreamState::ReservedRemote | StreamState::Open | StreamState::HalfClosedLocal
        )
    }

    /// Whether a response frame has arrived.
    pub fn responded(&self) -> bool {
        self.responded
    }

    /// Record that we sent HEADERS opening this stream.
    pub fn send_headers(&mut self, end_stream: bool) {
        debug_assert_eq!(self.state, StreamState::Idle);
        self.state = if end_stream {
            StreamState::HalfClosedLocal
        } else {
            StreamState::Open
        };
    }

    /// Record that the peer's HEADERS arrived.
    pub fn recv_headers(&mut self, end_stream: bool) {
        self.responded = true;
        self.state = match (self.state, end_stream) {
            // Response headers on a promised stream: the promised stream
            // is half closed for us from the start (RFC 7540 §5.1).
            (StreamState::ReservedRemote, false) => StreamState::HalfClosedLocal,
            (StreamState::ReservedRemote, true) => StreamState::Closed,
            (state, false) => state,
            (state, true) => close_remote(state),
        };
    }

    /// Record that we sent END_STREAM.
    pub fn send_end_stream(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        };
    }

    /// Record that the peer sent END_STREAM.
    pub fn recv_end_stream(&mut self) {
        self.state = close_remote(self.state);
    }

    /// Record receipt of a DATA frame.
    pub fn recv_data(&mut self) {
        self.responded = true;
    }

    /// Close the stream (RST_STREAM in either direction, or teardown).
    pub fn close(&mut self) {
        self.state = StreamState::Closed;
    }

    /// Queue body bytes to be sent as window capacity allows.
    pub fn queue_body(&mut self, body: Bytes, end_stream: bool) {
        debug_assert!(self.pending_body.is_empty());
        self.pending_body = body;
        self.end_after_body = end_stream;
    }

    /// Whether body bytes are waiting on window capacity.
    pub fn has_pending_body(&self) -> bool {
        !self.pending_body.is_empty()
    }

    /// Take up to `max` bytes of pending body.
    ///
    /// Returns the chunk and whether it is the final one (END_STREAM goes
    /// on its DATA frame).
    pub fn take_body(&mut self, max: usize) -> (Bytes, bool) {
        let n = max.min(self.pending_body.len());
        let chunk = self.pending_body.split_to(n);
        let last = self.pending_body.is_empty() && self.end_after_body;
        (chunk, last)
    }
}

fn close_remote(state: StreamState) -> StreamState {
    match state {
        StreamState::Open => StreamState::HalfClosedRemote,
        StreamState::HalfClosedLocal => StreamState::Closed,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: u32) -> Stream {
        Stream::new(StreamId::new(id), 65_535, 65_535)
    }

    #[test]
    fn test_new_stream_is_idle() {
        let s = stream(5);
        assert_eq!(s.id().value(), 5);
        assert_eq!(s.state(), StreamState::Idle);
        assert!(!s.responded());
    }

    #[test]
    fn test_request_response_lifecycle() {
        let mut s = stream(1);

        s.send_headers(false);
        assert_eq!(s.state(), StreamState::Open);
        assert!(s.can_send());
        assert!(s.can_recv());

        s.send_end_stream();
        assert_eq!(s.state(), StreamState::HalfClosedLocal);
        assert!(!s.can_send());
        assert!(s.can_recv());

        s.recv_headers(false);
        assert_eq!(s.state(), StreamState::HalfClosedLocal);
        assert!(s.responded());

        s.recv_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
        assert!(!s.can_recv());
    }

    #[test]
    fn test_headers_only_request() {
        let mut s = stream(1);

        // GET with no body: HEADERS carries END_STREAM
        s.send_headers(true);
        assert_eq!(s.state(), StreamState::HalfClosedLocal);

        // Response with END_STREAM on HEADERS closes the stream
        s.recv_headers(true);
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn test_remote_closes_first() {
        let mut s = stream(3);
        s.send_headers(false);

        s.recv_headers(true);
        assert_eq!(s.state(), StreamState::HalfClosedRemote);
        assert!(s.can_send());
        assert!(!s.can_recv());

        s.send_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn test_promised_stream_lifecycle() {
        let mut s = Stream::promised(StreamId::new(2), 65_535, 65_535);
        assert_eq!(s.state(), StreamState::ReservedRemote);
        assert!(s.can_recv());
        assert!(!s.can_send());

        // Pushed response headers half close the stream for us
        s.recv_headers(false);
        assert_eq!(s.state(), StreamState::HalfClosedLocal);

        s.recv_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn test_close_is_terminal() {
        let mut s = stream(1);
        s.send_headers(false);
        s.close();
        assert_eq!(s.state(), StreamState::Closed);

        s.send_end_stream();
        s.recv_end_stream();
        assert_eq!(s.state(), StreamState::Closed);
    }

    #[test]
    fn test_body_queue_chunking() {
        let mut s = stream(1);
        s.send_headers(false);
        s.queue_body(Bytes::from(vec![0xaa; 100]), true);

        assert!(s.has_pending_body());

        let (chunk, last) = s.take_body(60);
        assert_eq!(chunk.len(), 60);
        assert!(!last);

        let (chunk, last) = s.take_body(60);
        assert_eq!(chunk.len(), 40);
        assert!(last);
        assert!(!s.has_pending_body());
    }

    #[test]
    fn test_body_queue_without_end_stream() {
        let mut s = stream(1);
        s.send_headers(false);
        s.queue_body(Bytes::from_static(b"abc"), false);

        let (chunk, last) = s.take_body(10);
        assert_eq!(&chunk[..], b"abc");
        assert!(!last);
    }

    #[test]
    fn test_stream_window_accounting() {
        let mut s = stream(1);
        s.send_headers(false);

        s.flow_mut().reserve_send(1_000);
        assert_eq!(s.flow().send_window(), 64_535);

        s.flow_mut().grow_send(500).unwrap();
        assert_eq!(s.flow().send_window(), 65_035);
    }
}
