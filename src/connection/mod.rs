//! HTTP/2 client connection state machine.
//!
//! This module implements the connection layer: preface and settings
//! exchange, frame dispatch, stream lifecycle management, request
//! admission under the peer's concurrency limit, flow control at both
//! scopes, and graceful shutdown.
//!
//! A single [`Connection`] value owns every piece of per-connection state
//! (HPACK contexts, stream table, windows), which keeps header blocks
//! decoding in exact wire order. Drive it from one task only.

mod flow_control;
mod request;
mod settings;
mod stream;

pub use flow_control::FlowControl;
pub use request::Request;
pub use settings::ConnectionSettings;
pub use stream::{Stream, StreamId, StreamState};

use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::frame::{
    self, ContinuationFrame, DataFrame, ErrorCode, ErrorScope, Frame, FrameDecoder, FrameEncoder,
    FrameError, GoAwayFrame, HeadersFrame, PingFrame, PushPromiseFrame, RstStreamFrame, SettingId,
    SettingsFrame, WindowUpdateFrame,
};
use crate::hpack::{HeaderField, HpackDecoder, HpackEncoder, HpackError};
use crate::transport::Transport;

use settings::SettingsSync;

/// How long we wait for the peer to acknowledge our SETTINGS before
/// giving up with SETTINGS_TIMEOUT.
pub const DEFAULT_SETTINGS_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting to send the connection preface.
    WaitingPreface,
    /// Preface sent, waiting for the server's SETTINGS.
    WaitingSettings,
    /// Connection is open and accepting requests.
    Open,
    /// GOAWAY sent or received; existing streams drain, no new ones.
    Draining,
    /// Connection is closed.
    Closed,
}

/// Events produced by the connection for the caller.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Settings exchange finished; requests may flow.
    Ready,
    /// A response header block arrived for a stream.
    Headers {
        stream_id: StreamId,
        headers: Vec<HeaderField>,
        end_stream: bool,
    },
    /// Response body bytes arrived for a stream.
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    /// The server promised a pushed response. Accept by doing nothing,
    /// or reject with [`Connection::cancel`] on the promised stream.
    PushPromise {
        stream_id: StreamId,
        promised_stream_id: StreamId,
        headers: Vec<HeaderField>,
    },
    /// A stream finished, by completion or error.
    StreamClosed {
        stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// The server told us to stop opening streams.
    GoAway {
        last_stream_id: StreamId,
        error_code: ErrorCode,
    },
    /// The peer answered one of our PINGs.
    PingAck { data: [u8; 8] },
    /// The connection is gone.
    ConnectionClosed { error_code: ErrorCode },
}

/// Errors surfaced to the caller of connection methods.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("header compression error: {0}")]
    Hpack(#[from] HpackError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("connection is closed")]
    Closed,
    #[error("stream ids exhausted, reconnect to continue")]
    StreamIdsExhausted,
    #[error("stream {0} not found")]
    UnknownStream(StreamId),
}

/// An in-flight header block being assembled from HEADERS/PUSH_PROMISE
/// plus CONTINUATION fragments.
struct HeaderBlock {
    /// Stream the block belongs to.
    stream_id: StreamId,
    /// Set when the block came in on a PUSH_PROMISE.
    promised_stream_id: Option<StreamId>,
    /// END_STREAM from the opening HEADERS frame.
    end_stream: bool,
    /// Concatenated fragments.
    fragment: BytesMut,
}

/// HTTP/2 client connection.
pub struct Connection<T: Transport> {
    /// The underlying transport.
    transport: T,
    /// Connection state.
    state: ConnectionState,
    /// Settings we advertise.
    local_settings: ConnectionSettings,
    /// Settings the server advertised.
    remote_settings: ConnectionSettings,
    /// Whether the server's initial SETTINGS arrived.
    got_settings: bool,
    /// SETTINGS frames we sent that await acknowledgment.
    settings_sync: SettingsSync,
    /// Deadline for SETTINGS acknowledgment.
    settings_ack_timeout: Duration,
    /// Frame encoder.
    frame_encoder: FrameEncoder,
    /// Frame decoder.
    frame_decoder: FrameDecoder,
    /// HPACK encoder.
    hpack_encoder: HpackEncoder,
    /// HPACK decoder.
    hpack_decoder: HpackDecoder,
    /// Active streams by id.
    streams: HashMap<u32, Stream>,
    /// Next stream id to allocate (client ids are odd).
    next_stream_id: u32,
    /// Highest server-initiated (even) stream id seen.
    highest_remote_id: u32,
    /// Connection-level flow control.
    flow: FlowControl,
    /// Requests admitted but not yet sent, FIFO by submission.
    pending_requests: VecDeque<(StreamId, Request)>,
    /// Header block being assembled across CONTINUATION frames.
    open_block: Option<HeaderBlock>,
    /// Last GOAWAY the server sent us.
    remote_goaway: Option<StreamId>,
    /// Whether we sent GOAWAY.
    goaway_sent: bool,
    /// Buffer for encoding frames.
    write_buf: BytesMut,
    /// Buffer for inbound bytes awaiting frame boundaries.
    read_buf: BytesMut,
    /// Events awaiting delivery to the caller.
    events: Vec<ConnectionEvent>,
}

impl<T: Transport> Connection<T> {
    /// Create a new HTTP/2 client connection with default settings.
    pub fn new(transport: T) -> Self {
        Self::with_settings(transport, ConnectionSettings::default())
    }

    /// Create a new HTTP/2 client connection with explicit local settings.
    pub fn with_settings(transport: T, local_settings: ConnectionSettings) -> Self {
        Self {
            transport,
            state: ConnectionState::WaitingPreface,
            local_settings,
            remote_settings: ConnectionSettings::default(),
            got_settings: false,
            settings_sync: SettingsSync::default(),
            settings_ack_timeout: DEFAULT_SETTINGS_ACK_TIMEOUT,
            frame_encoder: FrameEncoder::new(),
            frame_decoder: FrameDecoder::new(),
            hpack_encoder: HpackEncoder::new(),
            hpack_decoder: HpackDecoder::new(),
            streams: HashMap::new(),
            next_stream_id: 1,
            highest_remote_id: 0,
            flow: FlowControl::new(
                frame::DEFAULT_INITIAL_WINDOW_SIZE,
                frame::DEFAULT_INITIAL_WINDOW_SIZE,
            ),
            pending_requests: VecDeque::new(),
            open_block: None,
            remote_goaway: None,
            goaway_sent: false,
            write_buf: BytesMut::with_capacity(16_384),
            read_buf: BytesMut::with_capacity(16_384),
            events: Vec::new(),
        }
    }

    /// Get the connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is ready for requests.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Override the SETTINGS acknowledgment deadline.
    pub fn set_settings_ack_timeout(&mut self, timeout: Duration) {
        self.settings_ack_timeout = timeout;
    }

    /// Drive the connection after the transport becomes ready (for TLS,
    /// once the handshake completed with `h2` negotiated).
    ///
    /// Sends the connection preface followed by our SETTINGS.
    pub fn on_transport_ready(&mut self) -> io::Result<()> {
        if self.state != ConnectionState::WaitingPreface {
            return Ok(());
        }

        debug!("sending connection preface");
        self.frame_encoder
            .encode_connection_preface(&mut self.write_buf);

        let settings = self.local_settings.to_wire();
        self.settings_sync.sent(settings.clone(), Instant::now());
        self.frame_encoder.encode(
            &Frame::Settings(SettingsFrame {
                ack: false,
                settings,
            }),
            &mut self.write_buf,
        );

        self.state = ConnectionState::WaitingSettings;
        self.flush_write_buffer()
    }

    /// Feed raw bytes received from the socket through the transport.
    pub fn on_recv(&mut self, data: &[u8]) -> io::Result<()> {
        self.transport.on_recv(data)?;

        let mut buf = [0u8; 16_384];
        loop {
            match self.transport.recv(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        self.process_frames()
    }

    /// Feed plaintext bytes directly into the frame buffer, bypassing the
    /// transport's receive path (useful when TLS is terminated
    /// externally).
    pub fn feed_data(&mut self, data: &[u8]) -> io::Result<()> {
        self.read_buf.extend_from_slice(data);
        self.process_frames()
    }

    /// Parse and dispatch every complete frame in the read buffer.
    fn process_frames(&mut self) -> io::Result<()> {
        while self.state != ConnectionState::Closed {
            match self.frame_decoder.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.handle_frame(frame)?,
                Ok(None) => break,
                Err(e) => {
                    let code = e.error_code();
                    match e.scope() {
                        ErrorScope::Stream(stream_id) => {
                            warn!(stream = %stream_id, error = %e, "stream-scoped frame error");
                            self.stream_error(stream_id, code)?;
                        }
                        ErrorScope::Connection => {
                            warn!(error = %e, "connection-scoped frame error");
                            self.connection_error(code)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Dispatch one decoded frame.
    fn handle_frame(&mut self, frame: Frame) -> io::Result<()> {
        trace!(stream = %frame.stream_id(), "frame received");

        // While a header block is open, the peer may send nothing but
        // CONTINUATION frames for that same stream (RFC 7540 §6.2).
        if let Some(block) = &self.open_block {
            let ok = matches!(
                &frame,
                Frame::Continuation(f) if f.stream_id == block.stream_id
            );
            if !ok {
                warn!("frame interleaved inside a header block");
                return self.connection_error(ErrorCode::ProtocolError);
            }
        }

        match frame {
            Frame::Settings(f) => self.handle_settings(f),
            Frame::Ping(f) => self.handle_ping(f),
            Frame::GoAway(f) => self.handle_goaway(f),
            Frame::WindowUpdate(f) => self.handle_window_update(f),
            Frame::Headers(f) => self.handle_headers(f),
            Frame::Continuation(f) => self.handle_continuation(f),
            Frame::Data(f) => self.handle_data(f),
            Frame::RstStream(f) => self.handle_rst_stream(f),
            Frame::PushPromise(f) => self.handle_push_promise(f),
            // PRIORITY carries only scheduling hints
            Frame::Priority(_) => Ok(()),
            // Unknown frame types must be ignored (RFC 7540 §4.1)
            Frame::Unknown(_) => Ok(()),
        }
    }

    fn handle_settings(&mut self, frame: SettingsFrame) -> io::Result<()> {
        if frame.ack {
            // Our settings take effect once acknowledged (RFC 7540 §6.5.3)
            if let Some(settings) = self.settings_sync.acked() {
                debug!("settings acknowledged");
                self.apply_local_settings(&settings);
            }
            return Ok(());
        }

        for setting in &frame.settings {
            match setting.id {
                SettingId::HeaderTableSize => {
                    self.remote_settings.header_table_size = setting.value;
                    // The encoder announces the change with a table size
                    // update at the head of the next header block
                    self.hpack_encoder.set_max_table_size(setting.value as usize);
                }
                SettingId::MaxConcurrentStreams => {
                    self.remote_settings.max_concurrent_streams = setting.value;
                }
                SettingId::InitialWindowSize => {
                    let delta =
                        setting.value as i32 - self.remote_settings.initial_window_size as i32;
                    self.remote_settings.initial_window_size = setting.value;

                    // The delta applies to every stream's send window and
                    // may push it negative; the connection window is not
                    // affected (RFC 7540 §6.9.2)
                    for stream in self.streams.values_mut() {
                        stream.flow_mut().adjust_send(delta);
                    }
                }
                SettingId::MaxFrameSize => {
                    self.remote_settings.max_frame_size = setting.value;
                    self.frame_encoder.set_max_frame_size(setting.value);
                }
                SettingId::MaxHeaderListSize => {
                    self.remote_settings.max_header_list_size = setting.value;
                }
                SettingId::EnablePush | SettingId::Unknown(_) => {}
            }
        }

        self.frame_encoder.encode_settings_ack(&mut self.write_buf);

        if !self.got_settings {
            self.got_settings = true;
            if self.state == ConnectionState::WaitingSettings {
                self.state = ConnectionState::Open;
            }
            debug!("settings exchange complete");
            self.events.push(ConnectionEvent::Ready);
        }

        self.flush_write_buffer()?;
        self.drain_capacity()
    }

    /// Put an acknowledged snapshot of our settings into effect.
    fn apply_local_settings(&mut self, settings: &[frame::Setting]) {
        for setting in settings {
            match setting.id {
                SettingId::HeaderTableSize => {
                    self.hpack_decoder.set_max_table_size(setting.value as usize);
                }
                SettingId::MaxFrameSize => {
                    self.frame_decoder.set_max_frame_size(setting.value);
                }
                SettingId::MaxHeaderListSize => {
                    self.hpack_decoder
                        .set_max_header_list_size(Some(setting.value as usize));
                }
                _ => {}
            }
        }
    }

    fn handle_ping(&mut self, frame: PingFrame) -> io::Result<()> {
        if frame.ack {
            self.events.push(ConnectionEvent::PingAck { data: frame.data });
            return Ok(());
        }

        self.frame_encoder
            .encode_ping_ack(frame.data, &mut self.write_buf);
        self.flush_write_buffer()
    }

    fn handle_goaway(&mut self, frame: GoAwayFrame) -> io::Result<()> {
        let code = ErrorCode::from_u32(frame.error_code);
        debug!(last_stream = %frame.last_stream_id, code = %code, "GOAWAY received");

        self.remote_goaway = Some(frame.last_stream_id);
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Draining;
        }

        // Streams above last_stream_id were never processed and are safe
        // to retry elsewhere
        let refused: Vec<u32> = self
            .streams
            .keys()
            .copied()
            .filter(|&id| StreamId::new(id).is_client_initiated() && id > frame.last_stream_id.value())
            .collect();
        for id in refused {
            self.finalize_stream(StreamId::new(id), ErrorCode::RefusedStream)?;
        }

        // Unsent requests will not be accepted either
        while let Some((stream_id, _)) = self.pending_requests.pop_front() {
            self.events.push(ConnectionEvent::StreamClosed {
                stream_id,
                error_code: ErrorCode::RefusedStream,
            });
        }

        self.events.push(ConnectionEvent::GoAway {
            last_stream_id: frame.last_stream_id,
            error_code: code,
        });

        self.maybe_finish_drain()
    }

    fn handle_window_update(&mut self, frame: WindowUpdateFrame) -> io::Result<()> {
        if frame.stream_id.is_connection_level() {
            if self.flow.grow_send(frame.increment).is_err() {
                warn!("connection send window overflow");
                return self.connection_error(ErrorCode::FlowControlError);
            }
        } else if let Some(stream) = self.streams.get_mut(&frame.stream_id.value()) {
            if stream.flow_mut().grow_send(frame.increment).is_err() {
                warn!(stream = %frame.stream_id, "stream send window overflow");
                return self.stream_error(frame.stream_id, ErrorCode::FlowControlError);
            }
        }
        // WINDOW_UPDATE for a stream we already closed is routine; ignore

        self.drain_capacity()
    }

    fn handle_headers(&mut self, frame: HeadersFrame) -> io::Result<()> {
        // HEADERS for a stream id we never opened is a frame on an idle
        // stream; a closed-but-valid id still gets its block decoded so
        // the HPACK tables stay synchronized.
        if frame.stream_id.is_client_initiated()
            && frame.stream_id.value() >= self.next_stream_id
        {
            warn!(stream = %frame.stream_id, "HEADERS on an idle stream");
            return self.connection_error(ErrorCode::ProtocolError);
        }
        if frame.stream_id.is_server_initiated()
            && frame.stream_id.value() > self.highest_remote_id
        {
            warn!(stream = %frame.stream_id, "HEADERS on an unpromised stream");
            return self.connection_error(ErrorCode::ProtocolError);
        }

        let block = HeaderBlock {
            stream_id: frame.stream_id,
            promised_stream_id: None,
            end_stream: frame.end_stream,
            fragment: BytesMut::from(&frame.header_block[..]),
        };

        if frame.end_headers {
            self.finish_header_block(block)
        } else {
            self.open_block = Some(block);
            Ok(())
        }
    }

    fn handle_continuation(&mut self, frame: ContinuationFrame) -> io::Result<()> {
        let Some(mut block) = self.open_block.take() else {
            warn!("CONTINUATION without an open header block");
            return self.connection_error(ErrorCode::ProtocolError);
        };
        // Stream mismatch is rejected up front in handle_frame
        debug_assert_eq!(block.stream_id, frame.stream_id);

        block.fragment.extend_from_slice(&frame.header_block);

        if frame.end_headers {
            self.finish_header_block(block)
        } else {
            self.open_block = Some(block);
            Ok(())
        }
    }

    /// Decode a completed header block and route it.
    fn finish_header_block(&mut self, block: HeaderBlock) -> io::Result<()> {
        let headers = match self.hpack_decoder.decode(&block.fragment) {
            Ok(headers) => headers,
            Err(HpackError::HeaderListTooLarge { limit }) => {
                // The tables stayed in sync; only this stream suffers
                warn!(stream = %block.stream_id, limit, "header list too large");
                let victim = block.promised_stream_id.unwrap_or(block.stream_id);
                return self.stream_error(victim, ErrorCode::EnhanceYourCalm);
            }
            Err(e) => {
                // Compression state is unrecoverable
                warn!(error = %e, "HPACK decoding failed");
                return self.connection_error(ErrorCode::CompressionError);
            }
        };

        if let Some(promised_stream_id) = block.promised_stream_id {
            let stream = Stream::promised(
                promised_stream_id,
                self.remote_settings.initial_window_size,
                self.local_settings.initial_window_size,
            );
            self.streams.insert(promised_stream_id.value(), stream);

            self.events.push(ConnectionEvent::PushPromise {
                stream_id: block.stream_id,
                promised_stream_id,
                headers,
            });
            return Ok(());
        }

        let Some(stream) = self.streams.get_mut(&block.stream_id.value()) else {
            // The stream closed while the response was in flight
            return self.stream_error(block.stream_id, ErrorCode::StreamClosed);
        };

        if !stream.can_recv() {
            return self.stream_error(block.stream_id, ErrorCode::StreamClosed);
        }

        stream.recv_headers(block.end_stream);
        let closed = stream.state() == StreamState::Closed;

        self.events.push(ConnectionEvent::Headers {
            stream_id: block.stream_id,
            headers,
            end_stream: block.end_stream,
        });

        if closed {
            self.finalize_stream(block.stream_id, ErrorCode::NoError)?;
        }
        Ok(())
    }

    fn handle_data(&mut self, frame: DataFrame) -> io::Result<()> {
        let len = frame.data.len() as u32;

        // Connection-level accounting happens before stream dispatch:
        // DATA consumes the connection window no matter what becomes of
        // the stream (RFC 7540 §6.9)
        if !self.flow.record_recv(len) {
            warn!("peer overran the connection receive window");
            return self.connection_error(ErrorCode::FlowControlError);
        }
        if let Some(increment) = self.flow.replenish() {
            self.frame_encoder
                .write_window_update(StreamId::CONNECTION, increment, &mut self.write_buf);
        }

        let Some(stream) = self.streams.get_mut(&frame.stream_id.value()) else {
            self.flush_write_buffer()?;
            return self.unknown_stream_error(frame.stream_id);
        };

        if !stream.can_recv() {
            self.flush_write_buffer()?;
            return self.stream_error(frame.stream_id, ErrorCode::StreamClosed);
        }

        if !stream.flow_mut().record_recv(len) {
            warn!(stream = %frame.stream_id, "peer overran a stream receive window");
            self.flush_write_buffer()?;
            return self.stream_error(frame.stream_id, ErrorCode::FlowControlError);
        }

        stream.recv_data();

        if frame.end_stream {
            stream.recv_end_stream();
        } else if let Some(increment) = stream.flow_mut().replenish() {
            self.frame_encoder
                .write_window_update(frame.stream_id, increment, &mut self.write_buf);
        }
        let closed = stream.state() == StreamState::Closed;

        self.events.push(ConnectionEvent::Data {
            stream_id: frame.stream_id,
            data: frame.data,
            end_stream: frame.end_stream,
        });

        self.flush_write_buffer()?;

        if closed {
            self.finalize_stream(frame.stream_id, ErrorCode::NoError)?;
        }
        Ok(())
    }

    fn handle_rst_stream(&mut self, frame: RstStreamFrame) -> io::Result<()> {
        let code = ErrorCode::from_u32(frame.error_code);

        if self.streams.contains_key(&frame.stream_id.value()) {
            debug!(stream = %frame.stream_id, code = %code, "stream reset by peer");
            self.finalize_stream(frame.stream_id, code)?;
        }
        Ok(())
    }

    fn handle_push_promise(&mut self, frame: PushPromiseFrame) -> io::Result<()> {
        if !self.local_settings.enable_push {
            warn!("PUSH_PROMISE while push is disabled");
            return self.connection_error(ErrorCode::ProtocolError);
        }

        // The parent stream must be one we are still reading from
        let parent_ok = self
            .streams
            .get(&frame.stream_id.value())
            .is_some_and(|s| s.can_recv());
        if !parent_ok {
            warn!(stream = %frame.stream_id, "PUSH_PROMISE on an unreadable stream");
            return self.connection_error(ErrorCode::ProtocolError);
        }

        // Promised ids are even and strictly increasing
        let promised = frame.promised_stream_id;
        if !promised.is_server_initiated() || promised.value() <= self.highest_remote_id {
            warn!(promised = %promised, "invalid promised stream id");
            return self.connection_error(ErrorCode::ProtocolError);
        }
        self.highest_remote_id = promised.value();

        let block = HeaderBlock {
            stream_id: frame.stream_id,
            promised_stream_id: Some(promised),
            end_stream: false,
            fragment: BytesMut::from(&frame.header_block[..]),
        };

        if frame.end_headers {
            self.finish_header_block(block)
        } else {
            self.open_block = Some(block);
            Ok(())
        }
    }

    /// Submit a request.
    ///
    /// The returned stream id identifies the request in later events.
    /// When the connection is still settling, the peer's concurrency
    /// limit is reached, or no window credit is available for the body,
    /// the request is parked in a FIFO and sent as capacity appears.
    pub fn submit(&mut self, request: Request) -> Result<StreamId, ConnectionError> {
        match self.state {
            ConnectionState::Draining | ConnectionState::Closed => {
                return Err(ConnectionError::Closed);
            }
            _ => {}
        }

        if self.next_stream_id > StreamId::MAX.value() {
            return Err(ConnectionError::StreamIdsExhausted);
        }
        let stream_id = StreamId::new(self.next_stream_id);
        self.next_stream_id += 2;

        if self.state == ConnectionState::Open
            && self.pending_requests.is_empty()
            && self.admissible(&request)
        {
            self.send_request(stream_id, request)?;
        } else {
            trace!(stream = %stream_id, "request parked");
            self.pending_requests.push_back((stream_id, request));
        }

        Ok(stream_id)
    }

    /// Whether a request can go out right now.
    fn admissible(&self, request: &Request) -> bool {
        let active = self
            .streams
            .values()
            .filter(|s| s.id().is_client_initiated())
            .count() as u32;
        if active >= self.remote_settings.max_concurrent_streams {
            return false;
        }

        if request.has_body() {
            // A request with a body needs at least one byte of credit at
            // both scopes to make progress
            let stream_credit = self.remote_settings.initial_window_size;
            if self.flow.send_capacity().min(stream_credit) == 0 {
                return false;
            }
        }

        true
    }

    /// Emit HEADERS (+CONTINUATION) and as much of the body as the
    /// windows allow.
    fn send_request(&mut self, stream_id: StreamId, request: Request) -> Result<(), ConnectionError> {
        debug!(stream = %stream_id, method = %request.method, path = %request.path, "request started");

        let mut stream = Stream::new(
            stream_id,
            self.remote_settings.initial_window_size,
            self.local_settings.initial_window_size,
        );

        let mut header_block = Vec::new();
        self.hpack_encoder
            .encode(&request.header_list(), &mut header_block);

        let end_stream = !request.has_body();
        stream.send_headers(end_stream);

        self.write_header_block(stream_id, header_block, end_stream);

        if let Some(body) = request.body {
            if !body.is_empty() {
                stream.queue_body(body, true);
            }
        }

        self.streams.insert(stream_id.value(), stream);
        self.flush_write_buffer()?;
        self.drain_stream_body(stream_id)?;
        Ok(())
    }

    /// Split a header block into HEADERS plus CONTINUATION frames at the
    /// peer's frame size limit.
    fn write_header_block(&mut self, stream_id: StreamId, block: Vec<u8>, end_stream: bool) {
        let max = self.frame_encoder.max_frame_size() as usize;
        let mut block = Bytes::from(block);

        let first = block.split_to(block.len().min(max));
        self.frame_encoder.encode(
            &Frame::Headers(HeadersFrame {
                stream_id,
                end_stream,
                end_headers: block.is_empty(),
                priority: None,
                header_block: first,
            }),
            &mut self.write_buf,
        );

        while !block.is_empty() {
            let chunk = block.split_to(block.len().min(max));
            self.frame_encoder.encode(
                &Frame::Continuation(ContinuationFrame {
                    stream_id,
                    end_headers: block.is_empty(),
                    header_block: chunk,
                }),
                &mut self.write_buf,
            );
        }
    }

    /// Send pending body bytes for one stream while window credit lasts.
    fn drain_stream_body(&mut self, stream_id: StreamId) -> Result<(), ConnectionError> {
        loop {
            let Some(stream) = self.streams.get_mut(&stream_id.value()) else {
                return Ok(());
            };
            if !stream.has_pending_body() || !stream.can_send() {
                return Ok(());
            }

            let credit = self
                .flow
                .send_capacity()
                .min(stream.flow().send_capacity())
                .min(self.frame_encoder.max_frame_size());
            if credit == 0 {
                trace!(stream = %stream_id, "body blocked on window");
                return Ok(());
            }

            let (chunk, last) = stream.take_body(credit as usize);
            let len = chunk.len() as u32;
            stream.flow_mut().reserve_send(len);
            self.flow.reserve_send(len);
            if last {
                stream.send_end_stream();
            }

            self.frame_encoder.encode(
                &Frame::Data(DataFrame {
                    stream_id,
                    end_stream: last,
                    data: chunk,
                }),
                &mut self.write_buf,
            );
            self.flush_write_buffer()?;
        }
    }

    /// Push queued work through freed capacity: blocked bodies first
    /// (they hold stream slots), then parked requests in FIFO order.
    fn drain_capacity(&mut self) -> io::Result<()> {
        let blocked: Vec<u32> = self
            .streams
            .iter()
            .filter(|(_, s)| s.has_pending_body())
            .map(|(&id, _)| id)
            .collect();
        let mut ids = blocked;
        ids.sort_unstable();
        for id in ids {
            self.drain_stream_body(StreamId::new(id))
                .map_err(into_io_error)?;
        }

        if self.state != ConnectionState::Open {
            return Ok(());
        }

        // Stop at the first request that cannot be admitted; later
        // submissions must not overtake it
        while let Some((_, request)) = self.pending_requests.front() {
            if !self.admissible(request) {
                break;
            }
            let Some((stream_id, request)) = self.pending_requests.pop_front() else {
                break;
            };
            self.send_request(stream_id, request).map_err(into_io_error)?;
        }

        Ok(())
    }

    /// Send a PING with the given opaque payload; the matching
    /// [`ConnectionEvent::PingAck`] carries it back.
    pub fn ping(&mut self, data: [u8; 8]) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }

        self.frame_encoder
            .encode(&Frame::Ping(PingFrame { ack: false, data }), &mut self.write_buf);
        self.flush_write_buffer()?;
        Ok(())
    }

    /// Cancel a stream with RST_STREAM(CANCEL), or drop it from the
    /// submission queue if it never reached the wire.
    pub fn cancel(&mut self, stream_id: StreamId) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }

        if let Some(pos) = self
            .pending_requests
            .iter()
            .position(|(id, _)| *id == stream_id)
        {
            self.pending_requests.remove(pos);
            self.events.push(ConnectionEvent::StreamClosed {
                stream_id,
                error_code: ErrorCode::Cancel,
            });
            return Ok(());
        }

        if !self.streams.contains_key(&stream_id.value()) {
            return Err(ConnectionError::UnknownStream(stream_id));
        }

        debug!(stream = %stream_id, "stream cancelled");
        self.frame_encoder.write_rst_stream(
            stream_id,
            ErrorCode::Cancel.to_u32(),
            &mut self.write_buf,
        );
        self.flush_write_buffer()?;
        self.finalize_stream(stream_id, ErrorCode::Cancel)?;
        Ok(())
    }

    /// Close the connection.
    ///
    /// A graceful close sends GOAWAY(NO_ERROR) and lets in-flight streams
    /// finish before the transport goes down; an abrupt close cancels
    /// them immediately.
    pub fn close(&mut self, graceful: bool) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        if !self.goaway_sent {
            self.goaway_sent = true;
            debug!(graceful, "closing connection");
            self.frame_encoder.write_goaway(
                StreamId::new(self.highest_remote_id),
                ErrorCode::NoError.to_u32(),
                b"",
                &mut self.write_buf,
            );
            self.flush_write_buffer()?;
        }

        // Parked requests never reached the wire and are retryable
        while let Some((stream_id, _)) = self.pending_requests.pop_front() {
            self.events.push(ConnectionEvent::StreamClosed {
                stream_id,
                error_code: ErrorCode::RefusedStream,
            });
        }

        if graceful {
            self.state = ConnectionState::Draining;
            return self.maybe_finish_drain().map_err(ConnectionError::Io);
        }

        let open: Vec<u32> = self.streams.keys().copied().collect();
        for id in open {
            self.streams.remove(&id);
            self.events.push(ConnectionEvent::StreamClosed {
                stream_id: StreamId::new(id),
                error_code: ErrorCode::Cancel,
            });
        }
        self.finish_close(ErrorCode::NoError)?;
        Ok(())
    }

    /// Check timers; call periodically with the current instant.
    ///
    /// Raises SETTINGS_TIMEOUT if the peer has sat on one of our SETTINGS
    /// frames for longer than the configured deadline.
    pub fn on_tick(&mut self, now: Instant) -> io::Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        if let Some(sent_at) = self.settings_sync.oldest_sent_at() {
            if now.duration_since(sent_at) > self.settings_ack_timeout {
                warn!("peer failed to acknowledge SETTINGS in time");
                return self.connection_error(ErrorCode::SettingsTimeout);
            }
        }
        Ok(())
    }

    /// Reset a single stream and keep the connection going.
    fn stream_error(&mut self, stream_id: StreamId, code: ErrorCode) -> io::Result<()> {
        self.frame_encoder
            .write_rst_stream(stream_id, code.to_u32(), &mut self.write_buf);
        self.flush_write_buffer()?;

        if self.streams.contains_key(&stream_id.value()) {
            self.finalize_stream(stream_id, code)?;
        }
        Ok(())
    }

    /// Handle a stream-addressed frame whose stream we do not know.
    ///
    /// Ids below the high-water mark belonged to closed streams and get a
    /// STREAM_CLOSED reset; ids we never opened mean the peer touched an
    /// idle stream, which is fatal.
    fn unknown_stream_error(&mut self, stream_id: StreamId) -> io::Result<()> {
        let seen = if stream_id.is_client_initiated() {
            stream_id.value() < self.next_stream_id
        } else {
            stream_id.value() <= self.highest_remote_id
        };

        if seen {
            self.stream_error(stream_id, ErrorCode::StreamClosed)
        } else {
            warn!(stream = %stream_id, "frame on an idle stream");
            self.connection_error(ErrorCode::ProtocolError)
        }
    }

    /// Tear the connection down with GOAWAY.
    fn connection_error(&mut self, code: ErrorCode) -> io::Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }

        self.goaway_sent = true;
        self.frame_encoder.write_goaway(
            StreamId::new(self.highest_remote_id),
            code.to_u32(),
            b"",
            &mut self.write_buf,
        );
        self.flush_write_buffer()?;

        // Streams that never saw a response byte are retryable elsewhere;
        // the rest die with the connection's code
        let open: Vec<u32> = self.streams.keys().copied().collect();
        for id in open {
            if let Some(stream) = self.streams.remove(&id) {
                self.events.push(ConnectionEvent::StreamClosed {
                    stream_id: StreamId::new(id),
                    error_code: if stream.responded() {
                        code
                    } else {
                        ErrorCode::RefusedStream
                    },
                });
            }
        }
        while let Some((stream_id, _)) = self.pending_requests.pop_front() {
            self.events.push(ConnectionEvent::StreamClosed {
                stream_id,
                error_code: ErrorCode::RefusedStream,
            });
        }

        self.finish_close(code)
    }

    /// Remove a finished stream and notify the caller.
    fn finalize_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> io::Result<()> {
        if let Some(mut stream) = self.streams.remove(&stream_id.value()) {
            stream.close();
        }

        self.events.push(ConnectionEvent::StreamClosed {
            stream_id,
            error_code: code,
        });

        // A finished stream frees a concurrency slot
        self.drain_capacity()?;
        self.maybe_finish_drain()
    }

    /// Once draining and out of live streams, finish the close.
    fn maybe_finish_drain(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Draining && self.streams.is_empty() {
            self.finish_close(ErrorCode::NoError)?;
        }
        Ok(())
    }

    fn finish_close(&mut self, code: ErrorCode) -> io::Result<()> {
        debug!(code = %code, "connection closed");
        self.state = ConnectionState::Closed;
        self.transport.shutdown()?;
        self.events
            .push(ConnectionEvent::ConnectionClosed { error_code: code });
        Ok(())
    }

    /// Flush the write buffer into the transport.
    fn flush_write_buffer(&mut self) -> io::Result<()> {
        if !self.write_buf.is_empty() {
            let n = self.transport.send(&self.write_buf)?;
            let _ = self.write_buf.split_to(n);
        }
        Ok(())
    }

    /// Take the events produced since the last call.
    pub fn poll_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Bytes waiting to go out on the socket.
    pub fn pending_send(&self) -> &[u8] {
        self.transport.pending_send()
    }

    /// Mark `n` bytes as written to the socket.
    pub fn advance_send(&mut self, n: usize) {
        self.transport.advance_send(n);
    }

    /// Whether any bytes are waiting to go out.
    pub fn has_pending_send(&self) -> bool {
        self.transport.has_pending_send() || !self.write_buf.is_empty()
    }

    /// Number of requests parked waiting for capacity.
    pub fn queued_requests(&self) -> usize {
        self.pending_requests.len()
    }

    /// Get the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Get mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

fn into_io_error(e: ConnectionError) -> io::Error {
    match e {
        ConnectionError::Io(e) => e,
        other => io::Error::other(other),
    }
}
