//! Wire-level conformance tests for the client connection.
//!
//! Each test drives a `Connection` over an in-memory transport and
//! checks the literal bytes or frame sequences exchanged with a
//! hand-rolled "server" side.

use bytes::{Bytes, BytesMut};

use http2_client::frame::{
    self, ContinuationFrame, DataFrame, Frame, FrameDecoder, FrameEncoder, GoAwayFrame,
    HeadersFrame, Setting, SettingId, SettingsFrame, WindowUpdateFrame,
};
use http2_client::hpack::{HeaderField, HpackDecoder, HpackEncoder};
use http2_client::{
    Connection, ConnectionEvent, ErrorCode, PlainTransport, Request, StreamId,
};

/// A hand-rolled server end of the connection.
struct TestServer {
    encoder: FrameEncoder,
    decoder: FrameDecoder,
    hpack: HpackEncoder,
}

impl TestServer {
    fn new() -> Self {
        let mut decoder = FrameDecoder::new();
        decoder.set_max_frame_size(frame::MAX_ALLOWED_FRAME_SIZE);
        Self {
            encoder: FrameEncoder::new(),
            decoder,
            hpack: HpackEncoder::new(),
        }
    }

    fn send(&self, conn: &mut Connection<PlainTransport>, frame: &Frame) {
        let mut buf = BytesMut::new();
        self.encoder.encode(frame, &mut buf);
        conn.feed_data(&buf).unwrap();
    }

    fn send_settings(&self, conn: &mut Connection<PlainTransport>, settings: Vec<Setting>) {
        self.send(
            conn,
            &Frame::Settings(SettingsFrame {
                ack: false,
                settings,
            }),
        );
    }

    fn response_headers(&mut self, status: &[u8]) -> Bytes {
        let mut block = Vec::new();
        self.hpack
            .encode(&[HeaderField::new(b":status".to_vec(), status.to_vec())], &mut block);
        Bytes::from(block)
    }

    /// Decode every client frame in `bytes`, skipping the preface.
    fn parse(&self, mut bytes: &[u8]) -> Vec<Frame> {
        if bytes.starts_with(frame::CONNECTION_PREFACE) {
            bytes = &bytes[frame::CONNECTION_PREFACE.len()..];
        }
        let mut buf = BytesMut::from(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.decoder.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        assert!(buf.is_empty(), "trailing partial frame from client");
        frames
    }
}

fn take_output(conn: &mut Connection<PlainTransport>) -> Vec<u8> {
    let out = conn.pending_send().to_vec();
    let n = out.len();
    conn.advance_send(n);
    out
}

/// Bring a connection up through the preface/settings exchange.
fn handshake(
    server: &TestServer,
    settings: Vec<Setting>,
) -> Connection<PlainTransport> {
    let mut conn = Connection::new(PlainTransport::new());
    conn.on_transport_ready().unwrap();
    take_output(&mut conn);

    server.send_settings(&mut conn, settings);
    assert!(conn.is_ready());
    take_output(&mut conn);
    conn.poll_events();
    conn
}

fn data_bytes(frames: &[Frame]) -> usize {
    frames
        .iter()
        .map(|f| match f {
            Frame::Data(d) => d.data.len(),
            _ => 0,
        })
        .sum()
}

// Scenario (a): first bytes on the wire are the literal preface followed
// by a SETTINGS frame.
#[test]
fn preface_and_settings_are_first_bytes() {
    let server = TestServer::new();
    let mut conn = Connection::new(PlainTransport::new());
    conn.on_transport_ready().unwrap();

    let out = take_output(&mut conn);
    let preface = [
        0x50, 0x52, 0x49, 0x20, 0x2a, 0x20, 0x48, 0x54, 0x54, 0x50, 0x2f, 0x32, 0x2e, 0x30,
        0x0d, 0x0a, 0x0d, 0x0a, 0x53, 0x4d, 0x0d, 0x0a, 0x0d, 0x0a,
    ];
    assert_eq!(&out[..24], &preface);

    // The preface is immediately followed by a non-ACK SETTINGS frame on
    // stream 0
    assert_eq!(out[27], 0x04); // type
    assert_eq!(out[28] & 0x01, 0); // no ACK flag
    assert_eq!(&out[29..33], &[0, 0, 0, 0]); // stream 0

    let frames = server.parse(&out);
    assert!(matches!(&frames[0], Frame::Settings(f) if !f.ack));
}

// Scenario (a), empty-settings wire image: an empty SETTINGS frame is
// exactly the 9-byte header 00 00 00 04 00 00 00 00 00.
#[test]
fn empty_settings_frame_wire_image() {
    let encoder = FrameEncoder::new();
    let mut buf = BytesMut::new();
    encoder.encode(
        &Frame::Settings(SettingsFrame {
            ack: false,
            settings: vec![],
        }),
        &mut buf,
    );
    assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]);
}

// Scenario (b): a PING is answered byte for byte with the ACK flag set.
#[test]
fn ping_round_trip_bytes() {
    let server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    conn.feed_data(&[
        0x00, 0x00, 0x08, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, //
        0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04,
    ])
    .unwrap();

    let out = take_output(&mut conn);
    assert_eq!(
        out,
        [
            0x00, 0x00, 0x08, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00, //
            0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04,
        ]
    );
}

// Scenario (c): a 70000-byte body stalls at the 65535-byte connection
// window and resumes when WINDOW_UPDATE arrives on stream 0.
#[test]
fn flow_control_parks_body_at_connection_window() {
    let server = TestServer::new();
    // A large per-stream window isolates the connection-level limit
    let mut conn = handshake(
        &server,
        vec![Setting {
            id: SettingId::InitialWindowSize,
            value: 1_048_576,
        }],
    );

    let body = vec![0x42u8; 70_000];
    let stream_id = conn
        .submit(Request::post("https", "example.com", "/upload", body))
        .unwrap();

    let frames = server.parse(&take_output(&mut conn));
    assert!(matches!(&frames[0], Frame::Headers(h) if h.stream_id == stream_id && !h.end_stream));
    assert_eq!(data_bytes(&frames), 65_535);
    assert!(!frames.iter().any(|f| matches!(f, Frame::Data(d) if d.end_stream)));

    // 10000 more bytes of connection credit release exactly the
    // remaining 4465 bytes
    server.send(
        &mut conn,
        &Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: StreamId::CONNECTION,
            increment: 10_000,
        }),
    );

    let frames = server.parse(&take_output(&mut conn));
    assert_eq!(data_bytes(&frames), 4_465);
    assert!(frames.iter().any(|f| matches!(f, Frame::Data(d) if d.end_stream)));
}

// Scenario (c) addendum: every DATA frame respects the peer's
// SETTINGS_MAX_FRAME_SIZE.
#[test]
fn body_chunked_at_max_frame_size() {
    let server = TestServer::new();
    let mut conn = handshake(
        &server,
        vec![Setting {
            id: SettingId::InitialWindowSize,
            value: 1_048_576,
        }],
    );

    let body = vec![0x42u8; 40_000];
    conn.submit(Request::post("https", "example.com", "/upload", body))
        .unwrap();

    let frames = server.parse(&take_output(&mut conn));
    for frame in &frames {
        if let Frame::Data(d) = frame {
            assert!(d.data.len() <= frame::DEFAULT_MAX_FRAME_SIZE as usize);
        }
    }
    assert_eq!(data_bytes(&frames), 40_000);
}

// Scenario (d): WINDOW_UPDATE with increment 0 on a stream draws
// RST_STREAM(PROTOCOL_ERROR) while the connection stays up.
#[test]
fn zero_increment_on_stream_resets_stream_only() {
    let server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    let stream_id = conn.submit(Request::get("https", "example.com", "/")).unwrap();
    take_output(&mut conn);

    let mut raw = vec![0x00, 0x00, 0x04, 0x08, 0x00];
    raw.extend_from_slice(&stream_id.value().to_be_bytes());
    raw.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    conn.feed_data(&raw).unwrap();

    assert!(conn.is_ready());

    let frames = server.parse(&take_output(&mut conn));
    assert!(frames.iter().any(|f| matches!(
        f,
        Frame::RstStream(r) if r.stream_id == stream_id
            && r.error_code == ErrorCode::ProtocolError.to_u32()
    )));
    assert!(!frames.iter().any(|f| matches!(f, Frame::GoAway(_))));
}

// Scenario (e): GOAWAY with last_stream_id=5 refuses stream 7, drains
// streams 1, 3, 5, and closes once they finish.
#[test]
fn goaway_drains_processed_streams() {
    let mut server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    for path in ["/1", "/3", "/5", "/7"] {
        conn.submit(Request::get("https", "example.com", path)).unwrap();
    }
    take_output(&mut conn);

    server.send(
        &mut conn,
        &Frame::GoAway(GoAwayFrame {
            last_stream_id: StreamId::new(5),
            error_code: ErrorCode::NoError.to_u32(),
            debug_data: Bytes::new(),
        }),
    );

    let events = conn.poll_events();
    let refused: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::StreamClosed {
                stream_id,
                error_code: ErrorCode::RefusedStream,
            } => Some(stream_id.value()),
            _ => None,
        })
        .collect();
    assert_eq!(refused, vec![7]);

    // New submissions are refused while draining
    assert!(conn.submit(Request::get("https", "example.com", "/late")).is_err());

    // Streams 1, 3, 5 complete; the connection then closes by itself
    for id in [1u32, 3, 5] {
        let block = server.response_headers(b"200");
        server.send(
            &mut conn,
            &Frame::Headers(HeadersFrame {
                stream_id: StreamId::new(id),
                end_stream: true,
                end_headers: true,
                priority: None,
                header_block: block,
            }),
        );
    }

    let events = conn.poll_events();
    let finished: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::StreamClosed {
                stream_id,
                error_code: ErrorCode::NoError,
            } => Some(stream_id.value()),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![1, 3, 5]);
    assert!(events.iter().any(|e| matches!(
        e,
        ConnectionEvent::ConnectionClosed {
            error_code: ErrorCode::NoError
        }
    )));
}

// Scenario (f): after the server lowers HEADER_TABLE_SIZE to 0, the next
// outbound header block leads with the size-update directive.
#[test]
fn table_size_update_leads_next_header_block() {
    let server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    server.send_settings(
        &mut conn,
        vec![Setting {
            id: SettingId::HeaderTableSize,
            value: 0,
        }],
    );
    take_output(&mut conn);

    conn.submit(Request::get("https", "example.com", "/")).unwrap();
    let frames = server.parse(&take_output(&mut conn));

    let block = frames
        .iter()
        .find_map(|f| match f {
            Frame::Headers(h) => Some(&h.header_block),
            _ => None,
        })
        .expect("headers frame");

    // 001xxxxx with value 0
    assert_eq!(block[0], 0x20);

    // A decoder tracking the new limit accepts the block
    let mut decoder = HpackDecoder::new();
    decoder.set_max_table_size(0);
    let headers = decoder.decode(block).unwrap();
    assert_eq!(headers[0].name, b":method");
}

// Request headers decode on the server side with pseudo-headers leading.
#[test]
fn request_header_block_decodes_in_order() {
    let server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    conn.submit(
        Request::get("https", "example.com", "/search?q=http2")
            .header(b"accept".to_vec(), b"application/json".to_vec())
            .sensitive_header(b"authorization".to_vec(), b"Bearer abc".to_vec()),
    )
    .unwrap();

    let frames = server.parse(&take_output(&mut conn));
    let block = frames
        .iter()
        .find_map(|f| match f {
            Frame::Headers(h) => Some(&h.header_block),
            _ => None,
        })
        .expect("headers frame");

    let mut decoder = HpackDecoder::new();
    let headers = decoder.decode(block).unwrap();

    assert_eq!(headers[0].name, b":method");
    assert_eq!(headers[0].value, b"GET");
    assert_eq!(headers[1].name, b":scheme");
    assert_eq!(headers[2].name, b":authority");
    assert_eq!(headers[3].name, b":path");
    assert_eq!(headers[3].value, b"/search?q=http2");
    assert_eq!(headers[4].name, b"accept");

    // The credential came through never-indexed and stays flagged
    let auth = headers.iter().find(|h| h.name == b"authorization").unwrap();
    assert!(auth.sensitive);
}

// A full request/response conversation against the hand-rolled server.
#[test]
fn request_response_end_to_end() {
    let mut server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    let stream_id = conn
        .submit(Request::post("https", "example.com", "/echo", &b"ping!"[..]))
        .unwrap();

    let frames = server.parse(&take_output(&mut conn));
    assert!(matches!(&frames[0], Frame::Headers(h) if h.stream_id == stream_id));
    assert!(
        matches!(&frames[1], Frame::Data(d) if d.end_stream && &d.data[..] == b"ping!")
    );

    let block = server.response_headers(b"200");
    server.send(
        &mut conn,
        &Frame::Headers(HeadersFrame {
            stream_id,
            end_stream: false,
            end_headers: true,
            priority: None,
            header_block: block,
        }),
    );
    server.send(
        &mut conn,
        &Frame::Data(DataFrame {
            stream_id,
            end_stream: true,
            data: Bytes::from_static(b"pong!"),
        }),
    );

    let events = conn.poll_events();
    let mut saw_headers = false;
    let mut saw_body = false;
    let mut saw_close = false;
    for event in &events {
        match event {
            ConnectionEvent::Headers {
                stream_id: s,
                headers,
                end_stream,
            } => {
                assert_eq!(*s, stream_id);
                assert!(!end_stream);
                assert_eq!(headers[0].name, b":status");
                assert_eq!(headers[0].value, b"200");
                saw_headers = true;
            }
            ConnectionEvent::Data {
                stream_id: s,
                data,
                end_stream,
            } => {
                assert_eq!(*s, stream_id);
                assert!(end_stream);
                assert_eq!(&data[..], b"pong!");
                saw_body = true;
            }
            ConnectionEvent::StreamClosed {
                stream_id: s,
                error_code,
            } => {
                assert_eq!(*s, stream_id);
                assert_eq!(*error_code, ErrorCode::NoError);
                saw_close = true;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert!(saw_headers && saw_body && saw_close);
}

// A response split across HEADERS + CONTINUATION decodes as one block,
// and no frame from another stream may interleave.
#[test]
fn continuation_reassembly_over_the_wire() {
    let server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    let stream_id = conn.submit(Request::get("https", "example.com", "/")).unwrap();
    take_output(&mut conn);

    let mut hpack = HpackEncoder::new();
    let mut block = Vec::new();
    hpack.encode(
        &[
            HeaderField::new(b":status".to_vec(), b"200".to_vec()),
            HeaderField::new(b"cache-control".to_vec(), b"no-store".to_vec()),
            HeaderField::new(b"etag".to_vec(), b"\"v1\"".to_vec()),
        ],
        &mut block,
    );
    let (a, rest) = block.split_at(3);
    let (b, c) = rest.split_at(3);

    server.send(
        &mut conn,
        &Frame::Headers(HeadersFrame {
            stream_id,
            end_stream: true,
            end_headers: false,
            priority: None,
            header_block: Bytes::copy_from_slice(a),
        }),
    );
    server.send(
        &mut conn,
        &Frame::Continuation(ContinuationFrame {
            stream_id,
            end_headers: false,
            header_block: Bytes::copy_from_slice(b),
        }),
    );
    assert!(conn.poll_events().is_empty());

    server.send(
        &mut conn,
        &Frame::Continuation(ContinuationFrame {
            stream_id,
            end_headers: true,
            header_block: Bytes::copy_from_slice(c),
        }),
    );

    let events = conn.poll_events();
    let headers = events
        .iter()
        .find_map(|e| match e {
            ConnectionEvent::Headers { headers, .. } => Some(headers),
            _ => None,
        })
        .expect("headers event");
    assert_eq!(headers.len(), 3);
    assert_eq!(headers[2].name, b"etag");
}

// Stream ids stay odd and strictly increasing across submissions.
#[test]
fn client_stream_ids_are_odd_and_increasing() {
    let server = TestServer::new();
    let mut conn = handshake(&server, vec![]);

    let mut previous = 0;
    for i in 0..20 {
        let id = conn
            .submit(Request::get("https", "example.com", format!("/{i}")))
            .unwrap();
        assert_eq!(id.value() % 2, 1);
        assert!(id.value() > previous);
        previous = id.value();
    }
}
