//! HTTP/2 frame encoding.

use bytes::{BufMut, Bytes, BytesMut};

use super::types::*;
use super::{FRAME_HEADER_SIZE, flags};

/// Frame encoder that writes HTTP/2 frames to a byte buffer.
pub struct FrameEncoder {
    max_frame_size: u32,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameEncoder {
    /// Create a new frame encoder with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: super::DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the maximum frame size (the peer's SETTINGS_MAX_FRAME_SIZE).
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Get the maximum frame size.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Encode a frame into the buffer.
    ///
    /// Callers are responsible for chunking payloads at
    /// [`max_frame_size`](Self::max_frame_size); oversized payloads are a
    /// caller bug.
    pub fn encode(&self, frame: &Frame, buf: &mut BytesMut) {
        match frame {
            Frame::Data(f) => self.encode_data(f, buf),
            Frame::Headers(f) => self.encode_headers(f, buf),
            Frame::Priority(f) => self.encode_priority(f, buf),
            Frame::RstStream(f) => self.encode_rst_stream(f, buf),
            Frame::Settings(f) => self.encode_settings(f, buf),
            Frame::PushPromise(f) => self.encode_push_promise(f, buf),
            Frame::Ping(f) => self.encode_ping(f, buf),
            Frame::GoAway(f) => self.encode_goaway(f, buf),
            Frame::WindowUpdate(f) => self.encode_window_update(f, buf),
            Frame::Continuation(f) => self.encode_continuation(f, buf),
            Frame::Unknown(f) => self.encode_unknown(f, buf),
        }
    }

    /// Write a 9-byte frame header.
    #[inline]
    fn write_header(
        &self,
        buf: &mut BytesMut,
        length: u32,
        frame_type: FrameType,
        frame_flags: u8,
        stream_id: StreamId,
    ) {
        debug_assert!(length <= self.max_frame_size);

        // Length (24 bits, big-endian)
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);

        buf.put_u8(frame_type as u8);
        buf.put_u8(frame_flags);

        // Stream ID (31 bits, big-endian, reserved bit zero)
        buf.put_u32(stream_id.value() & 0x7FFF_FFFF);
    }

    fn encode_data(&self, frame: &DataFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_stream {
            frame_flags |= flags::END_STREAM;
        }

        let length = frame.data.len() as u32;
        buf.reserve(FRAME_HEADER_SIZE + length as usize);

        self.write_header(buf, length, FrameType::Data, frame_flags, frame.stream_id);
        buf.extend_from_slice(&frame.data);
    }

    fn encode_headers(&self, frame: &HeadersFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_stream {
            frame_flags |= flags::END_STREAM;
        }
        if frame.end_headers {
            frame_flags |= flags::END_HEADERS;
        }
        if frame.priority.is_some() {
            frame_flags |= flags::PRIORITY;
        }

        let priority_len = if frame.priority.is_some() { 5 } else { 0 };
        let length = priority_len + frame.header_block.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(
            buf,
            length,
            FrameType::Headers,
            frame_flags,
            frame.stream_id,
        );

        if let Some(priority) = &frame.priority {
            write_priority(priority, buf);
        }

        buf.extend_from_slice(&frame.header_block);
    }

    fn encode_priority(&self, frame: &PriorityFrame, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + 5);
        self.write_header(buf, 5, FrameType::Priority, 0, frame.stream_id);
        write_priority(&frame.priority, buf);
    }

    fn encode_rst_stream(&self, frame: &RstStreamFrame, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + 4);
        self.write_header(buf, 4, FrameType::RstStream, 0, frame.stream_id);
        buf.put_u32(frame.error_code);
    }

    fn encode_settings(&self, frame: &SettingsFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.ack { flags::ACK } else { 0 };
        let length = if frame.ack {
            0
        } else {
            (frame.settings.len() * 6) as u32
        };

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(
            buf,
            length,
            FrameType::Settings,
            frame_flags,
            StreamId::CONNECTION,
        );

        if !frame.ack {
            for setting in &frame.settings {
                buf.put_u16(setting.id.to_u16());
                buf.put_u32(setting.value);
            }
        }
    }

    fn encode_push_promise(&self, frame: &PushPromiseFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_headers {
            frame_flags |= flags::END_HEADERS;
        }

        let length = 4 + frame.header_block.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(
            buf,
            length,
            FrameType::PushPromise,
            frame_flags,
            frame.stream_id,
        );

        buf.put_u32(frame.promised_stream_id.value() & 0x7FFF_FFFF);
        buf.extend_from_slice(&frame.header_block);
    }

    fn encode_ping(&self, frame: &PingFrame, buf: &mut BytesMut) {
        let frame_flags = if frame.ack { flags::ACK } else { 0 };

        buf.reserve(FRAME_HEADER_SIZE + 8);
        self.write_header(buf, 8, FrameType::Ping, frame_flags, StreamId::CONNECTION);
        buf.extend_from_slice(&frame.data);
    }

    fn encode_goaway(&self, frame: &GoAwayFrame, buf: &mut BytesMut) {
        let length = 8 + frame.debug_data.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(buf, length, FrameType::GoAway, 0, StreamId::CONNECTION);

        buf.put_u32(frame.last_stream_id.value() & 0x7FFF_FFFF);
        buf.put_u32(frame.error_code);
        buf.extend_from_slice(&frame.debug_data);
    }

    fn encode_window_update(&self, frame: &WindowUpdateFrame, buf: &mut BytesMut) {
        buf.reserve(FRAME_HEADER_SIZE + 4);
        self.write_header(buf, 4, FrameType::WindowUpdate, 0, frame.stream_id);
        buf.put_u32(frame.increment & 0x7FFF_FFFF);
    }

    fn encode_continuation(&self, frame: &ContinuationFrame, buf: &mut BytesMut) {
        let mut frame_flags = 0u8;
        if frame.end_headers {
            frame_flags |= flags::END_HEADERS;
        }

        let length = frame.header_block.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);
        self.write_header(
            buf,
            length,
            FrameType::Continuation,
            frame_flags,
            frame.stream_id,
        );

        buf.extend_from_slice(&frame.header_block);
    }

    fn encode_unknown(&self, frame: &UnknownFrame, buf: &mut BytesMut) {
        let length = frame.payload.len() as u32;

        buf.reserve(FRAME_HEADER_SIZE + length as usize);

        // The header is written by hand since the type byte is arbitrary
        buf.put_u8((length >> 16) as u8);
        buf.put_u8((length >> 8) as u8);
        buf.put_u8(length as u8);
        buf.put_u8(frame.frame_type);
        buf.put_u8(frame.flags);
        buf.put_u32(frame.stream_id.value() & 0x7FFF_FFFF);

        buf.extend_from_slice(&frame.payload);
    }
}

fn write_priority(priority: &Priority, buf: &mut BytesMut) {
    let mut dep = priority.dependency.value();
    if priority.exclusive {
        dep |= 0x8000_0000;
    }
    buf.put_u32(dep);
    buf.put_u8(priority.weight);
}

/// Helper functions for emitting common frames directly.
impl FrameEncoder {
    /// Write the 24-byte client connection preface.
    pub fn encode_connection_preface(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(super::CONNECTION_PREFACE);
    }

    /// Write a SETTINGS ACK frame.
    pub fn encode_settings_ack(&self, buf: &mut BytesMut) {
        self.encode(
            &Frame::Settings(SettingsFrame {
                ack: true,
                settings: Vec::new(),
            }),
            buf,
        );
    }

    /// Write a PING response carrying the peer's opaque payload.
    pub fn encode_ping_ack(&self, data: [u8; 8], buf: &mut BytesMut) {
        self.encode(&Frame::Ping(PingFrame { ack: true, data }), buf);
    }

    /// Write a WINDOW_UPDATE frame.
    pub fn write_window_update(&self, stream_id: StreamId, increment: u32, buf: &mut BytesMut) {
        self.encode(
            &Frame::WindowUpdate(WindowUpdateFrame {
                stream_id,
                increment,
            }),
            buf,
        );
    }

    /// Write a RST_STREAM frame.
    pub fn write_rst_stream(&self, stream_id: StreamId, error_code: u32, buf: &mut BytesMut) {
        self.encode(
            &Frame::RstStream(RstStreamFrame {
                stream_id,
                error_code,
            }),
            buf,
        );
    }

    /// Write a GOAWAY frame.
    pub fn write_goaway(
        &self,
        last_stream_id: StreamId,
        error_code: u32,
        debug_data: &[u8],
        buf: &mut BytesMut,
    ) {
        self.encode(
            &Frame::GoAway(GoAwayFrame {
                last_stream_id,
                error_code,
                debug_data: Bytes::copy_from_slice(debug_data),
            }),
            buf,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode::FrameDecoder;

    fn roundtrip(frame: Frame) -> Frame {
        let encoder = FrameEncoder::new();
        let decoder = FrameDecoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(&frame, &mut buf);
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(buf.is_empty(), "decoder left bytes behind");
        decoded
    }

    #[test]
    fn test_preface_bytes() {
        let encoder = FrameEncoder::new();
        let mut buf = BytesMut::new();
        encoder.encode_connection_preface(&mut buf);

        assert_eq!(&buf[..], b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n");
        assert_eq!(buf.len(), 24);
    }

    #[test]
    fn test_empty_settings_wire_format() {
        let encoder = FrameEncoder::new();
        let mut buf = BytesMut::new();
        encoder.encode(
            &Frame::Settings(SettingsFrame {
                ack: false,
                settings: vec![],
            }),
            &mut buf,
        );

        assert_eq!(
            &buf[..],
            &[0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_ping_ack_wire_format() {
        let encoder = FrameEncoder::new();
        let mut buf = BytesMut::new();
        encoder.encode_ping_ack([0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04], &mut buf);

        assert_eq!(
            &buf[..],
            &[
                0x00, 0x00, 0x08, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00, //
                0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04,
            ]
        );
    }

    #[test]
    fn test_roundtrip_data() {
        let decoded = roundtrip(Frame::Data(DataFrame {
            stream_id: StreamId::new(1),
            end_stream: true,
            data: Bytes::from_static(b"hello world"),
        }));

        match decoded {
            Frame::Data(f) => {
                assert_eq!(f.stream_id.value(), 1);
                assert!(f.end_stream);
                assert_eq!(&f.data[..], b"hello world");
            }
            other => panic!("expected DATA, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_headers_with_priority() {
        let decoded = roundtrip(Frame::Headers(HeadersFrame {
            stream_id: StreamId::new(3),
            end_stream: false,
            end_headers: true,
            priority: Some(Priority {
                exclusive: true,
                dependency: StreamId::new(1),
                weight: 200,
            }),
            header_block: Bytes::from_static(&[0x82, 0x87, 0x84]),
        }));

        match decoded {
            Frame::Headers(f) => {
                assert_eq!(f.stream_id.value(), 3);
                assert!(f.end_headers);
                let prio = f.priority.unwrap();
                assert!(prio.exclusive);
                assert_eq!(prio.dependency.value(), 1);
                assert_eq!(prio.weight, 200);
                assert_eq!(&f.header_block[..], &[0x82, 0x87, 0x84]);
            }
            other => panic!("expected HEADERS, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_priority() {
        let decoded = roundtrip(Frame::Priority(PriorityFrame {
            stream_id: StreamId::new(9),
            priority: Priority {
                exclusive: false,
                dependency: StreamId::new(7),
                weight: 16,
            },
        }));

        match decoded {
            Frame::Priority(f) => {
                assert_eq!(f.stream_id.value(), 9);
                assert!(!f.priority.exclusive);
                assert_eq!(f.priority.dependency.value(), 7);
            }
            other => panic!("expected PRIORITY, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_rst_stream() {
        let decoded = roundtrip(Frame::RstStream(RstStreamFrame {
            stream_id: StreamId::new(11),
            error_code: 8,
        }));

        match decoded {
            Frame::RstStream(f) => {
                assert_eq!(f.stream_id.value(), 11);
                assert_eq!(f.error_code, 8);
            }
            other => panic!("expected RST_STREAM, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_settings() {
        let decoded = roundtrip(Frame::Settings(SettingsFrame {
            ack: false,
            settings: vec![
                Setting {
                    id: SettingId::HeaderTableSize,
                    value: 8192,
                },
                Setting {
                    id: SettingId::MaxConcurrentStreams,
                    value: 100,
                },
            ],
        }));

        match decoded {
            Frame::Settings(f) => {
                assert!(!f.ack);
                assert_eq!(f.settings.len(), 2);
                assert_eq!(f.settings[0].id, SettingId::HeaderTableSize);
                assert_eq!(f.settings[0].value, 8192);
                assert_eq!(f.settings[1].id, SettingId::MaxConcurrentStreams);
                assert_eq!(f.settings[1].value, 100);
            }
            other => panic!("expected SETTINGS, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_settings_ack() {
        let decoded = roundtrip(Frame::Settings(SettingsFrame {
            ack: true,
            settings: vec![],
        }));

        match decoded {
            Frame::Settings(f) => {
                assert!(f.ack);
                assert!(f.settings.is_empty());
            }
            other => panic!("expected SETTINGS, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_push_promise() {
        let decoded = roundtrip(Frame::PushPromise(PushPromiseFrame {
            stream_id: StreamId::new(1),
            end_headers: true,
            promised_stream_id: StreamId::new(2),
            header_block: Bytes::from_static(&[0x82]),
        }));

        match decoded {
            Frame::PushPromise(f) => {
                assert_eq!(f.stream_id.value(), 1);
                assert_eq!(f.promised_stream_id.value(), 2);
                assert!(f.end_headers);
                assert_eq!(&f.header_block[..], &[0x82]);
            }
            other => panic!("expected PUSH_PROMISE, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_ping() {
        let decoded = roundtrip(Frame::Ping(PingFrame {
            ack: false,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        }));

        match decoded {
            Frame::Ping(f) => {
                assert!(!f.ack);
                assert_eq!(f.data, [1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("expected PING, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_goaway() {
        let decoded = roundtrip(Frame::GoAway(GoAwayFrame {
            last_stream_id: StreamId::new(10),
            error_code: 2,
            debug_data: Bytes::from_static(b"bye"),
        }));

        match decoded {
            Frame::GoAway(f) => {
                assert_eq!(f.last_stream_id.value(), 10);
                assert_eq!(f.error_code, 2);
                assert_eq!(&f.debug_data[..], b"bye");
            }
            other => panic!("expected GOAWAY, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_window_update() {
        let decoded = roundtrip(Frame::WindowUpdate(WindowUpdateFrame {
            stream_id: StreamId::CONNECTION,
            increment: 65_535,
        }));

        match decoded {
            Frame::WindowUpdate(f) => {
                assert_eq!(f.stream_id, StreamId::CONNECTION);
                assert_eq!(f.increment, 65_535);
            }
            other => panic!("expected WINDOW_UPDATE, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_continuation() {
        let decoded = roundtrip(Frame::Continuation(ContinuationFrame {
            stream_id: StreamId::new(5),
            end_headers: true,
            header_block: Bytes::from_static(&[0x86, 0x84]),
        }));

        match decoded {
            Frame::Continuation(f) => {
                assert_eq!(f.stream_id.value(), 5);
                assert!(f.end_headers);
                assert_eq!(&f.header_block[..], &[0x86, 0x84]);
            }
            other => panic!("expected CONTINUATION, got {:?}", other),
        }
    }

    #[test]
    fn test_roundtrip_unknown() {
        let decoded = roundtrip(Frame::Unknown(UnknownFrame {
            frame_type: 0xbe,
            flags: 0x55,
            stream_id: StreamId::new(19),
            payload: Bytes::from_static(&[9, 8, 7]),
        }));

        match decoded {
            Frame::Unknown(f) => {
                assert_eq!(f.frame_type, 0xbe);
                assert_eq!(f.flags, 0x55);
                assert_eq!(f.stream_id.value(), 19);
                assert_eq!(&f.payload[..], &[9, 8, 7]);
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_reserved_bit_never_written() {
        let encoder = FrameEncoder::new();
        let mut buf = BytesMut::new();
        encoder.write_rst_stream(StreamId(0xFFFF_FFFF), 0, &mut buf);

        // High bit of the stream id word must be clear on the wire
        assert_eq!(buf[5] & 0x80, 0);
    }
}
