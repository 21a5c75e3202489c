//! HTTP/2 frame decoding.

use bytes::{Buf, Bytes, BytesMut};

use super::error::FrameError;
use super::types::*;
use super::{DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE, flags};

/// Frame decoder that parses HTTP/2 frames from an append-only byte buffer.
pub struct FrameDecoder {
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Create a new frame decoder with default settings.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Set the maximum frame size we accept (our SETTINGS_MAX_FRAME_SIZE).
    pub fn set_max_frame_size(&mut self, size: u32) {
        self.max_frame_size = size;
    }

    /// Try to decode one frame from the buffer.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on a protocol error.
    /// A complete-but-invalid frame is consumed from the buffer before the
    /// error is returned, so stream-scoped failures do not poison the
    /// frames behind them.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let header = peek_header(buf);

        if header.length > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: header.length,
                max: self.max_frame_size,
            });
        }

        let total_len = FRAME_HEADER_SIZE + header.length as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(header.length as usize).freeze();

        self.parse_frame(header, payload).map(Some)
    }

    /// Parse a frame given its header and complete payload.
    fn parse_frame(&self, header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
        match FrameType::from_u8(header.frame_type) {
            Some(FrameType::Data) => parse_data(header, payload),
            Some(FrameType::Headers) => parse_headers(header, payload),
            Some(FrameType::Priority) => parse_priority(header, payload),
            Some(FrameType::RstStream) => parse_rst_stream(header, payload),
            Some(FrameType::Settings) => parse_settings(header, payload),
            Some(FrameType::PushPromise) => parse_push_promise(header, payload),
            Some(FrameType::Ping) => parse_ping(header, payload),
            Some(FrameType::GoAway) => parse_goaway(header, payload),
            Some(FrameType::WindowUpdate) => parse_window_update(header, payload),
            Some(FrameType::Continuation) => parse_continuation(header, payload),
            None => Ok(Frame::Unknown(UnknownFrame {
                frame_type: header.frame_type,
                flags: header.flags,
                stream_id: header.stream_id,
                payload,
            })),
        }
    }
}

/// Read the 9-byte frame header at the start of the buffer.
fn peek_header(buf: &[u8]) -> FrameHeader {
    debug_assert!(buf.len() >= FRAME_HEADER_SIZE);

    // Length is 24 bits, big-endian
    let length = ((buf[0] as u32) << 16) | ((buf[1] as u32) << 8) | (buf[2] as u32);
    let frame_type = buf[3];
    let flags = buf[4];
    // Stream ID is 31 bits, big-endian; StreamId::new drops the reserved bit
    let stream_id = StreamId::new(u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]));

    FrameHeader {
        length,
        frame_type,
        flags,
        stream_id,
    }
}

fn require_stream(header: &FrameHeader) -> Result<(), FrameError> {
    if header.stream_id.is_connection_level() {
        return Err(FrameError::StreamIdRequired {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

fn require_connection(header: &FrameHeader) -> Result<(), FrameError> {
    if !header.stream_id.is_connection_level() {
        return Err(FrameError::ConnectionScopeRequired {
            frame_type: header.frame_type,
        });
    }
    Ok(())
}

fn parse_data(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    let data = if header.has_flag(flags::PADDED) {
        strip_padding(payload)?
    } else {
        payload
    };

    Ok(Frame::Data(DataFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        data,
    }))
}

fn parse_headers(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    let mut payload = if header.has_flag(flags::PADDED) {
        strip_padding(payload)?
    } else {
        payload
    };

    let priority = if header.has_flag(flags::PRIORITY) {
        if payload.len() < 5 {
            return Err(FrameError::PayloadSize {
                frame_type: header.frame_type,
                expected: 5,
                actual: payload.len(),
            });
        }
        Some(read_priority(&mut payload))
    } else {
        None
    };

    Ok(Frame::Headers(HeadersFrame {
        stream_id: header.stream_id,
        end_stream: header.has_flag(flags::END_STREAM),
        end_headers: header.has_flag(flags::END_HEADERS),
        priority,
        header_block: payload,
    }))
}

fn read_priority(payload: &mut Bytes) -> Priority {
    let word = payload.get_u32();
    Priority {
        exclusive: word & 0x8000_0000 != 0,
        dependency: StreamId::new(word & 0x7FFF_FFFF),
        weight: payload.get_u8(),
    }
}

fn parse_priority(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    if payload.len() != 5 {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: 5,
            actual: payload.len(),
        });
    }

    Ok(Frame::Priority(PriorityFrame {
        stream_id: header.stream_id,
        priority: read_priority(&mut payload),
    }))
}

fn parse_rst_stream(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    if payload.len() != 4 {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: 4,
            actual: payload.len(),
        });
    }

    Ok(Frame::RstStream(RstStreamFrame {
        stream_id: header.stream_id,
        error_code: payload.get_u32(),
    }))
}

fn parse_settings(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;

    let ack = header.has_flag(flags::ACK);

    // An ACK carries no payload (RFC 7540 Section 6.5)
    if ack && !payload.is_empty() {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: 0,
            actual: payload.len(),
        });
    }

    if payload.len() % 6 != 0 {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: (payload.len() / 6) * 6,
            actual: payload.len(),
        });
    }

    let mut settings = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        let id = SettingId::from_u16(payload.get_u16());
        let value = payload.get_u32();
        validate_setting(id, value)?;
        settings.push(Setting { id, value });
    }

    Ok(Frame::Settings(SettingsFrame { ack, settings }))
}

fn validate_setting(id: SettingId, value: u32) -> Result<(), FrameError> {
    let valid = match id {
        SettingId::EnablePush => value <= 1,
        SettingId::InitialWindowSize => value <= 0x7FFF_FFFF,
        SettingId::MaxFrameSize => (16_384..=16_777_215).contains(&value),
        _ => true,
    };

    if valid {
        Ok(())
    } else {
        Err(FrameError::BadSettingValue {
            id: id.to_u16(),
            value,
        })
    }
}

fn parse_push_promise(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    let mut payload = if header.has_flag(flags::PADDED) {
        strip_padding(payload)?
    } else {
        payload
    };

    if payload.len() < 4 {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: 4,
            actual: payload.len(),
        });
    }

    let promised_stream_id = StreamId::new(payload.get_u32());

    Ok(Frame::PushPromise(PushPromiseFrame {
        stream_id: header.stream_id,
        end_headers: header.has_flag(flags::END_HEADERS),
        promised_stream_id,
        header_block: payload,
    }))
}

fn parse_ping(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;

    if payload.len() != 8 {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: 8,
            actual: payload.len(),
        });
    }

    let mut data = [0u8; 8];
    data.copy_from_slice(&payload[..8]);

    Ok(Frame::Ping(PingFrame {
        ack: header.has_flag(flags::ACK),
        data,
    }))
}

fn parse_goaway(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    require_connection(&header)?;

    if payload.len() < 8 {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: 8,
            actual: payload.len(),
        });
    }

    let last_stream_id = StreamId::new(payload.get_u32());
    let error_code = payload.get_u32();

    Ok(Frame::GoAway(GoAwayFrame {
        last_stream_id,
        error_code,
        debug_data: payload,
    }))
}

fn parse_window_update(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    if payload.len() != 4 {
        return Err(FrameError::PayloadSize {
            frame_type: header.frame_type,
            expected: 4,
            actual: payload.len(),
        });
    }

    let increment = payload.get_u32() & 0x7FFF_FFFF;

    // A zero increment is a protocol error; the scope (stream vs
    // connection) is carried so the engine can apply RST_STREAM or
    // GOAWAY accordingly (RFC 7540 Section 6.9).
    if increment == 0 {
        return Err(FrameError::ZeroWindowIncrement {
            stream_id: header.stream_id,
        });
    }

    Ok(Frame::WindowUpdate(WindowUpdateFrame {
        stream_id: header.stream_id,
        increment,
    }))
}

fn parse_continuation(header: FrameHeader, payload: Bytes) -> Result<Frame, FrameError> {
    require_stream(&header)?;

    Ok(Frame::Continuation(ContinuationFrame {
        stream_id: header.stream_id,
        end_headers: header.has_flag(flags::END_HEADERS),
        header_block: payload,
    }))
}

/// Strip the pad length prefix and trailing padding from a padded payload.
fn strip_padding(mut payload: Bytes) -> Result<Bytes, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::BadPadding {
            pad_length: 0,
            payload_length: 0,
        });
    }

    let pad_length = payload.get_u8() as usize;

    // Padding longer than the rest of the payload is invalid
    if pad_length > payload.len() {
        return Err(FrameError::BadPadding {
            pad_length: pad_length as u8,
            payload_length: payload.len() + 1,
        });
    }

    let data_len = payload.len() - pad_length;
    Ok(payload.slice(..data_len))
}
