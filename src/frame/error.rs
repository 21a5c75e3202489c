//! HTTP/2 error codes and frame-level errors.

use std::fmt;

use super::types::{SettingId, StreamId};

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// Graceful shutdown.
    NoError = 0x0,
    /// Protocol error detected.
    ProtocolError = 0x1,
    /// Implementation fault.
    InternalError = 0x2,
    /// Flow control limits exceeded.
    FlowControlError = 0x3,
    /// Settings not acknowledged in time.
    SettingsTimeout = 0x4,
    /// Frame received for a closed stream.
    StreamClosed = 0x5,
    /// Frame size incorrect.
    FrameSizeError = 0x6,
    /// Stream not processed.
    RefusedStream = 0x7,
    /// Stream cancelled.
    Cancel = 0x8,
    /// Compression state not updated.
    CompressionError = 0x9,
    /// TCP connection error for CONNECT.
    ConnectError = 0xa,
    /// Processing capacity exceeded.
    EnhanceYourCalm = 0xb,
    /// Negotiated TLS requirements not met.
    InadequateSecurity = 0xc,
    /// HTTP/1.1 required.
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Self {
        match code {
            0x0 => ErrorCode::NoError,
            0x1 => ErrorCode::ProtocolError,
            0x2 => ErrorCode::InternalError,
            0x3 => ErrorCode::FlowControlError,
            0x4 => ErrorCode::SettingsTimeout,
            0x5 => ErrorCode::StreamClosed,
            0x6 => ErrorCode::FrameSizeError,
            0x7 => ErrorCode::RefusedStream,
            0x8 => ErrorCode::Cancel,
            0x9 => ErrorCode::CompressionError,
            0xa => ErrorCode::ConnectError,
            0xb => ErrorCode::EnhanceYourCalm,
            0xc => ErrorCode::InadequateSecurity,
            0xd => ErrorCode::Http11Required,
            // Unknown error codes are treated as INTERNAL_ERROR
            _ => ErrorCode::InternalError,
        }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NoError => "NO_ERROR",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::FlowControlError => "FLOW_CONTROL_ERROR",
            ErrorCode::SettingsTimeout => "SETTINGS_TIMEOUT",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::FrameSizeError => "FRAME_SIZE_ERROR",
            ErrorCode::RefusedStream => "REFUSED_STREAM",
            ErrorCode::Cancel => "CANCEL",
            ErrorCode::CompressionError => "COMPRESSION_ERROR",
            ErrorCode::ConnectError => "CONNECT_ERROR",
            ErrorCode::EnhanceYourCalm => "ENHANCE_YOUR_CALM",
            ErrorCode::InadequateSecurity => "INADEQUATE_SECURITY",
            ErrorCode::Http11Required => "HTTP_1_1_REQUIRED",
        };
        f.write_str(name)
    }
}

/// The blast radius of a protocol violation.
///
/// Stream-scoped errors reset one stream and leave the connection up;
/// connection-scoped errors tear the whole connection down with GOAWAY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The whole connection is affected.
    Connection,
    /// Only the named stream is affected.
    Stream(StreamId),
}

/// Frame parsing/encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("frame type 0x{frame_type:02x} requires a non-zero stream id")]
    StreamIdRequired { frame_type: u8 },
    #[error("frame type 0x{frame_type:02x} is only valid on stream 0")]
    ConnectionScopeRequired { frame_type: u8 },
    #[error("frame type 0x{frame_type:02x} expects {expected} payload bytes, got {actual}")]
    PayloadSize {
        frame_type: u8,
        expected: usize,
        actual: usize,
    },
    #[error("pad length {pad_length} does not fit in a payload of {payload_length} bytes")]
    BadPadding {
        pad_length: u8,
        payload_length: usize,
    },
    #[error("setting 0x{id:04x} has invalid value {value}")]
    BadSettingValue { id: u16, value: u32 },
    #[error("WINDOW_UPDATE with zero increment on stream {stream_id}")]
    ZeroWindowIncrement { stream_id: StreamId },
}

impl FrameError {
    /// The RFC 7540 error code this failure maps to on the wire.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FrameError::FrameTooLarge { .. } | FrameError::PayloadSize { .. } => {
                ErrorCode::FrameSizeError
            }
            FrameError::BadSettingValue { id, .. }
                if SettingId::from_u16(*id) == SettingId::InitialWindowSize =>
            {
                ErrorCode::FlowControlError
            }
            _ => ErrorCode::ProtocolError,
        }
    }

    /// Whether this failure condemns the connection or a single stream.
    pub fn scope(&self) -> ErrorScope {
        match self {
            FrameError::ZeroWindowIncrement { stream_id } if !stream_id.is_connection_level() => {
                ErrorScope::Stream(*stream_id)
            }
            _ => ErrorScope::Connection,
        }
    }
}
