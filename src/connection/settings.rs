//! HTTP/2 connection settings and SETTINGS ACK bookkeeping.

use std::collections::VecDeque;
use std::time::Instant;

use crate::frame::{self, Setting, SettingId};

/// HTTP/2 connection settings.
///
/// One instance tracks what we advertise to the peer (local), another
/// what the peer advertised to us (remote).
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Maximum number of concurrent streams.
    pub max_concurrent_streams: u32,
    /// Initial per-stream window size.
    pub initial_window_size: u32,
    /// Maximum frame size.
    pub max_frame_size: u32,
    /// Maximum decoded header list size.
    pub max_header_list_size: u32,
    /// HPACK header table size.
    pub header_table_size: u32,
    /// Whether server push is allowed.
    pub enable_push: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: frame::DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: frame::DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: frame::DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 16_384,
            header_table_size: frame::DEFAULT_HEADER_TABLE_SIZE,
            enable_push: false, // Clients normally refuse server push
        }
    }
}

impl ConnectionSettings {
    /// Create new settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrent streams.
    pub fn max_concurrent_streams(mut self, value: u32) -> Self {
        self.max_concurrent_streams = value;
        self
    }

    /// Set initial window size.
    pub fn initial_window_size(mut self, value: u32) -> Self {
        self.initial_window_size = value;
        self
    }

    /// Set maximum frame size.
    pub fn max_frame_size(mut self, value: u32) -> Self {
        self.max_frame_size = value;
        self
    }

    /// Set maximum header list size.
    pub fn max_header_list_size(mut self, value: u32) -> Self {
        self.max_header_list_size = value;
        self
    }

    /// Set header table size.
    pub fn header_table_size(mut self, value: u32) -> Self {
        self.header_table_size = value;
        self
    }

    /// Allow or refuse server push.
    pub fn enable_push(mut self, value: bool) -> Self {
        self.enable_push = value;
        self
    }

    /// The wire form of these settings for a SETTINGS frame.
    pub fn to_wire(&self) -> Vec<Setting> {
        vec![
            Setting {
                id: SettingId::HeaderTableSize,
                value: self.header_table_size,
            },
            Setting {
                id: SettingId::EnablePush,
                value: u32::from(self.enable_push),
            },
            Setting {
                id: SettingId::MaxConcurrentStreams,
                value: self.max_concurrent_streams,
            },
            Setting {
                id: SettingId::InitialWindowSize,
                value: self.initial_window_size,
            },
            Setting {
                id: SettingId::MaxFrameSize,
                value: self.max_frame_size,
            },
            Setting {
                id: SettingId::MaxHeaderListSize,
                value: self.max_header_list_size,
            },
        ]
    }
}

/// Bookkeeping for SETTINGS frames we sent that the peer has not
/// acknowledged yet (RFC 7540 Section 6.5.3).
///
/// Local settings only take effect once acknowledged, and an ACK that
/// never comes must surface as SETTINGS_TIMEOUT.
#[derive(Debug, Default)]
pub(crate) struct SettingsSync {
    sent: VecDeque<(Vec<Setting>, Instant)>,
}

impl SettingsSync {
    /// Record a SETTINGS frame sent at `now`.
    pub fn sent(&mut self, settings: Vec<Setting>, now: Instant) {
        self.sent.push_back((settings, now));
    }

    /// Consume the oldest unacknowledged frame; returns its settings so
    /// the caller can put them into effect.
    pub fn acked(&mut self) -> Option<Vec<Setting>> {
        self.sent.pop_front().map(|(settings, _)| settings)
    }

    /// When the oldest unacknowledged SETTINGS frame was sent.
    pub fn oldest_sent_at(&self) -> Option<Instant> {
        self.sent.front().map(|(_, at)| *at)
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.sent.len()
    }
}
