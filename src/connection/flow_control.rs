//! HTTP/2 flow control windows.

/// Flow control state for one scope (the connection, or a single stream).
///
/// HTTP/2 flow control is credit based and applies only to DATA payload
/// octets. Each scope carries two independent windows:
///
/// - `send_window`: how much the peer will accept from us. Grows on
///   inbound WINDOW_UPDATE, shrinks when we emit DATA. May go negative
///   after a SETTINGS_INITIAL_WINDOW_SIZE decrease (RFC 7540 §6.9.2).
/// - `recv_window`: how much we allow the peer to send. Shrinks on
///   inbound DATA and is replenished with outbound WINDOW_UPDATE frames
///   once it drops below half of the initial value.
#[derive(Debug)]
pub struct FlowControl {
    /// Credit the peer has granted us.
    send_window: i32,
    /// Credit we have granted the peer.
    recv_window: i32,
    /// Initial receive window, the replenish target.
    initial_recv_window: u32,
}

impl FlowControl {
    /// Create flow control state with the given initial windows.
    pub fn new(initial_send_window: u32, initial_recv_window: u32) -> Self {
        Self {
            send_window: initial_send_window as i32,
            recv_window: initial_recv_window as i32,
            initial_recv_window,
        }
    }

    /// Current send window.
    pub fn send_window(&self) -> i32 {
        self.send_window
    }

    /// Current receive window.
    pub fn recv_window(&self) -> i32 {
        self.recv_window
    }

    /// Credit available for sending right now (never negative).
    pub fn send_capacity(&self) -> u32 {
        self.send_window.max(0) as u32
    }

    /// Account for `n` DATA payload bytes we sent.
    pub fn reserve_send(&mut self, n: u32) {
        debug_assert!(n <= self.send_capacity());
        self.send_window -= n as i32;
    }

    /// Grow the send window from an inbound WINDOW_UPDATE.
    ///
    /// Fails if the window would exceed 2^31 - 1, which the peer must
    /// treat as FLOW_CONTROL_ERROR at this scope (RFC 7540 §6.9.1).
    pub fn grow_send(&mut self, increment: u32) -> Result<(), WindowOverflow> {
        let grown = i64::from(self.send_window) + i64::from(increment);
        if grown > i64::from(i32::MAX) {
            return Err(WindowOverflow);
        }
        self.send_window = grown as i32;
        Ok(())
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE delta to the send window.
    /// The result may be negative.
    pub fn adjust_send(&mut self, delta: i32) {
        self.send_window = self.send_window.saturating_add(delta);
    }

    /// Account for `n` DATA payload bytes received.
    ///
    /// Returns false if the peer overran the window we granted.
    #[must_use]
    pub fn record_recv(&mut self, n: u32) -> bool {
        self.recv_window -= n as i32;
        self.recv_window >= 0
    }

    /// The WINDOW_UPDATE increment to send, if the receive window has
    /// fallen below half of its initial value. Restores the window to the
    /// initial value.
    pub fn replenish(&mut self) -> Option<u32> {
        let threshold = (self.initial_recv_window / 2) as i32;
        if self.recv_window >= threshold {
            return None;
        }

        let increment = self.initial_recv_window as i32 - self.recv_window;
        self.recv_window = self.initial_recv_window as i32;
        Some(increment as u32)
    }
}

/// A send window was pushed past 2^31 - 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("flow control window overflow")]
pub struct WindowOverflow;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_windows() {
        let fc = FlowControl::new(65_535, 65_535);
        assert_eq!(fc.send_window(), 65_535);
        assert_eq!(fc.recv_window(), 65_535);
        assert_eq!(fc.send_capacity(), 65_535);
    }

    #[test]
    fn test_reserve_and_grow_send() {
        let mut fc = FlowControl::new(65_535, 65_535);

        fc.reserve_send(30_000);
        assert_eq!(fc.send_window(), 35_535);

        fc.grow_send(10_000).unwrap();
        assert_eq!(fc.send_window(), 45_535);
    }

    #[test]
    fn test_grow_send_overflow() {
        let mut fc = FlowControl::new(0x7FFF_FFFF, 65_535);
        assert_eq!(fc.grow_send(1), Err(WindowOverflow));

        // An update that stays exactly at the limit is fine
        let mut fc = FlowControl::new(0x7FFF_FFFE, 65_535);
        assert!(fc.grow_send(1).is_ok());
        assert_eq!(fc.send_window(), 0x7FFF_FFFF);
    }

    #[test]
    fn test_adjust_send_can_go_negative() {
        let mut fc = FlowControl::new(65_535, 65_535);
        fc.reserve_send(60_000);

        // Peer shrinks INITIAL_WINDOW_SIZE by 30000
        fc.adjust_send(-30_000);
        assert_eq!(fc.send_window(), -24_465);
        assert_eq!(fc.send_capacity(), 0);

        // WINDOW_UPDATE digs it back out
        fc.grow_send(30_000).unwrap();
        assert_eq!(fc.send_window(), 5_535);
    }

    #[test]
    fn test_recv_accounting() {
        let mut fc = FlowControl::new(65_535, 65_535);

        assert!(fc.record_recv(1_000));
        assert_eq!(fc.recv_window(), 64_535);
    }

    #[test]
    fn test_recv_overrun_detected() {
        let mut fc = FlowControl::new(65_535, 10);
        assert!(!fc.record_recv(11));
    }

    #[test]
    fn test_replenish_below_half() {
        let mut fc = FlowControl::new(65_535, 65_535);

        // Above half: no update yet
        assert!(fc.record_recv(30_000));
        assert_eq!(fc.replenish(), None);

        // Below half: replenish back to the initial window
        assert!(fc.record_recv(10_000));
        assert_eq!(fc.replenish(), Some(40_000));
        assert_eq!(fc.recv_window(), 65_535);
        assert_eq!(fc.replenish(), None);
    }
}
