//! HTTP/2 flow control
//!
//! This module implements flow control as defined in RFC 9113 Section 5.2.
//!
//! HTTP/2 uses flow control to prevent senders from overwhelming receivers
//! with data. Flow control is applied at both the connection and stream level,
//! and in both directions: the send window is credit the peer granted us, the
//! receive window is credit we granted the peer.

use super::error::{Error, Result};
use super::settings::MAX_WINDOW_SIZE;
use super::DEFAULT_INITIAL_WINDOW_SIZE;

/// Flow control window
///
/// Tracks the available window size in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowControlWindow {
    /// Initial window size
    initial_size: u32,
    /// Current window size (negative after SETTINGS shrank an in-use window)
    size: i64,
}

impl FlowControlWindow {
    /// Create a new flow control window with default size
    pub fn new() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Create a new flow control window with specified initial size
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            size: initial_size as i64,
        }
    }

    /// Get current window size
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Get initial window size
    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    /// Bytes that may be sent right now
    pub fn available(&self) -> usize {
        self.size.max(0) as usize
    }

    /// Check if window has available capacity
    pub fn has_capacity(&self) -> bool {
        self.size > 0
    }

    /// Take up to `amount` bytes of credit; returns what was granted
    pub fn consume(&mut self, amount: usize) -> usize {
        let granted = amount.min(self.available());
        self.size -= granted as i64;
        granted
    }

    /// Add WINDOW_UPDATE credit, returning the new window size
    ///
    /// A zero increment is a PROTOCOL_ERROR; a window pushed past 2^31-1 is a
    /// FLOW_CONTROL_ERROR. The caller decides whether that is connection- or
    /// stream-scoped.
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol(
                "WINDOW_UPDATE increment must be non-zero".to_string(),
            ));
        }

        let new_size = self.size + increment as i64;
        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "Window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.size = new_size;
        Ok(self.size)
    }

    /// Charge received bytes against the window
    ///
    /// The peer may never send more than the credit we granted.
    pub fn decrease_recv(&mut self, amount: usize) -> Result<()> {
        if amount as i64 > self.size {
            return Err(Error::FlowControl(format!(
                "Received {} bytes with only {} bytes of window",
                amount, self.size
            )));
        }
        self.size -= amount as i64;
        Ok(())
    }

    /// Update initial window size from SETTINGS
    ///
    /// Shifts the current size by the difference; the result may be negative.
    pub fn update_initial_size(&mut self, new_initial_size: u32) -> Result<()> {
        let diff = new_initial_size as i64 - self.initial_size as i64;
        let new_size = self.size + diff;

        if new_size > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl(format!(
                "New window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }

        self.initial_size = new_initial_size;
        self.size = new_size;
        Ok(())
    }

    /// WINDOW_UPDATE increment due once the window fell below half its
    /// initial size; the window is credited with it
    pub fn take_update(&mut self) -> Option<u32> {
        let initial = self.initial_size as i64;
        if self.size >= initial / 2 {
            return None;
        }
        let increment = (initial - self.size) as u32;
        self.size = initial;
        Some(increment)
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::new()
    }
}

/// Send and receive windows of one flow-controlled entity
/// (the connection, or one stream)
#[derive(Debug, Clone, Default)]
pub struct FlowControl {
    /// Credit granted to us by the peer
    send: FlowControlWindow,
    /// Credit we granted to the peer
    recv: FlowControlWindow,
}

impl FlowControl {
    /// Create with specified initial window sizes
    pub fn new(send_size: u32, recv_size: u32) -> Self {
        FlowControl {
            send: FlowControlWindow::with_initial_size(send_size),
            recv: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    /// Get send window
    pub fn send_window(&self) -> &FlowControlWindow {
        &self.send
    }

    /// Get mutable send window
    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send
    }

    /// Get receive window
    pub fn recv_window(&self) -> &FlowControlWindow {
        &self.recv
    }

    /// Get mutable receive window
    pub fn recv_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.recv
    }
}
