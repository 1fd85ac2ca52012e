//! Bounded HCI event reception.
//!
//! The controller acknowledges each init-script command with an event frame
//! whose length byte is device-controlled. Frames are received into a fixed
//! [`ResponseBuffer`] that refuses any write past its capacity.
//!
//! ```text
//! +------+------------+-----+------------------+
//! | 0x04 | event code | len |  params (len)    |
//! +------+------------+-----+------------------+
//! ```

use crate::error::{Error, Result};
use crate::protocol::h4::{TransferConfig, packet_type, receive_exact};
use std::io::Read;

/// Capacity of the response buffer used while loading firmware.
pub const RESPONSE_CAPACITY: usize = 32;

/// Size of the event frame header: type, event code, parameter length.
pub const EVENT_HEADER_SIZE: usize = 3;

/// Fixed-capacity receive buffer with checked appends.
#[derive(Debug, Clone)]
pub struct ResponseBuffer<const N: usize = RESPONSE_CAPACITY> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> Default for ResponseBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ResponseBuffer<N> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            buf: [0u8; N],
            len: 0,
        }
    }

    /// Total capacity in bytes.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Bytes filled so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been received yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Filled part of the buffer.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Forget the contents.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Extend the filled region by `count` bytes and return it for writing.
    ///
    /// Fails with [`Error::ResponseOverflow`] and leaves the buffer untouched
    /// when `len + count` exceeds the capacity.
    pub fn grow(&mut self, count: usize) -> Result<&mut [u8]> {
        let needed = self.len.saturating_add(count);
        if needed > N {
            return Err(Error::ResponseOverflow {
                needed,
                capacity: N,
            });
        }
        let start = self.len;
        self.len = needed;
        Ok(&mut self.buf[start..needed])
    }
}

/// A received event, borrowed from its [`ResponseBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFrame<'a> {
    /// HCI event code.
    pub code: u8,
    /// Event parameters.
    pub params: &'a [u8],
}

/// Receive one event frame into `response`.
///
/// The type byte is read first and must be [`packet_type::EVENT`]; anything
/// else is a protocol error and nothing further is read. The parameter
/// length is checked against the buffer before any parameter byte is read.
pub fn read_event<'b, R: Read + ?Sized, const N: usize>(
    port: &mut R,
    response: &'b mut ResponseBuffer<N>,
    config: &TransferConfig,
) -> Result<EventFrame<'b>> {
    response.clear();

    receive_exact(port, response.grow(1)?, config)?;
    let kind = response.as_slice()[0];
    if kind != packet_type::EVENT {
        return Err(Error::protocol(format!(
            "expected event packet 0x{:02X}, got 0x{kind:02X}",
            packet_type::EVENT
        )));
    }

    receive_exact(port, response.grow(2)?, config)?;
    let param_len = usize::from(response.as_slice()[2]);
    receive_exact(port, response.grow(param_len)?, config)?;

    let frame = response.as_slice();
    Ok(EventFrame {
        code: frame[1],
        params: &frame[EVENT_HEADER_SIZE..],
    })
}
