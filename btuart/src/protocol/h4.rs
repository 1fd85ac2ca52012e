//! H4 (UART HCI) framing and exact-length transfers.
//!
//! Every packet on the wire is prefixed with a single packet type byte:
//!
//! ```text
//! Command:  [0x01][opcode lo][opcode hi][param len][params...]
//! Event:    [0x04][event code][param len][params...]
//! ```
//!
//! The transport may accept or return fewer bytes than requested per call.
//! [`send_exact`] and [`receive_exact`] loop until the whole buffer has been
//! transferred, and fail with [`Error::TransportStalled`] once the transport
//! stops making progress.

use crate::error::{Error, Result};
use log::trace;
use std::fmt;
use std::io::{ErrorKind, Read, Write};

/// Bytes an upper layer must reserve in front of a payload for the H4 type byte.
pub const HEADER_SIZE: usize = 1;

/// H4 packet type bytes.
pub mod packet_type {
    /// HCI command packet.
    pub const COMMAND: u8 = 0x01;
    /// ACL data packet.
    pub const ACL_DATA: u8 = 0x02;
    /// SCO data packet.
    pub const SCO_DATA: u8 = 0x03;
    /// HCI event packet.
    pub const EVENT: u8 = 0x04;
}

/// H4 packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// HCI command (host to controller).
    Command = packet_type::COMMAND,
    /// ACL data.
    AclData = packet_type::ACL_DATA,
    /// SCO data.
    ScoData = packet_type::SCO_DATA,
    /// HCI event (controller to host).
    Event = packet_type::EVENT,
}

impl PacketType {
    /// Wire value of this packet type.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            packet_type::COMMAND => Ok(Self::Command),
            packet_type::ACL_DATA => Ok(Self::AclData),
            packet_type::SCO_DATA => Ok(Self::ScoData),
            packet_type::EVENT => Ok(Self::Event),
            other => Err(Error::protocol(format!(
                "unknown H4 packet type 0x{other:02X}"
            ))),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::AclData => write!(f, "ACL data"),
            Self::ScoData => write!(f, "SCO data"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// Tuning for exact-length transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    /// Consecutive calls without progress tolerated before giving up.
    ///
    /// A call without progress is `Ok(0)`, `TimedOut` or `WouldBlock`. With a
    /// one second port timeout the default gives the controller about three
    /// seconds to answer. Zero fails on the first stalled call.
    pub max_stalls: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self { max_stalls: 3 }
    }
}

impl TransferConfig {
    /// Set the stall limit.
    #[must_use]
    pub fn with_max_stalls(mut self, max_stalls: u32) -> Self {
        self.max_stalls = max_stalls;
        self
    }
}

/// Tracks consecutive calls that moved no bytes.
struct StallGuard<'a> {
    config: &'a TransferConfig,
    stalls: u32,
}

impl<'a> StallGuard<'a> {
    fn new(config: &'a TransferConfig) -> Self {
        Self { config, stalls: 0 }
    }

    fn progress(&mut self) {
        self.stalls = 0;
    }

    fn stalled(&mut self, done: usize, total: usize) -> Result<()> {
        self.stalls += 1;
        if self.stalls > self.config.max_stalls {
            return Err(Error::TransportStalled {
                stalls: self.stalls,
                done,
                total,
            });
        }
        trace!("No progress ({}/{}), {done}/{total} bytes", self.stalls, self.config.max_stalls);
        Ok(())
    }
}

fn is_stall(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::TimedOut | ErrorKind::WouldBlock)
}

/// Write every byte of `buf`, looping over partial writes.
pub fn send_exact<W: Write + ?Sized>(port: &mut W, buf: &[u8], config: &TransferConfig) -> Result<()> {
    let total = buf.len();
    let mut done = 0;
    let mut guard = StallGuard::new(config);

    while done < total {
        match port.write(&buf[done..]) {
            Ok(0) => guard.stalled(done, total)?,
            Ok(n) => {
                done += n.min(total - done);
                guard.progress();
            },
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) if is_stall(e.kind()) => guard.stalled(done, total)?,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    port.flush()?;
    trace!("TX {buf:02X?}");
    Ok(())
}

/// Fill all of `buf`, looping over partial reads.
pub fn receive_exact<R: Read + ?Sized>(
    port: &mut R,
    buf: &mut [u8],
    config: &TransferConfig,
) -> Result<()> {
    let total = buf.len();
    let mut done = 0;
    let mut guard = StallGuard::new(config);

    while done < total {
        match port.read(&mut buf[done..]) {
            Ok(0) => guard.stalled(done, total)?,
            Ok(n) => {
                done += n.min(total - done);
                guard.progress();
            },
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) if is_stall(e.kind()) => guard.stalled(done, total)?,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    trace!("RX {buf:02X?}");
    Ok(())
}

/// Send one H4 packet as two exact writes: the type byte, then the body.
pub fn send_packet<W: Write + ?Sized>(
    port: &mut W,
    packet_type: PacketType,
    body: &[u8],
    config: &TransferConfig,
) -> Result<()> {
    send_exact(port, &[packet_type.as_byte()], config)?;
    send_exact(port, body, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;

    /// Port that moves at most `chunk` bytes per call and counts calls.
    struct TrickleSerial {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
        chunk: usize,
        reads: usize,
        writes: usize,
    }

    impl TrickleSerial {
        fn new(response: &[u8], chunk: usize) -> Self {
            Self {
                read_buf: response.iter().copied().collect(),
                write_buf: Vec::new(),
                chunk,
                reads: 0,
                writes: 0,
            }
        }
    }

    impl Read for TrickleSerial {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.reads += 1;
            if self.read_buf.is_empty() {
                return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.chunk).min(self.read_buf.len());
            for b in buf.iter_mut().take(n) {
                *b = self.read_buf.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for TrickleSerial {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes += 1;
            let n = buf.len().min(self.chunk);
            self.write_buf.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Port whose write/read results are scripted call by call.
    struct ScriptedSerial {
        writes: VecDeque<io::Result<usize>>,
        reads: VecDeque<io::Result<usize>>,
    }

    impl Write for ScriptedSerial {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.writes.pop_front().unwrap_or(Ok(0))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Read for ScriptedSerial {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let result = self.reads.pop_front().unwrap_or(Ok(0));
            if let Ok(n) = result {
                buf[..n].fill(0xAB);
            }
            result
        }
    }

    #[test]
    fn test_send_exact_one_byte_per_call() {
        let mut port = TrickleSerial::new(&[], 1);
        let data = [0x01, 0x37, 0xFE, 0x02, 0x06, 0x09];

        send_exact(&mut port, &data, &TransferConfig::default()).unwrap();

        assert_eq!(port.writes, data.len());
        assert_eq!(port.write_buf, data);
    }

    #[test]
    fn test_receive_exact_one_byte_per_call() {
        let response = [0x04, 0x0E, 0x04, 0x01, 0x37, 0xFE, 0x00];
        let mut port = TrickleSerial::new(&response, 1);
        let mut buf = [0u8; 7];

        receive_exact(&mut port, &mut buf, &TransferConfig::default()).unwrap();

        assert_eq!(port.reads, response.len());
        assert_eq!(buf, response);
    }

    #[test]
    fn test_receive_exact_leaves_rest_unread() {
        let mut port = TrickleSerial::new(&[1, 2, 3, 4, 5], 64);
        let mut buf = [0u8; 3];

        receive_exact(&mut port, &mut buf, &TransferConfig::default()).unwrap();

        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(port.read_buf, [4, 5]);
    }

    #[test]
    fn test_empty_transfer_makes_no_calls() {
        let mut port = TrickleSerial::new(&[], 1);
        send_exact(&mut port, &[], &TransferConfig::default()).unwrap();
        receive_exact(&mut port, &mut [], &TransferConfig::default()).unwrap();
        assert_eq!(port.writes, 0);
        assert_eq!(port.reads, 0);
    }

    #[test]
    fn test_receive_timeout_becomes_stall_error() {
        let mut port = TrickleSerial::new(&[0x04], 1);
        let mut buf = [0u8; 3];
        let config = TransferConfig::default().with_max_stalls(2);

        let err = receive_exact(&mut port, &mut buf, &config).unwrap_err();

        match err {
            Error::TransportStalled {
                stalls,
                done,
                total,
            } => {
                assert_eq!(stalls, 3);
                assert_eq!(done, 1);
                assert_eq!(total, 3);
            },
            other => panic!("unexpected error: {other:?}"),
        }
        // one successful read plus three stalled ones
        assert_eq!(port.reads, 4);
    }

    #[test]
    fn test_zero_write_fails_immediately_with_zero_limit() {
        let mut port = ScriptedSerial {
            writes: VecDeque::from([Ok(0)]),
            reads: VecDeque::new(),
        };
        let config = TransferConfig::default().with_max_stalls(0);

        let err = send_exact(&mut port, &[1, 2, 3], &config).unwrap_err();
        assert!(matches!(err, Error::TransportStalled { stalls: 1, .. }));
    }

    #[test]
    fn test_progress_resets_stall_count() {
        let mut port = ScriptedSerial {
            writes: VecDeque::from([Ok(0), Ok(1), Ok(0), Ok(1), Ok(0), Ok(1)]),
            reads: VecDeque::new(),
        };
        let config = TransferConfig::default().with_max_stalls(1);

        send_exact(&mut port, &[1, 2, 3], &config).unwrap();
    }

    #[test]
    fn test_interrupted_is_retried() {
        let mut port = ScriptedSerial {
            writes: VecDeque::new(),
            reads: VecDeque::from([
                Err(io::Error::from(ErrorKind::Interrupted)),
                Err(io::Error::from(ErrorKind::Interrupted)),
                Ok(2),
            ]),
        };
        let mut buf = [0u8; 2];
        let config = TransferConfig::default().with_max_stalls(0);

        receive_exact(&mut port, &mut buf, &config).unwrap();
        assert_eq!(buf, [0xAB, 0xAB]);
    }

    #[test]
    fn test_hard_io_error_propagates() {
        let mut port = ScriptedSerial {
            writes: VecDeque::from([Err(io::Error::from(ErrorKind::BrokenPipe))]),
            reads: VecDeque::new(),
        };

        let err = send_exact(&mut port, &[1], &TransferConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Io(ref e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[test]
    fn test_send_packet_prefixes_type_byte() {
        let mut port = TrickleSerial::new(&[], 2);

        send_packet(
            &mut port,
            PacketType::Command,
            &[0x03, 0x0C, 0x00],
            &TransferConfig::default(),
        )
        .unwrap();

        assert_eq!(port.write_buf, [0x01, 0x03, 0x0C, 0x00]);
    }

    #[test]
    fn test_packet_type_from_byte() {
        assert_eq!(PacketType::try_from(0x04).unwrap(), PacketType::Event);
        assert_eq!(PacketType::Command.as_byte(), 0x01);
        assert!(PacketType::try_from(0x07).is_err());
    }
}
