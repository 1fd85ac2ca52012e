//! UART Bluetooth driver object.
//!
//! A [`BtUartDriver`] is only handed out after both init-script images have
//! been accepted by the controller. It implements [`BtDriver`], the
//! capability set a Bluetooth host stack needs from its transport: open,
//! send, close and control.
//!
//! ## Example
//!
//! ```rust,no_run
//! use btuart::{BtDriver, DriverBuilder, FirmwareImage, FirmwareSet, NativePort, PacketType, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let baseband = std::fs::read("cc256x_bt.bin")?;
//!     let ble = std::fs::read("cc256x_ble.bin")?;
//!     let firmware = FirmwareSet::new(
//!         FirmwareImage::new("baseband", &baseband),
//!         FirmwareImage::new("ble", &ble),
//!     );
//!
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     let mut driver = DriverBuilder::new()
//!         .transport(port)
//!         .firmware(firmware)
//!         .build()?;
//!
//!     driver.open()?;
//!     // HCI_Reset
//!     driver.send(PacketType::Command, &[0x03, 0x0C, 0x00])?;
//!     driver.close()?;
//!     Ok(())
//! }
//! ```

use crate::error::{Error, Result};
use crate::loader::{FirmwareLoader, FirmwareSet, LoadReport, LoaderConfig};
use crate::port::Port;
use crate::protocol::h4::{self, PacketType, TransferConfig, send_exact};
use log::{debug, error, info};
use std::time::Duration;

/// Bytes reserved in front of every outgoing payload for the H4 type byte.
pub const HEADER_RESERVE: usize = h4::HEADER_SIZE;

/// Initial size of the driver's outgoing frame buffer.
const FRAME_CAPACITY: usize = HEADER_RESERVE + 1024;

/// Control requests accepted by [`BtDriver::control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Switch the host UART to a new baud rate.
    SetBaudRate(u32),
    /// Change the port read/write timeout.
    SetTimeout(Duration),
    /// Drop any buffered input and output.
    ClearBuffers,
}

/// Transport capabilities a Bluetooth host stack drives.
pub trait BtDriver {
    /// Bytes the caller should reserve in front of payloads.
    fn head_reserve(&self) -> usize {
        HEADER_RESERVE
    }

    /// Prepare the transport for traffic. Fails once the transport was released.
    fn open(&mut self) -> Result<()>;

    /// Send one packet; returns the payload length.
    fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<usize>;

    /// Stop traffic and release the transport.
    fn close(&mut self) -> Result<()>;

    /// Apply a transport-specific control request on an open driver.
    fn control(&mut self, request: ControlRequest) -> Result<()>;
}

/// H4 driver over a [`Port`] whose controller has been patched.
pub struct BtUartDriver<P: Port> {
    port: P,
    frame: Vec<u8>,
    transfer: TransferConfig,
    reports: Vec<LoadReport>,
    is_open: bool,
    released: bool,
}

impl<P: Port> BtUartDriver<P> {
    /// Whether [`BtDriver::open`] has been called without a later close.
    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Per-image results of the firmware upload.
    pub fn load_reports(&self) -> &[LoadReport] {
        &self.reports
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the driver and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open {
            Ok(())
        } else {
            Err(not_connected("driver is not open"))
        }
    }
}

impl<P: Port> BtDriver for BtUartDriver<P> {
    fn open(&mut self) -> Result<()> {
        if self.released {
            return Err(not_connected("transport was released by close"));
        }
        debug!("Opening driver on {}", self.port.name());
        self.port.clear_buffers()?;
        self.is_open = true;
        Ok(())
    }

    fn send(&mut self, packet_type: PacketType, payload: &[u8]) -> Result<usize> {
        self.ensure_open()?;

        self.frame.clear();
        self.frame.try_reserve(HEADER_RESERVE + payload.len())?;
        self.frame.push(packet_type.as_byte());
        self.frame.extend_from_slice(payload);

        send_exact(&mut self.port, &self.frame, &self.transfer)?;
        Ok(payload.len())
    }

    fn close(&mut self) -> Result<()> {
        debug!("Closing driver on {}", self.port.name());
        self.is_open = false;
        self.released = true;
        self.port.close()
    }

    fn control(&mut self, request: ControlRequest) -> Result<()> {
        self.ensure_open()?;
        debug!("Control request {request:?}");
        match request {
            ControlRequest::SetBaudRate(baud) => self.port.set_baud_rate(baud),
            ControlRequest::SetTimeout(timeout) => self.port.set_timeout(timeout),
            ControlRequest::ClearBuffers => self.port.clear_buffers(),
        }
    }
}

fn not_connected(msg: &str) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, msg))
}

/// Builds a [`BtUartDriver`] by uploading firmware over the given port.
pub struct DriverBuilder<'a, P: Port> {
    transport: Option<P>,
    firmware: Option<FirmwareSet<'a>>,
    config: LoaderConfig,
    progress: Option<&'a mut dyn FnMut(&str, usize, usize)>,
}

impl<P: Port> Default for DriverBuilder<'_, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, P: Port> DriverBuilder<'a, P> {
    /// Start an empty builder.
    pub fn new() -> Self {
        Self {
            transport: None,
            firmware: None,
            config: LoaderConfig::default(),
            progress: None,
        }
    }

    /// Transport to the controller.
    #[must_use]
    pub fn transport(mut self, port: P) -> Self {
        self.transport = Some(port);
        self
    }

    /// Images to upload.
    #[must_use]
    pub fn firmware(mut self, firmware: FirmwareSet<'a>) -> Self {
        self.firmware = Some(firmware);
        self
    }

    /// Loader settings.
    #[must_use]
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Progress callback `(image name, records done, records total)`.
    #[must_use]
    pub fn progress(mut self, progress: &'a mut dyn FnMut(&str, usize, usize)) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Upload the firmware and produce the driver.
    ///
    /// Nothing is returned unless both images load completely. On failure
    /// the transport and every buffer built so far are dropped.
    pub fn build(self) -> Result<BtUartDriver<P>> {
        let Some(mut port) = self.transport else {
            error!("No transport provided");
            return Err(Error::NoTransport);
        };
        info!("Creating UART Bluetooth driver on {}", port.name());

        let Some(firmware) = self.firmware else {
            return Err(Error::Config("no firmware images supplied".into()));
        };

        let mut frame = Vec::new();
        if let Err(e) = frame.try_reserve(FRAME_CAPACITY) {
            error!("Failed to allocate driver state");
            return Err(e.into());
        }

        let mut silent = |_: &str, _: usize, _: usize| {};
        let progress: &mut (dyn FnMut(&str, usize, usize) + 'a) = match self.progress {
            Some(progress) => progress,
            None => &mut silent,
        };

        let reports = FirmwareLoader::with_config(&mut port, self.config)
            .load_all(&firmware, progress)
            .inspect_err(|e| error!("Firmware error: {e}"))?;

        Ok(BtUartDriver {
            port,
            frame,
            transfer: self.config.transfer,
            reports,
            is_open: false,
            released: false,
        })
    }
}

/// Upload `firmware` over `port` with default settings and return the driver.
pub fn create<P: Port>(port: P, firmware: FirmwareSet<'_>) -> Result<BtUartDriver<P>> {
    DriverBuilder::new()
        .transport(port)
        .firmware(firmware)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::image::FirmwareImage;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};

    /// Mock port that records every write and control call.
    #[derive(Default)]
    struct MockPort {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
        baud_rate: u32,
        timeout: Duration,
        clears: usize,
        closed: bool,
    }

    impl MockPort {
        fn new(response: &[u8]) -> Self {
            Self {
                read_buf: response.iter().copied().collect(),
                baud_rate: 115200,
                ..Self::default()
            }
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.read_buf.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.read_buf.len());
            for b in buf.iter_mut().take(n) {
                *b = self.read_buf.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn timeout(&self) -> Duration {
            self.timeout
        }

        fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
            self.baud_rate = baud_rate;
            Ok(())
        }

        fn baud_rate(&self) -> u32 {
            self.baud_rate
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.clears += 1;
            Ok(())
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    const BASEBAND: &[u8] = &[0x36, 0xFF, 0x07, 1, 2, 3, 4, 5, 6, 7, 0x00];
    const EXTENSION: &[u8] = &[0x5B, 0xFD, 0x07, 7, 6, 5, 4, 3, 2, 1, 0x00];
    const ACKS: &[u8] = &[0x04, 0x0E, 0x00, 0x04, 0x0E, 0x00];

    fn firmware() -> FirmwareSet<'static> {
        FirmwareSet::new(
            FirmwareImage::new("baseband", BASEBAND),
            FirmwareImage::new("ble", EXTENSION),
        )
    }

    fn loaded_driver() -> BtUartDriver<MockPort> {
        create(MockPort::new(ACKS), firmware()).unwrap()
    }

    #[test]
    fn test_build_uploads_both_images() {
        let driver = loaded_driver();

        assert_eq!(driver.load_reports().len(), 2);
        assert_eq!(driver.port().write_buf.len(), 22);
        assert_eq!(driver.port().write_buf[0], 0x01);
        assert_eq!(driver.port().write_buf[11], 0x01);
        assert!(!driver.is_open());
        assert_eq!(driver.head_reserve(), 1);
    }

    #[test]
    fn test_build_without_transport() {
        let err = DriverBuilder::<MockPort>::new()
            .firmware(firmware())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::NoTransport));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_build_without_firmware() {
        let err = DriverBuilder::new()
            .transport(MockPort::new(ACKS))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_build_fails_on_bad_event() {
        let err = create(MockPort::new(&[0x02, 0x0E, 0x00]), firmware())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[test]
    fn test_build_fails_on_placeholder_firmware() {
        let firmware = FirmwareSet::new(
            FirmwareImage::new("baseband", BASEBAND),
            FirmwareImage::new("ble", &[0x00]),
        );
        let err = create(MockPort::new(ACKS), firmware).err().unwrap();
        assert!(matches!(err, Error::FirmwareMissing { .. }));
    }

    #[test]
    fn test_build_reports_progress() {
        let mut calls = Vec::new();
        let mut record = |name: &str, done: usize, total: usize| {
            calls.push(format!("{name}:{done}/{total}"));
        };

        DriverBuilder::new()
            .transport(MockPort::new(ACKS))
            .firmware(firmware())
            .progress(&mut record)
            .build()
            .unwrap();

        assert_eq!(calls, ["baseband:1/1", "ble:1/1"]);
    }

    #[test]
    fn test_send_requires_open() {
        let mut driver = loaded_driver();
        let err = driver
            .send(PacketType::Command, &[0x03, 0x0C, 0x00])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_send_prefixes_packet_type() {
        let mut driver = loaded_driver();
        driver.open().unwrap();
        assert_eq!(driver.port().clears, 1);

        let sent = driver
            .send(PacketType::AclData, &[0x01, 0x20, 0x02, 0x00, 0xAA, 0xBB])
            .unwrap();

        assert_eq!(sent, 6);
        let port = driver.into_port();
        assert_eq!(
            port.write_buf[22..],
            [0x02, 0x01, 0x20, 0x02, 0x00, 0xAA, 0xBB]
        );
    }

    #[test]
    fn test_control_and_close() {
        let mut driver = loaded_driver();
        driver.open().unwrap();

        driver.control(ControlRequest::SetBaudRate(921_600)).unwrap();
        driver
            .control(ControlRequest::SetTimeout(Duration::from_millis(250)))
            .unwrap();
        driver.control(ControlRequest::ClearBuffers).unwrap();
        driver.close().unwrap();

        assert!(!driver.is_open());
        let port = driver.into_port();
        assert_eq!(port.baud_rate, 921_600);
        assert_eq!(port.timeout, Duration::from_millis(250));
        assert_eq!(port.clears, 2);
        assert!(port.closed);
    }

    #[test]
    fn test_closed_driver_rejects_control_and_reopen() {
        let mut driver = loaded_driver();
        driver.open().unwrap();
        driver.close().unwrap();

        let err = driver
            .control(ControlRequest::SetBaudRate(921_600))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(driver.open().is_err());
        assert!(!driver.is_open());

        let port = driver.into_port();
        assert_eq!(port.baud_rate, 115200);
        assert_eq!(port.clears, 1);
    }

    #[test]
    fn test_control_requires_open() {
        let mut driver = loaded_driver();
        assert!(driver.control(ControlRequest::ClearBuffers).is_err());
        assert_eq!(driver.port().clears, 0);
    }
}
