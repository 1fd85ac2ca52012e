//! # btuart
//!
//! A library for bringing up UART-attached TI CC256x Bluetooth controllers.
//!
//! Before a CC256x can be used by a Bluetooth host stack it has to be patched
//! with two vendor init scripts: the baseband service pack and the BLE
//! add-on. This crate provides:
//!
//! - H4 framed I/O that completes partial UART transfers and detects stalls
//! - Packed init-script decoding and TI `.bts` conversion
//! - The upload state machine with bounded event reception
//! - A driver object handed to the host stack once both images are loaded
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via `serialport`
//!
//! ## Example
//!
//! ```rust,no_run
//! use btuart::{FirmwareImage, FirmwareLoader, FirmwareSet, NativePort, SerialConfig, image};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let baseband = image::normalize(std::fs::read("TIInit_6.12.26.bts")?)?;
//!     let ble = image::normalize(std::fs::read("cc256x_ble.bin")?)?;
//!     let firmware = FirmwareSet::new(
//!         FirmwareImage::new("baseband", &baseband),
//!         FirmwareImage::new("ble", &ble),
//!     );
//!
//!     let mut port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115200))?;
//!     FirmwareLoader::new(&mut port).load_all(&firmware, &mut |name, done, total| {
//!         println!("{name}: {done}/{total}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod driver;
pub mod error;
pub mod image;
pub mod loader;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker consulted between init-script records.
///
/// The checker should return `true` when the current upload should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    driver::{BtDriver, BtUartDriver, ControlRequest, DriverBuilder, HEADER_RESERVE, create},
    error::{Error, ErrorKind, Result},
    image::{FirmwareImage, ImageSummary, MIN_IMAGE_SIZE, Record, RecordInfo},
    loader::{FirmwareLoader, FirmwareSet, LoadReport, LoaderConfig},
    port::{DEFAULT_BAUD, FlowControl, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{PacketType, ResponseBuffer, TransferConfig},
};
