//! Init-script upload.
//!
//! The loader walks a packed image record by record. Each record is sent as
//! an H4 command frame, then the loader blocks until the controller answers
//! with an H4 event frame:
//!
//! ```text
//!            +-----------------+
//!   start -->| check terminator|--- 0x00 ---> done
//!            +--------+--------+
//!                     | opcode byte
//!                     v
//!            +-----------------+
//!            | send 0x01+record|
//!            +--------+--------+
//!                     v
//!            +-----------------+
//!            | await 0x04 event|--- other type / overflow ---> failed
//!            +--------+--------+
//!                     | advance by param_len + 3
//!                     +------------> check terminator
//! ```
//!
//! Only the event type byte is checked. The event is not matched against
//! the opcode that was sent. There is no retry: the first failure aborts the
//! whole upload and the controller must be reset before trying again.

use crate::error::{Error, Result};
use crate::image::script::{FirmwareImage, MIN_IMAGE_SIZE, Record};
use crate::protocol::event::{ResponseBuffer, read_event};
use crate::protocol::h4::{PacketType, TransferConfig, send_packet};
use log::{debug, error, info, trace};
use std::io::{Read, Write};

/// Loader settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Exact-transfer settings for every frame.
    pub transfer: TransferConfig,
    /// Images shorter than this are treated as not embedded.
    pub min_image_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            transfer: TransferConfig::default(),
            min_image_size: MIN_IMAGE_SIZE,
        }
    }
}

impl LoaderConfig {
    /// Set the transfer settings.
    #[must_use]
    pub fn with_transfer(mut self, transfer: TransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Set the presence-check threshold.
    #[must_use]
    pub fn with_min_image_size(mut self, min_image_size: usize) -> Self {
        self.min_image_size = min_image_size;
        self
    }
}

/// The two images a CC256x needs: baseband service pack, then the BLE add-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareSet<'a> {
    /// Bluetooth baseband init script, loaded first.
    pub baseband: FirmwareImage<'a>,
    /// Low-energy / host-stack extension, loaded second.
    pub extension: FirmwareImage<'a>,
}

impl<'a> FirmwareSet<'a> {
    /// Pair a baseband and an extension image.
    pub fn new(baseband: FirmwareImage<'a>, extension: FirmwareImage<'a>) -> Self {
        Self {
            baseband,
            extension,
        }
    }

    /// Images in load order.
    pub fn images(&self) -> [FirmwareImage<'a>; 2] {
        [self.baseband, self.extension]
    }

    /// Presence check and structural validation of both images.
    ///
    /// Runs entirely in memory; nothing has been sent when this fails.
    /// Returns the record count of each image in load order.
    pub fn check(&self, min_image_size: usize) -> Result<[usize; 2]> {
        for image in self.images() {
            image.check_present(min_image_size)?;
        }
        let mut counts = [0; 2];
        for (count, image) in counts.iter_mut().zip(self.images()) {
            *count = image.validate()?;
            debug!(
                "Image '{}': {} bytes, {count} records",
                image.name(),
                image.len()
            );
        }
        Ok(counts)
    }
}

/// Outcome of one image load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Image name.
    pub image: String,
    /// Command frames sent and acknowledged.
    pub records: usize,
    /// Bytes written, type bytes included.
    pub bytes_sent: usize,
}

/// Uploads images over an exclusively borrowed port.
pub struct FirmwareLoader<'p, P: Read + Write + ?Sized> {
    port: &'p mut P,
    config: LoaderConfig,
    interrupted: &'p dyn Fn() -> bool,
}

impl<'p, P: Read + Write + ?Sized> FirmwareLoader<'p, P> {
    /// Create a loader with default settings.
    pub fn new(port: &'p mut P) -> Self {
        Self::with_config(port, LoaderConfig::default())
    }

    /// Create a loader with custom settings.
    pub fn with_config(port: &'p mut P, config: LoaderConfig) -> Self {
        Self {
            port,
            config,
            interrupted: &crate::is_interrupted_requested,
        }
    }

    /// Replace the global interruption checker for this loader.
    #[must_use]
    pub fn with_interrupt(mut self, interrupted: &'p dyn Fn() -> bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Loader settings.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Check both images, then load the baseband image and the extension.
    ///
    /// `progress` receives `(image name, records done, records total)`.
    pub fn load_all(
        &mut self,
        firmware: &FirmwareSet<'_>,
        progress: &mut dyn FnMut(&str, usize, usize),
    ) -> Result<Vec<LoadReport>> {
        let counts = firmware.check(self.config.min_image_size)?;

        let mut reports = Vec::with_capacity(2);
        for (image, total) in firmware.images().into_iter().zip(counts) {
            reports.push(self.load_checked(image, total, progress)?);
        }

        info!(
            "Firmware loaded: {} records",
            reports.iter().map(|r| r.records).sum::<usize>()
        );
        Ok(reports)
    }

    /// Load a single image up to its terminator.
    pub fn load_image(
        &mut self,
        image: FirmwareImage<'_>,
        progress: &mut dyn FnMut(&str, usize, usize),
    ) -> Result<LoadReport> {
        let total = image.validate()?;
        self.load_checked(image, total, progress)
    }

    /// Load an image already validated to hold `total` records.
    fn load_checked(
        &mut self,
        image: FirmwareImage<'_>,
        total: usize,
        progress: &mut dyn FnMut(&str, usize, usize),
    ) -> Result<LoadReport> {
        info!("Loading '{}' ({total} records)", image.name());

        let mut response: ResponseBuffer = ResponseBuffer::new();
        let mut bytes_sent = 0;

        for (index, record) in image.records().enumerate() {
            let record = record?;
            if (self.interrupted)() {
                return Err(Error::Interrupted);
            }

            if let Err(e) = self.load_record(&record, &mut response) {
                error!(
                    "'{}' record {}/{total} (opcode 0x{:04X}) failed: {e}",
                    image.name(),
                    index + 1,
                    record.opcode
                );
                return Err(e);
            }

            bytes_sent += record.wire_len() + 1;
            progress(image.name(), index + 1, total);
        }

        debug!("'{}' done, {bytes_sent} bytes sent", image.name());
        Ok(LoadReport {
            image: image.name().to_string(),
            records: total,
            bytes_sent,
        })
    }

    /// Send one record and wait for its event.
    pub fn load_record<const N: usize>(
        &mut self,
        record: &Record<'_>,
        response: &mut ResponseBuffer<N>,
    ) -> Result<()> {
        trace!(
            "Sending opcode 0x{:04X} ({} parameter bytes) @{:#06x}",
            record.opcode,
            record.params.len(),
            record.offset
        );
        send_packet(
            &mut *self.port,
            PacketType::Command,
            record.bytes,
            &self.config.transfer,
        )?;

        let event = read_event(&mut *self.port, response, &self.config.transfer)?;
        trace!(
            "Event 0x{:02X} with {} parameter bytes",
            event.code,
            event.params.len()
        );
        Ok(())
    }
}
