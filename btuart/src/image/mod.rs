//! Firmware image formats.
//!
//! - [`script`]: packed, zero-terminated command record images (what the
//!   loader sends)
//! - [`bts`]: TI Bluetooth Script files, convertible to packed images

pub mod bts;
pub mod script;

pub use script::{FirmwareImage, ImageSummary, MIN_IMAGE_SIZE, Record, RecordInfo, Records};

use crate::error::Result;
use log::debug;

/// Accept either a BTS file or an already packed image and return packed bytes.
pub fn normalize(data: Vec<u8>) -> Result<Vec<u8>> {
    if bts::is_bts(&data) {
        debug!("Converting BTS script ({} bytes)", data.len());
        bts::convert(&data)
    } else {
        Ok(data)
    }
}
