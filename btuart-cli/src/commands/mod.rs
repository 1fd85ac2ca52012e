//! Command implementations.
//!
//! Each subcommand is implemented in its own module.

pub(crate) mod completions;
pub(crate) mod convert;
pub(crate) mod info;
pub(crate) mod load;
pub(crate) mod ports;

use anyhow::{Context, Result};
use btuart::image;
use std::fs;
use std::path::Path;

/// Read an init script from disk, converting `.bts` input to a packed image.
pub(crate) fn read_image(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    image::normalize(data).with_context(|| format!("Failed to decode {}", path.display()))
}

/// Display name for an image file.
pub(crate) fn image_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
