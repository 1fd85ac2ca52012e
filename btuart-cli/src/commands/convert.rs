//! `.bts` to packed image conversion.

use anyhow::{Context, Result};
use btuart::FirmwareImage;
use btuart::image::bts;
use console::style;
use std::fs;
use std::path::Path;

use crate::{Cli, CliError};

/// Convert command implementation.
pub(crate) fn cmd_convert(cli: &Cli, input: &Path, output: &Path) -> Result<()> {
    let raw = fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    if !bts::is_bts(&raw) {
        return Err(CliError::Usage(format!(
            "{} is not a TI BTS file",
            input.display()
        ))
        .into());
    }

    let packed =
        bts::convert(&raw).with_context(|| format!("Failed to convert {}", input.display()))?;
    let records = FirmwareImage::new("converted", &packed).validate()?;

    fs::write(output, &packed)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Wrote {} records ({} bytes) to {}",
            style("✓").green().bold(),
            records,
            packed.len(),
            style(output.display()).yellow()
        );
    }

    Ok(())
}
