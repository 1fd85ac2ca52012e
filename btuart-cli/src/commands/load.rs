//! Firmware upload.

use anyhow::{Context, Result};
use btuart::{
    BtDriver, DriverBuilder, FirmwareImage, FirmwareSet, LoaderConfig, MIN_IMAGE_SIZE, NativePort,
    SerialConfig, TransferConfig,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use std::path::Path;

use super::{image_name, read_image};
use crate::config::Config;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

const BASEBAND: &str = "baseband";
const EXTENSION: &str = "extension";

fn resolve<'a>(flag: Option<&'a Path>, configured: Option<&'a Path>, what: &str) -> Result<&'a Path> {
    flag.or(configured).ok_or_else(|| {
        CliError::Usage(format!(
            "no {what} image given; use --{what} or [firmware] {what} in btuart.toml"
        ))
        .into()
    })
}

/// Load command implementation.
pub(crate) fn cmd_load(
    cli: &Cli,
    config: &Config,
    baseband: Option<&Path>,
    extension: Option<&Path>,
    max_stalls: Option<u32>,
) -> Result<()> {
    let baseband_path = resolve(baseband, config.firmware.baseband.as_deref(), BASEBAND)?;
    let extension_path = resolve(extension, config.firmware.extension.as_deref(), EXTENSION)?;

    let baseband_data = read_image(baseband_path)?;
    let extension_data = read_image(extension_path)?;
    let firmware = FirmwareSet::new(
        FirmwareImage::new(BASEBAND, &baseband_data),
        FirmwareImage::new(EXTENSION, &extension_data),
    );

    // Reject bad images before touching the port.
    let [baseband_records, extension_records] = firmware.check(MIN_IMAGE_SIZE)?;

    if !cli.quiet {
        for (path, records) in [
            (baseband_path, baseband_records),
            (extension_path, extension_records),
        ] {
            eprintln!(
                "{} {} ({records} records)",
                style("•").dim(),
                image_name(path)
            );
        }
    }

    let conn = cli.connection(config)?;
    let serial = SerialConfig::new(&conn.port, conn.baud).with_flow_control(conn.flow_control);
    let port = NativePort::open(&serial)
        .with_context(|| format!("Failed to open serial port {}", conn.port))?;
    info!(
        "Opened {} at {} baud ({:?} flow control)",
        conn.port, conn.baud, conn.flow_control
    );

    let mut transfer = TransferConfig::default();
    if let Some(stalls) = max_stalls.or(config.firmware.max_stalls) {
        transfer = transfer.with_max_stalls(stalls);
    }

    let total = baseband_records + extension_records;
    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg:<10} [{bar:40.cyan/blue}] {pos}/{len} records")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    };

    let mut on_progress = |name: &str, done: usize, _total: usize| {
        let base = if name == EXTENSION { baseband_records } else { 0 };
        pb.set_message(name.to_string());
        pb.set_position((base + done) as u64);
    };

    let result = DriverBuilder::new()
        .transport(port)
        .firmware(firmware)
        .config(LoaderConfig::default().with_transfer(transfer))
        .progress(&mut on_progress)
        .build();

    let mut driver = match result {
        Ok(driver) => driver,
        Err(e) => {
            pb.abandon();
            if was_interrupted() {
                return Err(CliError::Cancelled("upload interrupted".to_string()).into());
            }
            return Err(e).context("Firmware upload failed");
        },
    };
    pb.finish_and_clear();

    for report in driver.load_reports() {
        debug!(
            "{}: {} records, {} bytes",
            report.image, report.records, report.bytes_sent
        );
    }
    driver.close()?;

    if !cli.quiet {
        eprintln!(
            "{} Controller {} ready ({total} records loaded)",
            style("✓").green().bold(),
            style(&conn.port).cyan()
        );
    }

    Ok(())
}
