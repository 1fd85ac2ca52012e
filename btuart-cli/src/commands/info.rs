//! Init script inspection.

use anyhow::{Context, Result};
use btuart::image::bts::{self, BtsScript};
use btuart::{FirmwareImage, ImageSummary, MIN_IMAGE_SIZE};
use console::style;
use std::fs;
use std::path::Path;

use super::image_name;

/// Container details for `.bts` input.
struct BtsDetails {
    version: u32,
    actions: usize,
    commands: usize,
}

fn inspect(path: &Path) -> Result<(ImageSummary, Option<BtsDetails>)> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let (packed, details) = if bts::is_bts(&raw) {
        let script = BtsScript::parse(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let details = BtsDetails {
            version: script.version,
            actions: script.actions.len(),
            commands: script.command_count(),
        };
        (script.to_image()?, Some(details))
    } else {
        (raw, None)
    };

    let name = image_name(path);
    let summary = FirmwareImage::new(&name, &packed)
        .summary()
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    Ok((summary, details))
}

/// Info command implementation.
pub(crate) fn cmd_info(path: &Path, json: bool) -> Result<()> {
    let (summary, details) = inspect(path)?;

    if json {
        let records: Vec<serde_json::Value> = summary
            .records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "offset": r.offset,
                    "opcode": format!("0x{:04X}", r.opcode),
                    "param_len": r.param_len,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "name": summary.name,
                "format": if details.is_some() { "bts" } else { "packed" },
                "bts_version": details.as_ref().map(|d| d.version),
                "len": summary.len,
                "loadable": summary.len >= MIN_IMAGE_SIZE,
                "terminator_offset": summary.terminator_offset,
                "payload_bytes": summary.payload_bytes(),
                "trailing_bytes": summary.trailing_bytes(),
                "records": records,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", style(&summary.name).bold().underlined());
    if let Some(d) = &details {
        println!(
            "  Format:      TI BTS v{} ({} actions, {} commands)",
            d.version, d.actions, d.commands
        );
    } else {
        println!("  Format:      packed");
    }
    println!("  Size:        {} bytes", summary.len);
    println!("  Records:     {}", summary.records.len());
    println!("  Payload:     {} bytes", summary.payload_bytes());
    if summary.trailing_bytes() > 0 {
        println!(
            "  Trailing:    {} bytes after terminator (ignored)",
            summary.trailing_bytes()
        );
    }
    if summary.len < MIN_IMAGE_SIZE {
        println!(
            "  {} shorter than {MIN_IMAGE_SIZE} bytes, treated as missing firmware",
            style("!").yellow().bold()
        );
    }

    println!();
    println!("  {:>8}  {:>6}  {:>5}", "OFFSET", "OPCODE", "LEN");
    for record in &summary.records {
        println!(
            "  {:>#8x}  0x{:04X}  {:>5}",
            record.offset, record.opcode, record.param_len
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bts_file() -> Vec<u8> {
        let mut out = 0x42535442u32.to_le_bytes().to_vec();
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&[0u8; 24]);
        // remark
        out.extend_from_slice(&6u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(b"hi\0\0");
        // HCI_VS_Write_BD_Addr-like command
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&6u16.to_le_bytes());
        out.extend_from_slice(&[0x01, 0x36, 0xFF, 0x02, 0xAA, 0xBB]);
        out
    }

    #[test]
    fn test_inspect_bts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.bts");
        fs::write(&path, bts_file()).unwrap();

        let (summary, details) = inspect(&path).unwrap();
        let details = details.unwrap();
        assert_eq!(details.version, 2);
        assert_eq!(details.actions, 2);
        assert_eq!(details.commands, 1);
        assert_eq!(summary.name, "init.bts");
        assert_eq!(summary.records.len(), 1);
        assert_eq!(summary.records[0].opcode, 0xFF36);
        assert_eq!(summary.payload_bytes(), 2);
    }

    #[test]
    fn test_inspect_packed_with_trailing_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ble.bin");
        fs::write(&path, [0x03, 0x0C, 0x00, 0x00, 0xEE, 0xEE]).unwrap();

        let (summary, details) = inspect(&path).unwrap();
        assert!(details.is_none());
        assert_eq!(summary.terminator_offset, 3);
        assert_eq!(summary.trailing_bytes(), 2);
    }

    #[test]
    fn test_inspect_unterminated_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.bin");
        fs::write(&path, [0x03, 0x0C, 0x04, 0x01]).unwrap();

        assert!(inspect(&path).is_err());
    }
}
