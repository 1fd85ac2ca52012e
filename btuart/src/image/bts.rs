//! TI Bluetooth Script (BTS) conversion.
//!
//! TI distributes CC256x service packs as `.bts` files. Only the "send
//! command" actions carry data for the controller; they are stripped of
//! their H4 type byte and concatenated into a packed image
//! (see [`crate::image::script`]).
//!
//! ## Format
//!
//! ```text
//! +------------+-----------+---------------+
//! | magic (4B) | version   | reserved (24) |   header, 32 bytes
//! +------------+-----------+---------------+
//! | type (2B)  | size (2B) | data (size)   |   action, repeated
//! +------------+-----------+---------------+
//! ```
//!
//! All integers are little-endian.

use crate::error::{Error, Result};
use crate::image::script::{RECORD_HEADER_SIZE, TERMINATOR};
use crate::protocol::h4::packet_type;
use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace, warn};
use std::io::{Cursor, Read};

/// Header magic, "BTSB" read as little-endian.
pub const BTS_MAGIC: u32 = 0x42535442;

/// Header size: magic, version, 24 reserved bytes.
pub const BTS_HEADER_SIZE: usize = 32;

/// Action header size: type and size.
pub const ACTION_HEADER_SIZE: usize = 4;

/// BTS action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// H4 command to send to the controller.
    SendCommand,
    /// Event the host should wait for.
    WaitEvent,
    /// Host UART settings.
    Serial,
    /// Host-side delay.
    Delay,
    /// Nested script.
    RunScript,
    /// Free-form comment.
    Remarks,
    /// Anything else.
    Unknown(u16),
}

impl From<u16> for ActionType {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::SendCommand,
            2 => Self::WaitEvent,
            3 => Self::Serial,
            4 => Self::Delay,
            5 => Self::RunScript,
            6 => Self::Remarks,
            other => Self::Unknown(other),
        }
    }
}

/// One action of a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BtsAction<'a> {
    /// Action type.
    pub kind: ActionType,
    /// Offset of the action header in the file.
    pub offset: usize,
    /// Action payload.
    pub data: &'a [u8],
}

/// A parsed BTS file.
#[derive(Debug, Clone)]
pub struct BtsScript<'a> {
    /// Format version from the header.
    pub version: u32,
    /// Actions in file order.
    pub actions: Vec<BtsAction<'a>>,
}

/// Whether `data` starts with the BTS magic.
pub fn is_bts(data: &[u8]) -> bool {
    let mut cursor = Cursor::new(data);
    cursor
        .read_u32::<LittleEndian>()
        .is_ok_and(|magic| magic == BTS_MAGIC)
}

fn eof(what: &str, offset: usize) -> Error {
    Error::invalid_bts(format!("truncated {what} at offset {offset}"))
}

impl<'a> BtsScript<'a> {
    /// Parse a BTS file.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let magic = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| eof("header", 0))?;
        if magic != BTS_MAGIC {
            return Err(Error::invalid_bts(format!(
                "bad magic 0x{magic:08X}, expected 0x{BTS_MAGIC:08X}"
            )));
        }
        let version = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| eof("header", 4))?;
        let mut reserved = [0u8; BTS_HEADER_SIZE - 8];
        cursor
            .read_exact(&mut reserved)
            .map_err(|_| eof("header", 8))?;

        let mut actions = Vec::new();
        let mut offset = BTS_HEADER_SIZE;
        while offset < data.len() {
            cursor.set_position(offset as u64);
            let kind = cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| eof("action header", offset))?;
            let size = cursor
                .read_u16::<LittleEndian>()
                .map_err(|_| eof("action header", offset))?;

            let start = offset + ACTION_HEADER_SIZE;
            let end = start + usize::from(size);
            let payload = data.get(start..end).ok_or_else(|| eof("action", offset))?;

            actions.push(BtsAction {
                kind: ActionType::from(kind),
                offset,
                data: payload,
            });
            offset = end;
        }

        debug!("Parsed BTS v{version} with {} actions", actions.len());
        Ok(Self { version, actions })
    }

    /// Number of send-command actions.
    pub fn command_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionType::SendCommand)
            .count()
    }

    /// Build the packed, terminated image from the send-command actions.
    pub fn to_image(&self) -> Result<Vec<u8>> {
        let mut image = Vec::new();

        for action in &self.actions {
            match action.kind {
                ActionType::SendCommand => {
                    let record = command_record(action)?;
                    trace!(
                        "BTS command @{:#06x}: {} bytes",
                        action.offset,
                        record.len()
                    );
                    image.extend_from_slice(record);
                },
                ActionType::Remarks => {
                    let text = String::from_utf8_lossy(action.data);
                    debug!("BTS remark: {}", text.trim_end_matches('\0').trim());
                },
                ActionType::WaitEvent
                | ActionType::Serial
                | ActionType::Delay
                | ActionType::RunScript => {
                    debug!(
                        "Skipping BTS {:?} action @{:#06x}",
                        action.kind, action.offset
                    );
                },
                ActionType::Unknown(kind) => {
                    warn!(
                        "Skipping unknown BTS action type {kind} @{:#06x}",
                        action.offset
                    );
                },
            }
        }

        image.push(TERMINATOR);
        Ok(image)
    }
}

/// Validate a send-command action and return it without the H4 type byte.
fn command_record<'a>(action: &BtsAction<'a>) -> Result<&'a [u8]> {
    let data = action.data;
    if data.len() < 1 + RECORD_HEADER_SIZE {
        return Err(Error::invalid_bts(format!(
            "command @{:#06x} too short ({} bytes)",
            action.offset,
            data.len()
        )));
    }
    if data[0] != packet_type::COMMAND {
        return Err(Error::invalid_bts(format!(
            "command @{:#06x} has packet type 0x{:02X}",
            action.offset, data[0]
        )));
    }
    let record = &data[1..];
    let expected = usize::from(record[2]) + RECORD_HEADER_SIZE;
    if record.len() != expected {
        return Err(Error::invalid_bts(format!(
            "command @{:#06x} length byte says {expected} bytes, action holds {}",
            action.offset,
            record.len()
        )));
    }
    if record[0] == TERMINATOR {
        return Err(Error::invalid_bts(format!(
            "command @{:#06x} opcode 0x{:02X}{:02X} cannot be packed (low byte is the terminator)",
            action.offset, record[1], record[0]
        )));
    }
    Ok(record)
}

/// Convert a BTS file into a packed image.
pub fn convert(data: &[u8]) -> Result<Vec<u8>> {
    BtsScript::parse(data)?.to_image()
}
