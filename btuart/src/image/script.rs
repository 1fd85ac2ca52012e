//! Packed init-script images.
//!
//! An image is a flat run of HCI command records closed by a single zero
//! byte where the next opcode's low byte would start:
//!
//! ```text
//! +-----------+-----------+-----+-------------+     +------+
//! | opcode lo | opcode hi | len | params(len) | ... | 0x00 |
//! +-----------+-----------+-----+-------------+     +------+
//! ```
//!
//! Only the length byte is interpreted. Bytes after the terminator are
//! ignored.

use crate::error::{Error, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Opcode (2) plus parameter length (1).
pub const RECORD_HEADER_SIZE: usize = 3;

/// End-of-image marker.
pub const TERMINATOR: u8 = 0x00;

/// Images shorter than this are build-time placeholders, not firmware.
pub const MIN_IMAGE_SIZE: usize = 10;

/// A named, borrowed firmware image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareImage<'a> {
    name: &'a str,
    data: &'a [u8],
}

impl<'a> FirmwareImage<'a> {
    /// Wrap image bytes.
    pub fn new(name: &'a str, data: &'a [u8]) -> Self {
        Self { name, data }
    }

    /// Image name used in logs and errors.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Raw image bytes.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Image length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fail with [`Error::FirmwareMissing`] if the image is shorter than `min` bytes.
    pub fn check_present(&self, min: usize) -> Result<()> {
        if self.data.len() < min {
            return Err(Error::FirmwareMissing {
                name: self.name.to_string(),
                len: self.data.len(),
                min,
            });
        }
        Ok(())
    }

    /// Iterate over the command records up to the terminator.
    pub fn records(&self) -> Records<'a> {
        Records {
            data: self.data,
            cursor: 0,
            finished: false,
        }
    }

    /// Walk the whole image and return the record count.
    pub fn validate(&self) -> Result<usize> {
        self.records().try_fold(0, |count, record| record.map(|_| count + 1))
    }

    /// Decode the image into a summary.
    pub fn summary(&self) -> Result<ImageSummary> {
        let mut records = self.records();
        let mut infos = Vec::new();
        for record in records.by_ref() {
            let record = record?;
            infos.push(RecordInfo {
                offset: record.offset,
                opcode: record.opcode,
                param_len: record.params.len(),
            });
        }

        Ok(ImageSummary {
            name: self.name.to_string(),
            len: self.data.len(),
            terminator_offset: records.position(),
            records: infos,
        })
    }
}

/// One command record inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<'a> {
    /// Offset of the record in the image.
    pub offset: usize,
    /// HCI opcode.
    pub opcode: u16,
    /// Command parameters.
    pub params: &'a [u8],
    /// The whole record as sent after the H4 type byte.
    pub bytes: &'a [u8],
}

impl Record<'_> {
    /// Length of the record on the wire, without the H4 type byte.
    pub fn wire_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Iterator over the records of an image.
///
/// Yields an error and stops when a record runs past the end of the image or
/// the image ends without a terminator.
#[derive(Debug, Clone)]
pub struct Records<'a> {
    data: &'a [u8],
    cursor: usize,
    finished: bool,
}

impl Records<'_> {
    /// Offset of the next byte to decode. After exhaustion this is the
    /// terminator's offset.
    pub fn position(&self) -> usize {
        self.cursor
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let rest = &self.data[self.cursor..];
        match rest.first() {
            Some(&TERMINATOR) => {
                self.finished = true;
                return None;
            },
            None => {
                self.finished = true;
                return Some(Err(Error::invalid_image(format!(
                    "missing terminator after {} bytes",
                    self.cursor
                ))));
            },
            Some(_) => {},
        }

        if rest.len() < RECORD_HEADER_SIZE {
            self.finished = true;
            return Some(Err(Error::invalid_image(format!(
                "truncated record header at offset {}",
                self.cursor
            ))));
        }

        let wire_len = usize::from(rest[2]) + RECORD_HEADER_SIZE;
        if rest.len() < wire_len {
            self.finished = true;
            return Some(Err(Error::invalid_image(format!(
                "record at offset {} declares {} parameter bytes, only {} left",
                self.cursor,
                rest[2],
                rest.len() - RECORD_HEADER_SIZE
            ))));
        }

        let bytes = &rest[..wire_len];
        let record = Record {
            offset: self.cursor,
            opcode: LittleEndian::read_u16(&bytes[..2]),
            params: &bytes[RECORD_HEADER_SIZE..],
            bytes,
        };
        self.cursor += wire_len;
        Some(Ok(record))
    }
}

/// Per-record information for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordInfo {
    /// Offset of the record in the image.
    pub offset: usize,
    /// HCI opcode.
    pub opcode: u16,
    /// Parameter length.
    pub param_len: usize,
}

/// Decoded overview of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    /// Image name.
    pub name: String,
    /// Image length in bytes.
    pub len: usize,
    /// Offset of the terminator byte.
    pub terminator_offset: usize,
    /// Records in order.
    pub records: Vec<RecordInfo>,
}

impl ImageSummary {
    /// Sum of all parameter bytes.
    pub fn payload_bytes(&self) -> usize {
        self.records.iter().map(|r| r.param_len).sum()
    }

    /// Bytes after the terminator that will never be sent.
    pub fn trailing_bytes(&self) -> usize {
        self.len.saturating_sub(self.terminator_offset + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // HCI_VS_Write_BD_Addr-like record, a parameterless record, terminator
    const IMAGE: &[u8] = &[
        0x06, 0xFC, 0x06, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // 0xFC06, 6 params
        0x03, 0x0C, 0x00, // 0x0C03, no params
        0x00, // terminator
    ];

    #[test]
    fn test_records_in_order() {
        let image = FirmwareImage::new("bt", IMAGE);
        let records: Vec<_> = image.records().collect::<Result<_>>().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].opcode, 0xFC06);
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[0].params, [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert_eq!(records[0].wire_len(), 9);
        assert_eq!(records[1].opcode, 0x0C03);
        assert_eq!(records[1].offset, 9);
        assert_eq!(records[1].bytes, [0x03, 0x0C, 0x00]);
    }

    #[test]
    fn test_terminator_first_is_empty_image() {
        let image = FirmwareImage::new("empty", &[0x00, 0xFF, 0xFF]);
        assert_eq!(image.validate().unwrap(), 0);
    }

    #[test]
    fn test_bytes_after_terminator_are_ignored() {
        let mut data = IMAGE.to_vec();
        data.extend_from_slice(&[0xDE, 0xAD]);
        let image = FirmwareImage::new("bt", &data);

        let summary = image.summary().unwrap();
        assert_eq!(summary.records.len(), 2);
        assert_eq!(summary.terminator_offset, 12);
        assert_eq!(summary.trailing_bytes(), 2);
        assert_eq!(summary.payload_bytes(), 6);
    }

    #[test]
    fn test_missing_terminator() {
        let image = FirmwareImage::new("bt", &IMAGE[..IMAGE.len() - 1]);
        let err = image.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidImage(ref msg) if msg.contains("missing terminator")));
    }

    #[test]
    fn test_record_past_end() {
        // declares 6 params, carries 2
        let image = FirmwareImage::new("bt", &[0x06, 0xFC, 0x06, 0x11, 0x22]);
        let err = image.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidImage(ref msg) if msg.contains("declares 6")));
    }

    #[test]
    fn test_truncated_header() {
        let image = FirmwareImage::new("bt", &[0x03, 0x0C]);
        assert!(matches!(image.validate(), Err(Error::InvalidImage(_))));
    }

    #[test]
    fn test_iterator_stops_after_error() {
        let image = FirmwareImage::new("bt", &[0x03, 0x0C]);
        let mut records = image.records();
        assert!(records.next().unwrap().is_err());
        assert!(records.next().is_none());
    }

    #[test]
    fn test_presence_check() {
        let placeholder = FirmwareImage::new("ble", &[0x00]);
        let err = placeholder.check_present(MIN_IMAGE_SIZE).unwrap_err();
        assert!(matches!(
            err,
            Error::FirmwareMissing { ref name, len: 1, min: 10 } if name == "ble"
        ));

        assert!(FirmwareImage::new("bt", &[0u8; 9]).check_present(MIN_IMAGE_SIZE).is_err());
        assert!(FirmwareImage::new("bt", &[0u8; 10]).check_present(MIN_IMAGE_SIZE).is_ok());
    }
}
