//! Data element support for DIMSE command sets and identifiers.
//!
//! DIMSE command sets are always encoded in Implicit VR Little Endian,
//! regardless of the transfer syntax negotiated for the data sets,
//! so this module implements exactly that encoding:
//! `{group: u16 LE, element: u16 LE, length: u32 LE, value}`.
//! Values are padded to even length as the standard requires,
//! with NUL for UIDs and space for text.

use byteordered::byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::fmt;
use std::io::{Cursor, ErrorKind, Read, Write};

/// A DICOM tag: group and element number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u16, pub u16);

impl Tag {
    pub fn group(self) -> u16 {
        self.0
    }

    pub fn element(self) -> u16 {
        self.1
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

/// The tags used by the DIMSE command layer and its tests.
pub mod tags {
    use super::Tag;

    pub const COMMAND_GROUP_LENGTH: Tag = Tag(0x0000, 0x0000);
    pub const AFFECTED_SOP_CLASS_UID: Tag = Tag(0x0000, 0x0002);
    pub const COMMAND_FIELD: Tag = Tag(0x0000, 0x0100);
    pub const MESSAGE_ID: Tag = Tag(0x0000, 0x0110);
    pub const MESSAGE_ID_BEING_RESPONDED_TO: Tag = Tag(0x0000, 0x0120);
    pub const MOVE_DESTINATION: Tag = Tag(0x0000, 0x0600);
    pub const PRIORITY: Tag = Tag(0x0000, 0x0700);
    pub const COMMAND_DATA_SET_TYPE: Tag = Tag(0x0000, 0x0800);
    pub const STATUS: Tag = Tag(0x0000, 0x0900);
    pub const ERROR_COMMENT: Tag = Tag(0x0000, 0x0902);
    pub const AFFECTED_SOP_INSTANCE_UID: Tag = Tag(0x0000, 0x1000);
    pub const NUMBER_OF_REMAINING_SUBOPERATIONS: Tag = Tag(0x0000, 0x1020);
    pub const NUMBER_OF_COMPLETED_SUBOPERATIONS: Tag = Tag(0x0000, 0x1021);
    pub const NUMBER_OF_FAILED_SUBOPERATIONS: Tag = Tag(0x0000, 0x1022);
    pub const NUMBER_OF_WARNING_SUBOPERATIONS: Tag = Tag(0x0000, 0x1023);
    pub const MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE: Tag = Tag(0x0000, 0x1030);
    pub const MOVE_ORIGINATOR_MESSAGE_ID: Tag = Tag(0x0000, 0x1031);

    pub const QUERY_RETRIEVE_LEVEL: Tag = Tag(0x0008, 0x0052);
    pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not read element header: {}", source))]
    ReadHeader {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read value of element {}: {}", tag, source))]
    ReadValue {
        tag: Tag,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Element {} declares {} bytes, {} available", tag, declared, available))]
    TruncatedValue {
        tag: Tag,
        declared: u32,
        available: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Element {} has {} bytes, expected {}", tag, got, expected))]
    ValueSize {
        tag: Tag,
        expected: usize,
        got: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not write element {}: {}", tag, source))]
    WriteElement {
        tag: Tag,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A data element in its raw form: a tag and the value bytes.
///
/// The value representation is never carried:
/// with implicit VR encoding it is implied by the tag,
/// and this layer only interprets the handful of command set elements
/// whose types it knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    pub tag: Tag,
    pub value: Vec<u8>,
}

impl DataElement {
    /// Create an element holding a single unsigned 16-bit value.
    pub fn from_u16(tag: Tag, value: u16) -> Self {
        DataElement {
            tag,
            value: value.to_le_bytes().to_vec(),
        }
    }

    /// Create an element holding a single unsigned 32-bit value.
    pub fn from_u32(tag: Tag, value: u32) -> Self {
        DataElement {
            tag,
            value: value.to_le_bytes().to_vec(),
        }
    }

    /// Create an element holding a UID string, NUL padded to even length.
    pub fn from_uid(tag: Tag, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        if bytes.len() % 2 != 0 {
            bytes.push(0);
        }
        DataElement { tag, value: bytes }
    }

    /// Create an element holding a text string, space padded to even length.
    pub fn from_text(tag: Tag, value: &str) -> Self {
        let mut bytes = value.as_bytes().to_vec();
        if bytes.len() % 2 != 0 {
            bytes.push(b' ');
        }
        DataElement { tag, value: bytes }
    }

    /// Interpret the value as a single unsigned 16-bit integer.
    pub fn to_u16(&self) -> Result<u16> {
        ensure!(
            self.value.len() == 2,
            ValueSizeSnafu {
                tag: self.tag,
                expected: 2_usize,
                got: self.value.len()
            }
        );
        Ok(u16::from_le_bytes([self.value[0], self.value[1]]))
    }

    /// Interpret the value as a single unsigned 32-bit integer.
    pub fn to_u32(&self) -> Result<u32> {
        ensure!(
            self.value.len() == 4,
            ValueSizeSnafu {
                tag: self.tag,
                expected: 4_usize,
                got: self.value.len()
            }
        );
        Ok(u32::from_le_bytes([
            self.value[0],
            self.value[1],
            self.value[2],
            self.value[3],
        ]))
    }

    /// Interpret the value as a string, with trailing padding removed.
    pub fn to_str(&self) -> String {
        String::from_utf8_lossy(&self.value)
            .trim_end_matches(|c: char| c == '\0' || c == ' ')
            .to_string()
    }

    /// The number of bytes this element occupies on the wire.
    pub fn encoded_len(&self) -> u32 {
        8 + self.value.len() as u32
    }

    /// Encode the element in Implicit VR Little Endian.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer
            .write_u16::<LittleEndian>(self.tag.group())
            .context(WriteElementSnafu { tag: self.tag })?;
        writer
            .write_u16::<LittleEndian>(self.tag.element())
            .context(WriteElementSnafu { tag: self.tag })?;
        writer
            .write_u32::<LittleEndian>(self.value.len() as u32)
            .context(WriteElementSnafu { tag: self.tag })?;
        writer
            .write_all(&self.value)
            .context(WriteElementSnafu { tag: self.tag })?;
        Ok(())
    }

    /// Decode one element in Implicit VR Little Endian.
    ///
    /// Returns `None` when the stream ends cleanly
    /// before the first header byte.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<DataElement>> {
        let group = match reader.read_u16::<LittleEndian>() {
            Ok(group) => group,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e).context(ReadHeaderSnafu),
        };
        let element = reader.read_u16::<LittleEndian>().context(ReadHeaderSnafu)?;
        let tag = Tag(group, element);
        let length = reader
            .read_u32::<LittleEndian>()
            .context(ReadValueSnafu { tag })?;

        let mut value = Vec::new();
        reader
            .take(length as u64)
            .read_to_end(&mut value)
            .context(ReadValueSnafu { tag })?;
        ensure!(
            value.len() == length as usize,
            TruncatedValueSnafu {
                tag,
                declared: length,
                available: value.len()
            }
        );

        Ok(Some(DataElement { tag, value }))
    }
}

/// Decode a full Implicit VR Little Endian element stream.
pub fn read_elements(bytes: &[u8]) -> Result<Vec<DataElement>> {
    let mut cursor = Cursor::new(bytes);
    let mut elements = Vec::new();
    while let Some(element) = DataElement::read_from(&mut cursor)? {
        elements.push(element);
    }
    Ok(elements)
}

/// Encode elements as an Implicit VR Little Endian stream.
pub fn write_elements<W: Write>(writer: &mut W, elements: &[DataElement]) -> Result<()> {
    for element in elements {
        element.write_to(writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::tags;
    use super::{read_elements, DataElement, Tag};

    #[test]
    fn element_roundtrip() {
        let elements = vec![
            DataElement::from_u16(tags::COMMAND_FIELD, 0x8030),
            DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, "1.2.840.10008.1.1"),
            DataElement::from_text(tags::PATIENT_NAME, "Doe^John"),
            DataElement::from_u32(tags::COMMAND_GROUP_LENGTH, 58),
        ];
        let mut bytes = vec![];
        for element in &elements {
            element.write_to(&mut bytes).unwrap();
        }
        let decoded = read_elements(&bytes).unwrap();
        assert_eq!(decoded, elements);
    }

    #[test]
    fn values_are_even_padded() {
        let uid = DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, "1.2.3");
        assert_eq!(uid.value, b"1.2.3\0");
        assert_eq!(uid.to_str(), "1.2.3");

        let name = DataElement::from_text(tags::PATIENT_NAME, "foohah");
        assert_eq!(name.value, b"foohah");
        assert_eq!(name.to_str(), "foohah");

        let name = DataElement::from_text(tags::PATIENT_NAME, "johndoe");
        assert_eq!(name.value, b"johndoe ");
        assert_eq!(name.to_str(), "johndoe");
    }

    #[test]
    fn integer_accessors_check_length() {
        let element = DataElement::from_u32(Tag(0x0000, 0x0000), 10);
        assert!(element.to_u16().is_err());
        assert_eq!(element.to_u32().unwrap(), 10);
    }

    #[test]
    fn truncated_value_is_an_error() {
        let element = DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, "1.2.840.10008.1.1");
        let mut bytes = vec![];
        element.write_to(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 1);
        assert!(read_elements(&bytes).is_err());
    }
}
