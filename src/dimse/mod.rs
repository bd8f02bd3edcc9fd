//! DIMSE message layer
//!
//! This module implements the command sets of the DIMSE-C services
//! (part 7, section 9): typed request and response messages,
//! their encoder and decoder,
//! and the assembler which reconstructs messages
//! from presentation data value fragments.
//!
//! A command set is a stream of group-0000 data elements
//! whose first element is `(0000,0000) CommandGroupLength`.
//! Command sets are always encoded in Implicit VR Little Endian,
//! regardless of the transfer syntax negotiated for the data sets.

pub mod element;

pub use element::{tags, DataElement, Tag};

use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::collections::HashMap;
use std::io::Write;
use tracing::warn;

use crate::pdu::{PDataValue, PDataValueType};

/// The command data set type value meaning "no data set follows".
pub const COMMAND_DATA_SET_TYPE_NULL: u16 = 0x0101;
/// A command data set type value meaning "a data set follows".
/// Any value other than [`COMMAND_DATA_SET_TYPE_NULL`] has this meaning.
pub const COMMAND_DATA_SET_TYPE_NON_NULL: u16 = 0x0001;

/// Well-known DIMSE status codes (part 7, annex C).
pub mod status {
    /// The operation completed.
    pub const SUCCESS: u16 = 0x0000;
    /// The operation was cancelled on request.
    pub const CANCEL: u16 = 0xFE00;
    /// More responses follow.
    pub const PENDING: u16 = 0xFF00;
    /// More responses follow; some optional keys were not supported.
    pub const PENDING_WITH_WARNING: u16 = 0xFF01;
    /// Refused: SOP class not supported.
    pub const SOP_CLASS_NOT_SUPPORTED: u16 = 0x0122;
    /// Refused: not authorized.
    pub const NOT_AUTHORIZED: u16 = 0x0124;
    /// Error: unrecognized operation.
    pub const UNRECOGNIZED_OPERATION: u16 = 0x0211;
    /// Refused: out of resources.
    pub const OUT_OF_RESOURCES: u16 = 0xA700;
    /// Error: cannot understand (C-STORE).
    pub const CANNOT_UNDERSTAND: u16 = 0xC000;
}

/// The status word of a DIMSE response,
/// together with the optional error comment element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// the status code, `(0000,0900)`
    pub code: u16,
    /// free form error description, `(0000,0902)`; empty when absent
    pub error_comment: String,
}

impl Status {
    /// A success status with no comment.
    pub fn success() -> Self {
        Status {
            code: status::SUCCESS,
            error_comment: String::new(),
        }
    }

    /// A status with the given code and error comment.
    pub fn error(code: u16, error_comment: impl Into<String>) -> Self {
        Status {
            code,
            error_comment: error_comment.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == status::SUCCESS
    }

    /// Whether this status announces further responses
    /// under the same message ID.
    pub fn is_pending(&self) -> bool {
        self.code == status::PENDING || self.code == status::PENDING_WITH_WARNING
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.error_comment.is_empty() {
            write!(f, "0x{:04X}", self.code)
        } else {
            write!(f, "0x{:04X} ({})", self.code, self.error_comment)
        }
    }
}

/// The priority of a DIMSE request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Priority {
    #[default]
    Medium = 0x0000,
    High = 0x0001,
    Low = 0x0002,
}

impl Priority {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => Priority::High,
            0x0002 => Priority::Low,
            _ => Priority::Medium,
        }
    }
}

/// The command field values discriminating DIMSE-C messages,
/// `(0000,0100)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    CStoreRq = 0x0001,
    CStoreRsp = 0x8001,
    CGetRq = 0x0010,
    CGetRsp = 0x8010,
    CFindRq = 0x0020,
    CFindRsp = 0x8020,
    CMoveRq = 0x0021,
    CMoveRsp = 0x8021,
    CEchoRq = 0x0030,
    CEchoRsp = 0x8030,
    CCancelRq = 0x0FFF,
}

impl CommandField {
    fn from(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(CommandField::CStoreRq),
            0x8001 => Some(CommandField::CStoreRsp),
            0x0010 => Some(CommandField::CGetRq),
            0x8010 => Some(CommandField::CGetRsp),
            0x0020 => Some(CommandField::CFindRq),
            0x8020 => Some(CommandField::CFindRsp),
            0x0021 => Some(CommandField::CMoveRq),
            0x8021 => Some(CommandField::CMoveRsp),
            0x0030 => Some(CommandField::CEchoRq),
            0x8030 => Some(CommandField::CEchoRsp),
            0x0FFF => Some(CommandField::CCancelRq),
            _ => None,
        }
    }
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not decode command element: {}", source))]
    DecodeElement {
        #[snafu(backtrace)]
        source: element::Error,
    },

    #[snafu(display("Could not encode command element: {}", source))]
    EncodeElement {
        #[snafu(backtrace)]
        source: element::Error,
    },

    #[snafu(display("Command set is missing element {}", tag))]
    MissingField { tag: Tag, backtrace: Backtrace },

    #[snafu(display("Element {} is not a valid integer: {}", tag, source))]
    InvalidField {
        tag: Tag,
        #[snafu(backtrace)]
        source: element::Error,
    },

    #[snafu(display("Unknown command field 0x{:04X}", value))]
    UnknownCommandField { value: u16, backtrace: Backtrace },

    #[snafu(display(
        "Received a data fragment on context {} with no command to attach it to",
        context_id
    ))]
    DataWithoutCommand {
        context_id: u8,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Received a new command on context {} while the previous one awaits its data set",
        context_id
    ))]
    CommandWhileAwaitingData {
        context_id: u8,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// C-ECHO request (part 7, section 9.1.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CEchoRq {
    pub message_id: u16,
    pub affected_sop_class_uid: String,
    pub data_set_type: u16,
    pub extra: Vec<DataElement>,
}

/// C-ECHO response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CEchoRsp {
    pub message_id_being_responded_to: u16,
    pub affected_sop_class_uid: Option<String>,
    pub data_set_type: u16,
    pub status: Status,
    pub extra: Vec<DataElement>,
}

/// C-STORE request (part 7, section 9.1.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CStoreRq {
    pub message_id: u16,
    pub affected_sop_class_uid: String,
    pub affected_sop_instance_uid: String,
    pub priority: Priority,
    pub data_set_type: u16,
    pub move_originator_application_entity_title: Option<String>,
    pub move_originator_message_id: Option<u16>,
    pub extra: Vec<DataElement>,
}

/// C-STORE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CStoreRsp {
    pub message_id_being_responded_to: u16,
    pub affected_sop_class_uid: Option<String>,
    pub affected_sop_instance_uid: Option<String>,
    pub data_set_type: u16,
    pub status: Status,
    pub extra: Vec<DataElement>,
}

/// C-FIND request (part 7, section 9.1.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFindRq {
    pub message_id: u16,
    pub affected_sop_class_uid: String,
    pub priority: Priority,
    pub data_set_type: u16,
    pub extra: Vec<DataElement>,
}

/// C-FIND response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFindRsp {
    pub message_id_being_responded_to: u16,
    pub affected_sop_class_uid: Option<String>,
    pub data_set_type: u16,
    pub status: Status,
    pub extra: Vec<DataElement>,
}

/// C-GET request (part 7, section 9.1.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CGetRq {
    pub message_id: u16,
    pub affected_sop_class_uid: String,
    pub priority: Priority,
    pub data_set_type: u16,
    pub extra: Vec<DataElement>,
}

/// C-GET response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CGetRsp {
    pub message_id_being_responded_to: u16,
    pub affected_sop_class_uid: Option<String>,
    pub data_set_type: u16,
    pub status: Status,
    pub number_of_remaining_suboperations: Option<u16>,
    pub number_of_completed_suboperations: Option<u16>,
    pub number_of_failed_suboperations: Option<u16>,
    pub number_of_warning_suboperations: Option<u16>,
    pub extra: Vec<DataElement>,
}

/// C-MOVE request (part 7, section 9.1.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMoveRq {
    pub message_id: u16,
    pub affected_sop_class_uid: String,
    pub priority: Priority,
    pub move_destination: String,
    pub data_set_type: u16,
    pub extra: Vec<DataElement>,
}

/// C-MOVE response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CMoveRsp {
    pub message_id_being_responded_to: u16,
    pub affected_sop_class_uid: Option<String>,
    pub data_set_type: u16,
    pub status: Status,
    pub number_of_remaining_suboperations: Option<u16>,
    pub number_of_completed_suboperations: Option<u16>,
    pub number_of_failed_suboperations: Option<u16>,
    pub number_of_warning_suboperations: Option<u16>,
    pub extra: Vec<DataElement>,
}

/// C-CANCEL request (part 7, section 9.3.2.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CCancelRq {
    pub message_id_being_responded_to: u16,
    pub data_set_type: u16,
    pub extra: Vec<DataElement>,
}

/// A DIMSE-C command set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CEchoRq(CEchoRq),
    CEchoRsp(CEchoRsp),
    CStoreRq(CStoreRq),
    CStoreRsp(CStoreRsp),
    CFindRq(CFindRq),
    CFindRsp(CFindRsp),
    CGetRq(CGetRq),
    CGetRsp(CGetRsp),
    CMoveRq(CMoveRq),
    CMoveRsp(CMoveRsp),
    CCancelRq(CCancelRq),
}

impl Command {
    /// The name of the DIMSE service message, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CEchoRq(_) => "C-ECHO-RQ",
            Command::CEchoRsp(_) => "C-ECHO-RSP",
            Command::CStoreRq(_) => "C-STORE-RQ",
            Command::CStoreRsp(_) => "C-STORE-RSP",
            Command::CFindRq(_) => "C-FIND-RQ",
            Command::CFindRsp(_) => "C-FIND-RSP",
            Command::CGetRq(_) => "C-GET-RQ",
            Command::CGetRsp(_) => "C-GET-RSP",
            Command::CMoveRq(_) => "C-MOVE-RQ",
            Command::CMoveRsp(_) => "C-MOVE-RSP",
            Command::CCancelRq(_) => "C-CANCEL-RQ",
        }
    }

    /// Whether a data set stream follows this command set.
    pub fn has_data_set(&self) -> bool {
        self.data_set_type() != COMMAND_DATA_SET_TYPE_NULL
    }

    fn data_set_type(&self) -> u16 {
        match self {
            Command::CEchoRq(c) => c.data_set_type,
            Command::CEchoRsp(c) => c.data_set_type,
            Command::CStoreRq(c) => c.data_set_type,
            Command::CStoreRsp(c) => c.data_set_type,
            Command::CFindRq(c) => c.data_set_type,
            Command::CFindRsp(c) => c.data_set_type,
            Command::CGetRq(c) => c.data_set_type,
            Command::CGetRsp(c) => c.data_set_type,
            Command::CMoveRq(c) => c.data_set_type,
            Command::CMoveRsp(c) => c.data_set_type,
            Command::CCancelRq(c) => c.data_set_type,
        }
    }

    /// Encode the command set, group length element first.
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        let elements = self.to_elements();
        let group_length: u32 = elements.iter().map(DataElement::encoded_len).sum();
        DataElement::from_u32(tags::COMMAND_GROUP_LENGTH, group_length)
            .write_to(writer)
            .context(EncodeElementSnafu)?;
        element::write_elements(writer, &elements).context(EncodeElementSnafu)?;
        Ok(())
    }

    /// Encode the command set into a fresh byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.encode(&mut bytes)?;
        Ok(bytes)
    }

    fn to_elements(&self) -> Vec<DataElement> {
        let mut out = Vec::new();
        match self {
            Command::CEchoRq(c) => {
                out.push(DataElement::from_uid(
                    tags::AFFECTED_SOP_CLASS_UID,
                    &c.affected_sop_class_uid,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CEchoRq as u16,
                ));
                out.push(DataElement::from_u16(tags::MESSAGE_ID, c.message_id));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                out.extend(c.extra.iter().cloned());
            }
            Command::CEchoRsp(c) => {
                if let Some(uid) = &c.affected_sop_class_uid {
                    out.push(DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, uid));
                }
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CEchoRsp as u16,
                ));
                out.push(DataElement::from_u16(
                    tags::MESSAGE_ID_BEING_RESPONDED_TO,
                    c.message_id_being_responded_to,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                push_status(&mut out, &c.status);
                out.extend(c.extra.iter().cloned());
            }
            Command::CStoreRq(c) => {
                out.push(DataElement::from_uid(
                    tags::AFFECTED_SOP_CLASS_UID,
                    &c.affected_sop_class_uid,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CStoreRq as u16,
                ));
                out.push(DataElement::from_u16(tags::MESSAGE_ID, c.message_id));
                out.push(DataElement::from_u16(tags::PRIORITY, c.priority as u16));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                out.push(DataElement::from_uid(
                    tags::AFFECTED_SOP_INSTANCE_UID,
                    &c.affected_sop_instance_uid,
                ));
                if let Some(ae) = &c.move_originator_application_entity_title {
                    out.push(DataElement::from_text(
                        tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE,
                        ae,
                    ));
                }
                if let Some(id) = c.move_originator_message_id {
                    out.push(DataElement::from_u16(tags::MOVE_ORIGINATOR_MESSAGE_ID, id));
                }
                out.extend(c.extra.iter().cloned());
            }
            Command::CStoreRsp(c) => {
                if let Some(uid) = &c.affected_sop_class_uid {
                    out.push(DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, uid));
                }
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CStoreRsp as u16,
                ));
                out.push(DataElement::from_u16(
                    tags::MESSAGE_ID_BEING_RESPONDED_TO,
                    c.message_id_being_responded_to,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                push_status(&mut out, &c.status);
                if let Some(uid) = &c.affected_sop_instance_uid {
                    out.push(DataElement::from_uid(tags::AFFECTED_SOP_INSTANCE_UID, uid));
                }
                out.extend(c.extra.iter().cloned());
            }
            Command::CFindRq(c) => {
                out.push(DataElement::from_uid(
                    tags::AFFECTED_SOP_CLASS_UID,
                    &c.affected_sop_class_uid,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CFindRq as u16,
                ));
                out.push(DataElement::from_u16(tags::MESSAGE_ID, c.message_id));
                out.push(DataElement::from_u16(tags::PRIORITY, c.priority as u16));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                out.extend(c.extra.iter().cloned());
            }
            Command::CFindRsp(c) => {
                if let Some(uid) = &c.affected_sop_class_uid {
                    out.push(DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, uid));
                }
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CFindRsp as u16,
                ));
                out.push(DataElement::from_u16(
                    tags::MESSAGE_ID_BEING_RESPONDED_TO,
                    c.message_id_being_responded_to,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                push_status(&mut out, &c.status);
                out.extend(c.extra.iter().cloned());
            }
            Command::CGetRq(c) => {
                out.push(DataElement::from_uid(
                    tags::AFFECTED_SOP_CLASS_UID,
                    &c.affected_sop_class_uid,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CGetRq as u16,
                ));
                out.push(DataElement::from_u16(tags::MESSAGE_ID, c.message_id));
                out.push(DataElement::from_u16(tags::PRIORITY, c.priority as u16));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                out.extend(c.extra.iter().cloned());
            }
            Command::CGetRsp(c) => {
                if let Some(uid) = &c.affected_sop_class_uid {
                    out.push(DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, uid));
                }
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CGetRsp as u16,
                ));
                out.push(DataElement::from_u16(
                    tags::MESSAGE_ID_BEING_RESPONDED_TO,
                    c.message_id_being_responded_to,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                push_status(&mut out, &c.status);
                push_suboperations(
                    &mut out,
                    c.number_of_remaining_suboperations,
                    c.number_of_completed_suboperations,
                    c.number_of_failed_suboperations,
                    c.number_of_warning_suboperations,
                );
                out.extend(c.extra.iter().cloned());
            }
            Command::CMoveRq(c) => {
                out.push(DataElement::from_uid(
                    tags::AFFECTED_SOP_CLASS_UID,
                    &c.affected_sop_class_uid,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CMoveRq as u16,
                ));
                out.push(DataElement::from_u16(tags::MESSAGE_ID, c.message_id));
                out.push(DataElement::from_text(
                    tags::MOVE_DESTINATION,
                    &c.move_destination,
                ));
                out.push(DataElement::from_u16(tags::PRIORITY, c.priority as u16));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                out.extend(c.extra.iter().cloned());
            }
            Command::CMoveRsp(c) => {
                if let Some(uid) = &c.affected_sop_class_uid {
                    out.push(DataElement::from_uid(tags::AFFECTED_SOP_CLASS_UID, uid));
                }
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CMoveRsp as u16,
                ));
                out.push(DataElement::from_u16(
                    tags::MESSAGE_ID_BEING_RESPONDED_TO,
                    c.message_id_being_responded_to,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                push_status(&mut out, &c.status);
                push_suboperations(
                    &mut out,
                    c.number_of_remaining_suboperations,
                    c.number_of_completed_suboperations,
                    c.number_of_failed_suboperations,
                    c.number_of_warning_suboperations,
                );
                out.extend(c.extra.iter().cloned());
            }
            Command::CCancelRq(c) => {
                out.push(DataElement::from_u16(
                    tags::COMMAND_FIELD,
                    CommandField::CCancelRq as u16,
                ));
                out.push(DataElement::from_u16(
                    tags::MESSAGE_ID_BEING_RESPONDED_TO,
                    c.message_id_being_responded_to,
                ));
                out.push(DataElement::from_u16(
                    tags::COMMAND_DATA_SET_TYPE,
                    c.data_set_type,
                ));
                out.extend(c.extra.iter().cloned());
            }
        }
        out
    }

    /// Decode a command set from a complete command stream.
    pub fn decode(bytes: &[u8]) -> Result<Command> {
        let elements = element::read_elements(bytes).context(DecodeElementSnafu)?;
        let mut set = CommandSet::new(elements);

        let command_field = set.require_u16(tags::COMMAND_FIELD)?;
        let command_field = CommandField::from(command_field).context(UnknownCommandFieldSnafu {
            value: command_field,
        })?;

        let command = match command_field {
            CommandField::CEchoRq => Command::CEchoRq(CEchoRq {
                message_id: set.require_u16(tags::MESSAGE_ID)?,
                affected_sop_class_uid: set.require_str(tags::AFFECTED_SOP_CLASS_UID)?,
                data_set_type: set.data_set_type()?,
                extra: vec![],
            }),
            CommandField::CEchoRsp => Command::CEchoRsp(CEchoRsp {
                message_id_being_responded_to: set
                    .require_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: set.take_str(tags::AFFECTED_SOP_CLASS_UID),
                data_set_type: set.data_set_type()?,
                status: set.status()?,
                extra: vec![],
            }),
            CommandField::CStoreRq => Command::CStoreRq(CStoreRq {
                message_id: set.require_u16(tags::MESSAGE_ID)?,
                affected_sop_class_uid: set.require_str(tags::AFFECTED_SOP_CLASS_UID)?,
                affected_sop_instance_uid: set.require_str(tags::AFFECTED_SOP_INSTANCE_UID)?,
                priority: set.priority()?,
                data_set_type: set.data_set_type()?,
                move_originator_application_entity_title: set
                    .take_str(tags::MOVE_ORIGINATOR_APPLICATION_ENTITY_TITLE),
                move_originator_message_id: set.take_u16(tags::MOVE_ORIGINATOR_MESSAGE_ID)?,
                extra: vec![],
            }),
            CommandField::CStoreRsp => Command::CStoreRsp(CStoreRsp {
                message_id_being_responded_to: set
                    .require_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: set.take_str(tags::AFFECTED_SOP_CLASS_UID),
                affected_sop_instance_uid: set.take_str(tags::AFFECTED_SOP_INSTANCE_UID),
                data_set_type: set.data_set_type()?,
                status: set.status()?,
                extra: vec![],
            }),
            CommandField::CFindRq => Command::CFindRq(CFindRq {
                message_id: set.require_u16(tags::MESSAGE_ID)?,
                affected_sop_class_uid: set.require_str(tags::AFFECTED_SOP_CLASS_UID)?,
                priority: set.priority()?,
                data_set_type: set.data_set_type()?,
                extra: vec![],
            }),
            CommandField::CFindRsp => Command::CFindRsp(CFindRsp {
                message_id_being_responded_to: set
                    .require_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: set.take_str(tags::AFFECTED_SOP_CLASS_UID),
                data_set_type: set.data_set_type()?,
                status: set.status()?,
                extra: vec![],
            }),
            CommandField::CGetRq => Command::CGetRq(CGetRq {
                message_id: set.require_u16(tags::MESSAGE_ID)?,
                affected_sop_class_uid: set.require_str(tags::AFFECTED_SOP_CLASS_UID)?,
                priority: set.priority()?,
                data_set_type: set.data_set_type()?,
                extra: vec![],
            }),
            CommandField::CGetRsp => Command::CGetRsp(CGetRsp {
                message_id_being_responded_to: set
                    .require_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: set.take_str(tags::AFFECTED_SOP_CLASS_UID),
                data_set_type: set.data_set_type()?,
                status: set.status()?,
                number_of_remaining_suboperations: set
                    .take_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS)?,
                number_of_completed_suboperations: set
                    .take_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS)?,
                number_of_failed_suboperations: set
                    .take_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS)?,
                number_of_warning_suboperations: set
                    .take_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS)?,
                extra: vec![],
            }),
            CommandField::CMoveRq => Command::CMoveRq(CMoveRq {
                message_id: set.require_u16(tags::MESSAGE_ID)?,
                affected_sop_class_uid: set.require_str(tags::AFFECTED_SOP_CLASS_UID)?,
                priority: set.priority()?,
                move_destination: set.require_str(tags::MOVE_DESTINATION)?,
                data_set_type: set.data_set_type()?,
                extra: vec![],
            }),
            CommandField::CMoveRsp => Command::CMoveRsp(CMoveRsp {
                message_id_being_responded_to: set
                    .require_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                affected_sop_class_uid: set.take_str(tags::AFFECTED_SOP_CLASS_UID),
                data_set_type: set.data_set_type()?,
                status: set.status()?,
                number_of_remaining_suboperations: set
                    .take_u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS)?,
                number_of_completed_suboperations: set
                    .take_u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS)?,
                number_of_failed_suboperations: set
                    .take_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS)?,
                number_of_warning_suboperations: set
                    .take_u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS)?,
                extra: vec![],
            }),
            CommandField::CCancelRq => Command::CCancelRq(CCancelRq {
                message_id_being_responded_to: set
                    .require_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)?,
                data_set_type: set.data_set_type()?,
                extra: vec![],
            }),
        };

        let extra = set.into_extra();
        Ok(match command {
            Command::CEchoRq(mut c) => {
                c.extra = extra;
                Command::CEchoRq(c)
            }
            Command::CEchoRsp(mut c) => {
                c.extra = extra;
                Command::CEchoRsp(c)
            }
            Command::CStoreRq(mut c) => {
                c.extra = extra;
                Command::CStoreRq(c)
            }
            Command::CStoreRsp(mut c) => {
                c.extra = extra;
                Command::CStoreRsp(c)
            }
            Command::CFindRq(mut c) => {
                c.extra = extra;
                Command::CFindRq(c)
            }
            Command::CFindRsp(mut c) => {
                c.extra = extra;
                Command::CFindRsp(c)
            }
            Command::CGetRq(mut c) => {
                c.extra = extra;
                Command::CGetRq(c)
            }
            Command::CGetRsp(mut c) => {
                c.extra = extra;
                Command::CGetRsp(c)
            }
            Command::CMoveRq(mut c) => {
                c.extra = extra;
                Command::CMoveRq(c)
            }
            Command::CMoveRsp(mut c) => {
                c.extra = extra;
                Command::CMoveRsp(c)
            }
            Command::CCancelRq(mut c) => {
                c.extra = extra;
                Command::CCancelRq(c)
            }
        })
    }
}

fn push_status(out: &mut Vec<DataElement>, status: &Status) {
    out.push(DataElement::from_u16(tags::STATUS, status.code));
    if !status.error_comment.is_empty() {
        out.push(DataElement::from_text(
            tags::ERROR_COMMENT,
            &status.error_comment,
        ));
    }
}

fn push_suboperations(
    out: &mut Vec<DataElement>,
    remaining: Option<u16>,
    completed: Option<u16>,
    failed: Option<u16>,
    warning: Option<u16>,
) {
    if let Some(n) = remaining {
        out.push(DataElement::from_u16(
            tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
            n,
        ));
    }
    if let Some(n) = completed {
        out.push(DataElement::from_u16(
            tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
            n,
        ));
    }
    if let Some(n) = failed {
        out.push(DataElement::from_u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS, n));
    }
    if let Some(n) = warning {
        out.push(DataElement::from_u16(
            tags::NUMBER_OF_WARNING_SUBOPERATIONS,
            n,
        ));
    }
}

/// A working view over the decoded elements of one command set.
struct CommandSet {
    elements: Vec<DataElement>,
}

impl CommandSet {
    fn new(elements: Vec<DataElement>) -> Self {
        // the group length element has served its purpose on the wire
        let elements = elements
            .into_iter()
            .filter(|e| e.tag != tags::COMMAND_GROUP_LENGTH)
            .collect();
        CommandSet { elements }
    }

    fn take(&mut self, tag: Tag) -> Option<DataElement> {
        let index = self.elements.iter().position(|e| e.tag == tag)?;
        Some(self.elements.remove(index))
    }

    fn take_u16(&mut self, tag: Tag) -> Result<Option<u16>> {
        match self.take(tag) {
            Some(element) => Ok(Some(
                element.to_u16().context(InvalidFieldSnafu { tag })?,
            )),
            None => Ok(None),
        }
    }

    fn take_str(&mut self, tag: Tag) -> Option<String> {
        self.take(tag).map(|e| e.to_str())
    }

    fn require_u16(&mut self, tag: Tag) -> Result<u16> {
        self.take_u16(tag)?.context(MissingFieldSnafu { tag })
    }

    fn require_str(&mut self, tag: Tag) -> Result<String> {
        self.take_str(tag).context(MissingFieldSnafu { tag })
    }

    fn data_set_type(&mut self) -> Result<u16> {
        self.require_u16(tags::COMMAND_DATA_SET_TYPE)
    }

    fn priority(&mut self) -> Result<Priority> {
        Ok(Priority::from(
            self.take_u16(tags::PRIORITY)?.unwrap_or_default(),
        ))
    }

    fn status(&mut self) -> Result<Status> {
        let code = self.require_u16(tags::STATUS)?;
        let error_comment = self.take_str(tags::ERROR_COMMENT).unwrap_or_default();
        Ok(Status {
            code,
            error_comment,
        })
    }

    fn into_extra(self) -> Vec<DataElement> {
        self.elements
    }
}

/// A complete DIMSE message reassembled from its fragments:
/// one command set and, when the command announces one, a data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub context_id: u8,
    pub command: Command,
    pub data: Option<Vec<u8>>,
}

/// Reassembles DIMSE messages from presentation data values.
///
/// Each presentation context gets two rolling buffers, one for the command
/// stream and one for the data stream, so that command and data fragments
/// may legally interleave on the same context without corrupting
/// each other.
#[derive(Debug, Default)]
pub struct CommandAssembler {
    contexts: HashMap<u8, ContextBuffers>,
}

#[derive(Debug, Default)]
struct ContextBuffers {
    command: Vec<u8>,
    data: Vec<u8>,
    pending_command: Option<Command>,
}

impl CommandAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one presentation data value into the assembler.
    ///
    /// Returns a complete [`Message`] once the last fragment
    /// of a command-only message, or of the data stream
    /// following a command, has been consumed.
    pub fn add_pdv(&mut self, pdv: PDataValue) -> Result<Option<Message>> {
        let context_id = pdv.presentation_context_id;
        let buffers = self.contexts.entry(context_id).or_default();

        match pdv.value_type {
            PDataValueType::Command => {
                buffers.command.extend(pdv.data);
                if !pdv.is_last {
                    return Ok(None);
                }
                ensure!(
                    buffers.pending_command.is_none(),
                    CommandWhileAwaitingDataSnafu { context_id }
                );
                let command = Command::decode(&buffers.command)?;
                buffers.command.clear();
                if command.has_data_set() {
                    buffers.pending_command = Some(command);
                    Ok(None)
                } else {
                    if !buffers.data.is_empty() {
                        warn!(
                            "discarding {} data bytes on context {} without a command",
                            buffers.data.len(),
                            context_id
                        );
                        buffers.data.clear();
                    }
                    Ok(Some(Message {
                        context_id,
                        command,
                        data: None,
                    }))
                }
            }
            PDataValueType::Data => {
                buffers.data.extend(pdv.data);
                if !pdv.is_last {
                    return Ok(None);
                }
                let command = buffers
                    .pending_command
                    .take()
                    .context(DataWithoutCommandSnafu { context_id })?;
                let data = std::mem::take(&mut buffers.data);
                Ok(Some(Message {
                    context_id,
                    command,
                    data: Some(data),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(command: &Command) {
        let bytes = command.to_bytes().expect("encoding should succeed");
        let decoded = Command::decode(&bytes).expect("decoding should succeed");
        assert_eq!(&decoded, command);
    }

    #[test]
    fn roundtrip_c_echo() {
        roundtrip(&Command::CEchoRq(CEchoRq {
            message_id: 0x1234,
            affected_sop_class_uid: "1.2.840.10008.1.1".to_string(),
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            extra: vec![],
        }));
        roundtrip(&Command::CEchoRsp(CEchoRsp {
            message_id_being_responded_to: 0x1234,
            affected_sop_class_uid: Some("1.2.840.10008.1.1".to_string()),
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            status: Status::error(0x2345, ""),
            extra: vec![],
        }));
    }

    #[test]
    fn roundtrip_c_store() {
        roundtrip(&Command::CStoreRq(CStoreRq {
            message_id: 1,
            affected_sop_class_uid: "1.2.3".to_string(),
            affected_sop_instance_uid: "3.4.5".to_string(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            move_originator_application_entity_title: Some("EMMA".to_string()),
            move_originator_message_id: Some(7),
            extra: vec![],
        }));
        roundtrip(&Command::CStoreRsp(CStoreRsp {
            message_id_being_responded_to: 0x1234,
            affected_sop_class_uid: Some("1.2.3".to_string()),
            affected_sop_instance_uid: Some("3.4.5".to_string()),
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            status: Status::error(0x3456, ""),
            extra: vec![],
        }));
    }

    #[test]
    fn roundtrip_c_find_get_move() {
        roundtrip(&Command::CFindRq(CFindRq {
            message_id: 5,
            affected_sop_class_uid: "1.2.840.10008.5.1.4.1.2.1.1".to_string(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            extra: vec![],
        }));
        roundtrip(&Command::CFindRsp(CFindRsp {
            message_id_being_responded_to: 5,
            affected_sop_class_uid: None,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            status: Status::error(status::PENDING, ""),
            extra: vec![],
        }));
        roundtrip(&Command::CGetRq(CGetRq {
            message_id: 6,
            affected_sop_class_uid: "1.2.840.10008.5.1.4.1.2.1.3".to_string(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            extra: vec![],
        }));
        roundtrip(&Command::CGetRsp(CGetRsp {
            message_id_being_responded_to: 6,
            affected_sop_class_uid: None,
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            status: Status::success(),
            number_of_remaining_suboperations: Some(0),
            number_of_completed_suboperations: Some(1),
            number_of_failed_suboperations: Some(0),
            number_of_warning_suboperations: Some(0),
            extra: vec![],
        }));
        roundtrip(&Command::CMoveRq(CMoveRq {
            message_id: 7,
            affected_sop_class_uid: "1.2.840.10008.5.1.4.1.2.1.2".to_string(),
            priority: Priority::Medium,
            move_destination: "OTHER-SCP".to_string(),
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            extra: vec![],
        }));
        roundtrip(&Command::CMoveRsp(CMoveRsp {
            message_id_being_responded_to: 7,
            affected_sop_class_uid: None,
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            status: Status::success(),
            number_of_remaining_suboperations: None,
            number_of_completed_suboperations: None,
            number_of_failed_suboperations: None,
            number_of_warning_suboperations: None,
            extra: vec![],
        }));
        roundtrip(&Command::CCancelRq(CCancelRq {
            message_id_being_responded_to: 7,
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            extra: vec![],
        }));
    }

    #[test]
    fn extra_elements_survive_roundtrip() {
        roundtrip(&Command::CEchoRq(CEchoRq {
            message_id: 9,
            affected_sop_class_uid: "1.2.840.10008.1.1".to_string(),
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            extra: vec![
                DataElement::from_u16(Tag(0x0000, 0x0777), 42),
                DataElement::from_text(Tag(0x0000, 0x0778), "spare"),
            ],
        }));
    }

    #[test]
    fn error_comment_survives_roundtrip() {
        roundtrip(&Command::CStoreRsp(CStoreRsp {
            message_id_being_responded_to: 2,
            affected_sop_class_uid: None,
            affected_sop_instance_uid: None,
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            status: Status::error(0xC000, "Foohah"),
            extra: vec![],
        }));
    }

    fn command_pdv(context_id: u8, data: Vec<u8>, is_last: bool) -> PDataValue {
        PDataValue {
            presentation_context_id: context_id,
            value_type: PDataValueType::Command,
            is_last,
            data,
        }
    }

    fn data_pdv(context_id: u8, data: Vec<u8>, is_last: bool) -> PDataValue {
        PDataValue {
            presentation_context_id: context_id,
            value_type: PDataValueType::Data,
            is_last,
            data,
        }
    }

    #[test]
    fn assembles_command_only_message() {
        let command = Command::CEchoRq(CEchoRq {
            message_id: 1,
            affected_sop_class_uid: "1.2.840.10008.1.1".to_string(),
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            extra: vec![],
        });
        let bytes = command.to_bytes().unwrap();
        let (first, second) = bytes.split_at(bytes.len() / 2);

        let mut assembler = CommandAssembler::new();
        assert_eq!(
            assembler.add_pdv(command_pdv(1, first.to_vec(), false)).unwrap(),
            None
        );
        let message = assembler
            .add_pdv(command_pdv(1, second.to_vec(), true))
            .unwrap()
            .expect("message should be complete");
        assert_eq!(message.context_id, 1);
        assert_eq!(message.command, command);
        assert_eq!(message.data, None);
    }

    #[test]
    fn assembles_command_with_data() {
        let command = Command::CStoreRq(CStoreRq {
            message_id: 2,
            affected_sop_class_uid: "1.2.3".to_string(),
            affected_sop_instance_uid: "3.4.5".to_string(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            move_originator_application_entity_title: None,
            move_originator_message_id: None,
            extra: vec![],
        });
        let bytes = command.to_bytes().unwrap();
        let payload: Vec<u8> = (0..200u16).map(|x| x as u8).collect();

        let mut assembler = CommandAssembler::new();
        assert_eq!(assembler.add_pdv(command_pdv(3, bytes, true)).unwrap(), None);
        assert_eq!(
            assembler
                .add_pdv(data_pdv(3, payload[..100].to_vec(), false))
                .unwrap(),
            None
        );
        let message = assembler
            .add_pdv(data_pdv(3, payload[100..].to_vec(), true))
            .unwrap()
            .expect("message should be complete");
        assert_eq!(message.command, command);
        assert_eq!(message.data, Some(payload));
    }

    #[test]
    fn data_without_command_is_an_error() {
        let mut assembler = CommandAssembler::new();
        let result = assembler.add_pdv(data_pdv(5, vec![1, 2, 3], true));
        assert!(matches!(result, Err(Error::DataWithoutCommand { .. })));
    }

    #[test]
    fn separate_contexts_do_not_interfere() {
        let echo = Command::CEchoRq(CEchoRq {
            message_id: 1,
            affected_sop_class_uid: "1.2.840.10008.1.1".to_string(),
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            extra: vec![],
        });
        let bytes = echo.to_bytes().unwrap();
        let (first, second) = bytes.split_at(8);

        let mut assembler = CommandAssembler::new();
        // a fragment on context 1, then a complete message on context 3
        assert_eq!(
            assembler.add_pdv(command_pdv(1, first.to_vec(), false)).unwrap(),
            None
        );
        let complete = assembler
            .add_pdv(command_pdv(3, bytes.clone(), true))
            .unwrap()
            .expect("context 3 should complete");
        assert_eq!(complete.context_id, 3);
        // context 1 finishes independently
        let complete = assembler
            .add_pdv(command_pdv(1, second.to_vec(), true))
            .unwrap()
            .expect("context 1 should complete");
        assert_eq!(complete.context_id, 1);
        assert_eq!(complete.command, echo);
    }
}
