//! PDU decoder.
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Invalid max PDU length {}", max_pdu_length))]
    InvalidMaxPdu {
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU: {}", source))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU item: {}", source))]
    ReadPduItem {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`: {}", field, source))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read {} reserved bytes: {}", bytes, source))]
    ReadReserved {
        bytes: u32,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("Incomplete PDU: expected {} bytes, got {}", expected, got))]
    IncompletePdu {
        expected: u32,
        got: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("PDU of type 0x{:02X} has {} leftover bytes", pdu_type, leftover))]
    LeftoverBytes {
        pdu_type: u8,
        leftover: u64,
        backtrace: Backtrace,
    },

    #[snafu(display("PDU contained an invalid value {:?}", var_item))]
    InvalidPduVariable {
        var_item: PduVariableItem,
        backtrace: Backtrace,
    },
    #[snafu(display("Multiple transfer syntaxes were accepted"))]
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },
    #[snafu(display("Invalid reject source or reason"))]
    InvalidRejectSourceOrReason { backtrace: Backtrace },
    #[snafu(display("Invalid abort service provider"))]
    InvalidAbortSourceOrReason { backtrace: Backtrace },
    #[snafu(display("Invalid presentation context result reason"))]
    InvalidPresentationContextResultReason { backtrace: Backtrace },
    #[snafu(display("invalid transfer syntax sub-item"))]
    InvalidTransferSyntaxSubItem { backtrace: Backtrace },
    #[snafu(display("unknown presentation context sub-item"))]
    UnknownPresentationContextSubItem { backtrace: Backtrace },
    #[snafu(display("Invalid presentation data value item length {}", length))]
    InvalidPDataValueLength { length: u32, backtrace: Backtrace },
    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },
    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },
    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read a PDU from `reader`.
///
/// `max_pdu_length` is the maximum PDU payload length, in bytes, that the
/// caller is prepared to receive; the length field of the incoming PDU is
/// checked against twice that value before any payload memory is reserved.
///
/// A stream which ends cleanly before the first header byte yields
/// [`Error::NoPduAvailable`], so that the caller can tell a closed peer
/// apart from a stream truncated in the middle of a message.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32) -> Result<Pdu>
where
    R: Read,
{
    ensure!(
        max_pdu_length >= MINIMUM_PDU_SIZE,
        InvalidMaxPduSnafu { max_pdu_length }
    );

    // If we can't read the first 2 bytes, no PDU was started at all:
    // the stream was closed at a message boundary. Once any part of
    // a PDU was read, a short stream is an UnexpectedEof error instead.
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduFieldSnafu { field: "type" });
    }

    let pdu_type = bytes[0];
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "length" })?;

    // the slack of 2x is a cheap guard against absurd length values,
    // before any payload memory is reserved
    ensure!(
        (pdu_length as u64) < 2 * max_pdu_length as u64,
        PduTooLargeSnafu {
            pdu_length,
            max_pdu_length
        }
    );

    let bytes = read_n(reader, pdu_length as usize).context(ReadPduSnafu)?;
    ensure!(
        bytes.len() == pdu_length as usize,
        IncompletePduSnafu {
            expected: pdu_length,
            got: bytes.len()
        }
    );
    let mut cursor = Cursor::new(bytes);

    let pdu = match pdu_type {
        0x01 | 0x02 => {
            // A-ASSOCIATE-RQ / A-ASSOCIATE-AC PDU structure

            let mut application_context_name: Option<String> = None;
            let mut presentation_contexts_proposed = vec![];
            let mut presentation_contexts_result = vec![];
            let mut user_variables = vec![];

            // 7-8 - Protocol-version - one bit per supported version of the
            // DICOM UL protocol; version 1 is identified with bit 0 set
            let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                field: "Protocol-version",
            })?;

            // 9-10 - Reserved
            cursor
                .read_u16::<BigEndian>()
                .context(ReadReservedSnafu { bytes: 2_u32 })?;

            // 11-26 - Called-AE-title - 16 characters with non-significant
            // leading and trailing spaces. In the AC this field is formally
            // reserved, but carries the value echoed from the RQ.
            let mut ae_bytes = [0; 16];
            cursor.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
                field: "Called-AE-title",
            })?;
            let called_ae_title = decode_text(&ae_bytes);

            // 27-42 - Calling-AE-title
            let mut ae_bytes = [0; 16];
            cursor.read_exact(&mut ae_bytes).context(ReadPduFieldSnafu {
                field: "Calling-AE-title",
            })?;
            let calling_ae_title = decode_text(&ae_bytes);

            // 43-74 - Reserved
            let mut reserved = [0; 32];
            cursor
                .read_exact(&mut reserved)
                .context(ReadReservedSnafu { bytes: 32_u32 })?;

            // 75-xxx - Variable items: one application context item,
            // one or more presentation context items
            // and one user information item
            while cursor.position() < cursor.get_ref().len() as u64 {
                match read_pdu_variable(&mut cursor)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextProposed(val) if pdu_type == 0x01 => {
                        presentation_contexts_proposed.push(val);
                    }
                    PduVariableItem::PresentationContextResult(val) if pdu_type == 0x02 => {
                        presentation_contexts_result.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            let application_context_name =
                application_context_name.context(MissingApplicationContextNameSnafu)?;

            if pdu_type == 0x01 {
                Pdu::AssociationRQ {
                    protocol_version,
                    calling_ae_title,
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: presentation_contexts_proposed,
                    user_variables,
                }
            } else {
                Pdu::AssociationAC {
                    protocol_version,
                    calling_ae_title,
                    called_ae_title,
                    application_context_name,
                    presentation_contexts: presentation_contexts_result,
                    user_variables,
                }
            }
        }
        0x03 => {
            // A-ASSOCIATE-RJ PDU structure

            // 7 - Reserved
            cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 8 - Result: 1 - rejected-permanent, 2 - rejected-transient
            let result = AssociationRjResult::from(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Result" })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;

            // 9 - Source, 10 - Reason/Diag.
            let source = AssociationRjSource::from(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Source" })?,
                cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Reason/Diag.",
                })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;

            Pdu::AssociationRJ { result, source }
        }
        0x04 => {
            // P-DATA-TF PDU structure

            let mut values = vec![];
            while cursor.position() < cursor.get_ref().len() as u64 {
                // 1-4 - Item-length: the number of bytes from the first byte
                // of the following field to the last byte of the
                // presentation data value field
                let item_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-Length",
                })?;
                ensure!(
                    item_length >= 2,
                    InvalidPDataValueLengthSnafu {
                        length: item_length
                    }
                );

                // 5 - Presentation-context-ID - odd integers between 1 and 255
                let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;

                // 6 - Message control header: bit 0 set means command,
                // bit 1 set means last fragment of its stream
                let header = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Message Control Header",
                })?;
                let value_type = if header & 0x01 > 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = header & 0x02 > 0;

                let data =
                    read_n(&mut cursor, (item_length - 2) as usize).context(ReadPduFieldSnafu {
                        field: "Presentation-data-value",
                    })?;
                ensure!(
                    data.len() == (item_length - 2) as usize,
                    IncompletePduSnafu {
                        expected: item_length - 2,
                        got: data.len()
                    }
                );

                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                })
            }

            Pdu::PData { data: values }
        }
        0x05 => {
            // A-RELEASE-RQ PDU structure

            // 7-10 - Reserved
            cursor
                .read_u32::<BigEndian>()
                .context(ReadReservedSnafu { bytes: 4_u32 })?;

            Pdu::ReleaseRQ
        }
        0x06 => {
            // A-RELEASE-RP PDU structure

            // 7-10 - Reserved
            cursor
                .read_u32::<BigEndian>()
                .context(ReadReservedSnafu { bytes: 4_u32 })?;

            Pdu::ReleaseRP
        }
        0x07 => {
            // A-ABORT PDU structure

            // 7-8 - Reserved
            cursor
                .read_u16::<BigEndian>()
                .context(ReadReservedSnafu { bytes: 2_u32 })?;

            // 9 - Source: 0 - service-user, 1 - reserved, 2 - service-provider
            // 10 - Reason/Diag: significant for the service-provider source
            let source = AbortRqSource::from(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Source" })?,
                cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Reason/Diag",
                })?,
            )
            .context(InvalidAbortSourceOrReasonSnafu)?;

            Pdu::AbortRQ { source }
        }
        _ => {
            let data = read_n(&mut cursor, pdu_length as usize)
                .context(ReadPduFieldSnafu { field: "Unknown" })?;
            Pdu::Unknown { pdu_type, data }
        }
    };

    // a sub-decoder reading less than the declared PDU length
    // is as much of a framing violation as reading past it
    let leftover = cursor.get_ref().len() as u64 - cursor.position();
    ensure!(leftover == 0, LeftoverBytesSnafu { pdu_type, leftover });

    Ok(pdu)
}

fn read_n<R>(reader: &mut R, bytes_to_read: usize) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let mut result = Vec::new();
    reader.take(bytes_to_read as u64).read_to_end(&mut result)?;
    Ok(result)
}

fn decode_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .to_string()
}

fn read_pdu_variable<R>(reader: &mut R) -> Result<PduVariableItem>
where
    R: Read,
{
    // 1 - Item-type
    let item_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    reader.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 3-4 - Item-length
    let item_length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;

    let bytes = read_n(reader, item_length as usize).context(ReadPduItemSnafu)?;
    ensure!(
        bytes.len() == item_length as usize,
        IncompletePduSnafu {
            expected: item_length as u32,
            got: bytes.len()
        }
    );
    let mut cursor = Cursor::new(bytes);

    match item_type {
        0x10 => {
            // Application context item: the value is the
            // application context name, structured as a UID
            Ok(PduVariableItem::ApplicationContext(decode_text(
                cursor.get_ref(),
            )))
        }
        0x20 => {
            // Presentation context item (proposed)

            let mut abstract_syntax: Option<String> = None;
            let mut transfer_syntaxes = vec![];

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            // 6-8 - Reserved
            cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;
            cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;
            cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 9-xxx - one abstract syntax sub-item
            // and one or more transfer syntax sub-items
            while cursor.position() < cursor.get_ref().len() as u64 {
                let item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;
                let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;

                match item_type {
                    0x30 => {
                        abstract_syntax = Some(decode_text(
                            &read_n(&mut cursor, item_length as usize).context(
                                ReadPduFieldSnafu {
                                    field: "Abstract-syntax-name",
                                },
                            )?,
                        ));
                    }
                    0x40 => {
                        transfer_syntaxes.push(decode_text(
                            &read_n(&mut cursor, item_length as usize).context(
                                ReadPduFieldSnafu {
                                    field: "Transfer-syntax-name",
                                },
                            )?,
                        ));
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id: presentation_context_id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // Presentation context item (result)

            let mut transfer_syntax: Option<String> = None;

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            // 6 - Reserved
            cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 7 - Result/Reason
            let reason =
                PresentationContextResultReason::from(cursor.read_u8().context(
                    ReadPduFieldSnafu {
                        field: "Result/Reason",
                    },
                )?)
                .context(InvalidPresentationContextResultReasonSnafu)?;

            // 8 - Reserved
            cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 9-xxx - exactly one transfer syntax sub-item; not significant
            // when the result is other than acceptance
            while cursor.position() < cursor.get_ref().len() as u64 {
                let item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;
                let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;

                match item_type {
                    0x40 => {
                        ensure!(
                            transfer_syntax.is_none(),
                            MultipleTransferSyntaxesAcceptedSnafu
                        );
                        transfer_syntax = Some(decode_text(
                            &read_n(&mut cursor, item_length as usize).context(
                                ReadPduFieldSnafu {
                                    field: "Transfer-syntax-name",
                                },
                            )?,
                        ));
                    }
                    _ => {
                        return InvalidTransferSyntaxSubItemSnafu.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id: presentation_context_id,
                    reason,
                    transfer_syntax: transfer_syntax.context(MissingTransferSyntaxSnafu)?,
                },
            ))
        }
        0x50 => {
            // User information item: a sequence of user data sub-items

            let mut user_variables = vec![];

            while cursor.position() < cursor.get_ref().len() as u64 {
                let item_type = cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Item-type" })?;
                cursor.read_u8().context(ReadReservedSnafu { bytes: 1_u32 })?;
                let item_length = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-length",
                })?;

                let item_bytes = read_n(&mut cursor, item_length as usize)
                    .context(ReadPduFieldSnafu { field: "User-data" })?;
                if item_bytes.len() < item_length as usize {
                    // a truncated trailing sub-item becomes a placeholder,
                    // the enclosing PDU is still delivered so that the state
                    // machine can answer with an invalid-parameter abort
                    user_variables.push(UserVariableItem::Malformed(
                        item_type,
                        format!(
                            "sub-item truncated: declared {} bytes, {} available",
                            item_length,
                            item_bytes.len()
                        ),
                    ));
                    break;
                }

                user_variables.push(decode_user_variable(item_type, &item_bytes));
            }

            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}

/// Decode a single user information sub-item from its payload bytes.
///
/// Never fails: a recognized sub-item with a bad payload becomes
/// a [`UserVariableItem::Malformed`] placeholder instead.
fn decode_user_variable(item_type: u8, bytes: &[u8]) -> UserVariableItem {
    let mut cursor = Cursor::new(bytes);
    match item_type {
        0x51 => {
            // Maximum length sub-item: one 4-byte
            // maximum-length-received value, 0 meaning unlimited
            if bytes.len() != 4 {
                return UserVariableItem::Malformed(
                    item_type,
                    format!("maximum length sub-item must be 4 bytes, found {}", bytes.len()),
                );
            }
            match cursor.read_u32::<BigEndian>() {
                Ok(max_length) => UserVariableItem::MaxLength(max_length),
                Err(e) => UserVariableItem::Malformed(item_type, e.to_string()),
            }
        }
        0x52 => UserVariableItem::ImplementationClassUID(decode_text(bytes)),
        0x55 => UserVariableItem::ImplementationVersionName(decode_text(bytes)),
        0x53 => {
            // Asynchronous operations window sub-item:
            // two distinct 2-byte fields,
            // maximum-number-operations-invoked then -performed
            if bytes.len() != 4 {
                return UserVariableItem::Malformed(
                    item_type,
                    format!(
                        "asynchronous operations window sub-item must be 4 bytes, found {}",
                        bytes.len()
                    ),
                );
            }
            let max_ops_invoked = cursor.read_u16::<BigEndian>();
            let max_ops_performed = cursor.read_u16::<BigEndian>();
            match (max_ops_invoked, max_ops_performed) {
                (Ok(invoked), Ok(performed)) => {
                    UserVariableItem::AsynchronousOperationsWindow(invoked, performed)
                }
                _ => UserVariableItem::Malformed(
                    item_type,
                    "could not read asynchronous operations window fields".to_string(),
                ),
            }
        }
        0x54 => {
            // SCU/SCP role selection sub-item:
            // UID length, SOP class UID, SCU role, SCP role
            let uid_length = match cursor.read_u16::<BigEndian>() {
                Ok(len) => len as usize,
                Err(e) => return UserVariableItem::Malformed(item_type, e.to_string()),
            };
            if bytes.len() != 2 + uid_length + 2 {
                return UserVariableItem::Malformed(
                    item_type,
                    format!(
                        "role selection sub-item of {} bytes does not match UID length {}",
                        bytes.len(),
                        uid_length
                    ),
                );
            }
            let sop_class_uid = decode_text(&bytes[2..2 + uid_length]);
            let scu_role = bytes[2 + uid_length] != 0;
            let scp_role = bytes[2 + uid_length + 1] != 0;
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid,
                scu_role,
                scp_role,
            })
        }
        _ => UserVariableItem::Unknown(item_type, bytes.to_vec()),
    }
}
