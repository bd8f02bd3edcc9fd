//! PDU encoder.
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not write PDU field `{}`: {}", field, source))]
    WritePduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("AE title {:?} is longer than 16 bytes", ae_title))]
    AeTitleTooLong {
        ae_title: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Cannot encode malformed sub-item 0x{:02X}: {}", item_type, message))]
    EncodeMalformedItem {
        item_type: u8,
        message: String,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Serialize the children written by `func` into a scratch buffer,
/// then emit their total length as a 4-byte big endian integer
/// followed by the payload itself.
pub(crate) fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data)?;

    writer
        .write_u32::<BigEndian>(data.len() as u32)
        .context(WritePduFieldSnafu { field: "length" })?;
    writer
        .write_all(&data)
        .context(WritePduFieldSnafu { field: "value" })?;

    Ok(())
}

/// Same as [`write_chunk_u32`], with a 2-byte length field.
pub(crate) fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data)?;

    writer
        .write_u16::<BigEndian>(data.len() as u16)
        .context(WritePduFieldSnafu { field: "length" })?;
    writer
        .write_all(&data)
        .context(WritePduFieldSnafu { field: "value" })?;

    Ok(())
}

/// Encode an AE title as exactly 16 bytes, padded with spaces.
///
/// Titles longer than 16 bytes are illegal
/// and are rejected rather than silently truncated.
fn write_ae_title(writer: &mut dyn Write, field: &'static str, ae_title: &str) -> Result<()> {
    ensure!(ae_title.len() <= 16, AeTitleTooLongSnafu { ae_title });
    let mut bytes = ae_title.as_bytes().to_vec();
    bytes.resize(16, b' ');
    writer.write_all(&bytes).context(WritePduFieldSnafu { field })
}

/// Encode a PDU into `writer`.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    match pdu {
        Pdu::AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        } => {
            // 1 - PDU-type - 01H
            writer
                .write_u8(0x01)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                // 7-8 - Protocol-version
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WritePduFieldSnafu {
                        field: "Protocol-version",
                    })?;

                // 9-10 - Reserved
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WritePduFieldSnafu { field: "reserved" })?;

                // 11-26 - Called-AE-title
                write_ae_title(writer, "Called-AE-title", called_ae_title)?;

                // 27-42 - Calling-AE-title
                write_ae_title(writer, "Calling-AE-title", calling_ae_title)?;

                // 43-74 - Reserved
                writer
                    .write_all(&[0_u8; 32])
                    .context(WritePduFieldSnafu { field: "reserved" })?;

                // 75-xxx - Variable items: one application context item,
                // one or more presentation context items
                // and one user information item
                write_pdu_variable_application_context_name(writer, application_context_name)?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(writer, presentation_context)?;
                }

                write_pdu_variable_user_variables(writer, user_variables)?;

                Ok(())
            })
        }
        Pdu::AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        } => {
            // 1 - PDU-type - 02H
            writer
                .write_u8(0x02)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                // 7-8 - Protocol-version
                writer
                    .write_u16::<BigEndian>(*protocol_version)
                    .context(WritePduFieldSnafu {
                        field: "Protocol-version",
                    })?;

                // 9-10 - Reserved
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WritePduFieldSnafu { field: "reserved" })?;

                // 11-42 - Reserved: sent with the AE title values received
                // in the A-ASSOCIATE-RQ, not tested on receipt
                write_ae_title(writer, "Called-AE-title", called_ae_title)?;
                write_ae_title(writer, "Calling-AE-title", calling_ae_title)?;

                // 43-74 - Reserved
                writer
                    .write_all(&[0_u8; 32])
                    .context(WritePduFieldSnafu { field: "reserved" })?;

                write_pdu_variable_application_context_name(writer, application_context_name)?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_result(writer, presentation_context)?;
                }

                write_pdu_variable_user_variables(writer, user_variables)?;

                Ok(())
            })
        }
        Pdu::AssociationRJ { result, source } => {
            // 1 - PDU-type - 03H
            writer
                .write_u8(0x03)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                // 7 - Reserved
                writer
                    .write_u8(0x00)
                    .context(WritePduFieldSnafu { field: "reserved" })?;

                // 8 - Result: 1 - rejected-permanent, 2 - rejected-transient
                let result = match result {
                    AssociationRjResult::Permanent => 0x01,
                    AssociationRjResult::Transient => 0x02,
                };
                writer
                    .write_u8(result)
                    .context(WritePduFieldSnafu { field: "Result" })?;

                // 9 - Source, 10 - Reason/Diag.
                let (source, reason) = match source {
                    AssociationRjSource::ServiceUser(reason) => (
                        0x01,
                        match reason {
                            AssociationRjServiceUserReason::NoReasonGiven => 0x01,
                            AssociationRjServiceUserReason::ApplicationContextNameNotSupported => {
                                0x02
                            }
                            AssociationRjServiceUserReason::CallingAeTitleNotRecognized => 0x03,
                            AssociationRjServiceUserReason::CalledAeTitleNotRecognized => 0x07,
                            AssociationRjServiceUserReason::Reserved(data) => *data,
                        },
                    ),
                    AssociationRjSource::ServiceProviderAsce(reason) => (
                        0x02,
                        match reason {
                            AssociationRjServiceProviderAsceReason::NoReasonGiven => 0x01,
                            AssociationRjServiceProviderAsceReason::ProtocolVersionNotSupported => {
                                0x02
                            }
                        },
                    ),
                    AssociationRjSource::ServiceProviderPresentation(reason) => (
                        0x03,
                        match reason {
                            AssociationRjServiceProviderPresentationReason::TemporaryCongestion => {
                                0x01
                            }
                            AssociationRjServiceProviderPresentationReason::LocalLimitExceeded => {
                                0x02
                            }
                            AssociationRjServiceProviderPresentationReason::Reserved(data) => *data,
                        },
                    ),
                };
                writer
                    .write_u8(source)
                    .context(WritePduFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WritePduFieldSnafu {
                    field: "Reason/Diag.",
                })?;

                Ok(())
            })
        }
        Pdu::PData { data } => {
            // 1 - PDU-type - 04H
            writer
                .write_u8(0x04)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                for presentation_data_value in data {
                    write_chunk_u32(writer, |writer| {
                        // 5 - Presentation-context-ID
                        writer
                            .write_u8(presentation_data_value.presentation_context_id)
                            .context(WritePduFieldSnafu {
                                field: "Presentation-context-ID",
                            })?;

                        // 6 - Message control header:
                        // bit 0 command, bit 1 last fragment
                        let mut message_header = 0x00;
                        if let PDataValueType::Command = presentation_data_value.value_type {
                            message_header |= 0x01;
                        }
                        if presentation_data_value.is_last {
                            message_header |= 0x02;
                        }
                        writer.write_u8(message_header).context(WritePduFieldSnafu {
                            field: "Message Control Header",
                        })?;

                        // message fragment
                        writer
                            .write_all(&presentation_data_value.data)
                            .context(WritePduFieldSnafu {
                                field: "Presentation-data-value",
                            })?;

                        Ok(())
                    })?;
                }

                Ok(())
            })
        }
        Pdu::ReleaseRQ => {
            // 1 - PDU-type - 05H
            writer
                .write_u8(0x05)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                // 7-10 - Reserved
                writer
                    .write_all(&[0_u8; 4])
                    .context(WritePduFieldSnafu { field: "reserved" })?;
                Ok(())
            })
        }
        Pdu::ReleaseRP => {
            // 1 - PDU-type - 06H
            writer
                .write_u8(0x06)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                // 7-10 - Reserved
                writer
                    .write_all(&[0_u8; 4])
                    .context(WritePduFieldSnafu { field: "reserved" })?;
                Ok(())
            })
        }
        Pdu::AbortRQ { source } => {
            // 1 - PDU-type - 07H
            writer
                .write_u8(0x07)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                // 7-8 - Reserved
                writer
                    .write_u16::<BigEndian>(0x00)
                    .context(WritePduFieldSnafu { field: "reserved" })?;

                // 9 - Source, 10 - Reason/Diag
                let (source, reason) = match source {
                    AbortRqSource::ServiceUser => (0x00, 0x00),
                    AbortRqSource::Reserved => (0x01, 0x00),
                    AbortRqSource::ServiceProvider(reason) => (0x02, *reason as u8),
                };
                writer
                    .write_u8(source)
                    .context(WritePduFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WritePduFieldSnafu {
                    field: "Reason/Diag",
                })?;

                Ok(())
            })
        }
        Pdu::Unknown { pdu_type, data } => {
            // 1 - PDU-type
            writer
                .write_u8(*pdu_type)
                .context(WritePduFieldSnafu { field: "type" })?;

            // 2 - Reserved
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(data)
                    .context(WritePduFieldSnafu { field: "Unknown" })?;
                Ok(())
            })
        }
    }
}

fn write_pdu_variable_application_context_name(
    writer: &mut dyn Write,
    application_context_name: &str,
) -> Result<()> {
    // 1 - Item-type - 10H
    writer
        .write_u8(0x10)
        .context(WritePduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WritePduFieldSnafu { field: "reserved" })?;

    write_chunk_u16(writer, |writer| {
        writer
            .write_all(application_context_name.as_bytes())
            .context(WritePduFieldSnafu {
                field: "Application-context-name",
            })?;
        Ok(())
    })
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
) -> Result<()> {
    // 1 - Item-type - 20H
    writer
        .write_u8(0x20)
        .context(WritePduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WritePduFieldSnafu { field: "reserved" })?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WritePduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6-8 - Reserved
        writer
            .write_all(&[0_u8; 3])
            .context(WritePduFieldSnafu { field: "reserved" })?;

        // abstract syntax sub-item
        writer
            .write_u8(0x30)
            .context(WritePduFieldSnafu { field: "Item-type" })?;
        writer
            .write_u8(0x00)
            .context(WritePduFieldSnafu { field: "reserved" })?;
        write_chunk_u16(writer, |writer| {
            writer
                .write_all(presentation_context.abstract_syntax.as_bytes())
                .context(WritePduFieldSnafu {
                    field: "Abstract-syntax-name",
                })?;
            Ok(())
        })?;

        // transfer syntax sub-items
        for transfer_syntax in &presentation_context.transfer_syntaxes {
            writer
                .write_u8(0x40)
                .context(WritePduFieldSnafu { field: "Item-type" })?;
            writer
                .write_u8(0x00)
                .context(WritePduFieldSnafu { field: "reserved" })?;
            write_chunk_u16(writer, |writer| {
                writer
                    .write_all(transfer_syntax.as_bytes())
                    .context(WritePduFieldSnafu {
                        field: "Transfer-syntax-name",
                    })?;
                Ok(())
            })?;
        }

        Ok(())
    })
}

fn write_pdu_variable_presentation_context_result(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextResult,
) -> Result<()> {
    // 1 - Item-type - 21H
    writer
        .write_u8(0x21)
        .context(WritePduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WritePduFieldSnafu { field: "reserved" })?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WritePduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6 - Reserved
        writer
            .write_u8(0x00)
            .context(WritePduFieldSnafu { field: "reserved" })?;

        // 7 - Result/Reason
        writer
            .write_u8(presentation_context.reason as u8)
            .context(WritePduFieldSnafu {
                field: "Result/Reason",
            })?;

        // 8 - Reserved
        writer
            .write_u8(0x00)
            .context(WritePduFieldSnafu { field: "reserved" })?;

        // 9-xxx - one transfer syntax sub-item
        writer
            .write_u8(0x40)
            .context(WritePduFieldSnafu { field: "Item-type" })?;
        writer
            .write_u8(0x00)
            .context(WritePduFieldSnafu { field: "reserved" })?;
        write_chunk_u16(writer, |writer| {
            writer
                .write_all(presentation_context.transfer_syntax.as_bytes())
                .context(WritePduFieldSnafu {
                    field: "Transfer-syntax-name",
                })?;
            Ok(())
        })?;

        Ok(())
    })
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    // 1 - Item-type - 50H
    writer
        .write_u8(0x50)
        .context(WritePduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    writer
        .write_u8(0x00)
        .context(WritePduFieldSnafu { field: "reserved" })?;

    write_chunk_u16(writer, |writer| {
        for user_variable in user_variables {
            match user_variable {
                UserVariableItem::MaxLength(max_length) => {
                    // 1 - Item-type - 51H
                    writer
                        .write_u8(0x51)
                        .context(WritePduFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WritePduFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u32::<BigEndian>(*max_length)
                            .context(WritePduFieldSnafu {
                                field: "Maximum-length-received",
                            })?;
                        Ok(())
                    })?;
                }
                UserVariableItem::ImplementationClassUID(implementation_class_uid) => {
                    // 1 - Item-type - 52H
                    writer
                        .write_u8(0x52)
                        .context(WritePduFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WritePduFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(implementation_class_uid.as_bytes())
                            .context(WritePduFieldSnafu {
                                field: "Implementation-class-uid",
                            })?;
                        Ok(())
                    })?;
                }
                UserVariableItem::ImplementationVersionName(implementation_version_name) => {
                    // 1 - Item-type - 55H
                    writer
                        .write_u8(0x55)
                        .context(WritePduFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WritePduFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(implementation_version_name.as_bytes())
                            .context(WritePduFieldSnafu {
                                field: "Implementation-version-name",
                            })?;
                        Ok(())
                    })?;
                }
                UserVariableItem::AsynchronousOperationsWindow(invoked, performed) => {
                    // 1 - Item-type - 53H
                    writer
                        .write_u8(0x53)
                        .context(WritePduFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WritePduFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u16::<BigEndian>(*invoked)
                            .context(WritePduFieldSnafu {
                                field: "Maximum-number-operations-invoked",
                            })?;
                        writer
                            .write_u16::<BigEndian>(*performed)
                            .context(WritePduFieldSnafu {
                                field: "Maximum-number-operations-performed",
                            })?;
                        Ok(())
                    })?;
                }
                UserVariableItem::RoleSelection(role_selection) => {
                    // 1 - Item-type - 54H
                    writer
                        .write_u8(0x54)
                        .context(WritePduFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WritePduFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u16::<BigEndian>(role_selection.sop_class_uid.len() as u16)
                            .context(WritePduFieldSnafu { field: "UID-length" })?;
                        writer
                            .write_all(role_selection.sop_class_uid.as_bytes())
                            .context(WritePduFieldSnafu {
                                field: "SOP-class-uid",
                            })?;
                        writer
                            .write_u8(role_selection.scu_role as u8)
                            .context(WritePduFieldSnafu { field: "SCU-role" })?;
                        writer
                            .write_u8(role_selection.scp_role as u8)
                            .context(WritePduFieldSnafu { field: "SCP-role" })?;
                        Ok(())
                    })?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    writer
                        .write_u8(*item_type)
                        .context(WritePduFieldSnafu { field: "Item-type" })?;
                    writer
                        .write_u8(0x00)
                        .context(WritePduFieldSnafu { field: "reserved" })?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_all(data)
                            .context(WritePduFieldSnafu { field: "Unknown" })?;
                        Ok(())
                    })?;
                }
                UserVariableItem::Malformed(item_type, message) => {
                    // placeholders are decode artifacts, their original
                    // bytes are gone
                    return EncodeMalformedItemSnafu {
                        item_type: *item_type,
                        message: message.clone(),
                    }
                    .fail();
                }
            }
        }

        Ok(())
    })
}
