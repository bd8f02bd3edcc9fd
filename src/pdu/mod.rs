//! Protocol data unit module
//!
//! This module comprises the data structures for the seven protocol data
//! units of the DICOM upper layer protocol (part 8, section 9.3),
//! their sub-items, and the respective encoder and decoder.
//!
//! PDU and sub-item headers are always big endian on the wire.
//! Unrecognized PDUs and sub-items are preserved as opaque byte containers
//! so that a peer's extensions survive a round trip.

pub mod reader;
pub mod writer;

#[cfg(test)]
mod test;

pub use reader::read_pdu;
pub use writer::write_pdu;

/// The size of a PDU header in bytes: type, reserved byte, 4-byte length.
pub const PDU_HEADER_SIZE: u32 = 6;

/// The size of a PDV header inside a P-DATA-TF PDU:
/// 4-byte item length, context ID, message control header.
pub const PDV_HEADER_SIZE: u32 = 6;

/// The default maximum PDU receive size advertised in user information:
/// 16 MiB.
pub const DEFAULT_MAX_PDU: u32 = 16 * 1024 * 1024;

/// The smallest maximum PDU receive size
/// that an application entity is allowed to configure.
pub const MINIMUM_PDU_SIZE: u32 = 4_096;

/// The application context name of the DICOM application context,
/// the first variable item of every A-ASSOCIATE-RQ.
pub const DICOM_APPLICATION_CONTEXT_NAME: &str = "1.2.840.10008.3.1.1.1";

/// The version of the upper layer protocol spoken by this implementation:
/// version 1, identified by bit 0.
pub const PROTOCOL_VERSION: u16 = 1;

/// A presentation context as proposed by the association requester:
/// one abstract syntax with one or more candidate transfer syntaxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContextProposed {
    /// the context identifier, an odd integer between 1 and 255
    pub id: u8,
    /// the abstract syntax UID naming the requested service
    pub abstract_syntax: String,
    /// the candidate transfer syntax UIDs, in order of preference
    pub transfer_syntaxes: Vec<String>,
}

/// A presentation context as answered by the association acceptor:
/// the requester's context ID, the outcome,
/// and the single transfer syntax chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationContextResult {
    /// the context identifier echoed from the request
    pub id: u8,
    /// the outcome of the negotiation for this context
    pub reason: PresentationContextResultReason,
    /// the chosen transfer syntax UID
    /// (not significant unless the context was accepted)
    pub transfer_syntax: String,
}

/// The outcome of the negotiation of a single presentation context
/// (part 8, table 9-18).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationContextResultReason {
    Acceptance = 0,
    UserRejection = 1,
    NoReason = 2,
    AbstractSyntaxNotSupported = 3,
    TransferSyntaxesNotSupported = 4,
}

impl PresentationContextResultReason {
    fn from(reason: u8) -> Option<Self> {
        match reason {
            0 => Some(PresentationContextResultReason::Acceptance),
            1 => Some(PresentationContextResultReason::UserRejection),
            2 => Some(PresentationContextResultReason::NoReason),
            3 => Some(PresentationContextResultReason::AbstractSyntaxNotSupported),
            4 => Some(PresentationContextResultReason::TransferSyntaxesNotSupported),
            _ => None,
        }
    }
}

/// The result field of an A-ASSOCIATE-RJ PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRjResult {
    Permanent,
    Transient,
}

impl AssociationRjResult {
    fn from(result: u8) -> Option<Self> {
        match result {
            1 => Some(AssociationRjResult::Permanent),
            2 => Some(AssociationRjResult::Transient),
            _ => None,
        }
    }
}

/// The source and reason fields of an A-ASSOCIATE-RJ PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRjSource {
    /// the rejection was issued by the UL service user
    ServiceUser(AssociationRjServiceUserReason),
    /// the rejection was issued by the UL service provider
    /// (ACSE related function)
    ServiceProviderAsce(AssociationRjServiceProviderAsceReason),
    /// the rejection was issued by the UL service provider
    /// (presentation related function)
    ServiceProviderPresentation(AssociationRjServiceProviderPresentationReason),
}

impl AssociationRjSource {
    fn from(source: u8, reason: u8) -> Option<Self> {
        match source {
            1 => match reason {
                1 => Some(AssociationRjServiceUserReason::NoReasonGiven),
                2 => Some(AssociationRjServiceUserReason::ApplicationContextNameNotSupported),
                3 => Some(AssociationRjServiceUserReason::CallingAeTitleNotRecognized),
                7 => Some(AssociationRjServiceUserReason::CalledAeTitleNotRecognized),
                x => Some(AssociationRjServiceUserReason::Reserved(x)),
            }
            .map(AssociationRjSource::ServiceUser),
            2 => match reason {
                1 => Some(AssociationRjServiceProviderAsceReason::NoReasonGiven),
                2 => Some(AssociationRjServiceProviderAsceReason::ProtocolVersionNotSupported),
                _ => None,
            }
            .map(AssociationRjSource::ServiceProviderAsce),
            3 => match reason {
                1 => Some(AssociationRjServiceProviderPresentationReason::TemporaryCongestion),
                2 => Some(AssociationRjServiceProviderPresentationReason::LocalLimitExceeded),
                x => Some(AssociationRjServiceProviderPresentationReason::Reserved(x)),
            }
            .map(AssociationRjSource::ServiceProviderPresentation),
            _ => None,
        }
    }
}

/// A rejection reason given by the UL service user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRjServiceUserReason {
    NoReasonGiven,
    ApplicationContextNameNotSupported,
    CallingAeTitleNotRecognized,
    CalledAeTitleNotRecognized,
    Reserved(u8),
}

/// A rejection reason given by the UL service provider
/// (ACSE related function).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRjServiceProviderAsceReason {
    NoReasonGiven,
    ProtocolVersionNotSupported,
}

/// A rejection reason given by the UL service provider
/// (presentation related function).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationRjServiceProviderPresentationReason {
    TemporaryCongestion,
    LocalLimitExceeded,
    Reserved(u8),
}

/// A single presentation data value inside a P-DATA-TF PDU:
/// a fragment of either a command set or a data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PDataValue {
    /// the presentation context this fragment belongs to
    pub presentation_context_id: u8,
    /// whether the fragment is command or data set bytes
    pub value_type: PDataValueType,
    /// whether this is the last fragment of its stream
    pub is_last: bool,
    /// the fragment payload
    pub data: Vec<u8>,
}

/// The kind of payload carried by a presentation data value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PDataValueType {
    Command,
    Data,
}

/// The source and reason fields of an A-ABORT PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortRqSource {
    /// the abort was initiated by the UL service user
    ServiceUser,
    /// the source field carried a reserved value
    Reserved,
    /// the abort was initiated by the UL service provider
    ServiceProvider(AbortRqServiceProviderReason),
}

impl AbortRqSource {
    fn from(source: u8, reason: u8) -> Option<Self> {
        match source {
            0 => Some(AbortRqSource::ServiceUser),
            1 => Some(AbortRqSource::Reserved),
            2 => AbortRqServiceProviderReason::from(reason).map(AbortRqSource::ServiceProvider),
            _ => None,
        }
    }
}

/// An abort reason given by the UL service provider
/// (part 8, section 9.3.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortRqServiceProviderReason {
    ReasonNotSpecified = 0,
    UnrecognizedPdu = 1,
    UnexpectedPdu = 2,
    Reserved = 3,
    UnrecognizedPduParameter = 4,
    UnexpectedPduParameter = 5,
    InvalidPduParameter = 6,
}

impl AbortRqServiceProviderReason {
    fn from(reason: u8) -> Option<Self> {
        match reason {
            0 => Some(AbortRqServiceProviderReason::ReasonNotSpecified),
            1 => Some(AbortRqServiceProviderReason::UnrecognizedPdu),
            2 => Some(AbortRqServiceProviderReason::UnexpectedPdu),
            3 => Some(AbortRqServiceProviderReason::Reserved),
            4 => Some(AbortRqServiceProviderReason::UnrecognizedPduParameter),
            5 => Some(AbortRqServiceProviderReason::UnexpectedPduParameter),
            6 => Some(AbortRqServiceProviderReason::InvalidPduParameter),
            _ => None,
        }
    }
}

/// SCU/SCP role selection for one SOP class
/// (part 7, annex D.3.3.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSelection {
    /// the SOP class the roles apply to
    pub sop_class_uid: String,
    /// whether the proposing node may act as SCU for this SOP class
    pub scu_role: bool,
    /// whether the proposing node may act as SCP for this SOP class
    pub scp_role: bool,
}

/// A variable item decoded from a PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PduVariableItem {
    Unknown(u8),
    ApplicationContext(String),
    PresentationContextProposed(PresentationContextProposed),
    PresentationContextResult(PresentationContextResult),
    UserVariables(Vec<UserVariableItem>),
}

/// A sub-item of the user information item.
///
/// Unrecognized sub-item types are preserved verbatim in the
/// [`Unknown`](UserVariableItem::Unknown) variant. A recognized sub-item
/// whose payload could not be decoded becomes a
/// [`Malformed`](UserVariableItem::Malformed) placeholder carrying a
/// diagnostic message; the enclosing PDU still decodes so that the state
/// machine can answer with an invalid-PDU-parameter abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserVariableItem {
    /// maximum length sub-item (0x51): the maximum PDU payload length,
    /// in bytes, the emitting node is prepared to receive (0 = unlimited)
    MaxLength(u32),
    /// implementation class UID sub-item (0x52)
    ImplementationClassUID(String),
    /// implementation version name sub-item (0x55)
    ImplementationVersionName(String),
    /// asynchronous operations window sub-item (0x53):
    /// maximum operations invoked and maximum operations performed
    AsynchronousOperationsWindow(u16, u16),
    /// SCU/SCP role selection sub-item (0x54)
    RoleSelection(RoleSelection),
    /// an unrecognized sub-item, kept as raw bytes
    Unknown(u8, Vec<u8>),
    /// a recognized sub-item with an undecodable payload
    Malformed(u8, String),
}

/// A DICOM upper layer protocol data unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    /// an unrecognized PDU type, kept as raw bytes
    Unknown {
        pdu_type: u8,
        data: Vec<u8>,
    },
    AssociationRQ {
        protocol_version: u16,
        calling_ae_title: String,
        called_ae_title: String,
        application_context_name: String,
        presentation_contexts: Vec<PresentationContextProposed>,
        user_variables: Vec<UserVariableItem>,
    },
    AssociationAC {
        protocol_version: u16,
        calling_ae_title: String,
        called_ae_title: String,
        application_context_name: String,
        presentation_contexts: Vec<PresentationContextResult>,
        user_variables: Vec<UserVariableItem>,
    },
    AssociationRJ {
        result: AssociationRjResult,
        source: AssociationRjSource,
    },
    PData {
        data: Vec<PDataValue>,
    },
    ReleaseRQ,
    ReleaseRP,
    AbortRQ {
        source: AbortRqSource,
    },
}

impl Pdu {
    /// A short description of the PDU suitable for logging,
    /// without dumping payload bytes.
    pub fn short_description(&self) -> String {
        match self {
            Pdu::Unknown { pdu_type, data } => {
                format!("Unknown {{ type: 0x{:02X}, {} bytes }}", pdu_type, data.len())
            }
            Pdu::AssociationRQ {
                calling_ae_title,
                called_ae_title,
                presentation_contexts,
                ..
            } => format!(
                "A-ASSOCIATE-RQ {{ calling: {:?}, called: {:?}, contexts: {} }}",
                calling_ae_title,
                called_ae_title,
                presentation_contexts.len()
            ),
            Pdu::AssociationAC {
                presentation_contexts,
                ..
            } => format!(
                "A-ASSOCIATE-AC {{ contexts: {} }}",
                presentation_contexts.len()
            ),
            Pdu::AssociationRJ { result, source } => {
                format!("A-ASSOCIATE-RJ {{ result: {:?}, source: {:?} }}", result, source)
            }
            Pdu::PData { data } => {
                let bytes: usize = data.iter().map(|pdv| pdv.data.len()).sum();
                format!("P-DATA-TF {{ {} values, {} bytes }}", data.len(), bytes)
            }
            Pdu::ReleaseRQ => "A-RELEASE-RQ".to_string(),
            Pdu::ReleaseRP => "A-RELEASE-RP".to_string(),
            Pdu::AbortRQ { source } => format!("A-ABORT {{ source: {:?} }}", source),
        }
    }

    /// Whether the PDU carries a sub-item
    /// which was recognized but could not be decoded.
    pub fn has_malformed_items(&self) -> bool {
        let user_variables = match self {
            Pdu::AssociationRQ { user_variables, .. } => user_variables,
            Pdu::AssociationAC { user_variables, .. } => user_variables,
            _ => return false,
        };
        user_variables
            .iter()
            .any(|item| matches!(item, UserVariableItem::Malformed(..)))
    }
}
