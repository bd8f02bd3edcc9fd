//! This crate contains the types and methods needed to exchange
//! DICOM messages with other nodes over the upper layer protocol.
//!
//! It covers the network half of the DICOM standard:
//! protocol data unit framing, association negotiation,
//! the part 8 §9.2 association state machine,
//! and the DIMSE command layer on top of it.
//! Data set payloads are carried verbatim,
//! so that reading and writing DICOM data sets
//! can stay in a dedicated library.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_
//!   and their encoder and decoder.
//! - The [`dimse`] module
//!   provides the typed DIMSE command sets
//!   (C-ECHO, C-STORE, C-FIND, C-GET, C-MOVE)
//!   and the fragment assembler.
//! - The [`association`] module
//!   comprises the presentation context manager
//!   and the association state machine
//!   which drives each TCP connection.
//! - The [`service`] module
//!   offers the high level endpoints:
//!   [`ServiceUser`] for the SCU role
//!   and [`ServiceProvider`] for the SCP role.

pub mod association;
pub mod dimse;
pub mod pdu;
pub mod service;
pub mod uids;

/// The implementation class UID generically referring to this library.
///
/// Generated as per the standard, part 5, section B.2.
///
/// This UID may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.305828748732282583416674045285907819694";

/// The implementation version name generically referring to this library.
///
/// This name may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_VERSION_NAME: &str = "dicom-net 0.1.0";

// re-exports

pub use dimse::{Command, Status};
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::Pdu;
pub use service::provider::{ServiceProvider, ServiceProviderOptions};
pub use service::user::{ServiceUser, ServiceUserOptions};
