//! Service layer: the SCU and SCP endpoints.
//!
//! [`user::ServiceUser`] connects to a peer, negotiates an association
//! and offers typed call sites for the DIMSE-C operations;
//! [`provider::ServiceProvider`] listens for connections and adapts
//! incoming operations into application handler callbacks.
//!
//! Both endpoints sit on top of one
//! [`StateMachine`](crate::association::sm::StateMachine) per
//! connection and communicate with it exclusively over its event and
//! upcall queues.

pub mod provider;
pub mod user;

use snafu::{Backtrace, Snafu};
use std::net::SocketAddr;

use crate::dimse::Status;
use crate::pdu::{AssociationRjResult, AssociationRjSource};

/// An error from a service operation.
///
/// Transport and protocol errors are fatal to the association.
/// A [`DimseStatus`](Error::DimseStatus) error reports a non-success
/// status word from the peer and leaves the association reusable.
/// Configuration errors are detected before anything is sent.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Connection failed: {}", message))]
    Transport {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Protocol error: {}", message))]
    Protocol {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Association rejected by peer ({:?}, {:?})",
        result,
        source
    ))]
    Rejected {
        result: AssociationRjResult,
        #[snafu(source(false))]
        source: AssociationRjSource,
        backtrace: Backtrace,
    },

    #[snafu(display("{} failed with status {}", operation, status))]
    DimseStatus {
        operation: &'static str,
        status: Status,
        backtrace: Backtrace,
    },

    #[snafu(display("Operation timed out: {}", message))]
    Timeout {
        message: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Configuration error: {}", message))]
    Configuration {
        message: String,
        backtrace: Backtrace,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The connection an operation arrived on,
/// as presented to application handlers.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    /// the AE title of the requesting node
    pub calling_ae_title: String,
    /// the AE title this node was addressed by
    pub called_ae_title: String,
    /// the address of the peer, when known
    pub peer_address: Option<SocketAddr>,
}

/// The level of a query/retrieve operation,
/// carried as the `(0008,0052) QueryRetrieveLevel` identifier element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRetrieveLevel {
    Patient,
    Study,
    Series,
    Image,
}

impl QueryRetrieveLevel {
    /// The identifier element value for this level.
    pub fn keyword(self) -> &'static str {
        match self {
            QueryRetrieveLevel::Patient => "PATIENT",
            QueryRetrieveLevel::Study => "STUDY",
            QueryRetrieveLevel::Series => "SERIES",
            QueryRetrieveLevel::Image => "IMAGE",
        }
    }
}
