//! DICOM association module
//!
//! This module contains the machinery for establishing and driving
//! associations between DICOM nodes over TCP:
//!
//! - the [`context`] module negotiates presentation contexts and
//!   keeps the two-way mapping between context IDs and syntaxes;
//! - the [`pdata`] module splits outbound DIMSE streams into
//!   presentation data value fragments bounded by the peer's
//!   maximum PDU size;
//! - the [`sm`] module implements the part 8 §9.2 association state
//!   machine, which owns the TCP connection of one association and is
//!   driven by PDUs from its reader thread and by service primitives
//!   from the service layer;
//! - the [`fault`] module holds the process-wide fault injection hooks
//!   used by deterministic failure tests.
//!
//! Most applications use the [`service`](crate::service) layer instead
//! of driving a state machine directly.

pub mod context;
pub mod fault;
pub mod pdata;
pub mod sm;

pub use context::{ContextManager, NegotiatedContext};
pub use sm::{StateMachine, UpcallEvent};

/// The parameters shared by both peers after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationParams {
    /// the AE title of the association requester
    pub calling_ae_title: String,
    /// the AE title of the association acceptor
    pub called_ae_title: String,
    /// the negotiated presentation contexts, accepted and rejected
    pub contexts: Vec<NegotiatedContext>,
    /// the maximum PDU payload size the peer is prepared to receive;
    /// 0 means unlimited
    pub peer_max_pdu_length: u32,
    /// the implementation class UID announced by the peer
    pub peer_implementation_class_uid: Option<String>,
    /// the implementation version name announced by the peer
    pub peer_implementation_version_name: Option<String>,
    /// the asynchronous operations window announced by the peer,
    /// recorded but never exploited
    pub peer_async_operations_window: Option<(u16, u16)>,
}

impl AssociationParams {
    /// The accepted presentation contexts.
    pub fn accepted_contexts(&self) -> impl Iterator<Item = &NegotiatedContext> {
        self.contexts.iter().filter(|c| c.accepted)
    }

    /// Whether the given abstract syntax was accepted in the handshake.
    pub fn is_negotiated(&self, abstract_syntax_uid: &str) -> bool {
        self.accepted_contexts()
            .any(|c| c.abstract_syntax == abstract_syntax_uid)
    }
}
