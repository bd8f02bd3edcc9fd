//! The association state machine of part 8, section 9.2.
//!
//! Each TCP connection is owned by exactly one [`StateMachine`], which
//! runs on its own thread. A companion reader thread owns the read half
//! of the socket, decodes PDUs and pushes them as events onto the
//! machine's queue; the service layer pushes its request primitives onto
//! the same queue. The machine consumes one event at a time, looks up
//! the `(state, event)` pair in the transition table, runs the action
//! and performs any outbound writes synchronously. There is no separate
//! writer thread, so outbound PDU framing can never interleave.
//!
//! The states keep the standard numbering `Sta1`..`Sta13` and the events
//! `Evt01`..`Evt19`, so the transition table can be checked side by side
//! with table 9-10 of the standard. A `(state, event)` pair absent from
//! the table is a protocol violation and is answered with AA-8:
//! A-ABORT (unexpected PDU), then connection teardown.

use std::collections::VecDeque;
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::association::context::ContextManager;
use crate::association::fault::{fault_injector, FaultAction};
use crate::association::pdata::split_into_pdus;
use crate::association::AssociationParams;
use crate::dimse::{Command, CommandAssembler};
use crate::pdu::{
    read_pdu, reader, write_pdu, AbortRqServiceProviderReason, AbortRqSource,
    AssociationRjResult, AssociationRjServiceUserReason, AssociationRjSource, PDataValue,
    PDataValueType, Pdu, RoleSelection, UserVariableItem, DEFAULT_MAX_PDU,
    DICOM_APPLICATION_CONTEXT_NAME, MINIMUM_PDU_SIZE, PROTOCOL_VERSION,
};

/// The default capacity of the bounded event and upcall queues.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 128;

/// The default ARTIM timeout.
pub const DEFAULT_ARTIM_TIMEOUT: Duration = Duration::from_secs(30);

/// The states of the association state machine,
/// numbered as in part 8, table 9-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// idle, no association and no transport connection
    Sta1,
    /// transport connection open, awaiting A-ASSOCIATE-RQ
    Sta2,
    /// awaiting the local A-ASSOCIATE response primitive
    Sta3,
    /// awaiting the transport connection to open
    Sta4,
    /// awaiting A-ASSOCIATE-AC or -RJ
    Sta5,
    /// association established, ready for data transfer
    Sta6,
    /// awaiting A-RELEASE-RP
    Sta7,
    /// awaiting the local A-RELEASE response primitive
    Sta8,
    /// release collision, requester side: awaiting the local response
    Sta9,
    /// release collision, acceptor side: awaiting A-RELEASE-RP
    Sta10,
    /// release collision, requester side: awaiting A-RELEASE-RP
    Sta11,
    /// release collision, acceptor side: awaiting the local response
    Sta12,
    /// awaiting the transport connection to close
    Sta13,
}

/// The event numbers of part 8, table 9-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// A-ASSOCIATE request primitive (local)
    Evt01,
    /// transport connection confirmed
    Evt02,
    /// A-ASSOCIATE-AC PDU received
    Evt03,
    /// A-ASSOCIATE-RJ PDU received
    Evt04,
    /// transport connection indication (acceptor)
    Evt05,
    /// A-ASSOCIATE-RQ PDU received
    Evt06,
    /// A-ASSOCIATE response primitive: accept (local)
    Evt07,
    /// A-ASSOCIATE response primitive: reject (local)
    Evt08,
    /// P-DATA request primitive (local)
    Evt09,
    /// P-DATA-TF PDU received
    Evt10,
    /// A-RELEASE request primitive (local)
    Evt11,
    /// A-RELEASE-RQ PDU received
    Evt12,
    /// A-RELEASE-RP PDU received
    Evt13,
    /// A-RELEASE response primitive (local)
    Evt14,
    /// A-ABORT request primitive (local)
    Evt15,
    /// A-ABORT PDU received
    Evt16,
    /// transport connection closed
    Evt17,
    /// ARTIM timer expired
    Evt18,
    /// unrecognized or invalid PDU received
    Evt19,
}

/// The actions of part 8, table 9-10.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ae1,
    Ae2,
    Ae3,
    Ae4,
    Ae5,
    Ae6,
    Ae7,
    Ae8,
    Dt1,
    Dt2,
    Ar1,
    Ar2,
    Ar3,
    Ar4,
    Ar5,
    Ar6,
    Ar7,
    Ar8,
    Ar9,
    Ar10,
    Aa1,
    Aa2,
    Aa3,
    Aa4,
    Aa5,
    Aa6,
    Aa7,
    Aa8,
}

/// Which side of the handshake this machine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// the node requesting the association (usually the SCU)
    Requester,
    /// the node accepting the association (usually the SCP)
    Acceptor,
}

/// A reference to a presentation context of the current association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextRef {
    /// by context identifier, as carried by incoming fragments
    Id(u8),
    /// by abstract syntax, as known to outgoing call sites
    AbstractSyntax(String),
}

/// The payload of a P-DATA request primitive:
/// one command set and optionally the data set bytes that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimsePayload {
    pub context: ContextRef,
    pub command: Command,
    pub data: Option<Vec<u8>>,
}

/// An event consumed by the state machine,
/// either from the PDU reader thread or from the service layer.
#[derive(Debug)]
pub enum Event {
    AAssociateRq,
    TransportConnected,
    AAssociateAcReceived(Box<Pdu>),
    AAssociateRjReceived {
        result: AssociationRjResult,
        source: AssociationRjSource,
    },
    TransportAccepted,
    AAssociateRqReceived(Box<Pdu>),
    AAssociateAccept,
    AAssociateReject {
        reason: AssociationRjServiceUserReason,
    },
    PDataRq(DimsePayload),
    PDataTfReceived(Vec<PDataValue>),
    AReleaseRq,
    AReleaseRqReceived,
    AReleaseRpReceived,
    AReleaseRsp,
    AAbortRq,
    AAbortReceived {
        source: AbortRqSource,
    },
    TransportClosed,
    ArtimExpired,
    InvalidPduReceived {
        reason: AbortRqServiceProviderReason,
    },
}

impl Event {
    /// The event number of this event in table 9-10.
    pub fn code(&self) -> EventCode {
        match self {
            Event::AAssociateRq => EventCode::Evt01,
            Event::TransportConnected => EventCode::Evt02,
            Event::AAssociateAcReceived(_) => EventCode::Evt03,
            Event::AAssociateRjReceived { .. } => EventCode::Evt04,
            Event::TransportAccepted => EventCode::Evt05,
            Event::AAssociateRqReceived(_) => EventCode::Evt06,
            Event::AAssociateAccept => EventCode::Evt07,
            Event::AAssociateReject { .. } => EventCode::Evt08,
            Event::PDataRq(_) => EventCode::Evt09,
            Event::PDataTfReceived(_) => EventCode::Evt10,
            Event::AReleaseRq => EventCode::Evt11,
            Event::AReleaseRqReceived => EventCode::Evt12,
            Event::AReleaseRpReceived => EventCode::Evt13,
            Event::AReleaseRsp => EventCode::Evt14,
            Event::AAbortRq => EventCode::Evt15,
            Event::AAbortReceived { .. } => EventCode::Evt16,
            Event::TransportClosed => EventCode::Evt17,
            Event::ArtimExpired => EventCode::Evt18,
            Event::InvalidPduReceived { .. } => EventCode::Evt19,
        }
    }
}

/// An indication delivered by the state machine to the service layer.
#[derive(Debug)]
pub enum UpcallEvent {
    /// the handshake completed and the association is ready for data
    Established(AssociationParams),
    /// the peer rejected the association request
    Rejected {
        result: AssociationRjResult,
        source: AssociationRjSource,
    },
    /// the handshake could not be carried out
    EstablishFailed { message: String },
    /// a complete DIMSE message arrived
    Data {
        context_id: u8,
        abstract_syntax_uid: String,
        transfer_syntax_uid: String,
        command: Command,
        data: Option<Vec<u8>>,
    },
    /// the peer requested a release; answer with an
    /// [`Event::AReleaseRsp`] downcall
    ReleaseRequested,
    /// the release handshake completed
    Released,
    /// the association was aborted, by the peer or by a protocol
    /// violation
    Aborted { message: String },
    /// the transport connection is gone; terminal
    Closed,
}

/// Configuration of one state machine.
#[derive(Debug, Clone)]
pub struct SmOptions {
    pub role: Role,
    /// this node's AE title
    pub local_ae_title: String,
    /// the peer's AE title: the called AE title when requesting
    /// (filled from the A-ASSOCIATE-RQ when accepting)
    pub peer_ae_title: String,
    /// the peer address to connect to (requester only)
    pub peer_address: Option<String>,
    /// requester: the abstract syntaxes to propose;
    /// acceptor: the accept list
    pub abstract_syntaxes: Vec<String>,
    /// the supported transfer syntaxes, in order of preference
    pub transfer_syntaxes: Vec<String>,
    /// the maximum PDU payload size advertised to the peer
    pub max_pdu_receive_size: u32,
    pub implementation_class_uid: String,
    pub implementation_version_name: String,
    /// role selections to propose (requester only); the acceptor
    /// echoes the peer's proposals for accepted contexts
    pub role_selections: Vec<RoleSelection>,
    /// reject associations whose called AE title does not match
    /// `local_ae_title` (acceptor only)
    pub require_called_ae_title: bool,
    pub artim_timeout: Duration,
    pub event_queue_capacity: usize,
}

impl SmOptions {
    /// Baseline options for the given role;
    /// the service layer fills in the rest.
    pub fn new(role: Role) -> Self {
        SmOptions {
            role,
            local_ae_title: String::new(),
            peer_ae_title: String::new(),
            peer_address: None,
            abstract_syntaxes: vec![],
            transfer_syntaxes: vec![],
            max_pdu_receive_size: DEFAULT_MAX_PDU,
            implementation_class_uid: crate::IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_version_name: crate::IMPLEMENTATION_VERSION_NAME.to_string(),
            role_selections: vec![],
            require_called_ae_title: false,
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

/// The channel ends of a running state machine.
pub struct SmHandle {
    /// downcall queue: request primitives for the machine
    pub events: SyncSender<Event>,
    /// upcall queue: indications from the machine
    pub upcalls: Receiver<UpcallEvent>,
    /// the machine's thread, joinable once [`UpcallEvent::Closed`],
    /// [`UpcallEvent::Released`] or a failure indication was seen
    pub thread: JoinHandle<()>,
}

/// The transition table of part 8, table 9-10, one row per valid
/// `(state, event)` pair. The release collision row (Sta7 + Evt12)
/// nominally leads to Sta9; the acceptor side diverges to Sta10 when
/// the action runs.
static TRANSITIONS: &[(State, EventCode, Action, State)] = &[
    (State::Sta1, EventCode::Evt01, Action::Ae1, State::Sta4),
    (State::Sta4, EventCode::Evt02, Action::Ae2, State::Sta5),
    (State::Sta1, EventCode::Evt05, Action::Ae5, State::Sta2),
    // A-ASSOCIATE-AC received
    (State::Sta2, EventCode::Evt03, Action::Aa1, State::Sta13),
    (State::Sta3, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta5, EventCode::Evt03, Action::Ae3, State::Sta6),
    (State::Sta6, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta7, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta8, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta9, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta10, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta11, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta12, EventCode::Evt03, Action::Aa8, State::Sta13),
    (State::Sta13, EventCode::Evt03, Action::Aa6, State::Sta13),
    // A-ASSOCIATE-RJ received
    (State::Sta2, EventCode::Evt04, Action::Aa1, State::Sta13),
    (State::Sta3, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta5, EventCode::Evt04, Action::Ae4, State::Sta1),
    (State::Sta6, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta7, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta8, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta9, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta10, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta11, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta12, EventCode::Evt04, Action::Aa8, State::Sta13),
    (State::Sta13, EventCode::Evt04, Action::Aa6, State::Sta13),
    // A-ASSOCIATE-RQ received
    (State::Sta2, EventCode::Evt06, Action::Ae6, State::Sta3),
    (State::Sta3, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta5, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta6, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta7, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta8, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta9, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta10, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta11, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta12, EventCode::Evt06, Action::Aa8, State::Sta13),
    (State::Sta13, EventCode::Evt06, Action::Aa7, State::Sta13),
    // local accept/reject
    (State::Sta3, EventCode::Evt07, Action::Ae7, State::Sta6),
    (State::Sta3, EventCode::Evt08, Action::Ae8, State::Sta13),
    // P-DATA request primitive
    (State::Sta6, EventCode::Evt09, Action::Dt1, State::Sta6),
    (State::Sta8, EventCode::Evt09, Action::Ar7, State::Sta8),
    // P-DATA-TF received
    (State::Sta2, EventCode::Evt10, Action::Aa1, State::Sta13),
    (State::Sta3, EventCode::Evt10, Action::Aa8, State::Sta13),
    (State::Sta5, EventCode::Evt10, Action::Aa8, State::Sta13),
    (State::Sta6, EventCode::Evt10, Action::Dt2, State::Sta6),
    (State::Sta7, EventCode::Evt10, Action::Ar6, State::Sta7),
    (State::Sta8, EventCode::Evt10, Action::Aa8, State::Sta13),
    (State::Sta9, EventCode::Evt10, Action::Aa8, State::Sta13),
    (State::Sta10, EventCode::Evt10, Action::Aa8, State::Sta13),
    (State::Sta11, EventCode::Evt10, Action::Aa8, State::Sta13),
    (State::Sta12, EventCode::Evt10, Action::Aa8, State::Sta13),
    (State::Sta13, EventCode::Evt10, Action::Aa6, State::Sta13),
    // A-RELEASE request primitive
    (State::Sta6, EventCode::Evt11, Action::Ar1, State::Sta7),
    // A-RELEASE-RQ received
    (State::Sta2, EventCode::Evt12, Action::Aa1, State::Sta13),
    (State::Sta3, EventCode::Evt12, Action::Aa8, State::Sta13),
    (State::Sta5, EventCode::Evt12, Action::Aa8, State::Sta13),
    (State::Sta6, EventCode::Evt12, Action::Ar2, State::Sta8),
    (State::Sta7, EventCode::Evt12, Action::Ar8, State::Sta9),
    (State::Sta8, EventCode::Evt12, Action::Aa8, State::Sta13),
    (State::Sta9, EventCode::Evt12, Action::Aa8, State::Sta13),
    (State::Sta10, EventCode::Evt12, Action::Aa8, State::Sta13),
    (State::Sta11, EventCode::Evt12, Action::Aa8, State::Sta13),
    (State::Sta12, EventCode::Evt12, Action::Aa8, State::Sta13),
    (State::Sta13, EventCode::Evt12, Action::Aa6, State::Sta13),
    // A-RELEASE-RP received
    (State::Sta2, EventCode::Evt13, Action::Aa1, State::Sta13),
    (State::Sta3, EventCode::Evt13, Action::Aa8, State::Sta13),
    (State::Sta5, EventCode::Evt13, Action::Aa8, State::Sta13),
    (State::Sta6, EventCode::Evt13, Action::Aa8, State::Sta13),
    (State::Sta7, EventCode::Evt13, Action::Ar3, State::Sta1),
    (State::Sta8, EventCode::Evt13, Action::Aa8, State::Sta13),
    (State::Sta9, EventCode::Evt13, Action::Aa8, State::Sta13),
    (State::Sta10, EventCode::Evt13, Action::Ar10, State::Sta12),
    (State::Sta11, EventCode::Evt13, Action::Ar3, State::Sta1),
    (State::Sta12, EventCode::Evt13, Action::Aa8, State::Sta13),
    (State::Sta13, EventCode::Evt13, Action::Aa6, State::Sta13),
    // A-RELEASE response primitive
    (State::Sta8, EventCode::Evt14, Action::Ar4, State::Sta13),
    (State::Sta9, EventCode::Evt14, Action::Ar9, State::Sta11),
    (State::Sta12, EventCode::Evt14, Action::Ar4, State::Sta13),
    // A-ABORT request primitive
    (State::Sta3, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta4, EventCode::Evt15, Action::Aa2, State::Sta1),
    (State::Sta5, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta6, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta7, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta8, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta9, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta10, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta11, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta12, EventCode::Evt15, Action::Aa1, State::Sta13),
    (State::Sta13, EventCode::Evt15, Action::Aa2, State::Sta1),
    // A-ABORT received
    (State::Sta2, EventCode::Evt16, Action::Aa2, State::Sta1),
    (State::Sta3, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta4, EventCode::Evt16, Action::Aa2, State::Sta1),
    (State::Sta5, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta6, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta7, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta8, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta9, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta10, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta11, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta12, EventCode::Evt16, Action::Aa3, State::Sta1),
    (State::Sta13, EventCode::Evt16, Action::Aa2, State::Sta1),
    // transport connection closed
    (State::Sta2, EventCode::Evt17, Action::Aa5, State::Sta1),
    (State::Sta3, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta4, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta5, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta6, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta7, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta8, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta9, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta10, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta11, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta12, EventCode::Evt17, Action::Aa4, State::Sta1),
    (State::Sta13, EventCode::Evt17, Action::Ar5, State::Sta1),
    // ARTIM timer expired: on connection establishment and close,
    // and on a release request that the peer never answered
    (State::Sta2, EventCode::Evt18, Action::Aa2, State::Sta1),
    (State::Sta7, EventCode::Evt18, Action::Aa1, State::Sta13),
    (State::Sta13, EventCode::Evt18, Action::Aa2, State::Sta1),
    // unrecognized or invalid PDU
    (State::Sta2, EventCode::Evt19, Action::Aa1, State::Sta13),
    (State::Sta3, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta5, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta6, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta7, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta8, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta9, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta10, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta11, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta12, EventCode::Evt19, Action::Aa8, State::Sta13),
    (State::Sta13, EventCode::Evt19, Action::Aa7, State::Sta13),
];

/// Look up the action and next state for a `(state, event)` pair.
pub fn lookup(state: State, event: EventCode) -> Option<(Action, State)> {
    TRANSITIONS
        .iter()
        .find(|(s, e, _, _)| *s == state && *e == event)
        .map(|(_, _, action, next)| (*action, *next))
}

/// The state machine of one association.
pub struct StateMachine {
    options: SmOptions,
    state: State,
    socket: Option<TcpStream>,
    contexts: ContextManager,
    assembler: CommandAssembler,
    queue: VecDeque<Event>,
    events_rx: Receiver<Event>,
    events_tx: SyncSender<Event>,
    upcalls: SyncSender<UpcallEvent>,
    /// effective cap for outbound fragments
    peer_max_pdu_length: u32,
    params: Option<AssociationParams>,
    /// acceptor: the A-ASSOCIATE-AC built by AE-6, sent by AE-7
    pending_ac: Option<Pdu>,
    artim_deadline: Option<Instant>,
    write_buffer: Vec<u8>,
    reader: Option<JoinHandle<()>>,
}

impl StateMachine {
    /// Start a state machine on its own thread.
    ///
    /// An acceptor is given the freshly accepted stream; a requester
    /// opens its own connection when the A-ASSOCIATE request primitive
    /// arrives.
    pub fn spawn(options: SmOptions, socket: Option<TcpStream>) -> SmHandle {
        let (events_tx, events_rx) = sync_channel(options.event_queue_capacity);
        let (upcall_tx, upcall_rx) = sync_channel(options.event_queue_capacity);

        let initial = match options.role {
            Role::Requester => Event::AAssociateRq,
            Role::Acceptor => Event::TransportAccepted,
        };

        let mut machine = StateMachine {
            options,
            state: State::Sta1,
            socket,
            contexts: ContextManager::new(),
            assembler: CommandAssembler::new(),
            queue: VecDeque::new(),
            events_rx,
            events_tx: events_tx.clone(),
            upcalls: upcall_tx,
            peer_max_pdu_length: DEFAULT_MAX_PDU,
            params: None,
            pending_ac: None,
            artim_deadline: None,
            write_buffer: Vec::new(),
            reader: None,
        };
        machine.queue.push_back(initial);

        let thread = thread::spawn(move || machine.run());

        SmHandle {
            events: events_tx,
            upcalls: upcall_rx,
            thread,
        }
    }

    /// Consume events until the association is discarded.
    pub fn run(mut self) {
        loop {
            let event = self.next_event();
            self.handle(event);
            if self.state == State::Sta1 {
                break;
            }
        }
        // unblock and collect the reader before going away
        self.close_transport();
        let StateMachine {
            events_rx, reader, ..
        } = self;
        drop(events_rx);
        if let Some(handle) = reader {
            let _ = handle.join();
        }
    }

    fn next_event(&mut self) -> Event {
        if let Some(event) = self.queue.pop_front() {
            return event;
        }
        match self.artim_deadline {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                if timeout.is_zero() {
                    return Event::ArtimExpired;
                }
                match self.events_rx.recv_timeout(timeout) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => Event::ArtimExpired,
                    Err(RecvTimeoutError::Disconnected) => Event::TransportClosed,
                }
            }
            None => self.events_rx.recv().unwrap_or(Event::TransportClosed),
        }
    }

    fn handle(&mut self, event: Event) {
        let code = event.code();
        let (action, next) = match lookup(self.state, code) {
            Some(entry) => entry,
            None => {
                // protocol violation: not a transition of table 9-10
                warn!(
                    "protocol violation: event {:?} in state {:?}",
                    code, self.state
                );
                (Action::Aa8, State::Sta13)
            }
        };

        let old = self.state;
        let next = self.apply(action, event, next);
        trace!("{:?} + {:?} -> {:?} ({:?})", old, code, next, action);
        self.state = next;

        if let Some(injector) = fault_injector() {
            injector.on_state_transition(old, code, action, next);
        }
    }

    fn apply(&mut self, action: Action, event: Event, next: State) -> State {
        match action {
            Action::Ae1 => self.ae1_connect(next),
            Action::Ae2 => self.ae2_send_association_rq(next),
            Action::Ae3 => self.ae3_process_ac(event, next),
            Action::Ae4 => self.ae4_rejected(event, next),
            Action::Ae5 => self.ae5_accept_transport(next),
            Action::Ae6 => self.ae6_process_rq(event, next),
            Action::Ae7 => self.ae7_send_ac(next),
            Action::Ae8 => self.ae8_send_rj(event, next),
            Action::Dt1 | Action::Ar7 => self.dt1_send_pdata(event, next),
            Action::Dt2 | Action::Ar6 => self.dt2_receive_pdata(event, next),
            Action::Ar1 => {
                self.send_pdu(&Pdu::ReleaseRQ);
                self.arm_artim();
                next
            }
            Action::Ar2 => {
                self.upcall(UpcallEvent::ReleaseRequested);
                next
            }
            Action::Ar3 => {
                self.stop_artim();
                self.upcall(UpcallEvent::Released);
                self.close_transport();
                next
            }
            Action::Ar4 => {
                self.send_pdu(&Pdu::ReleaseRP);
                self.arm_artim();
                next
            }
            Action::Ar5 => {
                self.stop_artim();
                self.close_transport();
                self.upcall(UpcallEvent::Closed);
                next
            }
            Action::Ar8 => {
                // release collision: the association requester answers
                // right away, the acceptor waits for the peer's reply
                match self.options.role {
                    Role::Requester => {
                        self.queue.push_back(Event::AReleaseRsp);
                        State::Sta9
                    }
                    Role::Acceptor => State::Sta10,
                }
            }
            Action::Ar9 => {
                self.send_pdu(&Pdu::ReleaseRP);
                next
            }
            Action::Ar10 => {
                self.queue.push_back(Event::AReleaseRsp);
                next
            }
            Action::Aa1 => {
                let source = match event {
                    Event::AAbortRq => AbortRqSource::ServiceUser,
                    _ => AbortRqSource::ServiceProvider(
                        AbortRqServiceProviderReason::ReasonNotSpecified,
                    ),
                };
                self.send_pdu(&Pdu::AbortRQ { source });
                self.arm_artim();
                next
            }
            Action::Aa2 => {
                self.stop_artim();
                self.close_transport();
                self.upcall(UpcallEvent::Closed);
                next
            }
            Action::Aa3 => {
                let message = match event {
                    Event::AAbortReceived { source } => {
                        format!("association aborted by peer: {:?}", source)
                    }
                    _ => "association aborted".to_string(),
                };
                self.upcall(UpcallEvent::Aborted { message });
                self.close_transport();
                next
            }
            Action::Aa4 => {
                self.close_transport();
                self.upcall(UpcallEvent::Closed);
                next
            }
            Action::Aa5 => {
                self.stop_artim();
                self.close_transport();
                self.upcall(UpcallEvent::Closed);
                next
            }
            Action::Aa6 => next,
            Action::Aa7 => {
                self.send_abort(AbortRqServiceProviderReason::UnexpectedPdu);
                next
            }
            Action::Aa8 => {
                let reason = match event {
                    Event::InvalidPduReceived { reason } => reason,
                    _ => AbortRqServiceProviderReason::UnexpectedPdu,
                };
                self.send_abort(reason);
                self.arm_artim();
                self.upcall(UpcallEvent::Aborted {
                    message: format!("protocol violation: {:?}", reason),
                });
                next
            }
        }
    }

    // AE-1: issue the transport connect request
    fn ae1_connect(&mut self, next: State) -> State {
        let address = match self.options.peer_address.clone() {
            Some(address) => address,
            None => {
                self.upcall(UpcallEvent::EstablishFailed {
                    message: "no peer address to connect to".to_string(),
                });
                return State::Sta1;
            }
        };
        match TcpStream::connect(&address) {
            Ok(socket) => {
                self.socket = Some(socket);
                self.queue.push_back(Event::TransportConnected);
                next
            }
            Err(e) => {
                debug!("could not connect to {}: {}", address, e);
                self.upcall(UpcallEvent::EstablishFailed {
                    message: format!("could not connect to {}: {}", address, e),
                });
                State::Sta1
            }
        }
    }

    // AE-2: send the A-ASSOCIATE-RQ
    fn ae2_send_association_rq(&mut self, next: State) -> State {
        let proposed = match self.contexts.propose(
            &self.options.abstract_syntaxes,
            &self.options.transfer_syntaxes,
        ) {
            Ok(proposed) => proposed,
            Err(e) => {
                self.upcall(UpcallEvent::EstablishFailed {
                    message: e.to_string(),
                });
                self.close_transport();
                return State::Sta1;
            }
        };

        let mut user_variables = vec![
            UserVariableItem::MaxLength(self.options.max_pdu_receive_size),
            UserVariableItem::ImplementationClassUID(
                self.options.implementation_class_uid.clone(),
            ),
            UserVariableItem::ImplementationVersionName(
                self.options.implementation_version_name.clone(),
            ),
        ];
        for role_selection in &self.options.role_selections {
            user_variables.push(UserVariableItem::RoleSelection(role_selection.clone()));
        }

        let pdu = Pdu::AssociationRQ {
            protocol_version: PROTOCOL_VERSION,
            calling_ae_title: self.options.local_ae_title.clone(),
            called_ae_title: self.options.peer_ae_title.clone(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: proposed,
            user_variables,
        };
        if !self.send_pdu(&pdu) {
            return next;
        }
        if !self.spawn_reader() {
            self.upcall(UpcallEvent::EstablishFailed {
                message: "could not start the PDU reader".to_string(),
            });
            self.close_transport();
            return State::Sta1;
        }
        next
    }

    // AE-3: the peer accepted; confirm upward
    fn ae3_process_ac(&mut self, event: Event, next: State) -> State {
        let pdu = match event {
            Event::AAssociateAcReceived(pdu) => pdu,
            _ => unreachable!("AE-3 is only reached by Evt03"),
        };
        let (protocol_version, presentation_contexts, user_variables) = match *pdu {
            Pdu::AssociationAC {
                protocol_version,
                presentation_contexts,
                user_variables,
                ..
            } => (protocol_version, presentation_contexts, user_variables),
            _ => unreachable!("Evt03 always carries an A-ASSOCIATE-AC"),
        };

        // only bit 0 of the protocol version is significant
        if protocol_version & 0x0001 == 0 {
            self.send_abort(AbortRqServiceProviderReason::ReasonNotSpecified);
            self.arm_artim();
            self.upcall(UpcallEvent::EstablishFailed {
                message: format!("unsupported protocol version {}", protocol_version),
            });
            return State::Sta13;
        }

        self.contexts.apply_results(&presentation_contexts);
        if self.contexts.contexts().iter().all(|c| !c.accepted) {
            self.send_pdu(&Pdu::AbortRQ {
                source: AbortRqSource::ServiceUser,
            });
            self.arm_artim();
            self.upcall(UpcallEvent::EstablishFailed {
                message: "no presentation contexts accepted by the peer".to_string(),
            });
            return State::Sta13;
        }

        let summary = UserVariablesSummary::from(&user_variables);
        self.peer_max_pdu_length = summary.effective_max_pdu_length();

        let params = AssociationParams {
            calling_ae_title: self.options.local_ae_title.clone(),
            called_ae_title: self.options.peer_ae_title.clone(),
            contexts: self.contexts.contexts().to_vec(),
            peer_max_pdu_length: summary.max_pdu_length,
            peer_implementation_class_uid: summary.implementation_class_uid,
            peer_implementation_version_name: summary.implementation_version_name,
            peer_async_operations_window: summary.async_operations_window,
        };
        self.params = Some(params.clone());
        self.upcall(UpcallEvent::Established(params));
        next
    }

    // AE-4: the peer rejected; confirm upward and close
    fn ae4_rejected(&mut self, event: Event, next: State) -> State {
        if let Event::AAssociateRjReceived { result, source } = event {
            self.upcall(UpcallEvent::Rejected { result, source });
        }
        self.close_transport();
        next
    }

    // AE-5: transport accepted, await the A-ASSOCIATE-RQ under a timer
    fn ae5_accept_transport(&mut self, next: State) -> State {
        self.arm_artim();
        if !self.spawn_reader() {
            self.upcall(UpcallEvent::EstablishFailed {
                message: "could not start the PDU reader".to_string(),
            });
            self.close_transport();
            return State::Sta1;
        }
        next
    }

    // AE-6: validate the A-ASSOCIATE-RQ and negotiate
    fn ae6_process_rq(&mut self, event: Event, next: State) -> State {
        self.stop_artim();

        let pdu = match event {
            Event::AAssociateRqReceived(pdu) => pdu,
            _ => unreachable!("AE-6 is only reached by Evt06"),
        };
        let (
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        ) = match *pdu {
            Pdu::AssociationRQ {
                protocol_version,
                calling_ae_title,
                called_ae_title,
                application_context_name,
                presentation_contexts,
                user_variables,
            } => (
                protocol_version,
                calling_ae_title,
                called_ae_title,
                application_context_name,
                presentation_contexts,
                user_variables,
            ),
            _ => unreachable!("Evt06 always carries an A-ASSOCIATE-RQ"),
        };

        if protocol_version & 0x0001 == 0 {
            return self.reject(AssociationRjSource::ServiceProviderAsce(
                crate::pdu::AssociationRjServiceProviderAsceReason::ProtocolVersionNotSupported,
            ));
        }

        if application_context_name != DICOM_APPLICATION_CONTEXT_NAME {
            return self.reject(AssociationRjSource::ServiceUser(
                AssociationRjServiceUserReason::ApplicationContextNameNotSupported,
            ));
        }

        if self.options.require_called_ae_title
            && called_ae_title != self.options.local_ae_title
        {
            return self.reject(AssociationRjSource::ServiceUser(
                AssociationRjServiceUserReason::CalledAeTitleNotRecognized,
            ));
        }

        let results = self.contexts.negotiate(
            &presentation_contexts,
            &self.options.abstract_syntaxes,
            &self.options.transfer_syntaxes,
        );

        let summary = UserVariablesSummary::from(&user_variables);
        self.peer_max_pdu_length = summary.effective_max_pdu_length();

        // echo the peer's role selections for the accepted contexts
        let mut ac_user_variables = vec![
            UserVariableItem::MaxLength(self.options.max_pdu_receive_size),
            UserVariableItem::ImplementationClassUID(
                self.options.implementation_class_uid.clone(),
            ),
            UserVariableItem::ImplementationVersionName(
                self.options.implementation_version_name.clone(),
            ),
        ];
        for item in &user_variables {
            if let UserVariableItem::RoleSelection(role_selection) = item {
                if self
                    .contexts
                    .by_abstract_syntax(&role_selection.sop_class_uid)
                    .is_ok()
                {
                    ac_user_variables.push(UserVariableItem::RoleSelection(
                        role_selection.clone(),
                    ));
                }
            }
        }

        self.options.peer_ae_title = calling_ae_title.clone();
        let params = AssociationParams {
            calling_ae_title: calling_ae_title.clone(),
            called_ae_title: called_ae_title.clone(),
            contexts: self.contexts.contexts().to_vec(),
            peer_max_pdu_length: summary.max_pdu_length,
            peer_implementation_class_uid: summary.implementation_class_uid,
            peer_implementation_version_name: summary.implementation_version_name,
            peer_async_operations_window: summary.async_operations_window,
        };
        self.params = Some(params);

        self.pending_ac = Some(Pdu::AssociationAC {
            protocol_version: PROTOCOL_VERSION,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts: results,
            user_variables: ac_user_variables,
        });

        // the acceptance decision was taken from configuration alone,
        // so the accept primitive follows immediately
        self.queue.push_back(Event::AAssociateAccept);
        next
    }

    // AE-7: send the A-ASSOCIATE-AC and report ready
    fn ae7_send_ac(&mut self, next: State) -> State {
        match self.pending_ac.take() {
            Some(ac) => {
                if !self.send_pdu(&ac) {
                    return next;
                }
                if let Some(params) = self.params.clone() {
                    self.upcall(UpcallEvent::Established(params));
                }
                next
            }
            None => {
                warn!("no association response prepared");
                self.send_abort(AbortRqServiceProviderReason::ReasonNotSpecified);
                self.arm_artim();
                State::Sta13
            }
        }
    }

    // AE-8: send an A-ASSOCIATE-RJ
    fn ae8_send_rj(&mut self, event: Event, next: State) -> State {
        let reason = match event {
            Event::AAssociateReject { reason } => reason,
            _ => AssociationRjServiceUserReason::NoReasonGiven,
        };
        self.send_pdu(&Pdu::AssociationRJ {
            result: AssociationRjResult::Permanent,
            source: AssociationRjSource::ServiceUser(reason),
        });
        self.arm_artim();
        next
    }

    fn reject(&mut self, source: AssociationRjSource) -> State {
        self.send_pdu(&Pdu::AssociationRJ {
            result: AssociationRjResult::Permanent,
            source,
        });
        self.arm_artim();
        self.upcall(UpcallEvent::EstablishFailed {
            message: format!("association request rejected: {:?}", source),
        });
        State::Sta13
    }

    // DT-1 / AR-7: fragment and send one DIMSE message
    fn dt1_send_pdata(&mut self, event: Event, next: State) -> State {
        let payload = match event {
            Event::PDataRq(payload) => payload,
            _ => unreachable!("DT-1 is only reached by Evt09"),
        };

        let context = match &payload.context {
            ContextRef::Id(id) => self.contexts.by_context_id(*id),
            ContextRef::AbstractSyntax(uid) => self.contexts.by_abstract_syntax(uid),
        }
        .map(|context| context.id);
        let context_id = match context {
            Ok(context_id) => context_id,
            Err(e) => {
                // the service layer verifies negotiation before sending,
                // so this is a bug in the caller rather than the peer
                warn!("dropping P-DATA request: {}", e);
                return next;
            }
        };

        let command_bytes = match payload.command.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("could not encode {}: {}", payload.command.name(), e);
                return next;
            }
        };

        for pdu in split_into_pdus(
            context_id,
            PDataValueType::Command,
            &command_bytes,
            self.peer_max_pdu_length,
        ) {
            if !self.send_pdu(&pdu) {
                return next;
            }
        }
        if let Some(data) = &payload.data {
            for pdu in split_into_pdus(
                context_id,
                PDataValueType::Data,
                data,
                self.peer_max_pdu_length,
            ) {
                if !self.send_pdu(&pdu) {
                    return next;
                }
            }
        }
        next
    }

    // DT-2 / AR-6: reassemble incoming fragments and deliver upward
    fn dt2_receive_pdata(&mut self, event: Event, next: State) -> State {
        let pdvs = match event {
            Event::PDataTfReceived(pdvs) => pdvs,
            _ => unreachable!("DT-2 is only reached by Evt10"),
        };

        for pdv in pdvs {
            let context_id = pdv.presentation_context_id;
            let context = self.contexts.by_context_id(context_id).map(|context| {
                (
                    context.abstract_syntax.clone(),
                    context.transfer_syntax.clone(),
                )
            });
            let (abstract_syntax_uid, transfer_syntax_uid) = match context {
                Ok(context) => context,
                Err(e) => {
                    // a PDV on an unnegotiated context is a protocol
                    // violation by the peer
                    warn!("{}", e);
                    return self
                        .protocol_abort(AbortRqServiceProviderReason::UnexpectedPduParameter);
                }
            };

            match self.assembler.add_pdv(pdv) {
                Ok(Some(message)) => {
                    self.upcall(UpcallEvent::Data {
                        context_id: message.context_id,
                        abstract_syntax_uid,
                        transfer_syntax_uid,
                        command: message.command,
                        data: message.data,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("could not reassemble DIMSE message: {}", e);
                    return self
                        .protocol_abort(AbortRqServiceProviderReason::InvalidPduParameter);
                }
            }
        }
        next
    }

    fn protocol_abort(&mut self, reason: AbortRqServiceProviderReason) -> State {
        self.send_abort(reason);
        self.arm_artim();
        self.upcall(UpcallEvent::Aborted {
            message: format!("protocol violation: {:?}", reason),
        });
        State::Sta13
    }

    fn send_abort(&mut self, reason: AbortRqServiceProviderReason) {
        self.send_pdu(&Pdu::AbortRQ {
            source: AbortRqSource::ServiceProvider(reason),
        });
    }

    /// Encode and write one PDU, honoring the fault injection hook.
    ///
    /// On failure the transport is torn down and a transport-closed
    /// event is queued, so the caller only needs to stop sending.
    fn send_pdu(&mut self, pdu: &Pdu) -> bool {
        self.write_buffer.clear();
        if let Err(e) = write_pdu(&mut self.write_buffer, pdu) {
            warn!("could not encode {}: {}", pdu.short_description(), e);
            self.close_transport();
            self.queue.push_back(Event::TransportClosed);
            return false;
        }

        if let Some(injector) = fault_injector() {
            if injector.on_send(&self.write_buffer) == FaultAction::Disconnect {
                debug!("fault injector dropped the connection");
                self.close_transport();
                self.queue.push_back(Event::TransportClosed);
                return false;
            }
        }

        let socket = match self.socket.as_mut() {
            Some(socket) => socket,
            None => {
                self.queue.push_back(Event::TransportClosed);
                return false;
            }
        };
        trace!("sending {}", pdu.short_description());
        if let Err(e) = socket.write_all(&self.write_buffer) {
            debug!("could not send {}: {}", pdu.short_description(), e);
            self.close_transport();
            self.queue.push_back(Event::TransportClosed);
            return false;
        }
        true
    }

    fn spawn_reader(&mut self) -> bool {
        let socket = match self.socket.as_ref().and_then(|s| s.try_clone().ok()) {
            Some(socket) => socket,
            None => return false,
        };
        let events = self.events_tx.clone();
        let max_pdu_length = self.options.max_pdu_receive_size;
        self.reader = Some(thread::spawn(move || {
            reader_loop(socket, events, max_pdu_length)
        }));
        true
    }

    fn close_transport(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }

    fn arm_artim(&mut self) {
        self.artim_deadline = Some(Instant::now() + self.options.artim_timeout);
    }

    fn stop_artim(&mut self) {
        self.artim_deadline = None;
    }

    fn upcall(&mut self, event: UpcallEvent) {
        let _ = self.upcalls.send(event);
    }
}

/// The reader loop: the only other thread of an association.
///
/// It owns the read half of the socket, turns each PDU into its event
/// and stops on end of stream, on a transport error, or once the
/// machine is gone.
fn reader_loop(mut socket: TcpStream, events: SyncSender<Event>, max_pdu_length: u32) {
    loop {
        match read_pdu(&mut socket, max_pdu_length) {
            Ok(pdu) => {
                trace!("received {}", pdu.short_description());
                let event = pdu_to_event(pdu);
                let stop = matches!(
                    event,
                    Event::TransportClosed | Event::InvalidPduReceived { .. }
                );
                if events.send(event).is_err() {
                    break;
                }
                if stop {
                    break;
                }
            }
            Err(reader::Error::NoPduAvailable { .. }) => {
                let _ = events.send(Event::TransportClosed);
                break;
            }
            Err(e) => {
                debug!("could not read PDU: {}", e);
                let _ = events.send(read_error_event(&e));
                break;
            }
        }
    }
}

fn pdu_to_event(pdu: Pdu) -> Event {
    if pdu.has_malformed_items() {
        return Event::InvalidPduReceived {
            reason: AbortRqServiceProviderReason::InvalidPduParameter,
        };
    }
    match pdu {
        Pdu::AssociationRQ { .. } => Event::AAssociateRqReceived(Box::new(pdu)),
        Pdu::AssociationAC { .. } => Event::AAssociateAcReceived(Box::new(pdu)),
        Pdu::AssociationRJ { result, source } => Event::AAssociateRjReceived { result, source },
        Pdu::PData { data } => Event::PDataTfReceived(data),
        Pdu::ReleaseRQ => Event::AReleaseRqReceived,
        Pdu::ReleaseRP => Event::AReleaseRpReceived,
        Pdu::AbortRQ { source } => Event::AAbortReceived { source },
        Pdu::Unknown { pdu_type, .. } => {
            warn!("received unknown PDU type 0x{:02X}", pdu_type);
            Event::InvalidPduReceived {
                reason: AbortRqServiceProviderReason::UnrecognizedPdu,
            }
        }
    }
}

/// Classify a failed read: a stream that died mid-PDU is a transport
/// failure; everything else is a malformed PDU.
fn read_error_event(error: &reader::Error) -> Event {
    use reader::Error::*;
    match error {
        ReadPdu { .. } | ReadPduItem { .. } | ReadPduField { .. } | ReadReserved { .. }
        | IncompletePdu { .. } => Event::TransportClosed,
        _ => Event::InvalidPduReceived {
            reason: AbortRqServiceProviderReason::InvalidPduParameter,
        },
    }
}

/// The values extracted from a peer's user information item.
struct UserVariablesSummary {
    max_pdu_length: u32,
    implementation_class_uid: Option<String>,
    implementation_version_name: Option<String>,
    async_operations_window: Option<(u16, u16)>,
}

impl UserVariablesSummary {
    fn from(user_variables: &[UserVariableItem]) -> Self {
        let mut summary = UserVariablesSummary {
            max_pdu_length: DEFAULT_MAX_PDU,
            implementation_class_uid: None,
            implementation_version_name: None,
            async_operations_window: None,
        };
        for item in user_variables {
            match item {
                UserVariableItem::MaxLength(len) => summary.max_pdu_length = *len,
                UserVariableItem::ImplementationClassUID(uid) => {
                    summary.implementation_class_uid = Some(uid.clone())
                }
                UserVariableItem::ImplementationVersionName(name) => {
                    summary.implementation_version_name = Some(name.clone())
                }
                UserVariableItem::AsynchronousOperationsWindow(invoked, performed) => {
                    summary.async_operations_window = Some((*invoked, *performed))
                }
                _ => {}
            }
        }
        summary
    }

    /// The cap for outbound fragments: a declared maximum of 0 means
    /// unlimited, in which case the default chunk size is used.
    /// A peer declaring less than the minimum PDU size is granted
    /// the minimum.
    fn effective_max_pdu_length(&self) -> u32 {
        if self.max_pdu_length == 0 {
            DEFAULT_MAX_PDU
        } else {
            self.max_pdu_length.max(MINIMUM_PDU_SIZE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every `(state, event)` pair resolves to exactly one transition,
    /// or falls through to the protocol violation default.
    #[test]
    fn transition_table_is_unambiguous() {
        for (i, (state, event, _, _)) in TRANSITIONS.iter().enumerate() {
            let duplicates = TRANSITIONS
                .iter()
                .skip(i + 1)
                .filter(|(s, e, _, _)| s == state && e == event)
                .count();
            assert_eq!(
                duplicates, 0,
                "duplicate transition for {:?} + {:?}",
                state, event
            );
        }
    }

    #[test]
    fn transition_table_matches_the_standard() {
        // handshake
        assert_eq!(
            lookup(State::Sta1, EventCode::Evt01),
            Some((Action::Ae1, State::Sta4))
        );
        assert_eq!(
            lookup(State::Sta4, EventCode::Evt02),
            Some((Action::Ae2, State::Sta5))
        );
        assert_eq!(
            lookup(State::Sta5, EventCode::Evt03),
            Some((Action::Ae3, State::Sta6))
        );
        assert_eq!(
            lookup(State::Sta2, EventCode::Evt06),
            Some((Action::Ae6, State::Sta3))
        );
        assert_eq!(
            lookup(State::Sta3, EventCode::Evt07),
            Some((Action::Ae7, State::Sta6))
        );
        // data transfer
        assert_eq!(
            lookup(State::Sta6, EventCode::Evt09),
            Some((Action::Dt1, State::Sta6))
        );
        assert_eq!(
            lookup(State::Sta6, EventCode::Evt10),
            Some((Action::Dt2, State::Sta6))
        );
        // release, with the collision branch
        assert_eq!(
            lookup(State::Sta6, EventCode::Evt11),
            Some((Action::Ar1, State::Sta7))
        );
        assert_eq!(
            lookup(State::Sta7, EventCode::Evt12),
            Some((Action::Ar8, State::Sta9))
        );
        assert_eq!(
            lookup(State::Sta10, EventCode::Evt13),
            Some((Action::Ar10, State::Sta12))
        );
        assert_eq!(
            lookup(State::Sta9, EventCode::Evt14),
            Some((Action::Ar9, State::Sta11))
        );
        // teardown
        assert_eq!(
            lookup(State::Sta13, EventCode::Evt17),
            Some((Action::Ar5, State::Sta1))
        );
        assert_eq!(
            lookup(State::Sta13, EventCode::Evt18),
            Some((Action::Aa2, State::Sta1))
        );
    }

    /// Pairs with no table entry are protocol violations; the machine
    /// answers them all with AA-8, so the table is total.
    #[test]
    fn absent_pairs_are_protocol_violations() {
        let states = [
            State::Sta1,
            State::Sta2,
            State::Sta3,
            State::Sta4,
            State::Sta5,
            State::Sta6,
            State::Sta7,
            State::Sta8,
            State::Sta9,
            State::Sta10,
            State::Sta11,
            State::Sta12,
            State::Sta13,
        ];
        let events = [
            EventCode::Evt01,
            EventCode::Evt02,
            EventCode::Evt03,
            EventCode::Evt04,
            EventCode::Evt05,
            EventCode::Evt06,
            EventCode::Evt07,
            EventCode::Evt08,
            EventCode::Evt09,
            EventCode::Evt10,
            EventCode::Evt11,
            EventCode::Evt12,
            EventCode::Evt13,
            EventCode::Evt14,
            EventCode::Evt15,
            EventCode::Evt16,
            EventCode::Evt17,
            EventCode::Evt18,
            EventCode::Evt19,
        ];
        let mut covered = 0;
        for state in states {
            for event in events {
                if lookup(state, event).is_some() {
                    covered += 1;
                }
            }
        }
        assert_eq!(covered, TRANSITIONS.len());
        // a sample of pairs that must fall through to AA-8
        assert_eq!(lookup(State::Sta6, EventCode::Evt01), None);
        assert_eq!(lookup(State::Sta13, EventCode::Evt09), None);
        assert_eq!(lookup(State::Sta1, EventCode::Evt10), None);
    }

    #[test]
    fn machines_negotiate_and_release_over_loopback() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut scp_options = SmOptions::new(Role::Acceptor);
        scp_options.local_ae_title = "TEST-SCP".to_string();
        scp_options.abstract_syntaxes = vec![crate::uids::VERIFICATION.to_string()];
        scp_options.transfer_syntaxes = vec![crate::uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string()];

        let acceptor = thread::spawn(move || {
            let (stream, _addr) = listener.accept().unwrap();
            let handle = StateMachine::spawn(scp_options, Some(stream));

            let params = match handle.upcalls.recv().unwrap() {
                UpcallEvent::Established(params) => params,
                other => panic!("unexpected upcall {:?}", other),
            };
            assert_eq!(params.calling_ae_title, "TEST-SCU");
            assert_eq!(params.called_ae_title, "TEST-SCP");

            match handle.upcalls.recv().unwrap() {
                UpcallEvent::ReleaseRequested => {}
                other => panic!("unexpected upcall {:?}", other),
            }
            handle.events.send(Event::AReleaseRsp).unwrap();
            loop {
                match handle.upcalls.recv() {
                    Ok(UpcallEvent::Closed) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
            handle.thread.join().unwrap();
        });

        let mut scu_options = SmOptions::new(Role::Requester);
        scu_options.local_ae_title = "TEST-SCU".to_string();
        scu_options.peer_ae_title = "TEST-SCP".to_string();
        scu_options.peer_address = Some(addr.to_string());
        scu_options.abstract_syntaxes = vec![crate::uids::VERIFICATION.to_string()];
        scu_options.transfer_syntaxes = vec![
            crate::uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string(),
            crate::uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string(),
        ];

        let handle = StateMachine::spawn(scu_options, None);
        let params = match handle.upcalls.recv().unwrap() {
            UpcallEvent::Established(params) => params,
            other => panic!("unexpected upcall {:?}", other),
        };
        let contexts: Vec<_> = params.accepted_contexts().collect();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].id, 1);
        assert_eq!(contexts[0].abstract_syntax, crate::uids::VERIFICATION);
        assert_eq!(
            contexts[0].transfer_syntax,
            crate::uids::IMPLICIT_VR_LITTLE_ENDIAN
        );

        handle.events.send(Event::AReleaseRq).unwrap();
        loop {
            match handle.upcalls.recv() {
                Ok(UpcallEvent::Released) => break,
                Ok(_) => continue,
                Err(_) => panic!("release was never confirmed"),
            }
        }
        handle.thread.join().unwrap();
        acceptor.join().unwrap();
    }
}
