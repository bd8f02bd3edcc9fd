//! The service class user endpoint.
//!
//! A [`ServiceUser`] connects to a provider, negotiates an association
//! for the configured SOP classes and exposes typed call sites for the
//! DIMSE-C operations. Each call marshals its arguments into a command
//! set, hands it to the association state machine and blocks on the
//! upcall queue until the matching response, a pending stream or a
//! failure arrives.

use std::borrow::Cow;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::Duration;

use snafu::ensure;
use tracing::warn;

use crate::association::sm::{
    ContextRef, DimsePayload, Event, Role, SmOptions, StateMachine, UpcallEvent,
    DEFAULT_ARTIM_TIMEOUT, DEFAULT_EVENT_QUEUE_CAPACITY,
};
use crate::association::AssociationParams;
use crate::dimse::element::{self, tags, DataElement};
use crate::dimse::{
    CEchoRq, CFindRq, CGetRq, CStoreRq, CStoreRsp, Command, Priority, Status,
    COMMAND_DATA_SET_TYPE_NON_NULL, COMMAND_DATA_SET_TYPE_NULL,
};
use crate::pdu::{RoleSelection, DEFAULT_MAX_PDU};
use crate::service::{
    ConfigurationSnafu, DimseStatusSnafu, Error, ProtocolSnafu, QueryRetrieveLevel,
    RejectedSnafu, Result, TimeoutSnafu, TransportSnafu,
};
use crate::uids;

/// Options for constructing a [`ServiceUser`].
///
/// # Example
///
/// ```no_run
/// # use dicom_net::service::user::{ServiceUser, ServiceUserOptions};
/// # use dicom_net::uids;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut scu = ServiceUser::new(
///     ServiceUserOptions::new()
///         .calling_ae_title("STORE-SCU")
///         .called_ae_title("MAIN-STORAGE")
///         .with_sop_class(uids::SECONDARY_CAPTURE_IMAGE_STORAGE),
/// )?;
/// scu.connect("10.0.0.5:104")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ServiceUserOptions {
    /// the calling AE title, this node
    calling_ae_title: Cow<'static, str>,
    /// the called AE title, the target node
    called_ae_title: Cow<'static, str>,
    /// the SOP classes to offer
    sop_classes: Vec<Cow<'static, str>>,
    /// the transfer syntaxes to offer, in order of preference
    transfer_syntaxes: Vec<Cow<'static, str>>,
    /// the maximum PDU payload size to advertise
    max_pdu_receive_size: u32,
    /// implementation class UID announced in user information
    implementation_class_uid: Cow<'static, str>,
    /// implementation version name announced in user information
    implementation_version_name: Cow<'static, str>,
    /// ARTIM timeout for the handshake and release phases
    artim_timeout: Duration,
    /// how long to wait for the response of one DIMSE exchange;
    /// expiry aborts the association
    operation_timeout: Option<Duration>,
    event_queue_capacity: usize,
}

impl Default for ServiceUserOptions {
    fn default() -> Self {
        ServiceUserOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            sop_classes: Vec::new(),
            transfer_syntaxes: Vec::new(),
            max_pdu_receive_size: DEFAULT_MAX_PDU,
            implementation_class_uid: crate::IMPLEMENTATION_CLASS_UID.into(),
            implementation_version_name: crate::IMPLEMENTATION_VERSION_NAME.into(),
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            operation_timeout: None,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }
}

impl ServiceUserOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title,
    /// which refers to this node. The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title,
    /// which refers to the target node. The default is `ANY-SCP`.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.called_ae_title = called_ae_title.into();
        self
    }

    /// Offer this SOP class in the association request.
    pub fn with_sop_class<T>(mut self, sop_class_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.sop_classes.push(sop_class_uid.into());
        self
    }

    /// Offer each of these SOP classes in the association request.
    pub fn with_sop_classes<I, T>(mut self, sop_class_uids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Cow<'static, str>>,
    {
        self.sop_classes
            .extend(sop_class_uids.into_iter().map(Into::into));
        self
    }

    /// Offer this transfer syntax in every proposed context.
    ///
    /// Without any explicit transfer syntax the default list
    /// {Implicit VR Little Endian, Explicit VR Little Endian}
    /// is offered, in that order.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.transfer_syntaxes.push(transfer_syntax_uid.into());
        self
    }

    /// Override the maximum PDU payload size advertised to the peer.
    pub fn max_pdu_receive_size(mut self, value: u32) -> Self {
        self.max_pdu_receive_size = value;
        self
    }

    /// Override the implementation class UID announced to the peer.
    pub fn implementation_class_uid<T>(mut self, uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.implementation_class_uid = uid.into();
        self
    }

    /// Override the implementation version name announced to the peer.
    pub fn implementation_version_name<T>(mut self, name: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.implementation_version_name = name.into();
        self
    }

    /// Override the ARTIM timeout.
    pub fn artim_timeout(mut self, timeout: Duration) -> Self {
        self.artim_timeout = timeout;
        self
    }

    /// Bound the wait for each DIMSE response.
    ///
    /// An expired wait aborts the association and surfaces as a
    /// timeout error. The default is to wait indefinitely.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// The running state machine of one association.
struct Connection {
    events: SyncSender<Event>,
    upcalls: Receiver<UpcallEvent>,
    thread: JoinHandle<()>,
    params: AssociationParams,
    operation_timeout: Option<Duration>,
    next_message_id: u16,
}

impl Connection {
    fn next_message_id(&mut self) -> u16 {
        let id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);
        id
    }
}

/// A DICOM service class user.
///
/// Operations on an established association are sequential:
/// one outstanding DIMSE exchange at a time, as the asynchronous
/// operations window is never negotiated beyond its default.
pub struct ServiceUser {
    options: ServiceUserOptions,
    conn: Option<Connection>,
}

impl ServiceUser {
    /// Validate the options and create a disconnected service user.
    pub fn new(options: ServiceUserOptions) -> Result<Self> {
        ensure!(
            options.calling_ae_title.len() <= 16,
            ConfigurationSnafu {
                message: format!(
                    "calling AE title {:?} is longer than 16 bytes",
                    options.calling_ae_title
                ),
            }
        );
        ensure!(
            options.called_ae_title.len() <= 16,
            ConfigurationSnafu {
                message: format!(
                    "called AE title {:?} is longer than 16 bytes",
                    options.called_ae_title
                ),
            }
        );
        ensure!(
            !options.sop_classes.is_empty(),
            ConfigurationSnafu {
                message: "at least one SOP class must be configured".to_string(),
            }
        );
        Ok(ServiceUser {
            options,
            conn: None,
        })
    }

    /// Whether an association is currently established.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The negotiated association parameters, once connected.
    pub fn params(&self) -> Option<&AssociationParams> {
        self.conn.as_ref().map(|c| &c.params)
    }

    /// Open the TCP connection, send the association request and block
    /// until the association is ready for data transfer or has failed.
    pub fn connect(&mut self, address: &str) -> Result<()> {
        ensure!(
            self.conn.is_none(),
            ConfigurationSnafu {
                message: "already connected".to_string(),
            }
        );

        let mut transfer_syntaxes: Vec<String> = self
            .options
            .transfer_syntaxes
            .iter()
            .map(|ts| ts.to_string())
            .collect();
        if transfer_syntaxes.is_empty() {
            transfer_syntaxes.push(uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string());
            transfer_syntaxes.push(uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string());
        }

        // offering a query/retrieve GET class implies accepting the
        // storage sub-operations it triggers, so announce both roles
        let role_selections: Vec<RoleSelection> = self
            .options
            .sop_classes
            .iter()
            .filter(|uid| uids::QUERY_RETRIEVE_GET_CLASSES.contains(&uid.as_ref()))
            .map(|uid| RoleSelection {
                sop_class_uid: uid.to_string(),
                scu_role: true,
                scp_role: true,
            })
            .collect();

        let mut sm_options = SmOptions::new(Role::Requester);
        sm_options.local_ae_title = self.options.calling_ae_title.to_string();
        sm_options.peer_ae_title = self.options.called_ae_title.to_string();
        sm_options.peer_address = Some(address.to_string());
        sm_options.abstract_syntaxes = self
            .options
            .sop_classes
            .iter()
            .map(|uid| uid.to_string())
            .collect();
        sm_options.transfer_syntaxes = transfer_syntaxes;
        sm_options.max_pdu_receive_size = self.options.max_pdu_receive_size;
        sm_options.implementation_class_uid = self.options.implementation_class_uid.to_string();
        sm_options.implementation_version_name =
            self.options.implementation_version_name.to_string();
        sm_options.role_selections = role_selections;
        sm_options.artim_timeout = self.options.artim_timeout;
        sm_options.event_queue_capacity = self.options.event_queue_capacity;

        let handle = StateMachine::spawn(sm_options, None);

        loop {
            match handle.upcalls.recv() {
                Ok(UpcallEvent::Established(params)) => {
                    self.conn = Some(Connection {
                        events: handle.events,
                        upcalls: handle.upcalls,
                        thread: handle.thread,
                        params,
                        operation_timeout: self.options.operation_timeout,
                        next_message_id: 1,
                    });
                    return Ok(());
                }
                Ok(UpcallEvent::Rejected { result, source }) => {
                    let _ = handle.thread.join();
                    return RejectedSnafu { result, source }.fail();
                }
                Ok(UpcallEvent::EstablishFailed { message })
                | Ok(UpcallEvent::Aborted { message }) => {
                    let _ = handle.thread.join();
                    return TransportSnafu { message }.fail();
                }
                Ok(UpcallEvent::Closed) => {
                    let _ = handle.thread.join();
                    return TransportSnafu {
                        message: "connection closed during the handshake".to_string(),
                    }
                    .fail();
                }
                Ok(other) => {
                    warn!("unexpected indication during handshake: {:?}", other);
                }
                Err(_) => {
                    let _ = handle.thread.join();
                    return TransportSnafu {
                        message: "association state machine terminated".to_string(),
                    }
                    .fail();
                }
            }
        }
    }

    /// Gracefully release the association, when one is up.
    ///
    /// Calling this without a prior successful [`connect`](Self::connect)
    /// is a no-op.
    pub fn release(&mut self) -> Result<()> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return Ok(()),
        };
        // if the machine is already gone the release has happened
        let _ = conn.events.send(Event::AReleaseRq);
        loop {
            match conn.upcalls.recv() {
                Ok(UpcallEvent::Released)
                | Ok(UpcallEvent::Closed)
                | Ok(UpcallEvent::Aborted { .. })
                | Ok(UpcallEvent::EstablishFailed { .. }) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        let _ = conn.thread.join();
        Ok(())
    }

    /// Abort the association without the release handshake.
    pub fn abort(&mut self) -> Result<()> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return Ok(()),
        };
        let _ = conn.events.send(Event::AAbortRq);
        loop {
            match conn.upcalls.recv() {
                Ok(UpcallEvent::Closed) | Ok(UpcallEvent::Aborted { .. }) => break,
                Ok(_) => continue,
                Err(_) => break,
            }
        }
        let _ = conn.thread.join();
        Ok(())
    }

    /// Issue a C-ECHO and wait for the verification response.
    pub fn c_echo(&mut self) -> Result<()> {
        let conn = self.connection()?;
        ensure!(
            conn.params.is_negotiated(uids::VERIFICATION),
            ConfigurationSnafu {
                message: "verification SOP class was not negotiated".to_string(),
            }
        );

        let message_id = conn.next_message_id();
        let command = Command::CEchoRq(CEchoRq {
            message_id,
            affected_sop_class_uid: uids::VERIFICATION.to_string(),
            data_set_type: COMMAND_DATA_SET_TYPE_NULL,
            extra: vec![],
        });
        send_payload(
            conn,
            DimsePayload {
                context: ContextRef::AbstractSyntax(uids::VERIFICATION.to_string()),
                command,
                data: None,
            },
        )?;

        loop {
            match recv_upcall(conn)? {
                UpcallEvent::Data {
                    command: Command::CEchoRsp(rsp),
                    ..
                } => {
                    ensure!(
                        rsp.status.is_success(),
                        DimseStatusSnafu {
                            operation: "C-ECHO",
                            status: rsp.status,
                        }
                    );
                    return Ok(());
                }
                UpcallEvent::Data { command, .. } => {
                    warn!("ignoring unexpected {}", command.name());
                }
                _ => continue,
            }
        }
    }

    /// Store one data set on the peer.
    ///
    /// The data set bytes must already be serialized in one of the
    /// negotiated transfer syntaxes for this SOP class; they are carried
    /// verbatim.
    pub fn c_store(
        &mut self,
        sop_class_uid: &str,
        sop_instance_uid: &str,
        data: &[u8],
    ) -> Result<()> {
        let conn = self.connection()?;
        ensure!(
            conn.params.is_negotiated(sop_class_uid),
            ConfigurationSnafu {
                message: format!("SOP class {} was not negotiated", sop_class_uid),
            }
        );

        let message_id = conn.next_message_id();
        let command = Command::CStoreRq(CStoreRq {
            message_id,
            affected_sop_class_uid: sop_class_uid.to_string(),
            affected_sop_instance_uid: sop_instance_uid.to_string(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            move_originator_application_entity_title: None,
            move_originator_message_id: None,
            extra: vec![],
        });
        send_payload(
            conn,
            DimsePayload {
                context: ContextRef::AbstractSyntax(sop_class_uid.to_string()),
                command,
                data: Some(data.to_vec()),
            },
        )?;

        loop {
            match recv_upcall(conn)? {
                UpcallEvent::Data {
                    command: Command::CStoreRsp(rsp),
                    ..
                } => {
                    ensure!(
                        rsp.status.is_success(),
                        DimseStatusSnafu {
                            operation: "C-STORE",
                            status: rsp.status,
                        }
                    );
                    return Ok(());
                }
                UpcallEvent::Data { command, .. } => {
                    warn!("ignoring unexpected {}", command.name());
                }
                _ => continue,
            }
        }
    }

    /// Issue a C-FIND and stream the matching identifiers.
    ///
    /// Every pending response yields one item of identifier elements;
    /// the iterator ends on the terminating success status.
    pub fn c_find(
        &mut self,
        level: QueryRetrieveLevel,
        filters: Vec<DataElement>,
    ) -> Result<CFindResults<'_>> {
        let conn = self.conn.as_mut().ok_or_else(not_connected)?;
        let sop_class_uid = negotiated_class(&conn.params, uids::QUERY_RETRIEVE_FIND_CLASSES)
            .ok_or_else(|| {
                ConfigurationSnafu {
                    message: "no query/retrieve FIND SOP class was negotiated".to_string(),
                }
                .build()
            })?;

        let message_id = conn.next_message_id();
        let command = Command::CFindRq(CFindRq {
            message_id,
            affected_sop_class_uid: sop_class_uid.clone(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            extra: vec![],
        });
        send_payload(
            conn,
            DimsePayload {
                context: ContextRef::AbstractSyntax(sop_class_uid),
                command,
                data: Some(encode_identifier(level, filters)?),
            },
        )?;

        Ok(CFindResults { conn, done: false })
    }

    /// Issue a C-GET; each incoming storage sub-operation is handed to
    /// `on_store`, whose status is returned to the peer.
    ///
    /// The callback receives the transfer syntax UID of the context the
    /// data set arrived on, the SOP class UID, the SOP instance UID and
    /// the data set bytes.
    pub fn c_get<F>(
        &mut self,
        level: QueryRetrieveLevel,
        filters: Vec<DataElement>,
        mut on_store: F,
    ) -> Result<()>
    where
        F: FnMut(&str, &str, &str, &[u8]) -> Status,
    {
        let conn = self.conn.as_mut().ok_or_else(not_connected)?;
        let sop_class_uid = negotiated_class(&conn.params, uids::QUERY_RETRIEVE_GET_CLASSES)
            .ok_or_else(|| {
                ConfigurationSnafu {
                    message: "no query/retrieve GET SOP class was negotiated".to_string(),
                }
                .build()
            })?;

        let message_id = conn.next_message_id();
        let command = Command::CGetRq(CGetRq {
            message_id,
            affected_sop_class_uid: sop_class_uid.clone(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            extra: vec![],
        });
        send_payload(
            conn,
            DimsePayload {
                context: ContextRef::AbstractSyntax(sop_class_uid),
                command,
                data: Some(encode_identifier(level, filters)?),
            },
        )?;

        loop {
            match recv_upcall(conn)? {
                UpcallEvent::Data {
                    command: Command::CStoreRq(req),
                    data,
                    context_id,
                    transfer_syntax_uid,
                    ..
                } => {
                    let status = on_store(
                        &transfer_syntax_uid,
                        &req.affected_sop_class_uid,
                        &req.affected_sop_instance_uid,
                        data.as_deref().unwrap_or(&[]),
                    );
                    let response = Command::CStoreRsp(CStoreRsp {
                        message_id_being_responded_to: req.message_id,
                        affected_sop_class_uid: Some(req.affected_sop_class_uid),
                        affected_sop_instance_uid: Some(req.affected_sop_instance_uid),
                        data_set_type: COMMAND_DATA_SET_TYPE_NULL,
                        status,
                        extra: vec![],
                    });
                    send_payload(
                        conn,
                        DimsePayload {
                            context: ContextRef::Id(context_id),
                            command: response,
                            data: None,
                        },
                    )?;
                }
                UpcallEvent::Data {
                    command: Command::CGetRsp(rsp),
                    ..
                } => {
                    if rsp.status.is_pending() {
                        continue;
                    }
                    ensure!(
                        rsp.status.is_success(),
                        DimseStatusSnafu {
                            operation: "C-GET",
                            status: rsp.status,
                        }
                    );
                    return Ok(());
                }
                UpcallEvent::Data { command, .. } => {
                    warn!("ignoring unexpected {}", command.name());
                }
                _ => continue,
            }
        }
    }

    fn connection(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or_else(not_connected)
    }
}

/// Gracefully release the association when the service user goes away.
impl Drop for ServiceUser {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

fn not_connected() -> Error {
    TransportSnafu {
        message: "no association established".to_string(),
    }
    .build()
}

fn send_payload(conn: &mut Connection, payload: DimsePayload) -> Result<()> {
    conn.events
        .send(Event::PDataRq(payload))
        .map_err(|_| {
            TransportSnafu {
                message: "association is down".to_string(),
            }
            .build()
        })
}

fn recv_upcall(conn: &mut Connection) -> Result<UpcallEvent> {
    let received = match conn.operation_timeout {
        Some(timeout) => match conn.upcalls.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => {
                // give up on the exchange and tear the association down
                let _ = conn.events.send(Event::AAbortRq);
                return TimeoutSnafu {
                    message: format!("no response within {:?}", timeout),
                }
                .fail();
            }
            Err(RecvTimeoutError::Disconnected) => Err(()),
        },
        None => conn.upcalls.recv().map_err(|_| ()),
    };
    match received {
        Ok(UpcallEvent::Closed) => TransportSnafu {
            message: "connection closed by the peer".to_string(),
        }
        .fail(),
        Ok(UpcallEvent::Aborted { message }) => TransportSnafu { message }.fail(),
        Ok(UpcallEvent::Released) => TransportSnafu {
            message: "association released".to_string(),
        }
        .fail(),
        Ok(event) => Ok(event),
        Err(()) => TransportSnafu {
            message: "association state machine terminated".to_string(),
        }
        .fail(),
    }
}

fn negotiated_class(params: &AssociationParams, candidates: &[&str]) -> Option<String> {
    params
        .accepted_contexts()
        .find(|c| candidates.contains(&c.abstract_syntax.as_str()))
        .map(|c| c.abstract_syntax.clone())
}

/// Build the C-FIND/C-GET identifier data set:
/// the query level followed by the filter elements,
/// in Implicit VR Little Endian.
fn encode_identifier(
    level: QueryRetrieveLevel,
    filters: Vec<DataElement>,
) -> Result<Vec<u8>> {
    let mut elements = vec![DataElement::from_text(
        tags::QUERY_RETRIEVE_LEVEL,
        level.keyword(),
    )];
    elements.extend(filters);
    let mut bytes = Vec::new();
    element::write_elements(&mut bytes, &elements).map_err(|e| {
        ProtocolSnafu {
            message: format!("could not encode identifier: {}", e),
        }
        .build()
    })?;
    Ok(bytes)
}

/// The streaming results of a C-FIND operation.
///
/// Dropping the iterator before the terminating status leaves the
/// pending responses in the upcall queue; issue the next operation only
/// after draining the stream.
pub struct CFindResults<'a> {
    conn: &'a mut Connection,
    done: bool,
}

impl Iterator for CFindResults<'_> {
    type Item = Result<Vec<DataElement>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match recv_upcall(self.conn) {
                Ok(UpcallEvent::Data {
                    command: Command::CFindRsp(rsp),
                    data,
                    ..
                }) => {
                    if rsp.status.is_pending() {
                        let bytes = data.unwrap_or_default();
                        return Some(element::read_elements(&bytes).map_err(|e| {
                            ProtocolSnafu {
                                message: format!("could not decode identifier: {}", e),
                            }
                            .build()
                        }));
                    }
                    self.done = true;
                    if rsp.status.is_success() {
                        return None;
                    }
                    return Some(
                        DimseStatusSnafu {
                            operation: "C-FIND",
                            status: rsp.status,
                        }
                        .fail(),
                    );
                }
                Ok(UpcallEvent::Data { command, .. }) => {
                    warn!("ignoring unexpected {}", command.name());
                }
                Ok(_) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
