//! The service class provider endpoint.
//!
//! A [`ServiceProvider`] listens for incoming connections and launches
//! one association state machine plus one dispatcher per connection.
//! The dispatcher adapts complete DIMSE messages into the configured
//! handler callbacks and sends their responses back through the state
//! machine. Handlers run on the dispatcher thread (or on a thread of
//! their own for the streaming operations) and never block the state
//! machine itself.

use std::borrow::Cow;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use snafu::ensure;
use tracing::{debug, error, warn};

use crate::association::sm::{
    ContextRef, DimsePayload, Event, Role, SmHandle, SmOptions, StateMachine, UpcallEvent,
    DEFAULT_ARTIM_TIMEOUT, DEFAULT_EVENT_QUEUE_CAPACITY,
};
use crate::association::AssociationParams;
use crate::dimse::element::{self, DataElement};
use crate::dimse::{
    status, CEchoRsp, CFindRsp, CGetRsp, CMoveRsp, CStoreRq, CStoreRsp, Command, Priority,
    Status, COMMAND_DATA_SET_TYPE_NON_NULL, COMMAND_DATA_SET_TYPE_NULL,
};
use crate::pdu::DEFAULT_MAX_PDU;
use crate::service::{ConfigurationSnafu, ConnectionState, Result, TransportSnafu};
use crate::uids;

/// Handles a C-ECHO request; the returned status is sent back.
pub type CEchoHandler = Arc<dyn Fn(&ConnectionState) -> Status + Send + Sync>;

/// Handles a C-STORE request.
///
/// Receives the transfer syntax UID of the context the data set arrived
/// on, the SOP class UID, the SOP instance UID, the calling and called
/// AE titles, and the data set bytes; the returned status is sent back.
pub type CStoreHandler =
    Arc<dyn Fn(&ConnectionState, &str, &str, &str, &str, &str, &[u8]) -> Status + Send + Sync>;

/// One match produced by a C-FIND handler.
#[derive(Debug, Clone)]
pub struct CFindResult {
    /// the identifier elements of the match
    pub elements: Vec<DataElement>,
}

/// Handles a C-FIND request.
///
/// Receives the transfer syntax UID, the SOP class UID and the filter
/// elements of the query identifier. Each match is sent on the result
/// channel as a pending response; returning from the handler closes the
/// channel and terminates the stream with a success status.
pub type CFindHandler =
    Arc<dyn Fn(&ConnectionState, &str, &str, &[DataElement], SyncSender<CFindResult>) + Send + Sync>;

/// One data set produced by a C-GET handler,
/// delivered as a C-STORE sub-operation on the same association.
#[derive(Debug, Clone)]
pub struct CGetResult {
    /// the number of results after this one, negative when unknown
    pub remaining: i32,
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
    /// the serialized data set
    pub data: Vec<u8>,
}

/// Handles a C-GET request; same calling convention as [`CFindHandler`].
pub type CGetHandler =
    Arc<dyn Fn(&ConnectionState, &str, &str, &[DataElement], SyncSender<CGetResult>) + Send + Sync>;

/// Options for constructing a [`ServiceProvider`].
#[derive(Clone)]
pub struct ServiceProviderOptions {
    /// this node's AE title
    ae_title: Cow<'static, str>,
    /// the SOP classes to accept
    sop_classes: Vec<Cow<'static, str>>,
    /// the transfer syntaxes supported, in order of preference
    transfer_syntaxes: Vec<Cow<'static, str>>,
    /// the maximum PDU payload size to advertise
    max_pdu_receive_size: u32,
    /// implementation class UID announced in user information
    implementation_class_uid: Cow<'static, str>,
    /// implementation version name announced in user information
    implementation_version_name: Cow<'static, str>,
    /// reject associations not addressed to `ae_title`
    require_called_ae_title: bool,
    artim_timeout: Duration,
    event_queue_capacity: usize,
    on_c_echo: Option<CEchoHandler>,
    on_c_store: Option<CStoreHandler>,
    on_c_find: Option<CFindHandler>,
    on_c_get: Option<CGetHandler>,
}

impl Default for ServiceProviderOptions {
    fn default() -> Self {
        ServiceProviderOptions {
            ae_title: "THIS-SCP".into(),
            sop_classes: Vec::new(),
            transfer_syntaxes: Vec::new(),
            max_pdu_receive_size: DEFAULT_MAX_PDU,
            implementation_class_uid: crate::IMPLEMENTATION_CLASS_UID.into(),
            implementation_version_name: crate::IMPLEMENTATION_VERSION_NAME.into(),
            require_called_ae_title: false,
            artim_timeout: DEFAULT_ARTIM_TIMEOUT,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            on_c_echo: None,
            on_c_store: None,
            on_c_find: None,
            on_c_get: None,
        }
    }
}

impl ServiceProviderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the application entity title of this node.
    /// The default is `THIS-SCP`.
    pub fn ae_title<T>(mut self, ae_title: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.ae_title = ae_title.into();
        self
    }

    /// Accept this SOP class in incoming association requests.
    pub fn with_sop_class<T>(mut self, sop_class_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.sop_classes.push(sop_class_uid.into());
        self
    }

    /// Accept each of these SOP classes in incoming association
    /// requests.
    pub fn with_sop_classes<I, T>(mut self, sop_class_uids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Cow<'static, str>>,
    {
        self.sop_classes
            .extend(sop_class_uids.into_iter().map(Into::into));
        self
    }

    /// Support this transfer syntax.
    ///
    /// Without any explicit transfer syntax the default list
    /// {Implicit VR Little Endian, Explicit VR Little Endian}
    /// is supported, in that order of preference.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.transfer_syntaxes.push(transfer_syntax_uid.into());
        self
    }

    /// Override the maximum PDU payload size advertised to peers.
    pub fn max_pdu_receive_size(mut self, value: u32) -> Self {
        self.max_pdu_receive_size = value;
        self
    }

    /// Override the implementation class UID announced to peers.
    pub fn implementation_class_uid<T>(mut self, uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.implementation_class_uid = uid.into();
        self
    }

    /// Override the implementation version name announced to peers.
    pub fn implementation_version_name<T>(mut self, name: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.implementation_version_name = name.into();
        self
    }

    /// Reject association requests whose called AE title does not
    /// match this node's AE title. The default is to accept any.
    pub fn require_called_ae_title(mut self, require: bool) -> Self {
        self.require_called_ae_title = require;
        self
    }

    /// Override the ARTIM timeout.
    pub fn artim_timeout(mut self, timeout: Duration) -> Self {
        self.artim_timeout = timeout;
        self
    }

    /// Install the C-ECHO handler.
    pub fn on_c_echo<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConnectionState) -> Status + Send + Sync + 'static,
    {
        self.on_c_echo = Some(Arc::new(handler));
        self
    }

    /// Install the C-STORE handler.
    pub fn on_c_store<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConnectionState, &str, &str, &str, &str, &str, &[u8]) -> Status
            + Send
            + Sync
            + 'static,
    {
        self.on_c_store = Some(Arc::new(handler));
        self
    }

    /// Install the C-FIND handler.
    pub fn on_c_find<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConnectionState, &str, &str, &[DataElement], SyncSender<CFindResult>)
            + Send
            + Sync
            + 'static,
    {
        self.on_c_find = Some(Arc::new(handler));
        self
    }

    /// Install the C-GET handler.
    pub fn on_c_get<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConnectionState, &str, &str, &[DataElement], SyncSender<CGetResult>)
            + Send
            + Sync
            + 'static,
    {
        self.on_c_get = Some(Arc::new(handler));
        self
    }
}

/// A DICOM service class provider:
/// a listening socket plus the configuration
/// for the associations accepted on it.
pub struct ServiceProvider {
    options: ServiceProviderOptions,
    listener: TcpListener,
}

impl ServiceProvider {
    /// Validate the options and bind the listening socket.
    pub fn bind<A: ToSocketAddrs>(options: ServiceProviderOptions, address: A) -> Result<Self> {
        ensure!(
            options.ae_title.len() <= 16,
            ConfigurationSnafu {
                message: format!("AE title {:?} is longer than 16 bytes", options.ae_title),
            }
        );
        ensure!(
            !options.sop_classes.is_empty(),
            ConfigurationSnafu {
                message: "at least one SOP class must be accepted".to_string(),
            }
        );
        let listener = TcpListener::bind(address)
            .map_err(|e| {
                TransportSnafu {
                    message: format!("could not bind listener: {}", e),
                }
                .build()
            })?;
        Ok(ServiceProvider { options, listener })
    }

    /// The address the provider is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|e| {
            TransportSnafu {
                message: format!("could not read listener address: {}", e),
            }
            .build()
        })
    }

    /// Accept connections forever,
    /// one state machine and dispatcher thread per connection.
    pub fn run(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_address)) => {
                    let options = self.options.clone();
                    thread::spawn(move || {
                        run_association(stream, peer_address, options);
                    });
                }
                Err(e) => {
                    warn!("could not accept connection: {}", e);
                }
            }
        }
    }
}

/// The per-connection dispatcher: consumes state machine upcalls and
/// adapts them to the configured handlers until the association ends.
fn run_association(stream: TcpStream, peer_address: SocketAddr, options: ServiceProviderOptions) {
    let mut transfer_syntaxes: Vec<String> = options
        .transfer_syntaxes
        .iter()
        .map(|ts| ts.to_string())
        .collect();
    if transfer_syntaxes.is_empty() {
        transfer_syntaxes.push(uids::IMPLICIT_VR_LITTLE_ENDIAN.to_string());
        transfer_syntaxes.push(uids::EXPLICIT_VR_LITTLE_ENDIAN.to_string());
    }

    let mut sm_options = SmOptions::new(Role::Acceptor);
    sm_options.local_ae_title = options.ae_title.to_string();
    sm_options.abstract_syntaxes = options
        .sop_classes
        .iter()
        .map(|uid| uid.to_string())
        .collect();
    sm_options.transfer_syntaxes = transfer_syntaxes;
    sm_options.max_pdu_receive_size = options.max_pdu_receive_size;
    sm_options.implementation_class_uid = options.implementation_class_uid.to_string();
    sm_options.implementation_version_name = options.implementation_version_name.to_string();
    sm_options.require_called_ae_title = options.require_called_ae_title;
    sm_options.artim_timeout = options.artim_timeout;
    sm_options.event_queue_capacity = options.event_queue_capacity;

    let handle = StateMachine::spawn(sm_options, Some(stream));

    let mut dispatcher = Dispatcher {
        handle: &handle,
        options: &options,
        conn_state: None,
        params: None,
        next_message_id: 1,
    };
    dispatcher.run(peer_address);

    let _ = handle.thread.join();
}

struct Dispatcher<'a> {
    handle: &'a SmHandle,
    options: &'a ServiceProviderOptions,
    conn_state: Option<ConnectionState>,
    params: Option<AssociationParams>,
    /// message IDs for C-STORE sub-operations issued by this node
    next_message_id: u16,
}

impl Dispatcher<'_> {
    fn run(&mut self, peer_address: SocketAddr) {
        loop {
            match self.handle.upcalls.recv() {
                Ok(UpcallEvent::Established(params)) => {
                    self.conn_state = Some(ConnectionState {
                        calling_ae_title: params.calling_ae_title.clone(),
                        called_ae_title: params.called_ae_title.clone(),
                        peer_address: Some(peer_address),
                    });
                    self.params = Some(params);
                }
                Ok(UpcallEvent::Data {
                    context_id,
                    transfer_syntax_uid,
                    command,
                    data,
                    ..
                }) => {
                    if self
                        .handle_message(context_id, &transfer_syntax_uid, command, data)
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(UpcallEvent::ReleaseRequested) => {
                    if self.handle.events.send(Event::AReleaseRsp).is_err() {
                        break;
                    }
                }
                Ok(UpcallEvent::Aborted { message }) => {
                    debug!("association aborted: {}", message);
                    break;
                }
                Ok(UpcallEvent::Closed)
                | Ok(UpcallEvent::EstablishFailed { .. })
                | Ok(UpcallEvent::Rejected { .. })
                | Ok(UpcallEvent::Released) => break,
                Err(_) => break,
            }
        }
    }

    fn handle_message(
        &mut self,
        context_id: u8,
        transfer_syntax_uid: &str,
        command: Command,
        data: Option<Vec<u8>>,
    ) -> std::result::Result<(), ()> {
        let conn_state = match self.conn_state.clone() {
            Some(conn_state) => conn_state,
            None => {
                warn!("DIMSE message before the association was established");
                return Err(());
            }
        };

        match command {
            Command::CEchoRq(req) => {
                let status = match &self.options.on_c_echo {
                    Some(handler) => self.run_handler(|| handler(&conn_state))?,
                    None => Status::success(),
                };
                self.send_response(
                    context_id,
                    Command::CEchoRsp(CEchoRsp {
                        message_id_being_responded_to: req.message_id,
                        affected_sop_class_uid: Some(req.affected_sop_class_uid),
                        data_set_type: COMMAND_DATA_SET_TYPE_NULL,
                        status,
                        extra: vec![],
                    }),
                    None,
                )
            }
            Command::CStoreRq(req) => {
                let data = data.unwrap_or_default();
                let status = match &self.options.on_c_store {
                    Some(handler) => self.run_handler(|| {
                        handler(
                            &conn_state,
                            transfer_syntax_uid,
                            &req.affected_sop_class_uid,
                            &req.affected_sop_instance_uid,
                            &conn_state.calling_ae_title,
                            &conn_state.called_ae_title,
                            &data,
                        )
                    })?,
                    None => Status::error(
                        status::UNRECOGNIZED_OPERATION,
                        "no C-STORE handler configured",
                    ),
                };
                self.send_response(
                    context_id,
                    Command::CStoreRsp(CStoreRsp {
                        message_id_being_responded_to: req.message_id,
                        affected_sop_class_uid: Some(req.affected_sop_class_uid),
                        affected_sop_instance_uid: Some(req.affected_sop_instance_uid),
                        data_set_type: COMMAND_DATA_SET_TYPE_NULL,
                        status,
                        extra: vec![],
                    }),
                    None,
                )
            }
            Command::CFindRq(req) => {
                self.handle_c_find(context_id, transfer_syntax_uid, &conn_state, req, data)
            }
            Command::CGetRq(req) => {
                self.handle_c_get(context_id, transfer_syntax_uid, &conn_state, req, data)
            }
            Command::CMoveRq(req) => {
                // the move service is not provided by this node
                self.send_response(
                    context_id,
                    Command::CMoveRsp(CMoveRsp {
                        message_id_being_responded_to: req.message_id,
                        affected_sop_class_uid: Some(req.affected_sop_class_uid),
                        data_set_type: COMMAND_DATA_SET_TYPE_NULL,
                        status: Status::error(
                            status::UNRECOGNIZED_OPERATION,
                            "C-MOVE is not supported",
                        ),
                        number_of_remaining_suboperations: None,
                        number_of_completed_suboperations: None,
                        number_of_failed_suboperations: None,
                        number_of_warning_suboperations: None,
                        extra: vec![],
                    }),
                    None,
                )
            }
            Command::CCancelRq(_) => {
                warn!("ignoring C-CANCEL-RQ: operations are not cancellable");
                Ok(())
            }
            other => {
                warn!("ignoring unexpected {}", other.name());
                Ok(())
            }
        }
    }

    fn handle_c_find(
        &mut self,
        context_id: u8,
        transfer_syntax_uid: &str,
        conn_state: &ConnectionState,
        req: crate::dimse::CFindRq,
        data: Option<Vec<u8>>,
    ) -> std::result::Result<(), ()> {
        let handler = match &self.options.on_c_find {
            Some(handler) => handler.clone(),
            None => {
                return self.send_response(
                    context_id,
                    find_response(&req, Status::error(
                        status::UNRECOGNIZED_OPERATION,
                        "no C-FIND handler configured",
                    )),
                    None,
                );
            }
        };

        let filters = match element::read_elements(&data.unwrap_or_default()) {
            Ok(filters) => filters,
            Err(e) => {
                warn!("could not decode C-FIND identifier: {}", e);
                return self.send_response(
                    context_id,
                    find_response(
                        &req,
                        Status::error(status::CANNOT_UNDERSTAND, "undecodable identifier"),
                    ),
                    None,
                );
            }
        };

        let (tx, rx) = sync_channel(16);
        let worker = {
            let handler = handler.clone();
            let conn_state = conn_state.clone();
            let transfer_syntax_uid = transfer_syntax_uid.to_string();
            let sop_class_uid = req.affected_sop_class_uid.clone();
            thread::spawn(move || {
                handler(&conn_state, &transfer_syntax_uid, &sop_class_uid, &filters, tx)
            })
        };

        for result in rx.iter() {
            let mut identifier = Vec::new();
            if let Err(e) = element::write_elements(&mut identifier, &result.elements) {
                warn!("could not encode C-FIND match: {}", e);
                continue;
            }
            self.send_response(
                context_id,
                Command::CFindRsp(CFindRsp {
                    message_id_being_responded_to: req.message_id,
                    affected_sop_class_uid: Some(req.affected_sop_class_uid.clone()),
                    data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
                    status: Status::error(status::PENDING, ""),
                    extra: vec![],
                }),
                Some(identifier),
            )?;
        }

        if worker.join().is_err() {
            error!("C-FIND handler panicked, aborting the association");
            let _ = self.handle.events.send(Event::AAbortRq);
            return Err(());
        }

        self.send_response(context_id, find_response(&req, Status::success()), None)
    }

    fn handle_c_get(
        &mut self,
        context_id: u8,
        transfer_syntax_uid: &str,
        conn_state: &ConnectionState,
        req: crate::dimse::CGetRq,
        data: Option<Vec<u8>>,
    ) -> std::result::Result<(), ()> {
        let handler = match &self.options.on_c_get {
            Some(handler) => handler.clone(),
            None => {
                return self.send_response(
                    context_id,
                    get_response(
                        &req,
                        Status::error(
                            status::UNRECOGNIZED_OPERATION,
                            "no C-GET handler configured",
                        ),
                        0,
                        0,
                    ),
                    None,
                );
            }
        };

        let filters = match element::read_elements(&data.unwrap_or_default()) {
            Ok(filters) => filters,
            Err(e) => {
                warn!("could not decode C-GET identifier: {}", e);
                return self.send_response(
                    context_id,
                    get_response(
                        &req,
                        Status::error(status::CANNOT_UNDERSTAND, "undecodable identifier"),
                        0,
                        0,
                    ),
                    None,
                );
            }
        };

        let (tx, rx) = sync_channel(16);
        let worker = {
            let handler = handler.clone();
            let conn_state = conn_state.clone();
            let transfer_syntax_uid = transfer_syntax_uid.to_string();
            let sop_class_uid = req.affected_sop_class_uid.clone();
            thread::spawn(move || {
                handler(&conn_state, &transfer_syntax_uid, &sop_class_uid, &filters, tx)
            })
        };

        let mut completed = 0u16;
        let mut failed = 0u16;
        for result in rx.iter() {
            match self.store_sub_operation(&req, result) {
                Ok(true) => completed += 1,
                Ok(false) => failed += 1,
                Err(()) => {
                    let _ = worker.join();
                    return Err(());
                }
            }
        }

        if worker.join().is_err() {
            error!("C-GET handler panicked, aborting the association");
            let _ = self.handle.events.send(Event::AAbortRq);
            return Err(());
        }

        self.send_response(
            context_id,
            get_response(&req, Status::success(), completed, failed),
            None,
        )
    }

    /// Issue one C-STORE sub-operation back to the requester and wait
    /// for its response. Returns whether the peer stored the data set.
    fn store_sub_operation(
        &mut self,
        req: &crate::dimse::CGetRq,
        result: CGetResult,
    ) -> std::result::Result<bool, ()> {
        // the requester must have negotiated a context for the storage
        // class, otherwise there is no way to carry the sub-operation
        let negotiated = self
            .params
            .as_ref()
            .map(|params| params.is_negotiated(&result.sop_class_uid))
            .unwrap_or(false);
        if !negotiated {
            warn!(
                "no presentation context for {}, C-STORE sub-operation dropped",
                result.sop_class_uid
            );
            return Ok(false);
        }

        let message_id = self.next_message_id;
        self.next_message_id = self.next_message_id.wrapping_add(1);

        let command = Command::CStoreRq(CStoreRq {
            message_id,
            affected_sop_class_uid: result.sop_class_uid.clone(),
            affected_sop_instance_uid: result.sop_instance_uid.clone(),
            priority: Priority::Medium,
            data_set_type: COMMAND_DATA_SET_TYPE_NON_NULL,
            move_originator_application_entity_title: None,
            move_originator_message_id: Some(req.message_id),
            extra: vec![],
        });
        self.send_payload(DimsePayload {
            context: ContextRef::AbstractSyntax(result.sop_class_uid.clone()),
            command,
            data: Some(result.data),
        })?;

        loop {
            match self.handle.upcalls.recv() {
                Ok(UpcallEvent::Data {
                    command: Command::CStoreRsp(rsp),
                    ..
                }) => {
                    if !rsp.status.is_success() {
                        warn!("C-STORE sub-operation failed with status {}", rsp.status);
                        return Ok(false);
                    }
                    return Ok(true);
                }
                Ok(UpcallEvent::Data { command, .. }) => {
                    warn!("ignoring unexpected {}", command.name());
                }
                Ok(UpcallEvent::ReleaseRequested) => {
                    let _ = self.handle.events.send(Event::AReleaseRsp);
                    return Err(());
                }
                Ok(UpcallEvent::Closed)
                | Ok(UpcallEvent::Aborted { .. })
                | Err(_) => return Err(()),
                Ok(_) => continue,
            }
        }
    }

    /// Run a handler with panic isolation: a panicking handler costs
    /// this association only.
    fn run_handler<T>(
        &self,
        call: impl FnOnce() -> T,
    ) -> std::result::Result<T, ()> {
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(value) => Ok(value),
            Err(_) => {
                error!("handler panicked, aborting the association");
                let _ = self.handle.events.send(Event::AAbortRq);
                Err(())
            }
        }
    }

    fn send_response(
        &self,
        context_id: u8,
        command: Command,
        data: Option<Vec<u8>>,
    ) -> std::result::Result<(), ()> {
        self.send_payload(DimsePayload {
            context: ContextRef::Id(context_id),
            command,
            data,
        })
    }

    fn send_payload(&self, payload: DimsePayload) -> std::result::Result<(), ()> {
        self.handle
            .events
            .send(Event::PDataRq(payload))
            .map_err(|_| ())
    }
}

fn find_response(req: &crate::dimse::CFindRq, status: Status) -> Command {
    Command::CFindRsp(CFindRsp {
        message_id_being_responded_to: req.message_id,
        affected_sop_class_uid: Some(req.affected_sop_class_uid.clone()),
        data_set_type: COMMAND_DATA_SET_TYPE_NULL,
        status,
        extra: vec![],
    })
}

fn get_response(
    req: &crate::dimse::CGetRq,
    status: Status,
    completed: u16,
    failed: u16,
) -> Command {
    Command::CGetRsp(CGetRsp {
        message_id_being_responded_to: req.message_id,
        affected_sop_class_uid: Some(req.affected_sop_class_uid.clone()),
        data_set_type: COMMAND_DATA_SET_TYPE_NULL,
        status,
        number_of_remaining_suboperations: Some(0),
        number_of_completed_suboperations: Some(completed),
        number_of_failed_suboperations: Some(failed),
        number_of_warning_suboperations: Some(0),
        extra: vec![],
    })
}
