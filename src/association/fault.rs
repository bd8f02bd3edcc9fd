//! Fault injection hooks for deterministic failure tests.
//!
//! The state machine consults a single process-wide injector at two
//! points: after every state transition, and before every PDU write.
//! Production code leaves the injector unset; tests install one before
//! starting any server and remove it when done.

use std::sync::{Arc, RwLock};

use crate::association::sm::{Action, EventCode, State};

/// What the state machine should do with an outgoing PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// write the PDU as usual
    Continue,
    /// drop the connection without writing
    Disconnect,
}

/// Interception points for deterministic failure tests.
pub trait FaultInjector: Send + Sync {
    /// Called after every state transition of every association.
    fn on_state_transition(
        &self,
        _old: State,
        _event: EventCode,
        _action: Action,
        _new: State,
    ) {
    }

    /// Called before every PDU write with the encoded bytes.
    fn on_send(&self, _data: &[u8]) -> FaultAction {
        FaultAction::Continue
    }
}

static INJECTOR: RwLock<Option<Arc<dyn FaultInjector>>> = RwLock::new(None);

/// Install or remove the process-wide fault injector.
///
/// Must be called before any association is started.
pub fn set_fault_injector(injector: Option<Arc<dyn FaultInjector>>) {
    *INJECTOR.write().unwrap() = injector;
}

/// The currently installed fault injector, if any.
pub(crate) fn fault_injector() -> Option<Arc<dyn FaultInjector>> {
    INJECTOR.read().unwrap().clone()
}
