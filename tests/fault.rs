//! Deterministic failure injection.
//!
//! This scenario lives in its own test binary because the fault
//! injector is process-wide: once armed, it drops the connection of
//! every association that has reached the data transfer state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use dicom_net::association::fault::{set_fault_injector, FaultAction, FaultInjector};
use dicom_net::association::sm::{Action, EventCode, State};
use dicom_net::dimse::Status;
use dicom_net::service::provider::{ServiceProvider, ServiceProviderOptions};
use dicom_net::service::user::{ServiceUser, ServiceUserOptions};
use dicom_net::uids;

/// Waits for any association to become ready for data transfer,
/// then disconnects on the next send.
#[derive(Default)]
struct DisconnectAfterEstablish {
    connected: AtomicBool,
}

impl FaultInjector for DisconnectAfterEstablish {
    fn on_state_transition(&self, _old: State, _event: EventCode, _action: Action, new: State) {
        if new == State::Sta6 {
            self.connected.store(true, Ordering::SeqCst);
        }
    }

    fn on_send(&self, _data: &[u8]) -> FaultAction {
        if self.connected.load(Ordering::SeqCst) {
            FaultAction::Disconnect
        } else {
            FaultAction::Continue
        }
    }
}

#[test]
fn mid_send_disconnect_surfaces_as_a_connection_failure() {
    let received = Arc::new(Mutex::new(Vec::new()));
    let handler_received = Arc::clone(&received);
    let provider = ServiceProvider::bind(
        ServiceProviderOptions::new()
            .ae_title("STORE-SCP")
            .with_sop_classes(uids::STORAGE_CLASSES.iter().copied())
            .on_c_store(
                move |_conn, _ts, _class, _instance, _calling, _called, data| {
                    handler_received.lock().unwrap().extend_from_slice(data);
                    Status::success()
                },
            ),
        "127.0.0.1:0",
    )
    .expect("bind should succeed");
    let address = provider.local_addr().unwrap();
    thread::spawn(move || provider.run());

    set_fault_injector(Some(Arc::new(DisconnectAfterEstablish::default())));

    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("STORE-SCU")
            .called_ae_title("STORE-SCP")
            .with_sop_classes(uids::STORAGE_CLASSES.iter().copied()),
    )
    .unwrap();
    scu.connect(&address.to_string())
        .expect("the handshake happens before the injector arms");

    let dataset: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
    let err = scu
        .c_store(uids::SECONDARY_CAPTURE_IMAGE_STORAGE, "1.2.3.4", &dataset)
        .expect_err("the injector must have cut the connection");
    assert!(
        err.to_string().contains("Connection failed"),
        "unexpected error: {}",
        err
    );

    // release after the failure must not hang or error
    scu.release().expect("release is clean after teardown");

    set_fault_injector(None);

    // the handler never saw the aborted transfer
    assert!(received.lock().unwrap().is_empty());
}
