//! End to end scenarios: a real provider on an ephemeral port,
//! driven by a real service user over loopback TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use dicom_net::dimse::element::tags;
use dicom_net::dimse::{DataElement, Status};
use dicom_net::service::provider::{CFindResult, CGetResult, ServiceProvider, ServiceProviderOptions};
use dicom_net::service::user::{ServiceUser, ServiceUserOptions};
use dicom_net::service::{Error, QueryRetrieveLevel};
use dicom_net::uids;

fn spawn_provider(options: ServiceProviderOptions) -> SocketAddr {
    let provider = ServiceProvider::bind(options, "127.0.0.1:0").expect("bind should succeed");
    let address = provider.local_addr().expect("listener has an address");
    thread::spawn(move || provider.run());
    address
}

/// A synthetic serialized data set; the network layer carries it
/// verbatim, so arbitrary bytes exercise the same paths.
fn synthetic_dataset(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn c_echo_invokes_the_handler_once() {
    let echo_count = Arc::new(AtomicUsize::new(0));
    let handler_count = Arc::clone(&echo_count);
    let address = spawn_provider(
        ServiceProviderOptions::new()
            .ae_title("ECHO-SCP")
            .with_sop_class(uids::VERIFICATION)
            .on_c_echo(move |_conn| {
                handler_count.fetch_add(1, Ordering::SeqCst);
                Status::success()
            }),
    );

    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("ECHO-SCU")
            .called_ae_title("ECHO-SCP")
            .with_sop_class(uids::VERIFICATION),
    )
    .unwrap();
    scu.connect(&address.to_string()).expect("connect should succeed");

    let before = echo_count.load(Ordering::SeqCst);
    scu.c_echo().expect("C-ECHO should succeed");
    assert_eq!(echo_count.load(Ordering::SeqCst), before + 1);

    scu.release().expect("release should succeed");
}

#[test]
fn c_store_delivers_the_same_bytes() {
    let received: Arc<Mutex<Option<(String, String, Vec<u8>)>>> = Arc::new(Mutex::new(None));
    let handler_received = Arc::clone(&received);
    let address = spawn_provider(
        ServiceProviderOptions::new()
            .ae_title("STORE-SCP")
            .with_sop_classes(uids::STORAGE_CLASSES.iter().copied())
            // a small maximum forces the data set across many PDUs
            .max_pdu_receive_size(4096)
            .on_c_store(
                move |_conn, _ts, sop_class_uid, sop_instance_uid, _calling, _called, data| {
                    *handler_received.lock().unwrap() = Some((
                        sop_class_uid.to_string(),
                        sop_instance_uid.to_string(),
                        data.to_vec(),
                    ));
                    Status::success()
                },
            ),
    );

    let dataset = synthetic_dataset(200 * 1024);
    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("STORE-SCU")
            .called_ae_title("STORE-SCP")
            .with_sop_classes(uids::STORAGE_CLASSES.iter().copied()),
    )
    .unwrap();
    scu.connect(&address.to_string()).expect("connect should succeed");
    scu.c_store(
        uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
        "1.2.3.4.5.6.7.8",
        &dataset,
    )
    .expect("C-STORE should succeed");
    scu.release().expect("release should succeed");

    let received = received.lock().unwrap().take().expect("handler should run");
    assert_eq!(received.0, uids::SECONDARY_CAPTURE_IMAGE_STORAGE);
    assert_eq!(received.1, "1.2.3.4.5.6.7.8");
    assert_eq!(received.2, dataset);
}

#[test]
fn c_store_failure_surfaces_the_error_comment() {
    let address = spawn_provider(
        ServiceProviderOptions::new()
            .ae_title("STORE-SCP")
            .with_sop_classes(uids::STORAGE_CLASSES.iter().copied())
            .on_c_store(|_conn, _ts, _class, _instance, _calling, _called, _data| {
                Status::error(0xC000, "Foohah")
            }),
    );

    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("STORE-SCU")
            .called_ae_title("STORE-SCP")
            .with_sop_classes(uids::STORAGE_CLASSES.iter().copied()),
    )
    .unwrap();
    scu.connect(&address.to_string()).expect("connect should succeed");

    let err = scu
        .c_store(
            uids::SECONDARY_CAPTURE_IMAGE_STORAGE,
            "1.2.3.4.5.6.7.8",
            &synthetic_dataset(1024),
        )
        .expect_err("C-STORE should fail");
    assert!(
        err.to_string().contains("Foohah"),
        "error should carry the comment: {}",
        err
    );
    // a DIMSE status error leaves the association reusable
    assert!(matches!(err, Error::DimseStatus { .. }));
    scu.release().expect("release should succeed");
}

#[test]
fn c_store_with_unnegotiated_sop_class_never_touches_the_socket() {
    let address = spawn_provider(
        ServiceProviderOptions::new()
            .ae_title("STORE-SCP")
            .with_sop_class(uids::CT_IMAGE_STORAGE)
            .on_c_store(|_conn, _ts, _class, _instance, _calling, _called, _data| {
                Status::success()
            }),
    );

    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("STORE-SCU")
            .called_ae_title("STORE-SCP")
            .with_sop_class(uids::CT_IMAGE_STORAGE),
    )
    .unwrap();
    scu.connect(&address.to_string()).expect("connect should succeed");

    let err = scu
        .c_store(uids::MR_IMAGE_STORAGE, "1.2.3", &[1, 2, 3, 4])
        .expect_err("unnegotiated SOP class should fail");
    assert!(matches!(err, Error::Configuration { .. }));

    // the association is still usable after the local error
    scu.c_store(uids::CT_IMAGE_STORAGE, "1.2.3", &synthetic_dataset(256))
        .expect("negotiated SOP class should succeed");
    scu.release().expect("release should succeed");
}

#[test]
fn c_find_streams_all_matches() {
    let seen_filters: Arc<Mutex<Vec<DataElement>>> = Arc::new(Mutex::new(vec![]));
    let handler_filters = Arc::clone(&seen_filters);
    let address = spawn_provider(
        ServiceProviderOptions::new()
            .ae_title("FIND-SCP")
            .with_sop_classes(uids::QUERY_RETRIEVE_FIND_CLASSES.iter().copied())
            .on_c_find(move |_conn, _ts, _sop_class, filters, results| {
                *handler_filters.lock().unwrap() = filters.to_vec();
                for name in ["johndoe", "johndoe2"] {
                    results
                        .send(CFindResult {
                            elements: vec![DataElement::from_text(tags::PATIENT_NAME, name)],
                        })
                        .expect("dispatcher should be draining results");
                }
            }),
    );

    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("FIND-SCU")
            .called_ae_title("FIND-SCP")
            .with_sop_classes(uids::QUERY_RETRIEVE_FIND_CLASSES.iter().copied()),
    )
    .unwrap();
    scu.connect(&address.to_string()).expect("connect should succeed");

    let mut names_found = vec![];
    for result in scu
        .c_find(
            QueryRetrieveLevel::Patient,
            vec![DataElement::from_text(tags::PATIENT_NAME, "foohah")],
        )
        .expect("C-FIND should start")
    {
        let elements = result.expect("pending result should decode");
        for element in elements {
            assert_eq!(element.tag, tags::PATIENT_NAME);
            names_found.push(element.to_str());
        }
    }
    assert_eq!(names_found, vec!["johndoe", "johndoe2"]);

    let filters = seen_filters.lock().unwrap();
    assert!(filters
        .iter()
        .any(|e| e.tag == tags::QUERY_RETRIEVE_LEVEL && e.to_str() == "PATIENT"));
    assert!(filters
        .iter()
        .any(|e| e.tag == tags::PATIENT_NAME && e.to_str() == "foohah"));
    drop(filters);

    scu.release().expect("release should succeed");
}

#[test]
fn c_get_delivers_data_sets_over_the_same_association() {
    let dataset = synthetic_dataset(32 * 1024);
    let handler_dataset = dataset.clone();
    let address = spawn_provider(
        ServiceProviderOptions::new()
            .ae_title("GET-SCP")
            .with_sop_classes(uids::QUERY_RETRIEVE_GET_CLASSES.iter().copied())
            .with_sop_classes(uids::STORAGE_CLASSES.iter().copied())
            .on_c_get(move |_conn, _ts, _sop_class, _filters, results| {
                results
                    .send(CGetResult {
                        remaining: -1,
                        sop_class_uid: uids::SECONDARY_CAPTURE_IMAGE_STORAGE.to_string(),
                        sop_instance_uid: "9.8.7.6".to_string(),
                        data: handler_dataset.clone(),
                    })
                    .expect("dispatcher should be draining results");
            }),
    );

    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("GET-SCU")
            .called_ae_title("GET-SCP")
            .with_sop_classes(uids::QUERY_RETRIEVE_GET_CLASSES.iter().copied())
            .with_sop_class(uids::SECONDARY_CAPTURE_IMAGE_STORAGE),
    )
    .unwrap();
    scu.connect(&address.to_string()).expect("connect should succeed");

    let received: Arc<Mutex<Option<(String, String, Vec<u8>)>>> = Arc::new(Mutex::new(None));
    let callback_received = Arc::clone(&received);
    scu.c_get(
        QueryRetrieveLevel::Patient,
        vec![DataElement::from_text(tags::PATIENT_NAME, "foohah")],
        move |_ts, sop_class_uid, sop_instance_uid, data| {
            *callback_received.lock().unwrap() = Some((
                sop_class_uid.to_string(),
                sop_instance_uid.to_string(),
                data.to_vec(),
            ));
            Status::success()
        },
    )
    .expect("C-GET should succeed");
    scu.release().expect("release should succeed");

    let received = received.lock().unwrap().take().expect("callback should run");
    assert_eq!(received.0, uids::SECONDARY_CAPTURE_IMAGE_STORAGE);
    assert_eq!(received.1, "9.8.7.6");
    assert_eq!(received.2, dataset);
}

#[test]
fn release_without_connect_is_a_noop() {
    let mut scu = ServiceUser::new(
        ServiceUserOptions::new().with_sop_classes(uids::STORAGE_CLASSES.iter().copied()),
    )
    .unwrap();
    scu.release().expect("release without connect is a no-op");
}

#[test]
fn connecting_to_a_dead_peer_fails_with_a_transport_error() {
    let mut scu = ServiceUser::new(
        ServiceUserOptions::new().with_sop_classes(uids::STORAGE_CLASSES.iter().copied()),
    )
    .unwrap();
    // a port that nothing listens on
    let err = scu.connect("127.0.0.1:1").expect_err("connect should fail");
    assert!(
        err.to_string().contains("Connection failed"),
        "unexpected error: {}",
        err
    );

    let err = scu
        .c_store(uids::SECONDARY_CAPTURE_IMAGE_STORAGE, "1.2.3", &[0, 1, 2])
        .expect_err("C-STORE without an association should fail");
    assert!(err.to_string().contains("Connection failed"));
}

#[test]
fn association_is_rejected_for_the_wrong_called_ae_title() {
    let address = spawn_provider(
        ServiceProviderOptions::new()
            .ae_title("RIGHT-SCP")
            .require_called_ae_title(true)
            .with_sop_class(uids::VERIFICATION),
    );

    let mut scu = ServiceUser::new(
        ServiceUserOptions::new()
            .calling_ae_title("ECHO-SCU")
            .called_ae_title("WRONG-SCP")
            .with_sop_class(uids::VERIFICATION),
    )
    .unwrap();
    let err = scu
        .connect(&address.to_string())
        .expect_err("connect should be rejected");
    assert!(matches!(err, Error::Rejected { .. }), "got: {}", err);
}
