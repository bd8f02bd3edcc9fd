use crate::pdu::reader::{read_pdu, Error};
use crate::pdu::writer::write_pdu;
use crate::pdu::*;
use matches::matches;
use std::io::Cursor;

fn roundtrip(pdu: &Pdu) -> Pdu {
    let mut bytes = vec![];
    write_pdu(&mut bytes, pdu).expect("encoding should succeed");
    read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU).expect("decoding should succeed")
}

#[test]
fn roundtrip_association_rq() {
    let pdu = Pdu::AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-STORAGE".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.7".to_string(),
                transfer_syntaxes: vec![
                    "1.2.840.10008.1.2".to_string(),
                    "1.2.840.10008.1.2.1".to_string(),
                ],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(16384),
            UserVariableItem::ImplementationClassUID("1.2.3.4.5".to_string()),
            UserVariableItem::ImplementationVersionName("dicom-net".to_string()),
            UserVariableItem::AsynchronousOperationsWindow(2, 3),
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: "1.2.840.10008.5.1.4.1.2.1.3".to_string(),
                scu_role: true,
                scp_role: true,
            }),
            UserVariableItem::Unknown(0x77, vec![1, 2, 3, 4]),
        ],
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn roundtrip_association_ac() {
    let pdu = Pdu::AssociationAC {
        protocol_version: 1,
        calling_ae_title: "STORE-SCU".to_string(),
        called_ae_title: "MAIN-STORAGE".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![
            PresentationContextResult {
                id: 1,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
            PresentationContextResult {
                id: 3,
                reason: PresentationContextResultReason::AbstractSyntaxNotSupported,
                transfer_syntax: "1.2.840.10008.1.2".to_string(),
            },
        ],
        user_variables: vec![
            UserVariableItem::MaxLength(0),
            UserVariableItem::ImplementationClassUID("1.2.3.4.5".to_string()),
        ],
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn roundtrip_association_rj() {
    let pdu = Pdu::AssociationRJ {
        result: AssociationRjResult::Permanent,
        source: AssociationRjSource::ServiceUser(
            AssociationRjServiceUserReason::CalledAeTitleNotRecognized,
        ),
    };
    assert_eq!(roundtrip(&pdu), pdu);

    let pdu = Pdu::AssociationRJ {
        result: AssociationRjResult::Transient,
        source: AssociationRjSource::ServiceProviderPresentation(
            AssociationRjServiceProviderPresentationReason::LocalLimitExceeded,
        ),
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn roundtrip_pdata() {
    let pdu = Pdu::PData {
        data: vec![
            PDataValue {
                presentation_context_id: 5,
                value_type: PDataValueType::Command,
                is_last: true,
                data: vec![8; 32],
            },
            PDataValue {
                presentation_context_id: 5,
                value_type: PDataValueType::Data,
                is_last: false,
                data: vec![16; 1024],
            },
        ],
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn roundtrip_release_and_abort() {
    assert_eq!(roundtrip(&Pdu::ReleaseRQ), Pdu::ReleaseRQ);
    assert_eq!(roundtrip(&Pdu::ReleaseRP), Pdu::ReleaseRP);

    let pdu = Pdu::AbortRQ {
        source: AbortRqSource::ServiceUser,
    };
    assert_eq!(roundtrip(&pdu), pdu);

    let pdu = Pdu::AbortRQ {
        source: AbortRqSource::ServiceProvider(AbortRqServiceProviderReason::UnexpectedPdu),
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn roundtrip_unknown_pdu() {
    let pdu = Pdu::Unknown {
        pdu_type: 0xAA,
        data: vec![1, 2, 3, 4, 5],
    };
    assert_eq!(roundtrip(&pdu), pdu);
}

#[test]
fn framing_is_stable() {
    // encode(decode(bytes)) == bytes for a well formed message
    let pdu = Pdu::AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "A".to_string(),
        called_ae_title: "B".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![PresentationContextProposed {
            id: 1,
            abstract_syntax: "1.2.840.10008.1.1".to_string(),
            transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
        }],
        user_variables: vec![UserVariableItem::MaxLength(4096)],
    };
    let mut bytes = vec![];
    write_pdu(&mut bytes, &pdu).unwrap();

    let decoded = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU).unwrap();
    let mut reencoded = vec![];
    write_pdu(&mut reencoded, &decoded).unwrap();
    assert_eq!(bytes, reencoded);
}

#[test]
fn read_rejects_oversized_pdu() {
    // a P-DATA-TF claiming more bytes than twice the maximum
    let mut bytes = vec![0x04, 0x00];
    bytes.extend_from_slice(&(2 * MINIMUM_PDU_SIZE).to_be_bytes());
    let err = read_pdu(&mut Cursor::new(&bytes), MINIMUM_PDU_SIZE).unwrap_err();
    assert!(matches!(err, Error::PduTooLarge { .. }));
}

#[test]
fn read_rejects_leftover_bytes() {
    // an A-RELEASE-RQ with a payload longer than its 4 reserved bytes
    let bytes = vec![0x05, 0x00, 0x00, 0x00, 0x00, 0x06, 0, 0, 0, 0, 0, 0];
    let err = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU).unwrap_err();
    assert!(matches!(err, Error::LeftoverBytes { leftover: 2, .. }));
}

#[test]
fn read_rejects_truncated_pdu() {
    let pdu = Pdu::ReleaseRQ;
    let mut bytes = vec![];
    write_pdu(&mut bytes, &pdu).unwrap();
    bytes.truncate(bytes.len() - 2);
    let err = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU).unwrap_err();
    assert!(matches!(err, Error::IncompletePdu { .. }));
}

#[test]
fn empty_stream_is_no_pdu() {
    let err = read_pdu(&mut Cursor::new(&[]), DEFAULT_MAX_PDU).unwrap_err();
    assert!(matches!(err, Error::NoPduAvailable { .. }));
}

#[test]
fn write_rejects_long_ae_title() {
    let pdu = Pdu::AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "A-TITLE-OF-SEVENTEEN".to_string(),
        called_ae_title: "B".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![],
        user_variables: vec![],
    };
    let mut bytes = vec![];
    let err = write_pdu(&mut bytes, &pdu).unwrap_err();
    assert!(matches!(
        err,
        crate::pdu::writer::Error::AeTitleTooLong { .. }
    ));
}

#[test]
fn malformed_user_sub_item_becomes_placeholder() {
    // hand-build an A-ASSOCIATE-RQ whose maximum length sub-item
    // declares 3 bytes of payload
    let mut body = vec![];
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(b"CALLED          ");
    body.extend_from_slice(b"CALLING         ");
    body.extend_from_slice(&[0u8; 32]);
    // application context item
    body.extend_from_slice(&[0x10, 0x00]);
    body.extend_from_slice(&(DICOM_APPLICATION_CONTEXT_NAME.len() as u16).to_be_bytes());
    body.extend_from_slice(DICOM_APPLICATION_CONTEXT_NAME.as_bytes());
    // user information item with a bad maximum length sub-item
    body.extend_from_slice(&[0x50, 0x00, 0x00, 0x07]);
    body.extend_from_slice(&[0x51, 0x00, 0x00, 0x03, 1, 2, 3]);

    let mut bytes = vec![0x01, 0x00];
    bytes.extend_from_slice(&(body.len() as u32).to_be_bytes());
    bytes.extend_from_slice(&body);

    let pdu = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU).unwrap();
    assert!(pdu.has_malformed_items());
    match pdu {
        Pdu::AssociationRQ { user_variables, .. } => {
            assert!(matches!(
                &user_variables[..],
                [UserVariableItem::Malformed(0x51, _)]
            ));
        }
        other => panic!("unexpected PDU {:?}", other),
    }
}
