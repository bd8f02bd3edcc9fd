use dicom_net::pdu::reader::read_pdu;
use dicom_net::pdu::writer::write_pdu;
use dicom_net::pdu::{
    PDataValue, PDataValueType, Pdu, PresentationContextProposed, RoleSelection,
    UserVariableItem, DEFAULT_MAX_PDU, DICOM_APPLICATION_CONTEXT_NAME,
};
use matches::matches;
use std::io::Cursor;

#[test]
fn can_read_write_associate_rq() -> Result<(), Box<dyn std::error::Error>> {
    let association_rq = Pdu::AssociationRQ {
        protocol_version: 1,
        calling_ae_title: "calling ae".to_string(),
        called_ae_title: "called ae".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![
            PresentationContextProposed {
                id: 1,
                abstract_syntax: "1.2.840.10008.1.1".to_string(),
                transfer_syntaxes: vec![
                    "1.2.840.10008.1.2".to_string(),
                    "1.2.840.10008.1.2.1".to_string(),
                ],
            },
            PresentationContextProposed {
                id: 3,
                abstract_syntax: "1.2.840.10008.5.1.4.1.1.7".to_string(),
                transfer_syntaxes: vec!["1.2.840.10008.1.2".to_string()],
            },
        ],
        user_variables: vec![
            UserVariableItem::ImplementationClassUID("1.2.3.4.5.6".to_string()),
            UserVariableItem::ImplementationVersionName("version name".to_string()),
            UserVariableItem::MaxLength(23),
            UserVariableItem::AsynchronousOperationsWindow(1, 1),
            UserVariableItem::RoleSelection(RoleSelection {
                sop_class_uid: "1.2.840.10008.5.1.4.1.2.1.3".to_string(),
                scu_role: true,
                scp_role: true,
            }),
        ],
    };

    let mut bytes = vec![0u8; 0];
    write_pdu(&mut bytes, &association_rq)?;

    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU)?;

    if let Pdu::AssociationRQ {
        protocol_version,
        calling_ae_title,
        called_ae_title,
        application_context_name,
        presentation_contexts,
        user_variables,
    } = result
    {
        assert_eq!(protocol_version, 1);
        assert_eq!(calling_ae_title, "calling ae");
        assert_eq!(called_ae_title, "called ae");
        assert_eq!(application_context_name, DICOM_APPLICATION_CONTEXT_NAME);
        assert_eq!(presentation_contexts.len(), 2);
        assert_eq!(
            presentation_contexts[0].abstract_syntax,
            "1.2.840.10008.1.1"
        );
        assert_eq!(presentation_contexts[0].transfer_syntaxes.len(), 2);
        assert_eq!(
            presentation_contexts[1].abstract_syntax,
            "1.2.840.10008.5.1.4.1.1.7"
        );
        assert_eq!(user_variables.len(), 5);
        assert!(matches!(
            &user_variables[0],
            UserVariableItem::ImplementationClassUID(u) if u == "1.2.3.4.5.6"
        ));
        assert!(matches!(
            &user_variables[1],
            UserVariableItem::ImplementationVersionName(v) if v == "version name"
        ));
        assert!(matches!(user_variables[2], UserVariableItem::MaxLength(l) if l == 23));
        assert!(matches!(
            user_variables[3],
            UserVariableItem::AsynchronousOperationsWindow(1, 1)
        ));
        assert!(matches!(&user_variables[4],
            UserVariableItem::RoleSelection(role_selection)
            if role_selection.sop_class_uid == "1.2.840.10008.5.1.4.1.2.1.3"
                && role_selection.scu_role
                && role_selection.scp_role
        ));
    } else {
        panic!("invalid pdu type");
    }

    Ok(())
}

#[test]
fn can_read_write_pdata() -> Result<(), Box<dyn std::error::Error>> {
    let pdata_rq = Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 3,
            value_type: PDataValueType::Command,
            is_last: true,
            data: vec![0, 0, 0, 0],
        }],
    };

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdata_rq)?;

    let result = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU)?;

    if let Pdu::PData { data } = result {
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].presentation_context_id, 3);
        assert!(matches!(data[0].value_type, PDataValueType::Command));
        assert!(data[0].is_last);
        assert_eq!(data[0].data, vec![0, 0, 0, 0])
    } else {
        panic!("invalid pdu type");
    }

    Ok(())
}

#[test]
fn unknown_user_sub_items_are_echoed_verbatim() -> Result<(), Box<dyn std::error::Error>> {
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
        user_variables: vec![UserVariableItem::Unknown(0x99, vec![0xDE, 0xAD, 0xBE, 0xEF])],
    };

    let mut bytes = Vec::new();
    write_pdu(&mut bytes, &pdu)?;
    let decoded = read_pdu(&mut Cursor::new(&bytes), DEFAULT_MAX_PDU)?;
    assert_eq!(decoded, pdu);

    // and the bytes are identical after a second pass
    let mut reencoded = Vec::new();
    write_pdu(&mut reencoded, &decoded)?;
    assert_eq!(bytes, reencoded);

    Ok(())
}
