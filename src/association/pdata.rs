//! Outbound fragmentation of DIMSE streams.
//!
//! A command or data stream is split into presentation data values of at
//! most `max_pdu_length - 6` payload bytes, so that every emitted
//! P-DATA-TF PDU body stays within the peer's maximum PDU size.

use crate::pdu::{PDataValue, PDataValueType, Pdu, PDV_HEADER_SIZE};

/// The largest PDV payload that fits in a PDU of the given length.
#[inline]
pub(crate) fn max_pdv_payload(max_pdu_length: u32) -> usize {
    (max_pdu_length - PDV_HEADER_SIZE) as usize
}

/// Split one command or data stream into P-DATA-TF PDUs.
///
/// Each PDU carries a single PDV; the last fragment bit is set on
/// exactly the final one. An empty stream still yields one PDU with an
/// empty, last PDV so that the peer sees the stream boundary.
pub(crate) fn split_into_pdus(
    presentation_context_id: u8,
    value_type: PDataValueType,
    payload: &[u8],
    max_pdu_length: u32,
) -> Vec<Pdu> {
    let chunk_size = max_pdv_payload(max_pdu_length);
    let mut pdus = Vec::with_capacity(payload.len() / chunk_size + 1);

    if payload.is_empty() {
        pdus.push(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: true,
                data: vec![],
            }],
        });
        return pdus;
    }

    let mut chunks = payload.chunks(chunk_size).peekable();
    while let Some(chunk) = chunks.next() {
        pdus.push(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id,
                value_type,
                is_last: chunks.peek().is_none(),
                data: chunk.to_vec(),
            }],
        });
    }
    pdus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{read_pdu, write_pdu, MINIMUM_PDU_SIZE, PDU_HEADER_SIZE};
    use std::io::Cursor;

    fn collect_payload(pdus: &[Pdu]) -> Vec<u8> {
        let mut out = Vec::new();
        for pdu in pdus {
            match pdu {
                Pdu::PData { data } => {
                    for pdv in data {
                        out.extend_from_slice(&pdv.data);
                    }
                }
                other => panic!("unexpected PDU {:?}", other),
            }
        }
        out
    }

    #[test]
    fn small_payload_is_one_last_pdv() {
        let payload: Vec<u8> = (0..64).collect();
        let pdus = split_into_pdus(12, PDataValueType::Data, &payload, MINIMUM_PDU_SIZE);

        assert_eq!(pdus.len(), 1);
        match &pdus[0] {
            Pdu::PData { data } => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].presentation_context_id, 12);
                assert_eq!(data[0].value_type, PDataValueType::Data);
                assert!(data[0].is_last);
                assert_eq!(data[0].data, payload);
            }
            other => panic!("unexpected PDU {:?}", other),
        }
    }

    #[test]
    fn large_payload_reconstructs_exactly() {
        let payload: Vec<u8> = (0..9000u32).map(|x| x as u8).collect();
        let pdus = split_into_pdus(32, PDataValueType::Data, &payload, MINIMUM_PDU_SIZE);

        assert_eq!(pdus.len(), 3);
        assert_eq!(collect_payload(&pdus), payload);

        // the last fragment bit appears exactly once, on the final PDV
        let last_flags: Vec<bool> = pdus
            .iter()
            .map(|pdu| match pdu {
                Pdu::PData { data } => data[0].is_last,
                other => panic!("unexpected PDU {:?}", other),
            })
            .collect();
        assert_eq!(last_flags, vec![false, false, true]);

        // every emitted PDU body stays within the maximum
        for pdu in &pdus {
            let mut bytes = vec![];
            write_pdu(&mut bytes, pdu).unwrap();
            assert!(bytes.len() <= (MINIMUM_PDU_SIZE + PDU_HEADER_SIZE) as usize);
            // and survives the codec
            let decoded = read_pdu(&mut Cursor::new(&bytes), MINIMUM_PDU_SIZE).unwrap();
            assert_eq!(&decoded, pdu);
        }

        // fragment sizes: two full chunks, then the remainder
        match (&pdus[0], &pdus[2]) {
            (Pdu::PData { data: first }, Pdu::PData { data: last }) => {
                assert_eq!(first[0].data.len(), max_pdv_payload(MINIMUM_PDU_SIZE));
                assert_eq!(
                    last[0].data.len(),
                    9000 - 2 * max_pdv_payload(MINIMUM_PDU_SIZE)
                );
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn empty_payload_still_marks_the_stream_end() {
        let pdus = split_into_pdus(1, PDataValueType::Command, &[], MINIMUM_PDU_SIZE);
        assert_eq!(pdus.len(), 1);
        match &pdus[0] {
            Pdu::PData { data } => {
                assert!(data[0].is_last);
                assert!(data[0].data.is_empty());
            }
            other => panic!("unexpected PDU {:?}", other),
        }
    }
}
