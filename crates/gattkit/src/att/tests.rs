//! Unit tests for the ATT PDU codec

use super::constants::*;
use super::error::{AttError, AttErrorCode};
use super::pdu::*;
use crate::uuid::Uuid;

#[test]
fn error_response_round_trip() {
    let rsp = ErrorResponse {
        request_opcode: ATT_READ_REQ,
        handle: 0x0040,
        error_code: AttErrorCode::AttributeNotFound,
    };
    let bytes = rsp.serialize();
    assert_eq!(bytes, vec![0x01, 0x0A, 0x40, 0x00, 0x0A]);

    let parsed = ErrorResponse::parse(&bytes).unwrap();
    assert_eq!(parsed.request_opcode, ATT_READ_REQ);
    assert_eq!(parsed.handle, 0x0040);
    assert_eq!(parsed.error_code, AttErrorCode::AttributeNotFound);

    // four payload bytes are the minimum
    assert_eq!(
        ErrorResponse::parse(&[0x01, 0x0A, 0x40, 0x00]),
        Err(AttError::InvalidPdu)
    );
}

#[test]
fn exchange_mtu_round_trip() {
    let req = ExchangeMtuRequest { client_mtu: 185 };
    let bytes = req.serialize();
    assert_eq!(bytes, vec![0x02, 185, 0]);
    assert_eq!(ExchangeMtuRequest::parse(&bytes).unwrap(), req);

    let rsp = ExchangeMtuResponse { server_mtu: 0x0200 };
    let bytes = rsp.serialize();
    assert_eq!(ExchangeMtuResponse::parse(&bytes).unwrap(), rsp);
    assert!(ExchangeMtuResponse::parse(&[0x03, 0x17]).is_err());
}

#[test]
fn find_information_request_round_trip() {
    let req = FindInformationRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
    };
    let bytes = req.serialize();
    assert_eq!(bytes, vec![0x04, 0x01, 0x00, 0xFF, 0xFF]);
    assert_eq!(FindInformationRequest::parse(&bytes).unwrap(), req);
}

#[test]
fn find_information_response_both_formats() {
    // 16-bit format
    let pdu = vec![0x05, 0x01, 0x10, 0x00, 0x02, 0x29, 0x11, 0x00, 0x02, 0x29];
    let rsp = FindInformationResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.format, ATT_FIND_INFO_RSP_FORMAT_16BIT);
    assert_eq!(rsp.pairs.len(), 2);
    assert_eq!(rsp.pairs[0], (0x0010, Uuid::from_u16(0x2902)));
    assert_eq!(rsp.pairs[1].0, 0x0011);

    // 128-bit format
    let uuid_bytes = [0x5A; 16];
    let mut pdu = vec![0x05, 0x02, 0x21, 0x00];
    pdu.extend_from_slice(&uuid_bytes);
    let rsp = FindInformationResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.pairs, vec![(0x0021, Uuid::Uuid128(uuid_bytes))]);

    // unknown format byte
    assert!(FindInformationResponse::parse(&[0x05, 0x03, 0x10, 0x00]).is_err());
    // at least the format byte must be present
    assert!(FindInformationResponse::parse(&[0x05]).is_err());
}

#[test]
fn find_information_response_ignores_partial_trailing_pair() {
    let pdu = vec![0x05, 0x01, 0x10, 0x00, 0x02, 0x29, 0x11, 0x00];
    let rsp = FindInformationResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.pairs.len(), 1);
}

#[test]
fn find_by_type_value_round_trip() {
    let req = FindByTypeValueRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        attribute_type: PRIMARY_SERVICE_UUID,
        attribute_value: vec![0x0A, 0x18],
    };
    let bytes = req.serialize();
    assert_eq!(bytes[0], 0x06);
    assert_eq!(FindByTypeValueRequest::parse(&bytes).unwrap(), req);

    let rsp = FindByTypeValueResponse {
        handles: vec![
            HandleRange {
                found_handle: 0x0001,
                group_end_handle: 0x000B,
            },
            HandleRange {
                found_handle: 0x0010,
                group_end_handle: 0x001F,
            },
        ],
    };
    let bytes = rsp.serialize();
    let parsed = FindByTypeValueResponse::parse(&bytes).unwrap();
    assert_eq!(parsed.handles, rsp.handles);
}

#[test]
fn read_by_type_request_uuid_widths() {
    let req = ReadByTypeRequest {
        start_handle: 0x0001,
        end_handle: 0x0010,
        attribute_type: Uuid::from_u16(CHARACTERISTIC_UUID),
    };
    let bytes = req.serialize();
    assert_eq!(bytes.len(), 7);
    assert_eq!(ReadByTypeRequest::parse(&bytes).unwrap(), req);

    let req128 = ReadByTypeRequest {
        start_handle: 0x0001,
        end_handle: 0x0010,
        attribute_type: Uuid::Uuid128([0xC3; 16]),
    };
    let bytes = req128.serialize();
    assert_eq!(bytes.len(), 21);
    assert_eq!(ReadByTypeRequest::parse(&bytes).unwrap(), req128);

    // anything that is neither 2 nor 16 bytes of UUID is rejected
    assert!(ReadByTypeRequest::parse(&bytes[..10]).is_err());
}

#[test]
fn read_by_type_response_records() {
    // two records of pair length 7: handle + 5 value bytes
    let pdu = vec![
        0x09, 0x07, 0x02, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x05, 0x00, 0x11, 0x22, 0x33,
        0x44, 0x55,
    ];
    let rsp = ReadByTypeResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.length, 7);
    assert_eq!(rsp.data.len(), 2);
    assert_eq!(rsp.data[0].handle, 0x0002);
    assert_eq!(rsp.data[0].value, vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
    assert_eq!(rsp.data[1].handle, 0x0005);

    // record length below the handle size is rejected
    assert!(ReadByTypeResponse::parse(&[0x09, 0x01, 0x02]).is_err());
    assert!(ReadByTypeResponse::parse(&[0x09]).is_err());
}

#[test]
fn read_requests_round_trip() {
    let read = ReadRequest { handle: 0x0040 };
    assert_eq!(read.serialize(), vec![0x0A, 0x40, 0x00]);
    assert_eq!(ReadRequest::parse(&read.serialize()).unwrap(), read);

    let blob = ReadBlobRequest {
        handle: 0x0040,
        offset: 22,
    };
    assert_eq!(blob.serialize(), vec![0x0C, 0x40, 0x00, 22, 0]);
    assert_eq!(ReadBlobRequest::parse(&blob.serialize()).unwrap(), blob);

    let multi = ReadMultipleRequest {
        handles: vec![0x0003, 0x0005, 0x0009],
    };
    assert_eq!(
        ReadMultipleRequest::parse(&multi.serialize()).unwrap(),
        multi
    );
    // a single handle is not a legal read multiple
    assert!(ReadMultipleRequest::parse(&[0x0E, 0x03, 0x00]).is_err());
}

#[test]
fn read_responses_carry_raw_value() {
    let rsp = ReadResponse {
        value: vec![1, 2, 3],
    };
    assert_eq!(ReadResponse::parse(&rsp.serialize()).unwrap(), rsp);
    // a zero-length value is legal
    assert_eq!(ReadResponse::parse(&[0x0B]).unwrap().value, Vec::<u8>::new());

    let blob = ReadBlobResponse { value: vec![9; 22] };
    assert_eq!(ReadBlobResponse::parse(&blob.serialize()).unwrap(), blob);

    let multi = ReadMultipleResponse {
        values: vec![7, 8, 9],
    };
    assert_eq!(
        ReadMultipleResponse::parse(&multi.serialize()).unwrap(),
        multi
    );
}

#[test]
fn read_by_group_type_round_trip() {
    let req = ReadByGroupTypeRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        group_type: Uuid::from_u16(PRIMARY_SERVICE_UUID),
    };
    assert_eq!(ReadByGroupTypeRequest::parse(&req.serialize()).unwrap(), req);

    let rsp = ReadByGroupTypeResponse {
        length: 6,
        data: vec![
            GroupData {
                handle: 0x0001,
                end_group_handle: 0x000B,
                value: vec![0x00, 0x18],
            },
            GroupData {
                handle: 0x000C,
                end_group_handle: 0x0021,
                value: vec![0x0A, 0x18],
            },
        ],
    };
    let parsed = ReadByGroupTypeResponse::parse(&rsp.serialize()).unwrap();
    assert_eq!(parsed.data, rsp.data);

    // record length below handle pair + anything is rejected
    assert!(ReadByGroupTypeResponse::parse(&[0x11, 0x05, 0, 0, 0, 0, 0]).is_err());
}

#[test]
fn write_packets_round_trip() {
    let req = WriteRequest {
        handle: 0x0055,
        value: vec![1, 2, 3, 4],
    };
    assert_eq!(WriteRequest::parse(&req.serialize()).unwrap(), req);
    assert!(WriteResponse::parse(&[0x13]).is_ok());

    let cmd = WriteCommand {
        handle: 0x0055,
        value: vec![0xFF],
    };
    let bytes = cmd.serialize();
    assert_eq!(bytes[0], ATT_WRITE_CMD);
    assert_eq!(WriteCommand::parse(&bytes).unwrap(), cmd);

    let signed = SignedWriteCommand {
        handle: 0x0055,
        value: vec![0xFF],
    };
    let bytes = signed.serialize();
    assert_eq!(bytes[0], ATT_SIGNED_WRITE_CMD);
    assert_eq!(SignedWriteCommand::parse(&bytes).unwrap(), signed);
}

#[test]
fn prepare_execute_write_round_trip() {
    let req = PrepareWriteRequest {
        handle: 0x0060,
        offset: 18,
        value: vec![0xAB; 18],
    };
    assert_eq!(PrepareWriteRequest::parse(&req.serialize()).unwrap(), req);

    let rsp = PrepareWriteResponse {
        handle: 0x0060,
        offset: 18,
        value: vec![0xAB; 18],
    };
    assert_eq!(PrepareWriteResponse::parse(&rsp.serialize()).unwrap(), rsp);
    // handle and offset are mandatory in the echo
    assert!(PrepareWriteResponse::parse(&[0x17, 0x60, 0x00, 0x12]).is_err());

    let exec = ExecuteWriteRequest {
        flags: ATT_EXEC_WRITE_COMMIT,
    };
    assert_eq!(exec.serialize(), vec![0x18, 0x01]);
    assert_eq!(ExecuteWriteRequest::parse(&exec.serialize()).unwrap(), exec);
    assert!(ExecuteWriteResponse::parse(&[0x19]).is_ok());
}

#[test]
fn notification_and_indication_parse() {
    let ntf = HandleValueNotification {
        handle: 0x0030,
        value: vec![9, 9, 9],
    };
    assert_eq!(
        HandleValueNotification::parse(&ntf.serialize()).unwrap(),
        ntf
    );

    let ind = HandleValueIndication {
        handle: 0x0030,
        value: vec![],
    };
    assert_eq!(HandleValueIndication::parse(&ind.serialize()).unwrap(), ind);

    // the handle is mandatory
    assert!(HandleValueNotification::parse(&[0x1B, 0x30]).is_err());
    assert!(HandleValueIndication::parse(&[0x1D]).is_err());

    assert_eq!(HandleValueConfirmation.serialize(), vec![0x1E]);
    assert!(HandleValueConfirmation::parse(&[0x1E]).is_ok());
}

#[test]
fn opcode_mismatch_is_rejected() {
    // a Read Response fed to the Write Response parser must not pass
    assert!(WriteResponse::parse(&[0x0B, 1, 2, 3]).is_err());
    assert!(ExchangeMtuResponse::parse(&[0x02, 23, 0]).is_err());
}
