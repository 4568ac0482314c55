//! S7 frame builders and parsers
//!
//! Pure functions over byte buffers. Builders return complete TPKT frames
//! ready for the socket; parsers take the payload after the TPKT header.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::error::{DriveSrvError, Result};

/// Parsed S7 ack-data PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckData {
    pub pdu_ref: u16,
    pub params: Bytes,
    pub data: Bytes,
}

/// Where a Read Var / Write Var item points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemAddress {
    pub db: u16,
    pub byte: usize,
    pub bit: u8,
    pub transport_size: u8,
    /// Element count in units of `transport_size`
    pub count: u16,
}

impl ItemAddress {
    pub fn bytes(db: u16, start: usize, len: u16) -> Self {
        Self {
            db,
            byte: start,
            bit: 0,
            transport_size: TRANSPORT_BYTE,
            count: len,
        }
    }

    pub fn bit(db: u16, byte: usize, bit: u8) -> Self {
        Self {
            db,
            byte,
            bit,
            transport_size: TRANSPORT_BIT,
            count: 1,
        }
    }

    fn put(&self, buf: &mut BytesMut) -> Result<()> {
        if self.byte > MAX_BYTE_ADDRESS || self.bit > 7 {
            return Err(DriveSrvError::protocol(format!(
                "address DB{}.DBX{}.{} not encodable",
                self.db, self.byte, self.bit
            )));
        }
        let address = (self.byte << 3) | usize::from(self.bit);

        buf.put_u8(VAR_SPEC);
        buf.put_u8(ADDR_LEN);
        buf.put_u8(SYNTAX_ANY);
        buf.put_u8(self.transport_size);
        buf.put_u16(self.count);
        buf.put_u16(self.db);
        buf.put_u8(AREA_DB);
        buf.put_u8((address >> 16) as u8);
        buf.put_u16((address & 0xFFFF) as u16);
        Ok(())
    }
}

/// Prefix `payload` with a TPKT header
pub fn tpkt(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(TPKT_HEADER_LEN + payload.len());
    buf.put_u8(TPKT_VERSION);
    buf.put_u8(0x00);
    buf.put_u16((TPKT_HEADER_LEN + payload.len()) as u16);
    buf.put_slice(payload);
    buf.freeze()
}

/// Validate a TPKT header and return the payload length that follows it
pub fn parse_tpkt_header(header: &[u8; TPKT_HEADER_LEN]) -> Result<usize> {
    if header[0] != TPKT_VERSION {
        return Err(DriveSrvError::protocol(format!(
            "bad TPKT version 0x{:02X}",
            header[0]
        )));
    }
    let total = usize::from(u16::from_be_bytes([header[2], header[3]]));
    if total <= TPKT_HEADER_LEN || total > TPKT_MAX_LEN {
        return Err(DriveSrvError::protocol(format!("bad TPKT length {total}")));
    }
    Ok(total - TPKT_HEADER_LEN)
}

/// COTP connection request addressing `rack`/`slot`
pub fn connection_request(rack: u8, slot: u8) -> Bytes {
    let remote_tsap = rack.wrapping_mul(0x20).wrapping_add(slot);
    let cotp = [
        0x11, // length indicator
        COTP_CONNECT_REQUEST,
        0x00, 0x00, // destination reference
        0x00, 0x01, // source reference
        0x00, // class 0
        0xC0, 0x01, 0x0A, // TPDU size 1024
        0xC1, 0x02, 0x01, 0x00, // source TSAP
        0xC2, 0x02, 0x03, remote_tsap, // destination TSAP
    ];
    tpkt(&cotp)
}

pub fn parse_connection_confirm(payload: &[u8]) -> Result<()> {
    match payload.get(1) {
        Some(&COTP_CONNECT_CONFIRM) => Ok(()),
        Some(other) => Err(DriveSrvError::protocol(format!(
            "expected COTP connect confirm, got 0x{other:02X}"
        ))),
        None => Err(DriveSrvError::protocol("empty COTP reply")),
    }
}

/// Strip the COTP data header and return the S7 PDU
pub fn cotp_data(payload: &[u8]) -> Result<&[u8]> {
    let header_len = usize::from(*payload.first().unwrap_or(&0)) + 1;
    if payload.len() < header_len || payload.get(1) != Some(&COTP_DATA) {
        return Err(DriveSrvError::protocol("expected COTP data TPDU"));
    }
    Ok(&payload[header_len..])
}

fn job(pdu_ref: u16, params: &[u8], data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(
        COTP_DATA_HEADER.len() + JOB_HEADER_LEN + params.len() + data.len(),
    );
    buf.put_slice(&COTP_DATA_HEADER);
    buf.put_u8(S7_PROTOCOL_ID);
    buf.put_u8(ROSCTR_JOB);
    buf.put_u16(0x0000); // redundancy id
    buf.put_u16(pdu_ref);
    buf.put_u16(params.len() as u16);
    buf.put_u16(data.len() as u16);
    buf.put_slice(params);
    buf.put_slice(data);
    tpkt(&buf)
}

pub fn setup_communication(pdu_ref: u16, pdu_size: u16) -> Bytes {
    let mut params = BytesMut::with_capacity(8);
    params.put_u8(FN_SETUP_COMMUNICATION);
    params.put_u8(0x00);
    params.put_u16(1); // max AmQ calling
    params.put_u16(1); // max AmQ called
    params.put_u16(pdu_size);
    job(pdu_ref, &params, &[])
}

pub fn read_var(pdu_ref: u16, item: ItemAddress) -> Result<Bytes> {
    let mut params = BytesMut::with_capacity(14);
    params.put_u8(FN_READ_VAR);
    params.put_u8(1);
    item.put(&mut params)?;
    Ok(job(pdu_ref, &params, &[]))
}

pub fn write_var(pdu_ref: u16, item: ItemAddress, payload: &[u8]) -> Result<Bytes> {
    let mut params = BytesMut::with_capacity(14);
    params.put_u8(FN_WRITE_VAR);
    params.put_u8(1);
    item.put(&mut params)?;

    let (data_size, length) = if item.transport_size == TRANSPORT_BIT {
        (DATA_BIT, payload.len() as u16)
    } else {
        (DATA_BYTE_WORD_DWORD, (payload.len() as u16) << 3)
    };
    let mut data = BytesMut::with_capacity(4 + payload.len());
    data.put_u8(0x00);
    data.put_u8(data_size);
    data.put_u16(length);
    data.put_slice(payload);

    Ok(job(pdu_ref, &params, &data))
}

/// Parse an ack-data PDU, surfacing header error class/code as `Protocol`
pub fn parse_ack_data(pdu: &[u8]) -> Result<AckData> {
    if pdu.len() < ACK_HEADER_LEN {
        return Err(DriveSrvError::protocol(format!(
            "S7 PDU too short: {} bytes",
            pdu.len()
        )));
    }
    if pdu[0] != S7_PROTOCOL_ID {
        return Err(DriveSrvError::protocol(format!(
            "bad S7 protocol id 0x{:02X}",
            pdu[0]
        )));
    }
    if pdu[1] != ROSCTR_ACK_DATA && pdu[1] != ROSCTR_ACK {
        return Err(DriveSrvError::protocol(format!(
            "unexpected ROSCTR 0x{:02X}",
            pdu[1]
        )));
    }

    let pdu_ref = u16::from_be_bytes([pdu[4], pdu[5]]);
    let param_len = usize::from(u16::from_be_bytes([pdu[6], pdu[7]]));
    let data_len = usize::from(u16::from_be_bytes([pdu[8], pdu[9]]));
    let (class, code) = (pdu[10], pdu[11]);
    if class != 0 || code != 0 {
        return Err(DriveSrvError::protocol(format!(
            "controller rejected job: class 0x{class:02X} code 0x{code:02X}"
        )));
    }

    let body = &pdu[ACK_HEADER_LEN..];
    if body.len() < param_len + data_len {
        return Err(DriveSrvError::protocol(format!(
            "S7 PDU truncated: need {} bytes, have {}",
            param_len + data_len,
            body.len()
        )));
    }
    Ok(AckData {
        pdu_ref,
        params: Bytes::copy_from_slice(&body[..param_len]),
        data: Bytes::copy_from_slice(&body[param_len..param_len + data_len]),
    })
}

/// Negotiated PDU size from a setup communication reply
pub fn parse_setup_response(ack: &AckData) -> Result<u16> {
    if ack.params.len() < 8 || ack.params[0] != FN_SETUP_COMMUNICATION {
        return Err(DriveSrvError::protocol("malformed setup communication reply"));
    }
    Ok(u16::from_be_bytes([ack.params[6], ack.params[7]]))
}

fn expect_function(ack: &AckData, function: u8) -> Result<()> {
    if ack.params.len() < 2 || ack.params[0] != function || ack.params[1] != 1 {
        return Err(DriveSrvError::protocol(format!(
            "expected single-item reply for function 0x{function:02X}"
        )));
    }
    Ok(())
}

fn check_return_code(code: u8) -> Result<()> {
    if code == RETURN_SUCCESS {
        return Ok(());
    }
    let reason = match code {
        0x01 => "hardware fault",
        0x03 => "access denied",
        0x05 => "address out of range",
        0x06 => "data type not supported",
        0x07 => "data type inconsistent",
        0x0A => "object does not exist",
        _ => "item rejected",
    };
    Err(DriveSrvError::protocol(format!(
        "{reason} (return code 0x{code:02X})"
    )))
}

/// Data of a single-item Read Var reply; must be exactly `expected` bytes
pub fn parse_read_response(ack: &AckData, expected: usize) -> Result<Bytes> {
    expect_function(ack, FN_READ_VAR)?;
    let data = &ack.data;
    if data.is_empty() {
        return Err(DriveSrvError::protocol("read reply without data item"));
    }
    check_return_code(data[0])?;
    if data.len() < 4 {
        return Err(DriveSrvError::protocol("read reply item header truncated"));
    }

    let raw_len = usize::from(u16::from_be_bytes([data[2], data[3]]));
    let len = match data[1] {
        DATA_BYTE_WORD_DWORD | DATA_INTEGER => raw_len >> 3,
        _ => raw_len,
    };
    if len != expected || data.len() < 4 + len {
        return Err(DriveSrvError::protocol(format!(
            "partial read: expected {expected} bytes, got {}",
            len.min(data.len().saturating_sub(4))
        )));
    }
    Ok(ack.data.slice(4..4 + len))
}

pub fn parse_write_response(ack: &AckData) -> Result<()> {
    expect_function(ack, FN_WRITE_VAR)?;
    match ack.data.first() {
        Some(code) => check_return_code(*code),
        None => Err(DriveSrvError::protocol("write reply without return code")),
    }
}
