//! S7 protocol constants

/// ISO-on-TCP port
pub const ISO_TCP_PORT: u16 = 102;

// TPKT
pub const TPKT_VERSION: u8 = 0x03;
pub const TPKT_HEADER_LEN: usize = 4;
pub const TPKT_MAX_LEN: usize = 4096;

// COTP
pub const COTP_CONNECT_REQUEST: u8 = 0xE0;
pub const COTP_CONNECT_CONFIRM: u8 = 0xD0;
pub const COTP_DATA: u8 = 0xF0;
/// Data TPDU header: length indicator, DT code, EOT + TPDU number 0
pub const COTP_DATA_HEADER: [u8; 3] = [0x02, COTP_DATA, 0x80];

// S7 header
pub const S7_PROTOCOL_ID: u8 = 0x32;
pub const ROSCTR_JOB: u8 = 0x01;
pub const ROSCTR_ACK: u8 = 0x02;
pub const ROSCTR_ACK_DATA: u8 = 0x03;
pub const JOB_HEADER_LEN: usize = 10;
pub const ACK_HEADER_LEN: usize = 12;

// Functions
pub const FN_SETUP_COMMUNICATION: u8 = 0xF0;
pub const FN_READ_VAR: u8 = 0x04;
pub const FN_WRITE_VAR: u8 = 0x05;

// Item addressing
pub const VAR_SPEC: u8 = 0x12;
pub const ADDR_LEN: u8 = 0x0A;
pub const SYNTAX_ANY: u8 = 0x10;
pub const AREA_DB: u8 = 0x84;
pub const TRANSPORT_BIT: u8 = 0x01;
pub const TRANSPORT_BYTE: u8 = 0x02;

// Data item transport sizes
pub const DATA_BIT: u8 = 0x03;
pub const DATA_BYTE_WORD_DWORD: u8 = 0x04;
pub const DATA_INTEGER: u8 = 0x05;
pub const DATA_OCTET_STRING: u8 = 0x09;

pub const RETURN_SUCCESS: u8 = 0xFF;

/// PDU size requested during setup communication
pub const REQUESTED_PDU_SIZE: u16 = 480;
/// Smallest PDU size any S7 CPU negotiates
pub const MIN_PDU_SIZE: u16 = 240;

/// Ack-data header (12) + read params (2) + item header (4)
pub const READ_RESPONSE_OVERHEAD: usize = 18;
/// Job header (10) + write params (14) + item header (4)
pub const WRITE_REQUEST_OVERHEAD: usize = 28;

/// Highest byte address expressible in the 3-byte bit address field
pub const MAX_BYTE_ADDRESS: usize = 0x1F_FFFF;
