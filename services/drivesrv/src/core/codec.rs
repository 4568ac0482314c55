//! Binary codec for the drive table
//!
//! Pure functions, no I/O. Layout per drive (10 bytes, big-endian words):
//!
//! ```text
//! byte 0    flags  bit0 mode_auto .. bit7 has_current
//! byte 1    reserved
//! bytes 2-3 speed
//! bytes 4-5 current
//! bytes 6-7 setpoint
//! bytes 8-9 error code
//! ```

use bytes::{Buf, BufMut, BytesMut};

use super::model::{DriveFlag, DriveFlags, DriveRecord, RECORD_LEN};
use crate::error::{DriveSrvError, Result};

/// Offset of the setpoint word inside a drive slot
pub const SETPOINT_OFFSET: usize = 6;

/// Byte offset of drive `id` (1-based) within the data block
pub fn drive_offset(id: u16) -> usize {
    usize::from(id.saturating_sub(1)) * RECORD_LEN
}

/// Length of a table holding `count` drives
pub fn table_len(count: u16) -> usize {
    usize::from(count) * RECORD_LEN
}

impl DriveRecord {
    /// Decode the 10-byte slot at `offset`
    pub fn decode(buffer: &[u8], offset: usize) -> Result<Self> {
        let available = buffer.len().saturating_sub(offset);
        if available < RECORD_LEN {
            return Err(DriveSrvError::MalformedBuffer {
                offset,
                needed: RECORD_LEN,
                available,
            });
        }

        let mut slot = &buffer[offset..offset + RECORD_LEN];
        let flags = DriveFlags::from_byte(slot.get_u8());
        let reserved = slot.get_u8();
        Ok(Self {
            flags,
            reserved,
            speed: slot.get_i16(),
            current: slot.get_i16(),
            setpoint: slot.get_i16(),
            error_code: slot.get_i16(),
        })
    }

    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = BytesMut::with_capacity(RECORD_LEN);
        buf.put_u8(self.flags.to_byte());
        buf.put_u8(self.reserved);
        buf.put_i16(self.speed);
        buf.put_i16(self.current);
        buf.put_i16(self.setpoint);
        buf.put_i16(self.error_code);

        let mut out = [0u8; RECORD_LEN];
        out.copy_from_slice(&buf);
        out
    }
}

/// Decode `count` consecutive drives starting at offset 0
pub fn decode_table(buffer: &[u8], count: u16) -> Result<Vec<DriveRecord>> {
    (1..=count)
        .map(|id| DriveRecord::decode(buffer, drive_offset(id)))
        .collect()
}

/// Encode a setpoint as a big-endian i16 after checking `min..=max`
pub fn encode_setpoint(value: i32, min: i32, max: i32) -> Result<[u8; 2]> {
    if value < min || value > max {
        return Err(DriveSrvError::OutOfRange { value, min, max });
    }
    let word = i16::try_from(value).map_err(|_| DriveSrvError::OutOfRange {
        value,
        min: i32::from(i16::MIN),
        max: i32::from(i16::MAX),
    })?;
    Ok(word.to_be_bytes())
}

/// Single-bit write target for a flag of drive `id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitAddress {
    pub byte: usize,
    pub bit: u8,
}

impl BitAddress {
    pub fn for_flag(id: u16, flag: DriveFlag) -> Self {
        Self {
            byte: drive_offset(id),
            bit: flag.bit(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_buffer() {
        let buf = [0x83, 0x00, 0x00, 0x64, 0x00, 0x96, 0x05, 0xDC, 0x00, 0x00];
        let record = DriveRecord::decode(&buf, 0).unwrap();

        assert!(record.flags.mode_auto);
        assert!(record.flags.running);
        assert!(record.flags.has_current);
        assert!(!record.flags.forward);
        assert!(!record.flags.reverse);
        assert!(!record.flags.error);
        assert!(!record.flags.has_setpoint);
        assert!(!record.flags.has_speed);
        assert_eq!(record.speed, 100);
        assert_eq!(record.current, 150);
        assert_eq!(record.setpoint, 1500);
        assert_eq!(record.error_code, 0);
    }

    #[test]
    fn test_decode_reencode_preserves_bytes() {
        let buf = [0x5A, 0x7F, 0xFF, 0x9C, 0x80, 0x00, 0x7F, 0xFF, 0x00, 0x2A];
        let record = DriveRecord::decode(&buf, 0).unwrap();
        assert_eq!(record.speed, -100);
        assert_eq!(record.current, i16::MIN);
        assert_eq!(record.encode(), buf);
    }

    #[test]
    fn test_decode_short_buffer() {
        let buf = [0u8; 25];
        assert!(DriveRecord::decode(&buf, 10).is_ok());

        let err = DriveRecord::decode(&buf, 20).unwrap_err();
        assert_eq!(
            err,
            DriveSrvError::MalformedBuffer {
                offset: 20,
                needed: 10,
                available: 5
            }
        );

        // Offset past the end
        assert!(matches!(
            DriveRecord::decode(&buf, 40),
            Err(DriveSrvError::MalformedBuffer { available: 0, .. })
        ));
    }

    #[test]
    fn test_decode_table_uses_drive_offsets() {
        let mut buf = vec![0u8; table_len(3)];
        buf[drive_offset(2) + 3] = 0x07; // drive 2 speed = 7
        buf[drive_offset(3)] = 0x10; // drive 3 error flag

        let records = decode_table(&buf, 3).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].speed, 7);
        assert!(records[2].flags.error);

        assert!(decode_table(&buf[..25], 3).is_err());
    }

    #[test]
    fn test_encode_setpoint() {
        assert_eq!(encode_setpoint(1500, 0, 3000).unwrap(), [0x05, 0xDC]);
        assert_eq!(encode_setpoint(-2, -10, 10).unwrap(), [0xFF, 0xFE]);
        assert_eq!(
            encode_setpoint(3500, 0, 3000).unwrap_err(),
            DriveSrvError::OutOfRange {
                value: 3500,
                min: 0,
                max: 3000
            }
        );
        assert!(encode_setpoint(40000, 0, 50000).is_err());
    }

    #[test]
    fn test_offsets() {
        assert_eq!(drive_offset(1), 0);
        assert_eq!(drive_offset(7), 60);
        assert_eq!(table_len(100), 1000);
        assert_eq!(
            BitAddress::for_flag(5, DriveFlag::Running),
            BitAddress { byte: 40, bit: 1 }
        );
    }
}
