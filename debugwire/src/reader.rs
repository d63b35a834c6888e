// Helper functions for reading frame fields from buffers

use crate::protocol::{WireError, WireResult, HEADER_SIZE, MAX_FRAME_SIZE};
use bytes::Buf;
use serde::de::DeserializeOwned;

/// Read a u32
pub fn read_u32(buf: &mut &[u8]) -> WireResult<u32> {
    if buf.remaining() < 4 {
        return Err(WireError::Protocol("Not enough data for u32".to_string()));
    }
    Ok(buf.get_u32())
}

/// Read a u8
pub fn read_u8(buf: &mut &[u8]) -> WireResult<u8> {
    if buf.remaining() < 1 {
        return Err(WireError::Protocol("Not enough data for u8".to_string()));
    }
    Ok(buf.get_u8())
}

/// Read and validate a frame header, returning (length, id, flags)
pub fn read_header(buf: &mut &[u8]) -> WireResult<(usize, u32, u8)> {
    if buf.remaining() < HEADER_SIZE {
        return Err(WireError::Protocol(format!(
            "Frame too short: {} bytes",
            buf.remaining()
        )));
    }

    let length = read_u32(buf)? as usize;
    let id = read_u32(buf)?;
    let flags = read_u8(buf)?;

    check_length(length)?;

    Ok((length, id, flags))
}

/// Reject lengths that cannot describe a valid frame
pub fn check_length(length: usize) -> WireResult<()> {
    if length < HEADER_SIZE {
        return Err(WireError::Protocol(format!(
            "Invalid frame length: {}",
            length
        )));
    }

    if length > MAX_FRAME_SIZE {
        return Err(WireError::Protocol(format!(
            "Frame too large: {} bytes (max: {} bytes)",
            length, MAX_FRAME_SIZE
        )));
    }

    Ok(())
}

/// Consume the rest of the buffer as a JSON document
pub fn read_json<T: DeserializeOwned>(buf: &mut &[u8]) -> WireResult<T> {
    let value = serde_json::from_slice(buf.chunk())?;
    buf.advance(buf.remaining());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_header() {
        let data = [0u8, 0, 0, 12, 0, 0, 0, 5, 0x80, b'{', b'}', b' '];
        let mut buf = &data[..];
        let (length, id, flags) = read_header(&mut buf).unwrap();
        assert_eq!(length, 12);
        assert_eq!(id, 5);
        assert_eq!(flags, 0x80);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_header_length_bounds() {
        let short = [0u8, 0, 0, 3, 0, 0, 0, 1, 0];
        assert!(read_header(&mut &short[..]).is_err());

        let huge = [0xffu8, 0xff, 0xff, 0xff, 0, 0, 0, 1, 0];
        assert!(read_header(&mut &huge[..]).is_err());
    }

    #[test]
    fn test_read_u32_underflow() {
        let data = [0u8, 1];
        assert!(read_u32(&mut &data[..]).is_err());
    }
}
