//! Block wire format encoding and decoding.
//!
//! Layout, all integers Big Endian:
//! ```text
//! ┌──────────┬────────────┬────────────┬───────────┬─────────┬─────────┐
//! │ length   │ message_id │ header_len │ body_len  │ header  │ body    │
//! │ 4 bytes  │ 4 bytes    │ 4 bytes    │ 4 bytes   │ h bytes │ b bytes │
//! │ u32 BE   │ i32 BE     │ u32 BE     │ u32 BE    │         │         │
//! └──────────┴────────────┴────────────┴───────────┴─────────┴─────────┘
//! ```
//!
//! `length` counts every byte after itself: `12 + header_len + body_len`.
//! A complete block is therefore `4 + length` bytes, and all functions in
//! this module operate on complete blocks *including* the length prefix.

use crate::error::{MuxwireError, Result};

/// Size of the leading `length` field.
pub const LENGTH_SIZE: usize = 4;

/// Size of the fixed head after `length`: message_id + header_len + body_len.
pub const FIXED_HEAD_SIZE: usize = 12;

/// Smallest possible block: length prefix plus fixed head, empty sections.
pub const MIN_BLOCK_SIZE: usize = LENGTH_SIZE + FIXED_HEAD_SIZE;

/// Default maximum declared block length (1 GiB).
pub const DEFAULT_MAX_BLOCK_SIZE: u32 = 1_073_741_824;

/// Decoded fixed head of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHead {
    /// Routing identifier.
    pub message_id: i32,
    /// Length of the header section in bytes.
    pub header_len: u32,
    /// Length of the body section in bytes.
    pub body_len: u32,
}

impl BlockHead {
    /// Create a new block head.
    pub fn new(message_id: i32, header_len: u32, body_len: u32) -> Self {
        Self {
            message_id,
            header_len,
            body_len,
        }
    }

    /// The `length` field value this head declares.
    #[inline]
    pub fn declared_length(&self) -> u32 {
        FIXED_HEAD_SIZE as u32 + self.header_len + self.body_len
    }

    /// Total block size on the wire, prefix included.
    #[inline]
    pub fn block_size(&self) -> usize {
        LENGTH_SIZE + self.declared_length() as usize
    }

    /// Encode `length` plus the fixed head (Big Endian).
    pub fn encode_prefix(&self) -> [u8; MIN_BLOCK_SIZE] {
        let mut buf = [0u8; MIN_BLOCK_SIZE];
        buf[0..4].copy_from_slice(&self.declared_length().to_be_bytes());
        buf[4..8].copy_from_slice(&self.message_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.header_len.to_be_bytes());
        buf[12..16].copy_from_slice(&self.body_len.to_be_bytes());
        buf
    }
}

/// Validate a declared `length` against the minimum layout and a cap.
pub fn validate_length(length: u32, max: u32) -> Result<()> {
    if (length as usize) < FIXED_HEAD_SIZE {
        return Err(MuxwireError::Codec(format!(
            "declared length {} below fixed head size {}",
            length, FIXED_HEAD_SIZE
        )));
    }
    if length > max {
        return Err(MuxwireError::OversizedBlock { length, max });
    }
    Ok(())
}

/// Parse and validate a complete block, returning its fixed head.
///
/// Rejects blocks whose sub-lengths do not sum to the declared `length`,
/// and blocks shorter or longer than their own declaration.
pub fn check_block(block: &[u8]) -> Result<BlockHead> {
    if block.len() < MIN_BLOCK_SIZE {
        return Err(MuxwireError::Truncated);
    }

    let length = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
    let head = BlockHead {
        message_id: i32::from_be_bytes([block[4], block[5], block[6], block[7]]),
        header_len: u32::from_be_bytes([block[8], block[9], block[10], block[11]]),
        body_len: u32::from_be_bytes([block[12], block[13], block[14], block[15]]),
    };

    let expected = (FIXED_HEAD_SIZE as u64) + head.header_len as u64 + head.body_len as u64;
    if expected != length as u64 {
        return Err(MuxwireError::Codec(format!(
            "sub-lengths {} + {} + {} do not sum to declared length {}",
            FIXED_HEAD_SIZE, head.header_len, head.body_len, length
        )));
    }
    if block.len() != LENGTH_SIZE + length as usize {
        return Err(MuxwireError::Truncated);
    }

    Ok(head)
}

/// Parse the message id without touching header or body.
///
/// Fails with `Truncated` when the slice is shorter than the fixed prefix.
#[inline]
pub fn message_id_of(block: &[u8]) -> Result<i32> {
    if block.len() < MIN_BLOCK_SIZE {
        return Err(MuxwireError::Truncated);
    }
    Ok(i32::from_be_bytes([block[4], block[5], block[6], block[7]]))
}

/// Slice out the raw header section of a validated block.
pub fn header_bytes_of(block: &[u8]) -> Result<&[u8]> {
    let head = check_block(block)?;
    let start = MIN_BLOCK_SIZE;
    let end = start + head.header_len as usize;
    Ok(&block[start..end])
}

/// Slice out the raw body section of a validated block.
pub fn body_bytes_of(block: &[u8]) -> Result<&[u8]> {
    let head = check_block(block)?;
    let start = MIN_BLOCK_SIZE + head.header_len as usize;
    let end = start + head.body_len as usize;
    Ok(&block[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_block(message_id: i32, header: &[u8], body: &[u8]) -> Vec<u8> {
        let head = BlockHead::new(message_id, header.len() as u32, body.len() as u32);
        let mut block = head.encode_prefix().to_vec();
        block.extend_from_slice(header);
        block.extend_from_slice(body);
        block
    }

    #[test]
    fn test_head_encode_big_endian_byte_order() {
        let head = BlockHead::new(0x01020304, 2, 3);
        let bytes = head.encode_prefix();

        // length = 12 + 2 + 3 = 17 = 0x11 in BE
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x00, 0x11]);
        // message_id 0x01020304 in BE
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        // header_len 2
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x00, 0x02]);
        // body_len 3
        assert_eq!(&bytes[12..16], &[0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_negative_message_id_roundtrip() {
        let block = make_block(-7, b"", b"");
        assert_eq!(message_id_of(&block).unwrap(), -7);
        assert_eq!(check_block(&block).unwrap().message_id, -7);
    }

    #[test]
    fn test_check_block_roundtrip() {
        let block = make_block(5, b"hh", b"body!");
        let head = check_block(&block).unwrap();
        assert_eq!(head.message_id, 5);
        assert_eq!(head.header_len, 2);
        assert_eq!(head.body_len, 5);
        assert_eq!(header_bytes_of(&block).unwrap(), b"hh");
        assert_eq!(body_bytes_of(&block).unwrap(), b"body!");
    }

    #[test]
    fn test_check_block_rejects_sub_length_mismatch() {
        let mut block = make_block(1, b"hh", b"body!");
        // Inflate body_len without touching the declared length.
        block[12..16].copy_from_slice(&100u32.to_be_bytes());
        let err = check_block(&block).unwrap_err();
        assert!(matches!(err, crate::error::MuxwireError::Codec(_)));
    }

    #[test]
    fn test_check_block_rejects_short_slice() {
        let block = make_block(1, b"", b"abc");
        let err = check_block(&block[..block.len() - 1]).unwrap_err();
        assert!(matches!(err, crate::error::MuxwireError::Truncated));
    }

    #[test]
    fn test_message_id_of_requires_fixed_prefix() {
        let err = message_id_of(&[0u8; MIN_BLOCK_SIZE - 1]).unwrap_err();
        assert!(matches!(err, crate::error::MuxwireError::Truncated));
    }

    #[test]
    fn test_validate_length_bounds() {
        assert!(validate_length(12, DEFAULT_MAX_BLOCK_SIZE).is_ok());
        assert!(matches!(
            validate_length(11, DEFAULT_MAX_BLOCK_SIZE),
            Err(crate::error::MuxwireError::Codec(_))
        ));
        assert!(matches!(
            validate_length(101, 100),
            Err(crate::error::MuxwireError::OversizedBlock { length: 101, max: 100 })
        ));
    }

    #[test]
    fn test_min_block_is_exactly_16() {
        assert_eq!(MIN_BLOCK_SIZE, 16);
        let block = make_block(0, b"", b"");
        assert_eq!(block.len(), MIN_BLOCK_SIZE);
        let head = check_block(&block).unwrap();
        assert_eq!(head.declared_length(), FIXED_HEAD_SIZE as u32);
    }
}
