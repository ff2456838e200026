//! Framer: packs blocks and extracts them from streams and datagrams.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{
    check_block, header_bytes_of, validate_length, BlockHead, DEFAULT_MAX_BLOCK_SIZE,
    FIXED_HEAD_SIZE, LENGTH_SIZE,
};
use crate::codec::Marshaller;
use crate::error::{MuxwireError, Result};

/// Packs and extracts blocks with a fixed marshaller and size cap.
///
/// The framer is shared by every connection of a server; it owns no
/// per-connection state.
pub struct Framer<M: Marshaller> {
    marshaller: Arc<M>,
    max_block_size: u32,
}

impl<M: Marshaller> Clone for Framer<M> {
    fn clone(&self) -> Self {
        Self {
            marshaller: self.marshaller.clone(),
            max_block_size: self.max_block_size,
        }
    }
}

impl<M: Marshaller> Framer<M> {
    /// Create a framer with the default block size cap.
    pub fn new(marshaller: Arc<M>) -> Self {
        Self {
            marshaller,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }

    /// Override the maximum declared block length.
    pub fn with_max_block_size(mut self, max: u32) -> Self {
        self.max_block_size = max;
        self
    }

    /// The active marshaller.
    pub fn marshaller(&self) -> &Arc<M> {
        &self.marshaller
    }

    /// The maximum declared block length accepted or produced.
    pub fn max_block_size(&self) -> u32 {
        self.max_block_size
    }

    /// Encode a body and optional header map into a complete block.
    pub fn pack<T: Serialize>(
        &self,
        message_id: i32,
        body: &T,
        header: Option<&HashMap<String, String>>,
    ) -> Result<Bytes> {
        let body_bytes = self.marshaller.marshal(body)?;
        self.pack_raw(message_id, &body_bytes, header)
    }

    /// Encode pre-serialized body bytes into a complete block.
    pub fn pack_raw(
        &self,
        message_id: i32,
        body: &[u8],
        header: Option<&HashMap<String, String>>,
    ) -> Result<Bytes> {
        let header_bytes = match header {
            Some(map) if !map.is_empty() => self.marshaller.marshal(map)?,
            _ => Vec::new(),
        };

        let total = FIXED_HEAD_SIZE as u64 + header_bytes.len() as u64 + body.len() as u64;
        if total > self.max_block_size as u64 {
            return Err(MuxwireError::OversizedBlock {
                length: total.min(u32::MAX as u64) as u32,
                max: self.max_block_size,
            });
        }

        let head = BlockHead::new(message_id, header_bytes.len() as u32, body.len() as u32);
        let mut block = Vec::with_capacity(head.block_size());
        block.extend_from_slice(&head.encode_prefix());
        block.extend_from_slice(&header_bytes);
        block.extend_from_slice(body);
        Ok(Bytes::from(block))
    }

    /// Read exactly one block off a stream.
    ///
    /// Returns `EndOfStream` when the reader closes cleanly before any byte
    /// of the next block, `Truncated` when it closes mid-block, and
    /// `OversizedBlock` when the declared length exceeds the cap.
    pub async fn read_block<R: AsyncRead + Unpin>(&self, reader: &mut R) -> Result<Bytes> {
        let mut len_buf = [0u8; LENGTH_SIZE];

        // The first read distinguishes a clean close from a torn prefix.
        let mut filled = 0;
        while filled < LENGTH_SIZE {
            let n = reader.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                return Err(if filled == 0 {
                    MuxwireError::EndOfStream
                } else {
                    MuxwireError::Truncated
                });
            }
            filled += n;
        }

        let length = u32::from_be_bytes(len_buf);
        validate_length(length, self.max_block_size)?;

        let mut block = vec![0u8; LENGTH_SIZE + length as usize];
        block[..LENGTH_SIZE].copy_from_slice(&len_buf);
        reader
            .read_exact(&mut block[LENGTH_SIZE..])
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    MuxwireError::Truncated
                } else {
                    MuxwireError::Io(e)
                }
            })?;

        check_block(&block)?;
        Ok(Bytes::from(block))
    }

    /// Extract the single block at the front of a datagram buffer.
    ///
    /// Trailing bytes after the block are discarded: one datagram carries at
    /// most one block.
    pub fn block_from_bytes(&self, buf: &[u8]) -> Result<Bytes> {
        if buf.len() < LENGTH_SIZE {
            return Err(MuxwireError::Truncated);
        }
        let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        validate_length(length, self.max_block_size)?;

        let total = LENGTH_SIZE + length as usize;
        if buf.len() < total {
            return Err(MuxwireError::Truncated);
        }

        let block = &buf[..total];
        check_block(block)?;
        Ok(Bytes::copy_from_slice(block))
    }

    /// Decode the header map of a block via the marshaller.
    ///
    /// An empty header section decodes to an empty map.
    pub fn header_of(&self, block: &[u8]) -> Result<HashMap<String, String>> {
        let raw = header_bytes_of(block)?;
        if raw.is_empty() {
            return Ok(HashMap::new());
        }
        self.marshaller.unmarshal(raw)
    }
}
