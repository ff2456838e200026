//! Protocol module - block wire format and the framer.
//!
//! A *block* is the unit of transmission: a length-prefixed, self-describing
//! frame carrying one message id, a marshalled key/value header map, and an
//! opaque body. [`wire_format`] defines the byte layout; [`Framer`] packs
//! blocks and extracts them from streams and datagrams.

pub mod wire_format;

mod framer;

pub use framer::Framer;
pub use wire_format::{
    body_bytes_of, check_block, header_bytes_of, message_id_of, BlockHead,
    DEFAULT_MAX_BLOCK_SIZE, FIXED_HEAD_SIZE, LENGTH_SIZE, MIN_BLOCK_SIZE,
};
