//! Wire codec for metadata-driven FIX processing.
//!
//! Three layers, all driven by a [`fixlink_metadata::Protocol`]:
//!
//! - [`field`] encodes and decodes a single field value by its declared
//!   semantic type,
//! - [`message`] frames and unframes whole messages as ordered
//!   name → value maps, recomputing BodyLength and CheckSum,
//! - [`read_buffer`] turns an arbitrary chunking of socket bytes into
//!   complete framed messages.

pub mod field;
pub mod message;
pub mod read_buffer;
mod value;

use fixlink_metadata::TagNum;
use thiserror::Error;

pub use message::{DecodeOptions, EncodeOptions, calc_checksum, decode_message, encode_message};
pub use read_buffer::{FrameBuffer, FrameError, FrameEvent};
pub use value::{FieldMap, FieldValue};

/// The standard FIX field separator (ASCII SOH).
pub const SOH: u8 = 0x01;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("received unknown tag {0}")]
    UnknownTag(TagNum),
    #[error("unknown message type `{0}`")]
    UnknownMsgType(String),
    #[error("malformed tag=value pair")]
    MalformedPair,
    #[error("required member `{0}` missing")]
    RequiredMemberMissing(String),
    #[error("bad value `{value}` for {field}")]
    BadValue { field: String, value: String },
    #[error("{field} mismatch: expected `{expected}`, received `{received}`")]
    FieldValueMismatch {
        field: String,
        expected: String,
        received: String,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("required member `{0}` missing")]
    RequiredMemberMissing(String),
    #[error("unexpected value type for {field}, expected {expected}")]
    UnexpectedValueType {
        field: String,
        expected: &'static str,
    },
}
