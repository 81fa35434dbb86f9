//! Wire record definitions
// (c) 2025 Ross Younger

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::protocol::frame::{FrameWidth, WireRecord};

/// A 16-byte identifier, as used for both request IDs and transaction IDs.
///
/// Request IDs are freshly generated for every header and exist for
/// correlation and logging. The transaction ID identifies the transaction
/// itself, is agreed during the handshake, and is distinct from the request
/// IDs of the handshake frames that carry it.
pub type TransactionId = [u8; 16];

/// Generates a fresh random identifier.
pub(crate) fn new_id() -> TransactionId {
    *uuid::Uuid::new_v4().as_bytes()
}

/// Discriminates which payload records follow a [`Header`].
///
/// Serialized as a single byte. Unknown values fail decoding.
#[derive(
    Serialize_repr, Deserialize_repr, Clone, Copy, Debug, Eq, PartialEq, strum::Display,
)]
#[repr(u8)]
pub enum RequestType {
    /// A [`Transaction`] handshake record follows.
    Transaction = 0,
    /// A [`Message`] follows.
    BMessage = 1,
    /// File metadata and content follow.
    File = 2,
    /// A [`Message`], then file metadata and content follow.
    FileBMessage = 3,
}

/// The metadata record prefixing every payload on the wire.
///
/// A non-empty `error` field aborts the pending receive on the other side;
/// no payload follows such a header.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    /// What follows this header
    pub request_type: RequestType,
    /// Fresh identifier for this request, for correlation and logging
    pub request_id: [u8; 16],
    /// In-band error message; empty means absent
    pub error: String,
}

impl WireRecord for Header {
    const WIDTH: FrameWidth = FrameWidth::U16;
}

impl Header {
    /// A header with a fresh request ID and no error.
    pub(crate) fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            request_id: new_id(),
            error: String::new(),
        }
    }

    /// A header carrying an in-band error message.
    pub(crate) fn for_error(message: &str) -> Self {
        Self {
            request_type: RequestType::BMessage,
            request_id: new_id(),
            error: message.to_string(),
        }
    }

    /// A header reusing an existing identifier, as the handshake echo does.
    pub(crate) fn echo(request_type: RequestType, request_id: [u8; 16]) -> Self {
        Self {
            request_type,
            request_id,
            error: String::new(),
        }
    }
}

/// An opaque byte payload.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// The bytes. No inherent size limit below the 32-bit frame limit.
    pub data: Vec<u8>,
}

impl WireRecord for Message {
    const WIDTH: FrameWidth = FrameWidth::U32;
}

/// The transaction handshake record. Only ever appears at stream open.
///
/// Both sides of the handshake must see the same `(name, id)` pair; any
/// difference aborts the transaction before a handler runs.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    /// Name the transaction is routed by
    pub name: String,
    /// Identifies this particular transaction
    pub id: TransactionId,
}

impl WireRecord for Transaction {
    const WIDTH: FrameWidth = FrameWidth::U16;
}
