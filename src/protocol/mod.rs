//! On-wire protocol definitions and framing
// (c) 2025 Ross Younger
//!
//! # Overview
//!
//! Everything a peer sends travels over a QUIC bidirectional stream as a
//! sequence of length-prefixed records. A [`Header`](wire::Header) always
//! comes first; its `request_type` says which payload records follow it:
//!
//! | Request type | Sequence on the wire |
//! | --- | --- |
//! | `Transaction` | Header + [`Transaction`](wire::Transaction) |
//! | `BMessage` | Header + [`Message`](wire::Message) |
//! | `File` | Header + [`FileInfo`](crate::FileInfo) + content bytes |
//! | `FileBMessage` | Header + Message + FileInfo + content bytes |
//!
//! # Framing
//!
//! Records are encoded with [BARE] and carried as `length || bytes[length]`,
//! with the length in big-endian. Header, FileInfo and Transaction use a
//! 16-bit length; the Message payload uses a 32-bit length. File content is
//! deliberately *not* framed: the preceding FileInfo's `size` field is its
//! frame, and the receiver reads exactly that many bytes.
//!
//! An in-band error is a Header whose `error` field is non-empty. It aborts
//! whatever receive operation is pending, and no payload follows it.
//!
//! [BARE]: https://www.ietf.org/archive/id/draft-devault-bare-11.html

pub mod frame;
pub mod wire;

pub use frame::{FrameWidth, WireRecord};
pub use wire::{Header, Message, RequestType, Transaction, TransactionId};
