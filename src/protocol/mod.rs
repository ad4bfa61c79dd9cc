//! # Wire Protocol
//!
//! Binary framing shared by every node of the pipeline. A frame is a fixed
//! 17-byte header followed by an opaque payload:
//!
//! ```text
//! [1 type][4 node/message id][4 client id][4 request id][4 payload size][payload...]
//! ```
//!
//! All multi-byte fields are little-endian. The type byte packs the message
//! kind into bits 0-1, the games/reviews flag into bit 2 (Data and End only)
//! and a one-hot query selector into bits 3-7 (Results, or End once tagged
//! with [`Frame::set_query_result`]).
//!
//! ## Core Types
//!
//! - **[`Frame`]**: the raw wire form, with the exact type byte preserved
//! - **[`Message`]**: the tagged view application code matches on
//! - **[`PayloadBuffer`]** / **[`Payload`]**: the element container carried in
//!   Data and Results payloads
//!
//! Bit manipulation is confined to this module; callers construct frames
//! through [`Frame::end`], [`Frame::data`] and [`Frame::results`] or by
//! converting a [`Message`].

mod message;
mod payload;

#[cfg(test)]
mod message_test;

pub use message::{
  DataType, Frame, HEADER_LEN, Message, MessageHeader, MessageKind, QueryNumber,
};
pub use payload::{Element, Payload, PayloadBuffer, PayloadElements};

use thiserror::Error;

/// Request id stamped on END frames a coordinator propagates for games and
/// first-phase reviews.
///
/// The joiner coordinator reads a reviews END carrying this id as a report
/// for its second ("final reviews") phase.
pub const FIRST_PHASE_REQUEST_ID: u32 = u32::MAX;

/// Request id stamped on the END a joiner coordinator propagates once its
/// final-reviews phase drains.
pub const FINAL_PHASE_REQUEST_ID: u32 = u32::MAX - 1;

/// Returns true if `request_id` is one of the reserved phase sentinels and
/// must not be handed out as an ordinary correlation id.
#[inline]
pub const fn is_reserved_request_id(request_id: u32) -> bool {
  request_id == FIRST_PHASE_REQUEST_ID || request_id == FINAL_PHASE_REQUEST_ID
}

/// Error type for decoding frames and payload containers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
  /// The input buffer was empty.
  #[error("invalid message: empty")]
  Empty,
  /// The kind bits of the type byte do not name a known kind.
  #[error("invalid message: unknown message type {0:#04x}")]
  UnknownKind(u8),
  /// Fewer bytes than a full header.
  #[error("invalid message: truncated header ({0} bytes)")]
  TruncatedHeader(usize),
  /// The declared payload size disagrees with the bytes present.
  #[error("payload size mismatch: header declares {declared} bytes, frame carries {actual}")]
  PayloadSizeMismatch {
    /// Size declared in the header.
    declared: u32,
    /// Bytes actually following the header.
    actual: usize,
  },
  /// A Results frame with no query bit set.
  #[error("results message without a query selector (type byte {0:#04x})")]
  MissingQuery(u8),
  /// The element container is shorter than its own length prefixes claim.
  #[error("malformed payload: {0}")]
  MalformedPayload(String),
  /// A reserved sentinel was offered as an ordinary request id.
  #[error("request id {0:#x} is reserved for phase signalling")]
  ReservedRequestId(u32),
}
