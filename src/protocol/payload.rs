//! Element container carried in Data and Results payloads.
//!
//! ```text
//! [4 element count][count x (4 element length, element bytes)]
//! ```
//!
//! Fields inside an element are positional: the reader must know the schema
//! the writer used. Numeric fields are little-endian, `f32` travels as its
//! IEEE-754 bit pattern and raw bytes carry their own `u32` length prefix.

use super::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

const LEN_PREFIX: usize = 4;

/// Builder for an element container.
///
/// ```rust
/// use drainweave::protocol::{Payload, PayloadBuffer};
///
/// let mut buf = PayloadBuffer::new();
/// buf.begin_element();
/// buf.write_u32(730);
/// buf.write_bytes(b"Counter-Strike 2");
/// buf.end_element();
///
/// let payload = Payload::new(buf.bytes());
/// let mut element = payload.elements().unwrap().next().unwrap();
/// assert_eq!(element.read_u32(), 730);
/// assert_eq!(&element.read_bytes()[..], b"Counter-Strike 2");
/// ```
#[derive(Debug, Default, Clone)]
pub struct PayloadBuffer {
  elements: BytesMut,
  current: BytesMut,
  count: u32,
}

impl PayloadBuffer {
  /// Creates an empty container.
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Starts a new element, discarding any unfinished one.
  pub fn begin_element(&mut self) {
    self.current.clear();
  }

  /// Flushes the current element into the container.
  pub fn end_element(&mut self) {
    self.elements.put_u32_le(self.current.len() as u32);
    self.elements.put_slice(&self.current);
    self.current.clear();
    self.count += 1;
  }

  /// Writes a single byte field.
  pub fn write_byte(&mut self, b: u8) {
    self.current.put_u8(b);
  }

  /// Writes a length-prefixed raw bytes field.
  pub fn write_bytes(&mut self, bytes: &[u8]) {
    self.current.put_u32_le(bytes.len() as u32);
    self.current.put_slice(bytes);
  }

  /// Writes a little-endian `u32` field.
  pub fn write_u32(&mut self, v: u32) {
    self.current.put_u32_le(v);
  }

  /// Writes an `f32` field as its bit pattern.
  pub fn write_f32(&mut self, v: f32) {
    self.current.put_u32_le(v.to_bits());
  }

  /// Returns the number of finished elements.
  pub fn element_count(&self) -> u32 {
    self.count
  }

  /// Returns the finished container, element count included.
  pub fn bytes(&self) -> Bytes {
    let mut out = BytesMut::with_capacity(LEN_PREFIX + self.elements.len());
    out.put_u32_le(self.count);
    out.put_slice(&self.elements);
    out.freeze()
  }
}

/// An encoded element container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
  bytes: Bytes,
}

impl Payload {
  /// Wraps encoded container bytes.
  pub fn new(bytes: impl Into<Bytes>) -> Self {
    Self {
      bytes: bytes.into(),
    }
  }

  /// Returns the encoded bytes.
  pub fn as_bytes(&self) -> &Bytes {
    &self.bytes
  }

  /// Starts a fresh pass over the elements.
  ///
  /// # Errors
  ///
  /// Returns [`ProtocolError::MalformedPayload`] if the container framing is
  /// inconsistent.
  pub fn elements(&self) -> Result<PayloadElements, ProtocolError> {
    PayloadElements::parse(self.bytes.clone())
  }
}

/// Single-pass iterator over the elements of a container.
///
/// Element boundaries are validated once in [`PayloadElements::parse`];
/// elements are then split off lazily as the iterator advances.
#[derive(Debug, Clone)]
pub struct PayloadElements {
  rest: Bytes,
  remaining: u32,
  total: u32,
}

impl PayloadElements {
  /// Parses the element count and checks every element length prefix.
  ///
  /// # Errors
  ///
  /// Returns [`ProtocolError::MalformedPayload`] if the buffer is shorter
  /// than its prefixes claim or carries trailing bytes.
  pub fn parse(mut bytes: Bytes) -> Result<Self, ProtocolError> {
    if bytes.len() < LEN_PREFIX {
      return Err(ProtocolError::MalformedPayload(format!(
        "missing element count ({} bytes)",
        bytes.len()
      )));
    }
    let total = bytes.get_u32_le();

    let mut cursor = &bytes[..];
    for i in 0..total {
      if cursor.len() < LEN_PREFIX {
        return Err(ProtocolError::MalformedPayload(format!(
          "element {i} of {total}: missing length prefix"
        )));
      }
      let len = cursor.get_u32_le() as usize;
      if cursor.len() < len {
        return Err(ProtocolError::MalformedPayload(format!(
          "element {i} of {total}: declares {len} bytes, {} left",
          cursor.len()
        )));
      }
      cursor.advance(len);
    }
    if !cursor.is_empty() {
      return Err(ProtocolError::MalformedPayload(format!(
        "{} trailing bytes after {total} elements",
        cursor.len()
      )));
    }

    Ok(Self {
      rest: bytes,
      remaining: total,
      total,
    })
  }

  /// Returns the element count declared by the container.
  pub fn total(&self) -> u32 {
    self.total
  }

  /// Returns the next element, or `None` once all have been read.
  pub fn next_element(&mut self) -> Option<Element> {
    if self.remaining == 0 {
      return None;
    }
    self.remaining -= 1;
    let len = self.rest.get_u32_le() as usize;
    Some(Element(self.rest.split_to(len)))
  }
}

impl Iterator for PayloadElements {
  type Item = Element;

  fn next(&mut self) -> Option<Self::Item> {
    self.next_element()
  }

  fn size_hint(&self) -> (usize, Option<usize>) {
    (self.remaining as usize, Some(self.remaining as usize))
  }
}

impl ExactSizeIterator for PayloadElements {}

/// Reader over the fields of one element.
///
/// Every read consumes from the front. Reading past the end of the element
/// panics: the schema is the caller's contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element(Bytes);

impl Element {
  /// Reads a single byte.
  pub fn read_byte(&mut self) -> u8 {
    self.0.get_u8()
  }

  /// Reads a length-prefixed raw bytes field without copying.
  pub fn read_bytes(&mut self) -> Bytes {
    let len = self.0.get_u32_le() as usize;
    self.0.split_to(len)
  }

  /// Reads a little-endian `u32`.
  pub fn read_u32(&mut self) -> u32 {
    self.0.get_u32_le()
  }

  /// Reads an `f32` from its bit pattern.
  pub fn read_f32(&mut self) -> f32 {
    f32::from_bits(self.0.get_u32_le())
  }

  /// Returns the number of unread bytes.
  pub fn remaining(&self) -> usize {
    self.0.len()
  }
}
