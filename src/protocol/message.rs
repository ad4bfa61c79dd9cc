//! Frame codec and the tagged [`Message`] view.

use super::{PayloadElements, ProtocolError, is_reserved_request_id};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt::{self, Display};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 17;

const KIND_MASK: u8 = 0b0000_0011;
const GAMES_FLAG: u8 = 0b0000_0100;

/// Kind of a frame, stored in bits 0-1 of the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
  /// One upstream node finished emitting data for a client.
  End = 0b00,
  /// A batch of games or reviews.
  Data = 0b01,
  /// Results of one of the five queries.
  Results = 0b10,
}

impl MessageKind {
  const fn from_type_byte(type_byte: u8) -> Option<Self> {
    match type_byte & KIND_MASK {
      0b00 => Some(MessageKind::End),
      0b01 => Some(MessageKind::Data),
      0b10 => Some(MessageKind::Results),
      _ => None,
    }
  }

  /// Returns the two kind bits.
  #[inline]
  pub const fn bits(self) -> u8 {
    self as u8
  }
}

impl Display for MessageKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MessageKind::End => write!(f, "end message"),
      MessageKind::Data => write!(f, "data message"),
      MessageKind::Results => write!(f, "results message"),
    }
  }
}

/// Data stream a Data or End frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
  /// Games dataset.
  Games,
  /// Reviews dataset.
  Reviews,
}

impl DataType {
  const fn flag(self) -> u8 {
    match self {
      DataType::Games => GAMES_FLAG,
      DataType::Reviews => 0,
    }
  }
}

impl Display for DataType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DataType::Games => write!(f, "games"),
      DataType::Reviews => write!(f, "reviews"),
    }
  }
}

/// One-hot query selector stored in bits 3-7 of the type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum QueryNumber {
  /// Query 1, bit 3.
  Query1 = 1 << 3,
  /// Query 2, bit 4.
  Query2 = 1 << 4,
  /// Query 3, bit 5.
  Query3 = 1 << 5,
  /// Query 4, bit 6.
  Query4 = 1 << 6,
  /// Query 5, bit 7.
  Query5 = 1 << 7,
}

impl QueryNumber {
  /// All selectors in ascending order.
  pub const ALL: [QueryNumber; 5] = [
    QueryNumber::Query1,
    QueryNumber::Query2,
    QueryNumber::Query3,
    QueryNumber::Query4,
    QueryNumber::Query5,
  ];

  /// Returns the selector bit.
  #[inline]
  pub const fn bit(self) -> u8 {
    self as u8
  }

  /// Returns the human query number, 1 through 5.
  pub const fn number(self) -> u8 {
    match self {
      QueryNumber::Query1 => 1,
      QueryNumber::Query2 => 2,
      QueryNumber::Query3 => 3,
      QueryNumber::Query4 => 4,
      QueryNumber::Query5 => 5,
    }
  }

  /// Maps a human query number back to its selector.
  pub const fn from_number(n: u8) -> Option<Self> {
    match n {
      1 => Some(QueryNumber::Query1),
      2 => Some(QueryNumber::Query2),
      3 => Some(QueryNumber::Query3),
      4 => Some(QueryNumber::Query4),
      5 => Some(QueryNumber::Query5),
      _ => None,
    }
  }

  // Lowest selector wins if a corrupted byte carries several.
  fn decode(type_byte: u8) -> Option<Self> {
    Self::ALL.into_iter().find(|q| type_byte & q.bit() != 0)
  }
}

/// Correlation identifiers carried by every frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MessageHeader {
  /// Id of the emitting node (End) or of the message (Data, Results).
  pub node_id: u32,
  /// Client the frame belongs to.
  pub client_id: u32,
  /// Request correlation id.
  pub request_id: u32,
}

impl MessageHeader {
  /// Creates a header from raw ids.
  #[inline]
  pub const fn new(node_id: u32, client_id: u32, request_id: u32) -> Self {
    Self {
      node_id,
      client_id,
      request_id,
    }
  }

  /// Creates a header for ordinary traffic, rejecting the phase sentinels.
  ///
  /// # Errors
  ///
  /// Returns [`ProtocolError::ReservedRequestId`] if `request_id` is reserved.
  pub fn ordinary(node_id: u32, client_id: u32, request_id: u32) -> Result<Self, ProtocolError> {
    if is_reserved_request_id(request_id) {
      return Err(ProtocolError::ReservedRequestId(request_id));
    }
    Ok(Self::new(node_id, client_id, request_id))
  }
}

/// A frame in wire form.
///
/// Keeps the exact type byte so that tagging an End frame with a query
/// selector survives a decode/encode cycle unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  pub(super) type_byte: u8,
  pub(super) header: MessageHeader,
  pub(super) payload_size: u32,
  pub(super) payload: Bytes,
}

impl Frame {
  /// Creates an End frame for the given data stream.
  #[must_use]
  pub fn end(data_type: DataType, header: MessageHeader) -> Self {
    Self {
      type_byte: MessageKind::End.bits() | data_type.flag(),
      header,
      payload_size: 0,
      payload: Bytes::new(),
    }
  }

  /// Creates a Data frame carrying `payload`.
  #[must_use]
  pub fn data(data_type: DataType, payload: impl Into<Bytes>, header: MessageHeader) -> Self {
    let payload = payload.into();
    Self {
      type_byte: MessageKind::Data.bits() | data_type.flag(),
      header,
      payload_size: payload.len() as u32,
      payload,
    }
  }

  /// Creates a Results frame for query `query`.
  #[must_use]
  pub fn results(query: QueryNumber, payload: impl Into<Bytes>, header: MessageHeader) -> Self {
    let payload = payload.into();
    Self {
      type_byte: MessageKind::Results.bits() | query.bit(),
      header,
      payload_size: payload.len() as u32,
      payload,
    }
  }

  /// Returns the raw type byte.
  #[inline]
  pub fn type_byte(&self) -> u8 {
    self.type_byte
  }

  /// Returns the kind encoded in the low two bits.
  pub fn kind(&self) -> MessageKind {
    // Constructors and `unmarshal` never admit the unused `0b11` pattern.
    MessageKind::from_type_byte(self.type_byte).unwrap_or(MessageKind::End)
  }

  /// Compares only the kind bits against `kind`.
  #[inline]
  pub fn expect_kind(&self, kind: MessageKind) -> bool {
    self.type_byte & KIND_MASK == kind.bits()
  }

  /// Returns the correlation header.
  #[inline]
  pub fn header(&self) -> MessageHeader {
    self.header
  }

  /// Returns the node (End) or message (Data, Results) id.
  #[inline]
  pub fn node_id(&self) -> u32 {
    self.header.node_id
  }

  /// Returns the client id.
  #[inline]
  pub fn client_id(&self) -> u32 {
    self.header.client_id
  }

  /// Returns the request id.
  #[inline]
  pub fn request_id(&self) -> u32 {
    self.header.request_id
  }

  /// Returns the payload bytes.
  #[inline]
  pub fn payload(&self) -> &Bytes {
    &self.payload
  }

  /// Returns true if a Data or End frame belongs to the games stream.
  ///
  /// # Panics
  ///
  /// Panics if the frame is a Results frame.
  pub fn has_game_data(&self) -> bool {
    self.assert_has_data_type();
    self.type_byte & GAMES_FLAG != 0
  }

  /// Returns true if a Data or End frame belongs to the reviews stream.
  ///
  /// # Panics
  ///
  /// Panics if the frame is a Results frame.
  pub fn has_review_data(&self) -> bool {
    self.assert_has_data_type();
    self.type_byte & GAMES_FLAG == 0
  }

  /// Returns the data stream of a Data or End frame.
  ///
  /// # Panics
  ///
  /// Panics if the frame is a Results frame.
  pub fn data_type(&self) -> DataType {
    if self.has_game_data() {
      DataType::Games
    } else {
      DataType::Reviews
    }
  }

  fn assert_has_data_type(&self) {
    assert!(
      self.expect_kind(MessageKind::Data) || self.expect_kind(MessageKind::End),
      "data type requested on a {} (type byte {:#04x})",
      self.kind(),
      self.type_byte
    );
  }

  /// Returns the query selector of a Results frame.
  ///
  /// # Panics
  ///
  /// Panics if the frame is not a Results frame or carries no query bit.
  pub fn query_number(&self) -> QueryNumber {
    assert!(
      self.expect_kind(MessageKind::Results),
      "query number requested on a {}",
      self.kind()
    );
    match QueryNumber::decode(self.type_byte) {
      Some(q) => q,
      None => panic!("malformed header type {:#04x}", self.type_byte),
    }
  }

  /// Returns the query selector bits of any frame, if one is set.
  pub fn query_tag(&self) -> Option<QueryNumber> {
    QueryNumber::decode(self.type_byte)
  }

  /// Tags an End frame as the end of the query `query` stream.
  ///
  /// # Panics
  ///
  /// Panics if the frame is not an End frame.
  pub fn set_query_result(&mut self, query: QueryNumber) {
    assert!(
      self.expect_kind(MessageKind::End),
      "only end messages can be tagged with a query, got a {}",
      self.kind()
    );
    self.type_byte |= query.bit();
  }

  /// Encodes the frame into its wire form.
  ///
  /// # Panics
  ///
  /// Panics if the declared payload size disagrees with the payload.
  pub fn marshal(&self) -> Bytes {
    assert_eq!(
      self.payload_size as usize,
      self.payload.len(),
      "the declared payload size must equal the payload length"
    );
    let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
    buf.put_u8(self.type_byte);
    buf.put_u32_le(self.header.node_id);
    buf.put_u32_le(self.header.client_id);
    buf.put_u32_le(self.header.request_id);
    buf.put_u32_le(self.payload_size);
    buf.put_slice(&self.payload);
    buf.freeze()
  }

  /// Decodes a frame. The payload shares the input buffer.
  ///
  /// # Errors
  ///
  /// Returns a [`ProtocolError`] if the input is empty, names an unknown
  /// kind, is shorter than a header, or its payload disagrees with the
  /// declared size.
  pub fn unmarshal(mut buf: Bytes) -> Result<Self, ProtocolError> {
    let Some(&type_byte) = buf.first() else {
      return Err(ProtocolError::Empty);
    };
    if MessageKind::from_type_byte(type_byte).is_none() {
      return Err(ProtocolError::UnknownKind(type_byte));
    }
    if buf.len() < HEADER_LEN {
      return Err(ProtocolError::TruncatedHeader(buf.len()));
    }

    buf.advance(1);
    let header = MessageHeader {
      node_id: buf.get_u32_le(),
      client_id: buf.get_u32_le(),
      request_id: buf.get_u32_le(),
    };
    let payload_size = buf.get_u32_le();
    if buf.len() != payload_size as usize {
      return Err(ProtocolError::PayloadSizeMismatch {
        declared: payload_size,
        actual: buf.len(),
      });
    }

    Ok(Self {
      type_byte,
      header,
      payload_size,
      payload: buf,
    })
  }

  /// Decodes a frame from a borrowed slice, copying it.
  ///
  /// # Errors
  ///
  /// See [`Frame::unmarshal`].
  pub fn from_slice(bytes: &[u8]) -> Result<Self, ProtocolError> {
    Self::unmarshal(Bytes::copy_from_slice(bytes))
  }

  /// Parses the payload as an element container.
  ///
  /// # Errors
  ///
  /// Returns [`ProtocolError::MalformedPayload`] if the container framing is
  /// inconsistent.
  pub fn elements(&self) -> Result<PayloadElements, ProtocolError> {
    PayloadElements::parse(self.payload.clone())
  }

  /// Converts the frame into its tagged view.
  ///
  /// # Errors
  ///
  /// Returns [`ProtocolError::MissingQuery`] for a Results frame without a
  /// query selector.
  pub fn into_message(self) -> Result<Message, ProtocolError> {
    let header = self.header;
    match self.kind() {
      MessageKind::End => Ok(Message::End {
        data_type: self.data_type(),
        query: self.query_tag(),
        header,
      }),
      MessageKind::Data => Ok(Message::Data {
        data_type: self.data_type(),
        header,
        payload: self.payload,
      }),
      MessageKind::Results => {
        let query = self
          .query_tag()
          .ok_or(ProtocolError::MissingQuery(self.type_byte))?;
        Ok(Message::Results {
          query,
          header,
          payload: self.payload,
        })
      }
    }
  }
}

/// Tagged view of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
  /// End of a data stream for one client, optionally tagged with a query.
  End {
    /// Stream that ended.
    data_type: DataType,
    /// Query tag applied with [`Frame::set_query_result`].
    query: Option<QueryNumber>,
    /// Correlation ids.
    header: MessageHeader,
  },
  /// A batch of records.
  Data {
    /// Stream the batch belongs to.
    data_type: DataType,
    /// Correlation ids.
    header: MessageHeader,
    /// Element container.
    payload: Bytes,
  },
  /// Query results.
  Results {
    /// Query the results answer.
    query: QueryNumber,
    /// Correlation ids.
    header: MessageHeader,
    /// Element container.
    payload: Bytes,
  },
}

impl Message {
  /// Returns the kind of the message.
  pub fn kind(&self) -> MessageKind {
    match self {
      Message::End { .. } => MessageKind::End,
      Message::Data { .. } => MessageKind::Data,
      Message::Results { .. } => MessageKind::Results,
    }
  }

  /// Returns the correlation header.
  pub fn header(&self) -> MessageHeader {
    match self {
      Message::End { header, .. }
      | Message::Data { header, .. }
      | Message::Results { header, .. } => *header,
    }
  }

  /// Converts the message into wire form.
  #[must_use]
  pub fn into_frame(self) -> Frame {
    match self {
      Message::End {
        data_type,
        query,
        header,
      } => {
        let mut frame = Frame::end(data_type, header);
        if let Some(q) = query {
          frame.set_query_result(q);
        }
        frame
      }
      Message::Data {
        data_type,
        header,
        payload,
      } => Frame::data(data_type, payload, header),
      Message::Results {
        query,
        header,
        payload,
      } => Frame::results(query, payload, header),
    }
  }
}

impl From<Message> for Frame {
  fn from(message: Message) -> Self {
    message.into_frame()
  }
}

impl TryFrom<Frame> for Message {
  type Error = ProtocolError;

  fn try_from(frame: Frame) -> Result<Self, Self::Error> {
    frame.into_message()
  }
}
