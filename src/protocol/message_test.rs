use crate::protocol::{
  DataType, FINAL_PHASE_REQUEST_ID, FIRST_PHASE_REQUEST_ID, Frame, HEADER_LEN, Message,
  MessageHeader, MessageKind, ProtocolError, QueryNumber,
};
use bytes::Bytes;
use proptest::prelude::*;

fn header() -> MessageHeader {
  MessageHeader::new(3, 42, 7)
}

#[test]
fn test_end_frame_layout() {
  let frame = Frame::end(DataType::Games, MessageHeader::new(1, 2, 3));
  let bytes = frame.marshal();

  assert_eq!(bytes.len(), HEADER_LEN);
  assert_eq!(bytes[0], 0b0000_0100);
  assert_eq!(&bytes[1..5], &1u32.to_le_bytes());
  assert_eq!(&bytes[5..9], &2u32.to_le_bytes());
  assert_eq!(&bytes[9..13], &3u32.to_le_bytes());
  assert_eq!(&bytes[13..17], &0u32.to_le_bytes());
}

#[test]
fn test_results_frame_layout() {
  let frame = Frame::results(QueryNumber::Query4, Bytes::from_static(b"abc"), header());
  let bytes = frame.marshal();

  assert_eq!(bytes[0], 0b0100_0010);
  assert_eq!(&bytes[13..17], &3u32.to_le_bytes());
  assert_eq!(&bytes[17..], b"abc");
}

#[test]
fn test_round_trip_every_kind() {
  let frames = vec![
    Frame::end(DataType::Games, header()),
    Frame::end(DataType::Reviews, header()),
    Frame::data(DataType::Games, Bytes::from_static(b"game rows"), header()),
    Frame::data(DataType::Reviews, Bytes::from_static(b"review rows"), header()),
    Frame::results(QueryNumber::Query1, Bytes::from_static(b"q1"), header()),
    Frame::results(QueryNumber::Query5, Bytes::new(), header()),
  ];

  for frame in frames {
    let decoded = Frame::unmarshal(frame.marshal()).unwrap();
    assert_eq!(decoded, frame);
  }
}

#[test]
fn test_unmarshal_empty() {
  assert_eq!(Frame::unmarshal(Bytes::new()), Err(ProtocolError::Empty));
}

#[test]
fn test_unmarshal_unknown_kind() {
  let mut raw = Frame::end(DataType::Games, header()).marshal().to_vec();
  raw[0] = 0b0000_0111;
  assert_eq!(
    Frame::from_slice(&raw),
    Err(ProtocolError::UnknownKind(0b0000_0111))
  );
}

#[test]
fn test_unmarshal_truncated_header() {
  let raw = Frame::end(DataType::Reviews, header()).marshal();
  assert_eq!(
    Frame::unmarshal(raw.slice(..10)),
    Err(ProtocolError::TruncatedHeader(10))
  );
}

#[test]
fn test_unmarshal_payload_size_mismatch() {
  let mut raw = Frame::data(DataType::Games, Bytes::from_static(b"abcd"), header())
    .marshal()
    .to_vec();
  raw.pop();
  assert_eq!(
    Frame::from_slice(&raw),
    Err(ProtocolError::PayloadSizeMismatch {
      declared: 4,
      actual: 3
    })
  );
}

#[test]
#[should_panic(expected = "declared payload size")]
fn test_marshal_panics_on_size_mismatch() {
  let frame = Frame {
    type_byte: MessageKind::Data.bits(),
    header: header(),
    payload_size: 9,
    payload: Bytes::from_static(b"short"),
  };
  let _ = frame.marshal();
}

#[test]
fn test_expect_kind_ignores_tag_bits() {
  let mut frame = Frame::end(DataType::Games, header());
  frame.set_query_result(QueryNumber::Query3);

  assert!(frame.expect_kind(MessageKind::End));
  assert!(!frame.expect_kind(MessageKind::Data));
  assert!(!frame.expect_kind(MessageKind::Results));
  assert_eq!(frame.kind(), MessageKind::End);
}

#[test]
fn test_data_type_flags_are_exclusive() {
  let games = Frame::data(DataType::Games, Bytes::new(), header());
  let reviews = Frame::end(DataType::Reviews, header());

  assert!(games.has_game_data());
  assert!(!games.has_review_data());
  assert!(reviews.has_review_data());
  assert!(!reviews.has_game_data());
}

#[test]
fn test_data_type_survives_query_tag() {
  let mut frame = Frame::end(DataType::Games, header());
  frame.set_query_result(QueryNumber::Query2);
  assert!(frame.has_game_data());
  assert_eq!(frame.query_tag(), Some(QueryNumber::Query2));
}

#[test]
#[should_panic(expected = "data type requested")]
fn test_has_game_data_on_results_panics() {
  let frame = Frame::results(QueryNumber::Query1, Bytes::new(), header());
  let _ = frame.has_game_data();
}

#[test]
fn test_query_number_for_every_selector() {
  for query in QueryNumber::ALL {
    let frame = Frame::results(query, Bytes::new(), header());
    let decoded = Frame::unmarshal(frame.marshal()).unwrap();
    assert_eq!(decoded.query_number(), query);
    assert_eq!(QueryNumber::from_number(query.number()), Some(query));
  }
}

#[test]
#[should_panic(expected = "malformed header type")]
fn test_query_number_without_selector_panics() {
  let frame = Frame::from_slice(&[0b10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
  let _ = frame.query_number();
}

#[test]
#[should_panic(expected = "only end messages")]
fn test_set_query_result_on_data_panics() {
  let mut frame = Frame::data(DataType::Reviews, Bytes::new(), header());
  frame.set_query_result(QueryNumber::Query1);
}

#[test]
fn test_results_without_selector_is_rejected_by_tagged_view() {
  let frame = Frame::from_slice(&[0b10, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]).unwrap();
  assert_eq!(frame.into_message(), Err(ProtocolError::MissingQuery(0b10)));
}

#[test]
fn test_tagged_end_converts_both_ways() {
  let message = Message::End {
    data_type: DataType::Reviews,
    query: Some(QueryNumber::Query5),
    header: header(),
  };
  let frame = message.clone().into_frame();
  assert_eq!(frame.type_byte(), 0b1000_0000);

  let decoded = Frame::unmarshal(frame.marshal()).unwrap();
  assert_eq!(Message::try_from(decoded).unwrap(), message);
}

#[test]
fn test_ordinary_header_rejects_sentinels() {
  assert!(MessageHeader::ordinary(1, 1, 10).is_ok());
  assert_eq!(
    MessageHeader::ordinary(1, 1, FIRST_PHASE_REQUEST_ID),
    Err(ProtocolError::ReservedRequestId(FIRST_PHASE_REQUEST_ID))
  );
  assert_eq!(
    MessageHeader::ordinary(1, 1, FINAL_PHASE_REQUEST_ID),
    Err(ProtocolError::ReservedRequestId(FINAL_PHASE_REQUEST_ID))
  );
}

fn arb_header() -> impl Strategy<Value = MessageHeader> {
  (any::<u32>(), any::<u32>(), any::<u32>()).prop_map(|(n, c, r)| MessageHeader::new(n, c, r))
}

fn arb_data_type() -> impl Strategy<Value = DataType> {
  prop_oneof![Just(DataType::Games), Just(DataType::Reviews)]
}

fn arb_query() -> impl Strategy<Value = QueryNumber> {
  prop::sample::select(QueryNumber::ALL.to_vec())
}

fn arb_message() -> impl Strategy<Value = Message> {
  let payload = prop::collection::vec(any::<u8>(), 0..64).prop_map(Bytes::from);
  prop_oneof![
    (arb_data_type(), prop::option::of(arb_query()), arb_header()).prop_map(
      |(data_type, query, header)| Message::End {
        data_type,
        query,
        header
      }
    ),
    (arb_data_type(), arb_header(), payload.clone()).prop_map(|(data_type, header, payload)| {
      Message::Data {
        data_type,
        header,
        payload,
      }
    }),
    (arb_query(), arb_header(), payload).prop_map(|(query, header, payload)| Message::Results {
      query,
      header,
      payload
    }),
  ]
}

proptest! {
  #[test]
  fn test_message_round_trip(message in arb_message()) {
    let bytes = message.clone().into_frame().marshal();
    let decoded = Frame::unmarshal(bytes).unwrap().into_message().unwrap();
    prop_assert_eq!(decoded, message);
  }
}
