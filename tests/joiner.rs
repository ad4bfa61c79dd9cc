//! Two-phase review flow through a joiner coordinator.

use drainweave::barrier::{FINAL_PHASE_REQUEST_ID, FIRST_PHASE_REQUEST_ID, Resource};
use drainweave::config::CoordinatorConfig;
use drainweave::coordinator::{CoordinatorController, Variant};
use drainweave::protocol::{DataType, Frame, MessageHeader};
use drainweave::transport::{ChannelPeer, ChannelTransport};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

async fn deliver(peer: &ChannelPeer, data_type: DataType, node: u32, client: u32, request_id: u32) {
  let end = Frame::end(data_type, MessageHeader::new(node, client, request_id)).marshal();
  peer.deliver(end).await.unwrap().await.unwrap();
}

#[tokio::test]
async fn test_first_and_final_review_phases() {
  let dir = tempdir().unwrap();
  let config = CoordinatorConfig::new(2, dir.path().join("joiner.log"))
    .with_variant(Variant::Joiner)
    .with_review_tags(["joiner_reviews"]);
  let (transport, mut peer) = ChannelTransport::pair(8);
  let mut controller = CoordinatorController::recover(config, transport).unwrap();
  let cancel = CancellationToken::new();
  let run = tokio::spawn({
    let cancel = cancel.clone();
    async move {
      let result = controller.run(cancel).await;
      (controller, result)
    }
  });

  // Phase one: upstream filters finish client 3.
  deliver(&peer, DataType::Reviews, 1, 3, 50).await;
  assert!(peer.try_published().is_none());
  deliver(&peer, DataType::Reviews, 2, 3, 51).await;

  let first = Frame::unmarshal(peer.next_published().await.unwrap().body).unwrap();
  assert!(first.has_review_data());
  assert_eq!(first.request_id(), FIRST_PHASE_REQUEST_ID);

  // Phase two: joiner replicas answer with the first-phase sentinel.
  deliver(&peer, DataType::Reviews, 1, 3, FIRST_PHASE_REQUEST_ID).await;
  assert!(peer.try_published().is_none());
  deliver(&peer, DataType::Reviews, 2, 3, FIRST_PHASE_REQUEST_ID).await;

  let published = peer.next_published().await.unwrap();
  assert_eq!(published.tag, "joiner_reviews");
  let last = Frame::unmarshal(published.body).unwrap();
  assert_eq!(last.request_id(), FINAL_PHASE_REQUEST_ID);
  assert_eq!(last.client_id(), 3);

  // Games never mix with either review phase.
  deliver(&peer, DataType::Games, 1, 3, FIRST_PHASE_REQUEST_ID).await;
  assert!(peer.try_published().is_none());

  cancel.cancel();
  let (controller, result) = run.await.unwrap();
  result.unwrap();

  let state = controller.state();
  assert!(state.was_already_sent(Resource::Reviews, 3));
  assert!(state.was_already_sent(Resource::FinalReviews, 3));
  assert!(!state.all_reported_for(Resource::Games, 3));
}
