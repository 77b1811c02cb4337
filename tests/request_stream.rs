//! Request-stream interactions against a scripted peer.

mod common;

use futures::StreamExt;
use rsock::{Frame, FrameType, Payload, RsockClient, RsockError, flags};

#[tokio::test]
async fn stream_yields_values_in_arrival_order_then_terminates() {
    let (client, mut peer) = common::connect_pair(RsockClient::builder()).await;

    let respond = async {
        let request = common::next_request(&mut peer).await;
        assert_eq!(request.frame_type, FrameType::RequestStream);
        assert_eq!(request.metadata.as_deref(), Some(b"Feed.tail".as_ref()));
        let id = request.stream_id;
        common::send_frame(&mut peer, Frame::payload(id, Payload::new("a"), flags::NEXT)).await;
        common::send_frame(&mut peer, Frame::payload(id, Payload::new("b"), flags::NEXT)).await;
        common::send_frame(
            &mut peer,
            Frame::payload(id, Payload::new("c"), flags::NEXT | flags::COMPLETE),
        )
        .await;
    };

    let (stream, ()) = tokio::join!(client.request_stream("Feed.tail", ""), respond);
    let mut stream = stream.expect("stream opened");

    let mut seen = Vec::new();
    while let Some(item) = stream.next().await {
        seen.push(item.expect("stream item").data);
    }
    assert_eq!(seen, vec!["a", "b", "c"]);
    assert!(stream.is_terminated());
    assert_eq!(stream.frames_received(), 3);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn peer_error_terminates_the_stream_after_buffered_items() {
    let (client, mut peer) = common::connect_pair(RsockClient::builder()).await;

    let respond = async {
        let request = common::next_request(&mut peer).await;
        let id = request.stream_id;
        common::send_frame(&mut peer, Frame::payload(id, Payload::new("a"), flags::NEXT)).await;
        common::send_frame(&mut peer, Frame::error(id, 0x0202, "source gone")).await;
    };

    let (stream, ()) = tokio::join!(client.request_stream("Feed.tail", ""), respond);
    let mut stream = stream.expect("stream opened");

    let first = stream.next().await.expect("buffered item");
    assert_eq!(first.expect("item delivered").data.as_ref(), b"a");

    match stream.next().await.expect("terminal error") {
        Err(RsockError::Peer { code, message }) => {
            assert_eq!(code, 0x0202);
            assert_eq!(message, "source gone");
        }
        other => panic!("unexpected item: {other:?}"),
    }
    assert!(stream.next().await.is_none());
    assert!(client.is_open(), "stream errors do not close the connection");
}

#[tokio::test]
async fn dropping_a_stream_sends_cancel_and_releases_the_id() {
    let (client, mut peer) = common::connect_pair(RsockClient::builder()).await;

    let respond = async { common::next_request(&mut peer).await };
    let (stream, request) = tokio::join!(client.request_stream("Feed.tail", ""), respond);
    let stream = stream.expect("stream opened");
    let id = stream.stream_id();
    assert_eq!(id, request.stream_id);

    drop(stream);

    let cancel = common::next_request(&mut peer).await;
    assert_eq!(cancel.frame_type, FrameType::Cancel);
    assert_eq!(cancel.stream_id, id);
    assert_eq!(client.pending_requests(), 0);
}
