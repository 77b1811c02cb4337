//! Connection lifecycle: setup, teardown, and fatal inbound conditions.

mod common;

use futures::StreamExt;
use rsock::{ConnectionState, Frame, FrameType, Payload, RsockClient, RsockError, flags};
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn setup_frame_carries_the_configured_parameters() {
    common::init_tracing();
    let (transport, mut peer) = common::transport_pair();
    let client = RsockClient::builder()
        .connect_transport(transport)
        .await
        .expect("connect over duplex transport");

    let setup = common::next_frame(&mut peer).await;
    assert_eq!(setup.frame_type, FrameType::Setup);
    assert_eq!(setup.stream_id, 0);
    let fields = setup.setup_body().expect("well-formed setup body");
    assert_eq!(fields.keep_alive_ms, 60_000);
    assert_eq!(fields.lifetime_ms, 180_000);
    assert_eq!(fields.data_mime_type, "application/json");
    assert_eq!(fields.metadata_mime_type, "application/json");
    assert!(client.is_open());
}

#[tokio::test]
async fn undecodable_input_tears_down_the_connection() {
    let (client, mut peer) = common::connect_pair(RsockClient::builder()).await;

    let poison = async {
        let _ = common::next_request(&mut peer).await;
        // Length-prefixed body with an unknown frame type tag.
        let raw = peer.get_mut();
        raw.write_all(&[0, 0, 0, 6, 0, 0, 0, 1, 0x7F, 0])
            .await
            .expect("raw write");
        raw.flush().await.expect("raw flush");
    };
    let (pending, ()) = tokio::join!(client.request_response("Svc.op", ""), poison);
    match pending.expect_err("decode failures are connection-fatal") {
        RsockError::ConnectionLost => {}
        other => panic!("unexpected error: {other}"),
    }
    client.closed().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn peer_hangup_fails_pending_and_rejects_new_requests() {
    let (client, peer) = common::connect_pair(RsockClient::builder()).await;

    drop(peer);
    client.closed().await;
    assert_eq!(client.state(), ConnectionState::Closed);

    let refused = client.request_response("Svc.op", "").await;
    assert!(matches!(refused, Err(RsockError::ConnectionLost)));
}

#[tokio::test]
async fn connection_level_error_frame_is_fatal() {
    let (client, mut peer) = common::connect_pair(RsockClient::builder()).await;

    let reject = async {
        let _ = common::next_request(&mut peer).await;
        common::send_frame(&mut peer, Frame::error(0, 0x0003, "connection refused")).await;
    };
    let (pending, ()) = tokio::join!(client.request_response("Svc.op", ""), reject);
    assert!(matches!(pending, Err(RsockError::ConnectionLost)));
    client.closed().await;
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn payloads_for_unknown_streams_draw_a_cancel_reply() {
    let (client, mut peer) = common::connect_pair(RsockClient::builder()).await;

    common::send_frame(
        &mut peer,
        Frame::payload(99, Payload::new("stale"), flags::NEXT),
    )
    .await;

    let cancel = common::next_request(&mut peer).await;
    assert_eq!(cancel.frame_type, FrameType::Cancel);
    assert_eq!(cancel.stream_id, 99);
    assert!(client.is_open(), "stale payloads are not fatal");
}

#[tokio::test]
async fn local_close_terminates_open_streams() {
    let (client, mut peer) = common::connect_pair(RsockClient::builder()).await;

    let accept = async { common::next_request(&mut peer).await };
    let (stream, request) = tokio::join!(client.request_stream("Feed.tail", ""), accept);
    assert_eq!(request.frame_type, FrameType::RequestStream);
    let mut stream = stream.expect("stream opened");

    client.close().await;

    match stream.next().await.expect("terminal item") {
        Err(RsockError::ConnectionLost) => {}
        other => panic!("unexpected item: {other:?}"),
    }
    assert!(stream.next().await.is_none());
}
