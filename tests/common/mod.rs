//! Shared harness for integration tests: a scripted peer driving the far
//! end of an in-memory duplex transport.
#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use rsock::{
    Frame, FrameCodec, FrameType, RsockClient, RsockClientBuilder,
    transport::FramedTransport,
};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

/// Frame cap shared by both ends of the test transport.
pub const TEST_MAX_FRAME: usize = 64 * 1024;

/// The scripted peer: a framed view of the far end of the duplex pipe.
pub type Peer = Framed<DuplexStream, FrameCodec>;

/// Install a tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Build an in-memory transport pair: client side and scripted peer side.
pub fn transport_pair() -> (FramedTransport<DuplexStream>, Peer) {
    let (near, far) = tokio::io::duplex(TEST_MAX_FRAME);
    (
        FramedTransport::new(near, TEST_MAX_FRAME),
        Framed::new(far, FrameCodec::new(TEST_MAX_FRAME)),
    )
}

/// Connect a client over an in-memory transport and consume its setup
/// frame on the peer side.
pub async fn connect_pair(builder: RsockClientBuilder) -> (RsockClient, Peer) {
    init_tracing();
    let (transport, mut peer) = transport_pair();
    let client = builder
        .connect_transport(transport)
        .await
        .expect("connect over duplex transport");
    let setup = next_frame(&mut peer).await;
    assert_eq!(setup.frame_type, FrameType::Setup);
    (client, peer)
}

/// Read the next frame from the client, panicking on close or decode error.
pub async fn next_frame(peer: &mut Peer) -> Frame {
    peer.next()
        .await
        .expect("peer connection open")
        .expect("frame decodes")
}

/// Read frames from the client until something other than a keepalive
/// arrives.
pub async fn next_request(peer: &mut Peer) -> Frame {
    loop {
        let frame = next_frame(peer).await;
        if frame.frame_type != FrameType::Keepalive {
            return frame;
        }
    }
}

/// Send a frame from the scripted peer to the client.
pub async fn send_frame(peer: &mut Peer, frame: Frame) {
    peer.send(frame).await.expect("peer send");
}
