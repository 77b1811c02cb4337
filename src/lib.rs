#![doc(html_root_url = "https://docs.rs/rsock/latest")]
//! Public API for the `rsock` library.
//!
//! `rsock` is a minimal RSocket-compatible client runtime: one connection
//! multiplexes concurrent request-response and request-stream interactions
//! over an abstract frame transport, with an explicit connection state
//! machine, stream-id lifecycle, setup handshake, and keepalive watchdog.
//!
//! The typical entry point is [`RsockClient::builder`]:
//!
//! ```no_run
//! use rsock::{RsockClient, TcpFactory};
//!
//! # #[tokio::main]
//! # async fn main() -> rsock::Result<()> {
//! let client = RsockClient::builder()
//!     .connect(&TcpFactory::default(), "tcp://127.0.0.1:7878")
//!     .await?;
//! let account = client
//!     .request_response("AccountService.findById", r#"{"id":1}"#)
//!     .await?;
//! # drop(account);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod prelude;
pub mod registry;
pub mod request;
pub mod transport;

pub use client::{RsockClient, RsockClientBuilder};
pub use codec::{CodecError, FrameCodec};
pub use config::SetupConfig;
pub use connection::ConnectionState;
pub use error::{MalformedFrame, Result, RsockError};
pub use frame::{Frame, FrameType, Payload, SetupFields, flags};
pub use registry::{InteractionMode, StreamId, StreamRegistry};
pub use request::PayloadStream;
pub use transport::{FramedTransport, TcpFactory, Transport, TransportFactory};
