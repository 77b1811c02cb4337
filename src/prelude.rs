//! Convenience re-exports for common `rsock` usage.
//!
//! ```
//! use rsock::prelude::*;
//! ```

pub use crate::{
    client::{RsockClient, RsockClientBuilder},
    config::SetupConfig,
    connection::ConnectionState,
    error::{Result, RsockError},
    frame::Payload,
    request::PayloadStream,
    transport::{TcpFactory, Transport, TransportFactory},
};
