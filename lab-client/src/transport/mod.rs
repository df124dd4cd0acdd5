//! Control transport abstraction for p2plab.
//!
//! This module provides a pluggable transport layer that abstracts the
//! connection to a node's control endpoint (gRPC, HTTP, mock for testing).
//!
//! # Design
//!
//! A [`Dialer`] binds a [`Transport`] to a control address. The transport is
//! request/response: every `request()` carries one encoded
//! [`Request`](p2plab_types::Request) and returns one encoded
//! [`Response`](p2plab_types::Response), so independent calls on the same
//! node (a long `run` and a `peer_info`) never interleave.
//!
//! # Example
//!
//! ```ignore
//! let dialer = MockDialer::new();
//! let transport = dialer.dial("10.0.0.1:7001").await?;
//! let reply = transport.request(&Request::PeerInfo.to_bytes()?).await?;
//! ```

mod mock;

pub use mock::{MockDialer, MockTransport, Responder};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,
}

/// Transport trait for exchanging control messages with one node.
///
/// Implementations handle the underlying connection mechanism.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the control endpoint at `address`.
    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    /// Send one encoded request and wait for its encoded response.
    async fn request(&self, data: &[u8]) -> Result<Vec<u8>, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates connected transports for control addresses.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a transport to `address` and connect it.
    async fn dial(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError>;
}
