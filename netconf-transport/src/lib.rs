//! Transports carrying a NETCONF session: anything that yields an ordered,
//! reliable, bidirectional byte stream.
//!
//! Authentication and encryption (SSH, TLS) are the transport's concern; the
//! session engine only ever sees the resulting stream.

use std::fmt::Debug;

use tokio::io::{AsyncRead, AsyncWrite};

mod tcp;
pub use tcp::*;

/// A client-side transport that can open a byte stream to a device.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The address type used to reach a device.
    type Addr: Clone + Debug + Send + Sync + 'static;
    /// The stream a connection yields.
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Opens a new stream to `addr`. Every session uses its own stream.
    async fn connect(&self, addr: Self::Addr) -> Result<Self::Io, Self::Error>;
}
