//! Wire formats for netconf-rs: RFC 6242 message framing and the RFC 6241
//! message envelopes carried inside the frames.

pub mod capabilities;
pub mod envelope;
pub mod framing;

mod rpc_error;
pub use rpc_error::*;

pub use capabilities::Capabilities;
pub use framing::FramingMode;

/// The NETCONF base namespace, shared by every envelope and base operation.
pub const NS_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// The RFC 5277 event notification namespace.
pub const NS_NOTIFICATION: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";
