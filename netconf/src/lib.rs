#![doc(issue_tracker_base_url = "https://github.com/chainbound/netconf-rs/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! An async NETCONF client.
//!
//! [`NetconfSession`] runs the protocol over any byte stream a [`Transport`]
//! provides. Requests and replies are [`Element`] trees, optionally checked
//! against a schema [`Registry`]. [`Device`] groups named sessions with their
//! configuration trees and edit backlogs.

mod device;
pub use device::*;

pub use netconf_model::{schema, xml, Attribute, Element, Registry, StructuralConflict, Tagpath};
pub use netconf_session::*;
pub use netconf_transport::*;
pub use netconf_wire::{
    capabilities, envelope, framing, Capabilities, ErrorSeverity, ErrorTag, ErrorType, RpcError,
    RpcErrors, NS_BASE, NS_NOTIFICATION,
};
