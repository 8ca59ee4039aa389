//! The data model shared by every netconf-rs crate: [`Tagpath`] keys, the owned
//! [`Element`] tree with its XML representation, and the read-only schema
//! [`Registry`] used to validate and compare trees.

mod element;
pub use element::*;

mod tagpath;
pub use tagpath::*;

pub mod schema;
pub use schema::{Registry, SchemaNode};

pub mod xml;
pub use xml::XmlError;
