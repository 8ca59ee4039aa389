//! The RFC 6241 message envelopes: `<hello>`, `<rpc>`, `<rpc-reply>` and the
//! RFC 5277 `<notification>`.
//!
//! Encoding is infallible. Decoding turns a deframed message into one of the
//! typed envelopes below, leaving the payload as an [`Element`] tree.

use bytes::Bytes;
use netconf_model::{Element, Tagpath, XmlError};
use thiserror::Error;

use crate::{Capabilities, RpcError, NS_BASE, NS_NOTIFICATION};

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("unexpected element {0}")]
    UnexpectedElement(Tagpath),
    #[error("missing <{0}>")]
    MissingElement(&'static str),
    #[error("invalid {field}: `{value}`")]
    InvalidValue { field: &'static str, value: String },
}

/// A peer's `<hello>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Servers must send one; clients never do.
    pub session_id: Option<u32>,
    pub capabilities: Capabilities,
}

/// A decoded `<rpc-reply>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The reply carried no `<rpc-error>`. The payload is the whole
    /// `<rpc-reply>` element: `<ok/>`, `<data>` or operation-specific content.
    Success {
        message_id: Option<u32>,
        payload: Element,
    },
    /// The reply carried at least one `<rpc-error>`, in document order. An
    /// `<ok/>` alongside is ignored.
    Failure {
        message_id: Option<u32>,
        errors: Vec<RpcError>,
    },
}

impl Reply {
    pub fn message_id(&self) -> Option<u32> {
        match self {
            Self::Success { message_id, .. } | Self::Failure { message_id, .. } => *message_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// An RFC 5277 event notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The `<eventTime>` as sent, an RFC 3339 date-time.
    pub event_time: String,
    /// The event content, every child except `<eventTime>`.
    pub content: Vec<Element>,
}

/// Any message a server may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello(Hello),
    Reply(Reply),
    Notification(Notification),
}

fn base(tag: &str) -> Tagpath {
    Tagpath::new(NS_BASE, tag)
}

fn document(root: &Element) -> Bytes {
    let mut out = String::from(XML_DECLARATION);
    out.push_str(&root.to_xml());
    Bytes::from(out)
}

/// Encodes a `<hello>` advertising `capabilities`. Hellos carry no message-id.
pub fn encode_hello(capabilities: &Capabilities) -> Bytes {
    document(&hello_element(capabilities, None))
}

/// Encodes a server `<hello>` carrying `session_id`.
pub fn encode_server_hello(capabilities: &Capabilities, session_id: u32) -> Bytes {
    document(&hello_element(capabilities, Some(session_id)))
}

fn hello_element(capabilities: &Capabilities, session_id: Option<u32>) -> Element {
    let mut hello = Element::new(base("hello"));
    let mut caps = Element::new(base("capabilities"));
    for uri in capabilities.iter() {
        let _ = caps.add_child(Element::leaf(base("capability"), uri));
    }
    let _ = hello.add_child(caps);
    if let Some(id) = session_id {
        let _ = hello.add_child(Element::leaf(base("session-id"), id.to_string()));
    }
    hello
}

/// Wraps `operation` in an `<rpc>` carrying `message_id`.
pub fn encode_request(message_id: u32, operation: Element) -> Bytes {
    let mut rpc = Element::new(base("rpc"));
    rpc.set_attribute("message-id", message_id.to_string());
    let _ = rpc.add_child(operation);
    document(&rpc)
}

/// Encodes an `<rpc-reply>` with the given content. A reply without content
/// carries `<ok/>`.
pub fn encode_reply(message_id: u32, content: Vec<Element>) -> Bytes {
    let mut reply = Element::new(base("rpc-reply"));
    reply.set_attribute("message-id", message_id.to_string());
    if content.is_empty() {
        let _ = reply.add_child(Element::new(base("ok")));
    }
    for child in content {
        let _ = reply.add_child(child);
    }
    document(&reply)
}

/// Encodes a `<notification>`.
pub fn encode_notification(event_time: &str, content: Vec<Element>) -> Bytes {
    let mut notification = Element::new(Tagpath::new(NS_NOTIFICATION, "notification"));
    let _ = notification.create_leaf("eventTime", event_time);
    for child in content {
        let _ = notification.add_child(child);
    }
    document(&notification)
}

fn parse(bytes: &[u8]) -> Result<Element, Error> {
    // Chunked framing commonly leaves a newline before the declaration.
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    Ok(Element::parse_xml(&bytes[start..])?)
}

pub fn decode_hello(bytes: &[u8]) -> Result<Hello, Error> {
    hello_from(parse(bytes)?)
}

pub fn decode_reply(bytes: &[u8]) -> Result<Reply, Error> {
    reply_from(parse(bytes)?)
}

pub fn decode_notification(bytes: &[u8]) -> Result<Notification, Error> {
    notification_from(parse(bytes)?)
}

/// Decodes whichever message `bytes` holds, dispatching on the root element.
pub fn decode_message(bytes: &[u8]) -> Result<Message, Error> {
    let root = parse(bytes)?;
    match (root.namespace(), root.tag()) {
        (NS_BASE, "hello") => hello_from(root).map(Message::Hello),
        (NS_BASE, "rpc-reply") => reply_from(root).map(Message::Reply),
        (NS_NOTIFICATION, "notification") => notification_from(root).map(Message::Notification),
        _ => Err(Error::UnexpectedElement(root.tagpath().clone())),
    }
}

fn expect_root(root: &Element, expected: &Tagpath) -> Result<(), Error> {
    if root.tagpath() != expected {
        return Err(Error::UnexpectedElement(root.tagpath().clone()));
    }
    Ok(())
}

fn hello_from(root: Element) -> Result<Hello, Error> {
    expect_root(&root, &base("hello"))?;

    let caps = root
        .find_child(&base("capabilities"))
        .ok_or(Error::MissingElement("capabilities"))?;
    let capabilities = caps
        .find_children(&base("capability"))
        .filter_map(Element::value)
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .collect();

    let session_id = root
        .find_child(&base("session-id"))
        .map(|e| parse_u32("session-id", e.value().unwrap_or_default()))
        .transpose()?;

    Ok(Hello {
        session_id,
        capabilities,
    })
}

fn reply_from(root: Element) -> Result<Reply, Error> {
    expect_root(&root, &base("rpc-reply"))?;

    let message_id = root
        .attribute("message-id")
        .map(|id| parse_u32("message-id", id))
        .transpose()?;

    let rpc_error = base("rpc-error");
    let errors: Vec<_> = root.find_children(&rpc_error).map(RpcError::from_element).collect();

    if errors.is_empty() {
        Ok(Reply::Success {
            message_id,
            payload: root,
        })
    } else {
        Ok(Reply::Failure { message_id, errors })
    }
}

fn notification_from(mut root: Element) -> Result<Notification, Error> {
    let event_time_tag = Tagpath::new(NS_NOTIFICATION, "eventTime");
    expect_root(&root, &event_time_tag.sibling("notification"))?;

    let event_time = root
        .remove_child(&event_time_tag)
        .and_then(|mut e| e.take_value())
        .map(|v| v.trim().to_string())
        .ok_or(Error::MissingElement("eventTime"))?;

    Ok(Notification {
        event_time,
        content: root.take_children(),
    })
}

fn parse_u32(field: &'static str, value: &str) -> Result<u32, Error> {
    value.trim().parse().map_err(|_| Error::InvalidValue {
        field,
        value: value.to_string(),
    })
}
