//! An in-process NETCONF server speaking over a duplex pipe.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use netconf_model::{Element, Tagpath};
use netconf_session::{NetconfSession, SessionError, SessionOptions};
use netconf_wire::{
    capabilities,
    envelope::{self, Hello},
    framing::{self, FramingMode},
    Capabilities, RpcError, NS_BASE,
};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

pub const SESSION_ID: u32 = 42;

pub fn base(tag: &str) -> Tagpath {
    Tagpath::new(NS_BASE, tag)
}

pub fn server_caps() -> Capabilities {
    Capabilities::client_default()
        .with(capabilities::CANDIDATE)
        .with(capabilities::NOTIFICATION)
}

pub struct MockServer {
    conn: Framed<DuplexStream, framing::Codec>,
    /// The client's hello.
    pub hello: Hello,
}

/// A request as seen by the server.
pub struct Rpc {
    pub message_id: u32,
    pub operation: Element,
}

impl MockServer {
    /// Runs the server side of the hello exchange.
    pub async fn accept(io: DuplexStream, caps: Capabilities) -> Self {
        let mut conn = Framed::new(io, framing::Codec::new());
        conn.send(envelope::encode_server_hello(&caps, SESSION_ID)).await.unwrap();

        let frame = conn.next().await.unwrap().unwrap();
        let hello = envelope::decode_hello(&frame).unwrap();
        conn.codec_mut().set_mode(FramingMode::negotiate(&caps, &hello.capabilities));

        Self { conn, hello }
    }

    pub fn mode(&self) -> FramingMode {
        self.conn.codec().mode()
    }

    /// Reads the next `<rpc>`. Panics on anything else.
    pub async fn recv(&mut self) -> Rpc {
        let frame = self.conn.next().await.expect("connection closed").unwrap();
        let mut rpc = Element::parse_xml(&frame).unwrap();
        assert_eq!(rpc.tagpath(), &base("rpc"));

        let message_id = rpc.attribute("message-id").unwrap().parse().unwrap();
        let operation = rpc.take_children().pop().unwrap();
        Rpc { message_id, operation }
    }

    /// Returns `None` once the client closed the connection.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.conn.next().await.map(|frame| frame.unwrap())
    }

    pub async fn send_raw(&mut self, message: impl Into<Bytes>) {
        self.conn.send(message.into()).await.unwrap();
    }

    pub async fn reply_ok(&mut self, message_id: u32) {
        self.send_raw(envelope::encode_reply(message_id, vec![])).await;
    }

    pub async fn reply_data(&mut self, message_id: u32, content: Vec<Element>) {
        let mut data = Element::new(base("data"));
        for child in content {
            data.add_child(child).unwrap();
        }
        self.send_raw(envelope::encode_reply(message_id, vec![data])).await;
    }

    pub async fn reply_error(&mut self, message_id: u32, error: RpcError) {
        self.send_raw(envelope::encode_reply(message_id, vec![error.to_element()])).await;
    }

    pub async fn notify(&mut self, event: Element) {
        self.send_raw(envelope::encode_notification("2024-05-01T12:00:00Z", vec![event])).await;
    }
}

/// Opens a client session against a fresh mock server.
pub async fn connect_with(
    client_options: SessionOptions,
    server_caps: Capabilities,
) -> (NetconfSession, MockServer) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    let (session, server) = tokio::join!(
        NetconfSession::open(client_io, client_options),
        MockServer::accept(server_io, server_caps)
    );

    (session.unwrap(), server)
}

pub async fn connect() -> (NetconfSession, MockServer) {
    connect_with(SessionOptions::default(), server_caps()).await
}

/// Opens a session against a server that sends `hello` verbatim.
pub async fn open_against(hello: &'static [u8]) -> Result<NetconfSession, SessionError> {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);

    tokio::spawn(async move {
        let mut conn = Framed::new(server_io, framing::Codec::new());
        conn.send(Bytes::from_static(hello)).await.unwrap();
        // Keep the pipe open until the client is done
        while conn.next().await.is_some() {}
    });

    NetconfSession::open(client_io, SessionOptions::default()).await
}

pub fn interfaces() -> Element {
    let mut interfaces = Element::new(Tagpath::new("urn:x", "interfaces"));
    let iface = interfaces.create_child("interface").unwrap();
    iface.create_leaf("name", "eth0").unwrap();
    iface.create_leaf("mtu", "1500").unwrap();
    interfaces
}
