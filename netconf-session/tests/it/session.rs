use std::{sync::Arc, time::Duration};

use netconf_model::{
    schema::{NodeKind, SchemaNode, ValidationIssue, ValueType},
    Element, Registry, Tagpath,
};
use netconf_session::{
    Datastore, EditConfig, Filter, FramingMode, SessionError, SessionOptions, SessionStatus,
};
use netconf_wire::{capabilities, Capabilities, ErrorTag, ErrorType, RpcError};

use crate::mock::{self, base, interfaces, MockServer};

#[tokio::test]
async fn end_of_message_framing_when_client_lacks_1_1() {
    let _ = tracing_subscriber::fmt::try_init();

    let client = SessionOptions::default()
        .with_capabilities(Capabilities::new().with(capabilities::BASE_1_0));
    let (session, mut server) = mock::connect_with(client, mock::server_caps()).await;

    assert_eq!(session.framing_mode(), FramingMode::EndOfMessage);
    assert_eq!(server.mode(), FramingMode::EndOfMessage);
    assert_eq!(session.session_id(), mock::SESSION_ID);
    assert!(session.server_capabilities().supports_base_1_1());

    // The session still works in 1.0 framing
    let (result, _) = tokio::join!(session.lock(Datastore::Candidate), async {
        let rpc = server.recv().await;
        server.reply_ok(rpc.message_id).await;
    });
    result.unwrap();
}

#[tokio::test]
async fn chunked_framing_when_both_advertise_1_1() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;
    assert_eq!(session.framing_mode(), FramingMode::Chunked);
    assert_eq!(server.mode(), FramingMode::Chunked);
    assert_eq!(session.status(), SessionStatus::Ready);

    let (data, _) = tokio::join!(session.get(None), async {
        let rpc = server.recv().await;
        assert_eq!(rpc.operation.tagpath(), &base("get"));
        server.reply_data(rpc.message_id, vec![interfaces()]).await;
    });
    assert_eq!(data.unwrap().children(), &[interfaces()]);
}

#[tokio::test]
async fn get_config_with_subtree_filter_returns_data() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;
    let filter = Filter::subtree(Element::new(Tagpath::new("urn:x", "interfaces")));

    let (data, _) = tokio::join!(session.get_config(Datastore::Running, Some(filter)), async {
        let rpc = server.recv().await;
        assert_eq!(rpc.operation.tagpath(), &base("get-config"));

        let filter = rpc.operation.find_child(&base("filter")).unwrap();
        assert_eq!(filter.attribute("type"), Some("subtree"));
        assert_eq!(filter.children()[0].tagpath(), &Tagpath::new("urn:x", "interfaces"));

        server.reply_data(rpc.message_id, vec![interfaces()]).await;
    });

    let data = data.unwrap();
    let returned = data.find_child(&Tagpath::new("urn:x", "interfaces")).unwrap();
    assert_eq!(returned, &interfaces());
}

#[tokio::test]
async fn access_denied_is_a_structured_failure() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let (result, _) = tokio::join!(session.get_config(Datastore::Running, None), async {
        let rpc = server.recv().await;
        server
            .reply_error(rpc.message_id, RpcError::new(ErrorType::Protocol, ErrorTag::AccessDenied))
            .await;
    });

    let err = result.unwrap_err();
    let errors = err.rpc_errors().expect("expected rpc errors");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors.first().unwrap().error_tag.as_str(), "access-denied");

    // A server-reported failure leaves the session usable
    assert_eq!(session.status(), SessionStatus::Ready);
}

#[tokio::test]
async fn message_ids_are_strictly_increasing() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let server_task = tokio::spawn(async move {
        let mut ids = Vec::new();
        for _ in 0..5 {
            let rpc = server.recv().await;
            ids.push(rpc.message_id);
            server.reply_ok(rpc.message_id).await;
        }
        ids
    });

    for _ in 0..5 {
        session.discard_changes().await.unwrap();
    }

    assert_eq!(server_task.await.unwrap(), vec![1, 2, 3, 4, 5]);
    assert!(session.stats().bytes_tx() > 0);
    assert!(session.stats().bytes_rx() > 0);
}

#[tokio::test]
async fn second_operation_fails_fast_without_sending() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.lock(Datastore::Running).await }
    });

    let rpc = server.recv().await;
    assert_eq!(session.status(), SessionStatus::Busy);
    let tx_before = session.stats().bytes_tx();

    let err = session.unlock(Datastore::Running).await.unwrap_err();
    assert!(matches!(err, SessionError::OperationInProgress));
    assert_eq!(session.stats().bytes_tx(), tx_before);

    server.reply_ok(rpc.message_id).await;
    first.await.unwrap().unwrap();

    // The rejected operation never consumed a message-id
    let (result, _) = tokio::join!(session.unlock(Datastore::Running), async {
        let rpc = server.recv().await;
        assert_eq!(rpc.message_id, 2);
        assert_eq!(rpc.operation.tagpath(), &base("unlock"));
        server.reply_ok(rpc.message_id).await;
    });
    result.unwrap();
}

#[tokio::test]
async fn timeout_makes_session_unusable() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = SessionOptions::default().with_timeout(Duration::from_millis(100));
    let (session, mut server) = mock::connect_with(options, mock::server_caps()).await;

    let (result, _) = tokio::join!(session.commit(Default::default()), server.recv());
    assert!(matches!(result.unwrap_err(), SessionError::OperationTimeout));
    assert_eq!(session.status(), SessionStatus::Closed);

    let err = session.discard_changes().await.unwrap_err();
    assert!(matches!(err, SessionError::SessionClosed));

    // The driver drops the transport
    assert!(server.next_frame().await.is_none());
}

#[tokio::test]
async fn close_session_is_terminal() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let (result, _) = tokio::join!(session.close(), async {
        let rpc = server.recv().await;
        assert_eq!(rpc.operation.tagpath(), &base("close-session"));
        server.reply_ok(rpc.message_id).await;
    });
    result.unwrap();

    assert_eq!(session.status(), SessionStatus::Closed);
    assert!(server.next_frame().await.is_none());

    let err = session.get(None).await.unwrap_err();
    assert!(matches!(err, SessionError::SessionClosed));
}

#[tokio::test]
async fn kill_session_keeps_own_session_open() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let (result, _) = tokio::join!(session.kill_session(7), async {
        let rpc = server.recv().await;
        let target = rpc.operation.find_child(&base("session-id")).unwrap();
        assert_eq!(target.value(), Some("7"));
        server.reply_ok(rpc.message_id).await;
    });
    result.unwrap();
    assert_eq!(session.status(), SessionStatus::Ready);
}

#[tokio::test]
async fn transport_fault_fails_in_flight_operation() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let (result, _) = tokio::join!(session.get(None), async move {
        server.recv().await;
        drop(server);
    });

    assert!(matches!(result.unwrap_err(), SessionError::SessionClosed));
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test]
async fn message_id_mismatch_is_fatal() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let (result, _) = tokio::join!(session.discard_changes(), async {
        let rpc = server.recv().await;
        server.reply_ok(rpc.message_id + 10).await;
    });

    assert!(matches!(
        result.unwrap_err(),
        SessionError::MessageIdMismatch { expected: 1, received: 11 }
    ));
    assert_eq!(session.status(), SessionStatus::Closed);
}

#[tokio::test]
async fn reply_without_message_id_is_accepted() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;

    let (result, _) = tokio::join!(session.discard_changes(), async {
        server.recv().await;
        server
            .send_raw(r#"<rpc-reply xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#)
            .await;
    });
    result.unwrap();
}

#[tokio::test]
async fn hello_without_session_id_fails() {
    let _ = tracing_subscriber::fmt::try_init();

    let hello = br#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><capabilities><capability>urn:ietf:params:netconf:base:1.0</capability></capabilities></hello>"#;
    let err = mock::open_against(hello).await.unwrap_err();
    assert!(matches!(err, SessionError::HelloFailed(_)), "{err:?}");
}

#[tokio::test]
async fn unparseable_hello_fails() {
    let _ = tracing_subscriber::fmt::try_init();

    let err = mock::open_against(b"<rpc-reply/>").await.unwrap_err();
    assert!(matches!(err, SessionError::HelloFailed(_)), "{err:?}");

    let err = mock::open_against(b"<hello").await.unwrap_err();
    assert!(matches!(err, SessionError::HelloFailed(_)), "{err:?}");
}

#[tokio::test]
async fn hello_timeout() {
    let _ = tracing_subscriber::fmt::try_init();

    let (client_io, _server_io) = tokio::io::duplex(1024);
    let options = SessionOptions::default().with_hello_timeout(Duration::from_millis(50));

    let err = netconf_session::NetconfSession::open(client_io, options).await.unwrap_err();
    assert!(matches!(err, SessionError::HelloFailed(_)));
}

fn registry() -> Arc<Registry> {
    let tp = |tag: &str| Tagpath::new("urn:x", tag);
    let mut builder = Registry::builder();
    builder
        .insert(
            "test",
            SchemaNode::new(tp("interfaces"), NodeKind::Container { presence: false })
                .with_children(vec![tp("interface")]),
        )
        .unwrap()
        .insert(
            "test",
            SchemaNode::new(
                tp("interface"),
                NodeKind::List {
                    keys: vec![tp("name")],
                    ordered_by_user: false,
                },
            )
            .with_children(vec![tp("name"), tp("mtu")]),
        )
        .unwrap()
        .insert(
            "test",
            SchemaNode::new(tp("name"), NodeKind::Leaf { value_type: ValueType::String }),
        )
        .unwrap()
        .insert(
            "test",
            SchemaNode::new(tp("mtu"), NodeKind::Leaf { value_type: ValueType::UInt16 }),
        )
        .unwrap();
    Arc::new(builder.build())
}

#[tokio::test]
async fn invalid_config_is_rejected_before_sending() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = SessionOptions::default().with_registry(registry());
    let (session, mut server) = mock::connect_with(options, mock::server_caps()).await;

    let mut config = interfaces();
    config
        .find_child_mut(&Tagpath::new("urn:x", "interface"))
        .unwrap()
        .create_leaf("speed", "fast")
        .unwrap();

    let tx_before = session.stats().bytes_tx();
    let err = session
        .edit_config(EditConfig::new(Datastore::Candidate, config))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Validation(_)), "{err:?}");
    assert_eq!(session.stats().bytes_tx(), tx_before);
    assert_eq!(session.status(), SessionStatus::Ready);

    // Valid content goes through
    let (result, _) = tokio::join!(
        session.edit_config(EditConfig::new(Datastore::Candidate, interfaces())),
        async {
            let rpc = server.recv().await;
            assert_eq!(rpc.message_id, 1);
            let config = rpc.operation.find_child(&base("config")).unwrap();
            assert_eq!(config.children(), &[interfaces()]);
            server.reply_ok(rpc.message_id).await;
        }
    );
    result.unwrap();
}

#[tokio::test]
async fn invalid_reply_data_fails_validation() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = SessionOptions::default().with_registry(registry());
    let (session, mut server) = mock::connect_with(options, mock::server_caps()).await;

    let mut data = interfaces();
    data.find_child_mut(&Tagpath::new("urn:x", "interface"))
        .unwrap()
        .find_child_mut(&Tagpath::new("urn:x", "mtu"))
        .unwrap()
        .set_value("70000")
        .unwrap();

    let (result, _) = tokio::join!(session.get_config(Datastore::Running, None), async {
        let rpc = server.recv().await;
        server.reply_data(rpc.message_id, vec![data]).await;
    });

    let SessionError::Validation(err) = result.unwrap_err() else {
        panic!("expected a validation failure");
    };
    assert_eq!(err.tagpath, Tagpath::new("urn:x", "mtu"));
    assert!(matches!(err.issue, ValidationIssue::InvalidValue { ref value, .. } if value == "70000"));

    // The reply was fully consumed, so the session stays usable
    assert_eq!(session.status(), SessionStatus::Ready);

    let (data, _) = tokio::join!(session.get(None), async {
        let rpc = server.recv().await;
        assert_eq!(rpc.message_id, 2);
        server.reply_data(rpc.message_id, vec![interfaces()]).await;
    });
    assert_eq!(data.unwrap().children(), &[interfaces()]);
}

#[tokio::test]
async fn connects_over_tcp() {
    let _ = tracing_subscriber::fmt::try_init();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (client, server) = tokio::io::duplex(64 * 1024);
        // Bridge the TCP stream into a duplex pipe for the mock server
        tokio::spawn(async move {
            let (mut a, mut b) = (stream, client);
            let _ = tokio::io::copy_bidirectional(&mut a, &mut b).await;
        });
        let mut server = MockServer::accept(server, mock::server_caps()).await;
        let rpc = server.recv().await;
        server.reply_ok(rpc.message_id).await;
        while server.next_frame().await.is_some() {}
    });

    let transport = netconf_transport::Tcp::default();
    let session = netconf_session::NetconfSession::connect(&transport, addr, SessionOptions::default())
        .await
        .unwrap();
    session.discard_changes().await.unwrap();
    assert_eq!(session.session_id(), mock::SESSION_ID);
}
