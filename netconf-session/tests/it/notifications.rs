use netconf_model::{Element, Tagpath};
use netconf_session::{SessionOptions, SessionStatus, Subscription};
use netconf_wire::NS_NOTIFICATION;
use tokio_stream::StreamExt;

use crate::mock::{self, base, interfaces};

fn link_down(name: &str) -> Element {
    let mut event = Element::new(Tagpath::new("urn:x:events", "link-down"));
    event.create_leaf("if-name", name).unwrap();
    event
}

#[tokio::test]
async fn subscription_delivers_notifications() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;
    let mut notifications = session.take_notifications().unwrap();
    assert!(session.take_notifications().is_none());

    let subscription = Subscription {
        stream: Some("NETCONF".to_string()),
        ..Subscription::default()
    };
    let (result, _) = tokio::join!(session.create_subscription(subscription), async {
        let rpc = server.recv().await;
        assert_eq!(rpc.operation.tagpath(), &Tagpath::new(NS_NOTIFICATION, "create-subscription"));
        server.reply_ok(rpc.message_id).await;
    });
    result.unwrap();

    server.notify(link_down("eth0")).await;
    server.notify(link_down("eth1")).await;

    let first = notifications.next().await.unwrap();
    assert_eq!(first.event_time, "2024-05-01T12:00:00Z");
    assert_eq!(first.content, vec![link_down("eth0")]);

    let second = notifications.next().await.unwrap();
    assert_eq!(second.content, vec![link_down("eth1")]);
    assert_eq!(session.stats().notifications(), 2);
}

#[tokio::test]
async fn notifications_do_not_satisfy_pending_request() {
    let _ = tracing_subscriber::fmt::try_init();

    let (session, mut server) = mock::connect().await;
    let mut notifications = session.take_notifications().unwrap();

    let (data, _) = tokio::join!(session.get(None), async {
        let rpc = server.recv().await;
        server.notify(link_down("eth0")).await;
        server.reply_data(rpc.message_id, vec![interfaces()]).await;
    });

    let data = data.unwrap();
    assert_eq!(data.tagpath(), &base("data"));
    assert_eq!(data.children(), &[interfaces()]);

    let event = notifications.next().await.unwrap();
    assert_eq!(event.content, vec![link_down("eth0")]);
    assert_eq!(session.status(), SessionStatus::Ready);
}

#[tokio::test]
async fn full_notification_buffer_drops() {
    let _ = tracing_subscriber::fmt::try_init();

    let options = SessionOptions::default().with_notification_buffer_size(1);
    let (session, mut server) = mock::connect_with(options, mock::server_caps()).await;

    server.notify(link_down("eth0")).await;
    server.notify(link_down("eth1")).await;
    server.notify(link_down("eth2")).await;

    // A round trip guarantees the driver has seen every notification
    let (result, _) = tokio::join!(session.discard_changes(), async {
        let rpc = server.recv().await;
        server.reply_ok(rpc.message_id).await;
    });
    result.unwrap();

    assert_eq!(session.stats().notifications(), 3);
    assert_eq!(session.stats().notifications_dropped(), 2);

    let mut notifications = session.take_notifications().unwrap();
    let kept = notifications.next().await.unwrap();
    assert_eq!(kept.content, vec![link_down("eth0")]);
}
