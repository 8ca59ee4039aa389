use netconf::{Datastore, Device, Element, Filter, Tagpath, Tcp};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    // A NETCONF server reachable over plain TCP, e.g. netopeer2 behind a TCP proxy
    let addr = std::env::args().nth(1).unwrap_or_else(|| "127.0.0.1:830".to_string());

    let mut device = Device::new("lab", Tcp::default(), addr.parse().unwrap());
    let session = device.new_session("default").await.unwrap();
    println!("Session {} ({:?} framing)", session.session_id(), session.framing_mode());

    // Only fetch the interfaces subtree
    let filter = Filter::subtree(Element::new(Tagpath::new(
        "urn:ietf:params:xml:ns:yang:ietf-interfaces",
        "interfaces",
    )));
    let data = session.get_config(Datastore::Running, Some(filter)).await.unwrap();

    for child in data.children() {
        println!("{}", child.to_xml());
    }

    device.close().await;
}
