use std::time::Duration;

use criterion::{
    criterion_group, criterion_main, measurement::WallTime, BenchmarkGroup, BenchmarkId, Criterion,
    Throughput,
};
use futures::{SinkExt, StreamExt};
use pprof::criterion::Output;
use rand::Rng;
use tokio::{io::DuplexStream, runtime::Runtime};
use tokio_util::codec::Framed;

use netconf::{
    envelope, framing, Capabilities, Datastore, Element, FramingMode, NetconfSession,
    SessionOptions, Tagpath, NS_BASE,
};

const N_REQS: usize = 1_000;
const ENTRIES: usize = 16;

fn data(entries: usize) -> Element {
    let mut rng = rand::thread_rng();
    let mut data = Element::new(Tagpath::new(NS_BASE, "data"));
    let interfaces = data.add_child(Element::new(Tagpath::new("urn:x", "interfaces"))).unwrap();
    for i in 0..entries {
        let iface = interfaces.create_child("interface").unwrap();
        iface.create_leaf("name", format!("eth{i}")).unwrap();
        iface.create_leaf("mtu", rng.gen_range(576u32..9000).to_string()).unwrap();
    }
    data
}

/// Answers every request with a `<data>` holding `entries` list entries.
async fn serve(io: DuplexStream, entries: usize) {
    let caps = Capabilities::client_default();
    let mut conn = Framed::new(io, framing::Codec::new());
    conn.send(envelope::encode_server_hello(&caps, 1)).await.unwrap();

    let hello = envelope::decode_hello(&conn.next().await.unwrap().unwrap()).unwrap();
    conn.codec_mut().set_mode(FramingMode::negotiate(&caps, &hello.capabilities));

    let data = data(entries);

    while let Some(Ok(frame)) = conn.next().await {
        let rpc = Element::parse_xml(&frame).unwrap();
        let id = rpc.attribute("message-id").unwrap().parse().unwrap();
        conn.send(envelope::encode_reply(id, vec![data.clone()])).await.unwrap();
    }
}

struct SessionBenchmark {
    rt: Runtime,
    n_reqs: usize,
    entry_counts: Vec<usize>,
}

impl SessionBenchmark {
    fn session(&self, framing: FramingMode, entries: usize) -> NetconfSession {
        let caps = match framing {
            FramingMode::Chunked => Capabilities::client_default(),
            FramingMode::EndOfMessage => {
                Capabilities::new().with(netconf::capabilities::BASE_1_0)
            }
        };

        self.rt.block_on(async {
            let (client, server) = tokio::io::duplex(256 * 1024);
            tokio::spawn(serve(server, entries));

            NetconfSession::open(client, SessionOptions::default().with_capabilities(caps))
                .await
                .unwrap()
        })
    }

    fn bench_get_config(&self, mut group: BenchmarkGroup<'_, WallTime>, framing: FramingMode) {
        for entries in &self.entry_counts {
            let session = self.session(framing, *entries);

            group.throughput(Throughput::Elements(self.n_reqs as u64));
            group.bench_function(BenchmarkId::from_parameter(entries), |b| {
                b.iter(|| {
                    self.rt.block_on(async {
                        for _ in 0..self.n_reqs {
                            session.get_config(Datastore::Running, None).await.unwrap();
                        }
                    });
                });
            });
        }

        group.finish();
    }
}

fn get_config_duplex(c: &mut Criterion) {
    let _ = tracing_subscriber::fmt::try_init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let bench = SessionBenchmark {
        rt,
        n_reqs: N_REQS,
        entry_counts: vec![1, ENTRIES, ENTRIES * 16],
    };

    let mut group = c.benchmark_group("get_config_chunked_rps");
    group.sample_size(10);
    bench.bench_get_config(group, FramingMode::Chunked);

    let mut group = c.benchmark_group("get_config_end_of_message_rps");
    group.sample_size(10);
    bench.bench_get_config(group, FramingMode::EndOfMessage);
}

criterion_group! {
    name = benches;
    config = Criterion::default().warm_up_time(Duration::from_secs(1)).with_profiler(pprof::criterion::PProfProfiler::new(100, Output::Flamegraph(None)));
    targets = get_config_duplex
}

// Sequential request/reply round trips against an in-process server.
criterion_main!(benches);
