use std::time::Duration;

use bytes::BytesMut;
use chat_protocol::config::{DEFAULT_DATAGRAM_BUDGET, MAX_MESSAGE_SIZE, PAD_BYTE};
use chat_protocol::core::codec::MessageCodec;
use chat_protocol::core::fragment::{Fragmenter, Reassembler, ReassemblyOrder};
use chat_protocol::protocol::message::Message;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};

fn broadcast(size: usize) -> Message {
    Message::Broadcast {
        text: "x".repeat(size),
    }
}

#[allow(clippy::unwrap_used)]
fn bench_stream_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_codec");

    for &size in &[64usize, 4096, 65536] {
        let msg = broadcast(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("encode_{size}b"), |b| {
            let mut codec = MessageCodec::default();
            b.iter(|| {
                let mut buf = BytesMut::with_capacity(size + 8);
                codec.encode(&msg, &mut buf).unwrap();
            })
        });
        group.bench_function(format!("decode_{size}b"), |b| {
            let mut encoded = BytesMut::new();
            MessageCodec::default().encode(&msg, &mut encoded).unwrap();
            b.iter_batched(
                || encoded.clone(),
                |mut buf| {
                    let decoded = MessageCodec::default().decode(&mut buf).unwrap();
                    assert!(decoded.is_some());
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_fragmentation(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmentation");
    let fragmenter = Fragmenter::new(DEFAULT_DATAGRAM_BUDGET, PAD_BYTE);

    for &size in &[500usize, 20_000, 150_000] {
        let msg = broadcast(size);
        let frames = fragmenter.fragment(&msg).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("fragment_{size}b"), |b| {
            b.iter(|| fragmenter.fragment(&msg).unwrap())
        });

        for order in [ReassemblyOrder::Arrival, ReassemblyOrder::Sequence] {
            group.bench_function(format!("reassemble_{order:?}_{size}b"), |b| {
                b.iter_batched(
                    || Reassembler::new(order, Duration::from_secs(30), MAX_MESSAGE_SIZE),
                    |mut reassembler| {
                        let mut done = None;
                        for frame in &frames {
                            done = reassembler.accept(&0u32, frame).unwrap();
                        }
                        assert!(done.is_some());
                    },
                    BatchSize::SmallInput,
                )
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_stream_codec, bench_fragmentation);
criterion_main!(benches);
