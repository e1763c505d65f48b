use std::hint::black_box;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use databot::bus::{InboundMessage, MessageBus, OutboundMessage};

fn bench_publish_consume(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("bus_publish_consume");

    for batch in [1usize, 64, 512] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let bus = MessageBus::with_capacity(batch);
            b.to_async(&rt).iter(|| async {
                for i in 0..batch {
                    let msg = InboundMessage::new("bench", "user", "chat", "ping");
                    bus.publish_inbound(black_box(msg)).await.unwrap();
                    black_box(i);
                }
                for _ in 0..batch {
                    black_box(bus.consume_inbound().await.unwrap());
                }
            });
        });
    }
    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("bus_fan_out");

    for handlers in [1usize, 4, 16] {
        let bus = rt.block_on(async {
            let bus = MessageBus::with_capacity(1024);
            let delivered = Arc::new(AtomicUsize::new(0));
            for h in 0..handlers {
                let delivered = Arc::clone(&delivered);
                bus.subscribe_outbound(&format!("h{}", h), move |_msg| {
                    let delivered = Arc::clone(&delivered);
                    async move {
                        delivered.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    }
                });
            }
            bus.start();
            bus
        });

        group.bench_with_input(
            BenchmarkId::from_parameter(handlers),
            &handlers,
            |b, _| {
                b.to_async(&rt).iter(|| async {
                    let msg = OutboundMessage::new("bench", "chat", "pong");
                    bus.publish_outbound(black_box(msg)).await.unwrap();
                });
            },
        );

        rt.block_on(bus.stop());
    }
    group.finish();
}

criterion_group!(benches, bench_publish_consume, bench_fan_out);
criterion_main!(benches);
