use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ringkit::ring::descriptor::trailer::TRAILER_LENGTH;
use ringkit::{AlignedBuffer, ManyToOneRingBuffer, OneToOneRingBuffer, RingBuffer};
use std::sync::Arc;
use std::thread;

const MESSAGES: u64 = 1_000_000;
const CAPACITY: usize = 1 << 16;

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc");
    group.throughput(Throughput::Elements(MESSAGES));

    group.bench_function("write_read_8b", |b| {
        b.iter(|| {
            let ring = Arc::new(
                OneToOneRingBuffer::new(AlignedBuffer::new(CAPACITY + TRAILER_LENGTH)).unwrap(),
            );

            let producer_ring = Arc::clone(&ring);
            let producer = thread::spawn(move || {
                let mut sent = 0u64;
                while sent < MESSAGES {
                    if producer_ring.write(1, &sent.to_ne_bytes()).unwrap() {
                        sent += 1;
                    } else {
                        std::hint::spin_loop();
                    }
                }
            });

            let mut count = 0u64;
            while count < MESSAGES {
                count += ring.read(|_, payload| {
                    black_box(payload);
                }, usize::MAX) as u64;
                if count < MESSAGES {
                    std::hint::spin_loop();
                }
            }

            producer.join().unwrap();
        });
    });

    group.finish();
}

fn bench_mpsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");

    for num_producers in [2, 4].iter() {
        let total_msgs = MESSAGES * *num_producers as u64;
        group.throughput(Throughput::Elements(total_msgs));

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}P_1C", num_producers)),
            num_producers,
            |b, &n| {
                b.iter(|| {
                    let ring = Arc::new(
                        ManyToOneRingBuffer::new(AlignedBuffer::new(CAPACITY + TRAILER_LENGTH))
                            .unwrap(),
                    );

                    let producers: Vec<_> = (0..n)
                        .map(|_| {
                            let ring = Arc::clone(&ring);
                            thread::spawn(move || {
                                let mut sent = 0u64;
                                while sent < MESSAGES {
                                    if ring.write(1, &sent.to_ne_bytes()).unwrap() {
                                        sent += 1;
                                    } else {
                                        std::hint::spin_loop();
                                    }
                                }
                            })
                        })
                        .collect();

                    let mut count = 0u64;
                    let total = MESSAGES * n as u64;
                    while count < total {
                        count += ring.read(|_, payload| {
                            black_box(payload);
                        }, usize::MAX) as u64;
                        if count < total {
                            std::hint::spin_loop();
                        }
                    }

                    for producer in producers {
                        producer.join().unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpsc);
criterion_main!(benches);
