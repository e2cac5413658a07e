//! Demo: multiple producers feeding one consumer, with a timer wheel driving
//! periodic consumer heartbeats.
//!
//! Run with: `cargo run --example pipeline`

use ringkit::ring::descriptor::trailer::TRAILER_LENGTH;
use ringkit::{
    AlignedBuffer, BackoffIdleStrategy, DeadlineTimerWheel, IdleStrategy, ManyToOneRingBuffer,
    RingBuffer, TimeUnit,
};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

const PRODUCERS: u64 = 4;
const PER_PRODUCER: u64 = 250_000;

fn main() {
    let ring = Arc::new(
        ManyToOneRingBuffer::new(AlignedBuffer::new((1 << 16) + TRAILER_LENGTH)).unwrap(),
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer_id| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                let mut idle = BackoffIdleStrategy::new();
                for sequence in 0..PER_PRODUCER {
                    let mut payload = [0u8; 16];
                    payload[..8].copy_from_slice(&producer_id.to_ne_bytes());
                    payload[8..].copy_from_slice(&sequence.to_ne_bytes());
                    while !ring.write(1, &payload).unwrap() {
                        idle.idle(0);
                    }
                    idle.reset();
                }
            })
        })
        .collect();

    // Heartbeat every ~16ms of wall time, scheduled on the wheel.
    let mut wheel = DeadlineTimerWheel::new(TimeUnit::Milliseconds, 0, 16, 256).unwrap();
    wheel.schedule_timer(16).unwrap();

    let started = Instant::now();
    let mut idle = BackoffIdleStrategy::new();
    let mut total = 0u64;
    let mut heartbeats = 0u64;

    while total < PRODUCERS * PER_PRODUCER {
        let n = ring.read(|_, payload| debug_assert_eq!(payload.len(), 16), usize::MAX);
        total += n as u64;

        let now = started.elapsed().as_millis() as i64;
        wheel.poll(
            now,
            |_, fired_at, _| {
                ring.update_consumer_heartbeat_time(fired_at);
                heartbeats += 1;
                true
            },
            usize::MAX,
        );
        if wheel.timer_count() == 0 {
            wheel.schedule_timer(now + 16).unwrap();
        }

        idle.idle(n);
    }

    for producer in producers {
        producer.join().unwrap();
    }

    let elapsed = started.elapsed();
    println!(
        "{} messages in {:.3}s ({:.1} M msg/s), {} heartbeats, last at {}ms",
        total,
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64() / 1e6,
        heartbeats,
        ring.consumer_heartbeat_time(),
    );
}
