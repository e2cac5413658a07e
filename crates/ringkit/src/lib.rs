//! ringkit — lock-free message plumbing over shared byte regions.
//!
//! A family of inter-thread transports built on one record format:
//!
//! - [`ManyToOneRingBuffer`]: many producers, one consumer; producers
//!   arbitrate with a tail CAS.
//! - [`OneToOneRingBuffer`]: one producer, one consumer; strict FIFO with a
//!   plain-store fast path.
//! - [`BroadcastTransmitter`] / [`BroadcastReceiver`]: lossy one-to-many
//!   stream where slow receivers are lapped instead of blocking the writer.
//! - [`DeadlineTimerWheel`]: O(1) deadline scheduling with bounded-latency
//!   polling.
//!
//! All of them operate on an [`AtomicBuffer`] region, so the same code runs
//! over a private heap allocation ([`AlignedBuffer`]) or a shared memory
//! mapping (`MappedBuffer`, behind the `mmap` feature).
//!
//! # Example
//!
//! ```
//! use ringkit::ring::descriptor::trailer::TRAILER_LENGTH;
//! use ringkit::{AlignedBuffer, OneToOneRingBuffer, RingBuffer};
//!
//! let region = AlignedBuffer::new(4096 + TRAILER_LENGTH);
//! let ring = OneToOneRingBuffer::new(region).unwrap();
//!
//! assert!(ring.write(1, b"hello").unwrap());
//!
//! let mut received = Vec::new();
//! let count = ring.read(
//!     |_msg_type_id, payload| received.extend_from_slice(payload),
//!     usize::MAX,
//! );
//! assert_eq!(count, 1);
//! assert_eq!(received, b"hello");
//! ```

mod bits;
pub mod broadcast;
mod buffer;
mod error;
mod idle;
#[cfg(feature = "mmap")]
mod mmap;
pub mod ring;
mod wheel;

pub use bits::{align, is_power_of_two, CACHE_LINE_LENGTH};
pub use broadcast::{BroadcastReceiver, BroadcastTransmitter, CopyBroadcastReceiver};
pub use buffer::{AlignedBuffer, AtomicBuffer, BUFFER_ALIGNMENT};
pub use error::{Error, Result};
pub use idle::{BackoffIdleStrategy, BusySpinIdleStrategy, IdleStrategy, YieldingIdleStrategy};
#[cfg(feature = "mmap")]
pub use mmap::MappedBuffer;
pub use ring::{Claim, ManyToOneRingBuffer, OneToOneRingBuffer, RingBuffer};
pub use wheel::{DeadlineTimerWheel, TimeUnit, INITIAL_TICK_ALLOCATION, NULL_DEADLINE};
