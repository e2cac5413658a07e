//! Error types shared across the ring, broadcast, and timer-wheel modules.
//!
//! Insufficient capacity is deliberately *not* represented here: it is the
//! expected steady-state outcome of writing into a full ring, so the write
//! paths report it as `Ok(false)` / `Ok(None)` instead of an error.

use thiserror::Error;

/// Errors raised by buffer construction and message operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// The data region (total capacity minus the trailer) is not a power of two.
    #[error("data capacity {capacity} is not a power of two")]
    CapacityNotPowerOfTwo {
        /// Capacity of the data region in bytes.
        capacity: usize,
    },

    /// The backing region does not satisfy the required address alignment.
    #[error("buffer address {address:#x} is not {required}-byte aligned")]
    BufferMisaligned {
        /// Start address of the region.
        address: usize,
        /// Required alignment in bytes.
        required: usize,
    },

    /// Message type ids below 1 are reserved (−1 marks padding records).
    #[error("message type id {msg_type_id} must be >= 1")]
    MsgTypeId {
        /// The rejected type id.
        msg_type_id: i32,
    },

    /// Message payload is longer than the ring permits.
    #[error("message length {length} exceeds maximum {max}")]
    MsgLength {
        /// The rejected payload length.
        length: usize,
        /// Maximum payload length for the ring (capacity / 8).
        max: usize,
    },

    /// A commit/abort index is outside the data region or not at a record
    /// payload offset.
    #[error("claim index {index} is not a valid record payload offset")]
    ClaimIndex {
        /// The rejected index.
        index: usize,
    },

    /// The claimed record was already committed or aborted.
    #[error("claimed space at index {index} was already committed or aborted")]
    ClaimFinalized {
        /// Payload index of the record.
        index: usize,
    },

    /// A timer-wheel construction parameter must be a positive power of two.
    #[error("{name} of {value} must be a positive power of two")]
    NonPowerOfTwo {
        /// Parameter name.
        name: &'static str,
        /// The rejected value.
        value: i64,
    },

    /// The wheel start time cannot be moved while timers are scheduled.
    #[error("cannot reset start time with {count} active timers")]
    TimersActive {
        /// Number of live timers.
        count: usize,
    },

    /// Growing a wheel spoke would exceed the maximum wheel capacity.
    #[error("wheel capacity {capacity} exceeds maximum")]
    WheelCapacity {
        /// The capacity that was requested.
        capacity: usize,
    },

    /// A broadcast receiver was lapped by the transmitter mid-message.
    #[error("unable to keep up with broadcast buffer")]
    UnableToKeepUp,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
