//! Hierarchical deadline timer wheel with O(1) schedule and cancel.
//!
//! Time is divided into power-of-two ticks laid out on a circular array of
//! spokes. Each spoke owns a flat run of 64-bit deadline cells; a spoke that
//! fills doubles the per-spoke allocation in place. Polling drains the
//! current spoke and advances at most one tick per call, so a caller catching
//! up after a stall pays `O(ticks_advanced + expired)` across its polls.

use crate::bits::is_power_of_two;
use crate::error::{Error, Result};

/// Sentinel stored in an empty deadline cell.
pub const NULL_DEADLINE: i64 = -1;

/// Default number of deadline cells allocated per spoke.
pub const INITIAL_TICK_ALLOCATION: usize = 16;

/// Growing a spoke may not push the wheel past this many cells.
const MAX_WHEEL_CAPACITY: usize = 1 << 30;

/// Unit tag carried through to expiry handlers; the wheel itself only does
/// integer arithmetic in whatever unit the caller chose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

/// Deadline scheduler over a circular array of ticks.
///
/// Owned by a single scheduling thread; operations take `&mut self` and no
/// internal synchronisation exists or is needed.
#[derive(Debug)]
pub struct DeadlineTimerWheel {
    time_unit: TimeUnit,
    start_time: i64,
    tick_resolution: i64,
    current_tick: i64,
    timer_count: usize,
    ticks_per_wheel: usize,
    tick_mask: i64,
    resolution_bits_to_shift: u32,
    allocation_bits_to_shift: u32,
    tick_allocation: usize,
    poll_index: usize,
    wheel: Box<[i64]>,
}

impl DeadlineTimerWheel {
    /// Construct a wheel with the default per-spoke allocation.
    ///
    /// `tick_resolution` and `ticks_per_wheel` must be positive powers of two
    /// in the chosen unit.
    pub fn new(
        time_unit: TimeUnit,
        start_time: i64,
        tick_resolution: i64,
        ticks_per_wheel: usize,
    ) -> Result<Self> {
        Self::with_allocation(
            time_unit,
            start_time,
            tick_resolution,
            ticks_per_wheel,
            INITIAL_TICK_ALLOCATION,
        )
    }

    /// Construct a wheel with an explicit initial per-spoke allocation
    /// (must be a power of two).
    pub fn with_allocation(
        time_unit: TimeUnit,
        start_time: i64,
        tick_resolution: i64,
        ticks_per_wheel: usize,
        initial_tick_allocation: usize,
    ) -> Result<Self> {
        if tick_resolution <= 0 || !is_power_of_two(tick_resolution as usize) {
            return Err(Error::NonPowerOfTwo {
                name: "tick resolution",
                value: tick_resolution,
            });
        }
        if !is_power_of_two(ticks_per_wheel) {
            return Err(Error::NonPowerOfTwo {
                name: "ticks per wheel",
                value: ticks_per_wheel as i64,
            });
        }
        if !is_power_of_two(initial_tick_allocation) {
            return Err(Error::NonPowerOfTwo {
                name: "tick allocation",
                value: initial_tick_allocation as i64,
            });
        }

        Ok(Self {
            time_unit,
            start_time,
            tick_resolution,
            current_tick: 0,
            timer_count: 0,
            ticks_per_wheel,
            tick_mask: ticks_per_wheel as i64 - 1,
            resolution_bits_to_shift: tick_resolution.trailing_zeros(),
            allocation_bits_to_shift: initial_tick_allocation.trailing_zeros(),
            tick_allocation: initial_tick_allocation,
            poll_index: 0,
            wheel: vec![NULL_DEADLINE; ticks_per_wheel * initial_tick_allocation]
                .into_boxed_slice(),
        })
    }

    /// Unit the wheel was constructed with.
    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    /// Time of the first tick.
    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    /// Duration of one tick.
    pub fn tick_resolution(&self) -> i64 {
        self.tick_resolution
    }

    /// Number of spokes on the wheel.
    pub fn ticks_per_wheel(&self) -> usize {
        self.ticks_per_wheel
    }

    /// Number of live timers.
    pub fn timer_count(&self) -> usize {
        self.timer_count
    }

    /// End of the tick currently being polled.
    pub fn current_tick_time(&self) -> i64 {
        ((self.current_tick + 1) << self.resolution_bits_to_shift) + self.start_time
    }

    /// Advance the current tick to cover `time`, rounding up to the next tick
    /// boundary. The tick never moves backwards.
    pub fn advance_current_tick_time(&mut self, time: i64) {
        let ticks =
            (time - self.start_time + self.tick_resolution - 1) >> self.resolution_bits_to_shift;
        self.current_tick = self.current_tick.max(ticks);
    }

    /// Move the wheel to a new start time.
    ///
    /// Fails with [`Error::TimersActive`] unless the wheel is empty.
    pub fn reset_start_time(&mut self, start_time: i64) -> Result<()> {
        if self.timer_count > 0 {
            return Err(Error::TimersActive {
                count: self.timer_count,
            });
        }
        self.start_time = start_time;
        self.current_tick = 0;
        self.poll_index = 0;
        Ok(())
    }

    /// Schedule a timer for `deadline`; a deadline already in the past lands
    /// in the current spoke and fires on the next poll that covers it.
    ///
    /// Returns the timer id, stable until the cell is reused after expiry or
    /// cancellation.
    pub fn schedule_timer(&mut self, deadline: i64) -> Result<i64> {
        let deadline_ticks = (deadline - self.start_time) >> self.resolution_bits_to_shift;
        let ticks = deadline_ticks.max(self.current_tick);
        let spoke_index = (ticks & self.tick_mask) as usize;
        let lane_start = spoke_index << self.allocation_bits_to_shift;

        for cell_index in 0..self.tick_allocation {
            let index = lane_start + cell_index;
            if self.wheel[index] == NULL_DEADLINE {
                self.wheel[index] = deadline;
                self.timer_count += 1;
                return Ok(timer_id_for_slot(spoke_index, cell_index));
            }
        }

        self.increase_capacity(deadline, spoke_index)
    }

    /// Cancel a live timer. Returns false if the id no longer names one.
    pub fn cancel_timer(&mut self, timer_id: i64) -> bool {
        let spoke_index = spoke_for_timer_id(timer_id);
        let cell_index = cell_for_timer_id(timer_id);

        if spoke_index >= self.ticks_per_wheel || cell_index >= self.tick_allocation {
            return false;
        }

        let index = (spoke_index << self.allocation_bits_to_shift) + cell_index;
        if self.wheel[index] != NULL_DEADLINE {
            self.wheel[index] = NULL_DEADLINE;
            self.timer_count -= 1;
            return true;
        }

        false
    }

    /// Drain expired timers for `now`, up to `expiry_limit` of them.
    ///
    /// The handler receives `(time_unit, now, timer_id)` and returns whether
    /// it consumed the expiry; returning false keeps the timer for
    /// redelivery and ends the drain. The cell is cleared before the handler
    /// runs, so a panicking handler still consumes its timer.
    pub fn poll<F>(&mut self, now: i64, mut handler: F, expiry_limit: usize) -> usize
    where
        F: FnMut(TimeUnit, i64, i64) -> bool,
    {
        let mut timers_expired = 0;

        if self.timer_count > 0 {
            let spoke_index = (self.current_tick & self.tick_mask) as usize;

            for _ in 0..self.tick_allocation {
                if timers_expired >= expiry_limit {
                    break;
                }

                let index = (spoke_index << self.allocation_bits_to_shift) + self.poll_index;
                let deadline = self.wheel[index];

                if deadline != NULL_DEADLINE && deadline <= now {
                    self.wheel[index] = NULL_DEADLINE;
                    self.timer_count -= 1;

                    if !handler(
                        self.time_unit,
                        now,
                        timer_id_for_slot(spoke_index, self.poll_index),
                    ) {
                        // Not consumed: restore and resume here next poll.
                        self.wheel[index] = deadline;
                        self.timer_count += 1;
                        return timers_expired;
                    }

                    timers_expired += 1;
                }

                self.poll_index = if self.poll_index + 1 >= self.tick_allocation {
                    0
                } else {
                    self.poll_index + 1
                };
            }

            if timers_expired < expiry_limit && self.current_tick_time() <= now {
                self.current_tick += 1;
                self.poll_index = 0;
            }
        } else if self.current_tick_time() <= now {
            self.current_tick += 1;
            self.poll_index = 0;
        }

        timers_expired
    }

    /// Deadline of a live timer, or `None` if the id names no timer.
    pub fn deadline(&self, timer_id: i64) -> Option<i64> {
        let spoke_index = spoke_for_timer_id(timer_id);
        let cell_index = cell_for_timer_id(timer_id);

        if spoke_index >= self.ticks_per_wheel || cell_index >= self.tick_allocation {
            return None;
        }

        let deadline = self.wheel[(spoke_index << self.allocation_bits_to_shift) + cell_index];
        (deadline != NULL_DEADLINE).then_some(deadline)
    }

    /// Visit every live timer as `(deadline, timer_id)` in unspecified order.
    pub fn for_each<F>(&self, mut handler: F)
    where
        F: FnMut(i64, i64),
    {
        let mut timers_remaining = self.timer_count;
        for (index, &deadline) in self.wheel.iter().enumerate() {
            if timers_remaining == 0 {
                break;
            }
            if deadline != NULL_DEADLINE {
                handler(
                    deadline,
                    timer_id_for_slot(
                        index >> self.allocation_bits_to_shift,
                        index & (self.tick_allocation - 1),
                    ),
                );
                timers_remaining -= 1;
            }
        }
    }

    /// Cancel everything.
    pub fn clear(&mut self) {
        self.wheel.fill(NULL_DEADLINE);
        self.timer_count = 0;
    }

    /// Double the per-spoke allocation, keeping every cell in its spoke, and
    /// place `deadline` in the first new cell of `spoke_index`.
    fn increase_capacity(&mut self, deadline: i64, spoke_index: usize) -> Result<i64> {
        let new_tick_allocation = self.tick_allocation << 1;
        let new_allocation_bits_to_shift = new_tick_allocation.trailing_zeros();
        let new_capacity = self.ticks_per_wheel << new_allocation_bits_to_shift;
        if new_capacity > MAX_WHEEL_CAPACITY {
            return Err(Error::WheelCapacity {
                capacity: new_capacity,
            });
        }

        let mut new_wheel = vec![NULL_DEADLINE; new_capacity].into_boxed_slice();
        for spoke in 0..self.ticks_per_wheel {
            let old_start = spoke << self.allocation_bits_to_shift;
            let new_start = spoke << new_allocation_bits_to_shift;
            new_wheel[new_start..new_start + self.tick_allocation]
                .copy_from_slice(&self.wheel[old_start..old_start + self.tick_allocation]);
        }

        let cell_index = self.tick_allocation;
        new_wheel[(spoke_index << new_allocation_bits_to_shift) + cell_index] = deadline;
        self.timer_count += 1;

        self.tick_allocation = new_tick_allocation;
        self.allocation_bits_to_shift = new_allocation_bits_to_shift;
        self.wheel = new_wheel;

        Ok(timer_id_for_slot(spoke_index, cell_index))
    }
}

/// Timer ids carry the spoke in the high word and the cell in the low word.
#[inline]
const fn timer_id_for_slot(spoke_index: usize, cell_index: usize) -> i64 {
    ((spoke_index as i64) << 32) | cell_index as i64
}

#[inline]
const fn spoke_for_timer_id(timer_id: i64) -> usize {
    (timer_id >> 32) as usize
}

#[inline]
const fn cell_for_timer_id(timer_id: i64) -> usize {
    timer_id as u32 as usize
}
