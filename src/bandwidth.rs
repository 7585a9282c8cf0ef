//! Outbound rate limiting consulted before every fragment send.
//!
//! The fragment sender only needs two questions answered: how long must it
//! wait before `bytes` may go out, and "these bytes went out". Any rate
//! limiter answering them can implement [`BandwidthTracker`]; [`RateTracker`]
//! is a token bucket suitable for per-peer limits.

use std::{
    num::NonZeroU64,
    rc::Rc,
    time::{Duration, Instant},
};

use crate::scheduler::Clock;

const MICROS_PER_SECOND: u128 = 1_000_000;

/// Rate limiter shared by the senders towards one peer.
pub trait BandwidthTracker {
    /// Time to wait before `bytes` may be sent. Zero means "send now".
    fn get_delay(&self, bytes: usize) -> Duration;

    /// Account for `bytes` that were handed to the transport.
    fn consume(&mut self, bytes: usize);
}

/// Token bucket refilled at a fixed byte rate.
///
/// Unused allowance accumulates for at most `max_carry`, so an idle peer can
/// burst up to `rate × max_carry` bytes. Consumption may drive the balance
/// negative; later senders then wait until it is repaid. The bucket starts
/// full.
pub struct RateTracker {
    bytes_per_second: NonZeroU64,
    max_carry: Duration,
    clock: Rc<dyn Clock>,
    balance: i128,
    last_update: Instant,
}

impl RateTracker {
    /// Create a tracker allowing `bytes_per_second`, carrying unused
    /// allowance for up to `max_carry`.
    #[must_use]
    pub fn new(bytes_per_second: NonZeroU64, max_carry: Duration, clock: Rc<dyn Clock>) -> Self {
        let last_update = clock.now();
        let mut tracker = Self {
            bytes_per_second,
            max_carry,
            clock,
            balance: 0,
            last_update,
        };
        tracker.balance = tracker.capacity();
        tracker
    }

    /// Configured rate.
    #[must_use]
    pub const fn bytes_per_second(&self) -> NonZeroU64 { self.bytes_per_second }

    /// Bytes that may be sent right now without waiting.
    #[must_use]
    pub fn available(&self) -> i128 { self.balance_at(self.clock.now()) }

    fn capacity(&self) -> i128 {
        let carry = self.max_carry.as_micros() * u128::from(self.bytes_per_second.get());
        i128::try_from(carry / MICROS_PER_SECOND).unwrap_or(i128::MAX)
    }

    fn balance_at(&self, now: Instant) -> i128 {
        let elapsed = now.saturating_duration_since(self.last_update).as_micros();
        let earned = elapsed * u128::from(self.bytes_per_second.get()) / MICROS_PER_SECOND;
        let earned = i128::try_from(earned).unwrap_or(i128::MAX);
        self.balance.saturating_add(earned).min(self.capacity())
    }
}

impl BandwidthTracker for RateTracker {
    fn get_delay(&self, bytes: usize) -> Duration {
        let requested = i128::try_from(bytes).unwrap_or(i128::MAX);
        let deficit = requested.saturating_sub(self.balance_at(self.clock.now()));
        if deficit <= 0 {
            return Duration::ZERO;
        }
        let deficit = u128::try_from(deficit).unwrap_or(u128::MAX);
        let rate = u128::from(self.bytes_per_second.get());
        let micros = (deficit * MICROS_PER_SECOND).div_ceil(rate);
        Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
    }

    fn consume(&mut self, bytes: usize) {
        let now = self.clock.now();
        self.balance = self.balance_at(now);
        self.last_update = now;
        let spent = i128::try_from(bytes).unwrap_or(i128::MAX);
        self.balance = self.balance.saturating_sub(spent);
    }
}
