use core::sync::atomic::{AtomicU32, Ordering};

use embassy_time::{Duration, Instant};

/// Period at which [`TickClock::tick`] must be called.
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

/// Monotonic time source used to bound every polling loop in the driver.
pub trait Clock {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// The point in time at which a polling loop gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after<C: Clock>(clock: &C, timeout: Duration) -> Self {
        Self(clock.now() + timeout)
    }

    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        clock.now() >= self.0
    }
}

/// Clock advanced by a periodic 10ms interrupt.
///
/// The interrupt handler calls [`TickClock::tick`]; it is the only writer, so the counter is
/// updated with plain loads and stores and works on targets without atomic read-modify-write.
/// The 32-bit tick count is extended to 64 bits by counting its wraps, so deadlines keep
/// expiring across a wrap.
#[derive(Debug, Default)]
pub struct TickClock {
    ticks: AtomicU32,
    /// Twice the number of wraps, odd while a wrap is being published
    sequence: AtomicU32,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn tick(&self) {
        let ticks = self.ticks.load(Ordering::Relaxed).wrapping_add(1);
        if ticks == 0 {
            let sequence = self.sequence.load(Ordering::Relaxed);
            self.sequence.store(sequence.wrapping_add(1), Ordering::SeqCst);
            self.ticks.store(ticks, Ordering::SeqCst);
            self.sequence.store(sequence.wrapping_add(2), Ordering::SeqCst);
        } else {
            self.ticks.store(ticks, Ordering::SeqCst);
        }
    }

    /// Low 32 bits of the tick count.
    pub fn ticks(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Ticks since the clock started, including wraps of the 32-bit counter.
    pub fn total_ticks(&self) -> u64 {
        loop {
            let before = self.sequence.load(Ordering::SeqCst);
            if before % 2 == 1 {
                continue;
            }
            let ticks = self.ticks.load(Ordering::SeqCst);
            if self.sequence.load(Ordering::SeqCst) == before {
                return (u64::from(before / 2) << 32) | u64::from(ticks);
            }
        }
    }
}

impl Clock for TickClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.total_ticks() * TICK_PERIOD.as_millis())
    }
}

/// Clock backed by the `embassy-time` driver of the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
