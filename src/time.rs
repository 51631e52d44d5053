//! Time units, tick source and bounded busy-waits

use embedded_hal::blocking::delay::DelayUs;

/// Hertz
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hertz(pub u32);

/// Megahertz
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MegaHertz(pub u32);

/// Milliseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Milliseconds(pub u32);

/// Microseconds
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Microseconds(pub u32);

impl Milliseconds {
    /// A budget that never expires
    pub const FOREVER: Milliseconds = Milliseconds(u32::MAX);

    /// Time elapsed from `earlier` to `self` on a wrapping millisecond counter
    pub fn elapsed_since(self, earlier: Milliseconds) -> Milliseconds {
        Milliseconds(self.0.wrapping_sub(earlier.0))
    }
}

impl From<MegaHertz> for Hertz {
    fn from(val: MegaHertz) -> Self {
        Hertz(val.0 * 1_000_000)
    }
}

impl From<Milliseconds> for Microseconds {
    /// Saturates at `u32::MAX` microseconds
    fn from(val: Milliseconds) -> Self {
        Microseconds(cast::u32(u64::from(val.0) * 1_000).unwrap_or(u32::MAX))
    }
}

/// Extension trait that adds convenience methods to the `u32` type
pub trait U32Ext {
    /// Wrap in `Hertz`
    fn hz(self) -> Hertz;

    /// Wrap in `MegaHertz`
    fn mhz(self) -> MegaHertz;

    /// Wrap in `Milliseconds`
    fn ms(self) -> Milliseconds;

    /// Wrap in `Microseconds`
    fn us(self) -> Microseconds;
}

impl U32Ext for u32 {
    fn hz(self) -> Hertz {
        Hertz(self)
    }

    fn mhz(self) -> MegaHertz {
        MegaHertz(self)
    }

    fn ms(self) -> Milliseconds {
        Milliseconds(self)
    }

    fn us(self) -> Microseconds {
        Microseconds(self)
    }
}

/// Monotonically increasing millisecond counter
///
/// The counter may wrap; every timeout computation is done as
/// `now - start > budget` in wrapping arithmetic.
pub trait TickSource {
    /// Current tick
    fn now(&self) -> Milliseconds;
}

/// Everything the driver needs from the platform's notion of time: a tick
/// source for timeouts and a blocking microsecond delay for settling times.
pub trait Timebase: TickSource + DelayUs<u32> {}

impl<T> Timebase for T where T: TickSource + DelayUs<u32> {}

/// The budget of a [`wait_until`] ran out
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Expired;

/// Busy-wait until `done` returns `true` or `budget` elapses on `tick`
///
/// `done` is evaluated once more after the budget has run out, so a
/// condition that became true while the caller was preempted right at the
/// deadline is still reported as success.
pub fn wait_until<T, F>(tick: &T, budget: Milliseconds, mut done: F) -> Result<(), Expired>
where
    T: TickSource + ?Sized,
    F: FnMut() -> bool,
{
    let start = tick.now();
    while !done() {
        if tick.now().elapsed_since(start) > budget {
            return if done() { Ok(()) } else { Err(Expired) };
        }
    }
    Ok(())
}
