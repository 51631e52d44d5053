//! Delays and tick source based on the RISC-V `mcycle` counter

use cast::u32;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use riscv::register::mcycle;

use crate::time::{Hertz, Milliseconds, TickSource};

/// Machine mode cycle counter (`mcycle`) as a delay and tick provider
///
/// Implements [`DelayUs`] for the settling waits and [`TickSource`] for the
/// timeouts, which makes it a [`Timebase`](crate::time::Timebase) for
/// [`Adc`](crate::adc::Adc).
#[derive(Clone, Copy, Debug)]
pub struct McycleDelay {
    core_frequency: u32,
}

impl McycleDelay {
    /// Constructs the delay provider from the core clock frequency
    pub fn new<F: Into<Hertz>>(core_frequency: F) -> Self {
        Self {
            core_frequency: core_frequency.into().0,
        }
    }

    fn cycles_per_ms(&self) -> u64 {
        u64::from(self.core_frequency / 1_000).max(1)
    }

    fn cycles_for_us(&self, us: u64) -> u64 {
        us.saturating_mul(u64::from(self.core_frequency)) / 1_000_000
    }
}

impl TickSource for McycleDelay {
    fn now(&self) -> Milliseconds {
        // Truncation makes the tick wrap, which the timeout arithmetic expects
        Milliseconds((mcycle::read64() / self.cycles_per_ms()) as u32)
    }
}

impl DelayUs<u64> for McycleDelay {
    fn delay_us(&mut self, us: u64) {
        let t0 = mcycle::read64();
        let clocks = self.cycles_for_us(us);
        while mcycle::read64().wrapping_sub(t0) <= clocks {}
    }
}

impl DelayUs<u32> for McycleDelay {
    fn delay_us(&mut self, us: u32) {
        self.delay_us(u64::from(us))
    }
}

impl DelayUs<u16> for McycleDelay {
    fn delay_us(&mut self, us: u16) {
        self.delay_us(u32(us))
    }
}

impl DelayUs<u8> for McycleDelay {
    fn delay_us(&mut self, us: u8) {
        self.delay_us(u32(us))
    }
}

impl DelayMs<u32> for McycleDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(u64::from(ms) * 1_000);
    }
}

impl DelayMs<u16> for McycleDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.delay_ms(u32(ms));
    }
}

impl DelayMs<u8> for McycleDelay {
    fn delay_ms(&mut self, ms: u8) {
        self.delay_ms(u32(ms));
    }
}
