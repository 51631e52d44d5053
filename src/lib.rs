//! HAL core for ADC peripherals
//!
//! This crate drives the operational lifecycle of an ADC: activation,
//! calibration, conversion sequencing on the regular and injected groups,
//! master/slave multimode synchronization and DMA delivery of results.
//!
//! Register access, the data-transfer channel and the tick source are
//! consumed through traits ([`adc::Registers`], [`dma::TransferChannel`],
//! [`time::Timebase`]), so the same state machine runs on any part that
//! provides them. [`adc::mmio::Mmio`] implements the register capability
//! for the STM32H7-class register layout and [`delay::McycleDelay`]
//! implements the timebase from the RISC-V `mcycle` counter.

#![deny(missing_docs)]
#![cfg_attr(not(test), no_std)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub use embedded_hal as hal;
pub use nb;
pub use nb::block;

pub mod adc;
pub mod delay;
pub mod dma;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;
