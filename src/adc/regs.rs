//! Register access capability
//!
//! [`Registers`] is the narrow set of field accessors the state machine
//! needs from one ADC instance and its common block. Accessors never fail:
//! argument validity and sequencing are the caller's job. The
//! memory-mapped implementation lives in [`mmio`](super::mmio); tests use a
//! behavioural model.

use super::calibration::{CalibrationFactor, CalibrationMode};
use super::config::{
    ChannelConfig, Config, InjectedConfig, InternalChannels, LowPowerConfig, MultimodeConfig,
    OffsetConfig, OversamplingConfig, PostProcessingConfig, RegularConfig, WatchdogConfig,
};
use super::Group;

/// Identity of a physical ADC instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u8);

bitflags::bitflags! {
    /// Hardware event flags
    ///
    /// The same bit positions are used for the status and the interrupt
    /// enable register.
    //
    // Refer to RM0433 Rev 6 - Chapter 25.6.1
    pub struct Event: u32 {
        /// Analog core ready
        const READY = 1 << 0;
        /// End of sampling phase (regular)
        const END_OF_SAMPLING = 1 << 1;
        /// End of one regular conversion
        const EOC = 1 << 2;
        /// End of the regular sequence
        const EOS = 1 << 3;
        /// Regular data overrun
        const OVERRUN = 1 << 4;
        /// End of one injected conversion
        const JEOC = 1 << 5;
        /// End of the injected sequence
        const JEOS = 1 << 6;
        /// Analog watchdog 1
        const AWD1 = 1 << 7;
        /// Analog watchdog 2
        const AWD2 = 1 << 8;
        /// Analog watchdog 3
        const AWD3 = 1 << 9;

        /// Regular group events
        const REGULAR = Self::END_OF_SAMPLING.bits
            | Self::EOC.bits
            | Self::EOS.bits
            | Self::OVERRUN.bits;
        /// Injected group events
        const INJECTED = Self::JEOC.bits | Self::JEOS.bits;
        /// Analog watchdog events
        const WATCHDOG = Self::AWD1.bits | Self::AWD2.bits | Self::AWD3.bits;
    }
}

impl Event {
    /// End-of-conversion and end-of-sequence flags of `group`
    pub fn end_of_conversion(group: Group) -> (Event, Event) {
        match group {
            Group::Regular => (Event::EOC, Event::EOS),
            Group::Injected => (Event::JEOC, Event::JEOS),
        }
    }
}

/// Peripheral-side data transfer management
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataTransfer {
    /// Results stay in the data register
    None,
    /// DMA requests stop after the channel's last transfer
    Limited,
    /// DMA requests continue for a circular channel
    Unlimited,
}

/// Field accessors of one ADC instance and its common block
pub trait Registers {
    /// Physical instance behind these registers
    fn instance(&self) -> InstanceId;

    /// Deep power down state
    fn is_deep_power_down(&self) -> bool;
    /// Enters or leaves deep power down
    fn set_deep_power_down(&mut self, enable: bool);
    /// Internal voltage regulator state
    fn is_regulator_enabled(&self) -> bool;
    /// Switches the internal voltage regulator
    fn set_regulator(&mut self, enable: bool);

    /// Enable bit
    fn is_enabled(&self) -> bool;
    /// Requests the analog core to enable
    fn enable(&mut self);
    /// Requests the analog core to disable
    fn disable(&mut self);
    /// A disable request has not completed yet
    fn is_disable_ongoing(&self) -> bool;

    /// Starts self-calibration; the core must be disabled
    fn start_calibration(&mut self, mode: CalibrationMode);
    /// Self-calibration running
    fn is_calibration_ongoing(&self) -> bool;
    /// Stored calibration factors
    fn calibration_factor(&self) -> CalibrationFactor;
    /// Overwrites the stored calibration factors
    fn set_calibration_factor(&mut self, factor: CalibrationFactor);

    /// Issues the start command of `group`
    fn start_conversion(&mut self, group: Group);
    /// Issues the stop command of `group`
    fn stop_conversion(&mut self, group: Group);
    /// Start bit of `group`, set while conversions may still be triggered
    fn is_conversion_ongoing(&self, group: Group) -> bool;
    /// Stop bit of `group`, set until the stop command completed
    fn is_stop_ongoing(&self, group: Group) -> bool;

    /// Raw event flags
    fn flags(&self) -> Event;
    /// Clears event flags
    fn clear_flags(&mut self, events: Event);
    /// Enabled event interrupts
    fn interrupts(&self) -> Event;
    /// Enables event interrupts
    fn enable_interrupts(&mut self, events: Event);
    /// Disables event interrupts
    fn disable_interrupts(&mut self, events: Event);

    /// Selects the data transfer management of the regular group
    fn set_data_transfer(&mut self, mode: DataTransfer);
    /// Current data transfer management
    fn data_transfer(&self) -> DataTransfer;
    /// Bus address of the regular data register
    fn data_address(&self) -> usize;
    /// Regular data register
    fn read_regular_data(&self) -> u32;
    /// Injected data register of `rank` (1..=4)
    fn read_injected_data(&self, rank: u8) -> u32;

    /// Applies the instance-wide configuration
    fn write_config(&mut self, config: &Config);
    /// Applies the regular group configuration
    fn write_regular_config(&mut self, config: &RegularConfig);
    /// Applies the injected group configuration
    fn write_injected_config(&mut self, config: &InjectedConfig);
    /// Places a channel in a sequencer
    fn write_channel_config(&mut self, config: &ChannelConfig);
    /// Applies post-processing
    fn write_post_processing(&mut self, config: &PostProcessingConfig);
    /// Applies low-power features
    fn write_low_power(&mut self, config: &LowPowerConfig);
    /// Applies an analog watchdog configuration
    fn write_watchdog(&mut self, config: &WatchdogConfig);
    /// Applies oversampling
    fn write_oversampling(&mut self, config: &OversamplingConfig);
    /// Applies one offset slot
    fn write_offset(&mut self, config: &OffsetConfig);

    /// Enabled internal measurement paths (common block)
    fn internal_channels(&self) -> InternalChannels;
    /// Enables internal measurement paths (common block)
    fn set_internal_channels(&mut self, channels: InternalChannels);
    /// Applies the dual-instance configuration (common block)
    fn write_multimode(&mut self, config: &MultimodeConfig);
    /// Bus address of the common data register
    fn common_data_address(&self) -> usize;
    /// Common data register
    fn read_common_data(&self) -> u32;
}
