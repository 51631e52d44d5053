//! Activation and deactivation of the analog core
//
// Refer to RM0433 Rev 6 - Chapters 25.4.6 and 25.4.9

use crate::dma::TransferChannel;
use crate::time::{wait_until, Milliseconds, Timebase};

use super::state::{require, transition};
use super::{
    Adc, Callbacks, Error, ErrorCode, Event, GlobalState, Group, GroupState, InternalChannels,
    Registers, Result,
};

/// Settling time of the internal voltage regulator
pub const REGULATOR_STABILIZATION_US: u32 = 10;
/// Settling time of the internal voltage reference path
pub const VREFINT_STABILIZATION_US: u32 = 5;
/// Settling time of the temperature sensor
pub const TEMPSENSOR_STABILIZATION_US: u32 = 26;

/// Budget for the ready flag after an enable request
pub const ENABLE_TIMEOUT: Milliseconds = Milliseconds(2);
/// Budget for the core to report disabled
pub const DISABLE_TIMEOUT: Milliseconds = Milliseconds(2);
/// Budget for a group's stop command to take effect
pub const STOP_TIMEOUT: Milliseconds = Milliseconds(2);

impl<R, T, C, D> Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Powers the analog core up and makes it ready to convert
    ///
    /// `Idle -> Active`. On failure the handle stays `Idle`.
    pub fn start(&mut self) -> Result<()> {
        require(self.state, &[GlobalState::Idle])?;

        transition(&mut self.state, GlobalState::Active)?;
        if let Err(e) = self.activate() {
            self.state = GlobalState::Idle;
            return Err(e);
        }
        info!("adc{}: started", self.instance().0);
        Ok(())
    }

    /// Disables the analog core and powers it down
    ///
    /// Both groups must be idle. Also accepted from `Calibrating`, the state
    /// a failed [`calibrate`](Adc::calibrate) leaves behind. On failure the
    /// previous state is kept.
    pub fn stop(&mut self) -> Result<()> {
        require(self.state, &[GlobalState::Active, GlobalState::Calibrating])?;
        self.no_group_active()?;

        let previous = self.state;
        transition(&mut self.state, GlobalState::Idle)?;
        if let Err(e) = self.deactivate() {
            self.state = previous;
            return Err(e);
        }
        info!("adc{}: stopped", self.instance().0);
        Ok(())
    }

    /// Enables the analog core
    ///
    /// Does nothing if the core is already enabled.
    pub(crate) fn activate(&mut self) -> Result<()> {
        if self.regs.is_enabled() {
            return Ok(());
        }

        if self.regs.is_deep_power_down() {
            self.regs.set_deep_power_down(false);
        }
        if !self.regs.is_regulator_enabled() {
            self.regs.set_regulator(true);
            self.timebase.delay_us(REGULATOR_STABILIZATION_US);
        }

        if self.control_conflict() {
            warn!("adc{}: enable rejected, control bits pending", self.instance().0);
            self.last_error |= ErrorCode::INTERNAL;
            return Err(Error::Busy);
        }

        self.regs.clear_flags(Event::READY);
        self.regs.enable();

        let regs = &mut self.regs;
        wait_until(&self.timebase, ENABLE_TIMEOUT, || {
            if regs.flags().contains(Event::READY) {
                return true;
            }
            // The enable bit can be cleared by hardware right after a
            // calibration; assert it again until the core reports ready.
            if !regs.is_enabled() {
                regs.enable();
            }
            false
        })
        .map_err(|_| {
            warn!("adc{}: ready flag timeout", self.regs.instance().0);
            Error::Timeout
        })?;
        self.regs.clear_flags(Event::READY);

        let internal = self.regs.internal_channels();
        let settle = if internal.contains(InternalChannels::TEMPSENSOR) {
            TEMPSENSOR_STABILIZATION_US
        } else if internal.contains(InternalChannels::VREFINT) {
            VREFINT_STABILIZATION_US
        } else {
            0
        };
        if settle > 0 {
            self.timebase.delay_us(settle);
        }

        Ok(())
    }

    /// Disables the analog core
    ///
    /// Does nothing if the core is disabled or a disable is in progress.
    /// Outside of a calibration the core is also powered down.
    pub(crate) fn deactivate(&mut self) -> Result<()> {
        if !self.regs.is_enabled() || self.regs.is_disable_ongoing() {
            return Ok(());
        }

        if Group::ALL.iter().any(|g| self.regs.is_conversion_ongoing(*g)) {
            warn!("adc{}: disable rejected, conversion ongoing", self.instance().0);
            return Err(Error::Busy);
        }

        self.regs.disable();
        let regs = &self.regs;
        wait_until(&self.timebase, DISABLE_TIMEOUT, || !regs.is_enabled()).map_err(|_| {
            warn!("adc{}: disable timeout", regs.instance().0);
            Error::Timeout
        })?;

        if self.state != GlobalState::Calibrating {
            self.regs.set_regulator(false);
            self.regs.set_deep_power_down(true);
        }

        Ok(())
    }

    /// Any request that must complete before the core may be enabled
    fn control_conflict(&self) -> bool {
        self.regs.is_calibration_ongoing()
            || self.regs.is_disable_ongoing()
            || Group::ALL
                .iter()
                .any(|g| self.regs.is_conversion_ongoing(*g) || self.regs.is_stop_ongoing(*g))
    }

    /// Stops `group` in hardware and waits for the stop to take effect
    pub(crate) fn stop_hw(&mut self, group: Group) -> Result<()> {
        if !self.regs.is_conversion_ongoing(group) {
            return Ok(());
        }

        self.regs.stop_conversion(group);
        let regs = &self.regs;
        wait_until(&self.timebase, STOP_TIMEOUT, || {
            !regs.is_stop_ongoing(group) && !regs.is_conversion_ongoing(group)
        })
        .map_err(|_| {
            warn!("adc{}: {:?} stop timeout", regs.instance().0, group);
            Error::Timeout
        })
    }

    pub(crate) fn group_idle_or_reset(&self) -> Result<()> {
        for group in Group::ALL {
            require(
                self.groups[group.index()],
                &[GroupState::Reset, GroupState::Idle],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{active_adc, configured_adc};

    #[test]
    fn start_powers_up_and_enables() {
        let (mut adc, hw) = configured_adc(1);
        assert_eq!(adc.start(), Ok(()));
        assert_eq!(adc.state(), GlobalState::Active);

        let hw = hw.hw();
        assert!(!hw.deep_power_down);
        assert!(hw.regulator);
        assert!(hw.enabled);
        assert_eq!(hw.enable_requests, 1);
        assert!(hw.delays.contains(&REGULATOR_STABILIZATION_US));
    }

    #[test]
    fn start_then_stop_restores_idle() {
        let (mut adc, hw) = configured_adc(1);
        let before = [adc.group_state(Group::Regular), adc.group_state(Group::Injected)];

        adc.start().unwrap();
        assert_eq!(adc.stop(), Ok(()));

        assert_eq!(adc.state(), GlobalState::Idle);
        assert_eq!(
            [adc.group_state(Group::Regular), adc.group_state(Group::Injected)],
            before
        );
        let hw = hw.hw();
        assert!(!hw.enabled);
        assert!(hw.deep_power_down);
        assert!(!hw.regulator);
    }

    #[test]
    fn start_requires_idle() {
        let (mut adc, _hw) = active_adc(1);
        assert_eq!(adc.start(), Err(Error::InvalidState));
        assert_eq!(adc.state(), GlobalState::Active);
    }

    #[test]
    fn activate_is_noop_when_enabled() {
        let (mut adc, hw) = active_adc(1);
        let requests = hw.hw().enable_requests;
        assert_eq!(adc.activate(), Ok(()));
        assert_eq!(hw.hw().enable_requests, requests);
    }

    #[test]
    fn ready_timeout_keeps_idle() {
        let (mut adc, hw) = configured_adc(1);
        hw.hw().never_ready = true;
        assert_eq!(adc.start(), Err(Error::Timeout));
        assert_eq!(adc.state(), GlobalState::Idle);
    }

    #[test]
    fn enable_is_reasserted_when_dropped() {
        let (mut adc, hw) = configured_adc(1);
        hw.hw().drop_next_enable = true;
        assert_eq!(adc.start(), Ok(()));
        assert_eq!(hw.hw().enable_requests, 2);
    }

    #[test]
    fn conflicting_bits_reject_enable() {
        let (mut adc, hw) = configured_adc(1);
        hw.hw().calibrating = Some(u32::MAX);
        assert_eq!(adc.start(), Err(Error::Busy));
        assert_eq!(adc.state(), GlobalState::Idle);
        assert!(adc.last_error_codes().contains(ErrorCode::INTERNAL));
        assert_eq!(hw.hw().enable_requests, 0);
    }

    #[test]
    fn internal_channels_add_settling_delay() {
        let (mut adc, hw) = configured_adc(1);
        adc.set_internal_channels(InternalChannels::TEMPSENSOR | InternalChannels::VREFINT)
            .unwrap();
        adc.start().unwrap();
        assert!(hw.hw().delays.contains(&TEMPSENSOR_STABILIZATION_US));
        assert!(!hw.hw().delays.contains(&VREFINT_STABILIZATION_US));
    }

    #[test]
    fn stop_rejected_while_group_active() {
        let (mut adc, _hw) = active_adc(1);
        adc.reg_start_conv().unwrap();
        assert_eq!(adc.stop(), Err(Error::InvalidState));
        assert_eq!(adc.state(), GlobalState::Active);
    }

    #[test]
    fn deactivate_rejects_ongoing_conversion() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().ongoing[1] = true;
        assert_eq!(adc.stop(), Err(Error::Busy));
        assert_eq!(adc.state(), GlobalState::Active);
        assert!(hw.hw().enabled);
    }

    #[test]
    fn disable_timeout_keeps_active() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().never_disable = true;
        assert_eq!(adc.stop(), Err(Error::Timeout));
        assert_eq!(adc.state(), GlobalState::Active);
    }

    #[test]
    fn deactivate_skips_pending_disable() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().never_disable = true;
        hw.hw().disabling = true;
        assert_eq!(adc.deactivate(), Ok(()));
        assert_eq!(hw.hw().disable_requests, 0);
    }
}
