//! Self-calibration
//
// Refer to RM0433 Rev 6 - Chapter 25.4.8

use crate::dma::TransferChannel;
use crate::time::{wait_until, Milliseconds, Timebase};

use super::state::{require, transition};
use super::{Adc, Callbacks, Error, GlobalState, Group, Registers, Result};

/// Budget for a self-calibration
///
/// Covers the slowest ADC kernel clock and prescaler combination.
pub const CALIBRATION_TIMEOUT: Milliseconds = Milliseconds(300);

/// CPU spin iterations between the end of a calibration and the next enable
/// request; an enable issued immediately afterwards can be ignored by the
/// hardware.
pub const POST_CALIBRATION_DELAY_CYCLES: u32 = 128;

/// What the calibration compensates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationMode {
    /// Offset of single-ended inputs
    SingleEnded,
    /// Offset of differential inputs
    Differential,
    /// Offset and linearity of single-ended inputs
    SingleEndedLinearity,
}

impl Default for CalibrationMode {
    fn default() -> Self {
        CalibrationMode::SingleEnded
    }
}

/// Stored offset correction values
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalibrationFactor {
    /// Correction for single-ended inputs (11 bits)
    pub single_ended: u16,
    /// Correction for differential inputs (11 bits)
    pub differential: u16,
}

impl CalibrationFactor {
    /// Largest value of either factor
    pub const MAX: u16 = (1 << 11) - 1;
}

impl<R, T, C, D> Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Runs a hardware self-calibration
    ///
    /// Requires `Active` with both groups idle. The core is disabled,
    /// calibrated and enabled again. On success the handle is back in
    /// `Active`; on failure it stays in `Calibrating`, from where
    /// [`stop`](Adc::stop) or a new attempt is possible.
    pub fn calibrate(&mut self, mode: CalibrationMode) -> Result<()> {
        require(self.state, &[GlobalState::Active])?;
        self.group_idle_or_reset()?;

        transition(&mut self.state, GlobalState::Calibrating)?;
        self.deactivate()?;

        self.regs.start_calibration(mode);
        let regs = &self.regs;
        wait_until(&self.timebase, CALIBRATION_TIMEOUT, || {
            !regs.is_calibration_ongoing()
        })
        .map_err(|_| {
            warn!("adc{}: calibration timeout", regs.instance().0);
            Error::Timeout
        })?;

        for _ in 0..POST_CALIBRATION_DELAY_CYCLES {
            core::hint::spin_loop();
        }

        self.activate()?;
        transition(&mut self.state, GlobalState::Active)?;
        debug!(
            "adc{}: calibrated {:?}, factor {:?}",
            self.instance().0,
            mode,
            self.regs.calibration_factor()
        );
        Ok(())
    }

    /// Reads the stored calibration factors
    pub fn calibration_factor(&mut self) -> Result<CalibrationFactor> {
        self.with_quiescent_core(|regs| Ok(regs.calibration_factor()))
    }

    /// Overwrites the stored calibration factors
    ///
    /// Returns `InvalidParam` if a factor does not fit in 11 bits.
    pub fn set_calibration_factor(&mut self, factor: CalibrationFactor) -> Result<()> {
        if factor.single_ended > CalibrationFactor::MAX
            || factor.differential > CalibrationFactor::MAX
        {
            return Err(Error::InvalidParam);
        }
        self.with_quiescent_core(|regs| {
            regs.set_calibration_factor(factor);
            Ok(())
        })
    }

    /// Runs `f` inside a `Calibrating` bracket with no conversion ongoing
    fn with_quiescent_core<F, U>(&mut self, f: F) -> Result<U>
    where
        F: FnOnce(&mut R) -> Result<U>,
    {
        require(self.state, &[GlobalState::Active])?;
        self.group_idle_or_reset()?;
        if Group::ALL.iter().any(|g| self.regs.is_conversion_ongoing(*g)) {
            return Err(Error::Busy);
        }

        transition(&mut self.state, GlobalState::Calibrating)?;
        let res = f(&mut self.regs);
        transition(&mut self.state, GlobalState::Active)?;
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{ErrorCode, GroupState};
    use crate::testing::{active_adc, configured_adc};

    #[test]
    fn calibration_brackets_disable_and_enable() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().calibration_polls = 5;
        let enables = hw.hw().enable_requests;

        assert_eq!(adc.calibrate(CalibrationMode::SingleEndedLinearity), Ok(()));
        assert_eq!(adc.state(), GlobalState::Active);

        let hw = hw.hw();
        assert_eq!(hw.calibration_mode, Some(CalibrationMode::SingleEndedLinearity));
        assert_eq!(hw.disable_requests, 1);
        assert_eq!(hw.enable_requests, enables + 1);
        assert!(hw.enabled);
        // The regulator stays on across the calibration
        assert!(hw.regulator);
        assert!(!hw.deep_power_down);
    }

    #[test]
    fn calibration_requires_active() {
        let (mut adc, _hw) = configured_adc(1);
        assert_eq!(
            adc.calibrate(CalibrationMode::SingleEnded),
            Err(Error::InvalidState)
        );
        assert_eq!(adc.state(), GlobalState::Idle);
    }

    #[test]
    fn calibration_rejected_while_group_active() {
        let (mut adc, hw) = active_adc(1);
        adc.inj_start_conv().unwrap();
        assert_eq!(
            adc.calibrate(CalibrationMode::Differential),
            Err(Error::InvalidState)
        );
        assert_eq!(adc.state(), GlobalState::Active);
        assert_eq!(adc.group_state(Group::Injected), GroupState::Active);
        assert_eq!(hw.hw().calibration_mode, None);
    }

    #[test]
    fn calibration_timeout_leaves_calibrating() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().calibration_polls = u32::MAX;
        assert_eq!(adc.calibrate(CalibrationMode::SingleEnded), Err(Error::Timeout));
        assert_eq!(adc.state(), GlobalState::Calibrating);

        // Recovery path
        hw.hw().calibrating = None;
        assert_eq!(adc.stop(), Ok(()));
        assert_eq!(adc.state(), GlobalState::Idle);
        assert!(!hw.hw().enabled);
    }

    #[test]
    fn calibration_survives_enable_erratum() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().drop_enable_after_calibration = true;
        assert_eq!(adc.calibrate(CalibrationMode::SingleEnded), Ok(()));
        assert_eq!(adc.state(), GlobalState::Active);
        assert!(hw.hw().enabled);
        assert!(adc.last_error_codes().is_empty());
    }

    #[test]
    fn reenable_failure_leaves_calibrating() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().never_ready = true;
        assert_eq!(adc.calibrate(CalibrationMode::SingleEnded), Err(Error::Timeout));
        assert_eq!(adc.state(), GlobalState::Calibrating);
        assert_eq!(adc.last_error_codes(), ErrorCode::empty());
    }

    #[test]
    fn factor_roundtrip_under_bracket() {
        let (mut adc, hw) = active_adc(1);
        let factor = CalibrationFactor {
            single_ended: 0x123,
            differential: 0x45,
        };
        assert_eq!(adc.set_calibration_factor(factor), Ok(()));
        assert_eq!(adc.calibration_factor(), Ok(factor));
        assert_eq!(adc.state(), GlobalState::Active);
        assert_eq!(hw.hw().calibration_factor, factor);

        let too_big = CalibrationFactor {
            single_ended: 0x800,
            differential: 0,
        };
        assert_eq!(adc.set_calibration_factor(too_big), Err(Error::InvalidParam));
    }

    #[test]
    fn factor_access_needs_quiet_core() {
        let (mut adc, hw) = active_adc(1);
        hw.hw().ongoing[0] = true;
        assert_eq!(adc.calibration_factor(), Err(Error::Busy));
        assert_eq!(adc.state(), GlobalState::Active);

        let (mut idle, _hw) = configured_adc(2);
        assert_eq!(idle.calibration_factor(), Err(Error::InvalidState));
    }
}
