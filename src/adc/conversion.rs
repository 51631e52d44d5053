//! Conversion group controller
//!
//! Start, stop and completion tracking of the regular and injected groups
//! for the blocking and interrupt programming models. The DMA model lives
//! in [`transfer`](super::transfer).
//!
//! A group is started from `Idle` into `Active`. It returns to `Idle` on an
//! explicit stop, or on its own when a *unit* conversion (one trigger, one
//! pass over the sequence) completes. With the injected trigger set to
//! [`InjectedTrigger::FromRegular`](super::InjectedTrigger::FromRegular) the
//! injected group follows the regular group's start and stop.

use embedded_hal::adc::{Channel, OneShot};

use crate::dma::TransferChannel;
use crate::time::{wait_until, Milliseconds, Timebase};

use super::config::INJECTED_RANKS;
use super::state::{require, transition};
use super::{
    Adc, Callbacks, Cardinality, ChannelConfig, Error, ErrorCode, Event, GlobalState, Group,
    GroupState, InjectedTrigger, OverrunMode, RegularConfig, Registers, Result,
};

/// Events accepted by [`Adc::start_conv_it_opt`] on top of the defaults
pub const OPTIONAL_EVENTS: Event = Event::from_bits_truncate(
    Event::END_OF_SAMPLING.bits() | Event::WATCHDOG.bits(),
);

impl<R, T, C, D> Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Starts `group` for polling
    ///
    /// Requires the handle `Active` and the group `Idle`. Results are
    /// collected with [`poll_for_conv`](Adc::poll_for_conv) and
    /// [`get_value`](Adc::get_value).
    pub fn start_conv(&mut self, group: Group) -> Result<()> {
        self.startable(group)?;
        self.launch(group, GroupState::Active, Event::empty())
    }

    /// Starts `group` with completion and overrun interrupts
    pub fn start_conv_it(&mut self, group: Group) -> Result<()> {
        self.start_conv_it_opt(group, Event::empty())
    }

    /// Starts `group` with completion interrupts plus `optional` ones
    ///
    /// `optional` may contain end-of-sampling and the analog watchdog
    /// events; anything else is `InvalidParam`.
    pub fn start_conv_it_opt(&mut self, group: Group, optional: Event) -> Result<()> {
        if !OPTIONAL_EVENTS.contains(optional) {
            return Err(Error::InvalidParam);
        }
        self.startable(group)?;

        let interrupts = match group {
            Group::Regular => Event::EOC | Event::EOS | Event::OVERRUN,
            Group::Injected => Event::JEOC | Event::JEOS,
        };
        self.launch(group, GroupState::Active, interrupts | optional)
    }

    /// Issues the start command again on a software-triggered group
    ///
    /// For discontinuous sequences and repeated unit conversions. The group
    /// may be `Idle` (its last unit conversion completed) or still `Active`.
    /// Fails with `Busy` while the hardware still reports a conversion in
    /// progress, without changing any state.
    ///
    /// Nothing here serializes against [`irq_handler`](Adc::irq_handler);
    /// the platform's interrupt priorities must.
    pub fn trigger_next(&mut self, group: Group) -> Result<()> {
        require(self.state, &[GlobalState::Active])?;
        require(
            self.groups[group.index()],
            &[GroupState::Idle, GroupState::Active, GroupState::ActiveSilent],
        )?;
        let software = match group {
            Group::Regular => self.settings.regular.is_software_triggered(),
            Group::Injected => self.settings.injected.trigger == InjectedTrigger::Software,
        };
        if !software {
            return Err(Error::InvalidParam);
        }
        if self.regs.is_conversion_ongoing(group) {
            debug!("adc{}: {:?} trigger while converting", self.instance().0, group);
            return Err(Error::Busy);
        }

        if self.groups[group.index()] == GroupState::Idle {
            transition(&mut self.groups[group.index()], GroupState::Active)?;
            let (eoc, eos) = Event::end_of_conversion(group);
            self.regs.clear_flags(eoc | eos);
        }
        self.regs.start_conversion(group);
        Ok(())
    }

    /// Stops `group` and returns it to `Idle`
    ///
    /// Interrupts enabled by [`start_conv_it`](Adc::start_conv_it) stay
    /// enabled; use [`stop_conv_it`](Adc::stop_conv_it) for that model.
    pub fn stop_conv(&mut self, group: Group) -> Result<()> {
        self.stoppable(group)?;
        self.halt(group, false)
    }

    /// Stops `group`, disables its interrupts and returns it to `Idle`
    pub fn stop_conv_it(&mut self, group: Group) -> Result<()> {
        self.stoppable(group)?;
        self.halt(group, true)
    }

    /// Waits for the end of a conversion of `group`
    ///
    /// A unit conversion waits for the end of the sequence and returns the
    /// group to `Idle`. Otherwise it waits for the end of the next
    /// conversion and the group stays `Active`. Returns `Timeout` if the
    /// flag did not rise within `timeout`.
    pub fn poll_for_conv(&mut self, group: Group, timeout: Milliseconds) -> Result<()> {
        self.pollable(group)?;

        let flag = self.completion_flag(group);
        let regs = &self.regs;
        wait_until(&self.timebase, timeout, || regs.flags().contains(flag)).map_err(|_| {
            warn!("adc{}: {:?} conversion timeout", regs.instance().0, group);
            Error::Timeout
        })?;

        self.conversion_done(group)
    }

    /// Non-blocking [`poll_for_conv`](Adc::poll_for_conv)
    pub fn try_poll_for_conv(&mut self, group: Group) -> nb::Result<(), Error> {
        self.pollable(group)?;

        if !self.regs.flags().contains(self.completion_flag(group)) {
            return Err(nb::Error::WouldBlock);
        }
        self.conversion_done(group)?;
        Ok(())
    }

    /// Waits for one of end-of-sampling, overrun or an analog watchdog event
    ///
    /// An overrun counts as an error when the regular group preserves its
    /// data or feeds a DMA transfer: it is recorded in the error codes and
    /// its flag is left set. Otherwise the flag is cleared.
    pub fn poll_for_event(&mut self, event: Event, timeout: Milliseconds) -> Result<()> {
        let allowed = OPTIONAL_EVENTS | Event::OVERRUN;
        if event.bits().count_ones() != 1 || !allowed.contains(event) {
            return Err(Error::InvalidParam);
        }
        require(self.state, &[GlobalState::Active])?;

        let regs = &self.regs;
        wait_until(&self.timebase, timeout, || regs.flags().contains(event))
            .map_err(|_| Error::Timeout)?;

        if event == Event::OVERRUN && self.overrun_is_error() {
            error!("adc{}: overrun", self.instance().0);
            self.last_error |= ErrorCode::OVERRUN;
        } else {
            self.regs.clear_flags(event);
        }
        Ok(())
    }

    /// Latest result of `group`
    ///
    /// `rank` selects the injected data register (1..=4) and is ignored for
    /// the regular group. The value is only meaningful after a completed
    /// conversion; nothing here checks that.
    pub fn get_value(&self, group: Group, rank: u8) -> i32 {
        debug_assert!(matches!(
            self.state,
            GlobalState::Configuring
                | GlobalState::Idle
                | GlobalState::Active
                | GlobalState::Calibrating
        ));
        // Offset correction makes the registers hold two's complement values
        match group {
            Group::Regular => self.regs.read_regular_data() as i32,
            Group::Injected => {
                debug_assert!((1..=INJECTED_RANKS).contains(&rank));
                self.regs
                    .read_injected_data(rank.clamp(1, INJECTED_RANKS)) as i32
            }
        }
    }

    /// [`start_conv`](Adc::start_conv) on the regular group
    pub fn reg_start_conv(&mut self) -> Result<()> {
        self.start_conv(Group::Regular)
    }

    /// [`start_conv_it`](Adc::start_conv_it) on the regular group
    pub fn reg_start_conv_it(&mut self) -> Result<()> {
        self.start_conv_it(Group::Regular)
    }

    /// [`start_conv_it_opt`](Adc::start_conv_it_opt) on the regular group
    pub fn reg_start_conv_it_opt(&mut self, optional: Event) -> Result<()> {
        self.start_conv_it_opt(Group::Regular, optional)
    }

    /// [`trigger_next`](Adc::trigger_next) on the regular group
    pub fn reg_trigger_next(&mut self) -> Result<()> {
        self.trigger_next(Group::Regular)
    }

    /// [`stop_conv`](Adc::stop_conv) on the regular group
    pub fn reg_stop_conv(&mut self) -> Result<()> {
        self.stop_conv(Group::Regular)
    }

    /// [`stop_conv_it`](Adc::stop_conv_it) on the regular group
    pub fn reg_stop_conv_it(&mut self) -> Result<()> {
        self.stop_conv_it(Group::Regular)
    }

    /// [`poll_for_conv`](Adc::poll_for_conv) on the regular group
    pub fn reg_poll_for_conv(&mut self, timeout: Milliseconds) -> Result<()> {
        self.poll_for_conv(Group::Regular, timeout)
    }

    /// Latest regular result
    pub fn reg_get_value(&self) -> i32 {
        self.get_value(Group::Regular, 1)
    }

    /// [`start_conv`](Adc::start_conv) on the injected group
    pub fn inj_start_conv(&mut self) -> Result<()> {
        self.start_conv(Group::Injected)
    }

    /// [`start_conv_it`](Adc::start_conv_it) on the injected group
    pub fn inj_start_conv_it(&mut self) -> Result<()> {
        self.start_conv_it(Group::Injected)
    }

    /// [`start_conv_it_opt`](Adc::start_conv_it_opt) on the injected group
    pub fn inj_start_conv_it_opt(&mut self, optional: Event) -> Result<()> {
        self.start_conv_it_opt(Group::Injected, optional)
    }

    /// [`trigger_next`](Adc::trigger_next) on the injected group
    pub fn inj_trigger_next(&mut self) -> Result<()> {
        self.trigger_next(Group::Injected)
    }

    /// [`stop_conv`](Adc::stop_conv) on the injected group
    pub fn inj_stop_conv(&mut self) -> Result<()> {
        self.stop_conv(Group::Injected)
    }

    /// [`stop_conv_it`](Adc::stop_conv_it) on the injected group
    pub fn inj_stop_conv_it(&mut self) -> Result<()> {
        self.stop_conv_it(Group::Injected)
    }

    /// [`poll_for_conv`](Adc::poll_for_conv) on the injected group
    pub fn inj_poll_for_conv(&mut self, timeout: Milliseconds) -> Result<()> {
        self.poll_for_conv(Group::Injected, timeout)
    }

    /// Latest injected result of `rank` (1..=4)
    pub fn inj_get_value(&self, rank: u8) -> i32 {
        self.get_value(Group::Injected, rank)
    }

    /// Whether the injected group is converted after every regular sequence
    pub(crate) fn auto_injected(&self, group: Group) -> bool {
        group == Group::Regular && self.settings.injected.is_auto()
    }

    pub(crate) fn startable(&self, group: Group) -> Result<()> {
        require(self.state, &[GlobalState::Active])?;
        require(self.groups[group.index()], &[GroupState::Idle])?;
        if group == Group::Injected && self.settings.injected.is_auto() {
            // Started along with the regular group
            return Err(Error::InvalidParam);
        }
        if self.auto_injected(group) {
            require(self.groups[Group::Injected.index()], &[GroupState::Idle])?;
        }
        Ok(())
    }

    /// [`arm`](Adc::arm) followed by the start command
    pub(crate) fn launch(&mut self, group: Group, next: GroupState, interrupts: Event) -> Result<()> {
        self.arm(group, next, interrupts)?;
        trace!("adc{}: {:?} start", self.instance().0, group);
        self.regs.start_conversion(group);
        Ok(())
    }

    /// Commits `group` to `next` and enables `interrupts`
    ///
    /// The caller has checked [`startable`](Adc::startable).
    pub(crate) fn arm(&mut self, group: Group, next: GroupState, interrupts: Event) -> Result<()> {
        transition(&mut self.groups[group.index()], next)?;

        let (eoc, eos) = Event::end_of_conversion(group);
        let mut clear = eoc | eos;
        if group == Group::Regular {
            clear |= Event::END_OF_SAMPLING | Event::OVERRUN;
        }

        if self.auto_injected(group) {
            transition(&mut self.groups[Group::Injected.index()], GroupState::Active)?;
            clear |= Event::JEOC | Event::JEOS;
            if interrupts.intersects(Event::EOC | Event::EOS) {
                let injected = Event::JEOC | Event::JEOS;
                self.regs.enable_interrupts(injected);
                self.it_enabled[Group::Injected.index()] = injected;
            }
        }

        self.regs.clear_flags(clear | interrupts);
        if !interrupts.is_empty() {
            self.regs.enable_interrupts(interrupts);
        }
        self.it_enabled[group.index()] = interrupts;
        Ok(())
    }

    /// Undoes [`arm`](Adc::arm) after a failed start
    pub(crate) fn disarm(&mut self, group: Group) {
        let auto = self.auto_injected(group);
        self.release_interrupts(group);
        self.groups[group.index()] = GroupState::Idle;
        if auto {
            self.release_interrupts(Group::Injected);
            self.groups[Group::Injected.index()] = GroupState::Idle;
        }
    }

    fn stoppable(&self, group: Group) -> Result<()> {
        require(self.state, &[GlobalState::Active])?;
        require(self.groups[group.index()], &[GroupState::Active])?;
        if group == Group::Regular && self.transfer.in_use() {
            // DMA conversions are stopped with stop_conv_dma
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    /// Stops `group` in hardware and commits it to `Idle`
    pub(crate) fn halt(&mut self, group: Group, release_interrupts: bool) -> Result<()> {
        let auto = self.auto_injected(group);
        self.stop_hw(group)?;
        if auto {
            self.stop_hw(Group::Injected)?;
        }

        if release_interrupts {
            self.release_interrupts(group);
            if auto {
                self.release_interrupts(Group::Injected);
            }
        }

        transition(&mut self.groups[group.index()], GroupState::Idle)?;
        if auto && self.groups[Group::Injected.index()].is_active() {
            transition(&mut self.groups[Group::Injected.index()], GroupState::Idle)?;
        }
        trace!("adc{}: {:?} stopped", self.instance().0, group);
        Ok(())
    }

    /// Disables the interrupts `group` enabled, keeping the ones the other
    /// group still uses
    pub(crate) fn release_interrupts(&mut self, group: Group) {
        let other = self.it_enabled[1 - group.index()];
        let mask = self.it_enabled[group.index()] & !other;
        if !mask.is_empty() {
            self.regs.disable_interrupts(mask);
        }
        self.it_enabled[group.index()] = Event::empty();
    }

    /// Best-effort stop used by teardown; never fails
    pub(crate) fn teardown_group(&mut self, group: Group) {
        if let Err(_e) = self.stop_hw(group) {
            warn!("adc{}: {:?} teardown: {:?}", self.instance().0, group, _e);
        }
        self.release_interrupts(group);
        if group == Group::Regular && self.transfer.in_use() {
            self.abort_transfer_now();
        }
        self.groups[group.index()] = GroupState::Idle;
    }

    fn pollable(&self, group: Group) -> Result<()> {
        require(self.state, &[GlobalState::Active])?;
        require(self.groups[group.index()], &[GroupState::Active])?;
        if group == Group::Regular && self.transfer.in_use() {
            // The transfer channel owns the data register
            return Err(Error::InvalidState);
        }
        Ok(())
    }

    fn completion_flag(&self, group: Group) -> Event {
        let (eoc, eos) = Event::end_of_conversion(group);
        match self.cardinality[group.index()] {
            Cardinality::Unit => eos,
            Cardinality::Multiple => eoc,
        }
    }

    fn conversion_done(&mut self, group: Group) -> Result<()> {
        let (eoc, eos) = Event::end_of_conversion(group);
        match self.cardinality[group.index()] {
            Cardinality::Unit => {
                self.regs.clear_flags(eoc | eos);
                transition(&mut self.groups[group.index()], GroupState::Idle)
            }
            Cardinality::Multiple => {
                self.regs.clear_flags(eoc);
                Ok(())
            }
        }
    }

    pub(crate) fn overrun_is_error(&self) -> bool {
        self.transfer.in_use() || self.settings.regular.overrun == OverrunMode::Preserved
    }
}

impl<R, T, C, D, WORD, PIN> OneShot<R, WORD, PIN> for Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
    WORD: From<u16>,
    PIN: Channel<R, ID = u8>,
{
    type Error = Error;

    /// Converts `PIN` once on the regular group
    ///
    /// The handle must be `Active`. The first call rewrites the regular
    /// group to a single software-triggered rank holding `PIN` and starts
    /// it; later calls poll until the result is there.
    fn read(&mut self, _pin: &mut PIN) -> nb::Result<WORD, Self::Error> {
        if self.group_state(Group::Regular) != GroupState::Active {
            require(self.state, &[GlobalState::Active])?;
            let single = RegularConfig::default();
            if self.settings.regular != single || self.group_state(Group::Regular) == GroupState::Reset {
                self.set_regular_config(single)?;
            }
            self.set_channel_config(ChannelConfig::new(PIN::channel(), Group::Regular))?;
            self.start_conv(Group::Regular)?;
        }

        self.try_poll_for_conv(Group::Regular)?;
        Ok(WORD::from(self.reg_get_value() as u16))
    }
}
