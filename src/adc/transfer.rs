//! DMA side of the regular group
//!
//! Results are moved by the bound [`TransferChannel`]. Half and full
//! transfer events are passed through to the callbacks without touching
//! group state. Stopping is split in two: [`Adc::stop_conv_dma`] stops the
//! conversions and requests the channel abort, and the group only returns
//! to `Idle` once the abort completed, either right away or through
//! [`DmaEvent::AbortComplete`].

use embedded_dma::WriteBuffer;

use crate::dma::{
    AbortStatus, DataWidth, DmaEvent, TransferChannel, TransferInterrupts, TransferMode,
    TransferRequest, TransferWord,
};
use crate::time::Timebase;

use super::conversion::OPTIONAL_EVENTS;
use super::state::{require, transition};
use super::{
    Adc, Callbacks, DataTransfer, Error, ErrorCode, Event, GlobalState, Group, GroupState,
    Registers, Result,
};

/// Outcome of a DMA start
///
/// A start that fails hands the buffer back with the error, as the
/// `'static` buffer usually exists only once.
pub type StartResult<W> = core::result::Result<(), (Error, &'static mut [W])>;

#[derive(Clone, Copy, Debug)]
struct DmaBuffer {
    address: usize,
    len: usize,
    width: DataWidth,
}

/// DMA bookkeeping of a handle
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TransferState {
    running: bool,
    abort_pending: bool,
    buffer: Option<DmaBuffer>,
}

impl TransferState {
    /// A transfer runs or its abort has not completed yet
    pub(crate) fn in_use(&self) -> bool {
        self.running || self.abort_pending
    }
}

impl<R, T, C, D> Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Starts `group` with results moved into `buffer` by the bound channel
    ///
    /// Requests half, full and error events from the channel. Only the
    /// regular group streams through DMA; `Injected` is `InvalidParam`.
    /// On failure `buffer` comes back with the error.
    pub fn start_conv_dma<W: TransferWord>(
        &mut self,
        group: Group,
        buffer: &'static mut [W],
    ) -> StartResult<W> {
        self.start_conv_dma_opt(group, buffer, TransferInterrupts::all(), Event::empty())
    }

    /// [`start_conv_dma`](Adc::start_conv_dma) with explicit channel and
    /// ADC interrupts
    ///
    /// Overrun is always enabled. An empty `transfer_interrupts` starts the
    /// group silently (`ActiveSilent`), which needs a circular channel.
    /// `optional` takes the same events as
    /// [`start_conv_it_opt`](Adc::start_conv_it_opt).
    pub fn start_conv_dma_opt<W: TransferWord>(
        &mut self,
        group: Group,
        buffer: &'static mut [W],
        transfer_interrupts: TransferInterrupts,
        optional: Event,
    ) -> StartResult<W> {
        let source = self.regs.data_address();
        self.start_transfer(group, buffer, transfer_interrupts, optional, source)
    }

    pub(crate) fn start_transfer<W: TransferWord>(
        &mut self,
        group: Group,
        mut buffer: &'static mut [W],
        transfer_interrupts: TransferInterrupts,
        optional: Event,
        source: usize,
    ) -> StartResult<W> {
        if group != Group::Regular || !OPTIONAL_EVENTS.contains(optional) || buffer.is_empty() {
            return Err((Error::InvalidParam, buffer));
        }
        if let Err(e) = self.startable(group) {
            return Err((e, buffer));
        }
        let mode = match self.dma.as_ref() {
            Some(dma) => dma.mode(),
            None => return Err((Error::NoTransferChannel, buffer)),
        };
        let silent = transfer_interrupts.is_empty();
        if silent && mode != TransferMode::Circular {
            return Err((Error::InvalidParam, buffer));
        }

        // SAFETY: the slice is `'static` and exclusively borrowed; it is only
        // handed out again by `take_dma_buffer` once the transfer is over.
        let (ptr, len) = unsafe { buffer.write_buffer() };
        let request = TransferRequest {
            source,
            destination: ptr as usize,
            len,
            width: W::WIDTH,
            interrupts: transfer_interrupts,
        };

        let next = if silent {
            GroupState::ActiveSilent
        } else {
            GroupState::Active
        };
        if let Err(e) = self.arm(group, next, Event::OVERRUN | optional) {
            return Err((e, buffer));
        }
        self.regs.set_data_transfer(match mode {
            TransferMode::Normal => DataTransfer::Limited,
            TransferMode::Circular => DataTransfer::Unlimited,
        });

        let started = match self.dma.as_mut() {
            // SAFETY: see above, `destination` stays valid for `len` words
            Some(dma) => unsafe { dma.start(request) }.map_err(|_e| {
                error!("adc{}: transfer start failed: {:?}", self.regs.instance().0, _e);
            }),
            None => Err(()),
        };
        if started.is_err() {
            self.regs.set_data_transfer(DataTransfer::None);
            self.disarm(group);
            self.last_error |= ErrorCode::DMA;
            return Err((Error::Dma, buffer));
        }

        self.transfer = TransferState {
            running: true,
            abort_pending: false,
            buffer: Some(DmaBuffer {
                address: request.destination,
                len,
                width: W::WIDTH,
            }),
        };
        trace!("adc{}: {:?} dma start, {:?}", self.instance().0, group, mode);
        self.regs.start_conversion(group);
        Ok(())
    }

    /// Stops DMA conversions of `group` and aborts the channel
    ///
    /// The group returns to `Idle` when the abort completed. For a silent
    /// transfer, or a channel that stops immediately, that is before this
    /// returns; otherwise it happens in
    /// [`dma_irq_handler`](Adc::dma_irq_handler) on
    /// [`DmaEvent::AbortComplete`]. A failing abort still returns the group
    /// to `Idle` and reports `Dma`.
    pub fn stop_conv_dma(&mut self, group: Group) -> Result<()> {
        if group != Group::Regular {
            return Err(Error::InvalidParam);
        }
        require(self.state, &[GlobalState::Active])?;
        require(
            self.groups[group.index()],
            &[GroupState::Active, GroupState::ActiveSilent],
        )?;
        if !self.transfer.running {
            return Err(Error::InvalidState);
        }

        let auto = self.auto_injected(group);
        self.stop_hw(group)?;
        if auto {
            self.stop_hw(Group::Injected)?;
        }
        self.release_interrupts(group);
        if auto {
            self.release_interrupts(Group::Injected);
        }
        self.regs.set_data_transfer(DataTransfer::None);
        self.transfer.running = false;

        let silent = self.groups[group.index()] == GroupState::ActiveSilent;
        let status = match self.dma.as_mut() {
            Some(dma) if silent => dma.abort().map(|_| AbortStatus::Complete).map_err(|_| ()),
            Some(dma) => dma.abort_async().map_err(|_| ()),
            None => Err(()),
        };

        match status {
            Ok(AbortStatus::Complete) => self.commit_transfer_stop(),
            Ok(AbortStatus::Pending) => {
                self.transfer.abort_pending = true;
                Ok(())
            }
            Err(()) => {
                error!("adc{}: transfer abort failed", self.instance().0);
                self.last_error |= ErrorCode::DMA;
                self.commit_transfer_stop()?;
                Err(Error::Dma)
            }
        }
    }

    /// Routes an event of the bound transfer channel
    ///
    /// Call from the DMA channel's interrupt.
    pub fn dma_irq_handler(&mut self, event: DmaEvent) {
        let instance = self.instance();
        match event {
            DmaEvent::HalfTransfer => self.callbacks.reg_data_transfer_half(instance),
            DmaEvent::TransferComplete => self.callbacks.reg_data_transfer_cplt(instance),
            DmaEvent::TransferError => {
                error!("adc{}: transfer error", instance.0);
                self.last_error |= ErrorCode::DMA;
                self.callbacks.error(instance, ErrorCode::DMA);
            }
            DmaEvent::AbortComplete => {
                if self.transfer.abort_pending {
                    if let Err(_e) = self.commit_transfer_stop() {
                        debug!("adc{}: late abort completion: {:?}", instance.0, _e);
                    }
                }
            }
        }
    }

    /// Returns the buffer of the last DMA transfer once it is over
    ///
    /// `None` while a transfer runs or its abort is pending, if no buffer
    /// is held, or if `W` does not match the buffer's word type.
    pub fn take_dma_buffer<W: TransferWord>(&mut self) -> Option<&'static mut [W]> {
        if self.transfer.in_use() {
            return None;
        }
        let buffer = self.transfer.buffer?;
        if buffer.width != W::WIDTH {
            return None;
        }
        self.transfer.buffer = None;
        // SAFETY: the buffer came in as `&'static mut [W]` with the same word
        // width, and the channel no longer writes to it.
        Some(unsafe { core::slice::from_raw_parts_mut(buffer.address as *mut W, buffer.len) })
    }

    /// [`start_conv_dma`](Adc::start_conv_dma) on the regular group
    pub fn reg_start_conv_dma<W: TransferWord>(&mut self, buffer: &'static mut [W]) -> StartResult<W> {
        self.start_conv_dma(Group::Regular, buffer)
    }

    /// [`start_conv_dma_opt`](Adc::start_conv_dma_opt) on the regular group
    pub fn reg_start_conv_dma_opt<W: TransferWord>(
        &mut self,
        buffer: &'static mut [W],
        transfer_interrupts: TransferInterrupts,
        optional: Event,
    ) -> StartResult<W> {
        self.start_conv_dma_opt(Group::Regular, buffer, transfer_interrupts, optional)
    }

    /// [`stop_conv_dma`](Adc::stop_conv_dma) on the regular group
    pub fn reg_stop_conv_dma(&mut self) -> Result<()> {
        self.stop_conv_dma(Group::Regular)
    }

    /// Synchronous abort used by teardown; never fails
    pub(crate) fn abort_transfer_now(&mut self) {
        self.regs.set_data_transfer(DataTransfer::None);
        if let Some(dma) = self.dma.as_mut() {
            if dma.abort().is_err() {
                warn!("adc{}: transfer abort failed during teardown", self.regs.instance().0);
            }
        }
        self.transfer.running = false;
        self.transfer.abort_pending = false;
    }

    /// Abort completed: the regular group is idle again
    fn commit_transfer_stop(&mut self) -> Result<()> {
        self.transfer.running = false;
        self.transfer.abort_pending = false;

        transition(&mut self.groups[Group::Regular.index()], GroupState::Idle)?;
        if self.auto_injected(Group::Regular) && self.groups[Group::Injected.index()].is_active() {
            transition(&mut self.groups[Group::Injected.index()], GroupState::Idle)?;
        }
        trace!("adc{}: dma stopped", self.instance().0);
        self.callbacks.reg_data_transfer_stop(self.instance());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::{InjectedConfig, InjectedTrigger, OverrunMode, RegularConfig};
    use crate::testing::{active_adc, leak, Call, MockAdc, MockChannel, Recorder, TestAdc};

    fn dma_adc(mode: TransferMode) -> (TestAdc<Recorder, MockChannel>, MockAdc, MockChannel, Recorder) {
        let (adc, hw) = active_adc(1);
        let channel = MockChannel::new(mode);
        let recorder = Recorder::default();
        let adc = adc.with_dma(channel.clone()).with_callbacks(recorder.clone());
        (adc, hw, channel, recorder)
    }

    #[test]
    fn circular_channel_selects_unlimited_transfers() {
        let (mut adc, hw, channel, _rec) = dma_adc(TransferMode::Circular);
        let buffer = leak::<u16>(8);
        let destination = buffer.as_ptr() as usize;

        assert_eq!(adc.reg_start_conv_dma(buffer), Ok(()));
        assert_eq!(adc.group_state(Group::Regular), GroupState::Active);

        let hw = hw.hw();
        assert_eq!(hw.data_transfer, DataTransfer::Unlimited);
        assert!(hw.interrupts.contains(Event::OVERRUN));
        assert_eq!(hw.starts[0], 1);

        let request = channel.state().requests[0];
        assert_eq!(request.source, hw.data_address);
        assert_eq!(request.destination, destination);
        assert_eq!(request.len, 8);
        assert_eq!(request.width, DataWidth::HalfWord);
        assert_eq!(request.interrupts, TransferInterrupts::all());
    }

    #[test]
    fn normal_channel_selects_limited_transfers() {
        let (mut adc, hw, channel, _rec) = dma_adc(TransferMode::Normal);
        adc.reg_start_conv_dma(leak::<u32>(4)).unwrap();
        assert_eq!(hw.hw().data_transfer, DataTransfer::Limited);
        assert_eq!(channel.state().requests[0].width, DataWidth::Word);
    }

    #[test]
    fn dma_needs_channel_and_regular_group() {
        let (mut adc, _hw) = active_adc(1);
        assert_eq!(
            adc.reg_start_conv_dma(leak::<u16>(2)).map_err(|(e, _)| e),
            Err(Error::NoTransferChannel)
        );
        assert_eq!(adc.group_state(Group::Regular), GroupState::Idle);

        let (mut adc, _hw, _ch, _rec) = dma_adc(TransferMode::Circular);
        assert_eq!(
            adc.start_conv_dma(Group::Injected, leak::<u16>(2)).map_err(|(e, _)| e),
            Err(Error::InvalidParam)
        );
        assert_eq!(
            adc.reg_start_conv_dma(leak::<u16>(0)).map_err(|(e, _)| e),
            Err(Error::InvalidParam)
        );
    }

    #[test]
    fn channel_start_failure_rolls_back() {
        let (mut adc, hw, channel, _rec) = dma_adc(TransferMode::Circular);
        channel.state().fail_start = true;
        let buffer = leak::<u16>(4);
        let address = buffer.as_ptr() as usize;

        let (error, buffer) = adc.reg_start_conv_dma(buffer).unwrap_err();
        assert_eq!(error, Error::Dma);
        assert_eq!(buffer.as_ptr() as usize, address);
        assert_eq!(adc.group_state(Group::Regular), GroupState::Idle);
        assert!(adc.last_error_codes().contains(ErrorCode::DMA));
        {
            let hw = hw.hw();
            assert_eq!(hw.data_transfer, DataTransfer::None);
            assert!(hw.interrupts.is_empty());
            assert_eq!(hw.starts[0], 0);
        }

        // The same buffer serves the next attempt
        channel.state().fail_start = false;
        assert_eq!(adc.reg_start_conv_dma(buffer), Ok(()));
        assert_eq!(channel.state().requests.last().map(|r| r.destination), Some(address));
    }

    #[test]
    fn rejected_start_returns_buffer() {
        let (mut adc, _hw, _ch, _rec) = dma_adc(TransferMode::Normal);
        let (error, buffer) = adc
            .reg_start_conv_dma_opt(leak::<u16>(4), TransferInterrupts::empty(), Event::empty())
            .unwrap_err();
        assert_eq!(error, Error::InvalidParam);
        assert_eq!(buffer.len(), 4);

        adc.reg_start_conv_dma(buffer).unwrap();
        let (error, second) = adc.reg_start_conv_dma(leak::<u16>(2)).unwrap_err();
        assert_eq!(error, Error::InvalidState);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn stop_commits_only_after_abort_completion() {
        let (mut adc, hw, channel, rec) = dma_adc(TransferMode::Circular);
        channel.state().abort_status = AbortStatus::Pending;
        adc.reg_start_conv_dma(leak::<u16>(16)).unwrap();

        assert_eq!(adc.reg_stop_conv_dma(), Ok(()));
        assert_eq!(adc.group_state(Group::Regular), GroupState::Active);
        assert_eq!(hw.hw().data_transfer, DataTransfer::None);
        assert!(!hw.hw().ongoing[0]);
        assert_eq!(channel.state().async_aborts, 1);
        assert!(adc.take_dma_buffer::<u16>().is_none());
        // A second stop has nothing left to stop
        assert_eq!(adc.reg_stop_conv_dma(), Err(Error::InvalidState));

        adc.dma_irq_handler(DmaEvent::AbortComplete);
        assert_eq!(adc.group_state(Group::Regular), GroupState::Idle);
        assert_eq!(rec.calls(), vec![Call::RegDataTransferStop]);

        // Spurious completions are ignored
        adc.dma_irq_handler(DmaEvent::AbortComplete);
        assert_eq!(rec.calls().len(), 1);

        let buffer = adc.take_dma_buffer::<u16>().unwrap();
        assert_eq!(buffer.len(), 16);
        assert!(adc.take_dma_buffer::<u16>().is_none());
    }

    #[test]
    fn immediate_abort_commits_synchronously() {
        let (mut adc, _hw, _channel, rec) = dma_adc(TransferMode::Normal);
        adc.reg_start_conv_dma(leak::<u32>(3)).unwrap();
        assert_eq!(adc.reg_stop_conv_dma(), Ok(()));
        assert_eq!(adc.group_state(Group::Regular), GroupState::Idle);
        assert_eq!(rec.calls(), vec![Call::RegDataTransferStop]);
        assert!(adc.take_dma_buffer::<u16>().is_none());
        assert_eq!(adc.take_dma_buffer::<u32>().map(|b| b.len()), Some(3));
    }

    #[test]
    fn silent_mode_needs_circular_channel() {
        let (mut adc, _hw, _ch, _rec) = dma_adc(TransferMode::Normal);
        assert_eq!(
            adc.reg_start_conv_dma_opt(leak::<u16>(4), TransferInterrupts::empty(), Event::empty())
                .map_err(|(e, _)| e),
            Err(Error::InvalidParam)
        );
        assert_eq!(adc.group_state(Group::Regular), GroupState::Idle);
    }

    #[test]
    fn silent_mode_aborts_synchronously() {
        let (mut adc, hw, channel, rec) = dma_adc(TransferMode::Circular);
        channel.state().abort_status = AbortStatus::Pending;
        adc.reg_start_conv_dma_opt(leak::<u16>(4), TransferInterrupts::empty(), Event::empty())
            .unwrap();
        assert_eq!(adc.group_state(Group::Regular), GroupState::ActiveSilent);
        assert_eq!(hw.hw().interrupts, Event::OVERRUN);
        assert_eq!(channel.state().requests[0].interrupts, TransferInterrupts::empty());

        assert_eq!(adc.reg_stop_conv_dma(), Ok(()));
        assert_eq!(adc.group_state(Group::Regular), GroupState::Idle);
        assert_eq!(channel.state().aborts, 1);
        assert_eq!(channel.state().async_aborts, 0);
        assert_eq!(rec.calls(), vec![Call::RegDataTransferStop]);
    }

    #[test]
    fn failed_abort_reports_dma_error() {
        let (mut adc, _hw, channel, _rec) = dma_adc(TransferMode::Circular);
        adc.reg_start_conv_dma(leak::<u16>(4)).unwrap();
        channel.state().fail_abort = true;
        assert_eq!(adc.reg_stop_conv_dma(), Err(Error::Dma));
        assert_eq!(adc.group_state(Group::Regular), GroupState::Idle);
        assert!(adc.last_error_codes().contains(ErrorCode::DMA));
    }

    #[test]
    fn transfer_events_pass_through() {
        let (mut adc, _hw, _ch, rec) = dma_adc(TransferMode::Circular);
        adc.reg_start_conv_dma(leak::<u16>(4)).unwrap();

        adc.dma_irq_handler(DmaEvent::HalfTransfer);
        adc.dma_irq_handler(DmaEvent::TransferComplete);
        adc.dma_irq_handler(DmaEvent::TransferError);

        assert_eq!(adc.group_state(Group::Regular), GroupState::Active);
        assert_eq!(
            rec.calls(),
            vec![
                Call::RegDataTransferHalf,
                Call::RegDataTransferCplt,
                Call::Error(ErrorCode::DMA),
            ]
        );
        assert_eq!(adc.take_last_error_codes(), ErrorCode::DMA);
    }

    #[test]
    fn dma_group_rejects_other_models() {
        let (mut adc, _hw, channel, _rec) = dma_adc(TransferMode::Circular);
        adc.reg_start_conv_dma(leak::<u16>(4)).unwrap();

        assert_eq!(adc.reg_stop_conv(), Err(Error::InvalidState));
        assert_eq!(
            adc.reg_poll_for_conv(crate::time::Milliseconds(1)),
            Err(Error::InvalidState)
        );
        assert_eq!(
            adc.bind_transfer_channel(MockChannel::new(TransferMode::Normal))
                .map(|old| old.is_some()),
            Err(Error::InvalidState)
        );
        assert_eq!(channel.state().requests.len(), 1);
    }

    #[test]
    fn overrun_during_dma_is_an_error() {
        let (mut adc, hw, _ch, rec) = dma_adc(TransferMode::Circular);
        adc.set_regular_config(RegularConfig::default().overrun(OverrunMode::Overwritten))
            .unwrap();
        adc.reg_start_conv_dma(leak::<u16>(4)).unwrap();

        hw.hw().raise(Event::OVERRUN);
        adc.irq_handler();
        assert_eq!(rec.calls(), vec![Call::Error(ErrorCode::OVERRUN)]);
        assert_eq!(adc.group_state(Group::Regular), GroupState::Active);
    }

    #[test]
    fn dma_completion_does_not_idle_unit_group() {
        let (mut adc, hw, _ch, _rec) = dma_adc(TransferMode::Normal);
        adc.reg_start_conv_dma_opt(leak::<u16>(1), TransferInterrupts::all(), Event::END_OF_SAMPLING)
            .unwrap();
        hw.hw().interrupts |= Event::EOS;
        hw.hw().raise(Event::EOS);
        adc.irq_handler();
        assert_eq!(adc.group_state(Group::Regular), GroupState::Active);
    }

    #[test]
    fn auto_injected_follows_dma_stop() {
        let (mut adc, _hw, _ch, _rec) = dma_adc(TransferMode::Circular);
        adc.set_injected_config(InjectedConfig::default().trigger(InjectedTrigger::FromRegular))
            .unwrap();
        adc.reg_start_conv_dma(leak::<u16>(4)).unwrap();
        assert_eq!(adc.group_state(Group::Injected), GroupState::Active);

        adc.reg_stop_conv_dma().unwrap();
        assert_eq!(adc.group_state(Group::Injected), GroupState::Idle);
    }

    #[test]
    fn deinit_aborts_running_transfer() {
        let (mut adc, hw, channel, _rec) = dma_adc(TransferMode::Circular);
        adc.reg_start_conv_dma(leak::<u16>(4)).unwrap();

        let unbound = adc.deinit();
        assert!(unbound.is_some());
        assert_eq!(channel.state().aborts, 1);
        assert_eq!(hw.hw().data_transfer, DataTransfer::None);
        assert!(adc.transfer_channel().is_none());
    }
}
