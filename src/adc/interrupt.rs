//! Interrupt dispatch
//!
//! The flag and enable registers are read once per call. Every pending
//! event is cleared before it is acted upon, so an event raised again while
//! its callback runs is not lost. The narrower handlers run the same table
//! restricted to one event family.

use crate::dma::TransferChannel;
use crate::time::Timebase;

use super::state::transition;
use super::{
    Adc, AnalogWatchdog, Callbacks, Cardinality, ErrorCode, Event, Group, GroupState, Registers,
};

/// Order in which pending events are handled
const DISPATCH: [Event; 9] = [
    Event::END_OF_SAMPLING,
    Event::EOC,
    Event::EOS,
    Event::OVERRUN,
    Event::JEOC,
    Event::JEOS,
    Event::AWD1,
    Event::AWD2,
    Event::AWD3,
];

impl<R, T, C, D> Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Handles every pending and enabled event of the instance
    ///
    /// Call from the ADC interrupt. See [`trigger_next`](Adc::trigger_next)
    /// for the ordering requirements against thread-mode calls.
    pub fn irq_handler(&mut self) {
        self.dispatch(Event::REGULAR | Event::INJECTED | Event::WATCHDOG);
    }

    /// Handles regular group events only (end of sampling, conversion,
    /// sequence and overrun)
    pub fn reg_irq_handler(&mut self) {
        self.dispatch(Event::REGULAR);
    }

    /// Handles injected group events only
    pub fn inj_irq_handler(&mut self) {
        self.dispatch(Event::INJECTED);
    }

    /// Handles analog watchdog events only
    pub fn awd_irq_handler(&mut self) {
        self.dispatch(Event::WATCHDOG);
    }

    fn dispatch(&mut self, scope: Event) {
        let pending = self.regs.flags() & self.regs.interrupts() & scope;
        if pending.is_empty() {
            return;
        }
        trace!("adc{}: irq {:?}", self.instance().0, pending);

        for event in DISPATCH.iter().copied().filter(|e| pending.contains(*e)) {
            self.regs.clear_flags(event);
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: Event) {
        let instance = self.instance();
        match event {
            Event::END_OF_SAMPLING => self.callbacks.reg_end_of_sampling(instance),
            Event::EOC => self.callbacks.reg_unitary_conv_cplt(instance),
            Event::EOS => {
                self.end_of_sequence(Group::Regular);
                self.callbacks.reg_sequence_conv_cplt(instance);
            }
            Event::OVERRUN => {
                if self.overrun_is_error() {
                    error!("adc{}: overrun", instance.0);
                    self.last_error |= ErrorCode::OVERRUN;
                    self.callbacks.error(instance, ErrorCode::OVERRUN);
                }
            }
            Event::JEOC => self.callbacks.inj_unitary_conv_cplt(instance),
            Event::JEOS => {
                self.end_of_sequence(Group::Injected);
                self.callbacks.inj_sequence_conv_cplt(instance);
            }
            Event::AWD1 => self.callbacks.awd_out_of_window(instance, AnalogWatchdog::Awd1),
            Event::AWD2 => self.callbacks.awd_out_of_window(instance, AnalogWatchdog::Awd2),
            Event::AWD3 => self.callbacks.awd_out_of_window(instance, AnalogWatchdog::Awd3),
            _ => {}
        }
    }

    /// A unit conversion is over once its sequence ends
    fn end_of_sequence(&mut self, group: Group) {
        if self.cardinality[group.index()] != Cardinality::Unit
            || self.groups[group.index()] != GroupState::Active
        {
            return;
        }
        if group == Group::Regular && self.transfer.in_use() {
            // Committed by the transfer abort
            return;
        }

        self.release_interrupts(group);
        if let Err(_e) = transition(&mut self.groups[group.index()], GroupState::Idle) {
            debug!("adc{}: {:?} completion ignored: {:?}", self.instance().0, group, _e);
        }
    }
}
