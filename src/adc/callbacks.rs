//! Event callbacks
//!
//! Supplied when the handle is built (see [`Adc::with_callbacks`]). Every
//! method has an empty default body, so implementors only override what
//! they listen to.
//!
//! [`Adc::with_callbacks`]: super::Adc::with_callbacks

use super::config::AnalogWatchdog;
use super::{ErrorCode, InstanceId};

/// Receiver of conversion, transfer and error events
///
/// Called from [`Adc::irq_handler`](super::Adc::irq_handler) and
/// [`Adc::dma_irq_handler`](super::Adc::dma_irq_handler), usually in
/// interrupt context.
#[allow(unused_variables)]
pub trait Callbacks {
    /// Hardware error; `codes` holds the bits raised by this event
    fn error(&mut self, instance: InstanceId, codes: ErrorCode) {}

    /// Regular sampling phase ended
    fn reg_end_of_sampling(&mut self, instance: InstanceId) {}
    /// One regular conversion completed
    fn reg_unitary_conv_cplt(&mut self, instance: InstanceId) {}
    /// Regular sequence completed
    fn reg_sequence_conv_cplt(&mut self, instance: InstanceId) {}

    /// Half of the DMA buffer was filled
    fn reg_data_transfer_half(&mut self, instance: InstanceId) {}
    /// The DMA buffer was filled
    fn reg_data_transfer_cplt(&mut self, instance: InstanceId) {}
    /// DMA conversions stopped and the channel was aborted
    fn reg_data_transfer_stop(&mut self, instance: InstanceId) {}

    /// One injected conversion completed
    fn inj_unitary_conv_cplt(&mut self, instance: InstanceId) {}
    /// Injected sequence completed
    fn inj_sequence_conv_cplt(&mut self, instance: InstanceId) {}

    /// A result left the window of `watchdog`
    fn awd_out_of_window(&mut self, instance: InstanceId, watchdog: AnalogWatchdog) {}
}

/// Callbacks that ignore every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCallbacks;

impl Callbacks for NoCallbacks {}

impl<C: Callbacks + ?Sized> Callbacks for &mut C {
    fn error(&mut self, instance: InstanceId, codes: ErrorCode) {
        (**self).error(instance, codes)
    }

    fn reg_end_of_sampling(&mut self, instance: InstanceId) {
        (**self).reg_end_of_sampling(instance)
    }

    fn reg_unitary_conv_cplt(&mut self, instance: InstanceId) {
        (**self).reg_unitary_conv_cplt(instance)
    }

    fn reg_sequence_conv_cplt(&mut self, instance: InstanceId) {
        (**self).reg_sequence_conv_cplt(instance)
    }

    fn reg_data_transfer_half(&mut self, instance: InstanceId) {
        (**self).reg_data_transfer_half(instance)
    }

    fn reg_data_transfer_cplt(&mut self, instance: InstanceId) {
        (**self).reg_data_transfer_cplt(instance)
    }

    fn reg_data_transfer_stop(&mut self, instance: InstanceId) {
        (**self).reg_data_transfer_stop(instance)
    }

    fn inj_unitary_conv_cplt(&mut self, instance: InstanceId) {
        (**self).inj_unitary_conv_cplt(instance)
    }

    fn inj_sequence_conv_cplt(&mut self, instance: InstanceId) {
        (**self).inj_sequence_conv_cplt(instance)
    }

    fn awd_out_of_window(&mut self, instance: InstanceId, watchdog: AnalogWatchdog) {
        (**self).awd_out_of_window(instance, watchdog)
    }
}
