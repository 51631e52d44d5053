/// ADC operation result
pub type Result<T> = core::result::Result<T, Error>;

/// ADC error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The handle or group is not in a state that allows the operation
    InvalidState,
    /// Argument out of range or conflicting configuration
    InvalidParam,
    /// A bounded hardware wait did not complete in time
    Timeout,
    /// The hardware rejected the operation
    ///
    /// A conversion, calibration or enable/disable request is still in
    /// progress.
    Busy,
    /// The transfer channel failed to start or abort
    Dma,
    /// DMA operation on a handle without a bound transfer channel
    NoTransferChannel,
}

bitflags::bitflags! {
    /// Sticky hardware error bits
    ///
    /// Bits accumulate until read with
    /// [`Adc::take_last_error_codes`](super::Adc::take_last_error_codes).
    pub struct ErrorCode: u8 {
        /// Conversion data was overwritten before being read
        const OVERRUN = 1 << 0;
        /// Transfer channel error
        const DMA = 1 << 1;
        /// Conflicting control bits found when enabling the core
        const INTERNAL = 1 << 2;
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        ErrorCode::empty()
    }
}
