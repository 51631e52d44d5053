//! Data-transfer channel capability
//!
//! The ADC driver does not program DMA controllers. It consumes a channel
//! that someone else configured (addresses, widths, linked lists) through
//! [`TransferChannel`] and is told about completion through
//! [`DmaEvent`]s that the platform's DMA interrupt forwards to
//! [`Adc::dma_irq_handler`](crate::adc::Adc::dma_irq_handler).

use core::fmt::Debug;

/// How the channel behaves when it reaches the end of the buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferMode {
    /// Stop after one pass over the buffer
    Normal,
    /// Wrap around and keep transferring until aborted
    Circular,
}

/// Width of one transferred element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataWidth {
    /// 16-bit half words
    HalfWord,
    /// 32-bit words
    Word,
}

/// Element types a conversion result can be transferred into
pub trait TransferWord: embedded_dma::Word {
    /// Matching channel data width
    const WIDTH: DataWidth;
}

impl TransferWord for u16 {
    const WIDTH: DataWidth = DataWidth::HalfWord;
}

impl TransferWord for u32 {
    const WIDTH: DataWidth = DataWidth::Word;
}

bitflags::bitflags! {
    /// Channel interrupts requested for a transfer
    ///
    /// An empty set starts the transfer silently.
    pub struct TransferInterrupts: u8 {
        /// Half of the buffer has been filled
        const HALF_TRANSFER = 1 << 0;
        /// The whole buffer has been filled
        const TRANSFER_COMPLETE = 1 << 1;
        /// Bus or configuration error
        const TRANSFER_ERROR = 1 << 2;
    }
}

/// Events a channel reports back to the ADC
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DmaEvent {
    /// Half of the buffer has been filled
    HalfTransfer,
    /// The whole buffer has been filled
    TransferComplete,
    /// The channel reported an error
    TransferError,
    /// An abort started with [`TransferChannel::abort_async`] has finished
    AbortComplete,
}

/// Outcome of an asynchronous abort request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbortStatus {
    /// The channel stopped immediately
    Complete,
    /// The channel will report [`DmaEvent::AbortComplete`] once stopped
    Pending,
}

/// One peripheral-to-memory transfer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    /// Address of the data register to read from
    pub source: usize,
    /// Start of the destination buffer
    pub destination: usize,
    /// Number of elements
    pub len: usize,
    /// Element width
    pub width: DataWidth,
    /// Interrupts to raise during the transfer
    pub interrupts: TransferInterrupts,
}

/// A configured data-transfer channel bound to an ADC
pub trait TransferChannel {
    /// Channel-specific error
    type Error: Debug;

    /// Whether the channel was configured for one pass or circular operation
    fn mode(&self) -> TransferMode;

    /// Starts moving `request.len` elements from `request.source`
    ///
    /// # Safety
    ///
    /// `request.destination` must stay valid for writes of `request.len`
    /// elements of `request.width` until the transfer is aborted or, for
    /// [`TransferMode::Normal`], has completed.
    unsafe fn start(&mut self, request: TransferRequest) -> Result<(), Self::Error>;

    /// Aborts the transfer and waits for the channel to stop
    fn abort(&mut self) -> Result<(), Self::Error>;

    /// Requests an abort without waiting for it
    fn abort_async(&mut self) -> Result<AbortStatus, Self::Error>;
}

/// Marker for handles without a data-transfer channel
///
/// It has no values, so a handle typed with it can never have a channel
/// bound and all DMA operations report
/// [`Error::NoTransferChannel`](crate::adc::Error::NoTransferChannel).
#[derive(Debug)]
pub enum NoDma {}

impl TransferChannel for NoDma {
    type Error = core::convert::Infallible;

    fn mode(&self) -> TransferMode {
        match *self {}
    }

    unsafe fn start(&mut self, _request: TransferRequest) -> Result<(), Self::Error> {
        match *self {}
    }

    fn abort(&mut self) -> Result<(), Self::Error> {
        match *self {}
    }

    fn abort_async(&mut self) -> Result<AbortStatus, Self::Error> {
        match *self {}
    }
}

impl<C: TransferChannel + ?Sized> TransferChannel for &mut C {
    type Error = C::Error;

    fn mode(&self) -> TransferMode {
        (**self).mode()
    }

    unsafe fn start(&mut self, request: TransferRequest) -> Result<(), Self::Error> {
        (**self).start(request)
    }

    fn abort(&mut self) -> Result<(), Self::Error> {
        (**self).abort()
    }

    fn abort_async(&mut self) -> Result<AbortStatus, Self::Error> {
        (**self).abort_async()
    }
}
