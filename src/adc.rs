//! # ADC driver
//!
//! [`Adc`] owns one ADC instance (through a [`Registers`] implementation), a
//! [`Timebase`] for settling delays and timeouts, an optional
//! [`TransferChannel`] and a [`Callbacks`] receiver. It tracks three layers
//! of state:
//!
//! - the global [`GlobalState`] of the instance,
//! - one [`GroupState`] per conversion [`Group`],
//! - the [`CommonState`] shared with the other members of a link chain.
//!
//! Every operation checks the state it starts from and returns
//! [`Error::InvalidState`] instead of touching the hardware when the check
//! fails. Paired instances are driven through a [`Cluster`].
//!
//! ```ignore
//! let mut adc = Adc::new(regs, McycleDelay::new(108.mhz()));
//! adc.set_config(Config::default().resolution(Resolution::Bits12))?;
//! adc.set_regular_config(RegularConfig::default())?;
//! adc.set_channel_config(ChannelConfig::new(3, Group::Regular))?;
//! adc.start()?;
//! adc.reg_start_conv()?;
//! adc.reg_poll_for_conv(10.ms())?;
//! let sample = adc.reg_get_value();
//! ```

mod callbacks;
mod calibration;
pub mod config;
mod conversion;
mod error;
mod interrupt;
pub mod mmio;
mod multimode;
pub mod regs;
mod sequencer;
mod state;
mod transfer;

pub use self::callbacks::{Callbacks, NoCallbacks};
pub use self::calibration::{
    CalibrationFactor, CalibrationMode, CALIBRATION_TIMEOUT, POST_CALIBRATION_DELAY_CYCLES,
};
pub use self::config::{
    AnalogWatchdog, ChannelConfig, Config, DataPacking, InjectedConfig, InjectedTrigger,
    InputMode, InternalChannels, LeftShift, LowPowerConfig, MultimodeConfig, MultimodeMode,
    OffsetConfig, OffsetNumber, OverrunMode, OversamplingConfig, OversamplingScope,
    PostProcessingConfig, RegularConfig, RegularTrigger, Resolution, SampleTime, TriggerEdge,
    WatchdogChannels, WatchdogConfig, WatchdogGroups,
};
pub use self::error::{Error, ErrorCode, Result};
pub use self::multimode::{Cluster, HandleId, MultimodeValue};
pub use self::regs::{DataTransfer, Event, InstanceId, Registers};
pub use self::sequencer::{
    DISABLE_TIMEOUT, ENABLE_TIMEOUT, REGULATOR_STABILIZATION_US, STOP_TIMEOUT,
    TEMPSENSOR_STABILIZATION_US, VREFINT_STABILIZATION_US,
};
pub use self::state::{Cardinality, CommonState, GlobalState, GroupState};
pub use self::transfer::StartResult;

use crate::dma::{NoDma, TransferChannel};
use crate::time::Timebase;

use self::config::MAX_CHANNEL;
use self::state::{require, transition};
use self::transfer::TransferState;

/// Conversion group
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Group {
    /// Regular group, up to 16 ranks, optional DMA
    Regular,
    /// Injected group, up to 4 ranks with their own data registers
    Injected,
}

impl Group {
    /// Both groups, regular first
    pub const ALL: [Group; 2] = [Group::Regular, Group::Injected];

    pub(crate) fn index(self) -> usize {
        match self {
            Group::Regular => 0,
            Group::Injected => 1,
        }
    }
}

const CHANNELS: usize = MAX_CHANNEL as usize + 1;

/// Configuration last written through the handle
#[derive(Clone, Copy, Debug)]
struct Settings {
    config: Config,
    regular: RegularConfig,
    injected: InjectedConfig,
    channels: [Option<ChannelConfig>; CHANNELS],
    post_processing: PostProcessingConfig,
    low_power: LowPowerConfig,
    watchdogs: [WatchdogConfig; 3],
    oversampling: OversamplingConfig,
    offsets: [OffsetConfig; 4],
}

impl Settings {
    fn new() -> Self {
        Self {
            config: Config::default(),
            regular: RegularConfig::default(),
            injected: InjectedConfig::default(),
            channels: [None; CHANNELS],
            post_processing: PostProcessingConfig::default(),
            low_power: LowPowerConfig::default(),
            watchdogs: [
                WatchdogConfig::new(AnalogWatchdog::Awd1),
                WatchdogConfig::new(AnalogWatchdog::Awd2),
                WatchdogConfig::new(AnalogWatchdog::Awd3),
            ],
            oversampling: OversamplingConfig::default(),
            offsets: [
                OffsetConfig::new(OffsetNumber::One),
                OffsetConfig::new(OffsetNumber::Two),
                OffsetConfig::new(OffsetNumber::Three),
                OffsetConfig::new(OffsetNumber::Four),
            ],
        }
    }
}

/// ADC instance handle
pub struct Adc<R, T, C = NoCallbacks, D = NoDma> {
    regs: R,
    timebase: T,
    callbacks: C,
    dma: Option<D>,
    state: GlobalState,
    groups: [GroupState; 2],
    cardinality: [Cardinality; 2],
    common: CommonState,
    last_error: ErrorCode,
    /// Interrupts enabled by the running conversion of each group
    it_enabled: [Event; 2],
    transfer: TransferState,
    settings: Settings,
}

impl<R: Registers, T: Timebase> Adc<R, T> {
    /// Binds a handle to the instance behind `regs`
    ///
    /// The handle starts in [`GlobalState::Init`] with both groups in
    /// [`GroupState::Reset`], no callbacks and no transfer channel.
    pub fn new(regs: R, timebase: T) -> Self {
        debug!("adc{}: init", regs.instance().0);
        Adc {
            regs,
            timebase,
            callbacks: NoCallbacks,
            dma: None,
            state: GlobalState::Init,
            groups: [GroupState::Reset; 2],
            cardinality: [Cardinality::Unit; 2],
            common: CommonState::Independent,
            last_error: ErrorCode::empty(),
            it_enabled: [Event::empty(); 2],
            transfer: TransferState::default(),
            settings: Settings::new(),
        }
    }
}

impl<R, T, C> Adc<R, T, C, NoDma> {
    /// Binds a transfer channel, enabling the `*_dma` operations
    pub fn with_dma<D: TransferChannel>(self, channel: D) -> Adc<R, T, C, D> {
        Adc {
            regs: self.regs,
            timebase: self.timebase,
            callbacks: self.callbacks,
            dma: Some(channel),
            state: self.state,
            groups: self.groups,
            cardinality: self.cardinality,
            common: self.common,
            last_error: self.last_error,
            it_enabled: self.it_enabled,
            transfer: self.transfer,
            settings: self.settings,
        }
    }
}

impl<R, T, C, D> Adc<R, T, C, D> {
    /// Replaces the callback receiver
    pub fn with_callbacks<C2: Callbacks>(self, callbacks: C2) -> Adc<R, T, C2, D> {
        Adc {
            regs: self.regs,
            timebase: self.timebase,
            callbacks,
            dma: self.dma,
            state: self.state,
            groups: self.groups,
            cardinality: self.cardinality,
            common: self.common,
            last_error: self.last_error,
            it_enabled: self.it_enabled,
            transfer: self.transfer,
            settings: self.settings,
        }
    }

    /// Releases the register block, timebase, callbacks and transfer channel
    pub fn free(self) -> (R, T, C, Option<D>) {
        (self.regs, self.timebase, self.callbacks, self.dma)
    }

    /// Global state
    pub fn state(&self) -> GlobalState {
        self.state
    }

    /// State of `group`
    pub fn group_state(&self, group: Group) -> GroupState {
        self.groups[group.index()]
    }

    /// Multimode state
    pub fn common_state(&self) -> CommonState {
        self.common
    }

    /// Results one trigger produces on `group` with the current configuration
    pub fn cardinality(&self, group: Group) -> Cardinality {
        self.cardinality[group.index()]
    }

    /// Error bits accumulated since the last [`take_last_error_codes`]
    ///
    /// [`take_last_error_codes`]: Adc::take_last_error_codes
    pub fn last_error_codes(&self) -> ErrorCode {
        self.last_error
    }

    /// Returns and clears the accumulated error bits
    pub fn take_last_error_codes(&mut self) -> ErrorCode {
        core::mem::replace(&mut self.last_error, ErrorCode::empty())
    }

    /// Bound transfer channel
    pub fn transfer_channel(&self) -> Option<&D> {
        self.dma.as_ref()
    }

    /// Bound transfer channel
    pub fn transfer_channel_mut(&mut self) -> Option<&mut D> {
        self.dma.as_mut()
    }

    /// Instance-wide configuration
    pub fn config(&self) -> Config {
        self.settings.config
    }

    /// Regular group configuration
    pub fn regular_config(&self) -> RegularConfig {
        self.settings.regular
    }

    /// Injected group configuration
    pub fn injected_config(&self) -> InjectedConfig {
        self.settings.injected
    }

    /// Last placement written for `channel`
    pub fn channel_config(&self, channel: u8) -> Option<ChannelConfig> {
        self.settings
            .channels
            .get(usize::from(channel))
            .copied()
            .flatten()
    }

    /// Post-processing configuration
    pub fn post_processing_config(&self) -> PostProcessingConfig {
        self.settings.post_processing
    }

    /// Low-power configuration
    pub fn low_power_config(&self) -> LowPowerConfig {
        self.settings.low_power
    }

    /// Configuration of `watchdog`
    pub fn watchdog_config(&self, watchdog: AnalogWatchdog) -> WatchdogConfig {
        self.settings.watchdogs[watchdog.index()]
    }

    /// Oversampling configuration
    pub fn oversampling_config(&self) -> OversamplingConfig {
        self.settings.oversampling
    }

    /// Configuration of offset slot `offset`
    pub fn offset_config(&self, offset: OffsetNumber) -> OffsetConfig {
        self.settings.offsets[offset.index()]
    }

    pub(crate) fn set_common_state(&mut self, common: CommonState) -> Result<()> {
        transition(&mut self.common, common)
    }

    fn no_group_active(&self) -> Result<()> {
        if self.groups.iter().any(|g| g.is_active()) {
            debug!("configuration rejected while a group is converting");
            Err(Error::InvalidState)
        } else {
            Ok(())
        }
    }

    fn derive_cardinality(&mut self) {
        let regular = &self.settings.regular;
        let reg = if regular.is_software_triggered()
            && !regular.continuous
            && regular.discontinuous.is_none()
        {
            Cardinality::Unit
        } else {
            Cardinality::Multiple
        };

        let injected = &self.settings.injected;
        let inj = match injected.trigger {
            InjectedTrigger::FromRegular => reg,
            InjectedTrigger::Software if !injected.discontinuous => Cardinality::Unit,
            _ => Cardinality::Multiple,
        };

        self.cardinality = [reg, inj];
    }
}

impl<R, T, C, D> Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Physical instance of this handle
    pub fn instance(&self) -> InstanceId {
        self.regs.instance()
    }

    /// Re-initializes a handle torn down with [`deinit`](Adc::deinit)
    pub fn init(&mut self) -> Result<()> {
        require(self.state, &[GlobalState::Reset])?;
        transition(&mut self.state, GlobalState::Init)
    }

    /// Tears the handle down
    ///
    /// Stops running conversions and the analog core, forgets all
    /// configuration and returns the state to [`GlobalState::Reset`]. Hardware
    /// failures along the way are ignored. Does nothing on a handle that is
    /// already reset. Returns the transfer channel that was bound.
    ///
    /// Chain membership is owned by the [`Cluster`] and the Common State is
    /// left as it is. A linked handle torn down here leaves its chain at the
    /// cluster's next chain operation; [`Cluster::deinit`] unlinks it right
    /// away.
    pub fn deinit(&mut self) -> Option<D> {
        if self.state == GlobalState::Reset {
            return None;
        }

        for group in Group::ALL {
            if self.groups[group.index()].is_active() {
                self.teardown_group(group);
            }
        }
        if matches!(self.state, GlobalState::Active | GlobalState::Calibrating) {
            if let Err(_e) = self.stop() {
                warn!("adc{}: stop failed during deinit: {:?}", self.instance().0, _e);
            }
        }

        self.regs.disable_interrupts(Event::all());
        self.regs.clear_flags(Event::all());
        self.regs.set_data_transfer(DataTransfer::None);

        self.state = GlobalState::Reset;
        self.groups = [GroupState::Reset; 2];
        self.cardinality = [Cardinality::Unit; 2];
        self.last_error = ErrorCode::empty();
        self.it_enabled = [Event::empty(); 2];
        self.transfer = TransferState::default();
        self.settings = Settings::new();
        debug!("adc{}: deinit", self.instance().0);

        self.dma.take()
    }

    /// Binds `channel`, returning the previously bound one
    ///
    /// Rejected while a DMA transfer is running or an abort is pending.
    pub fn bind_transfer_channel(&mut self, channel: D) -> Result<Option<D>> {
        if self.transfer.in_use() {
            return Err(Error::InvalidState);
        }
        Ok(self.dma.replace(channel))
    }

    /// Applies the instance-wide configuration
    ///
    /// Allowed before the core is started. The first call moves the handle
    /// from `Init` to `Configuring`.
    pub fn set_config(&mut self, config: Config) -> Result<()> {
        require(
            self.state,
            &[GlobalState::Init, GlobalState::Configuring, GlobalState::Idle],
        )?;

        self.regs.write_config(&config);
        self.settings.config = config;
        if self.state == GlobalState::Init {
            transition(&mut self.state, GlobalState::Configuring)?;
        }
        Ok(())
    }

    /// Applies the regular group configuration
    pub fn set_regular_config(&mut self, config: RegularConfig) -> Result<()> {
        self.group_config_allowed(Group::Regular)?;
        config.validate()?;

        self.regs.write_regular_config(&config);
        self.settings.regular = config;
        self.group_configured(Group::Regular)
    }

    /// Applies the injected group configuration
    pub fn set_injected_config(&mut self, config: InjectedConfig) -> Result<()> {
        self.group_config_allowed(Group::Injected)?;
        config.validate()?;

        self.regs.write_injected_config(&config);
        self.settings.injected = config;
        self.group_configured(Group::Injected)
    }

    fn group_config_allowed(&self, group: Group) -> Result<()> {
        require(
            self.state,
            &[GlobalState::Configuring, GlobalState::Idle, GlobalState::Active],
        )?;
        require(
            self.groups[group.index()],
            &[GroupState::Reset, GroupState::Idle],
        )
    }

    fn group_configured(&mut self, group: Group) -> Result<()> {
        transition(&mut self.groups[group.index()], GroupState::Idle)?;
        if self.state == GlobalState::Configuring {
            transition(&mut self.state, GlobalState::Idle)?;
        }
        self.derive_cardinality();
        Ok(())
    }

    fn settings_allowed(&self) -> Result<()> {
        require(
            self.state,
            &[GlobalState::Configuring, GlobalState::Idle, GlobalState::Active],
        )?;
        self.no_group_active()
    }

    /// Places a channel in a group's sequencer
    pub fn set_channel_config(&mut self, config: ChannelConfig) -> Result<()> {
        self.settings_allowed()?;
        config.validate()?;

        self.regs.write_channel_config(&config);
        self.settings.channels[usize::from(config.channel)] = Some(config);
        Ok(())
    }

    /// Applies result post-processing
    pub fn set_post_processing_config(&mut self, config: PostProcessingConfig) -> Result<()> {
        self.settings_allowed()?;

        self.regs.write_post_processing(&config);
        self.settings.post_processing = config;
        Ok(())
    }

    /// Applies low-power features
    pub fn set_low_power_config(&mut self, config: LowPowerConfig) -> Result<()> {
        self.settings_allowed()?;

        self.regs.write_low_power(&config);
        self.settings.low_power = config;
        Ok(())
    }

    /// Configures one analog watchdog
    pub fn set_watchdog_config(&mut self, config: WatchdogConfig) -> Result<()> {
        self.settings_allowed()?;
        config.validate()?;

        self.regs.write_watchdog(&config);
        self.settings.watchdogs[config.watchdog.index()] = config;
        Ok(())
    }

    /// Configures oversampling
    pub fn set_oversampling_config(&mut self, config: OversamplingConfig) -> Result<()> {
        self.settings_allowed()?;
        config.validate()?;

        self.regs.write_oversampling(&config);
        self.settings.oversampling = config;
        Ok(())
    }

    /// Configures one offset slot
    pub fn set_offset_config(&mut self, config: OffsetConfig) -> Result<()> {
        self.settings_allowed()?;
        config.validate()?;

        self.regs.write_offset(&config);
        self.settings.offsets[config.offset.index()] = config;
        Ok(())
    }

    /// Enables internal measurement paths on the common instance
    ///
    /// Only while the core is off; enabled paths lengthen [`start`].
    ///
    /// [`start`]: Adc::start
    pub fn set_internal_channels(&mut self, channels: InternalChannels) -> Result<()> {
        require(
            self.state,
            &[GlobalState::Init, GlobalState::Configuring, GlobalState::Idle],
        )?;
        self.regs.set_internal_channels(channels);
        Ok(())
    }

    /// Internal measurement paths enabled on the common instance
    pub fn internal_channels(&self) -> InternalChannels {
        self.regs.internal_channels()
    }

    pub(crate) fn write_multimode(&mut self, config: &MultimodeConfig) {
        self.regs.write_multimode(config);
    }
}
