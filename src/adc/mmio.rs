//! Memory-mapped register backend
//!
//! [`Mmio`] implements [`Registers`] for the STM32H7-class register layout
//! (one [`RegisterBlock`] per instance plus a [`CommonRegisterBlock`] shared
//! by a pair).
//
// Refer to RM0433 Rev 6 - Chapter 25.7

use vcell::VolatileCell;

use super::calibration::{CalibrationFactor, CalibrationMode};
use super::config::{
    AnalogWatchdog, ChannelConfig, Config, InjectedConfig, InjectedTrigger, InputMode,
    InternalChannels, LowPowerConfig, MultimodeConfig, OffsetConfig, OverrunMode,
    OversamplingConfig, OversamplingScope, PostProcessingConfig, RegularConfig, RegularTrigger,
    WatchdogChannels, WatchdogConfig, WatchdogGroups,
};
use super::regs::{DataTransfer, Event, InstanceId, Registers};
use super::Group;

/// Registers of one ADC instance
#[repr(C)]
pub struct RegisterBlock {
    /// Interrupt and status register, 0x00
    pub isr: VolatileCell<u32>,
    /// Interrupt enable register, 0x04
    pub ier: VolatileCell<u32>,
    /// Control register, 0x08
    pub cr: VolatileCell<u32>,
    /// Configuration register, 0x0C
    pub cfgr: VolatileCell<u32>,
    /// Configuration register 2, 0x10
    pub cfgr2: VolatileCell<u32>,
    /// Sample time registers, 0x14
    pub smpr: [VolatileCell<u32>; 2],
    /// Channel preselection register, 0x1C
    pub pcsel: VolatileCell<u32>,
    /// Watchdog 1 low threshold, 0x20
    pub ltr1: VolatileCell<u32>,
    /// Watchdog 1 high threshold, 0x24
    pub htr1: VolatileCell<u32>,
    _reserved0: [u32; 2],
    /// Regular sequence registers, 0x30
    pub sqr: [VolatileCell<u32>; 4],
    /// Regular data register, 0x40
    pub dr: VolatileCell<u32>,
    _reserved1: [u32; 2],
    /// Injected sequence register, 0x4C
    pub jsqr: VolatileCell<u32>,
    _reserved2: [u32; 4],
    /// Offset registers, 0x60
    pub ofr: [VolatileCell<u32>; 4],
    _reserved3: [u32; 4],
    /// Injected data registers, 0x80
    pub jdr: [VolatileCell<u32>; 4],
    _reserved4: [u32; 4],
    /// Watchdog 2 channel selection, 0xA0
    pub awd2cr: VolatileCell<u32>,
    /// Watchdog 3 channel selection, 0xA4
    pub awd3cr: VolatileCell<u32>,
    _reserved5: [u32; 2],
    /// Watchdog 2 low threshold, 0xB0
    pub ltr2: VolatileCell<u32>,
    /// Watchdog 2 high threshold, 0xB4
    pub htr2: VolatileCell<u32>,
    /// Watchdog 3 low threshold, 0xB8
    pub ltr3: VolatileCell<u32>,
    /// Watchdog 3 high threshold, 0xBC
    pub htr3: VolatileCell<u32>,
    /// Differential mode selection, 0xC0
    pub difsel: VolatileCell<u32>,
    /// Calibration factors, 0xC4
    pub calfact: VolatileCell<u32>,
    /// Linearity calibration factor, 0xC8
    pub calfact2: VolatileCell<u32>,
}

/// Registers shared by a pair of instances
#[repr(C)]
pub struct CommonRegisterBlock {
    /// Common status register, 0x00
    pub csr: VolatileCell<u32>,
    _reserved0: u32,
    /// Common control register, 0x08
    pub ccr: VolatileCell<u32>,
    /// Common regular data register for dual mode, 0x0C
    pub cdr: VolatileCell<u32>,
    /// Common regular data register for 32-bit dual mode, 0x10
    pub cdr2: VolatileCell<u32>,
}

const ADC1: usize = 0x4002_2000;
const ADC2: usize = 0x4002_2100;
const ADC12_COMMON: usize = 0x4002_2300;
const ADC3: usize = 0x5802_6000;
const ADC3_COMMON: usize = 0x5802_6300;

// CR
const ADEN: u32 = 1 << 0;
const ADDIS: u32 = 1 << 1;
const ADSTART: u32 = 1 << 2;
const JADSTART: u32 = 1 << 3;
const ADSTP: u32 = 1 << 4;
const JADSTP: u32 = 1 << 5;
const ADCALLIN: u32 = 1 << 16;
const ADVREGEN: u32 = 1 << 28;
const DEEPPWD: u32 = 1 << 29;
const ADCALDIF: u32 = 1 << 30;
const ADCAL: u32 = 1 << 31;
/// Bits that start an action when written as 1 and must never be written
/// back by a read-modify-write
const CR_ACTIONS: u32 = ADEN | ADDIS | ADSTART | JADSTART | ADSTP | JADSTP | ADCAL;

// CFGR
const DMNGT: u32 = 0b11;
const RES_SHIFT: u32 = 2;
const EXTSEL_SHIFT: u32 = 5;
const EXTEN_SHIFT: u32 = 10;
const OVRMOD: u32 = 1 << 12;
const CONT: u32 = 1 << 13;
const AUTDLY: u32 = 1 << 14;
const DISCEN: u32 = 1 << 16;
const DISCNUM_SHIFT: u32 = 17;
const JDISCEN: u32 = 1 << 20;
const AWD1SGL: u32 = 1 << 22;
const AWD1EN: u32 = 1 << 23;
const JAWD1EN: u32 = 1 << 24;
const JAUTO: u32 = 1 << 25;
const AWD1CH_SHIFT: u32 = 26;

// CFGR2
const ROVSE: u32 = 1 << 0;
const JOVSE: u32 = 1 << 1;
const OVSS_SHIFT: u32 = 5;
const TROVS: u32 = 1 << 9;
const ROVSM: u32 = 1 << 10;
const OVSR_SHIFT: u32 = 16;
const LSHIFT_SHIFT: u32 = 28;

// JSQR
const JEXTSEL_SHIFT: u32 = 2;
const JEXTEN_SHIFT: u32 = 7;
const JSQR_RANKS: u32 = !0x1ff;

// OFR
const OFFSET_CH_SHIFT: u32 = 26;
const SSATE: u32 = 1 << 31;

// CCR
const DUAL_SHIFT: u32 = 0;
const DELAY_SHIFT: u32 = 8;
const DAMDF_SHIFT: u32 = 14;
const VREFEN: u32 = 1 << 22;
const TSEN: u32 = 1 << 23;
const VBATEN: u32 = 1 << 24;

const ALL_CHANNELS: u32 = (1 << 20) - 1;

/// `(value & mask) << shift`
fn field(value: impl Into<u32>, mask: u32, shift: u32) -> u32 {
    (value.into() & mask) << shift
}

fn modify(cell: &VolatileCell<u32>, clear: u32, set: u32) {
    cell.set((cell.get() & !clear) | set);
}

fn flag(cond: bool, bit: u32) -> u32 {
    if cond {
        bit
    } else {
        0
    }
}

/// [`Registers`] over memory-mapped register blocks
pub struct Mmio {
    instance: InstanceId,
    regs: &'static RegisterBlock,
    common: &'static CommonRegisterBlock,
}

impl Mmio {
    /// Uses the register blocks at `regs` and `common`
    ///
    /// # Safety
    ///
    /// Both pointers must point to the register blocks of a real instance
    /// (or memory laid out like one) that stays valid for the program's
    /// lifetime, and no other code may drive that instance.
    pub unsafe fn new(
        instance: InstanceId,
        regs: *const RegisterBlock,
        common: *const CommonRegisterBlock,
    ) -> Self {
        Self::from_static(instance, &*regs, &*common)
    }

    /// Uses register blocks the caller already holds
    pub fn from_static(
        instance: InstanceId,
        regs: &'static RegisterBlock,
        common: &'static CommonRegisterBlock,
    ) -> Self {
        Mmio {
            instance,
            regs,
            common,
        }
    }

    /// ADC1, master of the ADC1/ADC2 pair
    ///
    /// # Safety
    ///
    /// See [`Mmio::new`].
    pub unsafe fn adc1() -> Self {
        Self::new(InstanceId(1), ADC1 as *const _, ADC12_COMMON as *const _)
    }

    /// ADC2, slave of the ADC1/ADC2 pair
    ///
    /// # Safety
    ///
    /// See [`Mmio::new`].
    pub unsafe fn adc2() -> Self {
        Self::new(InstanceId(2), ADC2 as *const _, ADC12_COMMON as *const _)
    }

    /// ADC3, single instance with its own common block
    ///
    /// # Safety
    ///
    /// See [`Mmio::new`].
    pub unsafe fn adc3() -> Self {
        Self::new(InstanceId(3), ADC3 as *const _, ADC3_COMMON as *const _)
    }

    /// Instance register block
    pub fn register_block(&self) -> &'static RegisterBlock {
        self.regs
    }

    /// Common register block
    pub fn common_register_block(&self) -> &'static CommonRegisterBlock {
        self.common
    }

    /// Read-modify-write of CR that leaves the action bits alone
    fn modify_cr(&self, clear: u32, set: u32) {
        let value = self.regs.cr.get() & !CR_ACTIONS & !clear;
        self.regs.cr.set(value | set);
    }

    fn cr(&self, bit: u32) -> bool {
        self.regs.cr.get() & bit != 0
    }

    /// Action bit only, as required for ADEN/ADDIS/ADSTART/...
    fn cr_action(&self, bit: u32) {
        self.modify_cr(0, bit);
    }
}

impl Registers for Mmio {
    fn instance(&self) -> InstanceId {
        self.instance
    }

    fn is_deep_power_down(&self) -> bool {
        self.cr(DEEPPWD)
    }

    fn set_deep_power_down(&mut self, enable: bool) {
        if enable {
            self.modify_cr(ADVREGEN, DEEPPWD);
        } else {
            self.modify_cr(DEEPPWD, 0);
        }
    }

    fn is_regulator_enabled(&self) -> bool {
        self.cr(ADVREGEN)
    }

    fn set_regulator(&mut self, enable: bool) {
        if enable {
            self.modify_cr(0, ADVREGEN);
        } else {
            self.modify_cr(ADVREGEN, 0);
        }
    }

    fn is_enabled(&self) -> bool {
        self.cr(ADEN)
    }

    fn enable(&mut self) {
        self.cr_action(ADEN);
    }

    fn disable(&mut self) {
        self.cr_action(ADDIS);
    }

    fn is_disable_ongoing(&self) -> bool {
        self.cr(ADDIS)
    }

    fn start_calibration(&mut self, mode: CalibrationMode) {
        let (dif, lin) = match mode {
            CalibrationMode::SingleEnded => (0, 0),
            CalibrationMode::Differential => (ADCALDIF, 0),
            CalibrationMode::SingleEndedLinearity => (0, ADCALLIN),
        };
        self.modify_cr(ADCALDIF | ADCALLIN, dif | lin);
        self.cr_action(ADCAL);
    }

    fn is_calibration_ongoing(&self) -> bool {
        self.cr(ADCAL)
    }

    fn calibration_factor(&self) -> CalibrationFactor {
        let calfact = self.regs.calfact.get();
        CalibrationFactor {
            single_ended: (calfact & 0x7ff) as u16,
            differential: ((calfact >> 16) & 0x7ff) as u16,
        }
    }

    fn set_calibration_factor(&mut self, factor: CalibrationFactor) {
        self.regs.calfact.set(
            field(factor.single_ended, 0x7ff, 0) | field(factor.differential, 0x7ff, 16),
        );
    }

    fn start_conversion(&mut self, group: Group) {
        self.cr_action(match group {
            Group::Regular => ADSTART,
            Group::Injected => JADSTART,
        });
    }

    fn stop_conversion(&mut self, group: Group) {
        self.cr_action(match group {
            Group::Regular => ADSTP,
            Group::Injected => JADSTP,
        });
    }

    fn is_conversion_ongoing(&self, group: Group) -> bool {
        self.cr(match group {
            Group::Regular => ADSTART,
            Group::Injected => JADSTART,
        })
    }

    fn is_stop_ongoing(&self, group: Group) -> bool {
        self.cr(match group {
            Group::Regular => ADSTP,
            Group::Injected => JADSTP,
        })
    }

    fn flags(&self) -> Event {
        Event::from_bits_truncate(self.regs.isr.get())
    }

    fn clear_flags(&mut self, events: Event) {
        // Write 1 to clear
        self.regs.isr.set(events.bits());
    }

    fn interrupts(&self) -> Event {
        Event::from_bits_truncate(self.regs.ier.get())
    }

    fn enable_interrupts(&mut self, events: Event) {
        modify(&self.regs.ier, 0, events.bits());
    }

    fn disable_interrupts(&mut self, events: Event) {
        modify(&self.regs.ier, events.bits(), 0);
    }

    fn set_data_transfer(&mut self, mode: DataTransfer) {
        let dmngt = match mode {
            DataTransfer::None => 0b00,
            DataTransfer::Limited => 0b01,
            DataTransfer::Unlimited => 0b11,
        };
        modify(&self.regs.cfgr, DMNGT, dmngt);
    }

    fn data_transfer(&self) -> DataTransfer {
        match self.regs.cfgr.get() & DMNGT {
            0b01 => DataTransfer::Limited,
            0b11 => DataTransfer::Unlimited,
            _ => DataTransfer::None,
        }
    }

    fn data_address(&self) -> usize {
        &self.regs.dr as *const _ as usize
    }

    fn read_regular_data(&self) -> u32 {
        self.regs.dr.get()
    }

    fn read_injected_data(&self, rank: u8) -> u32 {
        let index = usize::from(rank.saturating_sub(1)).min(3);
        self.regs.jdr[index].get()
    }

    fn write_config(&mut self, config: &Config) {
        modify(
            &self.regs.cfgr,
            0b111 << RES_SHIFT,
            field(u8::from(config.resolution), 0b111, RES_SHIFT),
        );
    }

    fn write_regular_config(&mut self, config: &RegularConfig) {
        let trigger = match config.trigger {
            RegularTrigger::Software => 0,
            RegularTrigger::External { source, edge } => {
                field(source, 0x1f, EXTSEL_SHIFT) | field(u8::from(edge), 0b11, EXTEN_SHIFT)
            }
        };
        let discontinuous = match config.discontinuous {
            Some(count) => DISCEN | field(count.saturating_sub(1), 0b111, DISCNUM_SHIFT),
            None => 0,
        };
        let clear = (0x1f << EXTSEL_SHIFT)
            | (0b11 << EXTEN_SHIFT)
            | OVRMOD
            | CONT
            | DISCEN
            | (0b111 << DISCNUM_SHIFT);
        let set = trigger
            | discontinuous
            | flag(config.overrun == OverrunMode::Overwritten, OVRMOD)
            | flag(config.continuous, CONT);
        modify(&self.regs.cfgr, clear, set);

        modify(
            &self.regs.sqr[0],
            0xf,
            field(config.sequencer_length.saturating_sub(1), 0xf, 0),
        );
    }

    fn write_injected_config(&mut self, config: &InjectedConfig) {
        let trigger = match config.trigger {
            InjectedTrigger::External { source, edge } => {
                field(source, 0x1f, JEXTSEL_SHIFT) | field(u8::from(edge), 0b11, JEXTEN_SHIFT)
            }
            InjectedTrigger::Software | InjectedTrigger::FromRegular => 0,
        };
        let length = field(config.sequencer_length.saturating_sub(1), 0b11, 0);
        modify(&self.regs.jsqr, !JSQR_RANKS, length | trigger);

        let set = flag(config.discontinuous, JDISCEN)
            | flag(config.trigger == InjectedTrigger::FromRegular, JAUTO);
        modify(&self.regs.cfgr, JDISCEN | JAUTO, set);
    }

    fn write_channel_config(&mut self, config: &ChannelConfig) {
        let channel = u32::from(config.channel);
        let rank = u32::from(config.rank);

        match config.group {
            Group::Regular => {
                // SQR1 holds L plus ranks 1-4, SQR2-4 hold five ranks each
                let (reg, slot) = match rank {
                    1..=4 => (0, rank),
                    _ => ((rank as usize - 5) / 5 + 1, (rank - 5) % 5),
                };
                let shift = 6 * slot;
                modify(&self.regs.sqr[reg], 0x1f << shift, field(channel, 0x1f, shift));
            }
            Group::Injected => {
                let shift = 9 + 6 * (rank - 1);
                modify(&self.regs.jsqr, 0x1f << shift, field(channel, 0x1f, shift));
            }
        }

        let (smpr, shift) = if channel < 10 {
            (0, 3 * channel)
        } else {
            (1, 3 * (channel - 10))
        };
        modify(
            &self.regs.smpr[smpr],
            0b111 << shift,
            field(u8::from(config.sample_time), 0b111, shift),
        );

        let bit = 1 << channel;
        let differential = config.input == InputMode::Differential;
        modify(&self.regs.difsel, bit, flag(differential, bit));
        modify(&self.regs.pcsel, 0, bit);
    }

    fn write_post_processing(&mut self, config: &PostProcessingConfig) {
        modify(
            &self.regs.cfgr2,
            0xf << LSHIFT_SHIFT,
            field(config.left_shift.value(), 0xf, LSHIFT_SHIFT),
        );
    }

    fn write_low_power(&mut self, config: &LowPowerConfig) {
        modify(&self.regs.cfgr, AUTDLY, flag(config.auto_wait, AUTDLY));
    }

    fn write_watchdog(&mut self, config: &WatchdogConfig) {
        let low = config.low & 0x3ff_ffff;
        let high = config.high & 0x3ff_ffff;
        match config.watchdog {
            AnalogWatchdog::Awd1 => {
                let enabled = config.channels != WatchdogChannels::Disabled;
                let regular = enabled && config.groups != WatchdogGroups::Injected;
                let injected = enabled && config.groups != WatchdogGroups::Regular;
                let single = match config.channels {
                    WatchdogChannels::Single(channel) => {
                        AWD1SGL | field(channel, 0x1f, AWD1CH_SHIFT)
                    }
                    _ => 0,
                };
                modify(
                    &self.regs.cfgr,
                    AWD1SGL | AWD1EN | JAWD1EN | (0x1f << AWD1CH_SHIFT),
                    single | flag(regular, AWD1EN) | flag(injected, JAWD1EN),
                );
                self.regs.ltr1.set(low);
                self.regs.htr1.set(high);
            }
            AnalogWatchdog::Awd2 | AnalogWatchdog::Awd3 => {
                let channels = match config.channels {
                    WatchdogChannels::Disabled => 0,
                    WatchdogChannels::All => ALL_CHANNELS,
                    WatchdogChannels::Single(channel) => 1 << channel,
                };
                let (cr, ltr, htr) = if config.watchdog == AnalogWatchdog::Awd2 {
                    (&self.regs.awd2cr, &self.regs.ltr2, &self.regs.htr2)
                } else {
                    (&self.regs.awd3cr, &self.regs.ltr3, &self.regs.htr3)
                };
                cr.set(channels);
                ltr.set(low);
                htr.set(high);
            }
        }
    }

    fn write_oversampling(&mut self, config: &OversamplingConfig) {
        let (regular, injected) = match config.scope {
            OversamplingScope::Disabled => (false, false),
            OversamplingScope::Regular => (true, false),
            OversamplingScope::Injected => (false, true),
            OversamplingScope::Both => (true, true),
        };
        let clear = ROVSE
            | JOVSE
            | (0xf << OVSS_SHIFT)
            | TROVS
            | ROVSM
            | (0x3ff << OVSR_SHIFT);
        let set = flag(regular, ROVSE)
            | flag(injected, JOVSE)
            | field(config.right_shift, 0xf, OVSS_SHIFT)
            | flag(config.triggered, TROVS)
            | flag(config.resumed, ROVSM)
            | field(config.ratio.saturating_sub(1), 0x3ff, OVSR_SHIFT);
        modify(&self.regs.cfgr2, clear, set);
    }

    fn write_offset(&mut self, config: &OffsetConfig) {
        let value = match config.channel {
            Some(channel) => {
                field(config.value, 0x3ff_ffff, 0)
                    | field(channel, 0x1f, OFFSET_CH_SHIFT)
                    | flag(config.signed_saturation, SSATE)
            }
            // A zero offset disables the slot
            None => 0,
        };
        self.regs.ofr[config.offset.index()].set(value);
    }

    fn internal_channels(&self) -> InternalChannels {
        let ccr = self.common.ccr.get();
        let mut channels = InternalChannels::empty();
        channels.set(InternalChannels::VREFINT, ccr & VREFEN != 0);
        channels.set(InternalChannels::TEMPSENSOR, ccr & TSEN != 0);
        channels.set(InternalChannels::VBAT, ccr & VBATEN != 0);
        channels
    }

    fn set_internal_channels(&mut self, channels: InternalChannels) {
        let set = flag(channels.contains(InternalChannels::VREFINT), VREFEN)
            | flag(channels.contains(InternalChannels::TEMPSENSOR), TSEN)
            | flag(channels.contains(InternalChannels::VBAT), VBATEN);
        modify(&self.common.ccr, VREFEN | TSEN | VBATEN, set);
    }

    fn write_multimode(&mut self, config: &MultimodeConfig) {
        let clear = (0x1f << DUAL_SHIFT) | (0xf << DELAY_SHIFT) | (0b11 << DAMDF_SHIFT);
        let set = field(u8::from(config.mode), 0x1f, DUAL_SHIFT)
            | field(config.delay, 0xf, DELAY_SHIFT)
            | field(u8::from(config.packing), 0b11, DAMDF_SHIFT);
        modify(&self.common.ccr, clear, set);
    }

    fn common_data_address(&self) -> usize {
        &self.common.cdr as *const _ as usize
    }

    fn read_common_data(&self) -> u32 {
        self.common.cdr.get()
    }
}
