//! Behavioural models of the hardware the driver talks to

use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayUs;

use crate::adc::{
    Adc, AnalogWatchdog, CalibrationFactor, CalibrationMode, Callbacks, ChannelConfig, Config,
    DataTransfer, ErrorCode, Event, Group, InjectedConfig, InstanceId, InternalChannels,
    LowPowerConfig, MultimodeConfig, NoCallbacks, OffsetConfig, OversamplingConfig,
    PostProcessingConfig, Registers, RegularConfig, WatchdogConfig,
};
use crate::dma::{AbortStatus, NoDma, TransferChannel, TransferMode, TransferRequest};
use crate::time::{Milliseconds, TickSource};

/// Observable state of one modelled instance
///
/// The knobs (`never_ready`, `stop_hangs`, ...) make the model misbehave
/// the way real silicon can.
#[derive(Debug)]
pub struct Hw {
    pub instance: InstanceId,

    pub deep_power_down: bool,
    pub regulator: bool,
    pub enabled: bool,
    pub disabling: bool,
    pub never_disable: bool,
    pub never_ready: bool,
    pub drop_next_enable: bool,
    pub drop_enable_after_calibration: bool,

    /// Polls of the calibration bit before it clears
    pub calibration_polls: u32,
    pub calibrating: Option<u32>,
    pub calibration_mode: Option<CalibrationMode>,
    pub calibration_factor: CalibrationFactor,

    pub ongoing: [bool; 2],
    pub stopping: [bool; 2],
    pub stop_hangs: bool,
    /// Flags raised by each start command
    pub on_start: [Event; 2],
    /// The conversion is over as soon as it starts
    pub finish_on_start: [bool; 2],
    pub starts: [u32; 2],

    pub flags: Event,
    pub interrupts: Event,
    pub data_transfer: DataTransfer,
    pub data_address: usize,
    pub regular_data: u32,
    pub injected_data: [u32; 4],
    pub internal: InternalChannels,
    pub multimode: Option<MultimodeConfig>,
    pub common_data: u32,
    pub common_data_address: usize,

    pub config: Option<Config>,
    pub regular_config: Option<RegularConfig>,
    pub injected_config: Option<InjectedConfig>,
    pub channels: Vec<ChannelConfig>,

    pub enable_requests: u32,
    pub disable_requests: u32,
    pub register_writes: u32,
    pub delays: Vec<u32>,
}

impl Hw {
    fn new(instance: u8) -> Self {
        Hw {
            instance: InstanceId(instance),
            deep_power_down: true,
            regulator: false,
            enabled: false,
            disabling: false,
            never_disable: false,
            never_ready: false,
            drop_next_enable: false,
            drop_enable_after_calibration: false,
            calibration_polls: 2,
            calibrating: None,
            calibration_mode: None,
            calibration_factor: CalibrationFactor::default(),
            ongoing: [false; 2],
            stopping: [false; 2],
            stop_hangs: false,
            on_start: [Event::empty(); 2],
            finish_on_start: [false; 2],
            starts: [0; 2],
            flags: Event::empty(),
            interrupts: Event::empty(),
            data_transfer: DataTransfer::None,
            data_address: 0x4002_2040 + 0x100 * usize::from(instance),
            regular_data: 0,
            injected_data: [0; 4],
            internal: InternalChannels::empty(),
            multimode: None,
            common_data: 0,
            common_data_address: 0x4002_230c,
            config: None,
            regular_config: None,
            injected_config: None,
            channels: Vec::new(),
            enable_requests: 0,
            disable_requests: 0,
            register_writes: 0,
            delays: Vec::new(),
        }
    }

    /// Sets event flags as the hardware would
    pub fn raise(&mut self, events: Event) {
        self.flags |= events;
    }

    fn poll_calibration(&mut self) -> bool {
        match self.calibrating {
            None => false,
            Some(0) => {
                self.calibrating = None;
                if self.drop_enable_after_calibration {
                    self.drop_next_enable = true;
                }
                false
            }
            Some(n) => {
                self.calibrating = Some(n - 1);
                true
            }
        }
    }
}

/// Register model shared between a handle and its test
#[derive(Clone)]
pub struct MockAdc(Rc<RefCell<Hw>>);

impl MockAdc {
    pub fn new(instance: u8) -> Self {
        MockAdc(Rc::new(RefCell::new(Hw::new(instance))))
    }

    pub fn hw(&self) -> RefMut<'_, Hw> {
        self.0.borrow_mut()
    }

    fn touch(&mut self) {
        self.0.borrow_mut().register_writes += 1;
    }

    fn write(&mut self) -> RefMut<'_, Hw> {
        self.touch();
        self.0.borrow_mut()
    }
}

impl Registers for MockAdc {
    fn instance(&self) -> InstanceId {
        self.hw().instance
    }

    fn is_deep_power_down(&self) -> bool {
        self.hw().deep_power_down
    }

    fn set_deep_power_down(&mut self, enable: bool) {
        self.write().deep_power_down = enable;
    }

    fn is_regulator_enabled(&self) -> bool {
        self.hw().regulator
    }

    fn set_regulator(&mut self, enable: bool) {
        self.write().regulator = enable;
    }

    fn is_enabled(&self) -> bool {
        self.hw().enabled
    }

    fn enable(&mut self) {
        let mut hw = self.write();
        hw.enable_requests += 1;
        if hw.drop_next_enable {
            hw.drop_next_enable = false;
            return;
        }
        hw.enabled = true;
        if !hw.never_ready {
            hw.flags |= Event::READY;
        }
    }

    fn disable(&mut self) {
        let mut hw = self.write();
        hw.disable_requests += 1;
        if hw.never_disable {
            hw.disabling = true;
        } else {
            hw.enabled = false;
        }
    }

    fn is_disable_ongoing(&self) -> bool {
        self.hw().disabling
    }

    fn start_calibration(&mut self, mode: CalibrationMode) {
        let mut hw = self.write();
        hw.calibration_mode = Some(mode);
        hw.calibrating = Some(hw.calibration_polls);
    }

    fn is_calibration_ongoing(&self) -> bool {
        self.hw().poll_calibration()
    }

    fn calibration_factor(&self) -> CalibrationFactor {
        self.hw().calibration_factor
    }

    fn set_calibration_factor(&mut self, factor: CalibrationFactor) {
        self.write().calibration_factor = factor;
    }

    fn start_conversion(&mut self, group: Group) {
        let mut hw = self.write();
        let i = group.index();
        hw.starts[i] += 1;
        hw.ongoing[i] = !hw.finish_on_start[i];
        let raised = hw.on_start[i];
        hw.flags |= raised;
    }

    fn stop_conversion(&mut self, group: Group) {
        let mut hw = self.write();
        let i = group.index();
        if hw.stop_hangs {
            hw.stopping[i] = true;
        } else {
            hw.ongoing[i] = false;
        }
    }

    fn is_conversion_ongoing(&self, group: Group) -> bool {
        self.hw().ongoing[group.index()]
    }

    fn is_stop_ongoing(&self, group: Group) -> bool {
        self.hw().stopping[group.index()]
    }

    fn flags(&self) -> Event {
        self.hw().flags
    }

    fn clear_flags(&mut self, events: Event) {
        self.write().flags.remove(events);
    }

    fn interrupts(&self) -> Event {
        self.hw().interrupts
    }

    fn enable_interrupts(&mut self, events: Event) {
        self.write().interrupts.insert(events);
    }

    fn disable_interrupts(&mut self, events: Event) {
        self.write().interrupts.remove(events);
    }

    fn set_data_transfer(&mut self, mode: DataTransfer) {
        self.write().data_transfer = mode;
    }

    fn data_transfer(&self) -> DataTransfer {
        self.hw().data_transfer
    }

    fn data_address(&self) -> usize {
        self.hw().data_address
    }

    fn read_regular_data(&self) -> u32 {
        self.hw().regular_data
    }

    fn read_injected_data(&self, rank: u8) -> u32 {
        self.hw().injected_data[usize::from(rank - 1)]
    }

    fn write_config(&mut self, config: &Config) {
        self.write().config = Some(*config);
    }

    fn write_regular_config(&mut self, config: &RegularConfig) {
        self.write().regular_config = Some(*config);
    }

    fn write_injected_config(&mut self, config: &InjectedConfig) {
        self.write().injected_config = Some(*config);
    }

    fn write_channel_config(&mut self, config: &ChannelConfig) {
        self.write().channels.push(*config);
    }

    fn write_post_processing(&mut self, _config: &PostProcessingConfig) {
        self.touch();
    }

    fn write_low_power(&mut self, _config: &LowPowerConfig) {
        self.touch();
    }

    fn write_watchdog(&mut self, _config: &WatchdogConfig) {
        self.touch();
    }

    fn write_oversampling(&mut self, _config: &OversamplingConfig) {
        self.touch();
    }

    fn write_offset(&mut self, _config: &OffsetConfig) {
        self.touch();
    }

    fn internal_channels(&self) -> InternalChannels {
        self.hw().internal
    }

    fn set_internal_channels(&mut self, channels: InternalChannels) {
        self.write().internal = channels;
    }

    fn write_multimode(&mut self, config: &MultimodeConfig) {
        self.write().multimode = Some(*config);
    }

    fn common_data_address(&self) -> usize {
        self.hw().common_data_address
    }

    fn read_common_data(&self) -> u32 {
        self.hw().common_data
    }
}

/// Millisecond tick that advances on every read, plus a recording delay
pub struct MockTimebase {
    hw: MockAdc,
    tick: Cell<u32>,
}

impl TickSource for MockTimebase {
    fn now(&self) -> Milliseconds {
        let t = self.tick.get();
        self.tick.set(t.wrapping_add(1));
        Milliseconds(t)
    }
}

impl DelayUs<u32> for MockTimebase {
    fn delay_us(&mut self, us: u32) {
        self.hw.hw().delays.push(us);
    }
}

/// What a [`MockChannel`] was asked to do
#[derive(Debug)]
pub struct ChannelState {
    pub mode: TransferMode,
    pub requests: Vec<TransferRequest>,
    pub fail_start: bool,
    pub fail_abort: bool,
    pub abort_status: AbortStatus,
    pub aborts: u32,
    pub async_aborts: u32,
}

/// Transfer channel model
#[derive(Clone)]
pub struct MockChannel(Rc<RefCell<ChannelState>>);

impl MockChannel {
    pub fn new(mode: TransferMode) -> Self {
        MockChannel(Rc::new(RefCell::new(ChannelState {
            mode,
            requests: Vec::new(),
            fail_start: false,
            fail_abort: false,
            abort_status: AbortStatus::Complete,
            aborts: 0,
            async_aborts: 0,
        })))
    }

    pub fn state(&self) -> RefMut<'_, ChannelState> {
        self.0.borrow_mut()
    }
}

impl TransferChannel for MockChannel {
    type Error = ();

    fn mode(&self) -> TransferMode {
        self.state().mode
    }

    unsafe fn start(&mut self, request: TransferRequest) -> Result<(), ()> {
        let mut state = self.state();
        if state.fail_start {
            return Err(());
        }
        state.requests.push(request);
        Ok(())
    }

    fn abort(&mut self) -> Result<(), ()> {
        let mut state = self.state();
        state.aborts += 1;
        if state.fail_abort {
            Err(())
        } else {
            Ok(())
        }
    }

    fn abort_async(&mut self) -> Result<AbortStatus, ()> {
        let mut state = self.state();
        state.async_aborts += 1;
        if state.fail_abort {
            Err(())
        } else {
            Ok(state.abort_status)
        }
    }
}

/// One callback invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    Error(ErrorCode),
    RegEndOfSampling,
    RegUnitaryConvCplt,
    RegSequenceConvCplt,
    RegDataTransferHalf,
    RegDataTransferCplt,
    RegDataTransferStop,
    InjUnitaryConvCplt,
    InjSequenceConvCplt,
    AwdOutOfWindow(AnalogWatchdog),
}

/// Callbacks that log every invocation
#[derive(Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<Call>>>);

impl Recorder {
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    fn push(&mut self, call: Call) {
        self.0.borrow_mut().push(call);
    }
}

impl Callbacks for Recorder {
    fn error(&mut self, _instance: InstanceId, codes: ErrorCode) {
        self.push(Call::Error(codes));
    }

    fn reg_end_of_sampling(&mut self, _instance: InstanceId) {
        self.push(Call::RegEndOfSampling);
    }

    fn reg_unitary_conv_cplt(&mut self, _instance: InstanceId) {
        self.push(Call::RegUnitaryConvCplt);
    }

    fn reg_sequence_conv_cplt(&mut self, _instance: InstanceId) {
        self.push(Call::RegSequenceConvCplt);
    }

    fn reg_data_transfer_half(&mut self, _instance: InstanceId) {
        self.push(Call::RegDataTransferHalf);
    }

    fn reg_data_transfer_cplt(&mut self, _instance: InstanceId) {
        self.push(Call::RegDataTransferCplt);
    }

    fn reg_data_transfer_stop(&mut self, _instance: InstanceId) {
        self.push(Call::RegDataTransferStop);
    }

    fn inj_unitary_conv_cplt(&mut self, _instance: InstanceId) {
        self.push(Call::InjUnitaryConvCplt);
    }

    fn inj_sequence_conv_cplt(&mut self, _instance: InstanceId) {
        self.push(Call::InjSequenceConvCplt);
    }

    fn awd_out_of_window(&mut self, _instance: InstanceId, watchdog: AnalogWatchdog) {
        self.push(Call::AwdOutOfWindow(watchdog));
    }
}

pub type TestAdc<C = NoCallbacks, D = NoDma> = Adc<MockAdc, MockTimebase, C, D>;

/// Fresh handle in `Init`
pub fn new_adc(instance: u8) -> (TestAdc, MockAdc) {
    let hw = MockAdc::new(instance);
    let timebase = MockTimebase {
        hw: hw.clone(),
        tick: Cell::new(0),
    };
    (Adc::new(hw.clone(), timebase), hw)
}

/// `Idle` handle with both groups configured and channel 3 at regular rank 1
pub fn configured_adc(instance: u8) -> (TestAdc, MockAdc) {
    let (mut adc, hw) = new_adc(instance);
    adc.set_config(Config::default()).unwrap();
    adc.set_regular_config(RegularConfig::default()).unwrap();
    adc.set_injected_config(InjectedConfig::default()).unwrap();
    adc.set_channel_config(ChannelConfig::new(3, Group::Regular))
        .unwrap();
    (adc, hw)
}

/// Started handle
pub fn active_adc(instance: u8) -> (TestAdc, MockAdc) {
    let (mut adc, hw) = configured_adc(instance);
    adc.start().unwrap();
    (adc, hw)
}

/// Buffer that outlives the test, as DMA destinations must
pub fn leak<W: Default + Clone>(len: usize) -> &'static mut [W] {
    Box::leak(vec![W::default(); len].into_boxed_slice())
}
