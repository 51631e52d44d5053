//! Link chains and dual-instance operation
//!
//! A [`Cluster`] owns the handles of the instances that share one common
//! block. Handles are stored in fixed slots and addressed by [`HandleId`];
//! the link chain is the ordered list of member slots, read as a circle.
//! The first member is the master of a multimode pair, the second the
//! slave.
//!
//! A member torn down through its own handle ([`Adc::deinit`]) keeps its
//! Common State, so the chain stays uniform; it leaves the chain at the
//! next chain operation of the cluster.
//!
//! Chain-wide operations check every member before touching any of them, so
//! a rejected call leaves the whole chain as it was. Once the checks pass,
//! members are processed in chain order and the first failure is returned
//! without undoing the members already processed.

use crate::dma::{DmaEvent, NoDma, TransferChannel, TransferInterrupts, TransferWord};

use super::transfer::StartResult;
use crate::time::{Milliseconds, Timebase};

use super::state::{require, transition};
use super::{
    Adc, CalibrationMode, Callbacks, CommonState, DataPacking, Error, Event, GlobalState, Group,
    GroupState, MultimodeConfig, MultimodeMode, NoCallbacks, Registers, Result,
};

/// Slot of a handle inside a [`Cluster`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

impl HandleId {
    /// Slot number
    pub fn index(self) -> usize {
        self.0
    }
}

/// Regular result of a multimode pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MultimodeValue {
    /// Both results from the common data register
    ///
    /// Offset-corrected (signed) results lose their sign in this layout.
    Packed {
        /// Raw common data register
        data: u32,
        /// Layout of `data`
        packing: DataPacking,
    },
    /// Results read from each instance's own data register
    Separate {
        /// Master result
        master: i32,
        /// Slave result
        slave: i32,
    },
}

impl MultimodeValue {
    /// Master result
    pub fn master(&self) -> i32 {
        match *self {
            MultimodeValue::Packed { data, packing } => unpack(data, packing, 0) as i32,
            MultimodeValue::Separate { master, .. } => master,
        }
    }

    /// Slave result
    pub fn slave(&self) -> i32 {
        match *self {
            MultimodeValue::Packed { data, packing } => unpack(data, packing, 1) as i32,
            MultimodeValue::Separate { slave, .. } => slave,
        }
    }
}

fn unpack(data: u32, packing: DataPacking, lane: u32) -> u32 {
    match packing {
        DataPacking::Bits32 => (data >> (16 * lane)) & 0xffff,
        DataPacking::Bits8 => (data >> (8 * lane)) & 0xff,
        DataPacking::None => data,
    }
}

/// Handles sharing one common block
///
/// `N` is the number of slots (one per instance of the cluster).
pub struct Cluster<R, T, C = NoCallbacks, D = NoDma, const N: usize = 3> {
    slots: [Option<Adc<R, T, C, D>>; N],
    members: [usize; N],
    len: usize,
    config: MultimodeConfig,
}

impl<R, T, C, D, const N: usize> Cluster<R, T, C, D, N> {
    /// Empty cluster without a link chain
    pub fn new() -> Self {
        Cluster {
            slots: core::array::from_fn(|_| None),
            members: [0; N],
            len: 0,
            config: MultimodeConfig::default(),
        }
    }

    /// Handle in slot `id`
    pub fn get(&self, id: HandleId) -> Option<&Adc<R, T, C, D>> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Handle in slot `id`
    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut Adc<R, T, C, D>> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Members of the link chain, master first
    pub fn chain(&self) -> impl Iterator<Item = HandleId> + '_ {
        self.members[..self.len].iter().map(|&slot| HandleId(slot))
    }

    /// Master of the link chain
    pub fn master(&self) -> Option<HandleId> {
        self.chain().next()
    }

    /// Member that follows `id` in the circular chain
    pub fn next_handle(&self, id: HandleId) -> Option<HandleId> {
        let pos = self.position(id.0)?;
        Some(HandleId(self.members[(pos + 1) % self.len]))
    }

    /// Multimode configuration last applied
    pub fn mm_config(&self) -> MultimodeConfig {
        self.config
    }

    fn position(&self, slot: usize) -> Option<usize> {
        self.members[..self.len].iter().position(|&m| m == slot)
    }

    fn handle(&self, slot: usize) -> Result<&Adc<R, T, C, D>> {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidParam)
    }

    fn handle_mut(&mut self, slot: usize) -> Result<&mut Adc<R, T, C, D>> {
        self.slots
            .get_mut(slot)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidParam)
    }

    fn for_each_member<F>(&self, mut check: F) -> Result<()>
    where
        F: FnMut(&Adc<R, T, C, D>) -> Result<()>,
    {
        if self.len < 2 {
            return Err(Error::InvalidState);
        }
        for &slot in &self.members[..self.len] {
            check(self.handle(slot)?)?;
        }
        Ok(())
    }

    /// Writes `common` to every member
    fn set_common_for_all(&mut self, common: CommonState) -> Result<()> {
        for i in 0..self.len {
            let slot = self.members[i];
            self.handle_mut(slot)?.set_common_state(common)?;
        }
        Ok(())
    }

    /// Removes `slot` from the chain without any state check
    fn detach(&mut self, slot: usize) {
        let pos = match self.position(slot) {
            Some(pos) => pos,
            None => return,
        };
        self.members.copy_within(pos + 1..self.len, pos);
        self.len -= 1;
        if let Some(adc) = self.slots[slot].as_mut() {
            adc.common = CommonState::Independent;
        }

        if self.len < 2 {
            for &rest in &self.members[..self.len] {
                if let Some(adc) = self.slots[rest].as_mut() {
                    adc.common = CommonState::Independent;
                }
            }
            self.len = 0;
        }
    }

    /// Master and slave of a multimode pair
    fn pair(&self) -> Result<(usize, usize)> {
        if self.len != 2 {
            return Err(Error::InvalidState);
        }
        self.for_each_member(|adc| {
            require(adc.common, &[CommonState::Multimode])?;
            if adc.state() == GlobalState::Reset {
                return Err(Error::InvalidState);
            }
            Ok(())
        })?;
        Ok((self.members[0], self.members[1]))
    }

    fn pair_mut(&mut self) -> Result<(&mut Adc<R, T, C, D>, &mut Adc<R, T, C, D>)> {
        let (m, s) = self.pair()?;
        let (lo, hi) = self.slots.split_at_mut(m.max(s));
        let (low, high) = (&mut lo[m.min(s)], &mut hi[0]);
        let (master, slave) = if m < s { (low, high) } else { (high, low) };
        match (master.as_mut(), slave.as_mut()) {
            (Some(master), Some(slave)) => Ok((master, slave)),
            _ => Err(Error::InvalidParam),
        }
    }
}

impl<R, T, C, D, const N: usize> Default for Cluster<R, T, C, D, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, T, C, D, const N: usize> Cluster<R, T, C, D, N>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Takes ownership of `adc` and returns its slot
    ///
    /// Fails with `InvalidParam` if the cluster already holds a handle for
    /// the same instance or has no free slot.
    pub fn init(&mut self, adc: Adc<R, T, C, D>) -> Result<HandleId> {
        let instance = adc.instance();
        if self.slots.iter().flatten().any(|h| h.instance() == instance) {
            return Err(Error::InvalidParam);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::InvalidParam)?;
        self.slots[slot] = Some(adc);
        debug!("cluster: adc{} in slot {}", instance.0, slot);
        Ok(HandleId(slot))
    }

    /// Tears down the handle in `id` and removes it from the chain
    ///
    /// The handle stays in its slot in [`GlobalState::Reset`]. Leaving a
    /// multimode pair puts the common block back in independent mode.
    /// Returns the transfer channel the handle had bound.
    pub fn deinit(&mut self, id: HandleId) -> Option<D> {
        let channel = self.get_mut(id)?.deinit();
        self.leave(id.0);
        channel
    }

    /// Removes the handle in `id` from the cluster
    pub fn remove(&mut self, id: HandleId) -> Option<Adc<R, T, C, D>> {
        self.get(id)?;
        self.leave(id.0);
        self.slots[id.0].take()
    }

    /// Links `next` into the chain right after `id`
    ///
    /// Starts a new chain if there is none. `next` must not be a member
    /// yet and `id` must be one unless the chain is empty. Not possible
    /// while the chain runs in multimode.
    pub fn set_link_next_handle(&mut self, id: HandleId, next: HandleId) -> Result<()> {
        if id == next {
            return Err(Error::InvalidParam);
        }
        self.prune();
        for slot in [id.0, next.0] {
            if self.handle(slot)?.state() == GlobalState::Reset {
                return Err(Error::InvalidState);
            }
        }
        if self.position(next.0).is_some() || self.len == N {
            return Err(Error::InvalidParam);
        }
        if self.len > 0 {
            self.for_each_member(|adc| require(adc.common, &[CommonState::Linked]))?;
        }

        let at = match (self.len, self.position(id.0)) {
            (0, _) => {
                self.members[0] = id.0;
                self.len = 1;
                1
            }
            (_, Some(pos)) => pos + 1,
            (_, None) => return Err(Error::InvalidParam),
        };
        self.members.copy_within(at..self.len, at + 1);
        self.members[at] = next.0;
        self.len += 1;

        self.set_common_for_all(CommonState::Linked)?;
        debug!("cluster: slot {} linked after slot {}", next.0, id.0);
        Ok(())
    }

    /// Removes `id` from the chain
    ///
    /// A chain left with a single member dissolves. Leaving a multimode
    /// pair requires both groups of both members to be idle.
    pub fn unlink(&mut self, id: HandleId) -> Result<()> {
        self.handle(id.0)?;
        self.prune();
        if self.position(id.0).is_none() {
            return Err(Error::InvalidState);
        }
        if self.handle(id.0)?.common == CommonState::Multimode {
            self.for_each_member(|adc| adc.no_group_active())?;
        }
        self.leave(id.0);
        Ok(())
    }

    fn leave(&mut self, slot: usize) {
        if self.position(slot).is_none() {
            return;
        }
        if self.config.mode != MultimodeMode::Independent {
            // The common block outlives the pair
            let independent = MultimodeConfig::default();
            if let Some(adc) = self.slots[slot].as_mut() {
                adc.write_multimode(&independent);
            }
            self.config = independent;
        }
        self.detach(slot);
        debug!("cluster: slot {} unlinked, {} members left", slot, self.len);
    }

    /// Drops members that were torn down through their own handle
    fn prune(&mut self) {
        let mut i = 0;
        while i < self.len {
            let slot = self.members[i];
            let torn_down = self.slots[slot]
                .as_ref()
                .map_or(true, |adc| adc.state() == GlobalState::Reset);
            if torn_down {
                self.leave(slot);
                i = 0;
            } else {
                i += 1;
            }
        }
    }

    /// Applies the multimode configuration to a linked pair
    ///
    /// Both members must be configured with the analog core off.
    /// [`MultimodeMode::Independent`] returns the pair to `Linked`, any
    /// other mode moves it to `Multimode`.
    pub fn mm_set_config(&mut self, config: MultimodeConfig) -> Result<()> {
        config.validate()?;
        self.prune();
        if self.len != 2 {
            return Err(Error::InvalidState);
        }
        self.for_each_member(|adc| {
            require(adc.common, &[CommonState::Linked, CommonState::Multimode])?;
            require(
                adc.state(),
                &[GlobalState::Init, GlobalState::Configuring, GlobalState::Idle],
            )
        })?;

        let master = self.members[0];
        self.handle_mut(master)?.write_multimode(&config);
        self.config = config;
        let common = if config.mode == MultimodeMode::Independent {
            CommonState::Linked
        } else {
            CommonState::Multimode
        };
        self.set_common_for_all(common)?;
        info!("cluster: multimode {:?}", config.mode);
        Ok(())
    }

    /// Starts the analog core of every chain member
    pub fn mm_start(&mut self) -> Result<()> {
        self.prune();
        self.for_each_member(|adc| {
            require(adc.common, &[CommonState::Linked, CommonState::Multimode])?;
            require(adc.state(), &[GlobalState::Idle])
        })?;
        self.each_member(|adc| adc.start())
    }

    /// Stops the analog core of every chain member
    pub fn mm_stop(&mut self) -> Result<()> {
        self.prune();
        self.for_each_member(|adc| {
            require(adc.common, &[CommonState::Linked, CommonState::Multimode])?;
            require(adc.state(), &[GlobalState::Active, GlobalState::Calibrating])?;
            adc.no_group_active()
        })?;
        self.each_member(|adc| adc.stop())
    }

    /// Calibrates every chain member
    pub fn mm_calibrate(&mut self, mode: CalibrationMode) -> Result<()> {
        self.prune();
        self.for_each_member(|adc| {
            require(adc.common, &[CommonState::Linked, CommonState::Multimode])?;
            require(adc.state(), &[GlobalState::Active])?;
            adc.group_idle_or_reset()
        })?;
        self.each_member(|adc| adc.calibrate(mode))
    }

    fn each_member<F>(&mut self, mut op: F) -> Result<()>
    where
        F: FnMut(&mut Adc<R, T, C, D>) -> Result<()>,
    {
        for i in 0..self.len {
            let slot = self.members[i];
            op(self.handle_mut(slot)?).map_err(|e| {
                warn!("cluster: slot {} failed: {:?}", slot, e);
                e
            })?;
        }
        Ok(())
    }

    /// Starts `group` on the pair for polling
    ///
    /// The start command goes to the master; the slave converts in step.
    pub fn mm_start_conv(&mut self, group: Group) -> Result<()> {
        self.mm_launch(group, |master| master.start_conv(group))
    }

    /// Starts `group` on the pair with interrupts on the master
    pub fn mm_start_conv_it(&mut self, group: Group) -> Result<()> {
        self.mm_start_conv_it_opt(group, Event::empty())
    }

    /// [`mm_start_conv_it`](Cluster::mm_start_conv_it) with `optional`
    /// events as for [`Adc::start_conv_it_opt`]
    pub fn mm_start_conv_it_opt(&mut self, group: Group, optional: Event) -> Result<()> {
        self.mm_launch(group, |master| master.start_conv_it_opt(group, optional))
    }

    /// Streams packed results of the pair through the master's channel
    ///
    /// Needs a [`DataPacking`] other than `None`. A rejected `buffer` is
    /// handed back with the error.
    pub fn mm_reg_start_conv_dma<W: TransferWord>(
        &mut self,
        buffer: &'static mut [W],
    ) -> StartResult<W> {
        self.mm_reg_start_conv_dma_opt(buffer, TransferInterrupts::all(), Event::empty())
    }

    /// [`mm_reg_start_conv_dma`](Cluster::mm_reg_start_conv_dma) with
    /// explicit interrupts as for [`Adc::start_conv_dma_opt`]
    pub fn mm_reg_start_conv_dma_opt<W: TransferWord>(
        &mut self,
        buffer: &'static mut [W],
        transfer_interrupts: TransferInterrupts,
        optional: Event,
    ) -> StartResult<W> {
        if self.config.packing == DataPacking::None {
            return Err((Error::InvalidParam, buffer));
        }
        if let Err(e) = self.mm_follow_start(Group::Regular) {
            return Err((e, buffer));
        }
        let (master, slave) = match self.pair_mut() {
            Ok(pair) => pair,
            Err(e) => return Err((e, buffer)),
        };
        let auto = master.auto_injected(Group::Regular);
        let source = master.regs.common_data_address();
        master
            .start_transfer(Group::Regular, buffer, transfer_interrupts, optional, source)
            .map_err(|rejected| {
                slave.follow_stop(Group::Regular, auto);
                rejected
            })
    }

    fn mm_launch<F>(&mut self, group: Group, start: F) -> Result<()>
    where
        F: FnOnce(&mut Adc<R, T, C, D>) -> Result<()>,
    {
        self.mm_follow_start(group)?;
        let (master, slave) = self.pair_mut()?;
        let auto = master.auto_injected(group);
        if let Err(e) = start(master) {
            slave.follow_stop(group, auto);
            return Err(e);
        }
        Ok(())
    }

    /// Checks both members and moves the slave's side of `group` to
    /// `Active`
    ///
    /// The injected group of the slave runs along when the master converts
    /// it automatically after the regular group.
    fn mm_follow_start(&mut self, group: Group) -> Result<()> {
        self.prune();
        let mode = self.config.mode;
        let (master, slave) = self.pair_mut()?;
        if !mode.synchronizes(group) {
            return Err(Error::InvalidParam);
        }
        master.startable(group)?;
        slave.startable(group)?;

        let auto = master.auto_injected(group);
        if auto {
            require(slave.group_state(Group::Injected), &[GroupState::Idle])?;
        }
        slave.follow_start(group, auto)
    }

    /// Stops `group` on the pair
    pub fn mm_stop_conv(&mut self, group: Group) -> Result<()> {
        self.mm_halt(group, |master| master.stop_conv(group))
    }

    /// Stops `group` on the pair and disables the master's interrupts
    pub fn mm_stop_conv_it(&mut self, group: Group) -> Result<()> {
        self.mm_halt(group, |master| master.stop_conv_it(group))
    }

    /// Stops DMA conversions of the pair
    ///
    /// The slave's regular group goes idle together with the master's,
    /// which may be later in [`dma_irq_handler`](Cluster::dma_irq_handler).
    pub fn mm_reg_stop_conv_dma(&mut self) -> Result<()> {
        self.mm_halt(Group::Regular, |master| master.stop_conv_dma(Group::Regular))
    }

    /// Waits for a conversion of `group` on the pair
    pub fn mm_poll_for_conv(&mut self, group: Group, timeout: Milliseconds) -> Result<()> {
        self.mm_halt(group, |master| master.poll_for_conv(group, timeout))
    }

    /// Runs `op` on the master, then lets the slave follow if the master's
    /// `group` went idle
    fn mm_halt<F>(&mut self, group: Group, op: F) -> Result<()>
    where
        F: FnOnce(&mut Adc<R, T, C, D>) -> Result<()>,
    {
        self.prune();
        let mode = self.config.mode;
        let (master, slave) = self.pair_mut()?;
        if !mode.synchronizes(group) {
            return Err(Error::InvalidParam);
        }
        require(slave.group_state(group), &[GroupState::Active])?;

        op(master)?;
        follow_master(mode, master, slave);
        Ok(())
    }

    /// [`mm_start_conv`](Cluster::mm_start_conv) on the regular group
    pub fn mm_reg_start_conv(&mut self) -> Result<()> {
        self.mm_start_conv(Group::Regular)
    }

    /// [`mm_start_conv_it`](Cluster::mm_start_conv_it) on the regular group
    pub fn mm_reg_start_conv_it(&mut self) -> Result<()> {
        self.mm_start_conv_it(Group::Regular)
    }

    /// [`mm_stop_conv`](Cluster::mm_stop_conv) on the regular group
    pub fn mm_reg_stop_conv(&mut self) -> Result<()> {
        self.mm_stop_conv(Group::Regular)
    }

    /// [`mm_stop_conv_it`](Cluster::mm_stop_conv_it) on the regular group
    pub fn mm_reg_stop_conv_it(&mut self) -> Result<()> {
        self.mm_stop_conv_it(Group::Regular)
    }

    /// [`mm_poll_for_conv`](Cluster::mm_poll_for_conv) on the regular group
    pub fn mm_reg_poll_for_conv(&mut self, timeout: Milliseconds) -> Result<()> {
        self.mm_poll_for_conv(Group::Regular, timeout)
    }

    /// [`mm_start_conv`](Cluster::mm_start_conv) on the injected group
    pub fn mm_inj_start_conv(&mut self) -> Result<()> {
        self.mm_start_conv(Group::Injected)
    }

    /// [`mm_start_conv_it`](Cluster::mm_start_conv_it) on the injected group
    pub fn mm_inj_start_conv_it(&mut self) -> Result<()> {
        self.mm_start_conv_it(Group::Injected)
    }

    /// [`mm_stop_conv`](Cluster::mm_stop_conv) on the injected group
    pub fn mm_inj_stop_conv(&mut self) -> Result<()> {
        self.mm_stop_conv(Group::Injected)
    }

    /// [`mm_stop_conv_it`](Cluster::mm_stop_conv_it) on the injected group
    pub fn mm_inj_stop_conv_it(&mut self) -> Result<()> {
        self.mm_stop_conv_it(Group::Injected)
    }

    /// [`mm_poll_for_conv`](Cluster::mm_poll_for_conv) on the injected group
    pub fn mm_inj_poll_for_conv(&mut self, timeout: Milliseconds) -> Result<()> {
        self.mm_poll_for_conv(Group::Injected, timeout)
    }

    /// Latest regular results of the pair
    pub fn mm_get_value(&self) -> Result<MultimodeValue> {
        let (m, s) = self.pair()?;
        let master = self.handle(m)?;
        Ok(match self.config.packing {
            DataPacking::None => MultimodeValue::Separate {
                master: master.reg_get_value(),
                slave: self.handle(s)?.reg_get_value(),
            },
            packing => MultimodeValue::Packed {
                data: master.regs.read_common_data(),
                packing,
            },
        })
    }

    /// Interrupt entry for the handle in `id`
    ///
    /// Runs [`Adc::irq_handler`] and lets a multimode slave follow its
    /// master's completed unit conversions.
    pub fn irq_handler(&mut self, id: HandleId) {
        if let Some(adc) = self.get_mut(id) {
            adc.irq_handler();
            self.prune();
            self.sync_slave();
        }
    }

    /// Transfer channel entry for the handle in `id`
    ///
    /// Runs [`Adc::dma_irq_handler`]; a completed abort on a multimode
    /// master also returns the slave's regular group to `Idle`.
    pub fn dma_irq_handler(&mut self, id: HandleId, event: DmaEvent) {
        if let Some(adc) = self.get_mut(id) {
            adc.dma_irq_handler(event);
            self.prune();
            self.sync_slave();
        }
    }

    fn sync_slave(&mut self) {
        let mode = self.config.mode;
        if let Ok((master, slave)) = self.pair_mut() {
            follow_master(mode, master, slave);
        }
    }
}

/// Returns the slave's groups to `Idle` once the master's did
///
/// The injected group follows when `mode` synchronizes it or when the
/// master converts it automatically after the regular group.
fn follow_master<R, T, C, D>(
    mode: MultimodeMode,
    master: &Adc<R, T, C, D>,
    slave: &mut Adc<R, T, C, D>,
) where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    let auto = master.auto_injected(Group::Regular);
    for group in Group::ALL {
        let follows = mode.synchronizes(group) || (auto && group == Group::Injected);
        if follows
            && !master.group_state(group).is_active()
            && slave.group_state(group).is_active()
        {
            slave.follow_stop(group, false);
        }
    }
}

impl<R, T, C, D> Adc<R, T, C, D>
where
    R: Registers,
    T: Timebase,
    C: Callbacks,
    D: TransferChannel,
{
    /// Slave side of a synchronized start, `auto` as set on the master
    fn follow_start(&mut self, group: Group, auto: bool) -> Result<()> {
        transition(&mut self.groups[group.index()], GroupState::Active)?;
        if auto {
            transition(&mut self.groups[Group::Injected.index()], GroupState::Active)?;
        }
        Ok(())
    }

    /// Slave side of a synchronized stop or completion
    fn follow_stop(&mut self, group: Group, auto: bool) {
        self.groups[group.index()] = GroupState::Idle;
        if auto {
            self.groups[Group::Injected.index()] = GroupState::Idle;
        }
    }
}
