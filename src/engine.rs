// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The engine: VG table, device registry and command dispatch.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, error, info, warn};

use crate::blockio::BlockIo;
use crate::command::{Command, Response, SnapshotUsage};
use crate::config::EngineConfig;
use crate::extent::PeSpec;
use crate::lock::{Caller, CommandLock, PeLock, PeLockRange};
use crate::lv::{LogicalVolume, LvAccess, LvAllocation, LvId, LvReport, LvSpec, LvStatus};
use crate::pv::{PhysicalVolume, PvChange, PvSpec};
use crate::snapshot::{CowStore, ExceptionStore};
use crate::util::unpoison;
use crate::vg::{VgSpec, VgStatus, VolumeGroup};
use crate::{Device, Error, Result};

/// Version of the control interface.
pub const IOP_VERSION: u32 = 10;

/// What the device registry knows about an LV minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DeviceEntry {
    /// VG slot.
    pub vg: usize,
    pub lv: LvId,
    /// Size in sectors.
    pub size: u64,
    pub read_ahead: u32,
}

/// Minor number to (VG, LV) lookup.
#[derive(Debug, Default)]
pub(crate) struct DeviceTable {
    entries: BTreeMap<u32, DeviceEntry>,
}

impl DeviceTable {
    pub fn lookup(&self, minor: u32) -> Option<&DeviceEntry> {
        self.entries.get(&minor)
    }

    pub fn register(&mut self, minor: u32, entry: DeviceEntry) {
        self.entries.insert(minor, entry);
    }

    pub fn unregister(&mut self, minor: u32) {
        self.entries.remove(&minor);
    }

    pub fn resize(&mut self, minor: u32, size: u64) {
        if let Some(e) = self.entries.get_mut(&minor) {
            e.size = size;
        }
    }

    /// Lowest unused minor up to `max`.
    pub fn free_minor(&self, max: u32) -> Option<u32> {
        (0..=max).find(|m| !self.entries.contains_key(m))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collaborators and limits handed down to VG operations.
pub(crate) struct Env<'a> {
    pub config: &'a EngineConfig,
    pub io: &'a dyn BlockIo,
    pub store: &'a dyn ExceptionStore,
}

#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub vgs: BTreeMap<usize, VolumeGroup>,
    pub devices: DeviceTable,
}

impl Tables {
    fn vg_number(&self, name: &str) -> Result<usize> {
        self.vgs
            .values()
            .find(|vg| vg.name == name)
            .map(|vg| vg.number)
            .ok_or_else(|| Error::NotFound(format!("VG {}", name)))
    }

    fn vg(&self, name: &str) -> Result<&VolumeGroup> {
        let number = self.vg_number(name)?;
        self.vgs
            .get(&number)
            .ok_or_else(|| Error::NotFound(format!("VG {}", name)))
    }

    fn vg_mut(&mut self, name: &str) -> Result<&mut VolumeGroup> {
        let number = self.vg_number(name)?;
        self.vgs
            .get_mut(&number)
            .ok_or_else(|| Error::NotFound(format!("VG {}", name)))
    }

    fn lv(&self, vg: &str, lv: &str) -> Result<&LogicalVolume> {
        let vg = self.vg(vg)?;
        vg.lv_by_name(lv)
            .ok_or_else(|| Error::NotFound(format!("LV {} in VG {}", lv, vg.name)))
    }

    /// The VG and LV behind a minor.
    pub fn by_minor(&self, minor: u32) -> Option<(&VolumeGroup, &LogicalVolume)> {
        let entry = self.devices.lookup(minor)?;
        let vg = self.vgs.get(&entry.vg)?;
        let lv = vg.lv(entry.lv)?;
        Some((vg, lv))
    }
}

/// An in-memory volume manager.
///
/// Control-plane commands go through `apply`; the block layer uses
/// `open`, `close` and `map`.
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) tables: RwLock<Tables>,
    command_lock: CommandLock,
    pub(crate) pe_lock: PeLock,
    pub(crate) io: Arc<dyn BlockIo>,
    pub(crate) store: Arc<dyn ExceptionStore>,
}

impl Engine {
    /// An engine whose snapshots use the built-in COW store.
    pub fn new(config: EngineConfig, io: Arc<dyn BlockIo>) -> Engine {
        let store = Arc::new(CowStore::new(Arc::clone(&io)));
        Engine::with_store(config, io, store)
    }

    pub fn with_store(config: EngineConfig, io: Arc<dyn BlockIo>, store: Arc<dyn ExceptionStore>) -> Engine {
        debug!("engine up: {} VG slots, LV major {}", config.max_vg, config.blk_major);
        Engine {
            config,
            tables: RwLock::new(Tables::default()),
            command_lock: CommandLock::new(),
            pe_lock: PeLock::new(),
            io,
            store,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Who holds the command lock, if anyone.
    pub fn lock_holder(&self) -> Option<Caller> {
        self.command_lock.holder()
    }

    /// The extent currently held by `PeLock`.
    pub fn pe_lock(&self) -> Option<PeLockRange> {
        self.pe_lock.current()
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Tables> {
        unpoison(self.tables.read())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        unpoison(self.tables.write())
    }

    fn env(&self) -> Env<'_> {
        Env {
            config: &self.config,
            io: &*self.io,
            store: &*self.store,
        }
    }

    /// Run one control-plane command on behalf of `caller`.
    pub fn apply(&self, caller: Caller, cmd: Command) -> Result<Response> {
        debug!("{:?}: {}", caller, cmd.name());

        match cmd {
            Command::Lock => {
                self.command_lock.lock(caller);
                return Ok(Response::Done);
            }
            Command::Unlock => {
                self.command_lock.unlock(caller)?;
                return Ok(Response::Done);
            }
            _ => {}
        }

        let _guard = if cmd.is_mutating() {
            Some(self.command_lock.scoped(caller))
        } else {
            None
        };

        let name = cmd.name();
        let res = self.dispatch(cmd);
        if let Err(ref e) = res {
            debug!("{} failed: {}", name, e);
        }
        res
    }

    fn dispatch(&self, cmd: Command) -> Result<Response> {
        match cmd {
            Command::Lock | Command::Unlock => Ok(Response::Done),
            Command::GetIopVersion => Ok(Response::IopVersion {
                version: IOP_VERSION,
            }),
            Command::Reset => {
                self.reset();
                Ok(Response::Done)
            }

            Command::VgCreate(spec) => self
                .vg_create(&spec)
                .map(|number| Response::VgCreated { number }),
            Command::VgRemove { vg } => self.vg_remove(&vg).map(|_| Response::Done),
            Command::VgExtend { vg, pv } => self.vg_extend(&vg, &pv).map(|_| Response::Done),
            Command::VgReduce { vg, pv } => self
                .write()
                .vg_mut(&vg)?
                .reduce(&pv)
                .map(|_| Response::Done),
            Command::VgRename { vg, new_name } => {
                self.vg_rename(&vg, &new_name).map(|_| Response::Done)
            }
            Command::VgSetExtendable { vg, extendable } => {
                let mut tables = self.write();
                let vg = tables.vg_mut(&vg)?;
                vg.status.set(VgStatus::EXTENDABLE, extendable);
                Ok(Response::Done)
            }
            Command::VgStatus { vg } => Ok(Response::Vg(self.read().vg(&vg)?.report())),
            Command::VgList => Ok(Response::VgNames {
                names: self.read().vgs.values().map(|vg| vg.name.clone()).collect(),
            }),

            Command::LvCreate { vg, lv } => self
                .lv_create(&vg, &lv)
                .map(|minor| Response::LvCreated { minor }),
            Command::LvRemove { vg, lv } => self.lv_remove(&vg, &lv).map(|_| Response::Done),
            Command::LvExtend { vg, lv } => self.lv_resize(&vg, &lv, true).map(|_| Response::Done),
            Command::LvReduce { vg, lv } => self.lv_resize(&vg, &lv, false).map(|_| Response::Done),
            Command::LvRename { vg, lv, new_name } => self
                .write()
                .vg_mut(&vg)?
                .rename_lv(&lv, &new_name)
                .map(|_| Response::Done),
            Command::LvStatusByName { vg, lv, extents } => {
                Ok(Response::Lv(self.read().lv(&vg, &lv)?.report(extents)))
            }
            Command::LvStatusByIndex { vg, index, extents } => {
                self.lv_status_by_index(&vg, index, extents).map(Response::Lv)
            }
            Command::LvStatusByDev { minor, extents } => {
                self.lv_status_by_dev(minor, extents).map(Response::Lv)
            }
            Command::LvSetAccess { vg, lv, access } => {
                self.lv_set_access(&vg, &lv, access).map(|_| Response::Done)
            }
            Command::LvSetStatus { vg, lv, status } => {
                self.lv_set_status(&vg, &lv, status).map(|_| Response::Done)
            }
            Command::LvSetAllocation { vg, lv, allocation } => {
                self.lv_set_allocation(&vg, &lv, allocation).map(|_| Response::Done)
            }
            Command::LeRemap { vg, lv, old, new } => {
                self.le_remap(&vg, &lv, &old, &new).map(|_| Response::Done)
            }
            Command::SnapshotUsage { vg, lv } => {
                self.snapshot_usage(&vg, &lv).map(Response::SnapshotUsage)
            }

            Command::PvChange { vg, pv, change } => self.pv_change(&vg, &pv, &change).map(Response::Pv),
            Command::PvStatus { vg, pv } => self.pv_status(&vg, &pv).map(Response::Pv),
            Command::PvFlush { device } => {
                self.io.flush(device)?;
                Ok(Response::Done)
            }

            Command::PeLock {
                vg,
                lv_minor,
                pv,
                offset,
            } => self.pe_lock_set(&vg, lv_minor, pv, offset).map(|_| Response::Done),
            Command::PeUnlock => {
                if let Some(range) = self.pe_lock.current() {
                    debug!("unlocking extent {} sector {}", range.pv, range.offset);
                }
                self.pe_lock.clear();
                Ok(Response::Done)
            }
        }
    }

    fn vg_create(&self, spec: &VgSpec) -> Result<usize> {
        if spec.number >= self.config.max_vg {
            return Err(Error::InvalidArgument(format!(
                "VG slot {} is beyond {}",
                spec.number, self.config.max_vg
            )));
        }
        if spec.pe_size > self.config.max_pe_size {
            return Err(Error::InvalidArgument(format!(
                "extent size {} of VG {} is above {}",
                spec.pe_size, spec.name, self.config.max_pe_size
            )));
        }
        if spec.pv_max > self.config.max_pv || spec.lv_max > self.config.max_lv {
            return Err(Error::OutOfCapacity(format!(
                "VG {} asks for {} PVs and {} LVs, limits are {} and {}",
                spec.name, spec.pv_max, spec.lv_max, self.config.max_pv, self.config.max_lv
            )));
        }

        let mut guard = self.write();
        let Tables { vgs, devices } = &mut *guard;
        if vgs.contains_key(&spec.number) {
            return Err(Error::AlreadyExists(format!("VG slot {}", spec.number)));
        }
        if vgs.values().any(|vg| vg.name == spec.name) {
            return Err(Error::AlreadyExists(format!("VG {}", spec.name)));
        }
        for pv in &spec.pvs {
            if let Some(other) = vgs.values().find(|vg| vg.pvs().iter().any(|p| p.device == pv.device)) {
                return Err(Error::AlreadyExists(format!(
                    "{} is a PV of VG {}",
                    pv.device, other.name
                )));
            }
        }

        let env = self.env();
        let mut vg = VolumeGroup::new(spec)?;
        if let Err(e) = populate(&mut vg, spec, &env, devices) {
            warn!("creating VG {} failed, tearing it down: {}", spec.name, e);
            if let Err(err) = vg.teardown(true, &env, devices) {
                error!("tearing down VG {} failed: {}", spec.name, err);
            }
            return Err(e);
        }

        vg.status.insert(VgStatus::ACTIVE);
        info!(
            "VG {} created in slot {} with {} PVs and {} LVs",
            vg.name,
            vg.number,
            vg.pv_cur(),
            vg.lv_cur()
        );
        vgs.insert(spec.number, vg);

        Ok(spec.number)
    }

    fn vg_remove(&self, name: &str) -> Result<()> {
        let mut guard = self.write();
        let Tables { vgs, devices } = &mut *guard;
        let number = vgs
            .values()
            .find(|vg| vg.name == name)
            .map(|vg| vg.number)
            .ok_or_else(|| Error::NotFound(format!("VG {}", name)))?;

        if let Some(vg) = vgs.get_mut(&number) {
            vg.teardown(false, &self.env(), devices)?;
        }
        vgs.remove(&number);
        info!("VG {} removed", name);

        Ok(())
    }

    fn vg_extend(&self, name: &str, pv: &PvSpec) -> Result<()> {
        let mut tables = self.write();
        if let Some(other) = tables
            .vgs
            .values()
            .find(|vg| vg.pvs().iter().any(|p| p.device == pv.device))
        {
            return Err(Error::AlreadyExists(format!(
                "{} is a PV of VG {}",
                pv.device, other.name
            )));
        }
        tables.vg_mut(name)?.extend(pv)
    }

    fn vg_rename(&self, name: &str, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(Error::InvalidArgument("VG name is empty".into()));
        }
        let mut tables = self.write();
        if tables.vgs.values().any(|vg| vg.name == new_name) {
            return Err(Error::AlreadyExists(format!("VG {}", new_name)));
        }
        tables.vg_mut(name)?.name = new_name.to_string();
        info!("VG {} renamed to {}", name, new_name);
        Ok(())
    }

    /// Force-remove every VG and drop the extent lock.
    fn reset(&self) {
        let mut guard = self.write();
        let Tables { vgs, devices } = &mut *guard;
        let env = self.env();

        for vg in vgs.values_mut() {
            if let Err(e) = vg.teardown(true, &env, devices) {
                error!("resetting VG {} failed: {}", vg.name, e);
            }
        }
        vgs.clear();
        if !devices.is_empty() {
            error!("device entries left after reset");
            *devices = DeviceTable::default();
        }
        self.pe_lock.clear();
        info!("engine reset");
    }

    fn lv_create(&self, vg: &str, spec: &LvSpec) -> Result<u32> {
        let mut guard = self.write();
        let number = guard.vg_number(vg)?;
        let Tables { vgs, devices } = &mut *guard;
        let vg = vgs
            .get_mut(&number)
            .ok_or_else(|| Error::NotFound(format!("VG {}", vg)))?;

        let id = vg.create_lv(spec, &self.env(), devices)?;
        vg.lv(id)
            .map(|lv| lv.device.minor)
            .ok_or_else(|| Error::NotFound(spec.name.clone()))
    }

    fn lv_remove(&self, vg: &str, lv: &str) -> Result<()> {
        let mut guard = self.write();
        let number = guard.vg_number(vg)?;
        let Tables { vgs, devices } = &mut *guard;
        match vgs.get_mut(&number) {
            Some(vg) => vg.remove_lv_by_name(lv, &self.env(), devices),
            None => Err(Error::NotFound(format!("VG {}", vg))),
        }
    }

    fn lv_resize(&self, vg: &str, spec: &LvSpec, grow: bool) -> Result<()> {
        let mut guard = self.write();
        let number = guard.vg_number(vg)?;
        let Tables { vgs, devices } = &mut *guard;
        match vgs.get_mut(&number) {
            Some(vg) => vg.resize_lv(&spec.name, spec, grow, &self.env(), devices),
            None => Err(Error::NotFound(format!("VG {}", vg))),
        }
    }

    fn lv_status_by_index(&self, vg: &str, index: LvId, extents: bool) -> Result<LvReport> {
        let tables = self.read();
        let vg = tables.vg(vg)?;
        vg.lv(index)
            .map(|lv| lv.report(extents))
            .ok_or_else(|| Error::NotFound(format!("LV #{} in VG {}", index, vg.name)))
    }

    fn lv_status_by_dev(&self, minor: u32, extents: bool) -> Result<LvReport> {
        self.read()
            .by_minor(minor)
            .map(|(_, lv)| lv.report(extents))
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))
    }

    fn lv_set_access(&self, vg: &str, lv: &str, access: LvAccess) -> Result<()> {
        let rw = LvAccess::READ | LvAccess::WRITE;
        if !rw.contains(access) {
            return Err(Error::Forbidden(format!(
                "only read/write access of LV {} can be changed",
                lv
            )));
        }

        let mut tables = self.write();
        let vg = tables.vg_mut(vg)?;
        let id = vg
            .find_lv(lv)
            .ok_or_else(|| Error::NotFound(format!("LV {}", lv)))?;
        if let Some(lv) = vg.lv_mut(id) {
            lv.access = (lv.access - rw) | access;
            debug!("LV {} access now {:?}", lv.name, lv.access);
        }
        Ok(())
    }

    fn lv_set_status(&self, vg: &str, lv: &str, status: LvStatus) -> Result<()> {
        if !LvStatus::ACTIVE.contains(status) {
            return Err(Error::InvalidArgument(format!(
                "LV {}: only the active bit can be set",
                lv
            )));
        }

        let mut tables = self.write();
        let vg = tables.vg_mut(vg)?;
        let id = vg
            .find_lv(lv)
            .ok_or_else(|| Error::NotFound(format!("LV {}", lv)))?;
        if let Some(lv) = vg.lv_mut(id) {
            let deactivate = lv.status.contains(LvStatus::ACTIVE) && !status.contains(LvStatus::ACTIVE);
            if deactivate {
                if lv.open_count > 0 {
                    return Err(Error::Busy(format!("LV {} is open", lv.name)));
                }
                if let Err(e) = self.io.flush(lv.device) {
                    warn!("flushing {} failed: {}", lv.name, e);
                }
            }
            lv.status.set(LvStatus::ACTIVE, status.contains(LvStatus::ACTIVE));
            info!("LV {} status now {:?}", lv.name, lv.status);
        }
        Ok(())
    }

    fn lv_set_allocation(&self, vg: &str, lv: &str, allocation: LvAllocation) -> Result<()> {
        let mut tables = self.write();
        let vg = tables.vg_mut(vg)?;
        let id = vg
            .find_lv(lv)
            .ok_or_else(|| Error::NotFound(format!("LV {}", lv)))?;
        if let Some(lv) = vg.lv_mut(id) {
            lv.allocation = allocation;
        }
        Ok(())
    }

    fn le_remap(&self, vg: &str, lv: &str, old: &PeSpec, new: &PeSpec) -> Result<()> {
        let mut tables = self.write();
        let vg = tables.vg_mut(vg)?;
        let device = vg
            .lv_by_name(lv)
            .map(|lv| lv.device)
            .ok_or_else(|| Error::NotFound(format!("LV {}", lv)))?;

        vg.remap_le(lv, old, new, &self.env())?;
        self.io.invalidate(device);
        Ok(())
    }

    fn snapshot_usage(&self, vg: &str, lv: &str) -> Result<SnapshotUsage> {
        let tables = self.read();
        let lv = tables.lv(vg, lv)?;
        let snap = lv
            .snapshot
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument(format!("LV {} is not a snapshot", lv.name)))?;

        let table = unpoison(snap.table.lock());
        let used = table.remap_ptr();
        let total = table.remap_end();
        let percent = if total == 0 {
            0
        } else {
            (used * 100 / total) as u32
        };

        Ok(SnapshotUsage {
            used,
            total,
            percent,
            table_blocks: table.table_blocks(),
        })
    }

    fn pv_change(&self, vg: &str, pv: &str, change: &PvChange) -> Result<PhysicalVolume> {
        let pv = self.write().vg_mut(vg)?.change_pv(pv, change)?;
        info!("PV {} now {:?}, {:?}", pv.name, pv.state, pv.allocatable);
        Ok(pv)
    }

    fn pv_status(&self, vg: &str, pv: &str) -> Result<PhysicalVolume> {
        let tables = self.read();
        let vg = tables.vg(vg)?;
        vg.pv_by_name(pv)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("PV {} in VG {}", pv, vg.name)))
    }

    fn pe_lock_set(&self, vg: &str, lv_minor: u32, pv: Device, offset: u64) -> Result<()> {
        let tables = self.read();
        let vg = tables.vg(vg)?;
        let moving = vg
            .pvs()
            .iter()
            .find(|p| p.device == pv)
            .ok_or_else(|| Error::NotFound(format!("PV {} in VG {}", pv, vg.name)))?;
        if !moving.holds_extent(offset, vg.pe_size) {
            return Err(Error::InvalidArgument(format!(
                "sector {} is not an extent of PV {}",
                offset, moving.name
            )));
        }
        let lv = match tables.by_minor(lv_minor) {
            Some((owner, lv)) if owner.number == vg.number => lv,
            _ => {
                return Err(Error::NotFound(format!(
                    "LV with minor {} in VG {}",
                    lv_minor, vg.name
                )))
            }
        };
        if let Some(held) = self.pe_lock.current() {
            return Err(Error::Busy(format!(
                "extent {} sector {} is already locked",
                held.pv, held.offset
            )));
        }

        self.io.flush(lv.device)?;
        self.pe_lock.set(PeLockRange {
            lv: lv.device,
            pv,
            offset,
            length: vg.pe_size,
        })?;
        info!("locked extent {} sector {} of LV {}", pv, offset, lv.name);

        Ok(())
    }

    /// A consumer opens the LV with minor `minor`.
    pub fn open(&self, minor: u32, write: bool) -> Result<()> {
        let mut guard = self.write();
        let Tables { vgs, devices } = &mut *guard;
        let entry = *devices
            .lookup(minor)
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))?;
        let vg = vgs
            .get_mut(&entry.vg)
            .ok_or_else(|| Error::NotFound(format!("VG slot {}", entry.vg)))?;
        let vg_active = vg.is_active();
        let lv = vg
            .lv_mut(entry.lv)
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))?;

        if !vg_active || !lv.is_active() {
            return Err(Error::Forbidden(format!("LV {} is not active", lv.name)));
        }
        if write && !lv.access.contains(LvAccess::WRITE) {
            return Err(Error::Forbidden(format!("LV {} is read-only", lv.name)));
        }

        lv.open_count += 1;
        debug!("LV {} open count {}", lv.name, lv.open_count);
        vg.lv_open += 1;
        Ok(())
    }

    pub fn close(&self, minor: u32) -> Result<()> {
        let mut guard = self.write();
        let Tables { vgs, devices } = &mut *guard;
        let entry = *devices
            .lookup(minor)
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))?;
        let vg = vgs
            .get_mut(&entry.vg)
            .ok_or_else(|| Error::NotFound(format!("VG slot {}", entry.vg)))?;
        let lv = vg
            .lv_mut(entry.lv)
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))?;

        if lv.open_count == 0 {
            return Err(Error::InvalidArgument(format!("LV {} is not open", lv.name)));
        }
        lv.open_count -= 1;
        debug!("LV {} open count {}", lv.name, lv.open_count);
        vg.lv_open -= 1;
        Ok(())
    }

    /// Registered size of an LV device, in sectors.
    pub fn device_size(&self, minor: u32) -> Result<u64> {
        self.read()
            .devices
            .lookup(minor)
            .map(|e| e.size)
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))
    }

    pub fn read_ahead(&self, minor: u32) -> Result<u32> {
        self.read()
            .devices
            .lookup(minor)
            .map(|e| e.read_ahead)
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))
    }

    /// The path an LV device is known by, e.g. "/dev/vg0/data".
    pub fn device_name(&self, minor: u32) -> Result<String> {
        self.read()
            .by_minor(minor)
            .map(|(vg, lv)| format!("/dev/{}/{}", vg.name, lv.name))
            .ok_or_else(|| Error::NotFound(format!("LV with minor {}", minor)))
    }

    /// Tear everything down.
    pub fn shutdown(self) {
        let _guard = self.command_lock.scoped(Caller::current());
        self.reset();
        debug!("engine down");
    }
}

// Attach PVs, then LVs, then the snapshots of those LVs.
fn populate(vg: &mut VolumeGroup, spec: &VgSpec, env: &Env, devices: &mut DeviceTable) -> Result<()> {
    for pv in &spec.pvs {
        vg.add_pv(pv)?;
    }
    for lv in spec.lvs.iter().filter(|lv| lv.snapshot.is_none()) {
        vg.create_lv(lv, env, devices)?;
    }
    for lv in spec.lvs.iter().filter(|lv| lv.snapshot.is_some()) {
        vg.create_lv(lv, env, devices)?;
    }
    Ok(())
}
