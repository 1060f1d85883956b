// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Volume Groups

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use bitflags::bitflags;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::{DeviceEntry, DeviceTable, Env};
use crate::extent::{self, ExtentMap, PeSpec};
use crate::lv::{LogicalVolume, LvAccess, LvId, LvSpec, LvStatus};
use crate::pv::{PhysicalVolume, PvChange, PvSpec};
use crate::snapshot::ExceptionTable;
use crate::util::{make_uuid, unpoison};
use crate::{Device, Error, Result};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct VgStatus: u32 {
        const ACTIVE = 0x01;
        /// PVs may be added and removed.
        const EXTENDABLE = 0x04;
    }
}

fn yes() -> bool {
    true
}

/// What a caller supplies to create a VG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VgSpec {
    pub name: String,
    /// VG slot.
    pub number: usize,
    /// Size of each extent, in 512-byte sectors.
    pub pe_size: u64,
    pub pv_max: usize,
    pub lv_max: usize,
    #[serde(default = "yes")]
    pub extendable: bool,
    #[serde(default)]
    pub pvs: Vec<PvSpec>,
    #[serde(default)]
    pub lvs: Vec<LvSpec>,
}

/// A copy of a VG's externally visible state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VgReport {
    pub name: String,
    pub id: String,
    pub number: usize,
    pub status: VgStatus,
    pub pe_size: u64,
    pub pv_max: usize,
    pub pv_cur: usize,
    pub pv_act: usize,
    pub lv_max: usize,
    pub lv_cur: usize,
    pub lv_open: u32,
    pub pe_total: u64,
    pub pe_allocated: u64,
    pub pvs: Vec<PhysicalVolume>,
    pub lvs: Vec<String>,
}

/// A Volume Group allows multiple Physical Volumes to be treated as a
/// storage pool that can then be used to allocate Logical Volumes.
#[derive(Debug)]
pub struct VolumeGroup {
    /// Name.
    pub name: String,
    /// Uuid.
    pub id: String,
    /// Slot in the engine's VG table.
    pub number: usize,
    pub status: VgStatus,
    /// Size of each extent, in 512-byte sectors.
    pub pe_size: u64,
    /// Maximum number of PVs.
    pub pv_max: usize,
    /// Maximum number of LVs.
    pub lv_max: usize,
    /// Opens summed over all LVs.
    pub lv_open: u32,
    /// Extents over all PVs.
    pub pe_total: u64,
    /// Extents mapped by non-snapshot LVs.
    pub pe_allocated: u64,
    pub(crate) pvs: Vec<PhysicalVolume>,
    pub(crate) lvs: Vec<Option<LogicalVolume>>,
}

impl VolumeGroup {
    /// An inactive VG with no PVs or LVs yet.
    pub(crate) fn new(spec: &VgSpec) -> Result<VolumeGroup> {
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument("VG name is empty".into()));
        }
        if spec.pe_size == 0 || !spec.pe_size.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "extent size {} is not a power of two",
                spec.pe_size
            )));
        }

        let mut status = VgStatus::empty();
        if spec.extendable {
            status.insert(VgStatus::EXTENDABLE);
        }

        Ok(VolumeGroup {
            name: spec.name.clone(),
            id: make_uuid(),
            number: spec.number,
            status,
            pe_size: spec.pe_size,
            pv_max: spec.pv_max,
            lv_max: spec.lv_max,
            lv_open: 0,
            pe_total: 0,
            pe_allocated: 0,
            pvs: Vec::new(),
            lvs: Vec::new(),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status.contains(VgStatus::ACTIVE)
    }

    pub fn pvs(&self) -> &[PhysicalVolume] {
        &self.pvs
    }

    pub fn pv_cur(&self) -> usize {
        self.pvs.len()
    }

    pub fn pv_act(&self) -> usize {
        self.pvs
            .iter()
            .filter(|pv| pv.state == crate::pv::PvState::Active)
            .count()
    }

    pub fn pv_by_name(&self, name: &str) -> Option<&PhysicalVolume> {
        self.pvs.iter().find(|pv| pv.name == name)
    }

    pub fn lvs(&self) -> impl Iterator<Item = &LogicalVolume> {
        self.lvs.iter().filter_map(Option::as_ref)
    }

    pub fn lv_cur(&self) -> usize {
        self.lvs().count()
    }

    pub fn lv(&self, id: LvId) -> Option<&LogicalVolume> {
        self.lvs.get(id).and_then(Option::as_ref)
    }

    pub(crate) fn lv_mut(&mut self, id: LvId) -> Option<&mut LogicalVolume> {
        self.lvs.get_mut(id).and_then(Option::as_mut)
    }

    pub fn find_lv(&self, name: &str) -> Option<LvId> {
        self.lvs().find(|lv| lv.name == name).map(|lv| lv.number)
    }

    pub fn lv_by_name(&self, name: &str) -> Option<&LogicalVolume> {
        self.lvs().find(|lv| lv.name == name)
    }

    fn lv_or_err(&self, name: &str) -> Result<LvId> {
        self.find_lv(name)
            .ok_or_else(|| Error::NotFound(format!("LV {} in VG {}", name, self.name)))
    }

    pub fn report(&self) -> VgReport {
        VgReport {
            name: self.name.clone(),
            id: self.id.clone(),
            number: self.number,
            status: self.status,
            pe_size: self.pe_size,
            pv_max: self.pv_max,
            pv_cur: self.pv_cur(),
            pv_act: self.pv_act(),
            lv_max: self.lv_max,
            lv_cur: self.lv_cur(),
            lv_open: self.lv_open,
            pe_total: self.pe_total,
            pe_allocated: self.pe_allocated,
            pvs: self.pvs.clone(),
            lvs: self.lvs().map(|lv| lv.name.clone()).collect(),
        }
    }

    /// Attach a PV.
    pub(crate) fn add_pv(&mut self, spec: &PvSpec) -> Result<()> {
        if self.pvs.len() >= self.pv_max {
            return Err(Error::OutOfCapacity(format!(
                "VG {} already has {} PVs",
                self.name, self.pv_max
            )));
        }
        if self
            .pvs
            .iter()
            .any(|pv| pv.name == spec.name || pv.device == spec.device)
        {
            return Err(Error::AlreadyExists(format!(
                "PV {} ({}) in VG {}",
                spec.name, spec.device, self.name
            )));
        }

        let pv = PhysicalVolume::from_spec(spec, self.pvs.len() + 1, self.pe_size)?;
        self.pe_total = self.pe_total.checked_add(pv.pe_total).ok_or_else(|| {
            Error::OutOfCapacity(format!("VG {}: too many extents with PV {}", self.name, pv.name))
        })?;
        debug!("VG {}: PV {} with {} extents", self.name, pv.name, pv.pe_total);
        self.pvs.push(pv);

        Ok(())
    }

    /// Add a PV to a live VG.
    pub(crate) fn extend(&mut self, spec: &PvSpec) -> Result<()> {
        if !self.status.contains(VgStatus::EXTENDABLE) {
            return Err(Error::Forbidden(format!("VG {} is not extendable", self.name)));
        }
        self.add_pv(spec)?;
        info!("VG {} extended by PV {}", self.name, spec.name);
        Ok(())
    }

    /// Remove a PV. It must be unused by any LV.
    pub(crate) fn reduce(&mut self, name: &str) -> Result<()> {
        if !self.status.contains(VgStatus::EXTENDABLE) {
            return Err(Error::Forbidden(format!("VG {} is not extendable", self.name)));
        }
        let idx = self
            .pvs
            .iter()
            .position(|pv| pv.name == name)
            .ok_or_else(|| Error::NotFound(format!("PV {} in VG {}", name, self.name)))?;

        let dev = self.pvs[idx].device;
        if self.pvs[idx].pe_allocated > 0 {
            return Err(Error::Forbidden(format!(
                "PV {} still has {} allocated extents",
                name, self.pvs[idx].pe_allocated
            )));
        }
        for lv in self.lvs() {
            if let Some(ref snap) = lv.snapshot {
                if unpoison(snap.table.lock()).uses_device(dev) {
                    return Err(Error::Forbidden(format!(
                        "PV {} holds COW storage of snapshot {}",
                        name, lv.name
                    )));
                }
            }
        }

        let pv = self.pvs.remove(idx);
        self.pe_total -= pv.pe_total;
        for (i, pv) in self.pvs.iter_mut().enumerate() {
            pv.number = i + 1;
        }
        info!("VG {} reduced by PV {}", self.name, name);

        Ok(())
    }

    pub(crate) fn change_pv(&mut self, name: &str, change: &PvChange) -> Result<PhysicalVolume> {
        let vg_name = &self.name;
        let pv = self
            .pvs
            .iter_mut()
            .find(|pv| pv.name == name)
            .ok_or_else(|| Error::NotFound(format!("PV {} in VG {}", name, vg_name)))?;
        pv.apply_change(change);
        Ok(pv.clone())
    }

    // Every extent mapped by a non-snapshot LV other than `except`.
    fn extents_in_use(&self, except: Option<LvId>) -> HashSet<PeSpec> {
        self.lvs()
            .filter(|lv| !lv.is_snapshot() && Some(lv.number) != except)
            .flat_map(|lv| {
                lv.extents()
                    .iter()
                    .map(|pe| PeSpec {
                        dev: pe.dev,
                        addr: pe.addr,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn free_lv_slot(&self) -> Option<LvId> {
        match self.lvs.iter().position(Option::is_none) {
            Some(slot) => Some(slot),
            None if self.lvs.len() < self.lv_max => Some(self.lvs.len()),
            None => None,
        }
    }

    fn put_lv(&mut self, lv: LogicalVolume) {
        let slot = lv.number;
        if slot == self.lvs.len() {
            self.lvs.push(Some(lv));
        } else {
            self.lvs[slot] = Some(lv);
        }
    }

    /// Create a logical volume in the volume group.
    pub(crate) fn create_lv(&mut self, spec: &LvSpec, env: &Env, devices: &mut DeviceTable) -> Result<LvId> {
        spec.check_modes()?;
        if self.find_lv(&spec.name).is_some() {
            return Err(Error::AlreadyExists(format!("LV {} in VG {}", spec.name, self.name)));
        }
        let number = self.free_lv_slot().ok_or_else(|| {
            Error::OutOfCapacity(format!("VG {} already has {} LVs", self.name, self.lv_max))
        })?;

        let minor = match spec.minor {
            Some(m) if m > env.config.max_minor => {
                return Err(Error::InvalidArgument(format!(
                    "minor {} above {}",
                    m, env.config.max_minor
                )))
            }
            Some(m) if devices.lookup(m).is_some() => {
                return Err(Error::AlreadyExists(format!("minor {}", m)))
            }
            Some(m) => m,
            None => devices
                .free_minor(env.config.max_minor)
                .ok_or_else(|| Error::OutOfCapacity("no free minor".into()))?,
        };
        let device = Device::new(env.config.blk_major, minor);
        let read_ahead = env.config.clamp_read_ahead(spec.read_ahead);

        let lv = match spec.snapshot {
            Some(ref snap) => {
                if snap.exceptions.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "snapshot {} has no exception storage",
                        spec.name
                    )));
                }
                let chunk = snap.chunk_size;
                if !chunk.is_power_of_two()
                    || chunk < env.config.snapshot_min_chunk
                    || chunk > env.config.snapshot_max_chunk
                    || u64::from(chunk) > self.pe_size
                {
                    return Err(Error::InvalidArgument(format!(
                        "snapshot chunk size {} is not usable",
                        chunk
                    )));
                }

                let origin = devices
                    .lookup(snap.origin_minor)
                    .filter(|e| e.vg == self.number)
                    .and_then(|e| self.lv(e.lv))
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "origin minor {} in VG {}",
                            snap.origin_minor, self.name
                        ))
                    })?;
                if origin.is_snapshot() {
                    return Err(Error::InvalidArgument(format!(
                        "{} is itself a snapshot",
                        origin.name
                    )));
                }

                let table = ExceptionTable::new(snap.exceptions.clone(), u64::from(chunk));
                let lv = LogicalVolume::new_snapshot(spec, number, device, read_ahead, origin, table);
                if let Some(ref s) = lv.snapshot {
                    let mut table = unpoison(s.table.lock());
                    env.store.alloc(&lv, &mut table)?;
                }
                lv
            }
            None => {
                if spec.extents.is_empty() {
                    return Err(Error::InvalidArgument(format!("LV {} has no extents", spec.name)));
                }
                spec.layout().check(self.pe_size, spec.extents.len())?;
                extent::validate(
                    &self.pvs,
                    self.pe_size,
                    &spec.extents,
                    None,
                    &self.extents_in_use(None),
                )?;
                let map = ExtentMap::from_specs(&spec.extents)?;
                LogicalVolume::new(spec, number, device, read_ahead, map, self.pe_size)?
            }
        };

        // Nothing fails from here on.
        let size = lv.size;
        let origin = lv.snapshot_origin();
        if origin.is_none() {
            extent::charge(&mut self.pvs, &mut self.pe_allocated, lv.extents());
        }
        self.put_lv(lv);
        devices.register(
            minor,
            DeviceEntry {
                vg: self.number,
                lv: number,
                size,
                read_ahead,
            },
        );

        if let Some(org) = origin {
            self.link_snapshot(org, number);
            if let Some(org_lv) = self.lv(org) {
                if let Err(e) = env.io.flush(org_lv.device) {
                    warn!("flushing origin {} failed: {}", org_lv.name, e);
                }
            }
        }

        info!(
            "VG {}: created LV {} on {} ({} sectors)",
            self.name, spec.name, device, size
        );
        Ok(number)
    }

    // Append `snap` to the end of `origin`'s snapshot chain.
    fn link_snapshot(&mut self, origin: LvId, snap: LvId) {
        let mut tail = origin;
        while let Some(next) = self.lv(tail).and_then(|lv| lv.snapshot_next) {
            tail = next;
        }

        if let Some(lv) = self.lv_mut(tail) {
            lv.snapshot_next = Some(snap);
        }
        if let Some(lv) = self.lv_mut(snap) {
            lv.snapshot_prev = Some(tail);
            lv.snapshot_next = None;
        }
        if let Some(lv) = self.lv_mut(origin) {
            lv.access.insert(LvAccess::SNAPSHOT_ORG);
        }
    }

    fn unlink_snapshot(&mut self, snap: LvId) {
        let (prev, next, origin) = match self.lv(snap) {
            Some(lv) => (lv.snapshot_prev, lv.snapshot_next, lv.snapshot_origin()),
            None => return,
        };

        if let Some(p) = prev.and_then(|p| self.lv_mut(p)) {
            p.snapshot_next = next;
        }
        if let Some(n) = next.and_then(|n| self.lv_mut(n)) {
            n.snapshot_prev = prev;
        }
        if let Some(org) = origin.and_then(|o| self.lv_mut(o)) {
            if org.snapshot_next.is_none() {
                org.access.remove(LvAccess::SNAPSHOT_ORG);
            }
        }
    }

    /// Snapshots of `origin`, in chain order.
    pub fn snapshots_of(&self, origin: LvId) -> Vec<LvId> {
        let mut ids = Vec::new();
        let mut next = self.lv(origin).and_then(|lv| lv.snapshot_next);
        while let Some(id) = next {
            ids.push(id);
            next = self.lv(id).and_then(|lv| lv.snapshot_next);
        }
        ids
    }

    /// Destroy a logical volume. `force` ignores open counts.
    pub(crate) fn remove_lv(&mut self, id: LvId, force: bool, env: &Env, devices: &mut DeviceTable) -> Result<()> {
        let (device, name) = {
            let lv = self
                .lv(id)
                .ok_or_else(|| Error::NotFound(format!("LV #{} in VG {}", id, self.name)))?;
            if lv.open_count > 0 && !force {
                return Err(Error::Busy(format!("LV {} is open", lv.name)));
            }
            if lv.is_origin() {
                return Err(Error::Forbidden(format!("LV {} still has snapshots", lv.name)));
            }
            (lv.device, lv.name.clone())
        };

        if let Some(lv) = self.lv_mut(id) {
            lv.status.insert(LvStatus::SPINDOWN);
        }
        if let Err(e) = env.io.flush(device) {
            warn!("flushing {} failed: {}", name, e);
        }
        if let Some(lv) = self.lv_mut(id) {
            lv.status.remove(LvStatus::ACTIVE);
        }
        env.io.invalidate(device);
        devices.unregister(device.minor);

        let is_snapshot = self.lv(id).map_or(false, LogicalVolume::is_snapshot);
        if is_snapshot {
            self.unlink_snapshot(id);
        }

        if let Some(lv) = self.lvs.get_mut(id).and_then(Option::take) {
            match lv.snapshot {
                Some(ref s) => {
                    let mut table = unpoison(s.table.lock());
                    env.store.release(&lv, &mut table);
                }
                None => extent::discharge(&mut self.pvs, &mut self.pe_allocated, lv.extents()),
            }
            self.lv_open -= lv.open_count;
        }

        info!("VG {}: removed LV {}", self.name, name);
        Ok(())
    }

    pub(crate) fn remove_lv_by_name(&mut self, name: &str, env: &Env, devices: &mut DeviceTable) -> Result<()> {
        let id = self.lv_or_err(name)?;
        self.remove_lv(id, false, env, devices)
    }

    /// Give an LV a new extent list. `grow` selects extend or reduce.
    pub(crate) fn resize_lv(
        &mut self,
        name: &str,
        spec: &LvSpec,
        grow: bool,
        env: &Env,
        devices: &mut DeviceTable,
    ) -> Result<()> {
        let id = self.lv_or_err(name)?;
        let map = {
            let lv = self.lv(id).ok_or_else(|| Error::NotFound(name.to_string()))?;
            if lv.open_count > 0 {
                return Err(Error::Busy(format!("LV {} is open", name)));
            }
            if lv.is_snapshot() || lv.is_origin() {
                return Err(Error::Forbidden(format!(
                    "LV {} is part of a snapshot relation",
                    name
                )));
            }
            if spec.stripes != lv.stripes {
                return Err(Error::InvalidArgument(format!(
                    "LV {} has {} stripes, not {}",
                    name, lv.stripes, spec.stripes
                )));
            }

            let old_les = lv.allocated_le as usize;
            let new_les = spec.extents.len();
            if new_les == 0 || (grow && new_les < old_les) || (!grow && new_les > old_les) {
                return Err(Error::InvalidArgument(format!(
                    "cannot {} LV {} from {} to {} extents",
                    if grow { "extend" } else { "reduce" },
                    name,
                    old_les,
                    new_les
                )));
            }

            lv.layout().check(self.pe_size, new_les)?;
            extent::validate(
                &self.pvs,
                self.pe_size,
                &spec.extents,
                Some(lv.extents()),
                &self.extents_in_use(Some(id)),
            )?;
            ExtentMap::from_specs(&spec.extents)?
        };

        let pe_size = self.pe_size;
        let (old, new, device, size, saved) = {
            let lv = self.lv_mut(id).ok_or_else(|| Error::NotFound(name.to_string()))?;
            let saved = lv.status;
            lv.status.insert(LvStatus::SPINDOWN);
            if let Err(e) = env.io.flush(lv.device) {
                warn!("flushing {} failed: {}", lv.name, e);
            }
            env.io.invalidate(lv.device);

            map.inherit_stats(lv.extents(), lv.stripes);
            let new = Arc::new(map);
            let old = match lv.replace_extents(Arc::clone(&new), pe_size) {
                Ok(old) => old,
                Err(e) => {
                    lv.status = saved;
                    return Err(e);
                }
            };
            (old, new, lv.device, lv.size, saved)
        };

        extent::discharge(&mut self.pvs, &mut self.pe_allocated, &old);
        extent::charge(&mut self.pvs, &mut self.pe_allocated, &new);

        devices.resize(device.minor, size);
        if let Some(lv) = self.lv_mut(id) {
            lv.status = saved;
        }

        info!(
            "VG {}: {} LV {} to {} extents",
            self.name,
            if grow { "extended" } else { "reduced" },
            name,
            new.len()
        );
        Ok(())
    }

    pub(crate) fn rename_lv(&mut self, name: &str, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(Error::InvalidArgument("LV name is empty".into()));
        }
        if self.find_lv(new_name).is_some() {
            return Err(Error::AlreadyExists(format!("LV {} in VG {}", new_name, self.name)));
        }
        let id = self.lv_or_err(name)?;
        if let Some(lv) = self.lv_mut(id) {
            lv.name = new_name.to_string();
        }
        Ok(())
    }

    /// Point the logical extent now at `old` to `new`, after its data
    /// was moved there.
    pub(crate) fn remap_le(&mut self, name: &str, old: &PeSpec, new: &PeSpec, env: &Env) -> Result<()> {
        let id = self.lv_or_err(name)?;
        let lv = self.lv(id).ok_or_else(|| Error::NotFound(name.to_string()))?;
        if lv.is_snapshot() {
            return Err(Error::Forbidden(format!(
                "snapshot {} does not own its extents",
                name
            )));
        }
        if old == new {
            return Ok(());
        }

        extent::validate(
            &self.pvs,
            self.pe_size,
            &[*new],
            None,
            &self.extents_in_use(None),
        )?;
        let (map, le) = lv.extents().with_remapped(old, new)?;
        let map = Arc::new(map);
        let snapshots = self.snapshots_of(id);

        // Exceptions are keyed on the origin's physical location.
        for &snap in &snapshots {
            let snap_lv = match self.lv(snap) {
                Some(lv) => lv,
                None => continue,
            };
            if let Some(ref s) = snap_lv.snapshot {
                let mut table = unpoison(s.table.lock());
                if let Err(e) = env.store.relocate(snap_lv, *old, *new, self.pe_size, &mut table) {
                    warn!("dropping snapshot {}: {}", snap_lv.name, e);
                    s.invalidate();
                    env.store.release(snap_lv, &mut table);
                }
            }
        }

        let pe_size = self.pe_size;
        if let Some(lv) = self.lv_mut(id) {
            lv.replace_extents(Arc::clone(&map), pe_size)?;
        }
        for snap in snapshots {
            if let Some(lv) = self.lv_mut(snap) {
                lv.reshare_extents(&map);
            }
        }

        if let Some(pv) = self.pvs.iter_mut().find(|pv| pv.device == old.dev) {
            pv.pe_allocated -= 1;
        }
        if let Some(pv) = self.pvs.iter_mut().find(|pv| pv.device == new.dev) {
            pv.pe_allocated += 1;
        }

        info!(
            "VG {}: LV {} extent {} moved {}:{} -> {}:{}",
            self.name, name, le, old.dev, old.addr, new.dev, new.addr
        );
        Ok(())
    }

    /// Remove every LV, snapshots first, and detach every PV.
    pub(crate) fn teardown(&mut self, force: bool, env: &Env, devices: &mut DeviceTable) -> Result<()> {
        if self.lv_open > 0 && !force {
            return Err(Error::Busy(format!(
                "VG {} has {} open LVs",
                self.name, self.lv_open
            )));
        }
        self.status.remove(VgStatus::ACTIVE);

        // An origin cannot go while it has snapshots.
        let snapshots: Vec<LvId> = self.lvs().filter(|lv| lv.is_snapshot()).map(|lv| lv.number).collect();
        for id in snapshots {
            self.remove_lv(id, force, env, devices)?;
            thread::yield_now();
        }
        let rest: Vec<LvId> = self.lvs().map(|lv| lv.number).collect();
        for id in rest {
            self.remove_lv(id, force, env, devices)?;
            thread::yield_now();
        }

        self.pvs.clear();
        self.pe_total = 0;
        info!("VG {} torn down", self.name);

        Ok(())
    }
}
