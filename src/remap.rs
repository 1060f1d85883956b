// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Virtual-to-physical I/O remapping.
//!
//! Every request addressed to an LV is turned into a (device, sector)
//! pair on one of the VG's PVs, or into the preserved copy of a chunk in
//! a snapshot's exception store. A request is remapped as a whole: it
//! must not cross an extent or stripe chunk, and on any failure nothing
//! of it is remapped.

use log::{debug, trace, warn};

use crate::config::ForeignWritePolicy;
use crate::engine::Engine;
use crate::extent::ExtentMap;
use crate::lv::{LogicalVolume, LvAccess};
use crate::util::{chunk_start, unpoison};
use crate::vg::VolumeGroup;
use crate::{Device, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    ReadAhead,
    Write,
    WriteAhead,
}

impl Direction {
    pub fn is_write(self) -> bool {
        matches!(self, Direction::Write | Direction::WriteAhead)
    }
}

/// A block request against an LV device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoRequest {
    /// Minor of the LV addressed.
    pub minor: u32,
    /// Device the request arrived on; normally the LV's own.
    pub dev: Device,
    /// First LV sector.
    pub sector: u64,
    /// Length in sectors.
    pub length: u64,
    pub direction: Direction,
}

impl IoRequest {
    pub fn new(dev: Device, sector: u64, length: u64, direction: Direction) -> IoRequest {
        IoRequest {
            minor: dev.minor,
            dev,
            sector,
            length,
            direction,
        }
    }

    /// The same request, arriving on `dev`.
    pub fn via(self, dev: Device) -> IoRequest {
        IoRequest { dev, ..self }
    }
}

/// Where a request lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remapped {
    pub dev: Device,
    pub sector: u64,
}

// A translated request: logical extent index, target and start of the
// physical extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    index: usize,
    dev: Device,
    sector: u64,
    pe_start: u64,
}

fn io_error(msg: String) -> Error {
    Error::IoError(msg)
}

/// Translate `length` sectors at LV sector `sector` through `map`.
fn translate(lv: &LogicalVolume, map: &ExtentMap, pe_size: u64, sector: u64, length: u64) -> Result<Target> {
    let (index, offset, room) = if lv.stripes < 2 {
        let index = sector / pe_size;
        (index, sector % pe_size, pe_size - sector % pe_size)
    } else {
        let stripes = u64::from(lv.stripes);
        let stripe_size = u64::from(lv.stripe_size);
        let stripe_length = pe_size
            .checked_mul(stripes)
            .ok_or_else(|| io_error(format!("LV {} stripes overflow the sector range", lv.name)))?;
        let stripe_index = (sector % stripe_length) / stripe_size;
        let index = sector / stripe_length + (stripe_index % stripes) * (u64::from(lv.allocated_le) / stripes);
        let offset = (sector % stripe_length)
            - (stripe_index % stripes) * stripe_size
            - stripe_index / stripes * (stripes - 1) * stripe_size;
        (index, offset, stripe_size - sector % stripe_size)
    };

    if length > room {
        return Err(io_error(format!(
            "{} sectors at {} of LV {} cross an extent boundary",
            length, sector, lv.name
        )));
    }

    let pe = map.get(index as usize).ok_or_else(|| {
        io_error(format!("LV {} has no logical extent {}", lv.name, index))
    })?;

    Ok(Target {
        index: index as usize,
        dev: pe.dev,
        sector: pe.addr + offset,
        pe_start: pe.addr,
    })
}

impl Engine {
    // Checks that do not depend on the physical target.
    fn admit(&self, req: &IoRequest, vg: &VolumeGroup, lv: &LogicalVolume) -> Result<()> {
        if !vg.is_active() || !lv.is_active() {
            return Err(io_error(format!("LV {} is not active", lv.name)));
        }

        if req.direction.is_write() {
            if !lv.access.contains(LvAccess::WRITE) {
                return Err(io_error(format!("LV {} is read-only", lv.name)));
            }
            if req.dev != lv.device {
                match self.config.foreign_device_writes {
                    ForeignWritePolicy::Reject => {
                        warn!(
                            "write to LV {} arrived on {} instead of {}, rejected",
                            lv.name, req.dev, lv.device
                        );
                        return Err(io_error(format!("write via foreign device {}", req.dev)));
                    }
                    ForeignWritePolicy::Remap => {
                        debug!("write to LV {} via {}", lv.name, req.dev);
                    }
                }
            }
        }

        if req.length == 0 || req.sector.checked_add(req.length).map_or(true, |end| end > lv.size) {
            return Err(io_error(format!(
                "{} sectors at {} are beyond the end of LV {} ({} sectors)",
                req.length, req.sector, lv.name, lv.size
            )));
        }

        Ok(())
    }

    /// Remap a request to its physical location, blocking while the
    /// extent it lands on is being moved.
    pub fn map(&self, req: &IoRequest) -> Result<Remapped> {
        loop {
            let tables = self.read();
            let (vg, lv) = tables
                .by_minor(req.minor)
                .ok_or_else(|| io_error(format!("no LV with minor {}", req.minor)))?;
            self.admit(req, vg, lv)?;

            let target = translate(lv, lv.extents(), vg.pe_size, req.sector, req.length)?;
            if self.pe_lock.blocks(target.dev, target.sector) {
                drop(tables);
                debug!(
                    "request for {}:{} waits for extent move",
                    target.dev, target.sector
                );
                self.pe_lock.wait(target.dev, target.sector);
                // The extent may have moved meanwhile.
                continue;
            }

            lv.extents().record(target.index, req.direction.is_write());

            let out = if lv.is_snapshot() {
                self.remap_snapshot(req, vg, lv, target)?
            } else {
                if lv.is_origin() && req.direction.is_write() {
                    self.preserve_origin(req, vg, lv, target);
                }
                Remapped {
                    dev: target.dev,
                    sector: target.sector,
                }
            };

            trace!(
                "LV {} sector {} -> {}:{}",
                lv.name,
                req.sector,
                out.dev,
                out.sector
            );
            return Ok(out);
        }
    }

    /// Translate one sector without touching statistics or snapshots'
    /// stores.
    pub fn bmap(&self, minor: u32, sector: u64) -> Result<Remapped> {
        let tables = self.read();
        let (vg, lv) = tables
            .by_minor(minor)
            .ok_or_else(|| io_error(format!("no LV with minor {}", minor)))?;
        let req = IoRequest::new(lv.device, sector, 1, Direction::Read);
        self.admit(&req, vg, lv)?;

        let target = translate(lv, lv.extents(), vg.pe_size, sector, 1)?;
        let mut dev = target.dev;
        let mut sector = target.sector;
        if let Some(ref snap) = lv.snapshot {
            let table = unpoison(snap.table.lock());
            self.store.remap_block(&mut dev, &mut sector, target.pe_start, &table);
        }

        Ok(Remapped { dev, sector })
    }

    // I/O through a snapshot LV. Reads see preserved chunks; writes first
    // preserve the origin chunk, then go to the copy.
    fn remap_snapshot(&self, req: &IoRequest, vg: &VolumeGroup, lv: &LogicalVolume, target: Target) -> Result<Remapped> {
        let snap = match lv.snapshot {
            Some(ref s) => s,
            None => return Err(io_error(format!("LV {} has no exception table", lv.name))),
        };

        let mut dev = target.dev;
        let mut sector = target.sector;

        if !req.direction.is_write() {
            let table = unpoison(snap.table.lock());
            check_chunk(lv, &target, req.length, table.chunk_size())?;
            self.store.remap_block(&mut dev, &mut sector, target.pe_start, &table);
            return Ok(Remapped { dev, sector });
        }

        let origin = vg
            .lv(snap.origin)
            .ok_or_else(|| io_error(format!("origin of snapshot {} is gone", lv.name)))?;
        let _cow = unpoison(origin.cow_lock.lock());
        let mut table = unpoison(snap.table.lock());
        check_chunk(lv, &target, req.length, table.chunk_size())?;

        if !self.store.remap_block(&mut dev, &mut sector, target.pe_start, &table) {
            if let Err(e) = self.store.copy_on_write(
                target.dev,
                target.sector,
                target.pe_start,
                req.sector,
                lv,
                &mut table,
            ) {
                warn!("dropping snapshot {}: {}", lv.name, e);
                snap.invalidate();
                self.store.release(lv, &mut table);
                return Err(io_error(format!("snapshot {} dropped", lv.name)));
            }
            if !self.store.remap_block(&mut dev, &mut sector, target.pe_start, &table) {
                return Err(io_error(format!(
                    "snapshot {} has no copy of sector {}",
                    lv.name, req.sector
                )));
            }
        }

        Ok(Remapped { dev, sector })
    }

    // Preserve every origin chunk the write touches in every live
    // snapshot. A snapshot that cannot take the copy is dropped; the
    // origin write goes ahead regardless.
    fn preserve_origin(&self, req: &IoRequest, vg: &VolumeGroup, lv: &LogicalVolume, target: Target) {
        let _cow = unpoison(lv.cow_lock.lock());
        let end = target.sector + req.length;

        for id in vg.snapshots_of(lv.number) {
            let snap_lv = match vg.lv(id) {
                Some(s) if s.is_active() => s,
                _ => continue,
            };
            let snap = match snap_lv.snapshot {
                Some(ref s) => s,
                None => continue,
            };

            let mut table = unpoison(snap.table.lock());
            let chunk_size = table.chunk_size();
            if chunk_size == 0 {
                continue;
            }

            let mut chunk = chunk_start(target.sector, target.pe_start, chunk_size);
            while chunk < end {
                let mut dev = target.dev;
                let mut sector = chunk;
                if !self.store.remap_block(&mut dev, &mut sector, target.pe_start, &table) {
                    let virt = req.sector + chunk.saturating_sub(target.sector);
                    if let Err(e) = self.store.copy_on_write(
                        target.dev,
                        chunk,
                        target.pe_start,
                        virt,
                        snap_lv,
                        &mut table,
                    ) {
                        warn!("dropping snapshot {}: {}", snap_lv.name, e);
                        snap.invalidate();
                        self.store.release(snap_lv, &mut table);
                        break;
                    }
                }
                chunk += chunk_size;
            }
        }
    }
}

// Snapshot I/O must stay inside one chunk.
fn check_chunk(lv: &LogicalVolume, target: &Target, length: u64, chunk_size: u64) -> Result<()> {
    if chunk_size == 0 {
        return Err(io_error(format!("snapshot {} has been dropped", lv.name)));
    }
    let chunk = chunk_start(target.sector, target.pe_start, chunk_size);
    if target.sector + length > chunk + chunk_size {
        return Err(io_error(format!(
            "{} sectors at {} cross a chunk of snapshot {}",
            length, target.sector, lv.name
        )));
    }
    Ok(())
}
