// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Logical-to-physical extent maps and PV extent accounting.
//!
//! Placement is decided by the caller: an LV arrives with its extent
//! list already filled in. This module checks that list against the
//! VG's PVs and keeps the `pe_allocated` counters of the VG and its PVs
//! equal to the extents mapped by non-snapshot LVs.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::pv::{Allocatable, PhysicalVolume};
use crate::{Device, Error, Result};

/// One physical extent as named by a caller: the PV's device and the
/// sector on it where the extent starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeSpec {
    pub dev: Device,
    pub addr: u64,
}

/// An extent map entry with its I/O statistics, as reported outward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeStats {
    pub dev: Device,
    pub addr: u64,
    pub reads: u64,
    pub writes: u64,
}

#[derive(Debug)]
pub struct PeEntry {
    pub dev: Device,
    pub addr: u64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl PeEntry {
    fn new(spec: &PeSpec) -> PeEntry {
        PeEntry {
            dev: spec.dev,
            addr: spec.addr,
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn inherit(&self, old: &PeEntry) {
        self.reads.fetch_add(old.reads(), Ordering::Relaxed);
        self.writes.fetch_add(old.writes(), Ordering::Relaxed);
    }

    fn spec(&self) -> PeSpec {
        PeSpec {
            dev: self.dev,
            addr: self.addr,
        }
    }
}

/// The ordered logical-extent to physical-extent map of an LV.
#[derive(Debug, Default)]
pub struct ExtentMap {
    entries: Vec<PeEntry>,
}

impl ExtentMap {
    pub fn from_specs(specs: &[PeSpec]) -> Result<ExtentMap> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(specs.len())?;
        entries.extend(specs.iter().map(PeEntry::new));

        Ok(ExtentMap { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PeEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeEntry> {
        self.entries.iter()
    }

    pub fn stats(&self) -> Vec<PeStats> {
        self.entries
            .iter()
            .map(|pe| PeStats {
                dev: pe.dev,
                addr: pe.addr,
                reads: pe.reads(),
                writes: pe.writes(),
            })
            .collect()
    }

    pub(crate) fn record(&self, index: usize, write: bool) {
        if let Some(pe) = self.entries.get(index) {
            if write {
                pe.writes.fetch_add(1, Ordering::Relaxed);
            } else {
                pe.reads.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Carry read/write counters over from the map this one replaces.
    ///
    /// Linear maps keep the counters of the common prefix. Striped maps
    /// are laid out stripe after stripe, so the prefix of every stripe is
    /// carried over separately and an extent keeps its counters as long
    /// as it stays at the same offset within its stripe.
    pub fn inherit_stats(&self, old: &ExtentMap, stripes: u32) {
        if stripes < 2 {
            let end = old.len().min(self.len());
            for l in 0..end {
                self.entries[l].inherit(&old.entries[l]);
            }
        } else {
            let stripes = stripes as usize;
            let old_stripe_len = old.len() / stripes;
            let new_stripe_len = self.len() / stripes;
            let end = old_stripe_len.min(new_stripe_len);

            let mut source = 0;
            let mut dest = 0;
            for _ in 0..stripes {
                for j in 0..end {
                    self.entries[dest + j].inherit(&old.entries[source + j]);
                }
                source += old_stripe_len;
                dest += new_stripe_len;
            }
        }
    }

    /// A copy of this map with the extent at `old` moved to `new`,
    /// counters included. Returns the logical extent that moved.
    pub(crate) fn with_remapped(&self, old: &PeSpec, new: &PeSpec) -> Result<(ExtentMap, usize)> {
        let le = self
            .entries
            .iter()
            .position(|pe| pe.dev == old.dev && pe.addr == old.addr)
            .ok_or_else(|| {
                Error::NotFound(format!("no logical extent maps to {} sector {}", old.dev, old.addr))
            })?;

        let specs: Vec<PeSpec> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, pe)| if i == le { *new } else { pe.spec() })
            .collect();
        let map = ExtentMap::from_specs(&specs)?;
        for (new_pe, old_pe) in map.entries.iter().zip(self.entries.iter()) {
            new_pe.inherit(old_pe);
        }

        Ok((map, le))
    }
}

/// Striping parameters of an LV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub stripes: u32,
    /// Sectors per stripe chunk
    pub stripe_size: u32,
}

impl Layout {
    pub fn is_striped(&self) -> bool {
        self.stripes >= 2
    }

    pub fn check(&self, pe_size: u64, extents: usize) -> Result<()> {
        if self.stripes == 0 {
            return Err(Error::InvalidArgument("stripe count is zero".into()));
        }
        if !self.is_striped() {
            return Ok(());
        }
        if self.stripe_size == 0 || !self.stripe_size.is_power_of_two() {
            return Err(Error::InvalidArgument(format!(
                "stripe size {} is not a power of two",
                self.stripe_size
            )));
        }
        if pe_size % u64::from(self.stripe_size) != 0 {
            return Err(Error::InvalidArgument(format!(
                "stripe size {} does not divide extent size {}",
                self.stripe_size, pe_size
            )));
        }
        if extents % self.stripes as usize != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} extents cannot be spread over {} stripes",
                extents, self.stripes
            )));
        }
        Ok(())
    }
}

/// Check caller-supplied extents before they are mapped.
///
/// `replacing` is the map the extents replace, if any: its extents count
/// as free, and only extents not already in it need an allocatable PV.
/// `in_use` holds the extents mapped by every other LV of the VG.
pub(crate) fn validate(
    pvs: &[PhysicalVolume],
    pe_size: u64,
    specs: &[PeSpec],
    replacing: Option<&ExtentMap>,
    in_use: &HashSet<PeSpec>,
) -> Result<()> {
    let kept: HashSet<PeSpec> = replacing
        .map(|map| map.iter().map(PeEntry::spec).collect())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let mut wanted: BTreeMap<Device, u64> = BTreeMap::new();

    for spec in specs {
        let pv = pvs
            .iter()
            .find(|pv| pv.device == spec.dev)
            .ok_or_else(|| Error::InvalidArgument(format!("{} is not a PV of this VG", spec.dev)))?;

        if !pv.holds_extent(spec.addr, pe_size) {
            return Err(Error::InvalidArgument(format!(
                "sector {} is not an extent of PV {}",
                spec.addr, pv.name
            )));
        }
        if !seen.insert(*spec) {
            return Err(Error::InvalidArgument(format!(
                "extent {} sector {} mapped twice",
                spec.dev, spec.addr
            )));
        }
        if in_use.contains(spec) {
            return Err(Error::Forbidden(format!(
                "extent {} sector {} is mapped by another LV",
                spec.dev, spec.addr
            )));
        }
        if !kept.contains(spec) && pv.allocatable == Allocatable::NotAllocatable {
            return Err(Error::Forbidden(format!("PV {} is not allocatable", pv.name)));
        }

        *wanted.entry(spec.dev).or_insert(0) += 1;
    }

    for (dev, count) in wanted {
        if let Some(pv) = pvs.iter().find(|pv| pv.device == dev) {
            let released = kept.iter().filter(|pe| pe.dev == dev).count() as u64;
            if count > pv.pe_free() + released {
                return Err(Error::OutOfCapacity(format!(
                    "PV {} has {} free extents, {} requested",
                    pv.name,
                    pv.pe_free() + released,
                    count
                )));
            }
        }
    }

    Ok(())
}

/// Count every extent of `map` as allocated on the VG and its PVs.
pub(crate) fn charge(pvs: &mut [PhysicalVolume], vg_allocated: &mut u64, map: &ExtentMap) {
    for pe in map.iter() {
        *vg_allocated += 1;
        if let Some(pv) = pvs.iter_mut().find(|pv| pv.device == pe.dev) {
            pv.pe_allocated += 1;
        }
    }
}

/// The reverse of `charge`.
pub(crate) fn discharge(pvs: &mut [PhysicalVolume], vg_allocated: &mut u64, map: &ExtentMap) {
    for pe in map.iter() {
        *vg_allocated -= 1;
        if let Some(pv) = pvs.iter_mut().find(|pv| pv.device == pe.dev) {
            pv.pe_allocated -= 1;
        }
    }
}
