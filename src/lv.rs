// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Logical Volumes

use std::convert::TryFrom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::extent::{ExtentMap, Layout, PeSpec, PeStats};
use crate::snapshot::{ExceptionSlot, ExceptionTable};
use crate::util::{make_uuid, now, unpoison};
use crate::{Device, Error, Result};

bitflags! {
    /// How an LV may be accessed, and its place in a snapshot relation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LvAccess: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        /// The LV is a snapshot of another LV.
        const SNAPSHOT = 0x04;
        /// The LV has at least one snapshot.
        const SNAPSHOT_ORG = 0x08;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LvStatus: u32 {
        const ACTIVE = 0x01;
        /// Being torn down or resized; no new opens.
        const SPINDOWN = 0x02;
    }
}

bitflags! {
    /// Allocation policy hints, recorded for the control plane.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct LvAllocation: u32 {
        const STRICT = 0x01;
        const CONTIGUOUS = 0x02;
    }
}

/// Index of an LV slot within its VG.
pub type LvId = usize;

fn active() -> LvStatus {
    LvStatus::ACTIVE
}

fn one() -> u32 {
    1
}

/// Snapshot parameters of an LV create request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSpec {
    /// Minor of the LV being snapshotted.
    pub origin_minor: u32,
    /// Sectors per exception chunk.
    pub chunk_size: u32,
    /// Free COW storage, one slot per chunk.
    pub exceptions: Vec<ExceptionSlot>,
}

/// What a caller supplies to create, extend or reduce an LV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LvSpec {
    pub name: String,
    /// Minor of the exposed device; the lowest free one if absent.
    #[serde(default)]
    pub minor: Option<u32>,
    pub access: LvAccess,
    #[serde(default = "active")]
    pub status: LvStatus,
    #[serde(default)]
    pub allocation: LvAllocation,
    #[serde(default = "one")]
    pub stripes: u32,
    /// Sectors per stripe chunk
    #[serde(default)]
    pub stripe_size: u32,
    #[serde(default)]
    pub read_ahead: Option<u32>,
    /// Physical extents in logical order; for striped LVs stripe after
    /// stripe.
    #[serde(default)]
    pub extents: Vec<PeSpec>,
    #[serde(default)]
    pub snapshot: Option<SnapshotSpec>,
}

impl LvSpec {
    /// A linear, writable, active LV over `extents`.
    pub fn linear(name: &str, extents: Vec<PeSpec>) -> LvSpec {
        LvSpec {
            name: name.to_string(),
            minor: None,
            access: LvAccess::READ | LvAccess::WRITE,
            status: LvStatus::ACTIVE,
            allocation: LvAllocation::empty(),
            stripes: 1,
            stripe_size: 0,
            read_ahead: None,
            extents,
            snapshot: None,
        }
    }

    /// A snapshot of the LV with minor `origin_minor`.
    pub fn snapshot(name: &str, origin_minor: u32, chunk_size: u32, exceptions: Vec<ExceptionSlot>) -> LvSpec {
        LvSpec {
            name: name.to_string(),
            minor: None,
            access: LvAccess::READ | LvAccess::SNAPSHOT,
            status: LvStatus::ACTIVE,
            allocation: LvAllocation::empty(),
            stripes: 1,
            stripe_size: 0,
            read_ahead: None,
            extents: Vec::new(),
            snapshot: Some(SnapshotSpec {
                origin_minor,
                chunk_size,
                exceptions,
            }),
        }
    }

    pub fn layout(&self) -> Layout {
        Layout {
            stripes: self.stripes,
            stripe_size: self.stripe_size,
        }
    }

    /// Reject access/status combinations a caller may not ask for.
    pub(crate) fn check_modes(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidArgument("LV name is empty".into()));
        }
        if self.access.contains(LvAccess::SNAPSHOT_ORG) {
            return Err(Error::InvalidArgument(format!(
                "LV {}: origin access is set by the engine",
                self.name
            )));
        }
        if self.access.contains(LvAccess::SNAPSHOT) != self.snapshot.is_some() {
            return Err(Error::InvalidArgument(format!(
                "LV {}: snapshot access and snapshot parameters must come together",
                self.name
            )));
        }
        if self.status.contains(LvStatus::SPINDOWN) {
            return Err(Error::InvalidArgument(format!(
                "LV {}: spindown is set by the engine",
                self.name
            )));
        }
        Ok(())
    }
}

/// The extent map of an LV. A snapshot only borrows its origin's map.
#[derive(Debug)]
pub(crate) enum Extents {
    Owned(Arc<ExtentMap>),
    Shared(Arc<ExtentMap>),
}

impl Extents {
    fn map(&self) -> &Arc<ExtentMap> {
        match self {
            Extents::Owned(map) | Extents::Shared(map) => map,
        }
    }
}

/// Snapshot-only state of an LV.
#[derive(Debug)]
pub(crate) struct Snapshot {
    pub origin: LvId,
    pub origin_minor: u32,
    pub table: Mutex<ExceptionTable>,
    valid: AtomicBool,
}

impl Snapshot {
    pub fn new(origin: LvId, origin_minor: u32, table: ExceptionTable) -> Snapshot {
        Snapshot {
            origin,
            origin_minor,
            table: Mutex::new(table),
            valid: AtomicBool::new(true),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

/// Snapshot fields of an LV report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotReport {
    pub origin_minor: u32,
    pub chunk_size: u64,
    pub remap_ptr: usize,
    pub remap_end: usize,
    pub valid: bool,
}

/// A copy of an LV's externally visible state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LvReport {
    pub name: String,
    pub id: String,
    pub number: LvId,
    pub device: Device,
    pub access: LvAccess,
    pub status: LvStatus,
    pub allocation: LvAllocation,
    pub size: u64,
    pub current_le: u32,
    pub allocated_le: u32,
    pub stripes: u32,
    pub stripe_size: u32,
    pub read_ahead: u32,
    pub open_count: u32,
    pub creation_time: i64,
    pub snapshot: Option<SnapshotReport>,
    pub extents: Option<Vec<PeStats>>,
}

/// A Logical Volume that is created from a Volume Group.
#[derive(Debug)]
pub struct LogicalVolume {
    /// The name.
    pub name: String,
    /// The UUID.
    pub id: String,
    /// Slot within the VG.
    pub number: LvId,
    /// The exposed block device.
    pub device: Device,
    pub access: LvAccess,
    pub status: LvStatus,
    pub allocation: LvAllocation,
    /// Size in sectors.
    pub size: u64,
    pub current_le: u32,
    pub allocated_le: u32,
    pub stripes: u32,
    pub stripe_size: u32,
    pub read_ahead: u32,
    /// Number of consumers holding the device open.
    pub open_count: u32,
    /// Created at this Unix time.
    pub creation_time: i64,
    pub(crate) extents: Extents,
    pub(crate) snapshot: Option<Snapshot>,
    // An origin's `next` is its first snapshot; a snapshot's `prev` is the
    // origin or the snapshot before it.
    pub(crate) snapshot_next: Option<LvId>,
    pub(crate) snapshot_prev: Option<LvId>,
    /// Serializes copy-on-write against this LV's snapshots.
    pub(crate) cow_lock: Mutex<()>,
}

// Extent count and size in sectors of an LV mapping `len` extents.
fn extent_size(name: &str, len: usize, pe_size: u64) -> Result<(u32, u64)> {
    let les = u32::try_from(len)
        .map_err(|_| Error::InvalidArgument(format!("LV {} has too many extents ({})", name, len)))?;
    let size = u64::from(les)
        .checked_mul(pe_size)
        .ok_or_else(|| Error::OutOfCapacity(format!("LV {}: {} extents overflow the sector range", name, les)))?;
    Ok((les, size))
}

impl LogicalVolume {
    pub(crate) fn new(
        spec: &LvSpec,
        number: LvId,
        device: Device,
        read_ahead: u32,
        map: ExtentMap,
        pe_size: u64,
    ) -> Result<LogicalVolume> {
        let (les, size) = extent_size(&spec.name, map.len(), pe_size)?;

        Ok(LogicalVolume {
            name: spec.name.clone(),
            id: make_uuid(),
            number,
            device,
            access: spec.access,
            status: spec.status,
            allocation: spec.allocation,
            size,
            current_le: les,
            allocated_le: les,
            stripes: spec.stripes,
            stripe_size: spec.stripe_size,
            read_ahead,
            open_count: 0,
            creation_time: now(),
            extents: Extents::Owned(Arc::new(map)),
            snapshot: None,
            snapshot_next: None,
            snapshot_prev: None,
            cow_lock: Mutex::new(()),
        })
    }

    /// A snapshot of `origin`, sharing its extent map.
    pub(crate) fn new_snapshot(
        spec: &LvSpec,
        number: LvId,
        device: Device,
        read_ahead: u32,
        origin: &LogicalVolume,
        table: ExceptionTable,
    ) -> LogicalVolume {
        LogicalVolume {
            name: spec.name.clone(),
            id: make_uuid(),
            number,
            device,
            access: spec.access,
            status: spec.status,
            allocation: spec.allocation,
            size: origin.size,
            current_le: origin.current_le,
            allocated_le: origin.allocated_le,
            stripes: origin.stripes,
            stripe_size: origin.stripe_size,
            read_ahead,
            open_count: 0,
            creation_time: now(),
            extents: Extents::Shared(Arc::clone(origin.extents())),
            snapshot: Some(Snapshot::new(origin.number, origin.device.minor, table)),
            snapshot_next: None,
            snapshot_prev: None,
            cow_lock: Mutex::new(()),
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.access.contains(LvAccess::SNAPSHOT)
    }

    pub fn is_origin(&self) -> bool {
        self.access.contains(LvAccess::SNAPSHOT_ORG)
    }

    /// Whether I/O may be mapped through this LV.
    pub fn is_active(&self) -> bool {
        self.status.contains(LvStatus::ACTIVE)
            && !self.status.contains(LvStatus::SPINDOWN)
            && self.snapshot.as_ref().map_or(true, Snapshot::is_valid)
    }

    pub fn layout(&self) -> Layout {
        Layout {
            stripes: self.stripes,
            stripe_size: self.stripe_size,
        }
    }

    /// The LV's extent map; for a snapshot, the origin's.
    pub fn extents(&self) -> &Arc<ExtentMap> {
        self.extents.map()
    }

    /// The origin of a snapshot LV.
    pub fn snapshot_origin(&self) -> Option<LvId> {
        self.snapshot.as_ref().map(|s| s.origin)
    }

    /// Install a new extent map. Snapshots do not own theirs.
    pub(crate) fn replace_extents(&mut self, map: Arc<ExtentMap>, pe_size: u64) -> Result<Arc<ExtentMap>> {
        match self.extents {
            Extents::Shared(_) => Err(Error::Forbidden(format!(
                "snapshot {} cannot change its origin's extents",
                self.name
            ))),
            Extents::Owned(ref mut cur) => {
                let (les, size) = extent_size(&self.name, map.len(), pe_size)?;
                let old = std::mem::replace(cur, map);
                self.current_le = les;
                self.allocated_le = les;
                self.size = size;
                Ok(old)
            }
        }
    }

    /// Follow a new origin map after the origin replaced its own.
    pub(crate) fn reshare_extents(&mut self, map: &Arc<ExtentMap>) {
        if let Extents::Shared(ref mut cur) = self.extents {
            *cur = Arc::clone(map);
        }
    }

    pub fn report(&self, with_extents: bool) -> LvReport {
        let snapshot = self.snapshot.as_ref().map(|s| {
            let table = unpoison(s.table.lock());
            SnapshotReport {
                origin_minor: s.origin_minor,
                chunk_size: table.chunk_size(),
                remap_ptr: table.remap_ptr(),
                remap_end: table.remap_end(),
                valid: s.is_valid(),
            }
        });

        let mut status = self.status;
        if !self.is_active() {
            status.remove(LvStatus::ACTIVE);
        }

        LvReport {
            name: self.name.clone(),
            id: self.id.clone(),
            number: self.number,
            device: self.device,
            access: self.access,
            status,
            allocation: self.allocation,
            size: self.size,
            current_le: self.current_le,
            allocated_le: self.allocated_le,
            stripes: self.stripes,
            stripe_size: self.stripe_size,
            read_ahead: self.read_ahead,
            open_count: self.open_count,
            creation_time: self.creation_time,
            snapshot,
            extents: if with_extents {
                Some(self.extents().stats())
            } else {
                None
            },
        }
    }
}
