// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Physical Volumes

use serde::{Deserialize, Serialize};

use crate::util::make_uuid;
use crate::{Device, Error, Result};

/// Whether a PV takes part in I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PvState {
    Active,
    Inactive,
}

/// Whether new extents may be placed on a PV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Allocatable {
    Allocatable,
    NotAllocatable,
}

fn allocatable() -> Allocatable {
    Allocatable::Allocatable
}

/// What a caller supplies to attach a PV to a VG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvSpec {
    /// Name, e.g. "/dev/sdb1"
    pub name: String,
    /// Device number of the block device the PV is on
    pub device: Device,
    /// The offset in sectors of where the first extent starts
    #[serde(default)]
    pub pe_start: u64,
    /// The number of extents in the PV
    pub pe_total: u64,
    #[serde(default = "allocatable")]
    pub allocatable: Allocatable,
}

/// A partial update of a PV's flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvChange {
    #[serde(default)]
    pub allocatable: Option<Allocatable>,
    #[serde(default)]
    pub state: Option<PvState>,
}

/// A Physical Volume that is part of a Volume Group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalVolume {
    /// Name
    pub name: String,
    /// Its UUID
    pub id: String,
    /// Position within the VG, starting at 1
    pub number: usize,
    /// Device number for the block device the PV is on
    pub device: Device,
    /// The offset in sectors of where the first extent starts
    pub pe_start: u64,
    /// The number of extents in the PV
    pub pe_total: u64,
    /// The number of extents mapped by some LV
    pub pe_allocated: u64,
    pub state: PvState,
    pub allocatable: Allocatable,
}

impl PhysicalVolume {
    pub(crate) fn from_spec(spec: &PvSpec, number: usize, pe_size: u64) -> Result<PhysicalVolume> {
        if spec.name.is_empty() {
            return Err(Error::InvalidArgument("PV name is empty".into()));
        }
        // Every sector of every extent must be addressable.
        spec.pe_total
            .checked_mul(pe_size)
            .and_then(|len| len.checked_add(spec.pe_start))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "PV {}: {} extents of {} sectors from {} overflow the sector range",
                    spec.name, spec.pe_total, pe_size, spec.pe_start
                ))
            })?;

        Ok(PhysicalVolume {
            name: spec.name.clone(),
            id: make_uuid(),
            number,
            device: spec.device,
            pe_start: spec.pe_start,
            pe_total: spec.pe_total,
            pe_allocated: 0,
            state: PvState::Active,
            allocatable: spec.allocatable,
        })
    }

    /// The number of extents not mapped by any LV.
    pub fn pe_free(&self) -> u64 {
        self.pe_total - self.pe_allocated
    }

    /// Whether `addr..addr+pe_size` is an extent inside this PV's data area.
    pub fn holds_extent(&self, addr: u64, pe_size: u64) -> bool {
        addr >= self.pe_start
            && (addr - self.pe_start) % pe_size == 0
            && (addr - self.pe_start) / pe_size < self.pe_total
    }

    pub(crate) fn apply_change(&mut self, change: &PvChange) {
        if let Some(allocatable) = change.allocatable {
            self.allocatable = allocatable;
        }
        if let Some(state) = change.state {
            self.state = state;
        }
    }
}
