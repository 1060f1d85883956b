// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Control-plane requests and their results.

use serde::{Deserialize, Serialize};

use crate::extent::PeSpec;
use crate::lv::{LvAccess, LvAllocation, LvId, LvReport, LvSpec, LvStatus};
use crate::pv::{PhysicalVolume, PvChange, PvSpec};
use crate::vg::{VgReport, VgSpec};
use crate::Device;

/// Everything a management client can ask of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Take the command lock until `Unlock`.
    Lock,
    Unlock,
    GetIopVersion,
    /// Force-remove every VG.
    Reset,

    VgCreate(VgSpec),
    VgRemove { vg: String },
    VgExtend { vg: String, pv: PvSpec },
    VgReduce { vg: String, pv: String },
    VgRename { vg: String, new_name: String },
    VgSetExtendable { vg: String, extendable: bool },
    VgStatus { vg: String },
    VgList,

    LvCreate { vg: String, lv: LvSpec },
    LvRemove { vg: String, lv: String },
    /// Replace the extents of the LV named in `lv` with a longer list.
    LvExtend { vg: String, lv: LvSpec },
    /// Replace the extents of the LV named in `lv` with a shorter list.
    LvReduce { vg: String, lv: LvSpec },
    LvRename { vg: String, lv: String, new_name: String },
    LvStatusByName {
        vg: String,
        lv: String,
        #[serde(default)]
        extents: bool,
    },
    LvStatusByIndex {
        vg: String,
        index: LvId,
        #[serde(default)]
        extents: bool,
    },
    LvStatusByDev {
        minor: u32,
        #[serde(default)]
        extents: bool,
    },
    LvSetAccess { vg: String, lv: String, access: LvAccess },
    LvSetStatus { vg: String, lv: String, status: LvStatus },
    LvSetAllocation { vg: String, lv: String, allocation: LvAllocation },
    /// Point the logical extent at `old` to `new` once pvmove copied it.
    LeRemap { vg: String, lv: String, old: PeSpec, new: PeSpec },
    SnapshotUsage { vg: String, lv: String },

    PvChange { vg: String, pv: String, change: PvChange },
    PvStatus { vg: String, pv: String },
    PvFlush { device: Device },

    /// Hold I/O to one physical extent of `pv` starting at `offset`.
    PeLock { vg: String, lv_minor: u32, pv: Device, offset: u64 },
    PeUnlock,
}

impl Command {
    /// Whether the command changes engine state and so runs under the
    /// command lock.
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Command::Lock
                | Command::Unlock
                | Command::GetIopVersion
                | Command::VgStatus { .. }
                | Command::VgList
                | Command::LvStatusByName { .. }
                | Command::LvStatusByIndex { .. }
                | Command::LvStatusByDev { .. }
                | Command::SnapshotUsage { .. }
                | Command::PvStatus { .. }
                | Command::PvFlush { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Lock => "lock",
            Command::Unlock => "unlock",
            Command::GetIopVersion => "get_iop_version",
            Command::Reset => "reset",
            Command::VgCreate(_) => "vg_create",
            Command::VgRemove { .. } => "vg_remove",
            Command::VgExtend { .. } => "vg_extend",
            Command::VgReduce { .. } => "vg_reduce",
            Command::VgRename { .. } => "vg_rename",
            Command::VgSetExtendable { .. } => "vg_set_extendable",
            Command::VgStatus { .. } => "vg_status",
            Command::VgList => "vg_list",
            Command::LvCreate { .. } => "lv_create",
            Command::LvRemove { .. } => "lv_remove",
            Command::LvExtend { .. } => "lv_extend",
            Command::LvReduce { .. } => "lv_reduce",
            Command::LvRename { .. } => "lv_rename",
            Command::LvStatusByName { .. } => "lv_status_by_name",
            Command::LvStatusByIndex { .. } => "lv_status_by_index",
            Command::LvStatusByDev { .. } => "lv_status_by_dev",
            Command::LvSetAccess { .. } => "lv_set_access",
            Command::LvSetStatus { .. } => "lv_set_status",
            Command::LvSetAllocation { .. } => "lv_set_allocation",
            Command::LeRemap { .. } => "le_remap",
            Command::SnapshotUsage { .. } => "snapshot_usage",
            Command::PvChange { .. } => "pv_change",
            Command::PvStatus { .. } => "pv_status",
            Command::PvFlush { .. } => "pv_flush",
            Command::PeLock { .. } => "pe_lock",
            Command::PeUnlock => "pe_unlock",
        }
    }
}

/// How full a snapshot's exception store is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotUsage {
    /// Exception slots consumed.
    pub used: usize,
    pub total: usize,
    pub percent: u32,
    /// On-disk COW table blocks backing every slot.
    pub table_blocks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Done,
    IopVersion { version: u32 },
    VgCreated { number: usize },
    Vg(VgReport),
    VgNames { names: Vec<String> },
    LvCreated { minor: u32 },
    Lv(LvReport),
    Pv(PhysicalVolume),
    SnapshotUsage(SnapshotUsage),
}
