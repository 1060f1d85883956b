// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! lvmcore is the in-memory core of an [LVM](https://www.sourceware.org/lvm2/)-style
//! volume manager: Volume Groups built from Physical Volumes, Logical
//! Volumes mapped onto their extents, copy-on-write snapshots, and the
//! remapping of block I/O through all of it.
//!
//! Placement and persistence of metadata belong to the caller; the
//! engine validates, accounts and remaps.

mod blockio;
mod command;
pub mod config;
mod device;
mod engine;
mod error;
pub mod extent;
mod lock;
mod lv;
mod pv;
mod remap;
pub mod snapshot;
mod util;
mod vg;

pub use blockio::{BlockIo, NullIo};
pub use command::{Command, Response, SnapshotUsage};
pub use config::{EngineConfig, ForeignWritePolicy};
pub use device::Device;
pub use engine::{Engine, IOP_VERSION};
pub use error::{Error, Result};
pub use extent::{PeSpec, PeStats};
pub use lock::{Caller, PeLockRange};
pub use lv::{LogicalVolume, LvAccess, LvAllocation, LvId, LvReport, LvSpec, LvStatus, SnapshotReport, SnapshotSpec};
pub use pv::{Allocatable, PhysicalVolume, PvChange, PvSpec, PvState};
pub use remap::{Direction, IoRequest, Remapped};
pub use snapshot::{CowStore, ExceptionSlot, ExceptionStore, ExceptionTable};
pub use vg::{VgReport, VgSpec, VgStatus, VolumeGroup};
