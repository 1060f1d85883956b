// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Snapshot exception tables and the copy-on-write store.
//!
//! A snapshot is created with a list of free chunk-sized slots on its
//! COW storage. The first write to an origin chunk copies the chunk into
//! the next free slot and records an exception; reads of the snapshot
//! are then redirected to the copy. Exceptions are keyed by the origin's
//! physical device and the chunk's first sector, with chunks counted
//! from the start of the extent so that a chunk never spans two extents.

use std::collections::HashMap;
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::blockio::BlockIo;
use crate::extent::PeSpec;
use crate::lv::LogicalVolume;
use crate::util::{align_to, chunk_start};
use crate::{Device, Error, Result};

pub const SECTOR_SIZE: usize = 512;
const ENTRY_SIZE: usize = 32;
/// Exceptions per on-disk COW table block.
pub const ENTRIES_PER_BLOCK: usize = SECTOR_SIZE / ENTRY_SIZE;

/// A free chunk of COW storage handed to a snapshot at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionSlot {
    pub dev: Device,
    pub sector: u64,
}

/// An origin chunk and where its preserved copy lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exception {
    pub org_dev: Device,
    pub org_sector: u64,
    pub new_dev: Device,
    pub new_sector: u64,
}

#[derive(Debug)]
pub struct ExceptionTable {
    slots: Vec<ExceptionSlot>,
    // exceptions[i] occupies slots[i]
    exceptions: Vec<Exception>,
    index: HashMap<(Device, u64), usize>,
    chunk_size: u64,
}

impl ExceptionTable {
    pub fn new(slots: Vec<ExceptionSlot>, chunk_size: u64) -> ExceptionTable {
        ExceptionTable {
            slots,
            exceptions: Vec::new(),
            index: HashMap::new(),
            chunk_size,
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of exception slots the snapshot was given.
    pub fn remap_end(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in use.
    pub fn remap_ptr(&self) -> usize {
        self.exceptions.len()
    }

    pub fn is_full(&self) -> bool {
        self.remap_ptr() >= self.remap_end()
    }

    pub fn exceptions(&self) -> &[Exception] {
        &self.exceptions
    }

    /// Whether any COW slot lives on `dev`.
    pub fn uses_device(&self, dev: Device) -> bool {
        self.slots.iter().any(|s| s.dev == dev)
    }

    pub fn lookup(&self, dev: Device, chunk: u64) -> Option<&Exception> {
        self.index.get(&(dev, chunk)).map(|&i| &self.exceptions[i])
    }

    fn reset(&mut self) -> Result<()> {
        self.exceptions.clear();
        self.index.clear();
        self.exceptions.try_reserve_exact(self.slots.len())?;
        self.index.try_reserve(self.slots.len())?;
        Ok(())
    }

    fn clear(&mut self) {
        self.slots = Vec::new();
        self.exceptions = Vec::new();
        self.index = HashMap::new();
    }

    // Callers check is_full() first.
    fn push(&mut self, org_dev: Device, org_sector: u64) -> Option<usize> {
        let slot = *self.slots.get(self.exceptions.len())?;
        let idx = self.exceptions.len();
        self.exceptions.push(Exception {
            org_dev,
            org_sector,
            new_dev: slot.dev,
            new_sector: slot.sector,
        });
        self.index.insert((org_dev, org_sector), idx);
        Some(idx)
    }

    /// Re-key the exceptions of the `len` sectors starting at `from` to
    /// the same offsets from `to`. Returns the table blocks that changed.
    fn relocate(&mut self, from: PeSpec, to: PeSpec, len: u64) -> Vec<usize> {
        let mut blocks = Vec::new();
        for (i, e) in self.exceptions.iter_mut().enumerate() {
            if e.org_dev != from.dev || e.org_sector < from.addr || e.org_sector - from.addr >= len {
                continue;
            }
            self.index.remove(&(e.org_dev, e.org_sector));
            e.org_dev = to.dev;
            e.org_sector = to.addr + (e.org_sector - from.addr);
            self.index.insert((e.org_dev, e.org_sector), i);

            let block = i / ENTRIES_PER_BLOCK;
            if blocks.last() != Some(&block) {
                blocks.push(block);
            }
        }
        blocks
    }

    /// Number of on-disk table blocks needed for every slot.
    pub fn table_blocks(&self) -> usize {
        align_to(self.remap_end() as u64, ENTRIES_PER_BLOCK as u64) as usize / ENTRIES_PER_BLOCK
    }

    /// The on-disk image of COW table block `block`: up to 16 entries of
    /// four little-endian u64s (origin dev_t, origin sector, COW dev_t,
    /// COW sector); unused entries are zero.
    pub fn encode_block(&self, block: usize) -> Vec<u8> {
        let mut buf = vec![0u8; SECTOR_SIZE];
        let first = block * ENTRIES_PER_BLOCK;

        for (i, e) in self
            .exceptions
            .iter()
            .skip(first)
            .take(ENTRIES_PER_BLOCK)
            .enumerate()
        {
            let ent = &mut buf[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE];
            LittleEndian::write_u64(&mut ent[0..8], e.org_dev.into());
            LittleEndian::write_u64(&mut ent[8..16], e.org_sector);
            LittleEndian::write_u64(&mut ent[16..24], e.new_dev.into());
            LittleEndian::write_u64(&mut ent[24..32], e.new_sector);
        }

        buf
    }
}

/// Parse one COW table block, stopping at the first empty entry.
pub fn decode_block(buf: &[u8]) -> Vec<Exception> {
    buf.chunks_exact(ENTRY_SIZE)
        .take_while(|ent| ent.iter().any(|&b| b != 0))
        .map(|ent| Exception {
            org_dev: Device::from(LittleEndian::read_u64(&ent[0..8])),
            org_sector: LittleEndian::read_u64(&ent[8..16]),
            new_dev: Device::from(LittleEndian::read_u64(&ent[16..24])),
            new_sector: LittleEndian::read_u64(&ent[24..32]),
        })
        .collect()
}

/// The snapshot exception-store subsystem.
pub trait ExceptionStore: Send + Sync {
    /// Prepare `table` for a new snapshot `lv`.
    fn alloc(&self, lv: &LogicalVolume, table: &mut ExceptionTable) -> Result<()>;
    /// Drop every exception of `lv`.
    fn release(&self, lv: &LogicalVolume, table: &mut ExceptionTable);
    /// Redirect `dev`/`sector` to the preserved copy, if there is one.
    fn remap_block(
        &self,
        dev: &mut Device,
        sector: &mut u64,
        pe_start: u64,
        table: &ExceptionTable,
    ) -> bool;
    /// Preserve the origin chunk holding `org_sector` before it is
    /// overwritten. `virt_sector` is the LV-relative sector of the write.
    fn copy_on_write(
        &self,
        org_dev: Device,
        org_sector: u64,
        pe_start: u64,
        virt_sector: u64,
        lv: &LogicalVolume,
        table: &mut ExceptionTable,
    ) -> Result<()>;
    /// The origin extent at `from` has moved to `to`; its preserved
    /// chunks must be found at the new location.
    fn relocate(
        &self,
        lv: &LogicalVolume,
        from: PeSpec,
        to: PeSpec,
        pe_size: u64,
        table: &mut ExceptionTable,
    ) -> Result<()>;
}

/// Exception store copying chunks through a `BlockIo`.
pub struct CowStore {
    io: Arc<dyn BlockIo>,
}

impl CowStore {
    pub fn new(io: Arc<dyn BlockIo>) -> CowStore {
        CowStore { io }
    }
}

impl ExceptionStore for CowStore {
    fn alloc(&self, lv: &LogicalVolume, table: &mut ExceptionTable) -> Result<()> {
        table.reset()?;
        debug!(
            "snapshot {}: {} exception slots of {} sectors",
            lv.name,
            table.remap_end(),
            table.chunk_size()
        );
        Ok(())
    }

    fn release(&self, lv: &LogicalVolume, table: &mut ExceptionTable) {
        debug!(
            "snapshot {}: releasing {} exceptions",
            lv.name,
            table.remap_ptr()
        );
        table.clear();
    }

    fn remap_block(
        &self,
        dev: &mut Device,
        sector: &mut u64,
        pe_start: u64,
        table: &ExceptionTable,
    ) -> bool {
        if table.chunk_size() == 0 {
            return false;
        }
        let chunk = chunk_start(*sector, pe_start, table.chunk_size());

        match table.lookup(*dev, chunk) {
            Some(e) => {
                *sector = e.new_sector + (*sector - chunk);
                *dev = e.new_dev;
                true
            }
            None => false,
        }
    }

    fn copy_on_write(
        &self,
        org_dev: Device,
        org_sector: u64,
        pe_start: u64,
        virt_sector: u64,
        lv: &LogicalVolume,
        table: &mut ExceptionTable,
    ) -> Result<()> {
        let chunk_size = table.chunk_size();
        let chunk = chunk_start(org_sector, pe_start, chunk_size);

        if table.lookup(org_dev, chunk).is_some() {
            return Ok(());
        }
        if table.is_full() {
            warn!("snapshot {} is full", lv.name);
            return Err(Error::OutOfCapacity(format!("snapshot {} is full", lv.name)));
        }

        let slot = table.slots[table.remap_ptr()];
        self.io
            .copy_chunk(org_dev, chunk, slot.dev, slot.sector, chunk_size)?;

        let idx = table
            .push(org_dev, chunk)
            .ok_or_else(|| Error::OutOfCapacity(format!("snapshot {} is full", lv.name)))?;
        let block = idx / ENTRIES_PER_BLOCK;
        self.io
            .write_table_block(lv.device, block as u64, &table.encode_block(block))?;

        debug!(
            "snapshot {}: sector {} ({}:{}) preserved at {}:{}",
            lv.name, virt_sector, org_dev, chunk, slot.dev, slot.sector
        );
        Ok(())
    }

    fn relocate(
        &self,
        lv: &LogicalVolume,
        from: PeSpec,
        to: PeSpec,
        pe_size: u64,
        table: &mut ExceptionTable,
    ) -> Result<()> {
        let blocks = table.relocate(from, to, pe_size);
        for &block in &blocks {
            self.io
                .write_table_block(lv.device, block as u64, &table.encode_block(block))?;
        }
        debug!(
            "snapshot {}: exceptions of {}:{} now at {}:{}, {} table blocks rewritten",
            lv.name,
            from.dev,
            from.addr,
            to.dev,
            to.addr,
            blocks.len()
        );
        Ok(())
    }
}
