// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The block I/O subsystem underneath the engine.

use std::io;

use log::trace;

use crate::Device;

/// Primitives the engine needs from whatever performs real I/O.
pub trait BlockIo: Send + Sync {
    /// Write back everything cached for `dev`.
    fn flush(&self, dev: Device) -> io::Result<()>;
    /// Drop everything cached for `dev`.
    fn invalidate(&self, dev: Device);
    /// Copy `sectors` sectors between two devices.
    fn copy_chunk(
        &self,
        src: Device,
        src_sector: u64,
        dst: Device,
        dst_sector: u64,
        sectors: u64,
    ) -> io::Result<()>;
    /// Persist block number `block` of a snapshot's exception table.
    fn write_table_block(&self, snapshot: Device, block: u64, buf: &[u8]) -> io::Result<()>;
}

/// A `BlockIo` with nothing underneath it.
#[derive(Debug, Default)]
pub struct NullIo;

impl BlockIo for NullIo {
    fn flush(&self, dev: Device) -> io::Result<()> {
        trace!("flush {}", dev);
        Ok(())
    }

    fn invalidate(&self, dev: Device) {
        trace!("invalidate {}", dev);
    }

    fn copy_chunk(
        &self,
        src: Device,
        src_sector: u64,
        dst: Device,
        dst_sector: u64,
        sectors: u64,
    ) -> io::Result<()> {
        trace!(
            "copy {} sectors {}:{} -> {}:{}",
            sectors,
            src,
            src_sector,
            dst,
            dst_sector
        );
        Ok(())
    }

    fn write_table_block(&self, snapshot: Device, block: u64, buf: &[u8]) -> io::Result<()> {
        trace!("COW table {} block {} ({} bytes)", snapshot, block, buf.len());
        Ok(())
    }
}
