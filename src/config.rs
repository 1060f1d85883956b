// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Engine limits and policies

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// What to do with a write whose device differs from the LV it was
/// addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForeignWritePolicy {
    /// Fail the request.
    Reject,
    /// Remap it like any other write to the LV.
    Remap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of VG slots.
    pub max_vg: usize,
    /// Upper bound for a VG's `pv_max`.
    pub max_pv: usize,
    /// Upper bound for a VG's `lv_max`.
    pub max_lv: usize,
    /// Major number of the exposed LV block devices.
    pub blk_major: u32,
    /// Highest usable LV minor.
    pub max_minor: u32,
    /// Largest extent size a VG may use, in sectors.
    pub max_pe_size: u64,
    /// Read-ahead bounds, in sectors.
    pub min_read_ahead: u32,
    pub max_read_ahead: u32,
    /// Snapshot chunk size bounds, in sectors.
    pub snapshot_min_chunk: u32,
    pub snapshot_max_chunk: u32,
    pub foreign_device_writes: ForeignWritePolicy,
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_vg: 99,
            max_pv: 256,
            max_lv: 256,
            blk_major: 58,
            max_minor: 255,
            max_pe_size: 32 * 1024 * 1024,
            min_read_ahead: 2,
            max_read_ahead: 120,
            snapshot_min_chunk: 8,
            snapshot_max_chunk: 2048,
            foreign_device_writes: ForeignWritePolicy::Reject,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn clamp_read_ahead(&self, read_ahead: Option<u32>) -> u32 {
        read_ahead
            .unwrap_or(self.max_read_ahead)
            .max(self.min_read_ahead)
            .min(self.max_read_ahead)
    }
}
