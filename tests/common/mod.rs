// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use lvmcore::{
    Allocatable, BlockIo, Caller, Command, Device, Engine, EngineConfig, ExceptionSlot, LvReport, LvSpec, PeSpec,
    PvSpec, Response, VgReport, VgSpec,
};

pub const PE_SIZE: u64 = 4;
pub const PV0: Device = Device { major: 8, minor: 0 };
pub const PV1: Device = Device { major: 8, minor: 16 };
pub const COW: Device = Device { major: 8, minor: 32 };

pub const ME: Caller = Caller(1);

/// What the engine asked of the block layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Flush(Device),
    Invalidate(Device),
    Copy {
        src: Device,
        src_sector: u64,
        dst: Device,
        dst_sector: u64,
        sectors: u64,
    },
    TableBlock {
        snapshot: Device,
        block: u64,
        buf: Vec<u8>,
    },
}

#[derive(Debug, Default)]
pub struct RecordingIo {
    events: Mutex<Vec<Event>>,
    fail_copies: AtomicBool,
}

impl RecordingIo {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn copies(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Copy { .. }))
            .collect()
    }

    pub fn table_blocks(&self) -> Vec<(u64, Vec<u8>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::TableBlock { block, buf, .. } => Some((block, buf)),
                _ => None,
            })
            .collect()
    }

    pub fn flushed(&self, dev: Device) -> bool {
        self.events().contains(&Event::Flush(dev))
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    fn push(&self, e: Event) {
        self.events.lock().unwrap().push(e);
    }
}

impl BlockIo for RecordingIo {
    fn flush(&self, dev: Device) -> io::Result<()> {
        self.push(Event::Flush(dev));
        Ok(())
    }

    fn invalidate(&self, dev: Device) {
        self.push(Event::Invalidate(dev));
    }

    fn copy_chunk(&self, src: Device, src_sector: u64, dst: Device, dst_sector: u64, sectors: u64) -> io::Result<()> {
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "copy failed"));
        }
        self.push(Event::Copy {
            src,
            src_sector,
            dst,
            dst_sector,
            sectors,
        });
        Ok(())
    }

    fn write_table_block(&self, snapshot: Device, block: u64, buf: &[u8]) -> io::Result<()> {
        self.push(Event::TableBlock {
            snapshot,
            block,
            buf: buf.to_vec(),
        });
        Ok(())
    }
}

/// Defaults, except that snapshot chunks may be as small as one extent.
pub fn config() -> EngineConfig {
    EngineConfig {
        snapshot_min_chunk: 2,
        ..EngineConfig::default()
    }
}

pub fn engine() -> (Engine, Arc<RecordingIo>) {
    engine_with(config())
}

pub fn engine_with(config: EngineConfig) -> (Engine, Arc<RecordingIo>) {
    let io = Arc::new(RecordingIo::default());
    (Engine::new(config, io.clone()), io)
}

pub fn pv(name: &str, device: Device, pe_total: u64) -> PvSpec {
    PvSpec {
        name: name.to_string(),
        device,
        pe_start: 0,
        pe_total,
        allocatable: Allocatable::Allocatable,
    }
}

/// "vg0" in slot 0: two PVs of 32 extents, 4-sector extents.
pub fn vg_spec() -> VgSpec {
    VgSpec {
        name: "vg0".to_string(),
        number: 0,
        pe_size: PE_SIZE,
        pv_max: 4,
        lv_max: 8,
        extendable: true,
        pvs: vec![pv("/dev/sda", PV0, 32), pv("/dev/sdb", PV1, 32)],
        lvs: Vec::new(),
    }
}

/// `n` consecutive extents of `dev` starting with extent `first`.
pub fn extents(dev: Device, first: u64, n: u64) -> Vec<PeSpec> {
    (first..first + n)
        .map(|i| PeSpec {
            dev,
            addr: i * PE_SIZE,
        })
        .collect()
}

/// `n` chunk slots of `chunk` sectors on the COW device.
pub fn slots(n: u64, chunk: u64) -> Vec<ExceptionSlot> {
    slots_on(COW, n, chunk)
}

pub fn slots_on(dev: Device, n: u64, chunk: u64) -> Vec<ExceptionSlot> {
    (0..n)
        .map(|i| ExceptionSlot {
            dev,
            sector: 1024 + i * chunk,
        })
        .collect()
}

pub fn create_vg(engine: &Engine) {
    engine.apply(ME, Command::VgCreate(vg_spec())).unwrap();
}

/// Create an LV in "vg0" and return its minor.
pub fn create_lv(engine: &Engine, spec: LvSpec) -> u32 {
    match engine
        .apply(
            ME,
            Command::LvCreate {
                vg: "vg0".to_string(),
                lv: spec,
            },
        )
        .unwrap()
    {
        Response::LvCreated { minor } => minor,
        other => panic!("unexpected {:?}", other),
    }
}

pub fn vg_report(engine: &Engine) -> VgReport {
    match engine
        .apply(ME, Command::VgStatus { vg: "vg0".to_string() })
        .unwrap()
    {
        Response::Vg(report) => report,
        other => panic!("unexpected {:?}", other),
    }
}

pub fn lv_report(engine: &Engine, lv: &str) -> LvReport {
    match engine
        .apply(
            ME,
            Command::LvStatusByName {
                vg: "vg0".to_string(),
                lv: lv.to_string(),
                extents: true,
            },
        )
        .unwrap()
    {
        Response::Lv(report) => report,
        other => panic!("unexpected {:?}", other),
    }
}

pub fn remove_lv(engine: &Engine, lv: &str) -> lvmcore::Result<Response> {
    engine.apply(
        ME,
        Command::LvRemove {
            vg: "vg0".to_string(),
            lv: lv.to_string(),
        },
    )
}

/// The extent accounting of "vg0" agrees with itself.
pub fn assert_accounting(engine: &Engine) {
    let vg = vg_report(engine);
    let pv_sum: u64 = vg.pvs.iter().map(|pv| pv.pe_allocated).sum();
    assert_eq!(vg.pe_allocated, pv_sum);

    let lv_sum: u64 = vg
        .lvs
        .iter()
        .map(|name| lv_report(engine, name))
        .filter(|lv| lv.snapshot.is_none())
        .map(|lv| u64::from(lv.allocated_le))
        .sum();
    assert_eq!(vg.pe_allocated, lv_sum);
}

pub fn lv_dev(minor: u32) -> Device {
    Device::new(58, minor)
}
