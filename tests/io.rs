// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use lvmcore::{
    Command, Direction, Engine, EngineConfig, Error, ForeignWritePolicy, IoRequest, LvSpec, PeLockRange, Remapped,
};

use common::*;

fn data(engine: &Engine) -> u32 {
    create_vg(engine);
    create_lv(engine, LvSpec::linear("data", extents(PV0, 0, 4)))
}

fn req(minor: u32, sector: u64, length: u64, direction: Direction) -> IoRequest {
    IoRequest::new(lv_dev(minor), sector, length, direction)
}

fn pe_lock(engine: &Engine, minor: u32, pv: lvmcore::Device, offset: u64) -> lvmcore::Result<lvmcore::Response> {
    engine.apply(
        ME,
        Command::PeLock {
            vg: "vg0".into(),
            lv_minor: minor,
            pv,
            offset,
        },
    )
}

#[test]
fn requests_stay_inside_lv_and_extent() {
    let (engine, _io) = engine();
    let minor = data(&engine);

    assert!(engine.map(&req(minor, 15, 1, Direction::Read)).is_ok());
    assert!(matches!(
        engine.map(&req(minor, 16, 1, Direction::Read)),
        Err(Error::IoError(_))
    ));
    assert!(matches!(
        engine.map(&req(minor, 14, 4, Direction::Read)),
        Err(Error::IoError(_))
    ));
    assert!(matches!(
        engine.map(&req(minor, 2, 4, Direction::Read)),
        Err(Error::IoError(_))
    ));
    assert!(matches!(
        engine.map(&req(minor, 0, 0, Direction::Read)),
        Err(Error::IoError(_))
    ));
    assert!(matches!(
        engine.map(&req(9, 0, 1, Direction::Read)),
        Err(Error::IoError(_))
    ));

    // failed requests are not counted
    let stats = lv_report(&engine, "data").extents.unwrap();
    assert_eq!(stats.iter().map(|pe| pe.reads).sum::<u64>(), 1);
}

#[test]
fn statistics_follow_direction() {
    let (engine, _io) = engine();
    let minor = data(&engine);

    engine.map(&req(minor, 0, 1, Direction::Read)).unwrap();
    engine.map(&req(minor, 1, 1, Direction::ReadAhead)).unwrap();
    engine.map(&req(minor, 12, 4, Direction::Write)).unwrap();
    engine.map(&req(minor, 13, 1, Direction::WriteAhead)).unwrap();

    let stats = lv_report(&engine, "data").extents.unwrap();
    assert_eq!((stats[0].reads, stats[0].writes), (2, 0));
    assert_eq!((stats[3].reads, stats[3].writes), (0, 2));

    // bmap translates without counting
    assert_eq!(engine.bmap(minor, 13).unwrap(), Remapped { dev: PV0, sector: 13 });
    assert_eq!(lv_report(&engine, "data").extents.unwrap()[3].writes, 2);
    assert!(matches!(engine.bmap(minor, 16), Err(Error::IoError(_))));
}

#[test]
fn foreign_writes_are_rejected_by_default() {
    let (engine, _io) = engine();
    let minor = data(&engine);
    let foreign = req(minor, 0, 1, Direction::Write).via(PV1);

    assert!(matches!(engine.map(&foreign), Err(Error::IoError(_))));
    // reads are not affected
    let read = req(minor, 0, 1, Direction::Read).via(PV1);
    assert_eq!(engine.map(&read).unwrap(), Remapped { dev: PV0, sector: 0 });
}

#[test]
fn foreign_writes_can_be_remapped() {
    let config = EngineConfig {
        foreign_device_writes: ForeignWritePolicy::Remap,
        ..config()
    };
    let (engine, _io) = engine_with(config);
    let minor = data(&engine);

    let foreign = req(minor, 5, 1, Direction::Write).via(PV1);
    assert_eq!(engine.map(&foreign).unwrap(), Remapped { dev: PV0, sector: 5 });
}

#[test]
fn pe_lock_requests_are_checked() {
    let (engine, io) = engine();
    let minor = data(&engine);
    io.clear();

    assert!(matches!(
        pe_lock(&engine, minor, COW, 0),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(pe_lock(&engine, 77, PV0, 0), Err(Error::NotFound(_))));
    // the lock covers whole extents only
    assert!(matches!(
        pe_lock(&engine, minor, PV0, 5),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        pe_lock(&engine, minor, PV0, 32 * PE_SIZE),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(engine.pe_lock(), None);

    pe_lock(&engine, minor, PV0, 4).unwrap();
    assert!(io.flushed(lv_dev(minor)));
    assert_eq!(
        engine.pe_lock(),
        Some(PeLockRange {
            lv: lv_dev(minor),
            pv: PV0,
            offset: 4,
            length: PE_SIZE,
        })
    );
    assert!(matches!(pe_lock(&engine, minor, PV0, 8), Err(Error::Busy(_))));

    // other extents are not held up
    assert_eq!(
        engine.map(&req(minor, 9, 1, Direction::Write)).unwrap(),
        Remapped { dev: PV0, sector: 9 }
    );

    engine.apply(ME, Command::PeUnlock).unwrap();
    assert_eq!(engine.pe_lock(), None);
    // unlocking twice is harmless
    engine.apply(ME, Command::PeUnlock).unwrap();
}

#[test]
fn io_waits_for_extent_move_and_sees_new_location() {
    let (engine, _io) = engine();
    let minor = data(&engine);
    let engine = Arc::new(engine);

    pe_lock(&engine, minor, PV0, 4).unwrap();

    let e2 = Arc::clone(&engine);
    let blocked = thread::spawn(move || e2.map(&req(minor, 6, 1, Direction::Write)));

    thread::sleep(Duration::from_millis(100));
    assert!(!blocked.is_finished());

    engine
        .apply(
            ME,
            Command::LeRemap {
                vg: "vg0".into(),
                lv: "data".into(),
                old: extents(PV0, 1, 1)[0],
                new: extents(PV1, 5, 1)[0],
            },
        )
        .unwrap();
    engine.apply(ME, Command::PeUnlock).unwrap();

    let out = blocked.join().unwrap().unwrap();
    assert_eq!(out, Remapped { dev: PV1, sector: 22 });
    assert_eq!(lv_report(&engine, "data").extents.unwrap()[1].writes, 1);
}

#[test]
fn device_registry() {
    let (engine, _io) = engine();
    let minor = data(&engine);

    assert_eq!(engine.device_size(minor).unwrap(), 16);
    assert_eq!(engine.device_name(minor).unwrap(), "/dev/vg0/data");
    assert!(matches!(engine.device_size(3), Err(Error::NotFound(_))));

    remove_lv(&engine, "data").unwrap();
    assert!(matches!(engine.device_name(minor), Err(Error::NotFound(_))));
}
