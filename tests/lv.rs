// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

mod common;

use pretty_assertions::assert_eq;

use lvmcore::{
    Allocatable, Command, Direction, Error, IoRequest, LvAccess, LvAllocation, LvSpec, LvStatus, PeSpec, PvChange,
    Response,
};

use common::*;

fn vg0() -> (lvmcore::Engine, std::sync::Arc<RecordingIo>) {
    let (engine, io) = engine();
    create_vg(&engine);
    (engine, io)
}

fn extend(engine: &lvmcore::Engine, spec: LvSpec) -> lvmcore::Result<Response> {
    engine.apply(
        ME,
        Command::LvExtend {
            vg: "vg0".into(),
            lv: spec,
        },
    )
}

fn reduce(engine: &lvmcore::Engine, spec: LvSpec) -> lvmcore::Result<Response> {
    engine.apply(
        ME,
        Command::LvReduce {
            vg: "vg0".into(),
            lv: spec,
        },
    )
}

#[test]
fn status_reflects_create_request() {
    let (engine, _io) = vg0();
    let mut spec = LvSpec::linear("home", extents(PV1, 4, 3));
    spec.minor = Some(7);
    spec.read_ahead = Some(64);
    spec.allocation = LvAllocation::CONTIGUOUS;
    spec.access = LvAccess::READ;

    assert_eq!(create_lv(&engine, spec.clone()), 7);

    let lv = lv_report(&engine, "home");
    assert_eq!(lv.name, spec.name);
    assert_eq!(lv.device, lv_dev(7));
    assert_eq!(lv.access, spec.access);
    assert_eq!(lv.status, LvStatus::ACTIVE);
    assert_eq!(lv.allocation, spec.allocation);
    assert_eq!(lv.stripes, 1);
    assert_eq!(lv.read_ahead, 64);
    assert_eq!(lv.open_count, 0);
    assert!(lv.snapshot.is_none());

    let placed: Vec<PeSpec> = lv
        .extents
        .unwrap()
        .iter()
        .map(|pe| PeSpec {
            dev: pe.dev,
            addr: pe.addr,
        })
        .collect();
    assert_eq!(placed, spec.extents);

    assert_eq!(engine.device_name(7).unwrap(), "/dev/vg0/home");
    assert_eq!(engine.read_ahead(7).unwrap(), 64);
}

#[test]
fn minors_and_read_ahead_default() {
    let (engine, _io) = vg0();
    let mut big = LvSpec::linear("b", extents(PV0, 1, 1));
    big.read_ahead = Some(100_000);

    assert_eq!(create_lv(&engine, LvSpec::linear("a", extents(PV0, 0, 1))), 0);
    assert_eq!(create_lv(&engine, big), 1);
    assert_eq!(engine.read_ahead(0).unwrap(), 120);
    assert_eq!(engine.read_ahead(1).unwrap(), 120);

    let mut taken = LvSpec::linear("c", extents(PV0, 2, 1));
    taken.minor = Some(1);
    match engine.apply(
        ME,
        Command::LvCreate {
            vg: "vg0".into(),
            lv: taken,
        },
    ) {
        Err(Error::AlreadyExists(_)) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn remove_twice_is_not_found_twice() {
    let (engine, _io) = vg0();
    create_lv(&engine, LvSpec::linear("tmp", extents(PV0, 0, 2)));
    remove_lv(&engine, "tmp").unwrap();
    let before = vg_report(&engine);

    for _ in 0..2 {
        match remove_lv(&engine, "tmp") {
            Err(Error::NotFound(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(vg_report(&engine), before);
}

#[test]
fn create_rejects_conflicts() {
    let (engine, _io) = vg0();
    create_lv(&engine, LvSpec::linear("data", extents(PV0, 0, 4)));

    let dup = engine.apply(
        ME,
        Command::LvCreate {
            vg: "vg0".into(),
            lv: LvSpec::linear("data", extents(PV0, 8, 1)),
        },
    );
    assert!(matches!(dup, Err(Error::AlreadyExists(_))));

    let overlap = engine.apply(
        ME,
        Command::LvCreate {
            vg: "vg0".into(),
            lv: LvSpec::linear("other", extents(PV0, 3, 2)),
        },
    );
    assert!(matches!(overlap, Err(Error::Forbidden(_))));

    let too_big = engine.apply(
        ME,
        Command::LvCreate {
            vg: "vg0".into(),
            lv: LvSpec::linear("other", extents(PV0, 30, 4)),
        },
    );
    assert!(matches!(too_big, Err(Error::InvalidArgument(_))));

    let mut bad_access = LvSpec::linear("other", extents(PV0, 8, 1));
    bad_access.access |= LvAccess::SNAPSHOT_ORG;
    let res = engine.apply(
        ME,
        Command::LvCreate {
            vg: "vg0".into(),
            lv: bad_access,
        },
    );
    assert!(matches!(res, Err(Error::InvalidArgument(_))));

    let missing = engine.apply(
        ME,
        Command::LvCreate {
            vg: "nope".into(),
            lv: LvSpec::linear("other", extents(PV0, 8, 1)),
        },
    );
    assert!(matches!(missing, Err(Error::NotFound(_))));

    assert_eq!(vg_report(&engine).lv_cur, 1);
    assert_accounting(&engine);
}

#[test]
fn lv_slots_run_out() {
    let (engine, _io) = vg0();
    for i in 0..8 {
        create_lv(&engine, LvSpec::linear(&format!("lv{}", i), extents(PV0, i, 1)));
    }

    let res = engine.apply(
        ME,
        Command::LvCreate {
            vg: "vg0".into(),
            lv: LvSpec::linear("lv8", extents(PV0, 8, 1)),
        },
    );
    assert!(matches!(res, Err(Error::OutOfCapacity(_))));

    // a freed slot is reused
    remove_lv(&engine, "lv3").unwrap();
    create_lv(&engine, LvSpec::linear("lv8", extents(PV0, 8, 1)));
    assert_eq!(lv_report(&engine, "lv8").number, 3);
}

#[test]
fn open_lv_cannot_change() {
    let (engine, _io) = vg0();
    let minor = create_lv(&engine, LvSpec::linear("data", extents(PV0, 0, 4)));
    engine.open(minor, true).unwrap();
    assert_eq!(vg_report(&engine).lv_open, 1);

    assert!(matches!(remove_lv(&engine, "data"), Err(Error::Busy(_))));
    assert!(matches!(
        extend(&engine, LvSpec::linear("data", extents(PV0, 0, 6))),
        Err(Error::Busy(_))
    ));
    assert!(matches!(
        reduce(&engine, LvSpec::linear("data", extents(PV0, 0, 2))),
        Err(Error::Busy(_))
    ));
    let deactivate = engine.apply(
        ME,
        Command::LvSetStatus {
            vg: "vg0".into(),
            lv: "data".into(),
            status: LvStatus::empty(),
        },
    );
    assert!(matches!(deactivate, Err(Error::Busy(_))));

    engine.close(minor).unwrap();
    assert!(matches!(engine.close(minor), Err(Error::InvalidArgument(_))));
    assert_eq!(vg_report(&engine).lv_open, 0);
    reduce(&engine, LvSpec::linear("data", extents(PV0, 0, 2))).unwrap();
    assert_eq!(lv_report(&engine, "data").size, 8);
    remove_lv(&engine, "data").unwrap();
    assert_accounting(&engine);
}

#[test]
fn open_checks_access_and_state() {
    let (engine, _io) = vg0();
    let mut ro = LvSpec::linear("ro", extents(PV0, 0, 1));
    ro.access = LvAccess::READ;
    let minor = create_lv(&engine, ro);

    assert!(matches!(engine.open(minor, true), Err(Error::Forbidden(_))));
    engine.open(minor, false).unwrap();
    engine.close(minor).unwrap();

    engine
        .apply(
            ME,
            Command::LvSetStatus {
                vg: "vg0".into(),
                lv: "ro".into(),
                status: LvStatus::empty(),
            },
        )
        .unwrap();
    assert!(matches!(engine.open(minor, false), Err(Error::Forbidden(_))));
    assert!(matches!(
        engine.map(&IoRequest::new(lv_dev(minor), 0, 1, Direction::Read)),
        Err(Error::IoError(_))
    ));
    assert!(matches!(engine.open(42, false), Err(Error::NotFound(_))));
}

#[test]
fn resize_direction_and_stripes_are_checked() {
    let (engine, _io) = vg0();
    create_lv(&engine, LvSpec::linear("data", extents(PV0, 0, 4)));

    assert!(matches!(
        extend(&engine, LvSpec::linear("data", extents(PV0, 0, 2))),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        reduce(&engine, LvSpec::linear("data", extents(PV0, 0, 6))),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        reduce(&engine, LvSpec::linear("data", Vec::new())),
        Err(Error::InvalidArgument(_))
    ));

    let mut striped = LvSpec::linear("data", extents(PV0, 0, 4));
    striped.stripes = 2;
    striped.stripe_size = 2;
    assert!(matches!(extend(&engine, striped), Err(Error::InvalidArgument(_))));

    // extending onto extents of PV1 and dropping some of PV0 in one go
    let mut moved = extents(PV0, 0, 2);
    moved.extend(extents(PV1, 0, 3));
    extend(&engine, LvSpec::linear("data", moved)).unwrap();
    let vg = vg_report(&engine);
    assert_eq!(vg.pvs[0].pe_allocated, 2);
    assert_eq!(vg.pvs[1].pe_allocated, 3);
    assert_accounting(&engine);
}

#[test]
fn striped_lv_keeps_per_stripe_statistics() {
    let (engine, _io) = vg0();
    let mut spec = LvSpec::linear("stripe", extents(PV0, 0, 2));
    spec.extents.extend(extents(PV1, 0, 2));
    spec.stripes = 2;
    spec.stripe_size = 2;
    let minor = create_lv(&engine, spec);
    assert_eq!(lv_report(&engine, "stripe").size, 16);

    // stripe chunk 1 of the first row lives on PV1
    let out = engine
        .map(&IoRequest::new(lv_dev(minor), 3, 1, Direction::Read))
        .unwrap();
    assert_eq!((out.dev, out.sector), (PV1, 1));
    // second row, first stripe
    let out = engine
        .map(&IoRequest::new(lv_dev(minor), 8, 2, Direction::Write))
        .unwrap();
    assert_eq!((out.dev, out.sector), (PV0, 4));

    let mut grown = LvSpec::linear("stripe", extents(PV0, 0, 3));
    grown.extents.extend(extents(PV1, 0, 3));
    grown.stripes = 2;
    grown.stripe_size = 2;
    extend(&engine, grown).unwrap();

    let stats = lv_report(&engine, "stripe").extents.unwrap();
    let counts: Vec<(u64, u64)> = stats.iter().map(|pe| (pe.reads, pe.writes)).collect();
    assert_eq!(counts, vec![(0, 0), (0, 1), (0, 0), (1, 0), (0, 0), (0, 0)]);
    assert_accounting(&engine);
}

#[test]
fn rename_and_lookup_by_index_and_dev() {
    let (engine, _io) = vg0();
    let minor = create_lv(&engine, LvSpec::linear("old", extents(PV0, 0, 1)));
    create_lv(&engine, LvSpec::linear("other", extents(PV0, 1, 1)));

    let clash = engine.apply(
        ME,
        Command::LvRename {
            vg: "vg0".into(),
            lv: "old".into(),
            new_name: "other".into(),
        },
    );
    assert!(matches!(clash, Err(Error::AlreadyExists(_))));

    engine
        .apply(
            ME,
            Command::LvRename {
                vg: "vg0".into(),
                lv: "old".into(),
                new_name: "new".into(),
            },
        )
        .unwrap();
    assert_eq!(engine.device_name(minor).unwrap(), "/dev/vg0/new");

    match engine.apply(
        ME,
        Command::LvStatusByIndex {
            vg: "vg0".into(),
            index: 0,
            extents: false,
        },
    ) {
        Ok(Response::Lv(lv)) => {
            assert_eq!(lv.name, "new");
            assert!(lv.extents.is_none());
        }
        other => panic!("unexpected {:?}", other),
    }
    match engine.apply(ME, Command::LvStatusByDev { minor, extents: false }) {
        Ok(Response::Lv(lv)) => assert_eq!(lv.name, "new"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        engine.apply(
            ME,
            Command::LvStatusByIndex {
                vg: "vg0".into(),
                index: 5,
                extents: false,
            }
        ),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn access_changes_are_limited_to_read_write() {
    let (engine, _io) = vg0();
    let minor = create_lv(&engine, LvSpec::linear("data", extents(PV0, 0, 1)));

    let res = engine.apply(
        ME,
        Command::LvSetAccess {
            vg: "vg0".into(),
            lv: "data".into(),
            access: LvAccess::READ | LvAccess::SNAPSHOT,
        },
    );
    assert!(matches!(res, Err(Error::Forbidden(_))));

    engine
        .apply(
            ME,
            Command::LvSetAccess {
                vg: "vg0".into(),
                lv: "data".into(),
                access: LvAccess::READ,
            },
        )
        .unwrap();
    assert!(matches!(
        engine.map(&IoRequest::new(lv_dev(minor), 0, 1, Direction::Write)),
        Err(Error::IoError(_))
    ));
    engine
        .map(&IoRequest::new(lv_dev(minor), 0, 1, Direction::Read))
        .unwrap();

    engine
        .apply(
            ME,
            Command::LvSetAllocation {
                vg: "vg0".into(),
                lv: "data".into(),
                allocation: LvAllocation::STRICT,
            },
        )
        .unwrap();
    assert_eq!(lv_report(&engine, "data").allocation, LvAllocation::STRICT);
}

#[test]
fn unallocatable_pv_takes_no_new_extents() {
    let (engine, _io) = vg0();
    create_lv(&engine, LvSpec::linear("data", extents(PV1, 0, 2)));

    let res = engine
        .apply(
            ME,
            Command::PvChange {
                vg: "vg0".into(),
                pv: "/dev/sdb".into(),
                change: PvChange {
                    allocatable: Some(Allocatable::NotAllocatable),
                    state: None,
                },
            },
        )
        .unwrap();
    match res {
        Response::Pv(pv) => assert_eq!(pv.allocatable, Allocatable::NotAllocatable),
        other => panic!("unexpected {:?}", other),
    }

    let res = engine.apply(
        ME,
        Command::LvCreate {
            vg: "vg0".into(),
            lv: LvSpec::linear("more", extents(PV1, 4, 1)),
        },
    );
    assert!(matches!(res, Err(Error::Forbidden(_))));

    // existing extents may stay where they are
    reduce(&engine, LvSpec::linear("data", extents(PV1, 0, 1))).unwrap();
    assert_accounting(&engine);
}

#[test]
fn le_remap_moves_accounting() {
    let (engine, io, minor) = {
        let (engine, io) = vg0();
        let minor = create_lv(&engine, LvSpec::linear("data", extents(PV0, 0, 3)));
        (engine, io, minor)
    };
    engine
        .map(&IoRequest::new(lv_dev(minor), 5, 1, Direction::Write))
        .unwrap();
    io.clear();

    engine
        .apply(
            ME,
            Command::LeRemap {
                vg: "vg0".into(),
                lv: "data".into(),
                old: extents(PV0, 1, 1)[0],
                new: extents(PV1, 7, 1)[0],
            },
        )
        .unwrap();

    let stats = lv_report(&engine, "data").extents.unwrap();
    assert_eq!((stats[1].dev, stats[1].addr, stats[1].writes), (PV1, 28, 1));
    let vg = vg_report(&engine);
    assert_eq!(vg.pvs[0].pe_allocated, 2);
    assert_eq!(vg.pvs[1].pe_allocated, 1);
    assert_accounting(&engine);

    let out = engine
        .map(&IoRequest::new(lv_dev(minor), 5, 1, Direction::Read))
        .unwrap();
    assert_eq!((out.dev, out.sector), (PV1, 29));
    assert!(io.events().contains(&Event::Invalidate(lv_dev(minor))));

    let gone = engine.apply(
        ME,
        Command::LeRemap {
            vg: "vg0".into(),
            lv: "data".into(),
            old: extents(PV0, 1, 1)[0],
            new: extents(PV1, 8, 1)[0],
        },
    );
    assert!(matches!(gone, Err(Error::NotFound(_))));
}
