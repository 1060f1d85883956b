// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The advisory command lock and the physical-extent move lock.

use std::sync::{Condvar, Mutex};

use log::debug;
use nix::unistd::gettid;
use serde::{Deserialize, Serialize};

use crate::util::unpoison;
use crate::{Device, Error, Result};

/// Identity of whoever issues commands: a thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Caller(pub i32);

impl Caller {
    pub fn current() -> Caller {
        Caller(gettid().as_raw())
    }
}

/// Serializes control-plane commands. Held by one caller at a time; a
/// caller that already holds it gets it again at once.
#[derive(Debug, Default)]
pub struct CommandLock {
    owner: Mutex<Option<Caller>>,
    released: Condvar,
}

/// Releases the command lock when dropped, if it took it.
pub struct CommandGuard<'a> {
    lock: &'a CommandLock,
    caller: Caller,
    acquired: bool,
}

impl CommandLock {
    pub fn new() -> CommandLock {
        CommandLock::default()
    }

    /// Block until `caller` holds the lock. Returns false if it already
    /// did.
    pub fn lock(&self, caller: Caller) -> bool {
        let mut owner = unpoison(self.owner.lock());
        loop {
            match *owner {
                None => {
                    *owner = Some(caller);
                    debug!("command lock taken by {:?}", caller);
                    return true;
                }
                Some(c) if c == caller => return false,
                Some(_) => owner = unpoison(self.released.wait(owner)),
            }
        }
    }

    pub fn unlock(&self, caller: Caller) -> Result<()> {
        let mut owner = unpoison(self.owner.lock());
        match *owner {
            Some(c) if c == caller => {
                *owner = None;
                debug!("command lock released by {:?}", caller);
                self.released.notify_all();
                Ok(())
            }
            Some(c) => Err(Error::Forbidden(format!(
                "command lock is held by {:?}, not {:?}",
                c, caller
            ))),
            None => Ok(()),
        }
    }

    /// Hold the lock for the lifetime of the returned guard.
    pub fn scoped(&self, caller: Caller) -> CommandGuard<'_> {
        let acquired = self.lock(caller);
        CommandGuard {
            lock: self,
            caller,
            acquired,
        }
    }

    pub fn holder(&self) -> Option<Caller> {
        *unpoison(self.owner.lock())
    }
}

impl<'a> Drop for CommandGuard<'a> {
    fn drop(&mut self) {
        if self.acquired {
            let _ = self.lock.unlock(self.caller);
        }
    }
}

/// A physical extent being moved: I/O landing in
/// `offset..offset + length` of `pv` waits until it is unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeLockRange {
    /// The LV whose extent is moving.
    pub lv: Device,
    pub pv: Device,
    pub offset: u64,
    pub length: u64,
}

impl PeLockRange {
    pub fn covers(&self, dev: Device, sector: u64) -> bool {
        dev == self.pv && sector >= self.offset && sector < self.offset + self.length
    }
}

#[derive(Debug, Default)]
pub struct PeLock {
    range: Mutex<Option<PeLockRange>>,
    cleared: Condvar,
}

impl PeLock {
    pub fn new() -> PeLock {
        PeLock::default()
    }

    pub fn current(&self) -> Option<PeLockRange> {
        *unpoison(self.range.lock())
    }

    pub(crate) fn set(&self, range: PeLockRange) -> Result<()> {
        let mut cur = unpoison(self.range.lock());
        if let Some(held) = *cur {
            return Err(Error::Busy(format!(
                "extent {} sector {} is already locked",
                held.pv, held.offset
            )));
        }
        *cur = Some(range);
        Ok(())
    }

    pub(crate) fn clear(&self) {
        *unpoison(self.range.lock()) = None;
        self.cleared.notify_all();
    }

    pub fn blocks(&self, dev: Device, sector: u64) -> bool {
        self.current().map_or(false, |r| r.covers(dev, sector))
    }

    /// Sleep until no lock covers `dev`/`sector`.
    pub fn wait(&self, dev: Device, sector: u64) {
        let mut cur = unpoison(self.range.lock());
        while cur.map_or(false, |r| r.covers(dev, sector)) {
            cur = unpoison(self.cleared.wait(cur));
        }
    }
}
