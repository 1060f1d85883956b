// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Block device numbers

use std::fmt;
use std::str::FromStr;

use nix::sys::stat;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A major/minor pair identifying a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Device {
    /// Device major number
    pub major: u32,
    /// Device minor number
    pub minor: u32,
}

impl Device {
    pub fn new(major: u32, minor: u32) -> Device {
        Device { major, minor }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

impl FromStr for Device {
    type Err = Error;

    fn from_str(s: &str) -> Result<Device> {
        let err = || Error::InvalidArgument(format!("'{}' is not a major:minor pair", s));

        let mut spl = s.split(':');
        let major = spl.next().and_then(|x| x.parse::<u32>().ok()).ok_or_else(err)?;
        let minor = spl.next().and_then(|x| x.parse::<u32>().ok()).ok_or_else(err)?;
        if spl.next().is_some() {
            return Err(err());
        }

        Ok(Device { major, minor })
    }
}

impl From<u64> for Device {
    fn from(val: u64) -> Device {
        let dev = val as libc::dev_t;
        Device {
            major: stat::major(dev) as u32,
            minor: stat::minor(dev) as u32,
        }
    }
}

impl From<Device> for u64 {
    fn from(dev: Device) -> u64 {
        stat::makedev(u64::from(dev.major), u64::from(dev.minor)) as u64
    }
}
