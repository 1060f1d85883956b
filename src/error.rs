// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::collections::TryReserveError;
use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A named VG, PV or LV does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A create collided with an existing name, slot or minor.
    #[error("already exists: {0}")]
    AlreadyExists(String),
    /// A table is full, or a requested limit exceeds the configured one.
    #[error("out of capacity: {0}")]
    OutOfCapacity(String),
    /// The object is open and must be quiescent for this operation.
    #[error("busy: {0}")]
    Busy(String),
    /// The operation would break a structural invariant.
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An I/O request was refused by the remapping path.
    #[error("I/O error: {0}")]
    IoError(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Nix(#[from] nix::Error),
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Error {
        Error::OutOfMemory
    }
}
