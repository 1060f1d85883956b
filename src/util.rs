// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::{LockResult, PoisonError};

use uuid::Uuid;

pub fn align_to(num: u64, align_to: u64) -> u64 {
    let agn = align_to - 1;

    (num + agn) & !agn
}

/// Round `num` down to the start of its `align`-sized chunk, counting
/// chunks from `base`.
pub fn chunk_start(num: u64, base: u64, align: u64) -> u64 {
    num - ((num - base) % align)
}

pub fn make_uuid() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

// Tables are validated before they are mutated; a poisoned lock still
// guards consistent state.
pub fn unpoison<T>(res: LockResult<T>) -> T {
    res.unwrap_or_else(PoisonError::into_inner)
}
