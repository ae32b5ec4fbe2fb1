/*
 * Created on Thu Mar 02 2023
 *
 * This file is a part of Rubra
 * Rubra is a free and open-source Redis-compatible in-memory data store
 * written by the Rubra developers with the vision to provide a fast,
 * predictable and easy to operate key/value service.
 *
 * Copyright (c) 2023, the Rubra developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

//! Process-wide allocator accounting
//!
//! The `maxmemory` gate and the INFO `used_memory` field both read the
//! allocator's own view of how much heap is live. With jemalloc as the
//! global allocator this is a single `stats.allocated` read; the epoch
//! must be advanced first or jemalloc serves a stale snapshot.

#[cfg(all(not(target_env = "msvc"), not(miri)))]
/// Bytes of heap currently allocated by this process
pub fn used_memory() -> usize {
    if jemalloc_ctl::epoch::advance().is_err() {
        return 0;
    }
    jemalloc_ctl::stats::allocated::read().unwrap_or(0)
}

#[cfg(any(target_env = "msvc", miri))]
/// Allocator statistics are unavailable on this target; the `maxmemory`
/// gate is effectively disabled
pub fn used_memory() -> usize {
    0
}
