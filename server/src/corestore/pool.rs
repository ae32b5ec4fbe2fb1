/*
 * Created on Sun Mar 05 2023
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

//! The string interning pool
//!
//! A bounded cache of byte-strings with per-entry hit counters. Values
//! flowing into the keyspace are routed through [`SharedPool::intern`]
//! when sharing is enabled; repeated payloads then collapse onto one
//! heap allocation. Eviction is probabilistic: a miss against a full
//! pool decrements one random victim's counter and only replaces it
//! once that counter hits zero. Hot entries survive, cold ones drift
//! out. This never affects command semantics.

use crate::corestore::Data;
use rand::Rng;
use std::collections::HashMap;

#[derive(Debug)]
pub struct SharedPool {
    max: usize,
    entries: HashMap<Data, u32>,
}

impl SharedPool {
    pub fn new(max: usize) -> Self {
        SharedPool {
            max,
            entries: HashMap::new(),
        }
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    /// Return a shared handle for `data`: the pooled copy on a hit, the
    /// caller's own copy otherwise
    pub fn intern(&mut self, data: Data) -> Data {
        if self.max == 0 {
            return data;
        }
        if let Some((pooled, hits)) = self.entries.get_key_value(&data[..]) {
            let pooled = pooled.clone();
            let bumped = hits.saturating_add(1);
            self.entries.insert(pooled.clone(), bumped);
            return pooled;
        }
        if self.entries.len() < self.max {
            self.entries.insert(data.clone(), 0);
            return data;
        }
        // full pool: age one random victim and take its slot only once
        // its counter bottoms out
        let victim = {
            let n = rand::thread_rng().gen_range(0..self.entries.len());
            match self.entries.keys().nth(n) {
                Some(k) => k.clone(),
                None => return data,
            }
        };
        match self.entries.get_mut(&victim[..]) {
            Some(0) | None => {
                self.entries.remove(&victim[..]);
                self.entries.insert(data.clone(), 0);
            }
            Some(hits) => *hits -= 1,
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::SharedPool;
    use crate::corestore::Data;

    #[test]
    fn hits_share_the_pooled_allocation() {
        let mut pool = SharedPool::new(8);
        let first = pool.intern(Data::from("payload"));
        let second = pool.intern(Data::from("payload"));
        assert_eq!(first.get_blob().as_ptr(), second.get_blob().as_ptr());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pool_never_grows_past_its_bound() {
        let mut pool = SharedPool::new(4);
        for i in 0..64 {
            pool.intern(Data::from_string(format!("value-{i}")));
        }
        assert!(pool.len() <= 4);
    }

    #[test]
    fn zero_hit_victims_are_displaced() {
        let mut pool = SharedPool::new(1);
        pool.intern(Data::from("cold"));
        // the sole entry has never been hit, so one miss takes its slot
        pool.intern(Data::from("new"));
        let a = pool.intern(Data::from("new"));
        let b = pool.intern(Data::from("new"));
        assert_eq!(a.get_blob().as_ptr(), b.get_blob().as_ptr());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn zero_capacity_disables_interning() {
        let mut pool = SharedPool::new(0);
        pool.intern(Data::from("x"));
        assert_eq!(pool.len(), 0);
    }
}
