/*
 * Created on Sat Mar 04 2023
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

//! A single logical database: the main key→value map plus the auxiliary
//! key→deadline map. Invariant: every key in `expires` is also in `main`.

use crate::corestore::{Data, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use std::collections::HashMap;

/// How many random volatile keys one maintenance pass inspects per database
pub const EXPIRE_LOOKUPS_PER_CRON: usize = 100;
/// Don't bother shrinking tables smaller than this
const SHRINK_MIN_SLOTS: usize = 64;

#[derive(Debug, Default)]
pub struct Keyspace {
    main: HashMap<Data, Value>,
    expires: HashMap<Data, u64>,
}

/// One database behind its own lock. Commands take the write guard for the
/// duration of their keyspace mutation only; replies are assembled after
/// the guard is dropped.
#[derive(Debug, Default)]
pub struct Db {
    inner: RwLock<Keyspace>,
}

impl Db {
    pub fn new() -> Self {
        Db::default()
    }
    pub fn write(&self) -> RwLockWriteGuard<'_, Keyspace> {
        self.inner.write()
    }
    pub fn read(&self) -> RwLockReadGuard<'_, Keyspace> {
        self.inner.read()
    }
    pub fn len(&self) -> usize {
        self.inner.read().main.len()
    }
    pub fn expires_len(&self) -> usize {
        self.inner.read().expires.len()
    }
    pub fn capacity(&self) -> usize {
        self.inner.read().main.capacity()
    }
}

fn sample<'a, V>(map: &'a HashMap<Data, V>) -> Option<&'a Data> {
    if map.is_empty() {
        return None;
    }
    let n = rand::thread_rng().gen_range(0..map.len());
    map.keys().nth(n)
}

impl Keyspace {
    /// If the key carries a deadline that has passed, delete it from both
    /// maps. Returns true if the key was reaped.
    pub fn expire_if_needed(&mut self, key: &[u8], now: u64) -> bool {
        match self.expires.get(key) {
            Some(&when) if when <= now => {
                self.expires.remove(key);
                self.main.remove(key);
                true
            }
            _ => false,
        }
    }
    /// Clear any deadline on the key before the caller mutates it
    pub fn delete_if_volatile(&mut self, key: &[u8]) {
        self.remove_expire(key);
    }
    /// Read lookup: reaps the key first if its deadline has passed
    pub fn lookup_read(&mut self, key: &[u8], now: u64) -> Option<&Value> {
        self.expire_if_needed(key, now);
        self.main.get(key)
    }
    /// Write lookup: the caller is about to mutate, so the deadline is
    /// dropped up front
    pub fn lookup_write(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.delete_if_volatile(key);
        self.main.get_mut(key)
    }
    /// Insert or replace. Any deadline on an existing key is dropped.
    pub fn put(&mut self, key: Data, val: Value) {
        self.expires.remove(&key[..]);
        self.main.insert(key, val);
    }
    pub fn contains(&self, key: &[u8]) -> bool {
        self.main.contains_key(key)
    }
    /// Remove a key from both maps. Returns true if it existed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key);
        self.main.remove(key).is_some()
    }
    /// Attach a deadline. Fails if the key is absent or already volatile.
    pub fn set_expire(&mut self, key: &[u8], when: u64) -> bool {
        if self.expires.contains_key(key) {
            return false;
        }
        match self.main.get_key_value(key) {
            // share the stored key bytes instead of copying them
            Some((k, _)) => {
                let k = k.clone();
                self.expires.insert(k, when);
                true
            }
            None => false,
        }
    }
    pub fn remove_expire(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key).is_some()
    }
    pub fn get_expire(&self, key: &[u8]) -> Option<u64> {
        self.expires.get(key).copied()
    }
    /// Sample a random live key, reaping any expired keys hit on the way
    pub fn random_key(&mut self, now: u64) -> Option<Data> {
        loop {
            let key = sample(&self.main)?.clone();
            if !self.expire_if_needed(&key, now) {
                return Some(key);
            }
        }
    }
    pub fn len(&self) -> usize {
        self.main.len()
    }
    pub fn expires_len(&self) -> usize {
        self.expires.len()
    }
    /// Drop everything. Returns the number of keys removed.
    pub fn clear(&mut self) -> usize {
        let n = self.main.len();
        self.main.clear();
        self.expires.clear();
        n
    }
    pub fn iter(&self) -> impl Iterator<Item = (&Data, &Value)> {
        self.main.iter()
    }
    /// A copy of both maps. Payload bytes are shared, so this costs the
    /// key count, not the data volume.
    pub fn clone_maps(&self) -> (HashMap<Data, Value>, HashMap<Data, u64>) {
        (self.main.clone(), self.expires.clone())
    }
    /// Swap in freshly loaded maps, dropping whatever was here
    pub fn replace_maps(&mut self, main: HashMap<Data, Value>, expires: HashMap<Data, u64>) {
        self.main = main;
        self.expires = expires;
    }
    /// One maintenance pass: sample up to the per-cron budget of volatile
    /// keys and reap the ones whose deadline has passed. Returns how many
    /// were reaped.
    pub fn expire_cycle(&mut self, now: u64) -> usize {
        let mut budget = self.expires.len().min(EXPIRE_LOOKUPS_PER_CRON);
        let mut reaped = 0;
        while budget > 0 {
            budget -= 1;
            let key = match sample(&self.expires) {
                Some(k) => k.clone(),
                None => break,
            };
            if self.expire_if_needed(&key, now) {
                reaped += 1;
            }
        }
        reaped
    }
    /// Pick the volatile key closest to its deadline out of a sample of
    /// three and remove it. Used by the memory-pressure reclaimer.
    pub fn evict_soonest_volatile(&mut self) -> bool {
        if self.expires.is_empty() {
            return false;
        }
        let mut min: Option<(Data, u64)> = None;
        for _ in 0..3 {
            if let Some(k) = sample(&self.expires) {
                let when = self.expires[k];
                if min.as_ref().map_or(true, |(_, w)| when < *w) {
                    min = Some((k.clone(), when));
                }
            }
        }
        match min {
            Some((key, _)) => self.remove(&key),
            None => false,
        }
    }
    /// Give memory back when the fill ratio drops very low. Skipped while
    /// a snapshot is being written (the saver shares the payload bytes).
    pub fn try_shrink(&mut self) {
        if self.main.capacity() > SHRINK_MIN_SLOTS && self.main.len() * 10 < self.main.capacity() {
            self.main.shrink_to_fit();
        }
        if self.expires.capacity() > SHRINK_MIN_SLOTS
            && self.expires.len() * 10 < self.expires.capacity()
        {
            self.expires.shrink_to_fit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Data {
        Data::from(s)
    }

    #[test]
    fn lazy_expiry_on_read() {
        let db = Db::new();
        let mut ks = db.write();
        ks.put(d("k"), Value::Str(d("v")));
        assert!(ks.set_expire(b"k", 100));
        // not due yet
        assert!(ks.lookup_read(b"k", 99).is_some());
        // due: the read reaps it from both maps
        assert!(ks.lookup_read(b"k", 100).is_none());
        assert!(!ks.contains(b"k"));
        assert_eq!(ks.expires_len(), 0);
    }

    #[test]
    fn write_lookup_clears_deadline() {
        let db = Db::new();
        let mut ks = db.write();
        ks.put(d("k"), Value::Str(d("v")));
        assert!(ks.set_expire(b"k", u64::MAX));
        assert!(ks.lookup_write(b"k").is_some());
        assert_eq!(ks.get_expire(b"k"), None);
        assert!(ks.contains(b"k"));
    }

    #[test]
    fn set_expire_needs_a_live_key_and_refuses_overwrite() {
        let db = Db::new();
        let mut ks = db.write();
        assert!(!ks.set_expire(b"missing", 10));
        ks.put(d("k"), Value::Str(d("v")));
        assert!(ks.set_expire(b"k", 10));
        assert!(!ks.set_expire(b"k", 20));
        assert_eq!(ks.get_expire(b"k"), Some(10));
    }

    #[test]
    fn expiry_map_is_subset_of_main() {
        let db = Db::new();
        let mut ks = db.write();
        for i in 0..32 {
            let key = d(&format!("key{i}"));
            ks.put(key.clone(), Value::Str(d("v")));
            if i % 2 == 0 {
                assert!(ks.set_expire(&key, 1));
            }
        }
        // sampling is with replacement, so a single pass need not catch
        // every deadline; run passes until the expiry map drains
        for _ in 0..100 {
            if ks.expires_len() == 0 {
                break;
            }
            ks.expire_cycle(2);
        }
        let keys: Vec<Data> = ks.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(ks.expires_len(), 0);
        for i in (1..32).step_by(2) {
            assert!(keys.iter().any(|k| &k[..] == format!("key{i}").as_bytes()));
        }
    }

    #[test]
    fn random_key_skips_expired() {
        let db = Db::new();
        let mut ks = db.write();
        ks.put(d("dead"), Value::Str(d("v")));
        assert!(ks.set_expire(b"dead", 1));
        ks.put(d("live"), Value::Str(d("v")));
        for _ in 0..16 {
            assert_eq!(&ks.random_key(100).unwrap()[..], b"live");
        }
    }

    #[test]
    fn remove_drops_both_maps() {
        let db = Db::new();
        let mut ks = db.write();
        ks.put(d("k"), Value::Str(d("v")));
        ks.set_expire(b"k", 1000);
        assert!(ks.remove(b"k"));
        assert!(!ks.remove(b"k"));
        assert_eq!(ks.expires_len(), 0);
    }
}
