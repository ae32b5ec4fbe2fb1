/*
 * Created on Fri Mar 03 2023
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

//! The in-memory engine: databases, the interning pool, the dirty/save
//! counters and the server-wide statistics, all behind one cloneable
//! handle that every task threads through its calls

pub mod data;
pub mod db;
pub mod pool;
pub mod value;

pub use data::Data;
pub use db::{Db, Keyspace};
pub use value::Value;

use crate::config::ServerConfig;
use crate::replication::ReplCore;
use crate::util;
use parking_lot::Mutex;
use pool::SharedPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Server-wide counters surfaced by INFO
#[derive(Debug)]
pub struct Stats {
    pub starttime: u64,
    pub numconnections: AtomicU64,
    pub numcommands: AtomicU64,
    pub clients: AtomicUsize,
}

impl Stats {
    fn new() -> Self {
        Stats {
            starttime: util::unix_now(),
            numconnections: AtomicU64::new(0),
            numcommands: AtomicU64::new(0),
            clients: AtomicUsize::new(0),
        }
    }
}

#[derive(Debug)]
pub struct Shared {
    cfg: ServerConfig,
    dbs: Vec<Db>,
    /// state-mutating commands since the last successful snapshot
    dirty: AtomicU64,
    /// unix time of the last successful snapshot
    lastsave: AtomicU64,
    /// at most one snapshot writer exists at any time
    bgsave_in_progress: AtomicBool,
    /// asks a running snapshot writer to bail out (SHUTDOWN path)
    save_abort: AtomicBool,
    /// allocator gauge, refreshed once per maintenance tick
    cached_memory: AtomicUsize,
    pool: Mutex<SharedPool>,
    /// the quiesce lock: every command applies under a shared grab,
    /// the snapshot point takes it exclusively so that "applied" and
    /// "fed to the delta" can never straddle the snapshot
    apply: tokio::sync::RwLock<()>,
    pub repl: ReplCore,
    pub stats: Stats,
}

/// A thread-safe handle to the engine. Cloning hands out another atomic
/// reference to the same `Shared`; every task and connection holds one.
#[derive(Clone, Debug)]
pub struct Corestore {
    shared: Arc<Shared>,
}

impl Corestore {
    pub fn new(cfg: ServerConfig) -> Self {
        let dbs = (0..cfg.databases).map(|_| Db::new()).collect();
        let poolsize = if cfg.shareobjects {
            cfg.shareobjectspoolsize
        } else {
            0
        };
        let repl = ReplCore::new(cfg.slaveof.clone());
        Corestore {
            shared: Arc::new(Shared {
                cfg,
                dbs,
                dirty: AtomicU64::new(0),
                lastsave: AtomicU64::new(util::unix_now()),
                bgsave_in_progress: AtomicBool::new(false),
                save_abort: AtomicBool::new(false),
                cached_memory: AtomicUsize::new(0),
                pool: Mutex::new(SharedPool::new(poolsize)),
                apply: tokio::sync::RwLock::new(()),
                repl,
                stats: Stats::new(),
            }),
        }
    }
    pub fn cfg(&self) -> &ServerConfig {
        &self.shared.cfg
    }
    pub fn db(&self, index: usize) -> &Db {
        &self.shared.dbs[index]
    }
    pub fn dbs(&self) -> &[Db] {
        &self.shared.dbs
    }
    pub fn db_count(&self) -> usize {
        self.shared.dbs.len()
    }
    pub fn stats(&self) -> &Stats {
        &self.shared.stats
    }
    pub fn repl(&self) -> &ReplCore {
        &self.shared.repl
    }

    // dirty / save bookkeeping

    pub fn dirty(&self) -> u64 {
        self.shared.dirty.load(Ordering::Relaxed)
    }
    pub fn add_dirty(&self, n: u64) {
        self.shared.dirty.fetch_add(n, Ordering::Relaxed);
    }
    pub fn lastsave(&self) -> u64 {
        self.shared.lastsave.load(Ordering::Relaxed)
    }
    pub fn bgsave_in_progress(&self) -> bool {
        self.shared.bgsave_in_progress.load(Ordering::Acquire)
    }
    /// Claim the single background-save slot. Returns false if a save is
    /// already running.
    pub fn try_begin_save(&self) -> bool {
        self.shared
            .bgsave_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
    /// Release the save slot. A successful save zeroes the dirty counter
    /// and stamps the save time.
    pub fn finish_save(&self, ok: bool) {
        if ok {
            self.shared.dirty.store(0, Ordering::Relaxed);
            self.shared
                .lastsave
                .store(util::unix_now(), Ordering::Relaxed);
        }
        self.shared.save_abort.store(false, Ordering::Release);
        self.shared.bgsave_in_progress.store(false, Ordering::Release);
    }
    /// A synchronous save landed: the on-disk keyspace is current
    pub fn mark_saved(&self) {
        self.shared.dirty.store(0, Ordering::Relaxed);
        self.shared
            .lastsave
            .store(util::unix_now(), Ordering::Relaxed);
    }
    pub fn request_save_abort(&self) {
        self.shared.save_abort.store(true, Ordering::Release);
    }
    pub fn save_abort_requested(&self) -> bool {
        self.shared.save_abort.load(Ordering::Acquire)
    }

    // value interning

    /// Route a payload through the interning pool when sharing is enabled
    pub fn intern(&self, data: Data) -> Data {
        if self.shared.cfg.shareobjects {
            self.shared.pool.lock().intern(data)
        } else {
            data
        }
    }
    pub fn pool_len(&self) -> usize {
        self.shared.pool.lock().len()
    }

    // memory pressure

    pub fn refresh_memory_gauge(&self) {
        self.shared
            .cached_memory
            .store(util::mem::used_memory(), Ordering::Relaxed);
    }
    pub fn used_memory(&self) -> usize {
        self.shared.cached_memory.load(Ordering::Relaxed)
    }
    /// While over `maxmemory`, evict the volatile key nearest its deadline
    /// from every database with one, a pass at a time. Stops as soon as a
    /// full pass frees nothing.
    pub fn free_memory_if_needed(&self) {
        let maxmemory = self.shared.cfg.maxmemory;
        if maxmemory == 0 {
            return;
        }
        while util::mem::used_memory() > maxmemory {
            let mut freed = false;
            for db in &self.shared.dbs {
                if db.write().evict_soonest_volatile() {
                    freed = true;
                }
            }
            if !freed {
                break;
            }
        }
        self.refresh_memory_gauge();
    }

    // whole-keyspace operations

    /// Empty every database. Returns the number of keys dropped.
    pub fn empty_all(&self) -> u64 {
        let mut dropped = 0u64;
        for db in &self.shared.dbs {
            dropped += db.write().clear() as u64;
        }
        dropped
    }
    /// A point-in-time copy of every database for the snapshot writer.
    /// Payload bytes are shared; only the table structure is copied. All
    /// database locks are held together (in index order, the same order
    /// every multi-database command uses) so the copy is one cut across
    /// the whole keyspace.
    #[allow(clippy::type_complexity)]
    pub fn take_snapshot(&self) -> Vec<(HashMap<Data, Value>, HashMap<Data, u64>)> {
        let guards: Vec<_> = self.shared.dbs.iter().map(|db| db.read()).collect();
        guards.iter().map(|ks| ks.clone_maps()).collect()
    }

    /// Install a loaded dump, one database at a time
    pub fn install_dump(&self, dump: Vec<(HashMap<Data, Value>, HashMap<Data, u64>)>) {
        for (db, (main, expires)) in self.shared.dbs.iter().zip(dump) {
            db.write().replace_maps(main, expires);
        }
    }

    // the quiesce lock

    /// Taken (shared) around every command application
    pub async fn apply_shared(&self) -> tokio::sync::RwLockReadGuard<'_, ()> {
        self.shared.apply.read().await
    }
    /// Taken (exclusive) at a snapshot point: briefly holds off every
    /// in-flight command so the snapshot and the replica delta agree on
    /// where "now" is
    pub async fn apply_exclusive(&self) -> tokio::sync::RwLockWriteGuard<'_, ()> {
        self.shared.apply.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn store() -> Corestore {
        let mut cfg = ServerConfig::default();
        cfg.databases = 4;
        Corestore::new(cfg)
    }

    #[test]
    fn save_slot_is_exclusive() {
        let handle = store();
        assert!(handle.try_begin_save());
        assert!(!handle.try_begin_save());
        handle.finish_save(true);
        assert!(handle.try_begin_save());
        handle.finish_save(false);
    }

    #[test]
    fn successful_save_zeroes_dirty() {
        let handle = store();
        handle.add_dirty(42);
        assert!(handle.try_begin_save());
        handle.finish_save(false);
        assert_eq!(handle.dirty(), 42);
        assert!(handle.try_begin_save());
        handle.finish_save(true);
        assert_eq!(handle.dirty(), 0);
    }

    #[test]
    fn empty_all_reports_dropped_keys() {
        let handle = store();
        handle
            .db(0)
            .write()
            .put(Data::from("a"), Value::Str(Data::from("1")));
        handle
            .db(2)
            .write()
            .put(Data::from("b"), Value::Str(Data::from("2")));
        assert_eq!(handle.empty_all(), 2);
        assert_eq!(handle.db(0).len(), 0);
        assert_eq!(handle.db(2).len(), 0);
    }
}
