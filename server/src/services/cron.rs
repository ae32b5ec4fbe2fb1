/*
 * Created on Sat Mar 18 2023
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

//! The once-a-second maintenance task: memory gauge refresh, periodic
//! stats logging, opportunistic table shrinking, save-rule scheduling,
//! sampled expiration and replica reconnection

use crate::corestore::Corestore;
use crate::dbnet::Terminator;
use crate::replication;
use crate::services::bgsave;
use crate::util;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time;

pub async fn service(handle: Corestore, mut terminator: Terminator) {
    let mut loops: u64 = 0;
    while !terminator.is_termination_signal() {
        tokio::select! {
            _ = time::sleep(Duration::from_secs(1)) => {}
            _ = terminator.receive_signal() => break,
        }
        loops += 1;
        handle.refresh_memory_gauge();

        if loops % 5 == 0 {
            for (i, db) in handle.dbs().iter().enumerate() {
                let used = db.len();
                let vkeys = db.expires_len();
                if used > 0 || vkeys > 0 {
                    log::debug!(
                        "DB {}: {} keys ({} volatile) in {} slots HT.",
                        i,
                        used,
                        vkeys,
                        db.capacity()
                    );
                }
            }
            log::debug!(
                "{} clients connected ({} slaves), {} bytes in use, {} shared objects",
                handle
                    .stats()
                    .clients
                    .load(Ordering::Relaxed)
                    .saturating_sub(handle.repl().slave_count()),
                handle.repl().slave_count(),
                handle.used_memory(),
                handle.pool_len()
            );
        }

        // don't move tables around while the snapshot writer shares
        // their payloads
        if !handle.bgsave_in_progress() {
            for db in handle.dbs() {
                db.write().try_shrink();
            }
            let now = util::unix_now();
            for rule in &handle.cfg().save_rules {
                if handle.dirty() >= rule.changes
                    && now.saturating_sub(handle.lastsave()) > rule.seconds
                {
                    log::info!(
                        "{} changes in {} seconds. Saving...",
                        rule.changes,
                        rule.seconds
                    );
                    bgsave::begin_background_save(&handle);
                    break;
                }
            }
        }

        let now = util::unix_now();
        for db in handle.dbs() {
            if db.expires_len() > 0 {
                db.write().expire_cycle(now);
            }
        }

        // a replica that lost (or never had) its master link retries here
        if let Some((host, port, epoch)) = handle.repl().begin_sync_attempt() {
            let handle = handle.clone();
            tokio::spawn(async move {
                replication::replica::run_sync(handle, host, port, epoch).await;
            });
        }
    }
    log::info!("Maintenance service has exited");
}
