/*
 * Created on Fri Mar 17 2023
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

//! The snapshot writer
//!
//! A background save briefly quiesces command application (the exclusive
//! side of the apply lock), arms replica delta collection, clones the
//! table structure of every database (payloads are shared bytes) and
//! hands the copy to a blocking thread to serialize and atomically
//! rename into place. On completion the replica state machine is
//! dispatched with the outcome. A synchronous save does the same work
//! inline and is used by `SAVE`, `SHUTDOWN`, `FLUSHALL` and the final
//! flush on exit.

use crate::corestore::Corestore;
use crate::diskstore;
use crate::replication;
use crate::util::error::{Error, RubraResult};
use std::time::Duration;
use tokio::time;

/// Kick off a background save. Returns false when the save slot is
/// already taken.
pub fn begin_background_save(handle: &Corestore) -> bool {
    if !handle.try_begin_save() {
        return false;
    }
    log::info!("Background saving started");
    let handle = handle.clone();
    tokio::spawn(async move {
        let snapshot = {
            // the snapshot point: nothing is mid-apply while this is held
            let _quiesce = handle.apply_exclusive().await;
            handle.repl().arm_delta_collection();
            handle.take_snapshot()
        };
        let filename = handle.cfg().dbfilename.clone();
        let abort_handle = handle.clone();
        let result = tokio::task::spawn_blocking(move || {
            diskstore::write_to_disk(&filename, &snapshot, || {
                abort_handle.save_abort_requested()
            })
        })
        .await;
        let ok = matches!(result, Ok(Ok(())));
        match result {
            Ok(Ok(())) => log::info!("Background saving terminated with success"),
            Ok(Err(e)) => log::error!("Background saving error: {}", e),
            Err(e) => log::error!("Background saving task failed: {}", e),
        }
        handle.finish_save(ok);
        replication::master::update_slaves_waiting_bgsave(&handle, ok);
    });
    true
}

/// A blocking (from the caller's point of view) save of the current
/// keyspace. Waits out any background writer first so the two can't
/// race for the dump file.
pub async fn save_sync(handle: &Corestore) -> RubraResult<()> {
    while handle.bgsave_in_progress() {
        time::sleep(Duration::from_millis(50)).await;
    }
    let snapshot = handle.take_snapshot();
    let filename = handle.cfg().dbfilename.clone();
    tokio::task::spawn_blocking(move || diskstore::write_to_disk(&filename, &snapshot, || false))
        .await
        .map_err(|e| Error::OtherError(format!("save task failed: {}", e)))??;
    handle.mark_saved();
    Ok(())
}
