/*
 * Created on Wed Mar 15 2023
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

//! Master-side replication: replica admission, the post-save state
//! machine, the bulk transfer and the steady-state feed pump

use super::{SlaveEntry, SlaveState};
use crate::corestore::Corestore;
use crate::dbnet::connection::Connection;
use crate::protocol::responses::groups;
use crate::services::bgsave;
use bytes::Bytes;
use std::io::Result as IoResult;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Notify;

/// How much of the dump file one write cycle moves
const BULK_CHUNK: usize = 64 * 1024;

/// The connection task's end of a replica registration. Dropping it
/// detaches the replica from the core.
pub struct SlaveReceiver {
    id: u64,
    rx: UnboundedReceiver<Bytes>,
    notify: Arc<Notify>,
    handle: Corestore,
}

impl Drop for SlaveReceiver {
    fn drop(&mut self) {
        self.handle.repl().detach(self.id);
    }
}

struct MonitorGuard {
    id: u64,
    handle: Corestore,
}

impl Drop for MonitorGuard {
    fn drop(&mut self) {
        self.handle.repl().detach(self.id);
    }
}

/// Admit a replica that just sent `SYNC`, deciding how it gets its
/// snapshot:
/// - a save is running and another replica is already collecting the
///   delta: copy that replica's buffered delta and share the save;
/// - a save is running with no delta collector: park until the next one;
/// - otherwise: start a save; the snapshot task arms delta collection
///   at the exact snapshot point.
pub fn attach_slave(handle: &Corestore) -> Result<SlaveReceiver, &'static [u8]> {
    let mut inner = handle.repl().inner.lock();
    let (state, pending) = if handle.bgsave_in_progress() {
        match inner
            .slaves
            .values()
            .find(|s| s.state == SlaveState::WaitBgsaveEnd)
        {
            Some(donor) => {
                log::info!("Waiting for end of BGSAVE for SYNC");
                (SlaveState::WaitBgsaveEnd, donor.pending.clone())
            }
            None => {
                log::info!("Waiting for next BGSAVE for SYNC");
                (SlaveState::WaitBgsaveStart, Vec::new())
            }
        }
    } else {
        log::info!("Starting BGSAVE for SYNC");
        if bgsave::begin_background_save(handle) {
            // armed to WaitBgsaveEnd by the snapshot task; starting in
            // the parked state closes the window between here and the
            // actual snapshot point
            (SlaveState::WaitBgsaveStart, Vec::new())
        } else {
            log::warn!("Replication failed, can't BGSAVE");
            return Err(groups::UNABLE_TO_BGSAVE);
        }
    };
    let id = inner.next_id;
    inner.next_id += 1;
    let (tx, rx) = mpsc::unbounded_channel();
    let notify = Arc::new(Notify::new());
    inner.slaves.insert(
        id,
        SlaveEntry {
            state,
            pending,
            tx,
            notify: notify.clone(),
            seldb: 0,
        },
    );
    Ok(SlaveReceiver {
        id,
        rx,
        notify,
        handle: handle.clone(),
    })
}

/// Dispatched by the snapshot writer when a save finishes. Waiting-for-
/// end replicas move on to their bulk transfer (or are dropped if the
/// save failed); parked replicas get a fresh save kicked off for them.
pub fn update_slaves_waiting_bgsave(handle: &Corestore, ok: bool) {
    let mut start_new = false;
    {
        let mut inner = handle.repl().inner.lock();
        let mut failed: Vec<u64> = Vec::new();
        for (id, slave) in inner.slaves.iter_mut() {
            match slave.state {
                SlaveState::WaitBgsaveStart => start_new = true,
                SlaveState::WaitBgsaveEnd => {
                    if ok {
                        slave.state = SlaveState::SendBulk;
                        slave.notify.notify_one();
                    } else {
                        log::warn!("SYNC failed. BGSAVE returned an error");
                        failed.push(*id);
                    }
                }
                _ => (),
            }
        }
        for id in failed {
            if let Some(slave) = inner.slaves.remove(&id) {
                slave.notify.notify_one();
            }
        }
    }
    if start_new && !bgsave::begin_background_save(handle) {
        // someone else's save got there first; its snapshot task will
        // arm the parked replicas instead
        log::debug!("Parked replicas will ride the already-running save");
    }
}

/// Drive a replica connection after `SYNC`: wait for the dump, stream
/// it, flush the buffered delta, then pump the live feed until the link
/// drops.
pub async fn run_slave<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    mut recv: SlaveReceiver,
) -> IoResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    // wait until the snapshot writer hands over the dump
    loop {
        {
            let inner = handle.repl().inner.lock();
            match inner.slaves.get(&recv.id) {
                // dropped: the save this replica was waiting on failed
                None => return Ok(()),
                Some(slave) if slave.state == SlaveState::SendBulk => break,
                Some(_) => (),
            }
        }
        recv.notify.notified().await;
    }
    // bulk transfer: `$<size>` then the raw dump bytes
    let filename = handle.cfg().dbfilename.clone();
    let mut file = tokio::fs::File::open(&filename).await?;
    let size = file.metadata().await?.len();
    con.write_raw(format!("${}\r\n", size).as_bytes()).await?;
    let mut chunk = vec![0u8; BULK_CHUNK];
    let mut sent = 0u64;
    while sent < size {
        let want = ((size - sent) as usize).min(chunk.len());
        let n = file.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "dump file shrank mid-transfer",
            ));
        }
        con.write_raw(&chunk[..n]).await?;
        sent += n as u64;
    }
    con.flush().await?;
    // drain the delta collected since the snapshot point, then flip
    // online in the same critical section that proves it empty
    loop {
        let batch = {
            let mut inner = handle.repl().inner.lock();
            match inner.slaves.get_mut(&recv.id) {
                None => return Ok(()),
                Some(slave) => {
                    if slave.pending.is_empty() {
                        slave.state = SlaveState::Online;
                        break;
                    }
                    std::mem::take(&mut slave.pending)
                }
            }
        };
        for line in batch {
            con.write_raw(&line).await?;
        }
    }
    con.flush().await?;
    log::info!("Synchronization with slave succeeded");
    // steady state: everything now arrives through the channel
    while let Some(line) = recv.rx.recv().await {
        con.write_raw(&line).await?;
        con.flush().await?;
    }
    Ok(())
}

/// Drive a monitor connection: acknowledge, then relay the feed
pub async fn run_monitor<T>(handle: &Corestore, con: &mut Connection<T>) -> IoResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (id, mut rx) = handle.repl().attach_monitor();
    let _guard = MonitorGuard {
        id,
        handle: handle.clone(),
    };
    con.write_raw(groups::OK).await?;
    con.flush().await?;
    while let Some(line) = rx.recv().await {
        con.write_raw(&line).await?;
        con.flush().await?;
    }
    Ok(())
}
