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

//! Replication state
//!
//! The master side tracks every attached replica and monitor here. A
//! replica that arrives mid-save parks in a waiting state and collects
//! the post-snapshot command delta in a pending buffer; once its bulk
//! transfer finishes the buffer is flushed and the replica goes online,
//! receiving the live feed through its channel. The replica side of the
//! house is a tiny target record: who the master is and how the link is
//! doing; the sync task in [`replica`] drives it.

pub mod master;
pub mod replica;

use crate::corestore::Data;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    /// A save was already running with nobody collecting a delta; wait
    /// for the next one
    WaitBgsaveStart,
    /// A save is running and this replica is collecting the delta
    WaitBgsaveEnd,
    /// The dump is on disk and the bulk transfer is under way
    SendBulk,
    /// Steady state: live feed
    Online,
}

#[derive(Debug)]
struct SlaveEntry {
    state: SlaveState,
    /// feed lines buffered while the replica is not yet online
    pending: Vec<Bytes>,
    tx: UnboundedSender<Bytes>,
    notify: Arc<Notify>,
    /// the database index of the last feed line sent to this sink
    seldb: usize,
}

#[derive(Debug)]
struct MonitorEntry {
    tx: UnboundedSender<Bytes>,
    seldb: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not a replica
    None,
    /// Must (re)connect to the master on the next maintenance tick
    Connect,
    /// A sync attempt is in flight
    Syncing,
    /// Initial sync done; applying the live feed
    Connected,
}

#[derive(Debug)]
struct ReplInner {
    slaves: HashMap<u64, SlaveEntry>,
    monitors: HashMap<u64, MonitorEntry>,
    next_id: u64,
    master: Option<(String, u16)>,
    link: LinkState,
    /// bumped on every SLAVEOF change so a stale sync task can tell it
    /// has been superseded
    epoch: u64,
}

#[derive(Debug)]
pub struct ReplCore {
    inner: Mutex<ReplInner>,
}

/// Serialize an executed command back into inline text for the feed.
/// Bulk commands get their final argument length-prefixed, exactly the
/// framing a client would have used.
pub fn serialize_feed(argv: &[Data], bulk: bool) -> Bytes {
    let mut out = Vec::with_capacity(64);
    let last = argv.len().saturating_sub(1);
    for (i, arg) in argv.iter().enumerate() {
        if i != 0 {
            out.push(b' ');
        }
        if bulk && i == last {
            out.extend_from_slice(format!("{}\r\n", arg.len()).as_bytes());
        }
        out.extend_from_slice(arg);
    }
    out.extend_from_slice(b"\r\n");
    Bytes::from(out)
}

fn select_line(dictid: usize) -> Bytes {
    Bytes::from(format!("select {}\r\n", dictid).into_bytes())
}

impl ReplCore {
    pub fn new(master: Option<(String, u16)>) -> Self {
        let link = if master.is_some() {
            LinkState::Connect
        } else {
            LinkState::None
        };
        ReplCore {
            inner: Mutex::new(ReplInner {
                slaves: HashMap::new(),
                monitors: HashMap::new(),
                next_id: 0,
                master,
                link,
                epoch: 0,
            }),
        }
    }

    // fan-out

    pub fn slave_count(&self) -> usize {
        self.inner.lock().slaves.len()
    }
    pub fn monitor_count(&self) -> usize {
        self.inner.lock().monitors.len()
    }
    /// Feed a state-mutating command to every attached replica
    pub fn feed_slaves(&self, argv: &[Data], bulk: bool, dictid: usize) {
        let mut inner = self.inner.lock();
        if inner.slaves.is_empty() {
            return;
        }
        let line = serialize_feed(argv, bulk);
        for slave in inner.slaves.values_mut() {
            if slave.state == SlaveState::WaitBgsaveStart {
                // this one restarts from the next snapshot; feeding it
                // now would duplicate writes
                continue;
            }
            if slave.seldb != dictid {
                slave.push(select_line(dictid));
                slave.seldb = dictid;
            }
            slave.push(line.clone());
        }
    }
    /// Feed every executed command to the attached monitors
    pub fn feed_monitors(&self, argv: &[Data], bulk: bool, dictid: usize) {
        let mut inner = self.inner.lock();
        if inner.monitors.is_empty() {
            return;
        }
        let line = serialize_feed(argv, bulk);
        inner.monitors.retain(|_, mon| {
            if mon.seldb != dictid {
                if mon.tx.send(select_line(dictid)).is_err() {
                    return false;
                }
                mon.seldb = dictid;
            }
            mon.tx.send(line.clone()).is_ok()
        });
    }
    /// Called at a snapshot point (under the exclusive apply lock):
    /// every replica parked for the next save starts collecting its
    /// delta from exactly here
    pub fn arm_delta_collection(&self) {
        let mut inner = self.inner.lock();
        for slave in inner.slaves.values_mut() {
            if slave.state == SlaveState::WaitBgsaveStart {
                slave.state = SlaveState::WaitBgsaveEnd;
            }
        }
    }
    pub fn attach_monitor(&self) -> (u64, UnboundedReceiver<Bytes>) {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        inner.monitors.insert(id, MonitorEntry { tx, seldb: 0 });
        (id, rx)
    }
    pub fn detach(&self, id: u64) {
        let mut inner = self.inner.lock();
        inner.slaves.remove(&id);
        inner.monitors.remove(&id);
    }

    // replica-side target record

    pub fn master(&self) -> Option<(String, u16)> {
        self.inner.lock().master.clone()
    }
    pub fn link_state(&self) -> LinkState {
        self.inner.lock().link
    }
    /// SLAVEOF: point at a (new) master, or back to master mode with
    /// `None`. Either way any in-flight sync task is superseded.
    pub fn set_master(&self, master: Option<(String, u16)>) {
        let mut inner = self.inner.lock();
        inner.link = if master.is_some() {
            LinkState::Connect
        } else {
            LinkState::None
        };
        inner.master = master;
        inner.epoch += 1;
    }
    /// Claim the next sync attempt. Returns the target and the epoch the
    /// attempt belongs to, or `None` if no attempt is due.
    pub fn begin_sync_attempt(&self) -> Option<(String, u16, u64)> {
        let mut inner = self.inner.lock();
        if inner.link != LinkState::Connect {
            return None;
        }
        let (host, port) = inner.master.clone()?;
        inner.link = LinkState::Syncing;
        Some((host, port, inner.epoch))
    }
    /// Mark the outcome of a sync attempt; ignored if SLAVEOF changed the
    /// target while the attempt was in flight
    pub fn finish_sync_attempt(&self, epoch: u64, connected: bool) {
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            return;
        }
        inner.link = if connected {
            LinkState::Connected
        } else if inner.master.is_some() {
            LinkState::Connect
        } else {
            LinkState::None
        };
    }
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }
}

impl SlaveEntry {
    fn push(&mut self, line: Bytes) {
        match self.state {
            SlaveState::Online => {
                // a closed channel means the connection task is gone and
                // the entry will be detached by its guard
                let _ = self.tx.send(line);
            }
            _ => self.pending.push(line),
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
    fn feed_lines_mirror_inline_framing() {
        let line = serialize_feed(&[d("del"), d("foo"), d("bar")], false);
        assert_eq!(&line[..], b"del foo bar\r\n");
    }

    #[test]
    fn bulk_feed_carries_the_length_line() {
        let line = serialize_feed(&[d("set"), d("key"), d("value")], true);
        assert_eq!(&line[..], b"set key 5\r\nvalue\r\n");
    }

    #[test]
    fn monitors_get_select_lines_on_db_change() {
        let core = ReplCore::new(None);
        let (_id, mut rx) = core.attach_monitor();
        core.feed_monitors(&[d("get"), d("x")], false, 0);
        assert_eq!(&rx.try_recv().unwrap()[..], b"get x\r\n");
        core.feed_monitors(&[d("get"), d("x")], false, 3);
        assert_eq!(&rx.try_recv().unwrap()[..], b"select 3\r\n");
        assert_eq!(&rx.try_recv().unwrap()[..], b"get x\r\n");
        // no further select once the db sticks
        core.feed_monitors(&[d("get"), d("y")], false, 3);
        assert_eq!(&rx.try_recv().unwrap()[..], b"get y\r\n");
    }

    #[test]
    fn slaveof_supersedes_inflight_attempts() {
        let core = ReplCore::new(Some(("10.0.0.1".to_owned(), 6379)));
        let (_, _, epoch) = core.begin_sync_attempt().unwrap();
        // the operator repoints the replica while the attempt is running
        core.set_master(Some(("10.0.0.2".to_owned(), 6379)));
        core.finish_sync_attempt(epoch, true);
        // the stale attempt must not mark the new target connected
        assert_eq!(core.link_state(), LinkState::Connect);
        let (host, _, _) = core.begin_sync_attempt().unwrap();
        assert_eq!(host, "10.0.0.2");
    }
}
