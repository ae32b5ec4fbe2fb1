/*
 * Created on Sun Mar 12 2023
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

//! Type-agnostic keyspace commands

use crate::corestore::{Corestore, Data, Value};
use crate::dbnet::connection::Connection;
use crate::dbnet::ClientState;
use crate::protocol::responses::groups;
use crate::services;
use crate::util;
use crate::util::glob::stringmatch;
use tokio::io::{AsyncRead, AsyncWrite};

async fn rename_generic<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    act: &[Data],
    nx: bool,
) -> crate::actions::ActionResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    if act[0][..] == act[1][..] {
        return util::err(groups::SAME_OBJECT_ERR);
    }
    enum Outcome {
        Renamed,
        NoKey,
        DstExists,
    }
    let outcome = {
        let mut ks = handle.db(client.db).write();
        match ks.lookup_write(&act[0]) {
            None => Outcome::NoKey,
            Some(_) => {
                ks.delete_if_volatile(&act[1]);
                if nx && ks.contains(&act[1]) {
                    Outcome::DstExists
                } else {
                    // the source probe above proved the key is live
                    if let Some(val) = ks.lookup_write(&act[0]).map(|v| v.clone()) {
                        ks.put(act[1].clone(), val);
                        ks.remove(&act[0]);
                    }
                    Outcome::Renamed
                }
            }
        }
    };
    match outcome {
        Outcome::Renamed => {
            handle.add_dirty(1);
            con.write_raw(if nx { groups::CONE } else { groups::OK })
                .await?;
        }
        Outcome::NoKey => return util::err(groups::NOKEY_ERR),
        Outcome::DstExists => con.write_raw(groups::CZERO).await?,
    }
    Ok(())
}

action!(
    /// Run a `DEL` query. Variadic; replies with the delete count.
    fn del(handle, con, client, act) {
        let deleted = {
            let mut ks = handle.db(client.db).write();
            act.iter().filter(|key| ks.remove(key)).count()
        };
        handle.add_dirty(deleted as u64);
        con.write_int(deleted as i64).await?;
        Ok(())
    }
    /// Run an `EXISTS` query
    fn exists(handle, con, client, act) {
        let found = {
            let mut ks = handle.db(client.db).write();
            ks.lookup_read(&act[0], util::unix_now()).is_some()
        };
        con.write_raw(if found { groups::CONE } else { groups::CZERO })
            .await?;
        Ok(())
    }
    /// Run a `KEYS` query: one bulk reply of space-joined matching keys
    fn keys(handle, con, client, act) {
        let pattern = &act[0];
        let matched: Vec<Data> = {
            let mut ks = handle.db(client.db).write();
            let now = util::unix_now();
            let all: Vec<Data> = ks.iter().map(|(k, _)| k.clone()).collect();
            all.into_iter()
                .filter(|key| !ks.expire_if_needed(key, now))
                .filter(|key| &pattern[..] == b"*" || stringmatch(pattern, key, false))
                .collect()
        };
        let mut joined = Vec::new();
        for (i, key) in matched.iter().enumerate() {
            if i != 0 {
                joined.push(b' ');
            }
            joined.extend_from_slice(key);
        }
        con.write_bulk(&joined).await?;
        Ok(())
    }
    /// Run a `TYPE` query
    fn type_cmd(handle, con, client, act) {
        let name = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_read(&act[0], util::unix_now()) {
                Some(val) => val.type_name(),
                None => "none",
            }
        };
        con.write_status(name).await?;
        Ok(())
    }
    /// Run a `RANDOMKEY` query. Replies `+<key>`, or a bare `+` when the
    /// database is empty.
    fn randomkey(handle, con, client, _act) {
        let key = {
            let mut ks = handle.db(client.db).write();
            ks.random_key(util::unix_now())
        };
        let mut line = Vec::with_capacity(key.as_ref().map_or(3, |k| k.len() + 3));
        line.push(b'+');
        if let Some(key) = key {
            line.extend_from_slice(&key);
        }
        line.extend_from_slice(b"\r\n");
        con.write_raw(&line).await?;
        Ok(())
    }
    /// Run a `RENAME` query
    fn rename(handle, con, client, act) {
        rename_generic(handle, con, client, act, false).await
    }
    /// Run a `RENAMENX` query
    fn renamenx(handle, con, client, act) {
        rename_generic(handle, con, client, act, true).await
    }
    /// Run a `MOVE` query: relocate a key into another database
    fn move_cmd(handle, con, client, act) {
        let target = util::parse_i64_loose(&act[1]);
        if target < 0 || target as usize >= handle.db_count() {
            return util::err(groups::OUT_OF_RANGE_ERR);
        }
        let target = target as usize;
        if target == client.db {
            return util::err(groups::SAME_OBJECT_ERR);
        }
        let moved = {
            // lock in index order so crossing moves can't deadlock
            let (mut src_ks, mut dst_ks) = if client.db < target {
                let src = handle.db(client.db).write();
                let dst = handle.db(target).write();
                (src, dst)
            } else {
                let dst = handle.db(target).write();
                let src = handle.db(client.db).write();
                (src, dst)
            };
            match src_ks.lookup_write(&act[0]).map(|v| v.clone()) {
                None => false,
                Some(val) => {
                    dst_ks.delete_if_volatile(&act[0]);
                    if dst_ks.contains(&act[0]) {
                        false
                    } else {
                        dst_ks.put(act[0].clone(), val);
                        src_ks.remove(&act[0]);
                        true
                    }
                }
            }
        };
        if moved {
            handle.add_dirty(1);
            con.write_raw(groups::CONE).await?;
        } else {
            con.write_raw(groups::CZERO).await?;
        }
        Ok(())
    }
    /// Run a `SELECT` query
    fn select(handle, con, client, act) {
        let index = util::parse_i64_loose(&act[0]);
        if index < 0 || index as usize >= handle.db_count() {
            return util::err(groups::INVALID_DB_ERR);
        }
        client.db = index as usize;
        con.write_raw(groups::OK).await?;
        Ok(())
    }
    /// Run a `DBSIZE` query
    fn dbsize(handle, con, client, _act) {
        con.write_int(handle.db(client.db).len() as i64).await?;
        Ok(())
    }
    /// Run a `FLUSHDB` query
    fn flushdb(handle, con, client, _act) {
        let dropped = handle.db(client.db).write().clear();
        handle.add_dirty(dropped as u64);
        con.write_raw(groups::OK).await?;
        Ok(())
    }
    /// Run a `FLUSHALL` query: empty everything and snapshot the (now
    /// empty) keyspace right away
    fn flushall(handle, con, _client, _act) {
        let dropped = handle.empty_all();
        handle.add_dirty(dropped);
        con.write_raw(groups::OK).await?;
        let _ = services::bgsave::save_sync(handle).await;
        handle.add_dirty(1);
        Ok(())
    }
    /// Run an `EXPIRE` query
    fn expire(handle, con, client, act) {
        let seconds = util::parse_i64_loose(&act[1]);
        let armed = if seconds <= 0 {
            false
        } else {
            let mut ks = handle.db(client.db).write();
            ks.set_expire(&act[0], util::unix_now() + seconds as u64)
        };
        if armed {
            handle.add_dirty(1);
            con.write_raw(groups::CONE).await?;
        } else {
            con.write_raw(groups::CZERO).await?;
        }
        Ok(())
    }
    /// Run a `TTL` query: seconds to live, or -1 when there is none
    fn ttl(handle, con, client, act) {
        let ttl = {
            let ks = handle.db(client.db).write();
            match ks.get_expire(&act[0]) {
                Some(when) => {
                    let now = util::unix_now();
                    if when > now {
                        (when - now) as i64
                    } else {
                        -1
                    }
                }
                None => -1,
            }
        };
        con.write_int(ttl).await?;
        Ok(())
    }
);
