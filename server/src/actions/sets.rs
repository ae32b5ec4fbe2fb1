/*
 * Created on Sat Mar 11 2023
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

//! Set value commands

use crate::corestore::{Corestore, Data, Value};
use crate::dbnet::connection::Connection;
use crate::dbnet::ClientState;
use crate::protocol::responses::groups;
use crate::util;
use rand::Rng;
use std::collections::HashSet;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Clone, Copy, PartialEq)]
enum SetOp {
    Union,
    Diff,
}

enum Gathered {
    Sets(Vec<HashSet<Data>>),
    MissingInput,
    WrongType,
}

/// Pull copies of the input sets out of the keyspace. `strict` reports a
/// missing key instead of treating it as the empty set.
fn gather(
    handle: &Corestore,
    db: usize,
    keys: &[Data],
    strict: bool,
) -> Gathered {
    let mut ks = handle.db(db).write();
    let now = util::unix_now();
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        match ks.lookup_read(key, now) {
            Some(Value::Set(s)) => sets.push(s.clone()),
            Some(_) => return Gathered::WrongType,
            None if strict => return Gathered::MissingInput,
            None => sets.push(HashSet::new()),
        }
    }
    Gathered::Sets(sets)
}

/// Replace `dst` with the computed set and bump the dirty counter
fn store_result(handle: &Corestore, db: usize, dst: &Data, result: HashSet<Data>) -> usize {
    let len = result.len();
    handle.db(db).write().put(dst.clone(), Value::Set(result));
    handle.add_dirty(1);
    len
}

async fn sinter_generic<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    keys: &[Data],
    dst: Option<&Data>,
) -> crate::actions::ActionResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut sets = match gather(handle, client.db, keys, true) {
        Gathered::Sets(sets) => sets,
        Gathered::WrongType => return util::err(groups::WRONGTYPE_ERR),
        Gathered::MissingInput => {
            // one missing input empties the whole intersection
            match dst {
                Some(dst) => {
                    if handle.db(client.db).write().remove(dst) {
                        handle.add_dirty(1);
                    }
                    con.write_raw(groups::OK).await?;
                }
                None => con.write_raw(groups::NIL_ARRAY).await?,
            }
            return Ok(());
        }
    };
    // iterate the smallest input, membership-test against the rest
    sets.sort_by_key(|s| s.len());
    let (smallest, rest) = match sets.split_first() {
        Some(split) => split,
        None => return util::err(groups::SYNTAX_ERR),
    };
    let result: HashSet<Data> = smallest
        .iter()
        .filter(|member| rest.iter().all(|s| s.contains(&member[..])))
        .cloned()
        .collect();
    match dst {
        Some(dst) => {
            let len = store_result(handle, client.db, dst, result);
            con.write_int(len as i64).await?;
        }
        None => {
            con.write_mbulk_header(result.len()).await?;
            for member in result {
                con.write_bulk(&member).await?;
            }
        }
    }
    Ok(())
}

async fn sunion_diff_generic<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    keys: &[Data],
    dst: Option<&Data>,
    op: SetOp,
) -> crate::actions::ActionResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let sets = match gather(handle, client.db, keys, false) {
        Gathered::Sets(sets) => sets,
        Gathered::WrongType => return util::err(groups::WRONGTYPE_ERR),
        Gathered::MissingInput => unreachable!("non-strict gather treats misses as empty"),
    };
    let mut result: HashSet<Data> = HashSet::new();
    for (i, set) in sets.iter().enumerate() {
        match op {
            SetOp::Union => result.extend(set.iter().cloned()),
            SetOp::Diff if i == 0 => result = set.clone(),
            SetOp::Diff => {
                for member in set {
                    result.remove(&member[..]);
                }
                if result.is_empty() {
                    break;
                }
            }
        }
    }
    match dst {
        Some(dst) => {
            let len = store_result(handle, client.db, dst, result);
            con.write_int(len as i64).await?;
        }
        None => {
            con.write_mbulk_header(result.len()).await?;
            for member in result {
                con.write_bulk(&member).await?;
            }
        }
    }
    Ok(())
}

action!(
    /// Run an `SADD` query
    fn sadd(handle, con, client, act) {
        let key = act[0].clone();
        let member = handle.intern(act[1].clone());
        let added = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_write(&key) {
                Some(Value::Set(s)) => Ok(s.insert(member)),
                Some(_) => Err(()),
                None => {
                    let mut s = HashSet::new();
                    s.insert(member);
                    ks.put(key, Value::Set(s));
                    Ok(true)
                }
            }
        };
        match added {
            Ok(true) => {
                handle.add_dirty(1);
                con.write_raw(groups::CONE).await?;
            }
            Ok(false) => con.write_raw(groups::CZERO).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `SREM` query
    fn srem(handle, con, client, act) {
        let removed = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_write(&act[0]) {
                Some(Value::Set(s)) => Ok(s.remove(&act[1][..])),
                Some(_) => Err(()),
                None => Ok(false),
            }
        };
        match removed {
            Ok(true) => {
                handle.add_dirty(1);
                con.write_raw(groups::CONE).await?;
            }
            Ok(false) => con.write_raw(groups::CZERO).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `SISMEMBER` query
    fn sismember(handle, con, client, act) {
        let found = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_read(&act[0], util::unix_now()) {
                Some(Value::Set(s)) => Ok(s.contains(&act[1][..])),
                Some(_) => Err(()),
                None => Ok(false),
            }
        };
        match found {
            Ok(true) => con.write_raw(groups::CONE).await?,
            Ok(false) => con.write_raw(groups::CZERO).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `SCARD` query
    fn scard(handle, con, client, act) {
        let card = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_read(&act[0], util::unix_now()) {
                Some(Value::Set(s)) => Ok(Some(s.len())),
                Some(_) => Err(()),
                None => Ok(None),
            }
        };
        match card {
            Ok(Some(n)) => con.write_int(n as i64).await?,
            Ok(None) => con.write_raw(groups::CZERO).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `SMOVE` query: move a member between two sets
    fn smove(handle, con, client, act) {
        enum Outcome {
            Moved,
            NotAMember,
            NoSource,
            WrongType,
        }
        let member = handle.intern(act[2].clone());
        let outcome = {
            let mut ks = handle.db(client.db).write();
            let src_probe = match ks.lookup_write(&act[0]) {
                None => Some(Outcome::NoSource),
                Some(Value::Set(_)) => None,
                Some(_) => Some(Outcome::WrongType),
            };
            match src_probe {
                Some(outcome) => outcome,
                None => {
                    // the destination must be a set too (if it exists at all)
                    let dst_bad =
                        matches!(ks.lookup_write(&act[1]), Some(v) if v.as_set().is_none());
                    if dst_bad {
                        Outcome::WrongType
                    } else {
                        let removed = match ks.lookup_write(&act[0]) {
                            Some(Value::Set(s)) => s.remove(&member[..]),
                            _ => false,
                        };
                        if !removed {
                            Outcome::NotAMember
                        } else {
                            match ks.lookup_write(&act[1]) {
                                Some(Value::Set(s)) => {
                                    s.insert(member.clone());
                                }
                                _ => {
                                    let mut s = HashSet::new();
                                    s.insert(member.clone());
                                    ks.put(act[1].clone(), Value::Set(s));
                                }
                            }
                            Outcome::Moved
                        }
                    }
                }
            }
        };
        match outcome {
            Outcome::Moved => {
                handle.add_dirty(1);
                con.write_raw(groups::CONE).await?;
            }
            Outcome::NotAMember | Outcome::NoSource => con.write_raw(groups::CZERO).await?,
            Outcome::WrongType => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `SPOP` query: remove and return a random member
    fn spop(handle, con, client, act) {
        let popped = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_write(&act[0]) {
                Some(Value::Set(s)) => {
                    if s.is_empty() {
                        Ok(None)
                    } else {
                        let n = rand::thread_rng().gen_range(0..s.len());
                        let member = s.iter().nth(n).cloned();
                        if let Some(ref m) = member {
                            s.remove(&m[..]);
                        }
                        Ok(member)
                    }
                }
                Some(_) => Err(()),
                None => Ok(None),
            }
        };
        match popped {
            Ok(Some(member)) => {
                handle.add_dirty(1);
                con.write_bulk(&member).await?;
            }
            Ok(None) => con.write_raw(groups::NIL).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `SINTER` query
    fn sinter(handle, con, client, act) {
        sinter_generic(handle, con, client, act, None).await
    }
    /// Run an `SINTERSTORE` query
    fn sinterstore(handle, con, client, act) {
        sinter_generic(handle, con, client, &act[1..], Some(&act[0])).await
    }
    /// Run an `SUNION` query
    fn sunion(handle, con, client, act) {
        sunion_diff_generic(handle, con, client, act, None, SetOp::Union).await
    }
    /// Run an `SUNIONSTORE` query
    fn sunionstore(handle, con, client, act) {
        sunion_diff_generic(handle, con, client, &act[1..], Some(&act[0]), SetOp::Union).await
    }
    /// Run an `SDIFF` query: the first operand minus the rest
    fn sdiff(handle, con, client, act) {
        sunion_diff_generic(handle, con, client, act, None, SetOp::Diff).await
    }
    /// Run an `SDIFFSTORE` query
    fn sdiffstore(handle, con, client, act) {
        sunion_diff_generic(handle, con, client, &act[1..], Some(&act[0]), SetOp::Diff).await
    }
    /// Run an `SMEMBERS` query, which is `SINTER` with a single operand
    fn smembers(handle, con, client, act) {
        sinter_generic(handle, con, client, act, None).await
    }
);
