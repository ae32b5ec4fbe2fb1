/*
 * Created on Fri Mar 10 2023
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

//! List value commands

use crate::corestore::{Corestore, Data, Value};
use crate::dbnet::connection::Connection;
use crate::dbnet::ClientState;
use crate::protocol::responses::groups;
use crate::util;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Clone, Copy, PartialEq)]
enum End {
    Head,
    Tail,
}

/// Clamp a possibly-negative index pair against a list of length `len`.
/// Returns `None` when the range selects nothing.
fn clamp_range(mut start: i64, mut end: i64, len: i64) -> Option<(usize, usize)> {
    if start < 0 {
        start += len;
    }
    if end < 0 {
        end += len;
    }
    start = start.max(0);
    end = end.max(0);
    if start > end || start >= len {
        return None;
    }
    if end >= len {
        end = len - 1;
    }
    Some((start as usize, end as usize))
}

async fn push_generic<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    act: &[Data],
    end: End,
) -> crate::actions::ActionResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let key = act[0].clone();
    let elem = handle.intern(act[1].clone());
    let pushed = {
        let mut ks = handle.db(client.db).write();
        match ks.lookup_write(&key) {
            Some(Value::List(list)) => {
                match end {
                    End::Head => list.push_front(elem),
                    End::Tail => list.push_back(elem),
                }
                true
            }
            Some(_) => false,
            None => {
                let mut list = VecDeque::new();
                list.push_back(elem);
                ks.put(key, Value::List(list));
                true
            }
        }
    };
    if !pushed {
        return util::err(groups::WRONGTYPE_ERR);
    }
    handle.add_dirty(1);
    con.write_raw(groups::OK).await?;
    Ok(())
}

async fn pop_generic<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    act: &[Data],
    end: End,
) -> crate::actions::ActionResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let popped = {
        let mut ks = handle.db(client.db).write();
        match ks.lookup_write(&act[0]) {
            Some(Value::List(list)) => Ok(match end {
                End::Head => list.pop_front(),
                End::Tail => list.pop_back(),
            }),
            Some(_) => Err(()),
            None => Ok(None),
        }
    };
    match popped {
        Ok(Some(elem)) => {
            handle.add_dirty(1);
            con.write_bulk(&elem).await?;
        }
        Ok(None) => con.write_raw(groups::NIL).await?,
        Err(()) => return util::err(groups::WRONGTYPE_ERR),
    }
    Ok(())
}

action!(
    /// Run an `LPUSH` query
    fn lpush(handle, con, client, act) {
        push_generic(handle, con, client, act, End::Head).await
    }
    /// Run an `RPUSH` query
    fn rpush(handle, con, client, act) {
        push_generic(handle, con, client, act, End::Tail).await
    }
    /// Run an `LPOP` query
    fn lpop(handle, con, client, act) {
        pop_generic(handle, con, client, act, End::Head).await
    }
    /// Run an `RPOP` query
    fn rpop(handle, con, client, act) {
        pop_generic(handle, con, client, act, End::Tail).await
    }
    /// Run an `LLEN` query
    fn llen(handle, con, client, act) {
        let len = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_read(&act[0], util::unix_now()) {
                Some(Value::List(list)) => Ok(Some(list.len())),
                Some(_) => Err(()),
                None => Ok(None),
            }
        };
        match len {
            Ok(Some(n)) => con.write_int(n as i64).await?,
            Ok(None) => con.write_raw(groups::CZERO).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `LINDEX` query. Negative indices count from the tail.
    fn lindex(handle, con, client, act) {
        let index = util::parse_i64_loose(&act[1]);
        let elem = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_read(&act[0], util::unix_now()) {
                Some(Value::List(list)) => {
                    let idx = if index < 0 {
                        index + list.len() as i64
                    } else {
                        index
                    };
                    if idx < 0 {
                        Ok(None)
                    } else {
                        Ok(list.get(idx as usize).cloned())
                    }
                }
                Some(_) => Err(()),
                None => Ok(None),
            }
        };
        match elem {
            Ok(Some(d)) => con.write_bulk(&d).await?,
            Ok(None) => con.write_raw(groups::NIL).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `LSET` query
    fn lset(handle, con, client, act) {
        let index = util::parse_i64_loose(&act[1]);
        let elem = handle.intern(act[2].clone());
        enum Outcome {
            Done,
            NoKey,
            WrongType,
            OutOfRange,
        }
        let outcome = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_write(&act[0]) {
                Some(Value::List(list)) => {
                    let idx = if index < 0 {
                        index + list.len() as i64
                    } else {
                        index
                    };
                    if idx < 0 || idx as usize >= list.len() {
                        Outcome::OutOfRange
                    } else {
                        list[idx as usize] = elem;
                        Outcome::Done
                    }
                }
                Some(_) => Outcome::WrongType,
                None => Outcome::NoKey,
            }
        };
        match outcome {
            Outcome::Done => {
                handle.add_dirty(1);
                con.write_raw(groups::OK).await?;
            }
            Outcome::NoKey => return util::err(groups::NOKEY_ERR),
            Outcome::WrongType => return util::err(groups::WRONGTYPE_ERR),
            Outcome::OutOfRange => return util::err(groups::OUT_OF_RANGE_ERR),
        }
        Ok(())
    }
    /// Run an `LRANGE` query. Both endpoints may be negative and both
    /// are clamped.
    fn lrange(handle, con, client, act) {
        let start = util::parse_i64_loose(&act[1]);
        let end = util::parse_i64_loose(&act[2]);
        let range = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_read(&act[0], util::unix_now()) {
                Some(Value::List(list)) => match clamp_range(start, end, list.len() as i64) {
                    Some((s, e)) => Ok(Some(
                        list.iter().skip(s).take(e - s + 1).cloned().collect::<Vec<Data>>(),
                    )),
                    None => Ok(Some(Vec::new())),
                },
                Some(_) => Err(()),
                None => Ok(None),
            }
        };
        match range {
            Ok(Some(items)) => {
                con.write_mbulk_header(items.len()).await?;
                for item in items {
                    con.write_bulk(&item).await?;
                }
            }
            Ok(None) => con.write_raw(groups::NIL_ARRAY).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `LTRIM` query: retain the inclusive range, drop the rest
    fn ltrim(handle, con, client, act) {
        let start = util::parse_i64_loose(&act[1]);
        let end = util::parse_i64_loose(&act[2]);
        let outcome = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_write(&act[0]) {
                Some(Value::List(list)) => {
                    match clamp_range(start, end, list.len() as i64) {
                        Some((s, e)) => {
                            list.drain(..s);
                            list.truncate(e - s + 1);
                        }
                        // nothing selected: the list empties out
                        None => list.clear(),
                    }
                    Ok(true)
                }
                Some(_) => Err(()),
                None => Ok(false),
            }
        };
        match outcome {
            Ok(true) => {
                handle.add_dirty(1);
                con.write_raw(groups::OK).await?;
            }
            Ok(false) => return util::err(groups::NOKEY_ERR),
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run an `LREM` query: remove up to `count` occurrences of the
    /// value, scanning from the tail when `count` is negative
    fn lrem(handle, con, client, act) {
        let count = util::parse_i64_loose(&act[1]);
        let target = &act[2];
        let removed = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_write(&act[0]) {
                Some(Value::List(list)) => {
                    let (limit, fromtail) = if count < 0 {
                        ((-count) as usize, true)
                    } else {
                        (count as usize, false)
                    };
                    let mut removed = 0usize;
                    let mut keep: VecDeque<Data> = VecDeque::with_capacity(list.len());
                    {
                        let mut feed = |elem: Data| {
                            if (limit == 0 || removed < limit) && elem[..] == target[..] {
                                removed += 1;
                            } else if fromtail {
                                keep.push_front(elem);
                            } else {
                                keep.push_back(elem);
                            }
                        };
                        if fromtail {
                            while let Some(e) = list.pop_back() {
                                feed(e);
                            }
                        } else {
                            while let Some(e) = list.pop_front() {
                                feed(e);
                            }
                        }
                    }
                    *list = keep;
                    Ok(Some(removed))
                }
                Some(_) => Err(()),
                None => Ok(None),
            }
        };
        match removed {
            Ok(Some(n)) => {
                handle.add_dirty(n as u64);
                con.write_int(n as i64).await?;
            }
            Ok(None) => con.write_raw(groups::CZERO).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
);

#[cfg(test)]
mod tests {
    use super::clamp_range;

    #[test]
    fn range_clamping() {
        // 0 -1 over a 3-list: everything
        assert_eq!(clamp_range(0, -1, 3), Some((0, 2)));
        // 1 -1: drop the head
        assert_eq!(clamp_range(1, -1, 3), Some((1, 2)));
        // out-of-range tail clamps
        assert_eq!(clamp_range(0, 99, 3), Some((0, 2)));
        // inverted or off-the-end ranges select nothing
        assert_eq!(clamp_range(2, 1, 3), None);
        assert_eq!(clamp_range(5, 9, 3), None);
        // strongly negative start clamps to the head
        assert_eq!(clamp_range(-99, 1, 3), Some((0, 1)));
    }
}
