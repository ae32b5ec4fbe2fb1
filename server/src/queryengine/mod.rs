/*
 * Created on Wed Mar 08 2023
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

//! # The query engine
//!
//! Takes a parsed query through the full gating pipeline (command
//! lookup, arity, bulk-body completion, memory pressure and the auth
//! gate), runs the action, and fans the command out to replicas and
//! monitors when it dirtied the keyspace.

use crate::actions::{self, ActionResult};
use crate::corestore::Corestore;
use crate::dbnet::connection::Connection;
use crate::dbnet::ClientState;
use crate::protocol::responses::groups;
use crate::protocol::{Query, MAX_BULK_SIZE};
use crate::util;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};

pub mod flags {
    /// plain single-line command
    pub const INLINE: u8 = 0;
    /// the last argument is a length-prefixed binary body
    pub const BULK: u8 = 1 << 0;
    /// refuse the command while over `maxmemory`
    pub const DENY_OOM: u8 = 1 << 1;
}

/// One row of the command table
pub struct CommandSpec {
    pub name: &'static str,
    /// positive: exact argument count (name included); negative: at
    /// least `-arity` arguments
    pub arity: i16,
    pub flags: u8,
}

macro_rules! cmd {
    ($name:literal, $arity:literal, $flags:expr) => {
        CommandSpec {
            name: $name,
            arity: $arity,
            flags: $flags,
        }
    };
}

use flags::{BULK, DENY_OOM, INLINE};

pub static COMMAND_TABLE: &[CommandSpec] = &[
    cmd!("get", 2, INLINE),
    cmd!("set", 3, BULK | DENY_OOM),
    cmd!("setnx", 3, BULK | DENY_OOM),
    cmd!("del", -2, INLINE),
    cmd!("exists", 2, INLINE),
    cmd!("incr", 2, INLINE | DENY_OOM),
    cmd!("decr", 2, INLINE | DENY_OOM),
    cmd!("mget", -2, INLINE),
    cmd!("rpush", 3, BULK | DENY_OOM),
    cmd!("lpush", 3, BULK | DENY_OOM),
    cmd!("rpop", 2, INLINE),
    cmd!("lpop", 2, INLINE),
    cmd!("llen", 2, INLINE),
    cmd!("lindex", 3, INLINE),
    cmd!("lset", 4, BULK | DENY_OOM),
    cmd!("lrange", 4, INLINE),
    cmd!("ltrim", 4, INLINE),
    cmd!("lrem", 4, BULK),
    cmd!("sadd", 3, BULK | DENY_OOM),
    cmd!("srem", 3, BULK),
    cmd!("smove", 4, BULK),
    cmd!("sismember", 3, BULK),
    cmd!("scard", 2, INLINE),
    cmd!("spop", 2, INLINE),
    cmd!("sinter", -2, INLINE | DENY_OOM),
    cmd!("sinterstore", -3, INLINE | DENY_OOM),
    cmd!("sunion", -2, INLINE | DENY_OOM),
    cmd!("sunionstore", -3, INLINE | DENY_OOM),
    cmd!("sdiff", -2, INLINE | DENY_OOM),
    cmd!("sdiffstore", -3, INLINE | DENY_OOM),
    cmd!("smembers", 2, INLINE),
    cmd!("incrby", 3, INLINE | DENY_OOM),
    cmd!("decrby", 3, INLINE | DENY_OOM),
    cmd!("getset", 3, BULK | DENY_OOM),
    cmd!("randomkey", 1, INLINE),
    cmd!("select", 2, INLINE),
    cmd!("move", 3, INLINE),
    cmd!("rename", 3, INLINE),
    cmd!("renamenx", 3, INLINE),
    cmd!("expire", 3, INLINE),
    cmd!("keys", 2, INLINE),
    cmd!("dbsize", 1, INLINE),
    cmd!("auth", 2, INLINE),
    cmd!("ping", 1, INLINE),
    cmd!("echo", 2, BULK),
    cmd!("save", 1, INLINE),
    cmd!("bgsave", 1, INLINE),
    cmd!("shutdown", 1, INLINE),
    cmd!("lastsave", 1, INLINE),
    cmd!("type", 2, INLINE),
    cmd!("sync", 1, INLINE),
    cmd!("flushdb", 1, INLINE),
    cmd!("flushall", 1, INLINE),
    cmd!("sort", -2, INLINE | DENY_OOM),
    cmd!("info", 1, INLINE),
    cmd!("monitor", 1, INLINE),
    cmd!("ttl", 2, INLINE),
    cmd!("slaveof", 3, INLINE),
    cmd!("debug", -2, INLINE),
];

lazy_static::lazy_static! {
    static ref COMMAND_LOOKUP: HashMap<&'static str, &'static CommandSpec> =
        COMMAND_TABLE.iter().map(|spec| (spec.name, spec)).collect();
}

/// Case-insensitive command table lookup
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    let lowered = name.to_ascii_lowercase();
    let name = std::str::from_utf8(&lowered).ok()?;
    COMMAND_LOOKUP.get(name).copied()
}

/// What the connection's run loop should do after a query
#[derive(Debug, PartialEq)]
pub enum Outcome {
    /// Keep reading queries
    Done,
    /// `QUIT`: close the session without a reply
    Quit,
    /// `SYNC`: this connection is now a replica link
    Slave,
    /// `MONITOR`: this connection now consumes the command feed
    Monitor,
}

/// Run one query end to end. Protocol-level failures come back as
/// `ActionError::ActionError` and it is on the caller to write them out;
/// I/O failures terminate the session.
pub async fn execute_simple<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    mut query: Query,
) -> ActionResult<Outcome>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    if query.argv.is_empty() {
        // blank line; nothing to do
        return Ok(Outcome::Done);
    }
    // apply under the shared side of the quiesce lock: a snapshot point
    // can then never fall between this command's mutation and its feed
    let _apply = handle.apply_shared().await;
    if handle.cfg().maxmemory > 0 {
        handle.free_memory_if_needed();
    }
    if query.argv[0].eq_ignore_ascii_case(b"quit") {
        return Ok(Outcome::Quit);
    }
    let spec = match lookup(&query.argv[0]) {
        Some(spec) => spec,
        None => return util::err(groups::UNKNOWN_COMMAND),
    };
    let argc = query.argv.len() as i16;
    if (spec.arity > 0 && argc != spec.arity) || argc < -spec.arity {
        return util::err(groups::WRONG_ARITY);
    }
    if spec.flags & flags::DENY_OOM != 0
        && handle.cfg().maxmemory > 0
        && util::mem::used_memory() > handle.cfg().maxmemory
    {
        return util::err(groups::OOM_ERR);
    }
    if spec.flags & flags::BULK != 0 {
        // the last inline token is the byte count of the real final
        // argument; await the body and swap it in
        let count = match query.argv.pop() {
            Some(tok) => util::parse_i64_loose(&tok),
            None => -1,
        };
        if count < 0 || count as usize > MAX_BULK_SIZE {
            return util::err(groups::INVALID_BULK_COUNT);
        }
        let body = con.read_bulk_body(count as usize).await?;
        query.argv.push(body);
    }
    if handle.cfg().requirepass.is_some() && !client.authenticated && spec.name != "auth" {
        return util::err(groups::NOT_PERMITTED);
    }
    handle
        .stats()
        .numcommands
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let dirty_before = handle.dirty();
    let act = &query.argv[1..];
    let mut outcome = Outcome::Done;
    match spec.name {
        "get" => actions::strings::get(handle, con, client, act).await?,
        "set" => actions::strings::set(handle, con, client, act).await?,
        "setnx" => actions::strings::setnx(handle, con, client, act).await?,
        "getset" => actions::strings::getset(handle, con, client, act).await?,
        "mget" => actions::strings::mget(handle, con, client, act).await?,
        "incr" => actions::strings::incr(handle, con, client, act).await?,
        "decr" => actions::strings::decr(handle, con, client, act).await?,
        "incrby" => actions::strings::incrby(handle, con, client, act).await?,
        "decrby" => actions::strings::decrby(handle, con, client, act).await?,
        "lpush" => actions::lists::lpush(handle, con, client, act).await?,
        "rpush" => actions::lists::rpush(handle, con, client, act).await?,
        "lpop" => actions::lists::lpop(handle, con, client, act).await?,
        "rpop" => actions::lists::rpop(handle, con, client, act).await?,
        "llen" => actions::lists::llen(handle, con, client, act).await?,
        "lindex" => actions::lists::lindex(handle, con, client, act).await?,
        "lset" => actions::lists::lset(handle, con, client, act).await?,
        "lrange" => actions::lists::lrange(handle, con, client, act).await?,
        "ltrim" => actions::lists::ltrim(handle, con, client, act).await?,
        "lrem" => actions::lists::lrem(handle, con, client, act).await?,
        "sadd" => actions::sets::sadd(handle, con, client, act).await?,
        "srem" => actions::sets::srem(handle, con, client, act).await?,
        "sismember" => actions::sets::sismember(handle, con, client, act).await?,
        "scard" => actions::sets::scard(handle, con, client, act).await?,
        "smove" => actions::sets::smove(handle, con, client, act).await?,
        "spop" => actions::sets::spop(handle, con, client, act).await?,
        "sinter" => actions::sets::sinter(handle, con, client, act).await?,
        "sinterstore" => actions::sets::sinterstore(handle, con, client, act).await?,
        "sunion" => actions::sets::sunion(handle, con, client, act).await?,
        "sunionstore" => actions::sets::sunionstore(handle, con, client, act).await?,
        "sdiff" => actions::sets::sdiff(handle, con, client, act).await?,
        "sdiffstore" => actions::sets::sdiffstore(handle, con, client, act).await?,
        "smembers" => actions::sets::smembers(handle, con, client, act).await?,
        "del" => actions::keyspace::del(handle, con, client, act).await?,
        "exists" => actions::keyspace::exists(handle, con, client, act).await?,
        "keys" => actions::keyspace::keys(handle, con, client, act).await?,
        "type" => actions::keyspace::type_cmd(handle, con, client, act).await?,
        "randomkey" => actions::keyspace::randomkey(handle, con, client, act).await?,
        "rename" => actions::keyspace::rename(handle, con, client, act).await?,
        "renamenx" => actions::keyspace::renamenx(handle, con, client, act).await?,
        "move" => actions::keyspace::move_cmd(handle, con, client, act).await?,
        "select" => actions::keyspace::select(handle, con, client, act).await?,
        "dbsize" => actions::keyspace::dbsize(handle, con, client, act).await?,
        "flushdb" => actions::keyspace::flushdb(handle, con, client, act).await?,
        "flushall" => actions::keyspace::flushall(handle, con, client, act).await?,
        "expire" => actions::keyspace::expire(handle, con, client, act).await?,
        "ttl" => actions::keyspace::ttl(handle, con, client, act).await?,
        "sort" => actions::sort::sort(handle, con, client, act).await?,
        "ping" => actions::admin::ping(handle, con, client, act).await?,
        "echo" => actions::admin::echo(handle, con, client, act).await?,
        "auth" => actions::admin::auth(handle, con, client, act).await?,
        "save" => actions::admin::save(handle, con, client, act).await?,
        "bgsave" => actions::admin::bgsave(handle, con, client, act).await?,
        "lastsave" => actions::admin::lastsave(handle, con, client, act).await?,
        "shutdown" => actions::admin::shutdown(handle, con, client, act).await?,
        "info" => actions::admin::info(handle, con, client, act).await?,
        "debug" => actions::admin::debug(handle, con, client, act).await?,
        "slaveof" => actions::admin::slaveof(handle, con, client, act).await?,
        "sync" => outcome = Outcome::Slave,
        "monitor" => outcome = Outcome::Monitor,
        _ => return util::err(groups::UNKNOWN_COMMAND),
    }
    // propagate: replicas get state-mutating commands, monitors get
    // everything
    if handle.dirty() > dirty_before && handle.repl().slave_count() > 0 {
        handle
            .repl()
            .feed_slaves(&query.argv, spec.flags & flags::BULK != 0, client.db);
    }
    if handle.repl().monitor_count() > 0 {
        handle
            .repl()
            .feed_monitors(&query.argv, spec.flags & flags::BULK != 0, client.db);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup(b"GET").unwrap().name, "get");
        assert_eq!(lookup(b"GeT").unwrap().name, "get");
        assert!(lookup(b"nosuchcmd").is_none());
    }

    #[test]
    fn every_table_row_is_reachable() {
        // the lookup map must cover the whole table
        for spec in COMMAND_TABLE {
            assert_eq!(lookup(spec.name.as_bytes()).unwrap().name, spec.name);
        }
    }

    #[test]
    fn bulk_commands_carry_the_flag() {
        for name in ["set", "setnx", "getset", "lset", "lrem", "sadd", "echo"] {
            assert!(lookup(name.as_bytes()).unwrap().flags & flags::BULK != 0);
        }
        for name in ["get", "del", "lpop", "sort"] {
            assert!(lookup(name.as_bytes()).unwrap().flags & flags::BULK == 0);
        }
    }
}
