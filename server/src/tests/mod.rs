/*
 * Created on Sun Mar 19 2023
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

//! End-to-end command tests: raw request bytes in, raw reply bytes out,
//! through the same parser/dispatcher/action path a socket would take

use crate::actions::ActionError;
use crate::config::ServerConfig;
use crate::corestore::Corestore;
use crate::dbnet::connection::{Connection, QueryResult};
use crate::dbnet::ClientState;
use crate::queryengine;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

fn store() -> Corestore {
    Corestore::new(ServerConfig::default())
}

/// Push one raw request through the full dispatch path and collect the
/// raw reply bytes
async fn issue(handle: &Corestore, client: &mut ClientState, request: &[u8]) -> Vec<u8> {
    let (local, mut remote) = tokio::io::duplex(1 << 16);
    let mut con = Connection::new(local, true);
    remote.write_all(request).await.unwrap();
    match con.read_query().await.unwrap() {
        QueryResult::Q(query) => {
            match queryengine::execute_simple(handle, &mut con, client, query).await {
                Ok(_) => (),
                Err(ActionError::ActionError(e)) => con.write_raw(e).await.unwrap(),
                Err(ActionError::IoError(e)) => panic!("i/o error in test: {}", e),
            }
            con.flush().await.unwrap();
        }
        QueryResult::Disconnected => panic!("disconnected before a query was parsed"),
    }
    drop(con);
    let mut reply = Vec::new();
    remote.read_to_end(&mut reply).await.unwrap();
    reply
}

macro_rules! assert_reply {
    ($handle:expr, $client:expr, $req:expr, $expected:expr) => {
        let reply = issue($handle, $client, $req).await;
        assert_eq!(
            reply,
            $expected.to_vec(),
            "request {:?} replied {:?}",
            String::from_utf8_lossy($req),
            String::from_utf8_lossy(&reply)
        );
    };
}

#[tokio::test]
async fn set_then_get() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(&handle, &mut client, b"SET foo 3\r\nbar\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"GET foo\r\n", b"$3\r\nbar\r\n");
    assert_eq!(handle.dirty(), 1);
}

#[tokio::test]
async fn counters() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(&handle, &mut client, b"INCR ctr\r\n", b":1\r\n");
    assert_reply!(&handle, &mut client, b"INCRBY ctr 10\r\n", b":11\r\n");
    assert_reply!(&handle, &mut client, b"DECR ctr\r\n", b":10\r\n");
    assert_reply!(&handle, &mut client, b"DECRBY ctr 4\r\n", b":6\r\n");
}

#[tokio::test]
async fn list_push_range_trim() {
    let handle = store();
    let mut client = ClientState::new();
    for elem in ["a", "b", "c"] {
        let req = format!("RPUSH L 1\r\n{}\r\n", elem);
        assert_reply!(&handle, &mut client, req.as_bytes(), b"+OK\r\n");
    }
    assert_reply!(
        &handle,
        &mut client,
        b"LRANGE L 0 -1\r\n",
        b"*3\r\n$1\r\na\r\n$1\r\nb\r\n$1\r\nc\r\n"
    );
    assert_reply!(&handle, &mut client, b"LTRIM L 1 -1\r\n", b"+OK\r\n");
    assert_reply!(
        &handle,
        &mut client,
        b"LRANGE L 0 -1\r\n",
        b"*2\r\n$1\r\nb\r\n$1\r\nc\r\n"
    );
    assert_reply!(&handle, &mut client, b"LLEN L\r\n", b":2\r\n");
    assert_reply!(&handle, &mut client, b"LPOP L\r\n", b"$1\r\nb\r\n");
}

#[tokio::test]
async fn set_intersection() {
    let handle = store();
    let mut client = ClientState::new();
    for (key, member) in [("S", "x"), ("S", "y"), ("T", "y"), ("T", "z")] {
        let req = format!("SADD {} 1\r\n{}\r\n", key, member);
        assert_reply!(&handle, &mut client, req.as_bytes(), b":1\r\n");
    }
    assert_reply!(
        &handle,
        &mut client,
        b"SINTER S T\r\n",
        b"*1\r\n$1\r\ny\r\n"
    );
    // a missing operand empties the intersection entirely
    assert_reply!(&handle, &mut client, b"SINTER S missing\r\n", b"*-1\r\n");
    assert_reply!(&handle, &mut client, b"SCARD S\r\n", b":2\r\n");
}

#[tokio::test]
async fn expiry_end_to_end() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(&handle, &mut client, b"SET k 1\r\nv\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"EXPIRE k 1\r\n", b":1\r\n");
    // a second EXPIRE may not overwrite the deadline
    assert_reply!(&handle, &mut client, b"EXPIRE k 100\r\n", b":0\r\n");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_reply!(&handle, &mut client, b"GET k\r\n", b"$-1\r\n");
    assert_reply!(&handle, &mut client, b"EXISTS k\r\n", b":0\r\n");
}

#[tokio::test]
async fn type_and_keys() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(&handle, &mut client, b"SET a 1\r\n1\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"RPUSH l 1\r\nx\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"TYPE a\r\n", b"+string\r\n");
    assert_reply!(&handle, &mut client, b"TYPE l\r\n", b"+list\r\n");
    assert_reply!(&handle, &mut client, b"TYPE nope\r\n", b"+none\r\n");
    // KEYS replies one space-joined bulk
    assert_reply!(&handle, &mut client, b"KEYS a*\r\n", b"$1\r\na\r\n");
}

#[tokio::test]
async fn protocol_level_failures() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(
        &handle,
        &mut client,
        b"NOSUCH cmd\r\n",
        b"-ERR unknown command\r\n"
    );
    assert_reply!(
        &handle,
        &mut client,
        b"GET\r\n",
        b"-ERR wrong number of arguments\r\n"
    );
    assert_reply!(&handle, &mut client, b"SET k 1\r\nv\r\n", b"+OK\r\n");
    assert_reply!(
        &handle,
        &mut client,
        b"LPUSH k 1\r\nx\r\n",
        b"-ERR Operation against a key holding the wrong kind of value\r\n"
    );
    assert_reply!(&handle, &mut client, b"LSET k 0 1\r\nx\r\n", b"-ERR Operation against a key holding the wrong kind of value\r\n");
}

#[tokio::test]
async fn select_moves_the_session() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(&handle, &mut client, b"SET k 1\r\nv\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"SELECT 1\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"GET k\r\n", b"$-1\r\n");
    assert_reply!(&handle, &mut client, b"DBSIZE\r\n", b":0\r\n");
    assert_reply!(&handle, &mut client, b"SELECT 99\r\n", b"-ERR invalid DB index\r\n");
    assert_reply!(&handle, &mut client, b"SELECT 0\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"GET k\r\n", b"$1\r\nv\r\n");
    // MOVE relocates across databases
    assert_reply!(&handle, &mut client, b"MOVE k 1\r\n", b":1\r\n");
    assert_reply!(&handle, &mut client, b"EXISTS k\r\n", b":0\r\n");
    assert_reply!(&handle, &mut client, b"SELECT 1\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"GET k\r\n", b"$1\r\nv\r\n");
}

#[tokio::test]
async fn auth_gates_everything_but_auth() {
    let mut cfg = ServerConfig::default();
    cfg.requirepass = Some("sekrit".to_owned());
    let handle = Corestore::new(cfg);
    let mut client = ClientState::new();
    assert_reply!(
        &handle,
        &mut client,
        b"GET k\r\n",
        b"-ERR operation not permitted\r\n"
    );
    assert_reply!(
        &handle,
        &mut client,
        b"AUTH wrong\r\n",
        b"-ERR invalid password\r\n"
    );
    assert_reply!(&handle, &mut client, b"AUTH sekrit\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"GET k\r\n", b"$-1\r\n");
}

#[tokio::test]
async fn sort_with_limit_and_by() {
    let handle = store();
    let mut client = ClientState::new();
    for n in ["3", "1", "2"] {
        let req = format!("RPUSH L 1\r\n{}\r\n", n);
        assert_reply!(&handle, &mut client, req.as_bytes(), b"+OK\r\n");
    }
    assert_reply!(
        &handle,
        &mut client,
        b"SORT L\r\n",
        b"*3\r\n$1\r\n1\r\n$1\r\n2\r\n$1\r\n3\r\n"
    );
    assert_reply!(
        &handle,
        &mut client,
        b"SORT L DESC\r\n",
        b"*3\r\n$1\r\n3\r\n$1\r\n2\r\n$1\r\n1\r\n"
    );
    assert_reply!(
        &handle,
        &mut client,
        b"SORT L LIMIT 0 2\r\n",
        b"*2\r\n$1\r\n1\r\n$1\r\n2\r\n"
    );
    // per-element weights: w_1=30 w_2=20 w_3=10 inverts the order
    for (k, v) in [("w_1", "30"), ("w_2", "20"), ("w_3", "10")] {
        let req = format!("SET {} {}\r\n{}\r\n", k, v.len(), v);
        assert_reply!(&handle, &mut client, req.as_bytes(), b"+OK\r\n");
    }
    assert_reply!(
        &handle,
        &mut client,
        b"SORT L BY w_*\r\n",
        b"*3\r\n$1\r\n3\r\n$1\r\n2\r\n$1\r\n1\r\n"
    );
    // GET projects through a pattern; missing lookups turn into nils
    assert_reply!(
        &handle,
        &mut client,
        b"SORT L LIMIT 0 2 GET w_*\r\n",
        b"*2\r\n$2\r\n30\r\n$2\r\n20\r\n"
    );
    assert_reply!(
        &handle,
        &mut client,
        b"SORT L BADOPT\r\n",
        b"-ERR syntax error\r\n"
    );
}

#[tokio::test]
async fn rename_and_del() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(&handle, &mut client, b"SET a 1\r\nv\r\n", b"+OK\r\n");
    assert_reply!(
        &handle,
        &mut client,
        b"RENAME a a\r\n",
        b"-ERR source and destination objects are the same\r\n"
    );
    assert_reply!(&handle, &mut client, b"RENAME a b\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"RENAME nope x\r\n", b"-ERR no such key\r\n");
    assert_reply!(&handle, &mut client, b"SET c 1\r\nw\r\n", b"+OK\r\n");
    assert_reply!(&handle, &mut client, b"RENAMENX b c\r\n", b":0\r\n");
    assert_reply!(&handle, &mut client, b"DEL b c nope\r\n", b":2\r\n");
}

#[tokio::test]
async fn setnx_and_getset() {
    let handle = store();
    let mut client = ClientState::new();
    assert_reply!(&handle, &mut client, b"SETNX k 1\r\na\r\n", b":1\r\n");
    assert_reply!(&handle, &mut client, b"SETNX k 1\r\nb\r\n", b":0\r\n");
    assert_reply!(&handle, &mut client, b"GETSET k 1\r\nc\r\n", b"$1\r\na\r\n");
    assert_reply!(&handle, &mut client, b"GET k\r\n", b"$1\r\nc\r\n");
    assert_reply!(
        &handle,
        &mut client,
        b"MGET k nope\r\n",
        b"*2\r\n$1\r\nc\r\n$-1\r\n"
    );
}
