/*
 * Created on Thu Mar 09 2023
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

//! String value commands

use crate::corestore::{Corestore, Data, Value};
use crate::dbnet::connection::Connection;
use crate::dbnet::ClientState;
use crate::protocol::responses::groups;
use crate::util;
use tokio::io::{AsyncRead, AsyncWrite};

async fn set_generic<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    act: &[Data],
    nx: bool,
) -> crate::actions::ActionResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let key = act[0].clone();
    let val = handle.intern(act[1].clone());
    let stored = {
        let mut ks = handle.db(client.db).write();
        if nx && ks.contains(&key) {
            false
        } else {
            ks.put(key, Value::Str(val));
            true
        }
    };
    if stored {
        handle.add_dirty(1);
        con.write_raw(if nx { groups::CONE } else { groups::OK })
            .await?;
    } else {
        con.write_raw(groups::CZERO).await?;
    }
    Ok(())
}

async fn incr_decr_generic<T>(
    handle: &Corestore,
    con: &mut Connection<T>,
    client: &mut ClientState,
    act: &[Data],
    incr: i64,
) -> crate::actions::ActionResult<()>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    let key = act[0].clone();
    let newval = {
        let mut ks = handle.db(client.db).write();
        let current = match ks.lookup_write(&key) {
            Some(Value::Str(d)) => util::parse_i64_loose(d),
            // a non-string value counts as zero here, as it always has
            Some(_) => 0,
            None => 0,
        };
        let newval = current.wrapping_add(incr);
        let data = handle.intern(Data::from_string(newval.to_string()));
        ks.put(key, Value::Str(data));
        newval
    };
    handle.add_dirty(1);
    con.write_int(newval).await?;
    Ok(())
}

action!(
    /// Run a `GET` query
    fn get(handle, con, client, act) {
        let found = {
            let mut ks = handle.db(client.db).write();
            match ks.lookup_read(&act[0], util::unix_now()) {
                Some(Value::Str(d)) => Ok(Some(d.clone())),
                Some(_) => Err(()),
                None => Ok(None),
            }
        };
        match found {
            Ok(Some(d)) => con.write_bulk(&d).await?,
            Ok(None) => con.write_raw(groups::NIL).await?,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        }
        Ok(())
    }
    /// Run a `SET` query
    fn set(handle, con, client, act) {
        set_generic(handle, con, client, act, false).await
    }
    /// Run a `SETNX` query
    fn setnx(handle, con, client, act) {
        set_generic(handle, con, client, act, true).await
    }
    /// Run a `GETSET` query: reply with the old value, then overwrite
    fn getset(handle, con, client, act) {
        let key = act[0].clone();
        let val = handle.intern(act[1].clone());
        let old = {
            let mut ks = handle.db(client.db).write();
            let old = match ks.lookup_read(&key, util::unix_now()) {
                Some(Value::Str(d)) => Ok(Some(d.clone())),
                Some(_) => Err(()),
                None => Ok(None),
            };
            if old.is_ok() {
                ks.put(key, Value::Str(val));
            }
            old
        };
        let old = match old {
            Ok(old) => old,
            Err(()) => return util::err(groups::WRONGTYPE_ERR),
        };
        handle.add_dirty(1);
        match old {
            Some(d) => con.write_bulk(&d).await?,
            None => con.write_raw(groups::NIL).await?,
        }
        Ok(())
    }
    /// Run an `MGET` query
    fn mget(handle, con, client, act) {
        let values: Vec<Option<Data>> = {
            let mut ks = handle.db(client.db).write();
            let now = util::unix_now();
            act.iter()
                .map(|key| match ks.lookup_read(key, now) {
                    Some(Value::Str(d)) => Some(d.clone()),
                    // missing and mistyped keys both read as null
                    _ => None,
                })
                .collect()
        };
        con.write_mbulk_header(values.len()).await?;
        for val in values {
            match val {
                Some(d) => con.write_bulk(&d).await?,
                None => con.write_raw(groups::NIL).await?,
            }
        }
        Ok(())
    }
    /// Run an `INCR` query
    fn incr(handle, con, client, act) {
        incr_decr_generic(handle, con, client, act, 1).await
    }
    /// Run a `DECR` query
    fn decr(handle, con, client, act) {
        incr_decr_generic(handle, con, client, act, -1).await
    }
    /// Run an `INCRBY` query
    fn incrby(handle, con, client, act) {
        let delta = util::parse_i64_loose(&act[1]);
        incr_decr_generic(handle, con, client, act, delta).await
    }
    /// Run a `DECRBY` query
    fn decrby(handle, con, client, act) {
        let delta = util::parse_i64_loose(&act[1]);
        incr_decr_generic(handle, con, client, act, delta.wrapping_neg()).await
    }
);
