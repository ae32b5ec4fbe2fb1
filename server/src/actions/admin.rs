/*
 * Created on Mon Mar 13 2023
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

//! Server administration commands

use crate::corestore::Value;
use crate::protocol::responses::groups;
use crate::replication::LinkState;
use crate::services;
use crate::util;
use std::sync::atomic::Ordering;

action!(
    /// Respond to a `PING`
    fn ping(_handle, con, _client, _act) {
        con.write_raw(groups::PONG).await?;
        Ok(())
    }
    /// Respond to an `ECHO`
    fn echo(_handle, con, _client, act) {
        con.write_bulk(&act[0]).await?;
        Ok(())
    }
    /// Run an `AUTH` query
    fn auth(handle, con, client, act) {
        let good = match handle.cfg().requirepass {
            Some(ref pass) => &act[0][..] == pass.as_bytes(),
            None => true,
        };
        client.authenticated = good;
        if good {
            con.write_raw(groups::OK).await?;
        } else {
            return util::err(groups::INVALID_PASSWORD);
        }
        Ok(())
    }
    /// Run a `SAVE` query: a synchronous snapshot
    fn save(handle, con, _client, _act) {
        if handle.bgsave_in_progress() {
            return util::err(groups::BGSAVE_IN_PROGRESS);
        }
        match services::bgsave::save_sync(handle).await {
            Ok(()) => con.write_raw(groups::OK).await?,
            Err(e) => {
                log::error!("SAVE failed with error: '{}'", e);
                return util::err(groups::ERR);
            }
        }
        Ok(())
    }
    /// Run a `BGSAVE` query
    fn bgsave(handle, con, _client, _act) {
        if handle.bgsave_in_progress() {
            return util::err(groups::BGSAVE_ALREADY_IN_PROGRESS);
        }
        if services::bgsave::begin_background_save(handle) {
            con.write_raw(groups::OK).await?;
        } else {
            return util::err(groups::UNABLE_TO_BGSAVE);
        }
        Ok(())
    }
    /// Run a `LASTSAVE` query
    fn lastsave(handle, con, _client, _act) {
        con.write_int(handle.lastsave() as i64).await?;
        Ok(())
    }
    /// Run a `SHUTDOWN` query: snapshot synchronously and exit
    fn shutdown(handle, con, _client, _act) {
        log::warn!("User requested shutdown, saving DB...");
        if handle.bgsave_in_progress() {
            // a concurrent background writer could clobber the snapshot
            // we are about to take; wave it off first
            log::warn!("There is a live background save. Aborting it!");
            handle.request_save_abort();
        }
        match services::bgsave::save_sync(handle).await {
            Ok(()) => {
                if handle.cfg().daemonize {
                    let _ = std::fs::remove_file(&handle.cfg().pidfile);
                }
                log::warn!("{} bytes used at exit", util::mem::used_memory());
                log::warn!("Server exit now, bye bye...");
                std::process::exit(1);
            }
            Err(e) => {
                log::warn!("Error trying to save the DB, can't exit: '{}'", e);
                return util::err(groups::CANT_QUIT_SAVE_ERR);
            }
        }
    }
    /// Run an `INFO` query
    fn info(handle, con, _client, _act) {
        let stats = handle.stats();
        let uptime = util::unix_now().saturating_sub(stats.starttime);
        let slaves = handle.repl().slave_count();
        let clients = stats.clients.load(Ordering::Relaxed).saturating_sub(slaves);
        let master = handle.repl().master();
        let mut info = format!(
            "rubra_version:{}\r\n\
             uptime_in_seconds:{}\r\n\
             uptime_in_days:{}\r\n\
             connected_clients:{}\r\n\
             connected_slaves:{}\r\n\
             used_memory:{}\r\n\
             changes_since_last_save:{}\r\n\
             bgsave_in_progress:{}\r\n\
             last_save_time:{}\r\n\
             total_connections_received:{}\r\n\
             total_commands_processed:{}\r\n\
             role:{}\r\n",
            librubra::VERSION,
            uptime,
            uptime / (3600 * 24),
            clients,
            slaves,
            handle.used_memory(),
            handle.dirty(),
            handle.bgsave_in_progress() as u8,
            handle.lastsave(),
            stats.numconnections.load(Ordering::Relaxed),
            stats.numcommands.load(Ordering::Relaxed),
            if master.is_some() { "slave" } else { "master" },
        );
        if let Some((host, port)) = master {
            let link = if handle.repl().link_state() == LinkState::Connected {
                "up"
            } else {
                "down"
            };
            info.push_str(&format!(
                "master_host:{}\r\nmaster_port:{}\r\nmaster_link_status:{}\r\n",
                host, port, link
            ));
        }
        for (i, db) in handle.dbs().iter().enumerate() {
            let keys = db.len();
            let vkeys = db.expires_len();
            if keys > 0 || vkeys > 0 {
                info.push_str(&format!("db{}: keys={},expires={}\r\n", i, keys, vkeys));
            }
        }
        con.write_bulk(info.as_bytes()).await?;
        Ok(())
    }
    /// Run a `DEBUG` query: `SEGFAULT` or `OBJECT <key>`
    fn debug(handle, con, client, act) {
        if act[0].eq_ignore_ascii_case(b"segfault") {
            // deliberately take the whole process down, stack dump and all
            std::process::abort();
        } else if act[0].eq_ignore_ascii_case(b"object") && act.len() == 2 {
            let details = {
                let mut ks = handle.db(client.db).write();
                ks.lookup_read(&act[1], util::unix_now()).map(|val| match val {
                    Value::Str(d) => format!("Key type:string bytes:{}", d.len()),
                    Value::List(l) => format!("Key type:list elements:{}", l.len()),
                    Value::Set(s) => format!("Key type:set elements:{}", s.len()),
                })
            };
            match details {
                Some(line) => con.write_status(&line).await?,
                None => return util::err(groups::NOKEY_ERR),
            }
        } else {
            return util::err(groups::DEBUG_SYNTAX_ERR);
        }
        Ok(())
    }
    /// Run a `SLAVEOF` query: repoint (or drop) this server's master
    fn slaveof(handle, con, _client, act) {
        if act[0].eq_ignore_ascii_case(b"no") && act[1].eq_ignore_ascii_case(b"one") {
            handle.repl().set_master(None);
            log::info!("MASTER MODE enabled (user request)");
        } else {
            let host = String::from_utf8_lossy(&act[0]).into_owned();
            let port = util::parse_i64_loose(&act[1]);
            if port <= 0 || port > u16::MAX as i64 {
                return util::err(groups::SYNTAX_ERR);
            }
            log::info!("SLAVE OF {}:{} enabled (user request)", host, port);
            handle.repl().set_master(Some((host, port as u16)));
        }
        con.write_raw(groups::OK).await?;
        Ok(())
    }
);
