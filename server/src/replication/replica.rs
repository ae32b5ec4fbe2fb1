/*
 * Created on Thu Mar 16 2023
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

//! Replica-side initial sync and feed application
//!
//! One attempt per maintenance tick while the link is down: connect,
//! send `SYNC`, stream the announced dump into a temp file, rename it
//! over the configured dump path, reload the keyspace from it and then
//! apply the master's feed as ordinary dispatch with replies silenced.
//! Any failure leaves the link in the must-connect state for the next
//! tick to retry.

use crate::actions::ActionError;
use crate::corestore::Corestore;
use crate::dbnet::connection::{Connection, QueryResult};
use crate::dbnet::ClientState;
use crate::diskstore;
use crate::queryengine;
use crate::util::error::{Error, RubraResult};
use std::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// One full sync attempt plus, on success, the feed-apply loop. Runs
/// until the link drops or a `SLAVEOF` supersedes this target.
pub async fn run_sync(handle: Corestore, host: String, port: u16, epoch: u64) {
    let stream = match initial_sync(&handle, &host, port).await {
        Ok(stream) => {
            log::info!("MASTER <-> SLAVE sync succeeded");
            handle.repl().finish_sync_attempt(epoch, true);
            stream
        }
        Err(e) => {
            log::warn!("MASTER <-> SLAVE sync failed: {}", e);
            handle.repl().finish_sync_attempt(epoch, false);
            return;
        }
    };
    let mut con = Connection::new(stream, handle.cfg().glueoutputbuf);
    con.silence_replies();
    let mut client = ClientState::new();
    // the feed is implicitly trusted; it never authenticates
    client.authenticated = true;
    loop {
        if handle.repl().epoch() != epoch {
            // SLAVEOF repointed or detached us mid-stream
            return;
        }
        match con.read_query().await {
            Ok(QueryResult::Q(query)) => {
                match queryengine::execute_simple(&handle, &mut con, &mut client, query).await {
                    Ok(_) => (),
                    // replies are silenced; a protocol-level error from
                    // the feed is just applied as a no-op
                    Err(ActionError::ActionError(_)) => (),
                    Err(ActionError::IoError(e)) => {
                        log::warn!("I/O error applying the master feed: {}", e);
                        break;
                    }
                }
            }
            Ok(QueryResult::Disconnected) => {
                log::warn!("Connection with MASTER lost");
                break;
            }
            Err(e) => {
                log::warn!("Error reading the master feed: {}", e);
                break;
            }
        }
    }
    handle.repl().finish_sync_attempt(epoch, false);
}

/// Read the `$<size>` line that precedes the dump bytes
async fn read_bulk_header(stream: &mut TcpStream) -> RubraResult<u64> {
    let mut line = Vec::with_capacity(16);
    let mut byte = [0u8; 1];
    loop {
        stream
            .read_exact(&mut byte)
            .await
            .map_err(|e| Error::ioerror_extra(e, "reading bulk count from MASTER"))?;
        if byte[0] == b'\n' {
            break;
        }
        if line.len() > 32 {
            return Err(Error::OtherError("malformed bulk count from MASTER".into()));
        }
        line.push(byte[0]);
    }
    if let [b'$', digits @ ..] = &line[..] {
        let digits = match digits {
            [rest @ .., b'\r'] => rest,
            rest => rest,
        };
        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::OtherError("malformed bulk count from MASTER".into()))
    } else {
        Err(Error::OtherError("malformed bulk count from MASTER".into()))
    }
}

async fn initial_sync(handle: &Corestore, host: &str, port: u16) -> RubraResult<TcpStream> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::ioerror_extra(e, "connecting to MASTER"))?;
    stream
        .write_all(b"SYNC \r\n")
        .await
        .map_err(|e| Error::ioerror_extra(e, "writing to MASTER"))?;
    let mut dumpsize = read_bulk_header(&mut stream).await?;
    log::info!("Receiving {} bytes data dump from MASTER", dumpsize);
    // spool the dump to a temp file, then swap it in atomically
    let tmp = diskstore::temp_dump_name();
    let spool = async {
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| Error::ioerror_extra(e, "opening the sync temp file"))?;
        let mut buf = vec![0u8; 16 * 1024];
        while dumpsize > 0 {
            let want = (dumpsize as usize).min(buf.len());
            let n = stream
                .read(&mut buf[..want])
                .await
                .map_err(|e| Error::ioerror_extra(e, "syncing with MASTER"))?;
            if n == 0 {
                return Err(Error::OtherError("premature EOF from MASTER".into()));
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| Error::ioerror_extra(e, "writing the sync temp file"))?;
            dumpsize -= n as u64;
        }
        file.sync_all()
            .await
            .map_err(|e| Error::ioerror_extra(e, "syncing the sync temp file"))?;
        Ok(())
    }
    .await;
    if let Err(e) = spool {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    let target = handle.cfg().dbfilename.clone();
    if let Err(e) = fs::rename(&tmp, &target) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::ioerror_extra(e, "renaming the synced dump"));
    }
    // out with the old keyspace, in with the master's
    handle.empty_all();
    let db_count = handle.db_count();
    let loaded = {
        let target = target.clone();
        tokio::task::spawn_blocking(move || diskstore::read_from_disk(&target, db_count))
            .await
            .map_err(|e| Error::OtherError(format!("load task failed: {}", e)))??
    };
    match loaded {
        Some(dump) => handle.install_dump(dump),
        None => return Err(Error::OtherError("synced dump vanished before load".into())),
    }
    Ok(stream)
}
