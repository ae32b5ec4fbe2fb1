/*
 * Created on Tue Mar 07 2023
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

use crate::actions::ActionError;
use crate::corestore::Corestore;
use crate::dbnet::connection::{Connection, QueryResult};
use crate::dbnet::ClientState;
use crate::protocol::responses::groups;
use crate::queryengine::{self, Outcome};
use crate::replication::master;
use std::cell::Cell;
use std::io::Result as IoResult;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time;

/// A backoff implementation for the accept loop
struct NetBackoff {
    c: Cell<u8>,
}

impl NetBackoff {
    const MAX_BACKOFF: u8 = 64;
    const fn new() -> Self {
        Self { c: Cell::new(1) }
    }
    async fn spin(&self) {
        time::sleep(Duration::from_secs(self.c.get() as _)).await;
        self.c.set(self.c.get() << 1);
    }
    fn should_disconnect(&self) -> bool {
        self.c.get() > Self::MAX_BACKOFF
    }
}

/// The TCP listener: accepts connections while permits last and spawns
/// a handler per connection
pub struct Listener {
    pub db: Corestore,
    pub listener: TcpListener,
    pub climit: Arc<Semaphore>,
    pub signal: broadcast::Sender<()>,
    pub terminate_tx: mpsc::Sender<()>,
}

impl Listener {
    async fn accept(&mut self) -> IoResult<TcpStream> {
        let backoff = NetBackoff::new();
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => return Ok(stream),
                Err(e) => {
                    if backoff.should_disconnect() {
                        return Err(e);
                    }
                }
            }
            backoff.spin().await;
        }
    }
    pub async fn run(&mut self) -> IoResult<()> {
        loop {
            /*
             Ignore accept errors until the backoff runs out: one bad
             handshake must not bring the whole server down, and logging
             each of them would just flood the log
            */
            let mut stream = match self.accept().await {
                Ok(stream) => stream,
                Err(_) => continue,
            };
            // over the client limit: tell the peer why and hang up
            let permit = match self.climit.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = stream.write_all(groups::MAX_CLIENTS).await;
                    continue;
                }
            };
            let mut chandle = ConnectionHandler::new(
                self.db.clone(),
                Connection::new(stream, self.db.cfg().glueoutputbuf),
                self.signal.subscribe(),
                self.terminate_tx.clone(),
            );
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = chandle.run().await {
                    log::error!("Error: {}", e);
                }
            });
        }
    }
}

/// A per-connection handler: reads queries, runs them, and follows the
/// session wherever a `QUIT`, `SYNC` or `MONITOR` takes it
pub struct ConnectionHandler {
    db: Corestore,
    con: Connection<TcpStream>,
    client: ClientState,
    termination_signal: broadcast::Receiver<()>,
    _term_sig_tx: mpsc::Sender<()>,
}

impl ConnectionHandler {
    pub fn new(
        db: Corestore,
        con: Connection<TcpStream>,
        termination_signal: broadcast::Receiver<()>,
        _term_sig_tx: mpsc::Sender<()>,
    ) -> Self {
        db.stats().numconnections.fetch_add(1, Ordering::Relaxed);
        db.stats().clients.fetch_add(1, Ordering::Relaxed);
        Self {
            db,
            con,
            client: ClientState::new(),
            termination_signal,
            _term_sig_tx,
        }
    }
    pub async fn run(&mut self) -> IoResult<()> {
        log::debug!("ConnectionHandler initialized to handle a remote client");
        let idle_timeout = self.db.cfg().timeout;
        loop {
            let packet = tokio::select! {
                pkt = self.con.read_query() => pkt,
                _ = self.termination_signal.recv() => {
                    return Ok(());
                }
                _ = time::sleep(Duration::from_secs(idle_timeout)), if idle_timeout > 0 => {
                    log::debug!("Closing idle client");
                    return Ok(());
                }
            };
            match packet {
                Ok(QueryResult::Q(query)) => {
                    let outcome = queryengine::execute_simple(
                        &self.db,
                        &mut self.con,
                        &mut self.client,
                        query,
                    )
                    .await;
                    match outcome {
                        Ok(Outcome::Done) => self.con.flush().await?,
                        Ok(Outcome::Quit) => return Ok(()),
                        Ok(Outcome::Slave) => {
                            log::info!("Slave ask for synchronization");
                            match master::attach_slave(&self.db) {
                                Ok(recv) => {
                                    return master::run_slave(&self.db, &mut self.con, recv).await;
                                }
                                Err(e) => {
                                    // no snapshot, no replica; stay a
                                    // normal client
                                    self.con.write_raw(e).await?;
                                    self.con.flush().await?;
                                }
                            }
                        }
                        Ok(Outcome::Monitor) => {
                            return master::run_monitor(&self.db, &mut self.con).await;
                        }
                        Err(ActionError::ActionError(e)) => {
                            self.con.write_raw(e).await?;
                            self.con.flush().await?;
                        }
                        Err(ActionError::IoError(e)) => return Err(e),
                    }
                }
                Ok(QueryResult::Disconnected) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        self.db.stats().clients.fetch_sub(1, Ordering::Relaxed);
    }
}
