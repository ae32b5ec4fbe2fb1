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

//! Database networking: the listener, per-connection handlers and the
//! graceful-shutdown plumbing

pub mod connection;
mod listener;

use crate::corestore::Corestore;
use crate::services;
use crate::util::error::{Error, RubraResult};
use core::future::Future;
use listener::Listener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};

/// The ceiling used when `maxclients` is left unlimited
pub const MAXIMUM_CONNECTION_LIMIT: usize = 50000;

/// Per-session state carried alongside the connection
#[derive(Debug)]
pub struct ClientState {
    /// index of the selected database
    pub db: usize,
    pub authenticated: bool,
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            db: 0,
            authenticated: false,
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

/// A wrapper around the shutdown broadcast. Once a signal is seen it
/// stays seen.
pub struct Terminator {
    terminated: bool,
    signal: broadcast::Receiver<()>,
}

impl Terminator {
    pub fn new(signal: broadcast::Receiver<()>) -> Self {
        Terminator {
            terminated: false,
            signal,
        }
    }
    pub fn is_termination_signal(&self) -> bool {
        self.terminated
    }
    pub async fn receive_signal(&mut self) {
        let _ = self.signal.recv().await;
        self.terminated = true;
    }
}

/// Bind, serve and block until the shutdown signal fires; returns once
/// every connection handler and background service has let go
pub async fn run(
    handle: Corestore,
    signal: impl Future<Output = std::io::Result<()>>,
) -> RubraResult<()> {
    let cfg = handle.cfg();
    let climit = if cfg.maxclients == 0 {
        MAXIMUM_CONNECTION_LIMIT
    } else {
        cfg.maxclients
    };
    let (signal_tx, _) = broadcast::channel::<()>(1);
    let (terminate_tx, mut terminate_rx) = mpsc::channel::<()>(1);
    tokio::spawn(services::cron::service(
        handle.clone(),
        Terminator::new(signal_tx.subscribe()),
    ));
    let listener = TcpListener::bind((cfg.host, cfg.port))
        .await
        .map_err(|e| Error::ioerror_extra(e, format!("binding to port {}", cfg.port)))?;
    log::info!("Server started on {}:{}", cfg.host, cfg.port);
    let mut listener = Listener {
        db: handle.clone(),
        listener,
        climit: Arc::new(Semaphore::new(climit)),
        signal: signal_tx.clone(),
        terminate_tx: terminate_tx.clone(),
    };
    tokio::select! {
        _ = listener.run() => {}
        _ = signal => {
            log::info!("Signalling all workers to shut down");
        }
    }
    drop(listener);
    // every handler holds a clone of `terminate_tx`; recv returns once
    // the last one is gone
    let _ = signal_tx.send(());
    drop(signal_tx);
    drop(terminate_tx);
    let _ = terminate_rx.recv().await;
    log::info!("Stopped accepting incoming connections");
    Ok(())
}
