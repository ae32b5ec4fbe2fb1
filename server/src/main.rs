/*
 * Created on Sat Feb 25 2023
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

//! # Rubra
//!
//! `rubrad` is the Rubra database server: an in-memory key/value store
//! speaking a line-oriented TCP protocol, with periodic binary
//! snapshots and single-master replication. See the modules for the
//! respective subsystems.

use crate::config::ServerConfig;
use crate::corestore::Corestore;
use env_logger::{Builder, Target};
use librubra::util::terminal;
use librubra::{URL, VERSION};
use std::env;
use std::fs;
use std::process;
use std::thread;
use std::time;

mod actions;
mod config;
mod corestore;
mod dbnet;
mod diskstore;
mod protocol;
mod queryengine;
mod replication;
mod services;
#[cfg(test)]
mod tests;
mod util;

#[cfg(all(not(target_env = "msvc"), not(miri)))]
use jemallocator::Jemalloc;

#[cfg(all(not(target_env = "msvc"), not(miri)))]
#[global_allocator]
/// Jemallocator - the default memory allocator for platforms other than msvc;
/// the `maxmemory` accounting reads its allocated-bytes statistic
static GLOBAL: Jemalloc = Jemalloc;

/// The terminal art shown on startup
static TEXT: &str = "
██████  ██    ██ ██████  ██████   █████
██   ██ ██    ██ ██   ██ ██   ██ ██   ██
██████  ██    ██ ██████  ██████  ███████
██   ██ ██    ██ ██   ██ ██   ██ ██   ██
██   ██  ██████  ██████  ██   ██ ██   ██
";

fn main() {
    let cfg = match config::resolve(env::args().nth(1).as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("*** FATAL CONFIG FILE ERROR *** {}", e);
            process::exit(0x01);
        }
    };
    init_logging(&cfg);
    if cfg.daemonize {
        #[cfg(unix)]
        if let Err(e) = daemonize() {
            log::error!("Startup failure: failed to daemonize: {}", e);
            process::exit(0x01);
        }
        #[cfg(not(unix))]
        log::warn!("daemonize is not supported on this platform; continuing in the foreground");
        write_pid_file(&cfg.pidfile);
    } else {
        println!("Rubra v{} | {}\n{}", VERSION, URL, TEXT);
    }
    if let Err(e) = env::set_current_dir(&cfg.dir) {
        log::error!("Startup failure: can't chdir to '{}': {}", cfg.dir, e);
        process::exit(0x01);
    }
    diskstore::remove_stale_temp_files();
    let db = Corestore::new(cfg.clone());
    match diskstore::read_from_disk(&cfg.dbfilename, cfg.databases) {
        Ok(Some(dump)) => {
            db.install_dump(dump);
            log::info!("DB loaded from disk");
        }
        Ok(None) => (),
        Err(e) => {
            log::error!("Fatal error loading the DB: {}", e);
            process::exit(0x01);
        }
    }
    // Start the server, which asynchronously waits for a CTRL+C signal
    // which will safely shut it down
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("server")
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(dbnet::run(db.clone(), tokio::signal::ctrl_c()));
    // Make sure all background workers terminate
    drop(runtime);
    if let Err(e) = result {
        log::error!("Server failed with error: {}", e);
        process::exit(0x01);
    }
    loop {
        // Keep looping until the in-memory keyspace makes it to disk
        let snapshot = db.take_snapshot();
        match diskstore::write_to_disk(&cfg.dbfilename, &snapshot, || false) {
            Ok(()) => {
                log::info!("Successfully saved data to disk");
                break;
            }
            Err(e) => {
                log::error!(
                    "Failed to write data with error '{}'. Attempting to retry in 10s",
                    e
                );
                thread::sleep(time::Duration::from_secs(10));
            }
        }
    }
    if cfg.daemonize {
        let _ = fs::remove_file(&cfg.pidfile);
    }
    let _ = terminal::write_info("Goodbye :)\n");
}

/// Wire up the logger: level from the config (overridable through the
/// `RUBRA_LOG` filter spec), sink from the `logfile` directive
fn init_logging(cfg: &ServerConfig) {
    let mut builder = Builder::new();
    match env::var("RUBRA_LOG") {
        Ok(filters) => {
            builder.parse_filters(&filters);
        }
        Err(_) => {
            builder.filter_level(cfg.loglevel.to_filter());
        }
    }
    if let Some(ref path) = cfg.logfile {
        match fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => {
                eprintln!("Can't open log file '{}': {}; logging to stdout", path, e);
            }
        }
    }
    builder.init();
}

fn write_pid_file(path: &str) {
    if let Err(e) = fs::write(path, process::id().to_string()) {
        log::warn!("Can't write pid file '{}': {}", path, e);
    }
}

#[cfg(unix)]
/// Classic double-step daemonization: fork, detach from the controlling
/// terminal, point the standard streams at /dev/null
fn daemonize() -> std::io::Result<()> {
    // SAFETY: single-threaded at this point; the runtime isn't up yet
    unsafe {
        match libc::fork() {
            -1 => return Err(std::io::Error::last_os_error()),
            0 => (),
            _ => process::exit(0),
        }
        if libc::setsid() == -1 {
            return Err(std::io::Error::last_os_error());
        }
        let devnull = libc::open(b"/dev/null\0".as_ptr().cast(), libc::O_RDWR);
        if devnull != -1 {
            libc::dup2(devnull, libc::STDIN_FILENO);
            libc::dup2(devnull, libc::STDOUT_FILENO);
            libc::dup2(devnull, libc::STDERR_FILENO);
            if devnull > libc::STDERR_FILENO {
                libc::close(devnull);
            }
        }
    }
    Ok(())
}
