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

//! Persistently stored data: dump writing with crash-safe replacement,
//! and dump loading at boot and after a replica bulk transfer

pub mod rdb;

use crate::util::error::{Error, RubraResult};
use rdb::DbDump;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A temp file name that can't collide with a concurrent writer in the
/// same directory
pub fn temp_dump_name() -> String {
    format!(
        "temp-{}.{}.rdb",
        process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Serialize `dbs` next to the target and atomically rename over it.
/// Whatever goes wrong, the temp file does not survive.
pub fn write_to_disk(
    target: &str,
    dbs: &[DbDump],
    abort: impl Fn() -> bool,
) -> RubraResult<()> {
    let tmp = temp_dump_name();
    let result = (|| -> RubraResult<()> {
        let file = fs::File::create(&tmp)
            .map_err(|e| Error::ioerror_extra(e, format!("creating '{}'", tmp)))?;
        let mut w = BufWriter::new(file);
        rdb::save(&mut w, dbs, abort)?;
        w.flush()
            .map_err(|e| Error::ioerror_extra(e, "flushing the dump file"))?;
        w.get_ref()
            .sync_all()
            .map_err(|e| Error::ioerror_extra(e, "syncing the dump file"))?;
        drop(w);
        fs::rename(&tmp, target)
            .map_err(|e| Error::ioerror_extra(e, format!("renaming '{}' over '{}'", tmp, target)))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Read a dump back. `Ok(None)` means there was no file, which is a
/// perfectly fine first boot.
pub fn read_from_disk(target: &str, db_count: usize) -> RubraResult<Option<Vec<DbDump>>> {
    let file = match fs::File::open(target) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::ioerror_extra(e, format!("opening '{}'", target))),
    };
    let mut r = BufReader::new(file);
    Ok(Some(rdb::load(&mut r, db_count)?))
}

/// Remove stray temp files a crashed writer may have left behind
pub fn remove_stale_temp_files() {
    let entries = match fs::read_dir(Path::new(".")) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("temp-") && name.ends_with(".rdb") {
            log::warn!("Removing stale temp dump file '{}'", name);
            let _ = fs::remove_file(entry.path());
        }
    }
}
