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

//! The dump file codec
//!
//! Layout: the magic `REDIS` + four ASCII version digits, then for every
//! non-empty database a select opcode with the database index, then the
//! entries (`[optional expire opcode + 4-byte LE seconds] type key
//! value`), then the EOF opcode.
//!
//! Length prefixes pack small values tight: the top two bits of the
//! first byte pick 6-bit, 14-bit (big-endian) or 32-bit (big-endian)
//! widths, and the fourth pattern marks an *encoded object*: a string
//! stored as a little-endian 8/16/32-bit integer or an LZF-compressed
//! blob (compressed length, uncompressed length, bytes). Version-0
//! files used a bare 4-byte big-endian length everywhere; the loader
//! still accepts them.

use crate::corestore::{Data, Value};
use crate::util;
use crate::util::error::{Error, RubraResult};
use std::collections::HashMap;
use std::io::{Read, Write};

pub const MAGIC: &[u8] = b"REDIS";
/// The version this server writes
pub const VERSION: u32 = 1;

const OPCODE_EXPIRETIME: u8 = 253;
const OPCODE_SELECTDB: u8 = 254;
const OPCODE_EOF: u8 = 255;

const TYPE_STRING: u8 = 0;
const TYPE_LIST: u8 = 1;
const TYPE_SET: u8 = 2;

const LEN_6BIT: u8 = 0;
const LEN_14BIT: u8 = 1;
const LEN_32BIT: u8 = 2;
const LEN_ENCVAL: u8 = 3;

const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;
const ENC_LZF: u8 = 3;

/// One database's worth of dump input: the value map and the deadline map
pub type DbDump = (HashMap<Data, Value>, HashMap<Data, u64>);

fn werr(e: std::io::Error) -> Error {
    Error::ioerror_extra(e, "writing the dump file")
}
fn rerr(e: std::io::Error) -> Error {
    Error::ioerror_extra(e, "reading the dump file")
}
fn corrupt(what: &str) -> Error {
    Error::Dump(what.to_owned())
}

// ---- encoding ----

fn save_len<W: Write>(w: &mut W, len: u32) -> RubraResult<()> {
    if len < (1 << 6) {
        w.write_all(&[(LEN_6BIT << 6) | len as u8]).map_err(werr)
    } else if len < (1 << 14) {
        w.write_all(&[(LEN_14BIT << 6) | ((len >> 8) as u8), (len & 0xFF) as u8])
            .map_err(werr)
    } else {
        w.write_all(&[LEN_32BIT << 6]).map_err(werr)?;
        w.write_all(&len.to_be_bytes()).map_err(werr)
    }
}

/// Integer form for a string that round-trips as a decimal fitting 32
/// bits. Anything longer than 11 bytes can't (sign + ten digits).
fn try_integer_encoding(s: &[u8]) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() > 11 {
        return None;
    }
    let value = util::parse_i64_exact(s)?;
    if (-(1 << 7)..1 << 7).contains(&value) {
        Some(vec![(LEN_ENCVAL << 6) | ENC_INT8, value as u8])
    } else if (-(1 << 15)..1 << 15).contains(&value) {
        let b = (value as i16).to_le_bytes();
        Some(vec![(LEN_ENCVAL << 6) | ENC_INT16, b[0], b[1]])
    } else if (-(1i64 << 31)..1i64 << 31).contains(&value) {
        let b = (value as i32).to_le_bytes();
        Some(vec![(LEN_ENCVAL << 6) | ENC_INT32, b[0], b[1], b[2], b[3]])
    } else {
        None
    }
}

/// Compressed form; declined unless it wins at least four bytes
fn save_lzf_string<W: Write>(w: &mut W, s: &[u8]) -> RubraResult<bool> {
    let compressed = match lzf::compress(s) {
        Ok(out) => out,
        Err(_) => return Ok(false),
    };
    if compressed.len() + 4 >= s.len() {
        return Ok(false);
    }
    w.write_all(&[(LEN_ENCVAL << 6) | ENC_LZF]).map_err(werr)?;
    save_len(w, compressed.len() as u32)?;
    save_len(w, s.len() as u32)?;
    w.write_all(&compressed).map_err(werr)?;
    Ok(true)
}

fn save_string<W: Write>(w: &mut W, s: &[u8]) -> RubraResult<()> {
    if let Some(enc) = try_integer_encoding(s) {
        return w.write_all(&enc).map_err(werr);
    }
    // under ~20 bytes LZF can't win anything
    if s.len() > 20 && save_lzf_string(w, s)? {
        return Ok(());
    }
    save_len(w, s.len() as u32)?;
    w.write_all(s).map_err(werr)
}

fn save_value<W: Write>(w: &mut W, val: &Value) -> RubraResult<()> {
    match val {
        Value::Str(d) => save_string(w, d),
        Value::List(list) => {
            save_len(w, list.len() as u32)?;
            for elem in list {
                save_string(w, elem)?;
            }
            Ok(())
        }
        Value::Set(set) => {
            save_len(w, set.len() as u32)?;
            for member in set {
                save_string(w, member)?;
            }
            Ok(())
        }
    }
}

/// Serialize the whole keyspace. `abort` is polled between entries; when
/// it trips the save fails cleanly (the temp file is removed upstream).
pub fn save<W: Write>(w: &mut W, dbs: &[DbDump], abort: impl Fn() -> bool) -> RubraResult<()> {
    let now = util::unix_now();
    w.write_all(MAGIC).map_err(werr)?;
    w.write_all(format!("{:04}", VERSION).as_bytes()).map_err(werr)?;
    for (index, (main, expires)) in dbs.iter().enumerate() {
        if main.is_empty() {
            continue;
        }
        w.write_all(&[OPCODE_SELECTDB]).map_err(werr)?;
        save_len(w, index as u32)?;
        for (key, val) in main {
            if abort() {
                return Err(Error::OtherError("save aborted".to_owned()));
            }
            if let Some(&when) = expires.get(&key[..]) {
                // no point writing a key that is already gone
                if when <= now {
                    continue;
                }
                w.write_all(&[OPCODE_EXPIRETIME]).map_err(werr)?;
                w.write_all(&(when as u32).to_le_bytes()).map_err(werr)?;
            }
            let typebyte = match val {
                Value::Str(_) => TYPE_STRING,
                Value::List(_) => TYPE_LIST,
                Value::Set(_) => TYPE_SET,
            };
            w.write_all(&[typebyte]).map_err(werr)?;
            save_string(w, key)?;
            save_value(w, val)?;
        }
    }
    w.write_all(&[OPCODE_EOF]).map_err(werr)?;
    Ok(())
}

// ---- decoding ----

fn read_u8<R: Read>(r: &mut R) -> RubraResult<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(rerr)?;
    Ok(b[0])
}

/// A decoded length: either a real length or an encoding selector
enum Len {
    Plain(u32),
    Encoded(u8),
}

fn load_len<R: Read>(r: &mut R, ver: u32) -> RubraResult<Len> {
    if ver == 0 {
        let mut b = [0u8; 4];
        r.read_exact(&mut b).map_err(rerr)?;
        return Ok(Len::Plain(u32::from_be_bytes(b)));
    }
    let first = read_u8(r)?;
    match first >> 6 {
        LEN_6BIT => Ok(Len::Plain((first & 0x3F) as u32)),
        LEN_14BIT => {
            let second = read_u8(r)?;
            Ok(Len::Plain((((first & 0x3F) as u32) << 8) | second as u32))
        }
        LEN_ENCVAL => Ok(Len::Encoded(first & 0x3F)),
        _ => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b).map_err(rerr)?;
            Ok(Len::Plain(u32::from_be_bytes(b)))
        }
    }
}

fn load_integer_string<R: Read>(r: &mut R, enc: u8) -> RubraResult<Data> {
    let val: i64 = match enc {
        ENC_INT8 => {
            let mut b = [0u8; 1];
            r.read_exact(&mut b).map_err(rerr)?;
            b[0] as i8 as i64
        }
        ENC_INT16 => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b).map_err(rerr)?;
            i16::from_le_bytes(b) as i64
        }
        ENC_INT32 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b).map_err(rerr)?;
            i32::from_le_bytes(b) as i64
        }
        _ => return Err(corrupt("unknown integer encoding")),
    };
    Ok(Data::from_string(val.to_string()))
}

fn load_lzf_string<R: Read>(r: &mut R, ver: u32) -> RubraResult<Data> {
    let clen = match load_len(r, ver)? {
        Len::Plain(n) => n as usize,
        Len::Encoded(_) => return Err(corrupt("bad compressed length")),
    };
    let ulen = match load_len(r, ver)? {
        Len::Plain(n) => n as usize,
        Len::Encoded(_) => return Err(corrupt("bad uncompressed length")),
    };
    let mut compressed = vec![0u8; clen];
    r.read_exact(&mut compressed).map_err(rerr)?;
    let raw = lzf::decompress(&compressed, ulen)
        .map_err(|e| corrupt(&format!("lzf decompression failed: {:?}", e)))?;
    Ok(Data::from(raw))
}

fn load_string<R: Read>(r: &mut R, ver: u32) -> RubraResult<Data> {
    match load_len(r, ver)? {
        Len::Encoded(enc) => match enc {
            ENC_INT8 | ENC_INT16 | ENC_INT32 => load_integer_string(r, enc),
            ENC_LZF => load_lzf_string(r, ver),
            _ => Err(corrupt("unknown string encoding")),
        },
        Len::Plain(len) => {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf).map_err(rerr)?;
            Ok(Data::from(buf))
        }
    }
}

/// Parse the magic + version header. Versions newer than ours are
/// refused; version 0 flips the loader into the legacy length format.
fn load_header<R: Read>(r: &mut R) -> RubraResult<u32> {
    let mut header = [0u8; 9];
    r.read_exact(&mut header).map_err(rerr)?;
    if &header[..5] != MAGIC {
        return Err(corrupt("wrong signature"));
    }
    let ver: u32 = std::str::from_utf8(&header[5..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| corrupt("bad version field"))?;
    if ver > VERSION {
        return Err(Error::Dump(format!("can't handle dump version {}", ver)));
    }
    Ok(ver)
}

/// Decode a full dump into per-database maps. Duplicate keys and any
/// structural damage are fatal. Keys whose stored deadline has already
/// passed are dropped on the floor.
pub fn load<R: Read>(r: &mut R, db_count: usize) -> RubraResult<Vec<DbDump>> {
    let ver = load_header(r)?;
    let now = util::unix_now();
    let mut dbs: Vec<DbDump> = (0..db_count)
        .map(|_| (HashMap::new(), HashMap::new()))
        .collect();
    let mut index = 0usize;
    loop {
        let mut typebyte = read_u8(r)?;
        let mut expiretime: Option<u64> = None;
        if typebyte == OPCODE_EXPIRETIME {
            let mut b = [0u8; 4];
            r.read_exact(&mut b).map_err(rerr)?;
            expiretime = Some(u32::from_le_bytes(b) as u64);
            typebyte = read_u8(r)?;
        }
        if typebyte == OPCODE_EOF {
            break;
        }
        if typebyte == OPCODE_SELECTDB {
            let id = match load_len(r, ver)? {
                Len::Plain(n) => n as usize,
                Len::Encoded(_) => return Err(corrupt("bad database index")),
            };
            if id >= db_count {
                return Err(Error::Dump(format!(
                    "dump file needs more than {} databases",
                    db_count
                )));
            }
            index = id;
            continue;
        }
        let key = load_string(r, ver)?;
        let val = match typebyte {
            TYPE_STRING => Value::Str(load_string(r, ver)?),
            TYPE_LIST | TYPE_SET => {
                let len = match load_len(r, ver)? {
                    Len::Plain(n) => n as usize,
                    Len::Encoded(_) => return Err(corrupt("bad collection length")),
                };
                if typebyte == TYPE_LIST {
                    let mut list = std::collections::VecDeque::with_capacity(len);
                    for _ in 0..len {
                        list.push_back(load_string(r, ver)?);
                    }
                    Value::List(list)
                } else {
                    let mut set = std::collections::HashSet::with_capacity(len);
                    for _ in 0..len {
                        set.insert(load_string(r, ver)?);
                    }
                    Value::Set(set)
                }
            }
            other => return Err(Error::Dump(format!("unknown value type {}", other))),
        };
        let (main, expires) = &mut dbs[index];
        if main.contains_key(&key[..]) {
            return Err(Error::Dump(format!(
                "duplicated key '{}' in dump",
                String::from_utf8_lossy(&key)
            )));
        }
        match expiretime {
            Some(when) if when <= now => (), // already expired
            Some(when) => {
                expires.insert(key.clone(), when);
                main.insert(key, val);
            }
            None => {
                main.insert(key, val);
            }
        }
    }
    Ok(dbs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::io::Cursor;

    fn d(s: &str) -> Data {
        Data::from(s)
    }

    fn roundtrip(dbs: &[DbDump]) -> Vec<DbDump> {
        let mut out = Vec::new();
        save(&mut out, dbs, || false).unwrap();
        load(&mut Cursor::new(out), dbs.len()).unwrap()
    }

    fn one_db(pairs: Vec<(Data, Value)>) -> Vec<DbDump> {
        let mut main = HashMap::new();
        for (k, v) in pairs {
            main.insert(k, v);
        }
        vec![(main, HashMap::new())]
    }

    #[test]
    fn string_roundtrip() {
        let dbs = one_db(vec![(d("key"), Value::Str(d("value")))]);
        let loaded = roundtrip(&dbs);
        assert_eq!(loaded[0].0[&b"key"[..]], Value::Str(d("value")));
    }

    #[test]
    fn integer_encodings_are_idempotent() {
        for n in ["0", "-1", "127", "-128", "128", "32767", "-32768", "70000", "2147483647", "-2147483648"] {
            let dbs = one_db(vec![(d("k"), Value::Str(d(n)))]);
            let loaded = roundtrip(&dbs);
            assert_eq!(loaded[0].0[&b"k"[..]], Value::Str(d(n)), "for {}", n);
        }
        // too wide for 32 bits: stored raw, still round-trips
        let dbs = one_db(vec![(d("k"), Value::Str(d("2147483648")))]);
        assert_eq!(roundtrip(&dbs)[0].0[&b"k"[..]], Value::Str(d("2147483648")));
        // not round-trip-identical decimals must not be integer-coded
        let dbs = one_db(vec![(d("k"), Value::Str(d("007")))]);
        assert_eq!(roundtrip(&dbs)[0].0[&b"k"[..]], Value::Str(d("007")));
    }

    #[test]
    fn compressible_strings_survive() {
        let fat = "a".repeat(300);
        let dbs = one_db(vec![(d("k"), Value::Str(Data::from(fat.as_str())))]);
        let mut out = Vec::new();
        save(&mut out, &dbs, || false).unwrap();
        // 300 repeated bytes must compress well below the raw form
        assert!(out.len() < 100);
        let loaded = load(&mut Cursor::new(out), 1).unwrap();
        assert_eq!(loaded[0].0[&b"k"[..]], Value::Str(Data::from(fat.as_str())));
    }

    #[test]
    fn list_and_set_roundtrip() {
        let list: VecDeque<Data> = ["a", "b", "c"].iter().map(|s| d(s)).collect();
        let set: HashSet<Data> = ["x", "y"].iter().map(|s| d(s)).collect();
        let dbs = one_db(vec![
            (d("l"), Value::List(list.clone())),
            (d("s"), Value::Set(set.clone())),
        ]);
        let loaded = roundtrip(&dbs);
        assert_eq!(loaded[0].0[&b"l"[..]], Value::List(list));
        assert_eq!(loaded[0].0[&b"s"[..]], Value::Set(set));
    }

    #[test]
    fn expires_roundtrip_and_dead_keys_drop() {
        let far = util::unix_now() + 1000;
        let mut main = HashMap::new();
        let mut expires = HashMap::new();
        main.insert(d("live"), Value::Str(d("1")));
        expires.insert(d("live"), far);
        main.insert(d("dead"), Value::Str(d("2")));
        expires.insert(d("dead"), 1);
        let loaded = roundtrip(&[(main, expires)]);
        assert_eq!(loaded[0].1[&b"live"[..]], far);
        assert!(!loaded[0].0.contains_key(&b"dead"[..]));
    }

    #[test]
    fn nonzero_database_indices_stick() {
        let mut dbs: Vec<DbDump> = (0..4).map(|_| (HashMap::new(), HashMap::new())).collect();
        dbs[2].0.insert(d("k"), Value::Str(d("v")));
        let loaded = roundtrip(&dbs);
        assert!(loaded[0].0.is_empty());
        assert_eq!(loaded[2].0[&b"k"[..]], Value::Str(d("v")));
    }

    #[test]
    fn legacy_version_zero_lengths() {
        // hand-built v0 file: bare 4-byte big-endian lengths everywhere
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(b"REDIS0000");
        buf.push(254); // select db
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.push(0); // string type
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"foo");
        buf.extend_from_slice(&3u32.to_be_bytes());
        buf.extend_from_slice(b"bar");
        buf.push(255); // eof
        let loaded = load(&mut Cursor::new(buf), 1).unwrap();
        assert_eq!(loaded[0].0[&b"foo"[..]], Value::Str(d("bar")));
    }

    #[test]
    fn newer_versions_are_refused() {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(b"REDIS0002");
        buf.push(255);
        assert!(load(&mut Cursor::new(buf), 1).is_err());
    }

    #[test]
    fn duplicate_keys_are_fatal() {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(b"REDIS0001");
        buf.push(254);
        buf.push(0); // 6-bit length: db 0
        for _ in 0..2 {
            buf.push(0); // string type
            buf.push(3); // 6-bit length
            buf.extend_from_slice(b"foo");
            buf.push(3);
            buf.extend_from_slice(b"bar");
        }
        buf.push(255);
        assert!(load(&mut Cursor::new(buf), 1).is_err());
    }

    #[test]
    fn truncated_dump_is_an_error() {
        let dbs = one_db(vec![(d("key"), Value::Str(d("value")))]);
        let mut out = Vec::new();
        save(&mut out, &dbs, || false).unwrap();
        out.truncate(out.len() - 2);
        assert!(load(&mut Cursor::new(out), 1).is_err());
    }
}
