/*
 * Created on Mon Mar 06 2023
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

//! Preformed response lines. Everything here is a complete reply
//! including the trailing CRLF, ready to be pushed onto the wire.

pub mod groups {
    pub const OK: &[u8] = b"+OK\r\n";
    pub const PONG: &[u8] = b"+PONG\r\n";
    pub const ERR: &[u8] = b"-ERR\r\n";
    pub const CZERO: &[u8] = b":0\r\n";
    pub const CONE: &[u8] = b":1\r\n";
    pub const NIL: &[u8] = b"$-1\r\n";
    pub const NIL_ARRAY: &[u8] = b"*-1\r\n";
    pub const UNKNOWN_COMMAND: &[u8] = b"-ERR unknown command\r\n";
    pub const WRONG_ARITY: &[u8] = b"-ERR wrong number of arguments\r\n";
    pub const WRONGTYPE_ERR: &[u8] =
        b"-ERR Operation against a key holding the wrong kind of value\r\n";
    pub const NOKEY_ERR: &[u8] = b"-ERR no such key\r\n";
    pub const SYNTAX_ERR: &[u8] = b"-ERR syntax error\r\n";
    pub const SAME_OBJECT_ERR: &[u8] = b"-ERR source and destination objects are the same\r\n";
    pub const OUT_OF_RANGE_ERR: &[u8] = b"-ERR index out of range\r\n";
    pub const INVALID_DB_ERR: &[u8] = b"-ERR invalid DB index\r\n";
    pub const INVALID_BULK_COUNT: &[u8] = b"-ERR invalid bulk write count\r\n";
    pub const NOT_PERMITTED: &[u8] = b"-ERR operation not permitted\r\n";
    pub const INVALID_PASSWORD: &[u8] = b"-ERR invalid password\r\n";
    pub const OOM_ERR: &[u8] = b"-ERR command not allowed when used memory > 'maxmemory'\r\n";
    pub const BGSAVE_IN_PROGRESS: &[u8] = b"-ERR background save in progress\r\n";
    pub const BGSAVE_ALREADY_IN_PROGRESS: &[u8] =
        b"-ERR background save already in progress\r\n";
    pub const CANT_QUIT_SAVE_ERR: &[u8] = b"-ERR can't quit, problems saving the DB\r\n";
    pub const UNABLE_TO_BGSAVE: &[u8] = b"-ERR Unable to perform background save\r\n";
    pub const MAX_CLIENTS: &[u8] = b"-ERR max number of clients reached\r\n";
    pub const DEBUG_SYNTAX_ERR: &[u8] =
        b"-ERR Syntax error, try DEBUG [SEGFAULT|OBJECT <key>]\r\n";
}
