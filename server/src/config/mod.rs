/*
 * Created on Sun Mar 05 2023
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

//! Server configuration
//!
//! The configuration file is line-oriented: one directive per line,
//! whitespace-separated arguments, `#` starts a comment. Every knob has
//! a built-in default, so running without a file is fully supported.

#[cfg(test)]
mod tests;

use crate::util::error::{Error, RubraResult};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};

const DEFAULT_IPV4: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_DATABASES: usize = 16;
const DEFAULT_TIMEOUT: u64 = 300;
const DEFAULT_DBFILENAME: &str = "dump.rdb";
const DEFAULT_PIDFILE: &str = "/var/run/rubrad.pid";
const DEFAULT_POOLSIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveRule {
    /// at least this many seconds since the last save...
    pub seconds: u64,
    /// ...and at least this many changes accumulated
    pub changes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Notice,
    Warning,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Notice => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// idle client timeout in seconds; 0 disables the sweep
    pub timeout: u64,
    pub save_rules: Vec<SaveRule>,
    pub dir: String,
    pub dbfilename: String,
    pub pidfile: String,
    pub loglevel: LogLevel,
    /// None means stdout
    pub logfile: Option<String>,
    pub databases: usize,
    /// 0 means unlimited
    pub maxclients: usize,
    /// bytes; 0 means unlimited
    pub maxmemory: usize,
    pub slaveof: Option<(String, u16)>,
    pub glueoutputbuf: bool,
    pub shareobjects: bool,
    pub shareobjectspoolsize: usize,
    pub daemonize: bool,
    pub requirepass: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: DEFAULT_IPV4,
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            save_rules: vec![
                SaveRule {
                    seconds: 3600,
                    changes: 1,
                },
                SaveRule {
                    seconds: 300,
                    changes: 100,
                },
                SaveRule {
                    seconds: 60,
                    changes: 10000,
                },
            ],
            dir: ".".to_owned(),
            dbfilename: DEFAULT_DBFILENAME.to_owned(),
            pidfile: DEFAULT_PIDFILE.to_owned(),
            loglevel: LogLevel::Notice,
            logfile: None,
            databases: DEFAULT_DATABASES,
            maxclients: 0,
            maxmemory: 0,
            slaveof: None,
            glueoutputbuf: true,
            shareobjects: false,
            shareobjectspoolsize: DEFAULT_POOLSIZE,
            daemonize: false,
            requirepass: None,
        }
    }
}

fn bad_line(lineno: usize, what: impl std::fmt::Display) -> Error {
    Error::Config(format!("at line {}: {}", lineno, what))
}

fn yes_no(lineno: usize, arg: &str) -> RubraResult<bool> {
    match arg {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(bad_line(lineno, format!("expected yes/no, got '{}'", other))),
    }
}

fn parse_arg<T: std::str::FromStr>(lineno: usize, arg: &str, what: &str) -> RubraResult<T> {
    arg.parse()
        .map_err(|_| bad_line(lineno, format!("invalid {} '{}'", what, arg)))
}

/// Parse configuration text over the defaults
pub fn parse(text: &str) -> RubraResult<ServerConfig> {
    let mut cfg = ServerConfig::default();
    // the first `save` directive replaces the default rules rather than
    // stacking on top of them
    let mut default_rules = true;
    for (idx, raw) in text.lines().enumerate() {
        let lineno = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let directive = match parts.next() {
            Some(d) => d.to_ascii_lowercase(),
            None => continue,
        };
        let args: Vec<&str> = parts.collect();
        let argc = args.len();
        let wrong_args = |expected: usize| -> Error {
            bad_line(
                lineno,
                format!("'{}' takes {} argument(s), got {}", directive, expected, argc),
            )
        };
        match directive.as_str() {
            "timeout" if argc == 1 => cfg.timeout = parse_arg(lineno, args[0], "timeout")?,
            "port" if argc == 1 => cfg.port = parse_arg(lineno, args[0], "port")?,
            "bind" if argc == 1 => cfg.host = parse_arg(lineno, args[0], "bind address")?,
            "save" if argc == 2 => {
                if default_rules {
                    cfg.save_rules.clear();
                    default_rules = false;
                }
                cfg.save_rules.push(SaveRule {
                    seconds: parse_arg(lineno, args[0], "save seconds")?,
                    changes: parse_arg(lineno, args[1], "save changes")?,
                });
            }
            "dir" if argc == 1 => cfg.dir = args[0].to_owned(),
            "loglevel" if argc == 1 => {
                cfg.loglevel = match args[0] {
                    "debug" => LogLevel::Debug,
                    "notice" => LogLevel::Notice,
                    "warning" => LogLevel::Warning,
                    other => {
                        return Err(bad_line(
                            lineno,
                            format!("invalid log level '{}'", other),
                        ))
                    }
                }
            }
            "logfile" if argc == 1 => {
                cfg.logfile = if args[0] == "stdout" {
                    None
                } else {
                    Some(args[0].to_owned())
                }
            }
            "databases" if argc == 1 => {
                cfg.databases = parse_arg(lineno, args[0], "database count")?;
                if cfg.databases < 1 {
                    return Err(bad_line(lineno, "need at least one database"));
                }
            }
            "maxclients" if argc == 1 => {
                cfg.maxclients = parse_arg(lineno, args[0], "client limit")?
            }
            "maxmemory" if argc == 1 => {
                cfg.maxmemory = parse_arg(lineno, args[0], "memory limit")?
            }
            "slaveof" if argc == 2 => {
                cfg.slaveof = Some((
                    args[0].to_owned(),
                    parse_arg(lineno, args[1], "master port")?,
                ))
            }
            "glueoutputbuf" if argc == 1 => cfg.glueoutputbuf = yes_no(lineno, args[0])?,
            "shareobjects" if argc == 1 => cfg.shareobjects = yes_no(lineno, args[0])?,
            "shareobjectspoolsize" if argc == 1 => {
                cfg.shareobjectspoolsize = parse_arg(lineno, args[0], "pool size")?;
                if cfg.shareobjectspoolsize < 1 {
                    return Err(bad_line(lineno, "pool size must be positive"));
                }
            }
            "daemonize" if argc == 1 => cfg.daemonize = yes_no(lineno, args[0])?,
            "requirepass" if argc == 1 => cfg.requirepass = Some(args[0].to_owned()),
            "pidfile" if argc == 1 => cfg.pidfile = args[0].to_owned(),
            "dbfilename" if argc == 1 => cfg.dbfilename = args[0].to_owned(),
            "timeout" | "port" | "bind" | "dir" | "loglevel" | "logfile" | "databases"
            | "maxclients" | "maxmemory" | "glueoutputbuf" | "shareobjects"
            | "shareobjectspoolsize" | "daemonize" | "requirepass" | "pidfile"
            | "dbfilename" => return Err(wrong_args(1)),
            "save" | "slaveof" => return Err(wrong_args(2)),
            other => return Err(bad_line(lineno, format!("unknown directive '{}'", other))),
        }
    }
    Ok(cfg)
}

/// Load a configuration file, or the defaults when no path was given
pub fn resolve(path: Option<&str>) -> RubraResult<ServerConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| Error::ioerror_extra(e, format!("reading config file '{}'", path)))?;
            parse(&text)
        }
        None => Ok(ServerConfig::default()),
    }
}
