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

use super::*;

#[test]
fn defaults() {
    let cfg = ServerConfig::default();
    assert_eq!(cfg.port, 6379);
    assert_eq!(cfg.databases, 16);
    assert_eq!(cfg.timeout, 300);
    assert_eq!(cfg.dbfilename, "dump.rdb");
    assert_eq!(
        cfg.save_rules,
        vec![
            SaveRule {
                seconds: 3600,
                changes: 1
            },
            SaveRule {
                seconds: 300,
                changes: 100
            },
            SaveRule {
                seconds: 60,
                changes: 10000
            },
        ]
    );
    assert!(cfg.glueoutputbuf);
    assert!(!cfg.shareobjects);
    assert!(cfg.requirepass.is_none());
    assert!(cfg.slaveof.is_none());
}

#[test]
fn full_file() {
    let cfg = parse(
        "# sample configuration\n\
         port 7200\n\
         bind 0.0.0.0\n\
         timeout 0\n\
         databases 4\n\
         maxclients 100\n\
         maxmemory 1048576\n\
         loglevel debug\n\
         logfile /tmp/server.log\n\
         dir /tmp\n\
         dbfilename data.rdb\n\
         daemonize yes\n\
         pidfile /tmp/server.pid\n\
         requirepass sekrit\n\
         glueoutputbuf no\n\
         shareobjects yes\n\
         shareobjectspoolsize 2048\n\
         slaveof 10.0.0.5 6379\n",
    )
    .unwrap();
    assert_eq!(cfg.port, 7200);
    assert_eq!(cfg.host.to_string(), "0.0.0.0");
    assert_eq!(cfg.timeout, 0);
    assert_eq!(cfg.databases, 4);
    assert_eq!(cfg.maxclients, 100);
    assert_eq!(cfg.maxmemory, 1048576);
    assert_eq!(cfg.loglevel, LogLevel::Debug);
    assert_eq!(cfg.logfile.as_deref(), Some("/tmp/server.log"));
    assert_eq!(cfg.dir, "/tmp");
    assert_eq!(cfg.dbfilename, "data.rdb");
    assert!(cfg.daemonize);
    assert_eq!(cfg.pidfile, "/tmp/server.pid");
    assert_eq!(cfg.requirepass.as_deref(), Some("sekrit"));
    assert!(!cfg.glueoutputbuf);
    assert!(cfg.shareobjects);
    assert_eq!(cfg.shareobjectspoolsize, 2048);
    assert_eq!(cfg.slaveof, Some(("10.0.0.5".to_owned(), 6379)));
}

#[test]
fn first_save_directive_clears_the_defaults() {
    let cfg = parse("save 900 1\nsave 60 100\n").unwrap();
    assert_eq!(
        cfg.save_rules,
        vec![
            SaveRule {
                seconds: 900,
                changes: 1
            },
            SaveRule {
                seconds: 60,
                changes: 100
            },
        ]
    );
}

#[test]
fn comments_and_blank_lines_are_skipped() {
    let cfg = parse("\n# port 9\n\n  # another comment\nport 4000\n").unwrap();
    assert_eq!(cfg.port, 4000);
}

#[test]
fn errors_carry_the_line_number() {
    let err = parse("port 6379\nnonsense here\n").unwrap_err();
    assert!(err.to_string().contains("line 2"));
    let err = parse("daemonize maybe\n").unwrap_err();
    assert!(err.to_string().contains("yes/no"));
    let err = parse("port\n").unwrap_err();
    assert!(err.to_string().contains("argument"));
    assert!(parse("loglevel loud\n").is_err());
    assert!(parse("databases 0\n").is_err());
}
