/*
 * Created on Tue Mar 14 2023
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

//! `SORT`: the one command with an SQL-ish option grammar. Sorts a list
//! or set numerically or alphabetically, optionally keyed through
//! `BY`-pattern lookups, windowed with `LIMIT` and projected through
//! repeatable `GET` patterns.

use crate::corestore::{Data, Keyspace, Value};
use crate::protocol::responses::groups;
use crate::util;
use std::cmp::Ordering;

#[derive(Debug, PartialEq)]
enum SortOpKind {
    Get,
    // parsed and accepted, but reserved: they emit nothing and have no
    // side effect
    Del,
    Incr,
}

struct SortOp {
    kind: SortOpKind,
    pattern: Data,
}

struct SortRequest {
    desc: bool,
    alpha: bool,
    limit_start: i64,
    limit_count: i64,
    by: Option<Data>,
    ops: Vec<SortOp>,
}

fn parse_request(opts: &[Data]) -> Option<SortRequest> {
    let mut req = SortRequest {
        desc: false,
        alpha: false,
        limit_start: 0,
        limit_count: -1,
        by: None,
        ops: Vec::new(),
    };
    let mut i = 0;
    while i < opts.len() {
        let left = opts.len() - i - 1;
        let tok = &opts[i];
        if tok.eq_ignore_ascii_case(b"asc") {
            req.desc = false;
        } else if tok.eq_ignore_ascii_case(b"desc") {
            req.desc = true;
        } else if tok.eq_ignore_ascii_case(b"alpha") {
            req.alpha = true;
        } else if tok.eq_ignore_ascii_case(b"limit") && left >= 2 {
            req.limit_start = util::parse_i64_loose(&opts[i + 1]);
            req.limit_count = util::parse_i64_loose(&opts[i + 2]);
            i += 2;
        } else if tok.eq_ignore_ascii_case(b"by") && left >= 1 {
            req.by = Some(opts[i + 1].clone());
            i += 1;
        } else if tok.eq_ignore_ascii_case(b"get") && left >= 1 {
            req.ops.push(SortOp {
                kind: SortOpKind::Get,
                pattern: opts[i + 1].clone(),
            });
            i += 1;
        } else if tok.eq_ignore_ascii_case(b"del") && left >= 1 {
            req.ops.push(SortOp {
                kind: SortOpKind::Del,
                pattern: opts[i + 1].clone(),
            });
            i += 1;
        } else if tok.eq_ignore_ascii_case(b"incr") && left >= 1 {
            req.ops.push(SortOp {
                kind: SortOpKind::Incr,
                pattern: opts[i + 1].clone(),
            });
            i += 1;
        } else {
            return None;
        }
        i += 1;
    }
    Some(req)
}

/// `strtod`-style prefix parse: as much of the byte string as forms a
/// float, zero otherwise
fn parse_f64_loose(bytes: &[u8]) -> f64 {
    let mut end = 0;
    let mut seen_dot = false;
    for (i, b) in bytes.iter().enumerate() {
        match b {
            b'-' | b'+' if i == 0 => end = i + 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end = i + 1;
            }
            b'0'..=b'9' => end = i + 1,
            _ => break,
        }
    }
    std::str::from_utf8(&bytes[..end])
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}

/// Substitute the element into the first `*` of the pattern and read the
/// resulting key. Patterns without a `*` never resolve.
fn lookup_by_pattern(ks: &mut Keyspace, pattern: &[u8], elem: &[u8], now: u64) -> Option<Data> {
    let star = pattern.iter().position(|b| *b == b'*')?;
    let mut key = Vec::with_capacity(pattern.len() + elem.len());
    key.extend_from_slice(&pattern[..star]);
    key.extend_from_slice(elem);
    key.extend_from_slice(&pattern[star + 1..]);
    match ks.lookup_read(&key, now) {
        Some(Value::Str(d)) => Some(d.clone()),
        _ => None,
    }
}

struct SortItem {
    elem: Data,
    score: f64,
    cmp: Option<Data>,
}

action!(
    /// Run a `SORT` query
    fn sort(handle, con, client, act) {
        let req = match parse_request(&act[1..]) {
            Some(req) => req,
            None => return util::err(groups::SYNTAX_ERR),
        };
        // a BY pattern without a placeholder makes every weight equal,
        // so sorting can be skipped entirely
        let dontsort = matches!(&req.by, Some(p) if !p.contains(&b'*'));
        let now = util::unix_now();
        let output: Vec<Option<Data>> = {
            let mut ks = handle.db(client.db).write();
            let elems: Vec<Data> = match ks.lookup_read(&act[0], now) {
                Some(Value::List(list)) => list.iter().cloned().collect(),
                Some(Value::Set(set)) => set.iter().cloned().collect(),
                Some(_) => return util::err(groups::WRONGTYPE_ERR),
                None => return util::err(groups::NOKEY_ERR),
            };
            let mut vector: Vec<SortItem> = elems
                .into_iter()
                .map(|elem| {
                    let mut item = SortItem {
                        elem,
                        score: 0.0,
                        cmp: None,
                    };
                    if dontsort {
                        return item;
                    }
                    match &req.by {
                        Some(pattern) => {
                            let byval = lookup_by_pattern(&mut ks, pattern, &item.elem, now);
                            if req.alpha {
                                item.cmp = byval;
                            } else if let Some(w) = byval {
                                item.score = parse_f64_loose(&w);
                            }
                        }
                        None => {
                            if !req.alpha {
                                item.score = parse_f64_loose(&item.elem);
                            }
                        }
                    }
                    item
                })
                .collect();
            if !dontsort {
                let desc = req.desc;
                let alpha = req.alpha;
                let bypattern = req.by.is_some();
                vector.sort_by(|a, b| {
                    let ord = if !alpha {
                        a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal)
                    } else if bypattern {
                        match (&a.cmp, &b.cmp) {
                            (None, None) => Ordering::Equal,
                            (None, Some(_)) => Ordering::Less,
                            (Some(_), None) => Ordering::Greater,
                            (Some(x), Some(y)) => x[..].cmp(&y[..]),
                        }
                    } else {
                        a.elem[..].cmp(&b.elem[..])
                    };
                    if desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
            }
            // LIMIT windowing, clamped the way it always was
            let len = vector.len() as i64;
            let start = req.limit_start.max(0);
            let mut end = if req.limit_count < 0 {
                len - 1
            } else {
                start + req.limit_count - 1
            };
            if end >= len {
                end = len - 1;
            }
            let window: &[SortItem] = if start >= len || end < start {
                &[]
            } else {
                &vector[start as usize..=end as usize]
            };
            let getop = req.ops.iter().filter(|op| op.kind == SortOpKind::Get).count();
            let mut output = Vec::with_capacity(window.len() * getop.max(1));
            for item in window {
                if getop == 0 {
                    output.push(Some(item.elem.clone()));
                }
                for op in &req.ops {
                    match op.kind {
                        SortOpKind::Get => {
                            output.push(lookup_by_pattern(&mut ks, &op.pattern, &item.elem, now))
                        }
                        // reserved
                        SortOpKind::Del | SortOpKind::Incr => (),
                    }
                }
            }
            output
        };
        con.write_mbulk_header(output.len()).await?;
        for entry in output {
            match entry {
                Some(d) => con.write_bulk(&d).await?,
                None => con.write_raw(groups::NIL).await?,
            }
        }
        Ok(())
    }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_prefix_parsing() {
        assert_eq!(parse_f64_loose(b"3"), 3.0);
        assert_eq!(parse_f64_loose(b"3.5kg"), 3.5);
        assert_eq!(parse_f64_loose(b"-2"), -2.0);
        assert_eq!(parse_f64_loose(b"x"), 0.0);
        assert_eq!(parse_f64_loose(b""), 0.0);
    }

    #[test]
    fn option_grammar() {
        let opts = ["limit", "0", "3", "desc", "alpha", "by", "w_*", "get", "d_*"]
            .iter()
            .map(|s| Data::from(*s))
            .collect::<Vec<_>>();
        let req = parse_request(&opts).unwrap();
        assert!(req.desc);
        assert!(req.alpha);
        assert_eq!((req.limit_start, req.limit_count), (0, 3));
        assert_eq!(&req.by.unwrap()[..], b"w_*");
        assert_eq!(req.ops.len(), 1);
    }

    #[test]
    fn trailing_option_without_operand_is_a_syntax_error() {
        let opts = ["by"].iter().map(|s| Data::from(*s)).collect::<Vec<_>>();
        assert!(parse_request(&opts).is_none());
        let opts = ["limit", "0"]
            .iter()
            .map(|s| Data::from(*s))
            .collect::<Vec<_>>();
        assert!(parse_request(&opts).is_none());
    }
}
