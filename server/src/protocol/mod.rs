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

//! Request framing
//!
//! Requests arrive as a single newline-terminated line of space-separated
//! tokens (the inline form). Commands marked bulk in the command table
//! carry their final argument out-of-line: the last inline token is a
//! decimal byte count and exactly that many bytes (plus a trailing CRLF)
//! follow the line. The bulk half of the state machine lives on the
//! connection, which awaits the body bytes; this module only frames the
//! inline line.

pub mod responses;

use crate::corestore::Data;

/// The inline request cap. A connection that buffers more than this
/// without producing a newline is closed.
pub const MAX_INLINE_SIZE: usize = 256 * 1024 * 1024;
/// The cap on a single bulk body
pub const MAX_BULK_SIZE: usize = 1024 * 1024 * 1024;

/// A parsed request: the argument vector, command name first
#[derive(Debug, PartialEq)]
pub struct Query {
    pub argv: Vec<Data>,
}

#[derive(Debug, PartialEq)]
/// Outcome of trying to frame a request out of the buffered bytes
pub enum ParseError {
    /// Nothing buffered at all
    Empty,
    /// A prefix of a request is buffered; read more bytes and retry
    NotEnough,
    /// The buffer crossed the inline cap without a newline; the client
    /// is broken and must be disconnected
    TooBig,
}

/// The inline parser. Borrows the connection buffer; on success reports
/// how many bytes the connection should discard.
pub struct Parser<'a> {
    buf: &'a [u8],
}

impl<'a> Parser<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Parser { buf }
    }
    /// Parse one inline request. An empty line parses into an empty
    /// argument vector which the dispatcher silently skips.
    pub fn parse(&self) -> Result<(Query, usize), ParseError> {
        if self.buf.is_empty() {
            return Err(ParseError::Empty);
        }
        let nl = match self.buf.iter().position(|b| *b == b'\n') {
            Some(nl) => nl,
            None => {
                return if self.buf.len() > MAX_INLINE_SIZE {
                    Err(ParseError::TooBig)
                } else {
                    Err(ParseError::NotEnough)
                };
            }
        };
        let mut line = &self.buf[..nl];
        if let [rest @ .., b'\r'] = line {
            line = rest;
        }
        let argv = line
            .split(|b| *b == b' ')
            .filter(|tok| !tok.is_empty())
            .map(Data::copy_from_slice)
            .collect();
        Ok((Query { argv }, nl + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(q: &Query) -> Vec<&[u8]> {
        q.argv.iter().map(|d| &d[..]).collect()
    }

    #[test]
    fn simple_inline() {
        let (q, advance) = Parser::new(b"SET foo bar\r\n").parse().unwrap();
        assert_eq!(args(&q), vec![&b"SET"[..], b"foo", b"bar"]);
        assert_eq!(advance, 13);
    }

    #[test]
    fn bare_newline_is_accepted() {
        let (q, advance) = Parser::new(b"PING\n").parse().unwrap();
        assert_eq!(args(&q), vec![&b"PING"[..]]);
        assert_eq!(advance, 5);
    }

    #[test]
    fn repeated_spaces_collapse() {
        let (q, _) = Parser::new(b"GET   foo\r\n").parse().unwrap();
        assert_eq!(args(&q), vec![&b"GET"[..], b"foo"]);
    }

    #[test]
    fn empty_line_gives_empty_argv() {
        let (q, advance) = Parser::new(b"\r\n").parse().unwrap();
        assert!(q.argv.is_empty());
        assert_eq!(advance, 2);
    }

    #[test]
    fn partial_line_wants_more() {
        assert_eq!(
            Parser::new(b"SET foo ba").parse().unwrap_err(),
            ParseError::NotEnough
        );
        assert_eq!(Parser::new(b"").parse().unwrap_err(), ParseError::Empty);
    }

    #[test]
    fn only_the_first_line_is_consumed() {
        let buf = b"PING\r\nPING\r\n";
        let (q, advance) = Parser::new(buf).parse().unwrap();
        assert_eq!(args(&q), vec![&b"PING"[..]]);
        let (q2, _) = Parser::new(&buf[advance..]).parse().unwrap();
        assert_eq!(args(&q2), vec![&b"PING"[..]]);
    }
}
