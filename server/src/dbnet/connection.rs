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

//! A buffered connection
//!
//! Pairs the socket (wrapped in a `BufWriter`) with the append-only read
//! buffer the request parser works against, and carries the reply
//! writers for every frame shape the protocol knows. When the server
//! replays a master's feed the same type is used with replies silenced:
//! nothing may be written back up a replication link.

use crate::corestore::Data;
use crate::protocol::{ParseError, Parser, Query};
use bytes::{Buf, BytesMut};
use librubra::BUF_CAP;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

/// Result of [`Connection::read_query`]
pub enum QueryResult {
    /// A parsed query ready to run
    Q(Query),
    /// The client disconnected cleanly
    Disconnected,
}

pub struct Connection<T> {
    pub stream: BufWriter<T>,
    pub buffer: BytesMut,
    /// false on a master link: the feed is applied, never answered
    replies_enabled: bool,
    /// when set, replies ride the BufWriter and hit the wire once per
    /// query; otherwise every reply part is flushed eagerly
    glue: bool,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: T, glue: bool) -> Self {
        Connection {
            stream: BufWriter::with_capacity(BUF_CAP, stream),
            buffer: BytesMut::with_capacity(BUF_CAP),
            replies_enabled: true,
            glue,
        }
    }
    /// Turn this connection into a feed consumer: replies are dropped
    pub fn silence_replies(&mut self) {
        self.replies_enabled = false;
    }

    /// Read one inline query, pulling bytes off the socket until a full
    /// line is buffered
    pub async fn read_query(&mut self) -> IoResult<QueryResult> {
        loop {
            match Parser::new(&self.buffer).parse() {
                Ok((query, advance)) => {
                    self.buffer.advance(advance);
                    return Ok(QueryResult::Q(query));
                }
                Err(ParseError::Empty) | Err(ParseError::NotEnough) => (),
                Err(ParseError::TooBig) => {
                    return Err(IoError::new(
                        ErrorKind::InvalidData,
                        "inline request exceeds the size cap",
                    ));
                }
            }
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(QueryResult::Disconnected)
                } else {
                    Err(IoError::from(ErrorKind::ConnectionReset))
                };
            }
        }
    }

    /// Await the body of a bulk argument: exactly `count` payload bytes
    /// followed by CRLF
    pub async fn read_bulk_body(&mut self, count: usize) -> IoResult<Data> {
        while self.buffer.len() < count + 2 {
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return Err(IoError::from(ErrorKind::ConnectionReset));
            }
        }
        let body = Data::from_blob(self.buffer.split_to(count).freeze());
        // the trailing CRLF
        self.buffer.advance(2);
        Ok(body)
    }

    // reply writers

    pub async fn write_raw(&mut self, bytes: &[u8]) -> IoResult<()> {
        if !self.replies_enabled {
            return Ok(());
        }
        self.stream.write_all(bytes).await?;
        if !self.glue {
            self.stream.flush().await?;
        }
        Ok(())
    }
    /// `:N` integer reply
    pub async fn write_int(&mut self, val: i64) -> IoResult<()> {
        let line = format!(":{}\r\n", val);
        self.write_raw(line.as_bytes()).await
    }
    /// `$len` + payload bulk reply
    pub async fn write_bulk(&mut self, payload: &[u8]) -> IoResult<()> {
        if !self.replies_enabled {
            return Ok(());
        }
        let header = format!("${}\r\n", payload.len());
        self.stream.write_all(header.as_bytes()).await?;
        self.stream.write_all(payload).await?;
        self.stream.write_all(b"\r\n").await?;
        if !self.glue {
            self.stream.flush().await?;
        }
        Ok(())
    }
    /// A single-line `+...` status built at runtime
    pub async fn write_status(&mut self, line: &str) -> IoResult<()> {
        if !self.replies_enabled {
            return Ok(());
        }
        self.stream.write_all(b"+").await?;
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        if !self.glue {
            self.stream.flush().await?;
        }
        Ok(())
    }
    /// `*N` multi-bulk header
    pub async fn write_mbulk_header(&mut self, count: usize) -> IoResult<()> {
        let header = format!("*{}\r\n", count);
        self.write_raw(header.as_bytes()).await
    }
    pub async fn flush(&mut self) -> IoResult<()> {
        if self.replies_enabled {
            self.stream.flush().await?;
        }
        Ok(())
    }
}
