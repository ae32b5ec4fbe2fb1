/*
 * Created on Wed Mar 01 2023
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

use std::{fmt, io::Error as IoError};

pub type RubraResult<T> = Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// A configuration directive was missing, malformed or contradictory
    Config(String),
    /// An I/O error with no further context
    IoError(IoError),
    /// An I/O error with a description of what was being attempted
    IoErrorExtra(IoError, String),
    /// The dump file is corrupted or truncated
    Dump(String),
    /// Anything else
    OtherError(String),
}

impl Error {
    pub fn ioerror_extra(ioe: IoError, extra: impl ToString) -> Self {
        Self::IoErrorExtra(ioe, extra.to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(cerr) => write!(f, "Configuration error: {}", cerr),
            Self::IoError(ioe) => write!(f, "I/O error: {}", ioe),
            Self::IoErrorExtra(ioe, extra) => write!(f, "I/O error while {extra}: {ioe}"),
            Self::Dump(derr) => write!(f, "Dump file error: {}", derr),
            Self::OtherError(oerr) => write!(f, "Error: {}", oerr),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(ioe: IoError) -> Self {
        Self::IoError(ioe)
    }
}

impl From<String> for Error {
    fn from(oerr: String) -> Self {
        Self::OtherError(oerr)
    }
}
