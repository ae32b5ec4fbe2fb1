/*
 * Created on Wed Mar 08 2023
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

//! # Actions
//!
//! Actions are the command implementations: you provide arguments, they
//! mutate the keyspace and write a reply. The dispatcher has already
//! verified arity and gating by the time an action runs, so every action
//! may index its argument slice freely within its declared arity.

#[macro_use]
mod macros;
pub mod admin;
pub mod keyspace;
pub mod lists;
pub mod sets;
pub mod sort;
pub mod strings;

use std::io::Error as IoError;

/// A generic result for actions
pub type ActionResult<T> = Result<T, ActionError>;

/// Errors that can occur while running actions
#[derive(Debug)]
pub enum ActionError {
    /// A protocol-level failure: the caller writes the carried response
    /// and the session continues
    ActionError(&'static [u8]),
    /// The connection itself failed
    IoError(IoError),
}

impl PartialEq for ActionError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ActionError(a1), Self::ActionError(a2)) => a1 == a2,
            (Self::IoError(ioe1), Self::IoError(ioe2)) => ioe1.to_string() == ioe2.to_string(),
            _ => false,
        }
    }
}

impl From<&'static [u8]> for ActionError {
    fn from(e: &'static [u8]) -> Self {
        Self::ActionError(e)
    }
}

impl From<IoError> for ActionError {
    fn from(e: IoError) -> Self {
        Self::IoError(e)
    }
}
