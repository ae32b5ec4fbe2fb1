/*
 * Created on Fri Mar 03 2023
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

use crate::corestore::Data;
use std::collections::{HashSet, VecDeque};

/// A tagged value
///
/// Every key maps to one of these. Lists are double-ended (both push
/// directions are O(1)); sets are unordered collections of unique
/// byte-strings.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Data),
    List(VecDeque<Data>),
    Set(HashSet<Data>),
}

impl Value {
    /// The name reported by `TYPE`
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
        }
    }
    pub fn as_set(&self) -> Option<&HashSet<Data>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }
}
