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

use bytes::Bytes;
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// A shared blob of bytes
///
/// `Data` is the byte-string currency of the whole server: keys, string
/// values, list elements and set members are all `Data`. Cloning is an
/// atomic refcount bump on the underlying `Bytes`, which is what lets a
/// single payload sit in a keyspace, an argument vector and a pending
/// reply at the same time without copies.
#[derive(Clone, PartialEq, Eq)]
pub struct Data {
    blob: Bytes,
}

impl Data {
    /// Create a new blob by copying the provided slice
    pub fn copy_from_slice(slice: &[u8]) -> Self {
        Data {
            blob: Bytes::copy_from_slice(slice),
        }
    }
    /// Create a new blob from a string
    pub fn from_string(val: String) -> Self {
        Data {
            blob: Bytes::from(val.into_bytes()),
        }
    }
    /// Create a new blob from an existing `Bytes` instance
    pub const fn from_blob(blob: Bytes) -> Self {
        Data { blob }
    }
    /// Get the inner blob (raw `Bytes`)
    pub const fn get_blob(&self) -> &Bytes {
        &self.blob
    }
    pub fn len(&self) -> usize {
        self.blob.len()
    }
    pub fn is_empty(&self) -> bool {
        self.blob.is_empty()
    }
}

impl Deref for Data {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.blob
    }
}

impl Borrow<[u8]> for Data {
    fn borrow(&self) -> &[u8] {
        &self.blob
    }
}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // delegate to the slice hash so that `Borrow<[u8]>` lookups agree
        self.blob[..].hash(state)
    }
}

impl From<&[u8]> for Data {
    fn from(slice: &[u8]) -> Self {
        Data::copy_from_slice(slice)
    }
}

impl From<Vec<u8>> for Data {
    fn from(vec: Vec<u8>) -> Self {
        Data {
            blob: Bytes::from(vec),
        }
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::copy_from_slice(s.as_bytes())
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Data({:?})", String::from_utf8_lossy(&self.blob))
    }
}

#[cfg(test)]
mod tests {
    use super::Data;
    use std::collections::HashMap;

    #[test]
    fn borrowed_lookups_agree_with_owned_keys() {
        let mut map: HashMap<Data, u32> = HashMap::new();
        map.insert(Data::from("hello"), 1);
        assert_eq!(map.get(&b"hello"[..]), Some(&1));
        assert!(map.get(&b"world"[..]).is_none());
    }

    #[test]
    fn clones_share_storage() {
        let a = Data::from("shared");
        let b = a.clone();
        assert_eq!(a.get_blob().as_ptr(), b.get_blob().as_ptr());
    }
}
