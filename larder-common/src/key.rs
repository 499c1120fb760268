//  Copyright 2025 Larder Project Authors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//  http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::LazyLock,
};

use ahash::RandomState;
use bytes::Bytes;

/// Process-wide hash state. Every key hashes with the same state so the
/// precomputed hash can drive both shard selection and the hash index.
static HASH_STATE: LazyLock<RandomState> = LazyLock::new(RandomState::new);

/// Opaque binary key with its hash precomputed at construction.
///
/// The byte buffer is shared ([`Bytes`]), so cloning copies a view and a
/// cached hash, never the payload. Equality is byte-content based.
#[derive(Debug, Clone)]
pub struct Key {
    bytes: Bytes,
    hash: u64,
}

impl Key {
    pub fn new(bytes: Bytes) -> Self {
        let hash = HASH_STATE.hash_one(&bytes[..]);
        Self { bytes, hash }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The hash cached at construction.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl From<Bytes> for Key {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(bytes))
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(Bytes::from(bytes))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

/// Lossy UTF-8 rendering, for logs only.
impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_by_content() {
        let a = Key::from("alpha");
        let b = Key::from(b"alpha".to_vec());
        let c = Key::from("beta");
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a, c);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let a = Key::from("shared");
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.as_bytes().as_ptr(), b.as_bytes().as_ptr());
    }

    #[test]
    fn test_display_is_lossy() {
        let key = Key::from(&[0x66, 0x6f, 0x6f, 0xff][..]);
        assert_eq!(key.to_string(), "foo\u{fffd}");
    }
}
