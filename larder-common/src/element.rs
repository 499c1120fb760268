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

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    error::{Error, Result},
    key::Key,
};

/// Immutable value record stored in the cache.
///
/// `expire` and `blocked_until` are absolute milliseconds since the Unix
/// epoch; `expire == 0` means "no expiry". `cas` is stamped by the cache on
/// every successful mutating insertion or replacement; a freshly built
/// element carries `0` until then, and callers never pick their own token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub key: Key,
    pub data: Bytes,
    /// Opaque to the cache; stored and echoed back verbatim.
    pub flags: u32,
    pub expire: i64,
    pub cas: u64,
    pub blocked: bool,
    pub blocked_until: i64,
}

impl Element {
    pub fn new(key: Key, data: Bytes, flags: u32, expire: i64) -> Self {
        Self {
            key,
            data,
            flags,
            expire,
            cas: 0,
            blocked: false,
            blocked_until: 0,
        }
    }

    /// Placeholder installed by a delayed delete: empty payload that rejects
    /// writes until `blocked_until`.
    pub fn blocked_placeholder(key: Key, blocked_until: i64) -> Self {
        Self {
            key,
            data: Bytes::new(),
            flags: 0,
            expire: 0,
            cas: 0,
            blocked: true,
            blocked_until,
        }
    }

    /// Payload bytes, the unit of memory accounting.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expire != 0 && self.expire < now_ms
    }

    pub fn is_blocked(&self, now_ms: i64) -> bool {
        self.blocked && self.blocked_until > now_ms
    }

    /// New element whose payload is `self.data ++ other.data`. Flags and
    /// expiry are inherited from `self`; the CAS token is left for the cache
    /// to stamp.
    pub fn append(&self, other: &Element) -> Element {
        self.concat(&self.data, &other.data)
    }

    /// Mirror of [`Element::append`]: `other.data ++ self.data`.
    pub fn prepend(&self, other: &Element) -> Element {
        self.concat(&other.data, &self.data)
    }

    fn concat(&self, front: &[u8], back: &[u8]) -> Element {
        let mut data = BytesMut::with_capacity(front.len() + back.len());
        data.put_slice(front);
        data.put_slice(back);
        Element {
            key: self.key.clone(),
            data: data.freeze(),
            flags: self.flags,
            expire: self.expire,
            cas: 0,
            blocked: false,
            blocked_until: 0,
        }
    }

    /// Interprets the payload as a decimal unsigned integer and applies
    /// `delta`, returning the previous value and the replacement element.
    ///
    /// Underflow clamps to zero; overflow wraps modulo 2^64 the way
    /// memcached counters do. A payload that does not parse is an error,
    /// never silently treated as zero.
    pub fn incr_decr(&self, delta: Delta) -> Result<(u64, Element)> {
        let text = std::str::from_utf8(&self.data).map_err(|_| Error::NotNumeric)?;
        let old: u64 = text.parse().map_err(|_| Error::NotNumeric)?;
        let new = apply_delta(old, delta);
        let element = Element {
            key: self.key.clone(),
            data: Bytes::from(new.to_string()),
            flags: self.flags,
            expire: self.expire,
            cas: 0,
            blocked: false,
            blocked_until: 0,
        };
        Ok((old, element))
    }
}

/// Signed counter delta. Signed-magnitude rather than `i64` so the full
/// 64-bit delta range of the wire protocol is representable either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Incr(u64),
    Decr(u64),
}

/// Counter arithmetic shared by [`Element::incr_decr`] and its callers:
/// clamp to zero on underflow, wrap modulo 2^64 on overflow.
pub fn apply_delta(value: u64, delta: Delta) -> u64 {
    match delta {
        Delta::Incr(amount) => value.wrapping_add(amount),
        Delta::Decr(amount) => value.saturating_sub(amount),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(data: &str) -> Element {
        Element::new(Key::from("k"), Bytes::copy_from_slice(data.as_bytes()), 7, 99)
    }

    #[test]
    fn test_append_prepend() {
        let current = element("AB");
        let incoming = element("CD");

        let appended = current.append(&incoming);
        assert_eq!(&appended.data[..], b"ABCD");
        assert_eq!(appended.flags, current.flags);
        assert_eq!(appended.expire, current.expire);
        assert_eq!(appended.cas, 0);

        let prepended = current.prepend(&incoming);
        assert_eq!(&prepended.data[..], b"CDAB");
    }

    #[test]
    fn test_incr_decr() {
        let (old, new) = element("10").incr_decr(Delta::Incr(5)).unwrap();
        assert_eq!(old, 10);
        assert_eq!(&new.data[..], b"15");

        // underflow clamps to zero
        let (old, new) = element("10").incr_decr(Delta::Decr(100)).unwrap();
        assert_eq!(old, 10);
        assert_eq!(&new.data[..], b"0");

        // overflow wraps modulo 2^64
        let (_, new) = element(&u64::MAX.to_string())
            .incr_decr(Delta::Incr(2))
            .unwrap();
        assert_eq!(&new.data[..], b"1");
    }

    #[test]
    fn test_incr_decr_full_magnitude() {
        // deltas above i64::MAX are valid and applied exactly
        let (_, new) = element("5").incr_decr(Delta::Incr(u64::MAX)).unwrap();
        assert_eq!(&new.data[..], b"4");

        let (_, new) = element("5").incr_decr(Delta::Decr(u64::MAX)).unwrap();
        assert_eq!(&new.data[..], b"0");
    }

    #[test]
    fn test_incr_decr_not_numeric() {
        assert!(matches!(
            element("ten").incr_decr(Delta::Incr(1)),
            Err(Error::NotNumeric)
        ));
        assert!(matches!(
            element("-3").incr_decr(Delta::Incr(1)),
            Err(Error::NotNumeric)
        ));
        assert!(matches!(
            element("").incr_decr(Delta::Incr(1)),
            Err(Error::NotNumeric)
        ));
    }

    #[test]
    fn test_expiry_and_blocking() {
        let mut e = Element::new(Key::from("k"), Bytes::from_static(b"x"), 0, 0);
        assert!(!e.is_expired(i64::MAX)); // expire == 0 never expires

        e.expire = 1_000;
        assert!(!e.is_expired(999));
        assert!(!e.is_expired(1_000));
        assert!(e.is_expired(1_001));

        let p = Element::blocked_placeholder(Key::from("k"), 2_000);
        assert_eq!(p.size(), 0);
        assert!(p.is_blocked(1_999));
        assert!(!p.is_blocked(2_000));
    }
}
