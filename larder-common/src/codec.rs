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

//! Binary form of an [`Element`].
//!
//! Big-endian, no padding:
//!
//! ```text
//! u32 total_size | i64 expire | u32 key_len | key | u32 flags
//! | u32 data_len | data | u64 cas | u8 blocked | i64 blocked_until
//! ```
//!
//! `total_size` covers everything after itself. The CAS field carries the
//! full 64-bit token.

use bytes::{Buf, BufMut, BytesMut};

use crate::{
    element::Element,
    error::{Error, Result},
    key::Key,
};

/// expire + key_len + flags + data_len + cas + blocked + blocked_until
const FIXED_FIELDS: usize = 8 + 4 + 4 + 4 + 8 + 1 + 8;

/// Encoded size of `element`, including the leading `total_size` field.
pub fn encoded_size(element: &Element) -> usize {
    4 + FIXED_FIELDS + element.key.len() + element.data.len()
}

pub fn write_to_buffer(element: &Element, buf: &mut BytesMut) {
    let total = FIXED_FIELDS + element.key.len() + element.data.len();
    buf.reserve(4 + total);
    buf.put_u32(total as u32);
    buf.put_i64(element.expire);
    buf.put_u32(element.key.len() as u32);
    buf.put_slice(element.key.as_bytes());
    buf.put_u32(element.flags);
    buf.put_u32(element.data.len() as u32);
    buf.put_slice(&element.data);
    buf.put_u64(element.cas);
    buf.put_u8(element.blocked as u8);
    buf.put_i64(element.blocked_until);
}

fn ensure(buf: &impl Buf, need: usize) -> Result<()> {
    if buf.remaining() < need {
        return Err(Error::Truncated {
            need,
            have: buf.remaining(),
        });
    }
    Ok(())
}

pub fn read_from_buffer(buf: &mut impl Buf) -> Result<Element> {
    ensure(buf, 4)?;
    let total = buf.get_u32() as usize;
    ensure(buf, total)?;
    if total < FIXED_FIELDS {
        return Err(Error::Corrupted(format!(
            "frame of {total} bytes cannot hold the {FIXED_FIELDS} fixed bytes"
        )));
    }
    let before = buf.remaining();

    let expire = buf.get_i64();
    let key_len = buf.get_u32() as usize;
    if FIXED_FIELDS + key_len > total {
        return Err(Error::Corrupted(format!(
            "key length {key_len} exceeds frame size {total}"
        )));
    }
    let key = Key::new(buf.copy_to_bytes(key_len));
    let flags = buf.get_u32();
    let data_len = buf.get_u32() as usize;
    if FIXED_FIELDS + key_len + data_len > total {
        return Err(Error::Corrupted(format!(
            "data length {data_len} exceeds frame size {total}"
        )));
    }
    let data = buf.copy_to_bytes(data_len);
    let cas = buf.get_u64();
    let blocked = buf.get_u8() != 0;
    let blocked_until = buf.get_i64();

    let consumed = before - buf.remaining();
    if consumed != total {
        return Err(Error::Corrupted(format!(
            "frame declared {total} bytes, decoded {consumed}"
        )));
    }

    Ok(Element {
        key,
        data,
        flags,
        expire,
        cas,
        blocked,
        blocked_until,
    })
}
