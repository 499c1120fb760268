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

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// `incr`/`decr` on a payload that is not a decimal unsigned integer.
    /// The protocol layer renders this as `CLIENT_ERROR`.
    #[error("value is not an unsigned decimal integer")]
    NotNumeric,
    #[error("buffer truncated: need {need} bytes, {have} available")]
    Truncated { need: usize, have: usize },
    #[error("corrupted element frame: {0}")]
    Corrupted(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
