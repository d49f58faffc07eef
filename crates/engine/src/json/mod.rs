// Steptrace - EVM Execution Trace Reconstruction
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Streaming JSON support.
//!
//! Trace responses routinely run into gigabytes, so they are never parsed as a
//! whole. [`JsonLexer`] turns arbitrarily split byte chunks into a flat stream
//! of [`JsonEvent`]s, and [`IncrementalJsonBuilder`] buffers those events and
//! materializes completed structures on demand, discarding the tokens it used.

use std::str::FromStr;

use serde_json::Value;

use crate::JsonStreamError;

mod builder;
mod lexer;

pub use builder::IncrementalJsonBuilder;
pub use lexer::JsonLexer;

/// A scalar JSON value as it appeared in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Primitive {
    /// `null`
    Null,
    /// `true` or `false`
    Bool(bool),
    /// A number, kept as its raw literal text
    Number(String),
    /// A string with escapes resolved
    String(String),
}

impl Primitive {
    /// Convert into a `serde_json` value
    pub fn into_value(self) -> Result<Value, JsonStreamError> {
        Ok(match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(flag),
            Self::Number(literal) => serde_json::Number::from_str(&literal)
                .map(Value::Number)
                .map_err(|_| JsonStreamError::InvalidNumber { literal })?,
            Self::String(text) => Value::String(text),
        })
    }
}

/// One lexical event of a JSON document
///
/// Separators are never reported; structure is carried entirely by the
/// open/close events and by keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonEvent {
    /// `{`
    OpenObject,
    /// `}`
    CloseObject,
    /// `[`
    OpenArray,
    /// `]`
    CloseArray,
    /// An object key
    Key(String),
    /// A scalar value
    Value(Primitive),
}

impl JsonEvent {
    /// Whether this event opens a structure
    pub fn is_open(&self) -> bool {
        matches!(self, Self::OpenObject | Self::OpenArray)
    }

    /// Whether this event closes a structure
    pub fn is_close(&self) -> bool {
        matches!(self, Self::CloseObject | Self::CloseArray)
    }
}
