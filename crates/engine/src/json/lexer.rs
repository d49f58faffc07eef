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

use std::{str::Chars, str::FromStr};

use super::{JsonEvent, Primitive};
use crate::JsonStreamError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the grammar allows next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    /// Any value: start of the document or after `:`
    Value,
    /// A value or `]`, right after `[`
    ValueOrClose,
    /// A key or `}`, right after `{`
    KeyOrClose,
    /// A key, after `,` inside an object
    Key,
    /// `:` after a key
    Colon,
    /// `,` or the bracket closing the current container
    CommaOrClose,
    /// The top-level value is complete
    Done,
}

impl Expect {
    fn describe(self) -> &'static str {
        match self {
            Self::Value => "a value",
            Self::ValueOrClose => "a value or `]`",
            Self::KeyOrClose => "a key or `}`",
            Self::Key => "a key",
            Self::Colon => "`:`",
            Self::CommaOrClose => "`,` or a closing bracket",
            Self::Done => "end of input",
        }
    }
}

/// Push-based JSON tokenizer
///
/// Bytes may be fed in chunks split at any position, including inside
/// strings, escapes, numbers, literals and multi-byte UTF-8 sequences. Bytes
/// that do not yet form a complete token stay buffered until the next
/// [`feed`](Self::feed) or [`finish`](Self::finish).
#[derive(Debug)]
pub struct JsonLexer {
    buffer: Vec<u8>,
    /// Absolute stream offset of `buffer[0]`
    offset: usize,
    containers: Vec<Container>,
    expect: Expect,
    /// Resume point of a string whose closing quote has not arrived
    pending_string: Option<StringScan>,
}

/// Progress through a string token, counted from its opening quote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct StringScan {
    scanned: usize,
    escaped: bool,
}

impl Default for JsonLexer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLexer {
    /// Create a lexer positioned before the top-level value
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            offset: 0,
            containers: Vec::new(),
            expect: Expect::Value,
            pending_string: None,
        }
    }

    /// Feed the next chunk and return every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<JsonEvent>, JsonStreamError> {
        self.buffer.extend_from_slice(chunk);
        self.drain(false)
    }

    /// Signal end of input
    ///
    /// Flushes a trailing top-level number and fails if the document is
    /// incomplete.
    pub fn finish(&mut self) -> Result<Vec<JsonEvent>, JsonStreamError> {
        let events = self.drain(true)?;
        if !self.buffer.is_empty() || self.expect != Expect::Done {
            return Err(JsonStreamError::UnexpectedEnd { offset: self.offset + self.buffer.len() });
        }
        Ok(events)
    }

    /// Number of bytes fully consumed so far
    pub fn bytes_consumed(&self) -> usize {
        self.offset
    }

    /// Current nesting depth
    pub fn depth(&self) -> usize {
        self.containers.len()
    }

    fn drain(&mut self, at_eof: bool) -> Result<Vec<JsonEvent>, JsonStreamError> {
        let mut events = Vec::new();
        let mut pos = 0;
        while let Some(used) = self.next_token(pos, at_eof, &mut events)? {
            pos += used;
        }
        self.buffer.drain(..pos);
        self.offset += pos;
        Ok(events)
    }

    /// Lex one token starting at `pos`, returning the bytes consumed or `None`
    /// when more input is needed.
    fn next_token(
        &mut self,
        pos: usize,
        at_eof: bool,
        events: &mut Vec<JsonEvent>,
    ) -> Result<Option<usize>, JsonStreamError> {
        let rest = &self.buffer[pos..];
        let ws = rest.iter().take_while(|b| matches!(b, b' ' | b'\t' | b'\n' | b'\r')).count();
        let start = pos + ws;
        let wait = if ws > 0 { Some(ws) } else { None };
        let Some(&byte) = self.buffer.get(start) else {
            return Ok(wait);
        };
        let at = self.offset + start;

        let used = match byte {
            b'{' | b'[' => {
                self.expect_value(at)?;
                if byte == b'{' {
                    self.containers.push(Container::Object);
                    self.expect = Expect::KeyOrClose;
                    events.push(JsonEvent::OpenObject);
                } else {
                    self.containers.push(Container::Array);
                    self.expect = Expect::ValueOrClose;
                    events.push(JsonEvent::OpenArray);
                }
                1
            }
            b'}' | b']' => {
                let container = if byte == b'}' { Container::Object } else { Container::Array };
                let allowed = match self.expect {
                    Expect::KeyOrClose => container == Container::Object,
                    Expect::ValueOrClose => container == Container::Array,
                    Expect::CommaOrClose => true,
                    _ => false,
                };
                if !allowed || self.containers.last() != Some(&container) {
                    return Err(self.unexpected(at, byte));
                }
                self.containers.pop();
                self.after_value();
                events.push(if container == Container::Object {
                    JsonEvent::CloseObject
                } else {
                    JsonEvent::CloseArray
                });
                1
            }
            b',' => {
                if self.expect != Expect::CommaOrClose {
                    return Err(self.unexpected(at, byte));
                }
                self.expect = match self.containers.last() {
                    Some(Container::Object) => Expect::Key,
                    _ => Expect::Value,
                };
                1
            }
            b':' => {
                if self.expect != Expect::Colon {
                    return Err(self.unexpected(at, byte));
                }
                self.expect = Expect::Value;
                1
            }
            b'"' => {
                let is_key = matches!(self.expect, Expect::KeyOrClose | Expect::Key);
                if !is_key {
                    self.expect_value(at)?;
                }
                let mut scan = self.pending_string.take().unwrap_or_default();
                let Some((text, used)) = scan_string(&self.buffer[start..], at, &mut scan)? else {
                    self.pending_string = Some(scan);
                    return Ok(wait);
                };
                if is_key {
                    events.push(JsonEvent::Key(text));
                    self.expect = Expect::Colon;
                } else {
                    events.push(JsonEvent::Value(Primitive::String(text)));
                    self.after_value();
                }
                used
            }
            b'-' | b'0'..=b'9' => {
                self.expect_value(at)?;
                let number = &self.buffer[start..];
                let len = number
                    .iter()
                    .take_while(|b| matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E'))
                    .count();
                if len == number.len() && !at_eof {
                    return Ok(wait);
                }
                let literal = String::from_utf8_lossy(&number[..len]).into_owned();
                if serde_json::Number::from_str(&literal).is_err() {
                    return Err(JsonStreamError::Syntax {
                        offset: at,
                        reason: format!("invalid number `{literal}`"),
                    });
                }
                events.push(JsonEvent::Value(Primitive::Number(literal)));
                self.after_value();
                len
            }
            b't' | b'f' | b'n' => {
                self.expect_value(at)?;
                let (word, value): (&[u8], _) = match byte {
                    b't' => (b"true", Primitive::Bool(true)),
                    b'f' => (b"false", Primitive::Bool(false)),
                    _ => (b"null", Primitive::Null),
                };
                let rest = &self.buffer[start..];
                if rest.len() < word.len() && word.starts_with(rest) && !at_eof {
                    return Ok(wait);
                }
                if !rest.starts_with(word) {
                    return Err(JsonStreamError::Syntax {
                        offset: at,
                        reason: "invalid literal".to_string(),
                    });
                }
                events.push(JsonEvent::Value(value));
                self.after_value();
                word.len()
            }
            other => return Err(self.unexpected(at, other)),
        };
        Ok(Some(ws + used))
    }

    fn expect_value(&self, at: usize) -> Result<(), JsonStreamError> {
        match self.expect {
            Expect::Value | Expect::ValueOrClose => Ok(()),
            other => Err(JsonStreamError::Syntax {
                offset: at,
                reason: format!("unexpected value, expected {}", other.describe()),
            }),
        }
    }

    fn after_value(&mut self) {
        self.expect = if self.containers.is_empty() { Expect::Done } else { Expect::CommaOrClose };
    }

    fn unexpected(&self, at: usize, byte: u8) -> JsonStreamError {
        JsonStreamError::Syntax {
            offset: at,
            reason: format!(
                "unexpected byte {:?}, expected {}",
                char::from(byte),
                self.expect.describe()
            ),
        }
    }
}

/// Scan a string token starting at its opening quote.
///
/// Returns the decoded text and the number of bytes including both quotes,
/// or `None` if the closing quote has not arrived yet. `scan` carries the
/// position reached by earlier calls on the same token.
fn scan_string(
    bytes: &[u8],
    at: usize,
    scan: &mut StringScan,
) -> Result<Option<(String, usize)>, JsonStreamError> {
    let mut i = scan.scanned.max(1);
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                scan.escaped = true;
                i += 2;
                continue;
            }
            b'"' => {
                let text = decode_string(&bytes[1..i], scan.escaped, at)?;
                return Ok(Some((text, i + 1)));
            }
            b if b < 0x20 => {
                return Err(JsonStreamError::Syntax {
                    offset: at + i,
                    reason: "control character in string".to_string(),
                });
            }
            _ => i += 1,
        }
    }
    scan.scanned = i;
    Ok(None)
}

fn decode_string(raw: &[u8], escaped: bool, at: usize) -> Result<String, JsonStreamError> {
    let text = std::str::from_utf8(raw).map_err(|e| JsonStreamError::Syntax {
        offset: at + 1 + e.valid_up_to(),
        reason: "invalid UTF-8 in string".to_string(),
    })?;
    if !escaped {
        return Ok(text.to_owned());
    }
    unescape(text)
        .map_err(|reason| JsonStreamError::Syntax { offset: at, reason: reason.to_string() })
}

fn unescape(text: &str) -> Result<String, &'static str> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let decoded = match chars.next() {
            Some('"') => '"',
            Some('\\') => '\\',
            Some('/') => '/',
            Some('b') => '\u{8}',
            Some('f') => '\u{c}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('u') => match hex4(&mut chars)? {
                high @ 0xD800..=0xDBFF => {
                    if chars.next() != Some('\\') || chars.next() != Some('u') {
                        return Err("unpaired surrogate in \\u escape");
                    }
                    let low = hex4(&mut chars)?;
                    if !(0xDC00..=0xDFFF).contains(&low) {
                        return Err("invalid low surrogate in \\u escape");
                    }
                    char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
                        .ok_or("invalid \\u escape")?
                }
                0xDC00..=0xDFFF => return Err("unpaired surrogate in \\u escape"),
                code => char::from_u32(code).ok_or("invalid \\u escape")?,
            },
            _ => return Err("invalid escape sequence"),
        };
        out.push(decoded);
    }
    Ok(out)
}

fn hex4(chars: &mut Chars<'_>) -> Result<u32, &'static str> {
    let mut code = 0;
    for _ in 0..4 {
        let digit = chars.next().and_then(|c| c.to_digit(16)).ok_or("invalid \\u escape")?;
        code = code * 16 + digit;
    }
    Ok(code)
}
