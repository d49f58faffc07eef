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

use serde_json::{Map, Value};

use super::{JsonEvent, Primitive};
use crate::JsonStreamError;

/// Buffers JSON events and materializes completed structures
///
/// The builder holds a flat token buffer. [`pop`](Self::pop) turns the most
/// recently closed structure into a [`Value`] and drops its tokens, which keeps
/// memory proportional to the element being assembled rather than the whole
/// document. [`build`](Self::build) materializes whatever is left.
#[derive(Debug, Default)]
pub struct IncrementalJsonBuilder {
    tokens: Vec<JsonEvent>,
}

impl IncrementalJsonBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lexer event
    pub fn push(&mut self, event: JsonEvent) {
        self.tokens.push(event);
    }

    /// Append `{`
    pub fn open_object(&mut self) {
        self.push(JsonEvent::OpenObject);
    }

    /// Append `}`
    pub fn close_object(&mut self) {
        self.push(JsonEvent::CloseObject);
    }

    /// Append `[`
    pub fn open_array(&mut self) {
        self.push(JsonEvent::OpenArray);
    }

    /// Append `]`
    pub fn close_array(&mut self) {
        self.push(JsonEvent::CloseArray);
    }

    /// Append an object key
    pub fn key(&mut self, name: impl Into<String>) {
        self.push(JsonEvent::Key(name.into()));
    }

    /// Append a scalar value
    pub fn value(&mut self, value: Primitive) {
        self.push(JsonEvent::Value(value));
    }

    /// Number of buffered tokens
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Materialize the structure closed by the last token
    ///
    /// Scans back to the matching opening bracket. When that structure is the
    /// value of an object key it stays buffered and `Ok(None)` is returned:
    /// only array elements and the top-level value are detachable. Otherwise
    /// its tokens are removed and the parsed value returned.
    pub fn pop(&mut self) -> Result<Option<Value>, JsonStreamError> {
        let (open, close) = match self.tokens.last() {
            Some(JsonEvent::CloseObject) => (JsonEvent::OpenObject, JsonEvent::CloseObject),
            Some(JsonEvent::CloseArray) => (JsonEvent::OpenArray, JsonEvent::CloseArray),
            _ => return Err(JsonStreamError::NothingToMaterialize),
        };

        let mut depth = 0usize;
        let mut start = None;
        for (index, token) in self.tokens.iter().enumerate().rev() {
            if *token == close {
                depth += 1;
            } else if *token == open {
                depth -= 1;
                if depth == 0 {
                    start = Some(index);
                    break;
                }
            }
        }
        let start = start.ok_or(JsonStreamError::Unbalanced("closing bracket without opener"))?;

        if start > 0 && matches!(self.tokens[start - 1], JsonEvent::Key(_)) {
            return Ok(None);
        }
        let tokens: Vec<_> = self.tokens.drain(start..).collect();
        materialize(tokens).map(Some)
    }

    /// Materialize the entire buffer and clear it
    ///
    /// Separators are never buffered, so there is nothing trailing to strip;
    /// the remaining tokens must form exactly one value.
    pub fn build(&mut self) -> Result<Value, JsonStreamError> {
        if self.tokens.is_empty() {
            return Err(JsonStreamError::NothingToMaterialize);
        }
        materialize(std::mem::take(&mut self.tokens))
    }
}

enum Partial {
    Object(Map<String, Value>, Option<String>),
    Array(Vec<Value>),
}

/// Assemble a token sequence into a single value without recursion
fn materialize(tokens: Vec<JsonEvent>) -> Result<Value, JsonStreamError> {
    let mut stack: Vec<Partial> = Vec::new();
    let mut result = None;

    for token in tokens {
        if result.is_some() {
            return Err(JsonStreamError::Unbalanced("tokens after a complete value"));
        }
        let completed = match token {
            JsonEvent::OpenObject => {
                stack.push(Partial::Object(Map::new(), None));
                None
            }
            JsonEvent::OpenArray => {
                stack.push(Partial::Array(Vec::new()));
                None
            }
            JsonEvent::Key(name) => match stack.last_mut() {
                Some(Partial::Object(_, pending)) if pending.is_none() => {
                    *pending = Some(name);
                    None
                }
                _ => return Err(JsonStreamError::Unbalanced("key outside an object")),
            },
            JsonEvent::Value(primitive) => Some(primitive.into_value()?),
            JsonEvent::CloseObject => match stack.pop() {
                Some(Partial::Object(map, None)) => Some(Value::Object(map)),
                _ => return Err(JsonStreamError::Unbalanced("unexpected `}`")),
            },
            JsonEvent::CloseArray => match stack.pop() {
                Some(Partial::Array(items)) => Some(Value::Array(items)),
                _ => return Err(JsonStreamError::Unbalanced("unexpected `]`")),
            },
        };

        let Some(value) = completed else { continue };
        match stack.last_mut() {
            None => result = Some(value),
            Some(Partial::Array(items)) => items.push(value),
            Some(Partial::Object(map, pending)) => {
                let key =
                    pending.take().ok_or(JsonStreamError::Unbalanced("object value without key"))?;
                map.insert(key, value);
            }
        }
    }

    if !stack.is_empty() {
        return Err(JsonStreamError::Unbalanced("unclosed structure"));
    }
    result.ok_or(JsonStreamError::NothingToMaterialize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JsonLexer;
    use serde_json::json;

    fn number(literal: &str) -> Primitive {
        Primitive::Number(literal.to_string())
    }

    #[test]
    fn test_pop_array_element() {
        let mut builder = IncrementalJsonBuilder::new();
        builder.open_object();
        builder.key("items");
        builder.open_array();
        builder.open_object();
        builder.key("a");
        builder.value(number("1"));
        builder.close_object();

        assert_eq!(builder.pop().unwrap(), Some(json!({"a": 1})));
        // `{ "items" [` remain
        assert_eq!(builder.len(), 3);
    }

    #[test]
    fn test_pop_keyed_value_stays_buffered() {
        let mut builder = IncrementalJsonBuilder::new();
        builder.open_object();
        builder.key("inner");
        builder.open_object();
        builder.close_object();

        assert_eq!(builder.pop().unwrap(), None);
        assert_eq!(builder.len(), 4);

        builder.close_object();
        assert_eq!(builder.pop().unwrap(), Some(json!({"inner": {}})));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_pop_matches_same_kind_brackets() {
        let mut builder = IncrementalJsonBuilder::new();
        builder.open_array();
        builder.open_array();
        builder.open_object();
        builder.key("x");
        builder.open_array();
        builder.close_array();
        builder.close_object();
        builder.close_array();

        assert_eq!(builder.pop().unwrap(), Some(json!([{"x": []}])));
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_pop_without_close_fails() {
        let mut builder = IncrementalJsonBuilder::new();
        assert!(matches!(builder.pop(), Err(JsonStreamError::NothingToMaterialize)));
        builder.open_array();
        builder.value(Primitive::Null);
        assert!(matches!(builder.pop(), Err(JsonStreamError::NothingToMaterialize)));
    }

    #[test]
    fn test_build_clears_buffer() {
        let mut builder = IncrementalJsonBuilder::new();
        assert!(builder.build().is_err());

        builder.open_object();
        builder.key("failed");
        builder.value(Primitive::Bool(false));
        builder.key("returnValue");
        builder.value(Primitive::String(String::new()));
        builder.close_object();
        assert_eq!(builder.build().unwrap(), json!({"failed": false, "returnValue": ""}));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_build_rejects_unclosed() {
        let mut builder = IncrementalJsonBuilder::new();
        builder.open_object();
        builder.key("a");
        assert!(matches!(builder.build(), Err(JsonStreamError::Unbalanced(_))));
    }

    #[test]
    fn test_popped_elements_equal_batch_parse() {
        let text = r#"{
            "gas": 21000,
            "list": [
                {"n": 1.5, "s": "a\nb", "nested": [[1, 2], {"k": null}]},
                [true, false],
                {"big": 115792089237316195423570985008687907853269984665640564039457584007913129639935}
            ]
        }"#;
        let document: Value = serde_json::from_str(text).unwrap();

        let mut lexer = JsonLexer::new();
        let mut builder = IncrementalJsonBuilder::new();
        let mut depth = 0usize;
        let mut popped = Vec::new();
        for chunk in text.as_bytes().chunks(5) {
            for event in lexer.feed(chunk).unwrap() {
                let closes = event.is_close();
                if event.is_open() {
                    depth += 1;
                } else if closes {
                    depth -= 1;
                }
                builder.push(event);
                // elements of "list" close back to depth 2
                if closes && depth == 2 {
                    popped.extend(builder.pop().unwrap());
                }
            }
        }
        for event in lexer.finish().unwrap() {
            builder.push(event);
        }

        assert_eq!(Value::Array(popped), document["list"]);
        let rest = builder.build().unwrap();
        assert_eq!(rest, json!({"gas": 21000, "list": []}));
    }
}
