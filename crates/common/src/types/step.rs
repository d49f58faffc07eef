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

//! Raw execution steps
//!
//! One [`ExecutionStep`] is produced for every instruction the node executed. The
//! stack and memory snapshots are taken *before* the instruction runs, which is
//! what lets the engine read operands of `CALL`, `RETURN`, `LOG*` and friends.

use std::fmt;

use alloy_primitives::{hex, Address, Bytes, B256, U256};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    bytes::{
        address_from_word, decode_hex, slice_padded, to_u64, to_usize, u256_from_hex,
        u256_to_word, ByteError, MAX_MEMORY_READ, WORD_SIZE,
    },
    opcode::OpcodeFamily,
};

/// EVM operand stack snapshot, bottom first and top of stack last
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack(Vec<U256>);

impl Stack {
    /// Create a stack from words ordered bottom first, top last
    pub fn new(words: Vec<U256>) -> Self {
        Self(words)
    }

    /// Number of words on the stack
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the stack holds no words
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All words, bottom first
    pub fn words(&self) -> &[U256] {
        &self.0
    }

    /// Word `index` positions below the top (0 = top of stack)
    pub fn peek(&self, index: usize) -> Result<U256, ByteError> {
        let len = self.0.len();
        if index >= len {
            return Err(ByteError::StackUnderflow { index, len });
        }
        Ok(self.0[len - 1 - index])
    }

    /// Word `index` positions below the top as a 32-byte word
    pub fn peek_word(&self, index: usize) -> Result<B256, ByteError> {
        self.peek(index).map(u256_to_word)
    }

    /// Low 20 bytes of the word `index` positions below the top
    pub fn peek_address(&self, index: usize) -> Result<Address, ByteError> {
        self.peek(index).map(address_from_word)
    }

    /// Word `index` positions below the top, which must fit in a `u64`
    pub fn peek_u64(&self, index: usize) -> Result<u64, ByteError> {
        self.peek(index).and_then(to_u64)
    }

    /// Word `index` positions below the top, clamped to `u64::MAX`
    ///
    /// Gas operands are routinely `2^256 - 1` ("all remaining gas").
    pub fn peek_saturating_u64(&self, index: usize) -> Result<u64, ByteError> {
        self.peek(index).map(|word| word.saturating_to::<u64>())
    }
}

impl Serialize for Stack {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Stack {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let words = Vec::<String>::deserialize(deserializer)?;
        words
            .iter()
            .map(|word| u256_from_hex(word))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(D::Error::custom)
    }
}

/// Flat EVM memory snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memory(Vec<u8>);

impl Memory {
    /// Wrap a flat byte buffer
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Size of the recorded memory in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no memory has been touched yet
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw memory bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Read `len` bytes at `offset`, as the EVM would for a memory operand pair.
    ///
    /// A zero length yields empty bytes whatever the offset. Bytes past the end
    /// of the snapshot read as zero (memory expansion). Ranges beyond
    /// [`MAX_MEMORY_READ`] are rejected.
    pub fn read(&self, offset: U256, len: U256) -> Result<Bytes, ByteError> {
        if len.is_zero() {
            return Ok(Bytes::new());
        }
        let out_of_range = || ByteError::MemoryRange { offset, len };
        let start = to_usize(offset).map_err(|_| out_of_range())?;
        let size = to_usize(len).map_err(|_| out_of_range())?;
        match start.checked_add(size) {
            Some(end) if end <= MAX_MEMORY_READ => Ok(slice_padded(&self.0, start, size).into()),
            _ => Err(out_of_range()),
        }
    }
}

impl Serialize for Memory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let words: Vec<String> = self
            .0
            .chunks(WORD_SIZE)
            .map(|chunk| {
                let mut word = [0u8; WORD_SIZE];
                word[..chunk.len()].copy_from_slice(chunk);
                hex::encode(word)
            })
            .collect();
        words.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Memory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let words = Vec::<String>::deserialize(deserializer)?;
        let mut bytes = Vec::with_capacity(words.len() * WORD_SIZE);
        for word in &words {
            bytes.extend(decode_hex(word).map_err(D::Error::custom)?);
        }
        Ok(Self(bytes))
    }
}

/// One struct-logger record: the machine state right before an instruction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStep {
    /// Program counter
    pub pc: u64,
    /// Opcode mnemonic
    pub op: String,
    /// Gas remaining before the instruction executes
    pub gas: u64,
    /// Gas charged by the instruction
    #[serde(default)]
    pub gas_cost: u64,
    /// Call depth reported by the node
    pub depth: u64,
    /// Abort reason, present when this instruction halted its context
    #[serde(default, deserialize_with = "deserialize_step_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Operand stack, when the tracer recorded it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Stack>,
    /// Memory, when the tracer recorded it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
    /// Touched storage slots; carried through but never interpreted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<serde_json::Value>,
}

impl ExecutionStep {
    /// Create a step with empty stack and memory
    pub fn new(depth: u64, pc: u64, op: impl Into<String>, gas: u64) -> Self {
        Self {
            pc,
            op: op.into(),
            gas,
            depth,
            stack: Some(Stack::default()),
            memory: Some(Memory::default()),
            ..Default::default()
        }
    }

    /// Set the gas cost
    pub fn with_gas_cost(mut self, gas_cost: u64) -> Self {
        self.gas_cost = gas_cost;
        self
    }

    /// Set the stack, bottom first
    pub fn with_stack(mut self, words: Vec<U256>) -> Self {
        self.stack = Some(Stack::new(words));
        self
    }

    /// Set the memory
    pub fn with_memory(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.memory = Some(Memory::new(bytes.into()));
        self
    }

    /// Set the abort reason
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Family of this step's opcode
    pub fn family(&self) -> OpcodeFamily {
        OpcodeFamily::classify(&self.op)
    }

    /// The recorded stack, or an empty one when the tracer disabled it
    pub fn stack(&self) -> &Stack {
        static EMPTY: Stack = Stack(Vec::new());
        self.stack.as_ref().unwrap_or(&EMPTY)
    }

    /// The recorded memory, or an empty one when the tracer disabled it
    pub fn memory(&self) -> &Memory {
        static EMPTY: Memory = Memory(Vec::new());
        self.memory.as_ref().unwrap_or(&EMPTY)
    }

    /// Read the memory region described by two stack operands
    pub fn read_memory_operands(
        &self,
        offset_index: usize,
        len_index: usize,
    ) -> Result<Bytes, ByteError> {
        let stack = self.stack();
        self.memory().read(stack.peek(offset_index)?, stack.peek(len_index)?)
    }
}

impl fmt::Display for ExecutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pc={} op={} depth={} gas={}", self.pc, self.op, self.depth, self.gas)?;
        if let Some(error) = &self.error {
            write!(f, " error={error:?}")?;
        }
        Ok(())
    }
}

/// Accept the `error` field as a string, `null`, or an empty object.
///
/// erigon reports errors as `{}`; an empty reason still marks the step as failed.
fn deserialize_step_error<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(reason)) => Ok(Some(reason)),
        Some(serde_json::Value::Object(map)) if map.is_empty() => Ok(Some(String::new())),
        Some(serde_json::Value::Object(map)) => Err(D::Error::custom(format_args!(
            "expected empty error object, got {} members",
            map.len()
        ))),
        Some(other) => Err(D::Error::custom(format_args!("unexpected error value {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_geth_step() {
        let step: ExecutionStep = serde_json::from_value(json!({
            "pc": 10,
            "op": "CALL",
            "gas": 90000,
            "gasCost": 2600,
            "depth": 1,
            "stack": ["0x1", "0x2", "0xff"],
            "memory": ["00000000000000000000000000000000000000000000000000000000000000aa"],
            "refund": 0
        }))
        .unwrap();

        assert_eq!(step.op, "CALL");
        assert_eq!(step.gas_cost, 2600);
        assert_eq!(step.error, None);
        assert_eq!(step.stack().peek(0).unwrap(), U256::from(0xff));
        assert_eq!(step.stack().peek(2).unwrap(), U256::from(1));
        assert_eq!(step.memory().len(), 32);
        assert_eq!(step.memory().as_slice()[31], 0xaa);
    }

    #[test]
    fn test_deserialize_nulls_and_error_shapes() {
        let step: ExecutionStep = serde_json::from_value(json!({
            "pc": 0, "op": "STOP", "gas": 1, "depth": 1,
            "stack": null, "memory": null, "storage": null, "error": null
        }))
        .unwrap();
        assert!(step.stack.is_none());
        assert!(step.stack().is_empty());
        assert_eq!(step.error, None);

        let step: ExecutionStep = serde_json::from_value(json!({
            "pc": 0, "op": "SSTORE", "gas": 1, "depth": 1, "error": {}
        }))
        .unwrap();
        assert_eq!(step.error.as_deref(), Some(""));

        let step: ExecutionStep = serde_json::from_value(json!({
            "pc": 0, "op": "SSTORE", "gas": 1, "depth": 1, "error": "out of gas"
        }))
        .unwrap();
        assert_eq!(step.error.as_deref(), Some("out of gas"));

        let bad = serde_json::from_value::<ExecutionStep>(json!({
            "pc": 0, "op": "SSTORE", "gas": 1, "depth": 1, "error": {"reason": "x"}
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_stack_peek_underflow() {
        let stack = Stack::new(vec![U256::from(1), U256::from(2)]);
        assert_eq!(stack.peek(0).unwrap(), U256::from(2));
        assert_eq!(stack.peek(2), Err(ByteError::StackUnderflow { index: 2, len: 2 }));
        assert_eq!(Stack::new(vec![U256::MAX]).peek_saturating_u64(0).unwrap(), u64::MAX);
    }

    #[test]
    fn test_memory_read() {
        let memory = Memory::new((0u8..64).collect());
        assert_eq!(memory.read(U256::from(2), U256::from(3)).unwrap().as_ref(), &[2, 3, 4]);
        assert_eq!(memory.read(U256::from(62), U256::from(4)).unwrap().as_ref(), &[62, 63, 0, 0]);
        assert!(memory.read(U256::MAX, U256::ZERO).unwrap().is_empty());
        assert!(matches!(
            memory.read(U256::MAX, U256::from(1)),
            Err(ByteError::MemoryRange { .. })
        ));
        assert!(memory.read(U256::ZERO, U256::from(MAX_MEMORY_READ + 1)).is_err());
    }

    #[test]
    fn test_step_serialization_keeps_camel_case() {
        let step = ExecutionStep::new(1, 3, "ADD", 100)
            .with_gas_cost(3)
            .with_stack(vec![U256::from(1)])
            .with_memory(vec![0xab]);
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["gasCost"], json!(3));
        assert_eq!(value["memory"][0].as_str().unwrap().len(), 64);
        let back: ExecutionStep = serde_json::from_value(value).unwrap();
        assert_eq!(back.stack, step.stack);
        assert_eq!(back.memory().read(U256::ZERO, U256::from(1)).unwrap().as_ref(), &[0xab]);
    }
}
