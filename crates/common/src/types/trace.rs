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

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

use crate::opcode::{CallKind, CreateKind};

/// A message call opened by `CALL`, `CALLCODE`, `DELEGATECALL` or `STATICCALL`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Call flavour
    pub kind: CallKind,
    /// Depth in the call tree (0 = top level)
    pub depth: usize,
    /// Callee address
    pub to: Address,
    /// Value transferred, always zero for `DELEGATECALL` and `STATICCALL`
    #[serde(rename = "valueWei")]
    pub value: U256,
    /// Gas requested by the caller (first stack operand)
    pub gas_limit: u64,
    /// Gas the parent context had available when the call was issued
    pub gas_provided: u64,
    /// Gas the parent lost to this call, including the call's own cost
    pub gas_spent: u64,
    /// Calldata
    pub input: Bytes,
    /// Return or revert data
    pub output: Bytes,
    /// Whether the call completed without reverting or halting
    pub success: bool,
    /// Why the call failed, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A contract creation opened by `CREATE` or `CREATE2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFrame {
    /// Creation flavour
    pub kind: CreateKind,
    /// Depth in the call tree
    pub depth: usize,
    /// `CREATE2` salt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<B256>,
    /// Endowment
    #[serde(rename = "valueWei")]
    pub value: U256,
    /// Gas the parent context had available when the creation was issued
    pub gas_provided: u64,
    /// Gas the parent lost to this creation
    pub gas_spent: u64,
    /// Init code
    pub init_code: Bytes,
    /// Address of the new contract, zero when the creation failed
    pub deployed_address: Address,
    /// Runtime code returned by the init code (or revert data)
    pub deployed_code: Bytes,
    /// Whether the creation succeeded
    pub success: bool,
    /// Why the creation failed, if it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A log entry emitted by `LOG0`..`LOG4`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFrame {
    /// Depth in the call tree
    pub depth: usize,
    /// Non-indexed data
    pub data: Bytes,
    /// Indexed topics, at most four
    pub topics: Vec<B256>,
}

/// A `SELFDESTRUCT`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfDestructFrame {
    /// Depth in the call tree
    pub depth: usize,
    /// The contract being destroyed
    pub contract: Address,
    /// Recipient of the remaining balance
    pub beneficiary: Address,
}

/// A context the engine saw being entered without a recognizable opener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownFrame {
    /// Depth in the call tree
    pub depth: usize,
    /// Return data observed when the context exited
    pub output: Bytes,
}

/// One node of the reconstructed call tree
///
/// Only serialization is provided: internally tagged enums do not round-trip
/// through `serde_json` when `arbitrary_precision` is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TraceItem {
    /// Message call
    #[serde(rename = "call")]
    Call(CallFrame),
    /// Contract creation
    #[serde(rename = "create")]
    Create(CreateFrame),
    /// Log entry
    #[serde(rename = "log")]
    Log(LogFrame),
    /// Self-destruct
    #[serde(rename = "selfdestruct")]
    SelfDestruct(SelfDestructFrame),
    /// Unrecognized context
    #[serde(rename = "unknown")]
    Unknown(UnknownFrame),
}

impl TraceItem {
    /// Depth in the call tree
    pub fn depth(&self) -> usize {
        match self {
            Self::Call(frame) => frame.depth,
            Self::Create(frame) => frame.depth,
            Self::Log(frame) => frame.depth,
            Self::SelfDestruct(frame) => frame.depth,
            Self::Unknown(frame) => frame.depth,
        }
    }

    /// Overwrite the depth
    pub fn set_depth(&mut self, depth: usize) {
        match self {
            Self::Call(frame) => frame.depth = depth,
            Self::Create(frame) => frame.depth = depth,
            Self::Log(frame) => frame.depth = depth,
            Self::SelfDestruct(frame) => frame.depth = depth,
            Self::Unknown(frame) => frame.depth = depth,
        }
    }

    /// Whether this item opens a context that other items can nest under
    pub fn is_context(&self) -> bool {
        matches!(self, Self::Call(_) | Self::Create(_) | Self::Unknown(_))
    }

    /// Whether this item is a call or a creation (the items that carry gas)
    pub fn is_call_or_create(&self) -> bool {
        matches!(self, Self::Call(_) | Self::Create(_))
    }

    /// The call frame, if this is one
    pub fn as_call(&self) -> Option<&CallFrame> {
        match self {
            Self::Call(frame) => Some(frame),
            _ => None,
        }
    }

    /// The create frame, if this is one
    pub fn as_create(&self) -> Option<&CreateFrame> {
        match self {
            Self::Create(frame) => Some(frame),
            _ => None,
        }
    }

    /// The log frame, if this is one
    pub fn as_log(&self) -> Option<&LogFrame> {
        match self {
            Self::Log(frame) => Some(frame),
            _ => None,
        }
    }

    /// The self-destruct frame, if this is one
    pub fn as_self_destruct(&self) -> Option<&SelfDestructFrame> {
        match self {
            Self::SelfDestruct(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Ordered list of trace items forming a call tree by depth
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Trace {
    inner: Vec<TraceItem>,
}

impl Deref for Trace {
    type Target = Vec<TraceItem>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for Trace {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl From<Vec<TraceItem>> for Trace {
    fn from(inner: Vec<TraceItem>) -> Self {
        Self { inner }
    }
}

impl Trace {
    /// Create a new empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert trace to serde_json::Value for RPC serialization
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Unwrap into the item list
    pub fn into_inner(self) -> Vec<TraceItem> {
        self.inner
    }

    /// Index of the context an item nests under: the nearest preceding context
    /// item one level shallower
    pub fn parent_of(&self, index: usize) -> Option<usize> {
        let depth = self.inner.get(index)?.depth();
        let parent_depth = depth.checked_sub(1)?;
        self.inner[..index]
            .iter()
            .rposition(|item| item.is_context() && item.depth() == parent_depth)
    }

    /// Indices of the items nested directly under the item at `index`
    pub fn children_of(&self, index: usize) -> Vec<usize> {
        (index + 1..self.inner.len())
            .filter(|child| self.parent_of(*child) == Some(index))
            .collect()
    }
}

impl IntoIterator for Trace {
    type Item = TraceItem;
    type IntoIter = std::vec::IntoIter<TraceItem>;
    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a TraceItem;
    type IntoIter = std::slice::Iter<'a, TraceItem>;
    fn into_iter(self) -> Self::IntoIter {
        self.inner.iter()
    }
}
