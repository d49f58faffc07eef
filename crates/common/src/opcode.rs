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

use std::{collections::HashMap, fmt};

use once_cell::sync::Lazy;
use revm::bytecode::OpCode;
use serde::{Deserialize, Serialize};

/// Message-call flavour of a call-family instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallKind {
    /// `CALL`
    Call,
    /// `CALLCODE`
    CallCode,
    /// `DELEGATECALL`
    DelegateCall,
    /// `STATICCALL`
    StaticCall,
}

impl CallKind {
    /// Whether the instruction carries a value operand on the stack
    pub fn transfers_value(&self) -> bool {
        matches!(self, Self::Call | Self::CallCode)
    }

    /// Whether the callee runs in the caller's storage context
    pub fn runs_in_caller_context(&self) -> bool {
        matches!(self, Self::CallCode | Self::DelegateCall)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Call => "CALL",
            Self::CallCode => "CALLCODE",
            Self::DelegateCall => "DELEGATECALL",
            Self::StaticCall => "STATICCALL",
        };
        f.write_str(name)
    }
}

/// Contract-creation flavour of a create-family instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CreateKind {
    /// `CREATE`
    Create,
    /// `CREATE2`
    Create2,
}

impl fmt::Display for CreateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Create2 => "CREATE2",
        })
    }
}

/// Halting instruction that ends the current context normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TerminatorKind {
    /// `STOP`
    Stop,
    /// `RETURN`
    Return,
    /// `REVERT`
    Revert,
}

/// The family an opcode belongs to, as far as call-tree reconstruction cares
///
/// Every opcode maps to exactly one family; anything that does not open, close
/// or annotate a context is [`OpcodeFamily::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpcodeFamily {
    /// `CALL`, `CALLCODE`, `DELEGATECALL`, `STATICCALL`
    Call(CallKind),
    /// `CREATE`, `CREATE2`
    Create(CreateKind),
    /// `LOG0`..`LOG4`, carrying the number of topics
    Log(usize),
    /// `STOP`, `RETURN`, `REVERT`
    Terminator(TerminatorKind),
    /// `SELFDESTRUCT`
    SelfDestruct,
    /// Everything else, including mnemonics the opcode table does not know
    Other,
}

impl OpcodeFamily {
    /// Classify an opcode mnemonic as reported by a struct logger.
    pub fn classify(mnemonic: &str) -> Self {
        parse_mnemonic(mnemonic).map(|op| op.family()).unwrap_or(Self::Other)
    }
}

/// Mnemonic lookup built from the EVM opcode table
static MNEMONICS: Lazy<HashMap<&'static str, OpCode>> =
    Lazy::new(|| (0..=u8::MAX).filter_map(OpCode::new).map(|op| (op.as_str(), op)).collect());

/// Resolve a struct-logger mnemonic to an opcode.
///
/// Older geth releases report `SUICIDE` and `SHA3`; both are accepted.
pub fn parse_mnemonic(mnemonic: &str) -> Option<OpCode> {
    match mnemonic {
        "SUICIDE" => Some(OpCode::SELFDESTRUCT),
        "SHA3" => Some(OpCode::KECCAK256),
        other => MNEMONICS.get(other).copied(),
    }
}

/// Extended trait for opcode classification during trace reconstruction
///
/// The family predicates are mutually exclusive: an opcode answers `true` to at
/// most one of them.
///
/// # Example
/// ```rust
/// use revm::bytecode::OpCode;
/// use steptrace_common::OpcodeTr;
///
/// assert!(OpCode::DELEGATECALL.is_call_opcode());
/// assert!(OpCode::CREATE2.is_create_opcode());
/// assert!(OpCode::REVERT.is_terminator_opcode());
/// assert!(!OpCode::ADD.is_log_opcode());
/// assert!("LOG3".is_log_opcode());
/// ```
pub trait OpcodeTr {
    /// The family this opcode belongs to
    fn family(&self) -> OpcodeFamily;

    /// Check if this opcode opens a message-call context
    fn is_call_opcode(&self) -> bool {
        matches!(self.family(), OpcodeFamily::Call(_))
    }

    /// Check if this opcode opens a contract-creation context
    fn is_create_opcode(&self) -> bool {
        matches!(self.family(), OpcodeFamily::Create(_))
    }

    /// Check if this opcode emits a log entry
    fn is_log_opcode(&self) -> bool {
        matches!(self.family(), OpcodeFamily::Log(_))
    }

    /// Check if this opcode halts the current context normally
    fn is_terminator_opcode(&self) -> bool {
        matches!(self.family(), OpcodeFamily::Terminator(_))
    }

    /// Check if this opcode destroys the executing contract
    fn is_self_destruct_opcode(&self) -> bool {
        matches!(self.family(), OpcodeFamily::SelfDestruct)
    }
}

impl OpcodeTr for OpCode {
    fn family(&self) -> OpcodeFamily {
        match *self {
            Self::CALL => OpcodeFamily::Call(CallKind::Call),
            Self::CALLCODE => OpcodeFamily::Call(CallKind::CallCode),
            Self::DELEGATECALL => OpcodeFamily::Call(CallKind::DelegateCall),
            Self::STATICCALL => OpcodeFamily::Call(CallKind::StaticCall),
            Self::CREATE => OpcodeFamily::Create(CreateKind::Create),
            Self::CREATE2 => OpcodeFamily::Create(CreateKind::Create2),
            Self::LOG0 => OpcodeFamily::Log(0),
            Self::LOG1 => OpcodeFamily::Log(1),
            Self::LOG2 => OpcodeFamily::Log(2),
            Self::LOG3 => OpcodeFamily::Log(3),
            Self::LOG4 => OpcodeFamily::Log(4),
            Self::STOP => OpcodeFamily::Terminator(TerminatorKind::Stop),
            Self::RETURN => OpcodeFamily::Terminator(TerminatorKind::Return),
            Self::REVERT => OpcodeFamily::Terminator(TerminatorKind::Revert),
            Self::SELFDESTRUCT => OpcodeFamily::SelfDestruct,
            _ => OpcodeFamily::Other,
        }
    }
}

impl OpcodeTr for str {
    fn family(&self) -> OpcodeFamily {
        OpcodeFamily::classify(self)
    }
}

/// Check if `mnemonic` is `CALL`, `CALLCODE`, `DELEGATECALL` or `STATICCALL`
pub fn is_call_opcode(mnemonic: &str) -> bool {
    mnemonic.is_call_opcode()
}

/// Check if `mnemonic` is `CREATE` or `CREATE2`
pub fn is_create_opcode(mnemonic: &str) -> bool {
    mnemonic.is_create_opcode()
}

/// Check if `mnemonic` is one of `LOG0`..`LOG4`
pub fn is_log_opcode(mnemonic: &str) -> bool {
    mnemonic.is_log_opcode()
}

/// Check if `mnemonic` is `STOP`, `RETURN` or `REVERT`
pub fn is_terminator_opcode(mnemonic: &str) -> bool {
    mnemonic.is_terminator_opcode()
}

/// Check if `mnemonic` is `SELFDESTRUCT`
pub fn is_self_destruct_opcode(mnemonic: &str) -> bool {
    mnemonic.is_self_destruct_opcode()
}
