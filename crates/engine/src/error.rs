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

//! Error types produced while decoding and reconstructing a trace.

use std::{collections::VecDeque, fmt};

use steptrace_common::ByteError;
use thiserror::Error;

/// Errors raised by the streaming JSON layer
#[derive(Debug, Error)]
pub enum JsonStreamError {
    /// The byte stream is not valid JSON
    #[error("malformed JSON at byte {offset}: {reason}")]
    Syntax {
        /// Absolute offset of the offending byte in the stream
        offset: usize,
        /// What the lexer expected
        reason: String,
    },

    /// The stream stopped in the middle of a value
    #[error("JSON stream ended inside a value (at byte {offset})")]
    UnexpectedEnd {
        /// Number of bytes received
        offset: usize,
    },

    /// `pop`/`build` found no completed structure to turn into a value
    #[error("no completed JSON structure to materialize")]
    NothingToMaterialize,

    /// The buffered tokens do not form a well-nested value
    #[error("unbalanced token buffer: {0}")]
    Unbalanced(&'static str),

    /// A number literal that `serde_json` rejects
    #[error("invalid number literal `{literal}`")]
    InvalidNumber {
        /// Raw literal text
        literal: String,
    },
}

/// A compact record of one step, kept for error context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    /// Program counter
    pub pc: u64,
    /// Opcode mnemonic
    pub op: String,
    /// Depth reported by the producer
    pub depth: u64,
}

impl fmt::Display for StepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/d{}", self.op, self.pc, self.depth)
    }
}

/// The last few steps seen before an error, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentSteps(pub Vec<StepSummary>);

impl From<&VecDeque<StepSummary>> for RecentSteps {
    fn from(steps: &VecDeque<StepSummary>) -> Self {
        Self(steps.iter().cloned().collect())
    }
}

impl fmt::Display for RecentSteps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<none>");
        }
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

/// Errors raised by [`crate::ExecutionTraceVisitor`]
///
/// All of them indicate a trace that does not describe a well-formed EVM
/// execution. Each carries the most recent steps so the offending region of a
/// multi-million step trace can be located.
#[derive(Debug, Error)]
pub enum TraceError {
    /// A context exit was observed with no open context left
    #[error("context stack underflow while exiting a context [recent: {recent}]")]
    ContextUnderflow {
        /// Steps leading up to the failure
        recent: RecentSteps,
    },

    /// No open frame owns the executing code of a `SELFDESTRUCT`
    #[error("no open call or create frame owns this SELFDESTRUCT [recent: {recent}]")]
    MissingSelfDestructContract {
        /// Steps leading up to the failure
        recent: RecentSteps,
    },

    /// Contexts were still open when the trace ended
    #[error("trace ended with {open} open context(s) [recent: {recent}]")]
    Unbalanced {
        /// Number of contexts left open
        open: usize,
        /// Steps leading up to the failure
        recent: RecentSteps,
    },

    /// Gas windows and call/create items fell out of step
    #[error("recorded {windows} gas windows for {frames} call/create frames")]
    GasWindowMismatch {
        /// Windows recorded
        windows: usize,
        /// Call and create items emitted
        frames: usize,
    },

    /// A gas window never saw its context exit
    #[error("gas window of item {item} was never closed")]
    UnclosedGasWindow {
        /// Index of the owning item
        item: usize,
    },

    /// Depth changed by more than one level between consecutive steps
    #[error("depth jumped from {from} to {to} [recent: {recent}]")]
    DepthJump {
        /// Depth of the previous step
        from: u64,
        /// Depth of the current step
        to: u64,
        /// Steps leading up to the failure
        recent: RecentSteps,
    },

    /// A context exited but execution did not resume in its parent
    #[error("expected execution to resume at depth {expected} but saw depth {found} [recent: {recent}]")]
    MissedResume {
        /// Depth the parent runs at
        expected: u64,
        /// Depth actually observed
        found: u64,
        /// Steps leading up to the failure
        recent: RecentSteps,
    },

    /// The operands of an instruction could not be decoded
    #[error("cannot decode operands of {op}: {source} [recent: {recent}]")]
    Operand {
        /// Mnemonic of the offending step
        op: String,
        /// Underlying stack or memory error
        #[source]
        source: ByteError,
        /// Steps leading up to the failure
        recent: RecentSteps,
    },
}

/// Errors raised by [`crate::StructLogStream`]
#[derive(Debug, Error)]
pub enum StreamError {
    /// The response body is not valid JSON
    #[error(transparent)]
    Json(#[from] JsonStreamError),

    /// An element of `structLogs` is not a valid step
    #[error("struct log #{index} is not a valid execution step: {source}")]
    Step {
        /// Zero-based position in `structLogs`
        index: usize,
        /// Deserialization failure
        #[source]
        source: serde_json::Error,
    },

    /// The steps do not describe a well-formed execution
    #[error(transparent)]
    Trace(#[from] TraceError),
}
