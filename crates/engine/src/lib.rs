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

//! Steptrace Engine - call-tree reconstruction from struct-logger traces
//!
//! The engine turns the opcode-level output of `debug_traceTransaction` into a
//! compact list of calls, creations, logs and self-destructs:
//!
//! - [`JsonLexer`] and [`IncrementalJsonBuilder`] decode the response body
//!   incrementally, so traces far larger than memory can be processed;
//! - [`ExecutionTraceVisitor`] replays the steps against a stack of open
//!   contexts and emits [`TraceItem`](steptrace_common::TraceItem)s;
//! - [`StructLogStream`] wires the two together.

/// Engine error types
pub mod error;
/// Streaming JSON lexer and incremental value builder
pub mod json;
/// Response-body driver tying the JSON layer to the visitor
pub mod pipeline;
/// Execution trace visitor and depth normalization
pub mod visitor;

pub use error::*;
pub use json::*;
pub use pipeline::*;
pub use visitor::*;
