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

//! Steptrace Common - Shared functionality for steptrace components
//!
//! This crate provides the pieces shared by the reconstruction engine, the RPC
//! client and the command line tool: the raw execution step and trace item data
//! model, fixed-width byte helpers, opcode classification and logging setup.

/// Execution step and trace item types
pub mod types;

/// Fixed-width hex and byte helpers used to decode stack words and memory regions
pub mod bytes;
/// Logging setup and utilities for consistent logging across steptrace components
pub mod logging;
/// Opcode mnemonic classification into call, create, log, terminator and self-destruct families
pub mod opcode;

pub use bytes::*;
pub use logging::*;
pub use opcode::*;
pub use types::*;
