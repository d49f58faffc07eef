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

//! Steptrace RPC - streaming trace client
//!
//! [`TraceRequestClient`] asks a node for the struct-log trace of a
//! transaction and feeds the HTTP body, chunk by chunk, into the
//! reconstruction engine.

/// Trace request client
pub mod client;
/// Client configuration
pub mod config;
/// Client errors
pub mod error;
/// JSON-RPC wire types and client output
pub mod types;

pub use client::*;
pub use config::*;
pub use error::*;
pub use types::*;
