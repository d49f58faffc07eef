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

use alloy_primitives::B256;
use steptrace_common::ByteError;
use steptrace_engine::StreamError;
use thiserror::Error;

/// Errors returned by [`crate::TraceRequestClient`]
#[derive(Debug, Error)]
pub enum TraceRequestError {
    /// Transport failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status
    #[error("RPC endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, for diagnostics
        body: String,
    },

    /// The trace body could not be decoded or replayed
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The node refused to trace the transaction
    #[error("trace unavailable (code {code}): {message}")]
    TraceUnavailable {
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },

    /// A helper RPC call returned an error object
    #[error("{method} failed (code {code}): {message}")]
    Rpc {
        /// Method that failed
        method: &'static str,
        /// JSON-RPC error code
        code: i64,
        /// JSON-RPC error message
        message: String,
    },

    /// The node does not know the transaction
    #[error("transaction {0} not found")]
    MissingTransaction(B256),

    /// A response did not have the expected shape
    #[error("malformed {what}: {source}")]
    Decode {
        /// What was being decoded
        what: &'static str,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The reported return value is not hex
    #[error("malformed returnValue: {0}")]
    ReturnValue(#[from] ByteError),
}
