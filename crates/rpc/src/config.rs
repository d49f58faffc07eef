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

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Endpoint used when none is configured
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// Traces of large transactions take minutes to produce
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Options of geth's struct logger, sent as the tracer config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLoggerOptions {
    /// Record memory; needed for call inputs, return data and logs
    pub enable_memory: bool,
    /// Omit the stack; call and create operands cannot be decoded without it
    pub disable_stack: bool,
    /// Omit storage, which is never interpreted
    pub disable_storage: bool,
    /// Record return data buffers
    pub enable_return_data: bool,
}

impl Default for StructLoggerOptions {
    fn default() -> Self {
        Self {
            enable_memory: true,
            disable_stack: false,
            disable_storage: true,
            enable_return_data: false,
        }
    }
}

/// Configuration of a [`crate::TraceRequestClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceClientConfig {
    /// JSON-RPC endpoint of a node exposing the `debug` namespace
    pub rpc_url: String,
    /// Timeout for a whole request, including streaming the body
    pub request_timeout: Duration,
    /// Struct logger options
    pub tracer: StructLoggerOptions,
}

impl Default for TraceClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tracer: StructLoggerOptions::default(),
        }
    }
}

impl TraceClientConfig {
    /// Default configuration against `rpc_url`
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self { rpc_url: rpc_url.into(), ..Default::default() }
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Record memory or not
    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.tracer.enable_memory = enabled;
        self
    }

    /// Record the stack or not
    pub fn with_stack(mut self, enabled: bool) -> Self {
        self.tracer.disable_stack = !enabled;
        self
    }

    /// Record storage or not
    pub fn with_storage(mut self, enabled: bool) -> Self {
        self.tracer.disable_storage = !enabled;
        self
    }

    /// Record return data or not
    pub fn with_return_data(mut self, enabled: bool) -> Self {
        self.tracer.enable_return_data = enabled;
        self
    }
}
