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

//! JSON-RPC wire types and the client's output.

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use steptrace_common::Trace;

/// A JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    /// Request id
    pub id: u64,
    /// Method name
    pub method: &'a str,
    /// Positional parameters
    pub params: P,
}

impl<'a, P: Serialize> JsonRpcRequest<'a, P> {
    /// Build a request
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self { jsonrpc: "2.0", id, method, params }
    }
}

/// A JSON-RPC 2.0 response whose body fits in memory
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse<T> {
    /// Successful result; absent and `null` results deserialize to `None`
    pub result: Option<T>,
    /// Error object
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Human readable message
    pub message: String,
    /// Optional payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The fields of `eth_getTransactionByHash` needed to seed the root call
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    /// Recipient, absent for contract creations
    #[serde(default)]
    pub to: Option<Address>,
    /// Calldata or init code
    pub input: Bytes,
    /// Value sent
    pub value: U256,
    /// Gas limit
    pub gas: U256,
}

/// The field of `eth_getTransactionReceipt` needed for creation transactions
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    /// Address of the created contract
    #[serde(default)]
    pub contract_address: Option<Address>,
}

/// Top-level fields of a struct-logger result, `structLogs` excluded
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructLogSummary {
    /// Gas used by the transaction
    #[serde(default)]
    pub gas: u64,
    /// Whether the transaction failed
    #[serde(default)]
    pub failed: bool,
    /// Return or revert data, hex without prefix
    #[serde(default)]
    pub return_value: String,
}

/// A reconstructed transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTrace {
    /// Call tree in pre-order
    pub items: Trace,
    /// Gas used as reported by the node
    pub gas_used: u64,
    /// Data returned (or reverted with) by the top-level call
    pub return_value: Bytes,
    /// Whether the transaction failed
    pub failed: bool,
    /// Failure reason of the top-level call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_without_result_member() {
        let body = r#"{"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"method not found"}}"#;
        let response: JsonRpcResponse<RpcTransaction> = serde_json::from_str(body).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[test]
    fn test_response_with_transaction_result() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":{
            "to":null,"input":"0x6080","value":"0x0","gas":"0x5208"}}"#;
        let response: JsonRpcResponse<RpcTransaction> = serde_json::from_str(body).unwrap();
        assert!(response.error.is_none());
        let tx = response.result.unwrap();
        assert_eq!(tx.to, None);
        assert_eq!(tx.gas, U256::from(21_000));
        assert_eq!(tx.input.as_ref(), &[0x60, 0x80]);
    }

    #[test]
    fn test_null_result_is_none() {
        let response: JsonRpcResponse<RpcReceipt> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"result":null}"#).unwrap();
        assert!(response.result.is_none());
        assert!(response.error.is_none());
    }
}
