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

//! Streaming `debug_traceTransaction` client.

use std::sync::atomic::{AtomicU64, Ordering};

use alloy_primitives::{Bytes, B256};
use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use steptrace_common::{decode_hex, TraceItem};
use steptrace_engine::{ExecutionTraceVisitor, RootCall, StreamedTrace, StructLogStream};
use tracing::{debug, info, warn};

use crate::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcReceipt, RpcTransaction, StructLogSummary,
    TraceClientConfig, TraceRequestError, TransactionTrace,
};

const REVERTED: &str = "execution reverted";

/// Client that traces transactions and reconstructs their call trees
///
/// The trace response is never buffered: every body chunk goes through the
/// struct-log stream as soon as it arrives.
#[derive(Debug)]
pub struct TraceRequestClient {
    http: reqwest::Client,
    config: TraceClientConfig,
    next_id: AtomicU64,
}

impl TraceRequestClient {
    /// Build a client from its configuration
    pub fn new(config: TraceClientConfig) -> Result<Self, TraceRequestError> {
        let http = reqwest::Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { http, config, next_id: AtomicU64::new(1) })
    }

    /// The configuration in use
    pub fn config(&self) -> &TraceClientConfig {
        &self.config
    }

    /// Trace a transaction, fetching its root call from the node first
    pub async fn trace_transaction(
        &self,
        hash: B256,
    ) -> Result<TransactionTrace, TraceRequestError> {
        let root = self.resolve_root(hash).await?;
        self.trace_transaction_with_root(hash, root).await
    }

    /// Look up the top-level call of a transaction
    ///
    /// For contract creations the root's address is the created contract,
    /// taken from the receipt.
    pub async fn resolve_root(&self, hash: B256) -> Result<RootCall, TraceRequestError> {
        let tx: RpcTransaction = self
            .call("eth_getTransactionByHash", [hash])
            .await?
            .ok_or(TraceRequestError::MissingTransaction(hash))?;

        let to = match tx.to {
            Some(to) => to,
            None => {
                let receipt: Option<RpcReceipt> =
                    self.call("eth_getTransactionReceipt", [hash]).await?;
                receipt.and_then(|receipt| receipt.contract_address).unwrap_or_else(|| {
                    warn!(%hash, "creation transaction without a contract address in its receipt");
                    Default::default()
                })
            }
        };

        debug!(%hash, %to, gas = %tx.gas, "resolved root call");
        Ok(RootCall { to, input: tx.input, value: tx.value, gas_limit: tx.gas.saturating_to() })
    }

    /// Trace a transaction whose root call is already known
    pub async fn trace_transaction_with_root(
        &self,
        hash: B256,
        root: RootCall,
    ) -> Result<TransactionTrace, TraceRequestError> {
        let request = JsonRpcRequest::new(
            self.next_id(),
            "debug_traceTransaction",
            (hash, &self.config.tracer),
        );
        info!(%hash, url = %self.config.rpc_url, "requesting struct log trace");

        let response = self.http.post(&self.config.rpc_url).json(&request).send().await?;
        let response = check_status(response).await?;

        let mut stream = StructLogStream::new(ExecutionTraceVisitor::new(root));
        let mut body = response.bytes_stream();
        let mut received = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            received += chunk.len();
            stream.feed(&chunk)?;
        }
        debug!(bytes = received, steps = stream.steps(), "trace body received");

        into_transaction_trace(stream.finish()?)
    }

    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<Option<R>, TraceRequestError> {
        let request = JsonRpcRequest::new(self.next_id(), method, params);
        debug!(method, "sending RPC request");

        let response = self.http.post(&self.config.rpc_url).json(&request).send().await?;
        let response = check_status(response).await?;
        let body: JsonRpcResponse<R> = response.json().await?;

        if let Some(JsonRpcError { code, message, .. }) = body.error {
            return Err(TraceRequestError::Rpc { method, code, message });
        }
        Ok(body.result)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, TraceRequestError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TraceRequestError::Status { status: status.as_u16(), body })
}

/// Combine the reconstructed items with the response envelope
fn into_transaction_trace(streamed: StreamedTrace) -> Result<TransactionTrace, TraceRequestError> {
    let StreamedTrace { mut trace, envelope, steps } = streamed;

    if let Some(error) = envelope.get("error").filter(|error| !error.is_null()) {
        let error: JsonRpcError = serde_json::from_value(error.clone())
            .map_err(|source| TraceRequestError::Decode { what: "JSON-RPC error", source })?;
        if steps == 0 {
            return Err(TraceRequestError::TraceUnavailable {
                code: error.code,
                message: error.message,
            });
        }
        warn!(code = error.code, message = %error.message, "trace response carries an error next to its steps");
    }

    let summary = match envelope.get("result") {
        Some(Value::Null) | None => StructLogSummary::default(),
        Some(result) => serde_json::from_value(result.clone())
            .map_err(|source| TraceRequestError::Decode { what: "struct log result", source })?,
    };
    let return_value = Bytes::from(decode_hex(&summary.return_value)?);

    let mut error = None;
    if let Some(TraceItem::Call(root)) = trace.first_mut() {
        root.success = !summary.failed;
        if summary.failed {
            root.error.get_or_insert_with(|| REVERTED.to_string());
            error = root.error.clone();
        } else {
            root.error = None;
        }
        if root.output.is_empty() {
            root.output = return_value.clone();
        }
    }

    debug!(items = trace.len(), gas_used = summary.gas, failed = summary.failed, "trace assembled");
    Ok(TransactionTrace {
        items: trace,
        gas_used: summary.gas,
        return_value,
        failed: summary.failed,
        error,
    })
}
