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

//! `TraceRequestClient` against a mocked JSON-RPC node.

use std::time::Duration;

use alloy_primitives::{address, b256, Address, Bytes, B256, U256};
use serde_json::{json, Value};
use steptrace_common::logging::ensure_test_logging;
use steptrace_engine::RootCall;
use steptrace_rpc::{TraceClientConfig, TraceRequestClient, TraceRequestError};
use tracing::info;
use wiremock::{
    matchers::{body_partial_json, method},
    Mock, MockServer, ResponseTemplate,
};

const TX_HASH: B256 = b256!("0x1111111111111111111111111111111111111111111111111111111111111111");
const SENDER_TARGET: Address = address!("0x00000000000000000000000000000000000000aa");
const CALLEE: Address = address!("0x00000000000000000000000000000000000000bb");

fn word(hex: &str) -> String {
    format!("{hex:0>64}")
}

/// Root calls `CALLEE`, which returns the word 1
fn call_steps() -> Value {
    json!([
        {"pc": 0, "op": "PUSH1", "gas": 100000, "gasCost": 3, "depth": 1, "stack": [], "memory": []},
        {"pc": 10, "op": "CALL", "gas": 99000, "gasCost": 2600, "depth": 1,
         "stack": ["0x20", "0x0", "0x0", "0x0", "0x0", format!("{:#x}", CALLEE.into_word()), "0xc350"],
         "memory": []},
        {"pc": 0, "op": "PUSH1", "gas": 50000, "gasCost": 3, "depth": 2, "stack": [], "memory": []},
        {"pc": 5, "op": "RETURN", "gas": 49900, "gasCost": 0, "depth": 2,
         "stack": ["0x20", "0x0"], "memory": [word("1")]},
        {"pc": 11, "op": "POP", "gas": 97000, "gasCost": 2, "depth": 1, "stack": ["0x1"], "memory": []},
        {"pc": 12, "op": "STOP", "gas": 96990, "gasCost": 0, "depth": 1, "stack": [], "memory": []}
    ])
}

fn trace_response(failed: bool, return_value: &str, steps: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": {
            "gas": 24010,
            "failed": failed,
            "returnValue": return_value,
            "structLogs": steps,
        }
    })
}

fn root() -> RootCall {
    RootCall { to: SENDER_TARGET, gas_limit: 120_000, ..Default::default() }
}

async fn mount_trace(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "debug_traceTransaction"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn client(server: &MockServer) -> TraceRequestClient {
    TraceRequestClient::new(
        TraceClientConfig::new(server.uri()).with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_trace_with_known_root() {
    ensure_test_logging(None);
    info!("Running test");

    let server = MockServer::start().await;
    mount_trace(&server, trace_response(false, "", call_steps())).await;

    let trace = client(&server).trace_transaction_with_root(TX_HASH, root()).await.unwrap();
    assert!(!trace.failed);
    assert_eq!(trace.gas_used, 24010);
    assert_eq!(trace.error, None);
    assert_eq!(trace.items.len(), 2);

    let root = trace.items[0].as_call().unwrap();
    assert_eq!(root.to, SENDER_TARGET);
    assert!(root.success);

    let call = trace.items[1].as_call().unwrap();
    assert_eq!(call.to, CALLEE);
    assert_eq!(call.gas_limit, 50_000);
    assert_eq!(call.output.len(), 32);
    assert_eq!(call.output[31], 1);
    assert_eq!(call.gas_spent, 2_000);
}

#[tokio::test]
async fn test_request_carries_tracer_options() {
    ensure_test_logging(None);

    let server = MockServer::start().await;
    mount_trace(&server, trace_response(false, "", json!([]))).await;

    client(&server).trace_transaction_with_root(TX_HASH, root()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["jsonrpc"], "2.0");
    assert_eq!(body["method"], "debug_traceTransaction");
    assert_eq!(body["params"][0], json!(TX_HASH));
    assert_eq!(
        body["params"][1],
        json!({
            "enableMemory": true,
            "disableStack": false,
            "disableStorage": true,
            "enableReturnData": false,
        })
    );
}

#[tokio::test]
async fn test_trace_resolves_root_from_transaction() {
    ensure_test_logging(None);
    info!("Running test");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionByHash"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {
                "hash": TX_HASH,
                "to": SENDER_TARGET,
                "input": "0xdeadbeef",
                "value": "0x3e8",
                "gas": "0x1d4c0",
            }
        })))
        .mount(&server)
        .await;
    mount_trace(&server, trace_response(false, "", call_steps())).await;

    let trace = client(&server).trace_transaction(TX_HASH).await.unwrap();
    let root = trace.items[0].as_call().unwrap();
    assert_eq!(root.to, SENDER_TARGET);
    assert_eq!(root.input, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
    assert_eq!(root.value, U256::from(1000));
    assert_eq!(root.gas_limit, 120_000);
}

#[tokio::test]
async fn test_creation_root_uses_receipt_address() {
    ensure_test_logging(None);

    let created = address!("0x00000000000000000000000000000000000000cc");
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionByHash"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {"to": null, "input": "0x6000", "value": "0x0", "gas": "0x5208"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "eth_getTransactionReceipt"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"contractAddress": created}
        })))
        .mount(&server)
        .await;

    let root = client(&server).resolve_root(TX_HASH).await.unwrap();
    assert_eq!(root.to, created);
    assert_eq!(root.gas_limit, 21_000);
}

#[tokio::test]
async fn test_unknown_transaction() {
    ensure_test_logging(None);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": null})),
        )
        .mount(&server)
        .await;

    let err = client(&server).trace_transaction(TX_HASH).await.unwrap_err();
    assert!(matches!(err, TraceRequestError::MissingTransaction(hash) if hash == TX_HASH), "{err}");
}

#[tokio::test]
async fn test_reverted_transaction_is_a_trace() {
    ensure_test_logging(None);

    let steps = json!([
        {"pc": 0, "op": "PUSH1", "gas": 50000, "depth": 1, "stack": [], "memory": []},
        {"pc": 2, "op": "REVERT", "gas": 49997, "depth": 1, "stack": ["0x4", "0x0"],
         "memory": [format!("{:0<64}", "08c379a0")]}
    ]);
    let server = MockServer::start().await;
    mount_trace(&server, trace_response(true, "08c379a0", steps)).await;

    let trace = client(&server).trace_transaction_with_root(TX_HASH, root()).await.unwrap();
    assert!(trace.failed);
    assert_eq!(trace.error.as_deref(), Some("execution reverted"));
    assert_eq!(trace.return_value, Bytes::from(vec![0x08, 0xc3, 0x79, 0xa0]));

    let root = trace.items[0].as_call().unwrap();
    assert!(!root.success);
    assert_eq!(root.output, trace.return_value);
}

#[tokio::test]
async fn test_node_error_is_trace_unavailable() {
    ensure_test_logging(None);

    let server = MockServer::start().await;
    mount_trace(
        &server,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "historical state not available"}
        }),
    )
    .await;

    let err = client(&server).trace_transaction_with_root(TX_HASH, root()).await.unwrap_err();
    match err {
        TraceRequestError::TraceUnavailable { code, message } => {
            assert_eq!(code, -32000);
            assert_eq!(message, "historical state not available");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_http_error_status() {
    ensure_test_logging(None);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = client(&server).trace_transaction_with_root(TX_HASH, root()).await.unwrap_err();
    match err {
        TraceRequestError::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "upstream unavailable");
        }
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_malformed_steps_are_stream_errors() {
    ensure_test_logging(None);

    let server = MockServer::start().await;
    mount_trace(
        &server,
        trace_response(false, "", json!([{"pc": 0, "op": "PUSH1", "gas": 10, "depth": 1}, {"pc": 1, "op": "PUSH1", "gas": 9, "depth": 3}])),
    )
    .await;

    let err = client(&server).trace_transaction_with_root(TX_HASH, root()).await.unwrap_err();
    assert!(matches!(err, TraceRequestError::Stream(_)), "{err}");
}

#[tokio::test]
async fn test_rpc_error_on_lookup() {
    ensure_test_logging(None);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "method not found"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).resolve_root(TX_HASH).await.unwrap_err();
    assert!(
        matches!(err, TraceRequestError::Rpc { method: "eth_getTransactionByHash", code: -32601, .. }),
        "{err}"
    );
}

#[test]
fn test_transaction_trace_serializes_camel_case() {
    ensure_test_logging(None);

    let trace = steptrace_rpc::TransactionTrace {
        items: Default::default(),
        gas_used: 21_000,
        return_value: Bytes::new(),
        failed: false,
        error: None,
    };
    let value = serde_json::to_value(&trace).unwrap();
    assert_eq!(value, json!({"items": [], "gasUsed": 21000, "returnValue": "0x", "failed": false}));
    assert!(matches!(value["items"], Value::Array(_)));
}
