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

//! Hand-written struct-log traces shared by the engine tests.
#![allow(dead_code)]

use alloy_primitives::{Address, B256, U256};
use steptrace_common::{ExecutionStep, Trace};
use steptrace_engine::{ExecutionTraceVisitor, RootCall, TraceError};

pub const ROOT: Address = Address::repeat_byte(0xaa);
pub const CALLEE: Address = Address::repeat_byte(0xbb);
pub const LIBRARY: Address = Address::repeat_byte(0x11);
pub const CREATED: Address = Address::repeat_byte(0xcc);
pub const BENEFICIARY: Address = Address::repeat_byte(0xee);
pub const PRECOMPILE: Address = Address::with_last_byte(0x04);

pub fn w(value: u64) -> U256 {
    U256::from(value)
}

pub fn addr_word(address: Address) -> U256 {
    U256::from_be_slice(address.into_word().as_slice())
}

pub fn step(depth: u64, pc: u64, op: &str, gas: u64) -> ExecutionStep {
    ExecutionStep::new(depth, pc, op, gas)
}

pub fn root_call() -> RootCall {
    RootCall { to: ROOT, gas_limit: 120_000, ..Default::default() }
}

pub fn run(steps: &[ExecutionStep]) -> Result<Trace, TraceError> {
    let mut visitor = ExecutionTraceVisitor::new(root_call());
    for step in steps {
        visitor.visit(step)?;
    }
    visitor.finalize()
}

/// A word of memory holding the value 1
pub fn one_word() -> Vec<u8> {
    let mut word = vec![0u8; 32];
    word[31] = 1;
    word
}

/// Root calls `CALLEE`, which returns 32 bytes
pub fn call_returning_word() -> Vec<ExecutionStep> {
    vec![
        step(1, 0, "PUSH1", 100_000),
        step(1, 10, "CALL", 99_000).with_stack(vec![
            w(32),
            w(0),
            w(0),
            w(0),
            w(0),
            addr_word(CALLEE),
            w(50_000),
        ]),
        step(2, 0, "PUSH1", 50_000),
        step(2, 5, "RETURN", 49_900).with_stack(vec![w(32), w(0)]).with_memory(one_word()),
        step(1, 11, "POP", 97_000).with_stack(vec![w(1)]),
        step(1, 12, "STOP", 96_990),
    ]
}

/// Root calls `CALLEE`, which reverts without data
pub fn call_reverting() -> Vec<ExecutionStep> {
    vec![
        step(1, 0, "PUSH1", 100_000),
        step(1, 10, "CALL", 99_000).with_stack(vec![
            w(0),
            w(0),
            w(0),
            w(0),
            w(0),
            addr_word(CALLEE),
            w(50_000),
        ]),
        step(2, 0, "PUSH1", 50_000),
        step(2, 5, "REVERT", 49_900).with_stack(vec![w(0), w(0)]),
        step(1, 11, "POP", 97_000).with_stack(vec![w(0)]),
        step(1, 12, "STOP", 96_990),
    ]
}

pub const INIT_CODE: [u8; 12] =
    [0x60, 0x0a, 0x60, 0x0c, 0x60, 0x00, 0x39, 0x60, 0x0a, 0x60, 0x00, 0xf3];
pub const RUNTIME_CODE: [u8; 10] = [0x60, 0x2a, 0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3];

pub fn salt() -> B256 {
    B256::repeat_byte(0x5a)
}

/// Root deploys `RUNTIME_CODE` at `CREATED` through `CREATE2`
pub fn create2_deployment() -> Vec<ExecutionStep> {
    vec![
        step(1, 0, "PUSH1", 200_000),
        step(1, 20, "CREATE2", 190_000)
            .with_stack(vec![U256::from_be_bytes(salt().0), w(12), w(0), w(0)])
            .with_memory(INIT_CODE.to_vec()),
        step(2, 0, "PUSH1", 187_000),
        step(2, 11, "RETURN", 186_900)
            .with_stack(vec![w(10), w(0)])
            .with_memory(RUNTIME_CODE.to_vec()),
        step(1, 21, "POP", 150_000).with_stack(vec![addr_word(CREATED)]),
        step(1, 22, "STOP", 149_990),
    ]
}

/// Root calls `CALLEE`, which delegates to `LIBRARY`, whose code self-destructs
pub fn delegated_self_destruct() -> Vec<ExecutionStep> {
    vec![
        step(1, 0, "PUSH1", 100_000),
        step(1, 1, "CALL", 99_000).with_stack(vec![
            w(0),
            w(0),
            w(0),
            w(0),
            w(0),
            addr_word(CALLEE),
            w(60_000),
        ]),
        step(2, 0, "PUSH1", 60_000),
        step(2, 1, "DELEGATECALL", 59_000).with_stack(vec![
            w(0),
            w(0),
            w(0),
            w(0),
            addr_word(LIBRARY),
            w(40_000),
        ]),
        step(3, 0, "PUSH20", 40_000),
        step(3, 21, "SELFDESTRUCT", 39_997).with_stack(vec![addr_word(BENEFICIARY)]),
        step(2, 2, "POP", 50_000).with_stack(vec![w(1)]),
        step(2, 3, "STOP", 49_998),
        step(1, 2, "POP", 95_000).with_stack(vec![w(1)]),
        step(1, 3, "STOP", 94_998),
    ]
}

pub fn topic(byte: u8) -> U256 {
    U256::from_be_bytes(B256::repeat_byte(byte).0)
}

/// Log memory: `deadbeef cafebabe` followed by zeros
pub fn log_memory() -> Vec<u8> {
    let mut memory = vec![0u8; 32];
    memory[..8].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0xca, 0xfe, 0xba, 0xbe]);
    memory
}

/// A precompile call, three `LOG2`s and a second call, all in the root
pub fn logs_between_calls() -> Vec<ExecutionStep> {
    vec![
        step(1, 0, "PUSH1", 100_000),
        step(1, 1, "STATICCALL", 99_000).with_stack(vec![
            w(0),
            w(0),
            w(0),
            w(0),
            addr_word(PRECOMPILE),
            w(1_000),
        ]),
        step(1, 2, "POP", 98_000).with_stack(vec![w(1)]),
        step(1, 3, "LOG2", 97_000)
            .with_stack(vec![topic(2), topic(1), w(4), w(0)])
            .with_memory(log_memory()),
        step(1, 4, "LOG2", 96_000)
            .with_stack(vec![topic(4), topic(3), w(4), w(4)])
            .with_memory(log_memory()),
        step(1, 5, "LOG2", 95_000)
            .with_stack(vec![topic(6), topic(5), w(0), w(0)])
            .with_memory(log_memory()),
        step(1, 6, "CALL", 94_000).with_stack(vec![
            w(0),
            w(0),
            w(0),
            w(0),
            w(0),
            addr_word(CALLEE),
            w(5_000),
        ]),
        step(2, 0, "STOP", 5_000),
        step(1, 7, "POP", 93_000).with_stack(vec![w(1)]),
        step(1, 8, "STOP", 92_990),
    ]
}

/// Every scenario above
pub fn all_scenarios() -> Vec<Vec<ExecutionStep>> {
    vec![
        call_returning_word(),
        call_reverting(),
        create2_deployment(),
        delegated_self_destruct(),
        logs_between_calls(),
    ]
}
