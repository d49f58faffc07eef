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

//! Call-tree reconstruction from execution steps.
//!
//! [`ExecutionTraceVisitor`] consumes struct-logger steps one at a time and
//! rebuilds the tree of calls, creations, logs and self-destructs as a flat,
//! pre-ordered list of [`TraceItem`]s. Only the stack of open contexts and a
//! summary of the previous step are kept between steps, so memory use does
//! not grow with the length of the trace.
//!
//! Context boundaries are found from the reported depth:
//!
//! - a call/create opcode followed by a deeper step enters its context;
//! - a call/create opcode followed by a step at the same depth never ran any
//!   code (precompile, account without code, empty init code) and is closed
//!   immediately;
//! - `STOP`/`RETURN`/`REVERT`/`SELFDESTRUCT` close the current context;
//! - a drop in depth without a terminator is an exceptional halt.
//!
//! The step that resumes the parent after an exit carries the outcome of the
//! child on top of its stack (success flag or created address) and the gas
//! the parent has left, which closes the child's gas window.

mod depth;
mod gas;

pub use depth::normalize_depths;
use gas::GasWindow;

use std::collections::VecDeque;

use alloy_primitives::{Address, Bytes, B256, U256};
use steptrace_common::{
    address_from_word, ByteError, CallFrame, CallKind, CreateFrame, CreateKind, ExecutionStep,
    LogFrame, OpcodeFamily, SelfDestructFrame, TerminatorKind, Trace, TraceItem, UnknownFrame,
};
use tracing::{debug, trace, warn};

use crate::{RecentSteps, StepSummary, TraceError};

/// Steps remembered for error reports
const RECENT_STEPS: usize = 4;

const REVERTED: &str = "execution reverted";
const HALTED: &str = "execution halted";

/// The top-level call of a transaction
///
/// The struct logger never shows the transaction's own call, so it is seeded
/// from the transaction itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootCall {
    /// Transaction recipient (the created address for creation transactions)
    pub to: Address,
    /// Transaction input
    pub input: Bytes,
    /// Value sent with the transaction
    pub value: U256,
    /// Transaction gas limit
    pub gas_limit: u64,
}

/// An open context: the item it belongs to and its gas window, if any
#[derive(Debug, Clone, Copy)]
struct OpenContext {
    item: usize,
    window: Option<usize>,
}

/// A context that has been closed but whose parent has not resumed yet
#[derive(Debug, Clone, Copy)]
struct PendingExit {
    item: usize,
    window: Option<usize>,
    resume_depth: u64,
}

#[derive(Debug, Clone)]
struct PrevStep {
    depth: u64,
    gas: u64,
    error: Option<String>,
}

/// How a context ended, as far as the closing step can tell
struct Outcome {
    output: Bytes,
    success: bool,
    error: Option<String>,
}

impl Outcome {
    fn halted(error: Option<&str>) -> Self {
        let reason = match error {
            Some(reason) if !reason.is_empty() => reason,
            _ => HALTED,
        };
        Self { output: Bytes::new(), success: false, error: Some(reason.to_string()) }
    }
}

/// Who owns the code executing a `SELFDESTRUCT`
#[derive(Clone, Copy)]
enum Owner {
    Account(Address),
    Creation(usize),
}

/// Stateful, single-pass reconstruction of a call tree
///
/// Feed every step in order through [`visit`](Self::visit), then call
/// [`finalize`](Self::finalize), which consumes the visitor.
#[derive(Debug)]
pub struct ExecutionTraceVisitor {
    items: Vec<TraceItem>,
    contexts: Vec<OpenContext>,
    /// One window per call/create item, in emission order
    windows: Vec<GasWindow>,
    /// Window of a context opened by the previous step
    pending_enter: Option<usize>,
    pending_exit: Option<PendingExit>,
    prev: Option<PrevStep>,
    recent: VecDeque<StepSummary>,
    /// `(self-destruct item, create item)` pairs resolved at finalization
    destroyed_creations: Vec<(usize, usize)>,
    steps: usize,
}

impl ExecutionTraceVisitor {
    /// Create a visitor with the transaction's root call already open
    pub fn new(root: RootCall) -> Self {
        let frame = CallFrame {
            kind: CallKind::Call,
            depth: 0,
            to: root.to,
            value: root.value,
            gas_limit: root.gas_limit,
            gas_provided: root.gas_limit,
            gas_spent: 0,
            input: root.input,
            output: Bytes::new(),
            success: false,
            error: None,
        };
        Self {
            items: vec![TraceItem::Call(frame)],
            contexts: vec![OpenContext { item: 0, window: Some(0) }],
            windows: vec![GasWindow::open(root.gas_limit)],
            pending_enter: None,
            pending_exit: None,
            prev: None,
            recent: VecDeque::with_capacity(RECENT_STEPS),
            destroyed_creations: Vec::new(),
            steps: 0,
        }
    }

    /// Number of steps visited so far
    pub fn steps_visited(&self) -> usize {
        self.steps
    }

    /// Number of contexts currently open
    pub fn open_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Items emitted so far, with provisional outcomes and gas figures
    pub fn items(&self) -> &[TraceItem] {
        &self.items
    }

    /// Process the next step
    pub fn visit(&mut self, step: &ExecutionStep) -> Result<(), TraceError> {
        self.remember(step);
        match self.prev.take() {
            Some(prev) => self.transition(&prev, step)?,
            None => {
                let root = &mut self.windows[0];
                root.left_before_enter = step.gas;
                root.left_just_after_enter = Some(step.gas);
            }
        }
        self.dispatch(step)?;
        self.prev = Some(PrevStep { depth: step.depth, gas: step.gas, error: step.error.clone() });
        self.steps += 1;
        Ok(())
    }

    /// Close the trace and return the finished item list
    ///
    /// Fails if contexts are left open or the gas windows do not pair up with
    /// the emitted calls and creations.
    pub fn finalize(mut self) -> Result<Trace, TraceError> {
        match self.prev.take() {
            None => {
                // No instruction ran: a transfer or a call into an account without code
                debug!("no steps visited, closing root call without execution");
                let gas_limit = self.windows[0].left_before_enter;
                self.windows[0] = GasWindow {
                    left_before_enter: gas_limit,
                    left_just_after_enter: Some(gas_limit),
                    left_before_exit: Some(gas_limit),
                    left_just_after_exit: Some(gas_limit),
                };
                if let TraceItem::Call(root) = &mut self.items[0] {
                    root.success = true;
                }
                self.contexts.clear();
            }
            Some(last) => {
                if self.pending_enter.is_some() {
                    return Err(TraceError::Unbalanced {
                        open: self.contexts.len(),
                        recent: self.recent_steps(),
                    });
                }
                if let Some(exit) = self.pending_exit.take() {
                    self.resume_window(&exit, last.gas);
                } else if last.error.is_some() && self.contexts.len() == 1 {
                    debug!(error = ?last.error, "top-level call halted on the final step");
                    let exit = self.close_top(last.gas, Outcome::halted(last.error.as_deref()), 0)?;
                    self.resume_window(&exit, last.gas);
                }
            }
        }

        if !self.contexts.is_empty() {
            return Err(TraceError::Unbalanced {
                open: self.contexts.len(),
                recent: self.recent_steps(),
            });
        }

        let frames = self.items.iter().filter(|item| item.is_call_or_create()).count();
        if frames != self.windows.len() {
            return Err(TraceError::GasWindowMismatch { windows: self.windows.len(), frames });
        }

        let mut windows = self.windows.iter();
        for (index, item) in self.items.iter_mut().enumerate() {
            if !item.is_call_or_create() {
                continue;
            }
            let Some(window) = windows.next() else { break };
            if !window.is_closed() {
                return Err(TraceError::UnclosedGasWindow { item: index });
            }
            if window.left_just_after_exit > Some(window.left_before_enter) {
                warn!(item = index, ?window, "gas increased across a context, clamping spend to zero");
            }
            let spent = window.gas_spent().unwrap_or_default();
            match item {
                TraceItem::Call(frame) => {
                    frame.gas_provided = window.left_before_enter;
                    frame.gas_spent = spent;
                }
                TraceItem::Create(frame) => {
                    frame.gas_provided = window.left_before_enter;
                    frame.gas_spent = spent;
                }
                _ => {}
            }
        }

        for (destruct, creation) in std::mem::take(&mut self.destroyed_creations) {
            let address = self.items[creation].as_create().map(|frame| frame.deployed_address);
            if let (Some(address), TraceItem::SelfDestruct(frame)) =
                (address, &mut self.items[destruct])
            {
                frame.contract = address;
            }
        }

        normalize_depths(&mut self.items);
        debug!(steps = self.steps, items = self.items.len(), "trace reconstructed");
        Ok(Trace::from(self.items))
    }

    /// Reconcile the previous step with the current one: enter, exit or resume
    fn transition(&mut self, prev: &PrevStep, step: &ExecutionStep) -> Result<(), TraceError> {
        if step.depth > prev.depth {
            if step.depth - prev.depth > 1 || self.pending_exit.is_some() {
                return Err(TraceError::DepthJump {
                    from: prev.depth,
                    to: step.depth,
                    recent: self.recent_steps(),
                });
            }
            match self.pending_enter.take() {
                Some(window) => self.windows[window].left_just_after_enter = Some(step.gas),
                None => self.open_unknown(step),
            }
            return Ok(());
        }

        if self.pending_enter.take().is_some() {
            // The opener produced no steps of its own
            trace!(depth = prev.depth, "context exited without executing any instruction");
            let outcome = Outcome { output: Bytes::new(), success: true, error: None };
            let exit = self.close_top(prev.gas, outcome, prev.depth)?;
            self.pending_exit = Some(exit);
        }

        if step.depth < prev.depth {
            if prev.depth - step.depth > 1 {
                return Err(TraceError::DepthJump {
                    from: prev.depth,
                    to: step.depth,
                    recent: self.recent_steps(),
                });
            }
            if self.pending_exit.is_none() {
                debug!(
                    from = prev.depth,
                    to = step.depth,
                    error = ?prev.error,
                    "context halted without a terminator"
                );
                let exit =
                    self.close_top(prev.gas, Outcome::halted(prev.error.as_deref()), step.depth)?;
                self.pending_exit = Some(exit);
            }
        }

        if let Some(exit) = self.pending_exit.take() {
            if exit.resume_depth != step.depth {
                return Err(TraceError::MissedResume {
                    expected: exit.resume_depth,
                    found: step.depth,
                    recent: self.recent_steps(),
                });
            }
            self.resume_window(&exit, step.gas);
            self.infer_outcome(exit.item, step);
        }
        Ok(())
    }

    /// Act on the current step's opcode
    fn dispatch(&mut self, step: &ExecutionStep) -> Result<(), TraceError> {
        let family = step.family();
        if step.error.is_some() {
            // A failing instruction never opens a context or emits anything; an
            // exit opcode that fails still ends its context.
            if matches!(family, OpcodeFamily::Terminator(_) | OpcodeFamily::SelfDestruct) {
                let outcome = Outcome::halted(step.error.as_deref());
                let exit = self.close_top(step.gas, outcome, step.depth.saturating_sub(1))?;
                self.pending_exit = Some(exit);
            }
            return Ok(());
        }

        match family {
            OpcodeFamily::Call(kind) => self.open_call(kind, step),
            OpcodeFamily::Create(kind) => self.open_create(kind, step),
            OpcodeFamily::Terminator(kind) => self.exit_context(kind, step),
            OpcodeFamily::SelfDestruct => self.self_destruct(step),
            OpcodeFamily::Log(topics) => self.log(topics, step),
            OpcodeFamily::Other => Ok(()),
        }
    }

    fn open_call(&mut self, kind: CallKind, step: &ExecutionStep) -> Result<(), TraceError> {
        let (gas_limit, to, value, input) =
            call_operands(kind, step).map_err(|source| self.operand_error(step, source))?;

        trace!(%kind, %to, gas_limit, pc = step.pc, "opening call");
        let frame = CallFrame {
            kind,
            depth: self.contexts.len(),
            to,
            value,
            gas_limit,
            gas_provided: 0,
            gas_spent: 0,
            input,
            output: Bytes::new(),
            success: false,
            error: None,
        };
        self.open_context(TraceItem::Call(frame), step.gas);
        Ok(())
    }

    fn open_create(&mut self, kind: CreateKind, step: &ExecutionStep) -> Result<(), TraceError> {
        let (value, init_code, salt) =
            create_operands(kind, step).map_err(|source| self.operand_error(step, source))?;

        trace!(%kind, init_code_len = init_code.len(), pc = step.pc, "opening creation");
        let frame = CreateFrame {
            kind,
            depth: self.contexts.len(),
            salt,
            value,
            gas_provided: 0,
            gas_spent: 0,
            init_code,
            deployed_address: Address::ZERO,
            deployed_code: Bytes::new(),
            success: false,
            error: None,
        };
        self.open_context(TraceItem::Create(frame), step.gas);
        Ok(())
    }

    fn open_context(&mut self, item: TraceItem, gas: u64) {
        let window = self.windows.len();
        self.windows.push(GasWindow::open(gas));
        let item = self.push_item(item);
        self.contexts.push(OpenContext { item, window: Some(window) });
        self.pending_enter = Some(window);
    }

    fn open_unknown(&mut self, step: &ExecutionStep) {
        warn!(depth = step.depth, pc = step.pc, op = %step.op, "entered a context without a call or create");
        let frame = UnknownFrame { depth: self.contexts.len(), output: Bytes::new() };
        let item = self.push_item(TraceItem::Unknown(frame));
        self.contexts.push(OpenContext { item, window: None });
    }

    fn exit_context(&mut self, kind: TerminatorKind, step: &ExecutionStep) -> Result<(), TraceError> {
        let outcome = match kind {
            TerminatorKind::Stop => Outcome { output: Bytes::new(), success: true, error: None },
            TerminatorKind::Return | TerminatorKind::Revert => {
                let output = step
                    .read_memory_operands(0, 1)
                    .map_err(|source| self.operand_error(step, source))?;
                let reverted = kind == TerminatorKind::Revert;
                Outcome {
                    output,
                    success: !reverted,
                    error: reverted.then(|| REVERTED.to_string()),
                }
            }
        };
        let exit = self.close_top(step.gas, outcome, step.depth.saturating_sub(1))?;
        self.pending_exit = Some(exit);
        Ok(())
    }

    fn self_destruct(&mut self, step: &ExecutionStep) -> Result<(), TraceError> {
        let beneficiary =
            step.stack().peek_address(0).map_err(|source| self.operand_error(step, source))?;

        // Delegated frames run someone else's code on behalf of the caller, so
        // the destroyed account is the nearest frame with its own identity.
        let owner = self
            .contexts
            .iter()
            .rev()
            .find_map(|context| match &self.items[context.item] {
                TraceItem::Call(frame) if frame.kind.runs_in_caller_context() => None,
                TraceItem::Call(frame) => Some(Owner::Account(frame.to)),
                TraceItem::Create(_) => Some(Owner::Creation(context.item)),
                _ => None,
            })
            .ok_or_else(|| TraceError::MissingSelfDestructContract {
                recent: self.recent_steps(),
            })?;

        let contract = match owner {
            Owner::Account(address) => address,
            Owner::Creation(_) => Address::ZERO,
        };
        trace!(%contract, %beneficiary, pc = step.pc, "self-destruct");
        let frame = SelfDestructFrame { depth: self.contexts.len(), contract, beneficiary };
        let index = self.push_item(TraceItem::SelfDestruct(frame));
        if let Owner::Creation(creation) = owner {
            self.destroyed_creations.push((index, creation));
        }

        let outcome = Outcome { output: Bytes::new(), success: true, error: None };
        let exit = self.close_top(step.gas, outcome, step.depth.saturating_sub(1))?;
        self.pending_exit = Some(exit);
        Ok(())
    }

    fn log(&mut self, topics: usize, step: &ExecutionStep) -> Result<(), TraceError> {
        let (data, topics) =
            log_operands(topics, step).map_err(|source| self.operand_error(step, source))?;

        let frame = LogFrame { depth: self.contexts.len(), data, topics };
        self.push_item(TraceItem::Log(frame));
        Ok(())
    }

    /// Pop the innermost context and record how it ended
    fn close_top(
        &mut self,
        gas_before_exit: u64,
        outcome: Outcome,
        resume_depth: u64,
    ) -> Result<PendingExit, TraceError> {
        let context = self
            .contexts
            .pop()
            .ok_or_else(|| TraceError::ContextUnderflow { recent: self.recent_steps() })?;

        if let Some(index) = context.window {
            let window = &mut self.windows[index];
            window.left_before_exit = Some(gas_before_exit);
            trace!(item = context.item, used = ?window.gas_used_inside(), "closing context");
        }

        let Outcome { output, success, error } = outcome;
        match &mut self.items[context.item] {
            TraceItem::Call(frame) => {
                frame.output = output;
                frame.success = success;
                frame.error = error;
            }
            TraceItem::Create(frame) => {
                frame.deployed_code = output;
                frame.success = success;
                frame.error = error;
            }
            TraceItem::Unknown(frame) => frame.output = output,
            TraceItem::Log(_) | TraceItem::SelfDestruct(_) => {}
        }

        Ok(PendingExit { item: context.item, window: context.window, resume_depth })
    }

    fn resume_window(&mut self, exit: &PendingExit, gas: u64) {
        if let Some(index) = exit.window {
            self.windows[index].left_just_after_exit = Some(gas);
        }
    }

    /// Read the child's result from the parent's stack after it resumed
    ///
    /// A stack disabled in the tracer leaves the outcome derived from the
    /// exiting opcode in place.
    fn infer_outcome(&mut self, item: usize, step: &ExecutionStep) {
        let Ok(top) = step.stack().peek(0) else {
            trace!(item, "no stack to read the context outcome from");
            return;
        };
        match &mut self.items[item] {
            TraceItem::Call(frame) => {
                frame.success = !top.is_zero();
                if frame.success {
                    frame.error = None;
                } else if frame.error.is_none() {
                    frame.error = Some("call failed".to_string());
                }
            }
            TraceItem::Create(frame) => {
                frame.deployed_address = address_from_word(top);
                frame.success = !frame.deployed_address.is_zero();
                if frame.success {
                    frame.error = None;
                } else if frame.error.is_none() {
                    frame.error = Some("creation failed".to_string());
                }
            }
            _ => {}
        }
    }

    fn push_item(&mut self, item: TraceItem) -> usize {
        self.items.push(item);
        self.items.len() - 1
    }

    fn remember(&mut self, step: &ExecutionStep) {
        if self.recent.len() == RECENT_STEPS {
            self.recent.pop_front();
        }
        self.recent.push_back(StepSummary { pc: step.pc, op: step.op.clone(), depth: step.depth });
    }

    fn recent_steps(&self) -> RecentSteps {
        RecentSteps::from(&self.recent)
    }

    fn operand_error(&self, step: &ExecutionStep, source: ByteError) -> TraceError {
        TraceError::Operand { op: step.op.clone(), source, recent: self.recent_steps() }
    }
}

/// `gas, to, [value,] argsOffset, argsLength` from the top of the stack
fn call_operands(
    kind: CallKind,
    step: &ExecutionStep,
) -> Result<(u64, Address, U256, Bytes), ByteError> {
    let stack = step.stack();
    let gas_limit = stack.peek_saturating_u64(0)?;
    let to = stack.peek_address(1)?;
    let (value, args) =
        if kind.transfers_value() { (stack.peek(2)?, (3, 4)) } else { (U256::ZERO, (2, 3)) };
    let input = step.read_memory_operands(args.0, args.1)?;
    Ok((gas_limit, to, value, input))
}

/// `value, offset, length[, salt]`
fn create_operands(
    kind: CreateKind,
    step: &ExecutionStep,
) -> Result<(U256, Bytes, Option<B256>), ByteError> {
    let value = step.stack().peek(0)?;
    let init_code = step.read_memory_operands(1, 2)?;
    let salt = match kind {
        CreateKind::Create2 => Some(step.stack().peek_word(3)?),
        CreateKind::Create => None,
    };
    Ok((value, init_code, salt))
}

/// `offset, length, topic0..topicN`
fn log_operands(topics: usize, step: &ExecutionStep) -> Result<(Bytes, Vec<B256>), ByteError> {
    let data = step.read_memory_operands(0, 1)?;
    let topics = (0..topics).map(|i| step.stack().peek_word(2 + i)).collect::<Result<_, _>>()?;
    Ok((data, topics))
}
