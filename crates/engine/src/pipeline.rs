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

//! Incremental decoding of a `debug_traceTransaction` response body.

use serde_json::Value;
use steptrace_common::{ExecutionStep, Trace};
use tracing::{debug, trace};

use crate::{
    ExecutionTraceVisitor, IncrementalJsonBuilder, JsonEvent, JsonLexer, StreamError,
};

/// Key of the step array in struct-logger output
pub const STRUCT_LOGS_KEY: &str = "structLogs";

/// Log progress every this many steps
const PROGRESS_INTERVAL: usize = 100_000;

#[derive(Debug)]
struct PathSegment {
    is_array: bool,
    key: Option<String>,
}

/// Everything recovered from a streamed trace response
#[derive(Debug)]
pub struct StreamedTrace {
    /// Reconstructed call tree
    pub trace: Trace,
    /// The document with the `structLogs` elements removed
    pub envelope: Value,
    /// Number of steps visited
    pub steps: usize,
}

/// Feeds a trace response through lexer, builder and visitor chunk by chunk
///
/// Each element of any array keyed `structLogs` is materialized as soon as it
/// closes, handed to the visitor and dropped. Everything else (gas, failure
/// flag, return value, or a JSON-RPC error) accumulates into the envelope.
#[derive(Debug)]
pub struct StructLogStream {
    lexer: JsonLexer,
    builder: IncrementalJsonBuilder,
    visitor: ExecutionTraceVisitor,
    path: Vec<PathSegment>,
    pending_key: Option<String>,
    steps: usize,
}

impl StructLogStream {
    /// Create a stream driving `visitor`
    pub fn new(visitor: ExecutionTraceVisitor) -> Self {
        Self {
            lexer: JsonLexer::new(),
            builder: IncrementalJsonBuilder::new(),
            visitor,
            path: Vec::new(),
            pending_key: None,
            steps: 0,
        }
    }

    /// Number of steps visited so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Consume the next chunk of the response body
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), StreamError> {
        for event in self.lexer.feed(chunk)? {
            self.handle(event)?;
        }
        Ok(())
    }

    /// Finish the stream and the reconstruction
    pub fn finish(mut self) -> Result<StreamedTrace, StreamError> {
        for event in self.lexer.finish()? {
            self.handle(event)?;
        }
        let envelope = self.builder.build()?;
        let trace = self.visitor.finalize()?;
        debug!(steps = self.steps, items = trace.len(), "struct log stream finished");
        Ok(StreamedTrace { trace, envelope, steps: self.steps })
    }

    fn handle(&mut self, event: JsonEvent) -> Result<(), StreamError> {
        let closes_object = event == JsonEvent::CloseObject;
        match &event {
            JsonEvent::Key(name) => self.pending_key = Some(name.clone()),
            JsonEvent::OpenObject | JsonEvent::OpenArray => {
                let is_array = event == JsonEvent::OpenArray;
                self.path.push(PathSegment { is_array, key: self.pending_key.take() });
            }
            JsonEvent::CloseObject | JsonEvent::CloseArray => {
                self.path.pop();
            }
            JsonEvent::Value(_) => self.pending_key = None,
        }
        self.builder.push(event);

        if closes_object && self.in_struct_logs() {
            if let Some(element) = self.builder.pop()? {
                self.visit(element)?;
            }
        }
        Ok(())
    }

    /// Whether the innermost open container is a `structLogs` array
    fn in_struct_logs(&self) -> bool {
        self.path
            .last()
            .is_some_and(|segment| segment.is_array && segment.key.as_deref() == Some(STRUCT_LOGS_KEY))
    }

    fn visit(&mut self, element: Value) -> Result<(), StreamError> {
        let index = self.steps;
        let step: ExecutionStep =
            serde_json::from_value(element).map_err(|source| StreamError::Step { index, source })?;
        trace!(index, %step, "visiting step");
        self.visitor.visit(&step)?;
        self.steps += 1;
        if self.steps % PROGRESS_INTERVAL == 0 {
            debug!(steps = self.steps, open = self.visitor.open_contexts(), "streaming struct logs");
        }
        Ok(())
    }
}

/// Reconstruct a trace from an in-memory response body
pub fn reconstruct_from_slice(
    visitor: ExecutionTraceVisitor,
    body: &[u8],
) -> Result<StreamedTrace, StreamError> {
    let mut stream = StructLogStream::new(visitor);
    stream.feed(body)?;
    stream.finish()
}

/// Reconstruct a trace from already-decoded steps
pub fn reconstruct_from_steps<'a>(
    mut visitor: ExecutionTraceVisitor,
    steps: impl IntoIterator<Item = &'a ExecutionStep>,
) -> Result<Trace, StreamError> {
    for step in steps {
        visitor.visit(step)?;
    }
    Ok(visitor.finalize()?)
}
