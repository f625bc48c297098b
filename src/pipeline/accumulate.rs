//! Tool-call reassembly.
//!
//! The accumulator owns all cross-frame tool-call state: which ids have
//! started, which stream index maps to which id (providers omit the id on
//! follow-up fragments), and the per-id argument buffer. Its output upholds
//! the ordering contract downstream stages rely on:
//!
//! - `ToolStart` exactly once per id, before any of its fragments;
//! - every emitted `ToolDelta` carries a resolved id;
//! - `ToolComplete` exactly once per id, after a successful JSON parse of
//!   the accumulated arguments; a parse failure is a terminal error.
//!
//! Calls still open when the stream ends (or an explicit `End` arrives) are
//! finalized in start order.

use std::collections::HashMap;

use futures::StreamExt;

use crate::pipeline::select::Selection;
use crate::pipeline::PipelineError;
use crate::BoxStream;

#[derive(Default)]
struct CallState {
    name: Option<String>,
    started: bool,
    completed: bool,
    /// Full accumulated argument text.
    buffer: String,
    /// Fragments that arrived before the call could start (no name yet).
    unemitted: String,
}

/// Stateful reassembly stage.
pub struct ToolCallAccumulator {
    calls: HashMap<String, CallState>,
    index_to_id: HashMap<u32, String>,
    /// Ids in start order, for deterministic finalization.
    order: Vec<String>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
            index_to_id: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn apply(mut self, mut input: BoxStream<Selection>) -> BoxStream<Selection> {
        let stream = async_stream::stream! {
            loop {
                match input.next().await {
                    Some(Ok(selection)) => {
                        let mut out = Vec::new();
                        match self.ingest(selection, &mut out) {
                            Ok(()) => {
                                for item in out {
                                    yield Ok(item);
                                }
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        yield Err(e);
                        return;
                    }
                    None => {
                        // EOF without explicit End: close whatever is open.
                        let mut out = Vec::new();
                        match self.finalize_all(&mut out) {
                            Ok(()) => {
                                for item in out {
                                    yield Ok(item);
                                }
                            }
                            Err(e) => yield Err(e),
                        }
                        return;
                    }
                }
            }
        };
        Box::pin(stream)
    }

    fn ingest(
        &mut self,
        selection: Selection,
        out: &mut Vec<Selection>,
    ) -> Result<(), crate::Error> {
        match selection {
            Selection::ToolStart { index, id, name } => {
                if let Some(i) = index {
                    self.index_to_id.insert(i, id.clone());
                }
                let state = self.calls.entry(id.clone()).or_default();
                if state.started {
                    return Ok(()); // duplicate start: already announced
                }
                state.started = true;
                state.name = Some(name.clone());
                self.order.push(id.clone());
                out.push(Selection::ToolStart { index, id, name });
            }

            Selection::ToolDelta {
                index,
                id,
                name,
                args_delta,
            } => {
                let resolved = match id {
                    Some(id) => {
                        if let Some(i) = index {
                            self.index_to_id.insert(i, id.clone());
                        }
                        Some(id)
                    }
                    None => index.and_then(|i| self.index_to_id.get(&i).cloned()),
                };
                let Some(id) = resolved else {
                    return Ok(()); // unattributable fragment
                };

                let state = self.calls.entry(id.clone()).or_default();
                if let Some(n) = name {
                    state.name.get_or_insert(n);
                }
                state.buffer.push_str(&args_delta);

                if state.started {
                    if !args_delta.is_empty() {
                        out.push(Selection::ToolDelta {
                            index,
                            id: Some(id),
                            name: None,
                            args_delta,
                        });
                    }
                } else if let Some(tool_name) = state.name.clone() {
                    // Name just became known: announce, then flush anything
                    // buffered before the announcement.
                    state.started = true;
                    let pending = std::mem::take(&mut state.unemitted) + &args_delta;
                    self.order.push(id.clone());
                    out.push(Selection::ToolStart {
                        index,
                        id: id.clone(),
                        name: tool_name,
                    });
                    if !pending.is_empty() {
                        out.push(Selection::ToolDelta {
                            index,
                            id: Some(id),
                            name: None,
                            args_delta: pending,
                        });
                    }
                } else {
                    state.unemitted.push_str(&args_delta);
                }
            }

            Selection::ToolEnd { index } => {
                // Also fires for non-tool blocks; only a registered index
                // closes a call.
                if let Some(id) = index.and_then(|i| self.index_to_id.get(&i).cloned()) {
                    self.finalize(&id, out)?;
                }
            }

            Selection::End => {
                self.finalize_all(out)?;
                out.push(Selection::End);
            }

            other => out.push(other),
        }
        Ok(())
    }

    fn finalize(&mut self, id: &str, out: &mut Vec<Selection>) -> Result<(), crate::Error> {
        let Some(state) = self.calls.get_mut(id) else {
            return Ok(());
        };
        if state.completed || !state.started {
            return Ok(());
        }
        // Empty arguments are legal (no-parameter tools); anything else
        // must be complete JSON by now.
        if !state.buffer.trim().is_empty() {
            if let Err(e) = serde_json::from_str::<serde_json::Value>(&state.buffer) {
                return Err(PipelineError::ToolArgsParse {
                    id: id.to_string(),
                    detail: e.to_string(),
                }
                .into());
            }
        }
        state.completed = true;
        out.push(Selection::ToolComplete { id: id.to_string() });
        Ok(())
    }

    fn finalize_all(&mut self, out: &mut Vec<Selection>) -> Result<(), crate::Error> {
        for id in self.order.clone() {
            self.finalize(&id, out)?;
        }
        Ok(())
    }
}

impl Default for ToolCallAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
