//! Replays runtime field-access observations against the static def-use pairs.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ir::{FieldId, MethodId};
use crate::store::{DefUsePair, DefUseStore, Site};

/// One line of a trace file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub(crate) enum TraceEvent {
    Enter { method: MethodId },
    /// The current frame is about to invoke a method from `offset`.
    Call { offset: u32 },
    Field {
        field: FieldId,
        offset: u32,
        kind: AccessKind,
    },
    Leave,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AccessKind {
    Def,
    Use,
}

/// Lifecycle of one call frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FrameState {
    /// Receiving field observations.
    Collecting,
    /// Handing unresolved uses to the caller.
    Propagating,
    Done,
}

#[derive(Clone, Debug)]
struct UnresolvedUse {
    field: FieldId,
    site: Site,
    candidates: Vec<Site>,
}

#[derive(Debug)]
pub(crate) struct CallFrame {
    method: MethodId,
    call_offset: Option<u32>,
    state: FrameState,
    unresolved: Vec<UnresolvedUse>,
}

impl CallFrame {
    fn new(method: MethodId) -> Self {
        Self {
            method,
            call_offset: None,
            state: FrameState::Collecting,
            unresolved: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> FrameState {
        self.state
    }

    /// Move to the next state. `Done` is terminal.
    pub(crate) fn advance(&mut self) -> FrameState {
        self.state = match self.state {
            FrameState::Collecting => FrameState::Propagating,
            FrameState::Propagating | FrameState::Done => FrameState::Done,
        };
        self.state
    }
}

/// Counters describing how a trace matched the static pairs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub(crate) struct TrackerStats {
    pub(crate) events: u64,
    pub(crate) covered: u64,
    /// Uses no feasible pair explains, even after propagation to callers.
    pub(crate) unresolved_uses: u64,
    /// Uses observed before any definition of the field.
    pub(crate) uses_without_definition: u64,
    pub(crate) ignored_events: u64,
}

pub(crate) struct ExecutionTracker<'a> {
    store: &'a mut DefUseStore,
    frames: Vec<CallFrame>,
    /// Latest definition of each field: the writing site followed by the enclosing call sites.
    last_defs: HashMap<FieldId, Vec<Site>>,
    stats: TrackerStats,
}

impl<'a> ExecutionTracker<'a> {
    pub(crate) fn new(store: &'a mut DefUseStore) -> Self {
        Self {
            store,
            frames: Vec::new(),
            last_defs: HashMap::new(),
            stats: TrackerStats::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn observe(&mut self, event: TraceEvent) {
        self.stats.events += 1;
        match event {
            TraceEvent::Enter { method } => {
                if let Some(caller) = self.frames.last()
                    && caller.call_offset.is_none()
                {
                    log::debug!("{} entered from {} without a call site", method, caller.method);
                }
                self.frames.push(CallFrame::new(method));
            }
            TraceEvent::Call { offset } => match self.frames.last_mut() {
                Some(frame) => frame.call_offset = Some(offset),
                None => self.ignore("call"),
            },
            TraceEvent::Field {
                field,
                offset,
                kind,
            } => {
                if self.frames.is_empty() {
                    self.ignore("field access");
                    return;
                }
                match kind {
                    AccessKind::Def => self.define(field, offset),
                    AccessKind::Use => self.use_field(field, offset),
                }
            }
            TraceEvent::Leave => {
                if self.frames.is_empty() {
                    self.ignore("leave");
                } else {
                    self.leave();
                }
            }
        }
    }

    /// Close every open frame and return the counters.
    pub(crate) fn finish(mut self) -> TrackerStats {
        if !self.frames.is_empty() {
            log::warn!("trace ended with {} open frames", self.frames.len());
        }
        while !self.frames.is_empty() {
            self.leave();
        }
        self.stats
    }

    fn ignore(&mut self, what: &str) {
        log::warn!("ignoring {} outside of any frame", what);
        self.stats.ignored_events += 1;
    }

    fn define(&mut self, field: FieldId, offset: u32) {
        let Some((current, callers)) = self.frames.split_last() else {
            return;
        };
        let mut trace = vec![Site::new(current.method.clone(), offset)];
        trace.extend(callers.iter().rev().filter_map(|frame| {
            frame
                .call_offset
                .map(|call| Site::new(frame.method.clone(), call))
        }));
        self.last_defs.insert(field, trace);
    }

    fn use_field(&mut self, field: FieldId, offset: u32) {
        let Some(frame) = self.frames.last() else {
            return;
        };
        let site = Site::new(frame.method.clone(), offset);
        let Some(candidates) = self.last_defs.get(&field).cloned() else {
            log::debug!("{} read at {} before any definition", field, site);
            self.stats.uses_without_definition += 1;
            return;
        };
        if !self.cover_any(&field, &candidates, &site) {
            let unresolved = UnresolvedUse {
                field,
                site,
                candidates,
            };
            if let Some(frame) = self.frames.last_mut() {
                frame.unresolved.push(unresolved);
            }
        }
    }

    fn cover_any(&mut self, field: &FieldId, candidates: &[Site], use_site: &Site) -> bool {
        let mut matched = false;
        for def in candidates {
            let pair = DefUsePair {
                field: field.clone(),
                def: def.clone(),
                use_site: use_site.clone(),
            };
            if self.store.cover(&pair) {
                self.stats.covered += 1;
                matched = true;
            }
        }
        matched
    }

    fn leave(&mut self) {
        let Some(mut frame) = self.frames.pop() else {
            return;
        };
        frame.advance();
        let unresolved = std::mem::take(&mut frame.unresolved);
        let retry_site = self.frames.last().and_then(|caller| {
            caller
                .call_offset
                .map(|offset| Site::new(caller.method.clone(), offset))
        });

        for pending in unresolved {
            match &retry_site {
                Some(site) => {
                    if !self.cover_any(&pending.field, &pending.candidates, site) {
                        let moved = UnresolvedUse {
                            site: site.clone(),
                            ..pending
                        };
                        if let Some(caller) = self.frames.last_mut() {
                            caller.unresolved.push(moved);
                        }
                    }
                }
                None => self.report_unresolved(pending),
            }
        }

        if let Some(caller) = self.frames.last_mut() {
            caller.call_offset = None;
        }
        frame.advance();
        log::trace!("left {} ({:?})", frame.method, frame.state());
    }

    fn report_unresolved(&mut self, pending: UnresolvedUse) {
        self.stats.unresolved_uses += 1;
        // The store logs the mismatch against the innermost definition.
        if let Some(def) = pending.candidates.first() {
            self.store.update_coverage(
                &pending.field,
                &def.method,
                def.offset,
                &pending.site.method,
                pending.site.offset,
            );
        }
    }
}

/// Read a trace file with one JSON event per line. Blank lines are skipped.
pub(crate) fn read_trace(path: &Path) -> Result<Vec<TraceEvent>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid trace event", path.display(), index + 1))?;
        events.push(event);
    }
    Ok(events)
}
