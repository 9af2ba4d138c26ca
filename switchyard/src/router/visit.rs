//! Graph walks over the resolved router, following flow codes.
//!
//! A walk starts at one port and expands across connections, crossing each
//! element only between flow-linked ports. Every reachable port is visited
//! at most once, so walks terminate on cyclic graphs. Visitors prune
//! branches by returning [`VisitAction::Prune`]; this is how a queue stops an
//! upstream search at itself.
//!
//! The two canonical walks assemble activity signals:
//! [`notifier_search`] collects every empty-notifier upstream of an input
//! (or full-notifier downstream of an output) into one derived signal,
//! registering a listener task with each.

use std::sync::Arc;

use crate::notifier::{NotifierKind, NotifierSignal, SearchOp};
use crate::scheduling::Task;
use crate::sync::ElementCell;

use super::RouterCore;

/// A visitor's verdict on a visited port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    /// Keep walking through this element.
    Continue,
    /// Do not walk past this element on this branch.
    Prune,
}

/// Receives the ports reached by a graph walk.
pub trait RouterVisitor {
    /// Called once per reached port. For upstream walks the port is an
    /// output port of an upstream element; for downstream walks an input
    /// port of a downstream element. `from` identifies the port on the near
    /// side of the connection just crossed, `distance` the number of
    /// elements crossed so far.
    fn visit(
        &mut self,
        eindex: usize,
        is_output: bool,
        port: usize,
        from_eindex: usize,
        from_port: usize,
        distance: usize,
    ) -> VisitAction;
}

/// Walks upstream from input `(eindex, port)`.
pub(crate) fn visit_upstream(
    core: &RouterCore,
    eindex: usize,
    port: usize,
    visitor: &mut dyn RouterVisitor,
) {
    let mut visited_in = vec![false; *core.in_gport.last().unwrap_or(&0)];
    let mut visited_out = vec![false; *core.out_gport.last().unwrap_or(&0)];
    let mut frontier = std::collections::VecDeque::new();

    visited_in[core.in_gport[eindex] + port] = true;
    frontier.push_back((eindex, port, 0usize));

    while let Some((se, sp, dist)) = frontier.pop_front() {
        for c in core.connections.iter().filter(|c| c.to == (se, sp)) {
            let (fe, fp) = c.from;
            let gport = core.out_gport[fe] + fp;
            if visited_out[gport] {
                continue;
            }
            visited_out[gport] = true;
            if visitor.visit(fe, true, fp, se, sp, dist) == VisitAction::Prune {
                continue;
            }
            for i in 0..core.ninputs[fe] {
                let gin = core.in_gport[fe] + i;
                if core.flow_codes[fe].flows(i, fp) && !visited_in[gin] {
                    visited_in[gin] = true;
                    frontier.push_back((fe, i, dist + 1));
                }
            }
        }
    }
}

/// Walks downstream from output `(eindex, port)`.
pub(crate) fn visit_downstream(
    core: &RouterCore,
    eindex: usize,
    port: usize,
    visitor: &mut dyn RouterVisitor,
) {
    let mut visited_in = vec![false; *core.in_gport.last().unwrap_or(&0)];
    let mut visited_out = vec![false; *core.out_gport.last().unwrap_or(&0)];
    let mut frontier = std::collections::VecDeque::new();

    visited_out[core.out_gport[eindex] + port] = true;
    frontier.push_back((eindex, port, 0usize));

    while let Some((se, sp, dist)) = frontier.pop_front() {
        for c in core.connections.iter().filter(|c| c.from == (se, sp)) {
            let (te, tp) = c.to;
            let gport = core.in_gport[te] + tp;
            if visited_in[gport] {
                continue;
            }
            visited_in[gport] = true;
            if visitor.visit(te, false, tp, se, sp, dist) == VisitAction::Prune {
                continue;
            }
            for q in 0..core.noutputs[te] {
                let gout = core.out_gport[te] + q;
                if core.flow_codes[te].flows(tp, q) && !visited_out[gout] {
                    visited_out[gout] = true;
                    frontier.push_back((te, q, dist + 1));
                }
            }
        }
    }
}

/// Collects notifiers along a walk into a derived signal.
struct SignalVisitor<'a> {
    cells: &'a [ElementCell],
    core: &'a RouterCore,
    self_eindex: usize,
    kind: NotifierKind,
    listener: Option<&'a Arc<Task>>,
    signal: NotifierSignal,
    found: bool,
    pass2: bool,
    need_pass2: bool,
}

impl RouterVisitor for SignalVisitor<'_> {
    fn visit(
        &mut self,
        eindex: usize,
        is_output: bool,
        port: usize,
        _from_eindex: usize,
        _from_port: usize,
        _distance: usize,
    ) -> VisitAction {
        if eindex == self.self_eindex {
            // The searching element is already entered; a cycle back into it
            // cannot contribute a notifier.
            return VisitAction::Prune;
        }
        let cells = self.cells;
        let core = self.core;
        cells[eindex].enter(|el| {
            let Some(notifier) = el.port_notifier(is_output, port, self.kind) else {
                return VisitAction::Continue;
            };
            if !notifier.signal().is_basic() {
                // Notifiers found before their element initialized get their
                // signal here; initialization is idempotent.
                let name = match self.kind {
                    NotifierKind::Empty => "empty",
                    NotifierKind::Full => "full",
                };
                notifier.initialize(core.signals.lock().allocate(&format!("{}.{}", core.names[eindex], name)));
            }
            let op = notifier.search_op();
            let through = if op == SearchOp::Stop {
                VisitAction::Prune
            } else {
                VisitAction::Continue
            };
            if op == SearchOp::ContinueWake && !self.pass2 {
                self.need_pass2 = true;
                return through;
            }
            if self.pass2 && op != SearchOp::ContinueWake {
                // Already collected in the first pass.
                return through;
            }
            self.found = true;
            self.signal = std::mem::take(&mut self.signal) + notifier.signal().clone();
            if let Some(task) = self.listener {
                notifier.add_listener(Arc::clone(task));
            }
            through
        })
    }
}

/// Derives the union of the notifiers of `kind` reachable from
/// `(eindex, port)`: upstream of an input for [`NotifierKind::Empty`],
/// downstream of an output for [`NotifierKind::Full`]. Registers `listener`
/// with each notifier found. Returns the always-active signal when the walk
/// finds none, so callers without notifier coverage never sleep.
pub(crate) fn notifier_search(
    cells: &[ElementCell],
    core: &RouterCore,
    eindex: usize,
    port: usize,
    kind: NotifierKind,
    listener: Option<&Arc<Task>>,
) -> NotifierSignal {
    let mut visitor = SignalVisitor {
        cells,
        core,
        self_eindex: eindex,
        kind,
        listener,
        signal: NotifierSignal::idle(),
        found: false,
        pass2: false,
        need_pass2: false,
    };
    let walk = |v: &mut SignalVisitor<'_>| match kind {
        NotifierKind::Empty => visit_upstream(core, eindex, port, v),
        NotifierKind::Full => visit_downstream(core, eindex, port, v),
    };
    walk(&mut visitor);
    if visitor.need_pass2 {
        visitor.pass2 = true;
        walk(&mut visitor);
    }
    if visitor.found {
        visitor.signal
    } else {
        NotifierSignal::busy()
    }
}
