//! The element: a polymorphic processing node with typed ports.
//!
//! Elements implement the [`Element`] trait. The required surface is small
//! (a class name and downcast hook) and everything else has defaults:
//! declared port counts ([`Element::port_count`]), per-port push/pull/agnostic
//! declarations ([`Element::processing`]), internal flow
//! ([`Element::flow_code`]), the configure/initialize/cleanup lifecycle, and
//! the data-plane entry points [`Element::push`] and [`Element::pull`].
//!
//! Elements never hold references to their neighbors. The router passes a
//! [`Context`] into every data-plane call; `cx.push(port, packet)` forwards a
//! packet out of an output port and `cx.pull(port)` requests one through an
//! input port, with the router resolving the peer.

use std::any::Any;

use switchyard_packet::Packet;
use thiserror::Error;

use crate::config::args::Args;
use crate::handler::HandlerBuilder;
use crate::notifier::{Notifier, NotifierKind};
use crate::report::ErrorHandler;
use crate::router::{InitContext, Router};
use crate::scheduling::{Task, Timer};

/// Common port-count patterns.
pub mod port_count {
    /// No ports at all.
    pub const ZERO_ZERO: &str = "0/0";
    /// A pure source.
    pub const ZERO_ONE: &str = "0/1";
    /// A pure sink.
    pub const ONE_ZERO: &str = "1/0";
    /// One input, one output.
    pub const ONE_ONE: &str = "1/1";
}

/// Common processing declarations.
pub mod processing {
    /// Every port agnostic.
    pub const AGNOSTIC: &str = "a/a";
    /// Every port push.
    pub const PUSH: &str = "h/h";
    /// Every port pull.
    pub const PULL: &str = "l/l";
    /// Push inputs, pull outputs (a queue).
    pub const PUSH_TO_PULL: &str = "h/l";
    /// Pull inputs, push outputs (an unqueue).
    pub const PULL_TO_PUSH: &str = "l/h";
}

/// The resolved direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Not yet resolved; an error if it survives initialization.
    Agnostic,
    /// Producer-initiated transfer.
    Push,
    /// Consumer-initiated transfer.
    Pull,
}

/// A parsed port-count declaration: acceptable input and output ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortCount {
    /// Minimum inputs.
    pub imin: usize,
    /// Maximum inputs (`usize::MAX` when unbounded).
    pub imax: usize,
    /// Minimum outputs.
    pub omin: usize,
    /// Maximum outputs (`usize::MAX` when unbounded).
    pub omax: usize,
}

impl PortCount {
    /// Parses a declaration such as `"1/1"`, `"1-2/0"`, `"0/-"`, or `"1-/1"`.
    pub fn parse(spec: &str) -> Result<PortCount, String> {
        fn side(s: &str) -> Result<(usize, usize), String> {
            if s == "-" {
                return Ok((0, usize::MAX));
            }
            if let Some((lo, hi)) = s.split_once('-') {
                let lo = lo.parse().map_err(|_| format!("bad port count {:?}", s))?;
                let hi = if hi.is_empty() {
                    usize::MAX
                } else {
                    hi.parse().map_err(|_| format!("bad port count {:?}", s))?
                };
                if hi < lo {
                    return Err(format!("bad port count range {:?}", s));
                }
                Ok((lo, hi))
            } else {
                let n = s.parse().map_err(|_| format!("bad port count {:?}", s))?;
                Ok((n, n))
            }
        }
        let (i, o) = spec
            .split_once('/')
            .ok_or_else(|| format!("port count {:?} lacks a '/'", spec))?;
        let (imin, imax) = side(i)?;
        let (omin, omax) = side(o)?;
        Ok(PortCount { imin, imax, omin, omax })
    }
}

/// Parses one side of a processing declaration into per-port kinds; the last
/// character repeats.
fn processing_side(side: &str, nports: usize) -> Result<Vec<PortKind>, String> {
    let mut kinds = Vec::new();
    for c in side.chars() {
        kinds.push(match c {
            'a' => PortKind::Agnostic,
            'h' => PortKind::Push,
            'l' => PortKind::Pull,
            _ => return Err(format!("bad processing character {:?}", c)),
        });
    }
    if kinds.is_empty() && nports > 0 {
        return Err("processing declaration side is empty".to_string());
    }
    while kinds.len() < nports {
        let last = *kinds.last().unwrap();
        kinds.push(last);
    }
    kinds.truncate(nports);
    Ok(kinds)
}

/// Parses a processing declaration such as `"a/a"` or `"h/l"` into per-port
/// kinds for the given port counts.
pub fn parse_processing(
    spec: &str,
    ninputs: usize,
    noutputs: usize,
) -> Result<(Vec<PortKind>, Vec<PortKind>), String> {
    let (i, o) = spec
        .split_once('/')
        .ok_or_else(|| format!("processing declaration {:?} lacks a '/'", spec))?;
    Ok((processing_side(i, ninputs)?, processing_side(o, noutputs)?))
}

/// Configure phases. Elements are configured in ascending phase order;
/// information elements run first, privileged elements last.
pub mod configure_phase {
    /// The earliest phase.
    pub const FIRST: i32 = 0;
    /// Information elements (address and annotation definitions).
    pub const INFO: i32 = 20;
    /// Privileged infrastructure.
    pub const PRIVILEGED: i32 = 90;
    /// Everything else.
    pub const DEFAULT: i32 = 100;
}

/// How far an element progressed before cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CleanupStage {
    /// `configure` was never called.
    BeforeConfigure,
    /// `configure` was called and failed, or a sibling's failure aborted the
    /// configure phase.
    ConfigureFailed,
    /// `configure` succeeded; `initialize` was never called.
    Configured,
    /// `initialize` was called and failed, or a sibling's failure aborted the
    /// initialize phase.
    InitializeFailed,
    /// Fully initialized.
    Initialized,
}

/// Failure reported by an element lifecycle method.
///
/// The router decorates these with the element's landmark before forwarding
/// them to the error handler chain.
#[derive(Error, Debug)]
pub enum ElementError {
    /// A configuration string was unacceptable.
    #[error("{0}")]
    Config(String),
    /// Initialization failed.
    #[error("{0}")]
    Initialize(String),
    /// An allocation failed.
    #[error("out of memory")]
    OutOfMemory,
}

impl ElementError {
    /// A configure-stage failure with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        ElementError::Config(msg.into())
    }

    /// An initialize-stage failure with the given message.
    pub fn initialize(msg: impl Into<String>) -> Self {
        ElementError::Initialize(msg.into())
    }
}

/// A processing node in a router graph.
///
/// Defaults make the trivial element (no ports, no configuration, no
/// handlers) a two-method implementation. Overriding `push`/`pull` makes a
/// data-plane element; `run_task` a scheduled one.
pub trait Element: Any + Send {
    /// The element's class name, its type identity in the graph.
    fn class_name(&self) -> &'static str;

    /// Downcast hook for handlers and state handoff.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Declared acceptable port counts, e.g. `"1/1"` or `"1-/0"`.
    fn port_count(&self) -> &'static str {
        port_count::ZERO_ZERO
    }

    /// Per-port push/pull/agnostic declaration, e.g. `"a/a"` or `"h/l"`.
    fn processing(&self) -> &'static str {
        processing::AGNOSTIC
    }

    /// Which inputs influence which outputs; see [`crate::flow`].
    fn flow_code(&self) -> &'static str {
        crate::flow::COMPLETE_FLOW
    }

    /// The configure phase this element runs in.
    fn configure_phase(&self) -> i32 {
        configure_phase::DEFAULT
    }

    /// Whether a connection from this element to itself is acceptable.
    fn permits_self_connection(&self) -> bool {
        false
    }

    /// Parses the configuration arguments. May be called again on a
    /// hot-swap; must leave the element consistent on failure.
    fn configure(&mut self, _args: Args, _cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        Ok(())
    }

    /// Finalizes after every element is configured and all ports resolved.
    /// Port counts and processing are frozen once this succeeds.
    fn initialize(&mut self, _cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        Ok(())
    }

    /// Registers introspection and control handlers.
    fn add_handlers(&mut self, _reg: &mut HandlerBuilder<'_>) {}

    /// Releases resources. `stage` says how far this element progressed.
    fn cleanup(&mut self, _stage: CleanupStage) {}

    /// Takes state from a same-named, same-class element of a router being
    /// replaced. The hot-swap handoff point.
    fn take_state(&mut self, _old: &mut dyn Element, _errh: &mut dyn ErrorHandler) {}

    /// Receives a packet pushed into input `port`.
    ///
    /// The default drops the packet.
    fn push(&mut self, _port: usize, packet: Packet, _cx: &Context<'_>) {
        drop(packet);
    }

    /// Produces a packet pulled from output `port`, or `None` when idle.
    fn pull(&mut self, _port: usize, _cx: &Context<'_>) -> Option<Packet> {
        None
    }

    /// Runs scheduled work. Returns true when any work was done. Call
    /// [`Task::fast_reschedule`] to stay scheduled.
    fn run_task(&mut self, _task: &Task, _cx: &Context<'_>) -> bool {
        false
    }

    /// Runs an expired timer.
    fn run_timer(&mut self, _timer: &Timer, _cx: &Context<'_>) {}

    /// Handles I/O readiness on a registered descriptor. The I/O driver is an
    /// external collaborator; the method completes the element protocol.
    fn selected(&mut self, _fd: i32, _mask: u32) {}

    /// Reports the notifier attached to the given port, if any. Graph walks
    /// use this to assemble derived activity signals.
    fn port_notifier(&mut self, _is_output: bool, _port: usize, _kind: NotifierKind) -> Option<&mut Notifier> {
        None
    }
}

/// Data-plane context: the router and the identity of the element being run.
///
/// Handed to `push`, `pull`, `run_task`, and `run_timer`; the element uses it
/// to reach its neighbors.
pub struct Context<'a> {
    router: &'a Router,
    eindex: usize,
}

impl<'a> Context<'a> {
    /// Creates a context for element `eindex`. Outside the driver this is
    /// how an external front end (device I/O, a test) enters the graph.
    pub fn new(router: &'a Router, eindex: usize) -> Self {
        Context { router, eindex }
    }

    /// The router this element belongs to.
    pub fn router(&self) -> &Router {
        self.router
    }

    /// This element's index.
    pub fn eindex(&self) -> usize {
        self.eindex
    }

    /// Number of inputs of this element.
    pub fn ninputs(&self) -> usize {
        self.router.ninputs(self.eindex)
    }

    /// Number of outputs of this element.
    pub fn noutputs(&self) -> usize {
        self.router.noutputs(self.eindex)
    }

    /// True when output `port` resolved to push.
    pub fn output_is_push(&self, port: usize) -> bool {
        self.router.output_kind(self.eindex, port) == PortKind::Push
    }

    /// True when input `port` resolved to pull.
    pub fn input_is_pull(&self, port: usize) -> bool {
        self.router.input_kind(self.eindex, port) == PortKind::Pull
    }

    /// Pushes `packet` out of output `port` to the connected peer.
    ///
    /// The peer's `push` runs synchronously on this thread. Ownership of the
    /// packet transfers; an unconnected optional port drops it.
    pub fn push(&self, port: usize, packet: Packet) {
        debug_assert!(self.output_is_push(port), "push on non-push output");
        if let Some((peer, peer_port)) = self.router.output_peer(self.eindex, port) {
            let cx = Context::new(self.router, peer);
            self.router
                .cell(peer)
                .enter(|el| el.push(peer_port, packet, &cx));
        }
    }

    /// Pulls a packet through input `port` from the connected peer.
    ///
    /// The peer's `pull` runs synchronously on this thread.
    pub fn pull(&self, port: usize) -> Option<Packet> {
        debug_assert!(self.input_is_pull(port), "pull on non-pull input");
        let (peer, peer_port) = self.router.input_peer(self.eindex, port)?;
        let cx = Context::new(self.router, peer);
        self.router
            .cell(peer)
            .enter(|el| el.pull(peer_port, &cx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_count_forms() {
        assert_eq!(
            PortCount::parse("1/1").unwrap(),
            PortCount { imin: 1, imax: 1, omin: 1, omax: 1 }
        );
        assert_eq!(
            PortCount::parse("1-2/0").unwrap(),
            PortCount { imin: 1, imax: 2, omin: 0, omax: 0 }
        );
        assert_eq!(
            PortCount::parse("-/1").unwrap(),
            PortCount { imin: 0, imax: usize::MAX, omin: 1, omax: 1 }
        );
        assert_eq!(
            PortCount::parse("1-/1").unwrap(),
            PortCount { imin: 1, imax: usize::MAX, omin: 1, omax: 1 }
        );
        assert!(PortCount::parse("1").is_err());
        assert!(PortCount::parse("2-1/0").is_err());
        assert!(PortCount::parse("x/1").is_err());
    }

    #[test]
    fn processing_forms() {
        let (i, o) = parse_processing("h/l", 2, 3).unwrap();
        assert_eq!(i, vec![PortKind::Push; 2]);
        assert_eq!(o, vec![PortKind::Pull; 3]);

        let (i, o) = parse_processing("ha/l", 3, 0).unwrap();
        assert_eq!(i, vec![PortKind::Push, PortKind::Agnostic, PortKind::Agnostic]);
        assert!(o.is_empty());

        assert!(parse_processing("q/a", 1, 1).is_err());
        assert!(parse_processing("a", 1, 1).is_err());
    }
}
