//! The router: an element graph and its lifecycle.
//!
//! A router is built by a configuration front end through the construction
//! API ([`Router::add_element`], [`Router::add_connection`],
//! [`Router::add_requirement`]), then taken through the initialization
//! pipeline by [`Router::initialize`]:
//!
//! 1. port-count resolution against each element's declaration;
//! 2. processing resolution: agnostic ports take their direction from
//!    their peers, propagated to a fixed point;
//! 3. connection legality: completeness and push/pull discipline;
//! 4. `configure` in ascending configure-phase order;
//! 5. `initialize` in the same order;
//! 6. `add_handlers`.
//!
//! Any failure transitions the router to `Dead` and runs `cleanup` on every
//! element with a stage describing how far it got. A live router is
//! activated on a [`Master`], which binds its tasks and timers to driver
//! threads.

pub mod resolve;
pub mod visit;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use thiserror::Error;

use crate::element::{CleanupStage, Context, Element, PortKind};
use crate::flow::FlowCode;
use crate::handler::{Handler, HandlerBuilder, HandlerError, HandlerInfo};
use crate::master::Master;
use crate::nameinfo::{NameInfo, NameValue};
use crate::notifier::{NotifierKind, NotifierSignal, SignalArena};
use crate::report::{ErrorHandler, Landmark};
use crate::scheduling::{Task, Timer};
use crate::sync::{ElementCell, Spinlock};

/// The pseudo-index of the reserved root element.
///
/// The root element is never configured or initialized; it anchors
/// router-level handlers and name lookups.
pub const ROOT: usize = usize::MAX;

/// Lifecycle of a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    /// Under construction.
    New,
    /// Validation and configuration in progress.
    PreConfigure,
    /// Elements configured; initialization in progress.
    PreInitialize,
    /// Fully initialized.
    Live,
    /// Failed or stopped; only cleanup remains.
    Dead,
}

/// Driver-facing running state, parallel to [`RouterState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunningState {
    /// Confirmed stopped.
    Dead = 0,
    /// Initialized but not activated.
    Inactive = 1,
    /// Activation in progress.
    Preparing = 2,
    /// Activated, driver not running tasks yet.
    Background = 3,
    /// Driver running.
    Active = 4,
}

impl RunningState {
    fn from_u8(v: u8) -> RunningState {
        match v {
            0 => RunningState::Dead,
            1 => RunningState::Inactive,
            2 => RunningState::Preparing,
            3 => RunningState::Background,
            _ => RunningState::Active,
        }
    }
}

/// A directed edge: from an output port to an input port.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Source (element, output port).
    pub from: (usize, usize),
    /// Destination (element, input port).
    pub to: (usize, usize),
    /// Where the connection was written.
    pub landmark: Landmark,
}

/// Construction and lifecycle failures.
#[derive(Error, Debug)]
pub enum RouterError {
    /// Operation not valid in the router's current state.
    #[error("operation invalid in this router state")]
    WrongState,
    /// An element name was used twice.
    #[error("duplicate element name {0:?}")]
    DuplicateName(String),
    /// An element index out of range.
    #[error("no element at index {0}")]
    UnknownElement(usize),
    /// A connection from an element to itself, which the element forbids.
    #[error("{0:?} connected to itself")]
    SelfLoop(String),
    /// Port-count, processing, or connection validation failed.
    #[error("router graph validation failed")]
    GraphError,
    /// An element's `configure` failed.
    #[error("element configuration failed")]
    ConfigureFailed,
    /// An element's `initialize` failed.
    #[error("element initialization failed")]
    InitializeFailed,
}

/// The reserved root element.
struct RootElement;

impl Element for RootElement {
    fn class_name(&self) -> &'static str {
        "Router"
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub(crate) struct RouterCore {
    pub master: Weak<Master>,
    pub names: Vec<String>,
    pub classes: Vec<&'static str>,
    pub configs: Vec<String>,
    pub landmarks: Vec<Landmark>,
    pub name_index: HashMap<String, usize>,
    pub connections: Vec<Connection>,
    pub requirements: Vec<(String, String)>,
    pub state: RouterState,
    pub running: AtomicU8,
    pub runcount: AtomicI32,

    // Filled by resolution.
    pub ninputs: Vec<usize>,
    pub noutputs: Vec<usize>,
    pub in_kind: Vec<Vec<PortKind>>,
    pub out_kind: Vec<Vec<PortKind>>,
    pub in_peer: Vec<Vec<Option<(usize, usize)>>>,
    pub out_peer: Vec<Vec<Option<(usize, usize)>>>,
    pub in_gport: Vec<usize>,
    pub out_gport: Vec<usize>,
    pub flow_codes: Vec<FlowCode>,

    pub home_threads: Vec<i32>,
    pub signals: Spinlock<SignalArena>,
    pub name_info: NameInfo,
    pub handlers: Vec<Handler>,
    pub element_handlers: Vec<Vec<usize>>,
    pub root_handlers: Vec<usize>,
    pub attachments: HashMap<String, Box<dyn Any + Send + Sync>>,
    pub tasks: Vec<Arc<Task>>,
    pub timers: Vec<Timer>,
    pub configure_order: Vec<usize>,
    pub stages: Vec<CleanupStage>,
    pub stop_guard: Option<Box<dyn Fn() -> bool + Send + Sync>>,
    pub cleaned: bool,
}

/// An element graph with a configure/initialize lifecycle.
pub struct Router {
    pub(crate) cells: Vec<ElementCell>,
    root_cell: ElementCell,
    pub(crate) core: RouterCore,
}

impl Router {
    /// Creates an empty router attached to `master`.
    pub fn new(master: &Arc<Master>) -> Router {
        Router {
            cells: Vec::new(),
            root_cell: ElementCell::new(Box::new(RootElement)),
            core: RouterCore {
                master: Arc::downgrade(master),
                names: Vec::new(),
                classes: Vec::new(),
                configs: Vec::new(),
                landmarks: Vec::new(),
                name_index: HashMap::new(),
                connections: Vec::new(),
                requirements: Vec::new(),
                state: RouterState::New,
                running: AtomicU8::new(RunningState::Inactive as u8),
                runcount: AtomicI32::new(1),
                ninputs: Vec::new(),
                noutputs: Vec::new(),
                in_kind: Vec::new(),
                out_kind: Vec::new(),
                in_peer: Vec::new(),
                out_peer: Vec::new(),
                in_gport: Vec::new(),
                out_gport: Vec::new(),
                flow_codes: Vec::new(),
                home_threads: Vec::new(),
                signals: Spinlock::new(SignalArena::default()),
                name_info: NameInfo::new(),
                handlers: Vec::new(),
                element_handlers: Vec::new(),
                root_handlers: Vec::new(),
                attachments: HashMap::new(),
                tasks: Vec::new(),
                timers: Vec::new(),
                configure_order: Vec::new(),
                stages: Vec::new(),
                stop_guard: None,
                cleaned: false,
            },
        }
    }

    // --- construction API ---

    /// Adds an element under `name`, returning its index.
    ///
    /// Names are unique within a router; compound scopes use
    /// slash-separated prefixes (`"scope/leaf"`).
    pub fn add_element(
        &mut self,
        element: Box<dyn Element>,
        name: &str,
        config: &str,
        landmark: Landmark,
    ) -> Result<usize, RouterError> {
        if self.core.state != RouterState::New {
            return Err(RouterError::WrongState);
        }
        if self.core.name_index.contains_key(name) {
            return Err(RouterError::DuplicateName(name.to_owned()));
        }
        let eindex = self.cells.len();
        self.core.name_index.insert(name.to_owned(), eindex);
        self.core.names.push(name.to_owned());
        self.core.classes.push(element.class_name());
        self.core.configs.push(config.to_owned());
        self.core.landmarks.push(landmark);
        self.core.home_threads.push(0);
        self.core.stages.push(CleanupStage::BeforeConfigure);
        self.core.element_handlers.push(Vec::new());
        self.cells.push(ElementCell::new(element));
        Ok(eindex)
    }

    /// Adds a connection. Duplicates are ignored; self-loops are rejected
    /// unless the element permits them.
    pub fn add_connection(
        &mut self,
        from_eindex: usize,
        from_port: usize,
        to_eindex: usize,
        to_port: usize,
        landmark: Landmark,
    ) -> Result<(), RouterError> {
        if self.core.state != RouterState::New {
            return Err(RouterError::WrongState);
        }
        let n = self.cells.len();
        if from_eindex >= n {
            return Err(RouterError::UnknownElement(from_eindex));
        }
        if to_eindex >= n {
            return Err(RouterError::UnknownElement(to_eindex));
        }
        if from_eindex == to_eindex
            && !self.cells[from_eindex].enter(|el| el.permits_self_connection())
        {
            return Err(RouterError::SelfLoop(self.core.names[from_eindex].clone()));
        }
        let dup = self.core.connections.iter().any(|c| {
            c.from == (from_eindex, from_port) && c.to == (to_eindex, to_port)
        });
        if !dup {
            self.core.connections.push(Connection {
                from: (from_eindex, from_port),
                to: (to_eindex, to_port),
                landmark,
            });
        }
        Ok(())
    }

    /// Records a requirement, e.g. `("package", "standard")`.
    pub fn add_requirement(&mut self, kind: &str, value: &str) {
        self.core.requirements.push((kind.to_owned(), value.to_owned()));
    }

    /// Finds an element by name, searching `context`'s compound scopes from
    /// deepest to global. `context` is the full name of the element asking.
    pub fn find_element(&self, name: &str, context: &str) -> Option<usize> {
        let mut scope = context;
        loop {
            scope = match scope.rfind('/') {
                Some(pos) => &scope[..pos],
                None => {
                    return self.core.name_index.get(name).copied();
                }
            };
            let candidate = format!("{}/{}", scope, name);
            if let Some(&e) = self.core.name_index.get(&candidate) {
                return Some(e);
            }
        }
    }

    // --- accessors ---

    /// Number of elements.
    pub fn nelements(&self) -> usize {
        self.cells.len()
    }

    /// The name of element `eindex`.
    pub fn element_name(&self, eindex: usize) -> &str {
        if eindex == ROOT {
            ""
        } else {
            &self.core.names[eindex]
        }
    }

    /// The class name of element `eindex`.
    pub fn element_class(&self, eindex: usize) -> &str {
        if eindex == ROOT {
            "Router"
        } else {
            self.core.classes[eindex]
        }
    }

    /// The raw configuration string of element `eindex`.
    pub fn element_config(&self, eindex: usize) -> &str {
        &self.core.configs[eindex]
    }

    /// The landmark of element `eindex`.
    pub fn landmark(&self, eindex: usize) -> &Landmark {
        &self.core.landmarks[eindex]
    }

    /// The element index registered under exactly `name`.
    pub fn element_by_name(&self, name: &str) -> Option<usize> {
        self.core.name_index.get(name).copied()
    }

    /// The recorded requirements.
    pub fn requirements(&self) -> &[(String, String)] {
        &self.core.requirements
    }

    /// The connection list, canonically sorted once initialization begins.
    pub fn connections(&self) -> &[Connection] {
        &self.core.connections
    }

    /// The lifecycle state.
    pub fn state(&self) -> RouterState {
        self.core.state
    }

    /// The running state.
    pub fn running_state(&self) -> RunningState {
        RunningState::from_u8(self.core.running.load(Ordering::Acquire))
    }

    pub(crate) fn set_running(&self, state: RunningState) {
        self.core.running.store(state as u8, Ordering::Release);
    }

    /// The current runcount. The driver stops once every live router's
    /// runcount reaches zero.
    pub fn runcount(&self) -> i32 {
        self.core.runcount.load(Ordering::Acquire)
    }

    /// Adjusts the runcount, requesting a driver stop when it reaches zero.
    pub fn adjust_runcount(&self, delta: i32) {
        let new = self.core.runcount.fetch_add(delta, Ordering::AcqRel) + delta;
        if new <= 0 {
            if let Some(master) = self.core.master.upgrade() {
                master.request_stop();
            }
        }
    }

    pub(crate) fn set_runcount(&self, value: i32) {
        self.core.runcount.store(value, Ordering::Release);
    }

    /// Requests a driver stop by decrementing the runcount.
    pub fn please_stop_driver(&self) {
        self.adjust_runcount(-1);
    }

    /// Installs a stop guard, consulted when the runcount reaches zero; a
    /// guard returning true vetoes the stop and the runcount is reset to 1.
    pub fn set_stop_guard(&mut self, guard: Box<dyn Fn() -> bool + Send + Sync>) {
        self.core.stop_guard = Some(guard);
    }

    pub(crate) fn run_stop_guard(&self) -> bool {
        self.core.stop_guard.as_ref().map(|g| g()).unwrap_or(false)
    }

    pub(crate) fn strong_unschedule_tasks(&self) {
        for task in &self.core.tasks {
            task.strong_unschedule();
        }
    }

    /// Assigns an element's home thread. Must precede `initialize`.
    pub fn set_home_thread(&mut self, eindex: usize, thread: i32) -> Result<(), RouterError> {
        if self.core.state != RouterState::New {
            return Err(RouterError::WrongState);
        }
        if eindex >= self.cells.len() {
            return Err(RouterError::UnknownElement(eindex));
        }
        self.core.home_threads[eindex] = thread;
        Ok(())
    }

    /// Stores a named attachment: opaque state shared between subsystems.
    pub fn set_attachment(&mut self, name: &str, value: Box<dyn Any + Send + Sync>) {
        self.core.attachments.insert(name.to_owned(), value);
    }

    /// Retrieves a named attachment.
    pub fn attachment(&self, name: &str) -> Option<&(dyn Any + Send + Sync)> {
        self.core.attachments.get(name).map(|b| b.as_ref())
    }

    /// The router's name databases.
    pub fn name_info(&self) -> &NameInfo {
        &self.core.name_info
    }

    /// Mutable access to the name databases, for configuration-time defines.
    pub fn name_info_mut(&mut self) -> &mut NameInfo {
        &mut self.core.name_info
    }

    /// Allocates a fresh basic activity signal from the router's arena.
    pub fn new_notifier_signal(&self, name: &str) -> NotifierSignal {
        self.core.signals.lock().allocate(name)
    }

    // --- resolved graph accessors ---

    /// Number of inputs of element `eindex` (0 before resolution).
    pub fn ninputs(&self, eindex: usize) -> usize {
        self.core.ninputs.get(eindex).copied().unwrap_or(0)
    }

    /// Number of outputs of element `eindex` (0 before resolution).
    pub fn noutputs(&self, eindex: usize) -> usize {
        self.core.noutputs.get(eindex).copied().unwrap_or(0)
    }

    /// Resolved direction of an input port.
    pub fn input_kind(&self, eindex: usize, port: usize) -> PortKind {
        self.core.in_kind[eindex][port]
    }

    /// Resolved direction of an output port.
    pub fn output_kind(&self, eindex: usize, port: usize) -> PortKind {
        self.core.out_kind[eindex][port]
    }

    /// The peer of a push output or pull output's first connection.
    pub fn output_peer(&self, eindex: usize, port: usize) -> Option<(usize, usize)> {
        self.core.out_peer[eindex][port]
    }

    /// The peer of a pull input or push input's first connection.
    pub fn input_peer(&self, eindex: usize, port: usize) -> Option<(usize, usize)> {
        self.core.in_peer[eindex][port]
    }

    /// The globally numbered port index of `(eindex, port)`.
    pub fn gport(&self, is_output: bool, eindex: usize, port: usize) -> usize {
        if is_output {
            self.core.out_gport[eindex] + port
        } else {
            self.core.in_gport[eindex] + port
        }
    }

    pub(crate) fn cell(&self, eindex: usize) -> &ElementCell {
        if eindex == ROOT {
            &self.root_cell
        } else {
            &self.cells[eindex]
        }
    }

    /// Runs `f` with exclusive access to element `eindex`.
    ///
    /// Panics if the element is currently entered (by this call chain or
    /// another thread).
    pub fn with_element<R>(&self, eindex: usize, f: impl FnOnce(&mut dyn Element) -> R) -> R {
        self.cell(eindex).enter(f)
    }

    // --- graph walks ---

    /// Walks upstream from input `(eindex, port)`, visiting the output ports
    /// that can influence it, crossing elements by flow code.
    pub fn visit_upstream(&self, eindex: usize, port: usize, visitor: &mut dyn visit::RouterVisitor) {
        visit::visit_upstream(&self.core, eindex, port, visitor);
    }

    /// Walks downstream from output `(eindex, port)`, visiting the input
    /// ports it can influence, crossing elements by flow code.
    pub fn visit_downstream(&self, eindex: usize, port: usize, visitor: &mut dyn visit::RouterVisitor) {
        visit::visit_downstream(&self.core, eindex, port, visitor);
    }

    // --- handlers ---

    /// Registers a read handler on `eindex` (or [`ROOT`]).
    pub fn add_read_handler(
        &mut self,
        eindex: usize,
        name: &str,
        flags: u32,
        read: impl Fn(&mut dyn Element, &HandlerInfo<'_>) -> String + Send + Sync + 'static,
    ) {
        let mut builder = self.handler_builder(eindex);
        builder.add_read(name, flags, read);
    }

    /// Registers a write handler on `eindex` (or [`ROOT`]).
    pub fn add_write_handler(
        &mut self,
        eindex: usize,
        name: &str,
        flags: u32,
        write: impl Fn(&str, &mut dyn Element, &HandlerInfo<'_>, &mut dyn ErrorHandler) -> Result<(), HandlerError>
            + Send
            + Sync
            + 'static,
    ) {
        let mut builder = self.handler_builder(eindex);
        builder.add_write(name, flags, write);
    }

    fn handler_builder(&mut self, eindex: usize) -> HandlerBuilder<'_> {
        let list = if eindex == ROOT {
            &mut self.core.root_handlers
        } else {
            &mut self.core.element_handlers[eindex]
        };
        HandlerBuilder::new(&mut self.core.handlers, list)
    }

    /// Resolves a handler name on an element to a stable index.
    pub fn hindex(&self, eindex: usize, name: &str) -> Option<usize> {
        let list = if eindex == ROOT {
            &self.core.root_handlers
        } else {
            self.core.element_handlers.get(eindex)?
        };
        list.iter()
            .copied()
            .find(|&h| self.core.handlers[h].name() == name)
    }

    /// Retrieves a handler by index.
    pub fn handler(&self, hindex: usize) -> Option<&Handler> {
        self.core.handlers.get(hindex)
    }

    /// Handler indexes registered on `eindex`.
    pub fn element_handler_indexes(&self, eindex: usize) -> &[usize] {
        if eindex == ROOT {
            &self.core.root_handlers
        } else {
            &self.core.element_handlers[eindex]
        }
    }

    /// Calls the read handler `name` on element `eindex`.
    pub fn call_read(&self, eindex: usize, name: &str) -> Result<String, HandlerError> {
        let hindex = self
            .hindex(eindex, name)
            .ok_or_else(|| HandlerError::NoSuchHandler(name.to_owned()))?;
        let read = self.core.handlers[hindex]
            .read_callback()
            .ok_or_else(|| HandlerError::NotReadable(name.to_owned()))?;
        let info = HandlerInfo { router: self, eindex };
        Ok(self.cell(eindex).enter(|el| read(el, &info)))
    }

    /// Calls the write handler `name` on element `eindex` with `value`.
    pub fn call_write(
        &self,
        eindex: usize,
        name: &str,
        value: &str,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), HandlerError> {
        let hindex = self
            .hindex(eindex, name)
            .ok_or_else(|| HandlerError::NoSuchHandler(name.to_owned()))?;
        let write = self.core.handlers[hindex]
            .write_callback()
            .ok_or_else(|| HandlerError::NotWritable(name.to_owned()))?;
        let info = HandlerInfo { router: self, eindex };
        self.cell(eindex).enter(|el| write(value, el, &info, errh))
    }

    // --- lifecycle ---

    /// Runs the initialization pipeline. On success the router is `Live`
    /// and ready for activation; on failure it is `Dead` and every element
    /// has been cleaned up.
    pub fn initialize(&mut self, errh: &mut dyn ErrorHandler) -> Result<(), RouterError> {
        if self.core.state != RouterState::New {
            return Err(RouterError::WrongState);
        }
        self.core.state = RouterState::PreConfigure;
        resolve::sort_connections(&mut self.core);

        if let Err(e) = resolve::resolve(self, errh) {
            self.fail(CleanupStage::ConfigureFailed);
            return Err(e);
        }
        if let Err(e) = self.configure_elements(errh) {
            self.fail(CleanupStage::ConfigureFailed);
            return Err(e);
        }
        self.core.state = RouterState::PreInitialize;
        if let Err(e) = self.initialize_elements(errh) {
            self.fail(CleanupStage::InitializeFailed);
            return Err(e);
        }
        self.register_handlers();
        for stage in &mut self.core.stages {
            *stage = CleanupStage::Initialized;
        }
        self.core.state = RouterState::Live;
        Ok(())
    }

    fn configure_elements(&mut self, errh: &mut dyn ErrorHandler) -> Result<(), RouterError> {
        let mut order: Vec<usize> = (0..self.cells.len()).collect();
        let phases: Vec<i32> = order
            .iter()
            .map(|&e| self.cells[e].enter(|el| el.configure_phase()))
            .collect();
        order.sort_by_key(|&e| (phases[e], e));
        self.core.configure_order = order.clone();

        let cells: &[ElementCell] = &self.cells;
        let core = &mut self.core;
        for &e in &order {
            let conf = core.configs[e].clone();
            let args = crate::config::args::Args::new(crate::config::args::split_args(&conf));
            let result = cells[e].enter(|el| {
                let mut cx = InitContext { cells, core: &mut *core, eindex: e, errh: &mut *errh };
                el.configure(args, &mut cx)
            });
            match result {
                Ok(()) => core.stages[e] = CleanupStage::Configured,
                Err(err) => {
                    errh.lerror(
                        &core.landmarks[e].clone(),
                        &format!("{}: {}", core.names[e], err),
                    );
                    return Err(RouterError::ConfigureFailed);
                }
            }
        }
        Ok(())
    }

    fn initialize_elements(&mut self, errh: &mut dyn ErrorHandler) -> Result<(), RouterError> {
        let order = self.core.configure_order.clone();
        let cells: &[ElementCell] = &self.cells;
        let core = &mut self.core;
        for &e in &order {
            let result = cells[e].enter(|el| {
                let mut cx = InitContext { cells, core: &mut *core, eindex: e, errh: &mut *errh };
                el.initialize(&mut cx)
            });
            match result {
                Ok(()) => core.stages[e] = CleanupStage::Initialized,
                Err(err) => {
                    errh.lerror(
                        &core.landmarks[e].clone(),
                        &format!("{}: {}", core.names[e], err),
                    );
                    return Err(RouterError::InitializeFailed);
                }
            }
        }
        Ok(())
    }

    fn register_handlers(&mut self) {
        for e in 0..self.cells.len() {
            self.install_default_handlers(e);
        }
        let cells: &[ElementCell] = &self.cells;
        let core = &mut self.core;
        for e in 0..cells.len() {
            cells[e].enter(|el| {
                let mut builder =
                    HandlerBuilder::new(&mut core.handlers, &mut core.element_handlers[e]);
                el.add_handlers(&mut builder);
            });
        }
        self.install_root_handlers();
    }

    fn install_default_handlers(&mut self, eindex: usize) {
        use crate::handler::flags;
        let mut builder =
            HandlerBuilder::new(&mut self.core.handlers, &mut self.core.element_handlers[eindex]);
        builder.add_read("name", flags::CALM, |_, info| {
            info.router.element_name(info.eindex).to_owned()
        });
        builder.add_read("class", flags::CALM, |_, info| {
            info.router.element_class(info.eindex).to_owned()
        });
        builder.add_read("config", flags::CALM, |_, info| {
            info.router.element_config(info.eindex).to_owned()
        });
        builder.add_read("ports", flags::CALM, |_, info| {
            let r = info.router;
            let fmt = |kinds: &[PortKind]| {
                kinds
                    .iter()
                    .map(|k| match k {
                        PortKind::Push => "push",
                        PortKind::Pull => "pull",
                        PortKind::Agnostic => "agnostic",
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            format!(
                "{} input(s): {}\n{} output(s): {}\n",
                r.ninputs(info.eindex),
                fmt(&r.core.in_kind[info.eindex]),
                r.noutputs(info.eindex),
                fmt(&r.core.out_kind[info.eindex]),
            )
        });
        builder.add_read("handlers", flags::CALM, |_, info| {
            let r = info.router;
            let mut out = String::new();
            for &h in r.element_handler_indexes(info.eindex) {
                let handler = &r.core.handlers[h];
                out.push_str(&format!(
                    "{}\t{}{}\n",
                    handler.name(),
                    if handler.readable() { "r" } else { "" },
                    if handler.writable() { "w" } else { "" },
                ));
            }
            out
        });
    }

    fn install_root_handlers(&mut self) {
        use crate::handler::flags;
        let mut builder =
            HandlerBuilder::new(&mut self.core.handlers, &mut self.core.root_handlers);
        builder.add_read("config", flags::CALM, |_, info| info.router.flat_config());
        builder.add_read("nelements", flags::CALM, |_, info| {
            info.router.nelements().to_string()
        });
        builder.add_read("requirements", flags::CALM, |_, info| {
            info.router
                .requirements()
                .iter()
                .map(|(k, v)| format!("{} {}\n", k, v))
                .collect()
        });
        builder.add_write("stop", flags::BUTTON, |value, _, info, _errh| {
            let n: i32 = value.trim().parse().unwrap_or(1);
            info.router.adjust_runcount(-n.max(1));
            Ok(())
        });
    }

    /// Reconstructs a flat configuration text from the stored declarations
    /// and connections.
    pub fn flat_config(&self) -> String {
        let mut out = String::new();
        for e in 0..self.nelements() {
            out.push_str(&format!(
                "{} :: {}({});\n",
                self.core.names[e], self.core.classes[e], self.core.configs[e]
            ));
        }
        for c in &self.core.connections {
            out.push_str(&format!(
                "{} [{}] -> [{}] {};\n",
                self.core.names[c.from.0], c.from.1, c.to.1, self.core.names[c.to.0]
            ));
        }
        out
    }

    /// Transfers state from the same-named, same-class elements of `old`.
    /// The hot-swap handoff; both routers must be initialized.
    pub fn take_state_from(&self, old: &Router, errh: &mut dyn ErrorHandler) {
        for e in 0..self.nelements() {
            let name = &self.core.names[e];
            let Some(old_e) = old.element_by_name(name) else { continue };
            if old.element_class(old_e) != self.element_class(e) {
                continue;
            }
            self.cells[e].enter(|new_el| {
                old.cells[old_e].enter(|old_el| new_el.take_state(old_el, errh));
            });
        }
    }

    fn fail(&mut self, stage: CleanupStage) {
        for s in &mut self.core.stages {
            *s = stage;
        }
        self.cleanup();
        self.core.state = RouterState::Dead;
        self.set_running(RunningState::Dead);
    }

    fn cleanup(&mut self) {
        if self.core.cleaned {
            return;
        }
        self.core.cleaned = true;
        let order = if self.core.configure_order.len() == self.cells.len() {
            self.core.configure_order.clone()
        } else {
            (0..self.cells.len()).collect()
        };
        for &e in order.iter().rev() {
            let stage = self.core.stages[e];
            self.cells[e].enter(|el| el.cleanup(stage));
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Configure- and initialize-time context handed to elements.
///
/// Grants access to the element's identity and landmark, the error handler,
/// task and timer creation, the notifier arena, the name databases, and the
/// activity-signal graph walks.
pub struct InitContext<'a> {
    pub(crate) cells: &'a [ElementCell],
    pub(crate) core: &'a mut RouterCore,
    pub(crate) eindex: usize,
    pub(crate) errh: &'a mut dyn ErrorHandler,
}

impl<'a> InitContext<'a> {
    /// This element's index.
    pub fn eindex(&self) -> usize {
        self.eindex
    }

    /// This element's full name.
    pub fn name(&self) -> &str {
        &self.core.names[self.eindex]
    }

    /// This element's landmark.
    pub fn landmark(&self) -> &Landmark {
        &self.core.landmarks[self.eindex]
    }

    /// The error handler for warnings and notices.
    pub fn errh(&mut self) -> &mut dyn ErrorHandler {
        self.errh
    }

    /// Number of inputs (valid from `initialize` onward).
    pub fn ninputs(&self) -> usize {
        self.core.ninputs.get(self.eindex).copied().unwrap_or(0)
    }

    /// Number of outputs (valid from `initialize` onward).
    pub fn noutputs(&self) -> usize {
        self.core.noutputs.get(self.eindex).copied().unwrap_or(0)
    }

    /// Resolved direction of an input port.
    pub fn input_is_pull(&self, port: usize) -> bool {
        self.core.in_kind[self.eindex][port] == PortKind::Pull
    }

    /// Resolved direction of an output port.
    pub fn output_is_push(&self, port: usize) -> bool {
        self.core.out_kind[self.eindex][port] == PortKind::Push
    }

    /// This element's home thread.
    pub fn home_thread(&self) -> i32 {
        self.core.home_threads[self.eindex]
    }

    /// Creates a task firing this element's `run_task`, registered for
    /// activation. `schedule` requests an initial scheduling.
    pub fn new_task(&mut self, schedule: bool) -> Arc<Task> {
        let task = Task::for_element(self.eindex, self.core.home_threads[self.eindex], schedule);
        self.core.tasks.push(Arc::clone(&task));
        task
    }

    /// Creates a timer firing this element's `run_timer`.
    pub fn new_timer(&mut self) -> Timer {
        let timer = Timer::for_element(self.eindex);
        self.core.timers.push(timer.clone());
        timer
    }

    /// Allocates a fresh basic activity signal named for this element.
    pub fn new_notifier_signal(&mut self, name: &str) -> NotifierSignal {
        let full = format!("{}.{}", self.core.names[self.eindex], name);
        self.core.signals.lock().allocate(&full)
    }

    /// Defines `name` in this element's compound scope.
    pub fn define_name<T: NameValue>(&mut self, name: &str, value: &T) {
        let context = NameInfo::context_of(&self.core.names[self.eindex]);
        self.core.name_info.define(T::DB_TYPE, context, name, value.to_name_bytes());
    }

    /// Looks `name` up from this element's scope outward, falling back to
    /// the master's global databases.
    pub fn query_name<T: NameValue>(&self, name: &str) -> Option<T> {
        let element_name = &self.core.names[self.eindex];
        if let Some(bytes) = self.core.name_info.query(T::DB_TYPE, element_name, name) {
            return T::from_name_bytes(&bytes);
        }
        let master = self.core.master.upgrade()?;
        let bytes = master.global_name_info().lock().query(T::DB_TYPE, element_name, name)?;
        T::from_name_bytes(&bytes)
    }

    /// Derives the union of the empty-notifiers upstream of input `port`,
    /// registering `listener` with each. Returns `busy` when none exist.
    pub fn upstream_empty_signal(&mut self, port: usize, listener: Option<&Arc<Task>>) -> NotifierSignal {
        visit::notifier_search(self.cells, self.core, self.eindex, port, NotifierKind::Empty, listener)
    }

    /// Derives the union of the full-notifiers downstream of output `port`,
    /// registering `listener` with each. Returns `busy` when none exist.
    pub fn downstream_full_signal(&mut self, port: usize, listener: Option<&Arc<Task>>) -> NotifierSignal {
        visit::notifier_search(self.cells, self.core, self.eindex, port, NotifierKind::Full, listener)
    }
}

// Context convenience built on the resolved graph; lives here so the
// element module stays free of router internals.
impl Context<'_> {
    /// Adjusts the owning router's runcount; a source that has produced its
    /// quota stops the driver this way.
    pub fn adjust_runcount(&self, delta: i32) {
        self.router().adjust_runcount(delta);
    }
}
