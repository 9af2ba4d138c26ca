//! The master: process-wide owner of driver threads and router lifecycles.
//!
//! A [`Master`] owns its [`RouterThread`]s, the registered routers, the
//! global name databases, and the global handlers. Routers are built against
//! a master, initialized, then [activated](Master::activate_router), which
//! binds their tasks and timers to driver threads. [`Master::spawn`] starts
//! one OS thread per driver loop and returns join guards in the style of a
//! worker harness.
//!
//! Driver stop is arbitrated here: when any router's runcount reaches zero
//! the threads consult [`Master::check_driver`], which lets a router's stop
//! guard veto the stop (resetting the runcount) or confirms it, strongly
//! unscheduling the router's tasks.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use switchyard_logging::Registry;

use crate::handler::HandlerError;
use crate::nameinfo::NameInfo;
use crate::report::ErrorHandler;
use crate::router::{Router, RouterError, RouterState, RunningState};
use crate::scheduling::{RouterThread, ThreadConfig};
use crate::sync::Spinlock;

/// Read callback of a global handler.
pub type GlobalReadCallback = Arc<dyn Fn(&Master) -> String + Send + Sync>;
/// Write callback of a global handler.
pub type GlobalWriteCallback =
    Arc<dyn Fn(&str, &Master, &mut dyn ErrorHandler) -> Result<(), HandlerError> + Send + Sync>;

/// A handler not tied to any element: process-wide controls and
/// introspection.
#[derive(Clone)]
pub struct GlobalHandler {
    name: String,
    flags: u32,
    read: Option<GlobalReadCallback>,
    write: Option<GlobalWriteCallback>,
}

impl GlobalHandler {
    /// The handler's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler's flags.
    pub fn flags(&self) -> u32 {
        self.flags
    }
}

type LoggingHook = Arc<dyn Fn(i32, &mut Registry) + Send + Sync>;

/// Process-wide owner of driver threads, routers, and global state.
pub struct Master {
    threads: Vec<Arc<RouterThread>>,
    routers: Spinlock<Vec<Arc<Router>>>,
    /// Reader count of running tasks, or -1 while a writer holds the
    /// blocker.
    task_blocker: AtomicI32,
    stop_requested: AtomicBool,
    force_stop: AtomicBool,
    done: AtomicBool,
    ever_activated: AtomicBool,
    paused: AtomicBool,
    /// Serializes stop arbitration.
    decision: Spinlock<()>,
    globals: Spinlock<Vec<GlobalHandler>>,
    global_names: Spinlock<NameInfo>,
    log_hook: Spinlock<Option<LoggingHook>>,
}

impl Master {
    /// Creates a master with `nthreads` driver threads and default thread
    /// configuration.
    pub fn new(nthreads: usize) -> Arc<Master> {
        Self::with_config(nthreads, ThreadConfig::default())
    }

    /// Creates a master with explicit thread configuration.
    pub fn with_config(nthreads: usize, config: ThreadConfig) -> Arc<Master> {
        let threads = (0..nthreads.max(1))
            .map(|i| Arc::new(RouterThread::new(i as i32, config.clone())))
            .collect();
        let master = Arc::new(Master {
            threads,
            routers: Spinlock::new(Vec::new()),
            task_blocker: AtomicI32::new(0),
            stop_requested: AtomicBool::new(false),
            force_stop: AtomicBool::new(false),
            done: AtomicBool::new(false),
            ever_activated: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            decision: Spinlock::new(()),
            globals: Spinlock::new(Vec::new()),
            global_names: Spinlock::new(NameInfo::with_defaults()),
            log_hook: Spinlock::new(None),
        });
        master.install_global_handlers();
        master
    }

    /// Number of driver threads.
    pub fn nthreads(&self) -> usize {
        self.threads.len()
    }

    /// The driver thread with id `id`.
    pub fn thread(&self, id: i32) -> Option<&Arc<RouterThread>> {
        self.threads.get(usize::try_from(id).ok()?)
    }

    /// The process-wide fallback name databases.
    pub fn global_name_info(&self) -> &Spinlock<NameInfo> {
        &self.global_names
    }

    /// The routers currently registered.
    pub fn routers(&self) -> Vec<Arc<Router>> {
        self.routers.lock().clone()
    }

    // --- router lifecycle ---

    /// Activates an initialized router: binds its tasks and timers to their
    /// home threads and delivers its initially scheduled tasks.
    pub fn activate_router(self: &Arc<Self>, router: Router) -> Result<Arc<Router>, RouterError> {
        if router.state() != RouterState::Live {
            return Err(RouterError::WrongState);
        }
        router.set_running(RunningState::Preparing);
        let router = Arc::new(router);
        for task in &router.core.tasks {
            task.bind(&router, self);
        }
        for timer in &router.core.timers {
            let home = timer
                .eindex()
                .map(|e| router.core.home_threads[e])
                .unwrap_or(0);
            timer.bind(&router, self, home);
            if let Some(when) = timer.expiry() {
                // Re-schedule through the binding so the deadline lands in
                // the home thread's timer set.
                timer.schedule_at(when);
            }
        }
        self.routers.lock().push(Arc::clone(&router));
        self.ever_activated.store(true, Ordering::Release);
        for task in &router.core.tasks {
            if task.is_scheduled() {
                task.deliver();
            }
        }
        router.set_running(RunningState::Active);
        Ok(router)
    }

    /// Unregisters a router, strongly unscheduling its tasks.
    pub fn remove_router(&self, router: &Arc<Router>) {
        self.routers.lock().retain(|r| !Arc::ptr_eq(r, router));
        router.strong_unschedule_tasks();
        router.set_running(RunningState::Dead);
    }

    /// Replaces `old` with the initialized router `new`: blocks tasks,
    /// transfers state between same-named same-class elements, swaps which
    /// router is live, and activates the replacement.
    pub fn hotswap_router(
        self: &Arc<Self>,
        old: &Arc<Router>,
        new: Router,
        errh: &mut dyn ErrorHandler,
    ) -> Result<Arc<Router>, RouterError> {
        if new.state() != RouterState::Live {
            return Err(RouterError::WrongState);
        }
        self.block_tasks();
        new.take_state_from(old, errh);
        self.remove_router(old);
        self.unblock_tasks();
        self.activate_router(new)
    }

    /// Binds a free-standing (callback) task to this master, so its
    /// schedule and migration requests reach driver threads. Element tasks
    /// are bound by [`Master::activate_router`] instead.
    pub fn bind_task(self: &Arc<Self>, task: &Arc<crate::scheduling::Task>) {
        task.bind_master(self);
    }

    // --- task blocker ---

    /// Enters task execution as a reader; false while a writer holds the
    /// blocker.
    pub(crate) fn enter_tasks(&self) -> bool {
        let mut current = self.task_blocker.load(Ordering::Acquire);
        loop {
            if current < 0 {
                return false;
            }
            match self.task_blocker.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(c) => current = c,
            }
        }
    }

    pub(crate) fn leave_tasks(&self) {
        self.task_blocker.fetch_sub(1, Ordering::AcqRel);
    }

    /// Excludes task execution process-wide: spins until no task is
    /// running, then holds the blocker. Pair with
    /// [`Master::unblock_tasks`].
    pub fn block_tasks(&self) {
        while self
            .task_blocker
            .compare_exchange(0, -1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            std::hint::spin_loop();
        }
    }

    /// Releases the task blocker.
    pub fn unblock_tasks(&self) {
        self.task_blocker.store(0, Ordering::Release);
    }

    /// True while the drivers are paused.
    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Pauses or resumes task execution in the driver loops.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        if !paused {
            self.unpark_all();
        }
    }

    // --- driver stop ---

    /// Asks every driver thread to consider stopping.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.unpark_all();
    }

    /// True when a stop request is outstanding.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// True once the drivers have confirmed a stop.
    pub fn done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Requests an unconditional driver stop.
    pub fn please_stop_driver(&self) {
        self.force_stop.store(true, Ordering::Release);
        for router in self.routers() {
            router.set_runcount(0);
        }
        self.request_stop();
    }

    /// Arbitrates an outstanding stop request. Routers whose runcount
    /// reached zero may veto through their stop guard; otherwise they are
    /// confirmed dead. Returns true when no live router remains and the
    /// drivers should exit.
    pub fn check_driver(&self) -> bool {
        let _guard = self.decision.lock();
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let routers = self.routers();
        let mut any_alive = false;
        for router in routers {
            if router.running_state() == RunningState::Dead {
                continue;
            }
            if router.runcount() > 0 {
                any_alive = true;
                continue;
            }
            if router.run_stop_guard() {
                // Vetoed: the driver resumes.
                router.set_runcount(1);
                any_alive = true;
                continue;
            }
            router.set_running(RunningState::Dead);
            router.strong_unschedule_tasks();
        }
        let force = self.force_stop.load(Ordering::Acquire);
        if any_alive || (!self.ever_activated.load(Ordering::Acquire) && !force) {
            self.stop_requested.store(false, Ordering::Release);
            false
        } else {
            self.done.store(true, Ordering::Release);
            self.unpark_all();
            true
        }
    }

    fn unpark_all(&self) {
        for thread in &self.threads {
            thread.unpark();
        }
    }

    // --- execution ---

    /// Spawns one OS thread per driver loop. The loops run until a stop is
    /// confirmed; join the guards to wait for them.
    pub fn spawn(self: &Arc<Self>) -> DriverGuards {
        let handles = self
            .threads
            .iter()
            .map(|thread| {
                let thread = Arc::clone(thread);
                let master = Arc::clone(self);
                std::thread::Builder::new()
                    .name(format!("switchyard-driver-{}", thread.id()))
                    .spawn(move || thread.driver(&master))
                    .expect("spawn driver thread")
            })
            .collect();
        DriverGuards { handles }
    }

    /// Runs driver thread 0 on the calling thread until stop. The
    /// single-threaded entry point.
    pub fn run(self: &Arc<Self>) {
        self.threads[0].driver(self);
    }

    // --- logging ---

    /// Installs the hook that equips each driver thread's logging registry.
    /// Threads log [`TaskEvent`]s under the name `"tasks"`.
    ///
    /// [`TaskEvent`]: crate::logging::TaskEvent
    pub fn set_logging_hook(&self, hook: impl Fn(i32, &mut Registry) + Send + Sync + 'static) {
        *self.log_hook.lock() = Some(Arc::new(hook));
    }

    pub(crate) fn install_thread_logging(&self, thread_id: i32, registry: &mut Registry) {
        let hook = self.log_hook.lock().clone();
        if let Some(hook) = hook {
            hook(thread_id, registry);
        }
    }

    // --- global handlers ---

    /// Registers a global read handler.
    pub fn add_global_read(
        &self,
        name: &str,
        flags: u32,
        read: impl Fn(&Master) -> String + Send + Sync + 'static,
    ) {
        self.install_global(GlobalHandler {
            name: name.to_owned(),
            flags: flags | crate::handler::flags::OP_READ,
            read: Some(Arc::new(read)),
            write: None,
        });
    }

    /// Registers a global write handler.
    pub fn add_global_write(
        &self,
        name: &str,
        flags: u32,
        write: impl Fn(&str, &Master, &mut dyn ErrorHandler) -> Result<(), HandlerError> + Send + Sync + 'static,
    ) {
        self.install_global(GlobalHandler {
            name: name.to_owned(),
            flags: flags | crate::handler::flags::OP_WRITE,
            read: None,
            write: Some(Arc::new(write)),
        });
    }

    fn install_global(&self, handler: GlobalHandler) {
        let mut globals = self.globals.lock();
        if let Some(existing) = globals.iter_mut().find(|h| h.name == handler.name) {
            *existing = handler;
        } else {
            globals.push(handler);
        }
    }

    /// The registered global handlers.
    pub fn global_handlers(&self) -> Vec<GlobalHandler> {
        self.globals.lock().clone()
    }

    /// Calls a global read handler.
    pub fn call_global_read(&self, name: &str) -> Result<String, HandlerError> {
        let handler = self
            .globals
            .lock()
            .iter()
            .find(|h| h.name == name)
            .cloned()
            .ok_or_else(|| HandlerError::NoSuchHandler(name.to_owned()))?;
        let read = handler
            .read
            .ok_or_else(|| HandlerError::NotReadable(name.to_owned()))?;
        Ok(read(self))
    }

    /// Calls a global write handler.
    pub fn call_global_write(
        &self,
        name: &str,
        value: &str,
        errh: &mut dyn ErrorHandler,
    ) -> Result<(), HandlerError> {
        let handler = self
            .globals
            .lock()
            .iter()
            .find(|h| h.name == name)
            .cloned()
            .ok_or_else(|| HandlerError::NoSuchHandler(name.to_owned()))?;
        let write = handler
            .write
            .ok_or_else(|| HandlerError::NotWritable(name.to_owned()))?;
        write(value, self, errh)
    }

    fn install_global_handlers(self: &Arc<Self>) {
        use crate::handler::flags;
        self.add_global_read("version", flags::CALM, |_| {
            env!("CARGO_PKG_VERSION").to_owned()
        });
        self.add_global_read("nrouters", flags::CALM, |master| {
            master.routers.lock().len().to_string()
        });
        // Driver control: stop/run adjust every router's runcount, pause
        // gates the task bursts.
        self.add_global_write("stop", flags::BUTTON, |value, master, _| {
            let n: i32 = value.trim().parse().unwrap_or(1);
            for router in master.routers() {
                router.adjust_runcount(-n.max(1));
            }
            Ok(())
        });
        self.add_global_write("run", flags::BUTTON, |value, master, _| {
            let n: i32 = value.trim().parse().unwrap_or(1);
            for router in master.routers() {
                router.adjust_runcount(n.max(1));
            }
            Ok(())
        });
        self.add_global_write("pause", flags::CHECKBOX, |value, master, _| {
            let value = value.trim();
            let paused = if value.is_empty() {
                true
            } else {
                <bool as crate::config::args::FromArg>::from_arg(value).map_err(HandlerError::Rejected)?
            };
            master.set_paused(paused);
            Ok(())
        });
    }
}

/// Process configuration: thread count plus per-thread tunables.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Number of driver threads.
    pub threads: usize,
    /// Per-thread tunables.
    pub thread: ThreadConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            threads: 1,
            thread: ThreadConfig::default(),
        }
    }
}

#[cfg(feature = "getopts")]
impl DriverConfig {
    /// Constructs a configuration by parsing supplied text arguments.
    ///
    /// Most commonly, this uses `std::env::args()` as the supplied iterator.
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<DriverConfig, String> {
        let mut opts = getopts::Options::new();
        opts.optopt("j", "threads", "number of driver threads", "NUM");
        opts.optopt("", "tasks-per-iter", "tasks fired per loop iteration", "NUM");
        opts.optopt("", "timer-stride", "iterations between timer advances", "NUM");
        opts.optflag("g", "greedy", "never block in the OS-yield step");

        let matches = opts.parse(args).map_err(|e| e.to_string())?;
        let mut config = DriverConfig {
            threads: 1,
            thread: ThreadConfig::default(),
        };
        if let Some(threads) = matches.opt_str("threads") {
            config.threads = threads.parse().map_err(|_| format!("bad thread count {:?}", threads))?;
        }
        if let Some(n) = matches.opt_str("tasks-per-iter") {
            config.thread.tasks_per_iter = n.parse().map_err(|_| format!("bad task count {:?}", n))?;
        }
        if let Some(n) = matches.opt_str("timer-stride") {
            config.thread.timer_stride = n.parse().map_err(|_| format!("bad timer stride {:?}", n))?;
        }
        config.thread.greedy = matches.opt_present("greedy");
        Ok(config)
    }
}

impl Master {
    /// Creates a master from a parsed [`DriverConfig`].
    pub fn from_config(config: &DriverConfig) -> Arc<Master> {
        Master::with_config(config.threads, config.thread.clone())
    }
}

/// Join guards for spawned driver threads, in the style of a worker
/// harness: dropping the guards joins the threads.
pub struct DriverGuards {
    handles: Vec<JoinHandle<()>>,
}

impl DriverGuards {
    /// Waits for every driver thread to exit.
    pub fn join(mut self) {
        for handle in self.handles.drain(..) {
            handle.join().expect("driver thread panicked");
        }
    }
}

impl Drop for DriverGuards {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}
