//! The per-thread driver loop.
//!
//! Each [`RouterThread`] owns a run-queue heap, a pending queue for requests
//! deposited by other threads, and a timer set. One iteration of the driver:
//! drain the pending queue, fire a burst of tasks, advance timers on a
//! stride, and periodically yield to the OS, the only place the thread may
//! block. Threads park through a narrow [`Parker`] seam so the loop itself
//! stays platform-neutral.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use switchyard_logging::{Logger, Registry};

use crate::logging::TaskEvent;
use crate::master::Master;
use crate::sync::Spinlock;

use super::{pass_gt, Task, TaskHeap, TimerSet, NO_THREAD};

/// Tunables of one driver thread.
///
/// The adaptive-share constants of the original design are configuration,
/// not contract; they live here.
#[derive(Clone, Debug)]
pub struct ThreadConfig {
    /// Maximum tasks fired per iteration.
    pub tasks_per_iter: usize,
    /// Timers advance every this many iterations.
    pub timer_stride: u64,
    /// The OS-yield step runs every this many iterations.
    pub iters_per_os: u64,
    /// Never block in the OS-yield step.
    pub greedy: bool,
    /// Longest park when no timer caps it sooner.
    pub os_pause: Duration,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        ThreadConfig {
            tasks_per_iter: 128,
            timer_stride: 32,
            iters_per_os: 2,
            greedy: false,
            os_pause: Duration::from_millis(100),
        }
    }
}

/// The OS-yield seam: how a driver thread blocks and is woken.
///
/// The userlevel implementation parks on a condition variable; a kernel
/// driver would sleep on a waitqueue. Everything else in the loop is
/// platform-neutral.
pub trait Parker: Send + Sync {
    /// Blocks until woken or until `timeout` passes. A wake delivered while
    /// not parked must un-block the next park (no lost wakeups).
    fn park(&self, timeout: Duration);
    /// Wakes the parked thread, or pre-empts its next park.
    fn unpark(&self);
}

/// A [`Parker`] on a mutex and condition variable.
#[derive(Default)]
pub struct CondvarParker {
    woken: Mutex<bool>,
    condvar: Condvar,
}

impl Parker for CondvarParker {
    fn park(&self, timeout: Duration) {
        let mut woken = self.woken.lock().unwrap();
        if !*woken {
            let (guard, _) = self
                .condvar
                .wait_timeout_while(woken, timeout, |w| !*w)
                .unwrap();
            woken = guard;
        }
        *woken = false;
    }

    fn unpark(&self) {
        *self.woken.lock().unwrap() = true;
        self.condvar.notify_one();
    }
}

/// One driver thread: run queue, pending queue, timers, parker.
pub struct RouterThread {
    id: i32,
    heap: Spinlock<TaskHeap>,
    pending: Spinlock<VecDeque<Arc<Task>>>,
    timers: TimerSet,
    parker: Box<dyn Parker>,
    config: ThreadConfig,
    iter: AtomicU64,
}

impl RouterThread {
    pub(crate) fn new(id: i32, config: ThreadConfig) -> RouterThread {
        RouterThread {
            id,
            heap: Spinlock::new(TaskHeap::new(id)),
            pending: Spinlock::new(VecDeque::new()),
            timers: TimerSet::new(),
            parker: Box::new(CondvarParker::default()),
            config,
            iter: AtomicU64::new(0),
        }
    }

    /// This thread's id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The thread's configuration.
    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }

    /// The thread's timer set.
    pub fn timer_set(&self) -> &TimerSet {
        &self.timers
    }

    /// Number of tasks on the run queue. Heap entries for foreign or
    /// unscheduled tasks are dropped lazily, so this is an upper bound.
    pub fn nscheduled(&self) -> usize {
        self.heap.lock().len()
    }

    /// True when `task` currently sits on this thread's heap.
    pub fn hosts(&self, task: &Task) -> bool {
        task.host() == self.id
    }

    /// Deposits a cross-thread request: schedule, migrate, or drop `task`.
    /// Consumed at the top of the next iteration.
    pub(crate) fn deposit(&self, task: Arc<Task>) {
        self.pending.lock().push_back(task);
        self.unpark();
    }

    /// Wakes the thread out of its OS-yield step.
    pub fn unpark(&self) {
        self.parker.unpark();
    }

    /// Drains the pending queue. Returns the number of entries handled.
    pub fn process_pending(&self, master: &Master) -> usize {
        let drained: Vec<Arc<Task>> = {
            let mut pending = self.pending.lock();
            pending.drain(..).collect()
        };
        let n = drained.len();
        for task in drained {
            let home = task.home_thread_id();
            let host = task.host();
            if host == self.id {
                if home != self.id {
                    // Migrating away: release our entry, hand to the new home.
                    self.heap.lock().remove(&task);
                    task.deliver();
                } else if !task.is_scheduled() || task.is_strong_unscheduled() {
                    self.heap.lock().remove(&task);
                }
            } else if host == NO_THREAD {
                if home != self.id {
                    if let Some(thread) = master.thread(home) {
                        thread.deposit(task);
                    }
                } else if task.is_scheduled() && !task.is_strong_unscheduled() {
                    self.heap.lock().insert(task);
                }
            } else {
                // Hosted elsewhere; that thread must release it first.
                if let Some(thread) = master.thread(host) {
                    thread.deposit(task);
                }
            }
        }
        n
    }

    /// Fires up to `limit` tasks from the heap in pass order. Returns the
    /// number fired.
    pub fn run_tasks(&self, master: &Master, limit: usize) -> usize {
        self.run_tasks_logged(master, limit, None)
    }

    fn run_tasks_logged(&self, master: &Master, limit: usize, logger: Option<&Logger<TaskEvent>>) -> usize {
        let mut fired = 0;
        while fired < limit {
            let task = {
                let mut heap = self.heap.lock();
                let Some(top) = heap.peek() else { break };
                if top.home_thread_id() != self.id {
                    // Migrated away while on our heap: release and forward.
                    let task = heap.pop().unwrap();
                    drop(heap);
                    task.deliver();
                    continue;
                }
                if !top.is_scheduled() || top.is_strong_unscheduled() {
                    heap.pop();
                    continue;
                }
                heap.pop().unwrap()
            };

            // Stride accounting: advance pass, clear the scheduled bit, fire.
            // The element keeps itself running by calling fast_reschedule.
            task.set_pass(task.pass().wrapping_add(task.stride()));
            task.unschedule();
            let work = task.fire();
            fired += 1;
            if let Some(logger) = logger {
                logger.log(TaskEvent::Fired { eindex: task.eindex(), work });
            }

            if task.is_scheduled() && !task.is_strong_unscheduled() {
                if task.home_thread_id() == self.id {
                    let mut heap = self.heap.lock();
                    if !work {
                        // No work done: bump the pass to at least the
                        // second-smallest so the task is not re-fired within
                        // this burst.
                        if let Some(min) = heap.min_pass() {
                            if pass_gt(min, task.pass()) {
                                task.set_pass(min);
                            }
                        }
                    }
                    heap.insert(task);
                } else {
                    task.deliver();
                }
            }
        }
        fired
    }

    /// Advances the timer wheel, firing due timers.
    pub fn run_timers(&self) -> usize {
        self.timers.run_due(Instant::now())
    }

    /// One driver iteration, without the OS-yield step. Tests drive this
    /// directly for determinism.
    pub fn step(&self, master: &Master) {
        self.step_logged(master, None);
    }

    fn step_logged(&self, master: &Master, logger: Option<&Logger<TaskEvent>>) {
        let delivered = self.process_pending(master);
        if delivered > 0 {
            if let Some(logger) = logger {
                logger.log(TaskEvent::Pending { delivered });
            }
        }
        if !master.paused() && master.enter_tasks() {
            self.run_tasks_logged(master, self.config.tasks_per_iter, logger);
            master.leave_tasks();
        }
        let iter = self.iter.fetch_add(1, Ordering::Relaxed) + 1;
        if iter % self.config.timer_stride == 0 {
            let n = self.run_timers();
            if n > 0 {
                if let Some(logger) = logger {
                    logger.log(TaskEvent::Timers { fired: n });
                }
            }
        }
    }

    /// True when there is nothing to run right now.
    fn idle(&self) -> bool {
        self.heap.lock().is_empty() && self.pending.lock().is_empty()
    }

    /// The driver loop: iterates until the master confirms a stop.
    pub fn driver(&self, master: &Arc<Master>) {
        let mut registry = Registry::new();
        master.install_thread_logging(self.id, &mut registry);
        let logger = registry.get::<TaskEvent>("tasks");

        loop {
            if master.stop_requested() && master.check_driver() {
                break;
            }
            self.step_logged(master, logger.as_ref());

            let iter = self.iter.load(Ordering::Relaxed);
            if !self.config.greedy && iter % self.config.iters_per_os == 0 {
                if self.idle() {
                    let timeout = self
                        .timers
                        .next_deadline()
                        .map(|d| d.saturating_duration_since(Instant::now()))
                        .unwrap_or(self.config.os_pause)
                        .min(self.config.os_pause);
                    self.parker.park(timeout);
                } else {
                    std::thread::yield_now();
                }
            }
        }
        registry.flush();
    }
}
