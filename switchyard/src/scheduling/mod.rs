//! The cooperative task scheduler.
//!
//! A [`Task`] is a schedulable unit bound to an element (or, for tests and
//! infrastructure, a callback) and a home thread. Tasks are stride-scheduled:
//! each carries `tickets` and a derived `stride = STRIDE1 / tickets`; a
//! per-thread 4-ary heap orders tasks by `pass`, and every firing advances
//! `pass` by `stride`, so CPU share is proportional to tickets.
//!
//! A task's status word atomically packs its home thread id, its scheduled
//! bit, and its strong-unscheduled bit, so any thread can reschedule, move,
//! or cancel a task; requests from off the home thread travel through the
//! target thread's pending queue.

pub mod heap;
pub mod thread;
pub mod timer;

pub use heap::TaskHeap;
pub use thread::{Parker, RouterThread, ThreadConfig};
pub use timer::{Timer, TimerSet};

use std::sync::atomic::{AtomicI32, AtomicIsize, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use crate::master::Master;
use crate::router::Router;
use crate::sync::Spinlock;

/// One full stride: the stride of a task with one ticket.
pub const STRIDE1: u32 = 1 << 16;
/// Largest permitted ticket count.
pub const MAX_TICKETS: u32 = 1 << 10;
/// Ticket count of a freshly created task.
pub const DEFAULT_TICKETS: u32 = 1 << 7;

/// Wraparound-safe pass comparison: true when `a` is later than `b`.
#[inline]
pub(crate) fn pass_gt(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) as i32 > 0
}

const STATUS_HOME_MASK: u32 = 0xffff;
const STATUS_SCHEDULED: u32 = 1 << 16;
const STATUS_STRONG: u32 = 1 << 17;

/// No thread: the initial value of a task's host marker.
pub(crate) const NO_THREAD: i32 = -1;

enum TaskKind {
    /// Fire by calling `run_task` on the element at this index.
    Element(usize),
    /// Fire by calling the closure; returns whether work was done.
    Callback(Spinlock<Box<dyn FnMut(&Task) -> bool + Send>>),
}

pub(crate) struct TaskBinding {
    pub router: Weak<Router>,
    pub master: Weak<Master>,
}

/// A schedulable unit bound to an element and a home thread.
pub struct Task {
    /// Packs `{home_thread_id, is_scheduled, is_strong_unscheduled}`.
    status: AtomicU32,
    pass: AtomicU32,
    stride: AtomicU32,
    tickets: AtomicU32,
    /// Index within the hosting heap, -1 when not on a heap. Maintained by
    /// the hosting thread's heap operations.
    heap_index: AtomicIsize,
    /// Thread whose heap currently holds the task, `NO_THREAD` when none.
    host: AtomicI32,
    kind: TaskKind,
    binding: OnceLock<TaskBinding>,
    me: Weak<Task>,
}

impl Task {
    fn new(kind: TaskKind, home_thread: i32, scheduled: bool) -> Arc<Task> {
        let status = (home_thread as u32 & STATUS_HOME_MASK)
            | if scheduled { STATUS_SCHEDULED } else { 0 };
        Arc::new_cyclic(|me| Task {
            status: AtomicU32::new(status),
            pass: AtomicU32::new(0),
            stride: AtomicU32::new(STRIDE1 / DEFAULT_TICKETS),
            tickets: AtomicU32::new(DEFAULT_TICKETS),
            heap_index: AtomicIsize::new(-1),
            host: AtomicI32::new(NO_THREAD),
            kind,
            binding: OnceLock::new(),
            me: me.clone(),
        })
    }

    /// Creates a task that fires an element's `run_task`.
    pub(crate) fn for_element(eindex: usize, home_thread: i32, scheduled: bool) -> Arc<Task> {
        Task::new(TaskKind::Element(eindex), home_thread, scheduled)
    }

    /// Creates a task that fires a callback. The callback returns whether it
    /// did any work.
    pub fn for_callback<F: FnMut(&Task) -> bool + Send + 'static>(home_thread: i32, f: F) -> Arc<Task> {
        Task::new(TaskKind::Callback(Spinlock::new(Box::new(f))), home_thread, false)
    }

    /// The element this task fires, if it is an element task.
    pub fn eindex(&self) -> Option<usize> {
        match &self.kind {
            TaskKind::Element(e) => Some(*e),
            TaskKind::Callback(_) => None,
        }
    }

    /// The task's home thread: the only thread that may fire it.
    pub fn home_thread_id(&self) -> i32 {
        (self.status.load(Ordering::Acquire) & STATUS_HOME_MASK) as i32
    }

    /// True when the task wants to run.
    pub fn is_scheduled(&self) -> bool {
        self.status.load(Ordering::Acquire) & STATUS_SCHEDULED != 0
    }

    /// True when the task has been strongly unscheduled.
    pub fn is_strong_unscheduled(&self) -> bool {
        self.status.load(Ordering::Acquire) & STATUS_STRONG != 0
    }

    /// Current ticket count.
    pub fn tickets(&self) -> u32 {
        self.tickets.load(Ordering::Relaxed)
    }

    /// Sets the ticket count, clamped to `[1, MAX_TICKETS]`, and re-derives
    /// the stride.
    pub fn set_tickets(&self, tickets: u32) {
        let tickets = tickets.clamp(1, MAX_TICKETS);
        self.tickets.store(tickets, Ordering::Relaxed);
        self.stride.store(STRIDE1 / tickets, Ordering::Relaxed);
    }

    /// The task's stride.
    pub fn stride(&self) -> u32 {
        self.stride.load(Ordering::Relaxed)
    }

    /// The task's pass. Only the home thread advances it.
    pub fn pass(&self) -> u32 {
        self.pass.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pass(&self, pass: u32) {
        self.pass.store(pass, Ordering::Relaxed);
    }

    pub(crate) fn heap_index(&self) -> isize {
        self.heap_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_heap_index(&self, index: isize) {
        self.heap_index.store(index, Ordering::Release);
    }

    pub(crate) fn host(&self) -> i32 {
        self.host.load(Ordering::Acquire)
    }

    pub(crate) fn set_host(&self, host: i32) {
        self.host.store(host, Ordering::Release);
    }

    pub(crate) fn binding(&self) -> Option<&TaskBinding> {
        self.binding.get()
    }

    /// Binds the task to its activated router. Called once at activation.
    pub(crate) fn bind(&self, router: &Arc<Router>, master: &Arc<Master>) {
        let _ = self.binding.set(TaskBinding {
            router: Arc::downgrade(router),
            master: Arc::downgrade(master),
        });
    }

    /// Binds a free-standing callback task to a master, so schedule and
    /// migration requests reach its home thread. Element tasks are bound by
    /// router activation instead.
    pub(crate) fn bind_master(&self, master: &Arc<Master>) {
        let _ = self.binding.set(TaskBinding {
            router: Weak::new(),
            master: Arc::downgrade(master),
        });
    }

    /// Sets the scheduled bit without delivery. Valid from `run_task` on the
    /// home thread, where the driver reinserts the task after firing.
    pub fn fast_reschedule(&self) {
        let mut status = self.status.load(Ordering::Acquire);
        loop {
            if status & STATUS_STRONG != 0 {
                return;
            }
            match self.status.compare_exchange_weak(
                status,
                status | STATUS_SCHEDULED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(s) => status = s,
            }
        }
    }

    /// Schedules the task from any thread.
    ///
    /// Sets the scheduled bit; if the task is not sitting on a heap, the
    /// request is delivered to the appropriate thread's pending queue.
    pub fn reschedule(&self) {
        self.fast_reschedule();
        if self.is_scheduled() && self.host() == NO_THREAD {
            self.deliver();
        }
    }

    /// Clears the scheduled bit. A heap entry, if any, is dropped lazily.
    pub fn unschedule(&self) {
        self.status.fetch_and(!STATUS_SCHEDULED, Ordering::AcqRel);
    }

    /// Cancels the task: clears scheduled, sets strong-unscheduled, and asks
    /// the hosting thread to drop its entry.
    pub fn strong_unschedule(&self) {
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some((s & !STATUS_SCHEDULED) | STATUS_STRONG)
            })
            .ok();
        self.deliver();
    }

    /// Clears strong-unscheduled and schedules the task again.
    pub fn strong_reschedule(&self) {
        self.status.fetch_and(!STATUS_STRONG, Ordering::AcqRel);
        self.reschedule();
    }

    /// Moves the task to a new home thread.
    ///
    /// The hosting thread observes the change, removes its heap entry, and
    /// forwards the task to the new home's pending queue.
    pub fn move_thread(&self, thread_id: i32) {
        let old_home = self.home_thread_id();
        self.status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                Some((s & !STATUS_HOME_MASK) | (thread_id as u32 & STATUS_HOME_MASK))
            })
            .ok();
        self.deliver();
        // The old home may be parked with the task on its heap.
        if let Some(master) = self.master() {
            if let Some(thread) = master.thread(old_home) {
                thread.unpark();
            }
        }
    }

    fn master(&self) -> Option<Arc<Master>> {
        self.binding.get().and_then(|b| b.master.upgrade())
    }

    /// Hands the task to the thread that must act on it: the hosting thread
    /// when on a heap, the home thread otherwise.
    pub(crate) fn deliver(&self) {
        let Some(master) = self.master() else { return };
        let Some(me) = self.me.upgrade() else { return };
        let target = match self.host() {
            NO_THREAD => self.home_thread_id(),
            host => host,
        };
        if let Some(thread) = master.thread(target) {
            thread.deposit(me);
        }
    }

    /// Fires the task. Returns whether work was done.
    pub(crate) fn fire(&self) -> bool {
        match &self.kind {
            TaskKind::Callback(f) => (f.lock())(self),
            TaskKind::Element(eindex) => {
                let Some(binding) = self.binding.get() else { return false };
                let Some(router) = binding.router.upgrade() else {
                    self.unschedule();
                    return false;
                };
                let cx = crate::element::Context::new(&router, *eindex);
                router.cell(*eindex).enter(|el| el.run_task(self, &cx))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_word_packing() {
        let task = Task::for_callback(3, |_| true);
        assert_eq!(task.home_thread_id(), 3);
        assert!(!task.is_scheduled());
        task.fast_reschedule();
        assert!(task.is_scheduled());
        assert_eq!(task.home_thread_id(), 3);
        task.unschedule();
        assert!(!task.is_scheduled());
    }

    #[test]
    fn strong_unschedule_blocks_reschedule() {
        let task = Task::for_callback(0, |_| true);
        task.strong_unschedule();
        task.fast_reschedule();
        assert!(!task.is_scheduled());
        task.strong_reschedule();
        assert!(task.is_scheduled());
    }

    #[test]
    fn tickets_clamp_and_stride() {
        let task = Task::for_callback(0, |_| true);
        assert_eq!(task.stride(), STRIDE1 / DEFAULT_TICKETS);
        task.set_tickets(0);
        assert_eq!(task.tickets(), 1);
        assert_eq!(task.stride(), STRIDE1);
        task.set_tickets(MAX_TICKETS * 2);
        assert_eq!(task.tickets(), MAX_TICKETS);
    }

    #[test]
    fn pass_comparison_wraps() {
        assert!(pass_gt(1, 0));
        assert!(!pass_gt(0, 1));
        assert!(pass_gt(5, u32::MAX - 5));
        assert!(!pass_gt(u32::MAX - 5, 5));
    }
}
