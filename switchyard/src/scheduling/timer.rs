//! Per-thread timers on a monotonic clock.
//!
//! A [`Timer`] is owned by an element (or wraps a callback) and lives in the
//! [`TimerSet`] of its home thread. Scheduling pushes an entry keyed on the
//! deadline; unscheduling and rescheduling invalidate old entries by bumping
//! a generation counter, so the heap never needs a search. A timer fires at
//! most once per scheduling and may reschedule itself from `run_timer`.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use crate::master::Master;
use crate::router::Router;
use crate::sync::Spinlock;

enum TimerKind {
    Element(usize),
    Callback(Spinlock<Box<dyn FnMut() + Send>>),
}

pub(crate) struct TimerBinding {
    pub router: Weak<Router>,
    pub master: Weak<Master>,
    pub home_thread: i32,
}

pub(crate) struct TimerInner {
    gen: AtomicU64,
    deadline: Spinlock<Option<Instant>>,
    kind: TimerKind,
    binding: OnceLock<TimerBinding>,
}

/// A deadline bound to an element or callback.
#[derive(Clone)]
pub struct Timer {
    inner: Arc<TimerInner>,
}

impl Timer {
    fn new(kind: TimerKind) -> Timer {
        Timer {
            inner: Arc::new(TimerInner {
                gen: AtomicU64::new(0),
                deadline: Spinlock::new(None),
                kind,
                binding: OnceLock::new(),
            }),
        }
    }

    /// Creates a timer that fires an element's `run_timer`.
    pub(crate) fn for_element(eindex: usize) -> Timer {
        Timer::new(TimerKind::Element(eindex))
    }

    /// Creates a timer that fires a callback.
    pub fn for_callback<F: FnMut() + Send + 'static>(f: F) -> Timer {
        Timer::new(TimerKind::Callback(Spinlock::new(Box::new(f))))
    }

    pub(crate) fn bind(&self, router: &Arc<Router>, master: &Arc<Master>, home_thread: i32) {
        let _ = self.inner.binding.set(TimerBinding {
            router: Arc::downgrade(router),
            master: Arc::downgrade(master),
            home_thread,
        });
    }

    /// The element this timer fires, if it is an element timer.
    pub fn eindex(&self) -> Option<usize> {
        match self.inner.kind {
            TimerKind::Element(e) => Some(e),
            TimerKind::Callback(_) => None,
        }
    }

    /// True when a deadline is pending.
    pub fn scheduled(&self) -> bool {
        self.inner.deadline.lock().is_some()
    }

    /// The pending deadline.
    pub fn expiry(&self) -> Option<Instant> {
        *self.inner.deadline.lock()
    }

    /// Schedules the timer to fire at `when`, replacing any pending
    /// deadline.
    pub fn schedule_at(&self, when: Instant) {
        let gen = self.inner.gen.fetch_add(1, Ordering::AcqRel) + 1;
        *self.inner.deadline.lock() = Some(when);
        if let Some(binding) = self.inner.binding.get() {
            if let Some(master) = binding.master.upgrade() {
                if let Some(thread) = master.thread(binding.home_thread) {
                    thread.timer_set().push(when, gen, Arc::clone(&self.inner));
                    // Wake the thread so its park timeout re-caps.
                    thread.unpark();
                }
            }
        }
    }

    /// Schedules the timer `after` from now.
    pub fn schedule_after(&self, after: Duration) {
        self.schedule_at(Instant::now() + after);
    }

    /// Cancels any pending deadline.
    pub fn unschedule(&self) {
        self.inner.gen.fetch_add(1, Ordering::AcqRel);
        *self.inner.deadline.lock() = None;
    }
}

struct TimerEntry {
    deadline: Instant,
    gen: u64,
    timer: Arc<TimerInner>,
}

// BinaryHeap is a max-heap; order entries inverted so the earliest deadline
// surfaces first.
impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.gen.cmp(&self.gen))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.gen == other.gen
    }
}

impl Eq for TimerEntry {}

/// The deadline heap of one driver thread.
#[derive(Default)]
pub struct TimerSet {
    entries: Spinlock<BinaryHeap<TimerEntry>>,
}

impl TimerSet {
    /// Creates an empty timer set.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, deadline: Instant, gen: u64, timer: Arc<TimerInner>) {
        self.entries.lock().push(TimerEntry { deadline, gen, timer });
    }

    /// The earliest pending deadline, skipping invalidated entries.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut entries = self.entries.lock();
        while let Some(top) = entries.peek() {
            if top.timer.gen.load(Ordering::Acquire) != top.gen {
                entries.pop();
                continue;
            }
            return Some(top.deadline);
        }
        None
    }

    /// Fires every timer due at `now`. Returns the number fired.
    pub fn run_due(&self, now: Instant) -> usize {
        // Collect due entries under the lock, fire outside it: run_timer may
        // reschedule, which takes the lock again.
        let mut due = Vec::new();
        {
            let mut entries = self.entries.lock();
            while let Some(top) = entries.peek() {
                if top.timer.gen.load(Ordering::Acquire) != top.gen {
                    entries.pop();
                    continue;
                }
                if top.deadline > now {
                    break;
                }
                due.push(entries.pop().unwrap());
            }
        }

        let mut fired = 0;
        for entry in due {
            // Re-check validity: the timer may have been rescheduled after
            // collection.
            if entry.timer.gen.load(Ordering::Acquire) != entry.gen {
                continue;
            }
            *entry.timer.deadline.lock() = None;
            fired += 1;
            let timer = Timer { inner: Arc::clone(&entry.timer) };
            match &entry.timer.kind {
                TimerKind::Callback(f) => (f.lock())(),
                TimerKind::Element(eindex) => {
                    let Some(binding) = entry.timer.binding.get() else { continue };
                    let Some(router) = binding.router.upgrade() else { continue };
                    let cx = crate::element::Context::new(&router, *eindex);
                    router
                        .cell(*eindex)
                        .enter(|el| el.run_timer(&timer, &cx));
                }
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn unbound_timer_keeps_deadline() {
        let timer = Timer::for_callback(|| {});
        assert!(!timer.scheduled());
        timer.schedule_after(Duration::from_millis(10));
        assert!(timer.scheduled());
        timer.unschedule();
        assert!(!timer.scheduled());
    }

    #[test]
    fn due_entries_fire_in_deadline_order() {
        let set = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let now = Instant::now();

        let mut timers = Vec::new();
        for i in 0..3u64 {
            let sink = Arc::clone(&fired);
            let timer = Timer::for_callback(move || {
                sink.fetch_add(1, Ordering::SeqCst);
            });
            let gen = timer.inner.gen.fetch_add(1, Ordering::AcqRel) + 1;
            *timer.inner.deadline.lock() = Some(now + Duration::from_millis(i));
            set.push(now + Duration::from_millis(i), gen, Arc::clone(&timer.inner));
            timers.push(timer);
        }

        assert_eq!(set.next_deadline(), Some(now));
        assert_eq!(set.run_due(now + Duration::from_millis(1)), 2);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(set.run_due(now + Duration::from_secs(1)), 1);
    }

    #[test]
    fn stale_generations_are_skipped() {
        let set = TimerSet::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&fired);
        let timer = Timer::for_callback(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let now = Instant::now();
        let gen = timer.inner.gen.fetch_add(1, Ordering::AcqRel) + 1;
        *timer.inner.deadline.lock() = Some(now);
        set.push(now, gen, Arc::clone(&timer.inner));
        timer.unschedule();

        assert_eq!(set.run_due(now + Duration::from_secs(1)), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(set.next_deadline(), None);
    }
}
