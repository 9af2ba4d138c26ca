//! Activity signals and wake-up propagation.
//!
//! A [`NotifierSignal`] answers one question cheaply: is there any point in
//! running? A pull-driven element sleeps when everything upstream of it is
//! empty; the push side of a queue applies backpressure when everything
//! downstream is full. Signals are either static (`idle`, `busy`), a single
//! bit in a router-owned arena, or a derived union of such bits.
//!
//! A [`Notifier`] pairs a basic signal with listeners: tasks to reschedule
//! and callbacks to invoke when the signal turns active. The derived signals
//! guarding a sleeping element are assembled by graph walks
//! ([`InitContext::upstream_empty_signal`] and
//! [`InitContext::downstream_full_signal`]) that follow flow codes and
//! collect every notifier between the element and its sources or sinks.
//!
//! [`InitContext::upstream_empty_signal`]: crate::router::InitContext::upstream_empty_signal
//! [`InitContext::downstream_full_signal`]: crate::router::InitContext::downstream_full_signal

use std::ops::Add;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::scheduling::Task;

/// Which kind of notifier a graph walk is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierKind {
    /// Upstream activity: "this element has packets to give".
    Empty,
    /// Downstream capacity: "this element has room to take packets".
    Full,
}

/// What a graph walk should do upon finding a notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOp {
    /// Collect the notifier and stop walking past it (a queue).
    Stop,
    /// Collect the notifier and keep walking.
    Continue,
    /// Keep walking as if transparent; collected in a second pass.
    ContinueWake,
}

/// Components of a derived signal beyond which combination gives up and
/// returns the conservative always-active signal.
const MAX_DERIVED: usize = 32;

/// An activity signal.
///
/// `active()` is the only question; `set_active` is meaningful only for
/// basic signals. Signals combine with `+`: the result is active whenever
/// either operand is.
#[derive(Clone, Default)]
pub enum NotifierSignal {
    /// Not yet initialized; combines as the identity.
    #[default]
    Uninitialized,
    /// Never active.
    Idle,
    /// Always active.
    Busy,
    /// Too many components to track; conservatively always active.
    Overderived,
    /// One bit in a router-owned arena word.
    Basic {
        /// The arena word.
        word: Arc<AtomicU32>,
        /// The bit (or bits) of this signal within the word.
        mask: u32,
    },
    /// A union of basic signals.
    Derived {
        /// The component (word, mask) pairs.
        components: Arc<Vec<(Arc<AtomicU32>, u32)>>,
    },
}

impl NotifierSignal {
    /// The never-active signal.
    pub fn idle() -> Self {
        NotifierSignal::Idle
    }

    /// The always-active signal.
    pub fn busy() -> Self {
        NotifierSignal::Busy
    }

    /// True when the signal is currently active.
    pub fn active(&self) -> bool {
        match self {
            NotifierSignal::Uninitialized | NotifierSignal::Idle => false,
            NotifierSignal::Busy | NotifierSignal::Overderived => true,
            NotifierSignal::Basic { word, mask } => word.load(Ordering::Acquire) & mask != 0,
            NotifierSignal::Derived { components } => components
                .iter()
                .any(|(word, mask)| word.load(Ordering::Acquire) & mask != 0),
        }
    }

    /// True for a basic (single-bit) signal.
    pub fn is_basic(&self) -> bool {
        matches!(self, NotifierSignal::Basic { .. })
    }

    /// Sets or clears a basic signal's bit. Returns the previous activity.
    ///
    /// Static and derived signals ignore the request and report their fixed
    /// or current activity.
    pub fn set_active(&self, active: bool) -> bool {
        match self {
            NotifierSignal::Basic { word, mask } => {
                let prev = if active {
                    word.fetch_or(*mask, Ordering::AcqRel)
                } else {
                    word.fetch_and(!*mask, Ordering::AcqRel)
                };
                prev & mask != 0
            }
            other => other.active(),
        }
    }

    fn components(&self) -> Option<Vec<(Arc<AtomicU32>, u32)>> {
        match self {
            NotifierSignal::Basic { word, mask } => Some(vec![(Arc::clone(word), *mask)]),
            NotifierSignal::Derived { components } => Some(components.as_ref().clone()),
            _ => None,
        }
    }
}

impl Add for NotifierSignal {
    type Output = NotifierSignal;

    /// The union: active whenever either operand is. `busy` absorbs, `idle`
    /// is the identity, same-word basics merge their masks, and anything
    /// past the component limit collapses to `Overderived`.
    fn add(self, other: NotifierSignal) -> NotifierSignal {
        use NotifierSignal::*;
        match (&self, &other) {
            (Busy, _) | (_, Busy) => return Busy,
            (Uninitialized | Idle, _) => return other,
            (_, Uninitialized | Idle) => return self,
            (Overderived, _) | (_, Overderived) => return Overderived,
            _ => {}
        }
        let mut components = self.components().expect("combinable signal");
        for (word, mask) in other.components().expect("combinable signal") {
            if let Some((_, m)) = components.iter_mut().find(|(w, _)| Arc::ptr_eq(w, &word)) {
                *m |= mask;
            } else {
                components.push((word, mask));
            }
        }
        if components.len() > MAX_DERIVED {
            Overderived
        } else if components.len() == 1 {
            let (word, mask) = components.pop().unwrap();
            Basic { word, mask }
        } else {
            Derived { components: Arc::new(components) }
        }
    }
}

impl PartialEq for NotifierSignal {
    fn eq(&self, other: &Self) -> bool {
        use NotifierSignal::*;
        match (self, other) {
            (Uninitialized, Uninitialized) | (Idle, Idle) | (Busy, Busy) | (Overderived, Overderived) => true,
            (Basic { word: w1, mask: m1 }, Basic { word: w2, mask: m2 }) => Arc::ptr_eq(w1, w2) && m1 == m2,
            (Derived { components: c1 }, Derived { components: c2 }) => {
                c1.len() == c2.len()
                    && c1
                        .iter()
                        .zip(c2.iter())
                        .all(|((w1, m1), (w2, m2))| Arc::ptr_eq(w1, w2) && m1 == m2)
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for NotifierSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifierSignal::Uninitialized => write!(f, "Signal(uninitialized)"),
            NotifierSignal::Idle => write!(f, "Signal(idle)"),
            NotifierSignal::Busy => write!(f, "Signal(busy)"),
            NotifierSignal::Overderived => write!(f, "Signal(overderived)"),
            NotifierSignal::Basic { mask, .. } => write!(f, "Signal(basic {:#x})", mask),
            NotifierSignal::Derived { components } => write!(f, "Signal(derived x{})", components.len()),
        }
    }
}

/// The arena of signal words owned by a router.
///
/// Each basic signal is one bit of a 32-bit word; a new word is allocated
/// when the current one fills. Signal names are kept for diagnostics.
#[derive(Default)]
pub(crate) struct SignalArena {
    words: Vec<Arc<AtomicU32>>,
    bits_used: u32,
    names: Vec<String>,
}

impl SignalArena {
    /// Hands out one fresh bit as a basic signal.
    pub fn allocate(&mut self, name: &str) -> NotifierSignal {
        if self.words.is_empty() || self.bits_used == 32 {
            self.words.push(Arc::new(AtomicU32::new(0)));
            self.bits_used = 0;
        }
        let word = Arc::clone(self.words.last().unwrap());
        let mask = 1 << self.bits_used;
        self.bits_used += 1;
        self.names.push(name.to_owned());
        NotifierSignal::Basic { word, mask }
    }

    /// Number of signals allocated so far.
    pub fn len(&self) -> usize {
        self.names.len()
    }
}

/// A basic activity signal with listeners to wake on activation.
///
/// Elements own their notifiers and reveal them through
/// [`Element::port_notifier`], which is how graph walks find them.
///
/// [`Element::port_notifier`]: crate::element::Element::port_notifier
pub struct Notifier {
    signal: NotifierSignal,
    search_op: SearchOp,
    /// Most notifiers have zero or one listener.
    listeners: SmallVec<[Arc<Task>; 2]>,
    callbacks: Vec<Box<dyn Fn() + Send + Sync>>,
}

impl Notifier {
    /// Creates an uninitialized notifier with the given search behavior.
    pub fn new(search_op: SearchOp) -> Self {
        Notifier {
            signal: NotifierSignal::Uninitialized,
            search_op,
            listeners: SmallVec::new(),
            callbacks: Vec::new(),
        }
    }

    /// Supplies the notifier's basic signal; typically called from element
    /// `initialize` with a signal from the router arena.
    pub fn initialize(&mut self, signal: NotifierSignal) {
        debug_assert!(signal.is_basic());
        if matches!(self.signal, NotifierSignal::Uninitialized) {
            self.signal = signal;
        }
    }

    /// The notifier's signal.
    pub fn signal(&self) -> &NotifierSignal {
        &self.signal
    }

    /// The walk behavior on finding this notifier.
    pub fn search_op(&self) -> SearchOp {
        self.search_op
    }

    /// True when currently active.
    pub fn active(&self) -> bool {
        self.signal.active()
    }

    /// Sets or clears the signal without waking anyone.
    pub fn set_active(&self, active: bool) {
        self.signal.set_active(active);
    }

    /// Turns the signal active and, if it was inactive, wakes every
    /// listener: tasks are rescheduled on their home threads, callbacks run
    /// here.
    pub fn wake(&self) {
        if !self.signal.set_active(true) {
            for task in &self.listeners {
                task.reschedule();
            }
            for callback in &self.callbacks {
                callback();
            }
        }
    }

    /// Turns the signal inactive.
    pub fn sleep(&self) {
        self.signal.set_active(false);
    }

    /// Registers a task to reschedule on activation. Duplicate registrations
    /// are ignored.
    pub fn add_listener(&mut self, task: Arc<Task>) {
        if !self.listeners.iter().any(|t| Arc::ptr_eq(t, &task)) {
            self.listeners.push(task);
        }
    }

    /// Removes a previously registered task.
    pub fn remove_listener(&mut self, task: &Arc<Task>) {
        self.listeners.retain(|t| !Arc::ptr_eq(t, task));
    }

    /// Registers a callback to run on activation.
    pub fn add_activate_callback(&mut self, callback: Box<dyn Fn() + Send + Sync>) {
        self.callbacks.push(callback);
    }

    /// Number of registered listeners and callbacks.
    pub fn nlisteners(&self) -> usize {
        self.listeners.len() + self.callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_signals(n: usize) -> (SignalArena, Vec<NotifierSignal>) {
        let mut arena = SignalArena::default();
        let signals = (0..n).map(|i| arena.allocate(&format!("s{}", i))).collect();
        (arena, signals)
    }

    #[test]
    fn static_signals() {
        assert!(!NotifierSignal::idle().active());
        assert!(NotifierSignal::busy().active());
        assert!(!NotifierSignal::default().active());
    }

    #[test]
    fn basic_set_clear() {
        let (_arena, s) = arena_signals(2);
        assert!(!s[0].active());
        assert!(!s[0].set_active(true));
        assert!(s[0].active());
        // Distinct signals in the same word stay independent.
        assert!(!s[1].active());
        assert!(s[0].set_active(false));
        assert!(!s[0].active());
    }

    #[test]
    fn combination_rules() {
        let (_arena, s) = arena_signals(2);
        assert_eq!(NotifierSignal::idle() + s[0].clone(), s[0]);
        assert_eq!(s[0].clone() + NotifierSignal::busy(), NotifierSignal::Busy);
        // Same-word basics merge masks rather than deriving.
        assert!(matches!(s[0].clone() + s[1].clone(), NotifierSignal::Basic { .. }));
    }

    #[test]
    fn derived_activity() {
        let mut arena = SignalArena::default();
        // Force distinct words so the union is a true derived signal.
        let s1 = arena.allocate("s1");
        arena.bits_used = 32;
        let s2 = arena.allocate("s2");
        arena.bits_used = 32;
        let s3 = arena.allocate("s3");

        let derived = s1.clone() + s2.clone() + s3.clone();
        assert!(matches!(derived, NotifierSignal::Derived { .. }));
        assert!(!derived.active());
        s2.set_active(true);
        assert!(derived.active());
        s2.set_active(false);
        assert!(!derived.active());
        s1.set_active(true);
        s3.set_active(true);
        assert!(derived.active());
        s1.set_active(false);
        assert!(derived.active());
    }

    #[test]
    fn overderivation() {
        let mut arena = SignalArena::default();
        let mut signal = NotifierSignal::idle();
        for i in 0..MAX_DERIVED + 1 {
            arena.bits_used = 32;
            signal = signal + arena.allocate(&format!("s{}", i));
        }
        assert_eq!(signal, NotifierSignal::Overderived);
        assert!(signal.active());
    }

    #[test]
    fn notifier_wake_runs_callbacks_once_per_transition() {
        use std::sync::atomic::AtomicUsize;
        let mut arena = SignalArena::default();
        let mut notifier = Notifier::new(SearchOp::Stop);
        notifier.initialize(arena.allocate("queue.empty"));

        let hits = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&hits);
        notifier.add_activate_callback(Box::new(move || {
            sink.fetch_add(1, Ordering::SeqCst);
        }));

        notifier.wake();
        notifier.wake();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        notifier.sleep();
        notifier.wake();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
