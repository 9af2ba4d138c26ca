//! Event types for the runtime's logging streams.
//!
//! Driver threads own a thread-local [`Registry`] and log scheduler events
//! under the name `"tasks"`. A process installs destinations through
//! [`Master::set_logging_hook`]; absent a hook, logging costs nothing.
//!
//! [`Registry`]: switchyard_logging::Registry
//! [`Master::set_logging_hook`]: crate::master::Master::set_logging_hook

use serde::Serialize;

/// Scheduler events, logged per driver thread.
#[derive(Clone, Debug, Serialize)]
pub enum TaskEvent {
    /// A task fired.
    Fired {
        /// The element the task drives, if any.
        eindex: Option<usize>,
        /// Whether the task reported work done.
        work: bool,
    },
    /// The pending queue delivered cross-thread requests.
    Pending {
        /// Entries handled.
        delivered: usize,
    },
    /// The timer wheel advanced.
    Timers {
        /// Timers fired.
        fired: usize,
    },
}

/// Router lifecycle events.
#[derive(Clone, Debug, Serialize)]
pub enum RouterEvent {
    /// A router finished initialization and went live.
    Live {
        /// Number of elements.
        elements: usize,
        /// Number of connections.
        connections: usize,
    },
    /// A router was confirmed stopped.
    Stopped,
}
