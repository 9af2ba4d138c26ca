//! Switchyard is a runtime for building packet processors (routers,
//! firewalls, shapers) by composing small **elements** into a directed
//! graph.
//!
//! The crate is organized so its subsystems depend on each other as little
//! as possible:
//!
//! **Elements** ([`element`]) are polymorphic processing nodes with typed
//! ports; connections pair a push output with a push input or a pull output
//! with a pull input, and agnostic ports take their direction from their
//! peers.
//!
//! **Routers** ([`router`]) own an element graph and its lifecycle: the
//! construction API ingests a topology, then port counts, push/pull
//! discipline, and connection legality are validated before elements are
//! configured and initialized.
//!
//! **Scheduling** ([`scheduling`]) drives the graph: per-thread driver loops
//! fire stride-scheduled tasks from 4-ary pass heaps, with a pending queue
//! for cross-thread scheduling and migration.
//!
//! **Notifiers** ([`notifier`]) let idle branches sleep precisely: activity
//! signals derived over graph walks wake a sleeping task the moment an
//! upstream queue fills or a downstream queue drains.
//!
//! **Handlers** ([`handler`]) are the uniform control plane: named read and
//! write endpoints on every element, plus global handlers on the
//! [`master`].
//!
//! # Examples
//!
//! A source feeding a queue drained by a sink, driven to completion:
//!
//! ```
//! use switchyard::elements::{Discard, InfiniteSource, Queue};
//! use switchyard::master::Master;
//! use switchyard::report::{Landmark, SilentErrorHandler};
//! use switchyard::router::Router;
//!
//! let master = Master::new(1);
//! let mut errh = SilentErrorHandler::new();
//! let lm = Landmark::new("example.sy", 1);
//!
//! let mut router = Router::new(&master);
//! let s = router
//!     .add_element(Box::new(InfiniteSource::default()), "src", "LIMIT 5", lm.clone())
//!     .unwrap();
//! let q = router
//!     .add_element(Box::new(Queue::default()), "q", "CAPACITY 10", lm.clone())
//!     .unwrap();
//! let d = router
//!     .add_element(Box::new(Discard::default()), "sink", "", lm.clone())
//!     .unwrap();
//! router.add_connection(s, 0, q, 0, lm.clone()).unwrap();
//! router.add_connection(q, 0, d, 0, lm).unwrap();
//!
//! router.initialize(&mut errh).unwrap();
//! let router = master.activate_router(router).unwrap();
//!
//! let thread = master.thread(0).unwrap();
//! for _ in 0..100 {
//!     thread.step(&master);
//! }
//! assert_eq!(router.call_read(d, "count").unwrap(), "5");
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod element;
pub mod elements;
pub mod flow;
pub mod handler;
pub mod logging;
pub mod master;
pub mod nameinfo;
pub mod notifier;
pub mod report;
pub mod router;
pub mod scheduling;
pub mod sync;

/// Re-export of the `switchyard_packet` crate.
pub mod packet {
    pub use switchyard_packet::*;
}

/// Re-export of the `switchyard_logging` crate.
pub mod logging_core {
    pub use switchyard_logging::*;
}

pub use element::{Context, Element};
pub use master::Master;
pub use notifier::{Notifier, NotifierSignal};
pub use packet::Packet;
pub use router::Router;
pub use scheduling::{RouterThread, Task, Timer};
