//! A minimal standard element library.
//!
//! Enough to build and exercise real pipelines: a packet source, the
//! canonical queue with empty/full notifiers, a discarding sink, a counter,
//! a push fan-out, and the address-defining information element. Everything
//! else (classification, protocol handling, device I/O) belongs in
//! element packages outside the core.

mod address_info;
mod counter;
mod discard;
mod infinite_source;
mod queue;
mod tee;

pub use address_info::AddressInfo;
pub use counter::Counter;
pub use discard::Discard;
pub use infinite_source::InfiniteSource;
pub use queue::Queue;
pub use tee::Tee;

use crate::config::ElementRegistry;

/// A registry of the standard element classes.
pub fn standard_registry() -> ElementRegistry {
    let mut registry = ElementRegistry::new();
    registry.register_default::<AddressInfo>("AddressInfo");
    registry.register_default::<Counter>("Counter");
    registry.register_default::<Discard>("Discard");
    registry.register_default::<InfiniteSource>("InfiniteSource");
    registry.register_default::<Queue>("Queue");
    registry.register_default::<Tee>("Tee");
    registry
}
