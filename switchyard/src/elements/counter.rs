//! A pass-through packet and byte counter.

use std::any::Any;

use switchyard_packet::Packet;

use crate::element::{Context, Element};
use crate::handler::{flags, HandlerBuilder, HandlerError};

/// Counts packets and bytes flowing through, agnostically.
#[derive(Default)]
pub struct Counter {
    count: u64,
    byte_count: u64,
}

impl Counter {
    /// Packets seen so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Bytes seen so far.
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }
}

impl Element for Counter {
    fn class_name(&self) -> &'static str {
        "Counter"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/1"
    }

    fn push(&mut self, _port: usize, packet: Packet, cx: &Context<'_>) {
        self.count += 1;
        self.byte_count += packet.len() as u64;
        cx.push(0, packet);
    }

    fn pull(&mut self, _port: usize, cx: &Context<'_>) -> Option<Packet> {
        let packet = cx.pull(0)?;
        self.count += 1;
        self.byte_count += packet.len() as u64;
        Some(packet)
    }

    fn add_handlers(&mut self, reg: &mut HandlerBuilder<'_>) {
        // count is read/write; the write canonicalizes through a u64 parse.
        reg.set_handler(
            "count",
            flags::CALM,
            |el, _| {
                let c = el.as_any_mut().downcast_ref::<Counter>().expect("Counter");
                c.count.to_string()
            },
            |value, el, _, _| {
                let c = el.as_any_mut().downcast_mut::<Counter>().expect("Counter");
                c.count = value
                    .trim()
                    .parse()
                    .map_err(|_| HandlerError::rejected("expected packet count"))?;
                Ok(())
            },
        );
        reg.read_with::<Counter>("byte_count", flags::CALM, |c| c.byte_count.to_string());
        reg.write_with::<Counter>("reset_counts", flags::BUTTON, |c, _, _| {
            c.count = 0;
            c.byte_count = 0;
            Ok(())
        });
    }

    fn take_state(&mut self, old: &mut dyn Element, _errh: &mut dyn crate::report::ErrorHandler) {
        if let Some(old) = old.as_any_mut().downcast_mut::<Counter>() {
            self.count = old.count;
            self.byte_count = old.byte_count;
        }
    }
}
