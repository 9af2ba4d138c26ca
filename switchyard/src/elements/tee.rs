//! A push fan-out.

use std::any::Any;

use switchyard_packet::Packet;

use crate::element::{processing, Context, Element};

/// Copies each pushed packet to every output.
///
/// Outputs 1 and up receive clones; output 0 receives the original, so a
/// single-output Tee forwards without copying.
#[derive(Default)]
pub struct Tee;

impl Element for Tee {
    fn class_name(&self) -> &'static str {
        "Tee"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/1-"
    }

    fn processing(&self) -> &'static str {
        processing::PUSH
    }

    fn push(&mut self, _port: usize, packet: Packet, cx: &Context<'_>) {
        for port in 1..cx.noutputs() {
            cx.push(port, packet.clone());
        }
        cx.push(0, packet);
    }
}
