//! The canonical push-to-pull queue.

use std::any::Any;
use std::collections::VecDeque;

use switchyard_packet::Packet;

use crate::config::args::Args;
use crate::element::{processing, Context, Element, ElementError};
use crate::handler::{flags, HandlerBuilder};
use crate::notifier::{Notifier, NotifierKind, SearchOp};
use crate::report::ErrorHandler;
use crate::router::InitContext;

/// A FIFO packet queue: push input, pull output, bounded capacity.
///
/// The queue is the graph's scheduling boundary. Its empty-notifier is
/// active while it holds packets, so pullers downstream can sleep on an
/// empty queue; its full-notifier is active while it has room, so pushers
/// upstream can apply backpressure. Packets past capacity are dropped.
pub struct Queue {
    deque: VecDeque<Packet>,
    capacity: usize,
    drops: u64,
    highwater: usize,
    empty_note: Notifier,
    full_note: Notifier,
}

impl Default for Queue {
    fn default() -> Self {
        Queue {
            deque: VecDeque::new(),
            capacity: 1000,
            drops: 0,
            highwater: 0,
            empty_note: Notifier::new(SearchOp::Stop),
            full_note: Notifier::new(SearchOp::Stop),
        }
    }
}

impl Queue {
    /// Current queue length.
    pub fn len(&self) -> usize {
        self.deque.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    /// Packets dropped at capacity.
    pub fn drops(&self) -> u64 {
        self.drops
    }
}

impl Element for Queue {
    fn class_name(&self) -> &'static str {
        "Queue"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/1"
    }

    fn processing(&self) -> &'static str {
        processing::PUSH_TO_PULL
    }

    fn configure(&mut self, mut args: Args, _cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        let mut capacity = self.capacity;
        args.read_p("CAPACITY", &mut capacity);
        args.complete()?;
        if capacity == 0 {
            return Err(ElementError::config("capacity must be positive"));
        }
        self.capacity = capacity;
        Ok(())
    }

    fn initialize(&mut self, cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        self.empty_note.initialize(cx.new_notifier_signal("empty"));
        self.full_note.initialize(cx.new_notifier_signal("full"));
        self.empty_note.set_active(!self.deque.is_empty());
        self.full_note.set_active(self.deque.len() < self.capacity);
        Ok(())
    }

    fn push(&mut self, _port: usize, packet: Packet, _cx: &Context<'_>) {
        if self.deque.len() >= self.capacity {
            self.drops += 1;
            return;
        }
        self.deque.push_back(packet);
        self.highwater = self.highwater.max(self.deque.len());
        self.empty_note.wake();
        if self.deque.len() >= self.capacity {
            self.full_note.sleep();
        }
    }

    fn pull(&mut self, _port: usize, _cx: &Context<'_>) -> Option<Packet> {
        let packet = self.deque.pop_front()?;
        if self.deque.is_empty() {
            self.empty_note.sleep();
        }
        self.full_note.wake();
        Some(packet)
    }

    fn port_notifier(&mut self, is_output: bool, _port: usize, kind: NotifierKind) -> Option<&mut Notifier> {
        match kind {
            NotifierKind::Empty if is_output => Some(&mut self.empty_note),
            NotifierKind::Full if !is_output => Some(&mut self.full_note),
            _ => None,
        }
    }

    fn add_handlers(&mut self, reg: &mut HandlerBuilder<'_>) {
        reg.read_with::<Queue>("length", flags::CALM, |q| q.deque.len().to_string());
        reg.read_with::<Queue>("highwater_length", flags::CALM, |q| q.highwater.to_string());
        reg.read_with::<Queue>("drops", flags::CALM, |q| q.drops.to_string());
        reg.read_with::<Queue>("capacity", flags::CALM, |q| q.capacity.to_string());
        reg.write_with::<Queue>("reset_counts", flags::BUTTON, |q, _, _| {
            q.drops = 0;
            q.highwater = q.deque.len();
            Ok(())
        });
    }

    fn take_state(&mut self, old: &mut dyn Element, errh: &mut dyn ErrorHandler) {
        let Some(old) = old.as_any_mut().downcast_mut::<Queue>() else { return };
        while self.deque.len() < self.capacity {
            match old.deque.pop_front() {
                Some(packet) => self.deque.push_back(packet),
                None => break,
            }
        }
        if !old.deque.is_empty() {
            errh.warning(&format!("{} packets lost in hot swap", old.deque.len()));
        }
        self.highwater = self.deque.len();
        self.empty_note.set_active(!self.deque.is_empty());
        self.full_note.set_active(self.deque.len() < self.capacity);
    }

    fn cleanup(&mut self, _stage: crate::element::CleanupStage) {
        self.deque.clear();
    }
}
