//! A packet sink.

use std::any::Any;
use std::sync::Arc;

use switchyard_packet::Packet;

use crate::config::args::Args;
use crate::element::{Context, Element, ElementError};
use crate::handler::{flags, HandlerBuilder};
use crate::notifier::NotifierSignal;
use crate::router::InitContext;
use crate::scheduling::Task;

/// Drops every packet it receives.
///
/// Agnostic: in a push context it is a passive sink; in a pull context it
/// runs a task that pulls from upstream, sleeping on the upstream
/// empty-signal when there is nothing to pull.
pub struct Discard {
    count: u64,
    burst: usize,
    task: Option<Arc<Task>>,
    upstream_signal: NotifierSignal,
}

impl Default for Discard {
    fn default() -> Self {
        Discard {
            count: 0,
            burst: 1,
            task: None,
            upstream_signal: NotifierSignal::default(),
        }
    }
}

impl Discard {
    /// Packets discarded so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Element for Discard {
    fn class_name(&self) -> &'static str {
        "Discard"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "1/0"
    }

    fn configure(&mut self, mut args: Args, _cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        args.read_p("BURST", &mut self.burst);
        args.complete()?;
        if self.burst == 0 {
            self.burst = 1;
        }
        Ok(())
    }

    fn initialize(&mut self, cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        if cx.input_is_pull(0) {
            let task = cx.new_task(true);
            self.upstream_signal = cx.upstream_empty_signal(0, Some(&task));
            self.task = Some(task);
        }
        Ok(())
    }

    fn push(&mut self, _port: usize, packet: Packet, _cx: &Context<'_>) {
        self.count += 1;
        drop(packet);
    }

    fn run_task(&mut self, task: &Task, cx: &Context<'_>) -> bool {
        let mut pulled = 0;
        while pulled < self.burst {
            match cx.pull(0) {
                Some(packet) => {
                    self.count += 1;
                    pulled += 1;
                    drop(packet);
                }
                None => break,
            }
        }
        if pulled > 0 || self.upstream_signal.active() {
            task.fast_reschedule();
        }
        pulled > 0
    }

    fn add_handlers(&mut self, reg: &mut HandlerBuilder<'_>) {
        reg.read_with::<Discard>("count", flags::CALM, |d| d.count.to_string());
        reg.write_with::<Discard>("reset_counts", flags::BUTTON, |d, _, _| {
            d.count = 0;
            Ok(())
        });
    }

    fn take_state(&mut self, old: &mut dyn Element, _errh: &mut dyn crate::report::ErrorHandler) {
        if let Some(old) = old.as_any_mut().downcast_mut::<Discard>() {
            self.count = old.count;
        }
    }
}
