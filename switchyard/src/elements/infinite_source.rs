//! A task-driven packet source.

use std::any::Any;
use std::sync::Arc;

use switchyard_packet::Packet;

use crate::config::args::Args;
use crate::element::{processing, Context, Element, ElementError};
use crate::handler::{flags, HandlerBuilder, HandlerError};
use crate::notifier::NotifierSignal;
use crate::router::InitContext;
use crate::scheduling::Task;

/// Pushes generated packets downstream from a scheduled task.
///
/// Emits up to `BURST` packets per firing until `LIMIT` packets have been
/// produced (`-1` for no limit). Honors downstream backpressure through the
/// full-signal: when every queue downstream is full, the source sleeps and
/// the queues wake it as they drain. With `STOP true`, reaching the limit
/// asks the driver to stop.
pub struct InfiniteSource {
    data: Vec<u8>,
    limit: i64,
    burst: usize,
    active: bool,
    stop: bool,
    count: u64,
    task: Option<Arc<Task>>,
    full_signal: NotifierSignal,
}

impl Default for InfiniteSource {
    fn default() -> Self {
        InfiniteSource {
            data: vec![0; 64],
            limit: -1,
            burst: 1,
            active: true,
            stop: false,
            count: 0,
            task: None,
            full_signal: NotifierSignal::default(),
        }
    }
}

impl InfiniteSource {
    /// Packets emitted so far.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Element for InfiniteSource {
    fn class_name(&self) -> &'static str {
        "InfiniteSource"
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn port_count(&self) -> &'static str {
        "0/1"
    }

    fn processing(&self) -> &'static str {
        processing::PUSH
    }

    fn configure(&mut self, mut args: Args, _cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        let mut data = String::new();
        args.read_p("DATA", &mut data)
            .read_p("LIMIT", &mut self.limit)
            .read_p("BURST", &mut self.burst)
            .read("ACTIVE", &mut self.active)
            .read("STOP", &mut self.stop);
        args.complete()?;
        if !data.is_empty() {
            self.data = data.into_bytes();
        }
        if self.burst == 0 {
            self.burst = 1;
        }
        Ok(())
    }

    fn initialize(&mut self, cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        let task = cx.new_task(self.active);
        self.full_signal = cx.downstream_full_signal(0, Some(&task));
        self.task = Some(task);
        Ok(())
    }

    fn run_task(&mut self, task: &Task, cx: &Context<'_>) -> bool {
        if !self.active {
            return false;
        }
        let remaining = if self.limit < 0 {
            self.burst as u64
        } else {
            (self.limit as u64).saturating_sub(self.count)
        };
        let mut sent = 0;
        while sent < remaining.min(self.burst as u64) {
            // Re-checked per packet: the downstream queue may fill mid-burst.
            if !self.full_signal.active() {
                break;
            }
            let Some(packet) = Packet::from_data(&self.data) else { break };
            self.count += 1;
            sent += 1;
            cx.push(0, packet);
        }
        if self.limit >= 0 && self.count >= self.limit as u64 {
            self.active = false;
            if self.stop {
                cx.adjust_runcount(-1);
            }
        } else if self.full_signal.active() {
            task.fast_reschedule();
        }
        // Blocked on a full downstream: the queues wake us as they drain.
        sent > 0
    }

    fn add_handlers(&mut self, reg: &mut HandlerBuilder<'_>) {
        reg.read_with::<InfiniteSource>("count", flags::CALM, |s| s.count.to_string());
        reg.read_with::<InfiniteSource>("limit", flags::CALM, |s| s.limit.to_string());
        reg.set_handler(
            "active",
            flags::CHECKBOX,
            |el, _| {
                let s = el.as_any_mut().downcast_ref::<InfiniteSource>().expect("InfiniteSource");
                s.active.to_string()
            },
            |value, el, _, _| {
                let s = el.as_any_mut().downcast_mut::<InfiniteSource>().expect("InfiniteSource");
                let active: bool = value
                    .trim()
                    .parse()
                    .map_err(|_| HandlerError::rejected("expected boolean"))?;
                s.active = active;
                if active {
                    if let Some(task) = &s.task {
                        task.reschedule();
                    }
                }
                Ok(())
            },
        );
        reg.write_with::<InfiniteSource>("reset_counts", flags::BUTTON, |s, _, _| {
            s.count = 0;
            Ok(())
        });
    }
}
