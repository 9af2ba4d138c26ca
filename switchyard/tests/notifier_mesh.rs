//! Derived activity signals assembled over graph walks.

use std::any::Any;
use std::sync::Arc;

use switchyard::element::{processing, Context, Element, ElementError};
use switchyard::elements::Queue;
use switchyard::master::Master;
use switchyard::notifier::NotifierSignal;
use switchyard::packet::Packet;
use switchyard::report::{Landmark, SilentErrorHandler};
use switchyard::router::{InitContext, Router};

/// Pull fan-in: pulls from its inputs round-robin.
struct Mux {
    next: usize,
}

impl Element for Mux {
    fn class_name(&self) -> &'static str {
        "Mux"
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn port_count(&self) -> &'static str {
        "1-/1"
    }
    fn processing(&self) -> &'static str {
        processing::PULL
    }
    fn pull(&mut self, _port: usize, cx: &Context<'_>) -> Option<Packet> {
        let n = cx.ninputs();
        for _ in 0..n {
            let port = self.next;
            self.next = (self.next + 1) % n;
            if let Some(packet) = cx.pull(port) {
                return Some(packet);
            }
        }
        None
    }
}

/// Pull sink that derives its upstream-empty signal at initialize.
#[derive(Default)]
struct SignalSink {
    signal: NotifierSignal,
}

impl Element for SignalSink {
    fn class_name(&self) -> &'static str {
        "SignalSink"
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
    fn port_count(&self) -> &'static str {
        "1/0"
    }
    fn processing(&self) -> &'static str {
        processing::PULL
    }
    fn initialize(&mut self, cx: &mut InitContext<'_>) -> Result<(), ElementError> {
        self.signal = cx.upstream_empty_signal(0, None);
        Ok(())
    }
}

fn queue_push(router: &Router, queue: usize) {
    let packet = Packet::new(10).unwrap();
    let cx = Context::new(router, queue);
    router.with_element(queue, |el| el.push(0, packet, &cx));
}

fn queue_pull(router: &Router, queue: usize) -> Option<Packet> {
    let cx = Context::new(router, queue);
    router.with_element(queue, |el| el.pull(0, &cx))
}

/// Builds `q1,q2,q3 -> mux -> sink` with push stubs feeding the queues.
fn build(master: &Arc<Master>) -> (Router, Vec<usize>, usize) {
    struct Stub;
    impl Element for Stub {
        fn class_name(&self) -> &'static str {
            "Stub"
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
    }

    let lm = Landmark::new("mesh.sy", 1);
    let mut router = Router::new(master);
    let mut queues = Vec::new();
    for i in 0..3 {
        let stub = router
            .add_element(Box::new(Stub), &format!("stub{}", i), "", lm.clone())
            .unwrap();
        let q = router
            .add_element(Box::new(Queue::default()), &format!("q{}", i), "CAPACITY 4", lm.clone())
            .unwrap();
        router.add_connection(stub, 0, q, 0, lm.clone()).unwrap();
        queues.push(q);
    }
    let mux = router
        .add_element(Box::new(Mux { next: 0 }), "mux", "", lm.clone())
        .unwrap();
    let sink = router
        .add_element(Box::new(SignalSink::default()), "sink", "", lm.clone())
        .unwrap();
    for (port, &q) in queues.iter().enumerate() {
        router.add_connection(q, 0, mux, port, lm.clone()).unwrap();
    }
    router.add_connection(mux, 0, sink, 0, lm).unwrap();
    (router, queues, sink)
}

fn sink_signal(router: &Router, sink: usize) -> NotifierSignal {
    router.with_element(sink, |el| {
        el.as_any_mut().downcast_mut::<SignalSink>().unwrap().signal.clone()
    })
}

#[test]
fn derived_signal_unions_all_upstream_queues() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, queues, sink) = build(&master);
    router.initialize(&mut errh).unwrap();

    let signal = sink_signal(&router, sink);
    // All queues empty: inactive.
    assert!(!signal.active());

    // Any one queue filling activates the derived signal.
    queue_push(&router, queues[1]);
    assert!(signal.active());
    queue_pull(&router, queues[1]).unwrap();
    assert!(!signal.active());

    queue_push(&router, queues[0]);
    queue_push(&router, queues[2]);
    assert!(signal.active());
    queue_pull(&router, queues[0]).unwrap();
    assert!(signal.active(), "q2 still holds a packet");
    queue_pull(&router, queues[2]).unwrap();
    assert!(!signal.active());
}

#[test]
fn walks_without_notifiers_yield_busy() {
    // A sink pulling straight from a pull source finds no notifier and must
    // never sleep.
    struct PullStub;
    impl Element for PullStub {
        fn class_name(&self) -> &'static str {
            "PullStub"
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
        fn port_count(&self) -> &'static str {
            "0/1"
        }
        fn processing(&self) -> &'static str {
            processing::PULL
        }
    }

    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let lm = Landmark::new("mesh.sy", 1);
    let mut router = Router::new(&master);
    let src = router.add_element(Box::new(PullStub), "src", "", lm.clone()).unwrap();
    let sink = router
        .add_element(Box::new(SignalSink::default()), "sink", "", lm.clone())
        .unwrap();
    router.add_connection(src, 0, sink, 0, lm).unwrap();
    router.initialize(&mut errh).unwrap();

    let signal = sink_signal(&router, sink);
    assert_eq!(signal, NotifierSignal::busy());
}

#[test]
fn wake_reschedules_listeners_before_observable_idle() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use switchyard::scheduling::Task;

    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, queues, _sink) = build(&master);
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    // Register a fresh listener on q0's empty notifier.
    let fired = Arc::new(AtomicUsize::new(0));
    let sink_counter = Arc::clone(&fired);
    let listener = Task::for_callback(0, move |_| {
        sink_counter.fetch_add(1, Ordering::SeqCst);
        true
    });
    master.bind_task(&listener);
    router.with_element(queues[0], |el| {
        let notifier = el
            .port_notifier(true, 0, switchyard::notifier::NotifierKind::Empty)
            .unwrap();
        notifier.add_listener(Arc::clone(&listener));
    });

    // A push from another thread wakes the listener through its home
    // thread's pending queue.
    let handle = {
        let router = Arc::clone(&router);
        let q0 = queues[0];
        std::thread::spawn(move || queue_push(&router, q0))
    };
    handle.join().unwrap();

    assert!(listener.is_scheduled());
    let thread = master.thread(0).unwrap();
    thread.step(&master);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}
