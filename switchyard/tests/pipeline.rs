//! End-to-end pipeline behavior: push source, queue, pull sink.

use switchyard::element::PortKind;
use switchyard::elements::{Discard, InfiniteSource, Queue};
use switchyard::master::Master;
use switchyard::report::{ErrorHandler, Landmark, SilentErrorHandler};
use switchyard::router::{Router, RouterState, RunningState};

fn landmark(line: u32) -> Landmark {
    Landmark::new("pipeline.sy", line)
}

fn build_pipeline(master: &std::sync::Arc<Master>, source_config: &str) -> (Router, usize, usize, usize) {
    let mut router = Router::new(master);
    let s = router
        .add_element(Box::new(InfiniteSource::default()), "src", source_config, landmark(1))
        .unwrap();
    let q = router
        .add_element(Box::new(Queue::default()), "q", "CAPACITY 10", landmark(2))
        .unwrap();
    let d = router
        .add_element(Box::new(Discard::default()), "sink", "", landmark(3))
        .unwrap();
    router.add_connection(s, 0, q, 0, landmark(4)).unwrap();
    router.add_connection(q, 0, d, 0, landmark(5)).unwrap();
    (router, s, q, d)
}

#[test]
fn ports_resolve_to_push_and_pull() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, s, q, d) = build_pipeline(&master, "LIMIT 5");
    router.initialize(&mut errh).unwrap();

    assert_eq!(router.state(), RouterState::Live);
    assert_eq!(errh.nerrors(), 0);
    // Queue converts push to pull; the agnostic sink resolved to pull.
    assert_eq!(router.output_kind(s, 0), PortKind::Push);
    assert_eq!(router.input_kind(q, 0), PortKind::Push);
    assert_eq!(router.output_kind(q, 0), PortKind::Pull);
    assert_eq!(router.input_kind(d, 0), PortKind::Pull);
}

#[test]
fn n_pushes_cause_n_discard_fires() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, _s, q, d) = build_pipeline(&master, "LIMIT 37, BURST 4");
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    let thread = master.thread(0).unwrap();
    for _ in 0..200 {
        thread.step(&master);
    }

    // Every packet the source produced was pulled through and discarded.
    assert_eq!(router.call_read(d, "count").unwrap(), "37");
    assert_eq!(router.call_read(q, "length").unwrap(), "0");
    assert_eq!(router.call_read(q, "drops").unwrap(), "0");
    assert_eq!(router.running_state(), RunningState::Active);
}

#[test]
fn sink_sleeps_when_idle_and_wakes_on_new_packets() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, s, _q, d) = build_pipeline(&master, "LIMIT 5");
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    let thread = master.thread(0).unwrap();
    for _ in 0..100 {
        thread.step(&master);
    }
    assert_eq!(router.call_read(d, "count").unwrap(), "5");

    // The source hit its limit and the sink slept on the queue's empty
    // signal: nothing remains scheduled.
    assert_eq!(thread.nscheduled(), 0);

    // Raising the limit and reactivating the source wakes everything up.
    router
        .call_write(s, "reset_counts", "", &mut errh)
        .unwrap();
    router.call_write(s, "active", "true", &mut errh).unwrap();
    for _ in 0..100 {
        thread.step(&master);
    }
    assert_eq!(router.call_read(d, "count").unwrap(), "10");
}

#[test]
fn configure_outcomes_are_deterministic() {
    let build = || {
        let master = Master::new(1);
        let mut errh = SilentErrorHandler::new();
        let (mut router, ..) = build_pipeline(&master, "LIMIT 5");
        let result = router.initialize(&mut errh);
        (result.is_ok(), errh.nerrors(), errh.nwarnings(), router.flat_config())
    };
    assert_eq!(build(), build());
}

#[test]
fn queue_backpressure_drops_nothing_when_sink_keeps_up() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    // Burst far above queue capacity: the source must observe the full
    // signal and stall rather than overrun.
    let (mut router, _s, q, d) = build_pipeline(&master, "LIMIT 100, BURST 10");
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    let thread = master.thread(0).unwrap();
    for _ in 0..500 {
        thread.step(&master);
    }
    assert_eq!(router.call_read(d, "count").unwrap(), "100");
    let drops: u64 = router.call_read(q, "drops").unwrap().parse().unwrap();
    let highwater: usize = router.call_read(q, "highwater_length").unwrap().parse().unwrap();
    assert!(highwater <= 10);
    assert_eq!(drops, 0);
}
