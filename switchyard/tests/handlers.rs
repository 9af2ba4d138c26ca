//! The handler control plane: defaults, round trips, globals, driver
//! control, hot swap.

use switchyard::elements::{Counter, Discard, InfiniteSource, Queue};
use switchyard::handler::HandlerError;
use switchyard::master::Master;
use switchyard::report::{Landmark, SilentErrorHandler};
use switchyard::router::{Router, RunningState, ROOT};

fn pipeline(master: &std::sync::Arc<Master>) -> (Router, usize, usize, usize, usize) {
    let lm = Landmark::new("handlers.sy", 1);
    let mut router = Router::new(master);
    let s = router
        .add_element(Box::new(InfiniteSource::default()), "src", "LIMIT 8", lm.clone())
        .unwrap();
    let c = router
        .add_element(Box::new(Counter::default()), "count", "", lm.clone())
        .unwrap();
    let q = router
        .add_element(Box::new(Queue::default()), "q", "", lm.clone())
        .unwrap();
    let d = router
        .add_element(Box::new(Discard::default()), "sink", "", lm.clone())
        .unwrap();
    router.add_connection(s, 0, c, 0, lm.clone()).unwrap();
    router.add_connection(c, 0, q, 0, lm.clone()).unwrap();
    router.add_connection(q, 0, d, 0, lm).unwrap();
    (router, s, c, q, d)
}

#[test]
fn default_handlers_exist_on_every_element() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, _s, c, ..) = pipeline(&master);
    router.initialize(&mut errh).unwrap();

    assert_eq!(router.call_read(c, "name").unwrap(), "count");
    assert_eq!(router.call_read(c, "class").unwrap(), "Counter");
    assert_eq!(router.call_read(c, "config").unwrap(), "");
    let ports = router.call_read(c, "ports").unwrap();
    assert!(ports.contains("1 input(s): push"));
    assert!(ports.contains("1 output(s): push"));
    let listing = router.call_read(c, "handlers").unwrap();
    assert!(listing.contains("count"));
    assert!(listing.contains("reset_counts"));
}

#[test]
fn hindexes_are_stable_and_missing_handlers_fail() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, _s, c, ..) = pipeline(&master);
    router.initialize(&mut errh).unwrap();

    let h1 = router.hindex(c, "count").unwrap();
    router.call_read(c, "count").unwrap();
    let h2 = router.hindex(c, "count").unwrap();
    assert_eq!(h1, h2);
    assert!(router.handler(h1).unwrap().readable());

    assert!(matches!(
        router.call_read(c, "no-such"),
        Err(HandlerError::NoSuchHandler(_))
    ));
    assert!(matches!(
        router.call_write(c, "name", "x", &mut errh),
        Err(HandlerError::NotWritable(_))
    ));
}

#[test]
fn write_then_read_round_trips() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, _s, c, ..) = pipeline(&master);
    router.initialize(&mut errh).unwrap();

    router.call_write(c, "count", "42", &mut errh).unwrap();
    let value = router.call_read(c, "count").unwrap();
    assert_eq!(value, "42");
    // The read-back value is itself accepted: idempotence after
    // canonicalization.
    router.call_write(c, "count", &value, &mut errh).unwrap();
    assert!(router.call_write(c, "count", "not a number", &mut errh).is_err());
}

#[test]
fn root_handlers_cover_the_router() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, ..) = pipeline(&master);
    router.add_requirement("package", "standard");
    router.initialize(&mut errh).unwrap();

    assert_eq!(router.call_read(ROOT, "nelements").unwrap(), "4");
    let config = router.call_read(ROOT, "config").unwrap();
    assert!(config.contains("src :: InfiniteSource(LIMIT 8);"));
    assert!(config.contains("q [0] -> [0] sink;"));
    assert!(router.call_read(ROOT, "requirements").unwrap().contains("package standard"));

    // The root stop handler drives the runcount to zero.
    assert_eq!(router.runcount(), 1);
    router.call_write(ROOT, "stop", "", &mut errh).unwrap();
    assert_eq!(router.runcount(), 0);
}

#[test]
fn global_handlers_and_driver_stop() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, ..) = pipeline(&master);
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    assert_eq!(master.call_global_read("version").unwrap(), env!("CARGO_PKG_VERSION"));
    assert_eq!(master.call_global_read("nrouters").unwrap(), "1");

    master.call_global_write("stop", "", &mut errh).unwrap();
    assert!(master.stop_requested());
    assert!(master.check_driver());
    assert!(master.done());
    assert_eq!(router.running_state(), RunningState::Dead);
}

#[test]
fn stop_guard_vetoes_the_first_stop() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, ..) = pipeline(&master);
    let vetoes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&vetoes);
    router.set_stop_guard(Box::new(move || {
        // Veto exactly once.
        counter.fetch_add(1, Ordering::SeqCst) == 0
    }));
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    router.please_stop_driver();
    assert!(!master.check_driver());
    assert_eq!(router.runcount(), 1);

    router.please_stop_driver();
    assert!(master.check_driver());
    assert_eq!(router.running_state(), RunningState::Dead);
    assert_eq!(vetoes.load(Ordering::SeqCst), 2);
}

#[test]
fn hotswap_preserves_matching_element_state() {
    let master = Master::new(1);
    let mut errh = SilentErrorHandler::new();
    let (mut router, ..) = pipeline(&master);
    router.initialize(&mut errh).unwrap();
    let old = master.activate_router(router).unwrap();

    // Run the old router to completion.
    let thread = master.thread(0).unwrap();
    for _ in 0..100 {
        thread.step(&master);
    }
    let c_old = old.element_by_name("count").unwrap();
    assert_eq!(old.call_read(c_old, "count").unwrap(), "8");

    // The replacement takes the counter's state across.
    let (mut replacement, ..) = pipeline(&master);
    replacement.initialize(&mut errh).unwrap();
    let new = master.hotswap_router(&old, replacement, &mut errh).unwrap();
    assert_eq!(old.running_state(), RunningState::Dead);
    assert_eq!(new.running_state(), RunningState::Active);

    let c_new = new.element_by_name("count").unwrap();
    assert_eq!(new.call_read(c_new, "count").unwrap(), "8");

    // The new router's source runs its own limit afterward.
    for _ in 0..200 {
        thread.step(&master);
    }
    assert_eq!(new.call_read(c_new, "count").unwrap(), "16");
}
