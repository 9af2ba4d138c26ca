//! Scheduler behavior: stride fairness, migration, pending delivery,
//! timers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use switchyard::master::Master;
use switchyard::scheduling::Task;

fn counting_task(master: &Arc<Master>, home: i32, counter: Arc<AtomicUsize>) -> Arc<Task> {
    let task = Task::for_callback(home, move |task| {
        counter.fetch_add(1, Ordering::Relaxed);
        task.fast_reschedule();
        true
    });
    master.bind_task(&task);
    task
}

#[test]
fn stride_fairness_follows_tickets() {
    let master = Master::new(1);
    let thread = master.thread(0).unwrap();

    let counters: Vec<Arc<AtomicUsize>> = (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let tasks: Vec<Arc<Task>> = counters
        .iter()
        .map(|c| counting_task(&master, 0, Arc::clone(c)))
        .collect();
    for (task, tickets) in tasks.iter().zip([16u32, 32, 64]) {
        task.set_tickets(tickets);
        task.reschedule();
    }

    // Move the pending deposits onto the heap, then measure a clean window.
    thread.step(&master);
    for counter in &counters {
        counter.store(0, Ordering::Relaxed);
    }
    let fired = thread.run_tasks(&master, 7000);
    assert_eq!(fired, 7000);

    let counts: Vec<usize> = counters.iter().map(|c| c.load(Ordering::Relaxed)).collect();
    assert!((counts[0] as i64 - 1000).abs() <= 10, "counts = {:?}", counts);
    assert!((counts[1] as i64 - 2000).abs() <= 10, "counts = {:?}", counts);
    assert!((counts[2] as i64 - 4000).abs() <= 10, "counts = {:?}", counts);
}

#[test]
fn no_work_tasks_defer_to_runnable_ones() {
    let master = Master::new(1);
    let thread = master.thread(0).unwrap();

    let busy = Arc::new(AtomicUsize::new(0));
    let lazy = Arc::new(AtomicUsize::new(0));
    let busy_task = counting_task(&master, 0, Arc::clone(&busy));
    let lazy_counter = Arc::clone(&lazy);
    let lazy_task = Task::for_callback(0, move |task| {
        lazy_counter.fetch_add(1, Ordering::Relaxed);
        task.fast_reschedule();
        false
    });
    master.bind_task(&lazy_task);
    busy_task.reschedule();
    lazy_task.reschedule();

    thread.step(&master);
    busy.store(0, Ordering::Relaxed);
    lazy.store(0, Ordering::Relaxed);
    thread.run_tasks(&master, 1000);
    // Equal tickets, but the idle task's pass is bumped each round; it must
    // not out-fire the busy one.
    assert!(lazy.load(Ordering::Relaxed) <= busy.load(Ordering::Relaxed) + 1);
    assert!(busy.load(Ordering::Relaxed) >= 499);
}

#[test]
fn unschedule_drops_the_task_from_the_burst() {
    let master = Master::new(1);
    let thread = master.thread(0).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&master, 0, Arc::clone(&counter));
    task.reschedule();
    thread.step(&master);
    let after_first = counter.load(Ordering::Relaxed);
    assert!(after_first > 0);

    task.unschedule();
    thread.step(&master);
    assert_eq!(counter.load(Ordering::Relaxed), after_first);

    task.reschedule();
    thread.step(&master);
    assert!(counter.load(Ordering::Relaxed) > after_first);
}

#[test]
fn strong_unschedule_defeats_reschedule_until_cleared() {
    let master = Master::new(1);
    let thread = master.thread(0).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&master, 0, Arc::clone(&counter));
    task.strong_unschedule();
    task.reschedule();
    thread.step(&master);
    assert_eq!(counter.load(Ordering::Relaxed), 0);

    task.strong_reschedule();
    thread.step(&master);
    assert!(counter.load(Ordering::Relaxed) > 0);
}

#[test]
fn migration_moves_the_task_exactly_once() {
    let master = Master::new(2);
    let thread0 = master.thread(0).unwrap();
    let thread1 = master.thread(1).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&master, 0, Arc::clone(&counter));
    task.reschedule();
    thread0.step(&master);
    assert!(thread0.hosts(&task));

    task.move_thread(1);
    assert_eq!(task.home_thread_id(), 1);

    // The old home releases its entry and forwards; the new home inserts.
    thread0.step(&master);
    thread1.step(&master);
    assert!(thread1.hosts(&task));
    assert_eq!(thread1.nscheduled(), 1);
    assert_eq!(thread0.nscheduled(), 0);

    // The task never fires on thread 0 again.
    let before = counter.load(Ordering::Relaxed);
    thread0.step(&master);
    assert_eq!(counter.load(Ordering::Relaxed), before);
    thread1.step(&master);
    assert!(counter.load(Ordering::Relaxed) > before);
}

#[test]
fn repeated_reschedules_deliver_one_heap_entry() {
    let master = Master::new(1);
    let thread = master.thread(0).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&master, 0, Arc::clone(&counter));
    for _ in 0..10 {
        task.reschedule();
    }
    thread.step(&master);
    assert_eq!(thread.nscheduled(), 1);
}

#[test]
fn cross_thread_wakes_reach_a_parked_driver() {
    let master = Master::new(1);
    let counter = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&counter);
    let task = Task::for_callback(0, move |_| {
        // One-shot: do not reschedule.
        sink.fetch_add(1, Ordering::Relaxed);
        true
    });
    master.bind_task(&task);

    let guards = {
        let master = Arc::clone(&master);
        let task = Arc::clone(&task);
        std::thread::spawn(move || {
            // Wake the driver from outside.
            std::thread::sleep(std::time::Duration::from_millis(20));
            task.reschedule();
            std::thread::sleep(std::time::Duration::from_millis(50));
            master.please_stop_driver();
        })
    };
    master.run();
    guards.join().unwrap();
    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

#[test]
fn timers_fire_in_order_and_reschedule() {
    use std::time::Duration;

    let master = Master::new(1);
    let thread = master.thread(0).unwrap();

    // An element whose timer re-arms itself a bounded number of times.
    use std::any::Any;
    use switchyard::element::{Context, Element, ElementError};
    use switchyard::router::InitContext;
    use switchyard::scheduling::Timer;

    #[derive(Default)]
    struct Tick {
        timer: Option<Timer>,
        ticks: usize,
    }
    impl Element for Tick {
        fn class_name(&self) -> &'static str {
            "Tick"
        }
        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
        fn initialize(&mut self, cx: &mut InitContext<'_>) -> Result<(), ElementError> {
            self.timer = Some(cx.new_timer());
            Ok(())
        }
        fn run_timer(&mut self, timer: &Timer, _cx: &Context<'_>) {
            self.ticks += 1;
            if self.ticks < 3 {
                timer.schedule_after(Duration::ZERO);
            }
        }
    }

    use switchyard::report::{Landmark, SilentErrorHandler};
    use switchyard::router::Router;

    let mut errh = SilentErrorHandler::new();
    let mut router = Router::new(&master);
    let t = router
        .add_element(Box::new(Tick::default()), "tick", "", Landmark::new("timer.sy", 1))
        .unwrap();
    router.initialize(&mut errh).unwrap();
    let router = master.activate_router(router).unwrap();

    router.with_element(t, |el| {
        let tick = el.as_any_mut().downcast_mut::<Tick>().unwrap();
        tick.timer.as_ref().unwrap().schedule_after(Duration::ZERO);
    });

    for _ in 0..5 {
        thread.run_timers();
    }
    let ticks = router.with_element(t, |el| el.as_any_mut().downcast_mut::<Tick>().unwrap().ticks);
    assert_eq!(ticks, 3);
}
