//! Actor end-to-end scenarios.
//!
//! Covers ordered delivery, per-producer FIFO, the at-most-one-dispatch
//! invariant, handler-state visibility across worker hand-offs, bounded
//! overflow accounting, and the two-actor ping-pong.
//!
//! Run with: `cargo test --test actor_e2e`

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, OnceLock};
use std::time::Duration;

use strand::{Actor, Executor, PoolStrategy};

fn init_test(name: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
    tracing::info!(test = name, "=== TEST START ===");
}

fn ignore_faults(_fault: strand::Fault) {}

type DynActor<A> = Actor<A, Box<dyn FnMut(A) + Send>, PoolStrategy>;

// ========== Delivery ==========

#[test]
fn test_single_producer_messages_arrive_once_in_order() {
    init_test("test_single_producer_messages_arrive_once_in_order");
    const MESSAGES: u64 = 20_000;

    let pool = Executor::builder()
        .pool_size(2)
        .name("actor-order")
        .build()
        .expect("pool");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done, finished) = mpsc::channel();

    let sink = Arc::clone(&seen);
    let actor = Actor::unbounded(
        PoolStrategy::new(pool.clone()),
        move |n: u64| {
            sink.lock().expect("seen").push(n);
            if n == MESSAGES - 1 {
                done.send(()).expect("signal");
            }
        },
        ignore_faults,
    );

    for n in 0..MESSAGES {
        actor.send(n);
    }
    finished
        .recv_timeout(Duration::from_secs(30))
        .expect("all messages handled");

    let seen = seen.lock().expect("seen");
    assert_eq!(seen.len() as u64, MESSAGES, "exactly once per message");
    assert!(
        seen.windows(2).all(|w| w[0] < w[1]),
        "single-producer order preserved"
    );

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_per_producer_fifo_with_interleaved_senders() {
    init_test("test_per_producer_fifo_with_interleaved_senders");
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u64 = 2_000;
    const TOTAL: u64 = PRODUCERS as u64 * PER_PRODUCER;

    let pool = Executor::builder()
        .pool_size(4)
        .name("actor-fifo")
        .build()
        .expect("pool");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done, finished) = mpsc::channel();

    let sink = Arc::clone(&seen);
    let mut handled = 0u64;
    let actor = Actor::unbounded(
        PoolStrategy::with_batch(pool.clone(), 64),
        move |message: (usize, u64)| {
            sink.lock().expect("seen").push(message);
            handled += 1;
            if handled == TOTAL {
                done.send(()).expect("signal");
            }
        },
        ignore_faults,
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|tag| {
            let actor = actor.clone();
            std::thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    actor.send((tag, seq));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer");
    }
    finished
        .recv_timeout(Duration::from_secs(30))
        .expect("all messages handled");

    let seen = seen.lock().expect("seen");
    let mut last_seq = [None::<u64>; PRODUCERS];
    for &(tag, seq) in seen.iter() {
        assert!(
            last_seq[tag].map_or(true, |prev| prev < seq),
            "producer {tag} interleaved out of order"
        );
        last_seq[tag] = Some(seq);
    }

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

// ========== Serialization ==========

#[test]
fn test_at_most_one_thread_inside_handler() {
    init_test("test_at_most_one_thread_inside_handler");
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u64 = 250;
    const TOTAL: u64 = PRODUCERS as u64 * PER_PRODUCER;

    let pool = Executor::builder()
        .pool_size(4)
        .name("actor-serial")
        .build()
        .expect("pool");
    let inside = Arc::new(AtomicI64::new(0));
    // Recorded as a flag: a panic inside the handler would be caught and
    // forwarded to `on_error`, not fail the test.
    let violated = Arc::new(AtomicUsize::new(0));
    let (done, finished) = mpsc::channel();

    let gauge = Arc::clone(&inside);
    let flag = Arc::clone(&violated);
    let mut handled = 0u64;
    // A tiny batch forces frequent yields, so dispatch hops between workers.
    let actor = Actor::unbounded(
        PoolStrategy::with_batch(pool.clone(), 4),
        move |_: u64| {
            if gauge.fetch_add(1, Ordering::SeqCst) != 0 {
                flag.fetch_add(1, Ordering::SeqCst);
            }
            std::hint::spin_loop();
            gauge.fetch_sub(1, Ordering::SeqCst);
            handled += 1;
            if handled == TOTAL {
                done.send(()).expect("signal");
            }
        },
        ignore_faults,
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let actor = actor.clone();
            std::thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    actor.send(n);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer");
    }
    finished
        .recv_timeout(Duration::from_secs(30))
        .expect("all messages handled");
    assert_eq!(
        violated.load(Ordering::SeqCst),
        0,
        "a second thread entered the handler"
    );

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_handler_state_is_visible_across_worker_handoffs() {
    init_test("test_handler_state_is_visible_across_worker_handoffs");
    const MESSAGES: u64 = 10_000;
    const EXPECTED_SUM: u64 = MESSAGES * (MESSAGES - 1) / 2;

    let pool = Executor::builder()
        .pool_size(4)
        .name("actor-visibility")
        .build()
        .expect("pool");
    let (done, finished) = mpsc::channel();

    // Plain (non-atomic) handler state: every increment must be visible to
    // the next invocation even when the dispatch hops workers, which the
    // batch of 1 makes constant.
    let mut sum = 0u64;
    let mut handled = 0u64;
    let actor = Actor::unbounded(
        PoolStrategy::with_batch(pool.clone(), 1),
        move |n: u64| {
            sum += n;
            handled += 1;
            if handled == MESSAGES {
                done.send(sum).expect("report sum");
            }
        },
        ignore_faults,
    );

    for n in 0..MESSAGES {
        actor.send(n);
    }
    let sum = finished
        .recv_timeout(Duration::from_secs(30))
        .expect("all messages handled");
    assert_eq!(sum, EXPECTED_SUM, "lost handler-state update across hand-off");

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

// ========== Bounded actors ==========

#[test]
fn test_bounded_overflow_counts_are_exact() {
    init_test("test_bounded_overflow_counts_are_exact");
    let pool = Executor::builder()
        .pool_size(1)
        .name("actor-s6")
        .build()
        .expect("pool");

    // Occupy the only worker so the actor's dispatch cannot start and the
    // admission floor stays put while we send.
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    pool.execute(move || {
        started_tx.send(()).expect("announce");
        release_rx.recv().expect("hold");
    })
    .expect("submit blocker");
    started_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("blocker running");

    let handled = Arc::new(AtomicU64::new(0));
    let overflowed = Arc::new(AtomicUsize::new(0));
    let (done, finished) = mpsc::channel();

    let tally = Arc::clone(&handled);
    let spill = Arc::clone(&overflowed);
    let actor = Actor::bounded(
        3,
        PoolStrategy::new(pool.clone()),
        move |_: u32| {
            if tally.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                done.send(()).expect("signal");
            }
        },
        ignore_faults,
        move |_rejected| {
            spill.fetch_add(1, Ordering::SeqCst);
        },
    );

    for n in 0..10u32 {
        actor.send(n);
    }
    assert_eq!(
        overflowed.load(Ordering::SeqCst),
        7,
        "exactly one overflow notification per rejected message"
    );

    release_tx.send(()).expect("release blocker");
    finished
        .recv_timeout(Duration::from_secs(5))
        .expect("admitted messages handled");
    assert_eq!(handled.load(Ordering::SeqCst), 3);

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}

// ========== Ping-pong ==========

#[test]
fn test_ping_pong_between_two_actors() {
    init_test("test_ping_pong_between_two_actors");
    // Scaled-down rendition of the classic 20M-bounce exchange; the full
    // figure lives in the benchmark suite.
    const BOUNCES: u64 = 200_000;

    let pool = Executor::builder()
        .pool_size(2)
        .name("actor-pingpong")
        .build()
        .expect("pool");
    let strategy = PoolStrategy::with_batch(pool.clone(), 256);
    let (done, finished) = mpsc::channel();

    static PONG: OnceLock<DynActor<u64>> = OnceLock::new();

    let reply_done = done.clone();
    let ping: DynActor<u64> = Actor::unbounded(
        strategy.clone(),
        Box::new(move |n: u64| {
            if n == 0 {
                done.send(()).expect("signal");
            } else {
                PONG.get().expect("pong installed").send(n - 1);
            }
        }),
        ignore_faults,
    );

    let back = ping.clone();
    PONG.get_or_init(|| {
        Actor::unbounded(
            strategy,
            Box::new(move |n: u64| {
                if n == 0 {
                    reply_done.send(()).expect("signal");
                } else {
                    back.send(n - 1);
                }
            }),
            ignore_faults,
        )
    });

    ping.send(BOUNCES);
    finished
        .recv_timeout(Duration::from_secs(60))
        .expect("ping-pong must terminate");

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
}
