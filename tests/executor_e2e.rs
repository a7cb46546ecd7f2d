//! Executor end-to-end scenarios.
//!
//! Covers the submission path, fault isolation, the shutdown state machine,
//! the `shutdown_now` drain contract, and self-shutdown from inside a task.
//!
//! Run with: `cargo test --test executor_e2e`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use strand::{ExecuteError, Executor};

fn init_test(name: &str) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
    tracing::info!(test = name, "=== TEST START ===");
}

// ========== Submission ==========

#[test]
fn test_async_execute_completes_within_timeout() {
    init_test("test_async_execute_completes_within_timeout");
    let pool = Executor::builder()
        .pool_size(2)
        .name("e2e-s1")
        .build()
        .expect("pool");

    let (done, finished) = mpsc::channel();
    pool.execute(move || done.send(()).expect("signal completion"))
        .expect("submit");

    assert!(
        finished.recv_timeout(Duration::from_secs(2)).is_ok(),
        "submitted task must run"
    );
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(2)));
}

#[test]
fn test_per_producer_fifo_across_many_producers() {
    init_test("test_per_producer_fifo_across_many_producers");
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 500;

    let pool = Executor::builder()
        .pool_size(4)
        .name("e2e-fifo")
        .build()
        .expect("pool");
    let log = Arc::new(Mutex::new(Vec::new()));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|tag| {
            let pool = pool.clone();
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    let log = Arc::clone(&log);
                    pool.execute(move || log.lock().expect("log").push((tag, seq)))
                        .expect("submit");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("producer thread");
    }

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(10)));

    let log = log.lock().expect("log");
    assert_eq!(log.len(), PRODUCERS * PER_PRODUCER, "no loss, no duplication");
    let mut last_seq = [None::<usize>; PRODUCERS];
    for &(tag, seq) in log.iter() {
        assert!(
            last_seq[tag].map_or(true, |prev| prev < seq),
            "producer {tag} ran out of order: {seq} after {:?}",
            last_seq[tag]
        );
        last_seq[tag] = Some(seq);
    }
}

// ========== Fault isolation ==========

#[test]
fn test_task_fault_reaches_handler_and_pool_survives() {
    init_test("test_task_fault_reaches_handler_and_pool_survives");
    let (faults_tx, faults_rx) = mpsc::channel();
    let pool = Executor::builder()
        .pool_size(1)
        .name("e2e-s2")
        .on_error(move |fault| faults_tx.send(fault.message().to_string()).expect("report"))
        .build()
        .expect("pool");

    pool.execute(|| panic!("task exploded")).expect("submit");
    let message = faults_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("fault must reach the handler");
    assert_eq!(message, "task exploded");

    // The worker survived the fault and keeps executing.
    let (done, finished) = mpsc::channel();
    pool.execute(move || done.send(()).expect("signal")).expect("submit");
    assert!(finished.recv_timeout(Duration::from_secs(2)).is_ok());

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(2)));
}

// ========== Shutdown ==========

#[test]
fn test_shutdown_now_drains_pending_in_submission_order() {
    init_test("test_shutdown_now_drains_pending_in_submission_order");
    let pool = Executor::builder()
        .pool_size(1)
        .name("e2e-s3")
        .build()
        .expect("pool");

    // Occupy the only worker so the next submissions stay queued.
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    pool.execute(move || {
        started_tx.send(()).expect("announce");
        release_rx.recv().expect("hold until released");
    })
    .expect("submit blocker");
    started_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("blocker must start");

    let ran = Arc::new(Mutex::new(Vec::new()));
    for tag in [1, 2] {
        let ran = Arc::clone(&ran);
        pool.execute(move || ran.lock().expect("ran").push(tag))
            .expect("submit");
    }

    let drained = pool.shutdown_now();
    assert_eq!(drained.len(), 2, "both queued tasks must be returned");
    release_tx.send(()).expect("release blocker");
    assert!(pool.await_termination(Duration::from_secs(2)));

    // The drained tasks never ran; running them now shows submission order.
    assert!(ran.lock().expect("ran").is_empty());
    for task in drained {
        task();
    }
    assert_eq!(*ran.lock().expect("ran"), vec![1, 2]);
}

#[test]
fn test_shutdown_now_from_inside_a_task() {
    init_test("test_shutdown_now_from_inside_a_task");
    let pool = Executor::builder()
        .pool_size(2)
        .name("e2e-s4")
        .build()
        .expect("pool");

    let (verdict_tx, verdict_rx) = mpsc::channel();
    let inner = pool.clone();
    pool.execute(move || {
        let drained = inner.shutdown_now();
        // A worker awaiting its own pool counts itself down first, so this
        // must not self-deadlock.
        let terminated = inner.await_termination(Duration::from_secs(5));
        verdict_tx
            .send((drained.len(), terminated))
            .expect("report");
    })
    .expect("submit");

    let (drained, terminated_inside) = verdict_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("task must complete");
    assert_eq!(drained, 0);
    assert!(terminated_inside, "await_termination from a worker");

    assert!(pool.await_termination(Duration::from_secs(5)));
    assert!(pool.is_terminated());
}

#[test]
fn test_shutdown_is_monotonic_forever() {
    init_test("test_shutdown_is_monotonic_forever");
    let pool = Executor::builder()
        .pool_size(1)
        .name("e2e-monotonic")
        .build()
        .expect("pool");

    pool.shutdown();
    assert!(pool.is_shutdown());
    pool.shutdown_now();
    pool.shutdown();
    assert!(pool.is_shutdown());
    assert!(pool.await_termination(Duration::from_secs(2)));
    assert!(pool.is_terminated());
    pool.shutdown_now();
    assert!(pool.is_shutdown() && pool.is_terminated());
}

#[test]
fn test_rejection_routes_task_to_handler() {
    init_test("test_rejection_routes_task_to_handler");
    let rejected = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&rejected);
    let pool = Executor::builder()
        .pool_size(1)
        .name("e2e-reject")
        .on_reject(move |_task| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("pool");

    pool.shutdown();
    let err = pool.execute(|| {}).expect_err("must reject");
    assert!(matches!(err, ExecuteError::Rejected { .. }));
    assert_eq!(rejected.load(Ordering::SeqCst), 1);
    assert!(pool.await_termination(Duration::from_secs(2)));
}

#[test]
fn test_shutdown_of_parked_workers_emits_no_faults() {
    init_test("test_shutdown_of_parked_workers_emits_no_faults");
    let faults = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&faults);
    let pool = Executor::builder()
        .pool_size(4)
        .name("e2e-parked")
        .on_error(move |_fault| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .expect("pool");

    // Let the workers reach the parked state, then stop the pool: the
    // internal wake-up must never surface as a user-visible fault.
    std::thread::sleep(Duration::from_millis(50));
    pool.shutdown_now();
    assert!(pool.await_termination(Duration::from_secs(2)));
    assert_eq!(faults.load(Ordering::SeqCst), 0);
}
