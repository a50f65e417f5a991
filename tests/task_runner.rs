use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rust_data_quality::error::{ComponentError, TaskFailure};
use rust_data_quality::execution::{
    CancellationToken, MultiThreadedTaskRunner, SingleThreadedTaskRunner, TaskRunner, TaskStatus,
};

fn runners() -> Vec<(&'static str, Box<dyn TaskRunner>)> {
    let single: Box<dyn TaskRunner> = Box::new(SingleThreadedTaskRunner::new());
    let multi: Box<dyn TaskRunner> = Box::new(MultiThreadedTaskRunner::new(Some(4), 4).unwrap());
    vec![("single", single), ("multi", multi)]
}

#[test]
fn failures_and_panics_do_not_affect_siblings() {
    for (name, runner) in runners() {
        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..20u64 {
            let ran = Arc::clone(&ran);
            runner.submit(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                match i {
                    3 => Err(TaskFailure::task(Some(i), ComponentError::new("bad row"))),
                    7 => panic!("task {i} panicked"),
                    _ => Ok(()),
                }
            }));
        }

        let summary = runner.await_all();
        assert_eq!(ran.load(Ordering::SeqCst), 20, "{name}");
        assert_eq!(summary.completed, 18, "{name}");
        assert_eq!(summary.failures.len(), 2, "{name}");
        assert!(summary.failures.iter().any(|f| f.row == Some(3)), "{name}");
        assert!(
            summary
                .failures
                .iter()
                .any(|f| f.cause == ComponentError::Panicked("task 7 panicked".into())),
            "{name}"
        );
        assert!(!summary.is_successful());

        // The summary covers only what happened since the previous call.
        assert_eq!(runner.await_all().completed, 0, "{name}");
    }
}

#[test]
fn handles_report_status() {
    for (name, runner) in runners() {
        let ok = runner.submit(Box::new(|| Ok(())));
        let failed = runner.submit(Box::new(|| Err(TaskFailure::task(Some(9), ComponentError::new("x")))));
        let panicked = runner.submit(Box::new(|| panic!("worker down")));
        assert_eq!(ok.wait(), TaskStatus::Completed, "{name}");
        assert_eq!(failed.wait(), TaskStatus::Failed, "{name}");
        assert!(ok.status().is_done());

        assert_eq!(ok.join(), Ok(()), "{name}");
        assert_eq!(
            failed.join(),
            Err(TaskFailure::task(Some(9), ComponentError::new("x"))),
            "{name}"
        );
        assert_eq!(
            panicked.join().unwrap_err().cause,
            ComponentError::Panicked("worker down".into()),
            "{name}"
        );
        assert_eq!(runner.await_all().failures.len(), 2, "{name}");
    }
}

#[test]
fn single_threaded_runs_in_submission_order() {
    let runner = SingleThreadedTaskRunner::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let order = Arc::clone(&order);
        runner.submit(Box::new(move || {
            order.lock().unwrap().push(i);
            Ok(())
        }));
    }
    assert!(runner.await_all().is_successful());
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn in_flight_limit_bounds_concurrency() {
    let runner = MultiThreadedTaskRunner::new(Some(4), 1).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        runner.submit(Box::new(move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }));
    }
    let summary = runner.await_all();
    assert_eq!(summary.completed, 10);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert!(summary.throttle_wait > Duration::ZERO);
}

#[test]
fn cancellation_discards_queued_tasks() {
    let token = CancellationToken::new();
    let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap());
    let runner = MultiThreadedTaskRunner::with_pool(pool, 8, token.clone()).unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = runner.submit(Box::new(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        Ok(())
    }));
    started_rx.recv().unwrap();

    let queued: Vec<_> = (0..3).map(|_| runner.submit(Box::new(|| Ok(())))).collect();
    runner.cancel();
    assert!(token.is_cancelled());
    release_tx.send(()).unwrap();

    let late = runner.submit(Box::new(|| Ok(())));
    assert_eq!(late.status(), TaskStatus::Discarded);

    let summary = runner.await_all();
    assert_eq!(blocker.status(), TaskStatus::Completed);
    assert!(queued.iter().all(|h| h.status() == TaskStatus::Discarded));
    assert_eq!(late.join().unwrap_err().cause, ComponentError::Discarded);
    assert_eq!(blocker.join(), Ok(()));
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.discarded, 4);
    assert!(!summary.is_successful());
}

#[test]
fn zero_in_flight_limit_is_rejected() {
    assert!(MultiThreadedTaskRunner::new(Some(2), 0).is_err());
    assert!(MultiThreadedTaskRunner::new(Some(0), 2).is_err());
}
