// Bounded-concurrency batch executor tests.

use castflow::castflow::executor::run_batch;
use castflow::castflow::store::StoreError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_tallies_successes_and_failures() {
    // Items 2 and 6 fail with a non-rate error; the rest succeed.
    let items: Vec<usize> = (0..10).collect();
    let result = run_batch(4, items, |item: usize| async move {
        if item == 2 || item == 6 {
            Err(StoreError::Request {
                message: format!("boom on {}", item),
            })
        } else {
            Ok(vec![item])
        }
    })
    .await;

    assert_eq!(result.succeeded, 8);
    assert_eq!(result.failed, 2);
    assert!(!result.is_complete_success());
    let mut effects = result.side_effects;
    effects.sort();
    assert_eq!(effects, vec![0, 1, 3, 4, 5, 7, 8, 9]);
}

#[tokio::test]
async fn test_transient_errors_still_count_as_failures() {
    let result = run_batch(2, vec![1, 2, 3], |item: i32| async move {
        if item == 2 {
            Err(StoreError::Throttled {
                message: "rate exceeded".to_string(),
            })
        } else {
            Ok(Vec::<i32>::new())
        }
    })
    .await;

    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 1);
}

#[tokio::test]
async fn test_no_item_is_processed_twice() {
    let seen: Arc<Mutex<HashMap<usize, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let items: Vec<usize> = (0..100).collect();

    let seen_clone = seen.clone();
    let result = run_batch(25, items, move |item: usize| {
        let seen = seen_clone.clone();
        async move {
            *seen.lock().unwrap().entry(item).or_insert(0) += 1;
            Ok(Vec::<()>::new())
        }
    })
    .await;

    assert_eq!(result.succeeded, 100);
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 100);
    assert!(seen.values().all(|count| *count == 1));
}

#[tokio::test]
async fn test_concurrency_bounds_outstanding_workers() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let in_flight_clone = in_flight.clone();
    let peak_clone = peak.clone();
    let result = run_batch(3, (0..30).collect::<Vec<i32>>(), move |_item: i32| {
        let in_flight = in_flight_clone.clone();
        let peak = peak_clone.clone();
        async move {
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(Vec::<()>::new())
        }
    })
    .await;

    assert_eq!(result.succeeded, 30);
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_more_workers_than_items_drains_cleanly() {
    let result = run_batch(25, vec![1, 2, 3], |item: i32| async move { Ok(vec![item * 10]) }).await;
    assert_eq!(result.succeeded, 3);
    assert_eq!(result.failed, 0);
    let mut effects = result.side_effects;
    effects.sort();
    assert_eq!(effects, vec![10, 20, 30]);
}

#[tokio::test]
async fn test_empty_queue_resolves_immediately() {
    let result = run_batch(4, Vec::<usize>::new(), |_item: usize| async move {
        Ok(Vec::<()>::new())
    })
    .await;
    assert_eq!(result.succeeded, 0);
    assert_eq!(result.failed, 0);
    assert!(result.is_complete_success());
}
