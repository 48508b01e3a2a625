use dynemb_store::{
    ExecutorConfig, ParallelExecutor, ShardedConcurrentMap, StoreConfig, StoreError, Task,
    TaskOutcome,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

#[test]
fn test_aggregate_reports_single_failure() {
    let executor = ParallelExecutor::new(&ExecutorConfig::with_workers(3)).unwrap();
    let result = executor.run((0..5).map(|i| {
        move || {
            if i == 3 {
                Err(format!("task {i} rejected its input"))
            } else {
                Ok(i * i)
            }
        }
    }));

    assert_eq!(result.len(), 5);
    assert!(!result.is_success());
    assert_eq!(result.succeeded(), vec![0, 1, 2, 4]);
    assert_eq!(result.failed(), vec![3]);
    match result.first_error() {
        Some(StoreError::TaskFailure { index, message }) => {
            assert_eq!(*index, 3);
            assert!(message.contains("rejected its input"), "{message}");
        }
        other => panic!("unexpected first error: {other:?}"),
    }
    assert!(matches!(result.outcomes()[4], TaskOutcome::Completed(16)));
}

#[test]
fn test_first_error_is_lowest_index() {
    let executor = ParallelExecutor::new(&ExecutorConfig::with_workers(4)).unwrap();
    let tasks: Vec<Task<usize, String>> = vec![
        Box::new(|| -> Result<usize, String> { Ok(0) }),
        Box::new(|| -> Result<usize, String> {
            // Finishes last, but was submitted before the other failure.
            thread::sleep(std::time::Duration::from_millis(50));
            Err("slow failure".to_string())
        }),
        Box::new(|| -> Result<usize, String> { Ok(2) }),
        Box::new(|| -> Result<usize, String> { panic!("fast panic") }),
    ];

    let result = executor.run(tasks);
    assert_eq!(result.failed(), vec![1, 3]);
    assert!(matches!(
        result.first_error(),
        Some(StoreError::TaskFailure { index: 1, .. })
    ));
    assert!(result.into_outputs().is_err());
}

#[test]
fn test_tasks_run_in_parallel_on_distinct_workers() {
    let workers = 4;
    let executor = ParallelExecutor::new(&ExecutorConfig::with_workers(workers)).unwrap();
    let barrier = Arc::new(Barrier::new(workers));
    let names = Arc::new(Mutex::new(HashSet::new()));

    let result = executor.run((0..workers).map(|_| {
        let barrier = Arc::clone(&barrier);
        let names = Arc::clone(&names);
        move || {
            // Every task must be running at once for the barrier to release.
            barrier.wait();
            let name = thread::current().name().map(str::to_string);
            names.lock().unwrap().insert(name);
            Ok::<_, StoreError>(())
        }
    }));

    assert!(result.is_success());
    assert_eq!(names.lock().unwrap().len(), workers);
}

#[test]
fn test_more_tasks_than_workers() {
    let executor = ParallelExecutor::new(&ExecutorConfig::with_workers(2)).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let result = executor.run((0..100).map(|i| {
        let runs = Arc::clone(&runs);
        move || {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StoreError>(i)
        }
    }));

    assert_eq!(runs.load(Ordering::SeqCst), 100);
    assert_eq!(result.into_outputs().unwrap(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_executor_is_reusable_across_batches() {
    let executor = ParallelExecutor::new(&ExecutorConfig::with_workers(2)).unwrap();
    for round in 0..10 {
        let result = executor.run((0..8).map(move |i| move || Ok::<_, String>(round * 8 + i)));
        assert!(result.is_success());
    }
    let empty = executor.run(Vec::<Task<(), String>>::new());
    assert!(empty.is_empty());
    assert!(empty.is_success());
    assert!(empty.first_error().is_none());
}

#[test]
fn test_maps_can_share_one_executor() {
    let executor = Arc::new(ParallelExecutor::new(&ExecutorConfig::with_workers(2)).unwrap());
    let config = StoreConfig::builder().num_shards(4).dim(1).build();

    let left: ShardedConcurrentMap =
        ShardedConcurrentMap::with_executor(&config, Default::default(), Arc::clone(&executor))
            .unwrap();
    let right: ShardedConcurrentMap =
        ShardedConcurrentMap::with_executor(&config, Default::default(), Arc::clone(&executor))
            .unwrap();

    left.put("l", vec![1.0]).unwrap();
    right.put("r", vec![2.0]).unwrap();

    let top_left = left.scan_top_k(|_, e| e.vector()[0], 5).unwrap();
    let top_right = right.scan_top_k(|_, e| e.vector()[0], 5).unwrap();
    assert_eq!(top_left.len(), 1);
    assert_eq!(top_right.items()[0].payload.key, b"r".to_vec());
    assert!(Arc::ptr_eq(left.executor(), right.executor()));
}
