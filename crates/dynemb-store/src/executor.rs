//! Bounded worker pool for batches of independent tasks.
//!
//! Workers are spawned when the executor is built and joined when it is
//! dropped, whether or not [`ParallelExecutor::run`] was ever called.
//! Tasks are pulled from one shared queue, so every task runs exactly once on
//! whichever worker frees up first.

use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, warn};

use crate::config::ExecutorConfig;
use crate::error::{Result, StoreError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Boxed task, for batches that mix closure types.
pub type Task<T, E> = Box<dyn FnOnce() -> std::result::Result<T, E> + Send + 'static>;

/// Outcome of one task in a batch.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    /// The task returned a value.
    Completed(T),
    /// The task returned an error or panicked.
    Failed(StoreError),
}

impl<T> TaskOutcome<T> {
    /// Returns `true` if the task completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Per-task outcomes of one [`ParallelExecutor::run`] call, in submission
/// order.
#[derive(Debug)]
pub struct AggregateResult<T> {
    outcomes: Vec<TaskOutcome<T>>,
}

impl<T> AggregateResult<T> {
    /// Number of tasks in the batch.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` if the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Returns the outcomes in submission order.
    pub fn outcomes(&self) -> &[TaskOutcome<T>] {
        &self.outcomes
    }

    /// Indices of the tasks that completed.
    pub fn succeeded(&self) -> Vec<usize> {
        self.indices(true)
    }

    /// Indices of the tasks that failed.
    pub fn failed(&self) -> Vec<usize> {
        self.indices(false)
    }

    /// Returns `true` if every task completed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_completed)
    }

    /// The failure with the lowest submission index, independent of the
    /// order in which tasks finished.
    pub fn first_error(&self) -> Option<&StoreError> {
        self.outcomes.iter().find_map(|outcome| match outcome {
            TaskOutcome::Failed(err) => Some(err),
            TaskOutcome::Completed(_) => None,
        })
    }

    /// Returns every task's value, or the first error.
    pub fn into_outputs(self) -> Result<Vec<T>> {
        self.outcomes
            .into_iter()
            .map(|outcome| match outcome {
                TaskOutcome::Completed(value) => Ok(value),
                TaskOutcome::Failed(err) => Err(err),
            })
            .collect()
    }

    fn indices(&self, completed: bool) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.is_completed() == completed)
            .map(|(index, _)| index)
            .collect()
    }
}

/// A fixed-size pool of worker threads.
///
/// # Example
///
/// ```
/// use dynemb_store::{ExecutorConfig, ParallelExecutor, StoreError};
///
/// let executor = ParallelExecutor::new(&ExecutorConfig::with_workers(2)).unwrap();
/// let result = executor.run((0..4).map(|i| {
///     move || {
///         if i == 2 {
///             Err("boom")
///         } else {
///             Ok(i * 10)
///         }
///     }
/// }));
/// assert_eq!(result.succeeded(), vec![0, 1, 3]);
/// assert!(matches!(
///     result.first_error(),
///     Some(StoreError::TaskFailure { index: 2, .. })
/// ));
/// ```
pub struct ParallelExecutor {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("num_workers", &self.workers.len())
            .finish()
    }
}

impl ParallelExecutor {
    /// Spawns the worker threads.
    ///
    /// # Errors
    ///
    /// * [`StoreError::InvalidArgument`] - If the configured worker count is 0
    ///   or a worker thread could not be spawned
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        config.validate()?;
        let num_workers = config.resolved_workers();
        let (sender, receiver) = unbounded::<Job>();

        let mut executor = Self {
            sender: Some(sender),
            workers: Vec::with_capacity(num_workers),
        };
        for i in 0..num_workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("dynemb-worker-{i}"))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                })
                .map_err(|e| {
                    StoreError::invalid_argument(format!("failed to spawn worker {i}: {e}"))
                })?;
            executor.workers.push(handle);
        }

        debug!(num_workers, "parallel executor started");
        Ok(executor)
    }

    /// Returns the number of worker threads.
    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Runs every task and blocks until all of them have finished.
    ///
    /// A failing or panicking task does not stop the others; its failure is
    /// recorded as [`StoreError::TaskFailure`] under its submission index.
    ///
    /// Must not be called from inside a task of the same executor.
    pub fn run<I, F, T, E>(&self, tasks: I) -> AggregateResult<T>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Display + 'static,
    {
        let (done_tx, done_rx) = unbounded::<(usize, TaskOutcome<T>)>();

        let mut submitted = 0;
        for (index, task) in tasks.into_iter().enumerate() {
            let done_tx = done_tx.clone();
            let job: Job = Box::new(move || {
                let outcome = run_guarded(index, task);
                // The receiver lives until every sender is gone.
                let _ = done_tx.send((index, outcome));
            });
            self.dispatch(job);
            submitted += 1;
        }
        drop(done_tx);

        let mut slots: Vec<Option<TaskOutcome<T>>> = (0..submitted).map(|_| None).collect();
        for (index, outcome) in done_rx.iter() {
            slots[index] = Some(outcome);
        }

        let outcomes = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    TaskOutcome::Failed(StoreError::TaskFailure {
                        index,
                        message: "task was dropped before running".to_string(),
                    })
                })
            })
            .collect();
        AggregateResult { outcomes }
    }

    fn dispatch(&self, job: Job) {
        match &self.sender {
            Some(sender) => {
                if let Err(returned) = sender.send(job) {
                    // No worker is left to receive it.
                    (returned.into_inner())();
                }
            }
            None => job(),
        }
    }
}

impl Drop for ParallelExecutor {
    fn drop(&mut self) {
        drop(self.sender.take());
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("executor worker exited with a panic");
            }
        }
        debug!("parallel executor stopped");
    }
}

fn run_guarded<F, T, E>(index: usize, task: F) -> TaskOutcome<T>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: Display,
{
    let message = match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(value)) => return TaskOutcome::Completed(value),
        Ok(Err(err)) => err.to_string(),
        Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
    };
    warn!(task = index, error = %message, "executor task failed");
    TaskOutcome::Failed(StoreError::TaskFailure { index, message })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
