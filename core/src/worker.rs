//! Background workers for off-thread node construction.

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// A unit of work for the pool.
pub type Job = Box<dyn FnOnce() + Send>;

/// The job panicked or its result was already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    Panicked,
    Taken,
}

enum TaskState<T> {
    Pending,
    Running,
    Done(Result<T, TaskError>),
    Cancelled,
    Taken,
}

struct TaskCell<T> {
    state: Mutex<TaskState<T>>,
    done: Condvar,
}

/// The result of a job that may still be queued, running, or finished.
pub struct Task<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T: Send + 'static> Task<T> {
    /// Creates a task and the job that completes it.
    pub fn new<F: FnOnce() -> T + Send + 'static>(f: F) -> (Task<T>, Job) {
        let cell = Arc::new(TaskCell {
            state: Mutex::new(TaskState::Pending),
            done: Condvar::new(),
        });
        let job_cell = Arc::clone(&cell);
        let job: Job = Box::new(move || {
            {
                let mut state = job_cell.state.lock();
                match *state {
                    TaskState::Pending => *state = TaskState::Running,
                    _ => return,
                }
            }
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| TaskError::Panicked);
            *job_cell.state.lock() = TaskState::Done(result);
            job_cell.done.notify_all();
        });
        (Task { cell }, job)
    }
}

impl<T> Task<T> {
    /// Returns true once the job has finished, successfully or not.
    pub fn is_done(&self) -> bool {
        match *self.cell.state.lock() {
            TaskState::Done(_) | TaskState::Taken => true,
            _ => false,
        }
    }

    /// Cancels the job if it has not started. Returns false if it is already running or done.
    pub fn cancel(&self) -> bool {
        let mut state = self.cell.state.lock();
        match *state {
            TaskState::Pending => {
                *state = TaskState::Cancelled;
                true
            }
            TaskState::Cancelled => true,
            _ => false,
        }
    }

    /// Takes the result if the job has finished.
    pub fn try_take(&self) -> Option<Result<T, TaskError>> {
        let mut state = self.cell.state.lock();
        match *state {
            TaskState::Done(_) => match std::mem::replace(&mut *state, TaskState::Taken) {
                TaskState::Done(result) => Some(result),
                _ => None,
            },
            TaskState::Taken => Some(Err(TaskError::Taken)),
            _ => None,
        }
    }

    /// Blocks until the job finishes or the timeout elapses. Returns whether it finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.cell.state.lock();
        loop {
            match *state {
                TaskState::Done(_) | TaskState::Taken => return true,
                TaskState::Cancelled => return false,
                _ => (),
            }
            if self.cell.done.wait_for(&mut state, timeout).timed_out() {
                return match *state {
                    TaskState::Done(_) | TaskState::Taken => true,
                    _ => false,
                };
            }
        }
    }
}

/// A fixed set of worker threads fed through a channel.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> WorkerPool {
        let (sender, receiver) = channel::unbounded::<Job>();
        let mut handles = Vec::new();
        for i in 0..threads.max(1) {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("lynx-ui-worker-{}", i))
                .spawn(move || {
                    for job in receiver.iter() {
                        job();
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!(%err, "failed to spawn worker thread"),
            }
        }
        debug!(threads = handles.len(), "started worker pool");
        WorkerPool {
            sender: Some(sender),
            threads: handles,
        }
    }

    /// Queues a job. Jobs submitted after shutdown are dropped.
    pub fn execute(&self, job: Job) {
        let sent = match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        };
        if !sent {
            warn!("worker pool is shut down; dropping job");
        }
    }

    /// Stops accepting jobs and waits for the workers to drain the queue.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct GateState<T> {
    free: bool,
    queue: VecDeque<T>,
}

/// Holds apply steps back while the context is free (not attached to a live view).
///
/// Queued steps come back out in FIFO order, once, on attach. Safe to share with worker threads.
pub struct FreeContextGate<T> {
    state: Mutex<GateState<T>>,
}

impl<T> FreeContextGate<T> {
    pub fn new() -> FreeContextGate<T> {
        FreeContextGate {
            state: Mutex::new(GateState {
                free: false,
                queue: VecDeque::new(),
            }),
        }
    }

    pub fn set_free(&self, free: bool) {
        self.state.lock().free = free;
    }

    pub fn is_free(&self) -> bool {
        self.state.lock().free
    }

    /// Queues the step if the context is free; otherwise hands it back to run now.
    pub fn offer(&self, step: T) -> Option<T> {
        let mut state = self.state.lock();
        if state.free {
            state.queue.push_back(step);
            None
        } else {
            Some(step)
        }
    }

    /// Leaves the free state and returns the queued steps.
    pub fn attach(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.free = false;
        if !state.queue.is_empty() {
            debug!(queued = state.queue.len(), "flushing context-free steps");
        }
        state.queue.drain(..).collect()
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn clear(&self) {
        self.state.lock().queue.clear();
    }
}

impl<T> Default for FreeContextGate<T> {
    fn default() -> Self {
        FreeContextGate::new()
    }
}

#[test]
fn test_task_runs_on_pool() {
    let pool = WorkerPool::new(2);
    let (task, job) = Task::new(|| 6 * 7);
    pool.execute(job);
    assert!(task.wait_timeout(Duration::from_secs(5)), "job should finish");
    assert_eq!(task.try_take(), Some(Ok(42)));
    assert_eq!(task.try_take(), Some(Err(TaskError::Taken)));
}

#[test]
fn test_cancel_before_start() {
    let (task, job) = Task::new(|| 1);
    assert!(task.cancel());
    job();
    assert!(!task.is_done(), "a cancelled job must not run");
    assert_eq!(task.try_take(), None);
}

#[test]
fn test_panicking_job_reports_error() {
    let (task, job) = Task::new(|| -> u32 { panic!("constructor failure") });
    job();
    assert!(!task.cancel());
    assert_eq!(task.try_take(), Some(Err(TaskError::Panicked)));
}

#[test]
fn test_gate_queues_while_free() {
    let gate = FreeContextGate::new();
    assert_eq!(gate.offer(1), Some(1), "attached contexts run steps immediately");

    gate.set_free(true);
    for step in 2..5 {
        assert_eq!(gate.offer(step), None);
    }
    assert_eq!(gate.queued(), 3);
    assert_eq!(gate.attach(), vec![2, 3, 4]);
    assert!(gate.attach().is_empty(), "queued steps flush exactly once");
    assert_eq!(gate.offer(5), Some(5));
}
