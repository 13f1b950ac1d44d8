//! Thread-affinity executor.
//!
//! Each caller thread is bound to one worker thread with its own FIFO queue.
//! Bindings live in a `DashMap` keyed by the caller's `ThreadId`; a worker
//! whose queue stays empty for the keep-alive marks itself retired under its
//! queue lock and removes its own binding, so a submission racing with
//! retirement either lands before the retirement or is re-routed to a new
//! worker. No task is lost.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::config::AffinityConfig;
use super::handle::{panic_message, task_pair, Completer, TaskError, TaskHandle, TaskResult};

type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned synchronously by [`AffinityExecutor::submit`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("executor has been shut down")]
    ShutDown,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// WorkerBinding
// ---------------------------------------------------------------------------

struct WorkerQueue {
    tasks: VecDeque<Runnable>,
    retired: bool,
}

/// A caller thread's dedicated worker.
struct WorkerBinding {
    caller: ThreadId,
    worker_name: String,
    queue: Mutex<WorkerQueue>,
    available: Condvar,
    last_activity: Mutex<Instant>,
}

impl WorkerBinding {
    /// Enqueues `task`, or hands it back if the worker has retired.
    fn push(&self, task: Runnable) -> Result<(), Runnable> {
        let mut queue = self.queue.lock();
        if queue.retired {
            return Err(task);
        }
        queue.tasks.push_back(task);
        drop(queue);
        self.available.notify_one();
        Ok(())
    }

    fn is_retired(&self) -> bool {
        self.queue.lock().retired
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Wakes the worker so it re-checks the accepting flag.
    fn wake(&self) {
        let _queue = self.queue.lock();
        self.available.notify_all();
    }
}

/// Diagnostic view of a live binding.
#[derive(Debug, Clone)]
pub struct BindingInfo {
    pub caller: ThreadId,
    pub worker_name: String,
    pub queued: usize,
    pub idle_for: Duration,
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

struct Shared {
    config: AffinityConfig,
    bindings: DashMap<ThreadId, Arc<WorkerBinding>>,
    accepting: AtomicBool,
    live_workers: Mutex<usize>,
    terminated: Condvar,
    next_worker: AtomicU64,
}

impl Shared {
    fn worker_exited(&self) {
        let mut live = self.live_workers.lock();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.terminated.notify_all();
        }
    }
}

fn spawn_worker(shared: &Arc<Shared>, caller: ThreadId) -> Result<Arc<WorkerBinding>, ExecutorError> {
    let seq = shared.next_worker.fetch_add(1, Ordering::Relaxed);
    let worker_name = format!("{}-{seq}", shared.config.thread_name_prefix);
    let binding = Arc::new(WorkerBinding {
        caller,
        worker_name: worker_name.clone(),
        queue: Mutex::new(WorkerQueue {
            tasks: VecDeque::new(),
            retired: false,
        }),
        available: Condvar::new(),
        last_activity: Mutex::new(Instant::now()),
    });

    *shared.live_workers.lock() += 1;
    let worker_shared = Arc::clone(shared);
    let worker_binding = Arc::clone(&binding);
    let spawned = thread::Builder::new()
        .name(worker_name.clone())
        .spawn(move || run_worker(&worker_shared, &worker_binding));

    if let Err(e) = spawned {
        shared.worker_exited();
        return Err(ExecutorError::Spawn(e));
    }

    metrics::counter!("calcgrid_affinity_workers_spawned_total").increment(1);
    debug!(worker = %worker_name, caller = ?caller, "bound caller to new worker");
    Ok(binding)
}

fn run_worker(shared: &Shared, binding: &Arc<WorkerBinding>) {
    let keep_alive = shared.config.keep_alive;
    loop {
        let next = {
            let mut queue = binding.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if !shared.accepting.load(Ordering::Acquire) {
                    queue.retired = true;
                    break None;
                }
                let timed_out = binding.available.wait_for(&mut queue, keep_alive).timed_out();
                if timed_out && queue.tasks.is_empty() {
                    queue.retired = true;
                    break None;
                }
            }
        };

        match next {
            Some(task) => {
                binding.touch();
                task();
                binding.touch();
            }
            None => break,
        }
    }

    shared
        .bindings
        .remove_if(&binding.caller, |_, current| Arc::ptr_eq(current, binding));
    metrics::counter!("calcgrid_affinity_workers_retired_total").increment(1);
    debug!(worker = %binding.worker_name, caller = ?binding.caller, "worker retired");
    shared.worker_exited();
}

// ---------------------------------------------------------------------------
// AffinityExecutor
// ---------------------------------------------------------------------------

/// Executor that runs each caller thread's tasks on a dedicated worker thread.
///
/// Guarantees:
/// - tasks submitted from one caller thread run in submission order on one
///   worker thread, as long as that worker stays bound
/// - distinct caller threads are served by distinct workers, in parallel
/// - a panicking task is reported through its handle and does not affect
///   the tasks queued behind it
///
/// Affinity is not preserved across an idle gap longer than the keep-alive;
/// results are.
pub struct AffinityExecutor {
    shared: Arc<Shared>,
}

impl AffinityExecutor {
    #[must_use]
    pub fn new(config: AffinityConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                bindings: DashMap::new(),
                accepting: AtomicBool::new(true),
                live_workers: Mutex::new(0),
                terminated: Condvar::new(),
                next_worker: AtomicU64::new(0),
            }),
        }
    }

    /// Submits `task` on the worker bound to the calling thread.
    ///
    /// Never blocks beyond the cost of an enqueue, plus a thread spawn when
    /// the caller has no live worker. The spawn holds no lock shared with
    /// other callers.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::ShutDown`] after [`shutdown`](Self::shutdown),
    /// or [`ExecutorError::Spawn`] if a worker thread cannot be created.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_task(move || Ok(task()))
    }

    /// Submits a fallible task; an `Err` is delivered as [`TaskError::Failed`].
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_result<F, T>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit_task(move || task().map_err(TaskError::Failed))
    }

    fn submit_task<F, T>(&self, task: F) -> Result<TaskHandle<T>, ExecutorError>
    where
        F: FnOnce() -> TaskResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return Err(ExecutorError::ShutDown);
        }

        let (handle, completer) = task_pair();
        self.enqueue(thread::current().id(), Box::new(move || run_task(task, completer)))?;
        Ok(handle)
    }

    fn enqueue(&self, caller: ThreadId, task: Runnable) -> Result<(), ExecutorError> {
        let mut task = task;
        loop {
            let binding = self.binding_for(caller)?;
            match binding.push(task) {
                Ok(()) => return Ok(()),
                // Retired between lookup and push; bind a fresh worker.
                Err(returned) => task = returned,
            }
        }
    }

    fn binding_for(&self, caller: ThreadId) -> Result<Arc<WorkerBinding>, ExecutorError> {
        if let Some(existing) = self.shared.bindings.get(&caller) {
            if !existing.is_retired() {
                return Ok(Arc::clone(existing.value()));
            }
        }

        // Spawned without holding a map guard. Only `caller` itself binds
        // under its own id, so no competing binding can appear meanwhile.
        self.ensure_accepting()?;
        let binding = spawn_worker(&self.shared, caller)?;
        self.shared.bindings.insert(caller, Arc::clone(&binding));
        if binding.is_retired() {
            // Retired before it was published; its own unbind already ran.
            self.shared
                .bindings
                .remove_if(&caller, |_, current| Arc::ptr_eq(current, &binding));
        }
        Ok(binding)
    }

    fn ensure_accepting(&self) -> Result<(), ExecutorError> {
        if self.shared.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(ExecutorError::ShutDown)
        }
    }

    /// Stops accepting submissions. Already queued tasks still run; workers
    /// exit once their queues are drained.
    pub fn shutdown(&self) {
        if self.shared.accepting.swap(false, Ordering::AcqRel) {
            info!(workers = self.active_workers(), "affinity executor shutting down");
        }
        for binding in self.shared.bindings.iter() {
            binding.value().wake();
        }
    }

    /// Blocks until every worker has exited, or `timeout` elapses.
    ///
    /// Returns `true` if all workers exited. Without a prior
    /// [`shutdown`](Self::shutdown) this only succeeds once every worker has
    /// idled out.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.shared.live_workers.lock();
        while *live > 0 {
            if self
                .shared
                .terminated
                .wait_until(&mut live, deadline)
                .timed_out()
            {
                return *live == 0;
            }
        }
        true
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        !self.shared.accepting.load(Ordering::Acquire)
    }

    /// `true` once shut down and every worker has exited.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.active_workers() == 0
    }

    /// Number of worker threads currently alive.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        *self.shared.live_workers.lock()
    }

    /// Snapshot of live, non-retired bindings.
    #[must_use]
    pub fn bindings(&self) -> Vec<BindingInfo> {
        self.shared
            .bindings
            .iter()
            .filter_map(|entry| {
                let binding = entry.value();
                let queue = binding.queue.lock();
                if queue.retired {
                    return None;
                }
                Some(BindingInfo {
                    caller: binding.caller,
                    worker_name: binding.worker_name.clone(),
                    queued: queue.tasks.len(),
                    idle_for: binding.last_activity.lock().elapsed(),
                })
            })
            .collect()
    }

    #[must_use]
    pub fn config(&self) -> &AffinityConfig {
        &self.shared.config
    }
}

impl Default for AffinityExecutor {
    fn default() -> Self {
        Self::new(AffinityConfig::default())
    }
}

impl Drop for AffinityExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AffinityExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityExecutor")
            .field("config", &self.shared.config)
            .field("bindings", &self.shared.bindings.len())
            .field("active_workers", &self.active_workers())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn run_task<F, T>(task: F, completer: Completer<T>)
where
    F: FnOnce() -> TaskResult<T>,
{
    if completer.is_cancelled() {
        completer.complete(Err(TaskError::Cancelled));
        return;
    }
    let result = match catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked {
            message: panic_message(payload.as_ref()),
        }),
    };
    completer.complete(result);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
