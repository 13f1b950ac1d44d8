//! Result handles for submitted tasks.
//!
//! A [`TaskHandle`] can be awaited from async code or waited on from a plain
//! thread. The worker side holds a [`Completer`]; dropping it without
//! completing reports [`TaskError::Abandoned`] so a handle never hangs.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Failure of a submitted task, delivered through its handle.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task panicked: {message}")]
    Panicked { message: String },
    #[error("task failed: {0}")]
    Failed(anyhow::Error),
    #[error("task was cancelled")]
    Cancelled,
    #[error("task was dropped before it ran")]
    Abandoned,
}

/// Outcome of a submitted task.
pub type TaskResult<T> = Result<T, TaskError>;

struct Slot<T> {
    result: Option<TaskResult<T>>,
    waker: Option<Waker>,
}

/// State shared between a handle and its completer.
struct TaskCell<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    done: AtomicBool,
    cancelled: AtomicBool,
}

impl<T> TaskCell<T> {
    /// Stores `result` unless the task already completed. First completion wins.
    fn complete(&self, result: TaskResult<T>) -> bool {
        self.finish(result, false)
    }

    fn cancel(&self) -> bool {
        self.finish(Err(TaskError::Cancelled), true)
    }

    fn finish(&self, result: TaskResult<T>, cancelling: bool) -> bool {
        let waker = {
            let mut slot = self.slot.lock();
            if self.done.load(Ordering::Acquire) {
                return false;
            }
            if cancelling {
                self.cancelled.store(true, Ordering::Release);
            }
            slot.result = Some(result);
            self.done.store(true, Ordering::Release);
            slot.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }
}

/// Creates a connected handle/completer pair.
pub(crate) fn task_pair<T>() -> (TaskHandle<T>, Completer<T>) {
    let cell = Arc::new(TaskCell {
        slot: Mutex::new(Slot {
            result: None,
            waker: None,
        }),
        ready: Condvar::new(),
        done: AtomicBool::new(false),
        cancelled: AtomicBool::new(false),
    });
    (
        TaskHandle {
            cell: Arc::clone(&cell),
        },
        Completer { cell: Some(cell) },
    )
}

// ---------------------------------------------------------------------------
// Completer
// ---------------------------------------------------------------------------

/// Worker-side end of a task.
pub(crate) struct Completer<T> {
    cell: Option<Arc<TaskCell<T>>>,
}

impl<T> Completer<T> {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cell
            .as_ref()
            .is_some_and(|cell| cell.cancelled.load(Ordering::Acquire))
    }

    pub(crate) fn complete(mut self, result: TaskResult<T>) {
        if let Some(cell) = self.cell.take() {
            cell.complete(result);
        }
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(cell) = self.cell.take() {
            cell.complete(Err(TaskError::Abandoned));
        }
    }
}

/// Renders a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// TaskHandle
// ---------------------------------------------------------------------------

/// Caller-side handle to a submitted task.
///
/// Implements [`Future`]; the blocking [`wait`](Self::wait) and
/// [`wait_timeout`](Self::wait_timeout) serve synchronous callers.
pub struct TaskHandle<T> {
    cell: Arc<TaskCell<T>>,
}

impl<T> TaskHandle<T> {
    /// Cancels the task.
    ///
    /// A task still queued will not run. A task already running is not
    /// interrupted, but the handle reports [`TaskError::Cancelled`] and its
    /// eventual result is discarded. Returns `false` if the task had already
    /// completed.
    pub fn cancel(&self) -> bool {
        self.cell.cancel()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cell.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` once a result (of any kind) is available.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cell.done.load(Ordering::Acquire)
    }

    /// Blocks the current thread until the task completes.
    ///
    /// # Errors
    ///
    /// Returns the task's [`TaskError`] if it panicked, failed, was
    /// cancelled, or was abandoned.
    pub fn wait(self) -> TaskResult<T> {
        let mut slot = self.cell.slot.lock();
        loop {
            if let Some(result) = slot.result.take() {
                return result;
            }
            self.cell.ready.wait(&mut slot);
        }
    }

    /// Blocks for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Gives the handle back as `Err` if the task has not completed in time.
    pub fn wait_timeout(self, timeout: Duration) -> Result<TaskResult<T>, Self> {
        let deadline = Instant::now() + timeout;
        let result = {
            let mut slot = self.cell.slot.lock();
            loop {
                if let Some(result) = slot.result.take() {
                    break Some(result);
                }
                if self.cell.ready.wait_until(&mut slot, deadline).timed_out() {
                    break slot.result.take();
                }
            }
        };
        result.ok_or(self)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.cell.slot.lock();
        match slot.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("done", &self.is_done())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn wait_returns_completed_value() {
        let (handle, completer) = task_pair::<u32>();
        thread::spawn(move || completer.complete(Ok(7)));
        assert_eq!(handle.wait().unwrap(), 7);
    }

    #[test]
    fn dropped_completer_reports_abandoned() {
        let (handle, completer) = task_pair::<u32>();
        drop(completer);
        assert!(handle.is_done());
        assert!(matches!(handle.wait(), Err(TaskError::Abandoned)));
    }

    #[test]
    fn wait_timeout_gives_handle_back() {
        let (handle, completer) = task_pair::<u32>();
        let handle = handle
            .wait_timeout(Duration::from_millis(20))
            .expect_err("nothing completed yet");
        completer.complete(Ok(1));
        assert_eq!(handle.wait_timeout(Duration::from_secs(1)).unwrap().unwrap(), 1);
    }

    #[test]
    fn cancel_wins_over_later_completion() {
        let (handle, completer) = task_pair::<u32>();
        assert!(handle.cancel());
        assert!(completer.is_cancelled());
        completer.complete(Ok(3));

        assert!(handle.is_cancelled());
        assert!(matches!(handle.wait(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn cancel_after_completion_is_refused() {
        let (handle, completer) = task_pair::<u32>();
        completer.complete(Ok(3));
        assert!(!handle.cancel());
        assert!(!handle.is_cancelled());
        assert_eq!(handle.wait().unwrap(), 3);
    }

    #[tokio::test]
    async fn handle_is_awaitable() {
        let (handle, completer) = task_pair::<String>();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            completer.complete(Ok("done".to_string()));
        });
        assert_eq!(handle.await.unwrap(), "done");
    }

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
