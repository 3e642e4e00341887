//! Single-threaded UI execution context.
//!
//! All user-interface work (environment setup, the application itself and
//! crash dialogs) runs on one dedicated dispatch thread. Tasks are posted
//! through a [`UiHandle`] and run strictly one at a time in FIFO order.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;
use tracing::{debug, warn};

/// Name of the dispatch thread.
pub const UI_THREAD_NAME: &str = "ui-dispatch";

/// A unit of work for the UI thread.
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised when scheduling UI work.
#[derive(Debug, Error)]
pub enum UiError {
    /// Shutdown was already requested.
    #[error("UI execution context is closed")]
    Closed,

    /// The dispatch thread could not be started.
    #[error("Failed to start UI thread: {0}")]
    Spawn(#[from] std::io::Error),
}

enum Command {
    Run(UiTask),
    Shutdown,
}

#[derive(Default)]
struct Shared {
    /// Held while sending so no task can slip in behind `Shutdown`.
    closed: Mutex<bool>,
    scheduled: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    thread_id: OnceLock<ThreadId>,
}

/// Cloneable handle used to schedule work on the UI thread.
#[derive(Clone)]
pub struct UiHandle {
    sender: Sender<Command>,
    shared: Arc<Shared>,
}

impl UiHandle {
    /// Schedules `task` to run after every previously posted task.
    ///
    /// Never blocks and never runs the task on the calling thread.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> Result<(), UiError> {
        let closed = self.shared.closed.lock();
        if *closed {
            return Err(UiError::Closed);
        }
        self.sender
            .send(Command::Run(Box::new(task)))
            .map_err(|_| UiError::Closed)?;
        self.shared.scheduled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Requests shutdown once the already queued tasks have run.
    ///
    /// Idempotent. Later calls to [`UiHandle::post`] fail with
    /// [`UiError::Closed`].
    pub fn shutdown(&self) {
        let mut closed = self.shared.closed.lock();
        if !*closed {
            *closed = true;
            let _ = self.sender.send(Command::Shutdown);
        }
    }

    /// Returns true once shutdown has been requested.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.lock()
    }

    /// Returns true when called from the dispatch thread.
    #[must_use]
    pub fn is_ui_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Number of tasks accepted so far.
    #[must_use]
    pub fn tasks_scheduled(&self) -> u64 {
        self.shared.scheduled.load(Ordering::SeqCst)
    }

    /// Number of tasks that finished (including those that panicked).
    #[must_use]
    pub fn tasks_completed(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    /// Number of tasks that panicked.
    #[must_use]
    pub fn tasks_panicked(&self) -> u64 {
        self.shared.panicked.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for UiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiHandle")
            .field("closed", &self.is_closed())
            .field("scheduled", &self.tasks_scheduled())
            .finish()
    }
}

/// Owner of the dispatch thread.
pub struct UiContext {
    handle: UiHandle,
    thread: Option<JoinHandle<()>>,
}

impl UiContext {
    /// Spawns the dispatch thread.
    pub fn start() -> Result<Self, UiError> {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared::default());

        let thread = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(UI_THREAD_NAME.to_string())
                .spawn(move || {
                    let _ = shared.thread_id.set(thread::current().id());
                    dispatch(&receiver, &shared);
                })?
        };
        // The id is published by the thread itself; make it visible right away.
        let _ = shared.thread_id.set(thread.thread().id());

        Ok(Self {
            handle: UiHandle { sender, shared },
            thread: Some(thread),
        })
    }

    /// Returns a scheduling handle.
    #[must_use]
    pub fn handle(&self) -> UiHandle {
        self.handle.clone()
    }

    /// Blocks until the dispatch loop has ended.
    ///
    /// The loop ends only after [`UiHandle::shutdown`] has been called and all
    /// tasks queued before it have run.
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for UiContext {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.shutdown();
            if !self.handle.is_ui_thread() {
                let _ = thread.join();
            }
        }
    }
}

fn dispatch(receiver: &Receiver<Command>, shared: &Shared) {
    debug!("UI dispatch loop started");
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Run(task) => {
                // Panics were already routed through the panic hook; keep
                // dispatching so queued crash dialogs still get shown.
                if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                    shared.panicked.fetch_add(1, Ordering::SeqCst);
                    warn!("UI task panicked");
                }
                shared.completed.fetch_add(1, Ordering::SeqCst);
            },
            Command::Shutdown => break,
        }
    }
    debug!("UI dispatch loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let context = UiContext::start().expect("start ui");
        let handle = context.handle();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let order = order.clone();
            handle.post(move || order.lock().push(i)).expect("post");
        }
        handle.shutdown();
        context.join();

        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(handle.tasks_scheduled(), 50);
        assert_eq!(handle.tasks_completed(), 50);
    }

    #[test]
    fn test_tasks_never_overlap() {
        let context = UiContext::start().expect("start ui");
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let posters: Vec<_> = (0..4)
            .map(|_| {
                let handle = context.handle();
                let active = active.clone();
                let max_seen = max_seen.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let active = active.clone();
                        let max_seen = max_seen.clone();
                        handle
                            .post(move || {
                                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                                max_seen.fetch_max(now, Ordering::SeqCst);
                                thread::yield_now();
                                active.fetch_sub(1, Ordering::SeqCst);
                            })
                            .expect("post");
                    }
                })
            })
            .collect();
        for poster in posters {
            poster.join().expect("poster");
        }

        let handle = context.handle();
        handle.shutdown();
        context.join();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(handle.tasks_completed(), 100);
    }

    #[test]
    fn test_tasks_run_on_ui_thread() {
        let context = UiContext::start().expect("start ui");
        let handle = context.handle();
        assert!(!handle.is_ui_thread());

        let seen = Arc::new(Mutex::new(None));
        {
            let seen = seen.clone();
            let inner = handle.clone();
            handle
                .post(move || {
                    *seen.lock() = Some((
                        thread::current().name().map(String::from),
                        inner.is_ui_thread(),
                    ));
                })
                .expect("post");
        }
        handle.shutdown();
        context.join();

        assert_eq!(
            *seen.lock(),
            Some((Some(UI_THREAD_NAME.to_string()), true))
        );
    }

    #[test]
    fn test_post_after_shutdown_fails() {
        let context = UiContext::start().expect("start ui");
        let handle = context.handle();
        handle.shutdown();
        handle.shutdown();

        assert!(handle.is_closed());
        assert!(matches!(handle.post(|| {}), Err(UiError::Closed)));
        assert_eq!(handle.tasks_scheduled(), 0);
        context.join();
    }

    #[test]
    fn test_panicking_task_does_not_stop_dispatch() {
        let context = UiContext::start().expect("start ui");
        let handle = context.handle();
        let ran = Arc::new(AtomicUsize::new(0));

        handle.post(|| panic!("task failure")).expect("post");
        {
            let ran = ran.clone();
            handle
                .post(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .expect("post");
        }
        handle.shutdown();
        context.join();

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(handle.tasks_panicked(), 1);
        assert_eq!(handle.tasks_completed(), 2);
    }

    #[test]
    fn test_drop_shuts_down() {
        let ran = Arc::new(AtomicUsize::new(0));
        {
            let context = UiContext::start().expect("start ui");
            let ran = ran.clone();
            context
                .handle()
                .post(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .expect("post");
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
