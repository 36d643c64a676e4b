//! Dispatchers for driving filter instances in tests.
//!
//! Bridge objects are bound to the thread they were created on, so tests
//! need a real dispatcher thread whenever guest work runs elsewhere.
//! [`ThreadDispatcher`] owns one; [`ManualDispatcher`] runs posted work on
//! the creating thread only when asked.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use chrono::{DateTime, Utc};
use tether_bridge::host::Dispatcher;
use tracing::{debug, error};

type Task = Box<dyn FnOnce() + Send>;

/// Shared clock: wall time unless pinned to a fixed instant.
#[derive(Default)]
struct Clock(Mutex<Option<DateTime<Utc>>>);

impl Clock {
    fn now(&self) -> DateTime<Utc> {
        let pinned = *self.0.lock().unwrap_or_else(PoisonError::into_inner);
        pinned.unwrap_or_else(Utc::now)
    }

    fn set(&self, at: DateTime<Utc>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }
}

/// A dedicated OS thread draining posted closures in order.
///
/// Posted closures that panic are logged and do not stop the thread.
pub struct ThreadDispatcher {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
    clock: Clock,
}

impl std::fmt::Debug for ThreadDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadDispatcher")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

impl ThreadDispatcher {
    /// Start a dispatcher thread.
    ///
    /// # Panics
    ///
    /// Panics if the OS refuses to spawn the thread.
    #[must_use]
    pub fn spawn(name: &str) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let thread_name = name.to_owned();
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(task)) {
                        error!(dispatcher = %thread_name, panic = ?panic, "posted task panicked");
                    }
                }
                debug!(dispatcher = %thread_name, "dispatcher thread exiting");
            })
            .unwrap_or_else(|e| panic!("failed to spawn dispatcher thread: {e}"));
        let thread_id = worker.thread().id();
        Arc::new(Self {
            name: name.to_owned(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            thread_id,
            clock: Clock::default(),
        })
    }

    /// Pin the clock returned by [`Dispatcher::now`].
    pub fn set_clock(&self, at: DateTime<Utc>) {
        self.clock.set(at);
    }

    /// The dispatcher thread's id.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Run `f` on the dispatcher thread and wait for its result. A panic in
    /// `f` is re-raised on the caller.
    ///
    /// # Panics
    ///
    /// Panics if called from the dispatcher thread itself, after
    /// [`shutdown`](Self::shutdown), or if `f` panics.
    pub fn run<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        assert_ne!(
            thread::current().id(),
            self.thread_id,
            "ThreadDispatcher::run called from its own thread"
        );
        let (reply, result) = mpsc::channel();
        self.send(Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = reply.send(outcome);
        }));
        match result.recv() {
            Ok(Ok(value)) => value,
            Ok(Err(panic)) => panic::resume_unwind(panic),
            Err(_) => panic!("dispatcher '{}' stopped before replying", self.name),
        }
    }

    /// Wait until everything posted so far has run.
    pub fn flush(&self) {
        self.run(|| ());
    }

    /// Stop accepting work, drain the queue, and join the thread. Calling it
    /// from the dispatcher thread only stops intake.
    pub fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        if thread::current().id() == self.thread_id {
            return;
        }
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker
            && worker.join().is_err()
        {
            error!(dispatcher = %self.name, "dispatcher thread panicked");
        }
    }

    fn send(&self, task: Task) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let sent = sender.as_ref().is_some_and(|sender| sender.send(task).is_ok());
        assert!(sent, "dispatcher '{}' is shut down", self.name);
    }
}

impl Dispatcher for ThreadDispatcher {
    fn post(&self, callback: Box<dyn FnOnce() + Send>) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let delivered = sender
            .as_ref()
            .is_some_and(|sender| sender.send(callback).is_ok());
        if !delivered {
            debug!(dispatcher = %self.name, "dropping post to stopped dispatcher");
        }
    }

    fn is_thread_safe(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl Drop for ThreadDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatcher owned by the creating thread. Posted work waits until
/// [`run_pending`](Self::run_pending).
pub struct ManualDispatcher {
    owner: ThreadId,
    queue: Mutex<VecDeque<Task>>,
    clock: Clock,
}

impl std::fmt::Debug for ManualDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualDispatcher")
            .field("owner", &self.owner)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Default for ManualDispatcher {
    fn default() -> Self {
        Self {
            owner: thread::current().id(),
            queue: Mutex::new(VecDeque::new()),
            clock: Clock::default(),
        }
    }
}

impl ManualDispatcher {
    /// Create a dispatcher owned by the current thread.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pin the clock returned by [`Dispatcher::now`].
    pub fn set_clock(&self, at: DateTime<Utc>) {
        self.clock.set(at);
    }

    /// Number of queued closures.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run queued closures, including any they post, and return how many
    /// ran.
    pub fn run_pending(&self) -> usize {
        let mut ran: usize = 0;
        loop {
            let next = self
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran = ran.saturating_add(1);
        }
    }
}

impl Dispatcher for ManualDispatcher {
    fn post(&self, callback: Box<dyn FnOnce() + Send>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(callback);
    }

    fn is_thread_safe(&self) -> bool {
        thread::current().id() == self.owner
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
