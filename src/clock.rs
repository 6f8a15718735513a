//! The clock thread: a single-threaded tokio reactor driven on a dedicated OS thread.
//!
//! Every timer of a dispatcher is a task on this reactor, so all firings are delivered
//! from one thread. Shutting the clock down drops the reactor on its own thread, which
//! discards every pending firing without polling it again.

use std::any::Any;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::runtime::{Builder, Handle};
use tokio::sync::Notify;
use tokio::task::AbortHandle;

/// Payload of a panic caught on the clock thread.
pub(crate) type Panic = Box<dyn Any + Send + 'static>;

struct Shared {
    shutdown: Notify,
    stopped: AtomicBool,
    fault: Mutex<Option<Panic>>,
}

/// Cloneable access to a running clock: spawn timer tasks, report faults.
#[derive(Clone)]
pub(crate) struct ClockHandle {
    handle: Handle,
    shared: Arc<Shared>,
    thread_id: ThreadId,
}

impl ClockHandle {
    pub(crate) fn spawn<F>(&self, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(task).abort_handle()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the caller is running on the clock thread.
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id()
    }

    /// Record a panic raised while delivering a timer event and shut the clock down.
    /// The clock thread resumes the first recorded panic once its reactor is gone.
    pub(crate) fn fault(&self, payload: Panic) {
        {
            let mut fault = self.shared.fault.lock().unwrap_or_else(PoisonError::into_inner);
            if fault.is_none() {
                *fault = Some(payload);
            }
        }
        self.signal();
    }

    fn signal(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.shutdown.notify_one();
    }
}

/// Owner of the clock thread.
pub(crate) struct Clock {
    handle: ClockHandle,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Clock {
    /// Build the reactor on the calling thread, then hand it to a new thread named `name`.
    pub(crate) fn spawn(name: &str) -> io::Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_time()
            .thread_name(name)
            .build()?;
        let handle = runtime.handle().clone();

        let shared = Arc::new(Shared {
            shutdown: Notify::new(),
            stopped: AtomicBool::new(false),
            fault: Mutex::new(None),
        });

        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new().name(name.to_string()).spawn(move || {
            runtime.block_on(thread_shared.shutdown.notified());
            drop(runtime);

            let fault = thread_shared
                .fault
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(payload) = fault {
                std::panic::resume_unwind(payload);
            }
        })?;

        tracing::debug!(thread = name, "clock thread started");

        Ok(Self {
            handle: ClockHandle {
                handle,
                shared,
                thread_id: thread.thread().id(),
            },
            thread: Mutex::new(Some(thread)),
        })
    }

    pub(crate) fn handle(&self) -> ClockHandle {
        self.handle.clone()
    }

    /// Stop the reactor and join the clock thread. Idempotent; only the first call
    /// observes a panic that terminated the thread.
    ///
    /// Must not be called on the clock thread itself.
    pub(crate) fn shutdown(&self) -> thread::Result<()> {
        self.handle.signal();

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match thread {
            Some(thread) => {
                let joined = thread.join();
                tracing::debug!("clock thread stopped");
                joined
            }
            None => Ok(()),
        }
    }
}

impl Drop for Clock {
    fn drop(&mut self) {
        if self.handle.is_current() {
            // Dropped from a task on the reactor: signal only, the thread exits on its own.
            self.handle.signal();
            return;
        }
        if self.shutdown().is_err() {
            tracing::error!("clock thread terminated by a panic");
        }
    }
}
