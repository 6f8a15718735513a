//! The dispatcher: sole owner of a [`StateMachine`], serializing every event through one lock.
//!
//! External callers and the clock thread's timers contend for the same
//! `tokio::sync::Mutex`, which hands the lock out in FIFO order, so neither side can
//! starve the other.

use std::cell::RefCell;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::clock::{Clock, ClockHandle, Panic};
use crate::fsm::{Event, Outcome};
use crate::timer::{Firing, Injector, Sink};
use crate::{Error, StateMachine};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Dispatchers whose hooks are running on this thread, innermost last.
    static DISPATCHING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks the current thread as running the hooks of one dispatcher.
struct DispatchScope;

impl DispatchScope {
    fn active(id: u64) -> bool {
        DISPATCHING.with(|stack| stack.borrow().contains(&id))
    }

    fn enter(id: u64) -> Self {
        DISPATCHING.with(|stack| stack.borrow_mut().push(id));
        DispatchScope
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCHING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name of the clock thread.
    pub thread_name: String,
    /// Trace every injected event and the resulting state.
    pub debug: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: String::from("fsm-clock"),
            debug: false,
        }
    }
}

impl DispatcherConfig {
    /// Set the clock thread name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Enable or disable event tracing.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

struct Core<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    id: u64,
    machine: Mutex<StateMachine<S, E, C>>,
    debug: AtomicBool,
    clock: ClockHandle,
}

impl<S, E, C> Core<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    fn process(
        &self,
        machine: &mut StateMachine<S, E, C>,
        event: &E,
    ) -> Result<Outcome<S>, Error<S>> {
        let _scope = DispatchScope::enter(self.id);
        let debug = self.debug.load(Ordering::Relaxed);
        if debug {
            tracing::info!(event = ?event.kind(), "process");
        }
        let outcome = machine.dispatch(event)?;
        if debug {
            tracing::info!(state = ?outcome.state(), "current_state");
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<S, E, C> Sink<E> for Core<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    async fn deliver(&self, firing: &Firing<'_, E>) {
        let mut machine = self.machine.lock().await;
        let Some(admitted) = firing.admit() else {
            tracing::trace!("stale timer firing dropped");
            return;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.process(&mut machine, admitted.event())
        }));
        drop(admitted);

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "timer event dispatch failed"),
            Err(payload) => {
                tracing::error!(
                    panic = panic_message(&payload),
                    "state machine panicked on the clock thread, shutting it down"
                );
                self.clock.fault(payload);
            }
        }
    }
}

/// Owner of a state machine and its clock thread; the single entry point for events.
///
/// Hooks run with the dispatch lock held: calling [`inject`](Self::inject) or
/// [`stop`](Self::stop) on the same dispatcher from inside one is refused with an error
/// instead of deadlocking. A hook may feed a different dispatcher, as long as that one
/// is not itself waiting on this hook further up the call chain.
///
/// Hooks triggered by timers run on the clock thread, inside its reactor, where the
/// blocking entry points panic. To feed another dispatcher from there, spawn a task
/// with `tokio::spawn` that calls [`inject_async`](Self::inject_async).
pub struct Dispatcher<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    core: Arc<Core<S, E, C>>,
    clock: Clock,
}

impl<S, E, C> Dispatcher<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    /// Start a clock thread and build the machine with `define`, which receives the
    /// [`Injector`] its timers bind to.
    pub fn new<F>(define: F) -> Result<Self, Error<S>>
    where
        F: FnOnce(&Injector<E>) -> Result<StateMachine<S, E, C>, Error<S>>,
    {
        Self::with_config(DispatcherConfig::default(), define)
    }

    /// Like [`new`](Self::new) with explicit settings.
    pub fn with_config<F>(config: DispatcherConfig, define: F) -> Result<Self, Error<S>>
    where
        F: FnOnce(&Injector<E>) -> Result<StateMachine<S, E, C>, Error<S>>,
    {
        let clock = Clock::spawn(&config.thread_name)?;
        let injector = Injector::new(clock.handle());
        let machine = define(&injector)?;

        let core = Arc::new(Core {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            machine: Mutex::new(machine),
            debug: AtomicBool::new(config.debug),
            clock: clock.handle(),
        });
        let sink: Weak<dyn Sink<E>> = Arc::downgrade(&core) as Weak<dyn Sink<E>>;
        injector.bind(sink);

        Ok(Self { core, clock })
    }

    fn ensure_open(&self) -> Result<(), Error<S>> {
        if DispatchScope::active(self.core.id) {
            return Err(Error::ReentrantDispatch);
        }
        if self.core.clock.is_stopped() {
            return Err(Error::Stopped);
        }
        Ok(())
    }

    fn assert_outside_hook(&self) {
        assert!(
            !DispatchScope::active(self.core.id),
            "dispatcher accessed from within a state machine hook"
        );
    }

    fn lock(&self) -> MutexGuard<'_, StateMachine<S, E, C>> {
        self.assert_outside_hook();
        self.core.machine.blocking_lock()
    }

    async fn lock_async(&self) -> MutexGuard<'_, StateMachine<S, E, C>> {
        self.assert_outside_hook();
        self.core.machine.lock().await
    }

    /// Enter the initial state.
    ///
    /// # Panics
    /// Like [`inject`](Self::inject), panics if called from within an async runtime.
    pub fn start(&self) -> Result<(), Error<S>> {
        self.ensure_open()?;
        let mut machine = self.core.machine.blocking_lock();
        let _scope = DispatchScope::enter(self.core.id);
        machine.start()
    }

    /// Enter the initial state from async code.
    pub async fn start_async(&self) -> Result<(), Error<S>> {
        self.ensure_open()?;
        let mut machine = self.core.machine.lock().await;
        let _scope = DispatchScope::enter(self.core.id);
        machine.start()
    }

    /// Deliver `event`, blocking until the dispatch lock is free and the machine has
    /// processed it.
    ///
    /// # Panics
    /// Panics if called from within an async runtime; use [`inject_async`](Self::inject_async) there.
    pub fn inject(&self, event: E) -> Result<Outcome<S>, Error<S>> {
        self.ensure_open()?;
        let mut machine = self.core.machine.blocking_lock();
        self.core.process(&mut machine, &event)
    }

    /// Deliver `event` from async code.
    pub async fn inject_async(&self, event: E) -> Result<Outcome<S>, Error<S>> {
        self.ensure_open()?;
        let mut machine = self.core.machine.lock().await;
        self.core.process(&mut machine, &event)
    }

    /// Stop the clock thread and join it. No timer event is delivered after this returns
    /// and further events are refused with [`Error::Stopped`]. Idempotent.
    ///
    /// Returns [`Error::ClockPanicked`] if a hook panicked while handling a timer event.
    pub fn stop(&self) -> Result<(), Error<S>> {
        if DispatchScope::active(self.core.id) {
            return Err(Error::ReentrantStop);
        }
        self.clock
            .shutdown()
            .map_err(|payload| Error::ClockPanicked(panic_message(&payload)))
    }

    /// Whether the dispatcher has been stopped (explicitly or by a clock fault).
    pub fn is_stopped(&self) -> bool {
        self.core.clock.is_stopped()
    }

    /// The machine's current state, `None` until started.
    ///
    /// # Panics
    /// Panics if called from within an async runtime (use
    /// [`current_state_async`](Self::current_state_async)) or from one of this
    /// dispatcher's hooks.
    pub fn current_state(&self) -> Option<S> {
        self.lock().current_state()
    }

    /// The machine's current state, from async code.
    pub async fn current_state_async(&self) -> Option<S> {
        self.lock_async().await.current_state()
    }

    /// Run `f` with shared access to the machine, holding the dispatch lock.
    ///
    /// # Panics
    /// Panics if called from within an async runtime (use
    /// [`with_machine_async`](Self::with_machine_async)) or from one of this
    /// dispatcher's hooks.
    pub fn with_machine<R>(&self, f: impl FnOnce(&StateMachine<S, E, C>) -> R) -> R {
        let machine = self.lock();
        f(&*machine)
    }

    /// Like [`with_machine`](Self::with_machine), from async code.
    pub async fn with_machine_async<R>(
        &self,
        f: impl FnOnce(&StateMachine<S, E, C>) -> R,
    ) -> R {
        let machine = self.lock_async().await;
        f(&*machine)
    }

    /// Enable or disable event tracing.
    pub fn set_debug(&self, debug: bool) {
        self.core.debug.store(debug, Ordering::Relaxed);
    }

    /// Whether event tracing is enabled.
    pub fn is_debug(&self) -> bool {
        self.core.debug.load(Ordering::Relaxed)
    }
}

impl<S, E, C> Drop for Dispatcher<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!(error = %err, "dispatcher stopped with an error");
        }
    }
}

fn panic_message(payload: &Panic) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}
