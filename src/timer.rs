//! Cancellable one-shot and periodic timers that inject synthetic events.
//!
//! A [`Timer`] is bound to one event constructor and to a dispatcher through an
//! [`Injector`]. Firings run on the dispatcher's clock thread and go through the same
//! serialized entry point as external events.
//!
//! Cancellation is tracked with a generation counter in the timer's slot. A firing is
//! only delivered if, once the dispatch lock is held, its generation still matches;
//! while it is being delivered the slot is marked so that [`Timer::stop`] called from
//! another thread waits for it to finish. The periodic rearm re-checks the generation
//! after delivery.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};

use crate::clock::ClockHandle;
use crate::error::TimerError;
use crate::fsm::Event;

/// Whether a timer fires once or keeps firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimerMode {
    /// Fire once after the timeout.
    #[default]
    Once,
    /// Fire every timeout until stopped.
    Pulse,
}

/// The receiving end of timer firings; implemented by the dispatcher.
#[async_trait]
pub(crate) trait Sink<E>: Send + Sync {
    /// Acquire the dispatch lock, then deliver `firing` if it is still admitted.
    async fn deliver(&self, firing: &Firing<'_, E>);
}

/// Handle given to a machine definition at construction time so it can create timers.
///
/// It refers to the dispatcher without owning it; firings that happen after the
/// dispatcher is gone are dropped.
pub struct Injector<E> {
    clock: ClockHandle,
    sink: Arc<OnceLock<Weak<dyn Sink<E>>>>,
}

impl<E> Clone for Injector<E> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<E: Event> Injector<E> {
    pub(crate) fn new(clock: ClockHandle) -> Self {
        Self {
            clock,
            sink: Arc::new(OnceLock::new()),
        }
    }

    pub(crate) fn bind(&self, sink: Weak<dyn Sink<E>>) {
        if self.sink.set(sink).is_err() {
            tracing::warn!("injector already bound");
        }
    }

    fn sink(&self) -> Option<Arc<dyn Sink<E>>> {
        self.sink.get()?.upgrade()
    }

    /// Create a timer that fires events built by `factory`.
    pub fn timer<F>(&self, factory: F) -> Timer<E>
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        Timer::new(self, factory)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    running: bool,
    delivering: bool,
    timeout: Duration,
    mode: TimerMode,
    task: Option<AbortHandle>,
}

impl Slot {
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.running = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct TimerShared<E> {
    slot: Mutex<Slot>,
    changed: Condvar,
    factory: Box<dyn Fn() -> E + Send + Sync>,
}

impl<E> TimerShared<E> {
    // No user code runs while the slot is locked, so a poisoned lock still holds a valid slot.
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.slot().generation == generation
    }

    fn finish(&self, generation: u64) {
        let mut slot = self.slot();
        if slot.generation == generation {
            slot.running = false;
            slot.task = None;
            self.changed.notify_all();
        }
    }
}

/// One pending firing of a timer, as seen by the dispatcher.
pub(crate) struct Firing<'a, E> {
    timer: &'a TimerShared<E>,
    generation: u64,
}

impl<'a, E> Firing<'a, E> {
    /// Must be called with the dispatch lock held. Returns `None` if the timer was
    /// stopped or restarted since this firing was scheduled.
    pub(crate) fn admit(&self) -> Option<Admitted<'a, E>> {
        {
            let mut slot = self.timer.slot();
            if slot.generation != self.generation {
                return None;
            }
            slot.delivering = true;
        }
        Some(Admitted {
            timer: self.timer,
            event: (self.timer.factory)(),
        })
    }
}

/// A firing being delivered. Dropping it wakes any [`Timer::stop`] waiting on it.
pub(crate) struct Admitted<'a, E> {
    timer: &'a TimerShared<E>,
    event: E,
}

impl<E> Admitted<'_, E> {
    pub(crate) fn event(&self) -> &E {
        &self.event
    }
}

impl<E> Drop for Admitted<'_, E> {
    fn drop(&mut self) {
        self.timer.slot().delivering = false;
        self.timer.changed.notify_all();
    }
}

/// A cancellable, optionally periodic countdown bound to one event constructor.
///
/// Dropping a timer cancels it.
pub struct Timer<E: Event> {
    shared: Arc<TimerShared<E>>,
    injector: Injector<E>,
}

impl<E: Event> Timer<E> {
    /// Create a stopped timer delivering events built by `factory` through `injector`.
    pub fn new<F>(injector: &Injector<E>, factory: F) -> Self
    where
        F: Fn() -> E + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(TimerShared {
                slot: Mutex::new(Slot::default()),
                changed: Condvar::new(),
                factory: Box::new(factory),
            }),
            injector: injector.clone(),
        }
    }

    /// Cancel any pending firing and arm the timer to fire `timeout` from now, once or
    /// every `timeout` depending on `mode`.
    ///
    /// Periodic firings follow a fixed schedule anchored at this call, so delivery latency
    /// does not accumulate into drift. A firing that was late (the clock thread waited on a
    /// busy dispatcher) pushes the next one to the first slot at least one period after it:
    /// missed slots are skipped, never delivered in a burst, and two firings are never less
    /// than `timeout` apart.
    ///
    /// # Panics
    /// Panics if `mode` is [`TimerMode::Pulse`] and `timeout` is zero.
    pub fn start(&self, timeout: Duration, mode: TimerMode) {
        assert!(
            mode == TimerMode::Once || !timeout.is_zero(),
            "periodic timer started with a zero period"
        );

        self.stop();

        let generation = {
            let mut slot = self.shared.slot();
            slot.timeout = timeout;
            slot.mode = mode;

            if self.injector.clock.is_stopped() {
                tracing::warn!(?timeout, ?mode, "timer not armed: clock has stopped");
                return;
            }

            // A concurrent start may have armed the slot since our stop released it.
            slot.cancel();
            slot.running = true;
            slot.generation
        };

        // Spawned without the slot lock: a task refused by a stopped clock is dropped on
        // the spot, and dropping it takes the lock to disarm the slot.
        let task = self.injector.clock.spawn(fire(
            Armed {
                shared: Arc::clone(&self.shared),
                generation,
            },
            self.injector.clone(),
            Instant::now() + timeout,
            timeout,
            mode,
        ));

        let mut slot = self.shared.slot();
        if slot.generation != generation {
            task.abort();
            return;
        }
        if self.injector.clock.is_stopped() {
            tracing::warn!(?timeout, ?mode, "timer not armed: clock stopped while arming");
            slot.cancel();
            self.shared.changed.notify_all();
            task.abort();
            return;
        }
        slot.task = Some(task);
        tracing::debug!(?timeout, ?mode, "timer armed");
    }

    /// Re-arm with the last configured timeout and mode.
    pub fn restart(&self) -> Result<(), TimerError> {
        let (timeout, mode) = {
            let slot = self.shared.slot();
            (slot.timeout, slot.mode)
        };
        if timeout.is_zero() {
            return Err(TimerError::NotConfigured);
        }
        self.start(timeout, mode);
        Ok(())
    }

    /// Cancel the timer. Idempotent.
    ///
    /// Once this returns, no firing of the current arming will be delivered: a firing
    /// already being delivered on the clock thread is waited for, unless `stop` is
    /// called from within that delivery.
    pub fn stop(&self) {
        let mut slot = self.shared.slot();
        if slot.running {
            tracing::debug!("timer cancelled");
        }
        slot.cancel();
        self.shared.changed.notify_all();

        if slot.delivering && !self.injector.clock.is_current() {
            let _slot = self
                .shared
                .changed
                .wait_while(slot, |slot| slot.delivering)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the current arming is over: a one-shot timer has fired and its event
    /// has been processed, or the timer was stopped (directly or with its clock). Returns
    /// at once if the timer isn't running. A periodic timer only ends when stopped.
    ///
    /// # Panics
    /// Panics if called on the clock thread. Calling it from a hook of the dispatcher the
    /// timer feeds deadlocks, since the firing needs the dispatch lock that hook holds.
    pub fn wait(&self) {
        assert!(
            !self.injector.clock.is_current(),
            "timer waited on from the clock thread"
        );
        let slot = self.shared.slot();
        let _slot = self
            .shared
            .changed
            .wait_while(slot, |slot| slot.running)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Whether the timer is armed.
    pub fn is_running(&self) -> bool {
        self.shared.slot().running
    }

    /// The last configured timeout, zero if never started.
    pub fn timeout(&self) -> Duration {
        self.shared.slot().timeout
    }

    /// The last configured mode.
    pub fn mode(&self) -> TimerMode {
        self.shared.slot().mode
    }
}

impl<E: Event> Drop for Timer<E> {
    fn drop(&mut self) {
        self.shared.slot().cancel();
    }
}

/// Ties a spawned firing task to its arming. However the task ends (completed, aborted,
/// or dropped unpolled by a stopped clock), the slot no longer reports it as running.
struct Armed<E> {
    shared: Arc<TimerShared<E>>,
    generation: u64,
}

impl<E> Drop for Armed<E> {
    fn drop(&mut self) {
        self.shared.finish(self.generation);
    }
}

async fn fire<E: Event>(
    armed: Armed<E>,
    injector: Injector<E>,
    deadline: Instant,
    period: Duration,
    mode: TimerMode,
) {
    let firing = Firing {
        timer: &*armed.shared,
        generation: armed.generation,
    };

    match mode {
        TimerMode::Once => {
            sleep_until(deadline).await;
            deliver(&injector, &firing).await;
        }
        TimerMode::Pulse => {
            let mut next = deadline;
            loop {
                sleep_until(next).await;
                let fired = Instant::now();
                let delivered = deliver(&injector, &firing).await;
                if !delivered || !armed.shared.is_current(armed.generation) {
                    break;
                }
                // Next slot on the schedule anchored at start, at least one period after this firing.
                next += period;
                while next < fired + period {
                    next += period;
                }
            }
        }
    }
}

async fn deliver<E: Event>(injector: &Injector<E>, firing: &Firing<'_, E>) -> bool {
    match injector.sink() {
        Some(sink) => {
            tracing::trace!(generation = firing.generation, "timer fired");
            sink.deliver(firing).await;
            true
        }
        None => false,
    }
}
