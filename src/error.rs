//! Error types for the state machine, its dispatcher and its timers

use std::fmt::Debug;
use thiserror::Error;

/// Result type alias for state machine operations
pub type Result<T, S> = std::result::Result<T, Error<S>>;

/// Errors that can occur during state machine operations
#[derive(Error, Debug)]
pub enum Error<S: Debug> {
    /// An event was dispatched before [`StateMachine::start`](crate::StateMachine::start)
    #[error("State machine not started")]
    NotStarted,

    /// `start` was called on a machine that is already running
    #[error("State machine already started (current state {0:?})")]
    AlreadyStarted(S),

    /// The builder was never given an initial state
    #[error("No initial state declared")]
    NoInitialState,

    /// A rule or the initial state refers to a state that wasn't registered with the builder
    #[error("State {0:?} not registered")]
    StateNotRegistered(S),

    /// Two rules were declared for the same (state, event kind) pair
    #[error("Duplicate rule for state {0:?} on event {1}")]
    DuplicateRule(S, String),

    /// `inject` was called from inside a hook of the same dispatcher
    #[error("Reentrant dispatch: inject called from within a state machine hook")]
    ReentrantDispatch,

    /// `Dispatcher::stop` was called from inside one of that dispatcher's hooks
    #[error("Reentrant stop: dispatcher stopped from within a state machine hook")]
    ReentrantStop,

    /// The dispatcher has been stopped and no longer accepts events
    #[error("Dispatcher stopped")]
    Stopped,

    /// The clock thread or its reactor could not be created
    #[error("Clock thread failed to start: {0}")]
    Clock(#[from] std::io::Error),

    /// A hook panicked while a timer event was delivered on the clock thread
    #[error("Clock thread panicked: {0}")]
    ClockPanicked(String),
}

/// Errors returned by [`Timer`](crate::Timer) operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// `restart` was called on a timer that was never given a non-zero timeout
    #[error("Timer has no configured timeout")]
    NotConfigured,
}
