//! # Clocked Hierarchical State Machine
//!
//! A hierarchical finite state machine engine for reactive controllers, with one-shot
//! and periodic timers that inject events from a dedicated clock thread.
//!
//! ## Features
//!
//! - 📋 **Data-Driven Tables**: States are records of entry/exit hooks, transitions are
//!   `(state, event kind) -> rule` entries with optional guards and actions
//! - 🏗️ **Hierarchical States**: Unmatched events are looked up in superstates
//! - 🔁 **Internal Transitions**: Declared explicitly, never inferred from source == target
//! - ⏰ **Timers**: Cancellable one-shot timeouts and drift-free periodic pulses
//! - 🧵 **Serialized Dispatch**: External and timer events never run concurrently
//! - 📊 **PlantUML Export**: Diagram of the declared table (debug builds only)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clocked_fsm::prelude::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Lamp { Off, On }
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
//! enum Input { Press, Expired }
//!
//! impl Event for Input {
//!     type Kind = Input;
//!     fn kind(&self) -> Input { *self }
//! }
//!
//! struct Context { auto_off: Timer<Input> }
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let lamp = Dispatcher::new(|injector| {
//!     StateMachineBuilder::new(Context { auto_off: injector.timer(|| Input::Expired) })
//!         .initial(Lamp::Off)
//!         .state(Lamp::Off, State::new())
//!         .state(
//!             Lamp::On,
//!             State::new()
//!                 .on_entry(|_, ctx: &mut Context| {
//!                     ctx.auto_off.start(Duration::from_secs(30), TimerMode::Once)
//!                 })
//!                 .on_exit(|_, ctx: &mut Context| ctx.auto_off.stop()),
//!         )
//!         .rule(Lamp::Off, Input::Press, Rule::to(Lamp::On))
//!         .rule(Lamp::On, Input::Press, Rule::to(Lamp::Off))
//!         .rule(Lamp::On, Input::Expired, Rule::to(Lamp::Off))
//!         .build()
//! })?;
//!
//! lamp.start()?;
//! lamp.inject(Input::Press)?;
//! assert_eq!(lamp.current_state(), Some(Lamp::On));
//! lamp.stop()?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

mod builder;
mod clock;
mod dispatcher;
mod error;
mod fsm;
mod timer;

#[cfg(all(feature = "plantuml", debug_assertions))]
mod plantuml;

pub use builder::StateMachineBuilder;
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{Error, Result, TimerError};
pub use fsm::{Event, Outcome, Rule, State, StateMachine, Target, Trigger};
pub use timer::{Injector, Timer, TimerMode};

pub use std::time::Duration;

pub mod prelude {
    //! Prelude module for convenient imports
    pub use crate::{
        Dispatcher, DispatcherConfig, Error, Event, Outcome, Rule, State, StateMachine,
        StateMachineBuilder, Timer, TimerMode, Trigger,
    };
    pub use std::time::Duration;
}
