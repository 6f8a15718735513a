//! Builder pattern implementation for state machines

use crate::fsm::{Event, NoTransition, Rule, State, SuperstateFn, Target};
use crate::{Error, StateMachine};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Builder for constructing state machines
///
/// The transition table is plain data: each `(state, event kind)` pair maps to at most one
/// [`Rule`]. Declaring a second rule for the same pair makes [`build`](Self::build) fail.
pub struct StateMachineBuilder<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    context: C,
    initial_state: Option<S>,
    states: HashMap<S, State<E, C>>,
    rules: Vec<(S, E::Kind, Rule<S, E, C>)>,
    superstate_fn: Option<SuperstateFn<S>>,
    no_transition: Option<NoTransition<S, E, C>>,
}

impl<S, E, C> StateMachineBuilder<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    /// Create a new builder with the given context
    pub fn new(context: C) -> Self {
        Self {
            context,
            initial_state: None,
            states: HashMap::new(),
            rules: Vec::new(),
            superstate_fn: None,
            no_transition: None,
        }
    }

    /// Set the state entered by [`StateMachine::start`]
    pub fn initial(mut self, state_id: S) -> Self {
        self.initial_state = Some(state_id);
        self
    }

    /// Add a state to the state machine
    pub fn state(mut self, state_id: S, state: State<E, C>) -> Self {
        self.states.insert(state_id, state);
        self
    }

    /// Add a transition rule for `event` while in `state_id`
    pub fn rule(mut self, state_id: S, event: E::Kind, rule: Rule<S, E, C>) -> Self {
        self.rules.push((state_id, event, rule));
        self
    }

    /// Set the superstate function for hierarchical behavior
    pub fn superstate_fn<F>(mut self, func: F) -> Self
    where
        F: Fn(&S) -> Option<S> + Send + Sync + 'static,
    {
        self.superstate_fn = Some(Box::new(func));
        self
    }

    /// Replace the default no-transition handler, which logs the state and event kind
    pub fn no_transition<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&S, &E, &mut C) + Send + 'static,
    {
        self.no_transition = Some(Box::new(handler));
        self
    }

    /// Validate the definition and build the state machine
    pub fn build(self) -> Result<StateMachine<S, E, C>, Error<S>> {
        let initial_state = self.initial_state.ok_or(Error::NoInitialState)?;
        if !self.states.contains_key(&initial_state) {
            return Err(Error::StateNotRegistered(initial_state));
        }

        let mut rules = HashMap::with_capacity(self.rules.len());
        for (state_id, kind, rule) in self.rules {
            if !self.states.contains_key(&state_id) {
                return Err(Error::StateNotRegistered(state_id));
            }
            if let Target::To(target) = rule.target() {
                if !self.states.contains_key(target) {
                    return Err(Error::StateNotRegistered(target.clone()));
                }
            }
            if rules.contains_key(&(state_id.clone(), kind)) {
                return Err(Error::DuplicateRule(state_id, format!("{:?}", kind)));
            }
            rules.insert((state_id, kind), rule);
        }

        let no_transition = self.no_transition.unwrap_or_else(|| {
            Box::new(|state: &S, event: &E, _: &mut C| {
                tracing::info!(state = ?state, event = ?event.kind(), "no transition");
            })
        });

        Ok(StateMachine::new(
            self.context,
            initial_state,
            self.states,
            rules,
            self.superstate_fn,
            no_transition,
        ))
    }
}
