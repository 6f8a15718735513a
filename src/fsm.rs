/// A data-driven hierarchical finite state machine (FSM) engine with guarded transitions,
/// entry/exit hooks, internal transitions and an explicit fallback for unmatched events.
///
/// # Type Parameters
/// - `S`: State identifier type. Must implement `Hash`, `Eq`, `Clone`, `Send`, and `Debug`.
/// - `E`: Event type. Implements [`Event`] so each value maps to a field-less kind tag.
/// - `C`: Context type owned by the machine (domain data, timers). Must implement `Send`.
///
/// # Features
/// - Transition table keyed by `(state, event kind)`; no runtime type inspection.
/// - Guards and actions as closures over the context and the triggering event.
/// - Internal transitions ([`Rule::internal`]) that run an action without exit/entry.
/// - Hierarchical (superstate) lookup via a user-provided function.
/// - Optional PlantUML export of the declared table (`plantuml` feature, debug builds).
///
/// # Usage
/// 1. Describe each state as a [`State`] record of optional entry/exit hooks.
/// 2. Declare rules with [`Rule::to`] or [`Rule::internal`] on a [`StateMachineBuilder`](crate::StateMachineBuilder).
/// 3. Call [`StateMachine::start`] once to enter the initial state.
/// 4. Call [`StateMachine::dispatch`] for every event.
///
/// # Errors
/// Misuse (dispatch before start, double start) is reported as [`Error`]. An event
/// without a matching, guard-accepting rule is *not* an error: it yields
/// [`Outcome::Unhandled`] and is reported to the no-transition handler.
use std::{collections::HashMap, fmt::Debug, hash::Hash};

use crate::Error;

/// An event that can be fed to a [`StateMachine`].
///
/// The event set is expected to be an enum; [`Event::Kind`] is its field-less tag and
/// is what the transition table is keyed on.
pub trait Event: Send + 'static {
    /// Tag identifying the variant of an event.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Returns the tag of this event.
    fn kind(&self) -> Self::Kind;
}

/// What caused an entry or exit hook to run.
#[derive(Debug)]
pub enum Trigger<'a, E> {
    /// The machine is entering its initial state from [`StateMachine::start`].
    Initial,
    /// A dispatched event fired a transition.
    Event(&'a E),
}

impl<E> Clone for Trigger<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Trigger<'_, E> {}

impl<'a, E> Trigger<'a, E> {
    /// The triggering event, if any.
    pub fn event(&self) -> Option<&'a E> {
        match self {
            Trigger::Initial => None,
            Trigger::Event(event) => Some(event),
        }
    }
}

pub(crate) type Hook<E, C> = Box<dyn FnMut(Trigger<'_, E>, &mut C) + Send>;
pub(crate) type Guard<E, C> = Box<dyn Fn(&C, &E) -> bool + Send>;
pub(crate) type Action<E, C> = Box<dyn FnMut(&mut C, &E) + Send>;
pub(crate) type NoTransition<S, E, C> = Box<dyn FnMut(&S, &E, &mut C) + Send>;
pub(crate) type SuperstateFn<S> = Box<dyn Fn(&S) -> Option<S> + Send + Sync>;

/// A state: a record of optional entry and exit hooks.
pub struct State<E, C> {
    on_entry: Option<Hook<E, C>>,
    on_exit: Option<Hook<E, C>>,
}

impl<E, C> Default for State<E, C> {
    fn default() -> Self {
        Self {
            on_entry: None,
            on_exit: None,
        }
    }
}

impl<E, C> State<E, C> {
    /// A state with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook run when the state becomes current.
    pub fn on_entry<F>(mut self, hook: F) -> Self
    where
        F: FnMut(Trigger<'_, E>, &mut C) + Send + 'static,
    {
        self.on_entry = Some(Box::new(hook));
        self
    }

    /// Hook run when the state stops being current.
    pub fn on_exit<F>(mut self, hook: F) -> Self
    where
        F: FnMut(Trigger<'_, E>, &mut C) + Send + 'static,
    {
        self.on_exit = Some(Box::new(hook));
        self
    }
}

/// Where a rule leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target<S> {
    /// External transition: exit the current state, enter `S` (even when it is the same state).
    To(S),
    /// Internal transition: run the action only, no exit/entry, state unchanged.
    Internal,
}

/// A transition rule: target plus optional guard and action.
pub struct Rule<S, E, C> {
    target: Target<S>,
    guard: Option<Guard<E, C>>,
    action: Option<Action<E, C>>,
}

impl<S, E, C> Rule<S, E, C> {
    /// External transition to `target`.
    pub fn to(target: S) -> Self {
        Self {
            target: Target::To(target),
            guard: None,
            action: None,
        }
    }

    /// Internal transition.
    pub fn internal() -> Self {
        Self {
            target: Target::Internal,
            guard: None,
            action: None,
        }
    }

    /// Predicate deciding whether the rule fires. A rejection is reported like a missing rule.
    pub fn guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&C, &E) -> bool + Send + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Side effect run when the rule fires, between the exit and entry hooks.
    pub fn action<F>(mut self, action: F) -> Self
    where
        F: FnMut(&mut C, &E) + Send + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// The rule's target.
    pub fn target(&self) -> &Target<S> {
        &self.target
    }

    #[cfg(all(feature = "plantuml", debug_assertions))]
    pub(crate) fn has_guard(&self) -> bool {
        self.guard.is_some()
    }

    #[cfg(all(feature = "plantuml", debug_assertions))]
    pub(crate) fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

/// Result of dispatching one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<S> {
    /// An external rule fired.
    Transitioned {
        /// State before the event.
        from: S,
        /// State after the event.
        to: S,
    },
    /// An internal rule fired; the state is unchanged.
    Internal(S),
    /// No rule matched or every candidate guard rejected; the state is unchanged.
    Unhandled(S),
}

impl<S> Outcome<S> {
    /// The current state after the event.
    pub fn state(&self) -> &S {
        match self {
            Outcome::Transitioned { to, .. } => to,
            Outcome::Internal(state) | Outcome::Unhandled(state) => state,
        }
    }

    /// Whether a rule fired.
    pub fn is_handled(&self) -> bool {
        !matches!(self, Outcome::Unhandled(_))
    }
}

/// A hierarchical finite state machine.
pub struct StateMachine<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    states: HashMap<S, State<E, C>>,
    rules: HashMap<(S, E::Kind), Rule<S, E, C>>,
    superstate_fn: SuperstateFn<S>,
    no_transition: NoTransition<S, E, C>,
    initial_state: S,
    current_state: Option<S>,
    context: C,
}

impl<S, E, C> StateMachine<S, E, C>
where
    S: Hash + Eq + Clone + Send + Debug + 'static,
    E: Event,
    C: Send + 'static,
{
    pub(crate) fn new(
        context: C,
        initial_state: S,
        states: HashMap<S, State<E, C>>,
        rules: HashMap<(S, E::Kind), Rule<S, E, C>>,
        superstate_fn: Option<SuperstateFn<S>>,
        no_transition: NoTransition<S, E, C>,
    ) -> Self {
        Self {
            states,
            rules,
            superstate_fn: superstate_fn.unwrap_or_else(|| Box::new(|_| None)),
            no_transition,
            initial_state,
            current_state: None,
            context,
        }
    }

    /// Enter the initial state, running its entry hook with [`Trigger::Initial`].
    pub fn start(&mut self) -> Result<(), Error<S>> {
        if let Some(current) = &self.current_state {
            return Err(Error::AlreadyStarted(current.clone()));
        }

        let initial = self.initial_state.clone();
        tracing::debug!(state = ?initial, "entering initial state");
        self.current_state = Some(initial.clone());
        self.enter(&initial, Trigger::Initial);
        Ok(())
    }

    /// Process an event.
    pub fn dispatch(&mut self, event: &E) -> Result<Outcome<S>, Error<S>> {
        let current = self.current_state.clone().ok_or(Error::NotStarted)?;
        let kind = event.kind();

        // Walk up the hierarchy; bounded so a cyclic superstate function cannot spin.
        let mut level = Some(current.clone());
        let mut remaining = self.states.len();
        while let Some(state) = level {
            if remaining == 0 {
                break;
            }
            remaining -= 1;

            let key = (state, kind);
            if let Some(rule) = self.rules.get(&key) {
                let accepted = rule
                    .guard
                    .as_ref()
                    .map_or(true, |guard| guard(&self.context, event));
                if accepted {
                    return Ok(self.fire(current, &key, event));
                }
                tracing::trace!(state = ?key.0, event = ?kind, "guard rejected");
            }
            level = (self.superstate_fn)(&key.0);
        }

        (self.no_transition)(&current, event, &mut self.context);
        Ok(Outcome::Unhandled(current))
    }

    fn fire(&mut self, current: S, key: &(S, E::Kind), event: &E) -> Outcome<S> {
        let target = match self.rules.get(key) {
            Some(rule) => rule.target.clone(),
            None => return Outcome::Unhandled(current),
        };
        let trigger = Trigger::Event(event);

        if let Target::To(_) = target {
            self.exit(&current, trigger);
        }

        if let Some(action) = self.rules.get_mut(key).and_then(|rule| rule.action.as_mut()) {
            action(&mut self.context, event);
        }

        match target {
            Target::Internal => Outcome::Internal(current),
            Target::To(to) => {
                tracing::debug!(from = ?current, to = ?to, event = ?key.1, "transition");
                self.current_state = Some(to.clone());
                self.enter(&to, trigger);
                Outcome::Transitioned { from: current, to }
            }
        }
    }

    fn enter(&mut self, state: &S, trigger: Trigger<'_, E>) {
        if let Some(hook) = self.states.get_mut(state).and_then(|s| s.on_entry.as_mut()) {
            hook(trigger, &mut self.context);
        }
    }

    fn exit(&mut self, state: &S, trigger: Trigger<'_, E>) {
        if let Some(hook) = self.states.get_mut(state).and_then(|s| s.on_exit.as_mut()) {
            hook(trigger, &mut self.context);
        }
    }

    /// Get the current state, `None` until [`StateMachine::start`] is called
    pub fn current_state(&self) -> Option<S> {
        self.current_state.clone()
    }

    /// The declared initial state
    pub fn initial_state(&self) -> &S {
        &self.initial_state
    }

    /// Whether [`StateMachine::start`] has run
    pub fn is_started(&self) -> bool {
        self.current_state.is_some()
    }

    /// Get a reference to the context
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Get a mutable reference to the context
    pub fn context_mut(&mut self) -> &mut C {
        &mut self.context
    }

    /// Render the declared table as a PlantUML state diagram, highlighting the current state.
    #[cfg(all(feature = "plantuml", debug_assertions))]
    pub fn export_plantuml(&self) -> String {
        let mut rules: Vec<crate::plantuml::RuleLine<'_, S, E::Kind>> = self
            .rules
            .iter()
            .map(|((from, kind), rule)| crate::plantuml::RuleLine {
                from,
                kind: *kind,
                target: &rule.target,
                guarded: rule.has_guard(),
                acts: rule.has_action(),
            })
            .collect();
        rules.sort_by_key(|rule| format!("{:?} {:?}", rule.from, rule.kind));

        crate::plantuml::generate_plantuml(
            self.states.keys(),
            &rules,
            &self.initial_state,
            self.current_state.as_ref(),
            &self.superstate_fn,
        )
    }

    /// Stub for export_plantuml when feature is disabled
    #[cfg(not(all(feature = "plantuml", debug_assertions)))]
    pub fn export_plantuml(&self) -> String {
        String::from("PlantUML export not available (requires 'plantuml' feature and debug build)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateMachineBuilder;

    // Test state enum
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum TestState {
        Root,
        Menu,
        Settings,
        Display,
    }

    // Test event enum
    #[derive(Debug, Clone)]
    enum TestEvent {
        Enter,
        Back,
        Up,
        Down,
        Select,
        Refresh,
        Timeout,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum TestKind {
        Enter,
        Back,
        Up,
        Down,
        Select,
        Refresh,
        Timeout,
    }

    impl Event for TestEvent {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            match self {
                TestEvent::Enter => TestKind::Enter,
                TestEvent::Back => TestKind::Back,
                TestEvent::Up => TestKind::Up,
                TestEvent::Down => TestKind::Down,
                TestEvent::Select => TestKind::Select,
                TestEvent::Refresh => TestKind::Refresh,
                TestEvent::Timeout => TestKind::Timeout,
            }
        }
    }

    // Test context
    #[derive(Debug, Default)]
    struct TestContext {
        value: i32,
        locked: bool,
        entries: Vec<String>,
        exits: Vec<String>,
        actions: Vec<String>,
        unhandled: Vec<(TestState, TestKind)>,
    }

    fn tracked(name: &'static str) -> State<TestEvent, TestContext> {
        State::new()
            .on_entry(move |_, ctx: &mut TestContext| ctx.entries.push(name.to_string()))
            .on_exit(move |_, ctx: &mut TestContext| ctx.exits.push(name.to_string()))
    }

    // function to chose superstate
    fn superstate_fn(state: &TestState) -> Option<TestState> {
        match state {
            TestState::Menu | TestState::Settings => Some(TestState::Root),
            TestState::Display => Some(TestState::Settings),
            _ => None,
        }
    }

    fn builder(initial: TestState) -> StateMachineBuilder<TestState, TestEvent, TestContext> {
        StateMachineBuilder::new(TestContext::default())
            .initial(initial)
            .state(TestState::Root, tracked("Root"))
            .state(TestState::Menu, tracked("Menu"))
            .state(TestState::Settings, tracked("Settings"))
            .state(TestState::Display, tracked("Display"))
            .rule(
                TestState::Root,
                TestKind::Enter,
                Rule::to(TestState::Menu)
                    .action(|ctx: &mut TestContext, _| ctx.actions.push("Root->Menu".into())),
            )
            .rule(
                TestState::Menu,
                TestKind::Back,
                Rule::to(TestState::Root)
                    .action(|ctx: &mut TestContext, _| ctx.actions.push("Menu->Root".into())),
            )
            .rule(TestState::Menu, TestKind::Select, Rule::to(TestState::Settings))
            .rule(
                TestState::Menu,
                TestKind::Up,
                Rule::internal().action(|ctx: &mut TestContext, _| ctx.value += 1),
            )
            .rule(
                TestState::Menu,
                TestKind::Down,
                Rule::internal().action(|ctx: &mut TestContext, _| ctx.value -= 1),
            )
            .rule(
                TestState::Menu,
                TestKind::Refresh,
                Rule::to(TestState::Menu)
                    .action(|ctx: &mut TestContext, _| ctx.actions.push("refresh".into())),
            )
            .rule(TestState::Settings, TestKind::Select, Rule::to(TestState::Display))
            .rule(TestState::Settings, TestKind::Back, Rule::to(TestState::Menu))
            .rule(
                TestState::Display,
                TestKind::Up,
                Rule::internal()
                    .guard(|ctx: &TestContext, _| !ctx.locked)
                    .action(|ctx: &mut TestContext, _| ctx.value += 10),
            )
            .rule(
                TestState::Display,
                TestKind::Down,
                Rule::internal().action(|ctx: &mut TestContext, _| ctx.value -= 10),
            )
            .superstate_fn(superstate_fn)
            .no_transition(|state: &TestState, event: &TestEvent, ctx: &mut TestContext| {
                ctx.unhandled.push((state.clone(), event.kind()))
            })
    }

    fn create_test_fsm(initial: TestState) -> StateMachine<TestState, TestEvent, TestContext> {
        builder(initial).build().unwrap()
    }

    #[test]
    fn test_start() {
        let mut fsm = create_test_fsm(TestState::Root);

        // Nothing is current before start
        assert_eq!(fsm.current_state(), None);
        assert!(!fsm.is_started());

        fsm.start().unwrap();

        assert_eq!(fsm.current_state(), Some(TestState::Root));
        assert_eq!(fsm.context().entries, vec!["Root"]);
        assert!(fsm.context().exits.is_empty());
    }

    #[test]
    fn test_initial_entry_sees_initial_trigger() {
        let mut fsm = StateMachineBuilder::<TestState, TestEvent, Vec<bool>>::new(Vec::new())
            .initial(TestState::Root)
            .state(
                TestState::Root,
                State::new().on_entry(|trigger: Trigger<'_, TestEvent>, seen: &mut Vec<bool>| {
                    seen.push(trigger.event().is_none())
                }),
            )
            .state(TestState::Menu, State::new())
            .rule(TestState::Root, TestKind::Enter, Rule::to(TestState::Root))
            .build()
            .unwrap();

        fsm.start().unwrap();
        fsm.dispatch(&TestEvent::Enter).unwrap();

        assert_eq!(fsm.context(), &vec![true, false]);
    }

    #[test]
    fn test_basic_transitions() {
        let mut fsm = create_test_fsm(TestState::Root);
        fsm.start().unwrap();

        let outcome = fsm.dispatch(&TestEvent::Enter).unwrap();
        assert_eq!(
            outcome,
            Outcome::Transitioned {
                from: TestState::Root,
                to: TestState::Menu
            }
        );
        assert_eq!(fsm.current_state(), Some(TestState::Menu));
        assert_eq!(fsm.context().actions, vec!["Root->Menu"]);
        assert_eq!(fsm.context().entries, vec!["Root", "Menu"]);
        assert_eq!(fsm.context().exits, vec!["Root"]);

        fsm.dispatch(&TestEvent::Back).unwrap();
        assert_eq!(fsm.current_state(), Some(TestState::Root));
        assert_eq!(fsm.context().actions, vec!["Root->Menu", "Menu->Root"]);
    }

    #[test]
    fn test_hook_order() {
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let (a, b, c) = (order.clone(), order.clone(), order.clone());

        let mut fsm = StateMachineBuilder::<TestState, TestEvent, ()>::new(())
            .initial(TestState::Root)
            .state(
                TestState::Root,
                State::new().on_exit(move |_, _: &mut ()| a.lock().unwrap().push("exit Root")),
            )
            .state(
                TestState::Menu,
                State::new().on_entry(move |_, _: &mut ()| b.lock().unwrap().push("enter Menu")),
            )
            .rule(
                TestState::Root,
                TestKind::Enter,
                Rule::to(TestState::Menu)
                    .action(move |_: &mut (), _: &TestEvent| c.lock().unwrap().push("action")),
            )
            .build()
            .unwrap();

        fsm.start().unwrap();
        fsm.dispatch(&TestEvent::Enter).unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["exit Root", "action", "enter Menu"]
        );
    }

    #[test]
    fn test_internal_transition_skips_hooks() {
        let mut fsm = create_test_fsm(TestState::Menu);
        fsm.start().unwrap();

        let outcome = fsm.dispatch(&TestEvent::Up).unwrap();
        assert_eq!(outcome, Outcome::Internal(TestState::Menu));
        assert_eq!(fsm.context().value, 1);
        assert_eq!(fsm.current_state(), Some(TestState::Menu));

        // Only the initial entry, no exit
        assert_eq!(fsm.context().entries, vec!["Menu"]);
        assert!(fsm.context().exits.is_empty());
    }

    #[test]
    fn test_external_self_transition_runs_hooks() {
        let mut fsm = create_test_fsm(TestState::Menu);
        fsm.start().unwrap();

        let outcome = fsm.dispatch(&TestEvent::Refresh).unwrap();
        assert_eq!(
            outcome,
            Outcome::Transitioned {
                from: TestState::Menu,
                to: TestState::Menu
            }
        );
        assert_eq!(fsm.context().entries, vec!["Menu", "Menu"]);
        assert_eq!(fsm.context().exits, vec!["Menu"]);
        assert_eq!(fsm.context().actions, vec!["refresh"]);
    }

    #[test]
    fn test_superstate_delegation() {
        let mut fsm = create_test_fsm(TestState::Settings);
        fsm.start().unwrap();

        // Settings has no Enter rule, Root does
        fsm.dispatch(&TestEvent::Enter).unwrap();
        assert_eq!(fsm.current_state(), Some(TestState::Menu));

        // The leaf is exited, not the ancestor that owns the rule
        assert_eq!(fsm.context().exits, vec!["Settings"]);
    }

    #[test]
    fn test_deep_hierarchy() {
        let mut fsm = create_test_fsm(TestState::Display);
        fsm.start().unwrap();

        fsm.dispatch(&TestEvent::Up).unwrap();
        assert_eq!(fsm.context().value, 10);
        assert_eq!(fsm.current_state(), Some(TestState::Display));

        // Display -> Settings (Back) found one level up
        fsm.dispatch(&TestEvent::Back).unwrap();
        assert_eq!(fsm.current_state(), Some(TestState::Menu));
    }

    #[test]
    fn test_guard_rejection_falls_through_to_superstate() {
        let mut fsm = create_test_fsm(TestState::Display);
        fsm.start().unwrap();
        fsm.context_mut().locked = true;

        // Display's Up guard rejects; neither Settings nor Root handle Up
        let outcome = fsm.dispatch(&TestEvent::Up).unwrap();
        assert_eq!(outcome, Outcome::Unhandled(TestState::Display));
        assert_eq!(fsm.context().value, 0);
        assert_eq!(
            fsm.context().unhandled,
            vec![(TestState::Display, TestKind::Up)]
        );
    }

    #[test]
    fn test_unhandled_event_leaves_state() {
        let mut fsm = create_test_fsm(TestState::Root);
        fsm.start().unwrap();

        let outcome = fsm.dispatch(&TestEvent::Timeout).unwrap();
        assert!(!outcome.is_handled());
        assert_eq!(outcome.state(), &TestState::Root);
        assert_eq!(fsm.current_state(), Some(TestState::Root));
        assert_eq!(
            fsm.context().unhandled,
            vec![(TestState::Root, TestKind::Timeout)]
        );

        // No hooks ran for the unmatched event
        assert_eq!(fsm.context().entries, vec!["Root"]);
        assert!(fsm.context().exits.is_empty());
    }

    #[test]
    fn test_error_conditions() {
        let mut fsm = create_test_fsm(TestState::Root);

        let result = fsm.dispatch(&TestEvent::Enter);
        assert!(matches!(result, Err(Error::NotStarted)));

        fsm.start().unwrap();
        let result = fsm.start();
        assert!(matches!(result, Err(Error::AlreadyStarted(TestState::Root))));

        // The failed second start did not re-run the entry hook
        assert_eq!(fsm.context().entries, vec!["Root"]);
    }

    #[test]
    fn test_cyclic_superstate_terminates() {
        let mut fsm = StateMachineBuilder::<TestState, TestEvent, ()>::new(())
            .initial(TestState::Root)
            .state(TestState::Root, State::new())
            .state(TestState::Menu, State::new())
            .superstate_fn(|state| match state {
                TestState::Root => Some(TestState::Menu),
                _ => Some(TestState::Root),
            })
            .build()
            .unwrap();

        fsm.start().unwrap();
        let outcome = fsm.dispatch(&TestEvent::Select).unwrap();
        assert_eq!(outcome, Outcome::Unhandled(TestState::Root));
    }

    #[test]
    fn test_multiple_transitions() {
        let mut fsm = create_test_fsm(TestState::Root);
        fsm.start().unwrap();

        fsm.dispatch(&TestEvent::Enter).unwrap(); // Root -> Menu
        fsm.dispatch(&TestEvent::Select).unwrap(); // Menu -> Settings
        fsm.dispatch(&TestEvent::Select).unwrap(); // Settings -> Display

        assert_eq!(fsm.current_state(), Some(TestState::Display));

        let expected_entries = vec!["Root", "Menu", "Settings", "Display"];
        let expected_exits = vec!["Root", "Menu", "Settings"];
        assert_eq!(fsm.context().entries, expected_entries);
        assert_eq!(fsm.context().exits, expected_exits);
    }

    #[test]
    fn test_context_modification() {
        let mut fsm = create_test_fsm(TestState::Menu);
        fsm.start().unwrap();

        fsm.context_mut().value = 42;

        fsm.dispatch(&TestEvent::Up).unwrap();
        assert_eq!(fsm.context().value, 43);

        fsm.dispatch(&TestEvent::Down).unwrap();
        assert_eq!(fsm.context().value, 42);
    }

    #[test]
    fn test_fold_over_table() {
        // Every event below has an accepting rule, so the final state is the fold of the table
        let table = |state: &TestState, event: &TestEvent| match (state, event) {
            (TestState::Root, TestEvent::Enter) => TestState::Menu,
            (TestState::Menu, TestEvent::Back) => TestState::Root,
            (TestState::Menu, TestEvent::Select) => TestState::Settings,
            (TestState::Settings, TestEvent::Select) => TestState::Display,
            (TestState::Settings, TestEvent::Back) => TestState::Menu,
            (TestState::Display, TestEvent::Back) => TestState::Menu,
            (TestState::Display, TestEvent::Enter) => TestState::Menu,
            (s, _) => s.clone(),
        };
        let sequence = [
            TestEvent::Enter,
            TestEvent::Up,
            TestEvent::Select,
            TestEvent::Select,
            TestEvent::Down,
            TestEvent::Back,
            TestEvent::Select,
            TestEvent::Back,
            TestEvent::Back,
            TestEvent::Enter,
        ];

        let mut fsm = create_test_fsm(TestState::Root);
        fsm.start().unwrap();
        let mut expected = TestState::Root;
        for event in &sequence {
            let outcome = fsm.dispatch(event).unwrap();
            assert!(outcome.is_handled(), "{:?} unhandled in {:?}", event, expected);
            expected = table(&expected, event);
            assert_eq!(fsm.current_state(), Some(expected.clone()));
        }
    }

    #[test]
    fn test_performance() {
        let mut fsm = create_test_fsm(TestState::Menu);
        fsm.start().unwrap();

        let start = std::time::Instant::now();

        for _ in 0..1000 {
            fsm.dispatch(&TestEvent::Up).unwrap();
            fsm.dispatch(&TestEvent::Down).unwrap();
        }

        let duration = start.elapsed();
        println!("Processed 2000 events in {:?}", duration);

        assert_eq!(fsm.current_state(), Some(TestState::Menu));
        assert_eq!(fsm.context().value, 0);
    }

    // Test PlantUML generation (only when feature is enabled)
    #[cfg(all(feature = "plantuml", debug_assertions))]
    #[test]
    fn test_plantuml_generation() {
        let mut fsm = create_test_fsm(TestState::Root);
        fsm.start().unwrap();
        fsm.dispatch(&TestEvent::Enter).unwrap();

        let plantuml = fsm.export_plantuml();

        assert!(plantuml.contains("@startuml"));
        assert!(plantuml.contains("@enduml"));
        assert!(plantuml.contains("[*] --> Root"));
        assert!(plantuml.contains("Root --> Menu : Enter / action"));
        assert!(plantuml.contains("Menu : Up / action"));
        assert!(plantuml.contains("Display : Up [guard] / action"));
        assert!(plantuml.contains("Menu -up-> Root : parent"));
        assert!(plantuml.contains("state Menu <<Current>>"));
    }

    #[cfg(not(all(feature = "plantuml", debug_assertions)))]
    #[test]
    fn test_plantuml_disabled() {
        let mut fsm = create_test_fsm(TestState::Root);
        fsm.start().unwrap();

        let plantuml = fsm.export_plantuml();
        assert!(plantuml.contains("PlantUML export not available"));
    }
}
