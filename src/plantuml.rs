//! PlantUML diagram generation

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use crate::fsm::{SuperstateFn, Target};

/// One row of the transition table, borrowed for rendering
pub(crate) struct RuleLine<'a, S, K> {
    pub from: &'a S,
    pub kind: K,
    pub target: &'a Target<S>,
    pub guarded: bool,
    pub acts: bool,
}

/// Generate PlantUML diagram from the declared states and rules
pub(crate) fn generate_plantuml<'a, S, K>(
    states: impl Iterator<Item = &'a S>,
    rules: &[RuleLine<'a, S, K>],
    initial_state: &S,
    current_state: Option<&S>,
    superstate_fn: &SuperstateFn<S>,
) -> String
where
    S: Clone + Debug + Eq + Hash + 'a,
    K: Debug,
{
    let mut plantuml = String::new();
    plantuml.push_str("@startuml\n");
    plantuml.push_str("skinparam state {\n");
    plantuml.push_str("  BackgroundColor<<Current>> YellowGreen\n");
    plantuml.push_str("}\n\n");

    plantuml.push_str(&format!("[*] --> {:?}\n", initial_state));

    // Hierarchy relationships first
    let mut seen: HashSet<S> = HashSet::new();
    let mut declared: Vec<&S> = states.collect();
    declared.sort_by_key(|state| format!("{:?}", state));
    for state in &declared {
        if let Some(parent) = superstate_fn(*state) {
            plantuml.push_str(&format!("{:?} -up-> {:?} : parent\n", state, parent));
            seen.insert((*state).clone());
            seen.insert(parent);
        }
    }

    for rule in rules {
        let mut label = format!("{:?}", rule.kind);
        if rule.guarded {
            label.push_str(" [guard]");
        }
        if rule.acts {
            label.push_str(" / action");
        }

        match rule.target {
            Target::To(to) => {
                plantuml.push_str(&format!("{:?} --> {:?} : {}\n", rule.from, to, label));
                seen.insert(to.clone());
            }
            // Internal transitions are listed inside the state
            Target::Internal => {
                plantuml.push_str(&format!("{:?} : {}\n", rule.from, label));
            }
        }
        seen.insert(rule.from.clone());
    }

    // States without rules or parents
    for state in declared {
        if !seen.contains(state) {
            plantuml.push_str(&format!("state {:?}\n", state));
        }
    }

    if let Some(current) = current_state {
        plantuml.push_str(&format!("state {:?} <<Current>>\n", current));
    }

    plantuml.push_str("@enduml\n");
    plantuml
}
