use std::collections::{HashMap, VecDeque};

use super::StateMachine;
use crate::model::{FsmDefinition, State};

/// The ordered work produced by one transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub event: String,
    pub from: String,
    pub to: String,
    /// On-exit actions of `from`.
    pub exit_actions: Vec<String>,
    /// The transition's own actions.
    pub actions: Vec<String>,
    /// On-entry actions of `to`.
    pub entry_actions: Vec<String>,
}

pub enum FsmInput {
    Event(String),
}

#[derive(Debug)]
pub enum FsmOutput {
    Transition(TransitionPlan),
}

/// Logical state of one FSM.
///
/// The current state always names a state in the table: it starts at the definition's initial
/// state and only ever moves to a transition target, which the definition has already checked.
#[derive(Debug)]
pub struct FsmMachine {
    name: String,
    states: HashMap<String, State>,
    current: String,
    pending: VecDeque<TransitionPlan>,
}

impl FsmMachine {
    pub fn new(definition: FsmDefinition) -> Self {
        let (name, states, initial) = definition.into_parts();
        Self {
            name,
            states,
            current: initial,
            pending: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn has_state(&self, state: &str) -> bool {
        self.states.contains_key(state)
    }

    fn process_event(&mut self, event: String) {
        let Some(state) = self.states.get(&self.current) else {
            return;
        };
        let Some(transition) = state.transition(&event) else {
            return;
        };
        let Some(target) = self.states.get(transition.target()) else {
            return;
        };

        let plan = TransitionPlan {
            from: self.current.clone(),
            to: target.name().to_string(),
            exit_actions: state.on_exit().to_vec(),
            actions: transition.actions().to_vec(),
            entry_actions: target.on_entry().to_vec(),
            event,
        };

        self.current = plan.to.clone();
        self.pending.push_back(plan);
    }
}

impl StateMachine for FsmMachine {
    type Input = FsmInput;
    type Output = FsmOutput;

    fn process_input(&mut self, input: Self::Input) {
        match input {
            FsmInput::Event(event) => self.process_event(event),
        }
    }

    fn poll_output(&mut self) -> Option<Self::Output> {
        self.pending.pop_front().map(FsmOutput::Transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Transition;

    fn actions(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn machine() -> FsmMachine {
        let definition = FsmDefinition::new(
            "m1",
            vec![
                State::new(
                    "s1",
                    actions(&["enter1"]),
                    actions(&["leave1", "leave1b"]),
                    vec![
                        Transition::new("e1", "s2", actions(&["a1"])),
                        Transition::new("loop", "s1", vec![]),
                    ],
                ),
                State::new(
                    "s2",
                    actions(&["enter2"]),
                    vec![],
                    vec![Transition::new("back", "s1", vec![])],
                ),
            ],
            "s1",
        )
        .unwrap();
        FsmMachine::new(definition)
    }

    #[test]
    fn test_starts_in_initial_state() {
        let mut machine = machine();
        assert_eq!(machine.current(), "s1");
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_transition_plan_ordering() {
        let mut machine = machine();
        machine.process_input(FsmInput::Event("e1".into()));

        assert_eq!(machine.current(), "s2");
        let Some(FsmOutput::Transition(plan)) = machine.poll_output() else {
            panic!("expected a transition");
        };
        assert_eq!(
            plan,
            TransitionPlan {
                event: "e1".into(),
                from: "s1".into(),
                to: "s2".into(),
                exit_actions: actions(&["leave1", "leave1b"]),
                actions: actions(&["a1"]),
                entry_actions: actions(&["enter2"]),
            }
        );
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_unmapped_event_is_noop() {
        let mut machine = machine();
        machine.process_input(FsmInput::Event("back".into()));
        machine.process_input(FsmInput::Event("unknown".into()));

        assert_eq!(machine.current(), "s1");
        assert!(machine.poll_output().is_none());
    }

    #[test]
    fn test_self_transition_runs_exit_and_entry() {
        let mut machine = machine();
        machine.process_input(FsmInput::Event("loop".into()));

        let Some(FsmOutput::Transition(plan)) = machine.poll_output() else {
            panic!("expected a transition");
        };
        assert_eq!(plan.from, plan.to);
        assert_eq!(plan.exit_actions, actions(&["leave1", "leave1b"]));
        assert_eq!(plan.entry_actions, actions(&["enter1"]));
    }

    #[test]
    fn test_current_state_always_valid() {
        let mut machine = machine();
        for event in ["e1", "e1", "back", "nope", "loop", "e1", "back"] {
            machine.process_input(FsmInput::Event(event.into()));
            assert!(machine.has_state(machine.current()));
        }
    }
}
