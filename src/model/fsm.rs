use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    event: String,
    target: String,
    actions: Vec<String>,
}

impl Transition {
    pub fn new(event: impl Into<String>, target: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            event: event.into(),
            target: target.into(),
            actions,
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn actions(&self) -> &[String] {
        &self.actions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    name: String,
    on_entry: Vec<String>,
    on_exit: Vec<String>,
    transitions: HashMap<String, Transition>,
}

impl State {
    /// Build a state; `transitions` must already be unique per triggering event.
    pub fn new(
        name: impl Into<String>,
        on_entry: Vec<String>,
        on_exit: Vec<String>,
        transitions: impl IntoIterator<Item = Transition>,
    ) -> Self {
        Self {
            name: name.into(),
            on_entry,
            on_exit,
            transitions: transitions
                .into_iter()
                .map(|t| (t.event.clone(), t))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_entry(&self) -> &[String] {
        &self.on_entry
    }

    pub fn on_exit(&self) -> &[String] {
        &self.on_exit
    }

    pub fn transition(&self, event: &str) -> Option<&Transition> {
        self.transitions.get(event)
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.values()
    }
}

/// A validated FSM: the initial state and every transition target name an existing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmDefinition {
    name: String,
    states: HashMap<String, State>,
    initial: String,
}

/// Reasons a state table cannot form an FSM.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FsmDefinitionError {
    #[error("fsm has no states")]
    NoStates,

    #[error("initial state ({0}) does not exist")]
    UnknownInitial(String),

    #[error("transition on ({event}) from ({from}) targets unknown state ({target})")]
    UnknownTarget {
        from: String,
        event: String,
        target: String,
    },
}

impl FsmDefinition {
    pub fn new(
        name: impl Into<String>,
        states: impl IntoIterator<Item = State>,
        initial: impl Into<String>,
    ) -> Result<Self, FsmDefinitionError> {
        let states: HashMap<String, State> = states
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        let initial = initial.into();

        if states.is_empty() {
            return Err(FsmDefinitionError::NoStates);
        }
        if !states.contains_key(&initial) {
            return Err(FsmDefinitionError::UnknownInitial(initial));
        }
        for state in states.values() {
            for transition in state.transitions() {
                if !states.contains_key(transition.target()) {
                    return Err(FsmDefinitionError::UnknownTarget {
                        from: state.name.clone(),
                        event: transition.event.clone(),
                        target: transition.target.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name: name.into(),
            states,
            initial,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn initial(&self) -> &str {
        &self.initial
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub(crate) fn into_parts(self) -> (String, HashMap<String, State>, String) {
        (self.name, self.states, self.initial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(name: &str, transitions: Vec<Transition>) -> State {
        State::new(name, vec![], vec![], transitions)
    }

    #[test]
    fn test_valid_definition() {
        let def = FsmDefinition::new(
            "m1",
            vec![
                state("s1", vec![Transition::new("e1", "s2", vec![])]),
                state("s2", vec![]),
            ],
            "s1",
        )
        .unwrap();

        assert_eq!(def.initial(), "s1");
        assert_eq!(
            def.state("s1").unwrap().transition("e1").unwrap().target(),
            "s2"
        );
        assert!(def.state("s2").unwrap().transition("e1").is_none());
    }

    #[test]
    fn test_unknown_initial() {
        let result = FsmDefinition::new("m1", vec![state("s1", vec![])], "nope");
        assert_eq!(
            result.unwrap_err(),
            FsmDefinitionError::UnknownInitial("nope".into())
        );
    }

    #[test]
    fn test_unknown_target() {
        let result = FsmDefinition::new(
            "m1",
            vec![state("s1", vec![Transition::new("e1", "ghost", vec![])])],
            "s1",
        );
        assert!(matches!(
            result,
            Err(FsmDefinitionError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn test_empty() {
        let result = FsmDefinition::new("m1", Vec::<State>::new(), "s1");
        assert_eq!(result.unwrap_err(), FsmDefinitionError::NoStates);
    }
}
