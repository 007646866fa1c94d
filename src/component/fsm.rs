use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::info;

use super::Component;
use crate::model::FsmDefinition;
use crate::state_machine::StateMachine;
use crate::state_machine::fsm::{FsmInput, FsmMachine, FsmOutput};
use crate::trace::{CAT_STATE, TraceLog};

/// A running FSM.
///
/// The machine lock is held for the whole handling of one event, so transitions of the same FSM
/// never interleave. Readers observe the state through a `watch` channel that is updated once
/// the exit actions have finished.
#[derive(Debug)]
pub struct Fsm {
    name: String,
    pid: u32,
    machine: Mutex<FsmMachine>,
    state_tx: watch::Sender<Arc<str>>,
    trace: Arc<TraceLog>,
}

impl Fsm {
    /// Build the FSM in its initial state and open that state's span.
    pub fn new(definition: FsmDefinition, pid: u32, trace: Arc<TraceLog>) -> Self {
        let machine = FsmMachine::new(definition);
        let name = machine.name().to_string();
        let initial: Arc<str> = Arc::from(machine.current());
        trace.boundary(&name, pid, CAT_STATE, vec![initial.to_string()]);

        let (state_tx, _) = watch::channel(initial);
        Self {
            name,
            pid,
            machine: Mutex::new(machine),
            state_tx,
            trace,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_state(&self) -> Arc<str> {
        self.state_tx.borrow().clone()
    }

    /// Receiver woken whenever the current state changes.
    pub fn watch_state(&self) -> watch::Receiver<Arc<str>> {
        self.state_tx.subscribe()
    }

    /// Apply `event`, running the resulting transition's actions through `component`.
    ///
    /// Returns whether a transition happened.
    pub(super) async fn handle_event(&self, component: &Arc<Component>, event: &str) -> bool {
        let mut machine = self.machine.lock().await;
        machine.process_input(FsmInput::Event(event.to_string()));
        let Some(FsmOutput::Transition(plan)) = machine.poll_output() else {
            return false;
        };

        self.trace.boundary(&self.name, self.pid, CAT_STATE, vec![plan.from.clone()]);
        info!(component = %component.id(), fsm = %self.name, state = %plan.from, event, "Departing state");
        component.run_actions(&plan.exit_actions).await;

        let publish_state = async {
            self.state_tx.send_replace(Arc::from(plan.to.as_str()));
            self.trace.boundary(&self.name, self.pid, CAT_STATE, vec![plan.to.clone()]);
            info!(component = %component.id(), fsm = %self.name, state = %plan.to, "Entered state");
        };
        tokio::join!(publish_state, component.run_actions(&plan.actions));

        component.run_actions(&plan.entry_actions).await;
        true
    }
}
